use crate::{
    event::sdam::TopologyEvent,
    trace::{TracingRepresentation, TOPOLOGY_TRACING_EVENT_TARGET},
};

/// Mirrors every published topology event as a tracing event.
#[derive(Clone, Debug, Default)]
pub(crate) struct TopologyTracingEventEmitter;

impl TopologyTracingEventEmitter {
    pub(crate) fn new() -> TopologyTracingEventEmitter {
        TopologyTracingEventEmitter
    }

    pub(crate) fn handle(&self, event: &TopologyEvent) {
        match event {
            TopologyEvent::ServerHeartbeatFailed(ev) => {
                tracing::warn!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    serverHost = ev.server_address.host(),
                    serverPort = ev.server_address.port(),
                    durationMS = ev.duration.as_millis() as u64,
                    failure = ev.failure.tracing_representation(),
                    "Server heartbeat failed"
                );
            }
            TopologyEvent::ServerHeartbeatSucceeded(ev) => {
                tracing::trace!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    serverHost = ev.server_address.host(),
                    serverPort = ev.server_address.port(),
                    durationMS = ev.duration.as_millis() as u64,
                    "Server heartbeat succeeded"
                );
            }
            TopologyEvent::ServerHeartbeatStarted(ev) => {
                tracing::trace!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    serverHost = ev.server_address.host(),
                    serverPort = ev.server_address.port(),
                    "Server heartbeat started"
                );
            }
            TopologyEvent::ServerOpening(address) | TopologyEvent::ServerClosed(address) => {
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    serverHost = address.host(),
                    serverPort = address.port(),
                    event = event.name(),
                );
            }
            TopologyEvent::ServerDescriptionChanged(ev) => {
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    serverHost = ev.address.host(),
                    serverPort = ev.address.port(),
                    previousType = ?ev.previous_description.server_type(),
                    newType = ?ev.new_description.server_type(),
                    "Server description changed"
                );
            }
            TopologyEvent::TopologyDescriptionChanged(ev) => {
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    previousType = ?ev.previous_type,
                    newType = ?ev.new_type,
                    servers = ev
                        .servers
                        .iter()
                        .map(|s| s.address().tracing_representation())
                        .collect::<Vec<_>>()
                        .join(","),
                    "Topology description changed"
                );
            }
            TopologyEvent::ReconnectFailed(error) => {
                tracing::warn!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    failure = error.tracing_representation(),
                    "Reconnect failed"
                );
            }
            TopologyEvent::Joined(ev) | TopologyEvent::Left(ev) => {
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    serverHost = ev.address.host(),
                    serverPort = ev.address.port(),
                    serverType = ?ev.server_type,
                    event = event.name(),
                );
            }
            TopologyEvent::Open
            | TopologyEvent::Close
            | TopologyEvent::Reconnect
            | TopologyEvent::TopologyOpening
            | TopologyEvent::TopologyClosed
            | TopologyEvent::FullSetup
            | TopologyEvent::All => {
                tracing::debug!(target: TOPOLOGY_TRACING_EVENT_TARGET, event = event.name());
            }
        }
    }
}
