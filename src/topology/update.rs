use std::sync::Arc;

use super::{
    state::{description_changes, TopologyState},
    Topology,
};
use crate::{
    error::{Error, ErrorKind},
    event::sdam::TopologyEvent,
    sdam::{Monitor, Server, ServerDescription},
    trace::TOPOLOGY_TRACING_EVENT_TARGET,
};

/// What changed in the topology's connectivity after an update.
enum Transition {
    /// Connectivity was lost and the servers are being checked.
    Reconnecting(Vec<Arc<Server>>),

    /// Connectivity was lost and reconnecting is disabled.
    Lost,

    /// Connectivity came back.
    Reconnected,

    /// Every server failed the configured number of checks.
    ReconnectFailed(u32, Option<Error>),

    /// The deployment became fully set up for the first time.
    FullSetup,
}

impl Topology {
    /// Called by a monitor after each check.
    pub(crate) async fn handle_server_check(&self, description: ServerDescription) {
        self.apply_server_description(description, true).await;
    }

    /// Applies a new description of one server, publishes the resulting topology and the events
    /// describing the change, then re-evaluates connectivity.
    ///
    /// Descriptions of servers that are no longer part of the topology are ignored.
    pub(crate) async fn apply_server_description(
        &self,
        description: ServerDescription,
        from_monitor: bool,
    ) {
        let (events, removed_monitors) = {
            let _guard = self.inner.update_lock.lock().await;
            let mut snapshot = self.snapshot();
            if snapshot.state == TopologyState::Destroyed {
                return;
            }
            let Some(server) = snapshot.servers.get(&description.address).cloned() else {
                return;
            };

            if from_monitor {
                let failures = server.record_check(description.error().is_none());
                if failures > 0 {
                    tracing::warn!(
                        target: TOPOLOGY_TRACING_EVENT_TARGET,
                        serverHost = server.address.host(),
                        serverPort = server.address.port(),
                        consecutiveFailures = failures,
                        error = description.error().map(|e| e.to_string()),
                        "Server check failed"
                    );
                }
            }
            if let Some(error) = description.error() {
                server.pool.clear(Some(error));
            }

            let address = description.address.clone();
            let previous = snapshot.description.clone();
            if let Err(error) = snapshot.description.update(description) {
                if let Err(error) = snapshot
                    .description
                    .update(ServerDescription::new_from_error(&address, error))
                {
                    tracing::warn!(
                        target: TOPOLOGY_TRACING_EVENT_TARGET,
                        serverHost = address.host(),
                        serverPort = address.port(),
                        error = %error,
                        "Failed to record server as unknown"
                    );
                }
            }

            let changes = description_changes(snapshot.kind, &previous, &snapshot.description);

            for added in changes.added.iter() {
                let (server, monitor) = self.new_server(added);
                if snapshot.monitors_started {
                    monitor.start(self.downgrade(), &server);
                    server.request_check();
                } else {
                    self.park_monitor(added.clone(), monitor);
                }
                snapshot.servers.insert(added.clone(), server);
            }

            let mut removed_monitors: Vec<Monitor> = Vec::new();
            for removed in changes.removed.iter() {
                if let Some(server) = snapshot.servers.remove(removed) {
                    server.shutdown();
                }
                if let Ok(mut monitors) = self.inner.idle_monitors.lock() {
                    removed_monitors.extend(monitors.remove(removed));
                }
            }

            self.publish(snapshot);
            (changes.events, removed_monitors)
        };

        for event in events {
            self.inner.events.emit(event);
        }
        for mut monitor in removed_monitors {
            monitor.close_connection().await;
        }

        self.update_connectivity().await;
    }

    /// Moves between `Connected` and `Reconnecting` as the deployment's connectivity changes,
    /// destroying the topology when it cannot be recovered.
    pub(crate) async fn update_connectivity(&self) {
        let connect_with_no_primary = self.inner.options.connect_with_no_primary();
        let mut transitions = Vec::new();

        {
            let _guard = self.inner.update_lock.lock().await;
            let mut snapshot = self.snapshot();
            let has_connectivity = snapshot.has_connectivity(connect_with_no_primary);
            let mut changed = false;

            match snapshot.state {
                TopologyState::Connected if !has_connectivity => {
                    if self.inner.options.auto_reconnect() {
                        snapshot.state = TopologyState::Reconnecting;
                        changed = true;
                        transitions.push(Transition::Reconnecting(
                            snapshot.servers.values().cloned().collect(),
                        ));
                    } else {
                        transitions.push(Transition::Lost);
                    }
                }
                TopologyState::Reconnecting if has_connectivity => {
                    snapshot.state = TopologyState::Connected;
                    changed = true;
                    transitions.push(Transition::Reconnected);
                }
                TopologyState::Reconnecting => {
                    let tries = self.inner.options.reconnect_tries();
                    let exhausted = !snapshot.servers.is_empty()
                        && snapshot
                            .servers
                            .values()
                            .all(|server| server.consecutive_failures() >= tries);
                    if exhausted {
                        let last_error = snapshot
                            .description
                            .servers()
                            .find_map(|server| server.error().cloned());
                        transitions.push(Transition::ReconnectFailed(tries, last_error));
                    }
                }
                _ => {}
            }

            if snapshot.state == TopologyState::Connected
                && !snapshot.fullsetup_emitted
                && snapshot.is_fully_set_up()
            {
                snapshot.fullsetup_emitted = true;
                changed = true;
                transitions.push(Transition::FullSetup);
            }

            if changed {
                self.publish(snapshot);
            }
        }

        for transition in transitions {
            self.perform(transition).await;
        }
    }

    async fn perform(&self, transition: Transition) {
        match transition {
            Transition::Reconnecting(servers) => {
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    "Topology lost connectivity; reconnecting"
                );
                for server in servers {
                    server.reset_failures();
                    server.request_check();
                }
            }
            Transition::Lost => {
                let error = Error::no_connection_available(
                    "connectivity to the deployment was lost and autoReconnect is disabled",
                );
                self.destroy(Some(error), false).await;
            }
            Transition::Reconnected => {
                self.refresh_capabilities();
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    "Topology reconnected"
                );
                self.spawn_replay();
                self.inner.events.emit(TopologyEvent::Reconnect);
            }
            Transition::ReconnectFailed(tries, last_error) => {
                let error = Error::from(ErrorKind::ReconnectFailed {
                    message: format!("failed to reconnect after {} attempts", tries),
                })
                .with_source(last_error);
                self.destroy(Some(error), true).await;
            }
            Transition::FullSetup => {
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    kind = %self.kind(),
                    "Topology fully set up"
                );
                self.inner.events.emit(TopologyEvent::FullSetup);
                self.inner.events.emit(TopologyEvent::All);
            }
        }
    }
}
