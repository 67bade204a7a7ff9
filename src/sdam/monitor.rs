use std::{sync::Arc, time::Instant};

use super::{description::server::ServerDescription, server::Server};
use crate::{
    cmap::{Connection, ConnectionEstablisher},
    event::sdam::{
        EventRegistry,
        ServerHeartbeatFailedEvent,
        ServerHeartbeatStartedEvent,
        ServerHeartbeatSucceededEvent,
        TopologyEvent,
    },
    options::ServerAddress,
    runtime,
    topology::WeakTopology,
};

/// Periodically checks one server and reports the outcome to the topology.
///
/// The monitor owns a dedicated, unauthenticated connection that is reused between checks and
/// reopened after a failure.
pub(crate) struct Monitor {
    address: ServerAddress,
    connection: Option<Connection>,
    establisher: ConnectionEstablisher,
    events: EventRegistry,
}

impl Monitor {
    pub(crate) fn new(
        address: ServerAddress,
        establisher: ConnectionEstablisher,
        events: EventRegistry,
    ) -> Self {
        Self {
            address,
            connection: None,
            establisher,
            events,
        }
    }

    /// Runs a single check and returns the resulting description.
    pub(crate) async fn check_server(&mut self) -> ServerDescription {
        self.events
            .emit(TopologyEvent::ServerHeartbeatStarted(ServerHeartbeatStartedEvent {
                server_address: self.address.clone(),
            }));

        let start = Instant::now();
        let result = match self.connection {
            Some(ref mut connection) => self.establisher.heartbeat(connection).await,
            None => match self
                .establisher
                .establish_monitoring_connection(&self.address)
                .await
            {
                Ok((connection, reply)) => {
                    self.connection = Some(connection);
                    Ok(reply)
                }
                Err(e) => Err(e),
            },
        };
        let duration = start.elapsed();

        match result {
            Ok(reply) => {
                self.events.emit(TopologyEvent::ServerHeartbeatSucceeded(
                    ServerHeartbeatSucceededEvent {
                        duration,
                        reply: reply.raw_command_response.clone(),
                        server_address: self.address.clone(),
                    },
                ));
                ServerDescription::new_from_hello_reply(&self.address, reply)
            }
            Err(error) => {
                self.close_connection().await;
                self.events
                    .emit(TopologyEvent::ServerHeartbeatFailed(ServerHeartbeatFailedEvent {
                        duration,
                        failure: error.clone(),
                        server_address: self.address.clone(),
                    }));
                ServerDescription::new_from_error(&self.address, error)
            }
        }
    }

    /// Drops the monitoring connection. The next check opens a new one.
    pub(crate) async fn close_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
    }

    /// Starts the background loop. A weak reference is used to ensure that the monitor doesn't
    /// keep the topology alive after it has been dropped.
    pub(crate) fn start(self, topology: WeakTopology, server: &Arc<Server>) {
        runtime::spawn(self.execute(topology, server.clone()));
    }

    async fn execute(mut self, topology: WeakTopology, server: Arc<Server>) {
        let shutdown = server.shutdown_token();
        let check_requested = server.check_requested();
        drop(server);

        loop {
            let interval = match topology.upgrade() {
                Some(topology) => topology.check_interval(),
                None => break,
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = check_requested.notified() => {}
                _ = runtime::sleep(interval) => {}
            }

            let description = tokio::select! {
                _ = shutdown.cancelled() => break,
                description = self.check_server() => description,
            };

            match topology.upgrade() {
                Some(topology) if !shutdown.is_cancelled() => {
                    topology.handle_server_check(description).await
                }
                _ => break,
            }
        }

        self.close_connection().await;
    }
}
