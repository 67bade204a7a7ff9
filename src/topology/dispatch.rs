use std::{sync::Arc, time::Instant};

use super::Topology;
use crate::{
    bson::{doc, Document},
    cmap::transport::next_request_id,
    error::{Error, ErrorKind, Result},
    event::command::{
        should_redact,
        CommandEvent,
        CommandFailedEvent,
        CommandStartedEvent,
        CommandSucceededEvent,
    },
    operation::{BatchedWrite, Operation},
    pending::Dispatch,
    results::{CommandReply, WriteResult},
    router::{self, DecorationContext, OperationKind, ResolvedOptions},
    sdam::{Capabilities, Server, ServerDescription},
    selection_criteria::{ReadPreference, SelectionCriteria},
};

impl Topology {
    /// Executes the given operation, buffering it first if the topology cannot serve it yet.
    pub(crate) async fn execute_operation<T: Operation>(&self, op: &mut T) -> Result<T::O> {
        self.execute_operation_with_id(op, None).await
    }

    /// Like [`Topology::execute_operation`], reporting `operation_id` in command events so that
    /// related commands can be correlated. Defaults to the request id.
    pub(crate) async fn execute_operation_with_id<T: Operation>(
        &self,
        op: &mut T,
        operation_id: Option<i32>,
    ) -> Result<T::O> {
        self.check_alive()?;

        let resolved = router::resolve(op.options().as_ref(), &self.inner.defaults);
        let criteria = match op.selection_criteria() {
            Some(criteria) => criteria,
            None if op.kind() == OperationKind::Write => {
                SelectionCriteria::ReadPreference(ReadPreference::Primary)
            }
            None => resolved.selection_criteria(),
        };

        let pending = self.inner.pending.push_unless(
            || self.inner.state.borrow().is_ready_for(&criteria),
            op.namespace().to_string(),
            op.name(),
        )?;
        let mut dispatch = match pending {
            Some(handle) => handle.wait().await?,
            None => Dispatch::immediate(),
        };

        self.check_alive()?;
        self.dispatch(op, &criteria, &resolved, &mut dispatch, operation_id)
            .await
    }

    /// Runs a batched write to completion, merging the result of every batch. An ordered write
    /// stops after the first batch that reports a write error.
    pub(crate) async fn execute_write<T: BatchedWrite>(&self, mut op: T) -> Result<WriteResult> {
        let operation_id = next_request_id();
        let mut result = WriteResult::default();

        loop {
            let batch = self
                .execute_operation_with_id(&mut op, Some(operation_id))
                .await?;
            let stop = op.ordered() && !batch.write_errors.is_empty();
            result.merge(batch);

            if stop || !op.advance() {
                return Ok(result);
            }
        }
    }

    /// Picks a server for `criteria` from the current description.
    pub(crate) fn select_server(&self, criteria: &SelectionCriteria) -> Result<Arc<Server>> {
        let snapshot = self.inner.state.borrow();
        if snapshot.state == super::TopologyState::Destroyed {
            return Err(Error::topology_destroyed());
        }

        snapshot
            .description
            .select_server(criteria)?
            .and_then(|address| snapshot.servers.get(&address).cloned())
            .ok_or_else(|| Error::server_selection("no server available matching read preference"))
    }

    async fn dispatch<T: Operation>(
        &self,
        op: &mut T,
        criteria: &SelectionCriteria,
        resolved: &ResolvedOptions,
        dispatch: &mut Dispatch,
        operation_id: Option<i32>,
    ) -> Result<T::O> {
        let mut reselected = false;
        let (server, mut connection) = loop {
            let server = self.select_server(criteria)?;
            let checkout = tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Err(Error::topology_destroyed()),
                checkout = server.pool.check_out() => checkout,
            };

            match checkout {
                Ok(connection) => break (server, connection),
                // The server was removed or its pool cleared between selection and checkout.
                Err(error)
                    if matches!(*error.kind, ErrorKind::ConnectionPoolCleared { .. })
                        && !reselected =>
                {
                    reselected = true;
                }
                Err(error) => {
                    if error.is_network_error() {
                        self.handle_application_error(&server, &error).await;
                    }
                    return Err(error);
                }
            }
        };

        let description = connection.stream_description()?.clone();
        let mut command = op.build(&description)?;

        let capabilities = self.capabilities().unwrap_or_else(|| {
            Capabilities::from_wire_versions(
                description.min_wire_version.unwrap_or(0),
                description.max_wire_version.unwrap_or(0),
            )
        });
        {
            let snapshot = self.inner.state.borrow();
            let server_type = snapshot
                .description
                .get_server_description(&server.address)
                .map(|server| server.server_type)
                .unwrap_or(description.initial_server_type);
            router::decorate_command(
                &mut command,
                DecorationContext {
                    kind: op.kind(),
                    resolved,
                    capabilities: &capabilities,
                    description: &snapshot.description,
                    server_type,
                },
            )?;
        }

        let request_id = next_request_id();
        let operation_id = operation_id.unwrap_or(request_id);
        let connection_info = connection.info();
        let command_name = command.name.clone();
        let redact = should_redact(&command_name, &command.body);

        self.emit_command_event(
            CommandStartedEvent {
                command: if redact {
                    Document::new()
                } else {
                    command.body.clone()
                },
                db: command.target_db.clone(),
                command_name: command_name.clone(),
                request_id,
                operation_id,
                connection: connection_info.clone(),
            }
            .into(),
        );

        dispatch.dispatched();
        let start = Instant::now();
        let server_shutdown = server.shutdown_token();
        let sent = tokio::select! {
            _ = server_shutdown.cancelled() => None,
            result = connection.send_command(command, request_id) => Some(result),
        };
        let result = match sent {
            Some(result) => result,
            None => {
                connection.discard();
                Err(if self.inner.shutdown.is_cancelled() {
                    Error::topology_destroyed()
                } else {
                    Error::server_selection("no server available matching read preference")
                })
            }
        };
        let duration = start.elapsed();

        let reply = result.and_then(|raw| {
            let normalized = CommandReply::from_document(raw.clone());
            if normalized.is_ok() {
                self.emit_command_event(
                    CommandSucceededEvent {
                        duration,
                        reply: if redact { doc! {} } else { raw },
                        command_name: command_name.clone(),
                        request_id,
                        operation_id,
                        connection: connection_info.clone(),
                    }
                    .into(),
                );
            }
            normalized
        });

        match reply {
            Ok(reply) => op.handle_response(reply, &description),
            Err(error) => {
                let mut failure = error.clone();
                if redact {
                    failure.redact();
                }
                self.emit_command_event(
                    CommandFailedEvent {
                        duration,
                        command_name,
                        failure,
                        request_id,
                        operation_id,
                        connection: connection_info,
                    }
                    .into(),
                );

                if error.is_network_error() || error.is_state_change_error() {
                    self.handle_application_error(&server, &error).await;
                }
                op.handle_error(error)
            }
        }
    }

    /// Marks `server` unknown after an operation saw a network or state change error, so that
    /// selection avoids it until its monitor reports again.
    async fn handle_application_error(&self, server: &Arc<Server>, error: &Error) {
        server.pool.clear(Some(error));
        self.apply_server_description(
            ServerDescription::new_from_error(&server.address, error.clone()),
            false,
        )
        .await;
        server.request_check();
    }

    fn emit_command_event(&self, event: CommandEvent) {
        self.inner.command_logger.log(&event);
        if let Some(ref handler) = self.inner.command_event_handler {
            handler.handle(event);
        }
    }
}
