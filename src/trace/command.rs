use crate::{
    event::command::CommandEvent,
    trace::{
        serialize_command_or_reply,
        TracingRepresentation,
        COMMAND_TRACING_EVENT_TARGET,
        DEFAULT_MAX_DOCUMENT_LENGTH_BYTES,
    },
};

/// Writes every command event to the `mongodb_core::command` target at `DEBUG`. It sees the same
/// redacted payloads as command observers do.
#[derive(Clone, Debug)]
pub(crate) struct CommandLogger {
    max_document_length: usize,
}

impl CommandLogger {
    pub(crate) fn new(max_document_length: Option<usize>) -> Self {
        Self {
            max_document_length: max_document_length.unwrap_or(DEFAULT_MAX_DOCUMENT_LENGTH_BYTES),
        }
    }

    pub(crate) fn log(&self, event: &CommandEvent) {
        // Serializing documents is the expensive part; skip it when nobody listens.
        if !tracing::enabled!(target: COMMAND_TRACING_EVENT_TARGET, tracing::Level::DEBUG) {
            return;
        }

        match event {
            CommandEvent::Started(started) => {
                let connection = &started.connection;
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    commandName = %started.command_name,
                    databaseName = %started.db,
                    command = serialize_command_or_reply(&started.command, self.max_document_length),
                    requestId = started.request_id,
                    operationId = started.operation_id,
                    driverConnectionId = connection.id,
                    serverHost = connection.address.host(),
                    serverPort = connection.address.port(),
                    "Command started"
                );
            }
            CommandEvent::Succeeded(succeeded) => {
                let connection = &succeeded.connection;
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    commandName = %succeeded.command_name,
                    reply = serialize_command_or_reply(&succeeded.reply, self.max_document_length),
                    durationMS = succeeded.duration.as_millis() as u64,
                    requestId = succeeded.request_id,
                    operationId = succeeded.operation_id,
                    driverConnectionId = connection.id,
                    serverHost = connection.address.host(),
                    serverPort = connection.address.port(),
                    "Command succeeded"
                );
            }
            CommandEvent::Failed(failed) => {
                let connection = &failed.connection;
                tracing::debug!(
                    target: COMMAND_TRACING_EVENT_TARGET,
                    commandName = %failed.command_name,
                    failure = failed.failure.tracing_representation(),
                    durationMS = failed.duration.as_millis() as u64,
                    requestId = failed.request_id,
                    operationId = failed.operation_id,
                    driverConnectionId = connection.id,
                    serverHost = connection.address.host(),
                    serverPort = connection.address.port(),
                    "Command failed"
                );
            }
        }
    }
}
