//! Events describing each command sent to the deployment and its outcome.
//!
//! Every command produces a [`CommandStartedEvent`] followed by exactly one of
//! [`CommandSucceededEvent`] or [`CommandFailedEvent`] with the same `request_id`.

use std::time::Duration;

use derive_more::From;
use serde::{Serialize, Serializer};

use crate::{bson::Document, cmap::ConnectionInfo, error::Error};

/// A command is about to be written to a connection.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandStartedEvent {
    /// The command as sent, or an empty document for commands carrying credentials.
    pub command: Document,

    #[serde(rename = "databaseName")]
    #[allow(missing_docs)]
    pub db: String,

    /// `find`, `insert`, `getMore` and so on.
    pub command_name: String,

    /// Repeated on the event that concludes this command.
    pub request_id: i32,

    /// Shared by all commands of one logical operation; a cursor keeps the id of the command
    /// that opened it through every `getMore` and the final `killCursors`.
    pub operation_id: i32,

    #[serde(skip)]
    #[allow(missing_docs)]
    pub connection: ConnectionInfo,
}

/// The server replied with `ok: 1`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandSucceededEvent {
    /// From just before the command was written until its reply was read.
    pub duration: Duration,

    /// The reply as received, or an empty document for commands carrying credentials.
    pub reply: Document,

    #[allow(missing_docs)]
    pub command_name: String,

    /// Matches the [`CommandStartedEvent`] of the same command.
    pub request_id: i32,

    #[allow(missing_docs)]
    pub operation_id: i32,

    #[serde(skip)]
    #[allow(missing_docs)]
    pub connection: ConnectionInfo,
}

/// The command failed, either on the server or on its way there and back.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CommandFailedEvent {
    /// From just before the command was written until the failure was observed.
    pub duration: Duration,

    #[allow(missing_docs)]
    pub command_name: String,

    /// What went wrong. For commands carrying credentials the server's reply is stripped.
    #[serde(serialize_with = "display_string")]
    pub failure: Error,

    /// Matches the [`CommandStartedEvent`] of the same command.
    pub request_id: i32,

    #[allow(missing_docs)]
    pub operation_id: i32,

    #[serde(skip)]
    #[allow(missing_docs)]
    pub connection: ConnectionInfo,
}

fn display_string<S: Serializer>(error: &Error, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// Any of the three command events.
#[derive(Clone, Debug, Serialize, From)]
#[serde(untagged)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum CommandEvent {
    Started(CommandStartedEvent),
    Succeeded(CommandSucceededEvent),
    Failed(CommandFailedEvent),
}

impl CommandEvent {
    #[allow(missing_docs)]
    pub fn command_name(&self) -> &str {
        match self {
            Self::Started(started) => &started.command_name,
            Self::Succeeded(succeeded) => &succeeded.command_name,
            Self::Failed(failed) => &failed.command_name,
        }
    }

    #[allow(missing_docs)]
    pub fn request_id(&self) -> i32 {
        match self {
            Self::Started(started) => started.request_id,
            Self::Succeeded(succeeded) => succeeded.request_id,
            Self::Failed(failed) => failed.request_id,
        }
    }
}

/// Commands whose payloads are never handed to observers or written to logs.
const REDACTED_COMMANDS: &[&str] = &[
    "authenticate",
    "saslstart",
    "saslcontinue",
    "getnonce",
    "createuser",
    "updateuser",
    "copydbgetnonce",
    "copydbsaslstart",
    "copydb",
];

/// Whether the command's payload must be redacted. The handshake is only sensitive when it
/// carries speculative authentication.
pub(crate) fn should_redact(command_name: &str, body: &Document) -> bool {
    let name = command_name.to_lowercase();
    if REDACTED_COMMANDS.contains(&name.as_str()) {
        return true;
    }
    matches!(name.as_str(), "hello" | "ismaster") && body.contains_key("speculativeAuthenticate")
}
