//! Error and result types.
//!
//! Every fallible operation returns [`Result`]. The [`ErrorKind`] says what went wrong. The
//! classification helpers on [`Error`] group the kinds the way callers usually branch on them:
//! connectivity, server, usage and lifecycle errors.

use std::{collections::HashSet, fmt, io, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    bson::{doc, Document},
    options::ServerAddress,
};

/// Codes after which the reporting server is no longer treated as primary or usable.
const NOT_WRITABLE_PRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const NODE_IS_RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];

const NAMESPACE_NOT_FOUND_CODE: i32 = 26;

/// Label carried by every error raised by the transport.
pub const NETWORK_ERROR: &str = "NetworkError";

/// Shorthand for results whose error is [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// An error from this crate. Cloning is cheap: the kind is boxed and I/O errors are shared.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, labels: {labels:?}, source: {source:?}")]
#[non_exhaustive]
pub struct Error {
    /// What went wrong.
    pub kind: Box<ErrorKind>,

    labels: HashSet<String>,

    /// The error this one was raised because of.
    #[source]
    pub(crate) source: Option<Box<Error>>,

    /// The reply that reported the error, for server errors.
    pub(crate) server_response: Option<Box<Document>>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let mut label_set = HashSet::new();
        if let Some(labels) = labels {
            label_set.extend(labels);
        }
        if let ErrorKind::Io(_) = kind {
            label_set.insert(NETWORK_ERROR.to_string());
        }

        Self {
            kind: Box::new(kind),
            labels: label_set,
            source: None,
            server_response: None,
        }
    }

    /// Wraps `message` in an [`ErrorKind::Authentication`] naming `mechanism`. Meant for
    /// [`Authenticator`](crate::Authenticator) implementations.
    pub fn authentication_error(mechanism: &str, message: &str) -> Self {
        ErrorKind::Authentication {
            message: format!("{} authentication failed: {}", mechanism, message),
        }
        .into()
    }

    pub(crate) fn pool_cleared_error(address: &ServerAddress, cause: &Error) -> Self {
        ErrorKind::ConnectionPoolCleared {
            message: format!("the pool for {} was cleared after: {}", address, cause),
        }
        .into()
    }

    pub(crate) fn network_timeout() -> Self {
        ErrorKind::from(io::ErrorKind::TimedOut).into()
    }

    pub(crate) fn topology_destroyed() -> Self {
        ErrorKind::TopologyDestroyed.into()
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ErrorKind::Internal {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn cursor_closed(message: impl Into<String>) -> Self {
        ErrorKind::CursorClosed {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn incompatible_server(message: impl Into<String>) -> Self {
        ErrorKind::IncompatibleServer {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn no_connection_available(message: impl Into<String>) -> Self {
        ErrorKind::NoConnectionAvailable {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn server_selection(message: impl Into<String>) -> Self {
        ErrorKind::ServerSelection {
            message: message.into(),
        }
        .into()
    }

    /// A timeout, refused or reset connection, or a pool cleared because of one.
    pub fn is_network_error(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. }
        )
    }

    /// A network error caused by a timeout.
    pub fn is_network_timeout(&self) -> bool {
        match *self.kind {
            ErrorKind::Io(ref error) => error.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// The deployment could not be reached: a network error, nothing to dispatch to, no server
    /// matching the read preference, or reconnecting gave up.
    pub fn is_connectivity_error(&self) -> bool {
        self.is_network_error()
            || matches!(
                *self.kind,
                ErrorKind::NoConnectionAvailable { .. }
                    | ErrorKind::ServerSelection { .. }
                    | ErrorKind::ReconnectFailed { .. }
            )
    }

    /// The server answered and rejected the operation. These are never retried.
    pub fn is_server_error(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::Command(_) | ErrorKind::Write(_) | ErrorKind::Authentication { .. }
        )
    }

    /// The caller misused the API, e.g. changed a cursor after iterating it or passed an invalid
    /// sort.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::InvalidArgument { .. } | ErrorKind::CursorClosed { .. }
        )
    }

    /// The topology was closed or destroyed.
    pub fn is_lifecycle_error(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::TopologyDestroyed | ErrorKind::ReconnectFailed { .. }
        )
    }

    pub(crate) fn is_ns_not_found(&self) -> bool {
        self.server_code() == Some(NAMESPACE_NOT_FOUND_CODE)
    }

    /// The reporting server stepped down or is recovering, so its description is stale.
    pub(crate) fn is_state_change_error(&self) -> bool {
        self.server_code().is_some_and(|code| {
            NOT_WRITABLE_PRIMARY_CODES.contains(&code) || NODE_IS_RECOVERING_CODES.contains(&code)
        })
    }

    /// The code of the command or write concern error behind this error, if any.
    fn server_code(&self) -> Option<i32> {
        let own = match *self.kind {
            ErrorKind::Command(ref error) => Some(error.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(ref error)) => Some(error.code),
            _ => None,
        };
        own.or_else(|| self.source.as_ref()?.server_code())
    }

    /// The labels attached to this error, not including those of its source.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error or one of its sources carries `label`.
    pub fn contains_label(&self, label: impl AsRef<str>) -> bool {
        let label = label.as_ref();
        self.labels.contains(label)
            || self
                .source
                .as_ref()
                .is_some_and(|source| source.contains_label(label))
    }

    /// The raw reply of the server that reported this error.
    pub fn server_response(&self) -> Option<&Document> {
        self.server_response.as_deref()
    }

    /// Records `response` as the reply that reported this error, unless one is already set.
    pub(crate) fn with_server_response(mut self, response: &Document) -> Self {
        self.server_response
            .get_or_insert_with(|| Box::new(response.clone()));
        self
    }

    pub(crate) fn with_source(mut self, source: impl Into<Option<Error>>) -> Self {
        self.source = source.into().map(Box::new);
        self
    }

    /// Strips what a sensitive command's reply could leak. Codes, code names and labels stay.
    pub(crate) fn redact(&mut self) {
        if let Some(ref mut source) = self.source {
            source.redact();
        }
        if self.server_response.is_some() {
            self.server_response = Some(Box::new(doc! { "redacted": true }));
        }

        // Exhaustive so that a new kind carrying server text is not forgotten.
        match *self.kind {
            ErrorKind::Command(ref mut error) => error.message = REDACTED.to_string(),
            ErrorKind::Write(WriteFailure::WriteConcernError(ref mut error)) => {
                error.message = REDACTED.to_string();
                error.details = None;
            }
            ErrorKind::Write(WriteFailure::WriteError(ref mut error)) => {
                error.message = REDACTED.to_string();
                error.details = None;
            }
            ErrorKind::InvalidArgument { .. }
            | ErrorKind::Authentication { .. }
            | ErrorKind::BsonDeserialization(_)
            | ErrorKind::BsonSerialization(_)
            | ErrorKind::Internal { .. }
            | ErrorKind::Io(_)
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::NoConnectionAvailable { .. }
            | ErrorKind::InvalidResponse { .. }
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::InvalidTlsConfig { .. }
            | ErrorKind::IncompatibleServer { .. }
            | ErrorKind::CursorClosed { .. }
            | ErrorKind::ReconnectFailed { .. }
            | ErrorKind::TopologyDestroyed => {}
        }
    }
}

const REDACTED: &str = "REDACTED";

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        Self::new(ErrorKind::from(error), None::<Vec<String>>)
    }
}

impl From<crate::bson::de::Error> for ErrorKind {
    fn from(error: crate::bson::de::Error) -> Self {
        Self::BsonDeserialization(error)
    }
}

impl From<crate::bson::ser::Error> for ErrorKind {
    fn from(error: crate::bson::ser::Error) -> Self {
        Self::BsonSerialization(error)
    }
}

impl From<crate::bson::document::ValueAccessError> for ErrorKind {
    fn from(error: crate::bson::document::ValueAccessError) -> Self {
        Self::InvalidResponse {
            message: error.to_string(),
        }
    }
}

impl From<io::Error> for ErrorKind {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

impl From<io::ErrorKind> for ErrorKind {
    fn from(kind: io::ErrorKind) -> Self {
        Self::Io(Arc::new(io::Error::from(kind)))
    }
}

/// What went wrong.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An option or argument was rejected before anything was sent.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// The [`Authenticator`](crate::Authenticator) rejected a new connection.
    #[error("{message}")]
    #[non_exhaustive]
    Authentication { message: String },

    #[error("{0}")]
    BsonDeserialization(crate::bson::de::Error),

    #[error("{0}")]
    BsonSerialization(crate::bson::ser::Error),

    /// A command reply with `ok: 0`. The reply is kept in [`Error::server_response`].
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// A bug in this crate.
    #[error("Internal error: {message}")]
    #[non_exhaustive]
    Internal { message: String },

    /// The transport failed: timeout, refused or reset connection.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),

    /// The pool was cleared while the operation waited for or used one of its connections.
    #[error("{message}")]
    #[non_exhaustive]
    ConnectionPoolCleared { message: String },

    /// The topology was not connected and could not buffer the operation, because buffering is
    /// disabled or the buffer is full.
    #[error("No connection available: {message}")]
    #[non_exhaustive]
    NoConnectionAvailable { message: String },

    /// A reply that does not have the expected shape.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// No known server matches the read preference.
    #[error("{message}")]
    #[non_exhaustive]
    ServerSelection { message: String },

    /// The TLS options could not be turned into a client configuration.
    #[error("{message}")]
    #[non_exhaustive]
    InvalidTlsConfig { message: String },

    /// A write that was applied but could not satisfy its write concern, or a single write error
    /// outside of a batch.
    #[error("An error occurred when trying to execute a write operation: {0:?}")]
    Write(WriteFailure),

    /// The deployment's wire version is too old for the operation.
    #[error("The server does not support a database operation: {message}")]
    #[non_exhaustive]
    IncompatibleServer { message: String },

    /// A cursor was changed after it was opened, or used after it was closed.
    #[error("Cursor is closed: {message}")]
    #[non_exhaustive]
    CursorClosed { message: String },

    /// Every server failed all of its reconnect attempts, so the topology was destroyed.
    #[error("{message}")]
    #[non_exhaustive]
    ReconnectFailed { message: String },

    /// The topology was closed.
    #[error("Topology was destroyed")]
    TopologyDestroyed,
}

/// The error fields of an `ok: 0` reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CommandError {
    #[allow(missing_docs)]
    #[serde(default)]
    pub code: i32,

    #[allow(missing_docs)]
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    #[allow(missing_docs)]
    #[serde(rename = "errmsg", default)]
    pub message: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error code {} ({}): {}", self.code, self.code_name, self.message)
    }
}

/// A `writeConcernError` entry of a write reply.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct WriteConcernError {
    #[allow(missing_docs)]
    #[serde(default)]
    pub code: i32,

    #[allow(missing_docs)]
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    #[allow(missing_docs)]
    #[serde(alias = "errmsg", default)]
    pub message: String,

    /// The `errInfo` document, e.g. the write concern that was not satisfied.
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}

/// A write error that is not tied to a position in a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct WriteError {
    #[allow(missing_docs)]
    pub code: i32,

    #[allow(missing_docs)]
    #[serde(rename = "codeName", default)]
    pub code_name: Option<String>,

    #[allow(missing_docs)]
    #[serde(rename = "errmsg", default)]
    pub message: String,

    /// The `errInfo` document, e.g. document validation details.
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}

/// A `writeErrors` entry: the failure of one document or statement of a batched write.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct IndexedWriteError {
    /// The position of the failed document or statement in the caller's list. Batches are
    /// re-indexed so that this is never relative to a single batch.
    #[serde(default)]
    pub index: usize,

    #[allow(missing_docs)]
    pub code: i32,

    #[allow(missing_docs)]
    #[serde(rename = "codeName", default)]
    pub code_name: Option<String>,

    #[allow(missing_docs)]
    #[serde(rename = "errmsg", default)]
    pub message: String,

    /// The `errInfo` document.
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}

/// The two ways a write can fail as a whole.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum WriteFailure {
    #[allow(missing_docs)]
    WriteConcernError(WriteConcernError),
    #[allow(missing_docs)]
    WriteError(WriteError),
}
