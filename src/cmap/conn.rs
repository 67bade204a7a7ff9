use std::time::Duration;

use derive_where::derive_where;

use super::transport::{next_request_id, Message, Transport};
use crate::{
    bson::Document,
    error::{Error, Result},
    hello::HelloReply,
    options::ServerAddress,
    runtime,
    sdam::ServerType,
};

/// Identifies a connection in command events.
#[derive(Clone, Debug, Default, PartialEq)]
#[non_exhaustive]
pub struct ConnectionInfo {
    /// Unique among the connections of one pool.
    pub id: u32,

    /// The server on the other end.
    pub address: ServerAddress,
}

/// A command addressed to a database. `$db` is added when the command is put on the wire.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct Command {
    /// The first key of `body`.
    pub name: String,

    #[allow(missing_docs)]
    pub target_db: String,

    #[allow(missing_docs)]
    pub body: Document,
}

impl Command {
    #[allow(missing_docs)]
    pub fn new(name: impl ToString, target_db: impl ToString, body: Document) -> Self {
        Self {
            name: name.to_string(),
            target_db: target_db.to_string(),
            body,
        }
    }

    pub(crate) fn into_message(self, request_id: i32) -> Message {
        let Self {
            target_db,
            mut body,
            ..
        } = self;
        body.insert("$db", target_db);
        Message::request(request_id, body)
    }
}

/// The limits and capabilities a server announced in the handshake of one connection. Operations
/// build their commands against it.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct StreamDescription {
    pub(crate) server_address: ServerAddress,

    /// What the server was when the connection was opened. It may have changed role since.
    pub(crate) initial_server_type: ServerType,

    pub(crate) max_wire_version: Option<i32>,
    pub(crate) min_wire_version: Option<i32>,

    /// Largest document a write may carry.
    pub(crate) max_bson_object_size: i64,

    /// Most statements a single insert, update or delete may carry.
    pub(crate) max_write_batch_size: i64,

    /// Largest wire message the server accepts.
    pub(crate) max_message_size_bytes: i32,
}

const DEFAULT_MAX_WRITE_BATCH_SIZE: i64 = 1000;

impl StreamDescription {
    pub(crate) fn from_hello_reply(reply: &HelloReply) -> Self {
        let hello = &reply.command_response;
        Self {
            server_address: reply.server_address.clone(),
            initial_server_type: hello.server_type(),
            max_wire_version: hello.max_wire_version,
            min_wire_version: hello.min_wire_version,
            max_bson_object_size: hello.max_bson_object_size,
            max_write_batch_size: hello
                .max_write_batch_size
                .unwrap_or(DEFAULT_MAX_WRITE_BATCH_SIZE),
            max_message_size_bytes: hello.max_message_size_bytes,
        }
    }
}

/// A [`Transport`] to one server together with the state the pool and the dispatcher track
/// for it.
#[derive_where(Debug)]
pub struct Connection {
    pub(crate) id: u32,
    pub(crate) address: ServerAddress,

    /// The pool generation this connection was opened in. A cleared pool bumps its generation
    /// and stops reusing older connections.
    pub(crate) generation: u32,

    /// Filled in once the handshake succeeds.
    pub(crate) stream_description: Option<StreamDescription>,

    /// Set once an I/O failure leaves the stream in an unknown state.
    errored: bool,

    /// Set while a request is written but its reply not yet read. A caller that stops waiting
    /// leaves the reply on the stream.
    awaiting_reply: bool,

    socket_timeout: Option<Duration>,

    #[derive_where(skip)]
    transport: Box<dyn Transport>,
}

impl Connection {
    pub(crate) fn new(
        id: u32,
        address: ServerAddress,
        generation: u32,
        transport: Box<dyn Transport>,
        socket_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            address,
            generation,
            stream_description: None,
            errored: false,
            awaiting_reply: false,
            socket_timeout,
            transport,
        }
    }

    #[allow(missing_docs)]
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            address: self.address.clone(),
        }
    }

    #[allow(missing_docs)]
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// `None` until the handshake completes.
    pub fn max_wire_version(&self) -> Option<i32> {
        self.stream_description
            .as_ref()
            .and_then(|description| description.max_wire_version)
    }

    pub(crate) fn stream_description(&self) -> Result<&StreamDescription> {
        self.stream_description
            .as_ref()
            .ok_or_else(|| Error::internal("connection used before its handshake completed"))
    }

    /// Whether the next command may be sent on this connection.
    pub(crate) fn is_reusable(&self) -> bool {
        !self.errored && !self.awaiting_reply
    }

    /// Sends `command` and waits for the server's reply document.
    ///
    /// This only fails when the exchange itself fails. Whether the command succeeded is up to
    /// the caller to read from the reply. Network failures and timeouts mark the connection as
    /// errored so that it is not reused.
    pub async fn send_command(
        &mut self,
        command: Command,
        request_id: impl Into<Option<i32>>,
    ) -> Result<Document> {
        let request_id = request_id.into().unwrap_or_else(next_request_id);
        let request = command.into_message(request_id);

        self.awaiting_reply = true;
        let exchange = runtime::maybe_timeout(self.socket_timeout, self.transport.send(request))
            .await
            .and_then(std::convert::identity);
        self.awaiting_reply = false;
        let reply = exchange.inspect_err(|error| {
            if error.is_network_error() {
                self.errored = true;
            }
        })?;

        if reply.response_to != request_id {
            self.errored = true;
            return Err(Error::invalid_response(format!(
                "reply answers request {} instead of {}",
                reply.response_to, request_id
            )));
        }
        Ok(reply.document)
    }

    pub(crate) async fn close(&mut self) {
        self.errored = true;
        self.transport.close().await;
    }
}
