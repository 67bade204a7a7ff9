use std::sync::atomic::{AtomicI32, Ordering};

use futures_core::future::BoxFuture;

use crate::{bson::Document, error::Result, options::ServerAddress};

/// Returns a new request id, unique across every connection in the process.
pub(crate) fn next_request_id() -> i32 {
    static REQUEST_ID: AtomicI32 = AtomicI32::new(0);

    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// A single request or reply exchanged with a server. The document is the complete command body,
/// including `$db`.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct Message {
    /// The id the sender assigned to this message.
    pub request_id: i32,

    /// For replies, the id of the request being answered. Zero for requests.
    pub response_to: i32,

    /// The command or reply document.
    pub document: Document,
}

impl Message {
    /// Creates a request message.
    pub fn request(request_id: i32, document: Document) -> Self {
        Self {
            request_id,
            response_to: 0,
            document,
        }
    }

    /// Creates a reply to `request`.
    pub fn reply_to(request: &Message, document: Document) -> Self {
        Self {
            request_id: next_request_id(),
            response_to: request.request_id,
            document,
        }
    }
}

/// An established byte stream to one server, framed as request/response documents keyed by
/// request id. Implementations own the wire codec.
pub trait Transport: Send {
    /// Sends `message` and waits for the matching reply.
    fn send<'a>(&'a mut self, message: Message) -> BoxFuture<'a, Result<Message>>;

    /// Shuts the stream down. Errors are ignored by callers.
    fn close<'a>(&'a mut self) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// Opens [`Transport`]s to server addresses. The topology uses a TCP connector unless one is
/// supplied via [`Topology::with_connector`](crate::Topology::with_connector).
pub trait Connector: Send + Sync {
    /// Opens a new transport to `address`. The caller bounds the call with the connect timeout.
    fn connect<'a>(&'a self, address: &'a ServerAddress) -> BoxFuture<'a, Result<Box<dyn Transport>>>;
}
