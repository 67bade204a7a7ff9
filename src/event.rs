//! Observers for topology changes and for the commands sent to the deployment.
//!
//! Topology events go through the topology's [`EventRegistry`](sdam::EventRegistry), which
//! several observers can subscribe to. Command events go to the single handler configured with
//! [`ClientOptions::command_event_handler`](crate::options::ClientOptions).

pub mod command;
pub mod sdam;

use std::{fmt, sync::Arc};

use futures_core::future::BoxFuture;
use tokio::sync::mpsc;

use crate::runtime;

type SyncObserver<T> = Arc<dyn Fn(T) + Send + Sync>;
type AsyncObserver<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Where events of type `T` are delivered.
///
/// A plain closure runs on the task that produced the event, so it should return quickly. An
/// async closure is spawned for each event. A channel sender receives the events in the order
/// they were produced:
///
/// ```rust
/// # use mongodb_core::{event::{sdam::TopologyEvent, EventHandler}, options::ClientOptions};
/// # fn example() {
/// let (sender, mut receiver) = tokio::sync::mpsc::channel::<TopologyEvent>(64);
/// let options = ClientOptions::builder()
///     .hosts(vec!["localhost:27017".parse().unwrap()])
///     .sdam_event_handler(EventHandler::from(sender))
///     .build();
/// # let _ = (options, &mut receiver);
/// # }
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub enum EventHandler<T> {
    /// Invoked synchronously with every event.
    Callback(SyncObserver<T>),
    /// Invoked with every event; the returned future is spawned.
    AsyncCallback(AsyncObserver<T>),
    /// Every event is sent on the channel.
    TokioMpsc(mpsc::Sender<T>),
}

impl<T> fmt::Debug for EventHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Callback(_) => "Callback",
            Self::AsyncCallback(_) => "AsyncCallback",
            Self::TokioMpsc(_) => "TokioMpsc",
        };
        f.debug_tuple("EventHandler").field(&kind).finish()
    }
}

impl<T> From<mpsc::Sender<T>> for EventHandler<T> {
    fn from(sender: mpsc::Sender<T>) -> Self {
        Self::TokioMpsc(sender)
    }
}

impl<T: Send + Sync + 'static> EventHandler<T> {
    /// Delivers events to `f`.
    pub fn callback(f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self::Callback(Arc::new(f))
    }

    /// Delivers events to `f` and spawns the future it returns.
    pub fn async_callback(f: impl Fn(T) -> BoxFuture<'static, ()> + Send + Sync + 'static) -> Self {
        Self::AsyncCallback(Arc::new(f))
    }

    pub(crate) fn handle(&self, event: T) {
        match self {
            Self::Callback(observer) => observer(event),
            Self::AsyncCallback(observer) => {
                runtime::spawn(observer(event));
            }
            Self::TokioMpsc(sender) => match sender.try_send(event) {
                Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
                // A full channel must not stall the topology; the send finishes in the
                // background.
                Err(mpsc::error::TrySendError::Full(event)) => {
                    let sender = sender.clone();
                    runtime::spawn(async move {
                        let _ = sender.send(event).await;
                    });
                }
            },
        }
    }
}
