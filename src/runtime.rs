use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use crate::error::{Error, Result};

/// A handle used for awaiting on tasks spawned with [`spawn`].
#[derive(Debug)]
pub(crate) struct AsyncJoinHandle<T>(tokio::task::JoinHandle<T>);

impl<T> AsyncJoinHandle<T> {
    pub(crate) fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        AsyncJoinHandle(tokio::task::spawn(fut))
    }
}

impl<T> Future for AsyncJoinHandle<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A panicking task panics the awaiting one as well.
        Pin::new(&mut self.0).poll(cx).map(|result| result.unwrap())
    }
}

/// Spawn a task in the background to run a future.
pub(crate) fn spawn<F, O>(fut: F) -> AsyncJoinHandle<O>
where
    F: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    AsyncJoinHandle::spawn(fut)
}

/// Spawn a task if called from within a tokio runtime; otherwise the future is dropped. Used for
/// best-effort cleanup from `Drop` implementations.
pub(crate) fn spawn_if_in_runtime<F>(fut: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
            true
        }
        Err(_) => false,
    }
}

/// Await on a future for a maximum amount of time before returning a network timeout error.
pub(crate) async fn timeout<F: Future>(timeout: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| Error::network_timeout())
}

/// Like [`timeout`], but a `None` duration waits indefinitely.
pub(crate) async fn maybe_timeout<F: Future>(
    duration: Option<Duration>,
    future: F,
) -> Result<F::Output> {
    match duration {
        Some(d) if !d.is_zero() => timeout(d, future).await,
        _ => Ok(future.await),
    }
}

pub(crate) async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}
