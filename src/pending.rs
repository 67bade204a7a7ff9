//! The buffer that holds operations issued while the topology cannot serve them.

use std::{collections::VecDeque, sync::Mutex};

use tokio::sync::oneshot;

use crate::{
    error::{Error, Result},
    trace::TOPOLOGY_TRACING_EVENT_TARGET,
};

/// A FIFO buffer of operations waiting for the topology to become connected.
///
/// The capacity is fixed at construction: a negative capacity buffers without bound, zero
/// disables buffering and a positive value is a hard cap. Operations that cannot be buffered fail
/// immediately with a connectivity error.
#[derive(Debug)]
pub struct PendingOpStore {
    queue: Mutex<VecDeque<PendingOperation>>,
    max_entries: i64,
}

#[derive(Debug)]
struct PendingOperation {
    namespace: String,
    command_name: String,
    resume: oneshot::Sender<Result<Dispatch>>,
}

/// Held by a buffered operation until the store resumes or fails it.
#[derive(Debug)]
pub(crate) struct PendingHandle {
    receiver: oneshot::Receiver<Result<Dispatch>>,
}

impl PendingHandle {
    /// Waits for the store to resume the operation. Fails with the flush error if the store is
    /// flushed first.
    pub(crate) async fn wait(self) -> Result<Dispatch> {
        self.receiver
            .await
            .map_err(|_| Error::topology_destroyed())?
    }
}

/// Permission to dispatch. A replayed operation signals through it once its command has been
/// handed to a connection so that the next buffered operation can go.
#[derive(Debug, Default)]
pub(crate) struct Dispatch {
    ack: Option<oneshot::Sender<()>>,
}

impl Dispatch {
    /// Permission for an operation that was never buffered.
    pub(crate) fn immediate() -> Self {
        Self { ack: None }
    }

    pub(crate) fn dispatched(&mut self) {
        if let Some(ack) = self.ack.take() {
            let _ = ack.send(());
        }
    }
}

impl PendingOpStore {
    /// Creates a store holding at most `max_entries` operations.
    pub fn new(max_entries: i64) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            max_entries,
        }
    }

    /// The configured capacity.
    pub fn max_entries(&self) -> i64 {
        self.max_entries
    }

    /// The number of buffered operations.
    pub fn len(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    /// Whether no operation is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The namespace and command name of every buffered operation, oldest first.
    pub fn entries(&self) -> Vec<(String, String)> {
        self.queue
            .lock()
            .map(|queue| {
                queue
                    .iter()
                    .map(|op| (op.namespace.clone(), op.command_name.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Buffers an operation unless `ready` reports that it can run now.
    ///
    /// `ready` is evaluated under the store's lock, so a state change that replays the store
    /// either happens before the check or sees the new entry. Operations also queue behind
    /// entries that have not been replayed yet.
    pub(crate) fn push_unless(
        &self,
        ready: impl FnOnce() -> bool,
        namespace: impl Into<String>,
        command_name: impl Into<String>,
    ) -> Result<Option<PendingHandle>> {
        let mut queue = self
            .queue
            .lock()
            .map_err(|_| Error::internal("pending operation store poisoned"))?;

        if queue.is_empty() && ready() {
            return Ok(None);
        }

        if self.max_entries == 0 {
            return Err(Error::no_connection_available(
                "the topology is not connected and operation buffering is disabled",
            ));
        }

        if self.max_entries > 0 && queue.len() as i64 >= self.max_entries {
            return Err(Error::no_connection_available(format!(
                "the topology is not connected and the operation buffer is full ({} entries)",
                self.max_entries
            )));
        }

        let namespace = namespace.into();
        let command_name = command_name.into();
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            namespace = namespace.as_str(),
            commandName = command_name.as_str(),
            buffered = queue.len() + 1,
            "Operation buffered until the topology is connected"
        );

        let (resume, receiver) = oneshot::channel();
        queue.push_back(PendingOperation {
            namespace,
            command_name,
            resume,
        });

        Ok(Some(PendingHandle { receiver }))
    }

    /// Resumes buffered operations in arrival order for as long as `ready` holds. Each operation
    /// is resumed only after the previous one dispatched its command or gave up.
    pub(crate) async fn execute_while(&self, ready: impl Fn() -> bool) {
        loop {
            let operation = {
                let Ok(mut queue) = self.queue.lock() else {
                    return;
                };
                if !ready() {
                    return;
                }
                match queue.pop_front() {
                    Some(operation) => operation,
                    None => return,
                }
            };

            let (ack, dispatched) = oneshot::channel();
            if operation
                .resume
                .send(Ok(Dispatch { ack: Some(ack) }))
                .is_err()
            {
                // The caller stopped waiting.
                continue;
            }

            let _ = dispatched.await;
        }
    }

    /// Fails every buffered operation with `error`, or with a topology-destroyed error when none
    /// is given.
    pub(crate) fn flush(&self, error: Option<Error>) {
        let drained: Vec<_> = match self.queue.lock() {
            Ok(mut queue) => queue.drain(..).collect(),
            Err(_) => return,
        };

        if drained.is_empty() {
            return;
        }

        let error = error.unwrap_or_else(Error::topology_destroyed);
        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            flushed = drained.len(),
            error = %error,
            "Buffered operations failed"
        );

        for operation in drained {
            let _ = operation.resume.send(Err(error.clone()));
        }
    }
}
