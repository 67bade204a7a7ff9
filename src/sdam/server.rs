use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{
    cmap::{ConnectionEstablisher, ConnectionPool},
    options::ServerAddress,
};

/// Contains the state for a given server in the topology.
#[derive(Debug)]
pub(crate) struct Server {
    pub(crate) address: ServerAddress,

    /// The connection pool for the server.
    pub(crate) pool: ConnectionPool,

    /// Number of checks that failed since the last successful one.
    consecutive_failures: AtomicU32,

    /// Wakes the monitor before its next scheduled check.
    check_requested: Arc<Notify>,

    /// Cancelled when the server leaves the topology, which stops its monitor.
    shutdown: CancellationToken,
}

impl Server {
    /// Create a new reference counted `Server`, including its connection pool. The server stops
    /// when `parent` is cancelled.
    pub(crate) fn new(
        address: ServerAddress,
        establisher: ConnectionEstablisher,
        max_pool_size: u32,
        parent: &CancellationToken,
    ) -> Arc<Server> {
        Arc::new(Self {
            pool: ConnectionPool::new(address.clone(), establisher, max_pool_size),
            address,
            consecutive_failures: AtomicU32::new(0),
            check_requested: Arc::new(Notify::new()),
            shutdown: parent.child_token(),
        })
    }

    /// Records the outcome of a check and returns the number of consecutive failures.
    pub(crate) fn record_check(&self, succeeded: bool) -> u32 {
        if succeeded {
            self.consecutive_failures.store(0, Ordering::SeqCst);
            0
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    pub(crate) fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_failures(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    pub(crate) fn request_check(&self) {
        self.check_requested.notify_one();
    }

    pub(crate) fn check_requested(&self) -> Arc<Notify> {
        self.check_requested.clone()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops the monitor and closes the pool.
    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
        self.pool.close();
    }
}
