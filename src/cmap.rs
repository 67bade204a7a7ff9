#[cfg(test)]
mod test;

pub(crate) mod conn;
pub(crate) mod establish;
#[cfg(feature = "rustls-tls")]
mod tls;
pub(crate) mod transport;
pub(crate) mod wire;

use std::{
    ops::{Deref, DerefMut},
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
        Mutex,
    },
};

use derive_where::derive_where;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub use self::{
    conn::{Command, Connection, ConnectionInfo},
    transport::{Connector, Message, Transport},
};
pub(crate) use self::{conn::StreamDescription, establish::ConnectionEstablisher};
use crate::{
    error::{Error, Result},
    options::ServerAddress,
    runtime,
    trace::CONNECTION_TRACING_EVENT_TARGET,
};

pub(crate) const DEFAULT_MAX_POOL_SIZE: u32 = 5;

/// A bounded pool of connections to one server.
///
/// Checkouts beyond the pool size wait in FIFO order for a connection to be returned. Connections
/// are handed out wrapped in a [`PooledConnection`], which puts them back exactly once when it is
/// dropped.
#[derive(Clone)]
#[derive_where(Debug)]
pub(crate) struct ConnectionPool {
    #[derive_where(skip)]
    inner: Arc<PoolInner>,
}

struct PoolInner {
    address: ServerAddress,
    establisher: ConnectionEstablisher,

    /// Tokio's semaphore is fair, which gives waiting checkouts their queue order.
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Connection>>,
    generation: AtomicU32,
    next_connection_id: AtomicU32,
    closed: AtomicBool,
}

impl ConnectionPool {
    pub(crate) fn new(
        address: ServerAddress,
        establisher: ConnectionEstablisher,
        max_pool_size: u32,
    ) -> Self {
        let max_pool_size = if max_pool_size == 0 {
            DEFAULT_MAX_POOL_SIZE
        } else {
            max_pool_size
        };

        Self {
            inner: Arc::new(PoolInner {
                address,
                establisher,
                permits: Arc::new(Semaphore::new(max_pool_size as usize)),
                idle: Mutex::new(Vec::new()),
                generation: AtomicU32::new(0),
                next_connection_id: AtomicU32::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn address(&self) -> &ServerAddress {
        &self.inner.address
    }

    pub(crate) fn generation(&self) -> u32 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// The number of connections currently idle in the pool.
    pub(crate) fn idle_count(&self) -> usize {
        self.inner.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// The number of checkouts that can proceed without waiting.
    pub(crate) fn available_permits(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Checks out a connection, reusing an idle one of the current generation when possible and
    /// establishing a new one otherwise.
    pub(crate) async fn check_out(&self) -> Result<PooledConnection> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(self.closed_error());
        }

        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| self.closed_error())?;

        let generation = self.generation();
        let reused = self.take_idle(generation);

        let connection = match reused {
            Some(connection) => connection,
            None => {
                let id = self.inner.next_connection_id.fetch_add(1, Ordering::SeqCst);
                let connection = self
                    .inner
                    .establisher
                    .establish_connection(&self.inner.address, id, generation)
                    .await?;

                tracing::debug!(
                    target: CONNECTION_TRACING_EVENT_TARGET,
                    serverHost = self.inner.address.host(),
                    serverPort = self.inner.address.port(),
                    driverConnectionId = id,
                    "Connection ready"
                );
                connection
            }
        };

        Ok(PooledConnection {
            connection: Some(connection),
            pool: Arc::downgrade(&self.inner),
            _permit: permit,
        })
    }

    fn take_idle(&self, generation: u32) -> Option<Connection> {
        let mut idle = self.inner.idle.lock().ok()?;
        while let Some(connection) = idle.pop() {
            if connection.generation == generation && connection.is_reusable() {
                return Some(connection);
            }
        }
        None
    }

    /// Marks every existing connection as stale. Idle connections are dropped now; checked out
    /// ones are dropped when they are returned.
    pub(crate) fn clear(&self, cause: Option<&Error>) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let stale = self
            .inner
            .idle
            .lock()
            .map(|mut idle| std::mem::take(&mut *idle))
            .unwrap_or_default();

        tracing::debug!(
            target: CONNECTION_TRACING_EVENT_TARGET,
            serverHost = self.inner.address.host(),
            serverPort = self.inner.address.port(),
            cause = cause.map(|e| e.to_string()),
            "Connection pool cleared"
        );

        close_connections(stale);
    }

    /// Closes the pool. Pending and future checkouts fail.
    pub(crate) fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();
        let idle = self
            .inner
            .idle
            .lock()
            .map(|mut idle| std::mem::take(&mut *idle))
            .unwrap_or_default();

        tracing::debug!(
            target: CONNECTION_TRACING_EVENT_TARGET,
            serverHost = self.inner.address.host(),
            serverPort = self.inner.address.port(),
            "Connection pool closed"
        );

        close_connections(idle);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> Error {
        Error::pool_cleared_error(
            &self.inner.address,
            &Error::internal("connection pool was closed"),
        )
    }
}

fn close_connections(connections: Vec<Connection>) {
    if connections.is_empty() {
        return;
    }
    runtime::spawn_if_in_runtime(async move {
        for mut connection in connections {
            connection.close().await;
        }
    });
}

/// A connection checked out of a [`ConnectionPool`]. Dropping it returns the connection to the
/// pool unless the connection errored, the pool was cleared since checkout, or the pool is
/// closed.
#[derive_where(Debug)]
pub(crate) struct PooledConnection {
    connection: Option<Connection>,

    #[derive_where(skip)]
    pool: std::sync::Weak<PoolInner>,

    #[derive_where(skip)]
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Drops the connection instead of returning it to the pool.
    pub(crate) fn discard(mut self) {
        if let Some(connection) = self.connection.take() {
            close_connections(vec![connection]);
        }
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // The connection is only taken in `discard` and `drop`, both of which consume the guard.
        self.connection
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let Some(pool) = self.pool.upgrade() else {
            close_connections(vec![connection]);
            return;
        };

        let reusable = connection.is_reusable()
            && !pool.closed.load(Ordering::SeqCst)
            && connection.generation == pool.generation.load(Ordering::SeqCst);

        if reusable {
            if let Ok(mut idle) = pool.idle.lock() {
                idle.push(connection);
                return;
            }
        }

        close_connections(vec![connection]);
    }
}
