mod dispatch;
mod state;
#[cfg(test)]
mod test;
mod update;

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, RwLock, Weak},
    time::Duration,
};

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

pub use self::state::{TopologyKind, TopologyState};
pub(crate) use self::state::TopologySnapshot;
use crate::{
    auth::Credential,
    bson::Document,
    cmap::{establish::TcpConnector, ConnectionEstablisher, Connector},
    cursor::{
        options::{AggregateOptions, FindOptions, ListCollectionsOptions},
        Cursor,
    },
    error::{Error, Result},
    event::{
        command::CommandEvent,
        sdam::{EventRegistry, TopologyEvent},
        EventHandler,
    },
    operation::{Delete, DeleteModel, Insert, RunCommand, Update, UpdateModel},
    options::{ClientOptions, ServerAddress},
    pending::PendingOpStore,
    results::{CommandReply, WriteResult},
    router::{self, CommandOptions, ScopeDefaults, WriteOptions},
    runtime,
    sdam::{Capabilities, Monitor, Server, ServerInfo, ServerType, TopologyDescription},
    trace::{command::CommandLogger, TOPOLOGY_TRACING_EVENT_TARGET},
    Namespace,
};

/// A handle to a deployment: a single server, a replica set or a set of `mongos` routers.
///
/// The topology owns one connection pool and one monitor per known server, routes every
/// operation to a suitable server and holds operations back while it has no connectivity. It is
/// cheap to clone; every clone refers to the same deployment.
///
/// ```rust,no_run
/// # use mongodb_core::{bson::doc, options::ClientOptions, Namespace, Topology};
/// # async fn example() -> mongodb_core::error::Result<()> {
/// let topology = Topology::new(ClientOptions::parse("mongodb://localhost:27017")?)?;
/// topology.connect().await?;
///
/// let ns = Namespace::new("app", "users");
/// topology.insert(&ns, vec![doc! { "name": "ada" }], None).await?;
/// let mut cursor = topology.cursor(&ns, doc! { "name": "ada" }, None)?;
/// while let Some(user) = cursor.next().await? {
///     println!("{}", user);
/// }
/// topology.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Topology {
    inner: Arc<TopologyInner>,
}

/// A weak reference to a topology. Monitors hold one so that they do not keep the topology alive.
#[derive(Clone, Debug)]
pub(crate) struct WeakTopology {
    inner: Weak<TopologyInner>,
}

impl WeakTopology {
    pub(crate) fn upgrade(&self) -> Option<Topology> {
        self.inner.upgrade().map(|inner| Topology { inner })
    }
}

struct TopologyInner {
    options: ClientOptions,

    /// The read preference and concerns every operation falls back to.
    defaults: ScopeDefaults,

    establisher: ConnectionEstablisher,

    /// Shared with the establisher so that `auth` and `logout` apply to new connections.
    credential: Arc<RwLock<Option<Credential>>>,

    /// Publishes each new snapshot. Every update clones the latest snapshot, modifies it and
    /// replaces it while holding `update_lock`.
    state: watch::Sender<TopologySnapshot>,
    update_lock: tokio::sync::Mutex<()>,

    /// Monitors that have not been started yet. Until connect finishes, it runs their checks
    /// itself.
    idle_monitors: Mutex<HashMap<ServerAddress, Monitor>>,

    /// Cleared whenever a new description is published.
    capabilities: Mutex<Option<Capabilities>>,

    pending: PendingOpStore,
    events: EventRegistry,
    command_event_handler: Option<EventHandler<CommandEvent>>,
    command_logger: CommandLogger,

    /// Parent of every server's token; cancelled when the topology is destroyed.
    shutdown: CancellationToken,
}

impl Drop for TopologyInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.inner.state.borrow();
        f.debug_struct("Topology")
            .field("kind", &snapshot.kind)
            .field("state", &snapshot.state)
            .field("servers", &snapshot.description.server_addresses().collect::<Vec<_>>())
            .finish()
    }
}

impl Topology {
    /// Creates a topology that connects over TCP, or TLS when the options ask for it. Nothing is
    /// opened until [`Topology::connect`] is called.
    pub fn new(options: ClientOptions) -> Result<Self> {
        let connector = TcpConnector::new(&options)?;
        Self::with_connector(options, Arc::new(connector))
    }

    /// Creates a topology that opens its transports with `connector`.
    ///
    /// A replica set name makes the topology a replica set and several seeds without one make it
    /// a set of `mongos` routers. Otherwise it manages a single server, which is re-established
    /// as a `mongos` topology if the seed turns out to be one.
    pub fn with_connector(options: ClientOptions, connector: Arc<dyn Connector>) -> Result<Self> {
        options.validate()?;

        let kind = if options.repl_set_name.is_some() {
            TopologyKind::ReplicaSet
        } else if options.hosts.len() > 1 {
            TopologyKind::Mongos
        } else {
            TopologyKind::Server
        };

        let credential = Arc::new(RwLock::new(options.credential.clone()));
        let establisher = ConnectionEstablisher::new(connector, &options, credential.clone());

        let events = EventRegistry::new();
        if let Some(ref handler) = options.sdam_event_handler {
            events.subscribe(handler.clone());
        }

        let defaults = ScopeDefaults {
            read_preference: options.read_preference.clone().map(Into::into),
            write_concern: options.write_concern.clone(),
            read_concern: options.read_concern.clone(),
        };

        let snapshot = TopologySnapshot {
            kind,
            state: TopologyState::Disconnected,
            description: initial_description(kind, &options),
            servers: HashMap::new(),
            monitors_started: false,
            upgraded: false,
            fullsetup_emitted: false,
        };
        let (state, _) = watch::channel(snapshot);

        Ok(Self {
            inner: Arc::new(TopologyInner {
                pending: PendingOpStore::new(options.buffer_max_entries()),
                command_event_handler: options.command_event_handler.clone(),
                command_logger: CommandLogger::new(options.tracing_max_document_length_bytes),
                defaults,
                establisher,
                credential,
                state,
                update_lock: tokio::sync::Mutex::new(()),
                idle_monitors: Mutex::new(HashMap::new()),
                capabilities: Mutex::new(None),
                events,
                shutdown: CancellationToken::new(),
                options,
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> WeakTopology {
        WeakTopology {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Connects to the seeds and discovers the deployment.
    ///
    /// Returns once the topology can serve operations: a reachable server, a primary (or a
    /// secondary with `connectWithNoPrimary`) or a `mongos`. Operations buffered in the meantime
    /// are replayed in the order they were issued. If the deployment cannot be reached the
    /// topology is destroyed and the first server error is returned.
    pub async fn connect(&self) -> Result<()> {
        {
            let guard = self.inner.update_lock.lock().await;
            let mut snapshot = self.snapshot();
            match snapshot.state {
                TopologyState::Destroyed => return Err(Error::topology_destroyed()),
                TopologyState::Connected | TopologyState::Reconnecting => return Ok(()),
                TopologyState::Connecting => {
                    drop(guard);
                    return self.wait_for_connect().await;
                }
                TopologyState::Disconnected => {}
            }

            snapshot.state = TopologyState::Connecting;
            self.populate_servers(&mut snapshot);
            self.publish(snapshot);
            drop(guard);
        }

        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            seeds = ?self.inner.options.hosts,
            "Topology connecting"
        );
        self.inner.events.emit(TopologyEvent::TopologyOpening);
        for address in self.inner.options.hosts.iter() {
            self.inner
                .events
                .emit(TopologyEvent::ServerOpening(address.clone()));
        }

        self.discover().await;
        if self.should_upgrade_to_mongos() {
            self.upgrade_to_mongos().await;
            self.discover().await;
        }

        self.finish_connect().await
    }

    /// Waits for a connect started by another caller.
    async fn wait_for_connect(&self) -> Result<()> {
        let mut receiver = self.inner.state.subscribe();
        loop {
            let state = receiver.borrow_and_update().state;
            match state {
                TopologyState::Connecting | TopologyState::Disconnected => {}
                TopologyState::Destroyed => return Err(Error::topology_destroyed()),
                TopologyState::Connected | TopologyState::Reconnecting => return Ok(()),
            }
            if receiver.changed().await.is_err() {
                return Err(Error::topology_destroyed());
            }
        }
    }

    /// Creates a server and an idle monitor for every address of the snapshot's description.
    fn populate_servers(&self, snapshot: &mut TopologySnapshot) {
        let addresses: Vec<ServerAddress> =
            snapshot.description.server_addresses().cloned().collect();
        for address in addresses {
            let (server, monitor) = self.new_server(&address);
            snapshot.servers.insert(address.clone(), server);
            self.park_monitor(address, monitor);
        }
    }

    fn new_server(&self, address: &ServerAddress) -> (Arc<Server>, Monitor) {
        let server = Server::new(
            address.clone(),
            self.inner.establisher.clone(),
            self.inner.options.max_pool_size(),
            &self.inner.shutdown,
        );
        let monitor = Monitor::new(
            address.clone(),
            self.inner.establisher.clone(),
            self.inner.events.clone(),
        );
        (server, monitor)
    }

    fn park_monitor(&self, address: ServerAddress, monitor: Monitor) {
        if let Ok(mut monitors) = self.inner.idle_monitors.lock() {
            monitors.insert(address, monitor);
        }
    }

    fn take_idle_monitors(&self, skip: &HashSet<ServerAddress>) -> Vec<(ServerAddress, Monitor)> {
        let Ok(mut monitors) = self.inner.idle_monitors.lock() else {
            return Vec::new();
        };
        let addresses: Vec<ServerAddress> = monitors
            .keys()
            .filter(|address| !skip.contains(*address))
            .cloned()
            .collect();
        addresses
            .into_iter()
            .filter_map(|address| monitors.remove_entry(&address))
            .collect()
    }

    /// Checks every server that has not been checked yet, in rounds, until the topology has
    /// connectivity or no new server was discovered.
    async fn discover(&self) {
        let mut checked = HashSet::new();
        loop {
            let mut monitors = self.take_idle_monitors(&checked);
            if monitors.is_empty() {
                break;
            }

            let descriptions = join_all(
                monitors
                    .iter_mut()
                    .map(|(_, monitor)| monitor.check_server()),
            )
            .await;

            for (address, monitor) in monitors {
                checked.insert(address.clone());
                self.park_monitor(address, monitor);
            }
            for description in descriptions {
                self.apply_server_description(description, true).await;
            }

            let settled = {
                let snapshot = self.inner.state.borrow();
                snapshot.state != TopologyState::Connecting
                    || snapshot.has_connectivity(self.inner.options.connect_with_no_primary())
            };
            if settled {
                break;
            }
        }
    }

    fn should_upgrade_to_mongos(&self) -> bool {
        let snapshot = self.inner.state.borrow();
        snapshot.kind == TopologyKind::Server
            && !snapshot.upgraded
            && snapshot.state == TopologyState::Connecting
            && snapshot.description.has_server_of_type(ServerType::Mongos)
    }

    /// Replaces the single-server topology with a `mongos` topology over the same seeds. This
    /// happens at most once, during the initial connect, and is not reported as an error.
    async fn upgrade_to_mongos(&self) {
        let (servers, monitors) = {
            let _guard = self.inner.update_lock.lock().await;
            let mut snapshot = self.snapshot();
            if snapshot.state != TopologyState::Connecting {
                return;
            }

            let servers = std::mem::take(&mut snapshot.servers);
            let monitors = self.take_idle_monitors(&HashSet::new());

            snapshot.kind = TopologyKind::Mongos;
            snapshot.upgraded = true;
            snapshot.description = initial_description(TopologyKind::Mongos, &self.inner.options);
            self.populate_servers(&mut snapshot);
            self.publish(snapshot);
            (servers, monitors)
        };

        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            "Seed is a mongos; re-establishing the topology as Mongos"
        );

        for server in servers.values() {
            server.shutdown();
        }
        for (_, mut monitor) in monitors {
            monitor.close_connection().await;
        }
    }

    async fn finish_connect(&self) -> Result<()> {
        let outcome = {
            let _guard = self.inner.update_lock.lock().await;
            let mut snapshot = self.snapshot();
            if snapshot.state != TopologyState::Connecting {
                return Err(Error::topology_destroyed());
            }

            if snapshot.has_connectivity(self.inner.options.connect_with_no_primary()) {
                snapshot.state = TopologyState::Connected;
                snapshot.monitors_started = true;
                for (address, monitor) in self.take_idle_monitors(&HashSet::new()) {
                    if let Some(server) = snapshot.servers.get(&address) {
                        monitor.start(self.downgrade(), server);
                    }
                }
                for server in snapshot.description.servers() {
                    if server.server_type == ServerType::Unknown && server.error().is_none() {
                        if let Some(server) = snapshot.servers.get(&server.address) {
                            server.request_check();
                        }
                    }
                }
                self.publish(snapshot);
                Ok(())
            } else {
                Err(connect_error(&snapshot))
            }
        };

        match outcome {
            Ok(()) => {
                self.refresh_capabilities();
                tracing::debug!(
                    target: TOPOLOGY_TRACING_EVENT_TARGET,
                    kind = %self.kind(),
                    "Topology connected"
                );
                self.inner.events.emit(TopologyEvent::Open);
                self.spawn_replay();
                self.update_connectivity().await;
                Ok(())
            }
            Err(error) => {
                self.destroy(Some(error.clone()), false).await;
                Err(error)
            }
        }
    }

    /// Resumes buffered operations, in order, while the topology stays connected.
    fn spawn_replay(&self) {
        if self.inner.pending.is_empty() {
            return;
        }
        let topology = self.clone();
        runtime::spawn(async move {
            let inner = &topology.inner;
            inner
                .pending
                .execute_while(|| inner.state.borrow().state == TopologyState::Connected)
                .await;
        });
    }

    fn snapshot(&self) -> TopologySnapshot {
        self.inner.state.borrow().clone()
    }

    /// Publishes `snapshot` to every watcher. Callers hold `update_lock`.
    fn publish(&self, snapshot: TopologySnapshot) {
        self.inner.state.send_replace(snapshot);
        if let Ok(mut capabilities) = self.inner.capabilities.lock() {
            *capabilities = None;
        }
    }

    fn refresh_capabilities(&self) {
        let computed = Capabilities::from_description(&self.inner.state.borrow().description);
        if let Ok(mut capabilities) = self.inner.capabilities.lock() {
            *capabilities = computed;
        }
    }

    /// The interval between two checks of the same server: the reconnect interval while
    /// reconnecting, the heartbeat frequency otherwise.
    pub(crate) fn check_interval(&self) -> Duration {
        match self.inner.state.borrow().state {
            TopologyState::Reconnecting => self.inner.options.reconnect_interval(),
            _ => self.inner.options.heartbeat_freq(),
        }
    }

    /// Fails with a topology-destroyed error once the topology has been closed.
    pub(crate) fn check_alive(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::topology_destroyed());
        }
        Ok(())
    }

    /// Whether operations are currently dispatched without being buffered.
    pub fn is_connected(&self) -> bool {
        self.state() == TopologyState::Connected
    }

    /// Whether the topology was closed or destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.state() == TopologyState::Destroyed
    }

    /// The current connection state.
    pub fn state(&self) -> TopologyState {
        self.inner.state.borrow().state
    }

    /// The kind of deployment. A single seed that turns out to be a `mongos` is reported as
    /// [`TopologyKind::Mongos`] once connected.
    pub fn kind(&self) -> TopologyKind {
        self.inner.state.borrow().kind
    }

    /// The features of the connected deployment, or `None` before any data-bearing server was
    /// checked.
    pub fn capabilities(&self) -> Option<Capabilities> {
        if let Ok(cached) = self.inner.capabilities.lock() {
            if cached.is_some() {
                return cached.clone();
            }
        }
        self.refresh_capabilities();
        self.inner
            .capabilities
            .lock()
            .ok()
            .and_then(|capabilities| capabilities.clone())
    }

    /// The registry every topology event is published to.
    pub fn events(&self) -> &EventRegistry {
        &self.inner.events
    }

    /// Operations held back until the topology is connected.
    pub fn pending(&self) -> &PendingOpStore {
        &self.inner.pending
    }

    /// The latest description of every known server.
    pub fn servers(&self) -> Vec<ServerInfo<'static>> {
        self.inner.state.borrow().server_infos()
    }

    /// The most recent handshake reply of the primary, or of any available server when there is
    /// no primary.
    pub fn last_hello(&self) -> Option<Document> {
        let snapshot = self.inner.state.borrow();
        let description = &snapshot.description;
        description
            .primary()
            .or_else(|| description.servers().find(|server| server.is_available()))
            .and_then(|server| server.last_hello())
            .cloned()
    }

    /// Runs `command` against the database of `ns`, routed by the resolved read preference.
    pub async fn command(
        &self,
        ns: &Namespace,
        command: Document,
        options: impl Into<Option<CommandOptions>>,
    ) -> Result<CommandReply> {
        self.check_alive()?;
        let mut operation = RunCommand::new(ns.db.clone(), command, options.into())?;
        self.execute_operation(&mut operation).await
    }

    /// Inserts `documents`, generating an `_id` for those that lack one.
    pub async fn insert(
        &self,
        ns: &Namespace,
        documents: Vec<Document>,
        options: impl Into<Option<WriteOptions>>,
    ) -> Result<WriteResult> {
        self.check_alive()?;
        let operation = Insert::new(ns.clone(), documents, options.into())?;
        self.execute_write(operation).await
    }

    /// Applies each update to the documents its filter matches.
    pub async fn update(
        &self,
        ns: &Namespace,
        updates: Vec<UpdateModel>,
        options: impl Into<Option<WriteOptions>>,
    ) -> Result<WriteResult> {
        self.check_alive()?;
        let operation = Update::new(ns.clone(), updates, options.into())?;
        self.execute_write(operation).await
    }

    /// Deletes the documents matched by each delete's filter.
    pub async fn remove(
        &self,
        ns: &Namespace,
        deletes: Vec<DeleteModel>,
        options: impl Into<Option<WriteOptions>>,
    ) -> Result<WriteResult> {
        self.check_alive()?;
        let operation = Delete::new(ns.clone(), deletes, options.into())?;
        self.execute_write(operation).await
    }

    /// Creates a cursor over the documents of `ns` matching `filter`. Nothing is sent until the
    /// first document is requested.
    pub fn cursor(
        &self,
        ns: &Namespace,
        filter: Document,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Cursor> {
        self.check_alive()?;
        Ok(Cursor::find(
            self.clone(),
            ns.clone(),
            filter,
            options.into().unwrap_or_default(),
        ))
    }

    /// Creates a cursor over the results of an aggregation pipeline.
    pub fn aggregate(
        &self,
        ns: &Namespace,
        pipeline: Vec<Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<Cursor> {
        self.check_alive()?;
        Ok(Cursor::aggregate(
            self.clone(),
            ns.clone(),
            pipeline,
            options.into().unwrap_or_default(),
        ))
    }

    /// Creates a cursor over the collections of `db`.
    pub fn list_collections(
        &self,
        db: impl Into<String>,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<ListCollectionsOptions>>,
    ) -> Result<Cursor> {
        self.check_alive()?;
        Ok(Cursor::list_collections(
            self.clone(),
            db.into(),
            filter.into().unwrap_or_default(),
            options.into().unwrap_or_default(),
        ))
    }

    /// Authenticates every connection opened from now on with `credential`.
    ///
    /// Existing connections are dropped. When connected, a connection is opened right away to
    /// verify the credential, and the previous one is restored if that fails.
    pub async fn auth(&self, credential: Credential) -> Result<()> {
        self.check_alive()?;
        if self.inner.establisher.authenticator().is_none() {
            return Err(Error::invalid_argument(
                "cannot authenticate without an authenticator configured",
            ));
        }

        let previous = self.replace_credential(Some(credential))?;
        self.clear_pools();

        if self.is_connected() {
            if let Err(error) = self.verify_connection().await {
                self.replace_credential(previous)?;
                self.clear_pools();
                return Err(error);
            }
        }

        Ok(())
    }

    /// Discards the credential. Connections opened afterwards are not authenticated.
    pub async fn logout(&self) -> Result<()> {
        self.check_alive()?;
        let credential = self.replace_credential(None)?;
        self.clear_pools();

        if let (Some(credential), Some(authenticator)) =
            (credential, self.inner.establisher.authenticator())
        {
            authenticator.logout(&credential).await?;
        }
        Ok(())
    }

    fn replace_credential(&self, credential: Option<Credential>) -> Result<Option<Credential>> {
        let mut current = self
            .inner
            .credential
            .write()
            .map_err(|_| Error::internal("credential lock poisoned"))?;
        Ok(std::mem::replace(&mut *current, credential))
    }

    fn clear_pools(&self) {
        let servers: Vec<Arc<Server>> = self.inner.state.borrow().servers.values().cloned().collect();
        for server in servers {
            server.pool.clear(None);
        }
    }

    /// Opens a connection to the server the topology's defaults select.
    async fn verify_connection(&self) -> Result<()> {
        let criteria = router::resolve(None, &self.inner.defaults).selection_criteria();
        let server = self.select_server(&criteria)?;
        let connection = server.pool.check_out().await?;
        drop(connection);
        Ok(())
    }

    /// Closes the topology: monitors stop, pools close and buffered operations fail with a
    /// topology-destroyed error. Closing twice is a no-op.
    pub async fn close(&self) {
        self.destroy(None, false).await;
    }

    /// Moves to `Destroyed` and releases every resource, once. `error` is what buffered
    /// operations fail with.
    pub(crate) async fn destroy(&self, error: Option<Error>, reconnect_failed: bool) {
        let servers = {
            let _guard = self.inner.update_lock.lock().await;
            let mut snapshot = self.snapshot();
            if snapshot.state == TopologyState::Destroyed {
                return;
            }
            snapshot.state = TopologyState::Destroyed;
            let servers = std::mem::take(&mut snapshot.servers);
            self.publish(snapshot);
            servers
        };

        tracing::debug!(
            target: TOPOLOGY_TRACING_EVENT_TARGET,
            error = error.as_ref().map(|e| e.to_string()),
            "Topology destroyed"
        );

        if reconnect_failed {
            if let Some(ref error) = error {
                self.inner
                    .events
                    .emit(TopologyEvent::ReconnectFailed(error.clone()));
            }
        }

        self.inner.shutdown.cancel();
        for (address, server) in servers {
            server.shutdown();
            self.inner.events.emit(TopologyEvent::ServerClosed(address));
        }
        for (_, mut monitor) in self.take_idle_monitors(&HashSet::new()) {
            monitor.close_connection().await;
        }

        self.inner.pending.flush(error);
        self.inner.events.emit(TopologyEvent::Close);
        self.inner.events.emit(TopologyEvent::TopologyClosed);
    }
}

fn initial_description(kind: TopologyKind, options: &ClientOptions) -> TopologyDescription {
    TopologyDescription::new(
        kind.initial_description_type(),
        &options.hosts,
        options.repl_set_name.clone(),
        options.local_threshold(),
        options.heartbeat_freq(),
    )
}

/// The error a failed connect reports: the first server error, or why the servers that answered
/// are not enough.
fn connect_error(snapshot: &TopologySnapshot) -> Error {
    if let Some(error) = snapshot
        .description
        .servers()
        .find_map(|server| server.error().cloned())
    {
        return error;
    }

    let message = match snapshot.kind {
        TopologyKind::Server => "no server available",
        TopologyKind::ReplicaSet => "no primary found in replica set",
        TopologyKind::Mongos => "no mongos proxies found in seed list",
    };
    Error::server_selection(message)
}
