//! Contains the events and functionality for monitoring topology and server state, along with the
//! per-topology observer registry.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
        Mutex,
        RwLock,
    },
    time::Duration,
};

use crate::{
    bson::Document,
    error::Error,
    event::EventHandler,
    options::ServerAddress,
    sdam::{public::ServerInfo, ServerType, TopologyType},
    trace::topology::TopologyTracingEventEmitter,
};

/// Published when a server description changes.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ServerDescriptionChangedEvent {
    /// The address of the server.
    pub address: ServerAddress,

    /// The previous server description.
    pub previous_description: ServerInfo<'static>,

    /// The new server description.
    pub new_description: ServerInfo<'static>,
}

/// Published when the topology description changes, i.e. when a member is added, removed or
/// changes type.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct TopologyDescriptionChangedEvent {
    /// The topology type before the change.
    pub previous_type: TopologyType,

    /// The topology type after the change.
    pub new_type: TopologyType,

    /// Every known server after the change.
    pub servers: Vec<ServerInfo<'static>>,
}

/// Published when a server monitor sends a handshake to its server.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ServerHeartbeatStartedEvent {
    /// The address of the server.
    pub server_address: ServerAddress,
}

/// Published when a server monitor's handshake succeeds.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ServerHeartbeatSucceededEvent {
    /// The execution time of the event.
    pub duration: Duration,

    /// The reply to the handshake.
    pub reply: Document,

    /// The address of the server.
    pub server_address: ServerAddress,
}

/// Published when a server monitor's handshake fails.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ServerHeartbeatFailedEvent {
    /// The execution time of the event.
    pub duration: Duration,

    /// The failure that occurred.
    pub failure: Error,

    /// The address of the server.
    pub server_address: ServerAddress,
}

/// Published when a replica set member joins or leaves the topology.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct MembershipEvent {
    /// The address of the member.
    pub address: ServerAddress,

    /// The type of the member at the time of the change.
    pub server_type: ServerType,
}

/// Every event a topology publishes to its [`EventRegistry`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum TopologyEvent {
    /// The topology reached its first connected state.
    Open,
    /// The topology was closed explicitly or destroyed.
    Close,
    /// Connectivity was restored after a reconnect. Published once per reconnection.
    Reconnect,
    /// Every reconnect attempt failed; the topology is destroyed.
    ReconnectFailed(Error),
    /// A server was added to the topology.
    ServerOpening(ServerAddress),
    /// A server was removed from the topology.
    ServerClosed(ServerAddress),
    #[allow(missing_docs)]
    ServerDescriptionChanged(Box<ServerDescriptionChangedEvent>),
    #[allow(missing_docs)]
    ServerHeartbeatStarted(ServerHeartbeatStartedEvent),
    #[allow(missing_docs)]
    ServerHeartbeatSucceeded(ServerHeartbeatSucceededEvent),
    #[allow(missing_docs)]
    ServerHeartbeatFailed(ServerHeartbeatFailedEvent),
    /// The topology started connecting.
    TopologyOpening,
    /// The topology released all of its resources.
    TopologyClosed,
    #[allow(missing_docs)]
    TopologyDescriptionChanged(Box<TopologyDescriptionChangedEvent>),
    /// A replica set member took on the primary, secondary or arbiter role.
    Joined(MembershipEvent),
    /// A replica set member gave up its role or was removed from the set.
    Left(MembershipEvent),
    /// The replica set has a primary and a secondary, or every router of a sharded
    /// deployment answers. Published once per topology.
    FullSetup,
    /// Published right after [`TopologyEvent::FullSetup`].
    All,
}

impl TopologyEvent {
    /// The conventional lowercase name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Reconnect => "reconnect",
            Self::ReconnectFailed(_) => "reconnectFailed",
            Self::ServerOpening(_) => "serverOpening",
            Self::ServerClosed(_) => "serverClosed",
            Self::ServerDescriptionChanged(_) => "serverDescriptionChanged",
            Self::ServerHeartbeatStarted(_) => "serverHeartbeatStarted",
            Self::ServerHeartbeatSucceeded(_) => "serverHeartbeatSucceeded",
            Self::ServerHeartbeatFailed(_) => "serverHeartbeatFailed",
            Self::TopologyOpening => "topologyOpening",
            Self::TopologyClosed => "topologyClosed",
            Self::TopologyDescriptionChanged(_) => "topologyDescriptionChanged",
            Self::Joined(_) => "joined",
            Self::Left(_) => "left",
            Self::FullSetup => "fullsetup",
            Self::All => "all",
        }
    }
}

/// Identifies one subscription on an [`EventRegistry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The single observer registry owned by a topology. Subscribers receive every event published
/// after they subscribe, in publication order.
#[derive(Clone, Debug)]
pub struct EventRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, EventHandler<TopologyEvent>)>>,
    tracing_emitter: TopologyTracingEventEmitter,
}

impl EventRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                next_id: AtomicU64::new(1),
                subscribers: RwLock::new(Vec::new()),
                tracing_emitter: TopologyTracingEventEmitter::new(),
            }),
        }
    }

    /// Registers `handler` and returns the id used to remove it again.
    pub fn subscribe(&self, handler: impl Into<EventHandler<TopologyEvent>>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut subscribers) = self.inner.subscribers.write() {
            subscribers.push((id, handler.into()));
        }
        id
    }

    /// Removes a subscription. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.inner.subscribers.write() {
            Ok(mut subscribers) => {
                let before = subscribers.len();
                subscribers.retain(|(sub_id, _)| *sub_id != id);
                subscribers.len() != before
            }
            Err(_) => false,
        }
    }

    /// Creates a child scope whose subscriptions are removed when the scope is dropped.
    pub fn scope(&self) -> EventScope {
        EventScope {
            registry: self.clone(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// The number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub(crate) fn emit(&self, event: TopologyEvent) {
        self.inner.tracing_emitter.handle(&event);

        // Handlers run without the lock held so that they may subscribe or unsubscribe.
        let handlers: Vec<EventHandler<TopologyEvent>> = match self.inner.subscribers.read() {
            Ok(subscribers) => subscribers.iter().map(|(_, h)| h.clone()).collect(),
            Err(_) => return,
        };
        for handler in handlers {
            handler.handle(event.clone());
        }
    }
}

/// A group of subscriptions tied to the lifetime of a dependent object, e.g. a database handle.
#[derive(Debug)]
pub struct EventScope {
    registry: EventRegistry,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl EventScope {
    /// Subscribes `handler` on the parent registry for the lifetime of this scope.
    pub fn subscribe(&self, handler: impl Into<EventHandler<TopologyEvent>>) -> SubscriptionId {
        let id = self.registry.subscribe(handler);
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.push(id);
        }
        id
    }
}

impl Drop for EventScope {
    fn drop(&mut self) {
        let subscriptions = match self.subscriptions.get_mut() {
            Ok(subscriptions) => std::mem::take(subscriptions),
            Err(poisoned) => std::mem::take(poisoned.into_inner()),
        };
        for id in subscriptions {
            self.registry.unsubscribe(id);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use pretty_assertions::assert_eq;

    use super::{EventRegistry, TopologyEvent};
    use crate::event::EventHandler;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, EventHandler<TopologyEvent>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handler = EventHandler::callback(move |ev: TopologyEvent| {
            sink.lock().unwrap().push(ev.name());
        });
        (seen, handler)
    }

    #[test]
    fn subscribers_see_events_in_order() {
        let registry = EventRegistry::new();
        let (seen, handler) = recorder();
        registry.subscribe(handler);

        registry.emit(TopologyEvent::TopologyOpening);
        registry.emit(TopologyEvent::Open);
        registry.emit(TopologyEvent::Reconnect);

        assert_eq!(*seen.lock().unwrap(), vec!["topologyOpening", "open", "reconnect"]);
    }

    #[test]
    fn dropping_a_scope_removes_its_subscriptions() {
        let registry = EventRegistry::new();
        let (parent_seen, parent_handler) = recorder();
        registry.subscribe(parent_handler);

        let (child_seen, child_handler) = recorder();
        {
            let scope = registry.scope();
            scope.subscribe(child_handler);
            assert_eq!(registry.subscriber_count(), 2);
            registry.emit(TopologyEvent::Open);
        }

        assert_eq!(registry.subscriber_count(), 1);
        registry.emit(TopologyEvent::Close);

        assert_eq!(*child_seen.lock().unwrap(), vec!["open"]);
        assert_eq!(*parent_seen.lock().unwrap(), vec!["open", "close"]);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = EventRegistry::new();
        let (_, handler) = recorder();
        let id = registry.subscribe(handler);

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
    }
}
