use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    event::sdam::{
        MembershipEvent,
        ServerDescriptionChangedEvent,
        TopologyDescriptionChangedEvent,
        TopologyEvent,
    },
    options::ServerAddress,
    sdam::{Server, ServerInfo, ServerType, TopologyDescription, TopologyType},
    selection_criteria::SelectionCriteria,
};

/// The shape of the deployment a [`Topology`](crate::Topology) manages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopologyKind {
    /// A single server, which is implicitly the write target.
    Server,

    /// A replica set, with at most one primary.
    ReplicaSet,

    /// One or more `mongos` routers in front of a sharded cluster.
    Mongos,
}

impl TopologyKind {
    /// The description type a topology of this kind starts from.
    pub(crate) fn initial_description_type(self) -> TopologyType {
        match self {
            Self::Server => TopologyType::Single,
            Self::ReplicaSet => TopologyType::ReplicaSetNoPrimary,
            Self::Mongos => TopologyType::Sharded,
        }
    }
}

impl fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Server => "Server",
            Self::ReplicaSet => "ReplicaSet",
            Self::Mongos => "Mongos",
        };
        f.write_str(name)
    }
}

/// The lifecycle state of a [`Topology`](crate::Topology).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum TopologyState {
    /// Created but `connect` has not been called.
    Disconnected,

    /// The initial connect is in progress.
    Connecting,

    /// Operations are dispatched immediately.
    Connected,

    /// Connectivity was lost; the servers are checked every reconnect interval.
    Reconnecting,

    /// Closed explicitly or after an unrecoverable error. Every entry point fails.
    Destroyed,
}

impl fmt::Display for TopologyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

/// Everything published to the topology's watchers after each update.
#[derive(Clone, Debug)]
pub(crate) struct TopologySnapshot {
    pub(crate) kind: TopologyKind,
    pub(crate) state: TopologyState,
    pub(crate) description: TopologyDescription,
    pub(crate) servers: HashMap<ServerAddress, Arc<Server>>,

    /// Whether the monitors run in the background. Before that, connect drives the checks.
    pub(crate) monitors_started: bool,

    /// Whether a Server topology was already re-established as Mongos.
    pub(crate) upgraded: bool,

    pub(crate) fullsetup_emitted: bool,
}

impl TopologySnapshot {
    /// Whether the deployment can serve the operations this kind of topology exists for.
    pub(crate) fn has_connectivity(&self, connect_with_no_primary: bool) -> bool {
        match self.kind {
            TopologyKind::Server => self.description.has_available_servers(),
            TopologyKind::Mongos => self.description.has_server_of_type(ServerType::Mongos),
            TopologyKind::ReplicaSet => {
                self.description.has_server_of_type(ServerType::RsPrimary)
                    || (connect_with_no_primary
                        && self.description.has_server_of_type(ServerType::RsSecondary))
            }
        }
    }

    /// Whether an operation routed by `criteria` can be dispatched now. While reconnecting,
    /// operations whose target is still reachable are not held back.
    pub(crate) fn is_ready_for(&self, criteria: &SelectionCriteria) -> bool {
        match self.state {
            TopologyState::Connected => true,
            TopologyState::Reconnecting => matches!(self.description.select_server(criteria), Ok(Some(_))),
            _ => false,
        }
    }

    /// Whether the set has both a primary and a secondary, or every router answers.
    pub(crate) fn is_fully_set_up(&self) -> bool {
        match self.kind {
            TopologyKind::Server => false,
            TopologyKind::ReplicaSet => {
                self.description.has_server_of_type(ServerType::RsPrimary)
                    && self.description.has_server_of_type(ServerType::RsSecondary)
            }
            TopologyKind::Mongos => {
                let mut servers = self.description.servers().peekable();
                servers.peek().is_some()
                    && servers.all(|server| server.server_type == ServerType::Mongos)
            }
        }
    }

    pub(crate) fn server_infos(&self) -> Vec<ServerInfo<'static>> {
        self.description
            .servers()
            .map(|server| ServerInfo::new_owned(server.clone()))
            .collect()
    }
}

fn is_member_role(server_type: ServerType) -> bool {
    matches!(
        server_type,
        ServerType::RsPrimary | ServerType::RsSecondary | ServerType::RsArbiter
    )
}

/// The servers added and removed by one update, and the events describing it.
#[derive(Debug, Default)]
pub(crate) struct DescriptionChanges {
    pub(crate) added: Vec<ServerAddress>,
    pub(crate) removed: Vec<ServerAddress>,
    pub(crate) events: Vec<TopologyEvent>,
}

/// Computes the events published when `previous` is replaced by `current`. Membership events are
/// only produced for replica sets.
pub(crate) fn description_changes(
    kind: TopologyKind,
    previous: &TopologyDescription,
    current: &TopologyDescription,
) -> DescriptionChanges {
    let Some(diff) = previous.diff(current) else {
        return DescriptionChanges::default();
    };
    let track_membership = kind == TopologyKind::ReplicaSet;

    let mut changes = DescriptionChanges {
        added: diff.added_addresses.iter().map(|a| (*a).clone()).collect(),
        removed: diff.removed_addresses.iter().map(|a| (*a).clone()).collect(),
        events: Vec::new(),
    };

    for address in &changes.added {
        changes
            .events
            .push(TopologyEvent::ServerOpening(address.clone()));
    }

    for (address, (previous_description, new_description)) in diff.changed_servers {
        changes
            .events
            .push(TopologyEvent::ServerDescriptionChanged(Box::new(
                ServerDescriptionChangedEvent {
                    address: address.clone(),
                    previous_description: ServerInfo::new_owned(previous_description.clone()),
                    new_description: ServerInfo::new_owned(new_description.clone()),
                },
            )));

        let (old_type, new_type) = (previous_description.server_type, new_description.server_type);
        if !track_membership || old_type == new_type {
            continue;
        }
        if is_member_role(old_type) {
            changes.events.push(TopologyEvent::Left(MembershipEvent {
                address: address.clone(),
                server_type: old_type,
            }));
        }
        if is_member_role(new_type) {
            changes.events.push(TopologyEvent::Joined(MembershipEvent {
                address: address.clone(),
                server_type: new_type,
            }));
        }
    }

    for address in &changes.removed {
        let old_type = previous
            .get_server_description(address)
            .map(|server| server.server_type)
            .unwrap_or(ServerType::Unknown);
        if track_membership && is_member_role(old_type) {
            changes.events.push(TopologyEvent::Left(MembershipEvent {
                address: address.clone(),
                server_type: old_type,
            }));
        }
        changes
            .events
            .push(TopologyEvent::ServerClosed(address.clone()));
    }

    changes
        .events
        .push(TopologyEvent::TopologyDescriptionChanged(Box::new(
            TopologyDescriptionChangedEvent {
                previous_type: previous.topology_type(),
                new_type: current.topology_type(),
                servers: current
                    .servers()
                    .map(|server| ServerInfo::new_owned(server.clone()))
                    .collect(),
            },
        )));

    changes
}
