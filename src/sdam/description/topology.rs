use std::{
    collections::{HashMap, HashSet},
    fmt,
    time::Duration,
};

use serde::Serialize;

use crate::{
    bson::{oid::ObjectId, Document},
    error::Result,
    options::ServerAddress,
    sdam::description::server::{ServerDescription, ServerType},
    selection_criteria::ReadPreference,
};

/// The shape of the deployment as far as server discovery can tell.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize)]
#[non_exhaustive]
pub enum TopologyType {
    /// One server, addressed directly.
    Single,

    /// A replica set whose primary is unknown.
    ReplicaSetNoPrimary,

    /// A replica set with a known primary.
    ReplicaSetWithPrimary,

    /// One or more `mongos` routers in front of a sharded cluster.
    Sharded,

    /// Nothing has been learned yet.
    #[default]
    Unknown,
}

impl TopologyType {
    fn is_replica_set(self) -> bool {
        matches!(self, Self::ReplicaSetNoPrimary | Self::ReplicaSetWithPrimary)
    }
}

impl fmt::Display for TopologyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the topology knows about each member, together with the replica set bookkeeping used to
/// judge new hello replies.
#[derive(Debug, Clone)]
pub(crate) struct TopologyDescription {
    topology_type: TopologyType,

    /// The replica set name, configured or learned from the first member that reported one.
    set_name: Option<String>,

    /// The newest `(setVersion, electionId)` seen from a primary. Older primaries are stale.
    latest_election: Option<(i32, Option<ObjectId>)>,

    /// Set while some member speaks a wire version range this crate cannot talk to.
    compatibility_error: Option<String>,

    /// How much slower than the fastest suitable server a server may be and still be selected.
    pub(crate) local_threshold: Duration,

    pub(crate) heartbeat_freq: Duration,

    servers: HashMap<ServerAddress, ServerDescription>,
}

impl PartialEq for TopologyDescription {
    fn eq(&self, other: &Self) -> bool {
        self.topology_type == other.topology_type
            && self.servers == other.servers
            && self.compatibility_error == other.compatibility_error
    }
}

impl TopologyDescription {
    pub(crate) fn new(
        topology_type: TopologyType,
        seeds: &[ServerAddress],
        set_name: Option<String>,
        local_threshold: Duration,
        heartbeat_freq: Duration,
    ) -> Self {
        let mut description = Self {
            topology_type,
            set_name,
            latest_election: None,
            compatibility_error: None,
            local_threshold,
            heartbeat_freq,
            servers: HashMap::new(),
        };
        description.add_unknown(seeds.iter().cloned());
        description
    }

    pub(crate) fn topology_type(&self) -> TopologyType {
        self.topology_type
    }

    pub(crate) fn server_addresses(&self) -> impl Iterator<Item = &ServerAddress> {
        self.servers.keys()
    }

    pub(crate) fn servers(&self) -> impl Iterator<Item = &ServerDescription> {
        self.servers.values()
    }

    pub(crate) fn get_server_description(
        &self,
        address: &ServerAddress,
    ) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    pub(crate) fn primary(&self) -> Option<&ServerDescription> {
        self.servers()
            .find(|server| server.server_type == ServerType::RsPrimary)
    }

    pub(crate) fn has_available_servers(&self) -> bool {
        self.servers().any(ServerDescription::is_available)
    }

    pub(crate) fn has_server_of_type(&self, server_type: ServerType) -> bool {
        self.servers().any(|server| server.server_type == server_type)
    }

    pub(crate) fn compatibility_error(&self) -> Option<&String> {
        self.compatibility_error.as_ref()
    }

    /// Adds `$readPreference` to a read routed to a server of `server_type` when that server
    /// needs it to honor the caller's preference.
    ///
    /// A `mongos` gets every preference that can route away from the primary. Replica set
    /// members get every non-primary preference. A single member addressed directly always
    /// gets at least `primaryPreferred` so that it serves the read even if it is a secondary.
    pub(crate) fn update_command_with_read_pref(
        &self,
        server_type: ServerType,
        command: &mut Document,
        read_pref: Option<&ReadPreference>,
    ) -> Result<()> {
        let forwarded = match (self.topology_type, server_type) {
            (_, ServerType::Mongos) => read_pref.filter(|rp| mongos_needs_read_pref(rp)).cloned(),
            (TopologyType::Single, ServerType::Standalone) => None,
            (TopologyType::Single, _) => Some(match read_pref {
                None | Some(ReadPreference::Primary) => ReadPreference::PrimaryPreferred {
                    options: None,
                },
                Some(other) => other.clone(),
            }),
            _ => read_pref.filter(|rp| !rp.is_primary()).cloned(),
        };

        if let Some(read_pref) = forwarded {
            command.insert("$readPreference", read_pref.to_document()?);
        }
        Ok(())
    }

    /// Describes how `other` differs from `self`, or returns `None` if nothing changed.
    pub(crate) fn diff<'a>(
        &'a self,
        other: &'a TopologyDescription,
    ) -> Option<TopologyDescriptionDiff<'a>> {
        if self == other {
            return None;
        }

        let before: HashSet<&ServerAddress> = self.server_addresses().collect();
        let after: HashSet<&ServerAddress> = other.server_addresses().collect();

        let mut changed_servers = HashMap::new();
        for (address, old) in &self.servers {
            if let Some(new) = other.servers.get(address).filter(|new| *new != old) {
                changed_servers.insert(address, (old, new));
            }
        }

        Some(TopologyDescriptionDiff {
            removed_addresses: before.difference(&after).copied().collect(),
            added_addresses: after.difference(&before).copied().collect(),
            changed_servers,
        })
    }

    /// Folds the result of a server check into the description. Checks of servers that are no
    /// longer members are ignored.
    pub(crate) fn update(&mut self, mut checked: ServerDescription) -> Result<()> {
        let Some(previous) = self.servers.get(&checked.address) else {
            return Ok(());
        };

        // Exponentially weighted, 20% for the newest sample.
        if let (Some(old), Some(new)) = (
            previous.average_round_trip_time,
            checked.average_round_trip_time,
        ) {
            checked.average_round_trip_time = Some(new / 5 + old * 4 / 5);
        }

        let address = checked.address.clone();
        let server_type = checked.server_type;
        self.servers.insert(address.clone(), checked);

        match self.topology_type {
            TopologyType::Sharded => {
                if !matches!(server_type, ServerType::Unknown | ServerType::Mongos) {
                    self.servers.remove(&address);
                }
            }
            t if t.is_replica_set() => self.discover_replica_set(&address)?,
            _ => {}
        }

        let compatibility_error = self
            .servers()
            .find_map(ServerDescription::compatibility_error_message);
        self.compatibility_error = compatibility_error;
        Ok(())
    }

    /// Applies what the replica set member at `address` just reported.
    fn discover_replica_set(&mut self, address: &ServerAddress) -> Result<()> {
        let Some(member) = self.servers.get(address).cloned() else {
            return Ok(());
        };

        match member.server_type {
            ServerType::Unknown | ServerType::RsGhost => {}
            ServerType::Standalone | ServerType::Mongos => {
                self.servers.remove(address);
            }
            ServerType::RsPrimary => self.accept_primary(member)?,
            ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                if !self.adopt_set_name(&member)? {
                    self.servers.remove(address);
                } else {
                    // Without a primary, any member's view of the set is the best there is.
                    if self.topology_type == TopologyType::ReplicaSetNoPrimary {
                        self.add_unknown(member.known_hosts()?);
                    }
                    if member.invalid_me()? {
                        self.servers.remove(address);
                    }
                }
            }
        }

        self.topology_type = if self.has_server_of_type(ServerType::RsPrimary) {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
        Ok(())
    }

    /// Takes the set name from `member` if none is known yet. Returns whether the member belongs
    /// to the set.
    fn adopt_set_name(&mut self, member: &ServerDescription) -> Result<bool> {
        let reported = member.set_name()?;
        match self.set_name {
            None => {
                self.set_name = reported;
                Ok(true)
            }
            Some(ref expected) => Ok(reported.as_deref() == Some(expected.as_str())),
        }
    }

    /// Makes `primary` the only primary and its host list the membership of the set.
    fn accept_primary(&mut self, primary: ServerDescription) -> Result<()> {
        if !self.adopt_set_name(&primary)? {
            self.servers.remove(&primary.address);
            return Ok(());
        }

        let set_version = primary.set_version()?;
        let election_id = primary.election_id()?;
        if let Some(set_version) = set_version {
            let reported = (set_version, election_id);
            match self.latest_election {
                Some(latest) if election_is_older(reported, latest) => {
                    // Wait for its next check rather than trust an outdated primary.
                    self.servers.insert(
                        primary.address.clone(),
                        ServerDescription::new(&primary.address),
                    );
                    return Ok(());
                }
                _ => self.latest_election = Some(reported),
            }
        }

        // The primary's host list is the membership of the set, the primary included.
        let members: HashSet<ServerAddress> = primary.known_hosts()?.into_iter().collect();
        self.servers.retain(|address, _| members.contains(address));
        for server in self.servers.values_mut() {
            if server.address != primary.address && server.server_type == ServerType::RsPrimary {
                *server = ServerDescription::new(&server.address);
            }
        }
        self.add_unknown(members);
        Ok(())
    }

    /// Adds a not-yet-checked description for each address that is not known yet.
    fn add_unknown(&mut self, addresses: impl IntoIterator<Item = ServerAddress>) {
        for address in addresses {
            self.servers
                .entry(address)
                .or_insert_with_key(ServerDescription::new);
        }
    }
}

/// Whether `reported` comes from an earlier election than `latest`. A primary that does not
/// report an election id cannot be compared past its set version.
fn election_is_older(
    reported: (i32, Option<ObjectId>),
    latest: (i32, Option<ObjectId>),
) -> bool {
    match (reported, latest) {
        ((version, _), (latest_version, _)) if version != latest_version => {
            version < latest_version
        }
        ((_, Some(id)), (_, Some(latest_id))) => id < latest_id,
        _ => false,
    }
}

/// `mongos` routes to the primary unless told otherwise. A plain `secondaryPreferred` is implied
/// by the routing it already does.
fn mongos_needs_read_pref(read_pref: &ReadPreference) -> bool {
    match read_pref {
        ReadPreference::Primary => false,
        ReadPreference::SecondaryPreferred { options } => options
            .as_ref()
            .is_some_and(|o| o.tag_sets.is_some() || o.max_staleness.is_some()),
        _ => true,
    }
}

/// How one topology description differs from an earlier one.
#[derive(Debug)]
pub(crate) struct TopologyDescriptionDiff<'a> {
    pub(crate) removed_addresses: HashSet<&'a ServerAddress>,
    pub(crate) added_addresses: HashSet<&'a ServerAddress>,
    pub(crate) changed_servers:
        HashMap<&'a ServerAddress, (&'a ServerDescription, &'a ServerDescription)>,
}
