use std::time::Duration;

use serde::Serialize;

use crate::{
    bson::{oid::ObjectId, DateTime},
    error::{Error, Result},
    hello::HelloReply,
    options::ServerAddress,
    selection_criteria::TagSet,
};

pub(crate) const DRIVER_MIN_DB_VERSION: &str = "2.6";
pub(crate) const DRIVER_MIN_WIRE_VERSION: i32 = 2;
pub(crate) const DRIVER_MAX_WIRE_VERSION: i32 = 25;

/// Enum representing the possible types of servers that the driver can connect to.
#[derive(Debug, Default, Serialize, Clone, Copy, Eq, PartialEq)]
#[non_exhaustive]
pub enum ServerType {
    /// A single, non-replica set mongod.
    Standalone,

    /// A router used in sharded deployments.
    Mongos,

    /// The primary node in a replica set.
    #[serde(rename = "RSPrimary")]
    RsPrimary,

    /// A secondary node in a replica set.
    #[serde(rename = "RSSecondary")]
    RsSecondary,

    /// A non-data bearing node in a replica set which can participate in elections.
    #[serde(rename = "RSArbiter")]
    RsArbiter,

    /// Hidden, starting up, or recovering nodes in a replica set.
    #[serde(rename = "RSOther")]
    RsOther,

    /// A member of an uninitialized replica set or a member that has been removed from the
    /// replica set config.
    #[serde(rename = "RSGhost")]
    RsGhost,

    /// A server that the driver hasn't yet communicated with or can't connect to.
    #[default]
    Unknown,
}

impl ServerType {
    pub(crate) fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::Mongos
        )
    }

    pub(crate) fn is_available(self) -> bool {
        !matches!(self, ServerType::Unknown)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ServerDescription {
    pub(crate) address: ServerAddress,
    pub(crate) server_type: ServerType,
    pub(crate) last_update_time: Option<DateTime>,
    pub(crate) average_round_trip_time: Option<Duration>,

    // A description either carries the error from its last check, the reply to its last check,
    // or neither when the server has been added but not checked yet. Helpers propagate the error
    // with `?`.
    pub(crate) reply: Result<Option<HelloReply>>,
}

impl PartialEq for ServerDescription {
    fn eq(&self, other: &Self) -> bool {
        if self.address != other.address || self.server_type != other.server_type {
            return false;
        }

        match (self.reply.as_ref(), other.reply.as_ref()) {
            (Ok(self_reply), Ok(other_reply)) => {
                let self_response = self_reply.as_ref().map(|r| &r.command_response);
                let other_response = other_reply.as_ref().map(|r| &r.command_response);

                self_response == other_response
            }
            (Err(self_err), Err(other_err)) => self_err.to_string() == other_err.to_string(),
            _ => false,
        }
    }
}

impl ServerDescription {
    /// A description for a server that has not been checked yet.
    pub(crate) fn new(address: &ServerAddress) -> Self {
        Self {
            address: normalize(address),
            server_type: ServerType::Unknown,
            last_update_time: None,
            average_round_trip_time: None,
            reply: Ok(None),
        }
    }

    pub(crate) fn new_from_hello_reply(address: &ServerAddress, mut reply: HelloReply) -> Self {
        let mut description = Self::new(address);
        description.last_update_time = Some(DateTime::now());
        description.server_type = reply.command_response.server_type();

        // The average is folded with the previous one when the description is applied to the
        // topology.
        if description.server_type.is_available() {
            description.average_round_trip_time = Some(reply.round_trip_time);
        }

        let response = &mut reply.command_response;
        for hosts in [
            &mut response.hosts,
            &mut response.passives,
            &mut response.arbiters,
        ]
        .into_iter()
        .flatten()
        {
            for host in hosts.iter_mut() {
                *host = host.to_lowercase();
            }
        }
        if let Some(ref mut me) = response.me {
            *me = me.to_lowercase();
        }

        description.reply = Ok(Some(reply));
        description
    }

    pub(crate) fn new_from_error(address: &ServerAddress, error: Error) -> Self {
        let mut description = Self::new(address);
        description.last_update_time = Some(DateTime::now());
        description.reply = Err(error);
        description
    }

    /// Whether this server is "available" as per the definition in the server selection spec.
    pub(crate) fn is_available(&self) -> bool {
        self.server_type.is_available()
    }

    pub(crate) fn error(&self) -> Option<&Error> {
        self.reply.as_ref().err()
    }

    pub(crate) fn hello_reply(&self) -> Option<&HelloReply> {
        self.reply.as_ref().ok().and_then(Option::as_ref)
    }

    pub(crate) fn compatibility_error_message(&self) -> Option<String> {
        let reply = self.hello_reply()?;

        let hello_min_wire_version = reply.command_response.min_wire_version.unwrap_or(0);
        if hello_min_wire_version > DRIVER_MAX_WIRE_VERSION {
            return Some(format!(
                "Server at {} requires wire version {}, but this version of the driver only \
                 supports up to {}",
                self.address, hello_min_wire_version, DRIVER_MAX_WIRE_VERSION,
            ));
        }

        let hello_max_wire_version = reply.command_response.max_wire_version.unwrap_or(0);
        if hello_max_wire_version < DRIVER_MIN_WIRE_VERSION {
            return Some(format!(
                "Server at {} reports wire version {}, but this version of the driver requires \
                 at least {} (MongoDB {}).",
                self.address, hello_max_wire_version, DRIVER_MIN_WIRE_VERSION, DRIVER_MIN_DB_VERSION
            ));
        }

        None
    }

    pub(crate) fn set_name(&self) -> Result<Option<String>> {
        let set_name = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.set_name.clone());
        Ok(set_name)
    }

    /// Every member the server reports. Addresses that fail to parse are skipped.
    pub(crate) fn known_hosts(&self) -> Result<Vec<ServerAddress>> {
        let reply = self.reply.as_ref().map_err(Clone::clone)?;
        Ok(reply
            .iter()
            .flat_map(|reply| reply.command_response.all_members())
            .filter_map(|host| ServerAddress::parse(host).ok())
            .collect())
    }

    pub(crate) fn invalid_me(&self) -> Result<bool> {
        if let Some(reply) = self.reply.as_ref().map_err(Clone::clone)? {
            if let Some(ref me) = reply.command_response.me {
                return Ok(&self.address.to_string() != me);
            }
        }

        Ok(false)
    }

    pub(crate) fn set_version(&self) -> Result<Option<i32>> {
        let set_version = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.set_version);
        Ok(set_version)
    }

    pub(crate) fn election_id(&self) -> Result<Option<ObjectId>> {
        let election_id = self
            .reply
            .as_ref()
            .map_err(Clone::clone)?
            .as_ref()
            .and_then(|reply| reply.command_response.election_id);
        Ok(election_id)
    }

    pub(crate) fn min_wire_version(&self) -> Option<i32> {
        self.hello_reply()
            .and_then(|reply| reply.command_response.min_wire_version)
    }

    pub(crate) fn max_wire_version(&self) -> Option<i32> {
        self.hello_reply()
            .and_then(|reply| reply.command_response.max_wire_version)
    }

    /// The raw reply to the last handshake, if the last check succeeded.
    pub(crate) fn last_hello(&self) -> Option<&crate::bson::Document> {
        self.hello_reply().map(|reply| &reply.raw_command_response)
    }

    pub(crate) fn last_write_date(&self) -> Result<Option<DateTime>> {
        match self.reply {
            Ok(None) => Ok(None),
            Ok(Some(ref reply)) => Ok(reply
                .command_response
                .last_write
                .as_ref()
                .map(|write| write.last_write_date)),
            Err(ref e) => Err(e.clone()),
        }
    }

    pub(crate) fn tags(&self) -> Option<&TagSet> {
        self.hello_reply()
            .and_then(|reply| reply.command_response.tags.as_ref())
    }

    pub(crate) fn matches_tag_set(&self, tag_set: &TagSet) -> bool {
        let Some(server_tags) = self.tags() else {
            return tag_set.is_empty();
        };

        tag_set
            .iter()
            .all(|(key, val)| server_tags.get(key) == Some(val))
    }
}

fn normalize(address: &ServerAddress) -> ServerAddress {
    match address {
        ServerAddress::Tcp { host, port } => ServerAddress::Tcp {
            host: host.to_lowercase(),
            port: *port,
        },
    }
}
