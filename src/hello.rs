//! The handshake every connection starts with and every heartbeat repeats.

use std::{
    sync::LazyLock,
    time::{Duration, Instant},
};

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    bson::{doc, oid::ObjectId, Bson, DateTime, Document},
    bson_util,
    cmap::{Command, Connection},
    error::{Error, ErrorKind, Result},
    options::ServerAddress,
    sdam::ServerType,
    selection_criteria::TagSet,
};

/// Understood by every server version, unlike `hello`.
pub(crate) const LEGACY_HELLO_COMMAND_NAME: &str = "isMaster";

const DEFAULT_MAX_BSON_OBJECT_SIZE: i64 = 16 * 1024 * 1024;
const DEFAULT_MAX_MESSAGE_SIZE_BYTES: i32 = 48_000_000;

/// `client.driver`, `client.os` and `client.platform`; only the application name varies.
static CLIENT_METADATA: LazyLock<Document> = LazyLock::new(|| {
    doc! {
        "driver": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
        "os": { "type": std::env::consts::OS, "architecture": std::env::consts::ARCH },
        "platform": format!("Rust {}", std::env::consts::FAMILY),
    }
});

/// The handshake command. Servers only accept `client` metadata on the first command of a
/// connection, so heartbeats over an established monitoring connection leave it out.
pub(crate) fn hello_command(app_name: Option<&str>, with_metadata: bool) -> Command {
    let mut body = doc! { LEGACY_HELLO_COMMAND_NAME: 1 };
    if with_metadata {
        let mut client = CLIENT_METADATA.clone();
        if let Some(name) = app_name {
            client.insert("application", doc! { "name": name });
        }
        body.insert("client", client);
    }
    Command::new(LEGACY_HELLO_COMMAND_NAME, "admin", body)
}

/// Sends `command` over `conn` and parses the reply, timing the round trip.
pub(crate) async fn run_hello(conn: &mut Connection, command: Command) -> Result<HelloReply> {
    let sent_at = Instant::now();
    let raw = conn.send_command(command, None).await?;
    let round_trip_time = sent_at.elapsed();

    let response: HelloCommandResponse = crate::bson::from_document(raw.clone())
        .map_err(|error| Error::invalid_response(format!("unreadable hello reply: {}", error)))?;
    if !response.is_ok() {
        let failure = crate::bson::from_document(raw.clone())
            .map_err(|_| Error::invalid_response("hello failed without an error code"))?;
        return Err(Error::from(ErrorKind::Command(failure)).with_server_response(&raw));
    }

    Ok(HelloReply {
        server_address: conn.address().clone(),
        command_response: response,
        raw_command_response: raw,
        round_trip_time,
    })
}

/// A successful handshake: the parsed fields, the reply as received and how long it took.
#[derive(Debug, Clone)]
pub(crate) struct HelloReply {
    pub(crate) server_address: ServerAddress,
    pub(crate) command_response: HelloCommandResponse,
    pub(crate) raw_command_response: Document,
    pub(crate) round_trip_time: Duration,
}

/// The fields of a hello reply that discovery and server selection look at.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HelloCommandResponse {
    #[serde(default, deserialize_with = "truthy")]
    pub ok: Option<bool>,

    // Role.
    pub is_writable_primary: Option<bool>,
    #[serde(rename = "ismaster")]
    pub is_master: Option<bool>,
    pub secondary: Option<bool>,
    pub arbiter_only: Option<bool>,
    pub hidden: Option<bool>,
    #[serde(rename = "isreplicaset")]
    pub is_replica_set: Option<bool>,
    /// `"isdbgrid"` on a `mongos`.
    pub msg: Option<String>,

    // Replica set membership, as this member sees it.
    pub set_name: Option<String>,
    pub set_version: Option<i32>,
    pub election_id: Option<ObjectId>,
    pub me: Option<String>,
    pub primary: Option<String>,
    pub hosts: Option<Vec<String>>,
    pub passives: Option<Vec<String>>,
    pub arbiters: Option<Vec<String>>,
    pub tags: Option<TagSet>,
    pub last_write: Option<LastWrite>,

    // Limits.
    pub min_wire_version: Option<i32>,
    pub max_wire_version: Option<i32>,
    #[serde(default = "default_max_bson_object_size")]
    pub max_bson_object_size: i64,
    #[serde(default = "default_max_message_size_bytes")]
    pub max_message_size_bytes: i32,
    pub max_write_batch_size: Option<i64>,
}

fn default_max_bson_object_size() -> i64 {
    DEFAULT_MAX_BSON_OBJECT_SIZE
}

fn default_max_message_size_bytes() -> i32 {
    DEFAULT_MAX_MESSAGE_SIZE_BYTES
}

/// Servers report `ok` as a number or a boolean.
fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<bool>, D::Error> {
    Ok(Option::<Bson>::deserialize(deserializer)?.map(|ok| bson_util::get_truthy(&ok)))
}

impl HelloCommandResponse {
    pub(crate) fn is_ok(&self) -> bool {
        self.ok != Some(false)
    }

    pub(crate) fn is_mongos(&self) -> bool {
        self.msg.as_deref() == Some("isdbgrid")
    }

    /// Classifies the server: `isdbgrid` marks a `mongos`, a set name a replica set member whose
    /// role the flags tell, `isreplicaset` a member that is not configured yet, anything else a
    /// standalone.
    pub(crate) fn server_type(&self) -> ServerType {
        let flag = |value: Option<bool>| value == Some(true);

        if self.is_mongos() {
            return ServerType::Mongos;
        }
        if self.set_name.is_none() {
            return if flag(self.is_replica_set) {
                ServerType::RsGhost
            } else {
                ServerType::Standalone
            };
        }

        if flag(self.hidden) {
            ServerType::RsOther
        } else if flag(self.is_writable_primary) || flag(self.is_master) {
            ServerType::RsPrimary
        } else if flag(self.secondary) {
            ServerType::RsSecondary
        } else if flag(self.arbiter_only) {
            ServerType::RsArbiter
        } else {
            ServerType::RsOther
        }
    }

    /// Every member this server reports, lowercased: hosts, then passives, then arbiters.
    pub(crate) fn all_members(&self) -> impl Iterator<Item = String> + '_ {
        [&self.hosts, &self.passives, &self.arbiters]
            .into_iter()
            .flatten()
            .flatten()
            .map(|host| host.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LastWrite {
    pub last_write_date: DateTime,
}
