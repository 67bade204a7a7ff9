//! Configuration for a [`Topology`](crate::Topology).

mod parse;

use std::{
    fmt,
    hash::{Hash, Hasher},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use derive_where::derive_where;
use serde::{de::Error as SerdeError, Deserialize, Deserializer};
use typed_builder::TypedBuilder;

use crate::{
    auth::{Authenticator, Credential},
    concern::{ReadConcern, WriteConcern},
    error::{ErrorKind, Result},
    event::{command::CommandEvent, sdam::TopologyEvent, EventHandler},
    selection_criteria::ReadPreference,
};

pub(crate) const DEFAULT_PORT: u16 = 27017;

pub(crate) const DEFAULT_MAX_POOL_SIZE: u32 = 5;
pub(crate) const DEFAULT_RECONNECT_TRIES: u32 = 30;
pub(crate) const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_HEARTBEAT_FREQUENCY: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_LOCAL_THRESHOLD: Duration = Duration::from_millis(15);
pub(crate) const DEFAULT_BUFFER_MAX_ENTRIES: i64 = -1;

/// An enum representing the address of a MongoDB server.
#[derive(Clone, Debug, Eq)]
#[non_exhaustive]
pub enum ServerAddress {
    /// A TCP/IP host and port combination.
    Tcp {
        /// The hostname or IP address where the MongoDB server can be found.
        host: String,

        /// The TCP port that the MongoDB server is listening on.
        ///
        /// The default is 27017.
        port: Option<u16>,
    },
}

impl<'de> Deserialize<'de> for ServerAddress {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::parse(s.as_str()).map_err(|e| D::Error::custom(format!("{}", e)))
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::Tcp {
            host: "localhost".into(),
            port: None,
        }
    }
}

impl PartialEq for ServerAddress {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Tcp { host, port },
                Self::Tcp {
                    host: other_host,
                    port: other_port,
                },
            ) => {
                host == other_host
                    && port.unwrap_or(DEFAULT_PORT) == other_port.unwrap_or(DEFAULT_PORT)
            }
        }
    }
}

impl Hash for ServerAddress {
    fn hash<H>(&self, state: &mut H)
    where
        H: Hasher,
    {
        match self {
            Self::Tcp { host, port } => {
                host.hash(state);
                port.unwrap_or(DEFAULT_PORT).hash(state);
            }
        }
    }
}

impl FromStr for ServerAddress {
    type Err = crate::error::Error;
    fn from_str(address: &str) -> Result<Self> {
        ServerAddress::parse(address)
    }
}

impl ServerAddress {
    /// Parses an address string into a `ServerAddress`. Hostnames are normalized to lowercase.
    pub fn parse(address: impl AsRef<str>) -> Result<Self> {
        let address = address.as_ref();
        let mut parts = address.split(':');
        let hostname = match parts.next() {
            Some(part) if !part.is_empty() => part,
            _ => {
                return Err(ErrorKind::InvalidArgument {
                    message: format!("invalid server address: \"{}\"; hostname cannot be empty", address),
                }
                .into())
            }
        };

        let port = match parts.next() {
            Some(part) => {
                let port = u16::from_str(part).map_err(|_| ErrorKind::InvalidArgument {
                    message: format!(
                        "port must be valid 16-bit unsigned integer, instead got: {}",
                        part
                    ),
                })?;

                if port == 0 {
                    return Err(ErrorKind::InvalidArgument {
                        message: format!(
                            "invalid server address: \"{}\"; port must be non-zero",
                            address
                        ),
                    }
                    .into());
                }
                if parts.next().is_some() {
                    return Err(ErrorKind::InvalidArgument {
                        message: format!(
                            "address \"{}\" contains more than one unescaped ':'",
                            address
                        ),
                    }
                    .into());
                }

                Some(port)
            }
            None => None,
        };

        Ok(ServerAddress::Tcp {
            host: hostname.to_lowercase(),
            port,
        })
    }

    /// The host portion of this address.
    pub fn host(&self) -> &str {
        match self {
            Self::Tcp { host, .. } => host.as_str(),
        }
    }

    /// The port of this address, defaulting to 27017.
    pub fn port(&self) -> u16 {
        match self {
            Self::Tcp { port, .. } => port.unwrap_or(DEFAULT_PORT),
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => {
                write!(fmt, "{}:{}", host, port.unwrap_or(DEFAULT_PORT))
            }
        }
    }
}

/// Specifies the TLS configuration that the [`Topology`](crate::Topology) should use.
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct TlsOptions {
    /// The path to the CA file that the driver should use for TLS. If none is specified, the
    /// driver uses the Mozilla root certificates from the `webpki-roots` crate.
    pub ca_file_path: Option<PathBuf>,

    /// The path to a PEM file containing the client certificate followed by its private key.
    pub cert_key_file_path: Option<PathBuf>,
}

/// Every option recognized when connecting to a deployment. Unset fields fall back to the
/// defaults documented on each field.
#[derive(Clone, Default, TypedBuilder)]
#[derive_where(Debug)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ClientOptions {
    /// The initial list of seeds that the topology should connect to.
    #[builder(default = vec![ServerAddress::default()])]
    pub hosts: Vec<ServerAddress>,

    /// The application name sent to the server in the handshake, for diagnostics and logs.
    pub app_name: Option<String>,

    /// The maximum number of connections each server's pool may hold (`poolSize`).
    ///
    /// The default is 5.
    pub max_pool_size: Option<u32>,

    /// TLS configuration. `None` connects over plain TCP.
    pub tls: Option<TlsOptions>,

    /// Whether a topology that loses connectivity tries to reconnect instead of being destroyed.
    ///
    /// The default is true.
    pub auto_reconnect: Option<bool>,

    /// How many consecutive failed checks per server are tolerated while reconnecting before
    /// the topology gives up and emits `reconnectFailed`.
    ///
    /// The default is 30.
    pub reconnect_tries: Option<u32>,

    /// The delay between reconnect checks.
    ///
    /// The default is 1 second.
    pub reconnect_interval: Option<Duration>,

    /// The connect timeout passed to each underlying TCP stream when attempting to connect to the
    /// server. This also bounds the initial handshake.
    ///
    /// The default is 30 seconds.
    pub connect_timeout: Option<Duration>,

    /// The maximum time a single command may wait for its reply. `None` waits indefinitely.
    pub socket_timeout: Option<Duration>,

    /// The number of operations buffered while not connected. Negative means unbounded, 0 disables
    /// buffering and any other value is a hard cap.
    ///
    /// The default is -1.
    pub buffer_max_entries: Option<i64>,

    /// The default read preference for operations.
    pub read_preference: Option<ReadPreference>,

    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,

    /// The default read concern for operations.
    pub read_concern: Option<ReadConcern>,

    /// The name of the replica set that the topology should connect to.
    pub repl_set_name: Option<String>,

    /// The amount of time each monitoring task should wait between heartbeats (`haInterval`).
    ///
    /// The default is 10 seconds.
    pub heartbeat_freq: Option<Duration>,

    /// The latency window used in server selection (`acceptableLatencyMS`).
    ///
    /// The default is 15 milliseconds.
    pub local_threshold: Option<Duration>,

    /// Whether a replica set without a reachable primary still counts as connected.
    ///
    /// The default is false.
    pub connect_with_no_primary: Option<bool>,

    /// The credential used to authenticate every new connection.
    pub credential: Option<Credential>,

    /// The capability used to authenticate connections when a credential is set.
    #[derive_where(skip)]
    pub authenticator: Option<Arc<dyn Authenticator>>,

    /// The handler that receives command monitoring events, with sensitive payloads redacted.
    #[derive_where(skip)]
    pub command_event_handler: Option<EventHandler<CommandEvent>>,

    /// A handler registered on the topology's event registry before the first connect, so that it
    /// observes `topologyOpening` and every later event.
    #[derive_where(skip)]
    pub sdam_event_handler: Option<EventHandler<TopologyEvent>>,

    /// Commands and replies logged at `DEBUG` on the `mongodb_core::command` target are cut off
    /// after this many bytes of extended JSON. Defaults to 1000.
    pub tracing_max_document_length_bytes: Option<usize>,
}

impl ClientOptions {
    /// Parses a MongoDB connection string into a `ClientOptions` struct.
    ///
    /// The format of a MongoDB connection string is described
    /// [here](https://www.mongodb.com/docs/manual/reference/connection-string/#connection-string-formats).
    ///
    /// Unknown options are rejected; the error suggests the closest recognized option name.
    pub fn parse(s: impl AsRef<str>) -> Result<Self> {
        parse::parse_connection_string(s.as_ref())
    }

    pub(crate) fn max_pool_size(&self) -> u32 {
        self.max_pool_size.unwrap_or(DEFAULT_MAX_POOL_SIZE)
    }

    pub(crate) fn auto_reconnect(&self) -> bool {
        self.auto_reconnect.unwrap_or(true)
    }

    pub(crate) fn reconnect_tries(&self) -> u32 {
        self.reconnect_tries.unwrap_or(DEFAULT_RECONNECT_TRIES)
    }

    pub(crate) fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
            .unwrap_or(DEFAULT_RECONNECT_INTERVAL)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT)
    }

    pub(crate) fn buffer_max_entries(&self) -> i64 {
        self.buffer_max_entries
            .unwrap_or(DEFAULT_BUFFER_MAX_ENTRIES)
    }

    pub(crate) fn heartbeat_freq(&self) -> Duration {
        self.heartbeat_freq.unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY)
    }

    pub(crate) fn local_threshold(&self) -> Duration {
        self.local_threshold.unwrap_or(DEFAULT_LOCAL_THRESHOLD)
    }

    pub(crate) fn connect_with_no_primary(&self) -> bool {
        self.connect_with_no_primary.unwrap_or(false)
    }

    /// Ensures the options are internally consistent.
    pub fn validate(&self) -> Result<()> {
        if self.hosts.is_empty() {
            return Err(ErrorKind::InvalidArgument {
                message: "at least one host must be specified".to_string(),
            }
            .into());
        }

        if self.max_pool_size == Some(0) {
            return Err(ErrorKind::InvalidArgument {
                message: "cannot specify poolSize of 0".to_string(),
            }
            .into());
        }

        if let Some(ref write_concern) = self.write_concern {
            write_concern.validate()?;
        }

        if let Some(max_staleness) = self
            .read_preference
            .as_ref()
            .and_then(ReadPreference::max_staleness)
        {
            if max_staleness > Duration::ZERO && max_staleness < Duration::from_secs(90) {
                return Err(ErrorKind::InvalidArgument {
                    message: "max staleness cannot be both positive and below 90 seconds"
                        .to_string(),
                }
                .into());
            }
        }

        if self.credential.is_some() && self.authenticator.is_none() {
            tracing::warn!(
                target: crate::trace::TOPOLOGY_TRACING_EVENT_TARGET,
                "a credential was supplied without an authenticator; connections will not be \
                 authenticated"
            );
        }

        Ok(())
    }
}
