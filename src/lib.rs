//! This crate contains the core of a MongoDB client driver: discovery and monitoring of a
//! deployment, connection pooling, command routing and cursors. It uses the [`bson`] crate for
//! BSON support and runs on [`tokio`].
//!
//! The entry point is [`Topology`], which manages a single server, a replica set or a set of
//! `mongos` routers:
//!
//! ```rust,no_run
//! use mongodb_core::{bson::doc, options::ClientOptions, Namespace, Topology};
//!
//! # async fn run() -> mongodb_core::error::Result<()> {
//! let options = ClientOptions::parse("mongodb://a.example.com,b.example.com/?replicaSet=rs")?;
//! let topology = Topology::new(options)?;
//! topology.connect().await?;
//!
//! let ns = Namespace::new("app", "users");
//! topology
//!     .insert(&ns, vec![doc! { "name": "ada" }, doc! { "name": "grace" }], None)
//!     .await?;
//!
//! let mut cursor = topology.cursor(&ns, doc! {}, None)?;
//! cursor.sort("name")?.batch_size(100)?;
//! while let Some(user) = cursor.next().await? {
//!     println!("{}", user);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Operations issued before the topology is connected, or while it is reconnecting, are buffered
//! and replayed in order once it can serve them. The buffer can be bounded or disabled with the
//! `bufferMaxEntries` option.
//!
//! # Feature flags
//!
//! | Feature      | Description                                   | Default |
//! |:-------------|:----------------------------------------------|:--------|
//! | `rustls-tls` | Enable TLS connections through [`rustls`].    | yes     |
//!
//! # Logging
//!
//! The crate emits [`tracing`] events under the `mongodb_core::command`,
//! `mongodb_core::connection`, `mongodb_core::cursor` and `mongodb_core::topology` targets.
//! Topology and command events can also be observed directly through
//! [`Topology::events`] and [`ClientOptions::command_event_handler`](options::ClientOptions).

#![warn(missing_docs)]
#![cfg_attr(docsrs, warn(rustdoc::missing_crate_level_docs))]
#![allow(clippy::unreadable_literal, clippy::cognitive_complexity)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod options;

pub use ::bson;

pub(crate) mod auth;
mod bson_util;
mod client_options;
mod cmap;
mod concern;
mod cursor;
pub mod error;
pub mod event;
mod hello;
mod namespace;
mod operation;
mod pending;
pub mod results;
mod router;
pub(crate) mod runtime;
mod sdam;
mod selection_criteria;
mod serde_util;
#[cfg(test)]
mod test;
mod topology;
mod trace;

pub use crate::{
    auth::Authenticator,
    cmap::{Command, Connection, ConnectionInfo, Connector, Message, Transport},
    cursor::{Cursor, CursorState},
    namespace::Namespace,
    pending::PendingOpStore,
    sdam::{Capabilities, ServerInfo, ServerType, TopologyType},
    topology::{Topology, TopologyKind, TopologyState},
};
