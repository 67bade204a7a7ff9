//! Read and write concerns.
//!
//! Both can be configured on the topology, a database scope, a collection scope and a single
//! call. [`router`](crate::router) layers them, the most specific scope winning key by key.

#[cfg(test)]
mod test;

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    error::{Error, Result},
    serde_util,
};

/// The consistency a read asks for, sent as `readConcern` on reads when the deployment
/// supports it.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[non_exhaustive]
pub struct ReadConcern {
    #[allow(missing_docs)]
    pub level: ReadConcernLevel,
}

impl ReadConcern {
    /// `{ level: "majority" }`
    pub fn majority() -> Self {
        ReadConcernLevel::Majority.into()
    }

    /// `{ level: "local" }`
    pub fn local() -> Self {
        ReadConcernLevel::Local.into()
    }

    /// `{ level: "linearizable" }`
    pub fn linearizable() -> Self {
        ReadConcernLevel::Linearizable.into()
    }

    /// `{ level: "available" }`
    pub fn available() -> Self {
        ReadConcernLevel::Available.into()
    }

    /// A level this crate has no name for; it is sent verbatim.
    pub fn custom(level: impl AsRef<str>) -> Self {
        ReadConcernLevel::from_str(level.as_ref()).into()
    }

    pub(crate) fn to_document(&self) -> Document {
        doc! { "level": self.level.as_str() }
    }
}

impl From<ReadConcernLevel> for ReadConcern {
    fn from(level: ReadConcernLevel) -> Self {
        Self { level }
    }
}

/// The `level` of a [`ReadConcern`].
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ReadConcernLevel {
    Local,
    Majority,
    Linearizable,
    Available,
    /// Any other level, passed through as given.
    Custom(String),
}

impl ReadConcernLevel {
    pub(crate) fn from_str(level: &str) -> Self {
        match level {
            "local" => Self::Local,
            "majority" => Self::Majority,
            "linearizable" => Self::Linearizable,
            "available" => Self::Available,
            other => Self::Custom(other.to_string()),
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Majority => "majority",
            Self::Linearizable => "linearizable",
            Self::Available => "available",
            Self::Custom(level) => level,
        }
    }
}

impl Serialize for ReadConcernLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ReadConcernLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(|level| Self::from_str(&level))
    }
}

/// The acknowledgment a write waits for.
///
/// Fields left unset are taken from a less specific scope by [`WriteConcern::or`], so a call can
/// override `w` alone and keep the collection's `wtimeout`.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(field_defaults(default, setter(strip_option)))]
#[non_exhaustive]
pub struct WriteConcern {
    /// How many members, or which tagged group, must acknowledge the write.
    pub w: Option<Acknowledgment>,

    /// How long the server waits for `w` before reporting a write concern error.
    #[serde(
        rename = "wtimeout",
        default,
        with = "serde_util::duration_option_as_int_millis"
    )]
    pub w_timeout: Option<Duration>,

    /// Wait for the write to reach the journal.
    #[serde(rename = "j")]
    pub journal: Option<bool>,

    /// Wait for the data files to be flushed. Servers that journal treat this as `j`.
    pub fsync: Option<bool>,
}

/// The `w` of a [`WriteConcern`]: a member count, `"majority"` or a custom tag set name.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Acknowledgment {
    /// This many members. Zero makes the write unacknowledged.
    Nodes(i32),
    /// A majority of the voting members.
    Majority,
    /// A write concern tag set defined in the replica set configuration.
    Custom(String),
}

impl Acknowledgment {
    pub(crate) fn to_bson(&self) -> Bson {
        match self {
            Self::Nodes(n) => Bson::Int32(*n),
            Self::Majority => Bson::String("majority".into()),
            Self::Custom(name) => Bson::String(name.clone()),
        }
    }
}

impl Serialize for Acknowledgment {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_bson().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Acknowledgment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Count(i32),
            Name(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Count(n) => n.into(),
            Raw::Name(name) => name.into(),
        })
    }
}

impl From<i32> for Acknowledgment {
    fn from(n: i32) -> Self {
        Self::Nodes(n)
    }
}

impl From<String> for Acknowledgment {
    fn from(name: String) -> Self {
        match name.as_str() {
            "majority" => Self::Majority,
            _ => Self::Custom(name),
        }
    }
}

impl From<&str> for Acknowledgment {
    fn from(name: &str) -> Self {
        Self::from(name.to_string())
    }
}

impl WriteConcern {
    /// `{ w: "majority" }`
    pub fn majority() -> Self {
        Acknowledgment::Majority.into()
    }

    /// `{ w: n }`
    pub fn nodes(n: i32) -> Self {
        Acknowledgment::Nodes(n).into()
    }

    /// `{ w: 0 }`
    pub fn unacknowledged() -> Self {
        Self::nodes(0)
    }

    /// `w: 0` without a durability request is the only unacknowledged combination.
    pub(crate) fn is_acknowledged(&self) -> bool {
        let unacknowledged = self.w == Some(Acknowledgment::Nodes(0))
            && self.journal != Some(true)
            && self.fsync != Some(true);
        !unacknowledged
    }

    /// Whether every field is unset.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// `self` with each unset field taken from `fallback`.
    pub fn or(&self, fallback: &WriteConcern) -> WriteConcern {
        WriteConcern {
            w: self.w.as_ref().or(fallback.w.as_ref()).cloned(),
            w_timeout: self.w_timeout.or(fallback.w_timeout),
            journal: self.journal.or(fallback.journal),
            fsync: self.fsync.or(fallback.fsync),
        }
    }

    /// Rejects a negative `w`, and `w: 0` combined with `j` or `fsync`.
    pub fn validate(&self) -> Result<()> {
        match self.w {
            Some(Acknowledgment::Nodes(n)) if n < 0 => Err(Error::invalid_argument(format!(
                "write concern w must not be negative, got {}",
                n
            ))),
            Some(Acknowledgment::Nodes(0))
                if self.journal == Some(true) || self.fsync == Some(true) =>
            {
                Err(Error::invalid_argument(
                    "an unacknowledged write concern (w: 0) cannot request j or fsync",
                ))
            }
            _ => Ok(()),
        }
    }

    /// The `writeConcern` field of a command.
    pub(crate) fn to_document(&self) -> Document {
        let mut document = Document::new();
        if let Some(ref w) = self.w {
            document.insert("w", w.to_bson());
        }
        if let Some(w_timeout) = self.w_timeout {
            document.insert("wtimeout", bson_util::duration_to_millis_bson(w_timeout));
        }
        if let Some(journal) = self.journal {
            document.insert("j", journal);
        }
        if let Some(fsync) = self.fsync {
            document.insert("fsync", fsync);
        }
        document
    }
}

impl From<Acknowledgment> for WriteConcern {
    fn from(w: Acknowledgment) -> Self {
        Self {
            w: Some(w),
            ..Default::default()
        }
    }
}
