use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use derive_where::derive_where;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    error::{Error, Result},
    options::ServerAddress,
    sdam::public::ServerInfo,
    serde_util,
};

/// Decides which servers may serve an operation.
#[derive(Clone, derive_more::Display)]
#[derive_where(Debug)]
#[non_exhaustive]
pub enum SelectionCriteria {
    /// Servers are chosen by role, tags and staleness.
    #[display("ReadPreference {_0}")]
    ReadPreference(ReadPreference),

    /// Servers for which the predicate returns `true` are suitable.
    #[display("Custom predicate")]
    Predicate(#[derive_where(skip)] Predicate),
}

impl PartialEq for SelectionCriteria {
    fn eq(&self, other: &Self) -> bool {
        // Predicates are opaque and never compare equal.
        matches!((self, other), (Self::ReadPreference(a), Self::ReadPreference(b)) if a == b)
    }
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_pref: ReadPreference) -> Self {
        Self::ReadPreference(read_pref)
    }
}

impl SelectionCriteria {
    /// Only the server at `address` is suitable. Cursor maintenance uses this to stay on the
    /// server that owns the cursor.
    pub(crate) fn from_address(address: ServerAddress) -> Self {
        Self::Predicate(Arc::new(move |server| *server.address() == address))
    }
}

/// A filter over the known servers.
pub type Predicate = Arc<dyn Fn(&ServerInfo) -> bool + Send + Sync>;

/// Routing rule for reads.
///
/// Every mode but `Primary` accepts [`ReadPreferenceOptions`]: tag sets restrict the eligible
/// secondaries and `max_staleness` bounds how far behind the primary they may be. Staleness is
/// sent to servers as whole seconds (`maxStalenessSeconds`).
#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ReadPreference {
    /// The primary only.
    Primary,

    /// Secondaries only.
    Secondary {
        options: Option<ReadPreferenceOptions>,
    },

    /// The primary, or a secondary while there is no primary.
    PrimaryPreferred {
        options: Option<ReadPreferenceOptions>,
    },

    /// A secondary, or the primary while no secondary is eligible.
    SecondaryPreferred {
        options: Option<ReadPreferenceOptions>,
    },

    /// Any eligible member within the latency window.
    Nearest {
        options: Option<ReadPreferenceOptions>,
    },
}

impl fmt::Display for ReadPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mode())?;
        if let Some(tag_sets) = self.tag_sets() {
            write!(f, " tags={:?}", tag_sets)?;
        }
        if let Some(max_staleness) = self.max_staleness() {
            write!(f, " maxStaleness={}s", max_staleness.as_secs())?;
        }
        Ok(())
    }
}

/// The document form shared by connection strings, structured options and `$readPreference`.
#[serde_with::skip_serializing_none]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadPreferenceDocument<O> {
    #[serde(alias = "preference")]
    mode: String,
    #[serde(flatten)]
    options: O,
}

impl<'de> Deserialize<'de> for ReadPreference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let ReadPreferenceDocument { mode, options } =
            ReadPreferenceDocument::<ReadPreferenceOptions>::deserialize(deserializer)?;
        let read_pref = Self::from_mode(&mode)
            .ok_or_else(|| D::Error::custom(format!("unknown read preference mode {:?}", mode)))?;
        if read_pref.is_primary() && !options.is_default() {
            return Err(D::Error::custom(
                "tags and maxStalenessSeconds cannot be combined with mode primary",
            ));
        }
        Ok(read_pref.with_options(options))
    }
}

impl Serialize for ReadPreference {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        ReadPreferenceDocument {
            mode: self.mode().to_string(),
            options: self.options(),
        }
        .serialize(serializer)
    }
}

/// Restrictions on the members a non-primary read preference may pick.
#[serde_with::skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ReadPreferenceOptions {
    /// Tried in order; the first tag set matched by at least one member wins. A member matches
    /// when it carries every tag of the set.
    #[serde(alias = "tags")]
    pub tag_sets: Option<Vec<TagSet>>,

    /// Members whose estimated replication lag exceeds this are not eligible.
    #[serde(
        rename = "maxStalenessSeconds",
        default,
        with = "serde_util::duration_option_as_int_seconds"
    )]
    pub max_staleness: Option<Duration>,
}

impl ReadPreferenceOptions {
    /// No staleness bound, and no tag set other than the empty one that matches everything.
    pub(crate) fn is_default(&self) -> bool {
        let trivial_tags = match self.tag_sets {
            None => true,
            Some(ref tag_sets) => tag_sets.iter().all(HashMap::is_empty),
        };
        trivial_tags && self.max_staleness.is_none()
    }
}

impl ReadPreference {
    /// Parses a mode name such as `"secondaryPreferred"`, ignoring case.
    pub fn from_mode(mode: &str) -> Option<Self> {
        let read_pref = match mode.to_ascii_lowercase().as_str() {
            "primary" => Self::Primary,
            "secondary" => Self::Secondary { options: None },
            "primarypreferred" => Self::PrimaryPreferred { options: None },
            "secondarypreferred" => Self::SecondaryPreferred { options: None },
            "nearest" => Self::Nearest { options: None },
            _ => return None,
        };
        Some(read_pref)
    }

    pub(crate) fn mode(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary { .. } => "secondary",
            Self::PrimaryPreferred { .. } => "primaryPreferred",
            Self::SecondaryPreferred { .. } => "secondaryPreferred",
            Self::Nearest { .. } => "nearest",
        }
    }

    fn options_slot(&mut self) -> Option<&mut Option<ReadPreferenceOptions>> {
        match self {
            Self::Primary => None,
            Self::Secondary { options }
            | Self::PrimaryPreferred { options }
            | Self::SecondaryPreferred { options }
            | Self::Nearest { options } => Some(options),
        }
    }

    pub(crate) fn options(&self) -> Option<&ReadPreferenceOptions> {
        match self {
            Self::Primary => None,
            Self::Secondary { options }
            | Self::PrimaryPreferred { options }
            | Self::SecondaryPreferred { options }
            | Self::Nearest { options } => options.as_ref(),
        }
    }

    pub(crate) fn max_staleness(&self) -> Option<Duration> {
        self.options()?.max_staleness
    }

    pub(crate) fn tag_sets(&self) -> Option<&Vec<TagSet>> {
        self.options()?.tag_sets.as_ref()
    }

    pub(crate) fn is_primary(&self) -> bool {
        matches!(self, Self::Primary)
    }

    /// Replaces the options. Trivial options are dropped so that equal preferences compare equal.
    fn with_options(mut self, options: ReadPreferenceOptions) -> Self {
        if let Some(slot) = self.options_slot() {
            *slot = (!options.is_default()).then_some(options);
        }
        self
    }

    fn edit_options(mut self, edit: impl FnOnce(&mut ReadPreferenceOptions)) -> Result<Self> {
        let slot = self.options_slot().ok_or_else(|| {
            Error::invalid_argument(
                "read preference tags and max staleness require a mode other than primary",
            )
        })?;
        edit(slot.get_or_insert_with(Default::default));
        Ok(self)
    }

    pub(crate) fn with_tags(self, tag_sets: Vec<TagSet>) -> Result<Self> {
        self.edit_options(|options| options.tag_sets = Some(tag_sets))
    }

    pub(crate) fn with_max_staleness(self, max_staleness: Duration) -> Result<Self> {
        self.edit_options(|options| options.max_staleness = Some(max_staleness))
    }

    /// The value sent as `$readPreference`.
    pub(crate) fn to_document(&self) -> Result<Document> {
        match bson::to_bson(self)? {
            Bson::Document(document) => Ok(document),
            other => Err(Error::internal(format!(
                "read preference serialized to {:?} instead of a document",
                other
            ))),
        }
    }
}

/// Tag names mapped to the values a member must carry.
pub type TagSet = HashMap<String, String>;

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{ReadPreference, ReadPreferenceOptions};
    use crate::bson::{doc, Bson};

    #[test]
    fn tags_and_staleness_included_in_document() {
        let options = Some(
            ReadPreferenceOptions::builder()
                .tag_sets(vec![[("dc".to_string(), "ny".to_string())].into()])
                .max_staleness(Duration::from_secs(120))
                .build(),
        );

        let read_pref = ReadPreference::Secondary { options };
        assert_eq!(
            read_pref.to_document().unwrap(),
            doc! { "mode": "secondary", "tagSets": [{ "dc": "ny" }], "maxStalenessSeconds": 120 }
        );
    }

    #[test]
    fn deserializes_structured_form() {
        let read_pref: ReadPreference = bson::from_bson(Bson::Document(doc! {
            "mode": "nearest",
            "tags": [{ "dc": "sf" }],
            "maxStalenessSeconds": 90,
        }))
        .unwrap();
        assert_eq!(read_pref.mode(), "nearest");
        assert_eq!(read_pref.max_staleness(), Some(Duration::from_secs(90)));
        assert_eq!(read_pref.tag_sets().map(Vec::len), Some(1));
    }

    #[test]
    fn primary_rejects_options() {
        let result: Result<ReadPreference, _> = bson::from_bson(Bson::Document(doc! {
            "mode": "primary",
            "maxStalenessSeconds": 90,
        }));
        assert!(result.is_err());
        assert!(ReadPreference::Primary.with_tags(vec![]).is_err());
    }

    #[test]
    fn modes_are_case_insensitive() {
        assert_eq!(
            ReadPreference::from_mode("SecondaryPreferred"),
            Some(ReadPreference::SecondaryPreferred { options: None })
        );
        assert_eq!(ReadPreference::from_mode("fastest"), None);
    }
}
