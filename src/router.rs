//! Resolution of per-call options against the scopes an operation was issued from, and the
//! decoration of outgoing commands with the resolved read preference and concerns.

#[cfg(test)]
mod test;

use std::sync::Arc;

use typed_builder::TypedBuilder;

use crate::{
    bson::Document,
    cmap::Command,
    concern::{ReadConcern, WriteConcern},
    error::Result,
    sdam::{Capabilities, ServerType, TopologyDescription},
    selection_criteria::{ReadPreference, SelectionCriteria},
};

/// Commands that always carry the resolved write concern.
const WRITE_COMMANDS: &[&str] = &["insert", "update", "delete"];

/// Commands that accept `writeConcern` only from the wire version that added it to them.
const WRITE_CONCERN_COMMANDS: &[&str] = &[
    "findAndModify",
    "findandmodify",
    "create",
    "drop",
    "dropDatabase",
    "createIndexes",
    "dropIndexes",
    "renameCollection",
    "collMod",
    "createUser",
    "updateUser",
    "dropUser",
    "dropAllUsersFromDatabase",
    "createRole",
    "updateRole",
    "dropRole",
    "grantRolesToUser",
    "revokeRolesFromUser",
];

/// Commands that accept `readConcern`.
const READ_CONCERN_COMMANDS: &[&str] = &[
    "find",
    "aggregate",
    "count",
    "distinct",
    "geoNear",
    "geoSearch",
    "parallelCollectionScan",
];

/// A read preference as supplied by a caller.
///
/// Mode strings and `{ mode, tags, maxStalenessSeconds }` documents are resolved to a
/// [`ReadPreference`] when the operation runs. Values that do not describe a known mode are kept
/// as given; such operations are routed like primary reads and the value is never forwarded.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum ReadPreferenceSpec {
    /// A mode name such as `"secondaryPreferred"`. Case-insensitive.
    Mode(String),

    /// A document with a `mode` (or `preference`) key and optional `tags` and
    /// `maxStalenessSeconds`.
    Document(Document),

    /// An already resolved read preference.
    Resolved(ReadPreference),
}

impl From<ReadPreference> for ReadPreferenceSpec {
    fn from(read_pref: ReadPreference) -> Self {
        Self::Resolved(read_pref)
    }
}

impl From<&str> for ReadPreferenceSpec {
    fn from(mode: &str) -> Self {
        Self::Mode(mode.to_string())
    }
}

impl From<String> for ReadPreferenceSpec {
    fn from(mode: String) -> Self {
        Self::Mode(mode)
    }
}

impl From<Document> for ReadPreferenceSpec {
    fn from(document: Document) -> Self {
        Self::Document(document)
    }
}

impl ReadPreferenceSpec {
    /// Returns the resolved form of this value, or the value unchanged if it cannot be resolved.
    pub fn resolve(self) -> Self {
        match self {
            Self::Mode(ref mode) => match ReadPreference::from_mode(mode) {
                Some(read_pref) => Self::Resolved(read_pref),
                None => self,
            },
            Self::Document(ref document) => {
                match crate::bson::from_document::<ReadPreference>(document.clone()) {
                    Ok(read_pref) => Self::Resolved(read_pref),
                    Err(_) => self,
                }
            }
            Self::Resolved(_) => self,
        }
    }

    /// The resolved read preference, if this value has been resolved.
    pub fn as_resolved(&self) -> Option<&ReadPreference> {
        match self {
            Self::Resolved(ref read_pref) => Some(read_pref),
            _ => None,
        }
    }
}

/// Defaults attached to a database or collection handle. Unset fields defer to the next, less
/// specific scope.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option, into)))]
#[non_exhaustive]
pub struct ScopeDefaults {
    /// The read preference for reads issued from this scope.
    pub read_preference: Option<ReadPreferenceSpec>,

    /// The write concern for writes issued from this scope. Merged field by field.
    pub write_concern: Option<WriteConcern>,

    /// The read concern for reads issued from this scope.
    pub read_concern: Option<ReadConcern>,
}

/// The database and collection scopes an operation is issued from.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option, into)))]
#[non_exhaustive]
pub struct OperationScope {
    /// Defaults of the database the operation targets.
    pub database: Option<Arc<ScopeDefaults>>,

    /// Defaults of the collection the operation targets.
    pub collection: Option<Arc<ScopeDefaults>>,
}

/// Options for generic commands and reads.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option, into)))]
#[non_exhaustive]
pub struct CommandOptions {
    /// The read preference for this call. Takes precedence over every scope.
    pub read_preference: Option<ReadPreferenceSpec>,

    /// The write concern for this call, merged over the scopes' field by field.
    pub write_concern: Option<WriteConcern>,

    /// The read concern for this call.
    pub read_concern: Option<ReadConcern>,

    /// The scopes the call was issued from.
    pub scope: Option<OperationScope>,
}

/// Options for `insert`, `update` and `remove`.
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(strip_option, into)))]
#[non_exhaustive]
pub struct WriteOptions {
    /// Whether to stop at the first write error. Defaults to true.
    pub ordered: Option<bool>,

    /// Whether the server should skip document validation.
    pub bypass_document_validation: Option<bool>,

    /// The write concern for this call, merged over the scopes' field by field.
    pub write_concern: Option<WriteConcern>,

    /// The scopes the call was issued from.
    pub scope: Option<OperationScope>,
}

impl From<&WriteOptions> for CommandOptions {
    fn from(options: &WriteOptions) -> Self {
        Self {
            read_preference: None,
            write_concern: options.write_concern.clone(),
            read_concern: None,
            scope: options.scope.clone(),
        }
    }
}

/// The effective options of one operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct ResolvedOptions {
    pub(crate) read_preference: Option<ReadPreferenceSpec>,
    pub(crate) write_concern: WriteConcern,
    pub(crate) read_concern: Option<ReadConcern>,
}

impl ResolvedOptions {
    /// The read preference used to select a server. Unresolved values select like primary.
    pub(crate) fn selection_read_preference(&self) -> ReadPreference {
        self.read_preference
            .as_ref()
            .and_then(ReadPreferenceSpec::as_resolved)
            .cloned()
            .unwrap_or(ReadPreference::Primary)
    }

    pub(crate) fn selection_criteria(&self) -> SelectionCriteria {
        SelectionCriteria::ReadPreference(self.selection_read_preference())
    }
}

/// Resolves `options` against its scopes and then the topology's defaults. The most specific
/// scope that sets a key wins; write concerns are merged field by field.
pub(crate) fn resolve(options: Option<&CommandOptions>, topology: &ScopeDefaults) -> ResolvedOptions {
    let call = options.map(|options| ScopeDefaults {
        read_preference: options.read_preference.clone(),
        write_concern: options.write_concern.clone(),
        read_concern: options.read_concern.clone(),
    });
    let scope = options.and_then(|options| options.scope.as_ref());

    let chain: Vec<&ScopeDefaults> = call
        .as_ref()
        .into_iter()
        .chain(scope.and_then(|s| s.collection.as_deref()))
        .chain(scope.and_then(|s| s.database.as_deref()))
        .chain(std::iter::once(topology))
        .collect();

    let read_preference = chain
        .iter()
        .find_map(|level| level.read_preference.clone())
        .map(ReadPreferenceSpec::resolve);

    let write_concern = chain
        .iter()
        .filter_map(|level| level.write_concern.as_ref())
        .fold(WriteConcern::default(), |merged, level| merged.or(level));

    let read_concern = chain
        .iter()
        .find_map(|level| level.read_concern.clone());

    ResolvedOptions {
        read_preference,
        write_concern,
        read_concern,
    }
}

/// How an operation is routed and which options are embedded in its command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OperationKind {
    /// A query routed by read preference.
    Read,

    /// A write routed to the primary.
    Write,

    /// A caller-supplied command routed by read preference.
    Command,

    /// A getMore or killCursors pinned to the server owning the cursor.
    CursorMaintenance,
}

/// Everything known about the target when a command is decorated.
pub(crate) struct DecorationContext<'a> {
    pub(crate) kind: OperationKind,
    pub(crate) resolved: &'a ResolvedOptions,
    pub(crate) capabilities: &'a Capabilities,
    pub(crate) description: &'a TopologyDescription,
    pub(crate) server_type: ServerType,
}

/// Embeds the resolved read preference, write concern and read concern in `command`. Keys the
/// caller already put in the body are left untouched.
pub(crate) fn decorate_command(command: &mut Command, context: DecorationContext<'_>) -> Result<()> {
    if context.kind == OperationKind::CursorMaintenance {
        return Ok(());
    }

    let name = command.name.as_str();
    let body = &mut command.body;

    if !context.resolved.write_concern.is_empty() && !body.contains_key("writeConcern") {
        let takes_write_concern = WRITE_COMMANDS.contains(&name)
            || (WRITE_CONCERN_COMMANDS.contains(&name)
                && context.capabilities.commands_take_write_concern);
        if takes_write_concern {
            body.insert("writeConcern", context.resolved.write_concern.to_document());
        }
    }

    if let Some(ref read_concern) = context.resolved.read_concern {
        if READ_CONCERN_COMMANDS.contains(&name)
            && context.capabilities.supports_read_concern
            && !body.contains_key("readConcern")
        {
            body.insert("readConcern", read_concern.to_document());
        }
    }

    if context.kind != OperationKind::Write && !body.contains_key("$readPreference") {
        let read_pref = context
            .resolved
            .read_preference
            .as_ref()
            .and_then(ReadPreferenceSpec::as_resolved);
        context
            .description
            .update_command_with_read_pref(context.server_type, body, read_pref)?;
    }

    Ok(())
}
