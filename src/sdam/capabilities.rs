use serde::Serialize;

use super::description::topology::TopologyDescription;

const AGGREGATION_CURSOR_WIRE_VERSION: i32 = 1;
const WRITE_COMMANDS_WIRE_VERSION: i32 = 2;
const LIST_COMMANDS_WIRE_VERSION: i32 = 3;
const READ_CONCERN_WIRE_VERSION: i32 = 4;
const COMMAND_WRITE_CONCERN_WIRE_VERSION: i32 = 5;

/// The feature set the connected deployment supports, derived from the wire versions its
/// data-bearing members report.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Capabilities {
    /// The lowest wire version every member accepts.
    pub min_wire_version: i32,

    /// The highest wire version every member accepts.
    pub max_wire_version: i32,

    /// Whether `aggregate` can return a cursor.
    pub has_aggregation_cursor: bool,

    /// Whether writes can be issued as `insert`, `update` and `delete` commands.
    pub has_write_commands: bool,

    /// Whether the `listCollections` command exists.
    pub has_list_collections_command: bool,

    /// Whether the `listIndexes` command exists.
    pub has_list_indexes_command: bool,

    /// Whether commands other than the write commands accept `writeConcern`.
    pub commands_take_write_concern: bool,

    /// Whether commands accept `collation`.
    pub commands_take_collation: bool,

    /// Whether reads accept `readConcern`.
    pub supports_read_concern: bool,
}

impl Capabilities {
    pub(crate) fn from_wire_versions(min_wire_version: i32, max_wire_version: i32) -> Self {
        Self {
            min_wire_version,
            max_wire_version,
            has_aggregation_cursor: max_wire_version >= AGGREGATION_CURSOR_WIRE_VERSION,
            has_write_commands: max_wire_version >= WRITE_COMMANDS_WIRE_VERSION,
            has_list_collections_command: max_wire_version >= LIST_COMMANDS_WIRE_VERSION,
            has_list_indexes_command: max_wire_version >= LIST_COMMANDS_WIRE_VERSION,
            commands_take_write_concern: max_wire_version >= COMMAND_WRITE_CONCERN_WIRE_VERSION,
            commands_take_collation: max_wire_version >= COMMAND_WRITE_CONCERN_WIRE_VERSION,
            supports_read_concern: max_wire_version >= READ_CONCERN_WIRE_VERSION,
        }
    }

    /// Computes the capabilities of the servers in `description` that can serve operations.
    /// Members disagreeing on their range narrow it to what all of them accept. Returns `None`
    /// when no such server has been checked yet.
    pub(crate) fn from_description(description: &TopologyDescription) -> Option<Self> {
        let (min, max) = description
            .servers()
            .filter(|server| server.server_type.is_data_bearing())
            .map(|server| {
                (
                    server.min_wire_version().unwrap_or(0),
                    server.max_wire_version().unwrap_or(0),
                )
            })
            .fold(None, |acc: Option<(i32, i32)>, (min, max)| match acc {
                Some((acc_min, acc_max)) => Some((acc_min.max(min), acc_max.min(max))),
                None => Some((min, max)),
            })?;

        Some(Self::from_wire_versions(min, max))
    }
}
