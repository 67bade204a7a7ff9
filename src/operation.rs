mod aggregate;
mod count;
mod delete;
mod find;
mod get_more;
mod insert;
mod kill_cursors;
mod list_collections;
mod run_command;
mod update;

#[cfg(test)]
mod test;

use serde::Deserialize;

use crate::{
    bson::{Bson, Document},
    cmap::{Command, StreamDescription},
    error::{Error, IndexedWriteError, Result},
    results::{CommandReply, CursorBatch, CursorInfo, UpsertedId, WriteResult},
    router::{CommandOptions, OperationKind},
    selection_criteria::SelectionCriteria,
    Namespace,
};

pub(crate) use aggregate::Aggregate;
pub(crate) use count::Count;
pub use delete::DeleteModel;
pub(crate) use delete::Delete;
pub(crate) use find::Find;
pub(crate) use get_more::GetMore;
pub(crate) use insert::Insert;
pub(crate) use kill_cursors::KillCursors;
pub(crate) use list_collections::ListCollections;
pub(crate) use run_command::RunCommand;
pub use update::UpdateModel;
pub(crate) use update::Update;

/// The first wire version whose `listCollections` command the topology uses.
pub(crate) const LIST_COLLECTIONS_WIRE_VERSION: i32 = 3;

/// The first wire version that accepts `collation`.
pub(crate) const COLLATION_WIRE_VERSION: i32 = 5;

/// The amount of overhead bytes to account for when sizing a write batch.
const COMMAND_OVERHEAD_SIZE: usize = 16_000;

/// A trait modeling the behavior of a server side operation.
pub(crate) trait Operation: Send + Sync {
    /// The output type of this operation.
    type O: Send;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    /// The operation may store some additional state that is required for handling the response.
    fn build(&mut self, description: &StreamDescription) -> Result<Command>;

    /// Interprets the normalized server reply.
    fn handle_response(
        &self,
        reply: CommandReply,
        description: &StreamDescription,
    ) -> Result<Self::O>;

    /// Interpret an error encountered while sending the built command to the server, potentially
    /// recovering.
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    /// How the operation is routed and decorated.
    fn kind(&self) -> OperationKind;

    /// The namespace the operation targets.
    fn namespace(&self) -> &Namespace;

    /// The per-call options resolved against the operation's scopes.
    fn options(&self) -> Option<CommandOptions> {
        None
    }

    /// Criteria that override the resolved read preference, such as pinning to one server.
    fn selection_criteria(&self) -> Option<SelectionCriteria> {
        None
    }

    /// The command name reported to observers and the pending store.
    fn name(&self) -> &str {
        Self::NAME
    }
}

/// A write operation that is sent in as many batches as the server's limits require.
pub(crate) trait BatchedWrite: Operation<O = WriteResult> {
    /// Whether the call stops at the first write error.
    fn ordered(&self) -> bool;

    /// Moves past the batch last built. Returns whether statements remain.
    fn advance(&mut self) -> bool;
}

/// The statements of a batched write and the window of the batch currently in flight.
#[derive(Debug)]
pub(crate) struct Batches {
    statements: Vec<Document>,
    offset: usize,
    len: usize,
}

impl Batches {
    pub(crate) fn new(statements: Vec<Document>) -> Self {
        Self {
            statements,
            offset: 0,
            len: 0,
        }
    }

    /// Index of the first statement of the current batch within the call.
    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    /// Indexes of the statements of the current batch within the call.
    pub(crate) fn current(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }

    /// Selects the next batch within the server's count and size limits and returns it as a BSON
    /// array. Building twice without advancing yields the same batch.
    pub(crate) fn next_batch(&mut self, description: &StreamDescription, kind: &str) -> Result<Bson> {
        let max_count = usize::try_from(description.max_write_batch_size)
            .ok()
            .filter(|max| *max > 0)
            .unwrap_or(1000);
        let max_doc_size = usize::try_from(description.max_bson_object_size).unwrap_or(usize::MAX);
        let max_batch_size = usize::try_from(description.max_message_size_bytes)
            .unwrap_or(usize::MAX)
            .saturating_sub(COMMAND_OVERHEAD_SIZE);

        let mut batch = Vec::new();
        let mut size = 0;
        for statement in self.statements.iter().skip(self.offset).take(max_count) {
            let doc_size = crate::bson::to_vec(statement)?.len();
            if doc_size > max_doc_size {
                return Err(Error::invalid_argument(format!(
                    "{} statement must be within {} bytes, but the statement provided is {} bytes",
                    kind, max_doc_size, doc_size
                )));
            }
            if !batch.is_empty() && size + doc_size > max_batch_size {
                break;
            }
            size += doc_size;
            batch.push(Bson::Document(statement.clone()));
        }

        self.len = batch.len();
        Ok(Bson::Array(batch))
    }

    pub(crate) fn advance(&mut self) -> bool {
        self.offset += self.len;
        self.len = 0;
        self.offset < self.statements.len()
    }
}

/// The body of an `insert`, `update` or `delete` reply.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResponseBody {
    #[serde(default)]
    n: u64,

    #[serde(default)]
    n_modified: u64,

    #[serde(default)]
    upserted: Vec<UpsertedId>,
}

/// Converts one batch's reply into a [`WriteResult`] whose indexes refer to the whole call.
pub(crate) fn write_result(reply: CommandReply, offset: usize) -> Result<WriteResult> {
    let body: WriteResponseBody = crate::bson::from_document(reply.result)?;

    let write_errors = reply
        .write_errors
        .unwrap_or_default()
        .into_iter()
        .map(|error| IndexedWriteError {
            index: error.index + offset,
            ..error
        })
        .collect();

    let upserted = body
        .upserted
        .into_iter()
        .map(|upserted| UpsertedId {
            index: upserted.index + offset,
            ..upserted
        })
        .collect();

    Ok(WriteResult {
        n: body.n,
        n_modified: body.n_modified,
        upserted,
        write_errors,
        write_concern_errors: reply.write_concern_error.into_iter().collect(),
        inserted_ids: Default::default(),
    })
}

/// Reads the cursor of a find, aggregate or listCollections reply.
pub(crate) fn cursor_batch(
    reply: CommandReply,
    description: &StreamDescription,
) -> Result<CursorBatch> {
    let info = CursorInfo::from_reply(&reply)?;
    Ok(CursorBatch {
        id: info.id,
        ns: info.ns,
        documents: info.first_batch,
        address: description.server_address.clone(),
    })
}

/// Rejects `collation` on servers that predate it.
pub(crate) fn check_collation(
    collation: Option<&Document>,
    description: &StreamDescription,
) -> Result<()> {
    if collation.is_some() && description.max_wire_version.unwrap_or(0) < COLLATION_WIRE_VERSION {
        return Err(Error::incompatible_server(format!(
            "server at {} does not support collation",
            description.server_address
        )));
    }
    Ok(())
}

fn append_if_some(body: &mut Document, key: &str, value: Option<impl Into<Bson>>) {
    if let Some(value) = value {
        body.insert(key, value);
    }
}
