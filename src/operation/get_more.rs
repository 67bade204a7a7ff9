use std::time::Duration;

use crate::{
    bson::doc,
    bson_util,
    cmap::{Command, StreamDescription},
    error::{Error, Result},
    operation::{append_if_some, cursor_batch, Operation},
    options::ServerAddress,
    results::{CommandReply, CursorBatch},
    router::OperationKind,
    selection_criteria::SelectionCriteria,
    Namespace,
};

/// Fetches the next batch of a cursor from the server that owns it.
#[derive(Debug)]
pub(crate) struct GetMore {
    ns: Namespace,
    cursor_id: i64,
    address: ServerAddress,
    batch_size: Option<u32>,
    max_time: Option<Duration>,
}

impl GetMore {
    pub(crate) fn new(
        ns: Namespace,
        cursor_id: i64,
        address: ServerAddress,
        batch_size: Option<u32>,
        max_time: Option<Duration>,
    ) -> Self {
        Self {
            ns,
            cursor_id,
            address,
            batch_size,
            max_time,
        }
    }
}

impl Operation for GetMore {
    type O = CursorBatch;
    const NAME: &'static str = "getMore";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.cursor_id,
            "collection": self.ns.coll.clone(),
        };

        if let Some(batch_size) = self.batch_size.filter(|size| *size > 0) {
            let batch_size = i32::try_from(batch_size).map_err(|_| {
                Error::invalid_argument("The batch size must fit into a signed 32-bit integer")
            })?;
            body.insert("batchSize", batch_size);
        }
        append_if_some(
            &mut body,
            "maxTimeMS",
            self.max_time.map(bson_util::duration_to_millis_bson),
        );

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        reply: CommandReply,
        description: &StreamDescription,
    ) -> Result<Self::O> {
        let mut batch = cursor_batch(reply, description)?;
        if batch.ns.is_none() {
            batch.ns = Some(self.ns.clone());
        }
        Ok(batch)
    }

    fn kind(&self) -> OperationKind {
        OperationKind::CursorMaintenance
    }

    fn namespace(&self) -> &Namespace {
        &self.ns
    }

    fn selection_criteria(&self) -> Option<SelectionCriteria> {
        Some(SelectionCriteria::from_address(self.address.clone()))
    }
}
