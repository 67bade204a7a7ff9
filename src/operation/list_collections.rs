use crate::{
    bson::{doc, Document},
    cmap::{Command, StreamDescription},
    cursor::options::ListCollectionsOptions,
    error::{Error, Result},
    operation::{append_if_some, cursor_batch, Operation, LIST_COLLECTIONS_WIRE_VERSION},
    results::{CommandReply, CursorBatch},
    router::{CommandOptions, OperationKind},
    Namespace,
};

#[derive(Debug)]
pub(crate) struct ListCollections {
    ns: Namespace,
    filter: Document,
    options: ListCollectionsOptions,
}

impl ListCollections {
    pub(crate) fn new(db: String, filter: Document, options: ListCollectionsOptions) -> Self {
        Self {
            ns: Namespace::command(db),
            filter,
            options,
        }
    }
}

impl Operation for ListCollections {
    type O = CursorBatch;
    const NAME: &'static str = "listCollections";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        if description.max_wire_version.unwrap_or(0) < LIST_COLLECTIONS_WIRE_VERSION {
            return Err(Error::incompatible_server(format!(
                "server at {} does not support the listCollections command",
                description.server_address
            )));
        }

        let mut cursor = Document::new();
        if let Some(batch_size) = self.options.batch_size {
            let batch_size = i32::try_from(batch_size).map_err(|_| {
                Error::invalid_argument("The batch size must fit into a signed 32-bit integer")
            })?;
            cursor.insert("batchSize", batch_size);
        }

        let mut body = doc! {
            Self::NAME: 1,
            "filter": self.filter.clone(),
            "cursor": cursor,
        };
        append_if_some(&mut body, "nameOnly", self.options.name_only);

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        reply: CommandReply,
        description: &StreamDescription,
    ) -> Result<Self::O> {
        cursor_batch(reply, description)
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Read
    }

    fn namespace(&self) -> &Namespace {
        &self.ns
    }

    fn options(&self) -> Option<CommandOptions> {
        Some(self.options.command_options())
    }
}
