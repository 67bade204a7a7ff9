use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    cmap::{Command, StreamDescription},
    cursor::options::AggregateOptions,
    error::{Error, Result},
    operation::{append_if_some, check_collation, cursor_batch, Operation},
    results::{CommandReply, CursorBatch},
    router::{CommandOptions, OperationKind},
    Namespace,
};

/// An aggregation issued in its cursor form.
#[derive(Debug)]
pub(crate) struct Aggregate {
    ns: Namespace,
    pipeline: Vec<Document>,
    options: AggregateOptions,
}

impl Aggregate {
    pub(crate) fn new(ns: Namespace, pipeline: Vec<Document>, options: AggregateOptions) -> Self {
        Self {
            ns,
            pipeline,
            options,
        }
    }

    /// Whether the pipeline ends in a stage that writes its output.
    fn writes(&self) -> bool {
        self.pipeline
            .last()
            .and_then(bson_util::first_key)
            .is_some_and(|stage| stage == "$out" || stage == "$merge")
    }
}

impl Operation for Aggregate {
    type O = CursorBatch;
    const NAME: &'static str = "aggregate";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        check_collation(self.options.collation.as_ref(), description)?;

        let target: Bson = if self.ns.is_command() {
            Bson::Int32(1)
        } else {
            Bson::String(self.ns.coll.clone())
        };

        let mut cursor = Document::new();
        if let Some(batch_size) = self.options.batch_size {
            let batch_size = i32::try_from(batch_size).map_err(|_| {
                Error::invalid_argument("The batch size must fit into a signed 32-bit integer")
            })?;
            cursor.insert("batchSize", batch_size);
        }

        let mut body = doc! {
            Self::NAME: target,
            "pipeline": bson_util::to_bson_array(&self.pipeline),
            "cursor": cursor,
        };
        append_if_some(&mut body, "allowDiskUse", self.options.allow_disk_use);
        append_if_some(
            &mut body,
            "bypassDocumentValidation",
            self.options.bypass_document_validation,
        );
        append_if_some(&mut body, "collation", self.options.collation.clone());
        append_if_some(&mut body, "comment", self.options.comment.clone());
        append_if_some(&mut body, "hint", self.options.hint.as_ref().map(|hint| hint.to_bson()));
        append_if_some(
            &mut body,
            "maxTimeMS",
            self.options.max_time.map(bson_util::duration_to_millis_bson),
        );

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
        if self.writes() {
            OperationKind::Write
        } else {
            OperationKind::Read
        }
    }

    fn namespace(&self) -> &Namespace {
        &self.ns
    }

    fn options(&self) -> Option<CommandOptions> {
        Some(self.options.command_options())
    }
}
