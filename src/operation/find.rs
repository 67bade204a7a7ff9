use crate::{
    bson::{doc, Document},
    bson_util,
    cmap::{Command, StreamDescription},
    cursor::options::FindOptions,
    error::{Error, Result},
    operation::{append_if_some, check_collation, cursor_batch, Operation},
    results::{CommandReply, CursorBatch},
    router::{CommandOptions, OperationKind},
    Namespace,
};

#[derive(Debug)]
pub(crate) struct Find {
    ns: Namespace,
    filter: Document,
    options: Box<FindOptions>,
}

impl Find {
    pub(crate) fn new(ns: Namespace, filter: Document, options: FindOptions) -> Self {
        Self {
            ns,
            filter,
            options: Box::new(options),
        }
    }

    /// The `find` command body, without routing metadata. Also used as the payload of `explain`.
    pub(crate) fn body(&self) -> Result<Document> {
        let options = &self.options;
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "filter": self.filter.clone(),
        };

        append_if_some(&mut body, "sort", options.sort.clone());
        append_if_some(&mut body, "projection", options.projection.clone());
        append_if_some(&mut body, "hint", options.hint.as_ref().map(|hint| hint.to_bson()));
        if let Some(skip) = options.skip.filter(|skip| *skip > 0) {
            body.insert("skip", i64::try_from(skip).unwrap_or(i64::MAX));
        }

        // Negative limits request a single batch of at most that many documents.
        match options.limit {
            Some(limit) if limit < 0 => {
                body.insert("limit", limit.saturating_neg());
                body.insert("singleBatch", true);
            }
            Some(limit) if limit > 0 => {
                body.insert("limit", limit);
            }
            _ => {}
        }

        if let Some(batch_size) = options.batch_size {
            let batch_size = i32::try_from(batch_size).map_err(|_| {
                Error::invalid_argument("The batch size must fit into a signed 32-bit integer")
            })?;
            let batch_size = match options.limit {
                Some(limit) if limit > 0 && i64::from(batch_size) > limit => limit,
                _ => i64::from(batch_size),
            };
            body.insert("batchSize", batch_size);
        }

        append_if_some(&mut body, "comment", options.comment.clone());
        append_if_some(
            &mut body,
            "maxTimeMS",
            options.max_time.map(bson_util::duration_to_millis_bson),
        );
        append_if_some(&mut body, "max", options.max.clone());
        append_if_some(&mut body, "min", options.min.clone());
        append_if_some(&mut body, "returnKey", options.return_key);
        append_if_some(&mut body, "showRecordId", options.show_record_id);
        append_if_some(&mut body, "snapshot", options.snapshot);
        append_if_some(&mut body, "collation", options.collation.clone());

        append_if_some(&mut body, "tailable", options.tailable);
        if options.is_tailable() {
            append_if_some(&mut body, "awaitData", options.await_data);
        }
        append_if_some(&mut body, "oplogReplay", options.oplog_replay);
        append_if_some(&mut body, "noCursorTimeout", options.no_cursor_timeout);
        append_if_some(&mut body, "allowPartialResults", options.allow_partial_results);

        Ok(body)
    }
}

impl Operation for Find {
    type O = CursorBatch;
    const NAME: &'static str = "find";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        check_collation(self.options.collation.as_ref(), description)?;
        Ok(Command::new(Self::NAME, &self.ns.db, self.body()?))
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
