use std::time::Duration;

use crate::{
    bson::{doc, Document},
    bson_util,
    cmap::{Command, StreamDescription},
    cursor::options::Hint,
    error::{Error, Result},
    operation::{append_if_some, Operation},
    results::CommandReply,
    router::{CommandOptions, OperationKind},
    Namespace,
};

/// The `count` command as issued by [`Cursor::count`](crate::Cursor::count).
#[derive(Debug)]
pub(crate) struct Count {
    ns: Namespace,
    query: Document,
    skip: Option<u64>,
    limit: Option<i64>,
    hint: Option<Hint>,
    max_time: Option<Duration>,
    options: CommandOptions,
}

impl Count {
    pub(crate) fn new(
        ns: Namespace,
        query: Document,
        skip: Option<u64>,
        limit: Option<i64>,
        hint: Option<Hint>,
        max_time: Option<Duration>,
        options: CommandOptions,
    ) -> Self {
        Self {
            ns,
            query,
            skip,
            limit,
            hint,
            max_time,
            options,
        }
    }
}

impl Operation for Count {
    type O = u64;
    const NAME: &'static str = "count";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "query": self.query.clone(),
        };

        if let Some(skip) = self.skip.filter(|skip| *skip > 0) {
            body.insert("skip", i64::try_from(skip).unwrap_or(i64::MAX));
        }
        if let Some(limit) = self.limit.filter(|limit| *limit != 0) {
            body.insert("limit", limit.saturating_abs());
        }
        append_if_some(&mut body, "hint", self.hint.as_ref().map(Hint::to_bson));
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
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let n = reply
            .result
            .get("n")
            .and_then(bson_util::get_int)
            .ok_or_else(|| Error::invalid_response("count reply is missing \"n\""))?;
        Ok(u64::try_from(n).unwrap_or(0))
    }

    fn handle_error(&self, error: Error) -> Result<Self::O> {
        if error.is_ns_not_found() {
            Ok(0)
        } else {
            Err(error)
        }
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Read
    }

    fn namespace(&self) -> &Namespace {
        &self.ns
    }

    fn options(&self) -> Option<CommandOptions> {
        Some(self.options.clone())
    }
}

