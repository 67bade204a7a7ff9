use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Document},
    cmap::{Command, StreamDescription},
    cursor::options::Hint,
    error::{Error, Result},
    operation::{
        append_if_some,
        check_collation,
        write_result,
        BatchedWrite,
        Batches,
        Operation,
    },
    results::{CommandReply, WriteResult},
    router::{CommandOptions, OperationKind, WriteOptions},
    Namespace,
};

/// One statement of a `remove` call.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DeleteModel {
    /// Selects the documents to remove.
    #[builder(!default)]
    pub filter: Document,

    /// Remove at most one matching document. Every match is removed by default.
    pub single: Option<bool>,

    /// The collation to match with.
    pub collation: Option<Document>,

    /// The index to use.
    pub hint: Option<Hint>,
}

impl DeleteModel {
    fn to_statement(&self) -> Document {
        let limit = if self.single == Some(true) { 1 } else { 0 };
        let mut statement = doc! {
            "q": self.filter.clone(),
            "limit": limit,
        };
        append_if_some(&mut statement, "collation", self.collation.clone());
        append_if_some(&mut statement, "hint", self.hint.as_ref().map(Hint::to_bson));
        statement
    }
}

#[derive(Debug)]
pub(crate) struct Delete {
    ns: Namespace,
    batches: Batches,
    collation: Option<Document>,
    options: WriteOptions,
}

impl Delete {
    pub(crate) fn new(
        ns: Namespace,
        models: Vec<DeleteModel>,
        options: Option<WriteOptions>,
    ) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::invalid_argument("No delete statements provided"));
        }

        Ok(Self {
            ns,
            batches: Batches::new(models.iter().map(DeleteModel::to_statement).collect()),
            collation: models.iter().find_map(|model| model.collation.clone()),
            options: options.unwrap_or_default(),
        })
    }
}

impl Operation for Delete {
    type O = WriteResult;
    const NAME: &'static str = "delete";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        check_collation(self.collation.as_ref(), description)?;

        let deletes = self.batches.next_batch(description, Self::NAME)?;
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "deletes": deletes,
            "ordered": self.ordered(),
        };

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        reply: CommandReply,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        write_result(reply, self.batches.offset())
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Write
    }

    fn namespace(&self) -> &Namespace {
        &self.ns
    }

    fn options(&self) -> Option<CommandOptions> {
        Some((&self.options).into())
    }
}

impl BatchedWrite for Delete {
    fn ordered(&self) -> bool {
        self.options.ordered != Some(false)
    }

    fn advance(&mut self) -> bool {
        self.batches.advance()
    }
}
