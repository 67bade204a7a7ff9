use typed_builder::TypedBuilder;

use crate::{
    bson::{doc, Document},
    bson_util,
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

/// The first wire version that accepts `arrayFilters`.
const ARRAY_FILTERS_WIRE_VERSION: i32 = 6;

/// One statement of an `update` call.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct UpdateModel {
    /// Selects the documents to update.
    #[builder(!default)]
    pub filter: Document,

    /// An update document of `$` operators, or a replacement document.
    #[builder(!default)]
    pub update: Document,

    /// Insert a document when nothing matches.
    pub upsert: Option<bool>,

    /// Update every matching document rather than the first. Requires an update document of `$`
    /// operators.
    pub multi: Option<bool>,

    /// The collation to match with.
    pub collation: Option<Document>,

    /// Filters selecting the array elements that `$[<identifier>]` updates apply to.
    pub array_filters: Option<Vec<Document>>,

    /// The index to use.
    pub hint: Option<Hint>,
}

impl UpdateModel {
    fn to_statement(&self) -> Result<Document> {
        // Replacements can only target a single document.
        if self.multi == Some(true) {
            bson_util::update_document_check(&self.update)?;
        }

        let mut statement = doc! {
            "q": self.filter.clone(),
            "u": self.update.clone(),
        };
        append_if_some(&mut statement, "upsert", self.upsert);
        append_if_some(&mut statement, "multi", self.multi);
        append_if_some(&mut statement, "collation", self.collation.clone());
        append_if_some(
            &mut statement,
            "arrayFilters",
            self.array_filters.as_deref().map(bson_util::to_bson_array),
        );
        append_if_some(&mut statement, "hint", self.hint.as_ref().map(Hint::to_bson));

        Ok(statement)
    }
}

#[derive(Debug)]
pub(crate) struct Update {
    ns: Namespace,
    batches: Batches,
    collation: Option<Document>,
    uses_array_filters: bool,
    options: WriteOptions,
}

impl Update {
    pub(crate) fn new(
        ns: Namespace,
        models: Vec<UpdateModel>,
        options: Option<WriteOptions>,
    ) -> Result<Self> {
        if models.is_empty() {
            return Err(Error::invalid_argument("No update statements provided"));
        }

        let statements = models
            .iter()
            .map(UpdateModel::to_statement)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            ns,
            batches: Batches::new(statements),
            collation: models.iter().find_map(|model| model.collation.clone()),
            uses_array_filters: models.iter().any(|model| model.array_filters.is_some()),
            options: options.unwrap_or_default(),
        })
    }
}

impl Operation for Update {
    type O = WriteResult;
    const NAME: &'static str = "update";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        check_collation(self.collation.as_ref(), description)?;
        if self.uses_array_filters
            && description.max_wire_version.unwrap_or(0) < ARRAY_FILTERS_WIRE_VERSION
        {
            return Err(Error::incompatible_server(format!(
                "server at {} does not support arrayFilters",
                description.server_address
            )));
        }

        let updates = self.batches.next_batch(description, Self::NAME)?;
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "updates": updates,
            "ordered": self.ordered(),
        };
        append_if_some(
            &mut body,
            "bypassDocumentValidation",
            self.options.bypass_document_validation,
        );

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

impl BatchedWrite for Update {
    fn ordered(&self) -> bool {
        self.options.ordered != Some(false)
    }

    fn advance(&mut self) -> bool {
        self.batches.advance()
    }
}
