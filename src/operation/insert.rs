use std::collections::HashMap;

use crate::{
    bson::{doc, oid::ObjectId, Bson, Document},
    cmap::{Command, StreamDescription},
    error::{Error, Result},
    operation::{append_if_some, write_result, BatchedWrite, Batches, Operation},
    results::{CommandReply, WriteResult},
    router::{CommandOptions, OperationKind, WriteOptions},
    Namespace,
};

#[derive(Debug)]
pub(crate) struct Insert {
    ns: Namespace,
    batches: Batches,
    inserted_ids: Vec<Bson>,
    options: WriteOptions,
}

impl Insert {
    /// Prepares `documents` for insertion, generating an `_id` for every document without one.
    pub(crate) fn new(
        ns: Namespace,
        documents: Vec<Document>,
        options: Option<WriteOptions>,
    ) -> Result<Self> {
        if documents.is_empty() {
            return Err(Error::invalid_argument("No documents provided to insert"));
        }

        let mut options = options.unwrap_or_default();
        if options.ordered.is_none() {
            options.ordered = Some(true);
        }

        let mut inserted_ids = Vec::with_capacity(documents.len());
        let documents = documents
            .into_iter()
            .map(|document| {
                let (id, document) = with_id(document);
                inserted_ids.push(id);
                document
            })
            .collect();

        Ok(Self {
            ns,
            batches: Batches::new(documents),
            inserted_ids,
            options,
        })
    }
}

/// Returns the document's `_id`, prepending a new one if it has none.
fn with_id(document: Document) -> (Bson, Document) {
    if let Some(id) = document.get("_id") {
        return (id.clone(), document);
    }

    let id = Bson::ObjectId(ObjectId::new());
    let mut prepended = doc! { "_id": id.clone() };
    prepended.extend(document);
    (id, prepended)
}

impl Operation for Insert {
    type O = WriteResult;
    const NAME: &'static str = "insert";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        let documents = self.batches.next_batch(description, Self::NAME)?;

        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "documents": documents,
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
        let mut result = write_result(reply, self.batches.offset())?;
        let batch = self.batches.current();

        let mut ids = HashMap::new();
        if self.ordered() {
            // Ordered inserts stop at the first error, so only the first n went in.
            let inserted = usize::try_from(result.n).unwrap_or(usize::MAX);
            for index in batch.take(inserted) {
                ids.insert(index, self.inserted_ids[index].clone());
            }
        } else {
            for index in batch {
                ids.insert(index, self.inserted_ids[index].clone());
            }
            for error in &result.write_errors {
                ids.remove(&error.index);
            }
        }
        result.inserted_ids = ids;

        Ok(result)
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

impl BatchedWrite for Insert {
    fn ordered(&self) -> bool {
        self.options.ordered != Some(false)
    }

    fn advance(&mut self) -> bool {
        self.batches.advance()
    }
}
