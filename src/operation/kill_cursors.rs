use crate::{
    bson::doc,
    cmap::{Command, StreamDescription},
    error::Result,
    operation::Operation,
    options::ServerAddress,
    results::CommandReply,
    router::OperationKind,
    selection_criteria::SelectionCriteria,
    Namespace,
};

#[derive(Debug)]
pub(crate) struct KillCursors {
    ns: Namespace,
    cursor_ids: Vec<i64>,
    address: ServerAddress,
}

impl KillCursors {
    pub(crate) fn new(ns: Namespace, cursor_ids: Vec<i64>, address: ServerAddress) -> Self {
        Self {
            ns,
            cursor_ids,
            address,
        }
    }
}

impl Operation for KillCursors {
    type O = ();
    const NAME: &'static str = "killCursors";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "cursors": self.cursor_ids.clone(),
        };

        Ok(Command::new(Self::NAME, &self.ns.db, body))
    }

    fn handle_response(
        &self,
        _reply: CommandReply,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(())
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
