use crate::{
    bson::Document,
    bson_util,
    cmap::{Command, StreamDescription},
    error::{Error, Result},
    operation::Operation,
    results::CommandReply,
    router::{CommandOptions, OperationKind},
    Namespace,
};

/// A caller-supplied command, sent to `<db>.$cmd` as is apart from routing metadata.
#[derive(Debug)]
pub(crate) struct RunCommand {
    ns: Namespace,
    command: Document,
    command_name: String,
    options: Option<CommandOptions>,
}

impl RunCommand {
    pub(crate) fn new(db: String, command: Document, options: Option<CommandOptions>) -> Result<Self> {
        let command_name = bson_util::first_key(&command)
            .ok_or_else(|| Error::invalid_argument("an empty document cannot be passed to a command"))?
            .to_string();

        Ok(Self {
            ns: Namespace::command(db),
            command,
            command_name,
            options,
        })
    }
}

impl Operation for RunCommand {
    type O = CommandReply;

    // Only used when the command document is empty, which `new` rejects.
    const NAME: &'static str = "$genericRunCommand";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        Ok(Command::new(
            &self.command_name,
            &self.ns.db,
            self.command.clone(),
        ))
    }

    fn handle_response(
        &self,
        reply: CommandReply,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(reply)
    }

    fn kind(&self) -> OperationKind {
        OperationKind::Command
    }

    fn namespace(&self) -> &Namespace {
        &self.ns
    }

    fn options(&self) -> Option<CommandOptions> {
        self.options.clone()
    }

    fn name(&self) -> &str {
        &self.command_name
    }
}
