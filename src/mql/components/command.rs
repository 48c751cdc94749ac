use super::fields::HasFieldReference;
use super::values::HasValueReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandType {
    Aggregate,
    CountDocuments,
    DeleteMany,
    DeleteOne,
    Distinct,
    EstimatedDocumentCount,
    FindMany,
    FindOne,
    FindOneAndDelete,
    FindOneAndReplace,
    FindOneAndUpdate,
    InsertMany,
    InsertOne,
    ReplaceOne,
    UpdateMany,
    UpdateOne,
    /// An update with `upsert: true`
    Upsert,
    RunCommand,
    Unknown,
}

impl CommandType {
    /// Shell method name of the command.
    pub fn canonical(&self) -> &'static str {
        match self {
            CommandType::Aggregate => "aggregate",
            CommandType::CountDocuments => "countDocuments",
            CommandType::DeleteMany => "deleteMany",
            CommandType::DeleteOne => "deleteOne",
            CommandType::Distinct => "distinct",
            CommandType::EstimatedDocumentCount => "estimatedDocumentCount",
            CommandType::FindMany => "find",
            CommandType::FindOne => "findOne",
            CommandType::FindOneAndDelete => "findOneAndDelete",
            CommandType::FindOneAndReplace => "findOneAndReplace",
            CommandType::FindOneAndUpdate => "findOneAndUpdate",
            CommandType::InsertMany => "insertMany",
            CommandType::InsertOne => "insertOne",
            CommandType::ReplaceOne => "replaceOne",
            CommandType::UpdateMany => "updateMany",
            CommandType::UpdateOne | CommandType::Upsert => "updateOne",
            CommandType::RunCommand => "runCommand",
            CommandType::Unknown => "<unknown>",
        }
    }

    pub fn uses_indexes(&self) -> bool {
        !matches!(
            self,
            CommandType::InsertMany
                | CommandType::InsertOne
                | CommandType::ReplaceOne
                | CommandType::RunCommand
                | CommandType::Unknown
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsCommand {
    pub command_type: CommandType,
}

impl IsCommand {
    pub fn new(command_type: CommandType) -> Self {
        Self { command_type }
    }
}

/// A database command, rendered as `db.runCommand({...})`.
#[derive(Debug, Clone, PartialEq)]
pub struct HasRunCommand<S> {
    pub database: HasValueReference<S>,
    pub command_name: HasValueReference<S>,
    pub additional_arguments: Vec<(HasFieldReference<S>, HasValueReference<S>)>,
}

impl<S> HasRunCommand<S> {
    pub fn new(database: HasValueReference<S>, command_name: HasValueReference<S>) -> Self {
        Self {
            database,
            command_name,
            additional_arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, field: HasFieldReference<S>, value: HasValueReference<S>) -> Self {
        self.additional_arguments.push((field, value));
        self
    }
}
