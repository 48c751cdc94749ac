//! Java driver dialect: `MongoCollection` calls with `Filters`, `Updates` and `Aggregates`
//!
//! This module is organized into focused sub-modules:
//! - namespace: resolution of the collection a command runs on
//! - filters: `Filters.*` predicates
//! - updates: `Updates.*` operations
//! - aggregation: `Aggregates.*` stages and their builders
//!
//! A query starts at a command call on a collection (`find`, `updateOne`, `aggregate`...) and
//! spans the cursor calls chained on it. Calls are recognized by name and receiver text,
//! both qualified (`Filters.eq`) and statically imported (`eq`).
mod aggregation;
mod filters;
mod namespace;
mod updates;

use tracing::debug;

use self::aggregation::{parse_pipeline, parse_projection_like, SORTS};
use self::filters::parse_filter_argument;
use self::namespace::{collection_reference, is_collection_expression};
use self::updates::parse_update_argument;
use super::java::constants::{resolve_to_call, resolve_u32};
use super::java::tree::{find_declaration, meaningful_expression, MethodCall};
use super::java::{JavaSource, JavaSourceFile};
use super::DialectParser;
use crate::mql::components::{
    CommandType, Component, DialectName, HasAggregation, HasCollectionReference, HasFilter,
    HasLimit, HasSorts, HasSourceDialect, HasUpdates, IsCommand,
};
use crate::mql::Node;

const COMMANDS: &[(&str, CommandType)] = &[
    ("countDocuments", CommandType::CountDocuments),
    ("estimatedDocumentCount", CommandType::EstimatedDocumentCount),
    ("distinct", CommandType::Distinct),
    ("find", CommandType::FindMany),
    ("aggregate", CommandType::Aggregate),
    ("insertOne", CommandType::InsertOne),
    ("insertMany", CommandType::InsertMany),
    ("deleteOne", CommandType::DeleteOne),
    ("deleteMany", CommandType::DeleteMany),
    ("replaceOne", CommandType::ReplaceOne),
    ("updateOne", CommandType::UpdateOne),
    ("updateMany", CommandType::UpdateMany),
    ("findOneAndDelete", CommandType::FindOneAndDelete),
    ("findOneAndReplace", CommandType::FindOneAndReplace),
    ("findOneAndUpdate", CommandType::FindOneAndUpdate),
];

/// Parses driver queries of one file.
#[derive(Debug, Clone, Copy)]
pub struct JavaDriverDialect<'f> {
    file: &'f JavaSourceFile,
}

impl<'f> JavaDriverDialect<'f> {
    pub fn new(file: &'f JavaSourceFile) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &'f JavaSourceFile {
        self.file
    }

    /// Attachments of every query in the file, in source order.
    pub fn queries(&self) -> Vec<JavaSource> {
        let mut found: Vec<JavaSource> = self
            .file
            .find_all("method_invocation")
            .into_iter()
            .filter_map(MethodCall::of)
            .filter(|call| self.command_of(call).is_some())
            .map(|call| JavaSource::of(&call.outermost().node))
            .collect();
        found.dedup();

        debug!(
            "Found {} Java driver queries in {}",
            found.len(),
            self.file.path().display()
        );
        found
    }

    fn command_of(&self, call: &MethodCall) -> Option<CommandType> {
        let command = COMMANDS
            .iter()
            .find(|(method, _)| *method == call.name(self.file))
            .map(|(_, command)| *command)?;
        let receiver = call.object?;
        is_collection_expression(self.file, receiver).then_some(command)
    }

    /// The first command call of the chain `call` belongs to.
    fn command_call<'t>(&self, call: &MethodCall<'t>) -> Option<MethodCall<'t>> {
        call.outermost()
            .chain()
            .into_iter()
            .find(|candidate| self.command_of(candidate).is_some())
    }

    /// A `ClientSession` passed first shifts every other argument.
    fn is_session(&self, argument: tree_sitter::Node<'_>) -> bool {
        let argument = meaningful_expression(argument);
        argument.kind() == "identifier"
            && find_declaration(self.file, argument)
                .and_then(|declaration| declaration.declared_type)
                .is_some_and(|declared| self.file.text(&declared).ends_with("ClientSession"))
    }

    fn cursor_metadata(&self, command_call: &MethodCall) -> Vec<Component<JavaSource>> {
        let chain = command_call.outermost().chain();
        let modifiers = chain
            .iter()
            .skip_while(|call| call.node != command_call.node)
            .skip(1);

        let mut metadata = Vec::new();
        for modifier in modifiers {
            match modifier.name(self.file) {
                "sort" => {
                    let sorts = modifier.argument(0).and_then(|sort| {
                        resolve_to_call(self.file, sort, &|call| call.is_static_call_on(self.file, SORTS))
                    });
                    if let Some(sorts) = sorts {
                        metadata.push(HasSorts::new(parse_projection_like(self.file, &sorts, SORTS)).into());
                    }
                }
                "limit" => {
                    if let Some(limit) = modifier.argument(0).and_then(|limit| resolve_u32(self.file, limit)) {
                        metadata.push(HasLimit::new(limit).into());
                    }
                }
                _ => {}
            }
        }
        metadata
    }

    fn parse_command(&self, source: &JavaSource, command_call: &MethodCall) -> Node<JavaSource> {
        let mut command = self.command_of(command_call).unwrap_or(CommandType::Unknown);
        let is_first = command_call
            .outermost()
            .chain()
            .iter()
            .skip_while(|call| call.node != command_call.node)
            .any(|call| call.name(self.file) == "first");
        if command == CommandType::FindMany && is_first {
            command = CommandType::FindOne;
        }

        let collection = command_call
            .object
            .map(|receiver| collection_reference(self.file, receiver))
            .unwrap_or_else(HasCollectionReference::unknown);

        let arguments = command_call.arguments();
        let start = match arguments.first() {
            Some(first) if self.is_session(*first) => 1,
            _ => 0,
        };
        let filter_index = match command {
            CommandType::Distinct => Some(start + 1),
            CommandType::InsertOne
            | CommandType::InsertMany
            | CommandType::EstimatedDocumentCount
            | CommandType::Aggregate => None,
            _ => Some(start),
        };
        let filters: Vec<Node<JavaSource>> = filter_index
            .and_then(|index| arguments.get(index))
            .and_then(|filter| parse_filter_argument(self.file, *filter))
            .into_iter()
            .collect();

        let updates: Vec<Node<JavaSource>> = match command {
            CommandType::UpdateOne | CommandType::UpdateMany | CommandType::FindOneAndUpdate => arguments
                .get(start + 1)
                .and_then(|update| parse_update_argument(self.file, *update))
                .into_iter()
                .collect(),
            _ => Vec::new(),
        };

        let stages = match command {
            CommandType::Aggregate => arguments
                .get(start)
                .map(|pipeline| parse_pipeline(self.file, *pipeline))
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        let mut components: Vec<Component<JavaSource>> = vec![
            HasSourceDialect::new(DialectName::JavaDriver).into(),
            IsCommand::new(command).into(),
            collection.into(),
            HasFilter::new(filters).into(),
            HasUpdates::new(updates).into(),
            HasAggregation::new(stages).into(),
        ];
        components.extend(self.cursor_metadata(command_call));
        Node::new(*source, components)
    }
}

impl DialectParser<JavaSource> for JavaDriverDialect<'_> {
    fn is_candidate_for_query(&self, source: &JavaSource) -> bool {
        self.file
            .resolve(source)
            .and_then(MethodCall::of)
            .is_some_and(|call| self.command_call(&call).is_some())
    }

    fn attachment(&self, source: &JavaSource) -> Option<JavaSource> {
        let mut current = self.file.resolve(source);
        while let Some(node) = current {
            if let Some(command_call) = MethodCall::of(node).and_then(|call| self.command_call(&call)) {
                return Some(JavaSource::of(&command_call.outermost().node));
            }
            current = node.parent();
        }
        None
    }

    fn parse(&self, source: &JavaSource) -> Node<JavaSource> {
        let dialect = HasSourceDialect::new(DialectName::JavaDriver);
        let Some(call) = self.file.resolve(source).and_then(MethodCall::of) else {
            return Node::new(*source, vec![dialect.into(), HasCollectionReference::unknown().into()]);
        };

        match self.command_call(&call) {
            Some(command_call) => self.parse_command(source, &command_call),
            None => Node::new(
                *source,
                vec![
                    dialect.into(),
                    IsCommand::new(CommandType::Unknown).into(),
                    HasCollectionReference::unknown().into(),
                ],
            ),
        }
    }
}
