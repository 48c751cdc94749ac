//! Spring Data MongoDB dialect: `MongoTemplate` calls with `Query`, `Criteria` and `Update`
//!
//! This module is organized into focused sub-modules:
//! - criteria: `Criteria` chains, `Query` wrappers and `Sort`
//! - updates: `Update` builders
//! - aggregation: `Aggregation.newAggregation` stages
//! - collection: collection names from arguments and `@Document` entities
//!
//! Both template styles are understood: the classic `template.find(query, Book.class)` and
//! the fluent `template.query(Book.class).matching(query).all()`.
mod aggregation;
mod collection;
mod criteria;
mod updates;

pub(crate) use self::collection::entity_collection;

use tracing::debug;

use self::aggregation::parse_aggregation;
use self::collection::{class_literal_name, collection_from_arguments, explicit_collection};
use self::criteria::{parse_query, QueryParts};
use self::updates::parse_update;
use super::java::constants::resolve_value;
use super::java::tree::{find_declaration, find_method_declarations, meaningful_expression, MethodCall};
use super::java::{JavaSource, JavaSourceFile};
use super::DialectParser;
use crate::mql::components::{
    CommandType, Component, DialectName, HasAggregation, HasCollectionReference, HasFieldReference,
    HasFilter, HasLimit, HasSorts, HasSourceDialect, HasUpdates, IsCommand, Name, Named,
};
use crate::mql::Node;

const TEMPLATE_TYPES: &[&str] = &[
    "MongoTemplate",
    "MongoOperations",
    "ReactiveMongoTemplate",
    "ReactiveMongoOperations",
];

const COMMANDS: &[(&str, CommandType)] = &[
    ("aggregate", CommandType::Aggregate),
    ("aggregateStream", CommandType::Aggregate),
    ("count", CommandType::CountDocuments),
    ("exactCount", CommandType::CountDocuments),
    ("estimatedCount", CommandType::EstimatedDocumentCount),
    ("exists", CommandType::FindOne),
    ("findById", CommandType::FindOne),
    ("findOne", CommandType::FindOne),
    ("find", CommandType::FindMany),
    ("findAll", CommandType::FindMany),
    ("stream", CommandType::FindMany),
    ("scroll", CommandType::FindMany),
    ("findDistinct", CommandType::Distinct),
    ("remove", CommandType::DeleteMany),
    ("findAllAndRemove", CommandType::DeleteMany),
    ("findAndModify", CommandType::FindOneAndUpdate),
    ("findAndRemove", CommandType::FindOneAndDelete),
    ("findAndReplace", CommandType::FindOneAndReplace),
    ("insert", CommandType::InsertOne),
    ("insertAll", CommandType::InsertMany),
    ("replace", CommandType::ReplaceOne),
    ("save", CommandType::Upsert),
    ("upsert", CommandType::Upsert),
    ("updateFirst", CommandType::UpdateOne),
    ("updateMulti", CommandType::UpdateMany),
];

/// Terminal calls of `template.query(Entity.class)...`.
const FLUENT_TERMINALS: &[(&str, CommandType)] = &[
    ("one", CommandType::FindOne),
    ("oneValue", CommandType::FindOne),
    ("first", CommandType::FindOne),
    ("firstValue", CommandType::FindOne),
    ("exists", CommandType::FindOne),
    ("all", CommandType::FindMany),
    ("stream", CommandType::FindMany),
    ("scroll", CommandType::FindMany),
    ("count", CommandType::CountDocuments),
];

/// Commands whose arguments never hold a `Query`.
const WITHOUT_QUERY: &[&str] = &[
    "aggregate",
    "aggregateStream",
    "estimatedCount",
    "findById",
    "insert",
    "insertAll",
    "save",
];

const WITH_UPDATE: &[&str] = &["updateFirst", "updateMulti", "upsert", "findAndModify"];

/// Parses Spring Data MongoDB queries of one file.
#[derive(Debug, Clone, Copy)]
pub struct SpringCriteriaDialect<'f> {
    file: &'f JavaSourceFile,
}

impl<'f> SpringCriteriaDialect<'f> {
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
            "Found {} Spring Criteria queries in {}",
            found.len(),
            self.file.path().display()
        );
        found
    }

    fn is_template_expression(&self, expression: tree_sitter::Node<'_>) -> bool {
        let expression = meaningful_expression(expression);
        let declared_type = match expression.kind() {
            "identifier" => find_declaration(self.file, expression).and_then(|declaration| declaration.declared_type),
            "field_access" => expression
                .child_by_field_name("object")
                .filter(|object| self.file.text(object) == "this")
                .and_then(|_| expression.child_by_field_name("field"))
                .and_then(|field| find_declaration(self.file, field))
                .and_then(|declaration| declaration.declared_type),
            "method_invocation" => MethodCall::of(expression)
                .filter(|call| call.object.map_or(true, |object| self.file.text(&object) == "this"))
                .and_then(|call| find_method_declarations(self.file, call.name(self.file)).into_iter().next())
                .and_then(|method| method.child_by_field_name("type")),
            _ => None,
        };

        declared_type.is_some_and(|declared| {
            let text = self.file.text(&declared);
            let simple = text.rsplit('.').next().unwrap_or(text);
            TEMPLATE_TYPES.contains(&simple)
        })
    }

    /// `template.query(Entity.class)` at the start of a fluent chain.
    fn fluent_entry<'t>(&self, call: &MethodCall<'t>) -> Option<MethodCall<'t>> {
        call.chain().into_iter().find(|candidate| {
            candidate.name(self.file) == "query"
                && candidate
                    .object
                    .is_some_and(|object| self.is_template_expression(object))
        })
    }

    fn command_of(&self, call: &MethodCall) -> Option<CommandType> {
        let method = call.name(self.file);
        let receiver = call.object?;
        if self.is_template_expression(receiver) {
            return COMMANDS
                .iter()
                .find(|(name, _)| *name == method)
                .map(|(_, command)| *command);
        }
        let command = FLUENT_TERMINALS
            .iter()
            .find(|(name, _)| *name == method)
            .map(|(_, command)| *command)?;
        self.fluent_entry(call).map(|_| command)
    }

    fn command_call<'t>(&self, call: &MethodCall<'t>) -> Option<MethodCall<'t>> {
        call.outermost()
            .chain()
            .into_iter()
            .find(|candidate| self.command_of(candidate).is_some())
    }

    fn parse_command(&self, source: &JavaSource, command_call: &MethodCall) -> Node<JavaSource> {
        let command = self.command_of(command_call).unwrap_or(CommandType::Unknown);
        let parsed = match self.fluent_entry(command_call) {
            Some(entry) => self.parse_fluent(&entry, command_call),
            None => self.parse_classic(command_call),
        };

        let mut components: Vec<Component<JavaSource>> = vec![
            HasSourceDialect::new(DialectName::SpringCriteria).into(),
            IsCommand::new(command).into(),
            parsed.collection.unwrap_or_else(HasCollectionReference::unknown).into(),
            HasFilter::new(parsed.query.filters).into(),
            HasUpdates::new(parsed.updates).into(),
            HasAggregation::new(parsed.stages).into(),
        ];
        if !parsed.query.sorts.is_empty() {
            components.push(HasSorts::new(parsed.query.sorts).into());
        }
        if let Some(limit) = parsed.query.limit {
            components.push(HasLimit::new(limit).into());
        }
        Node::new(*source, components)
    }

    /// `template.find(query, Book.class, "books")` and friends.
    fn parse_classic(&self, call: &MethodCall) -> ParsedCommand {
        let file = self.file;
        let method = call.name(file);
        let arguments = call.arguments();

        let mut query = if WITHOUT_QUERY.contains(&method) {
            QueryParts::default()
        } else {
            arguments
                .iter()
                .find_map(|argument| parse_query(file, *argument))
                .unwrap_or_default()
        };
        if method == "findById" {
            if let Some(id) = arguments.first() {
                let id_source = JavaSource::of(id);
                query.filters.push(Node::new(
                    id_source,
                    vec![
                        Named::new(Name::Eq).into(),
                        HasFieldReference::from_schema(id_source, "_id").into(),
                        resolve_value(file, *id).into(),
                    ],
                ));
            }
        }

        let updates = if WITH_UPDATE.contains(&method) {
            arguments
                .iter()
                .find_map(|argument| parse_update(file, *argument))
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let aggregation = if matches!(method, "aggregate" | "aggregateStream") {
            arguments.first().and_then(|pipeline| parse_aggregation(file, *pipeline))
        } else {
            None
        };

        // findById(id, ..) and findDistinct(query, field, ..) take values before the collection
        let skip = match method {
            "findById" => 1,
            "findDistinct" => 2,
            _ => 0,
        };
        let collection_arguments = arguments.get(skip..).unwrap_or_default();
        let typed_entity = aggregation
            .as_ref()
            .and_then(|aggregation| aggregation.entity.as_ref())
            .map(|(entity, entity_source)| entity_collection(file, entity, *entity_source));
        let collection = match typed_entity {
            Some(typed) => explicit_collection(file, collection_arguments).or(Some(typed)),
            None => collection_from_arguments(file, collection_arguments),
        };

        ParsedCommand {
            collection,
            query,
            updates,
            stages: aggregation.map(|aggregation| aggregation.stages).unwrap_or_default(),
        }
    }

    /// `template.query(Book.class).inCollection("books").matching(query).all()`
    fn parse_fluent(&self, entry: &MethodCall, terminal: &MethodCall) -> ParsedCommand {
        let file = self.file;
        let mut query = QueryParts::default();
        let mut collection = entry.argument(0).and_then(|entity| {
            class_literal_name(file, entity).map(|name| entity_collection(file, name, JavaSource::of(&entity)))
        });

        let chain = terminal.chain();
        let steps = chain
            .iter()
            .skip_while(|call| call.node != entry.node)
            .take_while(|call| call.node != terminal.node);
        for step in steps {
            match step.name(file) {
                "matching" => {
                    if let Some(parts) = step.argument(0).and_then(|argument| parse_query(file, argument)) {
                        query = parts;
                    }
                }
                "inCollection" => {
                    if let Some(explicit) = step
                        .argument(0)
                        .and_then(|name| explicit_collection(file, std::slice::from_ref(&name)))
                    {
                        collection = Some(explicit);
                    }
                }
                _ => {}
            }
        }

        ParsedCommand {
            collection,
            query,
            updates: Vec::new(),
            stages: Vec::new(),
        }
    }
}

/// The parts of a command before they become components.
struct ParsedCommand {
    collection: Option<HasCollectionReference<JavaSource>>,
    query: QueryParts,
    updates: Vec<Node<JavaSource>>,
    stages: Vec<Node<JavaSource>>,
}

impl DialectParser<JavaSource> for SpringCriteriaDialect<'_> {
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
        let dialect = HasSourceDialect::new(DialectName::SpringCriteria);
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
