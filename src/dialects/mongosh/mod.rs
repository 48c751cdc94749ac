//! mongosh dialect
//!
//! Renders the query model as shell scripts. Find-shaped commands become
//! `db.getSiblingDB(..).getCollection(..).<command>(filter[, update])` with cursor
//! modifiers, aggregates become `.aggregate([stages])`, database commands become a
//! self-invoking `runCommand`.
mod aggr;
mod backend;
mod index;
mod query;

pub use backend::{
    default_value_of_bson_type, quote_for_javascript, serialize_primitive, ContextValue,
    MongoshBackend,
};
pub use query::emit_query_filter;

use self::query::{
    can_update_documents, emit_collection_reference, emit_limit, emit_query_update, emit_sort,
    has_filter_content, resolve_field_reference, resolve_value_reference, returns_a_cursor,
};
use super::{DialectFormatter, OutputQuery};
use crate::indexing::SuggestedIndex;
use crate::mql::components::{
    CollectionReference, CommandType, ExplainPlanType, HasExplain, HasFilter, HasRunCommand,
    IsCommand, ValueReference,
};
use crate::mql::{BsonType, Node, QueryContext, Source, Value};

/// Documents returned by default when a cursor has no limit of its own.
const DEFAULT_RESULT_LIMIT: u32 = 50;

#[derive(Debug, Clone, Copy, Default)]
pub struct MongoshDialect;

/// Server name of an explain verbosity.
///
/// # Panics
///
/// When `explain_type` is `None`: callers must check for an explain request first.
pub fn explain_server_name(explain_type: ExplainPlanType) -> &'static str {
    match explain_type {
        ExplainPlanType::None => panic!("must not generate an explain plan when the type is None"),
        ExplainPlanType::Safe => "queryPlanner",
        ExplainPlanType::Full => "executionStats",
    }
}

/// `.explain("<verbosity>")`
pub fn emit_explain_plan(backend: &mut MongoshBackend, explain_type: ExplainPlanType) {
    let verbosity = backend.register_constant(explain_server_name(explain_type));
    backend.emit_property_access();
    backend.emit_function_name("explain");
    backend.emit_function_call(
        false,
        vec![Box::new(move |backend: &mut MongoshBackend| {
            backend.emit_context_value(&verbosity);
        })],
    );
}

impl<S: Source> DialectFormatter<S> for MongoshDialect {
    fn format_query(&self, query: &Node<S>, context: &QueryContext) -> OutputQuery {
        let command = query.component::<IsCommand>().map(|command| command.command_type);
        if command.is_none() && !has_filter_content(query) {
            return OutputQuery::None;
        }

        let mut backend = MongoshBackend::new(context.pretty_print);
        backend.apply_query_expansions(context);

        if command == Some(CommandType::RunCommand) {
            return format_run_command(&mut backend, query);
        }

        let explain = query
            .component::<HasExplain>()
            .map(|explain| explain.explain_type)
            .unwrap_or(ExplainPlanType::None);

        backend.emit_db_access();
        emit_collection_reference(&mut backend, query.collection_reference());
        match command {
            None => emit_plain_filter(&mut backend, query),
            Some(CommandType::Aggregate) => emit_aggregate(&mut backend, query, explain),
            Some(command) => emit_find_shaped(&mut backend, query, command, explain),
        }

        let output = if context.automatically_run {
            backend.compute_self_invoking_output()
        } else {
            backend.compute_output()
        };

        match query.collection_reference().map(|collection| &collection.reference) {
            Some(CollectionReference::Known(known)) if known.namespace.is_valid() => {
                OutputQuery::CanBeRun(output)
            }
            _ => OutputQuery::Incomplete(output),
        }
    }

    fn index_command(
        &self,
        query: &Node<S>,
        index: &SuggestedIndex<S>,
        to_query_reference: &dyn Fn(&Node<S>) -> Option<String>,
    ) -> String {
        index::index_command(query, index, to_query_reference)
    }

    fn format_type(&self, bson_type: &BsonType) -> String {
        match bson_type {
            BsonType::Double => "double".to_string(),
            BsonType::String | BsonType::Enum { .. } => "string".to_string(),
            BsonType::Object(_) => "object".to_string(),
            BsonType::Array(_) => "array".to_string(),
            BsonType::Boolean => "bool".to_string(),
            BsonType::Date => "date".to_string(),
            BsonType::ObjectId => "objectId".to_string(),
            BsonType::Int32 => "int".to_string(),
            BsonType::Int64 => "long".to_string(),
            BsonType::Decimal128 => "decimal".to_string(),
            BsonType::Null => "null".to_string(),
            BsonType::Any => "any".to_string(),
            BsonType::Uuid => "binData".to_string(),
            BsonType::AnyOf(members) => members
                .iter()
                .map(|member| <Self as DialectFormatter<S>>::format_type(self, member))
                .collect::<Vec<String>>()
                .join(" | "),
        }
    }
}

fn emit_plain_filter<S: Source>(backend: &mut MongoshBackend, query: &Node<S>) {
    backend.emit_function_name(CommandType::FindMany.canonical());
    backend.emit_function_call(
        false,
        vec![Box::new(|backend: &mut MongoshBackend| {
            emit_query_filter(backend, query, true);
        })],
    );
}

fn emit_find_shaped<S: Source>(
    backend: &mut MongoshBackend,
    query: &Node<S>,
    command: CommandType,
    explain: ExplainPlanType,
) {
    let explaining = explain != ExplainPlanType::None;
    // explain only works on cursors, and must never write
    let command = if explaining { CommandType::FindMany } else { command };
    let updates = !explaining && can_update_documents(query);

    let mut bodies: Vec<backend::CallBody<'_>> = Vec::new();
    if updates || query.has_component::<HasFilter<S>>() {
        bodies.push(Box::new(|backend: &mut MongoshBackend| {
            emit_query_filter(backend, query, true);
        }));
    }
    if updates {
        bodies.push(Box::new(|backend: &mut MongoshBackend| {
            emit_query_update(backend, query);
        }));
    }

    backend.emit_function_name(command.canonical());
    backend.emit_function_call(false, bodies);

    if explaining || returns_a_cursor(query) {
        emit_sort(backend, query);
        let default_limit = explaining.then_some(DEFAULT_RESULT_LIMIT);
        emit_limit(backend, query, default_limit);
    }

    if explaining {
        emit_explain_plan(backend, explain);
    }
}

fn emit_aggregate<S: Source>(
    backend: &mut MongoshBackend,
    query: &Node<S>,
    explain: ExplainPlanType,
) {
    let explaining = explain != ExplainPlanType::None;
    let mut stages = aggr::stages(query);

    if explaining {
        let verbosity = backend.register_constant(explain_server_name(explain));
        backend.emit_function_name("explain");
        backend.emit_function_call(
            false,
            vec![Box::new(move |backend: &mut MongoshBackend| {
                backend.emit_context_value(&verbosity);
            })],
        );
        backend.emit_property_access();
        stages = aggr::explainable_prefix(stages);
    }

    backend.emit_function_name(CommandType::Aggregate.canonical());
    backend.emit_function_call(
        false,
        vec![Box::new(move |backend: &mut MongoshBackend| {
            aggr::emit_pipeline(backend, stages);
        })],
    );

    if !explaining && aggr::only_reshapes_documents(stages) {
        emit_limit(backend, query, Some(DEFAULT_RESULT_LIMIT));
    }
}

fn format_run_command<S: Source>(backend: &mut MongoshBackend, query: &Node<S>) -> OutputQuery {
    let Some(run_command) = query.component::<HasRunCommand<S>>() else {
        return OutputQuery::None;
    };

    let database = match &run_command.database.reference {
        ValueReference::Constant(constant) | ValueReference::Inferred(constant) => {
            Some(backend.register_constant(constant.value.clone()))
        }
        _ => None,
    };
    let can_be_run = database.is_some();
    let database =
        database.unwrap_or_else(|| backend.register_variable("database", BsonType::String, None));

    let command_name = match run_command.command_name.value() {
        Some(name) => backend.register_constant(name.clone()),
        None => backend.register_variable("command", BsonType::String, None),
    };

    backend.emit_db_access();
    backend.emit_database_access(database);
    backend.emit_function_name("runCommand");
    backend.emit_function_call(
        false,
        vec![Box::new(|backend: &mut MongoshBackend| {
            backend.emit_object_start(false);
            backend.emit_object_key(&command_name);
            let one = backend.register_constant(Value::Int32(1));
            backend.emit_context_value(&one);
            for (field, value) in &run_command.additional_arguments {
                backend.emit_as_is(", ");
                let key = resolve_field_reference(backend, field, false);
                backend.emit_object_key(&key);
                let value = resolve_value_reference(backend, value, None);
                backend.emit_context_value(&value);
            }
            backend.emit_object_end(false);
        })],
    );

    let output = backend.compute_self_invoking_output();
    if can_be_run {
        OutputQuery::CanBeRun(output)
    } else {
        OutputQuery::Incomplete(output)
    }
}
