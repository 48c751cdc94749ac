//! Rendering of aggregation pipelines.

use super::backend::MongoshBackend;
use super::query::{emit_query_filter, resolve_field_reference, resolve_value_reference};
use crate::mql::components::{
    HasAccumulatedFields, HasAddedFields, HasAggregation, HasFieldReference, HasFilter, HasLimit,
    HasProjections, HasSorts, HasValueReference, Name, Named, ValueReference,
};
use crate::mql::{Node, Source, Value};

const LONG_STAGE_THRESHOLD: usize = 3;

/// Stages that can run under explain without side effects.
const EXPLAINABLE_STAGES: &[Name] = &[
    Name::Match,
    Name::Project,
    Name::AddFields,
    Name::Unwind,
    Name::Sort,
    Name::Group,
];

pub(super) fn stages<S: Source>(query: &Node<S>) -> &[Node<S>] {
    query
        .component::<HasAggregation<S>>()
        .map(|aggregation| aggregation.children.as_slice())
        .unwrap_or(&[])
}

fn stage_name<S: Source>(stage: &Node<S>) -> Name {
    stage
        .component::<Named>()
        .map(|named| named.name)
        .unwrap_or(Name::Unknown)
}

/// The longest prefix of the pipeline that is safe to explain.
pub(super) fn explainable_prefix<S: Source>(stages: &[Node<S>]) -> &[Node<S>] {
    let end = stages
        .iter()
        .position(|stage| !EXPLAINABLE_STAGES.contains(&stage_name(stage)))
        .unwrap_or(stages.len());
    &stages[..end]
}

/// Whether every stage only reshapes documents, so nothing bounds the size of the result.
pub(super) fn only_reshapes_documents<S: Source>(stages: &[Node<S>]) -> bool {
    !stages.is_empty()
        && stages
            .iter()
            .all(|stage| matches!(stage_name(stage), Name::Project | Name::AddFields))
}

/// `[stage, stage, ]`
pub(super) fn emit_pipeline<S: Source>(backend: &mut MongoshBackend, stages: &[Node<S>]) {
    backend.emit_array_start(true);
    for stage in stages {
        if emit_stage(backend, stage) {
            backend.emit_object_value_end(true);
        }
    }
    backend.emit_array_end(true);
}

fn emit_stage<S: Source>(backend: &mut MongoshBackend, stage: &Node<S>) -> bool {
    match stage_name(stage) {
        Name::Match => emit_match_stage(backend, stage),
        Name::Project => emit_field_document_stage(backend, "$project", projections(stage)),
        Name::AddFields => emit_field_document_stage(backend, "$addFields", added_fields(stage)),
        Name::Sort => emit_field_document_stage(backend, "$sort", sorts(stage)),
        Name::Unwind => return emit_unwind_stage(backend, stage),
        Name::Limit => return emit_limit_stage(backend, stage),
        Name::Group => emit_group_stage(backend, stage),
        _ => return false,
    }
    true
}

fn projections<S: Source>(stage: &Node<S>) -> &[Node<S>] {
    stage
        .component::<HasProjections<S>>()
        .map(|projections| projections.children.as_slice())
        .unwrap_or(&[])
}

fn added_fields<S: Source>(stage: &Node<S>) -> &[Node<S>] {
    stage
        .component::<HasAddedFields<S>>()
        .map(|fields| fields.children.as_slice())
        .unwrap_or(&[])
}

fn sorts<S: Source>(stage: &Node<S>) -> &[Node<S>] {
    stage
        .component::<HasSorts<S>>()
        .map(|sorts| sorts.children.as_slice())
        .unwrap_or(&[])
}

fn emit_match_stage<S: Source>(backend: &mut MongoshBackend, stage: &Node<S>) {
    let filter = stage
        .component::<HasFilter<S>>()
        .and_then(|filter| filter.children.first());
    let long_filter = filter
        .and_then(|filter| filter.component::<HasFilter<S>>())
        .is_some_and(|nested| nested.children.len() > LONG_STAGE_THRESHOLD);

    backend.emit_object_start(false);
    let key = backend.register_constant("$match");
    backend.emit_object_key(&key);
    match filter {
        Some(filter) => {
            backend.emit_object_start(long_filter);
            emit_query_filter(backend, filter, false);
            backend.emit_object_end(long_filter);
        }
        None => {
            backend.emit_comment("No filter provided.");
        }
    }
    backend.emit_object_end(false);
}

/// `{"<stage>": {"field": value, ...}}` for project, addFields and sort.
fn emit_field_document_stage<S: Source>(
    backend: &mut MongoshBackend,
    stage_key: &str,
    fields: &[Node<S>],
) {
    let long = fields.len() > LONG_STAGE_THRESHOLD;

    backend.emit_object_start(long);
    let key = backend.register_constant(stage_key);
    backend.emit_object_key(&key);
    backend.emit_object_start(long);
    emit_as_field_value_document(backend, fields, long);
    backend.emit_object_end(long);
    backend.emit_object_end(long);
}

/// `"field": value, ` for every node with both a field and a value reference.
fn emit_as_field_value_document<S: Source>(
    backend: &mut MongoshBackend,
    nodes: &[Node<S>],
    long: bool,
) {
    for node in nodes {
        let field = node.component::<HasFieldReference<S>>();
        let value = node.component::<HasValueReference<S>>();
        let (Some(field), Some(value)) = (field, value) else {
            continue;
        };

        let key = resolve_field_reference(backend, field, false);
        backend.emit_object_key(&key);
        let value = resolve_value_reference(backend, value, Some(field));
        backend.emit_context_value(&value);
        backend.emit_object_value_end(long);
    }
}

fn emit_unwind_stage<S: Source>(backend: &mut MongoshBackend, stage: &Node<S>) -> bool {
    let Some(field) = stage.component::<HasFieldReference<S>>() else {
        return false;
    };

    backend.emit_object_start(false);
    let key = backend.register_constant("$unwind");
    backend.emit_object_key(&key);
    let path = resolve_field_reference(backend, field, true);
    backend.emit_context_value(&path);
    backend.emit_object_end(false);
    true
}

fn emit_limit_stage<S: Source>(backend: &mut MongoshBackend, stage: &Node<S>) -> bool {
    let Some(limit) = stage.component::<HasLimit>() else {
        return false;
    };

    backend.emit_object_start(false);
    let key = backend.register_constant("$limit");
    backend.emit_object_key(&key);
    let limit = backend.register_constant(Value::Int64(i64::from(limit.limit)));
    backend.emit_context_value(&limit);
    backend.emit_object_end(false);
    true
}

fn emit_group_stage<S: Source>(backend: &mut MongoshBackend, stage: &Node<S>) {
    let id_field = stage.component::<HasFieldReference<S>>();
    let id_value = stage.component::<HasValueReference<S>>();
    let accumulated = stage
        .component::<HasAccumulatedFields<S>>()
        .map(|fields| fields.children.as_slice())
        .unwrap_or(&[]);
    let long = id_value.is_some_and(is_long_id_value_reference) || accumulated.len() > 2;

    backend.emit_object_start(long);
    let key = backend.register_constant("$group");
    backend.emit_object_key(&key);
    backend.emit_object_start(long);
    if id_field.is_some() && id_value.is_some() {
        emit_as_field_value_document(backend, std::slice::from_ref(stage), long);
        emit_accumulated_fields(backend, accumulated, long);
    }
    backend.emit_object_end(long);
    backend.emit_object_end(long);
}

fn is_long_id_value_reference<S: Source>(value: &HasValueReference<S>) -> bool {
    match &value.reference {
        ValueReference::Computed(computed) => {
            computed
                .expression
                .components::<HasFieldReference<S>>()
                .len()
                >= 3
        }
        _ => false,
    }
}

fn emit_accumulated_fields<S: Source>(
    backend: &mut MongoshBackend,
    accumulated: &[Node<S>],
    long: bool,
) {
    for field in accumulated {
        let Some(accumulator) = field.component::<Named>() else {
            continue;
        };
        let emitted = match accumulator.name {
            Name::Sum
            | Name::Avg
            | Name::Min
            | Name::Max
            | Name::First
            | Name::Last
            | Name::Push
            | Name::AddToSet => emit_key_value_accumulator(backend, accumulator.name, field, long),
            Name::Top | Name::TopN | Name::Bottom | Name::BottomN => {
                emit_top_bottom_accumulator(backend, accumulator.name, field, long)
            }
            _ => false,
        };
        if emitted {
            backend.emit_object_value_end(long);
        }
    }
}

/// `"total": {"$sum": "$amount"}`
fn emit_key_value_accumulator<S: Source>(
    backend: &mut MongoshBackend,
    accumulator: Name,
    node: &Node<S>,
    long: bool,
) -> bool {
    let field = node.component::<HasFieldReference<S>>();
    let value = node.component::<HasValueReference<S>>();
    let (Some(field), Some(value)) = (field, value) else {
        return false;
    };

    let key = resolve_field_reference(backend, field, false);
    backend.emit_object_key(&key);
    backend.emit_object_start(long);
    let operator = backend.register_constant(format!("${}", accumulator.canonical()));
    backend.emit_object_key(&operator);
    let value = resolve_value_reference(backend, value, Some(field));
    backend.emit_context_value(&value);
    backend.emit_object_end(long);
    true
}

/// `"best": {"$topN": {"sortBy": {...}, "output": "$title", "n": 3, }}`
fn emit_top_bottom_accumulator<S: Source>(
    backend: &mut MongoshBackend,
    accumulator: Name,
    node: &Node<S>,
    long: bool,
) -> bool {
    let field = node.component::<HasFieldReference<S>>();
    let value = node.component::<HasValueReference<S>>();
    let (Some(field), Some(value)) = (field, value) else {
        return false;
    };
    let limit = node.component::<HasLimit>().map(|limit| limit.limit);

    let key = resolve_field_reference(backend, field, false);
    backend.emit_object_key(&key);
    backend.emit_object_start(long);
    let operator = backend.register_constant(format!("${}", accumulator.canonical()));
    backend.emit_object_key(&operator);
    backend.emit_object_start(long);

    let sort_by = backend.register_constant("sortBy");
    backend.emit_object_key(&sort_by);
    backend.emit_object_start(long);
    emit_as_field_value_document(backend, sorts(node), long);
    backend.emit_object_end(long);
    backend.emit_object_value_end(long);

    let output = backend.register_constant("output");
    backend.emit_object_key(&output);
    let value = resolve_value_reference(backend, value, Some(field));
    backend.emit_context_value(&value);
    backend.emit_object_value_end(long);

    if let Some(limit) = limit {
        let n = backend.register_constant("n");
        backend.emit_object_key(&n);
        let limit = backend.register_constant(Value::Int64(i64::from(limit)));
        backend.emit_context_value(&limit);
        backend.emit_object_value_end(long);
    }

    backend.emit_object_end(long);
    backend.emit_object_end(long);
    true
}
