//! Rendering of filters, updates, sorts and references for find-shaped commands.

use super::backend::{ContextValue, MongoshBackend};
use crate::mql::components::{
    CollectionReference, CommandType, Component, FieldReference, HasCollectionReference,
    HasFieldReference, HasFilter, HasLimit, HasSorts, HasUpdates, HasValueReference, IsCommand,
    Name, Named, ValueReference,
};
use crate::mql::parser::components::all_filters_recursively;
use crate::mql::{BsonType, Node, Source, Value};

/// Filters with more children than this are broken into lines when pretty printing.
const LONG_FILTER_THRESHOLD: usize = 3;

/// `$`-prefixes a field used as a value; strips the prefix from a field used as a key.
pub(super) fn to_mongodb_schema_field(name: &str, used_as_value: bool) -> String {
    if used_as_value {
        if name.starts_with('$') {
            name.to_string()
        } else {
            format!("${}", name)
        }
    } else {
        name.trim_matches('$').to_string()
    }
}

pub(super) fn resolve_field_reference<S: Source>(
    backend: &mut MongoshBackend,
    field: &HasFieldReference<S>,
    used_as_value: bool,
) -> ContextValue {
    match field.field() {
        Some(name) => {
            backend.register_constant(to_mongodb_schema_field(&name.display_name, used_as_value))
        }
        None => backend.register_variable("field", BsonType::Any, None),
    }
}

pub(super) fn resolve_value_reference<S: Source>(
    backend: &mut MongoshBackend,
    value: &HasValueReference<S>,
    field: Option<&HasFieldReference<S>>,
) -> ContextValue {
    let schema_field_name = field
        .and_then(HasFieldReference::schema_field)
        .map(|field| field.field_name.clone());

    match &value.reference {
        ValueReference::Constant(constant) | ValueReference::Inferred(constant) => {
            backend.register_constant(constant.value.clone())
        }
        ValueReference::Runtime(runtime) => backend.register_variable(
            schema_field_name.as_deref().unwrap_or("value"),
            runtime.bson_type.clone(),
            None,
        ),
        ValueReference::Computed(computed) => {
            let nested = computed.expression.components::<HasFieldReference<S>>();
            match nested.as_slice() {
                [] => backend.register_constant(Value::Null),
                [single] => resolve_field_reference(backend, single, true),
                many => {
                    let mut pairs = Vec::with_capacity(many.len());
                    for nested_field in many {
                        match nested_field.field() {
                            Some(name) => pairs.push((
                                name.field_name.clone(),
                                Value::String(to_mongodb_schema_field(&name.display_name, true)),
                            )),
                            None => {
                                return backend.register_variable(
                                    schema_field_name.as_deref().unwrap_or("$value"),
                                    computed.bson_type.clone(),
                                    None,
                                )
                            }
                        }
                    }
                    backend.register_constant(Value::Document(pairs))
                }
            }
        }
        ValueReference::Unknown => backend.register_variable("queryField", BsonType::Any, None),
    }
}

/// `getSiblingDB(..).getCollection(..).`, with variables for the unknown parts.
pub(super) fn emit_collection_reference<S: Source>(
    backend: &mut MongoshBackend,
    collection: Option<&HasCollectionReference<S>>,
) {
    match collection.map(|collection| &collection.reference) {
        Some(CollectionReference::OnlyCollection(only)) => {
            let database = backend.register_variable("database", BsonType::String, None);
            backend.emit_database_access(database);
            let collection = backend.register_constant(only.collection.clone());
            backend.emit_collection_access(collection);
        }
        Some(CollectionReference::Known(known)) => {
            let database = backend.register_constant(known.namespace.database.clone());
            backend.emit_database_access(database);
            let collection = backend.register_constant(known.namespace.collection.clone());
            backend.emit_collection_access(collection);
        }
        _ => {
            let database = backend.register_variable("database", BsonType::String, None);
            backend.emit_database_access(database);
            let collection = backend.register_variable("collection", BsonType::String, None);
            backend.emit_collection_access(collection);
        }
    }
}

pub(super) fn returns_a_cursor<S: Source>(query: &Node<S>) -> bool {
    query
        .component::<IsCommand>()
        .is_some_and(|command| command.command_type == CommandType::FindMany)
}

pub(super) fn can_update_documents<S: Source>(query: &Node<S>) -> bool {
    query.component::<IsCommand>().is_some_and(|command| {
        matches!(
            command.command_type,
            CommandType::UpdateOne
                | CommandType::UpdateMany
                | CommandType::Upsert
                | CommandType::FindOneAndUpdate
        )
    })
}

/// Whether the node carries anything `emit_query_filter` would render.
pub(super) fn has_filter_content<S: Source>(node: &Node<S>) -> bool {
    node.has_component::<HasFilter<S>>()
        || node.has_component::<HasFieldReference<S>>()
        || node.has_component::<HasValueReference<S>>()
}

/// Renders a filter node. `first_call` wraps the output in the enclosing document.
pub fn emit_query_filter<S: Source>(backend: &mut MongoshBackend, node: &Node<S>, first_call: bool) {
    let named = node.component::<Named>();
    let field = node.component::<HasFieldReference<S>>();
    let value = node.component::<HasValueReference<S>>();
    let filter = node.component::<HasFilter<S>>();
    let is_long = all_filters_recursively::<S>()
        .parse(node)
        .map(|filters| filters.len() > LONG_FILTER_THRESHOLD)
        .unwrap_or(false);

    if first_call && filter.is_none() && field.is_none() && value.is_none() {
        backend.emit_object_start(false);
        backend.emit_object_end(false);
        return;
    }

    match (named, filter, field, value) {
        // a list of predicates with nothing else: the root of a query
        (None, Some(filter), None, None) => {
            if first_call {
                backend.emit_object_start(is_long);
            }
            for child in &filter.children {
                emit_query_filter(backend, child, false);
                backend.emit_object_value_end(false);
            }
            if first_call {
                backend.emit_object_end(is_long);
            }
        }
        // implicit equality, `field: value`
        (None, None, Some(field), Some(value)) => {
            if first_call {
                backend.emit_object_start(is_long);
            }
            let key = resolve_field_reference(backend, field, false);
            backend.emit_object_key(&key);
            let value = resolve_value_reference(backend, value, Some(field));
            backend.emit_context_value(&value);
            if first_call {
                backend.emit_object_end(is_long);
            }
        }
        (Some(named), ..) => emit_named_filter(backend, node, named.name, first_call, is_long),
        _ => {}
    }
}

fn emit_named_filter<S: Source>(
    backend: &mut MongoshBackend,
    node: &Node<S>,
    name: Name,
    first_call: bool,
    is_long: bool,
) {
    let field = node.component::<HasFieldReference<S>>();
    let value = node.component::<HasValueReference<S>>();
    let children = node
        .component::<HasFilter<S>>()
        .map(|filter| filter.children.as_slice())
        .unwrap_or(&[]);

    match name {
        Name::Eq => {
            if first_call {
                backend.emit_object_start(is_long);
            }
            if let Some(field) = field {
                let key = resolve_field_reference(backend, field, false);
                backend.emit_object_key(&key);
            }
            if let Some(value) = value {
                let value = resolve_value_reference(backend, value, field);
                backend.emit_context_value(&value);
            }
            for child in children {
                emit_query_filter(backend, child, false);
                backend.emit_object_value_end(false);
            }
            if first_call {
                backend.emit_object_end(is_long);
            }
        }
        Name::And | Name::Or | Name::Nor => {
            if first_call {
                backend.emit_object_start(false);
            }
            let key = backend.register_constant(format!("${}", name.canonical()));
            backend.emit_object_key(&key);
            backend.emit_array_start(true);
            for child in children {
                backend.emit_object_start(false);
                emit_query_filter(backend, child, false);
                backend.emit_object_end(false);
                backend.emit_object_value_end(false);
                if backend.pretty_print {
                    backend.emit_new_line();
                }
            }
            backend.emit_array_end(true);
            if first_call {
                backend.emit_object_end(false);
            }
        }
        // received as `$not: {field: condition}`, rendered as `field: {$not: condition}`
        Name::Not if children.len() == 1 => {
            let inner = &children[0];
            let operation = inner.component::<Named>();
            let inner_value = inner.component::<HasValueReference<S>>();

            let Some(inner_field) = inner.component::<HasFieldReference<S>>() else {
                // negating a logical group
                let mut components: Vec<Component<S>> = node
                    .all_components()
                    .iter()
                    .filter(|component| !matches!(component, Component::Named(_)))
                    .cloned()
                    .collect();
                components.push(Named::new(Name::Nor).into());
                emit_query_filter(backend, &Node::new(node.source.clone(), components), first_call);
                return;
            };

            if operation.is_none() && inner_value.is_none() {
                return;
            }

            if first_call {
                backend.emit_object_start(false);
            }
            let key = resolve_field_reference(backend, inner_field, false);
            backend.emit_object_key(&key);
            backend.emit_object_start(false);
            let not_key = backend.register_constant("$not");
            backend.emit_object_key(&not_key);

            let mut condition: Vec<Component<S>> = Vec::new();
            if let Some(operation) = operation {
                condition.push((*operation).into());
            }
            if let Some(inner_value) = inner_value {
                condition.push(inner_value.clone().into());
            }
            emit_query_filter(backend, &Node::new(inner.source.clone(), condition), false);
            backend.emit_object_end(false);

            if first_call {
                backend.emit_object_end(false);
            }
        }
        name if name != Name::Unknown => {
            let (Some(field), Some(value)) = (field, value) else {
                // operator applied to a field inside a `$not`, like `{$gt: 1}`
                if let Some(value) = value {
                    backend.emit_object_start(false);
                    let key = backend.register_constant(format!("${}", name.canonical()));
                    backend.emit_object_key(&key);
                    let value = resolve_value_reference(backend, value, None);
                    backend.emit_context_value(&value);
                    backend.emit_object_end(false);
                }
                return;
            };

            if first_call {
                backend.emit_object_start(is_long);
            }
            let key = resolve_field_reference(backend, field, false);
            backend.emit_object_key(&key);
            backend.emit_object_start(false);
            let operator = backend.register_constant(format!("${}", name.canonical()));
            backend.emit_object_key(&operator);
            let value = resolve_value_reference(backend, value, Some(field));
            backend.emit_context_value(&value);
            backend.emit_object_end(false);
            if first_call {
                backend.emit_object_end(is_long);
            }
        }
        _ => {}
    }
}

fn collect_updates<'a, S: Source>(node: &'a Node<S>, into: &mut Vec<&'a Node<S>>) {
    match node.component::<HasUpdates<S>>() {
        Some(updates) => {
            for child in &updates.children {
                collect_updates(child, into);
            }
        }
        None => into.push(node),
    }
}

/// `{"$set": {...}, "$inc": {...}, }`, operators in order of first appearance.
pub(super) fn emit_query_update<S: Source>(backend: &mut MongoshBackend, query: &Node<S>) {
    let Some(updates) = query.component::<HasUpdates<S>>() else {
        return;
    };

    let mut all_updates = Vec::new();
    for child in &updates.children {
        collect_updates(child, &mut all_updates);
    }

    let mut grouped: Vec<(Name, Vec<&Node<S>>)> = Vec::new();
    for update in all_updates {
        let Some(named) = update.component::<Named>() else {
            continue;
        };
        match grouped.iter_mut().find(|(name, _)| *name == named.name) {
            Some((_, nodes)) => nodes.push(update),
            None => grouped.push((named.name, vec![update])),
        }
    }

    backend.emit_object_start(true);
    for (name, nodes) in &grouped {
        emit_update_operator(backend, *name, nodes);
        backend.emit_object_value_end(false);
    }
    backend.emit_object_end(true);
}

fn emit_update_operator<S: Source>(backend: &mut MongoshBackend, name: Name, nodes: &[&Node<S>]) {
    let operator = backend.register_constant(format!("${}", name.canonical()));
    backend.emit_object_key(&operator);
    backend.emit_object_start(true);

    for node in nodes {
        let Some(field) = node.component::<HasFieldReference<S>>() else {
            continue;
        };
        let value = node.component::<HasValueReference<S>>();

        if let Some(value) = value {
            let key = resolve_field_reference(backend, field, false);
            backend.emit_object_key(&key);
            let value = resolve_value_reference(backend, value, Some(field));
            backend.emit_context_value(&value);
            backend.emit_object_value_end(false);
            continue;
        }

        // `$pull` with a condition on the array elements
        let nested_filter = node
            .component::<HasFilter<S>>()
            .and_then(|filter| filter.children.first());
        if let (Name::Pull, Some(nested_filter)) = (name, nested_filter) {
            let key = resolve_field_reference(backend, field, false);
            backend.emit_object_key(&key);
            emit_query_filter(backend, nested_filter, true);
            backend.emit_object_value_end(false);
        }
    }

    backend.emit_object_end(true);
}

/// `.sort({"a": 1, })` when the query sorts.
pub(super) fn emit_sort<S: Source>(backend: &mut MongoshBackend, query: &Node<S>) {
    let Some(sorts) = query.component::<HasSorts<S>>() else {
        return;
    };

    backend.emit_property_access();
    backend.emit_function_name("sort");
    backend.emit_function_call(
        false,
        vec![Box::new(|backend: &mut MongoshBackend| {
            backend.emit_object_start(false);
            for criteria in &sorts.children {
                let field = criteria.component::<HasFieldReference<S>>();
                let value = criteria.component::<HasValueReference<S>>();
                if let (Some(field), Some(value)) = (field, value) {
                    let key = resolve_field_reference(backend, field, false);
                    backend.emit_object_key(&key);
                    let value = resolve_value_reference(backend, value, Some(field));
                    backend.emit_context_value(&value);
                    backend.emit_object_value_end(false);
                }
            }
            backend.emit_object_end(false);
        })],
    );
}

/// `.limit(n)` with the query's limit, or `default_limit` when it has none.
pub(super) fn emit_limit<S: Source>(
    backend: &mut MongoshBackend,
    query: &Node<S>,
    default_limit: Option<u32>,
) {
    let Some(limit) = query
        .component::<HasLimit>()
        .map(|limit| limit.limit)
        .or(default_limit)
    else {
        return;
    };

    backend.emit_property_access();
    backend.emit_function_name("limit");
    backend.emit_function_call(
        false,
        vec![Box::new(move |backend: &mut MongoshBackend| {
            let limit = backend.register_constant(Value::Int64(i64::from(limit)));
            backend.emit_context_value(&limit);
        })],
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn render_filter(node: &Node<()>) -> String {
        let mut backend = MongoshBackend::default();
        emit_query_filter(&mut backend, node, true);
        backend.compute_output()
    }

    fn predicate(name: Option<Name>, field: &str, value: HasValueReference<()>) -> Node<()> {
        let mut components: Vec<Component<()>> = Vec::new();
        if let Some(name) = name {
            components.push(Named::new(name).into());
        }
        components.push(HasFieldReference::from_schema((), field).into());
        components.push(value.into());
        Node::new((), components)
    }

    fn root(children: Vec<Node<()>>) -> Node<()> {
        Node::new((), vec![HasFilter::new(children).into()])
    }

    #[test]
    fn test_field_used_as_value_is_prefixed() {
        assert_eq!(to_mongodb_schema_field("a", true), "$a");
        assert_eq!(to_mongodb_schema_field("$a", true), "$a");
        assert_eq!(to_mongodb_schema_field("$a", false), "a");
    }

    #[test]
    fn test_root_filters_end_with_a_separator() {
        let node = root(vec![predicate(
            Some(Name::Eq),
            "myField",
            HasValueReference::constant((), "myVal", BsonType::String),
        )]);
        assert_eq!(render_filter(&node), r#"{"myField": "myVal", }"#);
    }

    #[test]
    fn test_range_and_in_operators() {
        let node = root(vec![predicate(
            Some(Name::Gte),
            "myField",
            HasValueReference::constant((), "myVal", BsonType::String),
        )]);
        assert_eq!(render_filter(&node), r#"{"myField": {"$gte": "myVal"}, }"#);

        let node = root(vec![predicate(
            Some(Name::Nin),
            "myField",
            HasValueReference::constant(
                (),
                Value::Array(vec![Value::from(1), Value::from(2)]),
                BsonType::array(BsonType::Int32),
            ),
        )]);
        assert_eq!(render_filter(&node), r#"{"myField": {"$nin": [1, 2]}, }"#);
    }

    #[test]
    fn test_logical_operators_render_arrays() {
        let node = Node::new(
            (),
            vec![
                Named::new(Name::Or).into(),
                HasFilter::new(vec![predicate(
                    None,
                    "myField",
                    HasValueReference::constant((), "myVal", BsonType::String),
                )])
                .into(),
            ],
        );
        assert_eq!(render_filter(&node), r#"{"$or": [{"myField": "myVal"}, ]}"#);
    }

    #[test]
    fn test_not_is_moved_inside_the_field() {
        let not = Node::new(
            (),
            vec![
                Named::new(Name::Not).into(),
                HasFilter::new(vec![predicate(
                    Some(Name::Eq),
                    "myField",
                    HasValueReference::constant((), "myVal", BsonType::String),
                )])
                .into(),
            ],
        );
        assert_eq!(render_filter(&root(vec![not])), r#"{"myField": {"$not": "myVal"}, }"#);
    }

    #[test]
    fn test_runtime_values_become_variables() {
        let node = root(vec![predicate(
            Some(Name::Eq),
            "myField",
            HasValueReference::runtime((), BsonType::Int32),
        )]);
        assert_eq!(render_filter(&node), "var myField = 0\n\n{\"myField\": myField, }");
    }

    #[test]
    fn test_updates_are_grouped_by_operator() {
        let update = |name: Name, field: &str, value: i32| {
            predicate(
                Some(name),
                field,
                HasValueReference::constant((), value, BsonType::Int32),
            )
        };
        let query = Node::new(
            (),
            vec![HasUpdates::new(vec![
                update(Name::Set, "a", 1),
                update(Name::Inc, "b", 2),
                update(Name::Set, "c", 3),
            ])
            .into()],
        );

        let mut backend = MongoshBackend::default();
        emit_query_update(&mut backend, &query);
        assert_eq!(
            backend.compute_output(),
            r#"{"$set": {"a": 1, "c": 3, }, "$inc": {"b": 2, }, }"#
        );
    }
}
