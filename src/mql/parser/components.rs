//! Parsers that extract components from a node.

use std::collections::HashSet;
use std::convert::Infallible;

use super::{first, AnyError, Either, NoConditionFulfilled, Parser};
use crate::mql::bson_type::BsonType;
use crate::mql::components::{
    CommandType, ConstantValue, FieldName, FieldReference, HasAggregation,
    HasCollectionReference, HasFieldReference, HasFilter, HasValueReference, IsCommand,
    KnownCollection, Name, Named, OnlyCollection, RuntimeValue, CollectionReference,
    ValueReference,
};
use crate::mql::node::{Node, Source};
use crate::mql::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoFieldReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoFieldReferences;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoValueReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoFilters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HasNoNamedOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoNamedComponents;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDoesNotMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoCollectionReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionReferenceDoesNotMatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoAggregation;

// Fields

pub fn field_reference<S: Source>() -> Parser<Node<S>, NoFieldReference, HasFieldReference<S>> {
    Parser::new(|input: &Node<S>| {
        match input.component::<HasFieldReference<S>>() {
            Some(field) if field.reference != FieldReference::Unknown => Ok(field.clone()),
            _ => Err(NoFieldReference),
        }
    })
}

pub fn schema_field_reference<S: Source>() -> Parser<Node<S>, NoFieldReference, FieldName<S>> {
    Parser::new(|input: &Node<S>| {
        input
            .component::<HasFieldReference<S>>()
            .and_then(HasFieldReference::schema_field)
            .cloned()
            .ok_or(NoFieldReference)
    })
}

fn gather_schema_field_reference_nodes<S: Source>(node: &Node<S>, into: &mut Vec<Node<S>>) {
    let is_schema_field = node
        .component::<HasFieldReference<S>>()
        .is_some_and(|field| field.schema_field().is_some());
    if is_schema_field {
        into.push(node.clone());
    }

    for component in node.components_with_children() {
        for child in component.children() {
            gather_schema_field_reference_nodes(child, into);
        }
    }
}

/// Every node, at any depth, that references a stored field. Parent nodes come first.
pub fn all_nodes_with_schema_field_references<S: Source>(
) -> Parser<Node<S>, NoFieldReferences, Vec<Node<S>>> {
    Parser::new(|input: &Node<S>| {
        let mut nodes = Vec::new();
        gather_schema_field_reference_nodes(input, &mut nodes);
        if nodes.is_empty() {
            Err(NoFieldReferences)
        } else {
            Ok(nodes)
        }
    })
}

/// Stored-field nodes whose value is only known at runtime.
pub fn all_nodes_with_known_runtime_fields<S: Source>(
) -> Parser<Node<S>, NoFieldReferences, Vec<Node<S>>> {
    Parser::new(|input: &Node<S>| {
        let mut nodes = Vec::new();
        gather_schema_field_reference_nodes(input, &mut nodes);
        nodes.retain(|node| {
            node.component::<HasValueReference<S>>()
                .is_some_and(|value| matches!(value.reference, ValueReference::Runtime(_)))
        });

        if nodes.is_empty() {
            Err(NoFieldReferences)
        } else {
            Ok(nodes)
        }
    })
}

// Values

pub fn constant_value_reference<S: Source>() -> Parser<Node<S>, NoValueReference, ConstantValue<S>> {
    Parser::new(|input: &Node<S>| {
        match input.component::<HasValueReference<S>>().map(|v| &v.reference) {
            Some(ValueReference::Constant(constant)) => Ok(constant.clone()),
            _ => Err(NoValueReference),
        }
    })
}

pub fn runtime_value_reference<S: Source>() -> Parser<Node<S>, NoValueReference, RuntimeValue<S>> {
    Parser::new(|input: &Node<S>| {
        match input.component::<HasValueReference<S>>().map(|v| &v.reference) {
            Some(ValueReference::Runtime(runtime)) => Ok(runtime.clone()),
            _ => Err(NoValueReference),
        }
    })
}

pub fn inferred_value_reference<S: Source>() -> Parser<Node<S>, NoValueReference, ConstantValue<S>> {
    Parser::new(|input: &Node<S>| {
        match input.component::<HasValueReference<S>>().map(|v| &v.reference) {
            Some(ValueReference::Inferred(inferred)) => Ok(inferred.clone()),
            _ => Err(NoValueReference),
        }
    })
}

/// A value reference reduced to what the analyzers need. Runtime values have no value.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedValueReference<S> {
    pub source: S,
    pub bson_type: BsonType,
    pub value: Option<Value>,
}

type ValueReferenceParser<S> =
    Parser<Node<S>, Either<NoConditionFulfilled, NoValueReference>, ParsedValueReference<S>>;

fn parsed_constant<S: Source>(constant: ConstantValue<S>) -> ParsedValueReference<S> {
    ParsedValueReference {
        source: constant.source,
        bson_type: constant.bson_type,
        value: Some(constant.value),
    }
}

fn parsed_runtime<S: Source>(runtime: RuntimeValue<S>) -> ParsedValueReference<S> {
    ParsedValueReference {
        source: runtime.source,
        bson_type: runtime.bson_type,
        value: None,
    }
}

/// Values written by the user: constants and runtime references.
pub fn extract_user_provided_value_references<S: Source>() -> ValueReferenceParser<S> {
    first(vec![
        constant_value_reference::<S>().map(parsed_constant),
        runtime_value_reference::<S>().map(parsed_runtime),
    ])
}

/// User-provided values plus values inferred by the dialect, like default sort directions.
pub fn extract_value_references_relevant_for_indexing<S: Source>() -> ValueReferenceParser<S> {
    first(vec![
        constant_value_reference::<S>().map(parsed_constant),
        runtime_value_reference::<S>().map(parsed_runtime),
        inferred_value_reference::<S>().map(parsed_constant),
    ])
}

// Filters

fn gather_filters<S: Source>(node: &Node<S>, into: &mut Vec<Node<S>>) {
    if let Some(filter) = node.component::<HasFilter<S>>() {
        into.extend(filter.children.iter().cloned());
        for child in &filter.children {
            gather_filters(child, into);
        }
    }
}

/// Every filter predicate of the query and of its aggregation stages.
pub fn all_filters_recursively<S: Source>() -> Parser<Node<S>, NoFilters, Vec<Node<S>>> {
    Parser::new(|input: &Node<S>| {
        let mut filters = Vec::new();
        gather_filters(input, &mut filters);
        if let Some(aggregation) = input.component::<HasAggregation<S>>() {
            for stage in &aggregation.children {
                gather_filters(stage, &mut filters);
            }
        }

        if filters.is_empty() {
            Err(NoFilters)
        } else {
            Ok(filters)
        }
    })
}

// Names

pub fn has_name<S: Source>(name: Name) -> Parser<Node<S>, AnyError, bool> {
    Parser::new(move |input: &Node<S>| {
        Ok(input.component::<Named>().map(|named| named.name) == Some(name))
    })
}

pub fn extract_operation<S: Source>() -> Parser<Node<S>, HasNoNamedOperation, Named> {
    Parser::new(|input: &Node<S>| input.component::<Named>().copied().ok_or(HasNoNamedOperation))
}

fn gather_named<S: Source>(node: &Node<S>, into: &mut Vec<Named>) {
    into.extend(node.components::<Named>().into_iter().copied());
    for component in node.components_with_children() {
        for child in component.children() {
            gather_named(child, into);
        }
    }
}

pub fn all_named_components_recursively<S: Source>(
) -> Parser<Node<S>, NoNamedComponents, Vec<Named>> {
    Parser::new(|input: &Node<S>| {
        let mut named = Vec::new();
        gather_named(input, &mut named);
        if named.is_empty() {
            Err(NoNamedComponents)
        } else {
            Ok(named)
        }
    })
}

/// True when every named operation in the tree is one of `names`, or when there are none.
pub fn when_all_named_operations_are_in<S: Source>(
    names: HashSet<Name>,
) -> Parser<Node<S>, Infallible, bool> {
    all_named_components_recursively::<S>()
        .map(move |named| named.iter().all(|n| names.contains(&n.name)))
        .recover_error(|NoNamedComponents| true)
}

// Commands

pub fn when_has_any_command<S: Source>() -> Parser<Node<S>, CommandDoesNotMatch, Node<S>> {
    Parser::new(|input: &Node<S>| {
        if input.has_component::<IsCommand>() {
            Ok(input.clone())
        } else {
            Err(CommandDoesNotMatch)
        }
    })
}

pub fn when_command_is_any_of<S: Source>(
    commands: HashSet<CommandType>,
) -> Parser<Node<S>, AnyError, bool> {
    when_has_any_command::<S>().any_error().map(move |node| {
        node.component::<IsCommand>()
            .is_some_and(|command| commands.contains(&command.command_type))
    })
}

// Collections

pub fn collection_reference<S: Source>(
) -> Parser<Node<S>, NoCollectionReference, HasCollectionReference<S>> {
    Parser::new(|input: &Node<S>| {
        input
            .component::<HasCollectionReference<S>>()
            .cloned()
            .ok_or(NoCollectionReference)
    })
}

type CollectionError = Either<NoCollectionReference, CollectionReferenceDoesNotMatch>;

pub fn known_collection<S: Source>() -> Parser<Node<S>, CollectionError, KnownCollection<S>> {
    collection_reference::<S>().flat_map(Parser::new(|reference: &HasCollectionReference<S>| {
        match &reference.reference {
            CollectionReference::Known(known) => Ok(known.clone()),
            _ => Err(CollectionReferenceDoesNotMatch),
        }
    }))
}

pub fn only_collection<S: Source>() -> Parser<Node<S>, CollectionError, OnlyCollection<S>> {
    collection_reference::<S>().flat_map(Parser::new(|reference: &HasCollectionReference<S>| {
        match &reference.reference {
            CollectionReference::OnlyCollection(only) => Ok(only.clone()),
            _ => Err(CollectionReferenceDoesNotMatch),
        }
    }))
}

/// Succeeds when the query has an `Unknown` collection reference.
pub fn no_collection<S: Source>() -> Parser<Node<S>, CollectionError, ()> {
    collection_reference::<S>().flat_map(Parser::new(|reference: &HasCollectionReference<S>| {
        match &reference.reference {
            CollectionReference::Unknown => Ok(()),
            _ => Err(CollectionReferenceDoesNotMatch),
        }
    }))
}

pub fn aggregation_stages<S: Source>() -> Parser<Node<S>, NoAggregation, Vec<Node<S>>> {
    Parser::new(|input: &Node<S>| {
        input
            .component::<HasAggregation<S>>()
            .map(|aggregation| aggregation.children.clone())
            .ok_or(NoAggregation)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mql::components::{HasSorts, Named};
    use crate::mql::namespace::Namespace;

    fn predicate(name: Name, field: &str, value: HasValueReference<()>) -> Node<()> {
        Node::new(
            (),
            vec![
                Named::new(name).into(),
                HasFieldReference::from_schema((), field).into(),
                value.into(),
            ],
        )
    }

    fn query() -> Node<()> {
        let or = Node::new(
            (),
            vec![
                Named::new(Name::Or).into(),
                HasFilter::new(vec![
                    predicate(
                        Name::Eq,
                        "a",
                        HasValueReference::constant((), 1, BsonType::Int32),
                    ),
                    predicate(Name::Gt, "b", HasValueReference::runtime((), BsonType::Int32)),
                ])
                .into(),
            ],
        );

        Node::new(
            (),
            vec![
                IsCommand::new(CommandType::FindMany).into(),
                HasCollectionReference::known(None, (), Namespace::new("db", "coll")).into(),
                HasFilter::new(vec![or]).into(),
            ],
        )
    }

    #[test]
    fn test_all_filters_recursively_includes_nested_filters() {
        let filters = all_filters_recursively().parse(&query()).unwrap();
        assert_eq!(filters.len(), 3);
        assert_eq!(
            filters[0].component::<Named>().map(|n| n.name),
            Some(Name::Or)
        );
    }

    #[test]
    fn test_all_filters_recursively_looks_into_stages() {
        let stage = Node::new(
            (),
            vec![
                Named::new(Name::Match).into(),
                HasFilter::new(vec![predicate(
                    Name::Eq,
                    "a",
                    HasValueReference::constant((), 1, BsonType::Int32),
                )])
                .into(),
            ],
        );
        let aggregate = Node::new((), vec![HasAggregation::new(vec![stage]).into()]);
        assert_eq!(all_filters_recursively().parse(&aggregate).unwrap().len(), 1);

        let empty = Node::new((), vec![HasFilter::<()>::new(vec![]).into()]);
        assert_eq!(all_filters_recursively().parse(&empty), Err(NoFilters));
    }

    #[test]
    fn test_schema_field_nodes_and_runtime_fields() {
        let nodes = all_nodes_with_schema_field_references().parse(&query()).unwrap();
        assert_eq!(nodes.len(), 2);

        let runtime = all_nodes_with_known_runtime_fields().parse(&query()).unwrap();
        assert_eq!(runtime.len(), 1);
        assert_eq!(
            schema_field_reference().parse(&runtime[0]).unwrap().field_name,
            "b"
        );
    }

    #[test]
    fn test_value_reference_extraction_order() {
        let inferred = predicate(
            Name::Sort,
            "a",
            HasValueReference::inferred((), 1, BsonType::Int32),
        );
        assert!(extract_user_provided_value_references()
            .parse(&inferred)
            .is_err());

        let parsed = extract_value_references_relevant_for_indexing()
            .parse(&inferred)
            .unwrap();
        assert_eq!(parsed.value, Some(Value::Int32(1)));

        let runtime = predicate(Name::Eq, "a", HasValueReference::runtime((), BsonType::String));
        let parsed = extract_user_provided_value_references().parse(&runtime).unwrap();
        assert_eq!(parsed.value, None);
        assert_eq!(parsed.bson_type, BsonType::String);
    }

    #[test]
    fn test_named_parsers() {
        let names = all_named_components_recursively().parse(&query()).unwrap();
        assert_eq!(
            names.iter().map(|n| n.name).collect::<Vec<_>>(),
            vec![Name::Or, Name::Eq, Name::Gt]
        );

        let allowed: HashSet<Name> = [Name::Or, Name::Eq, Name::Gt].into_iter().collect();
        assert_eq!(when_all_named_operations_are_in(allowed).parse(&query()), Ok(true));

        let only_eq: HashSet<Name> = [Name::Eq].into_iter().collect();
        assert_eq!(when_all_named_operations_are_in(only_eq.clone()).parse(&query()), Ok(false));

        let bare = Node::new((), vec![HasSorts::<()>::new(vec![]).into()]);
        assert_eq!(when_all_named_operations_are_in(only_eq).parse(&bare), Ok(true));
        assert_eq!(has_name(Name::Or).parse(&query()).ok(), Some(false));
    }

    #[test]
    fn test_command_parsers() {
        let finds: HashSet<CommandType> = [CommandType::FindMany].into_iter().collect();
        assert_eq!(when_command_is_any_of(finds).parse(&query()).ok(), Some(true));

        let empty = Node::new((), vec![]);
        assert_eq!(when_has_any_command::<()>().parse(&empty), Err(CommandDoesNotMatch));
    }

    #[test]
    fn test_collection_parsers() {
        let known = known_collection().parse(&query()).unwrap();
        assert_eq!(known.namespace, Namespace::new("db", "coll"));
        assert_eq!(
            only_collection().parse(&query()),
            Err(Either::Right(CollectionReferenceDoesNotMatch))
        );

        let unknown = Node::new((), vec![HasCollectionReference::<()>::unknown().into()]);
        assert_eq!(no_collection().parse(&unknown), Ok(()));
        assert_eq!(
            no_collection::<()>().parse(&Node::new((), vec![])),
            Err(Either::Left(NoCollectionReference))
        );
    }
}
