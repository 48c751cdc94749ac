//! `Filters.*` builders.

use tree_sitter::Node;

use crate::dialects::java::constants::{
    array_value, resolve_field_name, resolve_to_call, resolve_value, varargs_or_iterable,
};
use crate::dialects::java::tree::MethodCall;
use crate::dialects::java::{JavaSource, JavaSourceFile};
use crate::mql::components::{HasFieldReference, HasFilter, HasValueReference, Name, Named};
use crate::mql::{BsonType, Node as MqlNode};

pub(super) const FILTERS: &str = "Filters";

/// Parses an argument that evaluates to a `Filters` call, possibly through a variable.
pub(super) fn parse_filter_argument(file: &JavaSourceFile, expression: Node<'_>) -> Option<MqlNode<JavaSource>> {
    let call = resolve_to_call(file, expression, &|call| call.is_static_call_on(file, FILTERS))?;
    parse_filter(file, &call)
}

pub(super) fn parse_filter(file: &JavaSourceFile, call: &MethodCall) -> Option<MqlNode<JavaSource>> {
    let source = JavaSource::of(&call.node);
    let method = call.name(file);
    let name = Name::from_canonical(method);
    let arguments = call.arguments();

    let node = match (method, arguments.as_slice()) {
        ("in" | "nin", []) => return None,
        ("in" | "nin", [field, values @ ..]) => MqlNode::new(
            source,
            vec![
                Named::new(name).into(),
                resolve_field_name(file, *field).into(),
                array_value(file, call, values).into(),
            ],
        ),
        ("and" | "or" | "nor", _) => MqlNode::new(
            source,
            vec![
                Named::new(name).into(),
                HasFilter::new(
                    varargs_or_iterable(file, call)
                        .into_iter()
                        .filter_map(|filter| parse_filter_argument(file, filter))
                        .collect(),
                )
                .into(),
            ],
        ),
        ("not", _) => MqlNode::new(
            source,
            vec![
                Named::new(name).into(),
                HasFilter::new(
                    arguments
                        .iter()
                        .filter_map(|filter| parse_filter_argument(file, *filter))
                        .collect(),
                )
                .into(),
            ],
        ),
        ("eq", [value]) => MqlNode::new(
            source,
            vec![
                Named::new(name).into(),
                HasFieldReference::from_schema(JavaSource::of(value), "_id").into(),
                resolve_value(file, *value).into(),
            ],
        ),
        ("exists", [field]) => MqlNode::new(
            source,
            vec![
                Named::new(name).into(),
                resolve_field_name(file, *field).into(),
                HasValueReference::inferred(JavaSource::of(field), true, BsonType::Boolean).into(),
            ],
        ),
        (_, [field, value]) => MqlNode::new(
            source,
            vec![
                Named::new(name).into(),
                resolve_field_name(file, *field).into(),
                resolve_value(file, *value).into(),
            ],
        ),
        _ => MqlNode::new(source, vec![Named::new(name).into()]),
    };
    Some(node)
}
