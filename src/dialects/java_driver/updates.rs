//! `Updates.*` builders.

use tree_sitter::Node;

use super::filters::{parse_filter, FILTERS};
use crate::dialects::java::constants::{resolve_field_name, resolve_to_call, resolve_value, varargs_or_iterable};
use crate::dialects::java::tree::MethodCall;
use crate::dialects::java::{JavaSource, JavaSourceFile};
use crate::mql::components::{HasFilter, HasUpdates, Name, Named};
use crate::mql::Node as MqlNode;

const UPDATES: &str = "Updates";

pub(super) fn parse_update_argument(file: &JavaSourceFile, expression: Node<'_>) -> Option<MqlNode<JavaSource>> {
    let call = resolve_to_call(file, expression, &|call| call.is_static_call_on(file, UPDATES))?;
    parse_update(file, &call)
}

fn parse_update(file: &JavaSourceFile, call: &MethodCall) -> Option<MqlNode<JavaSource>> {
    let source = JavaSource::of(&call.node);
    let method = call.name(file);
    let name = Name::from_canonical(method);
    let arguments = call.arguments();

    let node = match (method, arguments.as_slice()) {
        ("combine", _) => MqlNode::new(
            source,
            vec![
                Named::new(name).into(),
                HasUpdates::new(
                    varargs_or_iterable(file, call)
                        .into_iter()
                        .filter_map(|update| parse_update_argument(file, update))
                        .collect(),
                )
                .into(),
            ],
        ),
        (_, [field, value]) => {
            let field_reference = resolve_field_name(file, *field);
            // pull takes either a value or a condition on the array elements
            let condition = (name == Name::Pull)
                .then(|| resolve_to_call(file, *value, &|call| call.is_static_call_on(file, FILTERS)))
                .flatten();

            match condition {
                Some(condition) => MqlNode::new(
                    source,
                    vec![
                        Named::new(name).into(),
                        field_reference.into(),
                        HasFilter::new(parse_filter(file, &condition).into_iter().collect()).into(),
                    ],
                ),
                None => MqlNode::new(
                    source,
                    vec![
                        Named::new(name).into(),
                        field_reference.into(),
                        resolve_value(file, *value).into(),
                    ],
                ),
            }
        }
        (_, [field]) => MqlNode::new(
            source,
            vec![Named::new(name).into(), resolve_field_name(file, *field).into()],
        ),
        _ => MqlNode::new(source, vec![Named::new(name).into()]),
    };
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::java::testing::use_call;
    use crate::mql::components::{HasChildren, HasFieldReference, HasValueReference};
    use crate::mql::Value;
    use pretty_assertions::assert_eq;

    fn parse(code: &str) -> MqlNode<JavaSource> {
        let file = JavaSourceFile::parse(
            "Repo.java",
            format!("class Repo {{ void f(String name) {{ use({}); }} }}", code),
        )
        .unwrap();
        let usage = use_call(&file);
        parse_update_argument(&file, usage.argument(0).unwrap()).unwrap()
    }

    #[test]
    fn test_field_value_updates() {
        let node = parse("Updates.set(\"name\", \"Ada\")");
        assert_eq!(node.component::<Named>().unwrap().name, Name::Set);
        assert_eq!(
            node.component::<HasFieldReference<JavaSource>>().unwrap().field_name(),
            Some("name")
        );
        assert_eq!(
            node.component::<HasValueReference<JavaSource>>().unwrap().value(),
            Some(&Value::string("Ada"))
        );
    }

    #[test]
    fn test_single_field_updates() {
        let node = parse("Updates.unset(\"legacy\")");
        assert_eq!(node.component::<Named>().unwrap().name, Name::Unset);
        assert!(!node.has_component::<HasValueReference<JavaSource>>());
    }

    #[test]
    fn test_combine_nests() {
        let node = parse("Updates.combine(Updates.set(\"a\", 1), Updates.inc(\"b\", 2), Updates.push(\"c\", name))");
        let children = node.component::<HasUpdates<JavaSource>>().unwrap().children();
        let names: Vec<Name> = children
            .iter()
            .map(|child| child.component::<Named>().unwrap().name)
            .collect();
        assert_eq!(names, vec![Name::Set, Name::Inc, Name::Push]);
    }

    #[test]
    fn test_pull_with_a_condition() {
        let node = parse("Updates.pull(\"scores\", Filters.gte(\"value\", 6))");
        let condition = node.component::<HasFilter<JavaSource>>().unwrap().children();
        assert_eq!(condition.len(), 1);
        assert_eq!(condition[0].component::<Named>().unwrap().name, Name::Gte);

        let plain = parse("Updates.pull(\"tags\", \"old\")");
        assert!(plain.has_component::<HasValueReference<JavaSource>>());
    }
}
