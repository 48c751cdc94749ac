//! `Update` builders: `Update.update("a", 1).set("b", 2).inc("c", 1)` and `new Update()`.

use tree_sitter::Node;

use super::criteria::{creates, parse_criteria};
use crate::dialects::java::constants::{resolve_field_name, resolve_value};
use crate::dialects::java::tree::{
    calls_on_local, find_declaration, find_method_declarations, meaningful_expression,
    returned_expressions, MethodCall,
};
use crate::dialects::java::{JavaSource, JavaSourceFile};
use crate::mql::components::{HasFilter, Name, Named};
use crate::mql::Node as MqlNode;

const MAX_DEPTH: usize = 16;

const OPERATIONS: &[&str] = &[
    "set",
    "setOnInsert",
    "unset",
    "inc",
    "push",
    "pull",
    "pullAll",
    "addToSet",
    "pop",
    "min",
    "max",
    "rename",
    "mul",
    "currentDate",
];

/// Operations of an expression that evaluates to an `Update`, or `None` when it is not one.
pub(super) fn parse_update(file: &JavaSourceFile, expression: Node<'_>) -> Option<Vec<MqlNode<JavaSource>>> {
    let mut operations = Vec::new();
    update_at_depth(file, expression, &mut operations, 0).then_some(operations)
}

fn update_at_depth(
    file: &JavaSourceFile,
    expression: Node<'_>,
    operations: &mut Vec<MqlNode<JavaSource>>,
    depth: usize,
) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    let expression = meaningful_expression(expression);

    match expression.kind() {
        "object_creation_expression" => creates(file, expression, "Update"),
        "method_invocation" => {
            let Some(call) = MethodCall::of(expression) else {
                return false;
            };
            if call.name(file) == "update" && call.is_static_call_on(file, "Update") {
                // Update.update(key, value) starts with a $set
                operations.extend(operation(file, &call, "set"));
                return true;
            }
            match call.object {
                Some(object) if file.text(&object) != "this" => {
                    if !update_at_depth(file, object, operations, depth + 1) {
                        return false;
                    }
                    operations.extend(operation(file, &call, call.name(file)));
                    true
                }
                _ => find_method_declarations(file, call.name(file))
                    .into_iter()
                    .flat_map(returned_expressions)
                    .any(|returned| update_at_depth(file, returned, operations, depth + 1)),
            }
        }
        "identifier" => {
            let Some(declaration) = find_declaration(file, expression) else {
                return false;
            };
            let Some(initializer) = declaration.initializer else {
                return false;
            };
            if !update_at_depth(file, initializer, operations, depth + 1) {
                return false;
            }
            for call in calls_on_local(file, &declaration, expression.start_byte()) {
                operations.extend(operation(file, &call, call.name(file)));
            }
            true
        }
        _ => false,
    }
}

fn operation(file: &JavaSourceFile, call: &MethodCall, method: &str) -> Option<MqlNode<JavaSource>> {
    if !OPERATIONS.contains(&method) {
        return None;
    }
    let source = JavaSource::of(&call.node);
    let name = Named::new(Name::from_canonical(method));

    let node = match call.arguments().as_slice() {
        [field, value, ..] => {
            let field = resolve_field_name(file, *field);
            let condition = (name.name == Name::Pull)
                .then(|| parse_criteria(file, *value))
                .flatten();
            match condition {
                Some(condition) => MqlNode::new(
                    source,
                    vec![name.into(), field.into(), HasFilter::new(condition).into()],
                ),
                None => MqlNode::new(
                    source,
                    vec![name.into(), field.into(), resolve_value(file, *value).into()],
                ),
            }
        }
        [field] => MqlNode::new(source, vec![name.into(), resolve_field_name(file, *field).into()]),
        [] => MqlNode::new(source, vec![name.into()]),
    };
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::java::testing::{names, use_call};
    use crate::mql::components::{HasFieldReference, HasValueReference};
    use crate::mql::Value;
    use pretty_assertions::assert_eq;

    fn parse(body: &str) -> Option<Vec<MqlNode<JavaSource>>> {
        let file = JavaSourceFile::parse(
            "Repo.java",
            format!(
                "import static org.springframework.data.mongodb.core.query.Criteria.where;\n\
                 class Repo {{ void f(String name) {{ {} }} }}",
                body
            ),
        )
        .unwrap();
        let usage = use_call(&file);
        parse_update(&file, usage.argument(0).unwrap())
    }


    #[test]
    fn test_update_chain() {
        let operations = parse("use(Update.update(\"name\", name).inc(\"loans\", 1).unset(\"legacy\"));").unwrap();
        assert_eq!(names(&operations), vec![Name::Set, Name::Inc, Name::Unset]);
        assert_eq!(
            operations[1].component::<HasValueReference<JavaSource>>().unwrap().value(),
            Some(&Value::Int32(1))
        );
        assert_eq!(
            operations[2].component::<HasFieldReference<JavaSource>>().unwrap().field_name(),
            Some("legacy")
        );
    }

    #[test]
    fn test_update_built_in_statements() {
        let operations = parse(
            "Update update = new Update();\n\
             update.set(\"name\", name);\n\
             update.push(\"history\", name).currentDate(\"modified\");\n\
             use(update);",
        )
        .unwrap();
        assert_eq!(names(&operations), vec![Name::Set, Name::Push, Name::Unknown]);
    }

    #[test]
    fn test_pull_with_a_criteria() {
        let operations = parse("use(new Update().pull(\"scores\", where(\"value\").gte(6)));").unwrap();
        let condition = operations[0].component::<HasFilter<JavaSource>>().unwrap();
        assert_eq!(names(&condition.children), vec![Name::Gte]);
    }

    #[test]
    fn test_not_an_update() {
        assert!(parse("use(name.trim());").is_none());
    }
}
