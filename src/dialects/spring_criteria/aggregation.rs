//! `Aggregation.newAggregation(...)` and its stage builders.

use tree_sitter::Node;

use super::collection::class_literal_name;
use super::criteria::{parse_criteria, parse_sort, parse_sort_arguments, single_predicate};
use crate::dialects::java::constants::{
    resolve_constant, resolve_string, resolve_to_call, resolve_u32, varargs_or_iterable,
};
use crate::dialects::java::tree::MethodCall;
use crate::dialects::java::{JavaSource, JavaSourceFile};
use crate::mql::components::{
    Component, FieldName, FieldReference, HasAccumulatedFields, HasAddedFields, HasFieldReference,
    HasFilter, HasLimit, HasProjections, HasSorts, HasValueReference, Name, Named,
};
use crate::mql::{BsonType, Node as MqlNode, Value};

const AGGREGATION: &str = "Aggregation";

/// A parsed `newAggregation` call. Typed aggregations name their input entity first.
#[derive(Debug)]
pub(super) struct ParsedAggregation {
    pub(super) stages: Vec<MqlNode<JavaSource>>,
    pub(super) entity: Option<(String, JavaSource)>,
}

pub(super) fn parse_aggregation(file: &JavaSourceFile, expression: Node<'_>) -> Option<ParsedAggregation> {
    let call = resolve_to_call(file, expression, &|call| {
        call.name(file) == "newAggregation" && call.is_static_call_on(file, AGGREGATION)
    })?;

    let mut arguments = varargs_or_iterable(file, &call);
    let entity = arguments
        .first()
        .and_then(|first| class_literal_name(file, *first).map(|entity| (entity.to_string(), JavaSource::of(first))));
    if entity.is_some() {
        arguments.remove(0);
    }

    let stages = arguments
        .into_iter()
        .filter_map(|argument| {
            resolve_to_call(file, argument, &|call| {
                call.chain()
                    .first()
                    .is_some_and(|first| first.is_static_call_on(file, AGGREGATION))
            })
        })
        .map(|stage| parse_stage(file, &stage))
        .collect();
    Some(ParsedAggregation { stages, entity })
}

fn stage(source: JavaSource, name: Name, components: Vec<Component<JavaSource>>) -> MqlNode<JavaSource> {
    let mut all = vec![Named::new(name).into()];
    all.extend(components);
    MqlNode::new(source, all)
}

/// `"amount"` or `"$amount"` as the value of an accumulator or computed field.
fn field_path_value(file: &JavaSourceFile, expression: Node<'_>) -> HasValueReference<JavaSource> {
    let source = JavaSource::of(&expression);
    match resolve_string(file, expression) {
        Some(path) => {
            let trimmed = path.trim_start_matches('$');
            let field = FieldName::new(source, trimmed).with_display_name(format!("${}", trimmed));
            HasValueReference::computed(
                source,
                BsonType::Any,
                MqlNode::new(source, vec![HasFieldReference::new(FieldReference::FromSchema(field)).into()]),
            )
        }
        None => HasValueReference::unknown(),
    }
}

fn computed_key(file: &JavaSourceFile, key: Option<Node<'_>>) -> HasFieldReference<JavaSource> {
    key.and_then(|key| resolve_string(file, key).map(|name| HasFieldReference::computed(JavaSource::of(&key), name)))
        .unwrap_or_else(HasFieldReference::unknown)
}

fn parse_stage(file: &JavaSourceFile, call: &MethodCall) -> MqlNode<JavaSource> {
    let source = JavaSource::of(&call.node);
    let chain = call.chain();
    let Some(root) = chain.first() else {
        return stage(source, Name::Unknown, vec![]);
    };
    let arguments = root.arguments();
    let steps = &chain[1..];

    match root.name(file) {
        "match" => {
            let filter = arguments
                .first()
                .and_then(|criteria| {
                    let predicates = parse_criteria(file, *criteria)?;
                    (!predicates.is_empty()).then(|| single_predicate(JavaSource::of(criteria), predicates))
                })
                .into_iter()
                .collect();
            stage(source, Name::Match, vec![HasFilter::new(filter).into()])
        }
        "project" => {
            let mut projections = projected_fields(file, &arguments, Name::Include);
            for step in steps {
                match step.name(file) {
                    "andInclude" => projections.extend(projected_fields(file, &step.arguments(), Name::Include)),
                    "andExclude" => projections.extend(projected_fields(file, &step.arguments(), Name::Exclude)),
                    _ => {}
                }
            }
            stage(source, Name::Project, vec![HasProjections::new(projections).into()])
        }
        "sort" => {
            let sorts = match arguments.as_slice() {
                [sort] => parse_sort(file, *sort),
                many => parse_sort_arguments(file, many),
            };
            stage(source, Name::Sort, vec![HasSorts::new(sorts).into()])
        }
        "group" => parse_group(file, source, root, steps),
        "addFields" => parse_added_fields(file, source, steps),
        "unwind" => {
            let reference = arguments
                .first()
                .and_then(|field| {
                    let path = resolve_string(file, *field)?;
                    let trimmed = path.trim_start_matches('$');
                    Some(HasFieldReference::new(FieldReference::FromSchema(
                        FieldName::new(JavaSource::of(field), trimmed).with_display_name(format!("${}", trimmed)),
                    )))
                })
                .unwrap_or_else(HasFieldReference::unknown);
            stage(source, Name::Unwind, vec![reference.into()])
        }
        "limit" => {
            let limit = arguments.first().and_then(|limit| resolve_u32(file, *limit));
            stage(
                source,
                Name::Limit,
                limit.map(|limit| HasLimit::new(limit).into()).into_iter().collect(),
            )
        }
        _ => stage(source, Name::Unknown, vec![]),
    }
}

fn projected_fields(file: &JavaSourceFile, fields: &[Node<'_>], name: Name) -> Vec<MqlNode<JavaSource>> {
    let included = i32::from(name == Name::Include);
    fields
        .iter()
        .filter_map(|field| {
            let field_name = resolve_string(file, *field)?;
            let source = JavaSource::of(field);
            Some(MqlNode::new(
                source,
                vec![
                    Named::new(name).into(),
                    HasFieldReference::from_schema(source, field_name).into(),
                    HasValueReference::inferred(source, Value::Int32(included), BsonType::Int32).into(),
                ],
            ))
        })
        .collect()
}

/// `group("a", "b").count().as("n").sum("amount").as("total")`
fn parse_group(file: &JavaSourceFile, source: JavaSource, root: &MethodCall, steps: &[MethodCall]) -> MqlNode<JavaSource> {
    let root_source = JavaSource::of(&root.node);
    let keys: Vec<Component<JavaSource>> = root
        .arguments()
        .iter()
        .filter_map(|key| {
            let name = resolve_string(file, *key)?;
            let trimmed = name.trim_start_matches('$');
            Some(
                HasFieldReference::new(FieldReference::FromSchema(
                    FieldName::new(JavaSource::of(key), trimmed).with_display_name(format!("${}", trimmed)),
                ))
                .into(),
            )
        })
        .collect();
    let id_value = if keys.is_empty() {
        HasValueReference::constant(root_source, Value::Null, BsonType::Null)
    } else {
        HasValueReference::computed(root_source, BsonType::Any, MqlNode::new(root_source, keys))
    };

    let mut accumulated = Vec::new();
    let mut index = 0;
    while index < steps.len() {
        let step = &steps[index];
        let alias = steps
            .get(index + 1)
            .filter(|next| next.name(file) == "as");
        let accumulator = match step.name(file) {
            "count" => Some((
                Name::Sum,
                HasValueReference::inferred(JavaSource::of(&step.node), Value::Int32(1), BsonType::Int32),
            )),
            method @ ("sum" | "avg" | "first" | "last" | "max" | "min" | "push" | "addToSet") => Some((
                Name::from_canonical(method),
                step.argument(0)
                    .map(|field| field_path_value(file, field))
                    .unwrap_or_else(HasValueReference::unknown),
            )),
            "as" => None,
            _ => {
                accumulated.push(MqlNode::new(
                    JavaSource::of(&step.node),
                    vec![Named::new(Name::Unknown).into()],
                ));
                None
            }
        };

        if let Some((name, value)) = accumulator {
            let node_source = alias.map_or(step.node, |alias| alias.node);
            accumulated.push(MqlNode::new(
                JavaSource::of(&node_source),
                vec![
                    Named::new(name).into(),
                    computed_key(file, alias.and_then(|alias| alias.argument(0))).into(),
                    value.into(),
                ],
            ));
        }
        index += if alias.is_some() { 2 } else { 1 };
    }

    stage(
        source,
        Name::Group,
        vec![
            HasFieldReference::inferred(root_source, "_id").into(),
            id_value.into(),
            HasAccumulatedFields::new(accumulated).into(),
        ],
    )
}

/// `addFields().addField("a").withValue(1).addFieldWithValue("b", "$c").build()`
fn parse_added_fields(file: &JavaSourceFile, source: JavaSource, steps: &[MethodCall]) -> MqlNode<JavaSource> {
    let mut fields = Vec::new();
    let mut pending: Option<HasFieldReference<JavaSource>> = None;

    for step in steps {
        let arguments = step.arguments();
        let step_source = JavaSource::of(&step.node);
        match (step.name(file), arguments.as_slice()) {
            ("addField", [name]) => pending = Some(computed_key(file, Some(*name))),
            ("withValue", [value]) => {
                let field = pending.take().unwrap_or_else(HasFieldReference::unknown);
                fields.push(MqlNode::new(step_source, vec![field.into(), added_value(file, *value).into()]));
            }
            ("withValueOf", [value]) => {
                let field = pending.take().unwrap_or_else(HasFieldReference::unknown);
                fields.push(MqlNode::new(step_source, vec![field.into(), field_path_value(file, *value).into()]));
            }
            ("addFieldWithValue", [name, value]) => fields.push(MqlNode::new(
                step_source,
                vec![computed_key(file, Some(*name)).into(), added_value(file, *value).into()],
            )),
            ("addFieldWithValueOf", [name, value]) => fields.push(MqlNode::new(
                step_source,
                vec![computed_key(file, Some(*name)).into(), field_path_value(file, *value).into()],
            )),
            _ => {}
        }
    }

    stage(source, Name::AddFields, vec![HasAddedFields::new(fields).into()])
}

fn added_value(file: &JavaSourceFile, value: Node<'_>) -> HasValueReference<JavaSource> {
    match resolve_constant(file, value) {
        Some(constant) => {
            let bson_type = constant.bson_type();
            HasValueReference::constant(JavaSource::of(&value), constant, bson_type)
        }
        None => HasValueReference::unknown(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::java::testing::{names, use_call};
    use crate::mql::components::{HasChildren, ValueReference};
    use pretty_assertions::assert_eq;

    fn parse(pipeline: &str) -> ParsedAggregation {
        let code = format!(
            "import static org.springframework.data.mongodb.core.aggregation.Aggregation.*;\n\
             import static org.springframework.data.mongodb.core.query.Criteria.where;\n\
             class Repo {{ void f() {{ use({}); }} }}",
            pipeline
        );
        let file = JavaSourceFile::parse("Repo.java", code).unwrap();
        let usage = use_call(&file);
        parse_aggregation(&file, usage.argument(0).unwrap()).unwrap()
    }


    #[test]
    fn test_stage_kinds() {
        let parsed = parse(
            "Aggregation.newAggregation(\n\
               match(where(\"status\").is(\"A\").and(\"year\").gt(2000)),\n\
               Aggregation.project(\"title\", \"year\").andExclude(\"_id\"),\n\
               sort(Sort.Direction.DESC, \"year\"),\n\
               unwind(\"tags\"),\n\
               limit(5),\n\
               skip(10L))",
        );
        assert_eq!(parsed.entity, None);
        assert_eq!(
            names(&parsed.stages),
            vec![Name::Match, Name::Project, Name::Sort, Name::Unwind, Name::Limit, Name::Unknown]
        );

        let filter = parsed.stages[0].component::<HasFilter<JavaSource>>().unwrap().children();
        assert_eq!(names(filter), vec![Name::And]);

        let projections = parsed.stages[1].component::<HasProjections<JavaSource>>().unwrap().children();
        assert_eq!(names(projections), vec![Name::Include, Name::Include, Name::Exclude]);

        let sorts = parsed.stages[2].component::<HasSorts<JavaSource>>().unwrap().children();
        assert_eq!(names(sorts), vec![Name::Descending]);

        let unwind = parsed.stages[3].component::<HasFieldReference<JavaSource>>().unwrap();
        assert_eq!(unwind.field_name(), Some("tags"));
        assert_eq!(unwind.field().unwrap().display_name, "$tags");

        assert_eq!(parsed.stages[4].component::<HasLimit>(), Some(&HasLimit::new(5)));
    }

    #[test]
    fn test_typed_aggregations_name_their_entity() {
        let parsed = parse("newAggregation(Book.class, limit(1))");
        assert_eq!(parsed.entity.map(|(entity, _)| entity), Some("Book".to_string()));
        assert_eq!(names(&parsed.stages), vec![Name::Limit]);
    }

    #[test]
    fn test_group_accumulators() {
        let parsed = parse("newAggregation(group(\"author\").count().as(\"books\").sum(\"pages\").as(\"pages\").avg(\"rating\"))");
        let group = &parsed.stages[0];
        assert_eq!(
            group.component::<HasFieldReference<JavaSource>>().unwrap().field_name(),
            Some("_id")
        );
        assert!(matches!(
            group.component::<HasValueReference<JavaSource>>().unwrap().reference,
            ValueReference::Computed(_)
        ));

        let accumulated = group.component::<HasAccumulatedFields<JavaSource>>().unwrap().children();
        assert_eq!(names(accumulated), vec![Name::Sum, Name::Sum, Name::Avg]);
        let keys: Vec<Option<&str>> = accumulated
            .iter()
            .map(|field| field.component::<HasFieldReference<JavaSource>>().unwrap().field_name())
            .collect();
        assert_eq!(keys, vec![Some("books"), Some("pages"), None]);
    }

    #[test]
    fn test_group_without_keys_groups_everything() {
        let parsed = parse("newAggregation(group().count().as(\"total\"))");
        assert_eq!(
            parsed.stages[0].component::<HasValueReference<JavaSource>>().unwrap().value(),
            Some(&Value::Null)
        );
    }

    #[test]
    fn test_added_fields() {
        let parsed = parse(
            "newAggregation(addFields().addField(\"source\").withValue(\"web\").addFieldWithValueOf(\"copy\", \"title\").build())",
        );
        let fields = parsed.stages[0].component::<HasAddedFields<JavaSource>>().unwrap().children();
        assert_eq!(fields.len(), 2);
        assert_eq!(
            fields[0].component::<HasValueReference<JavaSource>>().unwrap().value(),
            Some(&Value::string("web"))
        );
        assert!(matches!(
            fields[1].component::<HasValueReference<JavaSource>>().unwrap().reference,
            ValueReference::Computed(_)
        ));
    }
}
