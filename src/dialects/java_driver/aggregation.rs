//! `Aggregates.*` stages and the `Projections`, `Sorts` and `Accumulators` builders they take.

use tree_sitter::Node;

use super::filters::parse_filter_argument;
use crate::dialects::java::constants::{
    iterable_elements, resolve_constant, resolve_field_as_value, resolve_string, resolve_to_call,
    resolve_u32, varargs_or_iterable,
};
use crate::dialects::java::tree::{find_declaration, meaningful_expression, named_children, MethodCall};
use crate::dialects::java::{JavaSource, JavaSourceFile};
use crate::mql::components::{
    Component, FieldName, FieldReference, HasAccumulatedFields, HasAddedFields, HasFieldReference,
    HasFilter, HasLimit, HasProjections, HasSorts, HasValueReference, Name, Named,
};
use crate::mql::{BsonType, Node as MqlNode, Value};

const AGGREGATES: &str = "Aggregates";
const PROJECTIONS: &str = "Projections";
pub(super) const SORTS: &str = "Sorts";
const ACCUMULATORS: &str = "Accumulators";

/// Stages of a pipeline argument. Elements that are not `Aggregates` calls are skipped.
pub(super) fn parse_pipeline(file: &JavaSourceFile, expression: Node<'_>) -> Vec<MqlNode<JavaSource>> {
    iterable_elements(file, expression)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|element| {
            resolve_to_call(file, element, &|call| call.is_static_call_on(file, AGGREGATES))
        })
        .filter_map(|stage| parse_stage(file, &stage))
        .collect()
}

fn stage(source: JavaSource, name: Name, components: Vec<Component<JavaSource>>) -> MqlNode<JavaSource> {
    let mut all = vec![Named::new(name).into()];
    all.extend(components);
    MqlNode::new(source, all)
}

fn parse_stage(file: &JavaSourceFile, call: &MethodCall) -> Option<MqlNode<JavaSource>> {
    let source = JavaSource::of(&call.node);
    let arguments = call.arguments();

    let node = match call.name(file) {
        "match" => stage(
            source,
            Name::Match,
            vec![HasFilter::new(
                arguments
                    .first()
                    .and_then(|filter| parse_filter_argument(file, *filter))
                    .into_iter()
                    .collect(),
            )
            .into()],
        ),
        "project" => stage(
            source,
            Name::Project,
            vec![HasProjections::new(builder_argument(file, arguments.first(), PROJECTIONS)).into()],
        ),
        "sort" => stage(
            source,
            Name::Sort,
            vec![HasSorts::new(builder_argument(file, arguments.first(), SORTS)).into()],
        ),
        "group" => {
            let key = arguments.first()?;
            let accumulators = match &arguments[1..] {
                [single] => iterable_elements(file, *single).unwrap_or_else(|| vec![*single]),
                rest => rest.to_vec(),
            };
            stage(
                source,
                Name::Group,
                vec![
                    HasFieldReference::inferred(JavaSource::of(key), "_id").into(),
                    resolve_field_as_value(file, *key).into(),
                    HasAccumulatedFields::new(
                        accumulators
                            .into_iter()
                            .filter_map(|accumulator| {
                                resolve_to_call(file, accumulator, &|call| {
                                    call.is_static_call_on(file, ACCUMULATORS)
                                })
                            })
                            .filter_map(|accumulator| parse_accumulator(file, &accumulator))
                            .collect(),
                    )
                    .into(),
                ],
            )
        }
        "addFields" => stage(
            source,
            Name::AddFields,
            vec![HasAddedFields::new(
                varargs_or_iterable(file, call)
                    .into_iter()
                    .filter_map(|field| new_field_expression(file, field, 0))
                    .map(|field| parse_added_field(file, field))
                    .collect(),
            )
            .into()],
        ),
        "unwind" => match arguments.first() {
            None => stage(source, Name::Unwind, vec![]),
            Some(field) => {
                let reference = match resolve_string(file, *field) {
                    Some(path) => HasFieldReference::new(FieldReference::FromSchema(
                        FieldName::new(JavaSource::of(field), path.trim_start_matches('$'))
                            .with_display_name(path.clone()),
                    )),
                    None => HasFieldReference::unknown(),
                };
                stage(source, Name::Unwind, vec![reference.into()])
            }
        },
        "limit" => {
            let limit = arguments.first().and_then(|limit| resolve_u32(file, *limit));
            stage(
                source,
                Name::Limit,
                limit.map(|limit| HasLimit::new(limit).into()).into_iter().collect(),
            )
        }
        _ => stage(source, Name::Unknown, vec![]),
    };
    Some(node)
}

fn builder_argument(file: &JavaSourceFile, argument: Option<&Node<'_>>, class: &str) -> Vec<MqlNode<JavaSource>> {
    argument
        .and_then(|argument| resolve_to_call(file, *argument, &|call| call.is_static_call_on(file, class)))
        .map(|builder| parse_projection_like(file, &builder, class))
        .unwrap_or_default()
}

/// `include/exclude/fields` of `Projections` and `ascending/descending/orderBy` of `Sorts`:
/// one node per field, valued 1, 0 or -1.
pub(super) fn parse_projection_like(file: &JavaSourceFile, call: &MethodCall, class: &str) -> Vec<MqlNode<JavaSource>> {
    let method = call.name(file);
    match method {
        "fields" | "orderBy" => varargs_or_iterable(file, call)
            .into_iter()
            .filter_map(|nested| resolve_to_call(file, nested, &|call| call.is_static_call_on(file, class)))
            .flat_map(|nested| parse_projection_like(file, &nested, class))
            .collect(),
        "include" | "exclude" | "ascending" | "descending" => {
            let name = Name::from_canonical(method);
            let direction = match name {
                Name::Include | Name::Ascending => 1,
                Name::Exclude => 0,
                _ => -1,
            };
            varargs_or_iterable(file, call)
                .into_iter()
                .filter_map(|field| {
                    let field_name = resolve_string(file, field)?;
                    let source = JavaSource::of(&field);
                    Some(MqlNode::new(
                        source,
                        vec![
                            Named::new(name).into(),
                            HasFieldReference::from_schema(source, field_name).into(),
                            HasValueReference::inferred(source, Value::Int32(direction), BsonType::Int32).into(),
                        ],
                    ))
                })
                .collect()
        }
        _ => vec![MqlNode::new(JavaSource::of(&call.node), vec![Named::new(Name::Unknown).into()])],
    }
}

fn computed_key(file: &JavaSourceFile, key: Node<'_>) -> HasFieldReference<JavaSource> {
    match resolve_string(file, key) {
        Some(name) => HasFieldReference::computed(JavaSource::of(&key), name),
        None => HasFieldReference::unknown(),
    }
}

fn parse_accumulator(file: &JavaSourceFile, call: &MethodCall) -> Option<MqlNode<JavaSource>> {
    let source = JavaSource::of(&call.node);
    let name = Name::from_canonical(call.name(file));
    let arguments = call.arguments();

    match name {
        Name::Sum | Name::Avg | Name::First | Name::Last | Name::Max | Name::Min | Name::Push
        | Name::AddToSet => {
            let [key, value, ..] = arguments.as_slice() else {
                return None;
            };
            Some(MqlNode::new(
                source,
                vec![
                    Named::new(name).into(),
                    computed_key(file, *key).into(),
                    resolve_field_as_value(file, *value).into(),
                ],
            ))
        }
        Name::Top | Name::TopN | Name::Bottom | Name::BottomN => {
            let [key, sort, value, rest @ ..] = arguments.as_slice() else {
                return None;
            };
            let sort = resolve_to_call(file, *sort, &|call| call.is_static_call_on(file, SORTS))?;
            let mut components = vec![
                Named::new(name).into(),
                computed_key(file, *key).into(),
                HasSorts::new(parse_projection_like(file, &sort, SORTS)).into(),
                resolve_field_as_value(file, *value).into(),
            ];
            if let Some(limit) = rest.first().and_then(|limit| resolve_u32(file, *limit)) {
                components.push(HasLimit::new(limit).into());
            }
            Some(MqlNode::new(source, components))
        }
        _ => Some(MqlNode::new(source, vec![Named::new(Name::Unknown).into()])),
    }
}

/// `new Field<>(name, value)`, directly or through a variable.
fn new_field_expression<'t>(file: &JavaSourceFile, expression: Node<'t>, depth: usize) -> Option<Node<'t>> {
    if depth > 16 {
        return None;
    }
    let expression = meaningful_expression(expression);
    match expression.kind() {
        "object_creation_expression" => {
            let type_name = file.text(&expression.child_by_field_name("type")?);
            let erased = type_name.split('<').next().unwrap_or(type_name);
            (erased.rsplit('.').next() == Some("Field")).then_some(expression)
        }
        "identifier" => {
            let declaration = find_declaration(file, expression)?;
            new_field_expression(file, declaration.initializer?, depth + 1)
        }
        _ => None,
    }
}

fn parse_added_field(file: &JavaSourceFile, field: Node<'_>) -> MqlNode<JavaSource> {
    let arguments = field
        .child_by_field_name("arguments")
        .map(named_children)
        .unwrap_or_default();

    let field_reference = arguments
        .first()
        .and_then(|name| {
            resolve_string(file, *name).map(|resolved| HasFieldReference::computed(JavaSource::of(name), resolved))
        })
        .unwrap_or_else(HasFieldReference::unknown);

    // only constants are understood as values
    let value_reference = arguments
        .get(1)
        .and_then(|value| {
            resolve_constant(file, *value).map(|constant| {
                let bson_type = constant.bson_type();
                HasValueReference::constant(JavaSource::of(value), constant, bson_type)
            })
        })
        .unwrap_or_else(HasValueReference::unknown);

    MqlNode::new(JavaSource::of(&field), vec![field_reference.into(), value_reference.into()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::java::testing::{names, use_call};
    use crate::mql::components::{HasChildren, ValueReference};
    use pretty_assertions::assert_eq;

    fn pipeline(prelude: &str, argument: &str) -> Vec<MqlNode<JavaSource>> {
        let file = JavaSourceFile::parse(
            "Repo.java",
            format!(
                "import static com.mongodb.client.model.Accumulators.*;\n\
                 class Repo {{ void f(int n) {{ {} use({}); }} }}",
                prelude, argument
            ),
        )
        .unwrap();
        let usage = use_call(&file);
        parse_pipeline(&file, usage.argument(0).unwrap())
    }

    #[test]
    fn test_stage_kinds() {
        let stages = pipeline(
            "",
            "List.of(\n\
               Aggregates.match(Filters.eq(\"status\", \"A\")),\n\
               Aggregates.sort(Sorts.orderBy(Sorts.ascending(\"a\"), Sorts.descending(\"b\"))),\n\
               Aggregates.project(Projections.fields(Projections.include(\"a\"), Projections.exclude(\"_id\"))),\n\
               Aggregates.unwind(\"$tags\"),\n\
               Aggregates.limit(10),\n\
               Aggregates.sample(3))",
        );
        assert_eq!(
            names(&stages),
            vec![Name::Match, Name::Sort, Name::Project, Name::Unwind, Name::Limit, Name::Unknown]
        );

        let sorts = stages[1].component::<HasSorts<JavaSource>>().unwrap().children();
        let directions: Vec<_> = sorts
            .iter()
            .map(|sort| sort.component::<HasValueReference<JavaSource>>().unwrap().value().cloned())
            .collect();
        assert_eq!(directions, vec![Some(Value::Int32(1)), Some(Value::Int32(-1))]);

        let projections = stages[2].component::<HasProjections<JavaSource>>().unwrap().children();
        assert_eq!(projections.len(), 2);

        let unwind = stages[3].component::<HasFieldReference<JavaSource>>().unwrap();
        assert_eq!(unwind.field_name(), Some("tags"));
        assert_eq!(unwind.field().unwrap().display_name, "$tags");

        assert_eq!(stages[4].component::<HasLimit>(), Some(&HasLimit::new(10)));
    }

    #[test]
    fn test_pipelines_through_variables() {
        assert!(pipeline("", "new ArrayList<>()").is_empty());
        assert!(pipeline("", "Collections.emptyList()").is_empty());

        let stages = pipeline(
            "List<Bson> stages = Arrays.asList(Aggregates.limit(n));",
            "stages",
        );
        assert_eq!(names(&stages), vec![Name::Limit]);
        assert!(!stages[0].has_component::<HasLimit>());
    }

    #[test]
    fn test_group_with_accumulators() {
        let stages = pipeline(
            "",
            "List.of(Aggregates.group(\"$author\", sum(\"total\", \"$pages\"), topN(\"best\", Sorts.descending(\"rating\"), \"$title\", 3)))",
        );
        let group = &stages[0];
        assert!(matches!(
            group.component::<HasFieldReference<JavaSource>>().unwrap().reference,
            FieldReference::Inferred(ref id) if id.field_name == "_id"
        ));
        assert!(matches!(
            group.component::<HasValueReference<JavaSource>>().unwrap().reference,
            ValueReference::Computed(_)
        ));

        let accumulators = group.component::<HasAccumulatedFields<JavaSource>>().unwrap().children();
        assert_eq!(names(accumulators), vec![Name::Sum, Name::TopN]);
        assert_eq!(
            accumulators[0].component::<HasFieldReference<JavaSource>>().unwrap().field_name(),
            Some("total")
        );
        assert_eq!(accumulators[1].component::<HasLimit>(), Some(&HasLimit::new(3)));
        assert_eq!(
            accumulators[1].component::<HasSorts<JavaSource>>().unwrap().children().len(),
            1
        );
    }

    #[test]
    fn test_add_fields() {
        let stages = pipeline(
            "Field<String> flag = new Field<>(\"flag\", \"on\");",
            "List.of(Aggregates.addFields(new Field<>(\"year\", 2024), flag))",
        );
        let added = stages[0].component::<HasAddedFields<JavaSource>>().unwrap().children();
        assert_eq!(added.len(), 2);
        assert_eq!(
            added[0].component::<HasFieldReference<JavaSource>>().unwrap().field_name(),
            Some("year")
        );
        assert_eq!(
            added[1].component::<HasValueReference<JavaSource>>().unwrap().value(),
            Some(&Value::string("on"))
        );
    }
}
