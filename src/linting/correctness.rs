//! Rules about queries that can't match what is stored

use std::sync::Arc;

use tracing::debug;

use super::{LiveCluster, QueryInsight, QueryInsightsHolder, QueryInspection, Inspection};
use crate::access::{DataSource, GetCollectionSchema, ReadModelProvider};
use crate::dialects::mongosh::MongoshDialect;
use crate::dialects::DialectFormatter;
use crate::mql::components::{FieldReference, HasFieldReference, HasProjections, Name, Named};
use crate::mql::parser::components::{
    aggregation_stages, all_nodes_with_schema_field_references,
    extract_user_provided_value_references, known_collection, schema_field_reference,
};
use crate::mql::{BsonType, CollectionSchema, Node, Source};

/// Names of nodes whose value is a direction or a projection flag, not a field value.
const NOT_A_FIELD_VALUE: [Name; 5] = [
    Name::Sort,
    Name::Ascending,
    Name::Descending,
    Name::Include,
    Name::Exclude,
];

pub type TypeFormatter = Arc<dyn Fn(&BsonType) -> String + Send + Sync>;

/// Sampled schema of the query's collection, when it is known and exists.
fn collection_schema<S, D, P>(
    cluster: &LiveCluster<D, P>,
    query: &Node<S>,
    sample_size: u32,
) -> Option<CollectionSchema>
where
    S: Source,
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    let known = known_collection::<S>().parse(query).ok()?;
    if !cluster.namespace_exists(&known.namespace) {
        return None;
    }

    match cluster.slice(&GetCollectionSchema::new(known.namespace.clone(), sample_size)) {
        Ok(schema) => Some(schema),
        Err(error) => {
            debug!("No schema for {}: {}", known.namespace, error);
            None
        }
    }
}

pub struct FieldDoesNotExistInspection<D: ?Sized, P> {
    cluster: LiveCluster<D, P>,
    sample_size: u32,
}

impl<D: ?Sized, P> FieldDoesNotExistInspection<D, P> {
    pub fn new(cluster: LiveCluster<D, P>, sample_size: u32) -> Self {
        Self {
            cluster,
            sample_size,
        }
    }
}

impl<S, D, P> QueryInspection<S> for FieldDoesNotExistInspection<D, P>
where
    S: Source,
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    fn inspection(&self) -> Inspection {
        Inspection::FieldDoesNotExist
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        let Some(schema) = collection_schema(&self.cluster, query, self.sample_size) else {
            return;
        };

        let nodes = all_nodes_with_schema_field_references::<S>()
            .parse(query)
            .unwrap_or_default();
        for field in nodes
            .iter()
            .filter_map(|node| schema_field_reference::<S>().parse(node).ok())
        {
            if schema.type_of(&field.field_name) == BsonType::Null {
                holder.register(QueryInsight::field_does_not_exist(
                    query,
                    field.source.clone(),
                    &field.field_name,
                ));
            }
        }
    }
}

/// Values compared against a field of a different stored type.
pub struct TypeMismatchInspection<D: ?Sized, P> {
    cluster: LiveCluster<D, P>,
    sample_size: u32,
    type_formatter: TypeFormatter,
}

impl<D: ?Sized, P> TypeMismatchInspection<D, P> {
    /// Types are named as mongosh names them.
    pub fn new(cluster: LiveCluster<D, P>, sample_size: u32) -> Self {
        Self::with_type_formatter(
            cluster,
            sample_size,
            Arc::new(|bson_type: &BsonType| {
                <MongoshDialect as DialectFormatter<()>>::format_type(&MongoshDialect, bson_type)
            }),
        )
    }

    pub fn with_type_formatter(
        cluster: LiveCluster<D, P>,
        sample_size: u32,
        type_formatter: TypeFormatter,
    ) -> Self {
        Self {
            cluster,
            sample_size,
            type_formatter,
        }
    }
}

impl<S, D, P> QueryInspection<S> for TypeMismatchInspection<D, P>
where
    S: Source,
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    fn inspection(&self) -> Inspection {
        Inspection::TypeMismatch
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        let Some(schema) = collection_schema(&self.cluster, query, self.sample_size) else {
            return;
        };

        let nodes = all_nodes_with_schema_field_references::<S>()
            .parse(query)
            .unwrap_or_default();
        let value_references = extract_user_provided_value_references::<S>();

        for node in nodes.iter().filter(|node| {
            !matches!(node.component::<Named>(), Some(named) if NOT_A_FIELD_VALUE.contains(&named.name))
        }) {
            let (Ok(field), Ok(value)) = (
                schema_field_reference::<S>().parse(node),
                value_references.parse(node),
            ) else {
                continue;
            };

            let field_type = schema.type_of(&field.field_name);
            if field_type == BsonType::Null || value.bson_type.is_assignable_to(&field_type) {
                continue;
            }

            holder.register(QueryInsight::type_mismatch(
                query,
                value.source,
                &field.field_name,
                (self.type_formatter)(&field_type),
                (self.type_formatter)(&value.bson_type),
            ));
        }
    }
}

/// `$project` stages can't mix inclusions and exclusions, except for `_id`.
pub struct InvalidProjectionInspection;

impl<S: Source> QueryInspection<S> for InvalidProjectionInspection {
    fn inspection(&self) -> Inspection {
        Inspection::InvalidProjection
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        let stages = aggregation_stages::<S>().parse(query).unwrap_or_default();
        let projections = stages
            .iter()
            .filter(|stage| stage.component::<Named>().map(|named| named.name) == Some(Name::Project))
            .filter_map(|stage| stage.component::<HasProjections<S>>());

        for projection in projections {
            let mut included = Vec::new();
            let mut excluded = Vec::new();
            for child in &projection.children {
                let field = match child.component::<HasFieldReference<S>>().map(|f| &f.reference) {
                    Some(FieldReference::FromSchema(field)) if field.field_name != "_id" => field,
                    _ => continue,
                };
                match child.component::<Named>().map(|named| named.name) {
                    Some(Name::Include) => included.push(field),
                    Some(Name::Exclude) => excluded.push(field),
                    _ => {}
                }
            }

            if included.is_empty() || excluded.is_empty() {
                continue;
            }
            for field in included {
                holder.register(QueryInsight::invalid_projection(
                    query,
                    field.source.clone(),
                    &field.field_name,
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::testing::StubDriver;
    use crate::access::QueryResult;
    use crate::linting::testing::{self, run};
    use crate::mql::components::{
        CommandType, HasAggregation, HasCollectionReference, HasFilter, HasSorts,
        HasValueReference, IsCommand,
    };
    use crate::mql::{Namespace, Value};
    use pretty_assertions::assert_eq;

    fn books() -> Namespace {
        Namespace::new("library", "books")
    }

    fn sampled_books() -> StubDriver {
        StubDriver::new().answering(
            "find",
            QueryResult::Run(Value::Array(vec![
                Value::document([("title", Value::string("Dune")), ("pages", Value::Int32(412))]),
                Value::document([("title", Value::string("Emma")), ("pages", Value::Int32(474))]),
            ])),
        )
    }

    fn predicate(source: &'static str, field: &str, value: HasValueReference<&'static str>) -> Node<&'static str> {
        Node::new(
            source,
            vec![
                Named::new(Name::Eq).into(),
                HasFieldReference::from_schema(source, field).into(),
                value.into(),
            ],
        )
    }

    fn find(namespace: Namespace, filters: Vec<Node<&'static str>>) -> Node<&'static str> {
        Node::new(
            "query",
            vec![
                IsCommand::new(CommandType::FindMany).into(),
                HasCollectionReference::known(Some("db"), "coll", namespace).into(),
                HasFilter::new(filters).into(),
            ],
        )
    }

    #[test]
    fn test_flags_fields_missing_from_the_schema() {
        let cluster = testing::cluster(&[books()], sampled_books());
        let query = find(
            books(),
            vec![
                predicate("title", "title", HasValueReference::constant("v1", "Dune", BsonType::String)),
                predicate("author", "author", HasValueReference::runtime("v2", BsonType::String)),
            ],
        );

        let holder = run(&FieldDoesNotExistInspection::new(cluster, 50), &query);

        assert_eq!(holder.len(), 1);
        let insight = &holder.insights()[0];
        assert_eq!(insight.source, "author");
        assert_eq!(insight.description, "insight.field-does-not-exist");
        assert_eq!(insight.description_arguments, vec!["author".to_string()]);
    }

    #[test]
    fn test_unknown_namespaces_are_not_checked() {
        let cluster = testing::cluster(&[books()], sampled_books());
        let query = find(
            Namespace::new("library", "magazines"),
            vec![predicate("author", "author", HasValueReference::runtime("v", BsonType::String))],
        );

        let holder = run(&FieldDoesNotExistInspection::new(cluster, 50), &query);
        assert!(holder.is_empty());
    }

    #[test]
    fn test_flags_values_of_the_wrong_type() {
        let cluster = testing::cluster(&[books()], sampled_books());
        let query = find(
            books(),
            vec![
                predicate("pages", "pages", HasValueReference::constant("value", "many", BsonType::String)),
                predicate("title", "title", HasValueReference::constant("ok", "Dune", BsonType::String)),
            ],
        );

        let holder = run(&TypeMismatchInspection::new(cluster, 50), &query);

        assert_eq!(holder.len(), 1);
        let insight = &holder.insights()[0];
        assert_eq!(insight.source, "value");
        assert_eq!(
            insight.description_arguments,
            vec!["pages".to_string(), "int".to_string(), "string".to_string()]
        );
    }

    #[test]
    fn test_compatible_and_directional_values_are_not_mismatches() {
        let cluster = testing::cluster(&[books()], sampled_books());
        let sort = Node::new(
            "sort",
            vec![
                Named::new(Name::Ascending).into(),
                HasFieldReference::from_schema("sort", "title").into(),
                HasValueReference::inferred("sort", 1, BsonType::Int32).into(),
            ],
        );
        let query = find(
            books(),
            vec![
                predicate("pages", "pages", HasValueReference::constant("long", 10_i64, BsonType::Int64)),
                predicate(
                    "in",
                    "pages",
                    HasValueReference::constant("in", Value::Array(vec![]), BsonType::array(BsonType::Int32)),
                ),
            ],
        )
        .with(HasSorts::new(vec![sort]));

        let holder = run(&TypeMismatchInspection::new(cluster, 50), &query);

        // Int64 is not assignable to Int32
        assert_eq!(holder.len(), 1);
        assert_eq!(holder.insights()[0].source, "long");
    }

    fn projected(name: Name, field: &'static str) -> Node<&'static str> {
        Node::new(
            field,
            vec![
                Named::new(name).into(),
                HasFieldReference::from_schema(field, field).into(),
                HasValueReference::inferred(field, 1, BsonType::Int32).into(),
            ],
        )
    }

    fn aggregate(projections: Vec<Node<&'static str>>) -> Node<&'static str> {
        Node::new(
            "query",
            vec![
                IsCommand::new(CommandType::Aggregate).into(),
                HasAggregation::new(vec![Node::new(
                    "project",
                    vec![
                        Named::new(Name::Project).into(),
                        HasProjections::new(projections).into(),
                    ],
                )])
                .into(),
            ],
        )
    }

    #[test]
    fn test_flags_inclusions_in_exclusion_projections() {
        let query = aggregate(vec![
            projected(Name::Include, "title"),
            projected(Name::Include, "_id"),
            projected(Name::Exclude, "pages"),
        ]);

        let holder = run(&InvalidProjectionInspection, &query);

        assert_eq!(holder.len(), 1);
        assert_eq!(holder.insights()[0].source, "title");
    }

    #[test]
    fn test_id_may_be_excluded_from_inclusion_projections() {
        let query = aggregate(vec![
            projected(Name::Include, "title"),
            projected(Name::Exclude, "_id"),
        ]);

        let holder = run(&InvalidProjectionInspection, &query);
        assert!(holder.is_empty());
    }
}
