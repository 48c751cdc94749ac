//! Field usage extraction and ESR ordering.

use std::cmp::Ordering;
use std::collections::HashMap;

use rayon::prelude::*;
use tracing::debug;

use super::consolidation::{CollectionIndexConsolidation, CollectionIndexConsolidationOptions};
use super::{
    IndexSuggestionFieldReason, MongoDbIndex, MongoDbIndexField, SiblingQueriesFinder,
    SortDirection, SuggestedIndex,
};
use crate::mql::components::{CollectionReference, HasCollectionReference, Name, QueryRole};
use crate::mql::parser::components::{
    aggregation_stages, all_nodes_with_schema_field_references, extract_operation,
    extract_value_references_relevant_for_indexing, schema_field_reference,
};
use crate::mql::parser::{AnyError, Parser};
use crate::mql::{BsonType, CollectionSchema, Node, Source, Value};

/// Stateless entry point of the index suggestion.
pub struct IndexAnalyzer;

impl IndexAnalyzer {
    /// Suggests one index for `query`, widened to the best prefix-compatible index of its
    /// sibling queries.
    pub fn analyze<S: Source>(
        query: &Node<S>,
        sibling_queries_finder: &dyn SiblingQueriesFinder<S>,
        options: &CollectionIndexConsolidationOptions,
    ) -> SuggestedIndex<S> {
        let base_index = guess_index_for_query(query);
        let other_indexes: Vec<SuggestedIndex<S>> = sibling_queries_finder
            .all_siblings_of(query)
            .par_iter()
            .map(guess_index_for_query)
            .collect();

        CollectionIndexConsolidation::apply(base_index, other_indexes, options)
    }
}

#[derive(Debug, Clone)]
struct QueryFieldUsage<S> {
    source: S,
    field_name: String,
    field_type: BsonType,
    value: Option<Value>,
    value_type: BsonType,
    role: QueryRole,
    /// Share of sampled documents holding the value
    selectivity: Option<f64>,
    sort_direction: SortDirection,
}

impl<S: Source> QueryFieldUsage<S> {
    /// Between two values for the same field, keeps the one that constrains the index least:
    /// a runtime value wins over a constant, and among runtime values the wider type wins.
    fn least_specific_usage_of(self, other: QueryFieldUsage<S>) -> QueryFieldUsage<S> {
        match (&self.value, &other.value) {
            (None, None) => {
                if self.value_type.cardinality() > other.value_type.cardinality() {
                    self
                } else {
                    other
                }
            }
            (_, None) => other,
            _ => self,
        }
    }

    fn reason(&self) -> IndexSuggestionFieldReason {
        match self.role {
            QueryRole::Sort => IndexSuggestionFieldReason::RoleSort,
            QueryRole::Range => IndexSuggestionFieldReason::RoleRange,
            _ => IndexSuggestionFieldReason::RoleEquality,
        }
    }
}

fn by_role_selectivity_and_cardinality<S>(a: &QueryFieldUsage<S>, b: &QueryFieldUsage<S>) -> Ordering {
    let by_selectivity = || match (a.selectivity, b.selectivity) {
        (Some(first), Some(second)) => second.partial_cmp(&first).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    };

    // sort values are always 1 or -1, only the field type says something about them
    let by_cardinality = || {
        if a.role == QueryRole::Sort && b.role == QueryRole::Sort {
            a.field_type.cardinality().cmp(&b.field_type.cardinality())
        } else {
            a.value_type.cardinality().cmp(&b.value_type.cardinality())
        }
    };

    a.role
        .cmp(&b.role)
        .then_with(by_selectivity)
        .then_with(by_cardinality)
}

fn guess_index_for_query<S: Source>(query: &Node<S>) -> SuggestedIndex<S> {
    let Some(collection_reference) = query.component::<HasCollectionReference<S>>() else {
        debug!("No collection reference, no index can be suggested");
        return SuggestedIndex::NoIndex;
    };

    let schema = match &collection_reference.reference {
        CollectionReference::Unknown => {
            debug!("Unknown collection, no index can be suggested");
            return SuggestedIndex::NoIndex;
        }
        CollectionReference::Known(known) => known.schema.clone(),
        CollectionReference::OnlyCollection(_) => None,
    };

    let fields = consolidated_usages(all_field_usages(query, schema))
        .into_iter()
        .map(|usage| MongoDbIndexField {
            reason: usage.reason(),
            field_name: usage.field_name,
            source: usage.source,
            direction: usage.sort_direction,
        })
        .collect();

    SuggestedIndex::MongoDbIndex(MongoDbIndex {
        collection_reference: collection_reference.clone(),
        fields,
        covered_queries: vec![query.clone()],
        partial_filter_expression: None,
    })
}

/// One usage per field, in first-appearance order, then sorted by ESR precedence.
fn consolidated_usages<S: Source>(usages: Vec<QueryFieldUsage<S>>) -> Vec<QueryFieldUsage<S>> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut grouped: Vec<Vec<QueryFieldUsage<S>>> = Vec::new();
    for usage in usages {
        match positions.get(&usage.field_name) {
            Some(&position) => grouped[position].push(usage),
            None => {
                positions.insert(usage.field_name.clone(), grouped.len());
                grouped.push(vec![usage]);
            }
        }
    }

    let mut consolidated: Vec<QueryFieldUsage<S>> = grouped
        .into_iter()
        .filter_map(|mut usages| {
            usages.sort_by_key(|usage| usage.role);

            let least_specific = usages
                .iter()
                .filter(|usage| matches!(usage.role, QueryRole::Equality | QueryRole::Range))
                .cloned()
                .reduce(QueryFieldUsage::least_specific_usage_of);
            // the code may sort the same field more than once, the last direction wins
            let last_sort = usages
                .iter()
                .rev()
                .find(|usage| usage.role == QueryRole::Sort)
                .cloned();

            let mut usage = usages.into_iter().next()?;
            usage.value = least_specific
                .as_ref()
                .and_then(|usage| usage.value.clone())
                .or_else(|| last_sort.as_ref().and_then(|sort| sort.value.clone()));
            usage.value_type = least_specific
                .as_ref()
                .map(|usage| usage.value_type.clone())
                .or_else(|| last_sort.as_ref().map(|sort| sort.value_type.clone()))
                .unwrap_or(BsonType::Any);
            usage.selectivity = least_specific.and_then(|usage| usage.selectivity);
            usage.sort_direction = last_sort
                .map(|sort| sort.sort_direction)
                .unwrap_or(SortDirection::Ascending);
            Some(usage)
        })
        .collect();

    consolidated.sort_by(by_role_selectivity_and_cardinality);
    consolidated
}

fn field_usage<S: Source>(
    schema: Option<CollectionSchema>,
) -> Parser<Node<S>, AnyError, QueryFieldUsage<S>> {
    extract_operation::<S>()
        .zip(extract_value_references_relevant_for_indexing::<S>())
        .zip(schema_field_reference::<S>())
        .map(move |((named, value), field)| {
            let role = named.name.query_role();
            let field_type = schema
                .as_ref()
                .map(|schema| schema.type_of(&field.field_name))
                .unwrap_or(BsonType::Any);
            let selectivity = match (&schema, &value.value) {
                (Some(schema), Some(constant)) if role != QueryRole::Sort => schema
                    .data_distribution
                    .selectivity_for_path(&field.field_name, constant),
                _ => None,
            };
            let sort_direction = if value.value.as_ref().and_then(Value::as_i64) == Some(-1) {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            };

            QueryFieldUsage {
                source: field.source,
                field_name: field.field_name,
                field_type,
                value: value.value,
                value_type: value.bson_type,
                role,
                selectivity,
                sort_direction,
            }
        })
        .any_error()
}

/// Usages of the first `$match` stage, or of the whole query when it isn't an aggregation.
fn all_field_usages<S: Source>(
    query: &Node<S>,
    schema: Option<CollectionSchema>,
) -> Vec<QueryFieldUsage<S>> {
    let stages = aggregation_stages::<S>().parse(query).unwrap_or_default();
    let indexable_root = match stages.first() {
        None => query.clone(),
        Some(stage) if extract_operation::<S>().parse(stage).map(|n| n.name) == Ok(Name::Match) => {
            stage.clone()
        }
        Some(_) => return Vec::new(),
    };

    all_nodes_with_schema_field_references::<S>()
        .map_many(field_usage(schema).map(Some).recover_error(|_| None))
        .filter_not_none_many()
        .parse(&indexable_root)
        .unwrap_or_default()
        .into_iter()
        .filter(|usage| usage.role != QueryRole::Irrelevant)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexing::NoSiblingQueries;
    use crate::mql::components::{
        CommandType, Component, HasAggregation, HasFieldReference, HasFilter, HasProjections,
        HasSorts, HasValueReference, IsCommand, Named,
    };
    use crate::mql::Namespace;
    use pretty_assertions::assert_eq;

    struct PredefinedSiblings(Vec<Node<()>>);

    impl SiblingQueriesFinder<()> for PredefinedSiblings {
        fn all_siblings_of(&self, _query: &Node<()>) -> Vec<Node<()>> {
            self.0.clone()
        }
    }

    fn options() -> CollectionIndexConsolidationOptions {
        CollectionIndexConsolidationOptions { indexes_soft_limit: 10 }
    }

    fn predicate(name: Name, field: &str, value: impl Into<Value>, bson_type: BsonType) -> Node<()> {
        Node::new(
            (),
            vec![
                Named::new(name).into(),
                HasFieldReference::from_schema((), field).into(),
                HasValueReference::constant((), value, bson_type).into(),
            ],
        )
    }

    fn sort(field: &str, direction: i32) -> Node<()> {
        let name = if direction < 0 { Name::Descending } else { Name::Ascending };
        Node::new(
            (),
            vec![
                Named::new(name).into(),
                HasFieldReference::from_schema((), field).into(),
                HasValueReference::inferred((), direction, BsonType::Int32).into(),
            ],
        )
    }

    fn query(command: CommandType, mut components: Vec<Component<()>>) -> Node<()> {
        components.push(IsCommand::new(command).into());
        components.push(
            HasCollectionReference::known(None, (), Namespace::new("myDb", "myColl")).into(),
        );
        Node::new((), components)
    }

    fn find(filters: Vec<Node<()>>, sorts: Vec<Node<()>>) -> Node<()> {
        query(
            CommandType::FindMany,
            vec![HasFilter::new(filters).into(), HasSorts::new(sorts).into()],
        )
    }

    fn field_names(index: &SuggestedIndex<()>) -> Vec<(String, i32)> {
        index
            .as_mongodb_index()
            .map(|index| {
                index
                    .fields
                    .iter()
                    .map(|field| (field.field_name.clone(), field.direction.as_index_value()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn fields(expected: &[(&str, i32)]) -> Vec<(String, i32)> {
        expected.iter().map(|(name, dir)| (name.to_string(), *dir)).collect()
    }

    #[test]
    fn test_queries_without_collection_get_no_index() {
        let query = Node::new((), vec![]);
        let result = IndexAnalyzer::analyze(&query, &NoSiblingQueries, &options());
        assert_eq!(result, SuggestedIndex::NoIndex);

        let unknown = Node::new((), vec![HasCollectionReference::<()>::unknown().into()]);
        let result = IndexAnalyzer::analyze(&unknown, &NoSiblingQueries, &options());
        assert_eq!(result, SuggestedIndex::NoIndex);
    }

    #[test]
    fn test_single_equality_field() {
        let query = find(vec![predicate(Name::Eq, "myField", 52, BsonType::Int32)], vec![]);
        let result = IndexAnalyzer::analyze(&query, &NoSiblingQueries, &options());

        assert_eq!(field_names(&result), fields(&[("myField", 1)]));
        let index = result.as_mongodb_index().unwrap();
        assert_eq!(index.collection_reference.namespace(), Some(&Namespace::new("myDb", "myColl")));
        assert_eq!(index.covered_queries, vec![query]);
    }

    #[test]
    fn test_low_cardinality_fields_go_first() {
        let query = find(
            vec![
                predicate(Name::Eq, "highCardinality", 52, BsonType::Int32),
                predicate(Name::Eq, "lowCardinality", true, BsonType::Boolean),
            ],
            vec![],
        );
        let result = IndexAnalyzer::analyze(&query, &NoSiblingQueries, &options());
        assert_eq!(
            field_names(&result),
            fields(&[("lowCardinality", 1), ("highCardinality", 1)])
        );
    }

    fn usage(field_name: &str, role: QueryRole) -> QueryFieldUsage<()> {
        QueryFieldUsage {
            source: (),
            field_name: field_name.to_string(),
            field_type: BsonType::Int32,
            value: Some(Value::Int32(1)),
            value_type: BsonType::Int32,
            role,
            selectivity: None,
            sort_direction: SortDirection::Ascending,
        }
    }

    #[test]
    fn test_usages_are_ordered_equality_sort_range() {
        let usages = vec![
            usage("a", QueryRole::Range),
            usage("b", QueryRole::Equality),
            usage("c", QueryRole::Sort),
            usage("d", QueryRole::Equality),
        ];

        let ordered: Vec<(String, QueryRole)> = consolidated_usages(usages)
            .into_iter()
            .map(|usage| (usage.field_name, usage.role))
            .collect();
        assert_eq!(
            ordered,
            vec![
                ("b".to_string(), QueryRole::Equality),
                ("d".to_string(), QueryRole::Equality),
                ("c".to_string(), QueryRole::Sort),
                ("a".to_string(), QueryRole::Range),
            ]
        );
    }

    #[test]
    fn test_equality_then_sort_then_range() {
        let query = find(
            vec![
                predicate(Name::Eq, "myField", 52, BsonType::Int32),
                predicate(Name::Gt, "myRangeField", true, BsonType::Boolean),
            ],
            vec![sort("mySortField", 1)],
        );
        let result = IndexAnalyzer::analyze(&query, &NoSiblingQueries, &options());
        assert_eq!(
            field_names(&result),
            fields(&[("myField", 1), ("mySortField", 1), ("myRangeField", 1)])
        );
        let reasons: Vec<_> = result
            .as_mongodb_index()
            .unwrap()
            .fields
            .iter()
            .map(|field| field.reason)
            .collect();
        assert_eq!(
            reasons,
            vec![
                IndexSuggestionFieldReason::RoleEquality,
                IndexSuggestionFieldReason::RoleSort,
                IndexSuggestionFieldReason::RoleRange,
            ]
        );
    }

    #[test]
    fn test_repeated_fields_are_deduplicated() {
        let query = find(
            vec![
                predicate(Name::Eq, "myField", 52, BsonType::Int32),
                predicate(Name::Eq, "mySecondField", true, BsonType::Boolean),
                predicate(Name::Eq, "myField", 55, BsonType::Int32),
            ],
            vec![],
        );
        let result = IndexAnalyzer::analyze(&query, &NoSiblingQueries, &options());
        assert_eq!(
            field_names(&result),
            fields(&[("mySecondField", 1), ("myField", 1)])
        );
    }

    #[test]
    fn test_repeated_fields_take_their_most_important_role() {
        let query = find(
            vec![
                predicate(Name::Eq, "myField", 52, BsonType::Int32),
                predicate(Name::Gt, "mySecondField", 12, BsonType::Int32),
            ],
            vec![sort("mySecondField", -1)],
        );
        let result = IndexAnalyzer::analyze(&query, &NoSiblingQueries, &options());
        assert_eq!(
            field_names(&result),
            fields(&[("myField", 1), ("mySecondField", -1)])
        );
    }

    #[test]
    fn test_only_the_leading_match_stage_is_indexed() {
        let stage = |filters: Vec<Node<()>>| {
            Node::new(
                (),
                vec![Named::new(Name::Match).into(), HasFilter::new(filters).into()],
            )
        };
        let query = query(
            CommandType::Aggregate,
            vec![HasAggregation::new(vec![
                stage(vec![predicate(Name::Eq, "myField", 52, BsonType::Int32)]),
                stage(vec![predicate(Name::Eq, "myIgnoredField", 52, BsonType::Int32)]),
            ])
            .into()],
        );
        let result = IndexAnalyzer::analyze(&query, &NoSiblingQueries, &options());
        assert_eq!(field_names(&result), fields(&[("myField", 1)]));
    }

    #[test]
    fn test_pipelines_not_starting_with_match_suggest_an_empty_index() {
        let project = Node::new(
            (),
            vec![
                Named::new(Name::Project).into(),
                HasProjections::new(vec![predicate(Name::Include, "projectedField", 1, BsonType::Int32)])
                    .into(),
            ],
        );
        let query = query(
            CommandType::Aggregate,
            vec![HasAggregation::new(vec![project]).into()],
        );
        let result = IndexAnalyzer::analyze(&query, &NoSiblingQueries, &options());
        assert!(result.as_mongodb_index().is_some());
        assert_eq!(field_names(&result), vec![]);
    }

    #[test]
    fn test_sibling_with_more_fields_wins() {
        let sibling = find(
            vec![
                predicate(Name::Eq, "myField", 52, BsonType::Int32),
                predicate(Name::Gt, "mySecondField", 12, BsonType::Int32),
            ],
            vec![],
        );
        let unrelated = find(vec![predicate(Name::Eq, "otherField", 1, BsonType::Int32)], vec![]);
        let query = find(vec![predicate(Name::Eq, "myField", 52, BsonType::Int32)], vec![]);

        let siblings = PredefinedSiblings(vec![sibling.clone(), unrelated]);
        let result = IndexAnalyzer::analyze(&query, &siblings, &options());

        assert_eq!(
            field_names(&result),
            fields(&[("myField", 1), ("mySecondField", 1)])
        );
        let covered = &result.as_mongodb_index().unwrap().covered_queries;
        assert_eq!(covered.len(), 2);
        assert!(covered.contains(&query));
        assert!(covered.contains(&sibling));
    }
}
