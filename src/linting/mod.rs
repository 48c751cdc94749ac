//! Linting: small independent rules that report insights about a query
//!
//! Rules never fail. Facts they can't fetch from the cluster mean the rule does not
//! apply. Every rule registers its findings into a [`QueryInsightsHolder`], which
//! drops duplicates.
//!
//! This module is organized into focused sub-modules:
//! - correctness: fields that don't exist, type mismatches, invalid projections
//! - environment: databases and collections missing from the connected cluster
//! - performance: queries without filters or without a usable index
mod correctness;
mod environment;
mod performance;

pub use correctness::{FieldDoesNotExistInspection, InvalidProjectionInspection, TypeMismatchInspection};
pub use environment::{
    CollectionDoesNotExistInspection, DatabaseDoesNotExistInspection,
    NoCollectionSpecifiedInspection, NoDatabaseInferredInspection,
};
pub use performance::{
    NotUsingFiltersInspection, NotUsingIndexEffectivelyInspection, NotUsingIndexInspection,
};

use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::access::{AccessError, DataSource, ListCollections, ListDatabases, ReadModelProvider, Slice};
use crate::config::AnalysisSettings;
use crate::mql::{Namespace, Node, Source};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InspectionCategory {
    Performance,
    Correctness,
    EnvironmentMismatch,
}

/// What the user is offered to fix an insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InspectionAction {
    NoAction,
    RunQuery,
    CreateIndexSuggestionScript,
    ChooseConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Inspection {
    NotUsingIndex,
    NotUsingIndexEffectively,
    NotUsingFilters,
    FieldDoesNotExist,
    TypeMismatch,
    InvalidProjection,
    DatabaseDoesNotExist,
    CollectionDoesNotExist,
    NoDatabaseInferred,
    NoCollectionSpecified,
}

impl Inspection {
    pub const ALL: [Inspection; 10] = [
        Inspection::NotUsingIndex,
        Inspection::NotUsingIndexEffectively,
        Inspection::NotUsingFilters,
        Inspection::FieldDoesNotExist,
        Inspection::TypeMismatch,
        Inspection::InvalidProjection,
        Inspection::DatabaseDoesNotExist,
        Inspection::CollectionDoesNotExist,
        Inspection::NoDatabaseInferred,
        Inspection::NoCollectionSpecified,
    ];

    pub fn category(&self) -> InspectionCategory {
        match self {
            Inspection::NotUsingIndex
            | Inspection::NotUsingIndexEffectively
            | Inspection::NotUsingFilters => InspectionCategory::Performance,
            Inspection::FieldDoesNotExist
            | Inspection::TypeMismatch
            | Inspection::InvalidProjection => InspectionCategory::Correctness,
            Inspection::DatabaseDoesNotExist
            | Inspection::CollectionDoesNotExist
            | Inspection::NoDatabaseInferred
            | Inspection::NoCollectionSpecified => InspectionCategory::EnvironmentMismatch,
        }
    }

    pub fn primary_action(&self) -> InspectionAction {
        match self {
            Inspection::NotUsingIndex | Inspection::NotUsingIndexEffectively => {
                InspectionAction::CreateIndexSuggestionScript
            }
            Inspection::FieldDoesNotExist | Inspection::TypeMismatch => InspectionAction::RunQuery,
            Inspection::DatabaseDoesNotExist
            | Inspection::CollectionDoesNotExist
            | Inspection::NoDatabaseInferred
            | Inspection::NoCollectionSpecified => InspectionAction::ChooseConnection,
            Inspection::NotUsingFilters | Inspection::InvalidProjection => InspectionAction::NoAction,
        }
    }
}

/// A finding about a query, attached to the source element it is about.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryInsight<S> {
    pub query: Node<S>,
    pub source: S,
    /// Message key, the arguments fill its placeholders
    pub description: &'static str,
    pub description_arguments: Vec<String>,
    pub inspection: Inspection,
}

impl<S: Source> QueryInsight<S> {
    fn new(
        query: &Node<S>,
        source: S,
        inspection: Inspection,
        description: &'static str,
        description_arguments: Vec<String>,
    ) -> Self {
        Self {
            query: query.clone(),
            source,
            description,
            description_arguments,
            inspection,
        }
    }

    pub fn not_using_index(query: &Node<S>) -> Self {
        Self::new(query, query.source.clone(), Inspection::NotUsingIndex, "insight.not-using-index", vec![])
    }

    pub fn not_using_index_effectively(query: &Node<S>) -> Self {
        Self::new(
            query,
            query.source.clone(),
            Inspection::NotUsingIndexEffectively,
            "insight.not-using-index-effectively",
            vec![],
        )
    }

    pub fn not_using_filters(query: &Node<S>) -> Self {
        Self::new(
            query,
            query.source.clone(),
            Inspection::NotUsingFilters,
            "insight.not-using-filters",
            vec![],
        )
    }

    pub fn field_does_not_exist(query: &Node<S>, source: S, field: &str) -> Self {
        Self::new(
            query,
            source,
            Inspection::FieldDoesNotExist,
            "insight.field-does-not-exist",
            vec![field.to_string()],
        )
    }

    pub fn type_mismatch(query: &Node<S>, source: S, field: &str, field_type: String, value_type: String) -> Self {
        Self::new(
            query,
            source,
            Inspection::TypeMismatch,
            "insight.type-mismatch",
            vec![field.to_string(), field_type, value_type],
        )
    }

    pub fn invalid_projection(query: &Node<S>, source: S, field: &str) -> Self {
        Self::new(
            query,
            source,
            Inspection::InvalidProjection,
            "insight.invalid-inclusion-in-exclusion-projection",
            vec![field.to_string()],
        )
    }

    pub fn database_does_not_exist(query: &Node<S>, source: S, database: &str) -> Self {
        Self::new(
            query,
            source,
            Inspection::DatabaseDoesNotExist,
            "insight.database-does-not-exist",
            vec![database.to_string()],
        )
    }

    pub fn collection_does_not_exist(query: &Node<S>, source: S, namespace: &Namespace) -> Self {
        Self::new(
            query,
            source,
            Inspection::CollectionDoesNotExist,
            "insight.collection-does-not-exist",
            vec![namespace.collection.clone(), namespace.database.clone()],
        )
    }

    pub fn no_database_inferred(query: &Node<S>, source: S) -> Self {
        Self::new(
            query,
            source,
            Inspection::NoDatabaseInferred,
            "insight.no-database-inferred",
            vec![],
        )
    }

    pub fn no_collection_specified(query: &Node<S>) -> Self {
        Self::new(
            query,
            query.source.clone(),
            Inspection::NoCollectionSpecified,
            "insight.no-collection-specified",
            vec![],
        )
    }
}

/// Collects insights. An insight with the same inspection, source and arguments as a
/// registered one is dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryInsightsHolder<S> {
    insights: Vec<QueryInsight<S>>,
}

impl<S> Default for QueryInsightsHolder<S> {
    fn default() -> Self {
        Self {
            insights: Vec::new(),
        }
    }
}

impl<S: Source> QueryInsightsHolder<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, insight: QueryInsight<S>) {
        let duplicate = self.insights.iter().any(|registered| {
            registered.inspection == insight.inspection
                && registered.source == insight.source
                && registered.description_arguments == insight.description_arguments
        });
        if !duplicate {
            self.insights.push(insight);
        }
    }

    pub fn merge(&mut self, other: QueryInsightsHolder<S>) {
        for insight in other.insights {
            self.register(insight);
        }
    }

    pub fn insights(&self) -> &[QueryInsight<S>] {
        &self.insights
    }

    pub fn into_insights(self) -> Vec<QueryInsight<S>> {
        self.insights
    }

    pub fn of(&self, inspection: Inspection) -> Vec<&QueryInsight<S>> {
        self.insights
            .iter()
            .filter(|insight| insight.inspection == inspection)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.insights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insights.is_empty()
    }
}

/// A lint rule. Settings and collaborators are fields of the rule.
pub trait QueryInspection<S: Source>: Send + Sync {
    /// The kind of insight this rule reports.
    fn inspection(&self) -> Inspection;

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>);
}

/// The facts rules can ask about the connected cluster.
pub struct LiveCluster<D: ?Sized, P> {
    data_source: Arc<D>,
    provider: Arc<P>,
}

impl<D: ?Sized, P> Clone for LiveCluster<D, P> {
    fn clone(&self) -> Self {
        Self {
            data_source: Arc::clone(&self.data_source),
            provider: Arc::clone(&self.provider),
        }
    }
}

impl<D, P> LiveCluster<D, P>
where
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    pub fn new(data_source: Arc<D>, provider: Arc<P>) -> Self {
        Self {
            data_source,
            provider,
        }
    }

    pub fn slice<T: Slice>(&self, slice: &T) -> Result<T::Output, AccessError> {
        self.provider.slice(&*self.data_source, slice)
    }

    pub fn database_exists(&self, database: &str) -> Result<bool, AccessError> {
        Ok(self.slice(&ListDatabases)?.contains(database))
    }

    pub fn collection_exists(&self, namespace: &Namespace) -> Result<bool, AccessError> {
        Ok(self
            .slice(&ListCollections::new(namespace.database.clone()))?
            .contains(&namespace.collection))
    }

    /// True only when both the database and the collection are listed.
    pub fn namespace_exists(&self, namespace: &Namespace) -> bool {
        namespace.is_valid()
            && matches!(self.database_exists(&namespace.database), Ok(true))
            && matches!(self.collection_exists(namespace), Ok(true))
    }
}

/// Runs a set of rules over queries.
pub struct QueryLinter<S> {
    rules: Vec<Box<dyn QueryInspection<S>>>,
}

impl<S: Source> QueryLinter<S> {
    pub fn new(rules: Vec<Box<dyn QueryInspection<S>>>) -> Self {
        Self { rules }
    }

    /// Every rule enabled in `settings`, asking `cluster` for live facts.
    pub fn from_settings<D, P>(settings: &AnalysisSettings, cluster: LiveCluster<D, P>) -> Self
    where
        D: DataSource + ?Sized + 'static,
        P: ReadModelProvider<D> + 'static,
    {
        let sample_size = settings.documents_sample_size;
        let explain_type = settings.explain_plan_type;
        let rules: Vec<Box<dyn QueryInspection<S>>> = vec![
            Box::new(NotUsingIndexInspection::new(cluster.clone(), explain_type)),
            Box::new(NotUsingIndexEffectivelyInspection::new(cluster.clone(), explain_type)),
            Box::new(NotUsingFiltersInspection),
            Box::new(FieldDoesNotExistInspection::new(cluster.clone(), sample_size)),
            Box::new(TypeMismatchInspection::new(cluster.clone(), sample_size)),
            Box::new(InvalidProjectionInspection),
            Box::new(DatabaseDoesNotExistInspection::new(cluster.clone())),
            Box::new(CollectionDoesNotExistInspection::new(cluster)),
            Box::new(NoDatabaseInferredInspection),
            Box::new(NoCollectionSpecifiedInspection),
        ];

        Self::new(
            rules
                .into_iter()
                .filter(|rule| settings.is_enabled(rule.inspection()))
                .collect(),
        )
    }

    pub fn inspections(&self) -> Vec<Inspection> {
        self.rules.iter().map(|rule| rule.inspection()).collect()
    }

    /// Runs every rule in parallel. Insights are merged in rule order.
    pub fn lint(&self, query: &Node<S>) -> QueryInsightsHolder<S> {
        let per_rule: Vec<QueryInsightsHolder<S>> = self
            .rules
            .par_iter()
            .map(|rule| {
                let mut holder = QueryInsightsHolder::new();
                rule.run(query, &mut holder);
                holder
            })
            .collect();

        let mut holder = QueryInsightsHolder::new();
        for rule_holder in per_rule {
            holder.merge(rule_holder);
        }
        holder
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::testing::StubDriver;
    use crate::access::QueryResult;
    use crate::mql::components::{
        CommandType, HasAggregation, HasCollectionReference, HasFieldReference, HasFilter,
        HasProjections, HasValueReference, IsCommand, Name, Named,
    };
    use crate::mql::{BsonType, Value};
    use pretty_assertions::assert_eq;

    fn library() -> Namespace {
        Namespace::new("library", "books")
    }

    #[test]
    fn test_categories_and_actions() {
        assert_eq!(Inspection::NotUsingIndex.category(), InspectionCategory::Performance);
        assert_eq!(Inspection::TypeMismatch.category(), InspectionCategory::Correctness);
        assert_eq!(
            Inspection::NoDatabaseInferred.category(),
            InspectionCategory::EnvironmentMismatch
        );
        assert_eq!(
            Inspection::NotUsingIndexEffectively.primary_action(),
            InspectionAction::CreateIndexSuggestionScript
        );
        assert_eq!(Inspection::FieldDoesNotExist.primary_action(), InspectionAction::RunQuery);
        assert_eq!(
            Inspection::CollectionDoesNotExist.primary_action(),
            InspectionAction::ChooseConnection
        );
    }

    #[test]
    fn test_holder_drops_duplicates() {
        let query = Node::new("find", vec![]);
        let mut holder = QueryInsightsHolder::new();
        holder.register(QueryInsight::field_does_not_exist(&query, "a", "title"));
        holder.register(QueryInsight::field_does_not_exist(&query, "a", "title"));
        holder.register(QueryInsight::field_does_not_exist(&query, "b", "title"));
        holder.register(QueryInsight::not_using_filters(&query));

        assert_eq!(holder.len(), 3);
        assert_eq!(holder.of(Inspection::FieldDoesNotExist).len(), 2);
    }

    #[test]
    fn test_linter_reports_a_collection_scan() {
        let cluster = testing::cluster(
            &[library()],
            StubDriver::new().answering(
                "explain",
                QueryResult::Run(Value::document([(
                    "queryPlanner",
                    Value::document([("winningPlan", Value::document([("stage", Value::string("COLLSCAN"))]))]),
                )])),
            ),
        );
        let query = Node::new(
            (),
            vec![
                IsCommand::new(CommandType::FindMany).into(),
                HasCollectionReference::known(Some(()), (), library()).into(),
                HasFilter::new(vec![Node::new(
                    (),
                    vec![
                        Named::new(Name::Eq).into(),
                        HasFieldReference::from_schema((), "name").into(),
                        HasValueReference::constant((), "test", BsonType::String).into(),
                    ],
                )])
                .into(),
            ],
        );

        let settings = AnalysisSettings {
            enabled_inspections: vec![Inspection::NotUsingIndex, Inspection::NotUsingFilters],
            ..AnalysisSettings::default()
        };
        let linter = QueryLinter::from_settings(&settings, cluster);
        assert_eq!(
            linter.inspections(),
            vec![Inspection::NotUsingIndex, Inspection::NotUsingFilters]
        );

        let insights = linter.lint(&query);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights.insights()[0].description, "insight.not-using-index");
    }

    #[test]
    fn test_linter_reports_queries_without_filters_regardless_of_the_plan() {
        let cluster = testing::cluster(&[library()], StubDriver::new());
        let query = Node::new(
            (),
            vec![
                IsCommand::new(CommandType::FindMany).into(),
                HasCollectionReference::known(Some(()), (), library()).into(),
                HasFilter::new(vec![]).into(),
            ],
        );

        let insights = QueryLinter::from_settings(&AnalysisSettings::default(), cluster).lint(&query);
        assert_eq!(insights.of(Inspection::NotUsingFilters).len(), 1);
        assert!(insights.of(Inspection::NotUsingIndex).is_empty());
    }

    #[test]
    fn test_linter_reports_one_invalid_projection() {
        let field = |name: Name, field: &str| {
            Node::new(
                (),
                vec![
                    Named::new(name).into(),
                    HasFieldReference::from_schema((), field).into(),
                    HasValueReference::inferred((), 1, BsonType::Int32).into(),
                ],
            )
        };
        let query = Node::new(
            (),
            vec![
                IsCommand::new(CommandType::Aggregate).into(),
                HasCollectionReference::unknown().into(),
                HasAggregation::new(vec![Node::new(
                    (),
                    vec![
                        Named::new(Name::Project).into(),
                        HasProjections::new(vec![
                            field(Name::Include, "title"),
                            field(Name::Exclude, "pages"),
                        ])
                        .into(),
                    ],
                )])
                .into(),
            ],
        );

        let linter: QueryLinter<()> = QueryLinter::new(vec![Box::new(InvalidProjectionInspection)]);
        let insights = linter.lint(&query);
        assert_eq!(insights.len(), 1);
        assert_eq!(insights.insights()[0].description_arguments, vec!["title".to_string()]);
    }
}
