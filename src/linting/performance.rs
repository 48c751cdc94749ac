//! Rules about queries the server can't answer efficiently

use tracing::debug;

use super::{Inspection, LiveCluster, QueryInsight, QueryInsightsHolder, QueryInspection};
use crate::access::{DataSource, ExplainPlan, ExplainQuery, ReadModelProvider};
use crate::mql::components::{ExplainPlanType, IsCommand};
use crate::mql::parser::components::{all_filters_recursively, known_collection};
use crate::mql::{Node, QueryContext, Source};

fn has_filters<S: Source>(query: &Node<S>) -> bool {
    all_filters_recursively::<S>()
        .parse(query)
        .is_ok_and(|filters| !filters.is_empty())
}

/// Explain plan of `query`, for filtered queries on existing collections only.
fn explain<S, D, P>(
    cluster: &LiveCluster<D, P>,
    query: &Node<S>,
    explain_type: ExplainPlanType,
) -> Option<ExplainPlan>
where
    S: Source,
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    let uses_indexes = query
        .component::<IsCommand>()
        .is_some_and(|command| command.command_type.uses_indexes());
    if !uses_indexes || !has_filters(query) {
        return None;
    }

    let known = known_collection::<S>().parse(query).ok()?;
    if !cluster.namespace_exists(&known.namespace) {
        return None;
    }

    let slice = ExplainQuery::new(query.with_explain(explain_type), QueryContext::empty_with(true));
    match cluster.slice(&slice) {
        Ok(plan) => Some(plan),
        Err(error) => {
            debug!("Explain of a query on {} failed: {}", known.namespace, error);
            None
        }
    }
}

pub struct NotUsingIndexInspection<D: ?Sized, P> {
    cluster: LiveCluster<D, P>,
    explain_type: ExplainPlanType,
}

impl<D: ?Sized, P> NotUsingIndexInspection<D, P> {
    pub fn new(cluster: LiveCluster<D, P>, explain_type: ExplainPlanType) -> Self {
        Self {
            cluster,
            explain_type,
        }
    }
}

impl<S, D, P> QueryInspection<S> for NotUsingIndexInspection<D, P>
where
    S: Source,
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    fn inspection(&self) -> Inspection {
        Inspection::NotUsingIndex
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        if explain(&self.cluster, query, self.explain_type) == Some(ExplainPlan::CollectionScan) {
            holder.register(QueryInsight::not_using_index(query));
        }
    }
}

pub struct NotUsingIndexEffectivelyInspection<D: ?Sized, P> {
    cluster: LiveCluster<D, P>,
    explain_type: ExplainPlanType,
}

impl<D: ?Sized, P> NotUsingIndexEffectivelyInspection<D, P> {
    pub fn new(cluster: LiveCluster<D, P>, explain_type: ExplainPlanType) -> Self {
        Self {
            cluster,
            explain_type,
        }
    }
}

impl<S, D, P> QueryInspection<S> for NotUsingIndexEffectivelyInspection<D, P>
where
    S: Source,
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    fn inspection(&self) -> Inspection {
        Inspection::NotUsingIndexEffectively
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        if explain(&self.cluster, query, self.explain_type)
            == Some(ExplainPlan::IneffectiveIndexUsage)
        {
            holder.register(QueryInsight::not_using_index_effectively(query));
        }
    }
}

/// Queries that read a whole collection.
pub struct NotUsingFiltersInspection;

impl<S: Source> QueryInspection<S> for NotUsingFiltersInspection {
    fn inspection(&self) -> Inspection {
        Inspection::NotUsingFilters
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        if !has_filters(query) {
            holder.register(QueryInsight::not_using_filters(query));
        }
    }
}
