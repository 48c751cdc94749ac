//! Explain plans of queries

use tracing::debug;

use super::{AccessError, MongoDbDriver, QueryResult, Slice, DEFAULT_QUERY_TIMEOUT};
use crate::mql::components::{ExplainPlanType, HasExplain};
use crate::mql::{Node, QueryContext, Source, Value};

/// Above this many examined documents per returned one, an index is not selective enough.
const INEFFECTIVE_EXAMINED_RATIO: i64 = 50;

/// How the server would run a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExplainPlan {
    /// The query could not be explained
    NotRun,
    CollectionScan,
    IndexScan,
    /// An index is used, but documents are still filtered or sorted in memory
    IneffectiveIndexUsage,
}

impl ExplainPlan {
    /// Classifies the output of `explain()`.
    pub fn from_explain_output(output: &Value) -> ExplainPlan {
        let Some(winning_plan) = output
            .get("queryPlanner")
            .and_then(|planner| planner.get("winningPlan"))
        else {
            return ExplainPlan::NotRun;
        };

        let stage = stage_name(winning_plan);
        let input_stage = winning_plan.get("inputStage").and_then(stage_name);

        let plan = match (stage, input_stage) {
            (Some("COLLSCAN"), None) | (_, Some("COLLSCAN")) => ExplainPlan::CollectionScan,
            (Some("IXSCAN" | "IDHACK"), None) => ExplainPlan::IndexScan,
            (Some("FILTER" | "SORT"), Some("IXSCAN")) => ExplainPlan::IneffectiveIndexUsage,
            (_, Some("IXSCAN" | "IDHACK")) => ExplainPlan::IndexScan,
            _ => ExplainPlan::NotRun,
        };

        if plan == ExplainPlan::IndexScan && examines_too_many_documents(output) {
            return ExplainPlan::IneffectiveIndexUsage;
        }
        plan
    }
}

fn stage_name(stage: &Value) -> Option<&str> {
    stage.get("stage").and_then(Value::as_str)
}

/// Only `executionStats` explains carry the counters.
fn examines_too_many_documents(output: &Value) -> bool {
    let Some(stats) = output.get("executionStats") else {
        return false;
    };
    let returned = stats.get("nReturned").and_then(Value::as_i64).unwrap_or(0);
    let examined = stats.get("totalDocsExamined").and_then(Value::as_i64).unwrap_or(0);

    examined >= returned.max(1) * INEFFECTIVE_EXAMINED_RATIO
}

/// Explains `query` with the verbosity of its `HasExplain` component.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainQuery<S> {
    pub query: Node<S>,
    pub context: QueryContext,
}

impl<S: Source> ExplainQuery<S> {
    pub fn new(query: Node<S>, context: QueryContext) -> Self {
        Self { query, context }
    }
}

impl<S: Source> Slice for ExplainQuery<S> {
    type Output = ExplainPlan;

    fn id(&self) -> String {
        let digest = blake3::hash(format!("{:?}{:?}", self.query, self.context).as_bytes());
        format!("ExplainQuery::{}", digest.to_hex())
    }

    fn query_using_driver(&self, driver: &dyn MongoDbDriver) -> Result<ExplainPlan, AccessError> {
        let explain_type = self
            .query
            .component::<HasExplain>()
            .map(|explain| explain.explain_type)
            .unwrap_or(ExplainPlanType::None);
        if explain_type == ExplainPlanType::None {
            return Ok(ExplainPlan::NotRun);
        }

        match driver.run_query(&self.query, &self.context, DEFAULT_QUERY_TIMEOUT, Some(1)) {
            QueryResult::Run(output) => Ok(ExplainPlan::from_explain_output(&output)),
            QueryResult::NoResult | QueryResult::NotRun => {
                debug!("Explain plan was not run");
                Ok(ExplainPlan::NotRun)
            }
        }
    }
}
