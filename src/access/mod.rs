//! Access to facts of a live cluster
//!
//! Analyzers never talk to a cluster directly. They ask a [`ReadModelProvider`] for a
//! typed [`Slice`] of the read model (databases, collections, a sampled schema, an
//! explain plan, build info) and treat any failure as "fact unavailable".
//!
//! This module is organized into focused sub-modules:
//! - slices: database and collection listings, sampled collection schemas
//! - explain: explain plans and their classification
//! - build_info: server version and hosting environment
//! - dispatcher: the single worker that serializes every script sent to a cluster
//! - cache: read model results cached per data source
//! - ejson: extended JSON decoding of script results

mod build_info;
mod cache;
mod dispatcher;
pub mod ejson;
mod explain;
mod slices;

pub use build_info::{BuildInfo, ClusterBuildInfo};
pub use cache::CachedReadModelProvider;
pub use dispatcher::{SerializedDriver, ShellEvaluator};
pub use explain::{ExplainPlan, ExplainQuery};
pub use slices::{
    Collection, CollectionList, Database, DatabaseList, GetCollectionSchema, ListCollections,
    ListDatabases,
};

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::dialects::mongosh::MongoshDialect;
use crate::dialects::{DialectFormatter, OutputQuery};
use crate::mql::{Node, QueryContext, Source, Value};

/// How long a slice waits for its query when nothing else is configured.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that can occur when fetching facts from a cluster.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccessError {
    /// The shell evaluator failed to run a script.
    #[error("driver error: {0}")]
    Driver(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// The worker that owns the evaluator is gone.
    #[error("query worker disconnected")]
    Disconnected,

    /// The query was refused or could not be rendered as a runnable script.
    #[error("query was not run")]
    NotRun,

    #[error("unexpected result shape: {0}")]
    UnexpectedShape(String),
}

/// Outcome of running a query against a cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Run(Value),
    /// The script ran and returned nothing
    NoResult,
    NotRun,
}

impl QueryResult {
    /// The returned value, failures mapped to [`AccessError`].
    pub fn into_value(self) -> Result<Value, AccessError> {
        match self {
            QueryResult::Run(value) => Ok(value),
            QueryResult::NoResult => Err(AccessError::UnexpectedShape("empty result".to_string())),
            QueryResult::NotRun => Err(AccessError::NotRun),
        }
    }
}

/// Hosts of the connection string of a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionString {
    pub hosts: Vec<String>,
}

impl ConnectionString {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }

    /// Extracts the host list of a `mongodb://` or `mongodb+srv://` URL. Credentials,
    /// the default database and the options are ignored.
    pub fn parse(url: &str) -> Self {
        let without_scheme = url
            .trim()
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(url.trim());
        let authority = without_scheme
            .split(['/', '?'])
            .next()
            .unwrap_or_default();
        let hosts = authority
            .rsplit_once('@')
            .map(|(_, hosts)| hosts)
            .unwrap_or(authority);

        Self::new(
            hosts
                .split(',')
                .map(str::trim)
                .filter(|host| !host.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }
}

/// A connection that can run rendered scripts.
pub trait MongoDbDriver: Send + Sync {
    fn connected(&self) -> bool;

    fn connection_string(&self) -> ConnectionString;

    /// Runs a mongosh script and decodes what it returns.
    fn evaluate(&self, script: &str, timeout: Duration) -> QueryResult;
}

impl dyn MongoDbDriver + '_ {
    /// Renders `query` as a mongosh script and runs it.
    ///
    /// Queries that run without user interaction must carry a `limit`, otherwise they
    /// are refused. Queries whose namespace is not fully known are never run.
    pub fn run_query<S: Source>(
        &self,
        query: &Node<S>,
        context: &QueryContext,
        timeout: Duration,
        limit: Option<u32>,
    ) -> QueryResult {
        if context.automatically_run && limit.is_none() {
            debug!("Refusing to run an automatic query without a limit");
            return QueryResult::NotRun;
        }
        if !self.connected() {
            return QueryResult::NotRun;
        }

        let query = match limit {
            Some(limit) => query.with_limit(limit),
            None => query.clone(),
        };

        match MongoshDialect.format_query(&query, context) {
            OutputQuery::CanBeRun(script) => self.evaluate(&script, timeout),
            OutputQuery::Incomplete(_) | OutputQuery::None => {
                debug!("Query can't be run, its namespace is incomplete");
                QueryResult::NotRun
            }
        }
    }
}

/// One typed piece of the read model of a cluster.
pub trait Slice: Send + Sync {
    type Output: Clone + Send + Sync + 'static;

    /// Cache key, unique among the slices of a data source.
    fn id(&self) -> String;

    fn query_using_driver(&self, driver: &dyn MongoDbDriver) -> Result<Self::Output, AccessError>;
}

/// A configured cluster connection.
pub trait DataSource: Send + Sync {
    fn id(&self) -> String;

    /// Incremented whenever the connection changes (reconnects, different cluster...).
    fn modification_count(&self) -> u64;

    fn driver(&self) -> &dyn MongoDbDriver;
}

/// Fetches slices of the read model of a data source.
pub trait ReadModelProvider<D: ?Sized>: Send + Sync {
    fn slice<T: Slice>(&self, data_source: &D, slice: &T) -> Result<T::Output, AccessError>;
}

/// Queries the driver of the data source on every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverReadModelProvider;

impl<D: DataSource + ?Sized> ReadModelProvider<D> for DriverReadModelProvider {
    fn slice<T: Slice>(&self, data_source: &D, slice: &T) -> Result<T::Output, AccessError> {
        slice.query_using_driver(data_source.driver())
    }
}
