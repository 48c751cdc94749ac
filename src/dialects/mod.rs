//! Dialects: how queries are read from source code and written back as scripts
//!
//! - java: the parsed Java file and the helpers every Java dialect shares
//! - java_driver: `MongoCollection` calls with `Filters`, `Updates`, `Aggregates`...
//! - spring_criteria: `MongoTemplate` calls with `Criteria` chains
//! - spring_query: `@Query` and `@Aggregation` annotated repository methods
//! - mongosh: the shell script formatter
pub mod java;
pub mod java_driver;
pub mod mongosh;
pub mod spring_criteria;
pub mod spring_query;

use crate::indexing::SuggestedIndex;
use crate::mql::{BsonType, Node, QueryContext};

/// Reads queries from the concrete syntax of one dialect.
pub trait DialectParser<S> {
    /// Cheap check of whether `source` looks like the start of a query.
    fn is_candidate_for_query(&self, source: &S) -> bool;

    /// The node where insights about the query are attached: for a call chain, the
    /// outermost call that still belongs to the query.
    fn attachment(&self, source: &S) -> Option<S>;

    fn parse(&self, source: &S) -> Node<S>;
}

/// Renders queries as text of one dialect.
pub trait DialectFormatter<S> {
    fn format_query(&self, query: &Node<S>, context: &QueryContext) -> OutputQuery;

    /// A script that creates `index`. Empty when no index is suggested.
    fn index_command(
        &self,
        query: &Node<S>,
        index: &SuggestedIndex<S>,
        to_query_reference: &dyn Fn(&Node<S>) -> Option<String>,
    ) -> String;

    /// How the dialect names a type, for insight messages.
    fn format_type(&self, bson_type: &BsonType) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputQuery {
    /// The node is not a query
    None,
    /// The target namespace is known, the script can run as is
    CanBeRun(String),
    /// The script needs the user to fill in the namespace first
    Incomplete(String),
}

impl OutputQuery {
    pub fn query(&self) -> Option<&str> {
        match self {
            OutputQuery::None => None,
            OutputQuery::CanBeRun(query) | OutputQuery::Incomplete(query) => Some(query),
        }
    }

    pub fn can_be_run(&self) -> bool {
        matches!(self, OutputQuery::CanBeRun(_))
    }
}
