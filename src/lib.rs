// MQL Insights - static analysis of MongoDB queries embedded in Java code
//
// Dialects parse queries into a dialect-independent model; analyzers work on that
// model and never see the concrete syntax again.

//! Finds MongoDB queries in Java sources, suggests indexes for them, lints them
//! against a live cluster and renders them as runnable mongosh scripts.

pub mod access;
pub mod config;
pub mod dialects;
pub mod indexing;
pub mod language;
pub mod linting;
pub mod mql;
pub mod workspace;

pub use config::{AnalysisSettings, ConfigError};
pub use dialects::java::{JavaSource, JavaSourceFile};
pub use dialects::mongosh::MongoshDialect;
pub use dialects::{DialectFormatter, DialectParser, OutputQuery};
pub use indexing::{IndexAnalyzer, SiblingQueriesFinder};
pub use linting::{Inspection, QueryInsight, QueryInsightsHolder, QueryLinter};
pub use mql::{BsonType, Namespace, Node, QueryContext, Source, Value};
pub use workspace::Workspace;
