//! MQL model: the dialect-independent representation of a MongoDB query
//!
//! This module is organized into focused sub-modules:
//! - node: the immutable Node and its source handle
//! - components: semantic facets attached to nodes
//! - value / bson_type: literal values and their inferred types
//! - namespace / data_distribution: collection facts sampled from a cluster
//! - query_context: per-render settings for formatters
//! - parser: combinators to query and transform node trees
pub mod bson_type;
pub mod components;
pub mod data_distribution;
pub mod namespace;
pub mod node;
pub mod parser;
pub mod query_context;
pub mod value;

pub use bson_type::BsonType;
pub use data_distribution::DataDistribution;
pub use namespace::{CollectionSchema, Namespace};
pub use node::{Node, Source};
pub use query_context::{LocalVariable, QueryContext};
pub use value::Value;
