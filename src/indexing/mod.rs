//! Index suggestions
//!
//! The analyzer turns a query's filter and sort shape into one compound index,
//! ordered by the equality-sort-range rule, then consolidates it with the indexes
//! suggested for sibling queries on the same collection.
mod analyzer;
mod consolidation;

pub use analyzer::IndexAnalyzer;
pub use consolidation::{CollectionIndexConsolidation, CollectionIndexConsolidationOptions};

use crate::mql::components::HasCollectionReference;
use crate::mql::Node;

/// Finds the other queries of a codebase that target the same collection.
pub trait SiblingQueriesFinder<S>: Sync {
    fn all_siblings_of(&self, query: &Node<S>) -> Vec<Node<S>>;
}

/// A finder for callers that analyze queries in isolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSiblingQueries;

impl<S> SiblingQueriesFinder<S> for NoSiblingQueries {
    fn all_siblings_of(&self, _query: &Node<S>) -> Vec<Node<S>> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// The value `createIndex` expects for this direction.
    pub fn as_index_value(&self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// Why a field sits where it does in the suggested index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexSuggestionFieldReason {
    RoleEquality,
    RoleSort,
    RoleRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MongoDbIndexField<S> {
    pub field_name: String,
    pub source: S,
    pub direction: SortDirection,
    pub reason: IndexSuggestionFieldReason,
}

impl<S> MongoDbIndexField<S> {
    /// Same field and direction, wherever in the sources it was found.
    pub fn is_equivalent_to(&self, other: &MongoDbIndexField<S>) -> bool {
        self.field_name == other.field_name && self.direction == other.direction
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MongoDbIndex<S> {
    pub collection_reference: HasCollectionReference<S>,
    pub fields: Vec<MongoDbIndexField<S>>,
    /// Queries that can use this index, the analyzed query first
    pub covered_queries: Vec<Node<S>>,
    pub partial_filter_expression: Option<Node<S>>,
}

impl<S> MongoDbIndex<S> {
    /// Every field of `self` matches the field at the same position in `other`.
    pub fn is_prefix_of(&self, other: &MongoDbIndex<S>) -> bool {
        self.fields
            .iter()
            .zip(&other.fields)
            .all(|(first, second)| first.is_equivalent_to(second))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SuggestedIndex<S> {
    NoIndex,
    MongoDbIndex(MongoDbIndex<S>),
}

impl<S> SuggestedIndex<S> {
    pub fn as_mongodb_index(&self) -> Option<&MongoDbIndex<S>> {
        match self {
            SuggestedIndex::MongoDbIndex(index) => Some(index),
            SuggestedIndex::NoIndex => None,
        }
    }
}
