//! Merges the index of a query with the indexes of its sibling queries.

use tracing::warn;

use super::{MongoDbIndex, SuggestedIndex};
use crate::config::AnalysisSettings;
use crate::mql::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionIndexConsolidationOptions {
    pub indexes_soft_limit: usize,
}

impl From<&AnalysisSettings> for CollectionIndexConsolidationOptions {
    fn from(settings: &AnalysisSettings) -> Self {
        Self {
            indexes_soft_limit: settings.indexes_soft_limit,
        }
    }
}

/// Groups of indexes where each member is a prefix of, or has as prefix, every other.
struct IndexPartitions<S> {
    partitions: Vec<Vec<MongoDbIndex<S>>>,
}

impl<S: Source> IndexPartitions<S> {
    fn new() -> Self {
        Self {
            partitions: Vec::new(),
        }
    }

    /// Returns the position of the partition the index ended up in.
    fn add_index(&mut self, index: MongoDbIndex<S>) -> usize {
        let fitting = self.partitions.iter().position(|partition| {
            partition
                .iter()
                .all(|member| member.is_prefix_of(&index) || index.is_prefix_of(member))
        });

        match fitting {
            Some(position) => {
                self.partitions[position].push(index);
                position
            }
            None => {
                self.partitions.push(vec![index]);
                self.partitions.len() - 1
            }
        }
    }
}

pub struct CollectionIndexConsolidation;

impl CollectionIndexConsolidation {
    /// The widest index compatible with `base_index`, covering every query of its partition.
    pub fn apply<S: Source>(
        base_index: SuggestedIndex<S>,
        indexes: Vec<SuggestedIndex<S>>,
        options: &CollectionIndexConsolidationOptions,
    ) -> SuggestedIndex<S> {
        let SuggestedIndex::MongoDbIndex(base_index) = base_index else {
            return SuggestedIndex::NoIndex;
        };

        let mut partitions = IndexPartitions::new();
        for index in indexes {
            if let SuggestedIndex::MongoDbIndex(index) = index {
                partitions.add_index(index);
            }
        }
        let position = partitions.add_index(base_index);

        if partitions.partitions.len() > options.indexes_soft_limit {
            warn!(
                "{} incompatible index candidates for one collection, above the soft limit of {}",
                partitions.partitions.len(),
                options.indexes_soft_limit
            );
        }

        let partition = partitions.partitions.swap_remove(position);
        let mut covered_queries = Vec::new();
        for member in &partition {
            for query in &member.covered_queries {
                if !covered_queries.contains(query) {
                    covered_queries.push(query.clone());
                }
            }
        }

        // max_by_key keeps the last maximum; reversing makes the first one win
        match partition
            .into_iter()
            .rev()
            .max_by_key(|index| index.fields.len())
        {
            Some(best) => SuggestedIndex::MongoDbIndex(MongoDbIndex {
                covered_queries,
                ..best
            }),
            None => SuggestedIndex::NoIndex,
        }
    }
}
