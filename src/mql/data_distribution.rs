//! Value distribution of sampled documents, used to rank index fields by selectivity.

use std::collections::{BTreeMap, BTreeSet};

use super::value::Value;

/// Key of a distribution bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DistributionKey {
    /// A scalar value, keyed by its debug rendering so `10` and `"10"` stay apart.
    Scalar(String),
    Object,
    Array,
    /// The path did not exist in a sampled document
    Undefined,
}

impl DistributionKey {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Document(_) => DistributionKey::Object,
            Value::Array(_) => DistributionKey::Array,
            scalar => DistributionKey::Scalar(format!("{:?}", scalar)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataDistribution {
    distribution: BTreeMap<String, BTreeMap<DistributionKey, f64>>,
}

impl DataDistribution {
    pub fn generate(sample_docs: &[Value]) -> Self {
        let documents: Vec<&[(String, Value)]> = sample_docs
            .iter()
            .filter_map(|doc| match doc {
                Value::Document(pairs) => Some(pairs.as_slice()),
                _ => None,
            })
            .collect();

        let mut counts: BTreeMap<String, BTreeMap<DistributionKey, usize>> = BTreeMap::new();
        populate_distribution(&documents, &mut counts, "");
        populate_undefined_paths(&documents, &mut counts);

        let total = documents.len().max(1) as f64;
        let distribution = counts
            .into_iter()
            .map(|(path, buckets)| {
                let percentages = buckets
                    .into_iter()
                    .map(|(key, count)| (key, count as f64 * 100.0 / total))
                    .collect();
                (path, percentages)
            })
            .collect();

        Self { distribution }
    }

    pub fn distribution_for_path(&self, field_path: &str) -> Option<&BTreeMap<DistributionKey, f64>> {
        self.distribution.get(field_path)
    }

    /// Share of sampled documents holding `value` at `field_path`. Lower means more selective.
    pub fn selectivity_for_path(&self, field_path: &str, value: &Value) -> Option<f64> {
        self.distribution_for_path(field_path)?
            .get(&DistributionKey::of(value))
            .copied()
    }

    pub fn is_empty(&self) -> bool {
        self.distribution.is_empty()
    }
}

fn join_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", parent, field)
    }
}

fn nested_documents(items: &[Value]) -> Vec<&[(String, Value)]> {
    items
        .iter()
        .filter_map(|item| match item {
            Value::Document(pairs) => Some(pairs.as_slice()),
            _ => None,
        })
        .collect()
}

fn populate_distribution(
    documents: &[&[(String, Value)]],
    counts: &mut BTreeMap<String, BTreeMap<DistributionKey, usize>>,
    parent_path: &str,
) {
    for document in documents {
        for (field, value) in document.iter() {
            let path = join_path(parent_path, field);
            *counts
                .entry(path.clone())
                .or_default()
                .entry(DistributionKey::of(value))
                .or_insert(0) += 1;

            match value {
                Value::Document(pairs) => {
                    populate_distribution(&[pairs.as_slice()], counts, &path)
                }
                Value::Array(items) => {
                    populate_distribution(&nested_documents(items), counts, &path)
                }
                _ => {}
            }
        }
    }
}

fn populate_undefined_paths(
    documents: &[&[(String, Value)]],
    counts: &mut BTreeMap<String, BTreeMap<DistributionKey, usize>>,
) {
    for document in documents {
        let mut present = BTreeSet::new();
        collect_paths(document, "", &mut present);

        for (path, buckets) in counts.iter_mut() {
            if !present.contains(path) {
                *buckets.entry(DistributionKey::Undefined).or_insert(0) += 1;
            }
        }
    }
}

fn collect_paths(document: &[(String, Value)], parent_path: &str, paths: &mut BTreeSet<String>) {
    for (field, value) in document {
        let path = join_path(parent_path, field);
        match value {
            Value::Document(pairs) => collect_paths(pairs, &path, paths),
            Value::Array(items) => {
                for nested in nested_documents(items) {
                    collect_paths(nested, &path, paths);
                }
            }
            _ => {}
        }
        paths.insert(path);
    }
}
