//! `createIndex` scripts for suggested indexes.

use super::backend::{serialize_primitive, MongoshBackend};
use super::query::emit_query_filter;
use crate::indexing::SuggestedIndex;
use crate::mql::components::{CollectionReference, HasTargetCluster};
use crate::mql::{Node, Source, Value};

const DATABASE_PLACEHOLDER: &str = "<database>";
const COLLECTION_PLACEHOLDER: &str = "<collection>";

pub(super) fn index_command<S: Source>(
    query: &Node<S>,
    index: &SuggestedIndex<S>,
    to_query_reference: &dyn Fn(&Node<S>) -> Option<String>,
) -> String {
    let SuggestedIndex::MongoDbIndex(index) = index else {
        return String::new();
    };

    let version = query
        .component::<HasTargetCluster>()
        .map(|cluster| cluster.version)
        .unwrap_or_default();

    let (database, collection) = match &index.collection_reference.reference {
        CollectionReference::Known(known) => (
            known.namespace.database.clone(),
            known.namespace.collection.clone(),
        ),
        CollectionReference::OnlyCollection(only) => {
            (DATABASE_PLACEHOLDER.to_string(), only.collection.clone())
        }
        CollectionReference::Unknown => (
            DATABASE_PLACEHOLDER.to_string(),
            COLLECTION_PLACEHOLDER.to_string(),
        ),
    };

    let fields = index
        .fields
        .iter()
        .map(|field| {
            format!(
                "{}: {}",
                serialize_primitive(&Value::string(field.field_name.as_str())),
                field.direction.as_index_value()
            )
        })
        .collect::<Vec<_>>()
        .join(", ");

    let partial_filter = index
        .partial_filter_expression
        .as_ref()
        .map(|expression| {
            let mut backend = MongoshBackend::default();
            emit_query_filter(&mut backend, expression, true);
            format!(", {{ partialFilterExpression: {} }}", backend.compute_output())
        })
        .unwrap_or_default();

    let mut references: Vec<String> = Vec::new();
    for reference in index.covered_queries.iter().filter_map(to_query_reference) {
        if !references.contains(&reference) {
            references.push(reference);
        }
    }
    let covered_region = if references.is_empty() {
        String::new()
    } else {
        let lines: String = references
            .iter()
            .map(|reference| format!("// {}\n", reference))
            .collect();
        format!(
            "// region Queries covered by this index \n{}// endregion \n",
            lines
        )
    };

    format!(
        "{}// Learn about creating an index: https://www.mongodb.com/docs/v{}.{}/core/data-model-operations/#indexes\n\
         db.getSiblingDB({}).getCollection({})\n  .createIndex({{ {} }}{})",
        covered_region,
        version.major,
        version.minor,
        serialize_primitive(&Value::String(database)),
        serialize_primitive(&Value::String(collection)),
        fields,
        partial_filter,
    )
}
