//! Rules about namespaces that don't match the connected cluster

use tracing::debug;

use super::{Inspection, LiveCluster, QueryInsight, QueryInsightsHolder, QueryInspection};
use crate::access::{DataSource, ReadModelProvider};
use crate::mql::parser::components::{known_collection, no_collection, only_collection};
use crate::mql::{Node, Source};

/// A collection is named but nothing tells which database it lives in.
pub struct NoDatabaseInferredInspection;

impl<S: Source> QueryInspection<S> for NoDatabaseInferredInspection {
    fn inspection(&self) -> Inspection {
        Inspection::NoDatabaseInferred
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        if let Ok(only) = only_collection::<S>().parse(query) {
            if !only.collection.is_empty() {
                holder.register(QueryInsight::no_database_inferred(query, only.collection_source));
            }
        }
    }
}

pub struct NoCollectionSpecifiedInspection;

impl<S: Source> QueryInspection<S> for NoCollectionSpecifiedInspection {
    fn inspection(&self) -> Inspection {
        Inspection::NoCollectionSpecified
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        if no_collection::<S>().parse(query).is_ok() {
            holder.register(QueryInsight::no_collection_specified(query));
        }
    }
}

pub struct DatabaseDoesNotExistInspection<D: ?Sized, P> {
    cluster: LiveCluster<D, P>,
}

impl<D: ?Sized, P> DatabaseDoesNotExistInspection<D, P> {
    pub fn new(cluster: LiveCluster<D, P>) -> Self {
        Self { cluster }
    }
}

impl<S, D, P> QueryInspection<S> for DatabaseDoesNotExistInspection<D, P>
where
    S: Source,
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    fn inspection(&self) -> Inspection {
        Inspection::DatabaseDoesNotExist
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        let Ok(known) = known_collection::<S>().parse(query) else {
            return;
        };

        match self.cluster.database_exists(&known.namespace.database) {
            Ok(true) => {}
            Ok(false) => holder.register(QueryInsight::database_does_not_exist(
                query,
                known.database_source.unwrap_or_else(|| query.source.clone()),
                &known.namespace.database,
            )),
            Err(error) => debug!("Databases can't be listed: {}", error),
        }
    }
}

/// Only reported when the database itself exists.
pub struct CollectionDoesNotExistInspection<D: ?Sized, P> {
    cluster: LiveCluster<D, P>,
}

impl<D: ?Sized, P> CollectionDoesNotExistInspection<D, P> {
    pub fn new(cluster: LiveCluster<D, P>) -> Self {
        Self { cluster }
    }
}

impl<S, D, P> QueryInspection<S> for CollectionDoesNotExistInspection<D, P>
where
    S: Source,
    D: DataSource + ?Sized,
    P: ReadModelProvider<D>,
{
    fn inspection(&self) -> Inspection {
        Inspection::CollectionDoesNotExist
    }

    fn run(&self, query: &Node<S>, holder: &mut QueryInsightsHolder<S>) {
        let Ok(known) = known_collection::<S>().parse(query) else {
            return;
        };
        if !matches!(self.cluster.database_exists(&known.namespace.database), Ok(true)) {
            return;
        }

        match self.cluster.collection_exists(&known.namespace) {
            Ok(true) => {}
            Ok(false) => holder.register(QueryInsight::collection_does_not_exist(
                query,
                known.collection_source,
                &known.namespace,
            )),
            Err(error) => debug!("Collections of {} can't be listed: {}", known.namespace.database, error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::testing::StubDriver;
    use crate::access::QueryResult;
    use crate::linting::testing::{self, run};
    use crate::mql::components::{CommandType, HasCollectionReference, IsCommand};
    use crate::mql::Namespace;
    use pretty_assertions::assert_eq;

    fn query(reference: HasCollectionReference<&'static str>) -> Node<&'static str> {
        Node::new(
            "query",
            vec![IsCommand::new(CommandType::FindOne).into(), reference.into()],
        )
    }

    fn known(database: &str, collection: &str) -> Node<&'static str> {
        query(HasCollectionReference::known(
            Some("database"),
            "collection",
            Namespace::new(database, collection),
        ))
    }


    #[test]
    fn test_no_database_inferred() {
        let holder = run(
            &NoDatabaseInferredInspection,
            &query(HasCollectionReference::only_collection("collection", "books")),
        );
        assert_eq!(holder.len(), 1);
        assert_eq!(holder.insights()[0].source, "collection");

        let holder = run(
            &NoDatabaseInferredInspection,
            &query(HasCollectionReference::only_collection("collection", "")),
        );
        assert!(holder.is_empty());
        assert!(run(&NoDatabaseInferredInspection, &known("library", "books")).is_empty());
    }

    #[test]
    fn test_no_collection_specified() {
        let holder = run(&NoCollectionSpecifiedInspection, &query(HasCollectionReference::unknown()));
        assert_eq!(holder.len(), 1);
        assert_eq!(holder.insights()[0].description, "insight.no-collection-specified");
        assert!(run(&NoCollectionSpecifiedInspection, &known("library", "books")).is_empty());
    }

    #[test]
    fn test_database_does_not_exist() {
        let cluster = testing::cluster(&[Namespace::new("library", "books")], StubDriver::new());
        let rule = DatabaseDoesNotExistInspection::new(cluster);

        assert!(run(&rule, &known("library", "books")).is_empty());

        let holder = run(&rule, &known("shop", "books"));
        assert_eq!(holder.len(), 1);
        assert_eq!(holder.insights()[0].source, "database");
        assert_eq!(holder.insights()[0].description_arguments, vec!["shop".to_string()]);
    }

    #[test]
    fn test_collection_does_not_exist_only_in_existing_databases() {
        let cluster = testing::cluster(&[Namespace::new("library", "books")], StubDriver::new());
        let rule = CollectionDoesNotExistInspection::new(cluster);

        assert!(run(&rule, &known("library", "books")).is_empty());
        assert!(run(&rule, &known("shop", "orders")).is_empty());

        let holder = run(&rule, &known("library", "magazines"));
        assert_eq!(holder.len(), 1);
        assert_eq!(holder.insights()[0].source, "collection");
        assert_eq!(
            holder.insights()[0].description_arguments,
            vec!["magazines".to_string(), "library".to_string()]
        );
    }

    #[test]
    fn test_unreachable_clusters_report_nothing() {
        let cluster = testing::cluster(
            &[],
            StubDriver::new().answering("listDatabases", QueryResult::NotRun),
        );

        assert!(run(&DatabaseDoesNotExistInspection::new(cluster.clone()), &known("shop", "orders")).is_empty());
        assert!(run(&CollectionDoesNotExistInspection::new(cluster), &known("shop", "orders")).is_empty());
    }
}
