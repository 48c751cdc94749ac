//! Database listings and sampled collection schemas

use std::collections::BTreeMap;

use tracing::debug;

use super::{AccessError, MongoDbDriver, Slice, DEFAULT_QUERY_TIMEOUT};
use crate::mql::components::{
    CommandType, HasCollectionReference, HasFieldReference, HasFilter, HasRunCommand,
    HasValueReference, IsCommand,
};
use crate::mql::{BsonType, CollectionSchema, DataDistribution, Namespace, Node, QueryContext, Value};

/// `{<command>: 1, ...arguments}` run against `database`.
pub(super) fn run_command(
    database: &str,
    command: &str,
    arguments: Vec<(&str, Value, BsonType)>,
) -> Node<()> {
    let run_command = arguments.into_iter().fold(
        HasRunCommand::new(
            HasValueReference::constant((), database, BsonType::String),
            HasValueReference::constant((), command, BsonType::String),
        ),
        |run_command, (field, value, bson_type)| {
            run_command.with_argument(
                HasFieldReference::from_schema((), field),
                HasValueReference::constant((), value, bson_type),
            )
        },
    );

    Node::new(
        (),
        vec![IsCommand::new(CommandType::RunCommand).into(), run_command.into()],
    )
}

pub(super) fn array_at<'v>(value: &'v Value, path: &[&str]) -> Result<&'v [Value], AccessError> {
    let found = path
        .iter()
        .try_fold(value, |current, key| current.get(key))
        .ok_or_else(|| AccessError::UnexpectedShape(format!("missing {}", path.join("."))))?;

    match found {
        Value::Array(items) => Ok(items),
        other => Err(AccessError::UnexpectedShape(format!(
            "{} is not an array: {:?}",
            path.join("."),
            other
        ))),
    }
}

fn string_at(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Database {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatabaseList {
    pub databases: Vec<Database>,
}

impl DatabaseList {
    pub fn contains(&self, database: &str) -> bool {
        self.databases.iter().any(|db| db.name == database)
    }
}

/// Databases the user can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListDatabases;

impl Slice for ListDatabases {
    type Output = DatabaseList;

    fn id(&self) -> String {
        "ListDatabases".to_string()
    }

    fn query_using_driver(&self, driver: &dyn MongoDbDriver) -> Result<DatabaseList, AccessError> {
        let result = driver
            .run_query(
                &run_command("admin", "listDatabases", Vec::new()),
                &QueryContext::empty(),
                DEFAULT_QUERY_TIMEOUT,
                None,
            )
            .into_value()?;

        let databases = array_at(&result, &["databases"])?
            .iter()
            .filter_map(|database| string_at(database, "name"))
            .map(|name| Database { name })
            .collect();

        Ok(DatabaseList { databases })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub name: String,
    /// `collection`, `view` or `timeseries`
    pub collection_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionList {
    pub collections: Vec<Collection>,
}

impl CollectionList {
    pub fn contains(&self, collection: &str) -> bool {
        self.collections.iter().any(|coll| coll.name == collection)
    }
}

/// Collections of a database. A blank database has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListCollections {
    pub database: String,
}

impl ListCollections {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

impl Slice for ListCollections {
    type Output = CollectionList;

    fn id(&self) -> String {
        format!("ListCollections::{}", self.database)
    }

    fn query_using_driver(&self, driver: &dyn MongoDbDriver) -> Result<CollectionList, AccessError> {
        if self.database.trim().is_empty() {
            return Ok(CollectionList::default());
        }

        let command = run_command(
            &self.database,
            "listCollections",
            vec![("authorizedCollections", Value::Boolean(true), BsonType::Boolean)],
        );
        let result = driver
            .run_query(&command, &QueryContext::empty(), DEFAULT_QUERY_TIMEOUT, None)
            .into_value()?;

        let collections = array_at(&result, &["cursor", "firstBatch"])?
            .iter()
            .filter_map(|collection| {
                Some(Collection {
                    name: string_at(collection, "name")?,
                    collection_type: string_at(collection, "type")
                        .unwrap_or_else(|| "collection".to_string()),
                })
            })
            .collect();

        Ok(CollectionList { collections })
    }
}

/// Samples documents of a collection and infers its schema and value distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetCollectionSchema {
    pub namespace: Namespace,
    pub sample_size: u32,
}

impl GetCollectionSchema {
    pub fn new(namespace: Namespace, sample_size: u32) -> Self {
        Self {
            namespace,
            sample_size,
        }
    }
}

impl Slice for GetCollectionSchema {
    type Output = CollectionSchema;

    fn id(&self) -> String {
        format!("GetCollectionSchema::{}::{}", self.namespace, self.sample_size)
    }

    fn query_using_driver(&self, driver: &dyn MongoDbDriver) -> Result<CollectionSchema, AccessError> {
        if !self.namespace.is_valid() {
            return Ok(CollectionSchema::empty(self.namespace.clone()));
        }

        let sample = Node::new(
            (),
            vec![
                IsCommand::new(CommandType::FindMany).into(),
                HasCollectionReference::known(None, (), self.namespace.clone()).into(),
                HasFilter::new(Vec::new()).into(),
            ],
        );
        let documents = match driver
            .run_query(
                &sample,
                &QueryContext::empty(),
                DEFAULT_QUERY_TIMEOUT,
                Some(self.sample_size),
            )
            .into_value()?
        {
            Value::Array(documents) => documents,
            other => {
                return Err(AccessError::UnexpectedShape(format!(
                    "expected sampled documents, got {:?}",
                    other
                )))
            }
        };

        debug!(
            "Sampled {} documents of {}",
            documents.len(),
            self.namespace
        );

        let schema = documents
            .iter()
            .map(BsonType::infer_from_value)
            .reduce(|merged, next| BsonType::merge_schema_together(&merged, &next))
            .unwrap_or_else(|| BsonType::Object(BTreeMap::new()))
            .flatten_any_of_references();

        Ok(CollectionSchema::new(self.namespace.clone(), schema)
            .with_data_distribution(DataDistribution::generate(&documents)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::testing::StubDriver;
    use crate::access::QueryResult;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_list_databases() {
        let driver = StubDriver::new().answering(
            "listDatabases",
            QueryResult::Run(Value::document([
                (
                    "databases",
                    Value::Array(vec![
                        Value::document([("name", Value::string("admin"))]),
                        Value::document([("name", Value::string("myDb"))]),
                    ]),
                ),
                ("ok", Value::Double(1.0)),
            ])),
        );

        let databases = ListDatabases.query_using_driver(&driver).unwrap();
        assert_eq!(
            databases.databases,
            vec![
                Database { name: "admin".to_string() },
                Database { name: "myDb".to_string() },
            ]
        );
        assert!(databases.contains("myDb"));
        assert!(driver.scripts()[0].contains(r#"db.getSiblingDB("admin").runCommand({"listDatabases": 1})"#));
    }

    #[test]
    fn test_list_databases_failures_are_errors() {
        let driver = StubDriver::new().answering("listDatabases", QueryResult::NotRun);
        assert_eq!(ListDatabases.query_using_driver(&driver), Err(AccessError::NotRun));

        let driver = StubDriver::new().answering(
            "listDatabases",
            QueryResult::Run(Value::document([("ok", Value::Double(0.0))])),
        );
        assert!(matches!(
            ListDatabases.query_using_driver(&driver),
            Err(AccessError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn test_list_collections() {
        let driver = StubDriver::new().answering(
            "listCollections",
            QueryResult::Run(Value::document([(
                "cursor",
                Value::document([(
                    "firstBatch",
                    Value::Array(vec![
                        Value::document([
                            ("name", Value::string("books")),
                            ("type", Value::string("collection")),
                        ]),
                        Value::document([
                            ("name", Value::string("bookTitles")),
                            ("type", Value::string("view")),
                        ]),
                    ]),
                )]),
            )])),
        );

        let collections = ListCollections::new("library").query_using_driver(&driver).unwrap();
        assert_eq!(
            collections.collections,
            vec![
                Collection {
                    name: "books".to_string(),
                    collection_type: "collection".to_string()
                },
                Collection {
                    name: "bookTitles".to_string(),
                    collection_type: "view".to_string()
                },
            ]
        );
        assert!(driver.scripts()[0]
            .contains(r#"runCommand({"listCollections": 1, "authorizedCollections": true})"#));
    }

    #[test]
    fn test_blank_database_has_no_collections() {
        let driver = StubDriver::new();
        assert_eq!(
            ListCollections::new(" ").query_using_driver(&driver),
            Ok(CollectionList::default())
        );
        assert!(driver.scripts().is_empty());
    }

    #[test]
    fn test_collection_schema_is_merged_from_samples() {
        let driver = StubDriver::new().answering(
            "find",
            QueryResult::Run(Value::Array(vec![
                Value::document([("title", Value::string("Dune")), ("pages", Value::Int32(412))]),
                Value::document([("title", Value::string("Emma")), ("pages", Value::Null)]),
                Value::document([("title", Value::string("Ulysses")), ("isbn", Value::string("x"))]),
            ])),
        );

        let namespace = Namespace::new("library", "books");
        let schema = GetCollectionSchema::new(namespace.clone(), 10)
            .query_using_driver(&driver)
            .unwrap();

        assert_eq!(schema.namespace, namespace);
        assert_eq!(schema.type_of("title"), BsonType::String);
        assert_eq!(
            schema.type_of("pages"),
            BsonType::any_of([BsonType::Int32, BsonType::Null])
        );
        assert_eq!(schema.type_of("isbn"), BsonType::String);
        assert_eq!(schema.type_of("author"), BsonType::Null);
        assert!(driver.scripts()[0].contains(".find({}).limit(10)"));
        assert!(schema.data_distribution.distribution_for_path("title").is_some());
    }

    #[test]
    fn test_invalid_namespace_has_an_empty_schema() {
        let driver = StubDriver::new();
        let namespace = Namespace::new("", "books");
        assert_eq!(
            GetCollectionSchema::new(namespace.clone(), 10).query_using_driver(&driver),
            Ok(CollectionSchema::empty(namespace))
        );
        assert!(driver.scripts().is_empty());
    }
}
