//! Namespaces and sampled collection schemas

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::bson_type::BsonType;
use super::data_distribution::DataDistribution;

/// A `database.collection` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.database.trim().is_empty() && !self.collection.trim().is_empty()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl FromStr for Namespace {
    type Err = std::convert::Infallible;

    /// Splits at the first dot. Collection names may contain dots, database names can't.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.split_once('.') {
            Some((database, collection)) => Namespace::new(database, collection),
            None => Namespace::new(s, ""),
        })
    }
}

/// Snapshot of a collection's shape, inferred from sampled documents.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    pub namespace: Namespace,
    pub schema: BsonType,
    pub data_distribution: DataDistribution,
}

impl CollectionSchema {
    pub fn new(namespace: Namespace, schema: BsonType) -> Self {
        Self {
            namespace,
            schema,
            data_distribution: DataDistribution::default(),
        }
    }

    pub fn with_data_distribution(mut self, data_distribution: DataDistribution) -> Self {
        self.data_distribution = data_distribution;
        self
    }

    /// Schema with no known fields, used when the namespace can't be sampled.
    pub fn empty(namespace: Namespace) -> Self {
        Self::new(namespace, BsonType::Object(BTreeMap::new()))
    }

    /// Type of a dotted field path. Paths that are absent from every sample are `Null`.
    pub fn type_of(&self, field_path: &str) -> BsonType {
        let segments: Vec<&str> = field_path.split('.').collect();
        type_of_segments(&self.schema, &segments)
    }
}

fn type_of_segments(root: &BsonType, segments: &[&str]) -> BsonType {
    let Some((current, rest)) = segments.split_first() else {
        return root.clone();
    };

    match root {
        BsonType::Object(fields) => match fields.get(*current) {
            Some(field_type) => type_of_segments(field_type, rest),
            None => BsonType::Null,
        },
        BsonType::Array(element) => {
            if current.parse::<usize>().is_ok() {
                type_of_segments(element, rest)
            } else {
                type_of_segments(element, segments)
            }
        }
        BsonType::AnyOf(members) => BsonType::any_of(
            members
                .iter()
                .map(|member| type_of_segments(member, segments)),
        ),
        _ => BsonType::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_parses_at_first_dot() {
        let ns: Namespace = "db.coll.with.dots".parse().unwrap();
        assert_eq!(ns, Namespace::new("db", "coll.with.dots"));
        assert_eq!(ns.to_string(), "db.coll.with.dots");
        assert!(ns.is_valid());
        assert!(!Namespace::new("db", " ").is_valid());
    }

    #[test]
    fn test_type_of_root_field() {
        let schema = CollectionSchema::new(
            Namespace::new("a", "b"),
            BsonType::object([("myField", BsonType::Int32)]),
        );
        assert_eq!(schema.type_of("myField"), BsonType::Int32);
        assert_eq!(schema.type_of("other"), BsonType::Null);
    }

    #[test]
    fn test_type_of_keeps_unions() {
        let union = BsonType::any_of([BsonType::String, BsonType::Int32]);
        let schema = CollectionSchema::new(
            Namespace::new("a", "b"),
            BsonType::object([("myField", union.clone())]),
        );
        assert_eq!(schema.type_of("myField"), union);
    }

    #[test]
    fn test_type_of_iterates_arrays_of_objects() {
        let schema = CollectionSchema::new(
            Namespace::new("a", "b"),
            BsonType::object([(
                "myField",
                BsonType::array(BsonType::any_of([
                    BsonType::String,
                    BsonType::object([("otherField", BsonType::Double)]),
                ])),
            )]),
        );

        let expected = BsonType::any_of([BsonType::Null, BsonType::Double]);
        assert_eq!(schema.type_of("myField.0.otherField"), expected);
        assert_eq!(schema.type_of("myField.otherField"), expected);
    }
}
