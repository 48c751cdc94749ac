//! BSON type model
//!
//! A closed set of types used for type-mismatch checks and for synthesizing
//! default values of runtime variables when rendering shell code.

use std::collections::{BTreeMap, BTreeSet};

use super::value::Value;

/// Inferred type of a field or value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BsonType {
    Double,
    String,
    Object(BTreeMap<String, BsonType>),
    Array(Box<BsonType>),
    Boolean,
    Date,
    ObjectId,
    Int32,
    Int64,
    Decimal128,
    Null,
    Any,
    AnyOf(BTreeSet<BsonType>),
    Uuid,
    Enum {
        members: BTreeSet<String>,
        name: Option<String>,
    },
}

impl BsonType {
    /// Builds a union, flattening nested unions. A union of one member is that member.
    pub fn any_of(types: impl IntoIterator<Item = BsonType>) -> BsonType {
        let mut members = BTreeSet::new();
        for ty in types {
            match ty {
                BsonType::AnyOf(nested) => members.extend(nested),
                other => {
                    members.insert(other);
                }
            }
        }

        match members.len() {
            0 => BsonType::Any,
            1 => members.into_iter().next().unwrap_or(BsonType::Any),
            _ => BsonType::AnyOf(members),
        }
    }

    pub fn nullable(self) -> BsonType {
        BsonType::any_of([BsonType::Null, self])
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, BsonType)>) -> BsonType {
        BsonType::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn array(element: BsonType) -> BsonType {
        BsonType::Array(Box::new(element))
    }

    pub fn enumeration<K: Into<String>>(
        members: impl IntoIterator<Item = K>,
        name: Option<&str>,
    ) -> BsonType {
        BsonType::Enum {
            members: members.into_iter().map(Into::into).collect(),
            name: name.map(str::to_string),
        }
    }

    /// Structural compatibility: can a value of `self` be stored where `other` is expected.
    pub fn is_assignable_to(&self, other: &BsonType) -> bool {
        match self {
            BsonType::Null => match other {
                BsonType::Null | BsonType::Any => true,
                BsonType::AnyOf(members) => members.contains(&BsonType::Null),
                _ => false,
            },
            BsonType::AnyOf(members) => match other {
                BsonType::Any => true,
                BsonType::Null => members.iter().all(|m| *m == BsonType::Null),
                _ => members
                    .iter()
                    .filter(|m| **m != BsonType::Null)
                    .all(|m| m.is_assignable_to(other)),
            },
            BsonType::Object(fields) => match other {
                BsonType::Any => true,
                BsonType::AnyOf(members) => members.iter().any(|m| self.is_assignable_to(m)),
                BsonType::Object(other_fields) => fields.iter().all(|(key, ty)| {
                    other_fields
                        .get(key)
                        .is_some_and(|other_ty| ty.is_assignable_to(other_ty))
                }),
                _ => false,
            },
            BsonType::Array(element) => match other {
                BsonType::Any => true,
                BsonType::AnyOf(members) => members.iter().any(|m| self.is_assignable_to(m)),
                BsonType::Array(other_element) => element.is_assignable_to(other_element),
                _ => element.is_assignable_to(other),
            },
            BsonType::Enum { members, .. } => match other {
                BsonType::Enum {
                    members: other_members,
                    ..
                } => members.is_subset(other_members),
                BsonType::Any | BsonType::String => true,
                BsonType::AnyOf(union) => union.iter().any(|m| self.is_assignable_to(m)),
                _ => self.is_scalar_assignable_to(other),
            },
            _ => self.is_scalar_assignable_to(other),
        }
    }

    fn is_scalar_assignable_to(&self, other: &BsonType) -> bool {
        if self == other || *self == BsonType::Any {
            return true;
        }

        match (self, other) {
            (_, BsonType::Any) => true,
            (_, BsonType::AnyOf(members)) => members.iter().any(|m| self.is_assignable_to(m)),
            (_, BsonType::Array(element)) => self.is_assignable_to(element),
            (BsonType::Int32, BsonType::Int64) => true,
            (BsonType::Double, BsonType::Decimal128) => true,
            _ => false,
        }
    }

    /// Number of distinct values a field of this type can hold.
    pub fn cardinality(&self) -> u64 {
        match self {
            BsonType::Boolean => 2,
            BsonType::Null => 1,
            BsonType::Enum { members, .. } => members.len() as u64,
            BsonType::AnyOf(members) => members
                .iter()
                .map(BsonType::cardinality)
                .max()
                .unwrap_or(u64::MAX),
            _ => u64::MAX,
        }
    }

    /// Unifies two sampled document shapes into one.
    pub fn merge_schema_together(first: &BsonType, second: &BsonType) -> BsonType {
        match (first, second) {
            (BsonType::Object(a), BsonType::Object(b)) => {
                let mut merged = a.clone();
                for (key, ty) in b {
                    let next = match merged.get(key) {
                        Some(existing) => BsonType::merge_schema_together(existing, ty),
                        None => ty.clone(),
                    };
                    merged.insert(key.clone(), next);
                }
                BsonType::Object(merged)
            }
            (BsonType::Array(a), BsonType::Array(b)) => {
                BsonType::array(BsonType::merge_schema_together(a, b))
            }
            (BsonType::AnyOf(_), _) | (_, BsonType::AnyOf(_)) => {
                BsonType::any_of([first.clone(), second.clone()])
            }
            _ if first == second => first.clone(),
            _ => BsonType::any_of([first.clone(), second.clone()]),
        }
    }

    /// Rebuilds the type so no union is left with nested unions or a single member.
    pub fn flatten_any_of_references(&self) -> BsonType {
        match self {
            BsonType::Object(fields) => BsonType::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.flatten_any_of_references()))
                    .collect(),
            ),
            BsonType::Array(element) => BsonType::array(element.flatten_any_of_references()),
            BsonType::AnyOf(members) => {
                BsonType::any_of(members.iter().map(BsonType::flatten_any_of_references))
            }
            other => other.clone(),
        }
    }

    /// The type a non-null value would have.
    pub fn to_non_nullable(&self) -> BsonType {
        match self {
            BsonType::AnyOf(members) => members
                .iter()
                .find(|m| **m != BsonType::Null)
                .map(BsonType::to_non_nullable)
                .unwrap_or(BsonType::Any),
            BsonType::Null => BsonType::Any,
            other => other.clone(),
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            BsonType::Null | BsonType::Any => true,
            BsonType::AnyOf(members) => members.contains(&BsonType::Null),
            _ => false,
        }
    }

    /// Infers the stored type of a literal. Documents become objects keyed by field.
    pub fn infer_from_value(value: &Value) -> BsonType {
        match value {
            Value::Null => BsonType::Null,
            Value::Boolean(_) => BsonType::Boolean,
            Value::Int32(_) => BsonType::Int32,
            Value::Int64(_) => BsonType::Int64,
            Value::Double(_) => BsonType::Double,
            Value::Decimal128(_) => BsonType::Decimal128,
            Value::String(_) => BsonType::String,
            Value::ObjectId(_) => BsonType::ObjectId,
            Value::Date(_) => BsonType::Date,
            Value::Uuid(_) => BsonType::Uuid,
            Value::Array(items) if items.is_empty() => BsonType::array(BsonType::Any),
            Value::Array(items) => {
                BsonType::array(BsonType::any_of(items.iter().map(BsonType::infer_from_value)))
            }
            Value::Document(pairs) => BsonType::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), BsonType::infer_from_value(v)))
                    .collect(),
            ),
            Value::AsIs(_) | Value::Opaque(_) => BsonType::Any,
        }
    }

    /// Maps a declared Java type name to its BSON type.
    ///
    /// `enum_members` is set when the name resolves to an enum declared in the analyzed file.
    pub fn java_type_to_bson(type_name: &str, enum_members: Option<&[String]>) -> BsonType {
        if let Some(members) = enum_members {
            return BsonType::enumeration(members.iter().cloned(), Some(type_name));
        }

        let raw = type_name.trim();
        if raw.ends_with("[]") {
            return BsonType::array(BsonType::Any).nullable();
        }

        // Generic arguments are erased, only the raw class matters.
        let erased = raw.split('<').next().unwrap_or(raw).trim();
        let simple = erased.rsplit('.').next().unwrap_or(erased);

        match simple {
            "float" | "double" => BsonType::Double,
            "Float" | "Double" => BsonType::Double.nullable(),
            "boolean" => BsonType::Boolean,
            "Boolean" => BsonType::Boolean.nullable(),
            "short" | "int" | "byte" => BsonType::Int32,
            "Short" | "Integer" | "Byte" => BsonType::Int32.nullable(),
            "long" => BsonType::Int64,
            "Long" | "BigInteger" => BsonType::Int64.nullable(),
            "char" => BsonType::String,
            "String" | "CharSequence" | "Character" => BsonType::String.nullable(),
            "Date" | "Instant" | "LocalDate" | "LocalDateTime" | "ZonedDateTime" => {
                BsonType::Date.nullable()
            }
            "UUID" => BsonType::Uuid.nullable(),
            "ObjectId" => BsonType::ObjectId.nullable(),
            "BigDecimal" | "Decimal128" => BsonType::Decimal128.nullable(),
            "List" | "ArrayList" | "LinkedList" | "Set" | "HashSet" | "TreeSet" | "Collection"
            | "Iterable" => BsonType::array(BsonType::Any).nullable(),
            "Map" | "HashMap" | "Document" | "Bson" | "BsonDocument" => BsonType::Any.nullable(),
            "Object" | "var" => BsonType::Any,
            _ => BsonType::Object(BTreeMap::new()).nullable(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, BsonType::Array(_))
    }
}

impl Default for BsonType {
    fn default() -> Self {
        BsonType::Any
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn every_kind() -> Vec<BsonType> {
        vec![
            BsonType::Double,
            BsonType::String,
            BsonType::object([("a", BsonType::Int32)]),
            BsonType::array(BsonType::String),
            BsonType::Boolean,
            BsonType::Date,
            BsonType::ObjectId,
            BsonType::Int32,
            BsonType::Int64,
            BsonType::Decimal128,
            BsonType::Null,
            BsonType::Any,
            BsonType::any_of([BsonType::Null, BsonType::String]),
            BsonType::Uuid,
            BsonType::enumeration(["A", "B"], Some("Kind")),
        ]
    }

    #[test]
    fn test_assignability_is_reflexive() {
        for ty in every_kind() {
            assert!(ty.is_assignable_to(&ty), "{:?} should accept itself", ty);
        }
    }

    #[test]
    fn test_any_is_universal_sink_and_source() {
        for ty in every_kind() {
            assert!(ty.is_assignable_to(&BsonType::Any), "{:?} -> Any", ty);
            assert!(BsonType::Any.is_assignable_to(&ty), "Any -> {:?}", ty);
        }
    }

    #[test]
    fn test_any_of_flattens_and_collapses_singletons() {
        let nested = BsonType::any_of([
            BsonType::String,
            BsonType::any_of([BsonType::Null, BsonType::String]),
        ]);
        assert_eq!(
            nested,
            BsonType::AnyOf([BsonType::Null, BsonType::String].into_iter().collect())
        );
        assert_eq!(BsonType::any_of([BsonType::Int32]), BsonType::Int32);
    }

    #[test]
    fn test_union_target_accepts_when_any_member_matches() {
        let target = BsonType::any_of([BsonType::Null, BsonType::String]);
        assert!(BsonType::String.is_assignable_to(&target));
        assert!(BsonType::Null.is_assignable_to(&target));
        assert!(!BsonType::Int32.is_assignable_to(&target));
    }

    #[test]
    fn test_numeric_widening() {
        assert!(BsonType::Int32.is_assignable_to(&BsonType::Int64));
        assert!(!BsonType::Int64.is_assignable_to(&BsonType::Int32));
        assert!(BsonType::Double.is_assignable_to(&BsonType::Decimal128));
    }

    #[test]
    fn test_scalar_assignable_to_array_of_scalar() {
        assert!(BsonType::String.is_assignable_to(&BsonType::array(BsonType::String)));
        assert!(BsonType::array(BsonType::String).is_assignable_to(&BsonType::String));
        assert!(!BsonType::Boolean.is_assignable_to(&BsonType::array(BsonType::String)));
    }

    #[test]
    fn test_enum_assignability() {
        let small = BsonType::enumeration(["A"], None);
        let large = BsonType::enumeration(["A", "B"], None);
        assert!(small.is_assignable_to(&large));
        assert!(!large.is_assignable_to(&small));
        assert!(large.is_assignable_to(&BsonType::String));
    }

    #[test]
    fn test_cardinality() {
        assert_eq!(BsonType::Boolean.cardinality(), 2);
        assert_eq!(BsonType::enumeration(["A", "B", "C"], None).cardinality(), 3);
        assert_eq!(
            BsonType::any_of([BsonType::Null, BsonType::Boolean]).cardinality(),
            2
        );
        assert_eq!(BsonType::String.cardinality(), u64::MAX);
    }

    #[test]
    fn test_merge_schema_unions_keys_and_types() {
        let first = BsonType::object([("a", BsonType::String), ("b", BsonType::Int32)]);
        let second = BsonType::object([("a", BsonType::Int32), ("c", BsonType::Boolean)]);

        let merged = BsonType::merge_schema_together(&first, &second);
        assert_eq!(
            merged,
            BsonType::object([
                ("a", BsonType::any_of([BsonType::String, BsonType::Int32])),
                ("b", BsonType::Int32),
                ("c", BsonType::Boolean),
            ])
        );
    }

    #[test]
    fn test_to_non_nullable() {
        let ty = BsonType::any_of([BsonType::Null, BsonType::Date]);
        assert_eq!(ty.to_non_nullable(), BsonType::Date);
        assert_eq!(BsonType::Null.to_non_nullable(), BsonType::Any);
    }

    #[test]
    fn test_java_type_mapping() {
        assert_eq!(BsonType::java_type_to_bson("int", None), BsonType::Int32);
        assert_eq!(
            BsonType::java_type_to_bson("java.lang.String", None),
            BsonType::String.nullable()
        );
        assert_eq!(
            BsonType::java_type_to_bson("List<String>", None),
            BsonType::array(BsonType::Any).nullable()
        );
        assert_eq!(
            BsonType::java_type_to_bson("BigDecimal", None),
            BsonType::Decimal128.nullable()
        );
        let members = vec!["ACTIVE".to_string(), "CLOSED".to_string()];
        assert_eq!(
            BsonType::java_type_to_bson("Status", Some(&members)),
            BsonType::enumeration(["ACTIVE", "CLOSED"], Some("Status"))
        );
    }

    #[test]
    fn test_infer_from_document() {
        let doc = Value::document([
            ("name", Value::from("x")),
            ("tags", Value::Array(vec![Value::from("a"), Value::from(1)])),
        ]);
        assert_eq!(
            BsonType::infer_from_value(&doc),
            BsonType::object([
                ("name", BsonType::String),
                (
                    "tags",
                    BsonType::array(BsonType::any_of([BsonType::String, BsonType::Int32]))
                ),
            ])
        );
    }
}
