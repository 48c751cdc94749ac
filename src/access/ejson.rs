//! Extended JSON decoding
//!
//! Scripts return their results as relaxed or canonical extended JSON. Type tags
//! (`$oid`, `$date`, `$numberLong`...) are decoded into the matching [`Value`].

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value as Json};
use uuid::Uuid;

use super::AccessError;
use crate::mql::Value;

/// Decodes the text printed by a script. Blank output decodes to `None`.
pub fn decode(text: &str) -> Result<Option<Value>, AccessError> {
    let text = text.trim();
    if text.is_empty() || text == "undefined" {
        return Ok(None);
    }

    let json: Json = serde_json::from_str(text)
        .map_err(|error| AccessError::UnexpectedShape(format!("invalid extended JSON: {}", error)))?;
    from_json(&json).map(Some)
}

pub fn from_json(json: &Json) -> Result<Value, AccessError> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Boolean(*b),
        Json::Number(number) => match number.as_i64() {
            Some(n) => match i32::try_from(n) {
                Ok(n) => Value::Int32(n),
                Err(_) => Value::Int64(n),
            },
            None => Value::Double(number.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::String(s.clone()),
        Json::Array(items) => Value::Array(items.iter().map(from_json).collect::<Result<_, _>>()?),
        Json::Object(fields) => match type_tag(fields) {
            Some((tag, inner)) => from_type_tag(tag, inner)?,
            None => document(fields)?,
        },
    })
}

fn type_tag(fields: &Map<String, Json>) -> Option<(&str, &Json)> {
    if fields.len() != 1 {
        return None;
    }
    let (key, value) = fields.iter().next()?;
    matches!(
        key.as_str(),
        "$oid" | "$date" | "$numberLong" | "$numberInt" | "$numberDouble" | "$numberDecimal" | "$uuid"
    )
    .then_some((key.as_str(), value))
}

fn document(fields: &Map<String, Json>) -> Result<Value, AccessError> {
    fields
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Json::Object(inner) if key == "_id" && inner.is_empty() => generated_object_id(),
                other => from_json(other)?,
            };
            Ok((key.clone(), value))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Document)
}

fn from_type_tag(tag: &str, inner: &Json) -> Result<Value, AccessError> {
    match (tag, inner) {
        ("$oid", Json::String(hex)) => Ok(Value::ObjectId(hex.clone())),
        ("$date", date) => decode_date(date),
        ("$numberLong", Json::String(n)) => n
            .parse::<i64>()
            .map(Value::Int64)
            .map_err(|_| malformed(tag, inner)),
        ("$numberInt", Json::String(n)) => n
            .parse::<i32>()
            .map(Value::Int32)
            .map_err(|_| malformed(tag, inner)),
        ("$numberDouble", Json::String(n)) => n
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| malformed(tag, inner)),
        ("$numberDecimal", Json::String(n)) => Ok(Value::Decimal128(n.clone())),
        ("$uuid", Json::String(uuid)) => Uuid::parse_str(uuid)
            .map(Value::Uuid)
            .map_err(|_| malformed(tag, inner)),
        _ => Err(malformed(tag, inner)),
    }
}

/// `$date` holds an ISO-8601 string, or milliseconds since the epoch.
fn decode_date(date: &Json) -> Result<Value, AccessError> {
    let millis = match date {
        Json::String(iso) => {
            return DateTime::parse_from_rfc3339(iso)
                .map(|date| Value::Date(date.naive_utc()))
                .or_else(|_| {
                    NaiveDateTime::parse_from_str(iso, "%Y-%m-%dT%H:%M:%S%.f").map(Value::Date)
                })
                .map_err(|_| malformed("$date", date));
        }
        Json::Number(number) => number.as_i64(),
        Json::Object(fields) => match type_tag(fields) {
            Some(("$numberLong", Json::String(n))) => n.parse::<i64>().ok(),
            _ => None,
        },
        _ => None,
    };

    millis
        .and_then(DateTime::from_timestamp_millis)
        .map(|date| Value::Date(date.naive_utc()))
        .ok_or_else(|| malformed("$date", date))
}

/// A random 24 hex chars id, for documents whose `_id` could not be serialized.
fn generated_object_id() -> Value {
    let hex = Uuid::new_v4().simple().to_string();
    Value::ObjectId(hex[..24].to_string())
}

fn malformed(tag: &str, inner: &Json) -> AccessError {
    AccessError::UnexpectedShape(format!("malformed {} value: {}", tag, inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn decoded(text: &str) -> Value {
        decode(text).unwrap().unwrap()
    }

    #[test]
    fn test_decode_plain_json() {
        assert_eq!(
            decoded(r#"{"name": "Ada", "age": 36, "big": 5000000000, "ratio": 0.5, "tags": ["a"], "nothing": null}"#),
            Value::document([
                ("name", Value::string("Ada")),
                ("age", Value::Int32(36)),
                ("big", Value::Int64(5_000_000_000)),
                ("ratio", Value::Double(0.5)),
                ("tags", Value::Array(vec![Value::string("a")])),
                ("nothing", Value::Null),
            ])
        );
    }

    #[test]
    fn test_decode_type_tags() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();

        assert_eq!(
            decoded(r#"{"$oid": "507f1f77bcf86cd799439011"}"#),
            Value::ObjectId("507f1f77bcf86cd799439011".to_string())
        );
        assert_eq!(decoded(r#"{"$date": "2024-05-01T10:30:00Z"}"#), Value::Date(date));
        assert_eq!(
            decoded(r#"{"$date": {"$numberLong": "1714559400000"}}"#),
            Value::Date(date)
        );
        assert_eq!(decoded(r#"{"$numberLong": "42"}"#), Value::Int64(42));
        assert_eq!(decoded(r#"{"$numberInt": "7"}"#), Value::Int32(7));
        assert_eq!(decoded(r#"{"$numberDouble": "1.5"}"#), Value::Double(1.5));
        assert_eq!(
            decoded(r#"{"$numberDecimal": "3.14159265358979323846"}"#),
            Value::Decimal128("3.14159265358979323846".to_string())
        );
        assert_eq!(
            decoded(r#"{"$uuid": "67e55044-10b1-426f-9247-bb680e5fe0c8"}"#),
            Value::Uuid(Uuid::parse_str("67e55044-10b1-426f-9247-bb680e5fe0c8").unwrap())
        );
    }

    #[test]
    fn test_empty_id_gets_a_generated_object_id() {
        let document = decoded(r#"{"_id": {}, "name": "x"}"#);
        match document.get("_id") {
            Some(Value::ObjectId(hex)) => {
                assert_eq!(hex.len(), 24);
                assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
            }
            other => panic!("expected an ObjectId, got {:?}", other),
        }
        assert_eq!(document.get("name"), Some(&Value::string("x")));
    }

    #[test]
    fn test_objects_with_extra_keys_are_documents() {
        assert_eq!(
            decoded(r#"{"$oid": "abc", "other": 1}"#),
            Value::document([
                ("$oid", Value::string("abc")),
                ("other", Value::Int32(1)),
            ])
        );
    }

    #[test]
    fn test_blank_output_and_errors() {
        assert_eq!(decode("  "), Ok(None));
        assert_eq!(decode("undefined"), Ok(None));
        assert!(matches!(decode("{not json"), Err(AccessError::UnexpectedShape(_))));
        assert!(matches!(
            decode(r#"{"$numberLong": "forty-two"}"#),
            Err(AccessError::UnexpectedShape(_))
        ));
    }
}
