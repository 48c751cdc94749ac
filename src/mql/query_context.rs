//! Per-render settings passed to dialect formatters.

use std::collections::BTreeMap;

use super::bson_type::BsonType;
use super::value::Value;

/// A named runtime variable that the rendered script declares up front.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVariable {
    pub bson_type: BsonType,
    pub default_value: Option<Value>,
}

impl LocalVariable {
    pub fn new(bson_type: BsonType, default_value: Option<Value>) -> Self {
        Self {
            bson_type,
            default_value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryContext {
    pub expansions: BTreeMap<String, LocalVariable>,
    pub pretty_print: bool,
    /// Set when the query runs without user interaction (sampling, explain for insights).
    pub automatically_run: bool,
}

impl QueryContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn empty_with(automatically_run: bool) -> Self {
        Self {
            automatically_run,
            ..Self::default()
        }
    }

    pub fn will_automatically_run(&self) -> Self {
        Self {
            automatically_run: true,
            ..self.clone()
        }
    }

    pub fn with_pretty_print(&self, pretty_print: bool) -> Self {
        Self {
            pretty_print,
            ..self.clone()
        }
    }

    pub fn with_expansion(&self, name: impl Into<String>, variable: LocalVariable) -> Self {
        let mut copy = self.clone();
        copy.expansions.insert(name.into(), variable);
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copies_do_not_touch_the_original() {
        let context = QueryContext::empty();
        let auto = context.will_automatically_run();
        let pretty = auto.with_pretty_print(true);

        assert!(!context.automatically_run);
        assert!(auto.automatically_run && !auto.pretty_print);
        assert!(pretty.automatically_run && pretty.pretty_print);
    }

    #[test]
    fn test_expansions() {
        let context = QueryContext::empty_with(true)
            .with_expansion("limit", LocalVariable::new(BsonType::Int32, Some(Value::from(5))));
        assert_eq!(context.expansions["limit"].default_value, Some(Value::Int32(5)));
        assert!(context.automatically_run);
    }
}
