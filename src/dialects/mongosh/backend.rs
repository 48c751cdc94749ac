//! Shell script emitter
//!
//! The backend appends shell text to a buffer while tracking the column and a stack of
//! indentation scopes. Every literal goes through `register_constant` and every
//! runtime reference through `register_variable`; variables are hoisted into a
//! `var name = default` prelude when the output is computed.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::mql::{BsonType, LocalVariable, QueryContext, Value};

const PADDING_SPACES: usize = 2;

/// Either a literal that is serialized in place, or the name of a hoisted variable.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextValue {
    Constant(Value),
    Variable(String),
}

/// A body emitted inside a function call's parentheses.
pub type CallBody<'a> = Box<dyn FnOnce(&mut MongoshBackend) + 'a>;

#[derive(Debug, Clone)]
pub struct MongoshBackend {
    variables: BTreeMap<String, LocalVariable>,
    pub pretty_print: bool,
    output: String,
    line: usize,
    column: usize,
    padding_scopes: Vec<usize>,
}

impl Default for MongoshBackend {
    fn default() -> Self {
        Self::new(false)
    }
}

impl MongoshBackend {
    pub fn new(pretty_print: bool) -> Self {
        Self {
            variables: BTreeMap::new(),
            pretty_print,
            output: String::new(),
            line: 0,
            column: 0,
            padding_scopes: vec![0],
        }
    }

    /// Pre-registers the variables the caller wants to bind, with their defaults.
    pub fn apply_query_expansions(&mut self, context: &QueryContext) -> &mut Self {
        for (name, variable) in &context.expansions {
            self.register_variable(
                name,
                variable.bson_type.clone(),
                variable.default_value.clone(),
            );
        }
        self
    }

    pub fn register_constant(&mut self, value: impl Into<Value>) -> ContextValue {
        ContextValue::Constant(value.into())
    }

    /// The first registration of a name wins, so expansions keep their defaults.
    pub fn register_variable(
        &mut self,
        name: &str,
        bson_type: BsonType,
        default_value: Option<Value>,
    ) -> ContextValue {
        let name = sanitize_identifier(name);
        self.variables
            .entry(name.clone())
            .or_insert_with(|| LocalVariable::new(bson_type, default_value));
        ContextValue::Variable(name)
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn emit_db_access(&mut self) -> &mut Self {
        self.emit_as_is("db");
        self.emit_property_access()
    }

    pub fn emit_database_access(&mut self, database: ContextValue) -> &mut Self {
        let next_padding = self.column.saturating_sub(1);

        self.emit_as_is("getSiblingDB");
        self.emit_function_call(
            false,
            vec![Box::new(move |backend: &mut MongoshBackend| {
                backend.emit_context_value(&database);
            })],
        );

        if self.pretty_print {
            self.padding_scopes.push(next_padding);
            self.emit_new_line();
        }

        self.emit_property_access()
    }

    pub fn emit_collection_access(&mut self, collection: ContextValue) -> &mut Self {
        self.emit_as_is("getCollection");
        self.emit_function_call(
            false,
            vec![Box::new(move |backend: &mut MongoshBackend| {
                backend.emit_context_value(&collection);
            })],
        );

        if self.pretty_print {
            self.emit_new_line();
        }

        self.emit_property_access()
    }

    pub fn emit_object_start(&mut self, long: bool) -> &mut Self {
        self.emit_scope_start("{", long)
    }

    pub fn emit_object_end(&mut self, long: bool) -> &mut Self {
        self.emit_scope_end("}", long)
    }

    pub fn emit_array_start(&mut self, long: bool) -> &mut Self {
        self.emit_scope_start("[", long)
    }

    pub fn emit_array_end(&mut self, long: bool) -> &mut Self {
        self.emit_scope_end("]", long)
    }

    fn emit_scope_start(&mut self, token: &str, long: bool) -> &mut Self {
        let next_padding = self.current_padding() + PADDING_SPACES;
        self.emit_as_is(token);
        if long && self.pretty_print {
            self.padding_scopes.push(next_padding);
            self.emit_new_line();
        }
        self
    }

    fn emit_scope_end(&mut self, token: &str, long: bool) -> &mut Self {
        if long && self.pretty_print {
            self.pop_padding();
            self.emit_new_line();
        }
        self.emit_as_is(token)
    }

    pub fn emit_object_key(&mut self, key: &ContextValue) -> &mut Self {
        match key {
            ContextValue::Variable(name) => {
                self.emit_as_is(&format!("[{}]", name));
            }
            ContextValue::Constant(value) => {
                self.emit_primitive(value);
            }
        }
        self.emit_as_is(": ")
    }

    pub fn emit_object_value_end(&mut self, long: bool) -> &mut Self {
        self.emit_as_is(", ");
        if long && self.pretty_print {
            self.emit_new_line();
        }
        self
    }

    pub fn emit_function_name(&mut self, name: &str) -> &mut Self {
        self.emit_as_is(name)
    }

    pub fn emit_function_call(&mut self, long: bool, bodies: Vec<CallBody<'_>>) -> &mut Self {
        let break_lines = long && self.pretty_print && !bodies.is_empty();

        self.emit_as_is("(");
        if break_lines {
            let next_padding = self.column.saturating_sub(PADDING_SPACES / 2);
            self.padding_scopes.push(next_padding);
            self.emit_new_line();
        }

        for (index, body) in bodies.into_iter().enumerate() {
            if index > 0 {
                if break_lines {
                    self.emit_new_line();
                }
                self.emit_as_is(", ");
            }
            body(self);
        }

        if break_lines {
            self.pop_padding();
            self.emit_new_line();
        }

        self.emit_as_is(")")
    }

    pub fn emit_property_access(&mut self) -> &mut Self {
        self.emit_as_is(".")
    }

    pub fn emit_comment(&mut self, comment: &str) -> &mut Self {
        let comment = format!("/* {} */", comment.replace("*/", "* /"));
        self.emit_as_is(&comment)
    }

    pub fn emit_context_value(&mut self, value: &ContextValue) -> &mut Self {
        match value {
            ContextValue::Constant(value) => self.emit_primitive(value),
            ContextValue::Variable(name) => self.emit_as_is(name),
        }
    }

    pub fn emit_new_line(&mut self) -> &mut Self {
        self.output.push('\n');
        let padding = " ".repeat(self.current_padding());
        self.output.push_str(&padding);

        self.line += 1;
        self.column = 1 + padding.len();
        self
    }

    /// Appends trusted text verbatim. User-provided text must go through a context value.
    pub fn emit_as_is(&mut self, text: &str) -> &mut Self {
        self.output.push_str(text);
        self.column += text.chars().count();
        self
    }

    fn emit_primitive(&mut self, value: &Value) -> &mut Self {
        let serialized = serialize_primitive(value);
        self.emit_as_is(&serialized)
    }

    fn current_padding(&self) -> usize {
        self.padding_scopes.last().copied().unwrap_or(0)
    }

    fn pop_padding(&mut self) {
        if self.padding_scopes.len() > 1 {
            self.padding_scopes.pop();
        }
    }

    fn variable_declarations(&self) -> Vec<String> {
        self.variables
            .iter()
            .map(|(name, variable)| {
                let value = match &variable.default_value {
                    Some(value) if !value.is_blank_as_is() => value.clone(),
                    _ => default_value_of_bson_type(&variable.bson_type),
                };
                format!("var {} = {}", name, serialize_primitive(&value))
            })
            .collect()
    }

    /// The program: sorted variable declarations, a blank line, then the emitted body.
    pub fn compute_output(&self) -> String {
        let prelude: String = self
            .variable_declarations()
            .into_iter()
            .map(|declaration| declaration + "\n")
            .collect();

        format!("{}\n{}", prelude, self.output).trim().to_string()
    }

    /// The program wrapped in a function that is invoked in place, so it can be used as
    /// an expression.
    pub fn compute_self_invoking_output(&self) -> String {
        let prelude: String = self
            .variable_declarations()
            .into_iter()
            .map(|declaration| declaration + "; ")
            .collect();

        format!(
            "(function () {{ {} return {}; }})()",
            prelude,
            self.output.trim()
        )
    }
}

/// Serializes a literal as shell source.
pub fn serialize_primitive(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Double(v) => serialize_double(*v),
        Value::Decimal128(literal) => format!("Decimal128({})", quote_for_javascript(literal)),
        Value::String(s) => quote_for_javascript(s),
        Value::ObjectId(hex) => format!("ObjectId({})", quote_for_javascript(hex)),
        Value::Date(date) => format!("ISODate(\"{}\")", date.format("%Y-%m-%dT%H:%M:%S")),
        Value::Uuid(uuid) => format!("UUID(\"{}\")", uuid),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(serialize_primitive).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Document(pairs) => {
            let pairs: Vec<String> = pairs
                .iter()
                .map(|(key, value)| {
                    format!("{}: {}", quote_for_javascript(key), serialize_primitive(value))
                })
                .collect();
            format!("{{{}}}", pairs.join(", "))
        }
        Value::AsIs(raw) => raw.clone(),
        Value::Opaque(_) => "{}".to_string(),
    }
}

fn serialize_double(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// The value a variable gets when the caller did not bind one.
pub fn default_value_of_bson_type(bson_type: &BsonType) -> Value {
    match bson_type {
        BsonType::Any => Value::string("any"),
        BsonType::AnyOf(members) => {
            let first = members.iter().find(|member| **member != BsonType::Null);
            default_value_of_bson_type(first.unwrap_or(&BsonType::Any))
        }
        BsonType::Array(_) => Value::Array(Vec::new()),
        BsonType::Boolean => Value::Boolean(false),
        BsonType::Date => NaiveDate::from_ymd_opt(2009, 2, 11)
            .and_then(|date| date.and_hms_opt(18, 0, 0))
            .map(Value::Date)
            .unwrap_or(Value::Null),
        BsonType::Decimal128 => Value::Decimal128("0".to_string()),
        BsonType::Double => Value::Double(0.0),
        BsonType::Int32 => Value::Int32(0),
        BsonType::Int64 => Value::Int64(0),
        BsonType::Uuid => Value::Uuid(Uuid::nil()),
        BsonType::Null => Value::Null,
        BsonType::Object(_) => Value::Document(Vec::new()),
        BsonType::ObjectId => Value::ObjectId("0".repeat(24)),
        BsonType::String => Value::string(""),
        BsonType::Enum { members, .. } => members
            .iter()
            .next()
            .map(|member| Value::string(member.clone()))
            .unwrap_or_else(|| Value::string("")),
    }
}

/// A double-quoted JavaScript string literal holding `text`.
pub fn quote_for_javascript(text: &str) -> String {
    // JSON strings are JavaScript strings once the line separators are escaped
    serde_json::Value::String(text.to_string())
        .to_string()
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

fn sanitize_identifier(name: &str) -> String {
    let mut identifier: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '$' { c } else { '_' })
        .collect();
    if identifier.is_empty() || identifier.starts_with(|c: char| c.is_ascii_digit()) {
        identifier.insert(0, '_');
    }
    identifier
}
