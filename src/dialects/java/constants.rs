//! Static resolution of Java expressions.
//!
//! Literals, negated numbers, concatenations of constants and `final` variables with
//! constant initializers fold to a `Value`. Everything else is a runtime value typed from
//! its declaration when one can be found in the file.

use tree_sitter::Node;

use super::tree::{
    enum_members, find_declaration, find_field_in_type, find_method_declarations,
    meaningful_expression, named_children, returned_expressions, MethodCall,
};
use super::{JavaSource, JavaSourceFile};
use crate::mql::components::{FieldName, FieldReference, HasFieldReference, HasValueReference};
use crate::mql::{BsonType, Node as MqlNode, Value};

/// Bounds how many declarations and helper methods are followed for one expression.
const MAX_RESOLUTION_DEPTH: usize = 16;

const LIST_FACTORIES: &[(&str, &str)] = &[
    ("List", "of"),
    ("Set", "of"),
    ("Arrays", "asList"),
    ("Collections", "singletonList"),
    ("Collections", "emptyList"),
];

const LIST_TYPES: &[&str] = &["ArrayList", "LinkedList", "HashSet", "LinkedHashSet", "TreeSet"];

pub fn resolve_constant(file: &JavaSourceFile, expression: Node<'_>) -> Option<Value> {
    constant_at_depth(file, expression, 0)
}

pub fn resolve_string(file: &JavaSourceFile, expression: Node<'_>) -> Option<String> {
    match resolve_constant(file, expression)? {
        Value::String(text) => Some(text),
        _ => None,
    }
}

/// Non-negative integer constants, for limits.
pub fn resolve_u32(file: &JavaSourceFile, expression: Node<'_>) -> Option<u32> {
    resolve_constant(file, expression)?
        .as_i64()
        .and_then(|value| u32::try_from(value).ok())
}

fn constant_at_depth(file: &JavaSourceFile, expression: Node<'_>, depth: usize) -> Option<Value> {
    if depth > MAX_RESOLUTION_DEPTH {
        return None;
    }
    let expression = meaningful_expression(expression);
    let text = file.text(&expression);

    match expression.kind() {
        "string_literal" => Some(Value::String(string_literal(text))),
        "character_literal" => Some(Value::String(unescape(
            text.trim_start_matches('\'').trim_end_matches('\''),
        ))),
        "decimal_integer_literal" | "hex_integer_literal" | "octal_integer_literal"
        | "binary_integer_literal" => integer_literal(expression.kind(), text),
        "decimal_floating_point_literal" => text
            .replace('_', "")
            .trim_end_matches(['f', 'F', 'd', 'D'])
            .parse::<f64>()
            .ok()
            .map(Value::Double),
        "true" => Some(Value::Boolean(true)),
        "false" => Some(Value::Boolean(false)),
        "null_literal" => Some(Value::Null),
        "unary_expression" => {
            let operator = expression.child_by_field_name("operator")?;
            let operand = expression.child_by_field_name("operand")?;
            // Integer.MIN_VALUE and Long.MIN_VALUE only exist as negated literals
            if file.text(&operator) == "-" && operand.kind() == "decimal_integer_literal" {
                return integer_literal(operand.kind(), &format!("-{}", file.text(&operand)));
            }
            let operand = constant_at_depth(file, operand, depth + 1)?;
            match (file.text(&operator), operand) {
                ("-", Value::Int32(value)) => Some(Value::Int32(value.checked_neg()?)),
                ("-", Value::Int64(value)) => Some(Value::Int64(value.checked_neg()?)),
                ("-", Value::Double(value)) => Some(Value::Double(-value)),
                ("+", value @ (Value::Int32(_) | Value::Int64(_) | Value::Double(_))) => Some(value),
                ("!", Value::Boolean(value)) => Some(Value::Boolean(!value)),
                _ => None,
            }
        }
        "binary_expression" => {
            let operator = expression.child_by_field_name("operator")?;
            if file.text(&operator) != "+" {
                return None;
            }
            let left = constant_at_depth(file, expression.child_by_field_name("left")?, depth + 1)?;
            let right = constant_at_depth(file, expression.child_by_field_name("right")?, depth + 1)?;
            add_constants(left, right)
        }
        "identifier" => {
            let declaration = find_declaration(file, expression)?;
            if !declaration.is_final {
                return None;
            }
            constant_at_depth(file, declaration.initializer?, depth + 1)
        }
        "field_access" => {
            let object = expression.child_by_field_name("object")?;
            let field = expression.child_by_field_name("field")?;
            let declaration = if file.text(&object) == "this" {
                find_declaration(file, field)?
            } else {
                find_field_in_type(file, file.text(&object), file.text(&field))?
            };
            if !declaration.is_final {
                return None;
            }
            constant_at_depth(file, declaration.initializer?, depth + 1)
        }
        "object_creation_expression" => {
            let type_name = simple_type_name(file.text(&expression.child_by_field_name("type")?));
            let arguments = expression
                .child_by_field_name("arguments")
                .map(named_children)
                .unwrap_or_default();
            let first = match arguments.as_slice() {
                [single] => constant_at_depth(file, *single, depth + 1),
                _ => None,
            };
            match (type_name, first) {
                ("ObjectId", Some(Value::String(hex))) => Some(Value::ObjectId(hex)),
                ("BigDecimal" | "Decimal128", Some(Value::String(number))) => {
                    Some(Value::Decimal128(number))
                }
                ("BigDecimal" | "Decimal128", Some(number @ (Value::Int32(_) | Value::Int64(_) | Value::Double(_)))) => {
                    Some(Value::Decimal128(number.to_string()))
                }
                _ => None,
            }
        }
        "method_invocation" => {
            let call = MethodCall::of(expression)?;
            if !is_list_factory(file, &call) {
                return None;
            }
            call.arguments()
                .into_iter()
                .map(|argument| constant_at_depth(file, argument, depth + 1))
                .collect::<Option<Vec<Value>>>()
                .map(Value::Array)
        }
        _ => None,
    }
}

fn add_constants(left: Value, right: Value) -> Option<Value> {
    match (left, right) {
        (Value::String(left), right) => Some(Value::String(left + &concatenation_text(&right)?)),
        (left, Value::String(right)) => Some(Value::String(concatenation_text(&left)? + &right)),
        (Value::Int32(left), Value::Int32(right)) => left.checked_add(right).map(Value::Int32),
        (Value::Double(left), right) => Some(Value::Double(left + as_f64(&right)?)),
        (left, Value::Double(right)) => Some(Value::Double(as_f64(&left)? + right)),
        (left, right) => match (&left, &right) {
            (Value::Int32(_) | Value::Int64(_), Value::Int32(_) | Value::Int64(_)) => {
                left.as_i64()?.checked_add(right.as_i64()?).map(Value::Int64)
            }
            _ => None,
        },
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int32(number) => Some(f64::from(*number)),
        Value::Int64(number) => Some(*number as f64),
        Value::Double(number) => Some(*number),
        _ => None,
    }
}

fn concatenation_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Int32(number) => Some(number.to_string()),
        Value::Int64(number) => Some(number.to_string()),
        Value::Double(number) => Some(java_double_text(*number)),
        Value::Boolean(flag) => Some(flag.to_string()),
        Value::Null => Some("null".to_string()),
        _ => None,
    }
}

/// Double.toString: plain between 10^-3 and 10^7, computerized scientific notation outside.
fn java_double_text(number: f64) -> String {
    if number.is_nan() {
        return "NaN".to_string();
    }
    if number.is_infinite() {
        return if number > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let magnitude = number.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        return format!("{:?}", number);
    }

    let scientific = format!("{:e}", number);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    if mantissa.contains('.') {
        format!("{}E{}", mantissa, exponent)
    } else {
        format!("{}.0E{}", mantissa, exponent)
    }
}

fn integer_literal(kind: &str, text: &str) -> Option<Value> {
    let cleaned = text.replace('_', "");
    let is_long = cleaned.ends_with(['l', 'L']);
    let digits = cleaned.trim_end_matches(['l', 'L']);

    // hex, octal and binary literals may use every bit of their type
    let parsed = match kind {
        "hex_integer_literal" => u64::from_str_radix(digits.get(2..)?, 16).ok()? as i64,
        "binary_integer_literal" => u64::from_str_radix(digits.get(2..)?, 2).ok()? as i64,
        "octal_integer_literal" => {
            u64::from_str_radix(digits.trim_start_matches('0'), 8).unwrap_or(0) as i64
        }
        _ => return decimal_literal(digits, is_long),
    };

    if is_long {
        Some(Value::Int64(parsed))
    } else {
        u32::try_from(parsed)
            .ok()
            .map(|bits| Value::Int32(bits as i32))
    }
}

/// `digits` may carry the sign of a negated literal.
fn decimal_literal(digits: &str, is_long: bool) -> Option<Value> {
    let parsed = digits.parse::<i64>().ok()?;
    if is_long {
        Some(Value::Int64(parsed))
    } else {
        i32::try_from(parsed).ok().map(Value::Int32)
    }
}

fn string_literal(text: &str) -> String {
    if let Some(block) = text
        .strip_prefix("\"\"\"")
        .and_then(|rest| rest.strip_suffix("\"\"\""))
    {
        // text blocks start after the first line break, and lose common indentation
        let content = block.split_once('\n').map(|(_, rest)| rest).unwrap_or(block);
        let indentation = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| line.len() - line.trim_start().len())
            .min()
            .unwrap_or(0);
        let lines: Vec<&str> = content
            .lines()
            .map(|line| line.get(indentation..).unwrap_or("").trim_end())
            .collect();
        return unescape(lines.join("\n").trim_end_matches(' '));
    }

    unescape(
        text.strip_prefix('"')
            .and_then(|rest| rest.strip_suffix('"'))
            .unwrap_or(text),
    )
}

fn unescape(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(current) = chars.next() {
        if current != '\\' {
            result.push(current);
            continue;
        }
        match chars.next() {
            Some('n') => result.push('\n'),
            Some('t') => result.push('\t'),
            Some('r') => result.push('\r'),
            Some('b') => result.push('\u{8}'),
            Some('f') => result.push('\u{c}'),
            Some('s') => result.push(' '),
            Some('0') => result.push('\0'),
            Some('u') => {
                while chars.peek() == Some(&'u') {
                    chars.next();
                }
                let code: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&code, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => result.push(decoded),
                    None => {
                        result.push_str("\\u");
                        result.push_str(&code);
                    }
                }
            }
            Some(other) => result.push(other),
            None => result.push('\\'),
        }
    }
    result
}

fn simple_type_name(type_text: &str) -> &str {
    let erased = type_text.split('<').next().unwrap_or(type_text).trim();
    erased.rsplit('.').next().unwrap_or(erased)
}

fn is_list_factory(file: &JavaSourceFile, call: &MethodCall) -> bool {
    let name = call.name(file);
    LIST_FACTORIES
        .iter()
        .any(|(class, method)| *method == name && call.is_static_call_on(file, class))
}

/// `Status.ACTIVE` when `Status` is an enum declared in the file.
fn enum_constant_type(file: &JavaSourceFile, expression: Node<'_>) -> Option<BsonType> {
    if expression.kind() != "field_access" {
        return None;
    }
    let type_name = file.text(&expression.child_by_field_name("object")?);
    let member = file.text(&expression.child_by_field_name("field")?);
    let members = enum_members(file, type_name)?;
    members
        .iter()
        .any(|declared| declared == member)
        .then(|| BsonType::java_type_to_bson(type_name, Some(&members)))
}

/// The BSON type of a declared Java type, enums of the file included.
pub fn java_type(file: &JavaSourceFile, type_text: &str) -> BsonType {
    let simple = simple_type_name(type_text);
    let members = enum_members(file, simple);
    BsonType::java_type_to_bson(type_text, members.as_deref())
}

/// The static type of an expression, when the file declares it.
pub fn type_of_expression(file: &JavaSourceFile, expression: Node<'_>) -> Option<BsonType> {
    type_at_depth(file, expression, 0)
}

fn type_at_depth(file: &JavaSourceFile, expression: Node<'_>, depth: usize) -> Option<BsonType> {
    if depth > MAX_RESOLUTION_DEPTH {
        return None;
    }
    let expression = meaningful_expression(expression);
    if let Some(value) = constant_at_depth(file, expression, depth) {
        return Some(value.bson_type());
    }
    if let Some(enum_type) = enum_constant_type(file, expression) {
        return Some(enum_type);
    }

    match expression.kind() {
        "identifier" | "field_access" => {
            let declaration = if expression.kind() == "identifier" {
                find_declaration(file, expression)?
            } else {
                let object = expression.child_by_field_name("object")?;
                let field = expression.child_by_field_name("field")?;
                if file.text(&object) == "this" {
                    find_declaration(file, field)?
                } else {
                    find_field_in_type(file, file.text(&object), file.text(&field))?
                }
            };
            let declared = file.text(&declaration.declared_type?);
            if declared == "var" {
                type_at_depth(file, declaration.initializer?, depth + 1)
            } else {
                Some(java_type(file, declared))
            }
        }
        "object_creation_expression" => {
            Some(java_type(file, file.text(&expression.child_by_field_name("type")?)))
        }
        "array_creation_expression" => Some(BsonType::array(BsonType::Any)),
        "binary_expression" => {
            let operator = file.text(&expression.child_by_field_name("operator")?);
            match operator {
                "+" => {
                    let left = type_at_depth(file, expression.child_by_field_name("left")?, depth + 1);
                    let right = type_at_depth(file, expression.child_by_field_name("right")?, depth + 1);
                    let is_text = |bson_type: &Option<BsonType>| {
                        bson_type
                            .as_ref()
                            .is_some_and(|bson_type| bson_type.to_non_nullable() == BsonType::String)
                    };
                    if is_text(&left) || is_text(&right) {
                        Some(BsonType::String)
                    } else {
                        left.or(right)
                    }
                }
                "==" | "!=" | "<" | ">" | "<=" | ">=" | "&&" | "||" => Some(BsonType::Boolean),
                _ => None,
            }
        }
        _ => None,
    }
}

/// A value in a query: a constant when it folds, an enum or typed runtime value otherwise.
pub fn resolve_value(file: &JavaSourceFile, expression: Node<'_>) -> HasValueReference<JavaSource> {
    let source = JavaSource::of(&expression);
    if let Some(value) = resolve_constant(file, expression) {
        let bson_type = value.bson_type();
        return HasValueReference::constant(source, value, bson_type);
    }
    let bson_type = type_of_expression(file, expression).unwrap_or(BsonType::Any);
    HasValueReference::runtime(source, bson_type)
}

/// A field name argument: a schema field when it folds to a string.
pub fn resolve_field_name(file: &JavaSourceFile, expression: Node<'_>) -> HasFieldReference<JavaSource> {
    match resolve_string(file, expression) {
        Some(name) => HasFieldReference::from_schema(JavaSource::of(&expression), name),
        None => HasFieldReference::unknown(),
    }
}

/// An expression that names a field when it is a `"$field"` string, like the input of an
/// accumulator or a group key.
pub fn resolve_field_as_value(file: &JavaSourceFile, expression: Node<'_>) -> HasValueReference<JavaSource> {
    let source = JavaSource::of(&expression);
    match resolve_constant(file, expression) {
        Some(Value::String(path)) => {
            let field = FieldName::new(source, path.trim_start_matches('$')).with_display_name(path.clone());
            HasValueReference::computed(
                source,
                BsonType::Any,
                MqlNode::new(
                    source,
                    vec![HasFieldReference::new(FieldReference::FromSchema(field)).into()],
                ),
            )
        }
        Some(value) => {
            let bson_type = value.bson_type();
            HasValueReference::constant(source, value, bson_type)
        }
        None => HasValueReference::runtime(
            source,
            type_of_expression(file, expression).unwrap_or(BsonType::Any),
        ),
    }
}

/// Follows variables and helper methods declared in the file until a call accepted by
/// `accepts` is found: `Bson filter = Filters.eq(..); coll.find(filter)` gives `Filters.eq(..)`.
pub fn resolve_to_call<'t>(
    file: &'t JavaSourceFile,
    expression: Node<'t>,
    accepts: &dyn Fn(&MethodCall<'t>) -> bool,
) -> Option<MethodCall<'t>> {
    call_at_depth(file, expression, accepts, 0)
}

fn call_at_depth<'t>(
    file: &'t JavaSourceFile,
    expression: Node<'t>,
    accepts: &dyn Fn(&MethodCall<'t>) -> bool,
    depth: usize,
) -> Option<MethodCall<'t>> {
    if depth > MAX_RESOLUTION_DEPTH {
        return None;
    }
    let expression = meaningful_expression(expression);
    match expression.kind() {
        "method_invocation" => {
            let call = MethodCall::of(expression)?;
            if accepts(&call) {
                return Some(call);
            }
            let is_local_helper = call
                .object
                .map_or(true, |object| file.text(&object) == "this");
            if !is_local_helper {
                return None;
            }
            find_method_declarations(file, call.name(file))
                .into_iter()
                .flat_map(returned_expressions)
                .find_map(|returned| call_at_depth(file, returned, accepts, depth + 1))
        }
        "identifier" => {
            let declaration = find_declaration(file, expression)?;
            call_at_depth(file, declaration.initializer?, accepts, depth + 1)
        }
        _ => None,
    }
}

/// Elements of a list built in place: `List.of(..)`, `Arrays.asList(..)`, an array
/// initializer, or an empty `new ArrayList<>()`, possibly through a variable.
pub fn iterable_elements<'t>(file: &'t JavaSourceFile, expression: Node<'t>) -> Option<Vec<Node<'t>>> {
    iterable_at_depth(file, expression, 0)
}

fn iterable_at_depth<'t>(file: &'t JavaSourceFile, expression: Node<'t>, depth: usize) -> Option<Vec<Node<'t>>> {
    if depth > MAX_RESOLUTION_DEPTH {
        return None;
    }
    let expression = meaningful_expression(expression);
    match expression.kind() {
        "method_invocation" => {
            let call = MethodCall::of(expression)?;
            if is_list_factory(file, &call) {
                return Some(call.arguments());
            }
            let is_local_helper = call
                .object
                .map_or(true, |object| file.text(&object) == "this");
            if !is_local_helper {
                return None;
            }
            find_method_declarations(file, call.name(file))
                .into_iter()
                .flat_map(returned_expressions)
                .find_map(|returned| iterable_at_depth(file, returned, depth + 1))
        }
        "object_creation_expression" => {
            let type_name = simple_type_name(file.text(&expression.child_by_field_name("type")?));
            if !LIST_TYPES.contains(&type_name) {
                return None;
            }
            let arguments = expression
                .child_by_field_name("arguments")
                .map(named_children)
                .unwrap_or_default();
            match arguments.as_slice() {
                [] => Some(Vec::new()),
                [copied] => iterable_at_depth(file, *copied, depth + 1).or(Some(Vec::new())),
                _ => None,
            }
        }
        "array_creation_expression" => expression
            .child_by_field_name("value")
            .map(named_children),
        "array_initializer" => Some(named_children(expression)),
        "identifier" => {
            let declaration = find_declaration(file, expression)?;
            iterable_at_depth(file, declaration.initializer?, depth + 1)
        }
        _ => None,
    }
}

/// Arguments of a call that takes either varargs or one iterable: `and(a, b)` and
/// `and(List.of(a, b))` both give `[a, b]`.
pub fn varargs_or_iterable<'t>(file: &'t JavaSourceFile, call: &MethodCall<'t>) -> Vec<Node<'t>> {
    let arguments = call.arguments();
    if let [single] = arguments.as_slice() {
        if let Some(elements) = iterable_elements(file, *single) {
            return elements;
        }
    }
    arguments
}

/// Whether the expression is, statically, a Java iterable or array.
pub fn is_iterable_expression(file: &JavaSourceFile, expression: Node<'_>) -> bool {
    iterable_elements(file, expression).is_some()
        || type_of_expression(file, expression).is_some_and(|bson_type| {
            bson_type.to_non_nullable().is_array()
        })
}

/// An array-valued argument list, as taken by `in`, `nin` and `all`: varargs of constants,
/// an array, an iterable or a single value.
pub fn array_value(file: &JavaSourceFile, call: &MethodCall, values: &[Node<'_>]) -> HasValueReference<JavaSource> {
    let arguments_source = call
        .node
        .child_by_field_name("arguments")
        .map(|arguments| JavaSource::of(&arguments))
        .unwrap_or_else(|| JavaSource::of(&call.node));

    match values {
        [] => HasValueReference::runtime(arguments_source, BsonType::array(BsonType::Any)),
        [single] => {
            let single = meaningful_expression(*single);
            let source = JavaSource::of(&single);
            if let Some(elements) = iterable_elements(file, single) {
                return constant_array(file, arguments_source, &elements)
                    .unwrap_or_else(|| HasValueReference::runtime(source, BsonType::array(BsonType::Any)));
            }
            if is_iterable_expression(file, single) {
                let bson_type = type_of_expression(file, single)
                    .map(|bson_type| bson_type.to_non_nullable())
                    .unwrap_or_else(|| BsonType::array(BsonType::Any));
                return HasValueReference::runtime(source, bson_type);
            }
            match resolve_constant(file, single) {
                Some(value) => {
                    let element_type = value.bson_type();
                    HasValueReference::constant(source, Value::Array(vec![value]), BsonType::array(element_type))
                }
                None => HasValueReference::runtime(
                    source,
                    BsonType::array(type_of_expression(file, single).unwrap_or(BsonType::Any)),
                ),
            }
        }
        many => constant_array(file, arguments_source, many)
            .unwrap_or_else(|| HasValueReference::runtime(arguments_source, BsonType::array(BsonType::Any))),
    }
}

fn constant_array(file: &JavaSourceFile, source: JavaSource, elements: &[Node<'_>]) -> Option<HasValueReference<JavaSource>> {
    let values = elements
        .iter()
        .map(|element| resolve_constant(file, *element))
        .collect::<Option<Vec<Value>>>()?;
    let element_type = BsonType::any_of(values.iter().map(Value::bson_type));
    Some(HasValueReference::constant(source, Value::Array(values), BsonType::array(element_type)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::java::testing::use_call;
    use crate::mql::components::ValueReference;
    use pretty_assertions::assert_eq;

    /// Parses `expression` as the only argument of `use(..)` inside a method body.
    fn with_argument<T>(prelude: &str, expression: &str, check: impl FnOnce(&JavaSourceFile, Node<'_>) -> T) -> T {
        let code = format!(
            "import java.util.*;\n\
             class A {{\n\
               enum Status {{ ACTIVE, INACTIVE }}\n\
               private static final String PREFIX = \"pre\";\n\
               void f(int count, String name, Status status, List<String> names) {{\n\
                 {}\n\
                 use({});\n\
               }}\n\
             }}",
            prelude, expression
        );
        let file = JavaSourceFile::parse("A.java", code).unwrap();
        let call = use_call(&file);
        let argument = call.argument(0).unwrap();
        check(&file, argument)
    }

    fn constant(expression: &str) -> Option<Value> {
        with_argument("", expression, |file, argument| resolve_constant(file, argument))
    }

    #[test]
    fn test_literals() {
        assert_eq!(constant("\"a\\tb\""), Some(Value::string("a\tb")));
        assert_eq!(constant("42"), Some(Value::Int32(42)));
        assert_eq!(constant("-42"), Some(Value::Int32(-42)));
        assert_eq!(constant("1_000L"), Some(Value::Int64(1000)));
        assert_eq!(constant("0x10"), Some(Value::Int32(16)));
        assert_eq!(constant("-2147483648"), Some(Value::Int32(i32::MIN)));
        assert_eq!(constant("-9223372036854775808L"), Some(Value::Int64(i64::MIN)));
        assert_eq!(constant("2147483648"), None);
        assert_eq!(constant("0xFFFFFFFF"), Some(Value::Int32(-1)));
        assert_eq!(constant("1.5f"), Some(Value::Double(1.5)));
        assert_eq!(constant("true"), Some(Value::Boolean(true)));
        assert_eq!(constant("null"), Some(Value::Null));
        assert_eq!(constant("'c'"), Some(Value::string("c")));
    }

    #[test]
    fn test_concatenation_and_finals() {
        assert_eq!(constant("PREFIX + \"_\" + 1"), Some(Value::string("pre_1")));
        assert_eq!(constant("\"n=\" + 1e10"), Some(Value::string("n=1.0E10")));
        assert_eq!(constant("\"n=\" + 0.5"), Some(Value::string("n=0.5")));
        assert_eq!(constant("1 + 2L"), Some(Value::Int64(3)));
        assert_eq!(constant("\"n=\" + 1.25e-4"), Some(Value::string("n=1.25E-4")));
        assert_eq!(constant("A.PREFIX"), Some(Value::string("pre")));
        assert_eq!(
            with_argument("final String local = \"x\";", "local", |file, argument| {
                resolve_constant(file, argument)
            }),
            Some(Value::string("x"))
        );
        assert_eq!(
            with_argument("String mutable = \"x\";", "mutable", |file, argument| {
                resolve_constant(file, argument)
            }),
            None
        );
    }

    #[test]
    fn test_object_ids_and_lists() {
        assert_eq!(
            constant("new ObjectId(\"5f1d7a7c9d1e8b0012345678\")"),
            Some(Value::ObjectId("5f1d7a7c9d1e8b0012345678".to_string()))
        );
        assert_eq!(
            constant("List.of(1, 2)"),
            Some(Value::Array(vec![Value::Int32(1), Value::Int32(2)]))
        );
        assert_eq!(constant("List.of(1, count)"), None);
    }

    #[test]
    fn test_runtime_values_are_typed_from_declarations() {
        let value = |expression: &str| {
            with_argument("", expression, |file, argument| resolve_value(file, argument))
        };

        assert!(matches!(
            value("count").reference,
            ValueReference::Runtime(ref runtime) if runtime.bson_type == BsonType::Int32
        ));
        assert!(matches!(
            value("name").reference,
            ValueReference::Runtime(ref runtime) if runtime.bson_type == BsonType::String.nullable()
        ));
        assert_eq!(
            value("Status.ACTIVE").bson_type(),
            Some(&BsonType::enumeration(["ACTIVE", "INACTIVE"], Some("Status")))
        );
        assert_eq!(value("status").bson_type(), value("Status.ACTIVE").bson_type());
        assert_eq!(value("compute()").bson_type(), Some(&BsonType::Any));
    }

    #[test]
    fn test_field_names_and_field_values() {
        with_argument("", "\"$price\"", |file, argument| {
            let value = resolve_field_as_value(file, argument);
            let ValueReference::Computed(computed) = value.reference else {
                panic!("expected a computed value");
            };
            let field = computed
                .expression
                .component::<HasFieldReference<JavaSource>>()
                .unwrap();
            assert_eq!(field.field_name(), Some("price"));
            assert_eq!(field.field().unwrap().display_name, "$price");

            assert_eq!(resolve_field_name(file, argument).field_name(), Some("$price"));
        });
        with_argument("", "name", |file, argument| {
            assert_eq!(resolve_field_name(file, argument), HasFieldReference::unknown());
        });
    }

    #[test]
    fn test_iterables_through_variables() {
        let count = |prelude: &str, expression: &str| {
            with_argument(prelude, expression, |file, argument| {
                iterable_elements(file, argument).map(|elements| elements.len())
            })
        };
        assert_eq!(count("", "List.of(1, 2, 3)"), Some(3));
        assert_eq!(count("", "Arrays.asList(1)"), Some(1));
        assert_eq!(count("", "new ArrayList<>()"), Some(0));
        assert_eq!(count("List<Integer> xs = List.of(1, 2);", "xs"), Some(2));
        assert_eq!(count("", "new int[] {1, 2}"), Some(2));
        assert_eq!(count("", "names"), None);

        with_argument("", "names", |file, argument| {
            assert!(is_iterable_expression(file, argument));
        });
    }

    #[test]
    fn test_calls_through_helper_methods() {
        let code = "class A {\n\
                      Bson byName() { return Filters.eq(\"name\", 1); }\n\
                      void f() { Bson filter = byName(); use(filter); }\n\
                    }";
        let file = JavaSourceFile::parse("A.java", code).unwrap();
        let usage = use_call(&file);

        let resolved = resolve_to_call(&file, usage.argument(0).unwrap(), &|call| {
            call.is_static_call_on(&file, "Filters")
        })
        .unwrap();
        assert_eq!(resolved.name(&file), "eq");
    }
}
