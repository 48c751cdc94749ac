//! `Criteria` chains, the `Query` that wraps them and `Sort` specifications.
//!
//! `where("a").is(1).and("b").gt(2)` is a list of predicates on the top level of the filter.
//! Each `where`/`and` names the field of the operators that follow it.

use tree_sitter::Node;

use crate::dialects::java::constants::{
    array_value, resolve_field_name, resolve_string, resolve_to_call, resolve_u32, resolve_value,
    varargs_or_iterable,
};
use crate::dialects::java::tree::{
    calls_on_local, find_declaration, find_method_declarations, meaningful_expression,
    returned_expressions, MethodCall,
};
use crate::dialects::java::{JavaSource, JavaSourceFile};
use crate::mql::components::{HasFieldReference, HasFilter, HasValueReference, Name, Named};
use crate::mql::{BsonType, Node as MqlNode, Value};

const MAX_DEPTH: usize = 16;

/// What a `Query` contributes to a command.
#[derive(Debug, Default)]
pub(super) struct QueryParts {
    pub(super) filters: Vec<MqlNode<JavaSource>>,
    pub(super) sorts: Vec<MqlNode<JavaSource>>,
    pub(super) limit: Option<u32>,
}

pub(super) fn creates(file: &JavaSourceFile, expression: Node<'_>, class: &str) -> bool {
    expression.kind() == "object_creation_expression"
        && expression.child_by_field_name("type").is_some_and(|created| {
            let text = file.text(&created);
            let erased = text.split('<').next().unwrap_or(text);
            erased.rsplit('.').next() == Some(class)
        })
}

fn is_local_call(file: &JavaSourceFile, call: &MethodCall) -> bool {
    call.object.map_or(true, |object| file.text(&object) == "this")
}

/// Parses an argument that evaluates to a `Query`, or to a bare `Criteria`.
pub(super) fn parse_query(file: &JavaSourceFile, expression: Node<'_>) -> Option<QueryParts> {
    let mut parts = QueryParts::default();
    if query_at_depth(file, expression, &mut parts, 0) {
        return Some(parts);
    }
    parse_criteria(file, expression).map(|filters| QueryParts {
        filters,
        ..QueryParts::default()
    })
}

fn query_at_depth(file: &JavaSourceFile, expression: Node<'_>, parts: &mut QueryParts, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }
    let expression = meaningful_expression(expression);

    match expression.kind() {
        "object_creation_expression" => {
            if creates(file, expression, "BasicQuery") {
                return true;
            }
            if !creates(file, expression, "Query") {
                return false;
            }
            let criteria = expression
                .child_by_field_name("arguments")
                .and_then(|arguments| arguments.named_child(0));
            if let Some(criteria) = criteria {
                add_criteria(file, criteria, parts);
            }
            true
        }
        "method_invocation" => {
            let Some(call) = MethodCall::of(expression) else {
                return false;
            };
            if call.name(file) == "query" && call.is_static_call_on(file, "Query") {
                if let Some(criteria) = call.argument(0) {
                    add_criteria(file, criteria, parts);
                }
                return true;
            }
            if is_local_call(file, &call) {
                return find_method_declarations(file, call.name(file))
                    .into_iter()
                    .flat_map(returned_expressions)
                    .any(|returned| query_at_depth(file, returned, parts, depth + 1));
            }
            let Some(object) = call.object else {
                return false;
            };
            if !query_at_depth(file, object, parts, depth + 1) {
                return false;
            }
            apply_query_modifier(file, &call, parts);
            true
        }
        "identifier" => {
            let Some(declaration) = find_declaration(file, expression) else {
                return false;
            };
            let Some(initializer) = declaration.initializer else {
                return false;
            };
            if !query_at_depth(file, initializer, parts, depth + 1) {
                return false;
            }
            for call in calls_on_local(file, &declaration, expression.start_byte()) {
                apply_query_modifier(file, &call, parts);
            }
            true
        }
        _ => false,
    }
}

fn add_criteria(file: &JavaSourceFile, criteria: Node<'_>, parts: &mut QueryParts) {
    parts
        .filters
        .extend(parse_criteria(file, criteria).unwrap_or_default());
}

fn apply_query_modifier(file: &JavaSourceFile, call: &MethodCall, parts: &mut QueryParts) {
    match call.name(file) {
        "addCriteria" => {
            if let Some(criteria) = call.argument(0) {
                add_criteria(file, criteria, parts);
            }
        }
        "with" => {
            let Some(argument) = call.argument(0) else {
                return;
            };
            let page = resolve_to_call(file, argument, &|call| {
                call.name(file) == "of" && call.is_static_call_on(file, "PageRequest")
            });
            match page {
                // PageRequest.of(page, size[, sort | direction, fields...])
                Some(page) => {
                    let arguments = page.arguments();
                    if let Some(size) = arguments.get(1).and_then(|size| resolve_u32(file, *size)) {
                        parts.limit = Some(size);
                    }
                    if arguments.len() > 2 {
                        parts.sorts.extend(parse_sort_arguments(file, &arguments[2..]));
                    }
                }
                None => parts.sorts.extend(parse_sort(file, argument)),
            }
        }
        "limit" => {
            if let Some(limit) = call.argument(0).and_then(|limit| resolve_u32(file, limit)) {
                parts.limit = Some(limit);
            }
        }
        _ => {}
    }
}

#[derive(Debug, Default)]
struct ChainState {
    predicates: Vec<MqlNode<JavaSource>>,
    field: Option<HasFieldReference<JavaSource>>,
    negate: bool,
}

impl ChainState {
    fn push(&mut self, predicate: MqlNode<JavaSource>) {
        if self.negate {
            self.negate = false;
            let source = predicate.source;
            self.predicates.push(MqlNode::new(
                source,
                vec![Named::new(Name::Not).into(), HasFilter::new(vec![predicate]).into()],
            ));
        } else {
            self.predicates.push(predicate);
        }
    }
}

fn is_where(file: &JavaSourceFile, call: &MethodCall) -> bool {
    call.name(file) == "where" && call.is_static_call_on(file, "Criteria")
}

/// Predicates of an expression that evaluates to a `Criteria`.
pub(super) fn parse_criteria(file: &JavaSourceFile, expression: Node<'_>) -> Option<Vec<MqlNode<JavaSource>>> {
    criteria_at_depth(file, expression, 0)
}

fn criteria_at_depth(file: &JavaSourceFile, expression: Node<'_>, depth: usize) -> Option<Vec<MqlNode<JavaSource>>> {
    if depth > MAX_DEPTH {
        return None;
    }
    let expression = meaningful_expression(expression);

    match expression.kind() {
        "method_invocation" => {
            let call = MethodCall::of(expression)?;
            let chain = call.chain();
            let first = chain.first()?;
            let mut state = ChainState::default();

            let steps = if is_where(file, first) {
                &chain[..]
            } else if let Some(origin) = first.object.map(meaningful_expression) {
                if creates(file, origin, "Criteria") {
                    state.field = origin
                        .child_by_field_name("arguments")
                        .and_then(|arguments| arguments.named_child(0))
                        .map(|field| resolve_field_name(file, field));
                } else if file.text(&origin) == "this" {
                    state.predicates = local_criteria(file, first, depth)?;
                    return Some(continue_chain(file, state, &chain[1..], depth));
                } else {
                    state.predicates = criteria_at_depth(file, origin, depth + 1)?;
                }
                &chain[..]
            } else {
                state.predicates = local_criteria(file, first, depth)?;
                &chain[1..]
            };
            Some(continue_chain(file, state, steps, depth))
        }
        "object_creation_expression" => creates(file, expression, "Criteria").then(Vec::new),
        "identifier" => {
            let declaration = find_declaration(file, expression)?;
            criteria_at_depth(file, declaration.initializer?, depth + 1)
        }
        _ => None,
    }
}

/// Predicates returned by a helper method of the file.
fn local_criteria(file: &JavaSourceFile, call: &MethodCall, depth: usize) -> Option<Vec<MqlNode<JavaSource>>> {
    find_method_declarations(file, call.name(file))
        .into_iter()
        .flat_map(returned_expressions)
        .find_map(|returned| criteria_at_depth(file, returned, depth + 1))
}

fn continue_chain(
    file: &JavaSourceFile,
    mut state: ChainState,
    steps: &[MethodCall],
    depth: usize,
) -> Vec<MqlNode<JavaSource>> {
    for step in steps {
        apply_step(file, step, &mut state, depth);
    }
    state.predicates
}

fn apply_step(file: &JavaSourceFile, call: &MethodCall, state: &mut ChainState, depth: usize) {
    let method = call.name(file);
    let arguments = call.arguments();

    match (method, arguments.as_slice()) {
        ("where" | "and", [field]) => {
            state.field = Some(resolve_field_name(file, *field));
            state.negate = false;
        }
        ("not", []) => state.negate = true,
        ("orOperator" | "andOperator" | "norOperator", _) => {
            let operator = Name::from_canonical(method.trim_end_matches("Operator"));
            let children = varargs_or_iterable(file, call)
                .into_iter()
                .filter_map(|nested| {
                    let predicates = criteria_at_depth(file, nested, depth + 1)?;
                    Some(single_predicate(JavaSource::of(&nested), predicates))
                })
                .collect();
            state.push(MqlNode::new(
                JavaSource::of(&call.node),
                vec![Named::new(operator).into(), HasFilter::new(children).into()],
            ));
        }
        _ => {
            if let Some(predicate) = predicate(file, call, state.field.clone(), depth) {
                state.push(predicate);
            }
        }
    }
}

/// Several predicates of one element of `$or`/`$and` are one implicit `$and`.
pub(super) fn single_predicate(source: JavaSource, mut predicates: Vec<MqlNode<JavaSource>>) -> MqlNode<JavaSource> {
    if predicates.len() == 1 {
        if let Some(predicate) = predicates.pop() {
            return predicate;
        }
    }
    MqlNode::new(
        source,
        vec![Named::new(Name::And).into(), HasFilter::new(predicates).into()],
    )
}

fn predicate(
    file: &JavaSourceFile,
    call: &MethodCall,
    field: Option<HasFieldReference<JavaSource>>,
    depth: usize,
) -> Option<MqlNode<JavaSource>> {
    let source = JavaSource::of(&call.node);
    let method = call.name(file);
    let arguments = call.arguments();
    let field = field.unwrap_or_else(HasFieldReference::unknown);

    let (name, value) = match (method, arguments.as_slice()) {
        ("is", [value]) => (Name::Eq, resolve_value(file, *value)),
        ("isNull", []) => (
            Name::Eq,
            HasValueReference::inferred(source, Value::Null, BsonType::Null),
        ),
        ("in" | "nin" | "all", values) => (Name::from_canonical(method), array_value(file, call, values)),
        ("exists", []) => (
            Name::Exists,
            HasValueReference::inferred(source, true, BsonType::Boolean),
        ),
        ("elemMatch", [criteria]) => {
            let nested = criteria_at_depth(file, *criteria, depth + 1).unwrap_or_default();
            return Some(MqlNode::new(
                source,
                vec![
                    Named::new(Name::ElemMatch).into(),
                    field.into(),
                    HasFilter::new(nested).into(),
                ],
            ));
        }
        (_, [value, ..]) => (Name::from_canonical(method), resolve_value(file, *value)),
        _ => {
            let name = Name::from_canonical(method);
            if name == Name::Unknown {
                return None;
            }
            return Some(MqlNode::new(source, vec![Named::new(name).into(), field.into()]));
        }
    };

    Some(MqlNode::new(
        source,
        vec![Named::new(name).into(), field.into(), value.into()],
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ascending,
    Descending,
    Runtime,
}

#[derive(Debug, Clone)]
struct SortKey {
    source: JavaSource,
    field: HasFieldReference<JavaSource>,
    direction: Direction,
}

impl SortKey {
    fn into_node(self) -> MqlNode<JavaSource> {
        let (name, value) = match self.direction {
            Direction::Ascending => (
                Name::Ascending,
                HasValueReference::inferred(self.source, Value::Int32(1), BsonType::Int32),
            ),
            Direction::Descending => (
                Name::Descending,
                HasValueReference::inferred(self.source, Value::Int32(-1), BsonType::Int32),
            ),
            Direction::Runtime => (Name::Sort, HasValueReference::runtime(self.source, BsonType::Int32)),
        };
        MqlNode::new(
            self.source,
            vec![Named::new(name).into(), self.field.into(), value.into()],
        )
    }
}

/// `Direction.ASC`, `Sort.Direction.DESC`, or a variable of type `Direction`.
fn direction_of(file: &JavaSourceFile, expression: Node<'_>) -> Option<Direction> {
    let expression = meaningful_expression(expression);
    let text = file.text(&expression);
    match text.rsplit('.').next() {
        Some("ASC") => return Some(Direction::Ascending),
        Some("DESC") => return Some(Direction::Descending),
        _ => {}
    }

    let is_runtime = match expression.kind() {
        "identifier" => find_declaration(file, expression)
            .and_then(|declaration| declaration.declared_type)
            .is_some_and(|declared| file.text(&declared).ends_with("Direction")),
        "method_invocation" => MethodCall::of(expression)
            .and_then(|call| call.object)
            .is_some_and(|object| file.text(&object).ends_with("Direction")),
        _ => false,
    };
    is_runtime.then_some(Direction::Runtime)
}

fn field_keys(file: &JavaSourceFile, fields: &[Node<'_>], direction: Direction) -> Vec<SortKey> {
    fields
        .iter()
        .filter_map(|field| {
            let name = resolve_string(file, *field)?;
            let source = JavaSource::of(field);
            Some(SortKey {
                source,
                field: HasFieldReference::from_schema(source, name),
                direction,
            })
        })
        .collect()
}

/// `Order.asc("a")`, `Sort.Order.desc("b")`, `Order.by("c")`.
fn order_key(file: &JavaSourceFile, expression: Node<'_>) -> Option<SortKey> {
    let order = resolve_to_call(file, expression, &|call| {
        matches!(call.name(file), "asc" | "desc" | "by") && call.is_static_call_on(file, "Order")
    })?;
    let direction = match order.name(file) {
        "desc" => Direction::Descending,
        _ => Direction::Ascending,
    };
    field_keys(file, &order.arguments(), direction).into_iter().next()
}

fn sort_keys_of_arguments(file: &JavaSourceFile, arguments: &[Node<'_>], depth: usize) -> Vec<SortKey> {
    let Some((first, rest)) = arguments.split_first() else {
        return Vec::new();
    };
    if let Some(direction) = direction_of(file, *first) {
        return field_keys(file, rest, direction);
    }
    arguments
        .iter()
        .flat_map(|argument| {
            if let Some(key) = order_key(file, *argument) {
                return vec![key];
            }
            let nested = sort_keys(file, *argument, depth + 1);
            if nested.is_empty() {
                field_keys(file, std::slice::from_ref(argument), Direction::Ascending)
            } else {
                nested
            }
        })
        .collect()
}

/// Sort nodes of `(Direction, fields...)`, `(fields...)`, `(orders...)` or `(Sort)` arguments.
pub(super) fn parse_sort_arguments(file: &JavaSourceFile, arguments: &[Node<'_>]) -> Vec<MqlNode<JavaSource>> {
    sort_keys_of_arguments(file, arguments, 0)
        .into_iter()
        .map(SortKey::into_node)
        .collect()
}

/// Sort nodes of an expression that evaluates to a `Sort`.
pub(super) fn parse_sort(file: &JavaSourceFile, expression: Node<'_>) -> Vec<MqlNode<JavaSource>> {
    sort_keys(file, expression, 0)
        .into_iter()
        .map(SortKey::into_node)
        .collect()
}

fn sort_keys(file: &JavaSourceFile, expression: Node<'_>, depth: usize) -> Vec<SortKey> {
    if depth > MAX_DEPTH {
        return Vec::new();
    }
    let Some(call) = resolve_to_call(file, expression, &|call| {
        call.chain()
            .first()
            .is_some_and(|first| first.is_static_call_on(file, "Sort"))
    }) else {
        return Vec::new();
    };

    let chain = call.chain();
    let mut keys = match chain.first() {
        Some(by) if by.name(file) == "by" => sort_keys_of_arguments(file, &varargs_or_iterable(file, by), depth),
        _ => Vec::new(),
    };
    for step in chain.iter().skip(1) {
        match step.name(file) {
            "ascending" => keys.iter_mut().for_each(|key| key.direction = Direction::Ascending),
            "descending" => keys.iter_mut().for_each(|key| key.direction = Direction::Descending),
            "and" => {
                if let Some(other) = step.argument(0) {
                    keys.extend(sort_keys(file, other, depth + 1));
                }
            }
            _ => {}
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::java::testing::{names, use_call};
    use crate::mql::components::{HasChildren, ValueReference};
    use pretty_assertions::assert_eq;

    const PRELUDE: &str = "import static org.springframework.data.mongodb.core.query.Criteria.where;\n\
                           import static org.springframework.data.mongodb.core.query.Query.query;\n";

    fn with_argument<T>(body: &str, check: impl FnOnce(&JavaSourceFile, Node<'_>) -> T) -> T {
        let file = JavaSourceFile::parse(
            "Repo.java",
            format!(
                "{}class Repo {{ void f(String name, int age, Direction direction) {{ {} }} }}",
                PRELUDE, body
            ),
        )
        .unwrap();
        let usage = use_call(&file);
        check(&file, usage.argument(0).unwrap())
    }


    fn fields(nodes: &[MqlNode<JavaSource>]) -> Vec<Option<String>> {
        nodes
            .iter()
            .map(|node| {
                node.component::<HasFieldReference<JavaSource>>()
                    .and_then(|field| field.field_name())
                    .map(str::to_string)
            })
            .collect()
    }

    #[test]
    fn test_chained_predicates() {
        let predicates = with_argument(
            "use(where(\"name\").is(name).and(\"age\").gt(18).lt(65));",
            |file, argument| parse_criteria(file, argument).unwrap(),
        );
        assert_eq!(names(&predicates), vec![Name::Eq, Name::Gt, Name::Lt]);
        assert_eq!(
            fields(&predicates),
            vec![Some("name".to_string()), Some("age".to_string()), Some("age".to_string())]
        );
        assert!(matches!(
            predicates[0].component::<HasValueReference<JavaSource>>().unwrap().reference,
            ValueReference::Runtime(ref runtime) if runtime.bson_type == BsonType::String.nullable()
        ));
    }

    #[test]
    fn test_qualified_where_and_in() {
        let predicates = with_argument(
            "use(Criteria.where(\"status\").in(\"A\", \"B\"));",
            |file, argument| parse_criteria(file, argument).unwrap(),
        );
        assert_eq!(names(&predicates), vec![Name::In]);
        assert_eq!(
            predicates[0].component::<HasValueReference<JavaSource>>().unwrap().value(),
            Some(&Value::Array(vec![Value::string("A"), Value::string("B")]))
        );
    }

    #[test]
    fn test_logical_operators_nest() {
        let predicates = with_argument(
            "use(new Criteria().orOperator(where(\"a\").is(1), where(\"b\").is(2).and(\"c\").exists(true)));",
            |file, argument| parse_criteria(file, argument).unwrap(),
        );
        assert_eq!(names(&predicates), vec![Name::Or]);
        let children = predicates[0].component::<HasFilter<JavaSource>>().unwrap().children();
        assert_eq!(names(children), vec![Name::Eq, Name::And]);
        assert_eq!(
            children[1].component::<HasFilter<JavaSource>>().unwrap().children().len(),
            2
        );
    }

    #[test]
    fn test_not_wraps_the_next_predicate() {
        let predicates = with_argument(
            "use(where(\"age\").not().gt(10).and(\"name\").is(\"x\"));",
            |file, argument| parse_criteria(file, argument).unwrap(),
        );
        assert_eq!(names(&predicates), vec![Name::Not, Name::Eq]);
        let negated = predicates[0].component::<HasFilter<JavaSource>>().unwrap().children();
        assert_eq!(names(negated), vec![Name::Gt]);
    }

    #[test]
    fn test_criteria_through_variables() {
        let predicates = with_argument(
            "Criteria byName = where(\"name\").is(name); use(byName.and(\"age\").gte(age));",
            |file, argument| parse_criteria(file, argument).unwrap(),
        );
        assert_eq!(names(&predicates), vec![Name::Eq, Name::Gte]);
    }

    #[test]
    fn test_not_a_criteria() {
        let parsed = with_argument("use(name.trim());", |file, argument| {
            parse_criteria(file, argument).is_none()
        });
        assert!(parsed);
    }

    #[test]
    fn test_query_with_sort_and_limit() {
        let parts = with_argument(
            "use(query(where(\"age\").gt(age)).with(Sort.by(Sort.Direction.DESC, \"age\", \"name\")).limit(5));",
            |file, argument| parse_query(file, argument).unwrap(),
        );
        assert_eq!(names(&parts.filters), vec![Name::Gt]);
        assert_eq!(names(&parts.sorts), vec![Name::Descending, Name::Descending]);
        assert_eq!(
            fields(&parts.sorts),
            vec![Some("age".to_string()), Some("name".to_string())]
        );
        assert_eq!(parts.limit, Some(5));
    }

    #[test]
    fn test_query_built_in_statements() {
        let parts = with_argument(
            "Query q = new Query();\n\
             q.addCriteria(where(\"name\").is(name));\n\
             q.with(PageRequest.of(0, 20, Sort.by(\"age\")));\n\
             use(q);",
            |file, argument| parse_query(file, argument).unwrap(),
        );
        assert_eq!(names(&parts.filters), vec![Name::Eq]);
        assert_eq!(names(&parts.sorts), vec![Name::Ascending]);
        assert_eq!(parts.limit, Some(20));
    }

    #[test]
    fn test_sort_variants() {
        let sorts = with_argument(
            "use(Sort.by(Sort.Order.asc(\"a\"), Order.desc(\"b\")).and(Sort.by(\"c\").descending()));",
            |file, argument| parse_sort(file, argument),
        );
        assert_eq!(
            names(&sorts),
            vec![Name::Ascending, Name::Descending, Name::Descending]
        );

        let runtime = with_argument("use(Sort.by(direction, \"a\"));", |file, argument| {
            parse_sort(file, argument)
        });
        assert_eq!(names(&runtime), vec![Name::Sort]);
    }
}
