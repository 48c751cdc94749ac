//! Navigation over the tree-sitter Java grammar.
//!
//! There is no type resolution here: calls are recognized by method name and by the
//! text of their receiver, and identifiers are resolved to the closest declaration in
//! the same file that precedes them.

use tree_sitter::Node;

use super::JavaSourceFile;

/// Kinds that are never meaningful as expressions, but the grammar keeps as named nodes.
const EXTRAS: &[&str] = &["line_comment", "block_comment"];

pub fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| !EXTRAS.contains(&child.kind()))
        .collect()
}

pub fn descendants_of_kind<'t>(node: Node<'t>, kind: &str) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    collect_descendants(node, &|candidate: &Node<'t>| candidate.kind() == kind, &mut found);
    found
}

pub fn descendants_matching<'t>(node: Node<'t>, matches: &dyn Fn(&Node<'t>) -> bool) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    collect_descendants(node, matches, &mut found);
    found
}

fn collect_descendants<'t>(node: Node<'t>, matches: &dyn Fn(&Node<'t>) -> bool, into: &mut Vec<Node<'t>>) {
    if matches(&node) {
        into.push(node);
    }
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_descendants(child, matches, into);
    }
}

pub fn find_parent_of_kind<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if kinds.contains(&parent.kind()) {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

pub fn enclosing_class(node: Node<'_>) -> Option<Node<'_>> {
    find_parent_of_kind(
        node,
        &[
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "record_declaration",
        ],
    )
}

/// Strips parentheses and casts: `((Bson) filter)` is `filter`.
pub fn meaningful_expression(node: Node<'_>) -> Node<'_> {
    match node.kind() {
        "parenthesized_expression" => named_children(node)
            .into_iter()
            .next()
            .map(meaningful_expression)
            .unwrap_or(node),
        "cast_expression" => node
            .child_by_field_name("value")
            .map(meaningful_expression)
            .unwrap_or(node),
        _ => node,
    }
}

/// A `method_invocation` node split into its parts.
#[derive(Debug, Clone, Copy)]
pub struct MethodCall<'t> {
    pub node: Node<'t>,
    pub object: Option<Node<'t>>,
    pub name_node: Node<'t>,
}

impl<'t> MethodCall<'t> {
    pub fn of(node: Node<'t>) -> Option<Self> {
        if node.kind() != "method_invocation" {
            return None;
        }
        Some(Self {
            node,
            object: node.child_by_field_name("object"),
            name_node: node.child_by_field_name("name")?,
        })
    }

    pub fn name<'f>(&self, file: &'f JavaSourceFile) -> &'f str {
        file.text(&self.name_node)
    }

    pub fn arguments(&self) -> Vec<Node<'t>> {
        self.node
            .child_by_field_name("arguments")
            .map(named_children)
            .unwrap_or_default()
    }

    pub fn argument(&self, index: usize) -> Option<Node<'t>> {
        self.arguments().get(index).copied()
    }

    /// The call this one is chained on: `a().b()` gives `a()` for `b()`.
    pub fn receiver_call(&self) -> Option<MethodCall<'t>> {
        self.object
            .map(meaningful_expression)
            .and_then(MethodCall::of)
    }

    /// The call chained on this one, when there is one.
    pub fn chained_call(&self) -> Option<MethodCall<'t>> {
        let parent = self.node.parent()?;
        let call = MethodCall::of(parent)?;
        (call.object == Some(self.node)).then_some(call)
    }

    /// The outermost call of the chain this call belongs to.
    pub fn outermost(&self) -> MethodCall<'t> {
        let mut current = *self;
        while let Some(next) = current.chained_call() {
            current = next;
        }
        current
    }

    /// Every call of the chain that ends in this one, innermost first.
    pub fn chain(&self) -> Vec<MethodCall<'t>> {
        let mut chain = vec![*self];
        let mut current = *self;
        while let Some(receiver) = current.receiver_call() {
            chain.push(receiver);
            current = receiver;
        }
        chain.reverse();
        chain
    }

    /// Whether the call is a static call on `class`, qualified (`Filters.eq`,
    /// `com.mongodb.client.model.Filters.eq`) or statically imported (`eq`).
    pub fn is_static_call_on(&self, file: &JavaSourceFile, class: &str) -> bool {
        match self.object {
            Some(object) => {
                let text = file.text(&object);
                text == class || text.ends_with(&format!(".{}", class))
            }
            None => imports_static_member(file, class, self.name(file)),
        }
    }
}

/// Whether the file has `import static ...Class.*;` or `import static ...Class.member;`.
pub fn imports_static_member(file: &JavaSourceFile, class: &str, member: &str) -> bool {
    file.find_all("import_declaration").iter().any(|import| {
        let text = file.text(import);
        let Some(imported) = text
            .trim()
            .strip_prefix("import")
            .map(str::trim_start)
            .and_then(|rest| rest.strip_prefix("static"))
        else {
            return false;
        };
        let imported = imported.trim().trim_end_matches(';').trim();
        imported.ends_with(&format!("{}.*", class))
            || imported.ends_with(&format!("{}.{}", class, member))
    })
}

/// A variable, parameter or field declaration visible from some expression.
#[derive(Debug, Clone, Copy)]
pub struct Declaration<'t> {
    pub name: Node<'t>,
    pub declared_type: Option<Node<'t>>,
    pub initializer: Option<Node<'t>>,
    pub is_final: bool,
    pub is_static: bool,
    pub is_field: bool,
}

fn has_modifier(file: &JavaSourceFile, declaration: Node<'_>, modifier: &str) -> bool {
    named_children(declaration)
        .into_iter()
        .filter(|child| child.kind() == "modifiers")
        .any(|modifiers| {
            let mut cursor = modifiers.walk();
            let found = modifiers
                .children(&mut cursor)
                .any(|token| file.text(&token) == modifier);
            found
        })
}

fn declarators_named<'t>(
    file: &JavaSourceFile,
    declaration: Node<'t>,
    name: &str,
    is_field: bool,
) -> Option<Declaration<'t>> {
    let declared_type = declaration.child_by_field_name("type");
    let is_final = has_modifier(file, declaration, "final");
    let is_static = has_modifier(file, declaration, "static");

    let mut cursor = declaration.walk();
    let declarators: Vec<Node<'t>> = declaration
        .children_by_field_name("declarator", &mut cursor)
        .collect();
    declarators.into_iter().find_map(|declarator| {
        let declarator_name = declarator.child_by_field_name("name")?;
        (file.text(&declarator_name) == name).then_some(Declaration {
            name: declarator_name,
            declared_type,
            initializer: declarator.child_by_field_name("value"),
            is_final,
            is_static,
            is_field,
        })
    })
}

fn parameter_named<'t>(file: &JavaSourceFile, parameter: Node<'t>, name: &str) -> Option<Declaration<'t>> {
    let name_node = match parameter.kind() {
        "formal_parameter" => parameter.child_by_field_name("name")?,
        "spread_parameter" => named_children(parameter)
            .into_iter()
            .find(|child| child.kind() == "variable_declarator")
            .and_then(|declarator| declarator.child_by_field_name("name"))?,
        _ => return None,
    };
    (file.text(&name_node) == name).then_some(Declaration {
        name: name_node,
        declared_type: parameter
            .child_by_field_name("type")
            .or_else(|| named_children(parameter).into_iter().find(|child| child.kind().ends_with("type"))),
        initializer: None,
        is_final: has_modifier(file, parameter, "final"),
        is_static: false,
        is_field: false,
    })
}

/// The declaration `identifier` refers to: the closest preceding local in an enclosing
/// block, a parameter of the enclosing method or lambda, or a field of an enclosing class.
pub fn find_declaration<'t>(file: &JavaSourceFile, identifier: Node<'t>) -> Option<Declaration<'t>> {
    let name = file.text(&identifier);
    let usage = identifier.start_byte();
    let mut current = identifier.parent();

    while let Some(scope) = current {
        match scope.kind() {
            "block" | "switch_block_statement_group" | "constructor_body" => {
                let found = named_children(scope)
                    .into_iter()
                    .filter(|statement| {
                        statement.kind() == "local_variable_declaration"
                            && statement.end_byte() <= usage
                    })
                    .filter_map(|statement| declarators_named(file, statement, name, false))
                    .last();
                if found.is_some() {
                    return found;
                }
            }
            "method_declaration" | "constructor_declaration" | "lambda_expression" => {
                let parameters = scope
                    .child_by_field_name("parameters")
                    .map(named_children)
                    .unwrap_or_default();
                if let Some(found) = parameters
                    .into_iter()
                    .find_map(|parameter| parameter_named(file, parameter, name))
                {
                    return Some(found);
                }
            }
            "class_body" | "enum_body" | "interface_body" => {
                let found = named_children(scope)
                    .into_iter()
                    .filter(|member| member.kind() == "field_declaration" || member.kind() == "constant_declaration")
                    .find_map(|member| declarators_named(file, member, name, true));
                if found.is_some() {
                    return found;
                }
                // enum bodies keep their fields in an enum_body_declarations child
                if let Some(found) = named_children(scope)
                    .into_iter()
                    .filter(|member| member.kind() == "enum_body_declarations")
                    .flat_map(named_children)
                    .filter(|member| member.kind() == "field_declaration")
                    .find_map(|member| declarators_named(file, member, name, true))
                {
                    return Some(found);
                }
            }
            _ => {}
        }
        current = scope.parent();
    }
    None
}

/// Values assigned to `name` inside `scope`, with `name = ..` or `this.name = ..`.
pub fn assigned_values<'t>(file: &JavaSourceFile, scope: Node<'t>, name: &str) -> Vec<Node<'t>> {
    let qualified = format!("this.{}", name);
    descendants_of_kind(scope, "assignment_expression")
        .into_iter()
        .filter(|assignment| {
            assignment
                .child_by_field_name("left")
                .is_some_and(|left| {
                    let target = file.text(&left);
                    target == name || target == qualified
                })
        })
        .filter_map(|assignment| assignment.child_by_field_name("right"))
        .collect()
}

/// Calls made on a local variable before `before`, each extended to the calls chained on
/// it: `query.addCriteria(a).with(sort);` gives `addCriteria(a)` and `with(sort)`.
pub fn calls_on_local<'t>(file: &JavaSourceFile, declaration: &Declaration<'t>, before: usize) -> Vec<MethodCall<'t>> {
    if declaration.is_field {
        return Vec::new();
    }
    let Some(scope) = find_parent_of_kind(declaration.name, &["block", "constructor_body", "switch_block_statement_group"]) else {
        return Vec::new();
    };
    let name = file.text(&declaration.name);

    let mut calls = Vec::new();
    for call in descendants_of_kind(scope, "method_invocation")
        .into_iter()
        .filter_map(MethodCall::of)
        .filter(|call| call.node.end_byte() <= before)
    {
        let on_local = call.object.is_some_and(|object| {
            object.kind() == "identifier"
                && file.text(&object) == name
                && find_declaration(file, object).is_some_and(|found| found.name == declaration.name)
        });
        if !on_local {
            continue;
        }
        let mut current = Some(call);
        while let Some(chained) = current {
            calls.push(chained);
            current = chained.chained_call();
        }
    }
    calls
}

/// Top level and nested type declarations of the file, by simple name.
pub fn find_type_declaration<'t>(file: &'t JavaSourceFile, name: &str) -> Option<Node<'t>> {
    let simple = name.rsplit('.').next().unwrap_or(name);
    descendants_matching(file.root(), &|node: &Node<'t>| {
        matches!(
            node.kind(),
            "class_declaration" | "interface_declaration" | "enum_declaration" | "record_declaration"
        )
    })
    .into_iter()
    .find(|declaration| {
        declaration
            .child_by_field_name("name")
            .is_some_and(|declared| file.text(&declared) == simple)
    })
}

/// Constants of an enum declared in the file.
pub fn enum_members(file: &JavaSourceFile, type_name: &str) -> Option<Vec<String>> {
    let declaration = find_type_declaration(file, type_name)?;
    if declaration.kind() != "enum_declaration" {
        return None;
    }
    let body = declaration.child_by_field_name("body")?;
    Some(
        named_children(body)
            .into_iter()
            .filter(|child| child.kind() == "enum_constant")
            .filter_map(|constant| constant.child_by_field_name("name"))
            .map(|name| file.text(&name).to_string())
            .collect(),
    )
}

/// A field declaration anywhere in the file, used for `Constants.NAME` references.
pub fn find_field_in_type<'t>(
    file: &'t JavaSourceFile,
    type_name: &str,
    field: &str,
) -> Option<Declaration<'t>> {
    let declaration = find_type_declaration(file, type_name)?;
    let body = declaration.child_by_field_name("body")?;
    named_children(body)
        .into_iter()
        .filter(|member| member.kind() == "field_declaration" || member.kind() == "constant_declaration")
        .find_map(|member| declarators_named(file, member, field, true))
}

/// Method declarations of the file with this name, used to follow helper methods.
pub fn find_method_declarations<'t>(file: &'t JavaSourceFile, name: &str) -> Vec<Node<'t>> {
    file.find_all("method_declaration")
        .into_iter()
        .filter(|method| {
            method
                .child_by_field_name("name")
                .is_some_and(|declared| file.text(&declared) == name)
        })
        .collect()
}

/// Expressions returned by a method body.
pub fn returned_expressions(method: Node<'_>) -> Vec<Node<'_>> {
    method
        .child_by_field_name("body")
        .map(|body| descendants_of_kind(body, "return_statement"))
        .unwrap_or_default()
        .into_iter()
        .filter_map(|statement| named_children(statement).into_iter().next())
        .collect()
}

/// An annotation on a declaration: `@Query("...")`, `@Document(collection = "x")`.
#[derive(Debug, Clone, Copy)]
pub struct Annotation<'t> {
    pub node: Node<'t>,
}

impl<'t> Annotation<'t> {
    pub fn name<'f>(&self, file: &'f JavaSourceFile) -> &'f str {
        self.node
            .child_by_field_name("name")
            .map(|name| file.text(&name))
            .map(|name| name.rsplit('.').next().unwrap_or(name))
            .unwrap_or_default()
    }

    /// The value of `key`. `value` also matches the single unnamed argument.
    pub fn argument(&self, file: &JavaSourceFile, key: &str) -> Option<Node<'t>> {
        let arguments = self
            .node
            .child_by_field_name("arguments")
            .map(named_children)
            .unwrap_or_default();

        arguments.into_iter().find_map(|argument| {
            if argument.kind() == "element_value_pair" {
                let pair_key = argument.child_by_field_name("key")?;
                (file.text(&pair_key) == key)
                    .then(|| argument.child_by_field_name("value"))
                    .flatten()
            } else if key == "value" {
                Some(argument)
            } else {
                None
            }
        })
    }
}

/// Annotations on a class, method or parameter declaration.
pub fn annotations_of(node: Node<'_>) -> Vec<Annotation<'_>> {
    named_children(node)
        .into_iter()
        .filter(|child| child.kind() == "modifiers")
        .flat_map(named_children)
        .filter(|child| child.kind() == "annotation" || child.kind() == "marker_annotation")
        .map(|node| Annotation { node })
        .collect()
}

pub fn find_annotation<'t>(
    file: &JavaSourceFile,
    node: Node<'t>,
    name: &str,
) -> Option<Annotation<'t>> {
    annotations_of(node)
        .into_iter()
        .find(|annotation| annotation.name(file) == name)
}

/// Type arguments of a generic type, as text: `List<Book>` gives `["Book"]`.
pub fn type_arguments<'f>(file: &'f JavaSourceFile, generic_type: Node<'_>) -> Vec<&'f str> {
    named_children(generic_type)
        .into_iter()
        .filter(|child| child.kind() == "type_arguments")
        .flat_map(named_children)
        .map(|argument| file.text(&argument))
        .collect()
}

/// Uncapitalized simple class name, the default collection name of an entity.
pub fn uncapitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
