//! Where a driver query reads from.
//!
//! Follows the receiver of a command back to `client.getDatabase("db").getCollection("coll")`,
//! through locals, fields assigned in constructors and helper methods of the same file.

use tree_sitter::Node;

use crate::dialects::java::constants::resolve_string;
use crate::dialects::java::tree::{
    assigned_values, find_declaration, find_method_declarations, find_parent_of_kind,
    meaningful_expression, returned_expressions, Declaration, MethodCall,
};
use crate::dialects::java::{JavaSource, JavaSourceFile};
use crate::mql::components::HasCollectionReference;
use crate::mql::Namespace;

const MAX_DEPTH: usize = 16;

#[derive(Debug, Clone)]
struct ResolvedName {
    name: String,
    source: JavaSource,
}

/// A receiver known to be a collection. The names are set when they are constants.
#[derive(Debug, Clone, Default)]
struct CollectionTarget {
    database: Option<ResolvedName>,
    collection: Option<ResolvedName>,
}

pub(super) fn is_collection_expression(file: &JavaSourceFile, expression: Node<'_>) -> bool {
    collection_target(file, expression, 0).is_some()
}

pub(super) fn collection_reference(
    file: &JavaSourceFile,
    receiver: Node<'_>,
) -> HasCollectionReference<JavaSource> {
    let Some(target) = collection_target(file, receiver, 0) else {
        return HasCollectionReference::unknown();
    };

    match (target.database, target.collection) {
        (Some(database), Some(collection)) => HasCollectionReference::known(
            Some(database.source),
            collection.source,
            Namespace::new(database.name, collection.name),
        ),
        (None, Some(collection)) => {
            HasCollectionReference::only_collection(collection.source, collection.name)
        }
        _ => HasCollectionReference::unknown(),
    }
}

fn constant_name(file: &JavaSourceFile, expression: Node<'_>) -> Option<ResolvedName> {
    resolve_string(file, expression).map(|name| ResolvedName {
        name,
        source: JavaSource::of(&expression),
    })
}

fn is_local_call(file: &JavaSourceFile, call: &MethodCall) -> bool {
    call.object
        .map_or(true, |object| file.text(&object) == "this")
}

fn declaration_of<'t>(file: &JavaSourceFile, expression: Node<'t>) -> Option<Declaration<'t>> {
    match expression.kind() {
        "identifier" => find_declaration(file, expression),
        "field_access" => {
            let object = expression.child_by_field_name("object")?;
            if file.text(&object) != "this" {
                return None;
            }
            find_declaration(file, expression.child_by_field_name("field")?)
        }
        _ => None,
    }
}

/// The initializer and, for fields, every value assigned to it in the declaring class.
fn values_of<'t>(file: &JavaSourceFile, declaration: &Declaration<'t>) -> Vec<Node<'t>> {
    let mut values: Vec<Node<'t>> = declaration.initializer.into_iter().collect();
    if declaration.is_field {
        if let Some(class_body) = find_parent_of_kind(declaration.name, &["class_body", "enum_body"]) {
            values.extend(assigned_values(file, class_body, file.text(&declaration.name)));
        }
    }
    values
}

fn declared_type_starts_with(file: &JavaSourceFile, declared: Option<Node<'_>>, prefix: &str) -> bool {
    declared.is_some_and(|declared| {
        let text = file.text(&declared);
        let simple = text.rsplit('.').next().unwrap_or(text);
        simple.starts_with(prefix) || text.starts_with(prefix)
    })
}

fn collection_target(file: &JavaSourceFile, expression: Node<'_>, depth: usize) -> Option<CollectionTarget> {
    if depth > MAX_DEPTH {
        return None;
    }
    let expression = meaningful_expression(expression);

    match expression.kind() {
        "method_invocation" => {
            let call = MethodCall::of(expression)?;
            match call.name(file) {
                "getCollection" => Some(CollectionTarget {
                    collection: call.argument(0).and_then(|name| constant_name(file, name)),
                    database: call
                        .object
                        .and_then(|database| database_name(file, database, depth + 1)),
                }),
                // withReadPreference, withCodecRegistry... keep the namespace
                name if name.starts_with("with") => collection_target(file, call.object?, depth + 1),
                name if is_local_call(file, &call) => {
                    let methods = find_method_declarations(file, name);
                    methods
                        .iter()
                        .flat_map(|method| returned_expressions(*method))
                        .find_map(|returned| collection_target(file, returned, depth + 1))
                        .or_else(|| {
                            methods
                                .iter()
                                .any(|method| {
                                    declared_type_starts_with(file, method.child_by_field_name("type"), "MongoCollection")
                                })
                                .then(CollectionTarget::default)
                        })
                }
                _ => None,
            }
        }
        "identifier" | "field_access" => {
            let declaration = declaration_of(file, expression)?;
            values_of(file, &declaration)
                .into_iter()
                .find_map(|value| collection_target(file, value, depth + 1))
                .or_else(|| {
                    declared_type_starts_with(file, declaration.declared_type, "MongoCollection")
                        .then(CollectionTarget::default)
                })
        }
        _ => None,
    }
}

fn database_name(file: &JavaSourceFile, expression: Node<'_>, depth: usize) -> Option<ResolvedName> {
    if depth > MAX_DEPTH {
        return None;
    }
    let expression = meaningful_expression(expression);

    match expression.kind() {
        "method_invocation" => {
            let call = MethodCall::of(expression)?;
            match call.name(file) {
                "getDatabase" => call.argument(0).and_then(|name| constant_name(file, name)),
                name if name.starts_with("with") => database_name(file, call.object?, depth + 1),
                name if is_local_call(file, &call) => find_method_declarations(file, name)
                    .into_iter()
                    .flat_map(returned_expressions)
                    .find_map(|returned| database_name(file, returned, depth + 1)),
                _ => None,
            }
        }
        "identifier" | "field_access" => {
            let declaration = declaration_of(file, expression)?;
            values_of(file, &declaration)
                .into_iter()
                .find_map(|value| database_name(file, value, depth + 1))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mql::components::CollectionReference;

    fn reference_of_find(code: &str) -> HasCollectionReference<JavaSource> {
        let file = JavaSourceFile::parse("Repo.java", code).unwrap();
        let find = file
            .find_all("method_invocation")
            .into_iter()
            .filter_map(MethodCall::of)
            .find(|call| call.name(&file) == "find")
            .unwrap();
        collection_reference(&file, find.object.unwrap())
    }

    #[test]
    fn test_inline_chain() {
        let reference = reference_of_find(
            "class Repo { void f(MongoClient client) { client.getDatabase(\"prod\").getCollection(\"books\").find(); } }",
        );
        assert_eq!(reference.namespace(), Some(&Namespace::new("prod", "books")));
    }

    #[test]
    fn test_field_assigned_in_constructor_with_constants() {
        let reference = reference_of_find(
            "class Repo {\n\
               private static final String DB = \"prod\";\n\
               private final MongoCollection<Document> collection;\n\
               Repo(MongoClient client) {\n\
                 this.collection = client.getDatabase(DB).getCollection(\"books\");\n\
               }\n\
               void f() { collection.find(); }\n\
             }",
        );
        assert_eq!(reference.namespace(), Some(&Namespace::new("prod", "books")));
    }

    #[test]
    fn test_database_from_a_parameter_gives_only_the_collection() {
        let reference = reference_of_find(
            "class Repo { void f(MongoDatabase database) { database.getCollection(\"books\").find(); } }",
        );
        assert!(matches!(
            reference.reference,
            CollectionReference::OnlyCollection(ref only) if only.collection == "books"
        ));
    }

    #[test]
    fn test_injected_collection_is_a_collection_without_namespace() {
        let code = "class Repo {\n\
                      private final MongoCollection<Document> books;\n\
                      Repo(MongoCollection<Document> books) { this.books = books; }\n\
                      void f() { books.find(); }\n\
                    }";
        let file = JavaSourceFile::parse("Repo.java", code).unwrap();
        let find = file
            .find_all("method_invocation")
            .into_iter()
            .filter_map(MethodCall::of)
            .find(|call| call.name(&file) == "find")
            .unwrap();

        assert!(is_collection_expression(&file, find.object.unwrap()));
        assert_eq!(
            collection_reference(&file, find.object.unwrap()),
            HasCollectionReference::unknown()
        );
    }

    #[test]
    fn test_helper_methods_are_followed() {
        let reference = reference_of_find(
            "class Repo {\n\
               private MongoClient client;\n\
               private MongoCollection<Document> books() {\n\
                 return client.getDatabase(\"prod\").getCollection(\"books\");\n\
               }\n\
               void f() { books().find(); }\n\
             }",
        );
        assert_eq!(reference.namespace(), Some(&Namespace::new("prod", "books")));
    }

    #[test]
    fn test_plain_lists_are_not_collections() {
        let code = "class Repo { void f(List<String> names) { names.find(); } }";
        let file = JavaSourceFile::parse("Repo.java", code).unwrap();
        let find = file
            .find_all("method_invocation")
            .into_iter()
            .filter_map(MethodCall::of)
            .find(|call| call.name(&file) == "find")
            .unwrap();
        assert!(!is_collection_expression(&file, find.object.unwrap()));
    }
}
