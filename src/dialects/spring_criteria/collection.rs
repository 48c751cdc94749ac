//! Collection of a template call: an explicit name, or the entity class and its `@Document`.

use tree_sitter::Node;

use crate::dialects::java::constants::resolve_string;
use crate::dialects::java::tree::{find_annotation, find_type_declaration, meaningful_expression, uncapitalize};
use crate::dialects::java::{JavaSource, JavaSourceFile};
use crate::mql::components::HasCollectionReference;

/// `Book.class` gives `Book`.
pub(crate) fn class_literal_name<'f>(file: &'f JavaSourceFile, expression: Node<'_>) -> Option<&'f str> {
    let expression = meaningful_expression(expression);
    if expression.kind() != "class_literal" {
        return None;
    }
    let text = file.text(&expression).trim_end_matches(".class").trim();
    let erased = text.split('<').next().unwrap_or(text);
    Some(erased.rsplit('.').next().unwrap_or(erased))
}

/// The collection an entity is mapped to: `@Document(collection = "..")`, `@Document("..")`
/// when the entity is declared in the file, or its uncapitalized simple name.
pub(crate) fn entity_collection(
    file: &JavaSourceFile,
    entity: &str,
    source: JavaSource,
) -> HasCollectionReference<JavaSource> {
    let simple = entity.rsplit('.').next().unwrap_or(entity);
    let annotated = find_type_declaration(file, simple)
        .and_then(|declaration| find_annotation(file, declaration, "Document"))
        .and_then(|document| {
            document
                .argument(file, "collection")
                .or_else(|| document.argument(file, "value"))
                .and_then(|name| resolve_string(file, name).map(|resolved| (resolved, JavaSource::of(&name))))
        });

    match annotated {
        Some((collection, annotation_source)) => {
            HasCollectionReference::only_collection(annotation_source, collection)
        }
        None => HasCollectionReference::only_collection(source, uncapitalize(simple)),
    }
}

/// The first argument that is a constant string, as an explicit collection name.
pub(super) fn explicit_collection(
    file: &JavaSourceFile,
    arguments: &[Node<'_>],
) -> Option<HasCollectionReference<JavaSource>> {
    arguments.iter().find_map(|argument| {
        resolve_string(file, *argument)
            .map(|name| HasCollectionReference::only_collection(JavaSource::of(argument), name))
    })
}

/// The collection of the first `Entity.class` argument.
fn entity_argument_collection(
    file: &JavaSourceFile,
    arguments: &[Node<'_>],
) -> Option<HasCollectionReference<JavaSource>> {
    arguments.iter().find_map(|argument| {
        class_literal_name(file, *argument)
            .map(|entity| entity_collection(file, entity, JavaSource::of(argument)))
    })
}

/// A collection name passed as a string wins over an entity class.
pub(super) fn collection_from_arguments(
    file: &JavaSourceFile,
    arguments: &[Node<'_>],
) -> Option<HasCollectionReference<JavaSource>> {
    explicit_collection(file, arguments).or_else(|| entity_argument_collection(file, arguments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::java::testing::use_call;
    use crate::dialects::java::tree::MethodCall;
    use crate::mql::components::CollectionReference;
    use pretty_assertions::assert_eq;

    fn collection_of(code: &str) -> Option<HasCollectionReference<JavaSource>> {
        let file = JavaSourceFile::parse("Repo.java", code).unwrap();
        let usage = use_call(&file);
        collection_from_arguments(&file, &usage.arguments())
    }

    fn name_of(reference: Option<HasCollectionReference<JavaSource>>) -> Option<String> {
        reference.and_then(|reference| reference.collection_name().map(str::to_string))
    }

    #[test]
    fn test_explicit_names_win() {
        let reference = collection_of("class Repo { void f() { use(Book.class, \"archive\"); } }");
        assert_eq!(name_of(reference), Some("archive".to_string()));
    }

    #[test]
    fn test_document_annotation() {
        let code = "@Document(collection = \"library_books\") class Book {}\n\
                    @Document(\"people\") class Person {}\n\
                    class Repo { void f() { use(Book.class); use(Person.class); } }";
        let file = JavaSourceFile::parse("Repo.java", code).unwrap();
        let names: Vec<Option<String>> = file
            .find_all("method_invocation")
            .into_iter()
            .filter_map(MethodCall::of)
            .map(|usage| name_of(collection_from_arguments(&file, &usage.arguments())))
            .collect();
        assert_eq!(
            names,
            vec![Some("library_books".to_string()), Some("people".to_string())]
        );
    }

    #[test]
    fn test_entities_default_to_their_uncapitalized_name() {
        let reference = collection_of("class Repo { void f() { use(com.acme.BookLoan.class); } }").unwrap();
        assert!(matches!(
            reference.reference,
            CollectionReference::OnlyCollection(ref only) if only.collection == "bookLoan"
        ));
    }

    #[test]
    fn test_no_collection_hint() {
        assert_eq!(name_of(collection_of("class Repo { void f(Object o) { use(o); } }")), None);
    }
}
