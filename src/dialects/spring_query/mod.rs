//! Spring Data repository dialect: `@Query`, `@Update` and `@Aggregation` annotated methods
//!
//! This module is organized into focused sub-modules:
//! - document: the relaxed JSON of query strings, with `?0` and `:#{..}` placeholders
//! - mapping: query strings into MQL nodes, placeholders bound to method parameters
//!
//! The collection comes from the entity of the repository: `BookRepository extends
//! MongoRepository<Book, String>` queries `Book`'s collection.
mod document;
mod mapping;

pub use self::document::QueryStringError;

use tracing::debug;
use tree_sitter::Node as TreeNode;

use self::document::{parse_document, JsonValue};
use self::mapping::{Parameter, QueryString};
use super::java::constants::{java_type, resolve_constant, resolve_string};
use super::java::tree::{
    descendants_of_kind, enclosing_class, find_annotation, named_children, type_arguments, Annotation,
};
use super::java::{JavaSource, JavaSourceFile};
use super::spring_criteria::entity_collection;
use super::DialectParser;
use crate::mql::components::{
    CommandType, Component, DialectName, HasAggregation, HasCollectionReference, HasFilter,
    HasProjections, HasSorts, HasSourceDialect, HasUpdates, IsCommand,
};
use crate::mql::Node;

const QUERY: &str = "Query";
const AGGREGATION: &str = "Aggregation";
const UPDATE: &str = "Update";

/// Return types that hold many documents.
const MULTIPLE_RESULTS: &[&str] = &[
    "List",
    "Set",
    "Collection",
    "Iterable",
    "Stream",
    "Page",
    "Slice",
    "Window",
    "Flux",
    "GeoResults",
];

/// Parameters Spring binds itself; placeholders never refer to them.
const SPECIAL_PARAMETERS: &[&str] = &["Pageable", "Sort", "ScrollPosition", "Limit", "Collation"];

/// Parses annotated repository methods of one file.
#[derive(Debug, Clone, Copy)]
pub struct SpringQueryDialect<'f> {
    file: &'f JavaSourceFile,
}

impl<'f> SpringQueryDialect<'f> {
    pub fn new(file: &'f JavaSourceFile) -> Self {
        Self { file }
    }

    pub fn file(&self) -> &'f JavaSourceFile {
        self.file
    }

    /// Attachments of every annotated query in the file, in source order.
    pub fn queries(&self) -> Vec<JavaSource> {
        let found: Vec<JavaSource> = self
            .file
            .find_all("method_declaration")
            .into_iter()
            .filter_map(|method| self.query_annotation(method))
            .map(|annotation| JavaSource::of(&annotation.node))
            .collect();

        debug!(
            "Found {} Spring @Query queries in {}",
            found.len(),
            self.file.path().display()
        );
        found
    }

    fn query_annotation<'t>(&self, method: TreeNode<'t>) -> Option<Annotation<'t>> {
        find_annotation(self.file, method, QUERY).or_else(|| find_annotation(self.file, method, AGGREGATION))
    }

    /// The method `source` belongs to, with its query annotation.
    fn annotated_method(&self, source: &JavaSource) -> Option<(TreeNode<'f>, Annotation<'f>)> {
        let mut current = self.file.resolve(source);
        while let Some(node) = current {
            if node.kind() == "method_declaration" {
                return self.query_annotation(node).map(|annotation| (node, annotation));
            }
            current = node.parent();
        }
        None
    }

    fn parameters(&self, method: TreeNode<'_>) -> Vec<Parameter> {
        let file = self.file;
        method
            .child_by_field_name("parameters")
            .map(named_children)
            .unwrap_or_default()
            .into_iter()
            .filter(|parameter| parameter.kind() == "formal_parameter")
            .filter_map(|parameter| {
                let declared_type = file.text(&parameter.child_by_field_name("type")?);
                let erased = declared_type.split('<').next().unwrap_or(declared_type);
                if SPECIAL_PARAMETERS.contains(&erased.rsplit('.').next().unwrap_or(erased)) {
                    return None;
                }
                let name_node = parameter.child_by_field_name("name")?;
                let name = find_annotation(file, parameter, "Param")
                    .and_then(|param| param.argument(file, "value"))
                    .and_then(|value| resolve_string(file, value))
                    .unwrap_or_else(|| file.text(&name_node).to_string());
                Some(Parameter {
                    name,
                    source: JavaSource::of(&name_node),
                    bson_type: java_type(file, declared_type),
                })
            })
            .collect()
    }

    /// `interface BookRepository extends MongoRepository<Book, String>` gives `Book`'s collection.
    fn repository_collection(&self, method: TreeNode<'_>) -> Option<HasCollectionReference<JavaSource>> {
        let file = self.file;
        let repository = enclosing_class(method)?;
        named_children(repository)
            .into_iter()
            .filter(|child| matches!(child.kind(), "extends_interfaces" | "super_interfaces" | "superclass"))
            .flat_map(|supertypes| descendants_of_kind(supertypes, "generic_type"))
            .find_map(|generic| {
                let text = file.text(&generic);
                let raw = text.split('<').next().unwrap_or(text).trim();
                if !raw.ends_with("Repository") {
                    return None;
                }
                let entity = type_arguments(file, generic).into_iter().next()?;
                Some(entity_collection(file, entity, JavaSource::of(&generic)))
            })
    }

    /// The strings of an annotation value: one literal or a `{ "..", ".." }` array.
    fn strings(&self, value: TreeNode<'_>) -> Vec<(String, JavaSource)> {
        let elements = if value.kind() == "element_value_array_initializer" {
            named_children(value)
        } else {
            vec![value]
        };
        elements
            .into_iter()
            .filter_map(|element| resolve_string(self.file, element).map(|text| (text, JavaSource::of(&element))))
            .collect()
    }

    fn document(&self, text: &str, source: &JavaSource) -> Option<Vec<(String, JsonValue)>> {
        match parse_document(text) {
            Ok(document) => Some(document),
            Err(error) => {
                debug!(
                    "Could not parse query string at {}: {}",
                    self.file.location(source),
                    error
                );
                None
            }
        }
    }

    /// Parses the string of `key`, then converts it with `convert`.
    fn attribute(
        &self,
        annotation: &Annotation<'_>,
        key: &str,
        parameters: &[Parameter],
        convert: impl Fn(&QueryString<'_>, &[(String, JsonValue)]) -> Vec<Node<JavaSource>>,
    ) -> Vec<Node<JavaSource>> {
        annotation
            .argument(self.file, key)
            .map(|value| self.strings(value))
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(text, source)| {
                let document = self.document(&text, &source)?;
                Some(convert(&QueryString { source, parameters }, document.as_slice()))
            })
            .flatten()
            .collect()
    }

    fn flag(&self, annotation: &Annotation<'_>, key: &str) -> bool {
        annotation
            .argument(self.file, key)
            .and_then(|value| resolve_constant(self.file, value))
            .and_then(|value| value.as_bool())
            .unwrap_or(false)
    }

    fn returns_many(&self, method: TreeNode<'_>) -> bool {
        method.child_by_field_name("type").is_some_and(|return_type| {
            let text = self.file.text(&return_type);
            let erased = text.split('<').next().unwrap_or(text).trim();
            text.ends_with("[]") || MULTIPLE_RESULTS.contains(&erased.rsplit('.').next().unwrap_or(erased))
        })
    }

    fn command(&self, method: TreeNode<'_>, annotation: &Annotation<'_>, has_updates: bool) -> CommandType {
        if annotation.name(self.file) == AGGREGATION {
            CommandType::Aggregate
        } else if has_updates {
            CommandType::UpdateMany
        } else if self.flag(annotation, "count") {
            CommandType::CountDocuments
        } else if self.flag(annotation, "exists") {
            CommandType::FindOne
        } else if self.flag(annotation, "delete") {
            CommandType::DeleteMany
        } else if self.returns_many(method) {
            CommandType::FindMany
        } else {
            CommandType::FindOne
        }
    }

    fn parse_method(&self, source: &JavaSource, method: TreeNode<'_>, annotation: &Annotation<'_>) -> Node<JavaSource> {
        let parameters = self.parameters(method);
        let is_aggregation = annotation.name(self.file) == AGGREGATION;

        let (filter, projections, sorts, stages) = if is_aggregation {
            let pipeline_key = if annotation.argument(self.file, "pipeline").is_some() {
                "pipeline"
            } else {
                "value"
            };
            let stages = self.attribute(annotation, pipeline_key, &parameters, |query, document| {
                vec![query.stage(document)]
            });
            (Vec::new(), Vec::new(), Vec::new(), stages)
        } else {
            (
                self.attribute(annotation, "value", &parameters, |query, document| query.filter(document)),
                self.attribute(annotation, "fields", &parameters, |query, document| query.projections(document)),
                self.attribute(annotation, "sort", &parameters, |query, document| query.sorts(document)),
                Vec::new(),
            )
        };

        let updates = find_annotation(self.file, method, UPDATE)
            .map(|update| {
                let key = if update.argument(self.file, "update").is_some() {
                    "update"
                } else {
                    "value"
                };
                self.attribute(&update, key, &parameters, |query, document| query.updates(document))
            })
            .unwrap_or_default();

        let command = self.command(method, annotation, !updates.is_empty());
        let collection = self
            .repository_collection(method)
            .unwrap_or_else(HasCollectionReference::unknown);

        let mut components: Vec<Component<JavaSource>> = vec![
            HasSourceDialect::new(DialectName::SpringQuery).into(),
            IsCommand::new(command).into(),
            collection.into(),
            HasFilter::new(filter).into(),
            HasUpdates::new(updates).into(),
            HasAggregation::new(stages).into(),
        ];
        if !projections.is_empty() {
            components.push(HasProjections::new(projections).into());
        }
        if !sorts.is_empty() {
            components.push(HasSorts::new(sorts).into());
        }
        Node::new(*source, components)
    }
}

impl DialectParser<JavaSource> for SpringQueryDialect<'_> {
    fn is_candidate_for_query(&self, source: &JavaSource) -> bool {
        self.annotated_method(source).is_some()
    }

    fn attachment(&self, source: &JavaSource) -> Option<JavaSource> {
        self.annotated_method(source)
            .map(|(_, annotation)| JavaSource::of(&annotation.node))
    }

    fn parse(&self, source: &JavaSource) -> Node<JavaSource> {
        match self.annotated_method(source) {
            Some((method, annotation)) => self.parse_method(source, method, &annotation),
            None => Node::new(
                *source,
                vec![
                    HasSourceDialect::new(DialectName::SpringQuery).into(),
                    HasCollectionReference::unknown().into(),
                ],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialects::java::testing::names;
    use crate::mql::components::{HasChildren, HasValueReference, Name};
    use crate::mql::BsonType;
    use pretty_assertions::assert_eq;

    const REPOSITORY: &str = r#"
import org.springframework.data.mongodb.repository.*;

@Document("books")
class Book {}

public interface BookRepository extends MongoRepository<Book, String> {
    @Query("{ author: ?0, year: { $gte: ?1 } }")
    List<Book> byAuthorSince(String author, int year);

    @Query(value = "{ 'status': 'AVAILABLE' }", fields = "{ title: 1, _id: 0 }", sort = "{ title: 1 }")
    List<Book> available(Pageable page);

    @Query(value = "{ author: :#{#name} }", count = true)
    long countByAuthor(@Param("name") String author);

    @Query(value = "{ isbn: ?0 }", delete = true)
    void removeByIsbn(String isbn);

    @Query("{ isbn: ?0 }")
    Book byIsbn(String isbn);

    @Aggregation(pipeline = {
        "{ $match: { author: ?0 } }",
        "{ $group: { _id: '$year', total: { $sum: 1 } } }",
        "{ $sort: { total: -1 } }"
    })
    List<Stats> yearly(String author);

    @Query("{ isbn: ?0 }")
    @Update("{ $inc: { loans: 1 }, $set: { borrower: ?1 } }")
    long borrow(String isbn, String borrower);

    @Query("{ broken: ")
    List<Book> broken();

    List<Book> findByTitle(String title);
}
"#;

    fn parse_all() -> Vec<Node<JavaSource>> {
        let file = JavaSourceFile::parse("BookRepository.java", REPOSITORY).unwrap();
        let dialect = SpringQueryDialect::new(&file);
        dialect.queries().iter().map(|source| dialect.parse(source)).collect()
    }


    fn filter(query: &Node<JavaSource>) -> &[Node<JavaSource>] {
        query.component::<HasFilter<JavaSource>>().unwrap().children()
    }

    #[test]
    fn test_commands_of_annotated_methods() {
        let commands: Vec<CommandType> = parse_all()
            .iter()
            .map(|query| query.component::<IsCommand>().unwrap().command_type)
            .collect();
        assert_eq!(
            commands,
            vec![
                CommandType::FindMany,
                CommandType::FindMany,
                CommandType::CountDocuments,
                CommandType::DeleteMany,
                CommandType::FindOne,
                CommandType::Aggregate,
                CommandType::UpdateMany,
                CommandType::FindMany,
            ]
        );
    }

    #[test]
    fn test_collection_of_the_repository_entity() {
        for query in parse_all() {
            assert_eq!(query.collection_reference().and_then(|reference| reference.collection_name()), Some("books"));
        }
    }

    #[test]
    fn test_placeholders_take_parameter_types() {
        let queries = parse_all();
        let predicates = filter(&queries[0]);
        assert_eq!(names(predicates), vec![Name::Eq, Name::Gte]);
        let types: Vec<Option<BsonType>> = predicates
            .iter()
            .map(|predicate| {
                predicate
                    .component::<HasValueReference<JavaSource>>()
                    .and_then(|value| value.bson_type().cloned())
            })
            .collect();
        assert_eq!(types, vec![Some(BsonType::String.nullable()), Some(BsonType::Int32)]);

        let by_name = filter(&queries[2])[0]
            .component::<HasValueReference<JavaSource>>()
            .unwrap();
        assert_eq!(by_name.bson_type(), Some(&BsonType::String.nullable()));
    }

    #[test]
    fn test_fields_and_sort_attributes() {
        let queries = parse_all();
        let projections = queries[1].component::<HasProjections<JavaSource>>().unwrap().children();
        assert_eq!(names(projections), vec![Name::Include, Name::Exclude]);
        let sorts = queries[1].component::<HasSorts<JavaSource>>().unwrap().children();
        assert_eq!(names(sorts), vec![Name::Ascending]);
    }

    #[test]
    fn test_aggregation_and_update_annotations() {
        let queries = parse_all();
        let stages = queries[5].component::<HasAggregation<JavaSource>>().unwrap().children();
        assert_eq!(names(stages), vec![Name::Match, Name::Group, Name::Sort]);

        let updates = queries[6].component::<HasUpdates<JavaSource>>().unwrap().children();
        assert_eq!(names(updates), vec![Name::Inc, Name::Set]);
    }

    #[test]
    fn test_unparseable_strings_give_empty_filters() {
        let queries = parse_all();
        assert!(filter(&queries[7]).is_empty());
    }

    #[test]
    fn test_attachment_is_the_annotation() {
        let file = JavaSourceFile::parse("BookRepository.java", REPOSITORY).unwrap();
        let dialect = SpringQueryDialect::new(&file);
        let annotation = dialect.queries()[0];
        let parameter = file
            .find_all("formal_parameter")
            .into_iter()
            .next()
            .map(|parameter| JavaSource::of(&parameter))
            .unwrap();

        assert!(dialect.is_candidate_for_query(&parameter));
        assert_eq!(dialect.attachment(&parameter), Some(annotation));
        assert!(file.source_text(&annotation).starts_with("@Query"));

        let plain = file.find_all("method_declaration").last().map(|method| JavaSource::of(&method)).unwrap();
        assert!(!dialect.is_candidate_for_query(&plain));
    }
}
