//! Turns parsed query strings into MQL nodes, binding placeholders to method parameters.

use super::document::{JsonValue, Placeholder};
use crate::dialects::java::JavaSource;
use crate::mql::components::{
    Component, FieldName, FieldReference, HasAccumulatedFields, HasAddedFields, HasFieldReference,
    HasFilter, HasLimit, HasProjections, HasSorts, HasValueReference, Name, Named,
};
use crate::mql::{BsonType, Node as MqlNode, Value};

/// A bindable parameter of a repository method.
#[derive(Debug, Clone)]
pub(super) struct Parameter {
    /// The declared name, or the `@Param` name when present
    pub(super) name: String,
    pub(super) source: JavaSource,
    pub(super) bson_type: BsonType,
}

/// One query string of an annotation, with the parameters its placeholders refer to.
#[derive(Debug, Clone, Copy)]
pub(super) struct QueryString<'p> {
    pub(super) source: JavaSource,
    pub(super) parameters: &'p [Parameter],
}

type Document = [(String, JsonValue)];

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.iter().all(|(key, _)| key.starts_with('$'))
}

impl QueryString<'_> {
    fn node(&self, components: Vec<Component<JavaSource>>) -> MqlNode<JavaSource> {
        MqlNode::new(self.source, components)
    }

    fn named(&self, name: Name, mut components: Vec<Component<JavaSource>>) -> MqlNode<JavaSource> {
        components.insert(0, Named::new(name).into());
        self.node(components)
    }

    fn field(&self, name: &str) -> HasFieldReference<JavaSource> {
        HasFieldReference::from_schema(self.source, name)
    }

    fn parameter(&self, placeholder: &Placeholder) -> Option<&Parameter> {
        match placeholder {
            Placeholder::Index(index) => self.parameters.get(*index),
            Placeholder::Named(name) => self.parameters.iter().find(|parameter| &parameter.name == name),
            Placeholder::Expression(_) => None,
        }
    }

    fn value(&self, json: &JsonValue) -> HasValueReference<JavaSource> {
        if let Some(constant) = json.to_constant() {
            let bson_type = constant.bson_type();
            return HasValueReference::constant(self.source, constant, bson_type);
        }
        match json {
            JsonValue::Placeholder(placeholder) => match self.parameter(placeholder) {
                Some(parameter) => HasValueReference::runtime(parameter.source, parameter.bson_type.clone()),
                None => HasValueReference::runtime(self.source, BsonType::Any),
            },
            JsonValue::Array(_) => HasValueReference::runtime(self.source, BsonType::array(BsonType::Any)),
            _ => HasValueReference::runtime(self.source, BsonType::Any),
        }
    }

    /// `"$field"` as a computed reference to the field, any other value as is.
    fn expression_value(&self, json: &JsonValue) -> HasValueReference<JavaSource> {
        match json.as_str().and_then(|path| path.strip_prefix('$')) {
            Some(path) => HasValueReference::computed(
                self.source,
                BsonType::Any,
                self.node(vec![self.field_path(path).into()]),
            ),
            None => self.value(json),
        }
    }

    fn field_path(&self, path: &str) -> HasFieldReference<JavaSource> {
        let trimmed = path.trim_start_matches('$');
        HasFieldReference::new(FieldReference::FromSchema(
            FieldName::new(self.source, trimmed).with_display_name(format!("${}", trimmed)),
        ))
    }

    /// Predicates of a filter document, in document order.
    pub(super) fn filter(&self, document: &Document) -> Vec<MqlNode<JavaSource>> {
        document
            .iter()
            .flat_map(|(key, value)| self.predicates(key, value))
            .collect()
    }

    fn predicates(&self, key: &str, value: &JsonValue) -> Vec<MqlNode<JavaSource>> {
        if key.starts_with('$') {
            return vec![self.logical(key, value)];
        }
        match value.as_document() {
            Some(operators) if is_operator_document(operators) => self.operators_on(key, operators),
            _ => vec![self.named(Name::Eq, vec![self.field(key).into(), self.value(value).into()])],
        }
    }

    fn logical(&self, operator: &str, value: &JsonValue) -> MqlNode<JavaSource> {
        let name = Name::from_canonical(operator);
        match (name, value) {
            (Name::And | Name::Or | Name::Nor, JsonValue::Array(branches)) => {
                let children = branches
                    .iter()
                    .filter_map(JsonValue::as_document)
                    .filter_map(|branch| self.single(self.filter(branch)))
                    .collect();
                self.named(name, vec![HasFilter::new(children).into()])
            }
            _ => self.named(name, vec![]),
        }
    }

    fn operators_on(&self, field: &str, operators: &Document) -> Vec<MqlNode<JavaSource>> {
        operators
            .iter()
            .filter(|(operator, _)| operator != "$options")
            .map(|(operator, operand)| {
                let name = Name::from_canonical(operator);
                match (name, operand.as_document()) {
                    (Name::Not, Some(negated)) => self.named(
                        Name::Not,
                        vec![HasFilter::new(self.operators_on(field, negated)).into()],
                    ),
                    (Name::ElemMatch, Some(condition)) => self.named(
                        Name::ElemMatch,
                        vec![self.field(field).into(), HasFilter::new(self.filter(condition)).into()],
                    ),
                    _ => self.named(name, vec![self.field(field).into(), self.value(operand).into()]),
                }
            })
            .collect()
    }

    fn single(&self, mut predicates: Vec<MqlNode<JavaSource>>) -> Option<MqlNode<JavaSource>> {
        match predicates.len() {
            0 | 1 => predicates.pop(),
            _ => Some(self.named(Name::And, vec![HasFilter::new(predicates).into()])),
        }
    }

    /// `{ title: 1, _id: 0 }`. Computed projections are skipped.
    pub(super) fn projections(&self, document: &Document) -> Vec<MqlNode<JavaSource>> {
        document
            .iter()
            .filter_map(|(key, value)| {
                let included = match value.to_constant()? {
                    Value::Boolean(flag) => flag,
                    other => other.as_i64()? != 0,
                };
                let name = if included { Name::Include } else { Name::Exclude };
                Some(self.named(
                    name,
                    vec![
                        self.field(key).into(),
                        HasValueReference::inferred(self.source, Value::Int32(i32::from(included)), BsonType::Int32)
                            .into(),
                    ],
                ))
            })
            .collect()
    }

    /// `{ title: 1, year: -1 }`. A placeholder direction is only known at runtime.
    pub(super) fn sorts(&self, document: &Document) -> Vec<MqlNode<JavaSource>> {
        document
            .iter()
            .filter_map(|(key, value)| {
                let (name, direction) = match value {
                    JsonValue::Placeholder(_) => (Name::Sort, HasValueReference::runtime(self.source, BsonType::Int32)),
                    _ => {
                        let descending = value.to_constant()?.as_i64()? < 0;
                        let (name, direction) = if descending {
                            (Name::Descending, -1)
                        } else {
                            (Name::Ascending, 1)
                        };
                        (
                            name,
                            HasValueReference::inferred(self.source, Value::Int32(direction), BsonType::Int32),
                        )
                    }
                };
                Some(self.named(name, vec![self.field(key).into(), direction.into()]))
            })
            .collect()
    }

    /// `{ $set: { a: ?0 }, $inc: { n: 1 } }`. Replacement documents have no operations.
    pub(super) fn updates(&self, document: &Document) -> Vec<MqlNode<JavaSource>> {
        document
            .iter()
            .filter(|(operator, _)| operator.starts_with('$'))
            .filter_map(|(operator, fields)| Some((Name::from_canonical(operator), fields.as_document()?)))
            .flat_map(|(name, fields)| {
                fields.iter().map(move |(field, value)| match (name, value.as_document()) {
                    (Name::Pull, Some(condition)) if !is_operator_document(condition) => self.named(
                        name,
                        vec![self.field(field).into(), HasFilter::new(self.filter(condition)).into()],
                    ),
                    _ => self.named(name, vec![self.field(field).into(), self.value(value).into()]),
                })
            })
            .collect()
    }

    /// One `@Aggregation` pipeline stage.
    pub(super) fn stage(&self, document: &Document) -> MqlNode<JavaSource> {
        let Some((operator, body)) = document.first() else {
            return self.named(Name::Unknown, vec![]);
        };
        let body_document = body.as_document().unwrap_or_default();

        match operator.as_str() {
            "$match" => {
                let filter = self.single(self.filter(body_document)).into_iter().collect();
                self.named(Name::Match, vec![HasFilter::new(filter).into()])
            }
            "$project" => self.named(
                Name::Project,
                vec![HasProjections::new(self.projections(body_document)).into()],
            ),
            "$sort" => self.named(Name::Sort, vec![HasSorts::new(self.sorts(body_document)).into()]),
            "$limit" => {
                let limit = body
                    .to_constant()
                    .and_then(|limit| limit.as_i64())
                    .and_then(|limit| u32::try_from(limit).ok());
                self.named(
                    Name::Limit,
                    limit.map(|limit| HasLimit::new(limit).into()).into_iter().collect(),
                )
            }
            "$unwind" => {
                let path = body
                    .as_str()
                    .or_else(|| {
                        body_document
                            .iter()
                            .find(|(key, _)| key == "path")
                            .and_then(|(_, path)| path.as_str())
                    });
                let reference = path
                    .map(|path| self.field_path(path))
                    .unwrap_or_else(HasFieldReference::unknown);
                self.named(Name::Unwind, vec![reference.into()])
            }
            "$addFields" | "$set" => {
                let fields = body_document
                    .iter()
                    .map(|(key, value)| {
                        self.node(vec![
                            HasFieldReference::computed(self.source, key.as_str()).into(),
                            self.expression_value(value).into(),
                        ])
                    })
                    .collect();
                self.named(Name::AddFields, vec![HasAddedFields::new(fields).into()])
            }
            "$group" => self.group(body_document),
            _ => self.named(Name::Unknown, vec![]),
        }
    }

    fn group(&self, body: &Document) -> MqlNode<JavaSource> {
        let mut id_value = HasValueReference::constant(self.source, Value::Null, BsonType::Null);
        let mut accumulated = Vec::new();

        for (key, value) in body {
            if key == "_id" {
                id_value = match value.as_document() {
                    Some(keys) => {
                        let references: Vec<Component<JavaSource>> = keys
                            .iter()
                            .filter_map(|(_, path)| path.as_str().map(|path| self.field_path(path).into()))
                            .collect();
                        HasValueReference::computed(self.source, BsonType::Any, self.node(references))
                    }
                    None => self.expression_value(value),
                };
                continue;
            }

            let accumulator = value
                .as_document()
                .and_then(|accumulator| accumulator.first())
                .map(|(operator, operand)| (Name::from_canonical(operator), self.expression_value(operand)));
            accumulated.push(match accumulator {
                Some((name, operand)) => self.named(
                    name,
                    vec![HasFieldReference::computed(self.source, key.as_str()).into(), operand.into()],
                ),
                None => self.named(Name::Unknown, vec![]),
            });
        }

        self.named(
            Name::Group,
            vec![
                HasFieldReference::inferred(self.source, "_id").into(),
                id_value.into(),
                HasAccumulatedFields::new(accumulated).into(),
            ],
        )
    }
}
