//! Node: the dialect-independent building block of a query.
//!
//! A node has no meaning on its own. Its components give it one: a filter
//! predicate is a node with `Named`, `HasFieldReference` and `HasValueReference`,
//! a query is a node with `IsCommand`, `HasCollectionReference` and `HasFilter`.
//! Nodes are immutable, every derived node shares the untouched parts.

use std::fmt::Debug;
use std::sync::Arc;

use super::components::{
    Component, ComponentKind, ExplainPlanType, HasChildren, HasCollectionReference, HasExplain,
    HasFieldReference, HasLimit, HasTargetCluster, IsCommand, Named, Version,
};
use super::namespace::CollectionSchema;
use super::parser::components::all_nodes_with_schema_field_references;

/// Opaque handle into the concrete syntax a node was parsed from.
pub trait Source: Clone + Debug + PartialEq + Send + Sync + 'static {}

impl<T> Source for T where T: Clone + Debug + PartialEq + Send + Sync + 'static {}

#[derive(Debug, Clone, PartialEq)]
pub struct Node<S> {
    pub source: S,
    components: Arc<[Component<S>]>,
}

impl<S: Source> Node<S> {
    pub fn new(source: S, components: Vec<Component<S>>) -> Self {
        Self {
            source,
            components: components.into(),
        }
    }

    pub fn all_components(&self) -> &[Component<S>] {
        &self.components
    }

    /// First component of kind `C`.
    pub fn component<C: ComponentKind<S>>(&self) -> Option<&C> {
        self.components.iter().find_map(C::project)
    }

    pub fn components<C: ComponentKind<S>>(&self) -> Vec<&C> {
        self.components.iter().filter_map(C::project).collect()
    }

    pub fn has_component<C: ComponentKind<S>>(&self) -> bool {
        self.component::<C>().is_some()
    }

    pub fn components_with_children(&self) -> Vec<&dyn HasChildren<S>> {
        self.components
            .iter()
            .filter_map(Component::as_has_children)
            .collect()
    }

    /// A new node with `component` appended. `self` is left untouched.
    pub fn with(&self, component: impl Into<Component<S>>) -> Node<S> {
        let mut components = self.components.to_vec();
        components.push(component.into());
        Node::new(self.source.clone(), components)
    }

    /// A new node whose components are mapped one by one.
    pub fn copy(&self, modifier: impl Fn(&Component<S>) -> Component<S>) -> Node<S> {
        Node::new(
            self.source.clone(),
            self.components.iter().map(modifier).collect(),
        )
    }

    fn without(&self, keep: impl Fn(&Component<S>) -> bool) -> Vec<Component<S>> {
        self.components.iter().filter(|c| keep(c)).cloned().collect()
    }

    pub fn with_target_cluster(&self, version: Version) -> Node<S> {
        let mut components = self.without(|c| !matches!(c, Component::HasTargetCluster(_)));
        components.push(HasTargetCluster::new(version).into());
        Node::new(self.source.clone(), components)
    }

    pub fn with_explain(&self, explain_type: ExplainPlanType) -> Node<S> {
        let mut components = self.without(|c| !matches!(c, Component::HasExplain(_)));
        components.push(HasExplain::new(explain_type).into());
        Node::new(self.source.clone(), components)
    }

    pub fn with_limit(&self, limit: u32) -> Node<S> {
        let mut components = self.without(|c| !matches!(c, Component::HasLimit(_)));
        components.push(HasLimit::new(limit).into());
        Node::new(self.source.clone(), components)
    }

    pub fn query_with_injected_collection_schema(&self, schema: &CollectionSchema) -> Node<S> {
        self.copy(|component| match component {
            Component::HasCollectionReference(reference) => {
                reference.with_schema(schema.clone()).into()
            }
            other => other.clone(),
        })
    }

    pub fn query_with_overwritten_database(&self, database: &str) -> Node<S> {
        self.copy(|component| match component {
            Component::HasCollectionReference(reference) => {
                reference.with_database(database).into()
            }
            other => other.clone(),
        })
    }

    pub fn collection_reference(&self) -> Option<&HasCollectionReference<S>> {
        self.component()
    }

    /// Stable digest of the query shape: target collection, command, and the operator and
    /// field of every predicate. Values are left out, so it works as a cache key.
    pub fn query_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let mut update = |part: &str| {
            hasher.update(part.as_bytes());
            hasher.update(&[0]);
        };

        let collection = self.collection_reference().and_then(|reference| {
            reference
                .namespace()
                .map(ToString::to_string)
                .or_else(|| reference.collection_name().map(str::to_string))
        });
        update(collection.as_deref().unwrap_or(""));
        update(
            self.component::<IsCommand>()
                .map(|command| command.command_type.canonical())
                .unwrap_or(""),
        );

        let field_nodes = all_nodes_with_schema_field_references::<S>()
            .parse(self)
            .unwrap_or_default();
        for node in &field_nodes {
            let Some(field) = node
                .component::<HasFieldReference<S>>()
                .and_then(|field| field.schema_field())
            else {
                continue;
            };
            update(node.component::<Named>().map(|named| named.name.canonical()).unwrap_or(""));
            update(&field.field_name);
        }
        hasher.finalize().to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mql::components::{CollectionReference, CommandType, HasFilter, Name};
    use crate::mql::namespace::Namespace;
    use crate::mql::BsonType;

    fn query() -> Node<()> {
        Node::new(
            (),
            vec![
                HasCollectionReference::known(Some(()), (), Namespace::new("db", "coll")).into(),
                HasFilter::new(vec![Node::new(
                    (),
                    vec![
                        Named::new(Name::Eq).into(),
                        HasFieldReference::from_schema((), "field").into(),
                    ],
                )])
                .into(),
            ],
        )
    }

    #[test]
    fn test_with_appends_and_keeps_original() {
        let original = query();
        let limited = original.with(HasLimit::new(5));

        assert_eq!(limited.component::<HasLimit>(), Some(&HasLimit::new(5)));
        assert_eq!(original.component::<HasLimit>(), None);
        assert_eq!(original.all_components().len(), 2);
    }

    #[test]
    fn test_components_with_children() {
        let node = query();
        let with_children = node.components_with_children();
        assert_eq!(with_children.len(), 1);
        assert_eq!(with_children[0].children().len(), 1);
    }

    #[test]
    fn test_target_cluster_is_replaced() {
        let node = query()
            .with_target_cluster(Version::new(5, 0, 0))
            .with_target_cluster(Version::new(7, 0, 0));

        let clusters = node.components::<HasTargetCluster>();
        assert_eq!(clusters, vec![&HasTargetCluster::new(Version::new(7, 0, 0))]);
    }

    #[test]
    fn test_overwrite_database() {
        let only = Node::new(
            (),
            vec![HasCollectionReference::only_collection((), "coll").into()],
        );

        let known = only.query_with_overwritten_database("other");
        let reference = known.component::<HasCollectionReference<()>>().unwrap();
        assert_eq!(reference.namespace(), Some(&Namespace::new("other", "coll")));

        let unknown = Node::new((), vec![HasCollectionReference::<()>::unknown().into()]);
        let unchanged = unknown.query_with_overwritten_database("other");
        assert_eq!(
            unchanged
                .component::<HasCollectionReference<()>>()
                .map(|r| &r.reference),
            Some(&CollectionReference::Unknown)
        );
    }

    #[test]
    fn test_inject_schema_only_on_known_references() {
        let schema = CollectionSchema::new(
            Namespace::new("db", "coll"),
            BsonType::object([("field", BsonType::String)]),
        );
        let node = query().query_with_injected_collection_schema(&schema);

        match &node.collection_reference().unwrap().reference {
            CollectionReference::Known(known) => assert_eq!(known.schema.as_ref(), Some(&schema)),
            other => panic!("unexpected reference {:?}", other),
        }
    }

    fn find_on(namespace: Namespace, name: Name) -> Node<()> {
        Node::new(
            (),
            vec![
                IsCommand::new(CommandType::FindMany).into(),
                HasCollectionReference::known(None, (), namespace).into(),
                HasFilter::new(vec![Node::new(
                    (),
                    vec![
                        Named::new(name).into(),
                        HasFieldReference::from_schema((), "field").into(),
                    ],
                )])
                .into(),
            ],
        )
    }

    #[test]
    fn test_query_hash_depends_on_the_query_shape() {
        let first = query();
        let second = query().with(HasLimit::new(10));
        assert_eq!(first.query_hash(), second.query_hash());
        assert_eq!(first.query_hash().len(), 64);

        let empty = Node::new((), vec![HasFilter::<()>::new(vec![]).into()]);
        assert_ne!(first.query_hash(), empty.query_hash());

        let books = find_on(Namespace::new("db", "books"), Name::Eq);
        assert_ne!(books.query_hash(), find_on(Namespace::new("db", "authors"), Name::Eq).query_hash());
        assert_ne!(books.query_hash(), find_on(Namespace::new("db", "books"), Name::Gt).query_hash());

        let mut components: Vec<Component<()>> = books.all_components().to_vec();
        components[0] = IsCommand::new(CommandType::CountDocuments).into();
        assert_ne!(books.query_hash(), Node::new((), components).query_hash());
    }
}
