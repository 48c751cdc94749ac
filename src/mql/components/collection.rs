use crate::mql::namespace::{CollectionSchema, Namespace};

/// Which collection a query targets.
#[derive(Debug, Clone, PartialEq)]
pub struct HasCollectionReference<S> {
    pub reference: CollectionReference<S>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionReference<S> {
    Unknown,
    Known(KnownCollection<S>),
    /// The collection is known but the database depends on the connection
    OnlyCollection(OnlyCollection<S>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct KnownCollection<S> {
    pub database_source: Option<S>,
    pub collection_source: S,
    pub namespace: Namespace,
    pub schema: Option<CollectionSchema>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnlyCollection<S> {
    pub collection_source: S,
    pub collection: String,
}

impl<S: Clone> HasCollectionReference<S> {
    pub fn new(reference: CollectionReference<S>) -> Self {
        Self { reference }
    }

    pub fn unknown() -> Self {
        Self::new(CollectionReference::Unknown)
    }

    pub fn known(database_source: Option<S>, collection_source: S, namespace: Namespace) -> Self {
        Self::new(CollectionReference::Known(KnownCollection {
            database_source,
            collection_source,
            namespace,
            schema: None,
        }))
    }

    pub fn only_collection(collection_source: S, collection: impl Into<String>) -> Self {
        Self::new(CollectionReference::OnlyCollection(OnlyCollection {
            collection_source,
            collection: collection.into(),
        }))
    }

    /// Points the reference at `database`. Unknown references stay unknown.
    pub fn with_database(&self, database: &str) -> Self {
        match &self.reference {
            CollectionReference::Known(known) => Self::new(CollectionReference::Known(KnownCollection {
                database_source: known.database_source.clone(),
                collection_source: known.collection_source.clone(),
                namespace: Namespace::new(database, known.namespace.collection.clone()),
                schema: known.schema.clone(),
            })),
            CollectionReference::OnlyCollection(only) => {
                Self::known(None, only.collection_source.clone(), Namespace::new(database, only.collection.clone()))
            }
            CollectionReference::Unknown => self.clone(),
        }
    }

    /// Attaches a sampled schema. Only known references can carry one.
    pub fn with_schema(&self, schema: CollectionSchema) -> Self {
        match &self.reference {
            CollectionReference::Known(known) => Self::new(CollectionReference::Known(KnownCollection {
                schema: Some(schema),
                ..known.clone()
            })),
            _ => self.clone(),
        }
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        match &self.reference {
            CollectionReference::Known(known) => Some(&known.namespace),
            _ => None,
        }
    }

    pub fn collection_name(&self) -> Option<&str> {
        match &self.reference {
            CollectionReference::Known(known) => Some(&known.namespace.collection),
            CollectionReference::OnlyCollection(only) => Some(&only.collection),
            CollectionReference::Unknown => None,
        }
    }
}
