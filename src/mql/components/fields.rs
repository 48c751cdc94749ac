/// A reference to a document field.
#[derive(Debug, Clone, PartialEq)]
pub struct HasFieldReference<S> {
    pub reference: FieldReference<S>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldReference<S> {
    Unknown,
    /// A field stored in the collection's documents
    FromSchema(FieldName<S>),
    /// A field name resolved statically that doesn't map to stored data (like `_id` in `$group`)
    Inferred(FieldName<S>),
    /// A field produced by the pipeline itself
    Computed(FieldName<S>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldName<S> {
    pub source: S,
    pub field_name: String,
    pub display_name: String,
}

impl<S> FieldName<S> {
    pub fn new(source: S, field_name: impl Into<String>) -> Self {
        let field_name = field_name.into();
        Self {
            source,
            display_name: field_name.clone(),
            field_name,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }
}

impl<S> HasFieldReference<S> {
    pub fn new(reference: FieldReference<S>) -> Self {
        Self { reference }
    }

    pub fn unknown() -> Self {
        Self::new(FieldReference::Unknown)
    }

    pub fn from_schema(source: S, field_name: impl Into<String>) -> Self {
        Self::new(FieldReference::FromSchema(FieldName::new(source, field_name)))
    }

    pub fn inferred(source: S, field_name: impl Into<String>) -> Self {
        Self::new(FieldReference::Inferred(FieldName::new(source, field_name)))
    }

    pub fn computed(source: S, field_name: impl Into<String>) -> Self {
        Self::new(FieldReference::Computed(FieldName::new(source, field_name)))
    }

    pub fn field(&self) -> Option<&FieldName<S>> {
        match &self.reference {
            FieldReference::Unknown => None,
            FieldReference::FromSchema(field)
            | FieldReference::Inferred(field)
            | FieldReference::Computed(field) => Some(field),
        }
    }

    pub fn field_name(&self) -> Option<&str> {
        self.field().map(|field| field.field_name.as_str())
    }

    /// Set only for fields backed by stored documents.
    pub fn schema_field(&self) -> Option<&FieldName<S>> {
        match &self.reference {
            FieldReference::FromSchema(field) => Some(field),
            _ => None,
        }
    }
}
