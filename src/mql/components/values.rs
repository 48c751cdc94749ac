use crate::mql::bson_type::BsonType;
use crate::mql::node::Node;
use crate::mql::value::Value;

/// A reference to a value in source code.
#[derive(Debug, Clone, PartialEq)]
pub struct HasValueReference<S> {
    pub reference: ValueReference<S>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValueReference<S> {
    Unknown,
    /// Statically known from the source
    Constant(ConstantValue<S>),
    /// Synthesized by the dialect, like the implicit `true` of `exists(field)`
    Inferred(ConstantValue<S>),
    /// Only known when the query runs
    Runtime(RuntimeValue<S>),
    /// An expression over other fields, like an accumulator input
    Computed(ComputedValue<S>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstantValue<S> {
    pub source: S,
    pub value: Value,
    pub bson_type: BsonType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeValue<S> {
    pub source: S,
    pub bson_type: BsonType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComputedValue<S> {
    pub source: S,
    pub bson_type: BsonType,
    pub expression: Node<S>,
}

impl<S> HasValueReference<S> {
    pub fn new(reference: ValueReference<S>) -> Self {
        Self { reference }
    }

    pub fn unknown() -> Self {
        Self::new(ValueReference::Unknown)
    }

    pub fn constant(source: S, value: impl Into<Value>, bson_type: BsonType) -> Self {
        Self::new(ValueReference::Constant(ConstantValue {
            source,
            value: value.into(),
            bson_type,
        }))
    }

    pub fn inferred(source: S, value: impl Into<Value>, bson_type: BsonType) -> Self {
        Self::new(ValueReference::Inferred(ConstantValue {
            source,
            value: value.into(),
            bson_type,
        }))
    }

    pub fn runtime(source: S, bson_type: BsonType) -> Self {
        Self::new(ValueReference::Runtime(RuntimeValue { source, bson_type }))
    }

    pub fn computed(source: S, bson_type: BsonType, expression: Node<S>) -> Self {
        Self::new(ValueReference::Computed(ComputedValue {
            source,
            bson_type,
            expression,
        }))
    }

    pub fn bson_type(&self) -> Option<&BsonType> {
        match &self.reference {
            ValueReference::Unknown => None,
            ValueReference::Constant(constant) | ValueReference::Inferred(constant) => {
                Some(&constant.bson_type)
            }
            ValueReference::Runtime(runtime) => Some(&runtime.bson_type),
            ValueReference::Computed(computed) => Some(&computed.bson_type),
        }
    }

    /// The literal, for constant and inferred references.
    pub fn value(&self) -> Option<&Value> {
        match &self.reference {
            ValueReference::Constant(constant) | ValueReference::Inferred(constant) => {
                Some(&constant.value)
            }
            _ => None,
        }
    }

    pub fn source(&self) -> Option<&S> {
        match &self.reference {
            ValueReference::Unknown => None,
            ValueReference::Constant(constant) | ValueReference::Inferred(constant) => {
                Some(&constant.source)
            }
            ValueReference::Runtime(runtime) => Some(&runtime.source),
            ValueReference::Computed(computed) => Some(&computed.source),
        }
    }
}
