//! Semantic facets attached to a [`Node`](crate::mql::Node)
//!
//! The set of components is closed:
//! - named: operator names and their query roles
//! - fields / values: field and value references of predicates
//! - collection: the target collection
//! - command: the command a query runs
//! - children: components that nest other nodes (filters, stages...)
//! - metadata: limit, explain, source dialect and target cluster
mod children;
mod collection;
mod command;
mod fields;
mod metadata;
mod named;
mod values;

pub use children::{
    HasAccumulatedFields, HasAddedFields, HasAggregation, HasChildren, HasFilter,
    HasProjections, HasSorts, HasUpdates,
};
pub use collection::{CollectionReference, HasCollectionReference, KnownCollection, OnlyCollection};
pub use command::{CommandType, HasRunCommand, IsCommand};
pub use fields::{FieldName, FieldReference, HasFieldReference};
pub use metadata::{
    DialectName, ExplainPlanType, HasExplain, HasLimit, HasSourceDialect, HasTargetCluster,
    Version,
};
pub use named::{Name, Named, QueryRole};
pub use values::{
    ComputedValue, ConstantValue, HasValueReference, RuntimeValue, ValueReference,
};

/// Typed lookup of a component variant.
pub trait ComponentKind<S>: Sized {
    fn project(component: &Component<S>) -> Option<&Self>;
}

macro_rules! components {
    (
        plain { $($plain:ident($plain_ty:ty)),* $(,)? }
        nesting { $($nesting:ident($nesting_ty:ty)),* $(,)? }
    ) => {
        #[derive(Debug, Clone, PartialEq)]
        pub enum Component<S> {
            $($plain($plain_ty),)*
            $($nesting($nesting_ty),)*
        }

        impl<S> Component<S> {
            /// The nested nodes, for components with the children capability.
            pub fn as_has_children(&self) -> Option<&dyn HasChildren<S>> {
                match self {
                    $(Component::$nesting(inner) => Some(inner),)*
                    _ => None,
                }
            }
        }

        $(
            impl<S> ComponentKind<S> for $plain_ty {
                fn project(component: &Component<S>) -> Option<&Self> {
                    match component {
                        Component::$plain(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl<S> From<$plain_ty> for Component<S> {
                fn from(component: $plain_ty) -> Self {
                    Component::$plain(component)
                }
            }
        )*

        $(
            impl<S> ComponentKind<S> for $nesting_ty {
                fn project(component: &Component<S>) -> Option<&Self> {
                    match component {
                        Component::$nesting(inner) => Some(inner),
                        _ => None,
                    }
                }
            }

            impl<S> From<$nesting_ty> for Component<S> {
                fn from(component: $nesting_ty) -> Self {
                    Component::$nesting(component)
                }
            }
        )*
    };
}

components! {
    plain {
        Named(Named),
        HasFieldReference(HasFieldReference<S>),
        HasValueReference(HasValueReference<S>),
        HasCollectionReference(HasCollectionReference<S>),
        IsCommand(IsCommand),
        HasRunCommand(HasRunCommand<S>),
        HasLimit(HasLimit),
        HasExplain(HasExplain),
        HasSourceDialect(HasSourceDialect),
        HasTargetCluster(HasTargetCluster),
    }
    nesting {
        HasFilter(HasFilter<S>),
        HasProjections(HasProjections<S>),
        HasSorts(HasSorts<S>),
        HasAddedFields(HasAddedFields<S>),
        HasAccumulatedFields(HasAccumulatedFields<S>),
        HasAggregation(HasAggregation<S>),
        HasUpdates(HasUpdates<S>),
    }
}
