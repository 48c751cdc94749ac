//! Components that wrap an ordered list of child nodes.

use crate::mql::node::Node;

/// Capability of components that nest other nodes.
pub trait HasChildren<S> {
    fn children(&self) -> &[Node<S>];
}

macro_rules! children_component {
    ($($(#[$doc:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, PartialEq)]
            pub struct $name<S> {
                pub children: Vec<Node<S>>,
            }

            impl<S> $name<S> {
                pub fn new(children: Vec<Node<S>>) -> Self {
                    Self { children }
                }
            }

            impl<S> HasChildren<S> for $name<S> {
                fn children(&self) -> &[Node<S>] {
                    &self.children
                }
            }
        )*
    };
}

children_component! {
    /// Filter predicates, combined with an implicit AND.
    HasFilter,
    /// Fields of a projection. Each child is Named include/exclude with a field reference.
    HasProjections,
    HasSorts,
    /// Fields computed by `$addFields`
    HasAddedFields,
    /// Accumulators of a `$group` stage
    HasAccumulatedFields,
    /// Aggregation pipeline stages, in pipeline order
    HasAggregation,
    /// Update operations
    HasUpdates,
}
