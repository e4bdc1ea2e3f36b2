//! Graph construction and representation.
//!
//! A [`Graph`] is an immutable slice of a [`GraphConfig`](crate::dsl::GraphConfig):
//! the nodes reachable from one root, their edges, and the parallel branches
//! they form. [`Graph::init`] builds the top-level workflow as well as the
//! bodies of loops and iterations.

pub mod builder;
pub mod types;

pub use builder::Graph;
pub use types::*;
