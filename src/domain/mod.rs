//! Domain layer: pure domain model and shared types.
//!
//! This layer contains types that are used across multiple layers of the system
//! but do not depend on any runtime implementation details.
//!
//! Submodules:
//! - [`execution`]: Runtime values (segments, files) and run statuses.
//! - [`model`]: Protocol-stable types (selectors, conditions, control-flow node configs).

pub mod execution;
pub mod model;
