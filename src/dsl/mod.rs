//! Declarative graph definitions and the shared node result types.

pub mod parser;
pub mod schema;

pub use parser::{parse_graph_config, DslFormat};
pub use schema::*;
