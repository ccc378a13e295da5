//! Persistent credit graph.

pub mod models;
pub mod sqlite;

pub use models::*;
pub use sqlite::GraphStore;
