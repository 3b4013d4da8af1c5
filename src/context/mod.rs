//! Per-user context: the data model and its persistence backends.

pub mod file_store;
pub mod libsql_store;
mod migrations;
pub mod model;
pub mod store;

pub use file_store::JsonFileStore;
pub use libsql_store::LibSqlStore;
pub use model::UserContext;
pub use store::{ContextStore, MemoryStore, export_context};
