//! Persistence layer: store traits plus in-memory and libSQL backends.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{LegalDocumentStore, ProfileCache, ProfileStore, WeightLogStore};
