//! Persistence layer — libSQL-backed storage for status records and progress.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    ProcessStateFilter, ProgressStore, StatusFilter, StatusStore, StatusUpdate,
};
