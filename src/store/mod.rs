//! Persistence layer for durable job records.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{Job, JobFilter, JobHandle, JobStatus, JobStore};
