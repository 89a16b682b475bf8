//! jobq: durable job queue with a single background worker.

pub mod cli;
pub mod config;
pub mod error;
pub mod queue;
pub mod store;
pub mod tasks;
pub mod value;
pub mod worker;

pub use error::{DatabaseError, JobError, TaskError};
pub use queue::JobQueue;
