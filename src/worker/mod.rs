//! Background execution of queued jobs.
//!
//! - `runner`: the worker loop (claim → execute → record)
//! - `lifecycle`: supervisor that starts exactly one loop and stops it

pub mod lifecycle;
pub mod runner;

pub use lifecycle::{StartOutcome, WorkerSupervisor};
pub use runner::{JobWorker, failure_detail};
