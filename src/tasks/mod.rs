//! Task abstraction: named units of work the worker can execute.

pub mod builtin;
pub mod registry;
pub mod task;

pub use registry::TaskRegistry;
pub use task::*;
