//! Built-in tasks bundled with the queue.

pub mod delay;
pub mod divide;
pub mod echo;

use std::sync::Arc;

use crate::tasks::task::Task;

pub use delay::DelayTask;
pub use divide::DivideTask;
pub use echo::EchoTask;

/// Every built-in task, ready for registration.
pub fn all() -> Vec<Arc<dyn Task>> {
    vec![
        Arc::new(EchoTask),
        Arc::new(DivideTask),
        Arc::new(DelayTask::new()),
    ]
}
