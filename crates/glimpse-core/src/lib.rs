pub mod backend;
pub mod imaging;
mod runtime;

pub use runtime::runner::{RunnerOptions, TaskRunner};
pub use runtime::types::{Caption, RuntimeError, TaskId, TaskStatus, TaskView};
