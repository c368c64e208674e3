mod error;
pub mod keys;
mod server;
mod task;

pub use error::{Result, TaskError};
pub use server::{ServerInfo, ServerState, ServerStatus, WorkerInfo};
pub use task::{Payload, TaskId, TaskMessage, TaskType};

/// Queue used when a task does not name one
pub const DEFAULT_QUEUE: &str = "default";

/// Retry budget of a task that does not set one
pub const DEFAULT_MAX_RETRY: u32 = 25;
