use task_queue_core::TaskError;
use task_queue_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// Every requested queue was empty
    #[error("No processable task found")]
    NoProcessableTask,

    /// A live uniqueness lock already holds the key
    #[error("Task already exists for unique key {0}")]
    DuplicateTask(String),

    /// The message is no longer in the in-progress list, so the transition
    /// was not applied
    #[error("Task {0} is not in progress")]
    NotInProgress(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),
}

impl BrokerError {
    /// True when the store could not complete the operation, as opposed to
    /// an expected domain outcome
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, BrokerError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
