use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid task message: {0}")]
    InvalidMessage(String),
}

pub type Result<T> = std::result::Result<T, TaskError>;
