use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to submit {kind} task: {message}")]
    Submit { kind: String, message: String },

    #[error("Task queue error: {0}")]
    Queue(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DispatchError {
    /// Wrap a lower level failure as a submission failure of `kind`.
    pub fn submit(kind: impl Into<String>, err: impl std::fmt::Display) -> Self {
        DispatchError::Submit {
            kind: kind.into(),
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for DispatchError {
    fn from(err: redis::RedisError) -> Self {
        DispatchError::Queue(format!("Redis error: {}", err))
    }
}

impl From<tokio_postgres::Error> for DispatchError {
    fn from(err: tokio_postgres::Error) -> Self {
        DispatchError::Store(format!("PostgreSQL error: {}", err))
    }
}
