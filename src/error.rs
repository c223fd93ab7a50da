use std::io;

/// Error surface of the core engine. Caller errors (`InvalidInput`,
/// `Conflict`, `NotFound`) pass through verbatim; `Storage` poisons the
/// store until it is reopened.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("id {0} already exists")]
    Conflict(i64),

    #[error("id {0} not found")]
    NotFound(i64),

    #[error("deadline exceeded")]
    Timeout,

    #[error("storage failure: {0}")]
    Storage(#[from] io::Error),

    #[error("corrupt state: {0}")]
    Corrupt(String),
}

impl EngineError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }
}
