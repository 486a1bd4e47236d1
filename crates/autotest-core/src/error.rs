//! Error types for AutoTest.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unknown deliverable: {0}")]
    UnknownDeliverable(String),

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("portal error: {0}")]
    Portal(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
