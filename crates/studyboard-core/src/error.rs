//! Error types for studyboard-core.

use thiserror::Error;

use crate::models::StudyId;

#[derive(Error, Debug)]
pub enum StudyboardError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Study not found: {0}")]
    StudyNotFound(StudyId),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl StudyboardError {
    /// True for errors caused by the shape of a response rather than transport.
    pub fn is_malformed(&self) -> bool {
        matches!(self, StudyboardError::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, StudyboardError>;
