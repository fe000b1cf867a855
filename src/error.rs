use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Transport or X API failure, carrying the message shown to operators.
    #[error("{0}")]
    Platform(String),

    #[error("reply generation failed: {0}")]
    Generation(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn job_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "reply job",
            id: id.into(),
        }
    }

    pub fn account_not_found(id: impl Into<String>) -> Self {
        Error::NotFound {
            kind: "account",
            id: id.into(),
        }
    }
}
