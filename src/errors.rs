use thiserror::Error;

#[derive(Error, Debug)]
pub enum DurabilityError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error while executing `{statement}`: {source}")]
    Store {
        statement: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl DurabilityError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn store(statement: impl Into<String>, source: sqlx::Error) -> Self {
        Self::Store {
            statement: statement.into(),
            source,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}

impl From<tempfile::PersistError> for DurabilityError {
    fn from(err: tempfile::PersistError) -> Self {
        DurabilityError::Io(err.error)
    }
}

pub type Result<T> = std::result::Result<T, DurabilityError>;
