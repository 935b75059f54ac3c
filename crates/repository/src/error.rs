use thiserror::Error;

/// Error types that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database-related errors, wrapping the underlying PostgreSQL error.
    #[error("Database error: {0}")]
    Db(#[from] tokio_postgres::Error),
    /// No result found.
    #[error("Not found")]
    NotFound,
    /// A row held data this layer could not map back into a model type,
    /// e.g. an unrecognized status string.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

impl RepositoryError {
    /// True if the underlying error is a unique-constraint violation, e.g.
    /// a duplicate idempotency key or a second active reservation.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Db(e) => e
                .code()
                .is_some_and(|c| *c == tokio_postgres::error::SqlState::UNIQUE_VIOLATION),
            _ => false,
        }
    }
}
