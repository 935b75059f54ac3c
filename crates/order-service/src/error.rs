use thiserror::Error;

/// Error taxonomy for the Order Coordinator's business logic (§7).
/// `Timeout`/`Transport` on the reservation RPC never reach this enum as
/// failures — `create_order` converts them into a `pending_verification`
/// outcome instead, per §4.1.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("order not found")]
    NotFound,
    #[error("order cannot be cancelled in its current state")]
    NotCancellable,
    #[error("database error: {0}")]
    Db(#[from] repository::RepositoryError),
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}
