use thiserror::Error;

/// Error taxonomy for the Inventory Custodian's business logic (§7).
///
/// `DomainFailure` conditions (`insufficient_stock`, `product_not_found`)
/// are never surfaced as `Err` from `reserve_stock` — they are returned as
/// a `ReserveOutcome` with a non-confirmed status, since they are expected,
/// structured results rather than failures of the handler itself.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Db(#[from] repository::RepositoryError),
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
    /// Chaos-injection only (§9): simulates a crash occurring after the
    /// reserving transaction commits but before the RPC reply is sent.
    /// Never constructed unless `SCHRODINGER_MODE` is enabled.
    #[error("simulated crash after commit")]
    SimulatedCrash,
}
