use async_trait::async_trait;
use uuid::Uuid;

/// Domain outcome of a completed `reserveStock` RPC — the call reached
/// Inventory and returned one of its four documented statuses (§4.2, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveStatus {
    Confirmed,
    AlreadyExists,
    InsufficientStock,
    ProductNotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReserveOutcome {
    pub status: ReserveStatus,
    pub reservation_id: Option<Uuid>,
    pub remaining_stock: Option<i32>,
    pub message: Option<String>,
}

/// Why a reservation RPC did not complete at all — as opposed to
/// completing with a domain failure. Both variants enter the
/// pending-verification recovery path (§4.1, §7); neither is surfaced to
/// the HTTP caller as an error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("reservation RPC exceeded its deadline")]
    Timeout,
    #[error("inventory service unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected RPC failure: {0}")]
    Other(String),
}

/// The seam `order-service` depends on for the synchronous reservation
/// RPC — implemented over tonic by `inventory-grpc`, and by an in-memory
/// fake in tests, mirroring the donor's repository-trait dependency
/// injection style.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn reserve_stock(
        &self,
        order_id: Uuid,
        product_id: &str,
        quantity: i32,
        idempotency_key: &str,
    ) -> Result<ReserveOutcome, ClientError>;

    async fn release_stock(
        &self,
        order_id: Uuid,
        reservation_id: Uuid,
        reason: &str,
    ) -> Result<(), ClientError>;
}
