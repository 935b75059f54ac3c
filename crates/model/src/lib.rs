//! Durable schema for the reservation protocol: orders, reservations,
//! products, the stock audit log, and the per-database outbox row.
//!
//! These types are shared between the Order Coordinator and the Inventory
//! Custodian processes; both talk to their own database through the
//! `repository` crate using the structs defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order status. A closed set; `confirmed`, `failed`, and `cancelled` are
/// absorbing (terminal) states — once reached they are never overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    PendingVerification,
    Confirmed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    /// Terminal statuses are absorbing: no transition may leave them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::PendingVerification => "pending_verification",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Order — the central aggregate owned by the Order Coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub order_id: Uuid,
    pub customer_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub status: OrderStatus,
    /// Unique when present; two `None` idempotency keys are distinct requests.
    pub idempotency_key: Option<String>,
    pub reservation_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Construct a brand-new order in `pending`, as the coordinator does on
    /// the create-order path before invoking the reservation RPC.
    pub fn new_pending(
        order_id: Uuid,
        customer_id: String,
        product_id: String,
        quantity: i32,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            customer_id,
            product_id,
            quantity,
            status: OrderStatus::Pending,
            idempotency_key,
            reservation_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }
}

/// Reservation status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Active,
    Released,
    Committed,
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Released => "released",
            Self::Committed => "committed",
        };
        f.write_str(s)
    }
}

/// Reservation — a durable claim on `quantity` units of a product for an
/// order, owned by the Inventory Custodian.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    pub reservation_id: Uuid,
    pub order_id: Uuid,
    pub product_id: String,
    pub quantity: i32,
    pub status: ReservationStatus,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Product — owned by the Inventory Custodian. `stock` only ever changes
/// inside the same transaction as a reservation insert or release.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub product_id: String,
    pub name: String,
    pub stock: i32,
    pub low_stock_threshold: i32,
}

/// Append-only stock mutation operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockOperation {
    Reserve,
    Release,
    Adjust,
}

impl std::fmt::Display for StockOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Reserve => "reserve",
            Self::Release => "release",
            Self::Adjust => "adjust",
        };
        f.write_str(s)
    }
}

/// One row of the append-only stock audit log. Replaying all rows for a
/// product in `created_at` order must reproduce its current `stock`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StockAuditEntry {
    pub id: Uuid,
    pub product_id: String,
    pub previous_stock: i32,
    pub new_stock: i32,
    pub quantity_change: i32,
    pub operation: StockOperation,
    pub order_id: Option<Uuid>,
    pub reservation_id: Option<Uuid>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A row in either database's `outbox` table. Written in the same
/// transaction as the state change it announces; drained by a pumper task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxRow {
    pub id: Uuid,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_absorbing() {
        assert!(OrderStatus::Confirmed.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(!OrderStatus::PendingVerification.is_terminal());
    }

    #[test]
    fn new_pending_order_has_no_reservation_or_completion() {
        let order = Order::new_pending(
            Uuid::new_v4(),
            "C1".into(),
            "SKU-002".into(),
            3,
            Some("k-42".into()),
            Utc::now(),
        );
        assert_eq!(order.status, OrderStatus::Pending);
        assert!(order.reservation_id.is_none());
        assert!(order.completed_at.is_none());
    }

    #[test]
    fn order_status_serializes_snake_case() {
        let json = serde_json::to_string(&OrderStatus::PendingVerification).unwrap();
        assert_eq!(json, "\"pending_verification\"");
    }
}
