//! Typed bus message envelope and event catalogue for the reservation
//! protocol, plus the topic/queue names both services agree on.
//!
//! Event payloads are a tagged union (`BusEventData`) rather than an
//! untyped JSON body: an unrecognized `eventType` is a decode error, not a
//! silently-dropped message. The two historical verification event names
//! (`OrderVerified` carrying `status`, `VerificationComplete` carrying a
//! bare `verified` bool) are both accepted on ingress and normalized to one
//! internal shape; only `OrderVerified` is ever emitted.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Pub/sub topic names (fan-out to every named subscription).
pub mod topics {
    pub const ORDER_EVENTS: &str = "order-events";
    pub const INVENTORY_EVENTS: &str = "inventory-events";
    pub const SYSTEM_METRICS: &str = "system-metrics";
}

/// Point-to-point queue names (single consumer group).
pub mod queues {
    pub const VERIFY_ORDERS: &str = "verify-orders";
}

/// Subscription name the Order Event Consumer registers on `inventory-events`.
pub const ORDER_SERVICE_SUBSCRIPTION: &str = "order-service-sub";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("message has no eventType field")]
    MissingEventType,
    #[error("unrecognized eventType: {0}")]
    UnknownEventType(String),
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Outcome of a `VerifyOrder` / reservation attempt, as carried by
/// `OrderVerified`. `NotFound` here means "no reservation could be made",
/// covering both `insufficient_stock` and `product_not_found`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Confirmed,
    NotFound,
}

/// The canonical, typed set of events carried on `order-events` and
/// `inventory-events`. Tagged on `eventType` so an unrecognized variant
/// fails to deserialize instead of passing through silently.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "eventType")]
pub enum BusEventData {
    OrderCreated {
        order_id: Uuid,
        customer_id: String,
        product_id: String,
        quantity: i32,
    },
    OrderConfirmed {
        order_id: Uuid,
        reservation_id: Uuid,
    },
    OrderFailed {
        order_id: Uuid,
        reason: String,
    },
    OrderCancelled {
        order_id: Uuid,
    },
    OrderPendingVerification {
        order_id: Uuid,
    },
    StockReserved {
        order_id: Uuid,
        reservation_id: Uuid,
        product_id: String,
        remaining_stock: i32,
    },
    StockReleased {
        order_id: Uuid,
        reservation_id: Uuid,
        product_id: String,
    },
    LowStockAlert {
        product_id: String,
        remaining_stock: i32,
        threshold: i32,
    },
    OrderVerified {
        order_id: Uuid,
        status: VerificationStatus,
        reservation_id: Option<Uuid>,
        recovered_from_crash: bool,
    },
}

impl BusEventData {
    /// The order (or, for `LowStockAlert`, product) this event concerns —
    /// used as `aggregate_id` in the outbox and `correlationId` on the wire.
    pub fn order_id(&self) -> Option<Uuid> {
        match self {
            Self::OrderCreated { order_id, .. }
            | Self::OrderConfirmed { order_id, .. }
            | Self::OrderFailed { order_id, .. }
            | Self::OrderCancelled { order_id }
            | Self::OrderPendingVerification { order_id }
            | Self::StockReserved { order_id, .. }
            | Self::StockReleased { order_id, .. }
            | Self::OrderVerified { order_id, .. } => Some(*order_id),
            Self::LowStockAlert { .. } => None,
        }
    }

    /// The `eventType` tag this variant serializes under.
    pub fn event_type_name(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "OrderCreated",
            Self::OrderConfirmed { .. } => "OrderConfirmed",
            Self::OrderFailed { .. } => "OrderFailed",
            Self::OrderCancelled { .. } => "OrderCancelled",
            Self::OrderPendingVerification { .. } => "OrderPendingVerification",
            Self::StockReserved { .. } => "StockReserved",
            Self::StockReleased { .. } => "StockReleased",
            Self::LowStockAlert { .. } => "LowStockAlert",
            Self::OrderVerified { .. } => "OrderVerified",
        }
    }
}

/// Every `eventType` tag `BusEventData` can deserialize from, plus the
/// legacy `VerificationComplete` name `decode_envelope` normalizes on
/// ingress. Used to reject an unrecognized tag up front, before handing
/// the body to serde.
const KNOWN_EVENT_TYPES: &[&str] = &[
    "OrderCreated",
    "OrderConfirmed",
    "OrderFailed",
    "OrderCancelled",
    "OrderPendingVerification",
    "StockReserved",
    "StockReleased",
    "LowStockAlert",
    "OrderVerified",
    "VerificationComplete",
];

/// Envelope every bus message carries: identity, timestamp, and the typed
/// payload. `message_id := event_id`, `correlation_id := order_id`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub event_id: Uuid,
    pub correlation_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub data: BusEventData,
}

impl Envelope {
    pub fn new(event_id: Uuid, timestamp: DateTime<Utc>, data: BusEventData) -> Self {
        let correlation_id = data.order_id();
        Self {
            event_id,
            correlation_id,
            timestamp,
            data,
        }
    }
}

/// Decode a message body into an [`Envelope`], accepting both the
/// canonical `OrderVerified{status}` shape and the legacy
/// `VerificationComplete{verified}` shape on ingress.
pub fn decode_envelope(bytes: &[u8]) -> Result<Envelope, EventError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    let event_type = value
        .get("eventType")
        .and_then(|v| v.as_str())
        .ok_or(EventError::MissingEventType)?;

    if !KNOWN_EVENT_TYPES.contains(&event_type) {
        return Err(EventError::UnknownEventType(event_type.to_string()));
    }

    if event_type == "VerificationComplete" {
        let event_id = parse_uuid_field(&value, "eventId")?;
        let timestamp = value
            .get("timestamp")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let order_id = parse_uuid_field(&value, "orderId")?;
        let reservation_id = value
            .get("reservationId")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());
        let verified = value
            .get("verified")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let recovered_from_crash = value
            .get("recoveredFromCrash")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let status = if verified {
            VerificationStatus::Confirmed
        } else {
            VerificationStatus::NotFound
        };
        return Ok(Envelope {
            event_id,
            correlation_id: Some(order_id),
            timestamp,
            data: BusEventData::OrderVerified {
                order_id,
                status,
                reservation_id,
                recovered_from_crash,
            },
        });
    }

    serde_json::from_value(value).map_err(EventError::from)
}

fn parse_uuid_field(value: &serde_json::Value, field: &str) -> Result<Uuid, EventError> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| EventError::Malformed(serde::de::Error::custom(format!("missing or invalid {field}"))))
}

/// The `VerifyOrder` queue message body (§4.3). Not a `BusEventData`
/// variant — it travels on the point-to-point `verify-orders` queue, not a
/// fan-out topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyOrderMessage {
    pub order_id: Uuid,
    pub product_id: String,
    pub quantity: i32,
    pub idempotency_key: Option<String>,
    pub original_request_time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let env = Envelope::new(
            Uuid::new_v4(),
            Utc::now(),
            BusEventData::StockReserved {
                order_id: Uuid::new_v4(),
                reservation_id: Uuid::new_v4(),
                product_id: "SKU-002".into(),
                remaining_stock: 197,
            },
        );
        let json = serde_json::to_vec(&env).unwrap();
        let decoded = decode_envelope(&json).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let json = br#"{"eventType":"SomethingElse","eventId":"3fa85f64-5717-4562-b3fc-2c963f66afa6","timestamp":"2026-01-01T00:00:00Z"}"#;
        let err = decode_envelope(json).unwrap_err();
        assert!(matches!(err, EventError::UnknownEventType(ref t) if t == "SomethingElse"));
    }

    #[test]
    fn legacy_verification_complete_normalizes_to_order_verified() {
        let order_id = Uuid::new_v4();
        let json = serde_json::json!({
            "eventType": "VerificationComplete",
            "eventId": Uuid::new_v4().to_string(),
            "timestamp": "2026-01-01T00:00:00Z",
            "orderId": order_id.to_string(),
            "verified": true,
            "recoveredFromCrash": true,
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        let env = decode_envelope(&bytes).unwrap();
        match env.data {
            BusEventData::OrderVerified {
                order_id: oid,
                status,
                recovered_from_crash,
                ..
            } => {
                assert_eq!(oid, order_id);
                assert_eq!(status, VerificationStatus::Confirmed);
                assert!(recovered_from_crash);
            }
            other => panic!("expected OrderVerified, got {other:?}"),
        }
    }

    #[test]
    fn legacy_verification_complete_false_maps_to_not_found() {
        let order_id = Uuid::new_v4();
        let json = serde_json::json!({
            "eventType": "VerificationComplete",
            "eventId": Uuid::new_v4().to_string(),
            "timestamp": "2026-01-01T00:00:00Z",
            "orderId": order_id.to_string(),
            "verified": false,
        });
        let bytes = serde_json::to_vec(&json).unwrap();
        let env = decode_envelope(&bytes).unwrap();
        match env.data {
            BusEventData::OrderVerified { status, .. } => {
                assert_eq!(status, VerificationStatus::NotFound);
            }
            other => panic!("expected OrderVerified, got {other:?}"),
        }
    }
}
