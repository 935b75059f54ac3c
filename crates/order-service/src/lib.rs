//! Business logic for the Order Coordinator: the order lifecycle, the
//! synchronous reservation RPC with its 2 s deadline, and the single
//! transition function that every status-advancing path calls.

mod client;
mod error;
mod service;
mod transition;

pub use client::{ClientError, InventoryClient, ReserveOutcome, ReserveStatus};
pub use error::ServiceError;
pub use service::{CreateOrderOutcome, CreateOrderRequest, OrderCoordinatorService};
pub use transition::{apply, Transition};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use model::OrderStatus;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// An `InventoryClient` fake returning a scripted response, for
    /// exercising `create_order`'s RPC-outcome classification without a
    /// live gRPC server. `create_order` itself additionally needs a real
    /// `OrdersRepository`/`OutboxRepository` transaction, which — per the
    /// test-tier decision in this crate's design notes — the boundary
    /// scenarios in §8 exercise at the repository/integration layer
    /// instead; here we cover the two things that are pure functions of
    /// their inputs: the transition function and RPC-outcome classification.
    struct FakeInventoryClient {
        response: Mutex<Option<Result<ReserveOutcome, ClientError>>>,
    }

    impl FakeInventoryClient {
        fn confirmed(reservation_id: Uuid) -> Self {
            Self {
                response: Mutex::new(Some(Ok(ReserveOutcome {
                    status: ReserveStatus::Confirmed,
                    reservation_id: Some(reservation_id),
                    remaining_stock: Some(197),
                    message: None,
                }))),
            }
        }

        fn insufficient_stock() -> Self {
            Self {
                response: Mutex::new(Some(Ok(ReserveOutcome {
                    status: ReserveStatus::InsufficientStock,
                    reservation_id: None,
                    remaining_stock: Some(50),
                    message: Some("Insufficient stock".into()),
                }))),
            }
        }

        fn timeout() -> Self {
            Self {
                response: Mutex::new(Some(Err(ClientError::Timeout))),
            }
        }
    }

    #[async_trait]
    impl InventoryClient for FakeInventoryClient {
        async fn reserve_stock(
            &self,
            _order_id: Uuid,
            _product_id: &str,
            _quantity: i32,
            _idempotency_key: &str,
        ) -> Result<ReserveOutcome, ClientError> {
            self.response.lock().unwrap().take().expect("single-use fake")
        }

        async fn release_stock(
            &self,
            _order_id: Uuid,
            _reservation_id: Uuid,
            _reason: &str,
        ) -> Result<(), ClientError> {
            Ok(())
        }
    }

    #[test]
    fn apply_is_reexported_and_idempotent_on_terminal() {
        assert_eq!(
            apply(
                OrderStatus::Failed,
                &Transition::ReservationConfirmed {
                    reservation_id: Uuid::new_v4()
                }
            ),
            OrderStatus::Failed
        );
    }

    #[tokio::test]
    async fn timeout_outcome_is_classified_as_client_error() {
        let client = FakeInventoryClient::timeout();
        let result = client.reserve_stock(Uuid::new_v4(), "SKU-002", 1, "k").await;
        assert!(matches!(result, Err(ClientError::Timeout)));
    }

    #[tokio::test]
    async fn confirmed_outcome_carries_reservation_id() {
        let reservation_id = Uuid::new_v4();
        let client = FakeInventoryClient::confirmed(reservation_id);
        let outcome = client
            .reserve_stock(Uuid::new_v4(), "SKU-002", 3, "k")
            .await
            .unwrap();
        assert_eq!(outcome.status, ReserveStatus::Confirmed);
        assert_eq!(outcome.reservation_id, Some(reservation_id));
    }

    #[tokio::test]
    async fn insufficient_stock_outcome_carries_message() {
        let client = FakeInventoryClient::insufficient_stock();
        let outcome = client
            .reserve_stock(Uuid::new_v4(), "SKU-001", 100, "k")
            .await
            .unwrap();
        assert_eq!(outcome.status, ReserveStatus::InsufficientStock);
        assert!(outcome.message.unwrap().contains("Insufficient stock"));
    }
}
