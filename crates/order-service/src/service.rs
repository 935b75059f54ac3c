use std::time::Duration;

use bus::EventBus;
use chrono::Utc;
use deadpool_postgres::Pool;
use events::{queues, BusEventData, Envelope, VerifyOrderMessage};
use model::{Order, OrderStatus};
use repository::{OrdersRepository, OutboxRepository};
use tokio_postgres::Transaction;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::client::{ClientError, InventoryClient, ReserveStatus};
use crate::error::ServiceError;
use crate::transition::{apply, Transition};

/// A create-order request as received at the HTTP boundary.
#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub customer_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub idempotency_key: Option<String>,
}

/// Result of `create_order`. `cached` is set when an existing order was
/// returned because of a matching idempotency key, without attempting any
/// new reservation (§4.1 step 1).
#[derive(Debug, Clone)]
pub struct CreateOrderOutcome {
    pub order: Order,
    pub cached: bool,
}

/// Business logic for the Order Coordinator: order lifecycle, the
/// synchronous reservation RPC, and the transition function that both the
/// RPC-reply path and the event-consumer path call.
///
/// Generic over its repository, outbox, inventory-client, and bus
/// dependencies so tests can substitute hand-written fakes, mirroring the
/// donor's `OrderServiceImpl<R1,R2,R3,R4>`.
pub struct OrderCoordinatorService<R, OB, C, B> {
    pool: Pool,
    orders_repo: R,
    outbox_repo: OB,
    inventory_client: C,
    bus: B,
    reservation_deadline: Duration,
}

impl<R, OB, C, B> OrderCoordinatorService<R, OB, C, B>
where
    R: OrdersRepository,
    OB: OutboxRepository,
    C: InventoryClient,
    B: bus::EventBus,
{
    pub fn new(
        pool: Pool,
        orders_repo: R,
        outbox_repo: OB,
        inventory_client: C,
        bus: B,
        reservation_deadline: Duration,
    ) -> Self {
        Self {
            pool,
            orders_repo,
            outbox_repo,
            inventory_client,
            bus,
            reservation_deadline,
        }
    }

    fn validate(req: &CreateOrderRequest) -> Result<(), ServiceError> {
        if req.customer_id.trim().is_empty() {
            return Err(ServiceError::Validation("customerId is required".into()));
        }
        if req.product_id.trim().is_empty() {
            return Err(ServiceError::Validation("productId is required".into()));
        }
        if req.quantity <= 0 {
            return Err(ServiceError::Validation("quantity must be positive".into()));
        }
        Ok(())
    }

    /// Writes one outbox row for `data`, keyed to `data.order_id()` (or the
    /// supplied fallback for product-scoped events).
    async fn write_outbox_tx(
        &self,
        tx: &Transaction<'_>,
        aggregate_id: &str,
        data: BusEventData,
    ) -> Result<(), ServiceError> {
        let now = Utc::now();
        let envelope = Envelope::new(Uuid::new_v4(), now, data);
        let payload = serde_json::to_value(&envelope)
            .map_err(|e| ServiceError::Unexpected(format!("failed to encode outbox payload: {e}")))?;
        self.outbox_repo
            .insert_tx(
                tx,
                envelope.event_id,
                aggregate_id,
                envelope.data.event_type_name(),
                &payload,
                now,
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self, req))]
    pub async fn create_order(
        &self,
        req: CreateOrderRequest,
    ) -> Result<CreateOrderOutcome, ServiceError> {
        Self::validate(&req)?;

        let db = self.pool.get().await?;
        if let Some(key) = &req.idempotency_key {
            if let Some(existing) = self.orders_repo.get_by_idempotency_key(&db, key).await? {
                return Ok(CreateOrderOutcome {
                    order: existing,
                    cached: true,
                });
            }
        }

        let order_id = Uuid::new_v4();
        let now = Utc::now();
        let order = Order::new_pending(
            order_id,
            req.customer_id.clone(),
            req.product_id.clone(),
            req.quantity,
            req.idempotency_key.clone(),
            now,
        );

        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(repository::RepositoryError::from)?;
        self.orders_repo.insert_tx(&tx, &order).await?;
        self.write_outbox_tx(
            &tx,
            &order_id.to_string(),
            BusEventData::OrderCreated {
                order_id,
                customer_id: order.customer_id.clone(),
                product_id: order.product_id.clone(),
                quantity: order.quantity,
            },
        )
        .await?;
        tx.commit().await.map_err(repository::RepositoryError::from)?;

        let effective_key = req
            .idempotency_key
            .clone()
            .unwrap_or_else(|| order_id.to_string());

        let rpc_result = tokio::time::timeout(
            self.reservation_deadline,
            self.inventory_client.reserve_stock(
                order_id,
                &req.product_id,
                req.quantity,
                &effective_key,
            ),
        )
        .await;

        let order = match rpc_result {
            Err(_elapsed) => {
                warn!(%order_id, "reservation RPC exceeded deadline, entering verification recovery");
                self.enter_pending_verification(order_id, &req, now).await?
            }
            Ok(Err(ClientError::Timeout)) | Ok(Err(ClientError::Unavailable(_))) => {
                self.enter_pending_verification(order_id, &req, now).await?
            }
            Ok(Err(ClientError::Other(reason))) => {
                warn!(%order_id, reason, "reservation RPC failed unexpectedly, order left pending");
                order
            }
            Ok(Ok(outcome)) => match outcome.status {
                ReserveStatus::Confirmed | ReserveStatus::AlreadyExists => {
                    let reservation_id = outcome.reservation_id.ok_or_else(|| {
                        ServiceError::Unexpected(
                            "reservation confirmed without a reservation_id".into(),
                        )
                    })?;
                    self.confirm_order(order_id, reservation_id).await?
                }
                ReserveStatus::InsufficientStock | ReserveStatus::ProductNotFound => {
                    let reason = outcome
                        .message
                        .unwrap_or_else(|| "reservation denied".to_string());
                    self.fail_order(order_id, reason).await?
                }
            },
        };

        Ok(CreateOrderOutcome {
            order,
            cached: false,
        })
    }

    async fn enter_pending_verification(
        &self,
        order_id: Uuid,
        req: &CreateOrderRequest,
        original_request_time: chrono::DateTime<Utc>,
    ) -> Result<Order, ServiceError> {
        let order = self
            .transition_tx(order_id, Transition::ReservationPendingVerification, |_| {})
            .await?;

        let message = VerifyOrderMessage {
            order_id,
            product_id: req.product_id.clone(),
            quantity: req.quantity,
            idempotency_key: req.idempotency_key.clone(),
            original_request_time,
        };
        if let Err(e) = self
            .bus
            .enqueue_verify_order(queues::VERIFY_ORDERS, &message)
            .await
        {
            warn!(%order_id, error = %e, "failed to enqueue VerifyOrder, relying on later redelivery");
        }
        Ok(order)
    }

    async fn confirm_order(&self, order_id: Uuid, reservation_id: Uuid) -> Result<Order, ServiceError> {
        self.transition_tx(
            order_id,
            Transition::ReservationConfirmed { reservation_id },
            move |order| order.reservation_id = Some(reservation_id),
        )
        .await
    }

    async fn fail_order(&self, order_id: Uuid, reason: String) -> Result<Order, ServiceError> {
        self.transition_tx(
            order_id,
            Transition::ReservationDomainFailure {
                reason: reason.clone(),
            },
            move |order| order.error_message = Some(reason.clone()),
        )
        .await
    }

    /// Applies `event` to the order under a row lock, publishes the
    /// corresponding outbox row if the status actually advanced, and
    /// commits. No-ops (already-terminal orders, redelivered events) are
    /// never written, only read.
    async fn transition_tx(
        &self,
        order_id: Uuid,
        event: Transition,
        mutate: impl FnOnce(&mut Order),
    ) -> Result<Order, ServiceError> {
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(repository::RepositoryError::from)?;

        let mut order = self.orders_repo.get_by_id_for_update_tx(&tx, order_id).await?;
        let new_status = apply(order.status, &event);

        if new_status == order.status {
            tx.commit().await.map_err(repository::RepositoryError::from)?;
            return Ok(order);
        }

        order.status = new_status;
        order.updated_at = Utc::now();
        if new_status.is_terminal() {
            order.completed_at = Some(order.updated_at);
        }
        mutate(&mut order);

        self.orders_repo.update_tx(&tx, &order).await?;
        self.write_outbox_tx(&tx, &order_id.to_string(), outbox_event_for(&order, &event))
            .await?;
        tx.commit().await.map_err(repository::RepositoryError::from)?;

        info!(%order_id, status = %order.status, "order transitioned");
        Ok(order)
    }

    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(repository::RepositoryError::from)?;
        let order = self.orders_repo.get_by_id_for_update_tx(&tx, order_id).await?;

        if !matches!(
            order.status,
            OrderStatus::Pending | OrderStatus::PendingVerification | OrderStatus::Confirmed
        ) {
            return Err(ServiceError::NotCancellable);
        }
        let reservation_id = order.reservation_id;
        tx.commit().await.map_err(repository::RepositoryError::from)?;

        if let Some(reservation_id) = reservation_id {
            if let Err(e) = self
                .inventory_client
                .release_stock(order_id, reservation_id, "order cancelled")
                .await
            {
                warn!(%order_id, %reservation_id, error = %e, "release_stock failed during cancel, proceeding anyway");
            }
        }

        self.transition_tx(order_id, Transition::Cancelled, |_| {}).await
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        let db = self.pool.get().await?;
        Ok(self.orders_repo.get_by_id(&db, order_id).await?)
    }

    pub async fn list_orders(
        &self,
        status: Option<OrderStatus>,
        limit: i64,
    ) -> Result<Vec<Order>, ServiceError> {
        let db = self.pool.get().await?;
        Ok(self.orders_repo.list(&db, status, limit).await?)
    }

    /// Applies a `StockReserved` bus event from the Order Event Consumer
    /// (§4.5): confirms the order if it is still pending.
    pub async fn handle_stock_reserved(
        &self,
        order_id: Uuid,
        reservation_id: Uuid,
    ) -> Result<Order, ServiceError> {
        self.confirm_order(order_id, reservation_id).await
    }

    /// Applies an `OrderVerified` bus event (§4.5): confirms or fails the
    /// order depending on the carried status. A no-op if the order is not
    /// currently `pending_verification` (enforced by `apply`'s terminal
    /// absorption plus the fact only `pending`/`pending_verification` ever
    /// advance here).
    pub async fn handle_order_verified(
        &self,
        order_id: Uuid,
        status: events::VerificationStatus,
        reservation_id: Option<Uuid>,
    ) -> Result<Order, ServiceError> {
        match status {
            events::VerificationStatus::Confirmed => {
                let reservation_id = reservation_id.ok_or_else(|| {
                    ServiceError::Unexpected("OrderVerified confirmed without reservation_id".into())
                })?;
                self.confirm_order(order_id, reservation_id).await
            }
            events::VerificationStatus::NotFound => {
                self.fail_order(order_id, "verification found no reservation".to_string())
                    .await
            }
        }
    }
}

/// The outbox event that accompanies a given transition, once it actually
/// advances the order's status.
fn outbox_event_for(order: &Order, event: &Transition) -> BusEventData {
    match event {
        Transition::ReservationConfirmed { reservation_id } => BusEventData::OrderConfirmed {
            order_id: order.order_id,
            reservation_id: *reservation_id,
        },
        Transition::ReservationDomainFailure { reason } => BusEventData::OrderFailed {
            order_id: order.order_id,
            reason: reason.clone(),
        },
        Transition::ReservationPendingVerification => BusEventData::OrderPendingVerification {
            order_id: order.order_id,
        },
        Transition::Cancelled => BusEventData::OrderCancelled {
            order_id: order.order_id,
        },
    }
}
