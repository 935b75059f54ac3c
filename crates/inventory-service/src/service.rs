use chrono::Utc;
use deadpool_postgres::Pool;
use events::{BusEventData, Envelope, VerificationStatus, VerifyOrderMessage};
use model::{Product, Reservation, ReservationStatus, StockAuditEntry, StockOperation};
use repository::{OutboxRepository, ProductsRepository, RepositoryError, ReservationsRepository, StockAuditRepository};
use tokio_postgres::Transaction;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::chaos::ChaosConfig;
use crate::error::ServiceError;

/// Wire-level outcome of `reserveStock` (§4.2, §6). Mirrors the
/// `ReserveResponse.status` enum `{UNKNOWN, CONFIRMED, INSUFFICIENT_STOCK,
/// PRODUCT_NOT_FOUND, ALREADY_EXISTS}` the gRPC layer pins numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveStatus {
    Confirmed,
    AlreadyExists,
    InsufficientStock,
    ProductNotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReserveOutcome {
    pub success: bool,
    pub status: ReserveStatus,
    pub reservation_id: Option<Uuid>,
    pub remaining_stock: Option<i32>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseOutcome {
    pub success: bool,
    pub message: Option<String>,
}

/// Business logic for the Inventory Custodian: the transactional
/// `reserveStock`/`releaseStock` pair, the `VerifyOrder` recovery handler,
/// and the chaos-injection knobs used to exercise the coordinator's
/// failure paths in tests.
///
/// Generic over its repository and outbox dependencies, mirroring
/// `order-service::OrderCoordinatorService` and the donor's
/// `OrderServiceImpl<R1,R2,R3,R4>`.
pub struct InventoryCustodianService<P, R, A, OB> {
    pool: Pool,
    products_repo: P,
    reservations_repo: R,
    audit_repo: A,
    outbox_repo: OB,
    chaos: ChaosConfig,
}

impl<P, R, A, OB> InventoryCustodianService<P, R, A, OB>
where
    P: ProductsRepository,
    R: ReservationsRepository,
    A: StockAuditRepository,
    OB: OutboxRepository,
{
    pub fn new(
        pool: Pool,
        products_repo: P,
        reservations_repo: R,
        audit_repo: A,
        outbox_repo: OB,
        chaos: ChaosConfig,
    ) -> Self {
        Self {
            pool,
            products_repo,
            reservations_repo,
            audit_repo,
            outbox_repo,
            chaos,
        }
    }

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

    /// `reserveStock` (§4.2). Runs entirely in one serializable transaction;
    /// the product row lock from step 2 is what makes concurrent reservers
    /// serialize instead of both observing sufficient stock.
    #[instrument(skip(self))]
    pub async fn reserve_stock(
        &self,
        order_id: Uuid,
        product_id: &str,
        quantity: i32,
        idempotency_key: Option<&str>,
    ) -> Result<ReserveOutcome, ServiceError> {
        self.chaos.maybe_inject_latency().await;

        let effective_key = idempotency_key
            .map(str::to_string)
            .unwrap_or_else(|| order_id.to_string());

        // A lost race on the idempotency key (or the partial "one active
        // reservation per order" index) between the read-side check and
        // the insert is retried by re-reading under a fresh transaction —
        // bounded, since only one concurrent writer can ever win the race.
        const MAX_ATTEMPTS: u8 = 3;
        let mut last_err = None;
        for _ in 0..MAX_ATTEMPTS {
            match self
                .try_reserve_once(order_id, product_id, quantity, &effective_key)
                .await
            {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => continue,
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(ServiceError::Unexpected(
            "reserveStock exhausted retries on idempotency-key race".into(),
        )))
    }

    /// One attempt at `reserveStock`. Returns `Ok(None)` when it lost a
    /// unique-constraint race and should be retried by the caller.
    async fn try_reserve_once(
        &self,
        order_id: Uuid,
        product_id: &str,
        quantity: i32,
        effective_key: &str,
    ) -> Result<Option<ReserveOutcome>, ServiceError> {
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(RepositoryError::from)?;

        if let Some(existing) = self
            .reservations_repo
            .get_by_idempotency_key_tx(&tx, effective_key)
            .await?
        {
            let product = self
                .products_repo
                .get_by_id_for_update_tx(&tx, &existing.product_id)
                .await?;
            tx.commit().await.map_err(RepositoryError::from)?;
            info!(%order_id, reservation_id = %existing.reservation_id, "reserveStock idempotent replay");
            return Ok(Some(ReserveOutcome {
                success: true,
                status: ReserveStatus::AlreadyExists,
                reservation_id: Some(existing.reservation_id),
                remaining_stock: Some(product.stock),
                message: None,
            }));
        }

        if let Some(existing) = self
            .reservations_repo
            .get_active_by_order_id_for_update_tx(&tx, order_id)
            .await?
        {
            let product = self
                .products_repo
                .get_by_id_for_update_tx(&tx, &existing.product_id)
                .await?;
            tx.commit().await.map_err(RepositoryError::from)?;
            info!(%order_id, reservation_id = %existing.reservation_id, "reserveStock found existing active reservation for order under a different idempotency key");
            return Ok(Some(ReserveOutcome {
                success: true,
                status: ReserveStatus::AlreadyExists,
                reservation_id: Some(existing.reservation_id),
                remaining_stock: Some(product.stock),
                message: None,
            }));
        }

        let product = match self
            .products_repo
            .get_by_id_for_update_tx(&tx, product_id)
            .await
        {
            Ok(p) => p,
            Err(RepositoryError::NotFound) => {
                tx.rollback().await.ok();
                return Ok(Some(ReserveOutcome {
                    success: false,
                    status: ReserveStatus::ProductNotFound,
                    reservation_id: None,
                    remaining_stock: None,
                    message: Some(format!("product {product_id} not found")),
                }));
            }
            Err(e) => return Err(e.into()),
        };

        if product.stock < quantity {
            tx.rollback().await.ok();
            return Ok(Some(ReserveOutcome {
                success: false,
                status: ReserveStatus::InsufficientStock,
                reservation_id: None,
                remaining_stock: Some(product.stock),
                message: Some(format!(
                    "Insufficient stock: requested {quantity}, available {}",
                    product.stock
                )),
            }));
        }

        let new_stock = product.stock - quantity;
        self.products_repo
            .update_stock_tx(&tx, product_id, new_stock)
            .await?;

        let now = Utc::now();
        let reservation = Reservation {
            reservation_id: Uuid::new_v4(),
            order_id,
            product_id: product_id.to_string(),
            quantity,
            status: ReservationStatus::Active,
            idempotency_key: effective_key.to_string(),
            created_at: now,
            updated_at: now,
        };
        let insert_result = self.reservations_repo.insert_tx(&tx, &reservation).await;
        if let Err(e) = insert_result {
            if e.is_unique_violation() {
                // Lost a race on the idempotency key (or the partial
                // "one active reservation per order" index) between the
                // read-side check above and this insert. Whoever won
                // committed first; the caller retries and re-reads their row.
                tx.rollback().await.ok();
                return Ok(None);
            }
            return Err(e.into());
        }

        let audit = StockAuditEntry {
            id: Uuid::new_v4(),
            product_id: product_id.to_string(),
            previous_stock: product.stock,
            new_stock,
            quantity_change: -quantity,
            operation: StockOperation::Reserve,
            order_id: Some(order_id),
            reservation_id: Some(reservation.reservation_id),
            reason: None,
            created_at: now,
        };
        self.audit_repo.insert_tx(&tx, &audit).await?;

        self.write_outbox_tx(
            &tx,
            &order_id.to_string(),
            BusEventData::StockReserved {
                order_id,
                reservation_id: reservation.reservation_id,
                product_id: product_id.to_string(),
                remaining_stock: new_stock,
            },
        )
        .await?;

        if new_stock <= product.low_stock_threshold {
            self.write_outbox_tx(
                &tx,
                product_id,
                BusEventData::LowStockAlert {
                    product_id: product_id.to_string(),
                    remaining_stock: new_stock,
                    threshold: product.low_stock_threshold,
                },
            )
            .await?;
        }

        tx.commit().await.map_err(RepositoryError::from)?;
        info!(%order_id, reservation_id = %reservation.reservation_id, new_stock, "stock reserved");

        if self.chaos.should_crash_after_commit() {
            warn!(%order_id, "schrodinger mode: simulating crash after commit, before reply");
            return Err(ServiceError::SimulatedCrash);
        }

        Ok(Some(ReserveOutcome {
            success: true,
            status: ReserveStatus::Confirmed,
            reservation_id: Some(reservation.reservation_id),
            remaining_stock: Some(new_stock),
            message: None,
        }))
    }

    /// `releaseStock` (§4.4).
    #[instrument(skip(self))]
    pub async fn release_stock(
        &self,
        order_id: Uuid,
        reservation_id: Uuid,
        reason: &str,
    ) -> Result<ReleaseOutcome, ServiceError> {
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(RepositoryError::from)?;

        let reservation = match self
            .reservations_repo
            .get_by_id_and_order_for_update_tx(&tx, reservation_id, order_id)
            .await?
        {
            Some(r) if r.status == ReservationStatus::Active => r,
            Some(r) => {
                tx.rollback().await.ok();
                return Ok(ReleaseOutcome {
                    success: false,
                    message: Some(format!("already {}", r.status)),
                });
            }
            None => {
                tx.rollback().await.ok();
                return Ok(ReleaseOutcome {
                    success: false,
                    message: Some("reservation not found".to_string()),
                });
            }
        };

        let product = self
            .products_repo
            .get_by_id_for_update_tx(&tx, &reservation.product_id)
            .await?;
        let new_stock = product.stock + reservation.quantity;
        self.products_repo
            .update_stock_tx(&tx, &reservation.product_id, new_stock)
            .await?;

        let now = Utc::now();
        self.reservations_repo
            .update_status_tx(&tx, reservation.reservation_id, ReservationStatus::Released, now)
            .await?;

        let audit = StockAuditEntry {
            id: Uuid::new_v4(),
            product_id: reservation.product_id.clone(),
            previous_stock: product.stock,
            new_stock,
            quantity_change: reservation.quantity,
            operation: StockOperation::Release,
            order_id: Some(order_id),
            reservation_id: Some(reservation.reservation_id),
            reason: Some(reason.to_string()),
            created_at: now,
        };
        self.audit_repo.insert_tx(&tx, &audit).await?;

        self.write_outbox_tx(
            &tx,
            &order_id.to_string(),
            BusEventData::StockReleased {
                order_id,
                reservation_id: reservation.reservation_id,
                product_id: reservation.product_id.clone(),
            },
        )
        .await?;

        tx.commit().await.map_err(RepositoryError::from)?;
        info!(%order_id, reservation_id = %reservation.reservation_id, new_stock, "stock released");

        Ok(ReleaseOutcome {
            success: true,
            message: None,
        })
    }

    /// `CheckStock` gRPC read.
    pub async fn check_stock(&self, product_id: &str) -> Result<Option<Product>, ServiceError> {
        let db = self.pool.get().await?;
        match self.products_repo.get_by_id(&db, product_id).await {
            Ok(p) => Ok(Some(p)),
            Err(RepositoryError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Backing check for the gRPC `HealthCheck` (§9: healthy iff the
    /// process's own database is reachable).
    pub async fn is_db_reachable(&self) -> bool {
        db::is_reachable(&self.pool).await
    }

    /// The `VerifyOrder` queue handler (§4.3): the protocol's closing
    /// element, resolving every order the coordinator left in
    /// `pending_verification` to a terminal outcome.
    #[instrument(skip(self, message))]
    pub async fn handle_verify_order(
        &self,
        message: &VerifyOrderMessage,
    ) -> Result<(), ServiceError> {
        let db = self.pool.get().await?;
        if let Some(existing) = self
            .reservations_repo
            .get_by_order_id(&db, message.order_id)
            .await?
        {
            if existing.status == ReservationStatus::Active {
                info!(order_id = %message.order_id, reservation_id = %existing.reservation_id, "verify found existing active reservation, recovered from crash");
                return self
                    .publish_order_verified(
                        message.order_id,
                        VerificationStatus::Confirmed,
                        Some(existing.reservation_id),
                        true,
                    )
                    .await;
            }
        }

        let verify_key = format!(
            "verify-{}",
            message
                .idempotency_key
                .clone()
                .unwrap_or_else(|| message.order_id.to_string())
        );
        let outcome = self
            .reserve_stock(
                message.order_id,
                &message.product_id,
                message.quantity,
                Some(&verify_key),
            )
            .await?;

        match outcome.status {
            ReserveStatus::Confirmed | ReserveStatus::AlreadyExists => {
                self.publish_order_verified(
                    message.order_id,
                    VerificationStatus::Confirmed,
                    outcome.reservation_id,
                    false,
                )
                .await
            }
            ReserveStatus::InsufficientStock | ReserveStatus::ProductNotFound => {
                self.publish_order_verified(message.order_id, VerificationStatus::NotFound, None, false)
                    .await
            }
        }
    }

    async fn publish_order_verified(
        &self,
        order_id: Uuid,
        status: VerificationStatus,
        reservation_id: Option<Uuid>,
        recovered_from_crash: bool,
    ) -> Result<(), ServiceError> {
        let mut client = self.pool.get().await?;
        let tx = client
            .transaction()
            .await
            .map_err(RepositoryError::from)?;
        self.write_outbox_tx(
            &tx,
            &order_id.to_string(),
            BusEventData::OrderVerified {
                order_id,
                status,
                reservation_id,
                recovered_from_crash,
            },
        )
        .await?;
        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }
}
