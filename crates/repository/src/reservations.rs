use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::{Reservation, ReservationStatus};
use tokio_postgres::{Client, Row, Transaction};
use uuid::Uuid;

use crate::RepositoryError;

/// Repository interface for the Inventory Custodian's reservation ledger.
///
/// The partial unique index on `(order_id) WHERE status = 'active'` is what
/// actually enforces "at most one active reservation per order" — this
/// trait's `get_active_by_order_id_for_update_tx` exists so the service
/// layer can check-then-act under a row lock without racing that index.
#[async_trait]
pub trait ReservationsRepository: Send + Sync {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        reservation: &Reservation,
    ) -> Result<(), RepositoryError>;

    async fn get_by_idempotency_key(
        &self,
        db: &Client,
        key: &str,
    ) -> Result<Option<Reservation>, RepositoryError>;

    async fn get_by_idempotency_key_tx(
        &self,
        tx: &Transaction<'_>,
        key: &str,
    ) -> Result<Option<Reservation>, RepositoryError>;

    async fn get_active_by_order_id_for_update_tx(
        &self,
        tx: &Transaction<'_>,
        order_id: Uuid,
    ) -> Result<Option<Reservation>, RepositoryError>;

    /// Locks the reservation identified by `(reservation_id, order_id)`
    /// regardless of its status, the way `releaseStock` (§4.4) needs to
    /// distinguish "not found" from "already released/committed".
    async fn get_by_id_and_order_for_update_tx(
        &self,
        tx: &Transaction<'_>,
        reservation_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Reservation>, RepositoryError>;

    async fn get_by_order_id(
        &self,
        db: &Client,
        order_id: Uuid,
    ) -> Result<Option<Reservation>, RepositoryError>;

    async fn update_status_tx(
        &self,
        tx: &Transaction<'_>,
        reservation_id: Uuid,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

/// PostgreSQL implementation of [`ReservationsRepository`].
#[derive(Default)]
pub struct PgReservationsRepository;

impl PgReservationsRepository {
    pub fn new() -> Self {
        Self
    }
}

const COLUMNS: &str = "reservation_id, order_id, product_id, quantity, status, \
                       idempotency_key, created_at, updated_at";

fn reservation_from_row(row: &Row) -> Result<Reservation, RepositoryError> {
    let status: String = row.get("status");
    Ok(Reservation {
        reservation_id: row.get("reservation_id"),
        order_id: row.get("order_id"),
        product_id: row.get("product_id"),
        quantity: row.get("quantity"),
        status: parse_status(&status)?,
        idempotency_key: row.get("idempotency_key"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn parse_status(s: &str) -> Result<ReservationStatus, RepositoryError> {
    match s {
        "active" => Ok(ReservationStatus::Active),
        "released" => Ok(ReservationStatus::Released),
        "committed" => Ok(ReservationStatus::Committed),
        other => Err(RepositoryError::InvalidData(format!(
            "unrecognized reservation status {other:?}"
        ))),
    }
}

#[async_trait]
impl ReservationsRepository for PgReservationsRepository {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        reservation: &Reservation,
    ) -> Result<(), RepositoryError> {
        let query = format!("INSERT INTO reservations ({COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8)");
        tx.execute(
            &query,
            &[
                &reservation.reservation_id,
                &reservation.order_id,
                &reservation.product_id,
                &reservation.quantity,
                &reservation.status.to_string(),
                &reservation.idempotency_key,
                &reservation.created_at,
                &reservation.updated_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_by_idempotency_key(
        &self,
        db: &Client,
        key: &str,
    ) -> Result<Option<Reservation>, RepositoryError> {
        let query = format!("SELECT {COLUMNS} FROM reservations WHERE idempotency_key = $1");
        let row = db.query_opt(&query, &[&key]).await?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn get_by_idempotency_key_tx(
        &self,
        tx: &Transaction<'_>,
        key: &str,
    ) -> Result<Option<Reservation>, RepositoryError> {
        let query = format!("SELECT {COLUMNS} FROM reservations WHERE idempotency_key = $1");
        let row = tx.query_opt(&query, &[&key]).await?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn get_active_by_order_id_for_update_tx(
        &self,
        tx: &Transaction<'_>,
        order_id: Uuid,
    ) -> Result<Option<Reservation>, RepositoryError> {
        let query = format!(
            "SELECT {COLUMNS} FROM reservations WHERE order_id = $1 AND status = 'active' FOR UPDATE"
        );
        let row = tx.query_opt(&query, &[&order_id]).await?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn get_by_id_and_order_for_update_tx(
        &self,
        tx: &Transaction<'_>,
        reservation_id: Uuid,
        order_id: Uuid,
    ) -> Result<Option<Reservation>, RepositoryError> {
        let query = format!(
            "SELECT {COLUMNS} FROM reservations WHERE reservation_id = $1 AND order_id = $2 FOR UPDATE"
        );
        let row = tx.query_opt(&query, &[&reservation_id, &order_id]).await?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn get_by_order_id(
        &self,
        db: &Client,
        order_id: Uuid,
    ) -> Result<Option<Reservation>, RepositoryError> {
        let query =
            format!("SELECT {COLUMNS} FROM reservations WHERE order_id = $1 ORDER BY created_at DESC LIMIT 1");
        let row = db.query_opt(&query, &[&order_id]).await?;
        row.as_ref().map(reservation_from_row).transpose()
    }

    async fn update_status_tx(
        &self,
        tx: &Transaction<'_>,
        reservation_id: Uuid,
        status: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let affected = tx
            .execute(
                "UPDATE reservations SET status = $2, updated_at = $3 WHERE reservation_id = $1",
                &[&reservation_id, &status.to_string(), &now],
            )
            .await?;
        if affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
