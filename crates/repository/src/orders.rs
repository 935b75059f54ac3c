use async_trait::async_trait;
use model::{Order, OrderStatus};
use tokio_postgres::{Client, Row, Transaction};
use uuid::Uuid;

use crate::RepositoryError;

/// Repository interface for the Order Coordinator's central aggregate.
///
/// `*_tx` methods participate in the same transaction as the transition
/// function: `get_by_id_for_update_tx` takes a row lock that `update_tx`
/// relies on to make the read-modify-write atomic.
#[async_trait]
pub trait OrdersRepository: Send + Sync {
    async fn insert_tx(&self, tx: &Transaction<'_>, order: &Order) -> Result<(), RepositoryError>;

    async fn update_tx(&self, tx: &Transaction<'_>, order: &Order) -> Result<(), RepositoryError>;

    async fn get_by_id(&self, db: &Client, order_id: Uuid) -> Result<Order, RepositoryError>;

    async fn get_by_id_for_update_tx(
        &self,
        tx: &Transaction<'_>,
        order_id: Uuid,
    ) -> Result<Order, RepositoryError>;

    async fn get_by_idempotency_key(
        &self,
        db: &Client,
        key: &str,
    ) -> Result<Option<Order>, RepositoryError>;

    async fn list(
        &self,
        db: &Client,
        status: Option<OrderStatus>,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError>;
}

/// PostgreSQL implementation of [`OrdersRepository`].
#[derive(Default)]
pub struct PgOrdersRepository;

impl PgOrdersRepository {
    pub fn new() -> Self {
        Self
    }
}

const COLUMNS: &str = "order_id, customer_id, product_id, quantity, status, idempotency_key, \
                       reservation_id, error_message, created_at, updated_at, completed_at";

fn order_from_row(row: &Row) -> Result<Order, RepositoryError> {
    let status: String = row.get("status");
    Ok(Order {
        order_id: row.get("order_id"),
        customer_id: row.get("customer_id"),
        product_id: row.get("product_id"),
        quantity: row.get("quantity"),
        status: parse_status(&status)?,
        idempotency_key: row.get("idempotency_key"),
        reservation_id: row.get("reservation_id"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

fn parse_status(s: &str) -> Result<OrderStatus, RepositoryError> {
    match s {
        "pending" => Ok(OrderStatus::Pending),
        "pending_verification" => Ok(OrderStatus::PendingVerification),
        "confirmed" => Ok(OrderStatus::Confirmed),
        "failed" => Ok(OrderStatus::Failed),
        "cancelled" => Ok(OrderStatus::Cancelled),
        other => Err(RepositoryError::InvalidData(format!(
            "unrecognized order status {other:?}"
        ))),
    }
}

#[async_trait]
impl OrdersRepository for PgOrdersRepository {
    async fn insert_tx(&self, tx: &Transaction<'_>, order: &Order) -> Result<(), RepositoryError> {
        let query = format!(
            "INSERT INTO orders ({COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)"
        );
        tx.execute(
            &query,
            &[
                &order.order_id,
                &order.customer_id,
                &order.product_id,
                &order.quantity,
                &order.status.to_string(),
                &order.idempotency_key,
                &order.reservation_id,
                &order.error_message,
                &order.created_at,
                &order.updated_at,
                &order.completed_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn update_tx(&self, tx: &Transaction<'_>, order: &Order) -> Result<(), RepositoryError> {
        let query = r#"
            UPDATE orders
            SET status = $2, reservation_id = $3, error_message = $4,
                updated_at = $5, completed_at = $6
            WHERE order_id = $1
        "#;
        let affected = tx
            .execute(
                query,
                &[
                    &order.order_id,
                    &order.status.to_string(),
                    &order.reservation_id,
                    &order.error_message,
                    &order.updated_at,
                    &order.completed_at,
                ],
            )
            .await?;
        if affected == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_by_id(&self, db: &Client, order_id: Uuid) -> Result<Order, RepositoryError> {
        let query = format!("SELECT {COLUMNS} FROM orders WHERE order_id = $1");
        let row = db.query_opt(&query, &[&order_id]).await?;
        match row {
            Some(row) => order_from_row(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_by_id_for_update_tx(
        &self,
        tx: &Transaction<'_>,
        order_id: Uuid,
    ) -> Result<Order, RepositoryError> {
        let query = format!("SELECT {COLUMNS} FROM orders WHERE order_id = $1 FOR UPDATE");
        let row = tx.query_opt(&query, &[&order_id]).await?;
        match row {
            Some(row) => order_from_row(&row),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_by_idempotency_key(
        &self,
        db: &Client,
        key: &str,
    ) -> Result<Option<Order>, RepositoryError> {
        let query = format!("SELECT {COLUMNS} FROM orders WHERE idempotency_key = $1");
        let row = db.query_opt(&query, &[&key]).await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list(
        &self,
        db: &Client,
        status: Option<OrderStatus>,
        limit: i64,
    ) -> Result<Vec<Order>, RepositoryError> {
        let rows = match status {
            Some(status) => {
                let query = format!(
                    "SELECT {COLUMNS} FROM orders WHERE status = $1 ORDER BY created_at DESC LIMIT $2"
                );
                db.query(&query, &[&status.to_string(), &limit]).await?
            }
            None => {
                let query =
                    format!("SELECT {COLUMNS} FROM orders ORDER BY created_at DESC LIMIT $1");
                db.query(&query, &[&limit]).await?
            }
        };
        rows.iter().map(order_from_row).collect()
    }
}
