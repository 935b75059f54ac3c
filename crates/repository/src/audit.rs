use async_trait::async_trait;
use model::{StockAuditEntry, StockOperation};
use tokio_postgres::{Client, Row, Transaction};

use crate::RepositoryError;

/// Repository interface for the append-only stock audit log.
///
/// Rows are never updated or deleted; replaying a product's rows in
/// `created_at` order must reproduce its current `stock`.
#[async_trait]
pub trait StockAuditRepository: Send + Sync {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        entry: &StockAuditEntry,
    ) -> Result<(), RepositoryError>;

    async fn list_by_product(
        &self,
        db: &Client,
        product_id: &str,
    ) -> Result<Vec<StockAuditEntry>, RepositoryError>;
}

/// PostgreSQL implementation of [`StockAuditRepository`].
#[derive(Default)]
pub struct PgStockAuditRepository;

impl PgStockAuditRepository {
    pub fn new() -> Self {
        Self
    }
}

const COLUMNS: &str = "id, product_id, previous_stock, new_stock, quantity_change, operation, \
                       order_id, reservation_id, reason, created_at";

fn entry_from_row(row: &Row) -> Result<StockAuditEntry, RepositoryError> {
    let operation: String = row.get("operation");
    Ok(StockAuditEntry {
        id: row.get("id"),
        product_id: row.get("product_id"),
        previous_stock: row.get("previous_stock"),
        new_stock: row.get("new_stock"),
        quantity_change: row.get("quantity_change"),
        operation: parse_operation(&operation)?,
        order_id: row.get("order_id"),
        reservation_id: row.get("reservation_id"),
        reason: row.get("reason"),
        created_at: row.get("created_at"),
    })
}

fn parse_operation(s: &str) -> Result<StockOperation, RepositoryError> {
    match s {
        "reserve" => Ok(StockOperation::Reserve),
        "release" => Ok(StockOperation::Release),
        "adjust" => Ok(StockOperation::Adjust),
        other => Err(RepositoryError::InvalidData(format!(
            "unrecognized stock operation {other:?}"
        ))),
    }
}

#[async_trait]
impl StockAuditRepository for PgStockAuditRepository {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        entry: &StockAuditEntry,
    ) -> Result<(), RepositoryError> {
        let query =
            format!("INSERT INTO stock_audit_log ({COLUMNS}) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)");
        tx.execute(
            &query,
            &[
                &entry.id,
                &entry.product_id,
                &entry.previous_stock,
                &entry.new_stock,
                &entry.quantity_change,
                &entry.operation.to_string(),
                &entry.order_id,
                &entry.reservation_id,
                &entry.reason,
                &entry.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_by_product(
        &self,
        db: &Client,
        product_id: &str,
    ) -> Result<Vec<StockAuditEntry>, RepositoryError> {
        let query =
            format!("SELECT {COLUMNS} FROM stock_audit_log WHERE product_id = $1 ORDER BY created_at");
        let rows = db.query(&query, &[&product_id]).await?;
        rows.iter().map(entry_from_row).collect()
    }
}
