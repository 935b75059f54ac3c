use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::OutboxRow;
use tokio_postgres::{Client, Row, Transaction};
use uuid::Uuid;

use crate::RepositoryError;

/// Repository interface for the per-database transactional outbox.
///
/// `insert_tx` is always called in the same transaction as the state
/// change it announces; a separate pumper task drains unpublished rows
/// with `fetch_unpublished` and marks them with `mark_published_tx`.
#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        id: Uuid,
        aggregate_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn fetch_unpublished(
        &self,
        db: &Client,
        limit: i64,
    ) -> Result<Vec<OutboxRow>, RepositoryError>;

    async fn mark_published_tx(
        &self,
        tx: &Transaction<'_>,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

/// PostgreSQL implementation of [`OutboxRepository`], bound to one table.
///
/// The Order Coordinator and the Inventory Custodian each own a table with
/// this same shape but a different name (`outbox` vs `inventory_outbox`),
/// so the table name is a constructor parameter rather than hard-coded.
pub struct PgOutboxRepository {
    table: &'static str,
}

impl PgOutboxRepository {
    pub fn new(table: &'static str) -> Self {
        Self { table }
    }
}

fn row_to_outbox(row: &Row) -> OutboxRow {
    OutboxRow {
        id: row.get("id"),
        aggregate_id: row.get("aggregate_id"),
        event_type: row.get("event_type"),
        payload: row.get("payload"),
        created_at: row.get("created_at"),
        published_at: row.get("published_at"),
    }
}

#[async_trait]
impl OutboxRepository for PgOutboxRepository {
    async fn insert_tx(
        &self,
        tx: &Transaction<'_>,
        id: Uuid,
        aggregate_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let query = format!(
            "INSERT INTO {} (id, aggregate_id, event_type, payload, created_at) VALUES ($1,$2,$3,$4,$5)",
            self.table
        );
        tx.execute(&query, &[&id, &aggregate_id, &event_type, payload, &now])
            .await?;
        Ok(())
    }

    async fn fetch_unpublished(
        &self,
        db: &Client,
        limit: i64,
    ) -> Result<Vec<OutboxRow>, RepositoryError> {
        let query = format!(
            "SELECT id, aggregate_id, event_type, payload, created_at, published_at \
             FROM {} WHERE published_at IS NULL ORDER BY created_at LIMIT $1",
            self.table
        );
        let rows = db.query(&query, &[&limit]).await?;
        Ok(rows.iter().map(row_to_outbox).collect())
    }

    async fn mark_published_tx(
        &self,
        tx: &Transaction<'_>,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let query = format!("UPDATE {} SET published_at = $2 WHERE id = $1", self.table);
        tx.execute(&query, &[&id, &now]).await?;
        Ok(())
    }
}
