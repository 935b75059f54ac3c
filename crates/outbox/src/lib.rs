//! Transactional outbox pumper.
//!
//! Both the Order Coordinator and the Inventory Custodian write their
//! domain events into an `outbox`/`inventory_outbox` row in the same
//! transaction as the state change that warrants a publish. This task is
//! the other half: it polls unpublished rows, publishes each to the bus,
//! and marks it published — at-least-once, since a crash between publish
//! and mark-published re-publishes on the next poll. Downstream consumers
//! (the Order Event Consumer, the `VerifyOrder` handler) are written to
//! tolerate redelivery.

use bus::EventBus;
use deadpool_postgres::Pool;
use events::{topics, Envelope, BusEventData};
use repository::OutboxRepository;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Error)]
pub enum PumperError {
    #[error("database pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),
    #[error("repository error: {0}")]
    Repository(#[from] repository::RepositoryError),
    #[error("bus error: {0}")]
    Bus(#[from] bus::BusError),
    #[error("stored outbox payload did not decode as an envelope: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// The topic a given domain event belongs on. Each process's outbox only
/// ever holds one side of this set, but the mapping is total so the same
/// pumper binary works for either.
fn topic_for(data: &BusEventData) -> &'static str {
    match data {
        BusEventData::OrderCreated { .. }
        | BusEventData::OrderConfirmed { .. }
        | BusEventData::OrderFailed { .. }
        | BusEventData::OrderCancelled { .. }
        | BusEventData::OrderPendingVerification { .. } => topics::ORDER_EVENTS,
        BusEventData::StockReserved { .. }
        | BusEventData::StockReleased { .. }
        | BusEventData::LowStockAlert { .. }
        | BusEventData::OrderVerified { .. } => topics::INVENTORY_EVENTS,
    }
}

/// Drains one database's outbox table to the bus.
pub struct OutboxPumper {
    pool: Pool,
    repo: Arc<dyn OutboxRepository>,
    bus: Arc<dyn EventBus>,
    poll_interval: Duration,
    batch_size: i64,
}

impl OutboxPumper {
    pub fn new(
        pool: Pool,
        repo: Arc<dyn OutboxRepository>,
        bus: Arc<dyn EventBus>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            repo,
            bus,
            poll_interval,
            batch_size: 100,
        }
    }

    /// Runs until `shutdown` fires, polling every `poll_interval`.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.drain_once().await {
                        error!(error = %e, "outbox pumper cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("outbox pumper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fetches and publishes one batch of unpublished rows. Each row is
    /// published and marked in its own short transaction so a failure
    /// partway through a batch only leaves the remainder unpublished, not
    /// reprocessed from scratch.
    #[instrument(skip(self))]
    pub async fn drain_once(&self) -> Result<usize, PumperError> {
        let db = self.pool.get().await?;
        let rows = self.repo.fetch_unpublished(&db, self.batch_size).await?;
        let mut published = 0;

        for row in rows {
            let envelope: Envelope = match serde_json::from_value(row.payload.clone()) {
                Ok(e) => e,
                Err(e) => {
                    warn!(id = %row.id, error = %e, "dropping unparseable outbox row");
                    continue;
                }
            };
            let topic = topic_for(&envelope.data);

            if let Err(e) = self.bus.publish(topic, &envelope).await {
                error!(id = %row.id, error = %e, "failed to publish outbox row, will retry");
                continue;
            }

            let mut client = self.pool.get().await?;
            let tx = client.transaction().await.map_err(repository::RepositoryError::from)?;
            self.repo
                .mark_published_tx(&tx, row.id, chrono::Utc::now())
                .await?;
            tx.commit().await.map_err(repository::RepositoryError::from)?;
            published += 1;
        }

        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::VerificationStatus;
    use uuid::Uuid;

    #[test]
    fn order_events_route_to_order_topic() {
        let data = BusEventData::OrderCreated {
            order_id: Uuid::new_v4(),
            customer_id: "C1".into(),
            product_id: "SKU-002".into(),
            quantity: 1,
        };
        assert_eq!(topic_for(&data), topics::ORDER_EVENTS);
    }

    #[test]
    fn inventory_events_route_to_inventory_topic() {
        let data = BusEventData::OrderVerified {
            order_id: Uuid::new_v4(),
            status: VerificationStatus::Confirmed,
            reservation_id: Some(Uuid::new_v4()),
            recovered_from_crash: false,
        };
        assert_eq!(topic_for(&data), topics::INVENTORY_EVENTS);
    }
}
