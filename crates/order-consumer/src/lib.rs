//! Order Event Consumer (§4.5): subscribes `inventory-events` under the
//! `order-service-sub` subscription and applies `StockReserved`,
//! `StockReleased`, and `OrderVerified` events to the order aggregate
//! through [`OrderCoordinatorService`]'s event-handling methods.
//!
//! Every event here targets an order this process itself created, so an
//! event for an order id this process can't find is logged and acked
//! rather than treated as an error — it's not this subscription's job to
//! second-guess the aggregate's existence.

use std::sync::Arc;

use bus::TopicConsumer;
use events::BusEventData;
use order_service::{InventoryClient, OrderCoordinatorService, ServiceError};
use repository::{OrdersRepository, OutboxRepository, RepositoryError};
use tracing::{error, info, instrument, warn};

pub struct OrderEventConsumer<R, OB, C, B> {
    consumer: TopicConsumer,
    service: Arc<OrderCoordinatorService<R, OB, C, B>>,
}

impl<R, OB, C, B> OrderEventConsumer<R, OB, C, B>
where
    R: OrdersRepository,
    OB: OutboxRepository,
    C: InventoryClient,
    B: bus::EventBus,
{
    pub fn new(consumer: TopicConsumer, service: Arc<OrderCoordinatorService<R, OB, C, B>>) -> Self {
        Self { consumer, service }
    }

    /// Runs until the stream ends or `shutdown` fires. A single malformed
    /// or failing delivery is nacked and the loop continues — one bad
    /// event must never take down the whole consumer.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                delivery = self.consumer.recv() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            if let Err(reason) = self.handle(&delivery.envelope.data).await {
                                delivery.nack(&reason);
                            } else if let Err(e) = delivery.ack() {
                                error!(error = %e, "failed to ack order event, will be redelivered");
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "order event consumer received a decode error");
                        }
                        None => {
                            info!("order event consumer stream ended");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("order event consumer shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Applies one event; `Err` carries the nack reason.
    #[instrument(skip(self, data))]
    async fn handle(&self, data: &BusEventData) -> Result<(), String> {
        let result = match data {
            BusEventData::StockReserved {
                order_id,
                reservation_id,
                ..
            } => self.service.handle_stock_reserved(*order_id, *reservation_id).await,
            BusEventData::OrderVerified {
                order_id,
                status,
                reservation_id,
                ..
            } => {
                self.service
                    .handle_order_verified(*order_id, *status, *reservation_id)
                    .await
            }
            // StockReleased and LowStockAlert are informational to this
            // subscription — the order aggregate doesn't need to react to
            // either (a release already happened on the cancel path that
            // drove it; low-stock is an inventory-side concern).
            BusEventData::StockReleased { .. } | BusEventData::LowStockAlert { .. } => return Ok(()),
            other => {
                warn!(event_type = other.event_type_name(), "order event consumer ignoring unrelated event type");
                return Ok(());
            }
        };

        match result {
            Ok(order) => {
                info!(order_id = %order.order_id, status = %order.status, "applied inventory event to order");
                Ok(())
            }
            Err(ServiceError::Db(RepositoryError::NotFound)) => {
                warn!("order event referenced an order id this process doesn't own, acking");
                Ok(())
            }
            Err(e) => Err(e.to_string()),
        }
    }
}
