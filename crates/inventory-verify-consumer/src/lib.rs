//! `VerifyOrder` queue consumer (§4.3): the other half of the
//! pending-verification recovery path. Drains the `verify-orders` queue
//! and hands each message to
//! [`inventory_service::InventoryCustodianService::handle_verify_order`].

use std::sync::Arc;

use bus::QueueConsumer;
use inventory_service::InventoryCustodianService;
use repository::{OutboxRepository, ProductsRepository, ReservationsRepository, StockAuditRepository};
use tracing::{error, info, warn};

pub struct VerifyOrderConsumer<P, R, A, OB> {
    consumer: QueueConsumer,
    service: Arc<InventoryCustodianService<P, R, A, OB>>,
}

impl<P, R, A, OB> VerifyOrderConsumer<P, R, A, OB>
where
    P: ProductsRepository,
    R: ReservationsRepository,
    A: StockAuditRepository,
    OB: OutboxRepository,
{
    pub fn new(consumer: QueueConsumer, service: Arc<InventoryCustodianService<P, R, A, OB>>) -> Self {
        Self { consumer, service }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                delivery = self.consumer.recv() => {
                    match delivery {
                        Some(Ok(delivery)) => {
                            match self.service.handle_verify_order(&delivery.message).await {
                                Ok(()) => {
                                    if let Err(e) = delivery.ack() {
                                        error!(error = %e, "failed to ack VerifyOrder message");
                                    }
                                }
                                Err(e) => {
                                    warn!(order_id = %delivery.message.order_id, error = %e, "VerifyOrder handling failed, nacking");
                                    delivery.nack(&e.to_string());
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "VerifyOrder consumer received a decode error");
                        }
                        None => {
                            info!("VerifyOrder consumer stream ended");
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("VerifyOrder consumer shutting down");
                        break;
                    }
                }
            }
        }
    }
}
