use async_trait::async_trait;
use order_service::{ClientError, InventoryClient, ReserveOutcome, ReserveStatus};
use tonic::transport::Channel;
use tonic::Code;
use uuid::Uuid;

use crate::proto::inventory_service_client::InventoryServiceClient;
use crate::proto::{self, ReleaseStockRequest, ReserveStockRequest};

/// tonic-backed [`InventoryClient`]. `tonic::Status::code()` is what
/// distinguishes a genuinely unreachable Inventory Custodian
/// (`Unavailable`/`DeadlineExceeded`) from a well-formed domain rejection
/// — the former enters `pending_verification` (§4.1), the latter does not.
#[derive(Clone)]
pub struct GrpcInventoryClient {
    client: InventoryServiceClient<Channel>,
}

impl GrpcInventoryClient {
    pub async fn connect(endpoint: String) -> Result<Self, tonic::transport::Error> {
        let channel = Channel::from_shared(endpoint)
            .expect("invalid inventory endpoint uri")
            .connect()
            .await?;
        Ok(Self {
            client: InventoryServiceClient::new(channel),
        })
    }

    fn classify_status(status: tonic::Status) -> ClientError {
        match status.code() {
            Code::DeadlineExceeded => ClientError::Timeout,
            Code::Unavailable => ClientError::Unavailable(status.message().to_string()),
            _ => ClientError::Other(status.message().to_string()),
        }
    }

    fn wire_status_to_domain(status: i32) -> ReserveStatus {
        match proto::ReserveStatus::try_from(status).unwrap_or(proto::ReserveStatus::Unknown) {
            proto::ReserveStatus::Confirmed => ReserveStatus::Confirmed,
            proto::ReserveStatus::AlreadyExists => ReserveStatus::AlreadyExists,
            proto::ReserveStatus::InsufficientStock => ReserveStatus::InsufficientStock,
            proto::ReserveStatus::ProductNotFound | proto::ReserveStatus::Unknown => {
                ReserveStatus::ProductNotFound
            }
        }
    }
}

#[async_trait]
impl InventoryClient for GrpcInventoryClient {
    async fn reserve_stock(
        &self,
        order_id: Uuid,
        product_id: &str,
        quantity: i32,
        idempotency_key: &str,
    ) -> Result<ReserveOutcome, ClientError> {
        let mut client = self.client.clone();
        let response = client
            .reserve_stock(ReserveStockRequest {
                order_id: order_id.to_string(),
                product_id: product_id.to_string(),
                quantity,
                idempotency_key: idempotency_key.to_string(),
            })
            .await
            .map_err(Self::classify_status)?
            .into_inner();

        Ok(ReserveOutcome {
            status: Self::wire_status_to_domain(response.status),
            reservation_id: if response.reservation_id.is_empty() {
                None
            } else {
                Uuid::parse_str(&response.reservation_id).ok()
            },
            remaining_stock: if response.success || response.remaining_stock != 0 {
                Some(response.remaining_stock)
            } else {
                None
            },
            message: if response.message.is_empty() {
                None
            } else {
                Some(response.message)
            },
        })
    }

    async fn release_stock(
        &self,
        order_id: Uuid,
        reservation_id: Uuid,
        reason: &str,
    ) -> Result<(), ClientError> {
        let mut client = self.client.clone();
        client
            .release_stock(ReleaseStockRequest {
                order_id: order_id.to_string(),
                reservation_id: reservation_id.to_string(),
                reason: reason.to_string(),
            })
            .await
            .map_err(Self::classify_status)?;
        Ok(())
    }
}
