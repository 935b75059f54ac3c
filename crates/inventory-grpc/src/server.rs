use inventory_service::{InventoryCustodianService, ReserveStatus as DomainReserveStatus, ServiceError};
use repository::{OutboxRepository, ProductsRepository, ReservationsRepository, StockAuditRepository};
use tonic::{Request, Response, Status};
use tracing::{error, instrument};
use uuid::Uuid;

use crate::proto::inventory_service_server::InventoryService;
use crate::proto::{
    CheckStockRequest, CheckStockResponse, HealthCheckRequest, HealthCheckResponse,
    ReleaseStockRequest, ReleaseStockResponse, ReserveStatus, ReserveStockRequest,
    ReserveStockResponse,
};

/// tonic server adapter over [`InventoryCustodianService`]. A
/// [`ServiceError::SimulatedCrash`] (Schrödinger mode, §9) is not mapped to
/// a gRPC status at all — the process exits immediately, the way an actual
/// crash would, so the coordinator observes a transport failure rather
/// than a well-formed error response.
pub struct InventoryGrpcServer<P, R, A, OB> {
    inner: std::sync::Arc<InventoryCustodianService<P, R, A, OB>>,
}

impl<P, R, A, OB> InventoryGrpcServer<P, R, A, OB> {
    pub fn new(inner: std::sync::Arc<InventoryCustodianService<P, R, A, OB>>) -> Self {
        Self { inner }
    }
}

fn domain_status_to_wire(status: DomainReserveStatus) -> ReserveStatus {
    match status {
        DomainReserveStatus::Confirmed => ReserveStatus::Confirmed,
        DomainReserveStatus::AlreadyExists => ReserveStatus::AlreadyExists,
        DomainReserveStatus::InsufficientStock => ReserveStatus::InsufficientStock,
        DomainReserveStatus::ProductNotFound => ReserveStatus::ProductNotFound,
    }
}

fn service_error_to_status(err: ServiceError) -> Status {
    match err {
        ServiceError::SimulatedCrash => {
            error!("schrodinger mode: exiting process to simulate a crash after commit");
            std::process::exit(1);
        }
        ServiceError::Db(_) | ServiceError::Pool(_) | ServiceError::Unexpected(_) => {
            error!(error = %err, "inventory rpc failed");
            Status::internal(err.to_string())
        }
    }
}

fn parse_uuid(s: &str, field: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(s).map_err(|_| Status::invalid_argument(format!("invalid {field}: {s:?}")))
}

#[tonic::async_trait]
impl<P, R, A, OB> InventoryService for InventoryGrpcServer<P, R, A, OB>
where
    P: ProductsRepository + Send + Sync + 'static,
    R: ReservationsRepository + Send + Sync + 'static,
    A: StockAuditRepository + Send + Sync + 'static,
    OB: OutboxRepository + Send + Sync + 'static,
{
    #[instrument(skip(self, request))]
    async fn reserve_stock(
        &self,
        request: Request<ReserveStockRequest>,
    ) -> Result<Response<ReserveStockResponse>, Status> {
        let req = request.into_inner();
        let order_id = parse_uuid(&req.order_id, "order_id")?;
        let idempotency_key = if req.idempotency_key.is_empty() {
            None
        } else {
            Some(req.idempotency_key.as_str())
        };

        let outcome = self
            .inner
            .reserve_stock(order_id, &req.product_id, req.quantity, idempotency_key)
            .await
            .map_err(service_error_to_status)?;

        Ok(Response::new(ReserveStockResponse {
            success: outcome.success,
            status: domain_status_to_wire(outcome.status) as i32,
            reservation_id: outcome.reservation_id.map(|id| id.to_string()).unwrap_or_default(),
            remaining_stock: outcome.remaining_stock.unwrap_or_default(),
            message: outcome.message.unwrap_or_default(),
        }))
    }

    #[instrument(skip(self, request))]
    async fn release_stock(
        &self,
        request: Request<ReleaseStockRequest>,
    ) -> Result<Response<ReleaseStockResponse>, Status> {
        let req = request.into_inner();
        let order_id = parse_uuid(&req.order_id, "order_id")?;
        let reservation_id = parse_uuid(&req.reservation_id, "reservation_id")?;

        let outcome = self
            .inner
            .release_stock(order_id, reservation_id, &req.reason)
            .await
            .map_err(service_error_to_status)?;

        Ok(Response::new(ReleaseStockResponse {
            success: outcome.success,
            message: outcome.message.unwrap_or_default(),
        }))
    }

    #[instrument(skip(self, request))]
    async fn check_stock(
        &self,
        request: Request<CheckStockRequest>,
    ) -> Result<Response<CheckStockResponse>, Status> {
        let req = request.into_inner();
        let product = self
            .inner
            .check_stock(&req.product_id)
            .await
            .map_err(service_error_to_status)?;

        Ok(Response::new(match product {
            Some(p) => CheckStockResponse {
                found: true,
                stock: p.stock,
                low_stock_threshold: p.low_stock_threshold,
            },
            None => CheckStockResponse {
                found: false,
                stock: 0,
                low_stock_threshold: 0,
            },
        }))
    }

    async fn health_check(
        &self,
        _request: Request<HealthCheckRequest>,
    ) -> Result<Response<HealthCheckResponse>, Status> {
        let healthy = self.inner.is_db_reachable().await;
        Ok(Response::new(HealthCheckResponse { healthy }))
    }
}
