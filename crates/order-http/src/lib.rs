//! HTTP surface for the Order Coordinator (§6): the `/orders` CRUD-ish
//! routes, `/health`, and `/metrics`, following the donor server crate's
//! `Metrics`/middleware/graceful-shutdown pattern.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use deadpool_postgres::Pool;
use model::{Order, OrderStatus};
use order_service::{CreateOrderRequest, OrderCoordinatorService, ServiceError};
use prometheus::{CounterVec, HistogramOpts, HistogramVec, Opts, Registry};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Prometheus metrics for the coordinator's HTTP surface, extending the
/// donor server crate's generic request/duration/error counters with the
/// reservation-specific counters the spec's ambient-stack section calls
/// for (§1.1).
struct Metrics {
    registry: Registry,
    http_requests_total: CounterVec,
    http_request_duration_seconds: HistogramVec,
    errors_total: CounterVec,
    reservations_total: CounterVec,
    verify_messages_total: CounterVec,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "endpoint", "status"],
        )
        .expect("failed to create http_requests_total metric");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )
        .expect("failed to create http_request_duration_seconds metric");

        let errors_total = CounterVec::new(
            Opts::new("errors_total", "Total number of errors"),
            &["source", "endpoint"],
        )
        .expect("failed to create errors_total metric");

        let reservations_total = CounterVec::new(
            Opts::new("reservations_total", "Total number of create-order reservation outcomes"),
            &["outcome"],
        )
        .expect("failed to create reservations_total metric");

        let verify_messages_total = CounterVec::new(
            Opts::new("verify_messages_total", "Total number of OrderVerified events applied"),
            &["outcome"],
        )
        .expect("failed to create verify_messages_total metric");

        registry.register(Box::new(http_requests_total.clone())).expect("register http_requests_total");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("register http_request_duration_seconds");
        registry.register(Box::new(errors_total.clone())).expect("register errors_total");
        registry
            .register(Box::new(reservations_total.clone()))
            .expect("register reservations_total");
        registry
            .register(Box::new(verify_messages_total.clone()))
            .expect("register verify_messages_total");

        Self {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            errors_total,
            reservations_total,
            verify_messages_total,
        }
    }

    fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        self.http_requests_total
            .with_label_values(&[method, endpoint, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    fn record_error(&self, source: &str, endpoint: &str) {
        self.errors_total.with_label_values(&[source, endpoint]).inc();
    }

    /// Recorded once per `create_order` call, labeled with the order's
    /// resulting status (`confirmed`, `pending_verification`, `failed`).
    pub fn record_reservation_outcome(&self, outcome: &str) {
        self.reservations_total.with_label_values(&[outcome]).inc();
    }
}

/// Tracks whether this process's event-bus connection is up, for `/health`
/// (§9: healthy iff DB reachable AND bus connected). Set once after a
/// successful `KafkaBus::start()` in the binary's startup sequence.
#[derive(Clone, Default)]
pub struct BusHealth(Arc<AtomicBool>);

impl BusHealth {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn mark_connected(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct AppState<R, OB, C, B> {
    service: Arc<OrderCoordinatorService<R, OB, C, B>>,
    db_pool: Pool,
    bus_health: BusHealth,
    metrics: Arc<Metrics>,
}

/// Wire DTO for `POST /orders`. Camel-cased independently of the internal
/// [`model::Order`] (snake_case, matching its DB columns) per §6's
/// documented request shape.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequestDto {
    pub customer_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDto {
    pub order_id: Uuid,
    pub customer_id: String,
    pub product_id: String,
    pub quantity: i32,
    pub status: OrderStatus,
    pub idempotency_key: Option<String>,
    pub reservation_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Set on `POST /orders` when this body is a replay of an earlier
    /// create for the same idempotency key, not a new order (§4.1 step 1).
    /// Always `false` from `GET`/`cancel`, which only ever see the stored
    /// order and have no replay concept of their own.
    pub cached: bool,
}

impl From<Order> for OrderDto {
    fn from(o: Order) -> Self {
        Self {
            order_id: o.order_id,
            customer_id: o.customer_id,
            product_id: o.product_id,
            quantity: o.quantity,
            status: o.status,
            idempotency_key: o.idempotency_key,
            reservation_id: o.reservation_id,
            error_message: o.error_message,
            created_at: o.created_at,
            updated_at: o.updated_at,
            completed_at: o.completed_at,
            cached: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

fn service_error_to_response(err: ServiceError) -> Response {
    match err {
        ServiceError::Validation(msg) => error_response(StatusCode::BAD_REQUEST, msg),
        ServiceError::NotFound => error_response(StatusCode::NOT_FOUND, "order not found"),
        ServiceError::NotCancellable => {
            error_response(StatusCode::BAD_REQUEST, "order cannot be cancelled in its current state")
        }
        ServiceError::Db(_) | ServiceError::Pool(_) | ServiceError::Unexpected(_) => {
            error!(error = %err, "internal error handling order request");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

fn outcome_label(status: OrderStatus) -> &'static str {
    match status {
        OrderStatus::Confirmed => "confirmed",
        OrderStatus::PendingVerification => "pending_verification",
        OrderStatus::Failed => "failed",
        OrderStatus::Pending => "pending",
        OrderStatus::Cancelled => "cancelled",
    }
}

/// Maps the order status `POST /orders` settled on to the reply status code.
/// `Pending` only comes back here when the reservation RPC failed in a way
/// that's neither a timeout/transport error nor a domain rejection — the
/// order is left for event-driven reconciliation, so the caller sees 500.
fn create_order_reply_status(status: OrderStatus) -> StatusCode {
    match status {
        OrderStatus::Confirmed => StatusCode::CREATED,
        OrderStatus::PendingVerification => StatusCode::ACCEPTED,
        OrderStatus::Failed => StatusCode::BAD_REQUEST,
        OrderStatus::Pending | OrderStatus::Cancelled => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Axum server wrapping an [`OrderCoordinatorService`]. Generic over the
/// same repository/outbox/client/bus type parameters as the service it
/// wraps, mirroring the donor `server::Server` shape.
pub struct OrderHttpServer<R, OB, C, B> {
    state: AppState<R, OB, C, B>,
    port: String,
}

impl<R, OB, C, B> OrderHttpServer<R, OB, C, B>
where
    R: repository::OrdersRepository + Send + Sync + 'static,
    OB: repository::OutboxRepository + Send + Sync + 'static,
    C: order_service::InventoryClient + Send + Sync + 'static,
    B: bus::EventBus + Send + Sync + 'static,
{
    pub fn new(
        port: String,
        service: Arc<OrderCoordinatorService<R, OB, C, B>>,
        db_pool: Pool,
        bus_health: BusHealth,
    ) -> Self {
        Self {
            state: AppState {
                service,
                db_pool,
                bus_health,
                metrics: Arc::new(Metrics::new()),
            },
            port,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let app = self.create_router();
        let listener = TcpListener::bind(format!("0.0.0.0:{}", self.port))
            .await
            .context("failed to bind order-http listener")?;
        info!(port = %self.port, "order coordinator HTTP server listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("order-http server error")?;
        info!("order coordinator HTTP server shut down gracefully");
        Ok(())
    }

    fn create_router(&self) -> Router {
        let metrics = self.state.metrics.clone();

        Router::new()
            .route("/orders", post(Self::handle_create_order).get(Self::handle_list_orders))
            .route("/orders/{id}", get(Self::handle_get_order))
            .route("/orders/{id}/cancel", post(Self::handle_cancel_order))
            .route("/products", get(Self::handle_products_passthrough))
            .route("/products/{id}/stock", get(Self::handle_products_passthrough))
            .route("/health", get(Self::handle_health))
            .route("/metrics", get(Self::handle_metrics))
            .layer(axum::middleware::from_fn_with_state(metrics.clone(), Self::metrics_middleware))
            .with_state(self.state.clone())
    }

    async fn metrics_middleware(
        State(metrics): State<Arc<Metrics>>,
        req: axum::extract::Request,
        next: axum::middleware::Next,
    ) -> Response {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let start = std::time::Instant::now();
        let response = next.run(req).await;
        let status = response.status().as_u16();
        metrics.record_request(&method, &path, status, start.elapsed());
        if status >= 400 {
            metrics.record_error("http", &path);
        }
        response
    }

    #[tracing::instrument(skip(state, body))]
    async fn handle_create_order(
        State(state): State<AppState<R, OB, C, B>>,
        headers: axum::http::HeaderMap,
        Json(body): Json<CreateOrderRequestDto>,
    ) -> Response {
        let idempotency_key = body.idempotency_key.clone().or_else(|| {
            headers
                .get("Idempotency-Key")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });

        let req = CreateOrderRequest {
            customer_id: body.customer_id,
            product_id: body.product_id,
            quantity: body.quantity,
            idempotency_key,
        };

        match state.service.create_order(req).await {
            Ok(outcome) => {
                state
                    .metrics
                    .record_reservation_outcome(outcome_label(outcome.order.status));
                let status = create_order_reply_status(outcome.order.status);
                let mut dto = OrderDto::from(outcome.order);
                dto.cached = outcome.cached;
                (status, Json(dto)).into_response()
            }
            Err(e) => service_error_to_response(e),
        }
    }

    async fn handle_get_order(
        State(state): State<AppState<R, OB, C, B>>,
        Path(id): Path<Uuid>,
    ) -> Response {
        match state.service.get_order(id).await {
            Ok(order) => Json(OrderDto::from(order)).into_response(),
            Err(ServiceError::Db(repository::RepositoryError::NotFound)) => {
                error_response(StatusCode::NOT_FOUND, "order not found")
            }
            Err(e) => service_error_to_response(e),
        }
    }

    async fn handle_list_orders(
        State(state): State<AppState<R, OB, C, B>>,
        Query(query): Query<ListOrdersQuery>,
    ) -> Response {
        let status = match query.status.as_deref() {
            None => None,
            Some("pending") => Some(OrderStatus::Pending),
            Some("pending_verification") => Some(OrderStatus::PendingVerification),
            Some("confirmed") => Some(OrderStatus::Confirmed),
            Some("failed") => Some(OrderStatus::Failed),
            Some("cancelled") => Some(OrderStatus::Cancelled),
            Some(other) => {
                return error_response(StatusCode::BAD_REQUEST, format!("unknown status {other:?}"))
            }
        };
        let limit = query.limit.unwrap_or(50).clamp(1, 500);

        match state.service.list_orders(status, limit).await {
            Ok(orders) => {
                let dtos: Vec<OrderDto> = orders.into_iter().map(OrderDto::from).collect();
                Json(dtos).into_response()
            }
            Err(e) => service_error_to_response(e),
        }
    }

    async fn handle_cancel_order(
        State(state): State<AppState<R, OB, C, B>>,
        Path(id): Path<Uuid>,
    ) -> Response {
        match state.service.cancel_order(id).await {
            Ok(order) => Json(OrderDto::from(order)).into_response(),
            Err(ServiceError::Db(repository::RepositoryError::NotFound)) => {
                error_response(StatusCode::NOT_FOUND, "order not found")
            }
            Err(e) => service_error_to_response(e),
        }
    }

    /// The product catalog is an external collaborator out of scope for
    /// this protocol (§1); this is a thin pass-through stub, not a real
    /// proxy implementation.
    async fn handle_products_passthrough() -> Response {
        error_response(StatusCode::NOT_IMPLEMENTED, "product catalog is a separate service")
    }

    async fn handle_health(State(state): State<AppState<R, OB, C, B>>) -> Response {
        let db_ok = db::is_reachable(&state.db_pool).await;
        let bus_ok = state.bus_health.is_connected();
        let healthy = db_ok && bus_ok;

        #[derive(Serialize)]
        struct HealthBody {
            healthy: bool,
            db_reachable: bool,
            bus_connected: bool,
        }

        let body = HealthBody {
            healthy,
            db_reachable: db_ok,
            bus_connected: bus_ok,
        };
        if healthy {
            (StatusCode::OK, Json(body)).into_response()
        } else {
            warn!(db_ok, bus_ok, "health check degraded");
            (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
        }
    }

    async fn handle_metrics(State(state): State<AppState<R, OB, C, B>>) -> Response {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&state.metrics.registry.gather(), &mut buffer) {
            error!(error = %e, "failed to encode metrics");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics");
        }
        match String::from_utf8(buffer) {
            Ok(text) => (StatusCode::OK, text).into_response(),
            Err(e) => {
                error!(error = %e, "metrics buffer was not valid utf-8");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid metrics data")
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_label_covers_every_status() {
        assert_eq!(outcome_label(OrderStatus::Confirmed), "confirmed");
        assert_eq!(outcome_label(OrderStatus::PendingVerification), "pending_verification");
        assert_eq!(outcome_label(OrderStatus::Failed), "failed");
    }

    #[test]
    fn create_order_reply_status_reports_500_for_stuck_pending() {
        assert_eq!(create_order_reply_status(OrderStatus::Confirmed), StatusCode::CREATED);
        assert_eq!(
            create_order_reply_status(OrderStatus::PendingVerification),
            StatusCode::ACCEPTED
        );
        assert_eq!(create_order_reply_status(OrderStatus::Failed), StatusCode::BAD_REQUEST);
        assert_eq!(
            create_order_reply_status(OrderStatus::Pending),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bus_health_starts_disconnected() {
        let health = BusHealth::new();
        assert!(!health.is_connected());
        health.mark_connected();
        assert!(health.is_connected());
    }

    #[test]
    fn order_dto_from_order_preserves_identity() {
        let order = Order::new_pending(
            Uuid::new_v4(),
            "cust-1".into(),
            "SKU-1".into(),
            2,
            None,
            chrono::Utc::now(),
        );
        let order_id = order.order_id;
        let dto = OrderDto::from(order);
        assert_eq!(dto.order_id, order_id);
        assert_eq!(dto.status, OrderStatus::Pending);
    }
}
