//! Order Coordinator process: owns the order aggregate, serves the HTTP
//! API (§6), drives the synchronous reservation RPC against the Inventory
//! Custodian, drains its own transactional outbox onto the event bus, and
//! consumes `inventory-events` to apply asynchronous recovery outcomes
//! (§4.5).

use std::sync::Arc;

use anyhow::{Context, Result};
use app_config::OrderCoordinatorConfig;
use bus::KafkaBus;
use events::ORDER_SERVICE_SUBSCRIPTION;
use inventory_grpc::GrpcInventoryClient;
use order_consumer::OrderEventConsumer;
use order_http::{BusHealth, OrderHttpServer};
use order_service::OrderCoordinatorService;
use outbox::OutboxPumper;
use repository::{OutboxRepository, PgOrdersRepository, PgOutboxRepository};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MIGRATIONS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = OrderCoordinatorConfig::load().context("failed to load order coordinator config")?;
    info!(http_port = config.http_port, "starting order coordinator");

    let pool = db::init_db_pool(&config.db_dsn(), MIGRATIONS_DIR)
        .await
        .context("failed to initialize order database pool")?;

    let bus = Arc::new(KafkaBus::new(&config.kafka_brokers).context("failed to create event bus")?);
    bus.start().await.context("failed to connect event bus")?;
    let bus_health = BusHealth::new();
    bus_health.mark_connected();

    let inventory_client = GrpcInventoryClient::connect(config.inventory_service_host.clone())
        .await
        .context("failed to connect to inventory custodian")?;

    let service = Arc::new(OrderCoordinatorService::new(
        pool.clone(),
        PgOrdersRepository::new(),
        PgOutboxRepository::new("outbox"),
        inventory_client,
        bus.clone(),
        config.reservation_rpc_deadline,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let pumper = OutboxPumper::new(
        pool.clone(),
        Arc::new(PgOutboxRepository::new("outbox")) as Arc<dyn OutboxRepository>,
        bus.clone(),
        config.outbox_poll_interval,
    );
    let pumper_shutdown = shutdown_rx.clone();
    let pumper_task = tokio::spawn(async move { pumper.run(pumper_shutdown).await });

    let event_consumer = OrderEventConsumer::new(
        bus.topic_consumer(events::topics::INVENTORY_EVENTS, ORDER_SERVICE_SUBSCRIPTION)
            .context("failed to open inventory-events consumer")?,
        service.clone(),
    );
    let consumer_shutdown = shutdown_rx.clone();
    let consumer_task = tokio::spawn(async move { event_consumer.run(consumer_shutdown).await });

    let http_server = OrderHttpServer::new(
        config.http_port.to_string(),
        service,
        pool,
        bus_health,
    );

    let result = http_server.start().await;

    info!("shutting down background tasks");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(pumper_task, consumer_task);
    bus.stop().await;

    if let Err(e) = &result {
        error!(error = %e, "order coordinator HTTP server exited with an error");
    }
    result
}
