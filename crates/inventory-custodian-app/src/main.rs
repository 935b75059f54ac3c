//! Inventory Custodian process: owns the product/reservation/audit
//! aggregates, serves the synchronous reservation gRPC API (§6), drains
//! its own transactional outbox, and consumes the `verify-orders` queue
//! to resolve orders left in `pending_verification` (§4.3).

use std::sync::Arc;

use anyhow::{Context, Result};
use app_config::InventoryCustodianConfig;
use bus::KafkaBus;
use inventory_grpc::proto::inventory_service_server::InventoryServiceServer;
use inventory_grpc::InventoryGrpcServer;
use inventory_service::{ChaosConfig, InventoryCustodianService};
use inventory_verify_consumer::VerifyOrderConsumer;
use outbox::OutboxPumper;
use repository::{
    OutboxRepository, PgOutboxRepository, PgProductsRepository, PgReservationsRepository,
    PgStockAuditRepository,
};
use tonic::transport::Server as TonicServer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MIGRATIONS_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/migrations");
const VERIFY_CONSUMER_GROUP: &str = "inventory-verify-workers";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = InventoryCustodianConfig::load().context("failed to load inventory custodian config")?;
    info!(grpc_port = config.grpc_port, "starting inventory custodian");

    let pool = db::init_db_pool(&config.db_dsn(), MIGRATIONS_DIR)
        .await
        .context("failed to initialize inventory database pool")?;

    let bus = Arc::new(KafkaBus::new(&config.kafka_brokers).context("failed to create event bus")?);
    bus.start().await.context("failed to connect event bus")?;

    let chaos = ChaosConfig {
        gremlin_mode: config.gremlin_mode,
        gremlin_min_delay_ms: config.gremlin_min_delay_ms,
        gremlin_max_delay_ms: config.gremlin_max_delay_ms,
        schrodinger_mode: config.schrodinger_mode,
        schrodinger_crash_probability: config.schrodinger_crash_probability,
    };
    if chaos.gremlin_mode || chaos.schrodinger_mode {
        tracing::warn!(?chaos, "chaos injection is enabled on this process");
    }

    let service = Arc::new(InventoryCustodianService::new(
        pool.clone(),
        PgProductsRepository::new(),
        PgReservationsRepository::new(),
        PgStockAuditRepository::new(),
        PgOutboxRepository::new("inventory_outbox"),
        chaos,
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let pumper = OutboxPumper::new(
        pool.clone(),
        Arc::new(PgOutboxRepository::new("inventory_outbox")) as Arc<dyn OutboxRepository>,
        bus.clone(),
        config.outbox_poll_interval,
    );
    let pumper_shutdown = shutdown_rx.clone();
    let pumper_task = tokio::spawn(async move { pumper.run(pumper_shutdown).await });

    let verify_consumer = VerifyOrderConsumer::new(
        bus.queue_consumer(events::queues::VERIFY_ORDERS, VERIFY_CONSUMER_GROUP)
            .context("failed to open verify-orders consumer")?,
        service.clone(),
    );
    let verify_shutdown = shutdown_rx.clone();
    let verify_task = tokio::spawn(async move { verify_consumer.run(verify_shutdown).await });

    let addr = format!("0.0.0.0:{}", config.grpc_port)
        .parse()
        .context("invalid gRPC bind address")?;
    let grpc_server = InventoryGrpcServer::new(service);

    info!(%addr, "inventory custodian gRPC server listening");
    let result = TonicServer::builder()
        .add_service(InventoryServiceServer::new(grpc_server))
        .serve_with_shutdown(addr, shutdown_signal())
        .await
        .context("inventory custodian gRPC server error");

    info!("shutting down background tasks");
    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(pumper_task, verify_task);
    bus.stop().await;

    if let Err(e) = &result {
        error!(error = %e, "inventory custodian gRPC server exited with an error");
    }
    result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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
