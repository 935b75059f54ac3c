//! Connection-pool initialization and migration runner shared by both
//! processes. Each binary calls `init_db_pool` with its own DSN and
//! migrations directory — the Order Coordinator and the Inventory
//! Custodian each own a separate Postgres database.

use anyhow::{Context, Result};
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime, Timeouts};
use std::time::Duration;
use tokio::fs;
use tokio_postgres::{Client, Config as PgConfig, NoTls};
use tracing::info;

/// Pool sizing and deadlines per §5: 20 connections, 5 s acquire timeout,
/// 30 s idle timeout.
fn pool_config() -> PoolConfig {
    PoolConfig {
        max_size: 20,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(5)),
            create: Some(Duration::from_secs(5)),
            recycle: Some(Duration::from_secs(30)),
        },
        ..Default::default()
    }
}

/// Initializes the database connection pool for one service and runs its
/// SQL migrations from `migrations_dir`.
///
/// # Errors
/// Returns an error if the pool cannot be created or migrations fail.
pub async fn init_db_pool(dsn: &str, migrations_dir: &str) -> Result<Pool> {
    let pg_config: PgConfig = dsn.parse().context("Failed to parse Postgres DSN")?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .config(pool_config())
        .runtime(Runtime::Tokio1)
        .build()
        .context("Failed to create database pool")?;

    let max_retries = 5;
    let mut retry_count = 0;
    let mut last_error = None;

    while retry_count < max_retries {
        match pool.get().await {
            Ok(client) => {
                info!(
                    "Successfully connected to database after {} retries",
                    retry_count
                );
                if tokio::fs::metadata(migrations_dir).await.is_ok() {
                    info!(migrations_dir, "Applying migrations");
                    run_migrations(&client, migrations_dir).await?;
                } else {
                    info!(migrations_dir, "No migrations directory found, skipping");
                }
                return Ok(pool);
            }
            Err(e) => {
                retry_count += 1;
                last_error = Some(e);
                info!(
                    "Failed to connect to database (attempt {}/{}), retrying in 1 second...",
                    retry_count, max_retries
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    Err(anyhow::anyhow!(
        "Failed to get DB connection after {} retries: {:?}",
        max_retries,
        last_error.unwrap()
    ))
}

/// Applies all `.sql` migration files from `migrations_dir`, in filename
/// order, to the provided database client.
pub async fn run_migrations(client: &Client, migrations_dir: &str) -> Result<()> {
    let mut entries = fs::read_dir(migrations_dir)
        .await
        .context("Failed to read migrations directory")?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    for path in files {
        let file_name = path.file_name().unwrap().to_string_lossy().to_string();
        info!("Applying migration: {}", file_name);
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read migration file {file_name}"))?;

        client
            .batch_execute(&content)
            .await
            .with_context(|| format!("Failed to execute migration {file_name}"))?;
    }
    Ok(())
}

/// A cheap liveness check for `/health`: `SELECT 1` against the pool.
pub async fn is_reachable(pool: &deadpool_postgres::Pool) -> bool {
    match pool.get().await {
        Ok(client) => client.query_one("SELECT 1", &[]).await.is_ok(),
        Err(_) => false,
    }
}
