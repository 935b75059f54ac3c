//! Environment-driven configuration for both processes in the reservation
//! protocol. Each binary loads its own config type; the two share field
//! names and loading style but use different environment prefixes for the
//! database so the two processes' settings never collide when running on
//! the same host (§6).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::Error;
    let val = String::deserialize(deserializer)?;
    humantime::parse_duration(&val).map_err(|e| D::Error::custom(format!("Invalid duration '{val}': {e}")))
}

/// Configuration for the `order-coordinator-app` binary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OrderCoordinatorConfig {
    // --- Database (Order DB) ---
    pub order_db_host: String,
    pub order_db_port: u16,
    pub order_db_user: String,
    pub order_db_password: String,
    pub order_db_name: String,

    // --- Event bus ---
    pub kafka_brokers: Vec<String>,

    // --- HTTP server ---
    pub http_port: u16,

    // --- Inventory gRPC client ---
    /// e.g. `http://inventory:50051` — the coordinator's gRPC target.
    pub inventory_service_host: String,
    #[serde(deserialize_with = "deserialize_duration")]
    pub reservation_rpc_deadline: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub health_probe_deadline: Duration,

    // --- Shutdown ---
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,

    // --- Outbox pumper ---
    #[serde(deserialize_with = "deserialize_duration")]
    pub outbox_poll_interval: Duration,
}

impl OrderCoordinatorConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("order_db_host", "localhost")?
            .set_default("order_db_port", 5432)?
            .set_default("order_db_user", "order_user")?
            .set_default("order_db_password", "securepassword")?
            .set_default("order_db_name", "order_db")?
            .set_default("kafka_brokers", vec!["localhost:9092"])?
            .set_default("http_port", 8081)?
            .set_default("inventory_service_host", "http://localhost:50051")?
            .set_default("reservation_rpc_deadline", "2s")?
            .set_default("health_probe_deadline", "1s")?
            .set_default("shutdown_timeout", "5s")?
            .set_default("outbox_poll_interval", "200ms")?
            .add_source(config::Environment::default().separator("_"))
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load order coordinator configuration")
    }

    pub fn db_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.order_db_host, self.order_db_port, self.order_db_user, self.order_db_password, self.order_db_name
        )
    }
}

/// Configuration for the `inventory-custodian-app` binary.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct InventoryCustodianConfig {
    // --- Database (Inventory DB) ---
    pub inventory_db_host: String,
    pub inventory_db_port: u16,
    pub inventory_db_user: String,
    pub inventory_db_password: String,
    pub inventory_db_name: String,

    // --- Event bus ---
    pub kafka_brokers: Vec<String>,

    // --- gRPC server ---
    pub grpc_port: u16,

    // --- Shutdown ---
    #[serde(deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,

    // --- Outbox pumper ---
    #[serde(deserialize_with = "deserialize_duration")]
    pub outbox_poll_interval: Duration,

    // --- Chaos toggles (never active outside test/dev builds — §9) ---
    pub gremlin_mode: bool,
    pub gremlin_min_delay_ms: u64,
    pub gremlin_max_delay_ms: u64,
    pub schrodinger_mode: bool,
    pub schrodinger_crash_probability: f64,
}

impl InventoryCustodianConfig {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("inventory_db_host", "localhost")?
            .set_default("inventory_db_port", 5432)?
            .set_default("inventory_db_user", "inventory_user")?
            .set_default("inventory_db_password", "securepassword")?
            .set_default("inventory_db_name", "inventory_db")?
            .set_default("kafka_brokers", vec!["localhost:9092"])?
            .set_default("grpc_port", 50051)?
            .set_default("shutdown_timeout", "5s")?
            .set_default("outbox_poll_interval", "200ms")?
            .set_default("gremlin_mode", false)?
            .set_default("gremlin_min_delay_ms", 0)?
            .set_default("gremlin_max_delay_ms", 0)?
            .set_default("schrodinger_mode", false)?
            .set_default("schrodinger_crash_probability", 0.0)?
            .add_source(config::Environment::default().separator("_"))
            .build()?;

        settings
            .try_deserialize()
            .context("Failed to load inventory custodian configuration")
    }

    pub fn db_dsn(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={} sslmode=disable",
            self.inventory_db_host,
            self.inventory_db_port,
            self.inventory_db_user,
            self.inventory_db_password,
            self.inventory_db_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_coordinator_defaults_are_local_dev_friendly() {
        // SAFETY: tests run single-threaded per process for env manipulation in this crate.
        let cfg = OrderCoordinatorConfig::load().unwrap();
        assert_eq!(cfg.order_db_host, "localhost");
        assert_eq!(cfg.reservation_rpc_deadline, Duration::from_secs(2));
        assert_eq!(cfg.health_probe_deadline, Duration::from_secs(1));
    }

    #[test]
    fn inventory_custodian_defaults_disable_chaos_toggles() {
        let cfg = InventoryCustodianConfig::load().unwrap();
        assert!(!cfg.gremlin_mode);
        assert!(!cfg.schrodinger_mode);
        assert_eq!(cfg.schrodinger_crash_probability, 0.0);
    }
}
