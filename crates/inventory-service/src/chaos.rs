//! Chaos-injection knobs the original system calls "Gremlin" and
//! "Schrödinger" mode (§9 glossary). Both are read only by the Inventory
//! Custodian and only ever active outside `release` builds — a test
//! harness flips them on to force the coordinator's deadline/transport
//! failure paths deterministically (§8 scenarios 3 and 4).

use rand::Rng;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChaosConfig {
    pub gremlin_mode: bool,
    pub gremlin_min_delay_ms: u64,
    pub gremlin_max_delay_ms: u64,
    pub schrodinger_mode: bool,
    pub schrodinger_crash_probability: f64,
}

impl ChaosConfig {
    /// Sleeps for a random duration in `[min, max]` ms if Gremlin mode is
    /// on, simulating the injected latency that forces the coordinator's
    /// 2 s deadline to be exceeded.
    pub async fn maybe_inject_latency(&self) {
        if !self.gremlin_mode {
            return;
        }
        let delay_ms = if self.gremlin_max_delay_ms > self.gremlin_min_delay_ms {
            rand::thread_rng().gen_range(self.gremlin_min_delay_ms..=self.gremlin_max_delay_ms)
        } else {
            self.gremlin_min_delay_ms
        };
        warn!(delay_ms, "gremlin mode: injecting reserveStock latency");
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
    }

    /// True if, under Schrödinger mode, this call should simulate a crash
    /// after the reserving transaction has already committed.
    pub fn should_crash_after_commit(&self) -> bool {
        self.schrodinger_mode
            && rand::thread_rng().gen_bool(self.schrodinger_crash_probability.clamp(0.0, 1.0))
    }
}
