use std::time::Duration;

use rand::Rng;
use types::{DelayRange, LatencyConfig};

/// Injects artificial delays at the points a real voice pipeline would
/// stall. Every method is a no-op when disabled.
#[derive(Debug, Clone)]
pub struct LatencySimulator {
    config: LatencyConfig,
}

impl LatencySimulator {
    pub fn new(config: LatencyConfig) -> Self {
        Self { config }
    }

    pub fn disabled() -> Self {
        Self::new(LatencyConfig {
            enabled: false,
            ..LatencyConfig::default()
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn stt_delay(&self) {
        self.sleep_in(self.config.stt).await;
    }

    /// Scales with the amount of text synthesized.
    pub async fn tts_delay(&self, chars: usize) {
        if !self.config.enabled {
            return;
        }
        let base = ((chars as f64) * 0.8).ceil().clamp(10.0, 60.0) as u64;
        self.sleep_in(DelayRange::new(base.saturating_sub(10), base + 10))
            .await;
    }

    pub async fn token_delay(&self) {
        self.sleep_in(self.config.token).await;
    }

    pub async fn tool_delay(&self) {
        self.sleep_in(self.config.tool).await;
    }

    pub async fn network_jitter(&self) {
        if !self.config.enabled {
            return;
        }
        let hit = rand::thread_rng().gen_bool(self.config.jitter_probability.clamp(0.0, 1.0));
        if hit {
            self.sleep_in(self.config.jitter).await;
        }
    }

    async fn sleep_in(&self, range: DelayRange) {
        if !self.config.enabled {
            return;
        }
        let millis = if range.max_ms > range.min_ms {
            rand::thread_rng().gen_range(range.min_ms..=range.max_ms)
        } else {
            range.min_ms
        };
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}
