use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};
use types::{RateLimitConfig, RateLimitDecision, RateLimiter, StoreError};

struct WindowCounter {
    window: u64,
    count: u32,
}

/// Fixed-window counter per tenant. Windows are aligned to the limiter's
/// creation instant.
pub struct FixedWindowRateLimiter {
    max_requests: u32,
    window: Duration,
    origin: Instant,
    counters: Mutex<HashMap<String, WindowCounter>>,
}

impl FixedWindowRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window: window.max(Duration::from_millis(1)),
            origin: Instant::now(),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, Duration::from_secs(config.window_secs))
    }

    fn current_window(&self, now: Instant) -> (u64, Duration) {
        let elapsed = now.duration_since(self.origin);
        let window_nanos = self.window.as_nanos();
        let index = elapsed.as_nanos() / window_nanos;
        let window_end = Duration::from_nanos(((index + 1) * window_nanos) as u64);
        (index as u64, window_end.saturating_sub(elapsed))
    }
}

#[async_trait]
impl RateLimiter for FixedWindowRateLimiter {
    async fn check_and_increment(&self, tenant_id: &str) -> Result<RateLimitDecision, StoreError> {
        let (window, remaining) = self.current_window(Instant::now());
        let mut counters = self.counters.lock().await;
        let counter = counters
            .entry(format!("rl:{tenant_id}"))
            .or_insert(WindowCounter { window, count: 0 });
        if counter.window != window {
            counter.window = window;
            counter.count = 0;
        }
        counter.count = counter.count.saturating_add(1);

        if counter.count > self.max_requests {
            tracing::info!(
                tenant_id,
                count = counter.count,
                limit = self.max_requests,
                "tenant over rate limit"
            );
            // Round up so callers never retry inside the same window.
            let retry_after = Duration::from_secs(remaining.as_secs_f64().ceil() as u64);
            return Ok(RateLimitDecision::deny(retry_after));
        }
        Ok(RateLimitDecision::allow())
    }
}
