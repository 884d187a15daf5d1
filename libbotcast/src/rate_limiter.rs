//! Rate limiting for outbound calls
//!
//! Enforces a minimum spacing between calls that share an operation key.
//! A limit of `max_per_hour` calls means consecutive calls are at least
//! `3600 / max_per_hour` seconds apart; a caller arriving early sleeps until
//! its slot.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Source of time for the rate limiter and the orchestrator's naps
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by tokio's timer
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when slept on or advanced by hand
///
/// Sleeping returns immediately after moving the clock forward, so tests can
/// exercise hour-long waits instantly.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
    }

    /// Every duration passed to `sleep`, in order
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap_or_default())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(duration);
        self.advance(duration);
    }
}

/// Per-operation call spacing
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    /// Earliest start granted to the most recent caller of each key
    last_called: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_called: Mutex::new(HashMap::new()),
        }
    }

    /// Rate limiter on the wall clock
    pub fn system() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Build an operation key from a function name and extra discriminators
    pub fn key(operation: &str, discriminators: &[&str]) -> String {
        let mut key = operation.to_string();
        for part in discriminators {
            key.push_str(part);
        }
        key
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Wait until `key` may be called again, then claim the slot
    ///
    /// Returns how long the caller slept. The first call for a key never
    /// waits. A limit of zero disables limiting for the call.
    pub async fn acquire(&self, key: &str, max_per_hour: u32) -> Duration {
        if max_per_hour == 0 {
            debug!("No rate limit configured for '{}'", key);
            return Duration::ZERO;
        }

        let min_interval = chrono::Duration::milliseconds(3_600_000 / i64::from(max_per_hour));

        // Reserve the slot under the lock, sleep outside it.
        let wait = {
            let mut last_called = self
                .last_called
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let now = self.clock.now();

            let wait = match last_called.get(key) {
                Some(last) => {
                    debug!("Rate limiter last called for '{}' at {}", key, last);
                    let remaining = min_interval - (now - *last);
                    if remaining > chrono::Duration::zero() {
                        let millis = remaining.num_milliseconds() as u64;
                        Duration::from_secs(millis.div_ceil(1000))
                    } else {
                        Duration::ZERO
                    }
                }
                None => {
                    debug!("Initializing rate limiter entry for '{}'", key);
                    Duration::ZERO
                }
            };

            let slot = now + chrono::Duration::from_std(wait).unwrap_or(chrono::Duration::zero());
            last_called.insert(key.to_string(), slot);
            wait
        };

        if !wait.is_zero() {
            info!(
                "Self-enforced rate limit hit for '{}', sleeping {} seconds",
                key,
                wait.as_secs()
            );
            self.clock.sleep(wait).await;
        }

        wait
    }

    /// Run `operation` once its rate-limit slot is free
    pub async fn run<F, T>(&self, key: &str, max_per_hour: u32, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        self.acquire(key, max_per_hour).await;
        operation.await
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}
