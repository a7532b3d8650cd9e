use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tokio::time::Instant;

pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1100);

#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic time, used for call spacing.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for cache freshness.
    fn utc_now(&self) -> OffsetDateTime;

    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when told to. `sleep` returns immediately after
/// advancing time and records the requested wait.
pub struct ManualClock {
    start: Instant,
    offset: parking_lot::Mutex<Duration>,
    wall_start: OffsetDateTime,
    sleeps: parking_lot::Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(wall_start: OffsetDateTime) -> Self {
        Self {
            start: Instant::now(),
            offset: parking_lot::Mutex::new(Duration::ZERO),
            wall_start,
            sleeps: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock()
    }

    fn utc_now(&self) -> OffsetDateTime {
        self.wall_start + *self.offset.lock()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

pub struct RateGate {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
    last_call: Mutex<Option<Instant>>,
}

impl RateGate {
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            clock,
            last_call: Mutex::new(None),
        }
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self::new(min_interval, Arc::new(TokioClock))
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until `min_interval` has passed since the previous acquire
    /// started. The lock is held across the wait so callers queue in order.
    pub async fn acquire(&self) {
        let mut last_call = self.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = self.clock.now().saturating_duration_since(last);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::trace!(wait_ms = wait.as_millis() as u64, "rate gate waiting");
                self.clock.sleep(wait).await;
            }
        }
        *last_call = Some(self.clock.now());
    }
}

impl Default for RateGate {
    fn default() -> Self {
        Self::with_interval(DEFAULT_MIN_INTERVAL)
    }
}
