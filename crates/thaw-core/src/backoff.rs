use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fixed-delay retry policy for transient restore failures.
///
/// Attempt numbers are 1-based; `max_attempts` counts the first try.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), delay }
    }

    /// Delay before the attempt after `attempt`, or `None` once attempts are exhausted.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            None
        } else {
            Some(self.delay)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(30))
    }
}

/// Time source for everything that waits or stamps records.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
    fn sleep(&self, d: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or_default()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d)
    }
}

/// Test clock: `sleep` advances time instantly and is recorded.
#[derive(Debug, Default)]
pub struct ManualClock {
    inner: Mutex<ManualInner>,
}

#[derive(Debug, Default)]
struct ManualInner {
    now: i64,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn at(now_unix: i64) -> Self {
        Self { inner: Mutex::new(ManualInner { now: now_unix, sleeps: vec![] }) }
    }

    pub fn advance(&self, d: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.now += d.as_secs() as i64;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().unwrap().sleeps.clone()
    }
}

impl Clock for ManualClock {
    fn now_unix(&self) -> i64 {
        self.inner.lock().unwrap().now
    }

    fn sleep(&self, d: Duration) {
        let mut inner = self.inner.lock().unwrap();
        inner.now += d.as_secs() as i64;
        inner.sleeps.push(d);
    }
}
