use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Wall-clock source in unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        now_millis()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self { millis: AtomicI64::new(start_millis) }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

pub(crate) fn format_millis(millis: i64) -> String {
    match OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000) {
        Ok(value) => value.format(&Rfc3339).unwrap_or_else(|_| value.to_string()),
        Err(_) => millis.to_string(),
    }
}
