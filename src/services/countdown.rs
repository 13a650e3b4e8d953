use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

const TICK_PERIOD: Duration = Duration::from_secs(1);

/// Decrement logic that tracks its own previous value instead of trusting
/// whatever the caller last rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining: u64,
}

impl Countdown {
    /// Returns `None` when there is nothing left to count down.
    pub fn new(time_remaining: i64) -> Option<Self> {
        (time_remaining > 0).then_some(Self { remaining: time_remaining as u64 })
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn step(&mut self) -> u64 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }
}

/// One-second countdown on the tokio runtime.
///
/// Every `start`/`restart` tears down the previous countdown first. A
/// generation counter is checked under a lock right before each callback, so
/// once `stop` returns no callback from an older generation can run. Callbacks
/// must not call back into the same engine.
pub struct TimerEngine {
    generation: Arc<Mutex<u64>>,
    task: Option<JoinHandle<()>>,
}

impl Default for TimerEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerEngine {
    pub fn new() -> Self {
        Self { generation: Arc::new(Mutex::new(0)), task: None }
    }

    pub fn start<T, E>(&mut self, time_remaining: i64, on_tick: T, on_expired: E)
    where
        T: Fn(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        self.stop();
        let current = self.bump_generation();

        let Some(mut countdown) = Countdown::new(time_remaining) else {
            tracing::debug!(time_remaining, "Countdown started with no time left");
            on_expired();
            return;
        };

        let generation = Arc::clone(&self.generation);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + TICK_PERIOD, TICK_PERIOD);
            let mut on_expired = Some(on_expired);

            loop {
                ticker.tick().await;

                let guard = lock(&generation);
                if *guard != current {
                    return;
                }

                let value = countdown.step();
                on_tick(value);

                if value == 0 {
                    if let Some(on_expired) = on_expired.take() {
                        on_expired();
                    }
                    drop(guard);
                    return;
                }
            }
        }));
    }

    /// Same as `start`; exists so call sites read as a resync.
    pub fn restart<T, E>(&mut self, time_remaining: i64, on_tick: T, on_expired: E)
    where
        T: Fn(u64) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        self.start(time_remaining, on_tick, on_expired);
    }

    pub fn stop(&mut self) {
        self.bump_generation();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn bump_generation(&mut self) -> u64 {
        let next = {
            let mut guard = lock(&self.generation);
            *guard += 1;
            *guard
        };

        if let Some(task) = self.task.take() {
            task.abort();
        }

        next
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(generation: &Mutex<u64>) -> MutexGuard<'_, u64> {
    generation.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
