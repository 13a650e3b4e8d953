use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::core::time::Clock;
use crate::repositories::claims::{ClaimStore, ClaimStoreError};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_millis(30_000);

const TAB_SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TAB_SUFFIX_LEN: usize = 9;

/// Per-tab identity, unique across concurrent tabs: creation time plus a
/// random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabId(String);

impl TabId {
    pub fn generate(clock: &dyn Clock) -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..TAB_SUFFIX_LEN)
            .map(|_| TAB_SUFFIX_ALPHABET[rng.gen_range(0..TAB_SUFFIX_ALPHABET.len())] as char)
            .collect();
        Self(format!("tab_{}_{}", clock.now_millis(), suffix))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TabId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabState {
    Uninitialized,
    Claiming,
    Active,
    Rejected,
    Released,
}

/// Notifications raised outside of any direct call.
pub trait TabEvents: Send + Sync {
    /// Another tab took the claim while this one believed it was active.
    fn on_session_expired(&self, attempt_id: &str);
    /// The tab came back into view without holding the claim.
    fn on_duplicate_tab(&self, attempt_id: &str);
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    pub heartbeat_interval: Duration,
    pub stale_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL, stale_timeout: DEFAULT_STALE_TIMEOUT }
    }
}

/// Stale cleanup followed by a claim attempt. Shared by tab coordinators and
/// the HTTP claim endpoint.
pub(crate) async fn acquire(
    store: &dyn ClaimStore,
    attempt_id: &str,
    tab_id: &str,
    now_ms: i64,
    stale_timeout: Duration,
) -> Result<bool, ClaimStoreError> {
    if store.is_stale(attempt_id, now_ms, stale_timeout).await? {
        tracing::info!(attempt_id, "Reclaiming stale tab claim");
        store.force_release(attempt_id).await?;
    }

    let granted = store.try_claim(attempt_id, tab_id, now_ms).await?;
    let outcome = if granted { "granted" } else { "rejected" };
    metrics::counter!("tab_claims_total", "outcome" => outcome).increment(1);
    Ok(granted)
}

/// Keeps at most one tab active per attempt.
///
/// Lifecycle: `Uninitialized → Claiming → (Active | Rejected) → Released`.
/// Two tabs racing through `initialize` at the same instant can both win;
/// the loser finds out on its next heartbeat.
pub struct TabCoordinator {
    attempt_id: String,
    tab_id: TabId,
    store: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    config: CoordinatorConfig,
    events: Arc<dyn TabEvents>,
    state: Arc<Mutex<TabState>>,
    heartbeat: Option<JoinHandle<()>>,
}

impl TabCoordinator {
    pub fn new(
        attempt_id: impl Into<String>,
        tab_id: TabId,
        store: Arc<dyn ClaimStore>,
        clock: Arc<dyn Clock>,
        config: CoordinatorConfig,
        events: Arc<dyn TabEvents>,
    ) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            tab_id,
            store,
            clock,
            config,
            events,
            state: Arc::new(Mutex::new(TabState::Uninitialized)),
            heartbeat: None,
        }
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    pub fn state(&self) -> TabState {
        *lock(&self.state)
    }

    pub fn is_active(&self) -> bool {
        self.state() == TabState::Active
    }

    /// `Ok(false)` means another live tab owns the attempt; the caller must not
    /// render the exam.
    pub async fn initialize(&mut self) -> Result<bool, ClaimStoreError> {
        self.stop_heartbeat().await;
        self.set_state(TabState::Claiming);

        let now = self.clock.now_millis();
        let granted = match acquire(
            self.store.as_ref(),
            &self.attempt_id,
            self.tab_id.as_str(),
            now,
            self.config.stale_timeout,
        )
        .await
        {
            Ok(granted) => granted,
            Err(err) => {
                self.set_state(TabState::Uninitialized);
                return Err(err);
            }
        };

        if granted {
            self.set_state(TabState::Active);
            self.spawn_heartbeat();
            tracing::info!(attempt_id = %self.attempt_id, tab_id = %self.tab_id, "Tab claimed attempt");
        } else {
            self.set_state(TabState::Rejected);
            tracing::warn!(
                attempt_id = %self.attempt_id,
                tab_id = %self.tab_id,
                "Attempt is already active in another tab"
            );
        }

        Ok(granted)
    }

    /// Called when the tab becomes visible again. Returns whether this tab
    /// still owns the attempt.
    pub async fn on_visibility_regained(&self) -> Result<bool, ClaimStoreError> {
        let owner = self
            .store
            .read(&self.attempt_id)
            .await?
            .is_some_and(|claim| claim.is_owned_by(self.tab_id.as_str()));

        if !owner {
            tracing::warn!(
                attempt_id = %self.attempt_id,
                tab_id = %self.tab_id,
                "Tab regained focus without holding the attempt"
            );
            self.events.on_duplicate_tab(&self.attempt_id);
        }

        Ok(owner)
    }

    /// Deletes the claim when this tab owns it. Timers are torn down either way.
    pub async fn release_tab(&mut self) -> Result<bool, ClaimStoreError> {
        self.stop_heartbeat().await;
        self.set_state(TabState::Released);

        let released = self.store.release(&self.attempt_id, self.tab_id.as_str()).await?;
        if released {
            tracing::info!(attempt_id = %self.attempt_id, tab_id = %self.tab_id, "Tab released attempt");
        }
        Ok(released)
    }

    /// Deletes the claim regardless of who owns it.
    pub async fn force_release(&mut self) -> Result<(), ClaimStoreError> {
        self.stop_heartbeat().await;
        self.set_state(TabState::Released);

        tracing::warn!(attempt_id = %self.attempt_id, tab_id = %self.tab_id, "Force releasing attempt claim");
        self.store.force_release(&self.attempt_id).await
    }

    fn spawn_heartbeat(&mut self) {
        let attempt_id = self.attempt_id.clone();
        let tab_id = self.tab_id.clone();
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let events = Arc::clone(&self.events);
        let state = Arc::clone(&self.state);
        let period = self.config.heartbeat_interval;

        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if *lock(&state) != TabState::Active {
                    return;
                }

                match store.refresh(&attempt_id, tab_id.as_str(), clock.now_millis()).await {
                    Ok(true) => {
                        tracing::trace!(attempt_id = %attempt_id, tab_id = %tab_id, "Heartbeat");
                    }
                    Ok(false) => {
                        {
                            let mut current = lock(&state);
                            if *current != TabState::Active {
                                return;
                            }
                            *current = TabState::Released;
                        }
                        tracing::warn!(
                            attempt_id = %attempt_id,
                            tab_id = %tab_id,
                            "Attempt was taken over by another tab"
                        );
                        events.on_session_expired(&attempt_id);
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(
                            attempt_id = %attempt_id,
                            tab_id = %tab_id,
                            error = %err,
                            "Heartbeat refresh failed"
                        );
                    }
                }
            }
        }));
    }

    async fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
            let _ = task.await;
        }
    }

    fn set_state(&self, next: TabState) {
        *lock(&self.state) = next;
    }
}

impl Drop for TabCoordinator {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }
}

fn lock(state: &Mutex<TabState>) -> MutexGuard<'_, TabState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
