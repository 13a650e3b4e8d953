use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

use crate::attempt::{reduce, AttemptAction, AttemptState, AttemptStatus, ExamDetails};
use crate::core::config::Settings;
use crate::core::time::Clock;
use crate::repositories::claims::{ClaimStore, ClaimStoreError};
use crate::schemas::attempt::{AttemptResult, SaveAnswerRequest};
use crate::services::attempt_gateway::{AttemptApi, GatewayError};
use crate::services::countdown::TimerEngine;
use crate::services::security_monitor::{
    DeviceProfile, HostSignal, SecurityConfig, SecurityHandler, SecurityMonitor, SecurityViolation,
    SignalResponse,
};
use crate::services::tab_coordinator::{CoordinatorConfig, TabCoordinator, TabEvents, TabId};

pub const DEFAULT_TIME_SYNC_INTERVAL: Duration = Duration::from_secs(30);

const ACTIVE_ELSEWHERE_MESSAGE: &str = "This exam is now active in another tab";

/// Everything that can happen to a running attempt without the caller asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Tick(u64),
    Expired,
    /// Another tab took over the claim.
    SessionExpired,
    DuplicateTab,
    Violation(SecurityViolation),
    MaxViolationsReached,
    SyncDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    Entered,
    /// Another live tab owns the attempt. Nothing should be rendered.
    ActiveElsewhere,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("Tab coordination failed: {0}")]
    Claim(#[from] ClaimStoreError),
    #[error("A submission is already in progress")]
    SubmitInProgress,
    #[error("Attempt has already been submitted")]
    AlreadySubmitted,
    #[error("No active attempt")]
    NoActiveAttempt,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub coordinator: CoordinatorConfig,
    pub security: SecurityConfig,
    pub time_sync_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            security: SecurityConfig::default(),
            time_sync_interval: DEFAULT_TIME_SYNC_INTERVAL,
        }
    }
}

impl SessionConfig {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        let session = settings.session();
        Self {
            coordinator: CoordinatorConfig {
                heartbeat_interval: session.heartbeat_interval(),
                stale_timeout: session.stale_timeout(),
            },
            security: SecurityConfig {
                max_violations: session.max_violations,
                tab_switch_throttle: session.tab_switch_throttle(),
            },
            time_sync_interval: session.time_sync_interval(),
        }
    }
}

#[derive(Clone)]
struct EventSink(mpsc::UnboundedSender<SessionEvent>);

impl EventSink {
    fn emit(&self, event: SessionEvent) {
        // The receiver lives as long as the session.
        let _ = self.0.send(event);
    }
}

impl TabEvents for EventSink {
    fn on_session_expired(&self, _attempt_id: &str) {
        self.emit(SessionEvent::SessionExpired);
    }

    fn on_duplicate_tab(&self, _attempt_id: &str) {
        self.emit(SessionEvent::DuplicateTab);
    }
}

impl SecurityHandler for EventSink {
    fn on_violation(&self, violation: &SecurityViolation) {
        self.emit(SessionEvent::Violation(violation.clone()));
    }

    fn on_max_violations_reached(&self) {
        self.emit(SessionEvent::MaxViolationsReached);
    }
}

/// Drives one tab's exam attempt: claims the tab, runs the countdown and the
/// security monitor, and keeps the remote backend in sync.
///
/// Background sources (timer, heartbeat, monitor, sync ticker) only enqueue
/// [`SessionEvent`]s; the caller applies them by awaiting [`Self::next_event`].
pub struct AttemptSession {
    api: Arc<dyn AttemptApi>,
    store: Arc<dyn ClaimStore>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
    tab_id: TabId,
    state: AttemptState,
    coordinator: Option<TabCoordinator>,
    timer: TimerEngine,
    monitor: SecurityMonitor,
    sync_task: Option<JoinHandle<()>>,
    sink: EventSink,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    pending: VecDeque<SessionEvent>,
    question_shown_at_ms: i64,
}

impl AttemptSession {
    pub fn new(
        api: Arc<dyn AttemptApi>,
        store: Arc<dyn ClaimStore>,
        clock: Arc<dyn Clock>,
        device: DeviceProfile,
        config: SessionConfig,
    ) -> Self {
        let (sender, events) = mpsc::unbounded_channel();
        let sink = EventSink(sender);
        let monitor =
            SecurityMonitor::new(config.security, device, Arc::clone(&clock), Arc::new(sink.clone()));
        let tab_id = TabId::generate(clock.as_ref());

        Self {
            api,
            store,
            clock,
            config,
            tab_id,
            state: AttemptState::default(),
            coordinator: None,
            timer: TimerEngine::new(),
            monitor,
            sync_task: None,
            sink,
            events,
            pending: VecDeque::new(),
            question_shown_at_ms: 0,
        }
    }

    pub fn state(&self) -> &AttemptState {
        &self.state
    }

    pub fn tab_id(&self) -> &TabId {
        &self.tab_id
    }

    pub fn violation_count(&self) -> u32 {
        self.monitor.violation_count()
    }

    pub fn holds_claim(&self) -> bool {
        self.coordinator.as_ref().is_some_and(TabCoordinator::is_active)
    }

    /// Fetches the exam's rules and access flags before an attempt starts.
    pub async fn load_rules(&mut self, exam_id: &str) -> Result<ExamDetails, SessionError> {
        let details = self.api.rules(exam_id).await?;
        self.dispatch(AttemptAction::SetExamDetails(details.clone()));
        Ok(details)
    }

    /// Starts (or resumes) an attempt and claims this tab for it.
    pub async fn enter(&mut self, exam_id: &str) -> Result<EntryOutcome, SessionError> {
        self.teardown().await;
        self.discard_events();
        self.dispatch(AttemptAction::Cleanup);
        self.dispatch(AttemptAction::SetLoading(true));

        let started = match self.api.start(exam_id).await {
            Ok(started) => started,
            Err(err) => return Err(self.abort_entry(err.into()).await),
        };
        let attempt_id = started.attempt_id;

        let mut coordinator = TabCoordinator::new(
            attempt_id.clone(),
            self.tab_id.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.coordinator,
            Arc::new(self.sink.clone()),
        );
        match coordinator.initialize().await {
            Ok(true) => self.coordinator = Some(coordinator),
            Ok(false) => {
                self.dispatch(AttemptAction::SetLoading(false));
                return Ok(EntryOutcome::ActiveElsewhere);
            }
            Err(err) => return Err(self.abort_entry(err.into()).await),
        }

        let snapshot = match self.api.status(&attempt_id).await {
            Ok(snapshot) => snapshot,
            Err(err) => return Err(self.abort_entry(err.into()).await),
        };
        let questions = match self.api.questions(&attempt_id).await {
            Ok(questions) => questions,
            Err(err) => return Err(self.abort_entry(err.into()).await),
        };

        let resume_index = snapshot
            .current_question_index
            .unwrap_or(0)
            .min(questions.len().saturating_sub(1));

        self.dispatch(AttemptAction::StartAttempt {
            attempt_id: attempt_id.clone(),
            time_remaining: snapshot.time_remaining,
        });
        self.dispatch(AttemptAction::SetQuestions(questions));
        self.dispatch(AttemptAction::NavigateTo(resume_index));
        self.dispatch(AttemptAction::SetLoading(false));
        self.question_shown_at_ms = self.clock.now_millis();

        self.start_timer(snapshot.time_remaining);
        self.monitor.start();
        self.spawn_sync_ticker();

        tracing::info!(
            attempt_id = %attempt_id,
            tab_id = %self.tab_id,
            time_remaining = snapshot.time_remaining,
            "Attempt session entered"
        );
        Ok(EntryOutcome::Entered)
    }

    pub fn navigate(&mut self, index: usize) {
        let last = self.state.questions.len().saturating_sub(1);
        self.dispatch(AttemptAction::NavigateTo(index.min(last)));
        self.question_shown_at_ms = self.clock.now_millis();
    }

    /// Records the answer locally, then saves it remotely. A failed save is
    /// recorded in `error` but does not fail the call.
    pub async fn answer(
        &mut self,
        question_id: &str,
        selected_option: Option<String>,
    ) -> Result<(), SessionError> {
        let attempt_id = self.running_attempt()?;

        self.dispatch(AttemptAction::SaveAnswer {
            question_id: question_id.to_string(),
            selected_option: selected_option.clone(),
        });

        let elapsed_ms = (self.clock.now_millis() - self.question_shown_at_ms).max(0);
        let request = SaveAnswerRequest { selected_option, response_time: (elapsed_ms / 1000) as u64 };

        if let Err(err) = self.api.save_answer(&attempt_id, question_id, &request).await {
            tracing::warn!(
                attempt_id = %attempt_id,
                question_id,
                error = %err,
                "Failed to save answer"
            );
            self.dispatch(AttemptAction::SetError(err.to_string()));
        }

        Ok(())
    }

    /// Used for voluntary submission and for the forced one after too many
    /// violations.
    pub async fn submit(&mut self) -> Result<(), SessionError> {
        if self.state.submitting {
            return Err(SessionError::SubmitInProgress);
        }
        let attempt_id = self.state.attempt_id.clone().ok_or(SessionError::NoActiveAttempt)?;
        if self.state.status == AttemptStatus::Completed {
            return Err(SessionError::AlreadySubmitted);
        }

        self.dispatch(AttemptAction::SetSubmitting(true));

        match self.api.submit(&attempt_id).await {
            Ok(()) => {
                // A countdown that reached zero while the request was in flight
                // decides the final status.
                self.apply_queued_timer_events();
                self.dispatch(AttemptAction::Completed);
                metrics::counter!("attempt_submissions_total", "status" => self.state.status.as_str())
                    .increment(1);
                tracing::info!(
                    attempt_id = %attempt_id,
                    status = self.state.status.as_str(),
                    "Attempt submitted"
                );
                self.teardown().await;
                Ok(())
            }
            Err(err) => {
                metrics::counter!("attempt_submissions_total", "status" => "failed").increment(1);
                tracing::error!(attempt_id = %attempt_id, error = %err, "Failed to submit attempt");
                self.dispatch(AttemptAction::SetError(err.to_string()));
                Err(err.into())
            }
        }
    }

    /// Pushes the locally tracked remaining time to the backend.
    pub async fn sync_time(&mut self) -> Result<(), SessionError> {
        let attempt_id = self.running_attempt()?;
        let remaining = self.state.time_remaining_seconds;

        self.api.update_time(&attempt_id, remaining).await.map_err(|err| {
            tracing::warn!(attempt_id = %attempt_id, error = %err, "Failed to sync remaining time");
            SessionError::from(err)
        })
    }

    /// Replaces the local countdown with the backend's value.
    pub async fn resync_from_server(&mut self) -> Result<(), SessionError> {
        let attempt_id = self.running_attempt()?;
        let snapshot = self.api.status(&attempt_id).await?;

        self.discard_timer_events();
        self.dispatch(AttemptAction::Tick(snapshot.time_remaining));
        self.start_timer(snapshot.time_remaining);

        tracing::debug!(
            attempt_id = %attempt_id,
            time_remaining = snapshot.time_remaining,
            "Resynced remaining time"
        );
        Ok(())
    }

    /// Call when the tab becomes visible again. `Ok(false)` means this session
    /// does not hold the claim. A [`SessionEvent::DuplicateTab`] is queued only
    /// when a claim held until now turns out to belong to another tab.
    pub async fn visibility_regained(&mut self) -> Result<bool, SessionError> {
        match &self.coordinator {
            Some(coordinator) => Ok(coordinator.on_visibility_regained().await?),
            None => Ok(false),
        }
    }

    pub fn observe(&mut self, signal: HostSignal) -> SignalResponse {
        self.monitor.observe(signal)
    }

    /// Fetches the graded result once the attempt has been submitted.
    pub async fn result(&self) -> Result<AttemptResult, SessionError> {
        let attempt_id = self.state.attempt_id.as_deref().ok_or(SessionError::NoActiveAttempt)?;
        Ok(self.api.result(attempt_id).await?)
    }

    /// Waits for the next background event, applies it and returns it.
    ///
    /// Returns `None` once nothing is queued and no background source is left
    /// running, e.g. after expiry, submission or a takeover.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let event = match self.pending.pop_front() {
            Some(event) => event,
            None => match self.events.try_recv() {
                Ok(event) => event,
                Err(_) if self.is_idle() => return None,
                Err(_) => self.events.recv().await?,
            },
        };

        match &event {
            SessionEvent::Tick(remaining) => {
                if !self.state.status.is_terminal() {
                    self.dispatch(AttemptAction::Tick(*remaining as i64));
                }
            }
            SessionEvent::Expired => {
                if !self.state.status.is_terminal() {
                    self.dispatch(AttemptAction::Tick(0));
                }
                tracing::info!(attempt_id = ?self.state.attempt_id, "Attempt time expired");
                self.teardown().await;
            }
            SessionEvent::SessionExpired | SessionEvent::DuplicateTab => {
                self.stop_local();
                // The claim belongs to the other tab now; dropping the
                // coordinator stops the heartbeat without touching it.
                self.coordinator = None;
                self.dispatch(AttemptAction::SetError(ACTIVE_ELSEWHERE_MESSAGE.to_string()));
            }
            SessionEvent::Violation(violation) => {
                tracing::debug!(kind = violation.kind.as_str(), "Violation recorded");
            }
            SessionEvent::MaxViolationsReached => {
                if !self.state.status.is_terminal() {
                    if let Err(err) = self.submit().await {
                        tracing::warn!(error = %err, "Forced submission failed");
                    }
                }
            }
            SessionEvent::SyncDue => {
                let _ = self.sync_time().await;
            }
        }

        Some(event)
    }

    /// Stops every background source and releases the claim when held.
    pub async fn teardown(&mut self) {
        self.stop_local();

        if let Some(mut coordinator) = self.coordinator.take() {
            if let Err(err) = coordinator.release_tab().await {
                tracing::warn!(
                    attempt_id = coordinator.attempt_id(),
                    error = %err,
                    "Failed to release tab claim"
                );
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.coordinator.is_none()
            && !self.timer.is_running()
            && !self.monitor.is_active()
            && self.sync_task.is_none()
    }

    fn stop_local(&mut self) {
        self.timer.stop();
        self.monitor.stop();
        if let Some(task) = self.sync_task.take() {
            task.abort();
        }
    }

    async fn abort_entry(&mut self, err: SessionError) -> SessionError {
        tracing::error!(tab_id = %self.tab_id, error = %err, "Failed to enter attempt");
        self.teardown().await;
        self.dispatch(AttemptAction::SetError(err.to_string()));
        err
    }

    fn running_attempt(&self) -> Result<String, SessionError> {
        match &self.state.attempt_id {
            Some(attempt_id) if self.state.status == AttemptStatus::InProgress => {
                Ok(attempt_id.clone())
            }
            _ => Err(SessionError::NoActiveAttempt),
        }
    }

    fn start_timer(&mut self, time_remaining: i64) {
        let tick_sink = self.sink.clone();
        let expiry_sink = self.sink.clone();
        self.timer.restart(
            time_remaining,
            move |remaining| tick_sink.emit(SessionEvent::Tick(remaining)),
            move || expiry_sink.emit(SessionEvent::Expired),
        );
    }

    fn spawn_sync_ticker(&mut self) {
        if let Some(task) = self.sync_task.take() {
            task.abort();
        }

        let sink = self.sink.clone();
        let period = self.config.time_sync_interval;
        self.sync_task = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if sink.0.send(SessionEvent::SyncDue).is_err() {
                    return;
                }
            }
        }));
    }

    fn apply_queued_timer_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                SessionEvent::Tick(remaining) => {
                    self.dispatch(AttemptAction::Tick(remaining as i64));
                }
                other => {
                    if other == SessionEvent::Expired {
                        self.dispatch(AttemptAction::Tick(0));
                    }
                    self.pending.push_back(other);
                }
            }
        }
    }

    fn discard_timer_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            if !matches!(event, SessionEvent::Tick(_) | SessionEvent::Expired) {
                self.pending.push_back(event);
            }
        }
        self.pending.retain(|event| !matches!(event, SessionEvent::Tick(_) | SessionEvent::Expired));
    }

    fn discard_events(&mut self) {
        while self.events.try_recv().is_ok() {}
        self.pending.clear();
    }

    fn dispatch(&mut self, action: AttemptAction) {
        self.state = reduce(std::mem::take(&mut self.state), action);
    }
}

impl Drop for AttemptSession {
    fn drop(&mut self) {
        self.stop_local();

        // Best-effort release for a session dropped without `teardown`.
        if let Some(mut coordinator) = self.coordinator.take() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move {
                    let _ = coordinator.release_tab().await;
                });
            }
        }
    }
}
