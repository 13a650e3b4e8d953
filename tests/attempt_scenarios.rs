use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use exam_portal_rust::attempt::{
    reduce, AttemptAction, AttemptState, AttemptStatus, Question, QuestionOption, QuestionType,
};
use exam_portal_rust::{
    owner_key, ClaimStore, CoordinatorConfig, DeviceProfile, HostSignal, ManualClock,
    MemoryClaimStore, SecurityConfig, SecurityHandler, SecurityMonitor, SecurityViolation,
    TabCoordinator, TabEvents, TabId, TabState, TimerEngine,
};

fn mcq(id: &str) -> Question {
    Question {
        id: id.to_string(),
        question_text: format!("Question {id}"),
        question_type: QuestionType::Mcq,
        options: ["optA", "optB"]
            .iter()
            .map(|option| QuestionOption { id: option.to_string(), text: option.to_string() })
            .collect(),
        marks: 1.0,
        selected_option: None,
        statements: None,
        statement_instruction: None,
    }
}

#[derive(Default)]
struct Counter(AtomicUsize);

impl TabEvents for Counter {
    fn on_session_expired(&self, _attempt_id: &str) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn on_duplicate_tab(&self, _attempt_id: &str) {}
}

impl SecurityHandler for Counter {
    fn on_violation(&self, _violation: &SecurityViolation) {}

    fn on_max_violations_reached(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(start_paused = true)]
async fn timer_driven_attempt_ends_timed_out_with_one_answer() {
    let (sender, mut ticks) = tokio::sync::mpsc::unbounded_channel();
    let mut timer = TimerEngine::new();
    timer.start(
        5,
        move |remaining| {
            let _ = sender.send(remaining);
        },
        || {},
    );

    let mut state = reduce(
        AttemptState::default(),
        AttemptAction::StartAttempt { attempt_id: "A1".to_string(), time_remaining: 5 },
    );
    state = reduce(state, AttemptAction::SetQuestions(vec![mcq("q1"), mcq("q2"), mcq("q3")]));
    state = reduce(
        state,
        AttemptAction::SaveAnswer {
            question_id: "q1".to_string(),
            selected_option: Some("optA".to_string()),
        },
    );

    while let Some(remaining) = ticks.recv().await {
        state = reduce(state, AttemptAction::Tick(remaining as i64));
        if remaining == 0 {
            break;
        }
    }

    assert_eq!(state.status, AttemptStatus::TimedOut);
    assert_eq!(state.time_remaining_seconds, 0);
    assert_eq!(state.answered_count(), 1);
    assert_eq!(state.questions[0].selected_option.as_deref(), Some("optA"));
}

#[tokio::test(start_paused = true)]
async fn two_tabs_take_turns_on_one_attempt() {
    let store = Arc::new(MemoryClaimStore::new());
    let clock = Arc::new(ManualClock::new(1_000));
    let expired = Arc::new(Counter::default());

    let mut tab_a = TabCoordinator::new(
        "X",
        TabId::from("tabA".to_string()),
        store.clone(),
        clock.clone(),
        CoordinatorConfig::default(),
        expired.clone(),
    );
    let mut tab_b = TabCoordinator::new(
        "X",
        TabId::from("tabB".to_string()),
        store.clone(),
        clock.clone(),
        CoordinatorConfig::default(),
        expired.clone(),
    );

    assert!(tab_a.initialize().await.unwrap());
    assert!(!tab_b.initialize().await.unwrap());
    assert_eq!(tab_b.state(), TabState::Rejected);

    assert!(tab_a.release_tab().await.unwrap());
    assert!(tab_b.initialize().await.unwrap());

    clock.advance(Duration::from_secs(5));
    tokio::time::sleep(Duration::from_secs(6)).await;

    let claim = store.read("X").await.unwrap().expect("claim");
    assert!(claim.is_owned_by("tabB"));
    assert_eq!(claim.last_heartbeat_ms, Some(6_000));
    assert_eq!(store.get_raw(&owner_key("X")).as_deref(), Some("tabB"));
    assert_eq!(expired.0.load(Ordering::SeqCst), 0);
}

#[test]
fn violation_limit_escalates_once() {
    let clock = Arc::new(ManualClock::new(0));
    let escalations = Arc::new(Counter::default());
    let mut monitor = SecurityMonitor::new(
        SecurityConfig { max_violations: 3, ..SecurityConfig::default() },
        DeviceProfile::desktop(),
        clock.clone(),
        escalations.clone(),
    );
    monitor.start();

    for _ in 0..3 {
        monitor.observe(HostSignal::VisibilityChanged { hidden: true });
        monitor.observe(HostSignal::VisibilityChanged { hidden: true });
        clock.advance(Duration::from_millis(2_500));
    }
    assert_eq!(monitor.violation_count(), 3);
    assert_eq!(escalations.0.load(Ordering::SeqCst), 1);

    monitor.observe(HostSignal::ContextMenu);
    assert_eq!(escalations.0.load(Ordering::SeqCst), 1);
}
