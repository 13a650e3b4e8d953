use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::*;
use crate::core::time::ManualClock;

#[derive(Default)]
struct RecordingHandler {
    violations: Mutex<Vec<SecurityViolation>>,
    escalations: AtomicUsize,
}

impl RecordingHandler {
    fn kinds(&self) -> Vec<ViolationKind> {
        self.violations.lock().unwrap().iter().map(|violation| violation.kind).collect()
    }

    fn escalations(&self) -> usize {
        self.escalations.load(Ordering::SeqCst)
    }
}

impl SecurityHandler for RecordingHandler {
    fn on_violation(&self, violation: &SecurityViolation) {
        self.violations.lock().unwrap().push(violation.clone());
    }

    fn on_max_violations_reached(&self) {
        self.escalations.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeFullscreen {
    supported: bool,
}

impl FullscreenHost for FakeFullscreen {
    fn request_fullscreen(&self) -> Result<(), SecurityError> {
        if self.supported {
            Ok(())
        } else {
            Err(SecurityError::Unsupported)
        }
    }

    fn exit_fullscreen(&self) -> Result<(), SecurityError> {
        if self.supported {
            Ok(())
        } else {
            Err(SecurityError::Denied("not in fullscreen".to_string()))
        }
    }
}

fn monitor(device: DeviceProfile) -> (SecurityMonitor, Arc<ManualClock>, Arc<RecordingHandler>) {
    let clock = Arc::new(ManualClock::new(10_000));
    let handler = Arc::new(RecordingHandler::default());
    let mut monitor =
        SecurityMonitor::new(SecurityConfig::default(), device, clock.clone(), handler.clone());
    monitor.start();
    (monitor, clock, handler)
}

#[test]
fn tab_switches_inside_throttle_window_count_once() {
    let (mut monitor, clock, handler) = monitor(DeviceProfile::desktop());

    let first = monitor.observe(HostSignal::VisibilityChanged { hidden: true });
    clock.advance(Duration::from_millis(500));
    let second = monitor.observe(HostSignal::WindowBlurred { document_hidden: false });

    assert!(first.warning.is_some());
    assert!(second.warning.is_none());
    assert_eq!(handler.kinds(), vec![ViolationKind::TabSwitch]);

    clock.advance(Duration::from_millis(2_000));
    monitor.observe(HostSignal::VisibilityChanged { hidden: true });
    assert_eq!(monitor.violation_count(), 2);
}

#[test]
fn blur_while_hidden_and_becoming_visible_are_ignored() {
    let (mut monitor, _clock, handler) = monitor(DeviceProfile::desktop());

    monitor.observe(HostSignal::WindowBlurred { document_hidden: true });
    monitor.observe(HostSignal::VisibilityChanged { hidden: false });

    assert!(handler.kinds().is_empty());
}

#[test]
fn context_menu_is_prevented_and_counted() {
    let (mut monitor, _clock, handler) = monitor(DeviceProfile::desktop());

    let response = monitor.observe(HostSignal::ContextMenu);

    assert!(response.prevent_default);
    assert_eq!(response.warning.map(|warning| warning.remaining), Some(4));
    assert_eq!(handler.kinds(), vec![ViolationKind::RightClick]);
}

#[test]
fn only_copy_cut_paste_are_penalized() {
    let (mut monitor, _clock, handler) = monitor(DeviceProfile::desktop());

    for combo in [KeyCombo::new("c").ctrl(), KeyCombo::new("V").meta(), KeyCombo::new("x").ctrl()] {
        let response = monitor.observe(HostSignal::KeyDown(combo));
        assert!(response.prevent_default);
        assert!(response.warning.is_some());
    }

    let suppressed = [
        KeyCombo::new("a").ctrl(),
        KeyCombo::new("s").meta(),
        KeyCombo::new("p").ctrl(),
        KeyCombo::new("u").ctrl(),
        KeyCombo::new("F12"),
        KeyCombo::new("I").ctrl().shift(),
        KeyCombo::new("j").ctrl().shift(),
        KeyCombo::new("C").ctrl().shift(),
        KeyCombo::new("F5"),
        KeyCombo::new("r").meta(),
    ];
    for combo in suppressed {
        let response = monitor.observe(HostSignal::KeyDown(combo.clone()));
        assert!(response.prevent_default, "{combo:?} should be suppressed");
        assert!(response.warning.is_none(), "{combo:?} should not be counted");
    }

    let plain = monitor.observe(HostSignal::KeyDown(KeyCombo::new("c")));
    assert_eq!(plain, SignalResponse::default());

    assert_eq!(handler.kinds(), vec![ViolationKind::CopyPaste; 3]);
}

#[test]
fn escalation_fires_exactly_once() {
    let (mut monitor, _clock, handler) = monitor(DeviceProfile::desktop());

    for _ in 0..DEFAULT_MAX_VIOLATIONS {
        monitor.observe(HostSignal::ContextMenu);
    }
    assert_eq!(handler.escalations(), 1);

    let response = monitor.observe(HostSignal::ContextMenu);
    assert_eq!(handler.escalations(), 1);
    assert_eq!(monitor.violation_count(), DEFAULT_MAX_VIOLATIONS + 1);
    assert_eq!(response.warning.map(|warning| warning.remaining), Some(0));
}

#[test]
fn fullscreen_exit_counts_only_after_entering() {
    let (mut monitor, _clock, handler) = monitor(DeviceProfile::desktop());

    monitor.observe(HostSignal::FullscreenChanged { active: false });
    assert!(handler.kinds().is_empty());

    monitor.observe(HostSignal::FullscreenChanged { active: true });
    let response = monitor.observe(HostSignal::FullscreenChanged { active: false });

    assert!(response.warning.is_some());
    assert_eq!(handler.kinds(), vec![ViolationKind::FullscreenExit]);
}

#[test]
fn fullscreen_is_not_monitored_on_mobile() {
    let device = DeviceProfile::detect(1280, "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)");
    assert!(device.mobile);
    assert!(DeviceProfile::detect(375, "Mozilla/5.0 (X11; Linux x86_64)").mobile);
    assert!(!DeviceProfile::detect(1280, "Mozilla/5.0 (X11; Linux x86_64)").mobile);

    let (mut monitor, _clock, handler) = monitor(device);
    monitor.observe(HostSignal::FullscreenChanged { active: true });
    monitor.observe(HostSignal::FullscreenChanged { active: false });

    assert!(handler.kinds().is_empty());
}

#[test]
fn fullscreen_helpers_report_success_without_erroring() {
    let (mut monitor, _clock, handler) = monitor(DeviceProfile::desktop());

    assert!(!monitor.enter_fullscreen(&FakeFullscreen { supported: false }));
    assert!(monitor.enter_fullscreen(&FakeFullscreen { supported: true }));
    assert!(monitor.exit_fullscreen(&FakeFullscreen { supported: true }));

    monitor.observe(HostSignal::FullscreenChanged { active: false });
    assert!(handler.kinds().is_empty());
}

#[test]
fn stopped_monitor_ignores_signals_and_start_resets_count() {
    let (mut monitor, _clock, handler) = monitor(DeviceProfile::desktop());
    monitor.observe(HostSignal::ContextMenu);
    monitor.stop();

    let response = monitor.observe(HostSignal::ContextMenu);
    assert_eq!(response, SignalResponse::default());
    assert_eq!(monitor.violation_count(), 1);

    monitor.start();
    assert_eq!(monitor.violation_count(), 0);
    assert_eq!(handler.kinds().len(), 1);
}

#[test]
fn warning_message_shows_remaining_allowance() {
    let warning = ViolationWarning { kind: ViolationKind::TabSwitch, count: 2, remaining: 3 };
    assert_eq!(
        warning.message(),
        "Security violation: switching tabs or windows. 3 warnings remaining."
    );
}

#[test]
fn violation_serializes_with_wire_names() {
    let violation = SecurityViolation { kind: ViolationKind::FullscreenExit, timestamp: 5 };
    let json = serde_json::to_value(&violation).expect("serialize");
    assert_eq!(json, serde_json::json!({"type": "fullscreen_exit", "timestamp": 5}));
}
