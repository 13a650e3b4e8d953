use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::time::Clock;

pub const DEFAULT_MAX_VIOLATIONS: u32 = 5;
pub const DEFAULT_TAB_SWITCH_THROTTLE: Duration = Duration::from_millis(2_000);
const MOBILE_MAX_WIDTH: u32 = 768;
const MOBILE_UA_TOKENS: &[&str] =
    &["android", "webos", "iphone", "ipad", "ipod", "blackberry", "iemobile", "opera mini", "mobile"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    RightClick,
    CopyPaste,
    FullscreenExit,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::TabSwitch => "tab_switch",
            ViolationKind::RightClick => "right_click",
            ViolationKind::CopyPaste => "copy_paste",
            ViolationKind::FullscreenExit => "fullscreen_exit",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ViolationKind::TabSwitch => "switching tabs or windows",
            ViolationKind::RightClick => "right-clicking",
            ViolationKind::CopyPaste => "copying or pasting",
            ViolationKind::FullscreenExit => "leaving fullscreen",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityViolation {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// A key press as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyCombo {
    pub key: String,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
}

impl KeyCombo {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), ..Self::default() }
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }

    fn command(&self) -> bool {
        self.ctrl || self.meta
    }

    fn key_is(&self, expected: &str) -> bool {
        self.key.eq_ignore_ascii_case(expected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum KeyPolicy {
    Allow,
    Suppress,
    Penalize,
}

fn classify_key(combo: &KeyCombo) -> KeyPolicy {
    if combo.key_is("F12") || combo.key_is("F5") {
        return KeyPolicy::Suppress;
    }

    if combo.ctrl && combo.shift && ["i", "j", "c"].iter().any(|key| combo.key_is(key)) {
        return KeyPolicy::Suppress;
    }

    if !combo.command() {
        return KeyPolicy::Allow;
    }

    if ["c", "v", "x"].iter().any(|key| combo.key_is(key)) {
        return KeyPolicy::Penalize;
    }

    if ["a", "s", "p", "u", "r"].iter().any(|key| combo.key_is(key)) {
        return KeyPolicy::Suppress;
    }

    KeyPolicy::Allow
}

/// Host environment events the monitor reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSignal {
    VisibilityChanged { hidden: bool },
    WindowBlurred { document_hidden: bool },
    ContextMenu,
    KeyDown(KeyCombo),
    FullscreenChanged { active: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationWarning {
    pub kind: ViolationKind,
    pub count: u32,
    pub remaining: u32,
}

impl ViolationWarning {
    pub fn message(&self) -> String {
        match self.remaining {
            0 => format!(
                "Security violation: {}. No warnings remaining, your attempt will be submitted.",
                self.kind.label()
            ),
            1 => format!("Security violation: {}. 1 warning remaining.", self.kind.label()),
            remaining => {
                format!("Security violation: {}. {remaining} warnings remaining.", self.kind.label())
            }
        }
    }
}

/// What the host should do with the event it just reported.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignalResponse {
    pub prevent_default: bool,
    pub warning: Option<ViolationWarning>,
}

pub trait SecurityHandler: Send + Sync {
    fn on_violation(&self, violation: &SecurityViolation);
    fn on_max_violations_reached(&self);
}

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("Fullscreen is not supported")]
    Unsupported,
    #[error("Fullscreen request denied: {0}")]
    Denied(String),
}

/// The part of the host that can toggle fullscreen.
pub trait FullscreenHost {
    fn request_fullscreen(&self) -> Result<(), SecurityError>;
    fn exit_fullscreen(&self) -> Result<(), SecurityError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceProfile {
    pub mobile: bool,
}

impl DeviceProfile {
    pub fn detect(viewport_width: u32, user_agent: &str) -> Self {
        let user_agent = user_agent.to_ascii_lowercase();
        let mobile = viewport_width < MOBILE_MAX_WIDTH
            || MOBILE_UA_TOKENS.iter().any(|token| user_agent.contains(token));
        Self { mobile }
    }

    pub fn desktop() -> Self {
        Self { mobile: false }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SecurityConfig {
    pub max_violations: u32,
    pub tab_switch_throttle: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self { max_violations: DEFAULT_MAX_VIOLATIONS, tab_switch_throttle: DEFAULT_TAB_SWITCH_THROTTLE }
    }
}

/// Counts cheating signals while an attempt is active.
///
/// The monitor is inert until `start` and again after `stop`; signals observed
/// while inert are neither counted nor suppressed.
pub struct SecurityMonitor {
    config: SecurityConfig,
    device: DeviceProfile,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn SecurityHandler>,
    active: bool,
    violation_count: u32,
    escalated: bool,
    last_tab_switch_ms: Option<i64>,
    fullscreen_entered: bool,
}

impl SecurityMonitor {
    pub fn new(
        config: SecurityConfig,
        device: DeviceProfile,
        clock: Arc<dyn Clock>,
        handler: Arc<dyn SecurityHandler>,
    ) -> Self {
        Self {
            config,
            device,
            clock,
            handler,
            active: false,
            violation_count: 0,
            escalated: false,
            last_tab_switch_ms: None,
            fullscreen_entered: false,
        }
    }

    pub fn start(&mut self) {
        self.active = true;
        self.violation_count = 0;
        self.escalated = false;
        self.last_tab_switch_ms = None;
        self.fullscreen_entered = false;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn violation_count(&self) -> u32 {
        self.violation_count
    }

    pub fn device(&self) -> DeviceProfile {
        self.device
    }

    pub fn observe(&mut self, signal: HostSignal) -> SignalResponse {
        if !self.active {
            return SignalResponse::default();
        }

        match signal {
            HostSignal::VisibilityChanged { hidden: true }
            | HostSignal::WindowBlurred { document_hidden: false } => self.tab_switch(),
            HostSignal::VisibilityChanged { hidden: false }
            | HostSignal::WindowBlurred { document_hidden: true } => SignalResponse::default(),
            HostSignal::ContextMenu => SignalResponse {
                prevent_default: true,
                warning: Some(self.record(ViolationKind::RightClick)),
            },
            HostSignal::KeyDown(combo) => match classify_key(&combo) {
                KeyPolicy::Allow => SignalResponse::default(),
                KeyPolicy::Suppress => SignalResponse { prevent_default: true, warning: None },
                KeyPolicy::Penalize => SignalResponse {
                    prevent_default: true,
                    warning: Some(self.record(ViolationKind::CopyPaste)),
                },
            },
            HostSignal::FullscreenChanged { active } => self.fullscreen_changed(active),
        }
    }

    /// Best effort; `false` when the host refuses or lacks support.
    pub fn enter_fullscreen(&mut self, host: &dyn FullscreenHost) -> bool {
        match host.request_fullscreen() {
            Ok(()) => {
                self.fullscreen_entered = true;
                true
            }
            Err(err) => {
                tracing::debug!(error = %err, "Could not enter fullscreen");
                false
            }
        }
    }

    /// Best effort. Leaving fullscreen this way is not a violation.
    pub fn exit_fullscreen(&mut self, host: &dyn FullscreenHost) -> bool {
        self.fullscreen_entered = false;
        match host.exit_fullscreen() {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(error = %err, "Could not exit fullscreen");
                false
            }
        }
    }

    fn tab_switch(&mut self) -> SignalResponse {
        let now = self.clock.now_millis();
        let throttle = self.config.tab_switch_throttle.as_millis() as i64;
        if let Some(last) = self.last_tab_switch_ms {
            if now - last < throttle {
                return SignalResponse::default();
            }
        }
        self.last_tab_switch_ms = Some(now);

        SignalResponse { prevent_default: false, warning: Some(self.record(ViolationKind::TabSwitch)) }
    }

    fn fullscreen_changed(&mut self, active: bool) -> SignalResponse {
        if self.device.mobile {
            return SignalResponse::default();
        }

        if active {
            self.fullscreen_entered = true;
            return SignalResponse::default();
        }

        if !self.fullscreen_entered {
            return SignalResponse::default();
        }
        self.fullscreen_entered = false;

        SignalResponse {
            prevent_default: false,
            warning: Some(self.record(ViolationKind::FullscreenExit)),
        }
    }

    fn record(&mut self, kind: ViolationKind) -> ViolationWarning {
        self.violation_count += 1;
        let violation = SecurityViolation { kind, timestamp: self.clock.now_millis() };

        metrics::counter!("security_violations_total", "kind" => kind.as_str()).increment(1);
        tracing::warn!(
            kind = kind.as_str(),
            count = self.violation_count,
            max = self.config.max_violations,
            "Security violation"
        );

        self.handler.on_violation(&violation);

        if self.violation_count >= self.config.max_violations && !self.escalated {
            self.escalated = true;
            tracing::warn!(count = self.violation_count, "Maximum security violations reached");
            self.handler.on_max_violations_reached();
        }

        ViolationWarning {
            kind,
            count: self.violation_count,
            remaining: self.config.max_violations.saturating_sub(self.violation_count),
        }
    }
}

#[cfg(test)]
mod tests;
