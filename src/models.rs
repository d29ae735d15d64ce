use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Safe,
    Warning,
    Acting,
    Terminating,
}

impl DaemonState {
    pub fn label(&self) -> &'static str {
        match self {
            DaemonState::Safe => "SAFE",
            DaemonState::Warning => "WARNING",
            DaemonState::Acting => "ACTING",
            DaemonState::Terminating => "STOPPED",
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Back-to-back moves with a fixed short gap.
    #[default]
    Batch,
    /// One move at a time, honouring each step's own delay.
    Smooth,
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Batch => f.write_str("BATCH"),
            ExecMode::Smooth => f.write_str("SMOOTH"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeBackend {
    /// evdev listener on local input devices.
    #[default]
    Local,
    /// GNOME Mutter IdleMonitor over the session bus.
    Mutter,
}

impl fmt::Display for ProbeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeBackend::Local => f.write_str("local"),
            ProbeBackend::Mutter => f.write_str("mutter"),
        }
    }
}

/// One relative pointer move. Never `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionStep {
    pub dx: i32,
    pub dy: i32,
    pub delay_us: u64,
}

/// Parameters drawn for a single WindMouse run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindParams {
    pub speed: f64,
    pub gravity: f64,
    pub wind: f64,
    pub target_radius: f64,
    pub max_step: f64,
}

#[derive(Debug, Clone)]
pub struct MotionPath {
    pub steps: Vec<MotionStep>,
    pub params: WindParams,
    pub target: (f64, f64),
    /// False when the step cap ended the path short of the target.
    pub arrived: bool,
}

impl MotionPath {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Sum of all emitted deltas.
    pub fn displacement(&self) -> (i64, i64) {
        self.steps.iter().fold((0, 0), |(x, y), s| {
            (x + s.dx as i64, y + s.dy as i64)
        })
    }
}

/// What the daemon reports to the state file and the dashboard every tick.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub state: DaemonState,
    pub idle_ms: u64,
    pub warning_limit_ms: u64,
    pub action_threshold_ms: u64,
    pub mode: ExecMode,
    pub backend: ProbeBackend,
    pub actions: u64,
    pub pid: u32,
    pub updated_at: DateTime<Utc>,
}

impl StatusSnapshot {
    /// Milliseconds left before the warning starts, zero once it has.
    pub fn until_warning_ms(&self) -> u64 {
        self.warning_limit_ms.saturating_sub(self.idle_ms)
    }

    /// Milliseconds left before the next movement is due.
    pub fn until_action_ms(&self) -> u64 {
        self.action_threshold_ms.saturating_sub(self.idle_ms)
    }
}
