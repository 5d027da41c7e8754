use serde::Serialize;

/// Lifecycle of the countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// The first artifact is still being prepared; no time is charged.
    Warmup,
    /// The active buffer is being counted down.
    Running,
    /// Shut down; ticks do nothing.
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerState {
    pub phase: Phase,
    /// A placeholder was added during the current cycle.
    pub placeholder_injected: bool,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self {
            phase: Phase::Warmup,
            placeholder_injected: false,
        }
    }
}

impl SchedulerState {
    pub fn processing_first_item(&self) -> bool {
        self.phase == Phase::Warmup
    }
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Warm-up or stopped: nothing charged.
    Suspended,
    /// Active buffer still has playtime left.
    Counting { remaining_secs: f64 },
    /// The buffers were rotated.
    Switched {
        new_active: usize,
        placeholder_injected: bool,
    },
}

/// Point-in-time view of the scheduler, for logs and tests.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerSnapshot {
    pub phase: Phase,
    pub active_index: usize,
    pub pending_secs: [f64; 2],
    pub placeholder_injected: bool,
}
