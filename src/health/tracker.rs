//! Process-wide health state machine.
//!
//! Healthy ⇄ Maintenance. A single transient blip must not alarm anyone;
//! three failures inside a five-minute window is the declared threshold for
//! "this dependency is actually down". Once in maintenance the service stops
//! attempting normal replies until a success signal or an explicit reset.

use serde::Serialize;
use std::sync::Mutex;

/// Failure-window length. A failure more than this long after the previous
/// one starts a fresh window.
const ERROR_WINDOW_SECS: i64 = 5 * 60;

/// Failures within one window that trip maintenance mode.
const MAINTENANCE_THRESHOLD: u32 = 3;

/// Mutable health state, guarded by the tracker's mutex.
#[derive(Debug)]
struct HealthState {
    healthy: bool,
    error_count: u32,
    last_error_at: Option<chrono::DateTime<chrono::Utc>>,
    maintenance: bool,
}

impl HealthState {
    fn initial() -> Self {
        Self {
            healthy: true,
            error_count: 0,
            last_error_at: None,
            maintenance: false,
        }
    }
}

/// Serializable snapshot of the current health state.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub error_count: u32,
    pub maintenance: bool,
    pub last_error_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// What a failure signal did to the state machine. The caller owns the side
/// effects (degraded notice, logging); the tracker only decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// This failure opened a new error window — notify once, then stay quiet.
    pub first_of_window: bool,
    /// This failure crossed the threshold and tripped maintenance mode.
    pub entered_maintenance: bool,
}

/// Shared, mutex-guarded health tracker. One instance per process, handed to
/// every request handler.
#[derive(Debug)]
pub struct HealthTracker {
    inner: Mutex<HealthState>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HealthState::initial()),
        }
    }

    /// Record a dependency failure at the current time.
    pub fn record_failure(&self, context: &str) -> FailureOutcome {
        self.record_failure_at(context, chrono::Utc::now())
    }

    /// Record a dependency failure at an explicit time.
    pub fn record_failure_at(
        &self,
        context: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> FailureOutcome {
        let mut state = self.inner.lock().expect("health state lock poisoned");

        let window_expired = state
            .last_error_at
            .is_none_or(|last| (now - last).num_seconds() > ERROR_WINDOW_SECS);
        let first_of_window = state.error_count == 0 || window_expired;

        if first_of_window {
            state.error_count = 1;
        } else {
            state.error_count += 1;
        }
        state.last_error_at = Some(now);
        state.healthy = false;

        let entered_maintenance =
            !state.maintenance && state.error_count >= MAINTENANCE_THRESHOLD;
        if entered_maintenance {
            state.maintenance = true;
            tracing::error!(
                context,
                error_count = state.error_count,
                "failure threshold reached, entering maintenance mode"
            );
        } else {
            tracing::warn!(context, error_count = state.error_count, "dependency failure recorded");
        }

        FailureOutcome {
            first_of_window,
            entered_maintenance,
        }
    }

    /// Record a dependency success signal: back to healthy, window cleared.
    pub fn record_success(&self) {
        let mut state = self.inner.lock().expect("health state lock poisoned");
        if state.maintenance {
            tracing::info!("dependency recovered, leaving maintenance mode");
        }
        *state = HealthState::initial();
    }

    /// Administrative reset to the initial state.
    pub fn reset(&self) {
        let mut state = self.inner.lock().expect("health state lock poisoned");
        *state = HealthState::initial();
    }

    /// Whether the service is currently in maintenance mode.
    pub fn is_maintenance(&self) -> bool {
        self.inner
            .lock()
            .expect("health state lock poisoned")
            .maintenance
    }

    /// Snapshot the current state for the status endpoint.
    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.inner.lock().expect("health state lock poisoned");
        HealthSnapshot {
            healthy: state.healthy,
            error_count: state.error_count,
            maintenance: state.maintenance,
            last_error_at: state.last_error_at,
        }
    }
}
