//! Restart policy state machine, independent of timers and processes.

use std::time::Duration;

/// Bounded exponential backoff: `base_delay * 2^attempts`, at most
/// `max_attempts` restarts before giving up for good.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, attempts: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempts))
    }
}

/// Lifecycle states of the supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Stopped,
    Starting,
    Running,
    RestartPending,
    /// Restart budget exhausted. Terminal; only a new supervisor recovers.
    Failed,
}

/// What the driver must do after an unexpected exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Schedule a respawn after this delay.
    Restart(Duration),
    /// Budget exhausted; notify the user exactly once.
    Fail,
    /// Intentional shutdown, or failure already reported.
    Ignore,
}

/// Pure restart state machine.
///
/// The attempt counter only resets on a *confirmed* spawn (the child
/// survived the stabilization window), so a rapid crash loop still walks
/// the full backoff ladder and exhausts the budget.
pub struct SupervisorCore {
    policy: BackoffPolicy,
    state: SupervisorState,
    attempts: u32,
    stopping: bool,
    failure_reported: bool,
}

impl SupervisorCore {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            state: SupervisorState::Stopped,
            attempts: 0,
            stopping: false,
            failure_reported: false,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A spawn is underway.
    pub fn on_starting(&mut self) {
        self.state = SupervisorState::Starting;
    }

    /// The child process exists; not yet confirmed stable.
    pub fn on_spawned(&mut self) {
        self.state = SupervisorState::Running;
    }

    /// The child survived the stabilization window.
    pub fn on_spawn_confirmed(&mut self) {
        self.attempts = 0;
    }

    /// The pending restart delay elapsed.
    pub fn on_restart_due(&mut self) {
        self.state = SupervisorState::Starting;
    }

    /// The child exited (or vanished) without `on_stop` being called.
    pub fn on_exit(&mut self) -> ExitDecision {
        if self.stopping {
            self.state = SupervisorState::Stopped;
            return ExitDecision::Ignore;
        }

        if self.attempts < self.policy.max_attempts {
            let delay = self.policy.delay(self.attempts);
            self.attempts += 1;
            self.state = SupervisorState::RestartPending;
            return ExitDecision::Restart(delay);
        }

        self.state = SupervisorState::Failed;
        if self.failure_reported {
            ExitDecision::Ignore
        } else {
            self.failure_reported = true;
            ExitDecision::Fail
        }
    }

    /// Intentional shutdown; wins over any automatic-restart path.
    pub fn on_stop(&mut self) {
        self.stopping = true;
        self.state = SupervisorState::Stopped;
    }
}
