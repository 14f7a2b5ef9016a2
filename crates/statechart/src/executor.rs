//! Concurrent phase execution engine.
//!
//! One transition phase is a set of [`PhaseStep`]s, (activity, direction)
//! pairs, launched concurrently onto the runtime as a `JoinSet` fan-out.
//! Within a phase no ordering is guaranteed across independent activities;
//! ordering inside a state is obtained by composing a `SequentialGroup`.
//!
//! ## Error policy
//!
//! Any error raised by an activity operation, including cancellation, is
//! caught at the per-operation boundary, logged, and never propagated: each
//! launched operation completes exactly once regardless of outcome, so a
//! broken activity cannot stall a phase or corrupt the outstanding count.
//! Panicked tasks are reaped the same way.
//!
//! ## Cancellation
//!
//! `cancel()` signals the token, aborts the outstanding tasks, and clears
//! the set. It is a request, not a synchronous guarantee: a task parked in
//! an effect unwinds at its next suspension point.

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::activity::{ActivityMode, SharedActivity};

// ── PhaseDirection / PhaseStep ───────────────────────────────────────────────

/// Which half of a transition a step belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseDirection {
    /// Enter phase: run activation effects.
    Activate,
    /// Exit phase: run deactivation effects.
    Deactivate,
}

impl PhaseDirection {
    /// Whether an activity in `mode` is eligible for this direction.
    ///
    /// Ineligible activities are silently skipped at gather time; that is
    /// the defined behavior, not an error.
    pub fn is_applicable(self, mode: ActivityMode) -> bool {
        match self {
            Self::Activate => mode == ActivityMode::Inactive,
            Self::Deactivate => mode == ActivityMode::Active,
        }
    }
}

impl std::fmt::Display for PhaseDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Activate => write!(f, "activate"),
            Self::Deactivate => write!(f, "deactivate"),
        }
    }
}

/// One unit of work within a phase: an activity plus a direction.
///
/// Carries no ownership; validity is scoped to one phase execution.
pub struct PhaseStep {
    pub activity: SharedActivity,
    pub direction: PhaseDirection,
}

impl PhaseStep {
    pub fn new(activity: SharedActivity, direction: PhaseDirection) -> Self {
        Self {
            activity,
            direction,
        }
    }
}

// ── ActivityExecutor ─────────────────────────────────────────────────────────

/// Fans a phase's steps out onto the runtime and tracks their completion.
pub struct ActivityExecutor {
    tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl ActivityExecutor {
    pub fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The cancellation source handed (as child tokens) to launched steps.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Replace the cancellation source. Called at every transition begin so
    /// a fresh transition is never observed through a stale token.
    pub fn reset_token(&mut self) {
        self.cancel = CancellationToken::new();
    }

    /// Launch every step concurrently. Returns the number launched.
    ///
    /// Must only be called at a phase boundary: the sequencer guarantees the
    /// previous phase was either drained or cancelled first.
    pub fn run(&mut self, steps: Vec<PhaseStep>) -> usize {
        let launched = steps.len();
        for step in steps {
            let token = self.cancel.child_token();
            self.tasks.spawn(async move {
                let mut cell = step.activity.lock().await;
                let name = cell.name().to_owned();
                let result = match step.direction {
                    PhaseDirection::Activate => cell.activate(&token).await,
                    PhaseDirection::Deactivate => cell.deactivate(&token).await,
                };
                match result {
                    Ok(()) => {}
                    Err(err) if err.is_cancellation() => {
                        debug!(activity = %name, direction = %step.direction, "operation cancelled");
                    }
                    Err(err) => {
                        warn!(
                            activity = %name,
                            direction = %step.direction,
                            error = %err,
                            "activity operation failed; suppressed"
                        );
                    }
                }
            });
        }
        launched
    }

    /// Drain finished tasks without blocking.
    ///
    /// A panicked step is logged and counted as complete, so the outstanding
    /// count still decrements exactly once per launched operation.
    pub fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            if let Err(err) = result {
                if err.is_panic() {
                    warn!(error = %err, "phase task panicked; suppressed");
                }
            }
        }
    }

    /// Number of launched-but-unreaped operations.
    pub fn outstanding(&self) -> usize {
        self.tasks.len()
    }

    /// `true` while any launched operation has not completed.
    pub fn is_executing(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Signal cancellation and clear the outstanding set.
    ///
    /// Aborted tasks are detached; they unwind at their next suspension
    /// point while the executor is immediately reusable.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.tasks.abort_all();
        self.tasks.detach_all();
    }
}

impl Default for ActivityExecutor {
    fn default() -> Self {
        Self::new()
    }
}
