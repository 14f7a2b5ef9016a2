//! Activity lifecycle contract.
//!
//! An activity is an asynchronous capability owned by a state (an animation,
//! a delayed effect, a resource load). Its lifecycle is a four-mode machine:
//!
//! ```text
//! Inactive → Activating → Active → Deactivating → Inactive
//! ```
//!
//! Implementors provide the effects (`on_activate` / `on_deactivate`); the
//! runtime owns the mode. `ActivityCell` is the only place the mode is
//! mutated, which keeps the gating rules in one spot:
//! - activate is a no-op unless the mode is `Inactive`;
//! - deactivate is a no-op unless the mode is `Active`;
//! - cooperative cancellation rolls the mode back to the stable mode the
//!   operation started from;
//! - an effect error leaves the mode transitional (the executor logs it and
//!   the activity becomes eligible again only once its mode matches).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::StatechartError;

// ── ActivityMode ─────────────────────────────────────────────────────────────

/// The four-value lifecycle mode of an activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityMode {
    /// Not running; eligible for activation.
    Inactive,
    /// Activation effect in flight.
    Activating,
    /// Running; eligible for deactivation.
    Active,
    /// Deactivation effect in flight.
    Deactivating,
}

impl ActivityMode {
    /// Whether this is a stable (non-transitional) mode.
    pub fn is_stable(self) -> bool {
        matches!(self, Self::Inactive | Self::Active)
    }

    /// Whether an activate/deactivate effect is currently in flight.
    pub fn is_transitional(self) -> bool {
        !self.is_stable()
    }
}

impl std::fmt::Display for ActivityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inactive => write!(f, "inactive"),
            Self::Activating => write!(f, "activating"),
            Self::Active => write!(f, "active"),
            Self::Deactivating => write!(f, "deactivating"),
        }
    }
}

// ── Activity trait ───────────────────────────────────────────────────────────

/// An asynchronous capability attached to a state.
///
/// Implementors provide only the effects; mode bookkeeping, gating, and
/// cancellation rollback live in [`ActivityCell`]. Effects should observe
/// `cancel` at their suspension points and unwind by returning either
/// `Ok(())` or [`StatechartError::Cancelled`]; both are treated as a
/// cooperative unwind, never as a failure.
///
/// Side effects (rendering, audio, resource allocation) are the activity's
/// private concern; the runtime only observes mode and completion.
#[async_trait]
pub trait Activity: Send {
    /// Name for logging and diagnostics.
    fn name(&self) -> &str {
        "activity"
    }

    /// The activation effect. May suspend; zero-duration effects are fine.
    async fn on_activate(&mut self, _cancel: &CancellationToken) -> Result<(), StatechartError> {
        Ok(())
    }

    /// The deactivation effect. May suspend; zero-duration effects are fine.
    async fn on_deactivate(&mut self, _cancel: &CancellationToken) -> Result<(), StatechartError> {
        Ok(())
    }

    /// Disposal hook, invoked exactly once at machine disposal regardless of
    /// the current mode. Deactivation is *not* guaranteed to run first.
    fn on_dispose(&mut self) {}
}

// ── ActivityCell ─────────────────────────────────────────────────────────────

/// Owns one activity together with its mode.
///
/// All mode transitions are monotonic within a single call:
/// `Inactive → Activating → Active` or `Active → Deactivating → Inactive`,
/// with cancellation rolling back to the originating stable mode.
pub struct ActivityCell {
    inner: Box<dyn Activity>,
    mode: ActivityMode,
    disposed: bool,
}

impl ActivityCell {
    pub fn new(activity: impl Activity + 'static) -> Self {
        Self {
            inner: Box::new(activity),
            mode: ActivityMode::Inactive,
            disposed: false,
        }
    }

    /// Current lifecycle mode.
    pub fn mode(&self) -> ActivityMode {
        self.mode
    }

    /// Name of the wrapped activity.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Run the activation effect if the mode permits it.
    ///
    /// Rejected calls (mode not `Inactive`) return `Ok(())` without side
    /// effects. A non-cancellation effect error is returned to the caller
    /// with the mode left at `Activating`.
    pub async fn activate(&mut self, cancel: &CancellationToken) -> Result<(), StatechartError> {
        if self.mode != ActivityMode::Inactive {
            return Ok(());
        }
        self.mode = ActivityMode::Activating;
        match self.inner.on_activate(cancel).await {
            Ok(()) => {
                if cancel.is_cancelled() {
                    self.mode = ActivityMode::Inactive;
                } else {
                    self.mode = ActivityMode::Active;
                }
                Ok(())
            }
            Err(err) if err.is_cancellation() => {
                self.mode = ActivityMode::Inactive;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Run the deactivation effect if the mode permits it.
    ///
    /// Mirror image of [`activate`](Self::activate): rejected unless the
    /// mode is `Active`; cancellation rolls back to `Active`.
    pub async fn deactivate(&mut self, cancel: &CancellationToken) -> Result<(), StatechartError> {
        if self.mode != ActivityMode::Active {
            return Ok(());
        }
        self.mode = ActivityMode::Deactivating;
        match self.inner.on_deactivate(cancel).await {
            Ok(()) => {
                if cancel.is_cancelled() {
                    self.mode = ActivityMode::Active;
                } else {
                    self.mode = ActivityMode::Inactive;
                }
                Ok(())
            }
            Err(err) if err.is_cancellation() => {
                self.mode = ActivityMode::Active;
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Invoke the disposal hook. Idempotent: only the first call forwards.
    pub fn dispose(&mut self) {
        if !self.disposed {
            self.disposed = true;
            self.inner.on_dispose();
        }
    }
}

/// Shared handle to an activity cell.
///
/// States hold activities in this form so phase tasks spawned onto the
/// runtime are `'static`. The mutex does not admit a second logical
/// writer: only phase tasks launched by the sequencer ever take it for
/// mutation.
pub type SharedActivity = Arc<Mutex<ActivityCell>>;

/// Wrap an activity into the shared handle form states hold.
pub fn shared(activity: impl Activity + 'static) -> SharedActivity {
    Arc::new(Mutex::new(ActivityCell::new(activity)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Probe activity counting effect invocations.
    struct Probe {
        activations: Arc<AtomicU32>,
        deactivations: Arc<AtomicU32>,
        disposals: Arc<AtomicU32>,
    }

    impl Probe {
        fn new() -> (Self, Arc<AtomicU32>, Arc<AtomicU32>, Arc<AtomicU32>) {
            let a = Arc::new(AtomicU32::new(0));
            let d = Arc::new(AtomicU32::new(0));
            let x = Arc::new(AtomicU32::new(0));
            (
                Self {
                    activations: a.clone(),
                    deactivations: d.clone(),
                    disposals: x.clone(),
                },
                a,
                d,
                x,
            )
        }
    }

    #[async_trait]
    impl Activity for Probe {
        fn name(&self) -> &str {
            "probe"
        }
        async fn on_activate(&mut self, _cancel: &CancellationToken) -> Result<(), StatechartError> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn on_deactivate(
            &mut self,
            _cancel: &CancellationToken,
        ) -> Result<(), StatechartError> {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn on_dispose(&mut self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Activity whose activation always fails.
    struct Broken;

    #[async_trait]
    impl Activity for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        async fn on_activate(&mut self, _cancel: &CancellationToken) -> Result<(), StatechartError> {
            Err(StatechartError::activity("broken", "effect exploded"))
        }
    }

    #[tokio::test]
    async fn full_lifecycle_round_trip() {
        let (probe, activations, deactivations, _) = Probe::new();
        let mut cell = ActivityCell::new(probe);
        let cancel = CancellationToken::new();

        assert_eq!(cell.mode(), ActivityMode::Inactive);
        cell.activate(&cancel).await.unwrap();
        assert_eq!(cell.mode(), ActivityMode::Active);
        cell.deactivate(&cancel).await.unwrap();
        assert_eq!(cell.mode(), ActivityMode::Inactive);
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn activate_while_active_is_a_side_effect_free_no_op() {
        let (probe, activations, _, _) = Probe::new();
        let mut cell = ActivityCell::new(probe);
        let cancel = CancellationToken::new();

        cell.activate(&cancel).await.unwrap();
        cell.activate(&cancel).await.unwrap();
        assert_eq!(cell.mode(), ActivityMode::Active);
        assert_eq!(activations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deactivate_while_inactive_is_a_no_op() {
        let (probe, _, deactivations, _) = Probe::new();
        let mut cell = ActivityCell::new(probe);
        let cancel = CancellationToken::new();

        cell.deactivate(&cancel).await.unwrap();
        assert_eq!(cell.mode(), ActivityMode::Inactive);
        assert_eq!(deactivations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancellation_rolls_back_to_inactive() {
        let (probe, _, _, _) = Probe::new();
        let mut cell = ActivityCell::new(probe);
        let cancel = CancellationToken::new();
        cancel.cancel();

        // The effect itself completes, but the token was cancelled during
        // the transitional window: mode returns to its stable origin.
        cell.activate(&cancel).await.unwrap();
        assert_eq!(cell.mode(), ActivityMode::Inactive);
    }

    #[tokio::test]
    async fn cancellation_during_deactivate_rolls_back_to_active() {
        let (probe, _, _, _) = Probe::new();
        let mut cell = ActivityCell::new(probe);
        let live = CancellationToken::new();
        cell.activate(&live).await.unwrap();

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        cell.deactivate(&cancelled).await.unwrap();
        assert_eq!(cell.mode(), ActivityMode::Active);
    }

    #[tokio::test]
    async fn effect_error_leaves_mode_transitional() {
        let mut cell = ActivityCell::new(Broken);
        let cancel = CancellationToken::new();

        let err = cell.activate(&cancel).await.unwrap_err();
        assert!(!err.is_cancellation());
        assert_eq!(cell.mode(), ActivityMode::Activating);
    }

    #[tokio::test]
    async fn dispose_forwards_exactly_once() {
        let (probe, _, _, disposals) = Probe::new();
        let mut cell = ActivityCell::new(probe);

        cell.dispose();
        cell.dispose();
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn mode_stability_queries() {
        assert!(ActivityMode::Inactive.is_stable());
        assert!(ActivityMode::Active.is_stable());
        assert!(ActivityMode::Activating.is_transitional());
        assert!(ActivityMode::Deactivating.is_transitional());
    }

    #[test]
    fn mode_serde_round_trip() {
        let json = serde_json::to_string(&ActivityMode::Deactivating).unwrap();
        assert_eq!(json, "\"deactivating\"");
        let restored: ActivityMode = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, ActivityMode::Deactivating);
    }
}
