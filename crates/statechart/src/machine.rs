//! Machine facade: owns the tree and the sequencer, drives per-frame ticks.
//!
//! The host frame loop calls [`StateMachine::tick`] at most once per logical
//! frame. The first call implicitly starts the machine by submitting the
//! initial transition (`from = None`, target = root), which enters the
//! root's initial chain. Disposal consumes the machine, cancels any
//! in-flight phase, and disposes every state and activity in tree order.

use tracing::info;

use crate::errors::StatechartError;
use crate::sequencer::{TransitionRecord, TransitionRequest, TransitionSequencer};
use crate::tree::{StateBehavior, StateId, StateTree};

/// A hierarchical state machine over a configured [`StateTree`].
pub struct StateMachine {
    tree: StateTree,
    sequencer: TransitionSequencer,
    started: bool,
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl StateMachine {
    /// Wrap a configured tree. The tree must have a root.
    pub fn new(tree: StateTree) -> Result<Self, StatechartError> {
        if tree.root().is_none() {
            return Err(StatechartError::structural("tree has no root"));
        }
        Ok(Self {
            tree,
            sequencer: TransitionSequencer::new(),
            started: false,
        })
    }

    /// Advance the machine by one frame.
    ///
    /// Must be called from within a Tokio runtime: phase operations are
    /// spawned as tasks and their completion is observed on later ticks.
    pub fn tick(&mut self, dt: f64) {
        if !self.started {
            self.started = true;
            if let Some(root) = self.tree.root() {
                info!(root = %root, "state machine starting");
                self.sequencer
                    .request_transition(&mut self.tree, TransitionRequest { from: None, to: root });
            }
        }
        self.sequencer.tick(&mut self.tree, dt);
    }

    /// Request a transition from the current active leaf to `to`.
    ///
    /// Subject to the sequencer's duplicate suppression and coalescing
    /// rules; self-transitions are silent no-ops.
    pub fn request_transition(&mut self, to: StateId) {
        let from = self.tree.active_leaf();
        self.sequencer
            .request_transition(&mut self.tree, TransitionRequest { from, to });
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    /// The unique active leaf, if the machine has started.
    pub fn active_leaf(&self) -> Option<StateId> {
        self.tree.active_leaf()
    }

    /// `true` while a transition is in flight.
    pub fn is_transitioning(&self) -> bool {
        self.sequencer.is_transitioning()
    }

    /// The sequencer's phase-boundary log.
    pub fn records(&self) -> &[TransitionRecord] {
        self.sequencer.records()
    }

    /// Human-readable trail of everything the sequencer has done.
    pub fn summary(&self) -> String {
        self.sequencer.summary()
    }

    pub fn behavior(&self, id: StateId) -> Option<&dyn StateBehavior> {
        self.tree.behavior(id)
    }

    pub fn behavior_mut(&mut self, id: StateId) -> Option<&mut (dyn StateBehavior + 'static)> {
        self.tree.behavior_mut(id)
    }

    // ── Disposal ─────────────────────────────────────────────────────────

    /// Tear the machine down: cancel any in-flight phase, then dispose
    /// every state and every transitively owned activity in tree order,
    /// exactly once each, regardless of current mode.
    pub async fn dispose(mut self) {
        info!(summary = %self.sequencer.summary(), "state machine disposing");
        self.sequencer.shutdown();
        self.tree.dispose_all().await;
    }
}
