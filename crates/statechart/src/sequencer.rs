//! Transition sequencer: exit, then structural change, then enter.
//!
//! Given the active leaf and a requested target, the sequencer computes the
//! lowest common ancestor, deactivates the old branch's activities
//! concurrently, performs the structural change, then activates the new
//! branch's activities concurrently:
//!
//! ```text
//! request_transition(from, to)
//!   → begin: cancel stale token, build exit chain (leaf-first, up to
//!     excluding the LCA), launch eligible deactivations
//!   → exit drained: fire on_exit bottom-up, clear active links, resolve
//!     the target leaf, fire on_enter top-down, launch eligible activations
//!   → enter drained: transition complete; a coalesced pending request
//!     begins immediately, with no idle tick in between
//! ```
//!
//! The sequencer's status is a tagged phase value, never loose fields, so
//! "which transition is in flight and how far along is it" is a single
//! match. At most one request is in flight and at most one is pending; a
//! duplicate of either is dropped, and a different request overwrites the
//! pending slot (newest wins).
//!
//! Phases never suspend: each `tick` either advances phase boundaries whose
//! operations have all completed, or returns to the frame loop and observes
//! completion on a later tick. While a phase is executing, per-state
//! updates are skipped entirely.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::executor::{ActivityExecutor, PhaseDirection, PhaseStep};
use crate::tree::{StateId, StateTree};

// ── Request / phase ──────────────────────────────────────────────────────────

/// A (from-leaf, to-target) transition request.
///
/// `from` is `None` only for the machine's initial transition, which has no
/// exit phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub from: Option<StateId>,
    pub to: StateId,
}

/// Where the sequencer currently is.
#[derive(Debug)]
pub enum TransitionPhase {
    /// No transition in flight; per-state updates run each tick.
    Idle,
    /// Exit-side deactivations in flight.
    Exit {
        request: TransitionRequest,
        lca: Option<StateId>,
        /// Old-branch states, leaf-first, up to but excluding the LCA.
        exit_chain: Vec<StateId>,
    },
    /// Structural change done; enter-side activations in flight.
    Enter {
        request: TransitionRequest,
        lca: Option<StateId>,
    },
}

impl TransitionPhase {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Exit { .. } => "exit",
            Self::Enter { .. } => "enter",
        }
    }
}

// ── Audit records ────────────────────────────────────────────────────────────

/// Which phase boundary a record marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseEdge {
    ExitStarted,
    EnterStarted,
    Completed,
}

impl fmt::Display for PhaseEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitStarted => write!(f, "exit"),
            Self::EnterStarted => write!(f, "enter"),
            Self::Completed => write!(f, "done"),
        }
    }
}

/// A single recorded phase boundary, for offline replay and diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Option<StateId>,
    pub to: StateId,
    pub edge: PhaseEdge,
    /// Milliseconds since the sequencer was created.
    pub elapsed_ms: u64,
    /// Optional context about why this boundary was crossed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ── TransitionSequencer ──────────────────────────────────────────────────────

/// Drives transitions through exit → structural change → enter.
pub struct TransitionSequencer {
    phase: TransitionPhase,
    pending: Option<TransitionRequest>,
    executor: ActivityExecutor,
    records: Vec<TransitionRecord>,
    created_at: Instant,
}

impl TransitionSequencer {
    pub fn new() -> Self {
        Self {
            phase: TransitionPhase::Idle,
            pending: None,
            executor: ActivityExecutor::new(),
            records: Vec::new(),
            created_at: Instant::now(),
        }
    }

    /// `true` while any transition is in flight.
    pub fn is_transitioning(&self) -> bool {
        !matches!(self.phase, TransitionPhase::Idle)
    }

    /// The coalesced pending request, if any.
    pub fn pending_request(&self) -> Option<TransitionRequest> {
        self.pending
    }

    /// The full phase-boundary log.
    pub fn records(&self) -> &[TransitionRecord] {
        &self.records
    }

    /// Human-readable trail of all recorded boundaries.
    pub fn summary(&self) -> String {
        let trail: Vec<String> = self
            .records
            .iter()
            .map(|r| match r.from {
                Some(from) => format!("{}:{from}→{}", r.edge, r.to),
                None => format!("{}:start→{}", r.edge, r.to),
            })
            .collect();
        format!(
            "{} ({} records) [{}]",
            self.phase.label(),
            self.records.len(),
            trail.join(" ")
        )
    }

    // ── Request handling ─────────────────────────────────────────────────

    /// Submit a transition request.
    ///
    /// Self-transitions, and duplicates of the in-flight or pending pair,
    /// are silent no-ops. While a transition is in flight the request lands
    /// in the single pending slot, overwriting whatever was there.
    pub fn request_transition(&mut self, tree: &mut StateTree, request: TransitionRequest) {
        if request.from == Some(request.to) {
            return;
        }
        if self.in_flight() == Some(request) || self.pending == Some(request) {
            debug!(to = %request.to, "duplicate transition request dropped");
            return;
        }
        if self.is_transitioning() {
            if let Some(previous) = self.pending.replace(request) {
                debug!(
                    discarded = %previous.to,
                    to = %request.to,
                    "pending transition overwritten"
                );
            } else {
                debug!(to = %request.to, "transition in flight; request coalesced");
            }
            return;
        }
        self.begin_transition(tree, request, None);
    }

    fn in_flight(&self) -> Option<TransitionRequest> {
        match &self.phase {
            TransitionPhase::Idle => None,
            TransitionPhase::Exit { request, .. } | TransitionPhase::Enter { request, .. } => {
                Some(*request)
            }
        }
    }

    // ── Phase machinery ──────────────────────────────────────────────────

    fn begin_transition(
        &mut self,
        tree: &mut StateTree,
        request: TransitionRequest,
        reason: Option<String>,
    ) {
        // A previous phase's operations must never outlive their token.
        self.executor.cancel();
        self.executor.reset_token();

        let lca = request.from.and_then(|from| tree.lca(from, request.to));
        let exit_chain: Vec<StateId> = match request.from {
            Some(from) => tree
                .ancestors(from)
                .take_while(|id| Some(*id) != lca)
                .collect(),
            None => Vec::new(),
        };

        debug!(
            from = ?request.from,
            to = %request.to,
            lca = ?lca,
            exit_states = exit_chain.len(),
            "transition starting"
        );
        let reason = reason.or_else(|| request.from.is_none().then(|| "initial".to_string()));
        self.record(request, PhaseEdge::ExitStarted, reason);

        let steps = self.gather_steps(tree, &exit_chain, PhaseDirection::Deactivate);
        let launched = self.executor.run(steps);
        self.phase = TransitionPhase::Exit {
            request,
            lca,
            exit_chain,
        };
        if launched == 0 {
            self.execute_enter_phase(tree);
        }
    }

    /// The structural change plus enter-phase launch. Entered only once the
    /// exit phase's outstanding count is zero.
    fn execute_enter_phase(&mut self, tree: &mut StateTree) {
        let TransitionPhase::Exit {
            request,
            lca,
            exit_chain,
        } = std::mem::replace(&mut self.phase, TransitionPhase::Idle)
        else {
            return;
        };

        // Detach the old branch bottom-up. Each state handles only its own
        // unlinking; the LCA's link to the old branch is cleared explicitly
        // in case the new branch does not pass through it.
        for &id in &exit_chain {
            if let Some(behavior) = tree.behavior_mut(id) {
                behavior.on_exit();
            }
            tree.set_active_child(id, None);
            debug!(state = tree.state_name(id), "state exited");
        }
        if let Some(anchor) = lca {
            tree.set_active_child(anchor, None);
        }

        let leaf = match tree.resolve_initial_leaf(request.to) {
            Ok(leaf) => leaf,
            Err(err) => {
                error!(to = %request.to, error = %err, "target resolution failed; transition aborted");
                self.record(request, PhaseEdge::Completed, Some("aborted".to_string()));
                self.resume_pending(tree);
                return;
            }
        };

        // Attach the new branch top-down.
        let mut enter_chain: Vec<StateId> = tree
            .ancestors(leaf)
            .take_while(|id| Some(*id) != lca)
            .collect();
        enter_chain.reverse();
        for &id in &enter_chain {
            match tree.parent(id) {
                Some(parent) => tree.set_active_child(parent, Some(id)),
                None => tree.mark_root_active(id),
            }
            if let Some(behavior) = tree.behavior_mut(id) {
                behavior.on_enter();
            }
            debug!(state = tree.state_name(id), "state entered");
        }

        self.record(request, PhaseEdge::EnterStarted, None);
        let steps = self.gather_steps(tree, &enter_chain, PhaseDirection::Activate);
        let launched = self.executor.run(steps);
        self.phase = TransitionPhase::Enter { request, lca };
        if launched == 0 {
            self.end_transition(tree);
        }
    }

    fn end_transition(&mut self, tree: &mut StateTree) {
        let TransitionPhase::Enter { request, .. } =
            std::mem::replace(&mut self.phase, TransitionPhase::Idle)
        else {
            return;
        };
        debug!(from = ?request.from, to = %request.to, "transition complete");
        self.record(request, PhaseEdge::Completed, None);
        self.resume_pending(tree);
    }

    fn resume_pending(&mut self, tree: &mut StateTree) {
        if let Some(next) = self.pending.take() {
            self.begin_transition(tree, next, Some("coalesced".to_string()));
        }
    }

    /// Collect eligible phase steps for a chain, preserving per-state
    /// registration order and chain order. Ineligible activities are
    /// silently skipped.
    fn gather_steps(
        &self,
        tree: &StateTree,
        chain: &[StateId],
        direction: PhaseDirection,
    ) -> Vec<PhaseStep> {
        let mut steps = Vec::new();
        for &state in chain {
            for activity in tree.activities(state) {
                match activity.try_lock() {
                    Ok(cell) => {
                        if direction.is_applicable(cell.mode()) {
                            steps.push(PhaseStep::new(activity.clone(), direction));
                        }
                    }
                    Err(_) => {
                        // Still held by a task from a cancelled phase; its
                        // mode is transitional, so it is ineligible anyway.
                        warn!(
                            state = tree.state_name(state),
                            "activity busy at gather time; skipped"
                        );
                    }
                }
            }
        }
        steps
    }

    // ── Tick ─────────────────────────────────────────────────────────────

    /// Advance the sequencer by one frame.
    ///
    /// Reaps completed operations, then advances as many phase boundaries
    /// as have fully drained; a transition whose phases launch nothing
    /// completes within this same call. While operations remain
    /// outstanding, per-state updates are skipped; when idle, the active
    /// path is updated root→leaf and the transition policy is evaluated
    /// leaf→root, submitting the first requested target.
    pub fn tick(&mut self, tree: &mut StateTree, dt: f64) {
        self.executor.reap();
        loop {
            if self.executor.is_executing() {
                return;
            }
            match self.phase {
                TransitionPhase::Idle => break,
                TransitionPhase::Exit { .. } => self.execute_enter_phase(tree),
                TransitionPhase::Enter { .. } => self.end_transition(tree),
            }
        }
        self.update_states(tree, dt);
    }

    fn update_states(&mut self, tree: &mut StateTree, dt: f64) {
        let path = tree.active_path();
        if path.is_empty() {
            return;
        }
        for &id in &path {
            if let Some(behavior) = tree.behavior_mut(id) {
                behavior.on_update(dt);
            }
        }
        let leaf = path[path.len() - 1];
        for &id in path.iter().rev() {
            let target = tree.behavior(id).and_then(|b| b.transition());
            if let Some(to) = target {
                self.request_transition(
                    tree,
                    TransitionRequest {
                        from: Some(leaf),
                        to,
                    },
                );
                break;
            }
        }
    }

    fn record(&mut self, request: TransitionRequest, edge: PhaseEdge, reason: Option<String>) {
        self.records.push(TransitionRecord {
            from: request.from,
            to: request.to,
            edge,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason,
        });
    }

    /// Cancel any in-flight phase and drop the pending slot. Used at
    /// machine disposal; the sequencer is left idle.
    pub(crate) fn shutdown(&mut self) {
        self.executor.cancel();
        self.phase = TransitionPhase::Idle;
        self.pending = None;
    }
}

impl Default for TransitionSequencer {
    fn default() -> Self {
        Self::new()
    }
}
