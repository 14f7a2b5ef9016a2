//! Hierarchical state machine runtime with phased async activity execution.
//!
//! A [`StateTree`] is a hierarchy of composable states, each owning zero or
//! more asynchronous activities (animations, delayed effects, resource
//! loads). When the active leaf changes, the [`TransitionSequencer`]
//! computes the minimal set of states to exit and enter via their lowest
//! common ancestor, and drives the activities through two strictly
//! serialized phases:
//!
//! ```text
//! StateMachine::tick(dt)
//!   → sequencer idle: per-state on_update, transition policy query
//!   → request: exit phase, old branch's activities deactivate concurrently
//!   → exit drained: structural change (on_exit bottom-up, on_enter top-down)
//!   → enter phase, new branch's activities activate concurrently
//!   → done; a coalesced pending request begins immediately
//! ```
//!
//! "Concurrent" means many operations in flight within one phase, driven by
//! the host's per-frame tick; the sequencer itself never suspends. A new
//! request during a running transition is coalesced into a single pending
//! slot (newest wins); requesting a new transition always cancels the
//! previous phase's token first.
//!
//! ## Sub-modules
//!
//! | Module      | Purpose                                              |
//! |-------------|------------------------------------------------------|
//! | `activity`  | Four-mode activity lifecycle and gating              |
//! | `group`     | Sequential composite activity                        |
//! | `executor`  | Concurrent phase execution with error suppression    |
//! | `tree`      | Arena state tree, LCA, active-path bookkeeping       |
//! | `sequencer` | Exit → structural change → enter phase machine       |
//! | `machine`   | Tick driver and disposal facade                      |
//! | `errors`    | Unified error taxonomy                               |

pub mod activity;
pub mod errors;
pub mod executor;
pub mod group;
pub mod machine;
pub mod sequencer;
pub mod tree;

// Convenience re-exports for the common surface.
pub use activity::{shared, Activity, ActivityCell, ActivityMode, SharedActivity};
pub use errors::StatechartError;
pub use executor::{ActivityExecutor, PhaseDirection, PhaseStep};
pub use group::SequentialGroup;
pub use machine::StateMachine;
pub use sequencer::{
    PhaseEdge, TransitionPhase, TransitionRecord, TransitionRequest, TransitionSequencer,
};
pub use tree::{NullBehavior, StateBehavior, StateId, StateTree};
