//! Arena-backed state tree.
//!
//! States live in a flat `Vec` inside [`StateTree`] and reference each other
//! by [`StateId`] index. Parent links, active-child links, and all chain
//! walks are id-based, so the tree has no reference cycles and no interior
//! sharing.
//!
//! Activeness is encoded by the `active_child` links: starting at the root
//! and following them yields exactly one path to the unique active leaf.
//! Those links are mutated only during a transition's structural-change
//! step; everything else is configuration-time (`add_root`, `add_child`,
//! `add_activity`) or read-only queries.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::activity::{shared, Activity, SharedActivity};
use crate::errors::StatechartError;

// ── StateId ──────────────────────────────────────────────────────────────────

/// Index-based handle to a state in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateId(pub(crate) usize);

impl StateId {
    /// Raw arena index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state#{}", self.0)
    }
}

// ── StateBehavior ────────────────────────────────────────────────────────────

/// Per-state logic and policy hooks.
///
/// Lifecycle hooks (`on_enter` / `on_exit`) fire exactly once per structural
/// enter/exit event; `on_update` fires once per tick while the state is on
/// the active path and no transition is in flight. The two policy queries
/// must be pure and stable for a given internal configuration:
///
/// - [`initial_child`](Self::initial_child) names the child to enter
///   immediately after this state is entered (`None` for a leaf);
/// - [`transition`](Self::transition) names a requested target state, or
///   `None` to remain. It is evaluated once per tick, leaf to root along
///   the active chain, only while the sequencer is idle.
pub trait StateBehavior: Send {
    /// Name for logging and diagnostics.
    fn name(&self) -> &str {
        "state"
    }

    /// Fired when this state joins the active path.
    fn on_enter(&mut self) {}

    /// Fired when this state leaves the active path.
    fn on_exit(&mut self) {}

    /// Per-tick update while on the active path.
    fn on_update(&mut self, _dt: f64) {}

    /// The child to descend into after entry, or `None` for a leaf.
    fn initial_child(&self) -> Option<StateId> {
        None
    }

    /// A requested transition target, or `None` to remain.
    fn transition(&self) -> Option<StateId> {
        None
    }

    /// Disposal hook, invoked exactly once at machine disposal.
    fn on_dispose(&mut self) {}
}

/// Behavior with no hooks and no policy, a plain structural state.
pub struct NullBehavior;

impl StateBehavior for NullBehavior {}

// ── StateNode / StateTree ────────────────────────────────────────────────────

struct StateNode {
    behavior: Box<dyn StateBehavior>,
    parent: Option<StateId>,
    active_child: Option<StateId>,
    activities: Vec<SharedActivity>,
}

/// The state hierarchy: an arena of nodes plus the active-path links.
pub struct StateTree {
    nodes: Vec<StateNode>,
    root: Option<StateId>,
    /// Set once the root has been structurally entered; activeness queries
    /// return nothing before the machine's initial transition completes it.
    active_root: Option<StateId>,
}

impl StateTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: None,
            active_root: None,
        }
    }

    /// Number of states in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: StateId) -> bool {
        id.0 < self.nodes.len()
    }

    /// Add the root state. At most one root is allowed.
    pub fn add_root(
        &mut self,
        behavior: impl StateBehavior + 'static,
    ) -> Result<StateId, StatechartError> {
        if self.root.is_some() {
            return Err(StatechartError::structural("tree already has a root"));
        }
        let id = StateId(self.nodes.len());
        self.nodes.push(StateNode {
            behavior: Box::new(behavior),
            parent: None,
            active_child: None,
            activities: Vec::new(),
        });
        self.root = Some(id);
        Ok(id)
    }

    /// Add a child state under `parent`.
    pub fn add_child(
        &mut self,
        parent: StateId,
        behavior: impl StateBehavior + 'static,
    ) -> Result<StateId, StatechartError> {
        if !self.contains(parent) {
            return Err(StatechartError::structural(format!(
                "unknown parent {parent}"
            )));
        }
        let id = StateId(self.nodes.len());
        self.nodes.push(StateNode {
            behavior: Box::new(behavior),
            parent: Some(parent),
            active_child: None,
            activities: Vec::new(),
        });
        Ok(id)
    }

    /// Attach an owned activity to a state. Configuration-time only; the
    /// insertion order defines phase ordering within the state.
    pub fn add_activity(
        &mut self,
        state: StateId,
        activity: impl Activity + 'static,
    ) -> Result<SharedActivity, StatechartError> {
        self.add_shared_activity(state, shared(activity))
    }

    /// Attach an activity already in shared-handle form. Useful when the
    /// caller wants to keep a handle for inspection.
    pub fn add_shared_activity(
        &mut self,
        state: StateId,
        activity: SharedActivity,
    ) -> Result<SharedActivity, StatechartError> {
        if !self.contains(state) {
            return Err(StatechartError::structural(format!("unknown state {state}")));
        }
        self.nodes[state.0].activities.push(activity.clone());
        Ok(activity)
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn root(&self) -> Option<StateId> {
        self.root
    }

    pub fn parent(&self, id: StateId) -> Option<StateId> {
        self.nodes.get(id.0).and_then(|n| n.parent)
    }

    pub fn behavior(&self, id: StateId) -> Option<&dyn StateBehavior> {
        self.nodes.get(id.0).map(|n| n.behavior.as_ref())
    }

    pub fn behavior_mut(&mut self, id: StateId) -> Option<&mut (dyn StateBehavior + 'static)> {
        self.nodes.get_mut(id.0).map(|n| n.behavior.as_mut())
    }

    pub fn state_name(&self, id: StateId) -> &str {
        self.behavior(id).map(|b| b.name()).unwrap_or("<unknown>")
    }

    /// Activities attached to a state, in registration order.
    pub fn activities(&self, id: StateId) -> &[SharedActivity] {
        self.nodes
            .get(id.0)
            .map(|n| n.activities.as_slice())
            .unwrap_or(&[])
    }

    pub fn active_child(&self, id: StateId) -> Option<StateId> {
        self.nodes.get(id.0).and_then(|n| n.active_child)
    }

    /// Iterator over `id` and its ancestors, leaf-first up to the root.
    pub fn ancestors(&self, id: StateId) -> impl Iterator<Item = StateId> + '_ {
        std::iter::successors(self.contains(id).then_some(id), move |cur| {
            self.nodes[cur.0].parent
        })
    }

    /// Lowest common ancestor of `a` and `b`.
    ///
    /// Collects the ancestors of `a` (inclusive) into a set, then walks up
    /// from `b` and returns the first hit. `None` only for ids outside the
    /// tree, which cannot occur for a well-formed single-rooted tree.
    pub fn lca(&self, a: StateId, b: StateId) -> Option<StateId> {
        let seen: HashSet<StateId> = self.ancestors(a).collect();
        self.ancestors(b).find(|id| seen.contains(id))
    }

    /// The active path, root first, ending at the active leaf. Empty until
    /// the machine's initial transition has structurally entered the root.
    pub fn active_path(&self) -> Vec<StateId> {
        let mut path = Vec::new();
        let mut cursor = self.active_root;
        while let Some(id) = cursor {
            path.push(id);
            cursor = self.active_child(id);
        }
        path
    }

    /// The unique active leaf, if the machine has started.
    pub fn active_leaf(&self) -> Option<StateId> {
        self.active_path().last().copied()
    }

    /// Follow `initial_child` from `from` until a leaf is reached.
    ///
    /// Guarded: a child that is not actually a child of the queried state,
    /// or a chain longer than the tree itself, is a construction bug and is
    /// reported as `StructuralMisuse` instead of looping forever.
    pub fn resolve_initial_leaf(&self, from: StateId) -> Result<StateId, StatechartError> {
        if !self.contains(from) {
            return Err(StatechartError::structural(format!("unknown state {from}")));
        }
        let mut current = from;
        for _ in 0..=self.nodes.len() {
            let Some(child) = self.nodes[current.0].behavior.initial_child() else {
                return Ok(current);
            };
            if self.parent(child) != Some(current) {
                return Err(StatechartError::structural(format!(
                    "initial child {child} of {current} is not its child"
                )));
            }
            current = child;
        }
        Err(StatechartError::structural(format!(
            "initial-child chain from {from} does not terminate"
        )))
    }

    // ── Structural mutation (sequencer only) ─────────────────────────────

    pub(crate) fn set_active_child(&mut self, id: StateId, child: Option<StateId>) {
        if let Some(node) = self.nodes.get_mut(id.0) {
            node.active_child = child;
        }
    }

    pub(crate) fn mark_root_active(&mut self, id: StateId) {
        self.active_root = Some(id);
    }

    // ── Disposal ─────────────────────────────────────────────────────────

    /// Dispose every state and every transitively owned activity, in tree
    /// (insertion) order, exactly once each, regardless of current mode.
    pub(crate) async fn dispose_all(&mut self) {
        for index in 0..self.nodes.len() {
            let name = self.nodes[index].behavior.name().to_owned();
            debug!(state = %name, "disposing state");
            self.nodes[index].behavior.on_dispose();
            let activities = self.nodes[index].activities.clone();
            for activity in activities {
                activity.lock().await.dispose();
            }
        }
        self.active_root = None;
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl StateBehavior for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    struct WithInitial {
        name: &'static str,
        initial: Option<StateId>,
    }

    impl StateBehavior for WithInitial {
        fn name(&self) -> &str {
            self.name
        }
        fn initial_child(&self) -> Option<StateId> {
            self.initial
        }
    }

    /// Root `R` with children `Ground { Idle, Move }` and `Air`.
    fn sample_tree() -> (StateTree, StateId, StateId, StateId, StateId, StateId) {
        let mut tree = StateTree::new();
        let root = tree.add_root(Named("R")).unwrap();
        let ground = tree.add_child(root, Named("Ground")).unwrap();
        let idle = tree.add_child(ground, Named("Idle")).unwrap();
        let mv = tree.add_child(ground, Named("Move")).unwrap();
        let air = tree.add_child(root, Named("Air")).unwrap();
        (tree, root, ground, idle, mv, air)
    }

    #[test]
    fn second_root_is_rejected() {
        let mut tree = StateTree::new();
        tree.add_root(Named("R")).unwrap();
        let err = tree.add_root(Named("R2")).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let mut tree = StateTree::new();
        let err = tree.add_child(StateId(7), Named("X")).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn ancestors_walk_leaf_first() {
        let (tree, root, ground, idle, _, _) = sample_tree();
        let chain: Vec<StateId> = tree.ancestors(idle).collect();
        assert_eq!(chain, vec![idle, ground, root]);
    }

    #[test]
    fn lca_of_siblings_is_parent() {
        let (tree, _, ground, idle, mv, _) = sample_tree();
        assert_eq!(tree.lca(idle, mv), Some(ground));
    }

    #[test]
    fn lca_across_branches_is_root() {
        let (tree, root, _, idle, _, air) = sample_tree();
        assert_eq!(tree.lca(idle, air), Some(root));
    }

    #[test]
    fn lca_with_ancestor_is_the_ancestor() {
        let (tree, _, ground, idle, _, _) = sample_tree();
        assert_eq!(tree.lca(idle, ground), Some(ground));
        assert_eq!(tree.lca(ground, idle), Some(ground));
    }

    #[test]
    fn lca_of_self_is_self() {
        let (tree, _, _, idle, _, _) = sample_tree();
        assert_eq!(tree.lca(idle, idle), Some(idle));
    }

    #[test]
    fn no_descendant_of_lca_is_a_common_ancestor() {
        let (tree, _, ground, idle, mv, _) = sample_tree();
        let lca = tree.lca(idle, mv).unwrap();
        assert_eq!(lca, ground);
        // The only strict descendants of Ground on these chains are the
        // leaves themselves, which are not ancestors of each other.
        assert!(!tree.ancestors(mv).any(|id| id == idle));
        assert!(!tree.ancestors(idle).any(|id| id == mv));
    }

    #[test]
    fn initial_leaf_resolution_follows_the_chain() {
        let mut tree = StateTree::new();
        let root = tree
            .add_root(WithInitial {
                name: "R",
                initial: Some(StateId(1)),
            })
            .unwrap();
        let mid = tree
            .add_child(
                root,
                WithInitial {
                    name: "Mid",
                    initial: Some(StateId(2)),
                },
            )
            .unwrap();
        let leaf = tree.add_child(mid, Named("Leaf")).unwrap();
        assert_eq!(tree.resolve_initial_leaf(root).unwrap(), leaf);
    }

    #[test]
    fn initial_child_must_be_an_actual_child() {
        let mut tree = StateTree::new();
        let root = tree
            .add_root(WithInitial {
                name: "R",
                initial: Some(StateId(2)),
            })
            .unwrap();
        let _a = tree.add_child(root, Named("A")).unwrap();
        let a_child = tree.add_child(StateId(1), Named("AChild")).unwrap();
        assert_eq!(a_child, StateId(2));
        // Root claims a grandchild as its initial child.
        let err = tree.resolve_initial_leaf(root).unwrap_err();
        assert!(err.is_structural());
    }

    #[test]
    fn active_path_is_empty_before_start() {
        let (tree, _, _, _, _, _) = sample_tree();
        assert!(tree.active_path().is_empty());
        assert_eq!(tree.active_leaf(), None);
    }

    #[test]
    fn active_path_follows_links() {
        let (mut tree, root, ground, idle, _, _) = sample_tree();
        tree.mark_root_active(root);
        tree.set_active_child(root, Some(ground));
        tree.set_active_child(ground, Some(idle));
        assert_eq!(tree.active_path(), vec![root, ground, idle]);
        assert_eq!(tree.active_leaf(), Some(idle));
    }

    #[tokio::test]
    async fn dispose_all_reaches_states_and_activities() {
        use crate::activity::Activity;
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        struct CountingDispose(Arc<AtomicU32>);

        #[async_trait]
        impl Activity for CountingDispose {
            fn on_dispose(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let (mut tree, root, ground, _, _, _) = sample_tree();
        let count = Arc::new(AtomicU32::new(0));
        tree.add_activity(root, CountingDispose(count.clone()))
            .unwrap();
        tree.add_activity(ground, CountingDispose(count.clone()))
            .unwrap();

        tree.dispose_all().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);

        // Idempotent per activity even if traversed again.
        tree.dispose_all().await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
