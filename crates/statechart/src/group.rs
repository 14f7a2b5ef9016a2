//! Sequential composite activity.
//!
//! A [`SequentialGroup`] is itself an [`Activity`] that owns an ordered list
//! of child activities. Activation drives the children strictly in list
//! order (each child completes fully before the next starts) and
//! deactivation drives them in reverse order. Groups compose recursively.
//!
//! The group's own mode (held by its enclosing `ActivityCell`) reflects
//! aggregate completion, not any single child's mode. If the token is
//! cancelled mid-sequence the sweep stops early and the group unwinds with
//! `Cancelled`, which rolls the group's mode back to its stable origin;
//! children that already completed keep their own modes and stay
//! individually eligible for the next matching phase.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::activity::{Activity, ActivityCell};
use crate::errors::StatechartError;

/// An activity composed of children executed strictly in order.
pub struct SequentialGroup {
    name: String,
    children: Vec<ActivityCell>,
}

impl SequentialGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    /// Append a child. Order of insertion is the activation order.
    pub fn with_child(mut self, child: impl Activity + 'static) -> Self {
        self.children.push(ActivityCell::new(child));
        self
    }

    /// Child cells, in activation order. Mainly useful for diagnostics.
    pub fn children(&self) -> &[ActivityCell] {
        &self.children
    }
}

#[async_trait]
impl Activity for SequentialGroup {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_activate(&mut self, cancel: &CancellationToken) -> Result<(), StatechartError> {
        for child in &mut self.children {
            if cancel.is_cancelled() {
                return Err(StatechartError::cancelled(format!(
                    "group '{}' activation interrupted",
                    self.name
                )));
            }
            child.activate(cancel).await?;
        }
        Ok(())
    }

    async fn on_deactivate(&mut self, cancel: &CancellationToken) -> Result<(), StatechartError> {
        for child in self.children.iter_mut().rev() {
            if cancel.is_cancelled() {
                return Err(StatechartError::cancelled(format!(
                    "group '{}' deactivation interrupted",
                    self.name
                )));
            }
            child.deactivate(cancel).await?;
        }
        Ok(())
    }

    fn on_dispose(&mut self) {
        for child in &mut self.children {
            child.dispose();
        }
    }
}
