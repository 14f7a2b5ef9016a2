//! Runtime error taxonomy.
//!
//! Every error in the statechart runtime is represented here. Callers can
//! query `is_cancellation()` / `is_structural()` without string matching.
//!
//! Only two classes of error ever reach the public surface:
//! - construction errors (`StructuralMisuse`) returned from tree-building
//!   operations, and
//! - activity operation errors, which are caught at the executor boundary
//!   (logged and suppressed) and never escape a `tick` call.

use thiserror::Error;

/// Unified error type for all statechart runtime operations.
#[derive(Debug, Error)]
pub enum StatechartError {
    /// An activity's activate/deactivate effect returned an error.
    ///
    /// Caught at the executor boundary: the phase continues, the activity
    /// may be left in its transitional mode until the next matching phase.
    #[error("activity failure [{activity}]: {message}")]
    ActivityFailure { activity: String, message: String },

    /// The operation observed cancellation and unwound cooperatively.
    ///
    /// Expected during transition replacement; always suppressed, never
    /// surfaced as a user-visible failure.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The state tree was configured or addressed incorrectly: unknown id,
    /// second root, non-child initial-state result, or a broken
    /// `initial_child` chain. These must be prevented by construction.
    #[error("structural misuse: {0}")]
    StructuralMisuse(String),

    /// Any other error that doesn't fit the above categories.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StatechartError {
    /// Build an `ActivityFailure` variant conveniently.
    pub fn activity(activity: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ActivityFailure {
            activity: activity.into(),
            message: message.into(),
        }
    }

    /// Build a `Cancelled` variant conveniently.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Build a `StructuralMisuse` variant conveniently.
    pub fn structural(message: impl Into<String>) -> Self {
        Self::StructuralMisuse(message.into())
    }

    /// Returns `true` if this error is a cooperative cancellation.
    ///
    /// Cancellations are suppressed at `debug` level rather than `warn`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns `true` if this error indicates a construction-time bug.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::StructuralMisuse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_classified() {
        let err = StatechartError::cancelled("transition replaced");
        assert!(err.is_cancellation());
        assert!(!err.is_structural());
    }

    #[test]
    fn activity_failure_is_not_cancellation() {
        let err = StatechartError::activity("fade_out", "texture missing");
        assert!(!err.is_cancellation());
        assert_eq!(
            err.to_string(),
            "activity failure [fade_out]: texture missing"
        );
    }

    #[test]
    fn structural_misuse_is_classified() {
        let err = StatechartError::structural("second root");
        assert!(err.is_structural());
        assert!(err.to_string().contains("second root"));
    }

    #[test]
    fn internal_wraps_anyhow() {
        let err: StatechartError = anyhow::anyhow!("out of ids").into();
        assert!(err.to_string().contains("out of ids"));
    }
}
