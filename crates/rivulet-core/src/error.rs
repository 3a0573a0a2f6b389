#![forbid(unsafe_code)]

//! Error types for the timeline engine.

use thiserror::Error;

use crate::node::NodeId;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TimelineError>;

/// Everything that can go wrong inside the timeline engine.
///
/// Rollback past the ends of recorded history and rollback with time
/// travel disabled are deliberate no-ops, not errors.
#[derive(Debug, Error)]
pub enum TimelineError {
    /// An ambient-timeline operation ran before `Timeline::initialize`.
    #[error("no timeline installed in the current scope")]
    Uninitialized,

    /// A user-supplied recompute, reducer or listener panicked during an
    /// update. The update is aborted; mutations performed before the
    /// panic are not rolled back.
    #[error("user computation panicked in {label}: {reason}")]
    UserComputation { label: String, reason: String },

    /// A node's erased value did not downcast to the type its handle
    /// declares. This indicates a bug in handle construction.
    #[error("node {node:?} holds a value of an unexpected type")]
    TypeMismatch { node: NodeId },

    /// A node's lazy initializer panicked on a previous read, leaving no
    /// value to return.
    #[error("node {node:?} has no value: its initializer failed")]
    ValuePoisoned { node: NodeId },
}

impl TimelineError {
    #[must_use]
    pub fn user(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UserComputation {
            label: label.into(),
            reason: reason.into(),
        }
    }
}

/// Best-effort extraction of a human-readable message from a panic payload.
pub(crate) fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_label_and_reason() {
        let err = TimelineError::user("counter", "boom");
        let msg = err.to_string();
        assert!(msg.contains("counter"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn panic_reason_handles_str_and_string() {
        let s: Box<dyn std::any::Any + Send> = Box::new("static message");
        assert_eq!(panic_reason(&*s), "static message");

        let s: Box<dyn std::any::Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_reason(&*s), "owned message");

        let s: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(panic_reason(&*s), "panic");
    }
}
