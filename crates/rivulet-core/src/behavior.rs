#![forbid(unsafe_code)]

//! Sampled values.
//!
//! A [`Behavior`] is a read-only value consulted at sampling time. It is
//! not itself a graph vertex: it is either backed by a state node or
//! computed by a pure closure. The two-armed representation lets the
//! engine sample node-backed behaviors from inside the coarse lock
//! (during `gate` recomputation) without re-entering it — a trait object
//! would have to go through the public locking API and deadlock.

use std::sync::Arc;

use crate::error::Result;
use crate::node::NodeId;
use crate::timeline::{Timeline, TimelineInner};

enum Kind<A> {
    /// Computed on demand; needs no node.
    Pure(Arc<dyn Fn() -> A + Send + Sync>),
    /// Backed by a state node; sampled through the timeline.
    Node { timeline: Timeline, node: NodeId },
}

/// A (possibly continuously varying) sampled value.
pub struct Behavior<A> {
    kind: Kind<A>,
}

impl<A> Clone for Behavior<A> {
    fn clone(&self) -> Self {
        let kind = match &self.kind {
            Kind::Pure(f) => Kind::Pure(Arc::clone(f)),
            Kind::Node { timeline, node } => Kind::Node {
                timeline: timeline.clone(),
                node: *node,
            },
        };
        Self { kind }
    }
}

impl<A: Clone + Send + Sync + 'static> Behavior<A> {
    /// A behavior computed by a pure closure.
    pub fn from_fn(f: impl Fn() -> A + Send + Sync + 'static) -> Self {
        Self {
            kind: Kind::Pure(Arc::new(f)),
        }
    }

    /// A behavior that always samples to `value`.
    pub fn constant(value: A) -> Self {
        Self::from_fn(move || value.clone())
    }

    pub(crate) fn from_node(timeline: Timeline, node: NodeId) -> Self {
        Self {
            kind: Kind::Node { timeline, node },
        }
    }

    /// Sample the current value.
    #[must_use]
    pub fn sample(&self) -> A {
        match &self.kind {
            Kind::Pure(f) => (**f)(),
            Kind::Node { timeline, node } => timeline
                .with_inner(|inner| inner.fetch_as::<A>(*node))
                .expect("behavior node holds a value of its declared type"),
        }
    }

    /// Sample with the coarse lock already held.
    pub(crate) fn sample_with(&self, inner: &mut TimelineInner) -> Result<A> {
        match &self.kind {
            Kind::Pure(f) => Ok((**f)()),
            Kind::Node { node, .. } => inner.fetch_as::<A>(*node),
        }
    }
}

impl<A: Clone + Send + Sync + 'static> std::fmt::Debug for Behavior<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            Kind::Pure(_) => f.write_str("Behavior::Pure"),
            Kind::Node { node, .. } => f.debug_tuple("Behavior::Node").field(node).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use crate::timeline::TimelineConfig;

    #[test]
    fn constant_behavior_always_samples_the_same() {
        let b = Behavior::constant(12);
        assert_eq!(b.sample(), 12);
        assert_eq!(b.clone().sample(), 12);
    }

    #[test]
    fn pure_behavior_recomputes_per_sample() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);
        let b = Behavior::from_fn(move || counted.fetch_add(1, Ordering::Relaxed));
        assert_eq!(b.sample(), 0);
        assert_eq!(b.sample(), 1);
        assert_eq!(calls.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn state_backed_behavior_tracks_the_state() {
        let tl = Timeline::new(Scope::new(), TimelineConfig::new());
        let s = tl.mutable_state(1, None);
        let b = s.behavior();
        assert_eq!(b.sample(), 1);
        s.set(9).unwrap();
        assert_eq!(b.sample(), 9);
    }
}
