#![forbid(unsafe_code)]

//! Graph vertices.
//!
//! A [`Node`] is one vertex of the timeline's dependency DAG. It stores a
//! type-erased value slot, an optional recompute closure, the per-frame
//! and rollback hooks, and its listener lists. Nodes do not know their
//! children; adjacency lives in the timeline, keyed by [`NodeId`], so no
//! ownership cycle can form through the graph.
//!
//! # Invariants
//!
//! 1. `NodeId`s are issued monotonically and never reused.
//! 2. A node with `dirty == false` and clean ancestors satisfies
//!    `value == recompute()`.
//! 3. The value slot is a sum: pending thunk, ready value, or poisoned
//!    (its initializer panicked). It is never a null sentinel.

use std::any::Any;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::timeline::TimelineInner;

/// Opaque node identifier. Monotonic, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    /// The raw index, for diagnostics.
    #[must_use]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Identifier of a registered listener, used to unregister it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// A node's current value, erased to `Any` so the timeline can store
/// heterogeneous vertices in one table. Handles downcast on read.
pub(crate) type ArcValue = Arc<dyn Any + Send + Sync>;

/// Derived-node recompute closure. Reads parent values through the
/// timeline (the single read entry point) and returns the new value.
pub(crate) type Recompute = Arc<dyn Fn(&mut TimelineInner) -> Result<ArcValue> + Send + Sync>;

/// One-shot lazy initializer for a node's first value.
pub(crate) type Thunk = Box<dyn FnOnce(&mut TimelineInner) -> Result<ArcValue> + Send>;

/// Hook queued when a node fires, run before the next external update.
/// Event nodes use it to fall back to their resting occurrence.
pub(crate) type FrameHook = Arc<dyn Fn(&mut TimelineInner, NodeId) + Send + Sync>;

/// Hook run during `reset_state`, after the node's raw value has been
/// restored from the target snapshot.
pub(crate) type RollbackHook = Arc<dyn Fn(&mut TimelineInner, NodeId, u64) + Send + Sync>;

/// Synchronous listener: runs inside the coarse lock, in registration
/// order, with access to the timeline internals. Engine primitives
/// (`hold`, `fold`, `flatten`) are built on this channel.
pub(crate) type SyncFn = Arc<Mutex<dyn FnMut(&mut TimelineInner, &ArcValue) + Send>>;

/// Asynchronous listener: dispatched as a job on the runtime scope,
/// outside the lock region.
pub(crate) type AsyncFn = Arc<dyn Fn(&ArcValue) + Send + Sync>;

pub(crate) struct SyncListener {
    pub(crate) id: ListenerId,
    pub(crate) f: SyncFn,
}

/// The value slot: a sum over the lazy-initialization lifecycle.
pub(crate) enum NodeValue {
    /// Not yet computed; forced on first read.
    Pending(Thunk),
    /// Computed or assigned.
    Ready(ArcValue),
    /// The initializer panicked or was interrupted mid-force.
    Poisoned,
}

/// One vertex of the dependency graph.
pub(crate) struct Node {
    pub(crate) id: NodeId,
    pub(crate) label: Option<String>,
    pub(crate) value: NodeValue,
    pub(crate) recompute: Option<Recompute>,
    pub(crate) on_next_frame: Option<FrameHook>,
    pub(crate) on_rollback: Option<RollbackHook>,
    pub(crate) dirty: bool,
    pub(crate) sync_listeners: Vec<SyncListener>,
    pub(crate) async_listeners: Vec<AsyncFn>,
}

impl Node {
    pub(crate) fn new(id: NodeId, value: NodeValue) -> Self {
        Self {
            id,
            label: None,
            value,
            recompute: None,
            on_next_frame: None,
            on_rollback: None,
            dirty: false,
            sync_listeners: Vec::new(),
            async_listeners: Vec::new(),
        }
    }

    /// Whether any listener (sync or async) is attached. Propagation uses
    /// this to decide eager recompute vs. dirty-marking under laziness.
    pub(crate) fn is_listened(&self) -> bool {
        !self.sync_listeners.is_empty() || !self.async_listeners.is_empty()
    }

    /// Display name for diagnostics: the label if present, else the id.
    pub(crate) fn display_label(&self) -> String {
        match &self.label {
            Some(label) => label.clone(),
            None => format!("node {}", self.id.0),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("dirty", &self.dirty)
            .field(
                "value",
                &match &self.value {
                    NodeValue::Pending(_) => "<pending>",
                    NodeValue::Ready(_) => "<ready>",
                    NodeValue::Poisoned => "<poisoned>",
                },
            )
            .field("sync_listeners", &self.sync_listeners.len())
            .field("async_listeners", &self.async_listeners.len())
            .finish()
    }
}
