#![forbid(unsafe_code)]

//! The timeline: owner of the reactive dependency graph.
//!
//! A [`Timeline`] owns every node, the parent→child adjacency, the frame
//! counters, the external-event trace and the per-frame history
//! snapshots. All mutation is serialized under one coarse mutex; there
//! are no suspension points inside the lock, and listeners that need to
//! block are dispatched asynchronously onto the runtime [`Scope`].
//!
//! # Propagation
//!
//! Updates are push-pull. An external update writes the new value, runs
//! the node's listeners, then settles every reachable descendant exactly
//! once, in ascending node-id order — ids are issued after parents, so
//! that is a topological order and a reconverging node never recomputes
//! against a half-updated frame. A descendant with listeners is
//! recomputed and notified; under the `lazy` flag a descendant with no
//! listeners is only marked dirty, and a later read anywhere in the
//! dirty region pulls fresh values on demand, recomputing dirty
//! ancestors bottom-up through the recompute closures.
//!
//! # Frames and time travel
//!
//! With time travel enabled, every external update advances the frame
//! counter, appends to the event trace and persists a snapshot of all
//! node values plus the adjacency. [`Timeline::reset_state`] restores a
//! recorded frame; navigating past the ends of history is a silent
//! no-op.
//!
//! # Invariants
//!
//! 1. The node table is append-only; rollback restores values, never
//!    removes vertices.
//! 2. Adjacency is acyclic by construction: edges are only added from
//!    already-existing parents to a freshly created child.
//! 3. A clean node agrees with its recompute closure whenever all its
//!    ancestors are clean.
//! 4. `current_frame == latest_frame` whenever the public API returns.
//! 5. The event at trace index `i` is the one that produced frame
//!    `i + 1` (frames are 1-based after the first external update).

use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ahash::{AHashMap, AHashSet};

use crate::error::{Result, TimelineError, panic_reason};
use crate::event::{BroadcastEvent, Event};
use crate::node::{
    ArcValue, AsyncFn, FrameHook, ListenerId, Node, NodeId, NodeValue, Recompute, RollbackHook,
    SyncFn, SyncListener,
};
use crate::scope::{Job, Scope};
use crate::state::{MutableState, State};

/// Period of the built-in clock producer.
pub const DEFAULT_CLOCK_TICK: Duration = Duration::from_millis(16);

/// Injected clock constructor: given the timeline and its paused state,
/// build the event that drives [`Timeline::time`].
pub type ClockFactory = Arc<dyn Fn(&Timeline, State<bool>) -> Event<Duration> + Send + Sync>;

thread_local! {
    static CURRENT: RefCell<Option<Timeline>> = const { RefCell::new(None) };
}

// ─── Configuration ───────────────────────────────────────────────────────────

/// Timeline construction flags.
#[derive(Clone, Default)]
pub struct TimelineConfig {
    pub(crate) time_travel: bool,
    pub(crate) lazy: bool,
    pub(crate) debug: bool,
    pub(crate) clock: Option<ClockFactory>,
}

impl TimelineConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record frames, the event trace and history snapshots, enabling
    /// [`Timeline::reset_state`] and friends.
    #[must_use]
    pub fn time_travel(mut self, on: bool) -> Self {
        self.time_travel = on;
        self
    }

    /// Mark unlistened children dirty instead of recomputing them during
    /// propagation; their values are pulled on demand at the next read.
    #[must_use]
    pub fn lazy(mut self, on: bool) -> Self {
        self.lazy = on;
        self
    }

    /// Log every propagation step at debug level.
    #[must_use]
    pub fn debug(mut self, on: bool) -> Self {
        self.debug = on;
        self
    }

    /// Inject the clock event constructor used by [`Timeline::time`].
    #[must_use]
    pub fn clock(
        mut self,
        factory: impl Fn(&Timeline, State<bool>) -> Event<Duration> + Send + Sync + 'static,
    ) -> Self {
        self.clock = Some(Arc::new(factory));
        self
    }
}

impl std::fmt::Debug for TimelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineConfig")
            .field("time_travel", &self.time_travel)
            .field("lazy", &self.lazy)
            .field("debug", &self.debug)
            .field("clock", &self.clock.as_ref().map(|_| "<factory>"))
            .finish()
    }
}

// ─── Trace and snapshots ─────────────────────────────────────────────────────

/// One recorded external update.
#[derive(Clone)]
pub struct ExternalEvent {
    node: NodeId,
    value: ArcValue,
}

impl ExternalEvent {
    /// The external node that was updated.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The recorded value, if it is a `T`.
    #[must_use]
    pub fn value_as<T: Clone + 'static>(&self) -> Option<T> {
        self.value.downcast_ref::<T>().cloned()
    }
}

impl std::fmt::Debug for ExternalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalEvent")
            .field("node", &self.node)
            .finish()
    }
}

/// Snapshot of the graph at the end of one frame.
///
/// Dirty flags are recorded alongside the values: a lazy node that was
/// stale when the frame ended must come back stale, so rollback leaves
/// it to recompute against the restored ancestors instead of freezing
/// the stale payload in as current.
#[derive(Clone)]
pub(crate) struct GraphState {
    values: AHashMap<NodeId, ArcValue>,
    dirty: AHashSet<NodeId>,
    children: AHashMap<NodeId, Vec<NodeId>>,
}

// ─── Inner (everything behind the coarse lock) ───────────────────────────────

/// Timeline internals. Every method runs with the coarse mutex held;
/// recompute closures, hooks and sync listeners receive `&mut self` so
/// they can read and update the graph without re-entering the lock.
pub struct TimelineInner {
    nodes: AHashMap<NodeId, Node>,
    children: AHashMap<NodeId, Vec<NodeId>>,
    external: AHashSet<NodeId>,
    next_node: u64,
    next_listener: u64,
    latest_frame: u64,
    current_frame: u64,
    history: AHashMap<u64, GraphState>,
    trace: Vec<ExternalEvent>,
    next_frame_queue: Vec<NodeId>,
    paused: Option<NodeId>,
    clock: Option<NodeId>,
    time: Option<NodeId>,
    config: TimelineConfig,
    jobs: mpsc::Sender<Job>,
}

impl TimelineInner {
    fn new(config: TimelineConfig, jobs: mpsc::Sender<Job>) -> Self {
        Self {
            nodes: AHashMap::new(),
            children: AHashMap::new(),
            external: AHashSet::new(),
            next_node: 0,
            next_listener: 0,
            latest_frame: 0,
            current_frame: 0,
            history: AHashMap::new(),
            trace: Vec::new(),
            next_frame_queue: Vec::new(),
            paused: None,
            clock: None,
            time: None,
            config,
            jobs,
        }
    }

    fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(&id).expect("node table is append-only")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes.get_mut(&id).expect("node table is append-only")
    }

    pub(crate) fn node_label(&self, id: NodeId) -> String {
        self.nodes
            .get(&id)
            .map(Node::display_label)
            .unwrap_or_else(|| format!("node {}", id.raw()))
    }

    pub(crate) fn config(&self) -> &TimelineConfig {
        &self.config
    }

    pub(crate) fn latest_frame(&self) -> u64 {
        self.latest_frame
    }

    // ── Factories ────────────────────────────────────────────────────

    /// Issue a fresh id and insert a vertex. The caller wires recompute,
    /// hooks, edges and externality afterwards.
    pub(crate) fn insert_node(&mut self, value: NodeValue, label: Option<String>) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        let mut node = Node::new(id, value);
        node.label = label;
        tracing::trace!(node = id.raw(), label = %node.display_label(), "node created");
        self.nodes.insert(id, node);
        self.children.entry(id).or_default();
        id
    }

    pub(crate) fn set_recompute(&mut self, id: NodeId, recompute: Recompute) {
        self.node_mut(id).recompute = Some(recompute);
    }

    pub(crate) fn set_on_next_frame(&mut self, id: NodeId, hook: FrameHook) {
        self.node_mut(id).on_next_frame = Some(hook);
    }

    pub(crate) fn set_on_rollback(&mut self, id: NodeId, hook: RollbackHook) {
        self.node_mut(id).on_rollback = Some(hook);
    }

    /// Record parent→child edges. Only ever called with a child created
    /// after its parents, which is what keeps the graph acyclic.
    pub(crate) fn register_edges(&mut self, parents: &[NodeId], child: NodeId) {
        for parent in parents {
            self.children.entry(*parent).or_default().push(child);
        }
    }

    /// Mark a node as externally driven: its updates advance the frame
    /// counter and are recorded in the trace.
    pub(crate) fn register_external(&mut self, id: NodeId) {
        self.external.insert(id);
    }

    // ── Listeners ────────────────────────────────────────────────────

    pub(crate) fn add_sync_listener(&mut self, node: NodeId, f: SyncFn) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.node_mut(node).sync_listeners.push(SyncListener { id, f });
        id
    }

    pub(crate) fn remove_sync_listener(&mut self, node: NodeId, listener: ListenerId) {
        if let Some(n) = self.nodes.get_mut(&node) {
            n.sync_listeners.retain(|l| l.id != listener);
        }
    }

    pub(crate) fn add_async_listener(&mut self, node: NodeId, f: AsyncFn) {
        self.node_mut(node).async_listeners.push(f);
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// The single read entry point. Dirty nodes recompute (recursively
    /// pulling dirty ancestors); pending nodes force their initializer.
    pub(crate) fn fetch_node_value(&mut self, id: NodeId) -> Result<ArcValue> {
        if self.node(id).dirty {
            let recompute = self.node(id).recompute.clone();
            if let Some(recompute) = recompute {
                let value = (*recompute)(self)?;
                self.write_raw(id, value.clone());
                return Ok(value);
            }
            self.node_mut(id).dirty = false;
        }
        match std::mem::replace(&mut self.node_mut(id).value, NodeValue::Poisoned) {
            NodeValue::Ready(value) => {
                self.node_mut(id).value = NodeValue::Ready(value.clone());
                Ok(value)
            }
            NodeValue::Pending(thunk) => {
                // The slot stays poisoned if the initializer fails.
                let value = thunk(self)?;
                self.write_raw(id, value.clone());
                Ok(value)
            }
            NodeValue::Poisoned => Err(TimelineError::ValuePoisoned { node: id }),
        }
    }

    /// Read a node's value downcast to the type its handle declares.
    pub(crate) fn fetch_as<T: Clone + Send + Sync + 'static>(&mut self, id: NodeId) -> Result<T> {
        let value = self.fetch_node_value(id)?;
        let typed: Arc<T> = value
            .downcast()
            .map_err(|_| TimelineError::TypeMismatch { node: id })?;
        Ok((*typed).clone())
    }

    /// Write a raw value and mark the node clean. Does not notify.
    pub(crate) fn write_raw(&mut self, id: NodeId, value: ArcValue) {
        let node = self.node_mut(id);
        node.value = NodeValue::Ready(value);
        node.dirty = false;
    }

    // ── The update entry point ───────────────────────────────────────

    /// Apply a new value to a node and push the consequences through the
    /// graph. `internal` marks engine-originated nested updates (hold,
    /// fold, flatten forwarding, rollback replay): they skip the
    /// next-frame hook flush, frame bookkeeping and snapshot persistence
    /// so they are observed on the enclosing frame.
    pub(crate) fn update_node_value(
        &mut self,
        id: NodeId,
        value: ArcValue,
        internal: bool,
    ) -> Result<()> {
        // 1. Settle the previous frame: fired event nodes fall back to
        //    their resting occurrence before the new frame begins.
        if !internal {
            self.flush_next_frame_hooks();
        }

        // 2. Store the new raw value.
        self.write_raw(id, value.clone());

        // 3. Frame bookkeeping for externally driven nodes.
        let advanced = !internal && self.config.time_travel && self.external.contains(&id);
        if advanced {
            self.latest_frame += 1;
            self.current_frame = self.latest_frame;
            self.trace.push(ExternalEvent {
                node: id,
                value: value.clone(),
            });
        }
        if self.config.debug {
            tracing::debug!(
                node = id.raw(),
                label = %self.node_label(id),
                frame = self.latest_frame,
                internal,
                "update"
            );
        }

        // 4. Synchronous listeners, registration order, inside the lock.
        self.run_sync_listeners(id, &value);

        // 5. Asynchronous listeners, dispatched onto the scope.
        self.dispatch_async_listeners(id, &value);

        // 6. Queue this node's own reset for the start of the next frame.
        if !internal && self.node(id).on_next_frame.is_some() {
            self.next_frame_queue.push(id);
        }

        // 7. Settle the affected descendants, each exactly once.
        self.propagate_children(id)?;

        // 8. Persist the end-of-frame snapshot once per top-level update.
        if !internal && self.config.time_travel {
            self.persist_snapshot();
        }
        Ok(())
    }

    fn flush_next_frame_hooks(&mut self) {
        let queue = std::mem::take(&mut self.next_frame_queue);
        for id in queue {
            let hook = self.nodes.get(&id).and_then(|n| n.on_next_frame.clone());
            if let Some(hook) = hook {
                (*hook)(self, id);
            }
        }
    }

    fn run_sync_listeners(&mut self, id: NodeId, value: &ArcValue) {
        if self.node(id).sync_listeners.is_empty() {
            return;
        }
        // Snapshot the list: listeners may (un)register listeners while
        // running, which must not affect this dispatch.
        let listeners: Vec<SyncFn> = self
            .node(id)
            .sync_listeners
            .iter()
            .map(|l| Arc::clone(&l.f))
            .collect();
        for f in listeners {
            let mut g = f.lock().unwrap_or_else(PoisonError::into_inner);
            (*g)(self, value);
        }
    }

    fn dispatch_async_listeners(&mut self, id: NodeId, value: &ArcValue) {
        if self.node(id).async_listeners.is_empty() {
            return;
        }
        let listeners: Vec<AsyncFn> = self.node(id).async_listeners.to_vec();
        for f in listeners {
            let value = value.clone();
            let _ = self.jobs.send(Box::new(move || (*f)(&value)));
        }
    }

    /// Settle every descendant of an updated node exactly once.
    ///
    /// The reachable subgraph is collected first, then processed in
    /// ascending node-id order. Ids are issued strictly after a node's
    /// parents exist, so id order is a topological order: a reconverging
    /// (diamond) node recomputes only after all of its affected parents
    /// have settled, is notified at most once per update, and never
    /// observes a half-updated frame.
    ///
    /// A descendant with listeners (or any descendant when `lazy` is
    /// off) recomputes and is notified; otherwise it is only marked
    /// dirty — no recompute runs there, and a later read anywhere in the
    /// dirty region pulls fresh values bottom-up through
    /// `fetch_node_value`. A listened node below a dirty ancestor still
    /// recomputes here: its closure fetches the dirty parents,
    /// collapsing the stale region on the spot.
    fn propagate_children(&mut self, id: NodeId) -> Result<()> {
        let mut affected: Vec<NodeId> = Vec::new();
        let mut seen: AHashSet<NodeId> = AHashSet::new();
        let mut stack: Vec<NodeId> = self.children.get(&id).cloned().unwrap_or_default();
        while let Some(node) = stack.pop() {
            if !seen.insert(node) {
                continue;
            }
            affected.push(node);
            stack.extend(self.children.get(&node).cloned().unwrap_or_default());
        }
        affected.sort_unstable();

        for child in affected {
            let (has_hook, listened, recompute) = {
                let node = self.node(child);
                (
                    node.on_next_frame.is_some(),
                    node.is_listened(),
                    node.recompute.clone(),
                )
            };
            if has_hook {
                self.next_frame_queue.push(child);
            }
            if self.config.lazy && !listened {
                self.node_mut(child).dirty = true;
                if self.config.debug {
                    tracing::debug!(node = child.raw(), "marked dirty");
                }
                continue;
            }
            let Some(recompute) = recompute else {
                continue;
            };
            let value = (*recompute)(self)?;
            self.write_raw(child, value.clone());
            if self.config.debug {
                tracing::debug!(node = child.raw(), label = %self.node_label(child), "recomputed");
            }
            self.run_sync_listeners(child, &value);
            self.dispatch_async_listeners(child, &value);
        }
        Ok(())
    }

    fn persist_snapshot(&mut self) {
        let mut values = AHashMap::with_capacity(self.nodes.len());
        let mut dirty = AHashSet::new();
        for (id, node) in self.nodes.iter() {
            if let NodeValue::Ready(value) = &node.value {
                values.insert(*id, value.clone());
                if node.dirty {
                    dirty.insert(*id);
                }
            }
        }
        self.history.insert(
            self.latest_frame,
            GraphState {
                values,
                dirty,
                children: self.children.clone(),
            },
        );
    }

    // ── Time travel ──────────────────────────────────────────────────

    /// Restore the graph to a recorded frame. Missing snapshots and
    /// disabled time travel are silent no-ops.
    pub(crate) fn reset_state(&mut self, frame: u64) {
        if !self.config.time_travel {
            tracing::debug!(frame, "time travel disabled; reset ignored");
            return;
        }
        let Some(snapshot) = self.history.get(&frame).cloned() else {
            tracing::debug!(frame, "no snapshot for frame; reset ignored");
            return;
        };
        tracing::debug!(frame, from = self.latest_frame, "resetting state");

        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            if self.paused == Some(id) {
                continue;
            }
            if let Some(value) = snapshot.values.get(&id) {
                self.write_raw(id, value.clone());
                self.node_mut(id).dirty = snapshot.dirty.contains(&id);
            } else if self.node(id).recompute.is_some() {
                // No value was recorded at this frame (the node was
                // still pending then, or created later): recompute
                // against the restored ancestors on the next read.
                self.node_mut(id).dirty = true;
            }
            let hook = self.node(id).on_rollback.clone();
            if let Some(hook) = hook {
                (*hook)(self, id, frame);
            }
        }
        self.children = snapshot.children;
        self.latest_frame = frame;
        self.current_frame = frame;
    }
}

// ─── Timeline handle ─────────────────────────────────────────────────────────

struct Shared {
    inner: Mutex<TimelineInner>,
    scope: Scope,
    clock_init: Mutex<()>,
}

/// Handle to a reactive world. Cheaply cloneable; all clones address the
/// same graph.
pub struct Timeline {
    shared: Arc<Shared>,
}

impl Clone for Timeline {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl std::fmt::Debug for Timeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("Timeline")
            .field("nodes", &inner.nodes.len())
            .field("latest_frame", &inner.latest_frame)
            .field("time_travel", &inner.config.time_travel)
            .field("lazy", &inner.config.lazy)
            .finish()
    }
}

impl Timeline {
    /// Create a timeline bound to `scope` without installing it as the
    /// ambient timeline.
    #[must_use]
    pub fn new(scope: Scope, config: TimelineConfig) -> Self {
        let jobs = scope.job_sender();
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(TimelineInner::new(config, jobs)),
                scope,
                clock_init: Mutex::new(()),
            }),
        }
    }

    /// Create a timeline and install it as the ambient timeline of the
    /// current thread.
    pub fn initialize(scope: Scope, config: TimelineConfig) -> Self {
        let timeline = Self::new(scope, config);
        timeline.install();
        timeline
    }

    /// Bind this timeline as the current thread's ambient timeline.
    pub fn install(&self) {
        CURRENT.with(|slot| *slot.borrow_mut() = Some(self.clone()));
    }

    /// Remove the current thread's ambient timeline, if any.
    pub fn uninstall() {
        CURRENT.with(|slot| slot.borrow_mut().take());
    }

    /// The ambient timeline of the current thread.
    pub fn current() -> Result<Self> {
        CURRENT
            .with(|slot| slot.borrow().clone())
            .ok_or(TimelineError::Uninitialized)
    }

    /// The runtime scope this timeline dispatches async listeners onto.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.shared.scope
    }

    fn lock_inner(&self) -> MutexGuard<'_, TimelineInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` with the coarse lock held.
    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut TimelineInner) -> R) -> R {
        let mut guard = self.lock_inner();
        f(&mut guard)
    }

    /// Top-level update entry point: locks, applies the update, and
    /// converts user panics into [`TimelineError::UserComputation`]
    /// before they can poison the lock.
    pub(crate) fn send_value(&self, node: NodeId, value: ArcValue, internal: bool) -> Result<()> {
        let mut guard = self.lock_inner();
        let label = guard.node_label(node);
        match catch_unwind(AssertUnwindSafe(|| {
            guard.update_node_value(node, value, internal)
        })) {
            Ok(result) => result,
            Err(payload) => Err(TimelineError::UserComputation {
                label,
                reason: panic_reason(&*payload),
            }),
        }
    }

    // ── State and constant factories ─────────────────────────────────

    /// An externally driven state holding `initial`.
    #[must_use]
    pub fn mutable_state<A: Clone + Send + Sync + 'static>(
        &self,
        initial: A,
        label: Option<&str>,
    ) -> MutableState<A> {
        let node = self.with_inner(|inner| {
            let id = inner.insert_node(
                NodeValue::Ready(Arc::new(initial)),
                label.map(str::to_string),
            );
            inner.register_external(id);
            id
        });
        MutableState::from_parts(self.clone(), node)
    }

    /// A state that never changes.
    #[must_use]
    pub fn constant<A: Clone + Send + Sync + 'static>(&self, value: A) -> State<A> {
        let node = self.with_inner(|inner| {
            inner.insert_node(NodeValue::Ready(Arc::new(value)), Some("const".into()))
        });
        State::from_parts(self.clone(), node)
    }

    // ── Clock and time ───────────────────────────────────────────────

    /// Accumulated clock time since the timeline started ticking.
    ///
    /// The clock is constructed on first access, from the injected
    /// factory when one was configured, else from the built-in
    /// [`DEFAULT_CLOCK_TICK`] producer.
    #[must_use]
    pub fn time(&self) -> State<Duration> {
        let (time, _) = self.ensure_clock();
        State::from_parts(self.clone(), time)
    }

    /// The internal paused flag as a read-only state.
    #[must_use]
    pub fn paused(&self) -> State<bool> {
        let (_, paused) = self.ensure_clock();
        State::from_parts(self.clone(), paused)
    }

    /// Stop the clock producer from emitting ticks.
    pub fn pause(&self) -> Result<()> {
        let (_, paused) = self.ensure_clock();
        self.send_value(paused, Arc::new(true), true)
    }

    /// Resume clock ticks.
    pub fn resume(&self) -> Result<()> {
        let (_, paused) = self.ensure_clock();
        self.send_value(paused, Arc::new(false), true)
    }

    /// Lazily build (paused state, clock event, time fold) exactly once.
    fn ensure_clock(&self) -> (NodeId, NodeId) {
        let _init = self
            .shared
            .clock_init
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(ids) = self.with_inner(|inner| match (inner.time, inner.paused) {
            (Some(time), Some(paused)) => Some((time, paused)),
            _ => None,
        }) {
            return ids;
        }

        let paused_id = self.with_inner(|inner| {
            let id = inner.insert_node(NodeValue::Ready(Arc::new(false)), Some("paused".into()));
            inner.paused = Some(id);
            id
        });
        let paused_view = State::from_parts(self.clone(), paused_id);

        let factory = self.with_inner(|inner| inner.config.clock.clone());
        let clock = match factory {
            Some(factory) => (*factory)(self, paused_view),
            None => default_clock(self, paused_view),
        };
        let time = State::fold(Duration::ZERO, &clock, |acc, delta| *acc + *delta);
        let time_id = time.node_id();
        self.with_inner(|inner| {
            inner.clock = Some(clock.node_id());
            inner.time = Some(time_id);
        });
        (time_id, paused_id)
    }

    // ── Time travel ──────────────────────────────────────────────────

    /// Restore the graph to `frame`. A frame without a snapshot, or a
    /// timeline without time travel, makes this a silent no-op.
    pub fn reset_state(&self, frame: u64) -> Result<()> {
        let mut guard = self.lock_inner();
        match catch_unwind(AssertUnwindSafe(|| guard.reset_state(frame))) {
            Ok(()) => Ok(()),
            Err(payload) => Err(TimelineError::user("rollback replay", panic_reason(&*payload))),
        }
    }

    /// Step one frame back.
    pub fn rollback_state(&self) -> Result<()> {
        let target = self.with_inner(|inner| inner.latest_frame.saturating_sub(1));
        self.reset_state(target)
    }

    /// Step one frame forward.
    pub fn next_state(&self) -> Result<()> {
        let target = self.with_inner(|inner| inner.latest_frame + 1);
        self.reset_state(target)
    }

    // ── Introspection ────────────────────────────────────────────────

    #[must_use]
    pub fn latest_frame(&self) -> u64 {
        self.with_inner(|inner| inner.latest_frame)
    }

    #[must_use]
    pub fn current_frame(&self) -> u64 {
        self.with_inner(|inner| inner.current_frame)
    }

    /// The recorded external updates. The event at index `i` produced
    /// frame `i + 1`. Empty unless time travel is enabled.
    #[must_use]
    pub fn event_trace(&self) -> Vec<ExternalEvent> {
        self.with_inner(|inner| inner.trace.clone())
    }

    /// Ids of externally driven nodes, in creation order.
    #[must_use]
    pub fn external_nodes(&self) -> Vec<NodeId> {
        let mut ids = self.with_inner(|inner| inner.external.iter().copied().collect::<Vec<_>>());
        ids.sort_unstable();
        ids
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.with_inner(|inner| inner.nodes.len())
    }
}

/// Built-in clock: a named worker emitting the tick period while the
/// timeline is not paused.
fn default_clock(timeline: &Timeline, paused: State<bool>) -> Event<Duration> {
    let source = timeline.internal_broadcast_event::<Duration>(Some("clock"));
    let producer = source.clone();
    timeline.scope().spawn("rivulet-clock", move |token| {
        while token.sleep(DEFAULT_CLOCK_TICK) {
            if paused.value() {
                continue;
            }
            if producer.send(DEFAULT_CLOCK_TICK).is_err() {
                break;
            }
        }
        tracing::trace!("clock producer stopped");
    });
    source.event()
}

// ─── Ambient-timeline free functions ─────────────────────────────────────────

/// Create a timeline and bind it as the current thread's ambient
/// timeline.
pub fn initialize(scope: Scope, config: TimelineConfig) -> Timeline {
    Timeline::initialize(scope, config)
}

/// The ambient timeline, or [`TimelineError::Uninitialized`].
pub fn current_timeline() -> Result<Timeline> {
    Timeline::current()
}

/// Ambient form of [`Timeline::broadcast_event`].
pub fn broadcast_event<A: Clone + Send + Sync + 'static>(
    label: Option<&str>,
) -> Result<BroadcastEvent<A>> {
    Ok(Timeline::current()?.broadcast_event(label))
}

/// Ambient form of [`Timeline::mutable_state`].
pub fn mutable_state_of<A: Clone + Send + Sync + 'static>(
    value: A,
    label: Option<&str>,
) -> Result<MutableState<A>> {
    Ok(Timeline::current()?.mutable_state(value, label))
}

/// Ambient form of [`Timeline::rollback_state`].
pub fn rollback_state() -> Result<()> {
    Timeline::current()?.rollback_state()
}

/// Ambient form of [`Timeline::next_state`].
pub fn next_state() -> Result<()> {
    Timeline::current()?.next_state()
}

/// Ambient form of [`Timeline::reset_state`].
pub fn reset_state(frame: u64) -> Result<()> {
    Timeline::current()?.reset_state(frame)
}
