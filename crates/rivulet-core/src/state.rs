#![forbid(unsafe_code)]

//! Stepwise states.
//!
//! A [`State`] wraps a node whose value is always present. Derived
//! states (`map`, the `combine_with` ladder, `combine_all`) recompute
//! from their parents; `fold` and `hold` advance on event occurrences;
//! `flatten` tracks the inner state of a state-of-states by moving a
//! forwarding listener as the outer value changes.
//!
//! # Laziness
//!
//! Under the timeline's `lazy` flag a derived state with no listeners is
//! only dirty-marked on parent updates and recomputes exactly once on
//! the next read. Attaching any listener makes it eager. Without the
//! flag every derived state recomputes eagerly.

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError};

use crate::behavior::Behavior;
use crate::error::Result;
use crate::event::{Event, occurrence_reset};
use crate::node::{ArcValue, ListenerId, NodeId, NodeValue, Recompute, RollbackHook, SyncFn, Thunk};
use crate::occurrence::EventState;
use crate::timeline::{Timeline, TimelineInner};

/// A stepwise function of time: always has a current value.
pub struct State<A> {
    timeline: Timeline,
    node: NodeId,
    marker: PhantomData<fn() -> A>,
}

impl<A> Clone for State<A> {
    fn clone(&self) -> Self {
        Self {
            timeline: self.timeline.clone(),
            node: self.node,
            marker: PhantomData,
        }
    }
}

impl<A> std::fmt::Debug for State<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("State").field(&self.node).finish()
    }
}

/// Sync listener that forwards every value of one node into another as
/// an engine-internal update. `flatten` moves these between inner
/// states.
fn forward_to(target: NodeId) -> SyncFn {
    Arc::new(Mutex::new(
        move |inner: &mut TimelineInner, value: &ArcValue| {
            if let Err(err) = inner.update_node_value(target, value.clone(), true) {
                tracing::error!(%err, "state forwarding failed");
            }
        },
    ))
}

impl<A: Clone + Send + Sync + 'static> State<A> {
    pub(crate) fn from_parts(timeline: Timeline, node: NodeId) -> Self {
        Self {
            timeline,
            node,
            marker: PhantomData,
        }
    }

    /// The id of the wrapped node.
    #[must_use]
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// The timeline owning the wrapped node.
    #[must_use]
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Sample the current value, recomputing dirty ancestors on demand.
    #[must_use]
    pub fn value(&self) -> A {
        self.timeline
            .with_inner(|inner| inner.fetch_as::<A>(self.node))
            .expect("state node holds a value of its declared type")
    }

    /// This state as a sampled value.
    #[must_use]
    pub fn behavior(&self) -> Behavior<A> {
        Behavior::from_node(self.timeline.clone(), self.node)
    }

    /// Ambient form of [`Timeline::constant`].
    pub fn constant(value: A) -> Result<State<A>> {
        Ok(Timeline::current()?.constant(value))
    }

    /// A derived state applying `f` to this one.
    pub fn map<B: Clone + Send + Sync + 'static>(
        &self,
        f: impl Fn(&A) -> B + Send + Sync + 'static,
    ) -> State<B> {
        let parent = self.node;
        let recompute: Recompute = Arc::new(move |inner| {
            let v = inner.fetch_as::<A>(parent)?;
            Ok(Arc::new(f(&v)) as ArcValue)
        });
        derive_state(&self.timeline, &[parent], recompute)
    }

    /// A derived state combining this state with one other.
    pub fn combine_with<B, C>(
        &self,
        other: &State<B>,
        combine: impl Fn(&A, &B) -> C + Send + Sync + 'static,
    ) -> State<C>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
    {
        let (pa, pb) = (self.node, other.node);
        let recompute: Recompute = Arc::new(move |inner| {
            let a = inner.fetch_as::<A>(pa)?;
            let b = inner.fetch_as::<B>(pb)?;
            Ok(Arc::new(combine(&a, &b)) as ArcValue)
        });
        derive_state(&self.timeline, &[pa, pb], recompute)
    }

    /// A derived state combining this state with two others.
    pub fn combine_with3<B, C, D>(
        &self,
        b: &State<B>,
        c: &State<C>,
        combine: impl Fn(&A, &B, &C) -> D + Send + Sync + 'static,
    ) -> State<D>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        D: Clone + Send + Sync + 'static,
    {
        let (pa, pb, pc) = (self.node, b.node, c.node);
        let recompute: Recompute = Arc::new(move |inner| {
            let a = inner.fetch_as::<A>(pa)?;
            let b = inner.fetch_as::<B>(pb)?;
            let c = inner.fetch_as::<C>(pc)?;
            Ok(Arc::new(combine(&a, &b, &c)) as ArcValue)
        });
        derive_state(&self.timeline, &[pa, pb, pc], recompute)
    }

    /// A derived state combining this state with three others.
    pub fn combine_with4<B, C, D, E>(
        &self,
        b: &State<B>,
        c: &State<C>,
        d: &State<D>,
        combine: impl Fn(&A, &B, &C, &D) -> E + Send + Sync + 'static,
    ) -> State<E>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        D: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let (pa, pb, pc, pd) = (self.node, b.node, c.node, d.node);
        let recompute: Recompute = Arc::new(move |inner| {
            let a = inner.fetch_as::<A>(pa)?;
            let b = inner.fetch_as::<B>(pb)?;
            let c = inner.fetch_as::<C>(pc)?;
            let d = inner.fetch_as::<D>(pd)?;
            Ok(Arc::new(combine(&a, &b, &c, &d)) as ArcValue)
        });
        derive_state(&self.timeline, &[pa, pb, pc, pd], recompute)
    }

    /// A derived state combining this state with four others.
    pub fn combine_with5<B, C, D, E, F>(
        &self,
        b: &State<B>,
        c: &State<C>,
        d: &State<D>,
        e: &State<E>,
        combine: impl Fn(&A, &B, &C, &D, &E) -> F + Send + Sync + 'static,
    ) -> State<F>
    where
        B: Clone + Send + Sync + 'static,
        C: Clone + Send + Sync + 'static,
        D: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
        F: Clone + Send + Sync + 'static,
    {
        let (pa, pb, pc, pd, pe) = (self.node, b.node, c.node, d.node, e.node);
        let recompute: Recompute = Arc::new(move |inner| {
            let a = inner.fetch_as::<A>(pa)?;
            let b = inner.fetch_as::<B>(pb)?;
            let c = inner.fetch_as::<C>(pc)?;
            let d = inner.fetch_as::<D>(pd)?;
            let e = inner.fetch_as::<E>(pe)?;
            Ok(Arc::new(combine(&a, &b, &c, &d, &e)) as ArcValue)
        });
        derive_state(&self.timeline, &[pa, pb, pc, pd, pe], recompute)
    }

    /// A derived state over a homogeneous list of states.
    pub fn combine_all<B: Clone + Send + Sync + 'static>(
        states: &[State<A>],
        combine: impl Fn(&[A]) -> B + Send + Sync + 'static,
    ) -> State<B> {
        assert!(!states.is_empty(), "combine_all requires at least one state");
        let timeline = states[0].timeline.clone();
        let parents: Vec<NodeId> = states.iter().map(|s| s.node).collect();
        let read = parents.clone();
        let recompute: Recompute = Arc::new(move |inner| {
            let mut values = Vec::with_capacity(read.len());
            for parent in &read {
                values.push(inner.fetch_as::<A>(*parent)?);
            }
            Ok(Arc::new(combine(&values)) as ArcValue)
        });
        derive_state(&timeline, &parents, recompute)
    }

    /// An event firing this state's value at every update.
    pub fn updated(&self) -> Event<A> {
        let parent = self.node;
        let recompute: Recompute = Arc::new(move |inner| {
            let v = inner.fetch_as::<A>(parent)?;
            Ok(Arc::new(EventState::Fired(v)) as ArcValue)
        });
        let node = self.timeline.with_inner(|inner| {
            let id = inner.insert_node(
                NodeValue::Ready(Arc::new(EventState::<A>::None)),
                None,
            );
            inner.set_recompute(id, recompute);
            inner.set_on_next_frame(id, occurrence_reset::<A>());
            inner.register_edges(&[parent], id);
            id
        });
        Event::from_parts(self.timeline.clone(), node)
    }

    /// A state folding `event` occurrences with `reducer`, starting at
    /// `initial`.
    ///
    /// The reducer runs at most once per frame, driven by a sync
    /// listener on the event node so no occurrence is ever skipped, in
    /// lazy and eager configurations alike. With time travel enabled
    /// the fold keeps an ordered log of consumed occurrences; rollback
    /// truncates the log to the target frame and replays the reducer
    /// from `initial`.
    pub fn fold<E: Clone + Send + Sync + 'static>(
        initial: A,
        event: &Event<E>,
        reducer: impl Fn(&A, &E) -> A + Send + Sync + 'static,
    ) -> State<A> {
        let timeline = event.timeline().clone();
        let reducer: Arc<dyn Fn(&A, &E) -> A + Send + Sync> = Arc::new(reducer);
        let log: Arc<Mutex<Vec<(u64, E)>>> = Arc::new(Mutex::new(Vec::new()));
        let seed = initial.clone();

        let node = timeline.with_inner(|inner| {
            let id = inner.insert_node(NodeValue::Ready(Arc::new(initial)), None);

            let rollback: RollbackHook = {
                let log = Arc::clone(&log);
                let reducer = Arc::clone(&reducer);
                Arc::new(move |inner, id, frame| {
                    let mut log = log.lock().unwrap_or_else(PoisonError::into_inner);
                    log.retain(|(f, _)| *f <= frame);
                    let mut acc = seed.clone();
                    for (_, occurrence) in log.iter() {
                        acc = (*reducer)(&acc, occurrence);
                    }
                    inner.write_raw(id, Arc::new(acc));
                })
            };
            inner.set_on_rollback(id, rollback);

            let step: SyncFn = {
                let log = Arc::clone(&log);
                let reducer = Arc::clone(&reducer);
                Arc::new(Mutex::new(
                    move |inner: &mut TimelineInner, value: &ArcValue| {
                        let Some(EventState::Fired(occurrence)) =
                            value.downcast_ref::<EventState<E>>()
                        else {
                            return;
                        };
                        if inner.config().time_travel {
                            log.lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .push((inner.latest_frame(), occurrence.clone()));
                        }
                        let acc = match inner.fetch_as::<A>(id) {
                            Ok(acc) => acc,
                            Err(err) => {
                                tracing::error!(%err, "fold state unreadable");
                                return;
                            }
                        };
                        let next = (*reducer)(&acc, occurrence);
                        if let Err(err) = inner.update_node_value(id, Arc::new(next), true) {
                            tracing::error!(%err, "fold update failed");
                        }
                    },
                ))
            };
            inner.add_sync_listener(event.node_id(), step);
            id
        });
        State::from_parts(timeline, node)
    }

    /// A state that takes on every value `event` fires, starting at
    /// `initial`.
    pub fn hold(initial: A, event: &Event<A>) -> State<A> {
        let timeline = event.timeline().clone();
        let node = timeline.with_inner(|inner| {
            let id = inner.insert_node(NodeValue::Ready(Arc::new(initial)), None);
            let step: SyncFn = Arc::new(Mutex::new(
                move |inner: &mut TimelineInner, value: &ArcValue| {
                    let Some(EventState::Fired(v)) = value.downcast_ref::<EventState<A>>() else {
                        return;
                    };
                    if let Err(err) = inner.update_node_value(id, Arc::new(v.clone()), true) {
                        tracing::error!(%err, "hold update failed");
                    }
                },
            ));
            inner.add_sync_listener(event.node_id(), step);
            id
        });
        State::from_parts(timeline, node)
    }

    /// `map` then [`State::flatten`].
    pub fn flat_map<B: Clone + Send + Sync + 'static>(
        &self,
        f: impl Fn(&A) -> State<B> + Send + Sync + 'static,
    ) -> State<B> {
        self.map(f).flatten()
    }

    /// Run `f` synchronously on every update of this state. The listener
    /// detaches when the returned [`Subscription`] is dropped.
    pub fn subscribe(&self, mut f: impl FnMut(&A) + Send + 'static) -> Subscription {
        let listener: SyncFn = Arc::new(Mutex::new(
            move |_: &mut TimelineInner, value: &ArcValue| {
                if let Some(v) = value.downcast_ref::<A>() {
                    f(v);
                }
            },
        ));
        let id = self
            .timeline
            .with_inner(|inner| inner.add_sync_listener(self.node, listener));
        Subscription {
            timeline: self.timeline.clone(),
            node: self.node,
            listener: id,
        }
    }
}

impl<A: Clone + Send + Sync + 'static> State<State<A>> {
    /// Collapse a state of states: the result tracks whichever inner
    /// state the outer currently holds.
    ///
    /// A forwarding listener follows the outer value: when the outer
    /// state changes, the listener registered on the previous inner
    /// state is unregistered (by its handle) and a fresh one is attached
    /// to the new inner state.
    pub fn flatten(&self) -> State<A> {
        let outer = self.node;
        let node = self.timeline.with_inner(|inner| {
            let thunk: Thunk = Box::new(move |inner| {
                let current = inner.fetch_as::<State<A>>(outer)?;
                inner.fetch_node_value(current.node)
            });
            let result = inner.insert_node(NodeValue::Pending(thunk), Some("flatten".into()));

            // Attach to the inner state the outer currently holds.
            let initial_inner = inner
                .fetch_as::<State<A>>(outer)
                .expect("outer state holds a state of its declared type");
            let listener = inner.add_sync_listener(initial_inner.node, forward_to(result));
            let tracked = Arc::new(Mutex::new((initial_inner.node, listener)));

            // Re-attach whenever the outer value switches inner states.
            let switch: SyncFn = Arc::new(Mutex::new(
                move |inner: &mut TimelineInner, value: &ArcValue| {
                    let Some(new_inner) = value.downcast_ref::<State<A>>() else {
                        return;
                    };
                    let mut tracked = tracked.lock().unwrap_or_else(PoisonError::into_inner);
                    let (old_node, old_listener) = *tracked;
                    if old_node == new_inner.node {
                        return;
                    }
                    inner.remove_sync_listener(old_node, old_listener);
                    let listener = inner.add_sync_listener(new_inner.node, forward_to(result));
                    *tracked = (new_inner.node, listener);

                    // The result jumps to the new inner's current value.
                    match inner.fetch_node_value(new_inner.node) {
                        Ok(v) => {
                            if let Err(err) = inner.update_node_value(result, v, true) {
                                tracing::error!(%err, "flatten switch failed");
                            }
                        }
                        Err(err) => tracing::error!(%err, "flatten switch failed"),
                    }
                },
            ));
            inner.add_sync_listener(outer, switch);
            result
        });
        State::from_parts(self.timeline.clone(), node)
    }
}

/// Insert a derived (recomputed) state node under `parents`.
fn derive_state<B: Clone + Send + Sync + 'static>(
    timeline: &Timeline,
    parents: &[NodeId],
    recompute: Recompute,
) -> State<B> {
    let node = timeline.with_inner(|inner| {
        let lazy_initial = Arc::clone(&recompute);
        let thunk: Thunk = Box::new(move |inner| (*lazy_initial)(inner));
        let id = inner.insert_node(NodeValue::Pending(thunk), None);
        inner.set_recompute(id, recompute);
        inner.register_edges(parents, id);
        id
    });
    State::from_parts(timeline.clone(), node)
}

/// A [`State`] with a producer side.
pub struct MutableState<A> {
    state: State<A>,
}

impl<A> Clone for MutableState<A> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<A> Deref for MutableState<A> {
    type Target = State<A>;

    fn deref(&self) -> &State<A> {
        &self.state
    }
}

impl<A: Clone + Send + Sync + 'static> MutableState<A> {
    pub(crate) fn from_parts(timeline: Timeline, node: NodeId) -> Self {
        Self {
            state: State::from_parts(timeline, node),
        }
    }

    /// Replace the current value. Fails if a downstream recompute,
    /// reducer or listener panics; the panic is reported, not
    /// propagated.
    pub fn set(&self, value: A) -> Result<()> {
        self.state
            .timeline
            .send_value(self.state.node, Arc::new(value), false)
    }

    /// The read-only view of this state.
    #[must_use]
    pub fn state(&self) -> State<A> {
        self.state.clone()
    }
}

/// RAII guard for a listener registered with [`State::subscribe`];
/// dropping it unregisters the listener.
#[must_use = "the listener detaches when the Subscription is dropped"]
pub struct Subscription {
    timeline: Timeline,
    node: NodeId,
    listener: ListenerId,
}

impl Subscription {
    /// Explicitly detach now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.timeline
            .with_inner(|inner| inner.remove_sync_listener(self.node, self.listener));
    }
}
