#![forbid(unsafe_code)]

//! Discrete event streams.
//!
//! An [`Event`] wraps a node whose value is an [`EventState`]: `Fired`
//! for exactly the frame in which the event occurs, `None` at rest.
//! Derived events (`map`, `filter`, `gate`, `merged`) carry a next-frame
//! hook that drops them back to `None` before the following external
//! update is processed.
//!
//! A [`BroadcastEvent`] is the producer end: `send` pushes an occurrence
//! into the graph. Broadcast events made through
//! [`Timeline::broadcast_event`] are external (their updates advance the
//! frame counter); [`Timeline::internal_broadcast_event`] creates
//! plumbing events that do not.

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use crate::behavior::Behavior;
use crate::error::Result;
use crate::node::{ArcValue, AsyncFn, FrameHook, NodeId, NodeValue, Recompute};
use crate::occurrence::{EventState, Leftmost, MergeStrategy};
use crate::timeline::{Timeline, TimelineInner};

/// The resting occurrence, erased.
fn resting<A: Clone + Send + Sync + 'static>() -> ArcValue {
    Arc::new(EventState::<A>::None)
}

/// Next-frame hook shared by every event-valued node: fall back to the
/// resting occurrence once the frame is over.
pub(crate) fn occurrence_reset<A: Clone + Send + Sync + 'static>() -> FrameHook {
    Arc::new(|inner: &mut TimelineInner, id: NodeId| {
        inner.write_raw(id, Arc::new(EventState::<A>::None));
    })
}

/// A value that exists only at discrete instants.
pub struct Event<A> {
    timeline: Timeline,
    node: NodeId,
    marker: PhantomData<fn() -> A>,
}

impl<A> Clone for Event<A> {
    fn clone(&self) -> Self {
        Self {
            timeline: self.timeline.clone(),
            node: self.node,
            marker: PhantomData,
        }
    }
}

impl<A> std::fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Event").field(&self.node).finish()
    }
}

impl<A: Clone + Send + Sync + 'static> Event<A> {
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

    /// The occurrence at the current frame.
    #[must_use]
    pub fn sample(&self) -> EventState<A> {
        self.timeline
            .with_inner(|inner| inner.fetch_as::<EventState<A>>(self.node))
            .expect("event node holds an occurrence of its declared type")
    }

    /// A new event firing `f` of every occurrence.
    pub fn map<B: Clone + Send + Sync + 'static>(
        &self,
        f: impl Fn(&A) -> B + Send + Sync + 'static,
    ) -> Event<B> {
        let parent = self.node;
        let recompute: Recompute = Arc::new(move |inner| {
            let out = match inner.fetch_as::<EventState<A>>(parent)? {
                EventState::Fired(v) => EventState::Fired(f(&v)),
                EventState::None => EventState::None,
            };
            Ok(Arc::new(out) as ArcValue)
        });
        self.derive::<B>(&[parent], recompute)
    }

    /// A new event keeping only occurrences satisfying `pred`.
    pub fn filter(&self, pred: impl Fn(&A) -> bool + Send + Sync + 'static) -> Event<A> {
        let parent = self.node;
        let recompute: Recompute = Arc::new(move |inner| {
            let out = match inner.fetch_as::<EventState<A>>(parent)? {
                EventState::Fired(v) if pred(&v) => EventState::Fired(v),
                _ => EventState::None,
            };
            Ok(Arc::new(out) as ArcValue)
        });
        self.derive::<A>(&[parent], recompute)
    }

    /// A new event whose occurrences pass while `condition` samples
    /// `false` — the gate *blocks* when the condition holds.
    pub fn gate(&self, condition: &Behavior<bool>) -> Event<A> {
        let parent = self.node;
        let condition = condition.clone();
        let recompute: Recompute = Arc::new(move |inner| {
            let occurrence = inner.fetch_as::<EventState<A>>(parent)?;
            let blocked = condition.sample_with(inner)?;
            let out = match occurrence {
                EventState::Fired(v) if !blocked => EventState::Fired(v),
                _ => EventState::None,
            };
            Ok(Arc::new(out) as ArcValue)
        });
        self.derive::<A>(&[parent], recompute)
    }

    /// Merge events, resolving same-frame simultaneity with `strategy`.
    pub fn merged_with(
        strategy: impl MergeStrategy<A> + 'static,
        events: &[&Event<A>],
    ) -> Event<A> {
        assert!(!events.is_empty(), "merged requires at least one source event");
        let timeline = events[0].timeline.clone();
        let parents: Vec<NodeId> = events.iter().map(|e| e.node).collect();
        let strategy: Arc<dyn MergeStrategy<A>> = Arc::new(strategy);
        let read = parents.clone();
        let recompute: Recompute = Arc::new(move |inner| {
            let mut fired = Vec::new();
            for parent in &read {
                if let EventState::Fired(v) = inner.fetch_as::<EventState<A>>(*parent)? {
                    fired.push(v);
                }
            }
            let out = if fired.is_empty() {
                EventState::None
            } else {
                EventState::Fired(strategy.merge(fired))
            };
            Ok(Arc::new(out) as ArcValue)
        });
        let node = timeline.with_inner(|inner| {
            let id = inner.insert_node(NodeValue::Ready(resting::<A>()), Some("merged".into()));
            inner.set_recompute(id, recompute);
            inner.set_on_next_frame(id, occurrence_reset::<A>());
            inner.register_edges(&parents, id);
            id
        });
        Event::from_parts(timeline, node)
    }

    /// Merge events; on simultaneity the leftmost fired value wins.
    pub fn merged(events: &[&Event<A>]) -> Event<A> {
        Self::merged_with(Leftmost, events)
    }

    /// Deliver every fired value, unwrapped, to `collector` on the
    /// runtime scope. Fire-and-forget: the collector stays registered
    /// for the life of the timeline.
    pub fn collect(&self, collector: impl Fn(A) + Send + Sync + 'static) {
        let f: AsyncFn = Arc::new(move |value: &ArcValue| {
            if let Some(EventState::Fired(v)) = value.downcast_ref::<EventState<A>>() {
                collector(v.clone());
            }
        });
        self.timeline.with_inner(|inner| {
            inner.add_async_listener(self.node, f);
        });
    }

    /// Insert a single-parent-set derived event node.
    fn derive<B: Clone + Send + Sync + 'static>(
        &self,
        parents: &[NodeId],
        recompute: Recompute,
    ) -> Event<B> {
        let node = self.timeline.with_inner(|inner| {
            let id = inner.insert_node(NodeValue::Ready(resting::<B>()), None);
            inner.set_recompute(id, recompute);
            inner.set_on_next_frame(id, occurrence_reset::<B>());
            inner.register_edges(parents, id);
            id
        });
        Event::from_parts(self.timeline.clone(), node)
    }
}

impl Event<Duration> {
    /// Ambient form of [`Timeline::tick`].
    pub fn tick(period: Duration) -> Result<Event<Duration>> {
        Ok(Timeline::current()?.tick(period))
    }
}

/// An [`Event`] with a producer side.
pub struct BroadcastEvent<A> {
    event: Event<A>,
}

impl<A> Clone for BroadcastEvent<A> {
    fn clone(&self) -> Self {
        Self {
            event: self.event.clone(),
        }
    }
}

impl<A> Deref for BroadcastEvent<A> {
    type Target = Event<A>;

    fn deref(&self) -> &Event<A> {
        &self.event
    }
}

impl<A: Clone + Send + Sync + 'static> BroadcastEvent<A> {
    /// Fire an occurrence. Fails if a downstream recompute, reducer or
    /// listener panics; the panic is reported, not propagated.
    pub fn send(&self, value: A) -> Result<()> {
        self.event.timeline.send_value(
            self.event.node,
            Arc::new(EventState::Fired(value)),
            false,
        )
    }

    /// The consumer-side handle.
    #[must_use]
    pub fn event(&self) -> Event<A> {
        self.event.clone()
    }
}

impl Timeline {
    /// An externally driven event: every `send` is one frame.
    #[must_use]
    pub fn broadcast_event<A: Clone + Send + Sync + 'static>(
        &self,
        label: Option<&str>,
    ) -> BroadcastEvent<A> {
        self.make_broadcast(label, true)
    }

    /// An engine-plumbing event: sends do not advance the frame counter
    /// and are not recorded in the trace.
    #[must_use]
    pub fn internal_broadcast_event<A: Clone + Send + Sync + 'static>(
        &self,
        label: Option<&str>,
    ) -> BroadcastEvent<A> {
        self.make_broadcast(label, false)
    }

    fn make_broadcast<A: Clone + Send + Sync + 'static>(
        &self,
        label: Option<&str>,
        external: bool,
    ) -> BroadcastEvent<A> {
        let node = self.with_inner(|inner| {
            let id = inner.insert_node(NodeValue::Ready(resting::<A>()), label.map(str::to_string));
            inner.set_on_next_frame(id, occurrence_reset::<A>());
            if external {
                inner.register_external(id);
            }
            id
        });
        BroadcastEvent {
            event: Event::from_parts(self.clone(), node),
        }
    }

    /// A background producer firing `period` every `period` until the
    /// scope is cancelled.
    #[must_use]
    pub fn tick(&self, period: Duration) -> Event<Duration> {
        let source = self.broadcast_event::<Duration>(Some("tick"));
        let producer = source.clone();
        self.scope().spawn("rivulet-tick", move |token| {
            while token.sleep(period) {
                if producer.send(period).is_err() {
                    break;
                }
            }
            tracing::trace!("tick producer stopped");
        });
        source.event()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::Scope;
    use crate::timeline::TimelineConfig;
    use std::sync::Mutex;

    fn world() -> (Scope, Timeline) {
        let scope = Scope::new();
        let timeline = Timeline::new(scope.clone(), TimelineConfig::new());
        (scope, timeline)
    }

    #[test]
    fn broadcast_fires_then_rests() {
        let (_scope, tl) = world();
        let e = tl.broadcast_event::<i32>(None);
        let last = e.map(|v| *v);

        e.send(7).unwrap();
        assert_eq!(last.sample(), EventState::Fired(7));

        // Any other external update settles the previous frame first.
        let other = tl.mutable_state(0, None);
        other.set(1).unwrap();
        assert_eq!(last.sample(), EventState::None);
        assert_eq!(e.sample(), EventState::None);
    }

    #[test]
    fn map_transforms_each_occurrence() {
        let (_scope, tl) = world();
        let e = tl.broadcast_event::<i32>(None);
        let doubled = e.map(|v| v * 2);
        e.send(4).unwrap();
        assert_eq!(doubled.sample(), EventState::Fired(8));
        e.send(5).unwrap();
        assert_eq!(doubled.sample(), EventState::Fired(10));
    }

    #[test]
    fn filter_drops_non_matching_occurrences() {
        let (_scope, tl) = world();
        let e = tl.broadcast_event::<i32>(None);
        let evens = e.filter(|v| v % 2 == 0);
        e.send(3).unwrap();
        assert_eq!(evens.sample(), EventState::None);
        e.send(4).unwrap();
        assert_eq!(evens.sample(), EventState::Fired(4));
    }

    #[test]
    fn gate_blocks_while_condition_is_true() {
        let (_scope, tl) = world();
        let e = tl.broadcast_event::<i32>(None);
        let open = e.gate(&Behavior::constant(false));
        let shut = e.gate(&Behavior::constant(true));
        e.send(1).unwrap();
        assert_eq!(open.sample(), EventState::Fired(1));
        assert_eq!(shut.sample(), EventState::None);
    }

    #[test]
    fn gate_follows_a_state_backed_condition() {
        let (_scope, tl) = world();
        let blocked = tl.mutable_state(false, None);
        let e = tl.broadcast_event::<i32>(None);
        let gated = e.gate(&blocked.behavior());

        e.send(1).unwrap();
        assert_eq!(gated.sample(), EventState::Fired(1));

        blocked.set(true).unwrap();
        e.send(2).unwrap();
        assert_eq!(gated.sample(), EventState::None);
    }

    #[test]
    fn merged_takes_whichever_fired() {
        let (_scope, tl) = world();
        let a = tl.broadcast_event::<i32>(None);
        let b = tl.broadcast_event::<i32>(None);
        let m = Event::merged(&[&a.event(), &b.event()]);

        a.send(1).unwrap();
        assert_eq!(m.sample(), EventState::Fired(1));
        b.send(2).unwrap();
        assert_eq!(m.sample(), EventState::Fired(2));
    }

    #[test]
    fn simultaneous_merge_resolves_leftmost() {
        let (_scope, tl) = world();
        let e = tl.broadcast_event::<i32>(None);
        let left = e.map(|v| v + 1);
        let right = e.map(|v| v * 10);
        let m = Event::merged(&[&left, &right]);

        e.send(5).unwrap();
        assert_eq!(m.sample(), EventState::Fired(6));
    }

    #[test]
    fn simultaneous_merge_honours_a_custom_strategy() {
        let (_scope, tl) = world();
        let e = tl.broadcast_event::<i32>(None);
        let left = e.map(|v| v + 1);
        let right = e.map(|v| v * 10);
        let m = Event::merged_with(|fired: Vec<i32>| fired.into_iter().sum(), &[&left, &right]);

        e.send(5).unwrap();
        assert_eq!(m.sample(), EventState::Fired(56));
    }

    #[test]
    fn collect_receives_only_fired_values() {
        let (scope, tl) = world();
        let e = tl.broadcast_event::<i32>(None);
        let odd = e.filter(|v| v % 2 == 1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        odd.collect(move |v| sink.lock().unwrap().push(v));

        e.send(1).unwrap();
        e.send(2).unwrap();
        e.send(3).unwrap();
        assert!(scope.flush());
        assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
    }

    #[test]
    fn internal_broadcast_does_not_advance_frames() {
        let scope = Scope::new();
        let tl = Timeline::new(scope, TimelineConfig::new().time_travel(true));
        let external = tl.broadcast_event::<i32>(None);
        let internal = tl.internal_broadcast_event::<i32>(None);

        external.send(1).unwrap();
        internal.send(2).unwrap();
        assert_eq!(tl.latest_frame(), 1);
        assert_eq!(tl.event_trace().len(), 1);
    }

    #[test]
    fn tick_emits_until_cancelled() {
        let (scope, tl) = world();
        let ticks = tl.tick(Duration::from_millis(5));
        let seen = Arc::new(Mutex::new(0u32));
        let sink = Arc::clone(&seen);
        ticks.collect(move |_| *sink.lock().unwrap() += 1);

        std::thread::sleep(Duration::from_millis(40));
        assert!(scope.flush());
        assert!(*seen.lock().unwrap() >= 1, "tick should have fired");
        scope.cancel();
    }
}
