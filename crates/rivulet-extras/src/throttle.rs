#![forbid(unsafe_code)]

//! Leading-edge rate limiting.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rivulet_core::Event;

/// An event passing an occurrence of `event` through iff at least
/// `interval` has elapsed since the last one that passed. The first
/// occurrence always passes.
///
/// The output is an internal event: emissions do not advance the frame
/// counter.
pub fn throttled<A: Clone + Send + Sync + 'static>(
    event: &Event<A>,
    interval: Duration,
) -> Event<A> {
    let timeline = event.timeline().clone();
    let out = timeline.internal_broadcast_event::<A>(Some("throttled"));

    let last_pass: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    let producer = out.clone();
    event.collect(move |v| {
        let mut last = last_pass.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let pass = match *last {
            Some(at) => now.duration_since(at) >= interval,
            None => true,
        };
        if pass {
            *last = Some(now);
            if let Err(err) = producer.send(v) {
                tracing::warn!(%err, "throttled emission failed");
            }
        }
    });
    out.event()
}
