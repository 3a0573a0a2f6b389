#![forbid(unsafe_code)]

//! Trailing-edge debounce.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rivulet_core::Event;

/// Minimum poll period of the debounce worker.
const MIN_POLL: Duration = Duration::from_millis(1);

/// An event firing the **latest** occurrence of `event` once `window`
/// has elapsed with no newer one.
///
/// The output is an internal event: emissions do not advance the frame
/// counter. The worker polling the quiet window stops when the
/// timeline's scope is cancelled.
pub fn debounced<A: Clone + Send + Sync + 'static>(
    event: &Event<A>,
    window: Duration,
) -> Event<A> {
    let timeline = event.timeline().clone();
    let out = timeline.internal_broadcast_event::<A>(Some("debounced"));

    let pending: Arc<Mutex<Option<(A, Instant)>>> = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&pending);
    event.collect(move |v| {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some((v, Instant::now()));
    });

    let producer = out.clone();
    let poll = (window / 4).max(MIN_POLL);
    timeline.scope().spawn("rivulet-debounce", move |token| {
        while token.sleep(poll) {
            let ready = {
                let mut slot = pending.lock().unwrap_or_else(PoisonError::into_inner);
                match &*slot {
                    Some((_, at)) if at.elapsed() >= window => slot.take(),
                    _ => None,
                }
            };
            if let Some((v, _)) = ready
                && producer.send(v).is_err()
            {
                break;
            }
        }
        tracing::trace!("debounce worker stopped");
    });
    out.event()
}
