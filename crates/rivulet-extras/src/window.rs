#![forbid(unsafe_code)]

//! Sliding windows over event occurrences.

use rivulet_core::{Event, State};

/// A state holding the last `capacity` occurrences of `event`, oldest
/// first.
///
/// # Panics
///
/// Panics if `capacity` is zero.
pub fn windowed<A: Clone + Send + Sync + 'static>(
    event: &Event<A>,
    capacity: usize,
) -> State<Vec<A>> {
    assert!(capacity > 0, "windowed requires a non-zero capacity");
    State::fold(Vec::new(), event, move |window, v| {
        let mut next = window.clone();
        next.push(v.clone());
        if next.len() > capacity {
            let overflow = next.len() - capacity;
            next.drain(..overflow);
        }
        next
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rivulet_core::{Scope, Timeline, TimelineConfig};

    #[test]
    fn window_fills_up_to_capacity() {
        let tl = Timeline::new(Scope::new(), TimelineConfig::new());
        let e = tl.broadcast_event::<i32>(None);
        let last3 = windowed(&e.event(), 3);

        assert!(last3.value().is_empty());
        e.send(1).unwrap();
        e.send(2).unwrap();
        assert_eq!(last3.value(), vec![1, 2]);
    }

    #[test]
    fn window_evicts_oldest_first() {
        let tl = Timeline::new(Scope::new(), TimelineConfig::new());
        let e = tl.broadcast_event::<i32>(None);
        let last3 = windowed(&e.event(), 3);

        for v in 1..=5 {
            e.send(v).unwrap();
        }
        assert_eq!(last3.value(), vec![3, 4, 5]);
    }

    #[test]
    fn capacity_one_tracks_the_latest() {
        let tl = Timeline::new(Scope::new(), TimelineConfig::new());
        let e = tl.broadcast_event::<&'static str>(None);
        let latest = windowed(&e.event(), 1);

        e.send("a").unwrap();
        e.send("b").unwrap();
        assert_eq!(latest.value(), vec!["b"]);
    }
}
