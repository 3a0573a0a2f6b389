//! Multiple producer threads hammer the same timeline; the coarse lock
//! serializes every update.

use std::thread;

use rivulet_core::{Scope, State, Timeline, TimelineConfig};

const PRODUCERS: usize = 8;
const SENDS_PER_PRODUCER: usize = 200;

#[test]
fn concurrent_sends_are_serialized() {
    let tl = Timeline::new(Scope::new(), TimelineConfig::new());
    let events = tl.broadcast_event::<usize>(None);
    let count = State::fold(0usize, &events.event(), |acc, _| acc + 1);
    let sum = State::fold(0usize, &events.event(), |acc, v| acc + v);

    let handles: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let producer = events.clone();
            thread::spawn(move || {
                for i in 0..SENDS_PER_PRODUCER {
                    producer.send(p * SENDS_PER_PRODUCER + i).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = PRODUCERS * SENDS_PER_PRODUCER;
    assert_eq!(count.value(), total);
    // Every send folds exactly once, whatever the interleaving.
    assert_eq!(sum.value(), (0..total).sum::<usize>());
}

#[test]
fn concurrent_sends_advance_one_frame_each() {
    let tl = Timeline::new(Scope::new(), TimelineConfig::new().time_travel(true));
    let a = tl.broadcast_event::<usize>(None);
    let b = tl.broadcast_event::<usize>(None);

    let ta = {
        let producer = a.clone();
        thread::spawn(move || {
            for i in 0..100 {
                producer.send(i).unwrap();
            }
        })
    };
    let tb = {
        let producer = b.clone();
        thread::spawn(move || {
            for i in 0..100 {
                producer.send(i).unwrap();
            }
        })
    };
    ta.join().unwrap();
    tb.join().unwrap();

    assert_eq!(tl.latest_frame(), 200);
    assert_eq!(tl.event_trace().len(), 200);
    assert_eq!(tl.current_frame(), tl.latest_frame());
}
