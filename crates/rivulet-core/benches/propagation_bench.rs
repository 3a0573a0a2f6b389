//! Propagation microbenchmarks: eager map chains, wide fan-out, and
//! lazy pull-through.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rivulet_core::{Scope, State, Timeline, TimelineConfig};

fn eager_chain(c: &mut Criterion) {
    let tl = Timeline::new(Scope::new(), TimelineConfig::new());
    let source = tl.mutable_state(0i64, None);
    let mut tip: State<i64> = source.state();
    for _ in 0..32 {
        tip = tip.map(|v| v.wrapping_add(1));
    }

    let mut n = 0i64;
    c.bench_function("eager_chain_32", |b| {
        b.iter(|| {
            n = n.wrapping_add(1);
            source.set(black_box(n)).unwrap();
            black_box(tip.value());
        });
    });
}

fn eager_fan_out(c: &mut Criterion) {
    let tl = Timeline::new(Scope::new(), TimelineConfig::new());
    let source = tl.mutable_state(0i64, None);
    let leaves: Vec<State<i64>> = (0..64)
        .map(|i| source.map(move |v| v.wrapping_mul(i + 1)))
        .collect();

    let mut n = 0i64;
    c.bench_function("eager_fan_out_64", |b| {
        b.iter(|| {
            n = n.wrapping_add(1);
            source.set(black_box(n)).unwrap();
            black_box(leaves.last().map(State::value));
        });
    });
}

fn lazy_pull(c: &mut Criterion) {
    let tl = Timeline::new(Scope::new(), TimelineConfig::new().lazy(true));
    let source = tl.mutable_state(0i64, None);
    let mut tip: State<i64> = source.state();
    for _ in 0..32 {
        tip = tip.map(|v| v.wrapping_add(1));
    }

    let mut n = 0i64;
    c.bench_function("lazy_update_then_pull_32", |b| {
        b.iter(|| {
            n = n.wrapping_add(1);
            source.set(black_box(n)).unwrap();
            black_box(tip.value());
        });
    });
}

criterion_group!(benches, eager_chain, eager_fan_out, lazy_pull);
criterion_main!(benches);
