use std::{hint::black_box, time::Duration};

use criterion::{criterion_group, criterion_main, Criterion};
use gaugebus::{Bus, BusConfig, SubscribeFlags, SubscriberRef};

const TIMEOUT: Duration = Duration::from_secs(1);

fn bench_publish_round_trip(c: &mut Criterion) {
    let bus = Bus::new(BusConfig::default()).unwrap();
    let sub = SubscriberRef::external(|topic, value| {
        black_box((topic, value));
    });
    bus.subscribe("b", SubscribeFlags::PUB, &sub, TIMEOUT).unwrap();

    let mut counter = 0u32;
    c.bench_function("bus_publish_wait", |b| {
        b.iter(|| {
            counter = counter.wrapping_add(1);
            bus.publish("b/x", black_box(counter), TIMEOUT).unwrap();
        })
    });

    c.bench_function("bus_publish_nowait", |b| {
        b.iter(|| {
            counter = counter.wrapping_add(1);
            bus.publish("b/y", black_box(counter), Duration::ZERO).unwrap();
        })
    });
}

fn bench_query(c: &mut Criterion) {
    let bus = Bus::new(BusConfig::default()).unwrap();
    bus.publish("q/v", 42u64, TIMEOUT).unwrap();
    c.bench_function("bus_query", |b| {
        b.iter(|| black_box(bus.query("q/v", TIMEOUT).unwrap()))
    });
}

criterion_group!(benches, bench_publish_round_trip, bench_query);
criterion_main!(benches);
