use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use gaugebus::{
    pubsub::{DeliveryClass, Subscription, TopicTree},
    EnvelopePool, SubscribeFlags, SubscriberRef, Topic, Value, ValueFlags,
};

fn bench_envelope_alloc(c: &mut Criterion) {
    let pool = EnvelopePool::with_sizes(1024, 65536 + 64, 64, 4);
    let topic = Topic::parse("u/js220/0001/s/i/range").unwrap();

    c.bench_function("envelope_u32", |b| {
        b.iter(|| {
            let env = pool.envelope(topic.clone(), black_box(5u32), ValueFlags::RETAIN);
            black_box(env);
        })
    });

    let mut group = c.benchmark_group("envelope_bin");
    for size in [16usize, 512, 4096, 60000] {
        let payload = vec![0xa5u8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter(|| {
                let env = pool.envelope(topic.clone(), payload.clone(), ValueFlags::empty());
                black_box(env);
            })
        });
    }
    group.finish();
}

fn bench_topic_parse(c: &mut Criterion) {
    c.bench_function("topic_parse", |b| {
        b.iter(|| Topic::parse(black_box("u/js220/0001/s/i/range$")).unwrap())
    });
}

fn bench_tree_deliver(c: &mut Criterion) {
    let pool = EnvelopePool::new();
    let mut group = c.benchmark_group("tree_deliver");
    for subs in [0usize, 1, 10] {
        let mut tree = TopicTree::new();
        let node = tree.find_or_create("u/js220/0001/s/i/range").unwrap();
        let parent = tree.find_or_create("u/js220/0001").unwrap();
        for _ in 0..subs {
            let sub = SubscriberRef::from_fn(|env| {
                black_box(env.value());
                Ok(())
            });
            tree.add_subscription(parent, Subscription::new(sub, SubscribeFlags::PUB));
        }
        let env = pool.envelope(
            Topic::parse("u/js220/0001/s/i/range").unwrap(),
            Value::U8(3),
            ValueFlags::RETAIN,
        );
        group.bench_with_input(BenchmarkId::from_parameter(subs), &env, |b, env| {
            b.iter(|| tree.deliver(node, env, DeliveryClass::Publish).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_envelope_alloc, bench_topic_parse, bench_tree_deliver);
criterion_main!(benches);
