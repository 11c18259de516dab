//! Performance benchmarks for converge-engine

use converge_engine::{
    shared, Change, Clock, ClockConfig, LocalTransport, MemoryStorage, Message, MerkleTrie,
    Millis, Replica, SyncConfig, SyncSession, Timestamp,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

const BASE: Millis = 1_704_067_200_000;
const WEEK: Millis = 7 * 86_400_000;

fn fixed_now() -> Millis {
    BASE + WEEK
}

fn replica(node: &str) -> Replica<MemoryStorage> {
    Replica::new(
        Clock::new(node, ClockConfig::default()).unwrap(),
        MemoryStorage::new(),
    )
}

fn history(node: &str, count: u64) -> Vec<Message> {
    let step = WEEK / count;
    (0..count)
        .map(|i| {
            Message::new(
                "events",
                format!("r{}", i % 100),
                "seen",
                json!(i),
                Timestamp::new(BASE + i * step, 0, node),
            )
        })
        .collect()
}

fn bench_clock(c: &mut Criterion) {
    let mut group = c.benchmark_group("clock");

    group.bench_function("send", |b| {
        let mut clock = Clock::new("0123456789abcdef", ClockConfig::default()).unwrap();
        let mut now = BASE;
        b.iter(|| {
            now += 1;
            clock.send(black_box(now))
        })
    });

    group.bench_function("timestamp_parse", |b| {
        let ts = "2024-01-01T00:00:00.000Z-0001-0123456789abcdef";
        b.iter(|| black_box(ts).parse::<Timestamp>())
    });

    group.finish();
}

fn bench_trie(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie");

    group.bench_function("insert", |b| {
        let mut trie = MerkleTrie::new();
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            trie.insert(black_box(&Timestamp::new(BASE + i * 1_000, 0, "0123456789abcdef")))
        })
    });

    for size in [1_000u64, 10_000] {
        let messages = history("00000000000000aa", size);
        let stamps: Vec<_> = messages.iter().map(|m| m.timestamp.clone()).collect();
        let local = MerkleTrie::build(&stamps);
        let mut remote = local.clone();
        remote.insert(&Timestamp::new(BASE + WEEK / 2, 0, "00000000000000bb"));

        group.bench_with_input(BenchmarkId::new("diff_one_extra", size), &size, |b, _| {
            b.iter(|| black_box(&local).diff(black_box(&remote)))
        });
    }

    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");

    for size in [100u64, 1_000] {
        let messages = history("00000000000000aa", size);
        group.bench_with_input(BenchmarkId::new("batch", size), &messages, |b, messages| {
            b.iter(|| {
                let mut r = replica("00000000000000cc");
                r.apply(black_box(messages.clone()), fixed_now())
            })
        });
    }

    group.bench_function("local_write", |b| {
        let mut r = replica("00000000000000cc");
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            r.write(
                vec![Change::new("accounts", format!("a{}", i % 50), "balance", json!(i))],
                BASE,
            )
        })
    });

    group.finish();
}

fn bench_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("sync");
    group.sample_size(10);
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for size in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::new("disjoint", size), &size, |b, &size| {
            b.to_async(&runtime).iter(|| async move {
                let a = shared(replica("00000000000000aa"));
                let other = shared(replica("00000000000000bb"));
                a.lock().apply(history("00000000000000aa", size), fixed_now()).unwrap();
                other.lock().apply(history("00000000000000bb", size), fixed_now()).unwrap();

                SyncSession::new(
                    a,
                    LocalTransport::new(other).with_time_source(fixed_now),
                    SyncConfig::default(),
                )
                .with_time_source(fixed_now)
                .run()
                .await
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_clock, bench_trie, bench_apply, bench_sync);
criterion_main!(benches);
