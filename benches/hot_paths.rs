use std::sync::Arc;
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use delaymeter::ingest::parse::parse_record;
use delaymeter::sink::aggregated::file::format_delay_line;
use delaymeter::sink::aggregated::Aggregator;

fn sample_delays(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64 * 0.001 + 0.125).collect()
}

fn bench_parse_record(c: &mut Criterion) {
    c.bench_function("parse_record/connect", |b| {
        b.iter(|| parse_record(black_box("validator-node-17\n")))
    });

    c.bench_function("parse_record/event", |b| {
        b.iter(|| {
            let record = parse_record(black_box("1700000000.123456 block-payload-0xdeadbeef\n"));
            black_box(record.contribution(1_700_000_001.0))
        })
    });
}

fn bench_aggregator(c: &mut Criterion) {
    let agg = Aggregator::new();

    c.bench_function("aggregator/add_bytes", |b| {
        b.iter(|| agg.add(black_box(32), None))
    });

    c.bench_function("aggregator/add_then_drain_1k", |b| {
        b.iter(|| {
            for _ in 0..1_000 {
                agg.add(32, Some(0.25));
            }
            black_box(agg.drain().delays.len())
        })
    });

    c.bench_function("aggregator/contended_add_4_threads", |b| {
        let agg = Arc::new(Aggregator::new());
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let agg = Arc::clone(&agg);
                    thread::spawn(move || {
                        for _ in 0..250 {
                            agg.add(16, Some(0.5));
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().expect("join");
            }
            black_box(agg.drain().bytes)
        })
    });
}

fn bench_format(c: &mut Criterion) {
    let delays = sample_delays(1_000);

    c.bench_function("format_delay_line/1k", |b| {
        b.iter(|| black_box(format_delay_line(black_box(&delays))).len())
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_parse_record(c);
    bench_aggregator(c);
    bench_format(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
