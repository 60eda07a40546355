//! Benchmarks for transcript parsing and predicate matching.
//!
//! Replay-heavy scenarios parse transcripts with tens of thousands of events
//! and match a predicate against every queued event; both paths sit on the
//! hot side of a wait loop.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use xtestbed_core::protocol::{EventKind, EventPredicate, ServerEvent};
use xtestbed_core::recording::EventScript;

fn synthetic_transcript(frames: usize) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for i in 0..frames {
        let stamp = i as f64 * 0.008;
        let secs = stamp as u64;
        let usecs = ((stamp - secs as f64) * 1e6) as u64;
        writeln!(out, "E: {secs}.{usecs:06} 0002 0000 3").unwrap();
        writeln!(out, "E: {secs}.{usecs:06} 0002 0001 -2").unwrap();
        writeln!(out, "E: {secs}.{usecs:06} 0000 0000 0").unwrap();
    }
    out
}

fn bench_parse_transcript(c: &mut Criterion) {
    let text = synthetic_transcript(10_000);
    c.bench_function("parse_transcript_10k_frames", |b| {
        b.iter(|| EventScript::parse(black_box(&text)).unwrap())
    });
}

fn bench_predicate_matching(c: &mut Criterion) {
    let predicate = EventPredicate::kind(EventKind::ButtonPress)
        .with_opcode(131)
        .with_detail(4);
    let events: Vec<ServerEvent> = (0..10_000)
        .map(|i| ServerEvent {
            kind: if i % 100 == 0 {
                EventKind::ButtonPress
            } else {
                EventKind::Motion
            },
            extension_opcode: Some(131),
            device: 2,
            source: 9,
            detail: 4,
            root_x: i as f64,
            root_y: 0.0,
            screen: 0,
            buttons: 0,
            emulated: false,
        })
        .collect();

    c.bench_function("predicate_scan_10k_events", |b| {
        b.iter(|| {
            black_box(&events)
                .iter()
                .filter(|e| predicate.matches(e))
                .count()
        })
    });
}

criterion_group!(benches, bench_parse_transcript, bench_predicate_matching);
criterion_main!(benches);
