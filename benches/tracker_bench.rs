//! Benchmarks for snapshot reconciliation and product text parsing.

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use stormwatch::model::{LifecycleStatus, Warning, WarningArea, WarningParameters, Watch, WatchKind};
use stormwatch::parser::{extract_watch_number, parse_watch_box_name};
use stormwatch::tracker::{Horizons, WarningTracker, WatchTracker};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
}

fn sample_watches(count: u32) -> Vec<Watch> {
    (0..count)
        .map(|n| {
            Watch::new(
                n,
                WatchKind::Tornado,
                LifecycleStatus::NewIssue,
                start() + Duration::minutes(i64::from(n % 600)),
            )
        })
        .collect()
}

fn sample_warnings(count: u32) -> Vec<Warning> {
    (0..count)
        .map(|n| Warning {
            id: format!("urn:oid:2.49.0.1.840.0.{:08}", n),
            event: "Severe Thunderstorm Warning".to_string(),
            name: "Severe Thunderstorm Warning".to_string(),
            status: LifecycleStatus::NewIssue,
            sent: start() + Duration::minutes(i64::from(n % 600) + 1),
            effective: None,
            onset: None,
            expires: None,
            ends: None,
            sender: "NWS Norman OK".to_string(),
            headline: String::new(),
            nws_headline: String::new(),
            description: "At 245 PM CDT, a severe thunderstorm was located near Moore.".to_string(),
            instruction: String::new(),
            parameters: WarningParameters::default(),
            area: WarningArea::Zones(vec!["OKC027".to_string()]),
        })
        .collect()
}

fn bench_watch_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("watch_tracker");
    let watches = sample_watches(500);
    let now = start() + Duration::hours(12);

    // First sight of a full snapshot
    group.throughput(Throughput::Elements(watches.len() as u64));
    group.bench_function("fresh_snapshot", |b| {
        b.iter(|| {
            let mut tracker = WatchTracker::new(Horizons::default());
            tracker.admit_watches(black_box(watches.clone()), start(), now)
        })
    });

    // Steady state: every watch already seen
    let mut warmed = WatchTracker::new(Horizons::default());
    warmed.admit_watches(watches.clone(), start(), now);
    group.bench_function("repeat_snapshot", |b| {
        b.iter(|| {
            let mut tracker = warmed.clone();
            tracker.sweep(now);
            tracker.admit_watches(black_box(watches.clone()), start(), now)
        })
    });

    group.finish();
}

fn bench_warning_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("warning_tracker");
    let warnings = sample_warnings(1000);
    let now = start() + Duration::hours(12);

    group.throughput(Throughput::Elements(warnings.len() as u64));
    group.bench_function("admit", |b| {
        b.iter(|| {
            let mut tracker = WarningTracker::new(Horizons::default());
            warnings
                .iter()
                .filter(|w| tracker.admit(black_box(w), start(), now).is_some())
                .count()
        })
    });

    group.finish();
}

fn bench_text_parsing(c: &mut Criterion) {
    let mut group = c.benchmark_group("text_parsing");
    let description = "THE NWS STORM PREDICTION CENTER HAS ISSUED A\n* TORNADO WATCH 123 IN EFFECT UNTIL 900 PM CDT FOR THE FOLLOWING LOCATIONS";
    let now = start();

    group.bench_function("extract_watch_number", |b| {
        b.iter(|| extract_watch_number(black_box(description), WatchKind::Tornado))
    });

    group.bench_function("parse_watch_box_name", |b| {
        b.iter(|| parse_watch_box_name(black_box("WW 0123 PDS TORNADO 061845Z-070200Z"), now))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_watch_tracker,
    bench_warning_tracker,
    bench_text_parsing
);
criterion_main!(benches);
