//! Benchmarks for the pass/fail event loop and negative-bin repair.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tnp_core::{BinSpec, SampleKind, TnpConfig, Variation};
use tnp_hist::{HistogramAccumulator, MemorySource, WeightedHistogram, postprocess};

fn make_events(n: usize) -> MemorySource {
    let mut mass = Vec::with_capacity(n);
    let mut tag_pt = Vec::with_capacity(n);
    let mut probe_pt = Vec::with_capacity(n);
    let mut probe_eta = Vec::with_capacity(n);
    let mut probe_id = Vec::with_capacity(n);
    let mut matched = Vec::with_capacity(n);
    let mut weight = Vec::with_capacity(n);

    for i in 0..n {
        let x = i as f64;
        mass.push(70.0 + (x * 7.3) % 60.0);
        tag_pt.push(20.0 + (x * 3.1) % 40.0);
        probe_pt.push(15.0 + (x * 1.7) % 100.0);
        probe_eta.push(-2.4 + (x * 0.37) % 4.8);
        probe_id.push(if i % 3 == 0 { 0.0 } else { 1.0 });
        matched.push(if i % 7 == 0 { 0.0 } else { 1.0 });
        weight.push(if i % 11 == 0 { -1.0 } else { 1.0 });
    }

    MemorySource::new([
        ("pair_mass", mass),
        ("tag_pt", tag_pt),
        ("probe_pt", probe_pt),
        ("probe_eta", probe_eta),
        ("probe_isTight", probe_id),
        ("probe_isMatchedGen", matched),
        ("genWeight", weight),
    ])
    .expect("bench columns")
}

fn accumulator(n_variations: usize) -> HistogramAccumulator {
    let variations: Vec<Variation> = (0..n_variations)
        .map(|i| {
            let mut v = Variation::new(format!("massbin{}", 40 + i));
            v.hist_nbins = Some(40 + i);
            v
        })
        .collect();
    let mut ch = TnpConfig::new("pair_mass", "tag_pt > 26", "probe_isTight", 60, (70.0, 130.0))
        .sim("/bench")
        .sim_weight("genWeight")
        .sim_genmatching("probe_isMatchedGen")
        .add_bin(BinSpec::new("fabs(probe_eta)", &[0.0, 0.9, 1.2, 2.1, 2.4]))
        .add_bin(BinSpec::new("probe_pt", &[15.0, 20.0, 25.0, 30.0, 40.0, 50.0, 60.0, 120.0]));
    if !variations.is_empty() {
        ch = ch.add_systematic(variations);
    }
    HistogramAccumulator::new(ch.hist_configs(SampleKind::Sim).expect("bench configs"))
        .expect("bench accumulator")
}

fn bench_event_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_loop");
    let n = 100_000;

    for n_variations in [0, 4] {
        let acc = accumulator(n_variations);
        let mut src = make_events(n);
        group.bench_with_input(
            BenchmarkId::new("configs", n_variations + 1),
            &n_variations,
            |b, _| {
                b.iter(|| {
                    let out = acc.run(black_box(&mut src), 0..n as u64).expect("run");
                    black_box(out)
                })
            },
        );
    }
    group.finish();
}

fn bench_postprocess(c: &mut Criterion) {
    let mut group = c.benchmark_group("postprocess");

    for n_bins in [60, 600] {
        let mut base = WeightedHistogram::new(n_bins, 70.0, 130.0);
        for i in 0..(n_bins * 20) {
            let x = 70.0 + (i as f64 * 0.37) % 60.0;
            let w = if i % 4 == 0 { -2.5 } else { 1.0 };
            base.fill(x, w);
        }

        group.bench_with_input(BenchmarkId::new("smear_x10_floor", n_bins), &n_bins, |b, _| {
            b.iter(|| {
                let mut h = base.clone();
                postprocess(black_box(&mut h));
                black_box(h)
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_event_loop, bench_postprocess);
criterion_main!(benches);
