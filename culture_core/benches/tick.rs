use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use culture_core::config::{LawConfig, MorbidostatParams, RunConfig, TurbidostatParams};
use culture_core::mocks::{MemoryStore, RecordingSink};
use culture_core::smoothing::median;
use culture_core::Fleet;
use culture_traits::TelemetryFrame;

// Synthetic OD trace per vial: logistic-ish ramp plus xorshift noise
fn synth_frames(n: usize, vials: usize, seed: u32) -> Vec<TelemetryFrame> {
    let mut state = seed.max(1);
    let mut next_f64 = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        f64::from(x) / (f64::from(u32::MAX) + 1.0)
    };
    (0..n)
        .map(|i| {
            let od = (0..vials)
                .map(|v| {
                    let t = (i + v * 7) as f64 / 40.0;
                    let base = 0.05 + 0.6 / (1.0 + (-(t - 3.0)).exp());
                    base + (next_f64() * 2.0 - 1.0) * 0.01
                })
                .collect();
            TelemetryFrame { od, temp_c: vec![37.0; vials] }
        })
        .collect()
}

fn fleet_for(law: LawConfig) -> Fleet {
    Fleet::builder()
        .with_run(RunConfig {
            law,
            ..RunConfig::default()
        })
        .build()
        .unwrap_or_else(|e| panic!("bench fleet: {e}"))
}

pub fn bench_fleet_tick(c: &mut Criterion) {
    let mut g = c.benchmark_group("fleet_tick");
    // Allow quick tweaking without CLI flags (Criterion 0.5):
    //   BENCH_SAMPLE_SIZE=10 cargo bench -p culture_core --bench tick
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(10));
        }
    } else {
        g.sample_size(30);
    }

    let frames = synth_frames(200, 15, 0xC0FFEE);
    let laws = [
        ("turbidostat", LawConfig::Turbidostat(TurbidostatParams::default())),
        ("morbidostat", LawConfig::Morbidostat(MorbidostatParams::default())),
    ];
    for (name, law) in laws {
        g.bench_function(name, |b| {
            b.iter_batched(
                || (fleet_for(law.clone()), MemoryStore::default(), RecordingSink::default()),
                |(mut fleet, mut store, mut sink)| {
                    for (k, f) in frames.iter().enumerate() {
                        let at_h = 0.05 * (k as f64 + 1.0);
                        let _ = black_box(fleet.tick(at_h, Some(f), &mut store, &mut sink));
                    }
                },
                BatchSize::LargeInput,
            );
        });
    }
    g.finish();
}

pub fn bench_median(c: &mut Criterion) {
    let window: Vec<f64> = synth_frames(7, 1, 7).into_iter().map(|f| f.od[0]).collect();
    c.bench_function("median_7", |b| b.iter(|| median(black_box(&window))));
}

criterion_group!(benches, bench_fleet_tick, bench_median);
criterion_main!(benches);
