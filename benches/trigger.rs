//! Per-sample throughput of the trigger and framing engine
//!
//! ```bash
//! cargo bench --bench trigger
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pqscope::scope::config::ConfigPort;
use pqscope::scope::output::{FrameWriter, OutputFormat};
use pqscope::settings::TriggerMode;
use pqscope::{Engine, Settings};
use std::io;

const LINES: usize = 50_000;

/// 50 Hz mains-like input at 8 kHz
fn mains_input() -> String {
    (0..LINES)
        .map(|i| {
            let t = i as f64 / 8000.0;
            let v = 325.0 * (2.0 * std::f64::consts::PI * 50.0 * t).sin();
            let c = 10.0 * (2.0 * std::f64::consts::PI * 50.0 * t - 0.3).sin();
            format!("{:.3} {:.3} {:.3} 0.001\n", v, c, v * c)
        })
        .collect()
}

fn bench_engine(c: &mut Criterion) {
    let input = mains_input();
    let mut group = c.benchmark_group("engine");
    group.throughput(Throughput::Elements(LINES as u64));

    for (name, mode) in [
        ("freerun", TriggerMode::Freerun),
        ("sync", TriggerMode::Sync),
        ("inrush", TriggerMode::Inrush),
    ] {
        for format in [OutputFormat::Raw, OutputFormat::Pixels] {
            let id = BenchmarkId::new(name, format!("{:?}", format).to_lowercase());
            group.bench_function(id, |b| {
                b.iter(|| {
                    let settings = Settings {
                        trigger_mode: mode,
                        inrush_threshold: 1.0e9,
                        ..Settings::default()
                    };
                    let port = ConfigPort::new(settings, None, pqscope::DEFAULT_CAPACITY);
                    let mut engine = Engine::new(port).unwrap();
                    let mut out = FrameWriter::new(io::sink(), format);
                    black_box(engine.run(input.as_bytes(), &mut out).unwrap())
                })
            });
        }
    }
    group.finish();
}

fn bench_store(c: &mut Criterion) {
    let mut store = pqscope::SampleStore::new(pqscope::DEFAULT_CAPACITY);
    c.bench_function("store/parse_line", |b| {
        b.iter(|| black_box(store.store(black_box("230.125 4.500 1035.562 0.002"))))
    });
}

criterion_group!(benches, bench_engine, bench_store);
criterion_main!(benches);
