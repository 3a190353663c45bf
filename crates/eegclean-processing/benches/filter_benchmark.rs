//! Benchmarks for the zero-phase FIR bandpass
//!
//! Covers kernel design, single-channel FFT convolution at several signal
//! lengths, and a full multichannel recording across thread counts.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use eegclean_processing::{apply_zero_phase, BandpassFilter, FilterExt, FirDesign};
use eegclean_simulation::{EEGConfig, EEGSimulator};

/// Benchmark kernel design for common bands
fn bench_design(c: &mut Criterion) {
    let mut group = c.benchmark_group("fir_design");

    for &(l, h) in &[(0.5, 40.0), (1.0, 10.0), (1.0, 100.0)] {
        group.bench_function(BenchmarkId::new("bandpass", format!("{}-{}Hz", l, h)), |b| {
            b.iter(|| FirDesign::bandpass(black_box(250.0), Some(l), Some(h)))
        });
    }

    group.finish();
}

/// Benchmark single-channel filtering
fn bench_single_channel(c: &mut Criterion) {
    let mut group = c.benchmark_group("zero_phase");
    let design = FirDesign::bandpass(250.0, Some(0.5), Some(40.0)).unwrap();

    for &seconds in &[10usize, 60, 300] {
        let signal: Vec<f64> = (0..seconds * 250)
            .map(|i| (i as f64 * 0.07).sin() + 0.3 * (i as f64 * 1.3).cos())
            .collect();

        group.bench_with_input(BenchmarkId::new("signal", format!("{}s", seconds)), &signal, |b, signal| {
            b.iter(|| apply_zero_phase(black_box(signal), &design.taps))
        });
    }

    // Reusing the planned convolver across calls
    let filter = BandpassFilter::new(250.0, Some(0.5), Some(40.0), 1).unwrap();
    let signal: Vec<f64> = (0..60 * 250).map(|i| (i as f64 * 0.07).sin()).collect();
    group.bench_function("planned_60s", |b| b.iter(|| filter.apply_signal(black_box(&signal))));

    group.finish();
}

/// Benchmark filtering a 33-channel recording with different worker counts
fn bench_recording(c: &mut Criterion) {
    let mut group = c.benchmark_group("recording_filter");
    group.sample_size(10);

    let config = EEGConfig {
        seed: Some(11),
        ..EEGConfig::default()
    };
    let session = EEGSimulator::new(config).unwrap().generate(60.0).unwrap();

    for &n_jobs in &[1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::new("n_jobs", n_jobs), &n_jobs, |b, &n_jobs| {
            b.iter(|| {
                let mut raw = session.raw.copy();
                raw.filter(Some(0.5), Some(40.0), None, n_jobs).unwrap();
                black_box(raw)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_design, bench_single_channel, bench_recording);
criterion_main!(benches);
