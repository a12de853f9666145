// Performance benchmarks for the DSP primitives and the block renderer
//
// Run with: cargo bench --bench dsp_bench

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::hint::black_box;
use tiltlab_core::domain::*;

const SAMPLE_RATE: u32 = 48000;

fn bench_biquad_process(c: &mut Criterion) {
    let mut filter = BiquadFilter::new(BiquadCoeffs::peaking(SAMPLE_RATE as f32, 1000.0, 6.0, 1.0));
    let mut buffer: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.01).sin()).collect();

    c.bench_function("biquad_peaking_1024_samples", |b| {
        b.iter(|| {
            filter.process(black_box(&mut buffer));
        });
    });
}

fn bench_pink_noise_generation(c: &mut Criterion) {
    c.bench_function("pink_noise_1s", |b| {
        let mut rng = StdRng::seed_from_u64(1);
        b.iter(|| black_box(NoiseBuffer::generate_with(&mut rng, 1.0, SAMPLE_RATE)));
    });
}

fn bench_tilt_bank_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("tilt_bank_render_512");

    for bands in [5usize, 10, 20, 40].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(bands), bands, |b, &bands| {
            let mut graph = RenderGraph::new(SAMPLE_RATE);
            let buffer = NoiseBuffer::generate_with(&mut StdRng::seed_from_u64(2), 0.5, SAMPLE_RATE);
            let mut noise = NoiseSource::new(&mut graph, buffer, 0.5).unwrap();
            let config = TiltBankConfig {
                num_bands: bands,
                ..TiltBankConfig::default()
            };
            let mut bank = SpectralTiltBank::new(&mut graph, config).unwrap();
            graph.connect(noise.output().unwrap(), bank.input().unwrap()).unwrap();
            let dest = graph.destination();
            graph.connect(bank.output().unwrap(), dest).unwrap();

            let mut out = vec![0.0; 512];
            b.iter(|| {
                graph.render(black_box(&mut out));
            });

            bank.dispose(&mut graph).unwrap();
            noise.dispose(&mut graph).unwrap();
        });
    }

    group.finish();
}

fn bench_equalizer_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("equalizer_render_512");

    for bands in [1usize, 4, 8, 16].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(bands), bands, |b, &bands| {
            let mut graph = RenderGraph::new(SAMPLE_RATE);
            let buffer = NoiseBuffer::generate_with(&mut StdRng::seed_from_u64(3), 0.5, SAMPLE_RATE);
            let mut noise = NoiseSource::new(&mut graph, buffer, 0.5).unwrap();
            let mut eq = ParametricEqualizer::new(&mut graph, EqualizerConfig::default()).unwrap();
            let profile = EqProfile::new(
                (0..bands)
                    .map(|i| Band::new(60.0 * 2f32.powi(i as i32 % 9), 3.0, 1.0))
                    .collect(),
                0.0,
            );
            eq.apply_profile(&mut graph, &profile).unwrap();
            graph.connect(noise.output().unwrap(), eq.input().unwrap()).unwrap();
            let dest = graph.destination();
            graph.connect(eq.output().unwrap(), dest).unwrap();

            let mut out = vec![0.0; 512];
            b.iter(|| {
                graph.render(black_box(&mut out));
            });

            eq.dispose(&mut graph).unwrap();
            noise.dispose(&mut graph).unwrap();
        });
    }

    group.finish();
}

fn bench_carver_sweep(c: &mut Criterion) {
    let mut graph = RenderGraph::new(SAMPLE_RATE);
    let mut carver = BandRegionCarver::new(&mut graph, CarverConfig::default()).unwrap();
    let centers = [125.0, 1000.0, 8000.0, 16000.0];
    let mut step = 0;

    c.bench_function("carver_center_sweep", |b| {
        b.iter(|| {
            step = (step + 1) % centers.len();
            carver
                .set_center_frequency(&mut graph, black_box(centers[step]))
                .unwrap();
            graph.advance(128);
        });
    });

    carver.dispose(&mut graph).unwrap();
}

criterion_group!(
    benches,
    bench_biquad_process,
    bench_pink_noise_generation,
    bench_tilt_bank_render,
    bench_equalizer_render,
    bench_carver_sweep
);
criterion_main!(benches);
