//! Criterion benchmarks for the realtime proxy and render engine
//!
//! Measures:
//! - Engine render cost per callback size (stereo f32)
//! - Command throughput: control-side updates drained by the engine

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use tiltlab_benchmarks::{BenchChain, SAMPLE_RATE};
use tiltlab_infra::audio::RealtimeGraph;

fn bench_engine_callback(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_callback_stereo");

    for frames in [64usize, 256, 512, 1024].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(frames), frames, |b, &frames| {
            let (mut graph, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
            let chain = BenchChain::build(&mut graph, 4);
            let mut out = vec![0.0_f32; frames * 2];
            b.iter(|| engine.render_interleaved(black_box(&mut out), 2, |s| s));
            chain.dispose(&mut graph);
            engine.drain();
        });
    }

    group.finish();
}

fn bench_control_updates(c: &mut Criterion) {
    let (mut graph, mut engine) = RealtimeGraph::new(SAMPLE_RATE);
    let mut chain = BenchChain::build(&mut graph, 8);
    let mut out = vec![0.0_f32; 256];
    let mut step = 0u32;

    c.bench_function("band_update_then_render_256", |b| {
        b.iter(|| {
            step = step.wrapping_add(1);
            let gain = (step % 12) as f32 - 6.0;
            chain
                .equalizer
                .update_band(&mut graph, (step % 8) as usize, black_box(gain), None, None)
                .unwrap();
            engine.render(&mut out);
        });
    });

    chain.dispose(&mut graph);
    engine.drain();
}

criterion_group!(benches, bench_engine_callback, bench_control_updates);
criterion_main!(benches);
