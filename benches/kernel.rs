//! Benchmarks for the CPU force kernel, shader generation and merging.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use orrery::cache::ChangeCache;
use orrery::config::SpawnConfig;
use orrery::kernel::{compute_shader, cpu, PhysicsParams};
use orrery::spawn::Spawner;
use orrery::{KernelLayout, KernelVariant, Particle, ParticleSet, PhysicsConstants};

fn cloud(count: u32) -> Vec<Particle> {
    let mut spawner = Spawner::new(SpawnConfig {
        count,
        seed: Some(7),
        ..SpawnConfig::default()
    });
    spawner.cloud().expect("default spawn config yields valid masses")
}

fn bench_cpu_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpu_step");
    group.sample_size(20);

    for count in [256u32, 1024, 2048] {
        let reference = cloud(count);
        let mut refreshed = reference.clone();
        let params = PhysicsParams::new(count, &PhysicsConstants::default());

        for layout in [KernelLayout::Naive, KernelLayout::Tiled] {
            group.bench_with_input(
                BenchmarkId::new(format!("{layout:?}"), count),
                &count,
                |b, _| {
                    b.iter(|| {
                        cpu::step(
                            black_box(&reference),
                            &mut refreshed,
                            KernelVariant::GravityElectrostatic,
                            layout,
                            256,
                            &params,
                        )
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_fast_inverse_sqrt(c: &mut Criterion) {
    let inputs: Vec<f32> = (1..1024).map(|i| i as f32 * 0.37).collect();
    c.bench_function("fast_inverse_sqrt", |b| {
        b.iter(|| inputs.iter().map(|&x| cpu::fast_inverse_sqrt(black_box(x))).sum::<f32>())
    });
}

fn bench_shader_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_shader");

    for variant in KernelVariant::ALL {
        group.bench_function(variant.label(), |b| {
            b.iter(|| black_box(compute_shader(variant, KernelLayout::Tiled, 256)))
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for count in [1_000u32, 10_000] {
        let particles = cloud(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let mut cache = ChangeCache::new(2);
                let mut set = ParticleSet::new();
                for p in &particles {
                    cache.add(*p).expect("fresh cache has a free channel");
                }
                let channel = cache.dispatch_pending_channel().expect("channel was written");
                cache.recycle(set.merge(channel));
                black_box(set.dense())
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_cpu_step,
    bench_fast_inverse_sqrt,
    bench_shader_generation,
    bench_merge
);
criterion_main!(benches);
