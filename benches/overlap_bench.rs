use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use ghostcomm::prelude::*;

// 1) RCB tiling of the unit cube with `nprocs` tiles, seen from rank 0
fn tiled_setup(nprocs: usize) -> (OverlapStrategy, Domain) {
    let mut dom = Domain::new(3, [0.0; 3], [1.0; 3], [true; 3]).unwrap();
    let rcb = RcbPartition::bisect(nprocs, 3, dom.prd).unwrap();
    let strat = OverlapStrategy::tiled(rcb, 0).unwrap();
    strat.apply_subdomain(&mut dom).unwrap();
    (strat, dom)
}

fn bench_box_drop(c: &mut Criterion) {
    let mut group = c.benchmark_group("box_drop");
    for &nprocs in &[8, 64, 512, 4096] {
        let (strat, dom) = tiled_setup(nprocs);
        let mut slab = dom.subdomain();
        slab.lo[0] = slab.hi[0];
        slab.hi[0] += 0.05;
        group.bench_with_input(BenchmarkId::from_parameter(nprocs), &slab, |b, slab| {
            let mut found = Vec::new();
            b.iter(|| {
                found.clear();
                let _ = strat.box_drop(&dom, 0, black_box(slab), &mut found).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_point_drop(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_drop");
    for &nprocs in &[8, 64, 512, 4096] {
        let (strat, dom) = tiled_setup(nprocs);
        let mut rng = SmallRng::seed_from_u64(42);
        let points: Vec<[f64; 3]> = (0..1024)
            .map(|_| [rng.r#gen::<f64>(), rng.r#gen::<f64>(), rng.r#gen::<f64>()])
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(nprocs), &points, |b, points| {
            b.iter(|| {
                for x in points {
                    black_box(strat.point_drop(&dom, 0, x, 1.0e-6, 2));
                }
            });
        });
    }
    group.finish();
}

fn bench_swap_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("swap_plan");
    for &nprocs in &[64, 512, 4096] {
        let (strat, dom) = tiled_setup(nprocs);
        group.bench_function(BenchmarkId::from_parameter(nprocs), |b| {
            b.iter(|| SwapPlan::build(&strat, &dom, black_box(0.02)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_box_drop, bench_point_drop, bench_swap_plan);
criterion_main!(benches);
