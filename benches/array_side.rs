//! Benchmarks the array-based book side's near-inside O(1) claim
//! against the map-based side across increasing order counts (§4.2).

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use jaybeams::book::{ArraySide, BookSide, MapSide};
use jaybeams::price::{Price, Side};

fn fill_near_inside(side: &mut dyn BookSide, levels: usize) {
    for i in 0..levels {
        let price = Price::new(1_000_000 + i as i32 * 100).unwrap();
        side.add_order(price, 100).unwrap();
    }
}

fn bench_add_near_inside(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_order near inside");
    for &levels in &[100usize, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::new("array", levels), &levels, |b, &levels| {
            b.iter_with_setup(
                || {
                    let mut side = ArraySide::new(Side::Buy, 20_000);
                    fill_near_inside(&mut side, levels);
                    side
                },
                |mut side| {
                    let price = Price::new(1_000_000 + levels as i32 * 100).unwrap();
                    black_box(side.add_order(price, 100).unwrap());
                },
            );
        });

        group.bench_with_input(BenchmarkId::new("map", levels), &levels, |b, &levels| {
            b.iter_with_setup(
                || {
                    let mut side = MapSide::new(Side::Buy);
                    fill_near_inside(&mut side, levels);
                    side
                },
                |mut side| {
                    let price = Price::new(1_000_000 + levels as i32 * 100).unwrap();
                    black_box(side.add_order(price, 100).unwrap());
                },
            );
        });
    }
    group.finish();
}

fn bench_best_quote(c: &mut Criterion) {
    let mut group = c.benchmark_group("best_quote");

    let mut array_side = ArraySide::new(Side::Buy, 20_000);
    fill_near_inside(&mut array_side, 10_000);
    group.bench_function("array", |b| b.iter(|| black_box(array_side.best_quote())));

    let mut map_side = MapSide::new(Side::Buy);
    fill_near_inside(&mut map_side, 10_000);
    group.bench_function("map", |b| b.iter(|| black_box(map_side.best_quote())));

    group.finish();
}

criterion_group!(benches, bench_add_near_inside, bench_best_quote);
criterion_main!(benches);
