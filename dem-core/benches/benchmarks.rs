use criterion::{criterion_group, criterion_main, Criterion};
use dem_core::{parse_filename, Bounds, Dataset, TileId};
use std::hint::black_box;

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn large_region_bounds() -> Bounds {
    Bounds::new(-125.0, 24.0, -66.0, 49.0).unwrap()
}

fn tiles_for_bounds_bench(c: &mut Criterion) {
    let bounds = large_region_bounds();
    c.bench_function("tiles_for_bounds (CONUS-sized bbox)", |b| {
        b.iter(|| black_box(dem_core::tiles_for_bounds(bounds)));
    });
}

fn filename_round_trip(c: &mut Criterion) {
    let ids: Vec<TileId> = (24..49)
        .flat_map(|lat| (-125..-66).map(move |lon| TileId::new(lat, lon)))
        .collect();

    c.bench_function("filename round trip (CONUS tile grid)", |b| {
        b.iter(|| {
            for &id in &ids {
                let name = id.filename(Dataset::Dem30mGlobal);
                black_box(parse_filename(&name));
            }
        });
    });
}

criterion_group!(benches, tiles_for_bounds_bench, filename_round_trip);
criterion_main!(benches);
