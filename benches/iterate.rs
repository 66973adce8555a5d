use criterion::*;
use std::hint::black_box;

mod common;
use common::*;

fn iterate_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("iterate");

    group.bench_function("integrate_position_100k", |b| {
        b.iter_batched(
            || {
                let mut fixture = make_world();
                populate(&mut fixture, ENTITIES_MED);
                let query = fixture.world.query_expr("[out] Position, [in] Velocity").unwrap();
                (fixture, query)
            },
            |(fixture, query)| {
                for batch in fixture.world.iter(query) {
                    let positions = batch.column_mut::<Position>(0).unwrap();
                    let velocities = batch.column::<Velocity>(1).unwrap();
                    for (position, velocity) in positions.iter_mut().zip(velocities) {
                        position.x += velocity.x;
                        position.y += velocity.y;
                    }
                }
                black_box(fixture);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("read_sum_100k", |b| {
        b.iter_batched(
            || {
                let mut fixture = make_world();
                populate(&mut fixture, ENTITIES_MED);
                let query = fixture.world.query_expr("[in] Position").unwrap();
                (fixture, query)
            },
            |(fixture, query)| {
                let mut total = 0.0f32;
                for batch in fixture.world.iter_readonly(query) {
                    for position in batch.column::<Position>(0).unwrap() {
                        total += position.x;
                    }
                }
                black_box(total);
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("par_read_sum_100k", |b| {
        b.iter_batched(
            || {
                let mut fixture = make_world();
                populate(&mut fixture, ENTITIES_MED);
                let query = fixture.world.query_expr("[in] Position").unwrap();
                fixture.world.begin_readonly().unwrap();
                (fixture, query)
            },
            |(fixture, query)| {
                fixture
                    .world
                    .par_batches(query, |batch| {
                        let mut total = 0.0f32;
                        for position in batch.column::<Position>(0).unwrap() {
                            total += position.x;
                        }
                        black_box(total);
                    })
                    .unwrap();
                black_box(fixture);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, iterate_benchmark);
criterion_main!(benches);
