use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use tuplespace::*;

fn bench_exec_put_read_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("exec");
    group.bench_function("put_read_get", |b| {
        b.iter_batched(
            Space::new,
            |space| {
                for i in 0..1000u32 {
                    let key = format!("k{}", i);
                    let _ = space.exec(Request::Put {
                        key: key.clone(),
                        value: format!("v{}", i),
                    });
                    let _ = space.exec(Request::Read { key: key.clone() });
                    let _ = space.exec(Request::Get { key });
                }
                black_box(space)
            },
            BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_exec_put_read_get);
criterion_main!(benches);
