use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use modsleuth_scanner::*;

fn random_data(size: usize, needle: &[u8]) -> Vec<u8> {
    use rand::prelude::*;
    let mut data: Vec<u8> = Vec::with_capacity(size);
    let mut rng = rand::thread_rng();

    data.extend((0..size - needle.len()).map(|_| rng.gen::<u8>()));
    data.extend(needle);
    data
}

fn gig(c: &mut Criterion) {
    let size = 256 * 1024 * 1024;
    let needle = b"\x48\x8d\x0d\x8f\xda\x26\x00\xeb\x0d\x48\x8b\x89\x30\x02\x00\x00\x66\x0f\x1f\x44\x00\x00";
    let data = random_data(size, needle);

    let pattern = pattern!("48 8D 0? ?? ?? ?? ?? EB ?? 48 8? 8? ?? 02 00 00 66 0F 1F 44 00 00");
    assert_eq!(scan_offsets(&data, &pattern), [size - needle.len()]);

    c.bench_function("gig scan", |b| b.iter(|| scan_offsets(&data, &pattern)));
}

fn first_byte(c: &mut Criterion) {
    let size = 64 * 1024 * 1024;
    let needle = b"\x3c\x80\x00\x2c\x38\x84\x80\x00";
    let data = random_data(size, needle);

    let mut group = c.benchmark_group("first_byte");

    // exact first byte takes the memchr path, wildcard first byte tests every offset
    let exact = pattern!("3C 80 00 2C 3? ?? 80 00");
    let wildcard = pattern!("3? 80 00 2C 3? ?? 80 00");
    for (name, pattern) in [("exact", exact), ("wildcard", wildcard)] {
        group.bench_with_input(BenchmarkId::new("scan", name), &pattern, |b, pattern| {
            b.iter(|| scan_offsets(&data, pattern))
        });
    }

    group.finish();
}

criterion_group! {
    name = bench1;
    config = Criterion::default().sample_size(30);
    targets = gig
}
criterion_group!(bench2, first_byte);

criterion_main!(bench1, bench2);
