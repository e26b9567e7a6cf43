use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::time::Duration;

use alcyone::array::Array;
use alcyone::dtype::DType;
use alcyone::memory::Space;
use alcyone::ring::Ring;

fn benchmark_array_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_copy");

    for size in [4 * 1024, 64 * 1024, 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(format!("contiguous_{}", size), size, |b, &size| {
            let mut src = Array::new(Space::System, DType::U8, &[size as i64]);
            let mut dst = Array::new(Space::System, DType::U8, &[size as i64]);
            src.malloc().unwrap();
            dst.malloc().unwrap();
            src.memset(0x5A).unwrap();

            b.iter(|| {
                dst.copy_from(black_box(&src)).unwrap();
            });

            src.free().unwrap();
            dst.free().unwrap();
        });
    }

    group.finish();
}

fn benchmark_padded_copy(c: &mut Criterion) {
    let mut group = c.benchmark_group("padded_copy");

    // Row-padded 2-D layouts exercise the strided engine path.
    for rows in [64usize, 512].iter() {
        let width = 1024usize;
        group.throughput(Throughput::Bytes((rows * width) as u64));
        group.bench_with_input(format!("rows_{}", rows), rows, |b, &rows| {
            let mut src = Array::new(Space::System, DType::U8, &[rows as i64, width as i64]);
            src.data = alcyone::memory::alloc(rows * width * 2, Space::System).unwrap();
            src.strides[0] = (width * 2) as i64;
            src.strides[1] = 1;
            let mut dst = Array::new(Space::System, DType::U8, &[rows as i64, width as i64]);
            dst.malloc().unwrap();

            b.iter(|| {
                dst.copy_from(black_box(&src)).unwrap();
            });

            src.free().unwrap();
            dst.free().unwrap();
        });
    }

    group.finish();
}

fn benchmark_ring_spans(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_spans");
    group.measurement_time(Duration::from_secs(10));

    for span in [4096usize, 65536].iter() {
        group.throughput(Throughput::Bytes(*span as u64));
        group.bench_with_input(format!("span_{}", span), span, |b, &span| {
            let ring = Ring::new(Space::System, "bench");
            ring.resize(span, Some(span * 8), 1).unwrap();
            let mut writer = ring.begin_writing().unwrap();
            let mut seq = writer.begin_sequence("bench", 0, b"", 1).unwrap();

            b.iter(|| {
                let mut wspan = seq.reserve(span, false).unwrap();
                wspan.data()[0] = 1;
                wspan.commit(span).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_array_copy,
    benchmark_padded_copy,
    benchmark_ring_spans
);
criterion_main!(benches);
