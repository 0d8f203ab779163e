//! Benchmarks for the per-frame conversion hot path.
//!
//! Run with: cargo bench
//!
//! The YUYV -> I420 conversion runs once per forwarded frame, so its
//! throughput bounds the stream rate at high resolutions.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use loopcast::convert::{rgb_to_i420, yuyv_to_i420, yuyv_to_rgb};

/// Generate a YUYV test frame with a gradient pattern (more realistic
/// than zeros for branch behavior in the clamps).
fn generate_test_yuyv(width: u32, height: u32) -> Vec<u8> {
    let size = (width * height * 2) as usize;
    let mut data = vec![0u8; size];

    for (i, byte) in data.iter_mut().enumerate() {
        *byte = match i % 4 {
            0 | 2 => (i / 7 % 220 + 16) as u8, // Y
            1 => (i / 13 % 200 + 28) as u8,    // U
            _ => (i / 17 % 200 + 28) as u8,    // V
        };
    }

    data
}

fn generate_test_rgb(width: u32, height: u32) -> Vec<u8> {
    let size = (width * height * 3) as usize;
    let mut data = vec![0u8; size];

    for y in 0..height {
        for x in 0..width {
            let idx = ((y * width + x) * 3) as usize;
            data[idx] = (x % 256) as u8;
            data[idx + 1] = (y % 256) as u8;
            data[idx + 2] = ((x + y) % 256) as u8;
        }
    }

    data
}

fn bench_yuyv_to_i420(c: &mut Criterion) {
    let mut group = c.benchmark_group("yuyv_to_i420");

    for (width, height) in [(640u32, 480u32), (1280, 720), (1920, 1080)] {
        let frame = generate_test_yuyv(width, height);
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{}x{}", width, height)),
            &frame,
            |b, frame| {
                b.iter(|| yuyv_to_i420(black_box(frame), width, height).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_yuyv_to_rgb(c: &mut Criterion) {
    let mut group = c.benchmark_group("yuyv_to_rgb");

    let frame = generate_test_yuyv(1280, 720);
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("1280x720", |b| {
        b.iter(|| yuyv_to_rgb(black_box(&frame), 1280, 720).unwrap());
    });

    group.finish();
}

fn bench_rgb_to_i420(c: &mut Criterion) {
    let mut group = c.benchmark_group("rgb_to_i420");

    let frame = generate_test_rgb(1280, 720);
    group.throughput(Throughput::Bytes(frame.len() as u64));
    group.bench_function("1280x720", |b| {
        b.iter(|| rgb_to_i420(black_box(&frame), 1280, 720).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_yuyv_to_i420,
    bench_yuyv_to_rgb,
    bench_rgb_to_i420
);
criterion_main!(benches);
