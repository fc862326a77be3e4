use std::time::SystemTime;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use usboor::capture::parse::parse_slice;
use usboor::capture::CaptureSlice;
use usboor::window::aggregate;

fn build_slice(lines: usize) -> CaptureSlice {
    let mut text = String::with_capacity(lines * 72);

    for i in 0..lines {
        if i % 2 == 0 {
            text.push_str(&format!(
                "ffff8800d4b44c00 12978381{:02} S Bo:1:005:2 -115 {} = 55534243 08e00000\n",
                i % 100,
                64 + (i % 512),
            ));
        } else {
            text.push_str(&format!(
                "ffff8800d4b44c00 12978381{:02} C Bi:1:005:1 0 {}\n",
                i % 100,
                13 + (i % 100),
            ));
        }
    }

    CaptureSlice { bus: 1, text }
}

fn bench_parse_slice(c: &mut Criterion) {
    let slice = build_slice(1_000);

    c.bench_function("parse_slice/1k_lines", |b| {
        b.iter(|| {
            parse_slice(black_box(&slice))
                .map(|r| r.byte_length)
                .sum::<u64>()
        })
    });
}

fn bench_window_pipeline(c: &mut Criterion) {
    let slice = build_slice(1_000);

    c.bench_function("parse_and_aggregate/1k_lines", |b| {
        b.iter(|| {
            let sample = aggregate(parse_slice(black_box(&slice)), SystemTime::UNIX_EPOCH);
            black_box(sample.total_bytes)
        })
    });
}

fn bench_suite(c: &mut Criterion) {
    bench_parse_slice(c);
    bench_window_pipeline(c);
}

criterion_group!(benches, bench_suite);
criterion_main!(benches);
