//! Direct bus dispatch benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use rover_bus::{Bus, DirectBus, Listener, Payload};
use std::hint::black_box;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("direct_fan_out");

    for listeners in [1usize, 4, 16] {
        let bus = DirectBus::new();
        let counter = Arc::new(AtomicU64::new(0));
        for _ in 0..listeners {
            let counter = Arc::clone(&counter);
            let listener: Listener = Arc::new(move |_: &str, _: &Payload| {
                counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            });
            bus.subscribe(&["steering".to_string()], listener).unwrap();
        }

        group.bench_with_input(
            BenchmarkId::from_parameter(listeners),
            &listeners,
            |b, _| {
                b.iter(|| bus.publish(black_box("steering"), Payload::Float(0.25)));
            },
        );
    }
    group.finish();
}

fn bench_frame_encode(c: &mut Criterion) {
    let payload = Payload::Bytes(vec![0u8; 64 * 1024]);
    c.bench_function("frame_encode_64k", |b| {
        b.iter(|| {
            rover_bus::frame::Frame::from_message(black_box("camera"), &payload)
                .map(|f| f.encode())
        });
    });
}

criterion_group!(benches, bench_fan_out, bench_frame_encode);
criterion_main!(benches);
