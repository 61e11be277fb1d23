//! Field access and locked update throughput

use criterion::{Criterion, criterion_group, criterion_main};
use shmlink::{
    BackendKind, ChannelConfig, FieldType, Layout, PointerUpdate, SharedStructChannel,
};
use std::hint::black_box;
use tempfile::TempDir;

fn bench_key(offset: i32) -> i32 {
    0x7000_0000 | ((std::process::id() as i32 & 0x000f_ffff) << 8) | offset
}

fn channels(dir: &TempDir, offset: i32, layout: Layout) -> Vec<(&'static str, SharedStructChannel)> {
    let sysv = ChannelConfig::new(bench_key(offset));
    let file = ChannelConfig::new(bench_key(offset))
        .with_backend(BackendKind::File)
        .with_shm_dir(dir.path());
    vec![
        (
            "sysv",
            SharedStructChannel::open_or_create_with(sysv, layout.clone()).unwrap(),
        ),
        (
            "file",
            SharedStructChannel::open_or_create_with(file, layout).unwrap(),
        ),
    ]
}

fn teardown(channels: Vec<(&'static str, SharedStructChannel)>) {
    for (_, mut channel) in channels {
        channel.destroy().unwrap();
    }
}

/// Lock-free single field access
fn bench_field_access(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let all = channels(&dir, 1, Layout::pointer());

    for (name, channel) in &all {
        c.bench_function(&format!("{name}_write_field"), |b| {
            let mut v = 0i64;
            b.iter(|| {
                v = (v + 1) & 0xffff;
                channel.write_field(black_box("x"), black_box(v)).unwrap();
            });
        });

        c.bench_function(&format!("{name}_read_field"), |b| {
            b.iter(|| black_box(channel.read_field(black_box("x")).unwrap()));
        });
    }
    teardown(all);
}

/// Unaligned fields take the byte-copy path
fn bench_unaligned_field(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let layout = Layout::builder()
        .field("buttons", FieldType::U8)
        .field("x", FieldType::I32)
        .build()
        .unwrap();
    let all = channels(&dir, 2, layout);

    for (name, channel) in &all {
        c.bench_function(&format!("{name}_write_unaligned_field"), |b| {
            b.iter(|| channel.write_field(black_box("x"), black_box(-55)).unwrap());
        });
    }
    teardown(all);
}

/// Locked multi-field updates and guarded reads
fn bench_locked_updates(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let all = channels(&dir, 3, Layout::pointer());

    for (name, channel) in &all {
        c.bench_function(&format!("{name}_write_atomic_update"), |b| {
            b.iter(|| {
                channel
                    .write_atomic_update(black_box(&[("x", 55), ("y", 0), ("changed", 1)]))
                    .unwrap();
            });
        });

        c.bench_function(&format!("{name}_write_record"), |b| {
            let update = PointerUpdate::along_y(55);
            b.iter(|| channel.write_record(black_box(&update)).unwrap());
        });

        c.bench_function(&format!("{name}_take_update"), |b| {
            b.iter(|| {
                channel.write_field("changed", 1).unwrap();
                black_box(channel.take_update("changed").unwrap());
            });
        });
    }
    teardown(all);
}

criterion_group!(
    benches,
    bench_field_access,
    bench_unaligned_field,
    bench_locked_updates
);
criterion_main!(benches);
