//! Record cursor throughput benchmark
//!
//! Measures the cost of walking a mapped trace region: the volatile copy
//! out of the mapping, decoding, and rendering for each view.
//!
//! # Run Instructions
//!
//! ```bash
//! cargo bench --bench cursor_overhead
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::io::{Read, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracebuf::descriptor::ResourceDescriptor;
use tracebuf::device::{AttachOptions, DeviceSlot, TraceDevice};
use tracebuf::phys::{MemoryImage, PhysicalMemory};
use tracebuf::producer::StaticProducer;
use tracebuf::record::{TraceEntry, RECORD_SIZE};

/// Image holding `records` synthetic records
fn create_bench_image(records: u64) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for i in 0..records {
        let entry = TraceEntry {
            path: (i % 8) as u32,
            start_time: i * 1000,
            duration: (i % 977) as u32,
            next: 0xffff_8000_0000_0000 + i * RECORD_SIZE as u64,
        };
        file.write_all(&entry.to_bytes()).unwrap();
    }
    file.flush().unwrap();
    file
}

fn attach_bench_device(file: &NamedTempFile, records: u64) -> TraceDevice {
    let memory: Arc<dyn PhysicalMemory> = Arc::new(MemoryImage::new(file.path()));
    let device = TraceDevice::attach(
        &DeviceSlot::new(),
        Some(ResourceDescriptor::new(0, records * RECORD_SIZE as u64)),
        memory,
        Box::new(StaticProducer::new(records)),
        &AttachOptions::default(),
    )
    .unwrap();
    device.buffer().finalize().unwrap();
    device
}

/// Benchmark: single bounds-checked record read
fn bench_read_entry(c: &mut Criterion) {
    let file = create_bench_image(4096);
    let device = attach_bench_device(&file, 4096);
    let mut i = 0u64;

    c.bench_function("read_entry", |b| {
        b.iter(|| {
            black_box(device.buffer().read_entry(black_box(i % 4096)).unwrap());
            i += 1;
        });
    });
}

/// Benchmark: full session drain for each view and region size
fn bench_session_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("session_drain");

    for records in [256u64, 4096, 65536] {
        let file = create_bench_image(records);
        let device = attach_bench_device(&file, records);
        group.throughput(Throughput::Elements(records));

        group.bench_with_input(BenchmarkId::new("trace", records), &records, |b, _| {
            let mut out = Vec::with_capacity(records as usize * 80);
            b.iter(|| {
                out.clear();
                device.open_trace().unwrap().read_to_end(&mut out).unwrap();
                black_box(out.len());
            });
        });

        group.bench_with_input(BenchmarkId::new("tracedata", records), &records, |b, _| {
            let mut out = Vec::with_capacity(records as usize * RECORD_SIZE);
            b.iter(|| {
                out.clear();
                device.open_tracedata().unwrap().read_to_end(&mut out).unwrap();
                black_box(out.len());
            });
        });
    }

    group.finish();
}

/// Benchmark: text rendering alone, without the mapping
fn bench_line_rendering(c: &mut Criterion) {
    let entry = TraceEntry {
        path: 5,
        start_time: 123_456_789,
        duration: 4242,
        next: 0xffff_8000_dead_beef,
    };
    let mut line = String::with_capacity(80);

    c.bench_function("write_line", |b| {
        b.iter(|| {
            line.clear();
            black_box(&entry).write_line(&mut line);
            black_box(line.len());
        });
    });
}

criterion_group!(
    benches,
    bench_read_entry,
    bench_session_drain,
    bench_line_rendering
);
criterion_main!(benches);
