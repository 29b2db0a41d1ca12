// Shared integration test helpers
//
// Builds memory images holding trace records and attaches devices to them.

#![allow(dead_code)]

use std::io::{self, Write};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracebuf::buffer::LogProducer;
use tracebuf::descriptor::ResourceDescriptor;
use tracebuf::device::{AttachError, AttachOptions, DeviceSlot, TraceDevice};
use tracebuf::phys::{MemoryImage, PhysicalMemory};
use tracebuf::producer::StaticProducer;
use tracebuf::record::{PathKind, TraceEntry, RECORD_SIZE};

/// Producer handle the test keeps while the device owns a clone
#[derive(Debug, Clone)]
pub struct SharedProducer(pub Arc<StaticProducer>);

impl SharedProducer {
    pub fn new(count: u64) -> Self {
        Self(Arc::new(StaticProducer::new(count)))
    }

    pub fn set_count(&self, count: u64) {
        self.0.set_count(count);
    }
}

impl LogProducer for SharedProducer {
    fn reset_log(&self) -> io::Result<()> {
        self.0.reset_log()
    }

    fn finalize_log(&self) -> io::Result<u64> {
        self.0.finalize_log()
    }
}

pub fn entry(kind: PathKind, start_time: u64, duration: u32, next: u64) -> TraceEntry {
    TraceEntry {
        path: kind.tag(),
        start_time,
        duration,
        next,
    }
}

/// Three distinct records
pub fn sample_entries() -> Vec<TraceEntry> {
    vec![
        entry(PathKind::Syscall, 1_000, 42, 0xffff_0000_1000),
        entry(PathKind::Interrupt, 2_000, 7, 0xffff_0000_1018),
        entry(PathKind::VMFault, 3_000, 99, 0),
    ]
}

/// Image with `entries` written from offset 0, zero-filled up to `slots`
/// records
pub fn image_with(entries: &[TraceEntry], slots: usize) -> NamedTempFile {
    let mut bytes = vec![0u8; slots.max(entries.len()) * RECORD_SIZE];
    for (i, entry) in entries.iter().enumerate() {
        bytes[i * RECORD_SIZE..(i + 1) * RECORD_SIZE].copy_from_slice(&entry.to_bytes());
    }
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();
    file
}

pub fn memory(file: &NamedTempFile) -> Arc<dyn PhysicalMemory> {
    Arc::new(MemoryImage::new(file.path()))
}

/// Attach over the first `slots` records of `file`
pub fn attach(
    slot: &DeviceSlot,
    file: &NamedTempFile,
    slots: u64,
    producer: SharedProducer,
) -> Result<TraceDevice, AttachError> {
    TraceDevice::attach(
        slot,
        Some(ResourceDescriptor::new(0, slots * RECORD_SIZE as u64)),
        memory(file),
        Box::new(producer),
        &AttachOptions::default(),
    )
}
