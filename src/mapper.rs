//! Mapping of the physical trace region into the process
//!
//! Two strategies share one contract:
//!
//! - [`PageListMapper`] for ordinary RAM: builds the list of page frames
//!   covering the range, maps them as one page-aligned span, and hands back
//!   the base adjusted by the sub-page offset so callers see a byte-exact
//!   address for the requested physical start.
//! - [`DeviceMapper`] for device or reserved memory: claims the range
//!   exclusively in the backend's reservation table, then maps at byte
//!   granularity.
//!
//! [`select_strategy`] picks one from the first page frame of the range.
//! Unmapping is dropping the [`Mapping`], which unmaps before releasing any
//! reservation.

use crate::phys::{PhysicalMemory, Reservation};
use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Memory-access attribute applied to the mapping
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum CachePolicy {
    /// Normal cacheable memory
    Cached,
    /// Uncached (default; the producer writes behind the CPU caches)
    #[default]
    Uncached,
    /// Write-combining
    WriteCombine,
}

/// A physical address range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysRange {
    pub start: u64,
    pub size: u64,
}

impl PhysRange {
    pub fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    /// Exclusive end, or `None` if the range wraps the address space
    pub fn end(&self) -> Option<u64> {
        self.start.checked_add(self.size)
    }
}

/// Errors from mapping a physical range
#[derive(Error, Debug)]
pub enum MapError {
    #[error("invalid range: {size:#x} bytes at {start:#x}")]
    InvalidRange { start: u64, size: u64 },

    #[error("failed to allocate page list for {pages} pages")]
    AllocationFailed { pages: usize },

    #[error("physical range {size:#x}@{start:#x} is already reserved")]
    Busy { start: u64, size: u64 },

    #[error("failed to map {size:#x} bytes at {start:#x}: {source}")]
    MapFailed {
        start: u64,
        size: u64,
        #[source]
        source: io::Error,
    },
}

impl MapError {
    fn invalid(range: PhysRange) -> Self {
        MapError::InvalidRange {
            start: range.start,
            size: range.size,
        }
    }

    fn failed(range: PhysRange, source: io::Error) -> Self {
        MapError::MapFailed {
            start: range.start,
            size: range.size,
            source,
        }
    }
}

/// Which strategy produced a mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    PageList,
    Device,
}

/// A live read-only mapping of a physical range
#[derive(Debug)]
pub struct Mapping {
    // Field order matters: the map is released before the reservation
    map: Mmap,
    offset: usize,
    len: usize,
    kind: StrategyKind,
    reservation: Option<Reservation>,
}

impl Mapping {
    /// Address of the first requested byte in this process
    pub fn virtual_base(&self) -> usize {
        self.map.as_ptr() as usize + self.offset
    }

    /// Bytes covered, as requested (not rounded to pages)
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn is_reserved(&self) -> bool {
        self.reservation.is_some()
    }

    /// Copy `N` bytes starting `at` bytes past the base
    ///
    /// The producer may write the region at any time, so bytes are copied
    /// with a volatile read and never borrowed.
    pub fn read_bytes<const N: usize>(&self, at: usize) -> Option<[u8; N]> {
        let end = at.checked_add(N)?;
        if end > self.len {
            return None;
        }
        // SAFETY: `offset + at .. offset + end` lies inside the mapped span
        // (checked above against `len`, and `offset + len` never exceeds the
        // mapping), and `[u8; N]` has alignment 1.
        let bytes = unsafe {
            let src = self.map.as_ptr().add(self.offset + at).cast::<[u8; N]>();
            std::ptr::read_volatile(src)
        };
        Some(bytes)
    }

    /// Release the mapping and any reservation
    pub fn unmap(self) {
        tracing::debug!(
            "unmapping {:#x} bytes at {:#x} ({:?})",
            self.len,
            self.virtual_base(),
            self.kind
        );
    }
}

/// One way of mapping physical memory
pub trait MapStrategy: std::fmt::Debug + Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Map `range` with the given cache attribute
    fn map(&self, range: PhysRange, policy: CachePolicy) -> Result<Mapping, MapError>;

    /// Release a mapping made by this strategy
    fn unmap(&self, mapping: Mapping) {
        mapping.unmap();
    }
}

/// Page-list mapping for ordinary memory
#[derive(Debug)]
pub struct PageListMapper {
    memory: Arc<dyn PhysicalMemory>,
}

impl PageListMapper {
    pub fn new(memory: Arc<dyn PhysicalMemory>) -> Self {
        Self { memory }
    }
}

impl MapStrategy for PageListMapper {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PageList
    }

    fn map(&self, range: PhysRange, policy: CachePolicy) -> Result<Mapping, MapError> {
        validate(range)?;
        let page_size = self.memory.page_size();
        let offset_in_page = range.start % page_size;
        let page_start = range.start - offset_in_page;

        let span = range
            .size
            .checked_add(offset_in_page)
            .ok_or_else(|| MapError::invalid(range))?;
        let page_count =
            usize::try_from(span.div_ceil(page_size)).map_err(|_| MapError::invalid(range))?;

        let mut frames: Vec<u64> = Vec::new();
        frames
            .try_reserve_exact(page_count)
            .map_err(|_| MapError::AllocationFailed { pages: page_count })?;

        let first_pfn = page_start / page_size;
        for pfn in first_pfn..first_pfn + page_count as u64 {
            if !self.memory.is_managed(pfn) {
                return Err(MapError::failed(
                    range,
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("page frame {pfn:#x} is not ordinary memory"),
                    ),
                ));
            }
            frames.push(pfn);
        }

        // The frames are physically contiguous, so one span maps them all
        let file_offset = self
            .memory
            .file_offset(frames[0] * page_size)
            .ok_or_else(|| MapError::invalid(range))?;
        let map_len = page_count
            .checked_mul(page_size as usize)
            .ok_or_else(|| MapError::invalid(range))?;

        let file = self
            .memory
            .open(policy)
            .map_err(|e| MapError::failed(range, e))?;
        let first_byte = file_offset.saturating_add(offset_in_page);
        check_backing(&file, first_byte, range, self.memory.name())?;
        // SAFETY: the mapping is read-only and only ever read through
        // volatile copies; concurrent writes by the producer are expected.
        let map = unsafe { MmapOptions::new().offset(file_offset).len(map_len).map(&file) }
            .map_err(|e| MapError::failed(range, e))?;

        tracing::debug!(
            "mapped {} pages at {:#x} by page list ({:?}), sub-page offset {:#x}",
            page_count,
            page_start,
            policy,
            offset_in_page
        );

        Ok(Mapping {
            map,
            offset: offset_in_page as usize,
            len: range.size as usize,
            kind: StrategyKind::PageList,
            reservation: None,
        })
    }
}

/// Byte-granular mapping for device or reserved memory
#[derive(Debug)]
pub struct DeviceMapper {
    memory: Arc<dyn PhysicalMemory>,
    label: String,
}

impl DeviceMapper {
    pub fn new(memory: Arc<dyn PhysicalMemory>, label: impl Into<String>) -> Self {
        Self {
            memory,
            label: label.into(),
        }
    }
}

impl MapStrategy for DeviceMapper {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Device
    }

    fn map(&self, range: PhysRange, policy: CachePolicy) -> Result<Mapping, MapError> {
        validate(range)?;
        let len = usize::try_from(range.size).map_err(|_| MapError::invalid(range))?;
        let file_offset = self
            .memory
            .file_offset(range.start)
            .ok_or_else(|| MapError::invalid(range))?;

        let reservation = self.memory.reservations().reserve(range, &self.label)?;

        let file = self
            .memory
            .open(policy)
            .map_err(|e| MapError::failed(range, e))?;
        check_backing(&file, file_offset, range, self.memory.name())?;
        // SAFETY: see PageListMapper::map. The mmap layer aligns the offset
        // itself and returns a pointer to the exact requested byte.
        let map = unsafe { MmapOptions::new().offset(file_offset).len(len).map(&file) }
            .map_err(|e| MapError::failed(range, e))?;

        tracing::debug!(
            "mapped {:#x} bytes at {:#x} as device memory ({:?})",
            range.size,
            range.start,
            policy
        );

        Ok(Mapping {
            map,
            offset: 0,
            len,
            kind: StrategyKind::Device,
            reservation: Some(reservation),
        })
    }
}

fn validate(range: PhysRange) -> Result<(), MapError> {
    if range.size == 0 || range.end().is_none() || usize::try_from(range.size).is_err() {
        return Err(MapError::invalid(range));
    }
    Ok(())
}

/// Refuse a regular backing file that ends before the requested bytes
///
/// Touching a mapped page past end of file raises SIGBUS, so the check has
/// to happen before mapping. Bytes past the end but inside the last mapped
/// page read as zero and are fine. Character devices such as `/dev/mem`
/// report no length and are not checked.
fn check_backing(
    file: &File,
    offset: u64,
    range: PhysRange,
    backend: &str,
) -> Result<(), MapError> {
    let meta = file.metadata().map_err(|e| MapError::failed(range, e))?;
    if !meta.file_type().is_file() {
        return Ok(());
    }
    let end = offset
        .checked_add(range.size)
        .ok_or_else(|| MapError::invalid(range))?;
    if end > meta.len() {
        return Err(MapError::failed(
            range,
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range ends at offset {end:#x} but {backend} holds only {:#x} bytes",
                    meta.len()
                ),
            ),
        ));
    }
    Ok(())
}

/// Choose the strategy for `range` from its first page frame
pub fn select_strategy(
    memory: Arc<dyn PhysicalMemory>,
    range: PhysRange,
    label: &str,
) -> Box<dyn MapStrategy> {
    let pfn = range.start / memory.page_size();
    if memory.is_managed(pfn) {
        Box::new(PageListMapper::new(memory))
    } else {
        tracing::warn!(
            "mapping trace buffer {:#x}@{:#x} from {} as device memory; is that intended?",
            range.size,
            range.start,
            memory.name()
        );
        Box::new(DeviceMapper::new(memory, label))
    }
}

/// Validate, select a strategy, and map
pub fn map(
    memory: Arc<dyn PhysicalMemory>,
    range: PhysRange,
    policy: CachePolicy,
    label: &str,
) -> Result<Mapping, MapError> {
    validate(range)?;
    let strategy = select_strategy(memory, range, label);
    strategy.map(range, policy).inspect_err(|e| {
        tracing::error!(
            "failed to map {:#x} bytes at {:#x}: {}",
            range.size,
            range.start,
            e
        );
    })
}
