//! Physical memory backends
//!
//! The mapper never touches a device node directly. It asks a
//! [`PhysicalMemory`] backend for three things: the page size, whether a
//! page frame is ordinary (kernel-managed) RAM, and a file handle whose
//! offsets are physical addresses. Two backends exist:
//!
//! - [`DevMem`]: the live system through `/dev/mem`, with ordinary RAM taken
//!   from the `System RAM` ranges in `/proc/iomem`
//! - [`MemoryImage`]: a file holding a captured window of physical memory,
//!   used to replay dumps and to exercise the mapper in tests

use crate::mapper::{CachePolicy, MapError, PhysRange};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::ops::Range;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Source of physical memory for the mapper
pub trait PhysicalMemory: Send + Sync + std::fmt::Debug {
    /// Short name used in log messages
    fn name(&self) -> &str;

    /// Page granularity of the backing mappings
    fn page_size(&self) -> u64;

    /// Whether the page frame is ordinary managed memory
    fn is_managed(&self, pfn: u64) -> bool;

    /// File offset that holds the given physical address
    fn file_offset(&self, phys: u64) -> Option<u64>;

    /// Open the backing file with the requested cache attribute
    fn open(&self, policy: CachePolicy) -> io::Result<File>;

    /// Exclusive reservations of device-memory ranges
    fn reservations(&self) -> Arc<ReservationTable>;
}

/// Exclusive reservations over physical address ranges
///
/// Mirrors the kernel's resource tree for the one question the mapper asks:
/// is any byte of this range already claimed?
#[derive(Debug, Default)]
pub struct ReservationTable {
    // start -> (end, label); ranges never overlap
    ranges: Mutex<BTreeMap<u64, (u64, String)>>,
}

impl ReservationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide table shared by every `/dev/mem` backend
    pub fn system() -> Arc<ReservationTable> {
        static SYSTEM: OnceLock<Arc<ReservationTable>> = OnceLock::new();
        SYSTEM.get_or_init(|| Arc::new(ReservationTable::new())).clone()
    }

    /// Reserve `range` exclusively; fails with `Busy` on any overlap
    pub fn reserve(self: &Arc<Self>, range: PhysRange, label: &str) -> Result<Reservation, MapError> {
        let end = range.end().ok_or(MapError::InvalidRange {
            start: range.start,
            size: range.size,
        })?;

        let mut ranges = self.ranges.lock().unwrap_or_else(PoisonError::into_inner);

        // Only the closest reservation starting below `end` can overlap
        if let Some((_, (held_end, holder))) = ranges.range(..end).next_back() {
            if *held_end > range.start {
                tracing::error!(
                    "request mem region ({} {:#x}@{:#x}) failed: held by {}",
                    label,
                    range.size,
                    range.start,
                    holder
                );
                return Err(MapError::Busy {
                    start: range.start,
                    size: range.size,
                });
            }
        }

        ranges.insert(range.start, (end, label.to_string()));
        Ok(Reservation {
            table: Arc::clone(self),
            start: range.start,
        })
    }

    /// Whether any reservation covers `addr`
    pub fn is_reserved(&self, addr: u64) -> bool {
        let ranges = self.ranges.lock().unwrap_or_else(PoisonError::into_inner);
        ranges
            .range(..=addr)
            .next_back()
            .is_some_and(|(_, (end, _))| *end > addr)
    }

    pub fn len(&self) -> usize {
        self.ranges.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, start: u64) {
        self.ranges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&start);
    }
}

/// Held reservation; released on drop
#[derive(Debug)]
pub struct Reservation {
    table: Arc<ReservationTable>,
    start: u64,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.table.release(self.start);
    }
}

/// Live physical memory through `/dev/mem`
#[derive(Debug)]
pub struct DevMem {
    path: PathBuf,
    page_size: u64,
    system_ram: Vec<Range<u64>>,
    reservations: Arc<ReservationTable>,
}

impl DevMem {
    pub const DEFAULT_PATH: &'static str = "/dev/mem";
    pub const IOMEM_PATH: &'static str = "/proc/iomem";

    /// Probe the running system
    pub fn probe() -> io::Result<Self> {
        Self::with_paths(Self::DEFAULT_PATH, Self::IOMEM_PATH)
    }

    /// Use a specific memory device and iomem listing
    pub fn with_paths(device: impl AsRef<Path>, iomem: impl AsRef<Path>) -> io::Result<Self> {
        let page_size = nix::unistd::sysconf(nix::unistd::SysconfVar::PAGE_SIZE)
            .map_err(io::Error::from)?
            .ok_or_else(|| io::Error::other("page size is not available"))?;

        let listing = std::fs::read_to_string(iomem.as_ref())?;
        let system_ram = parse_iomem(&listing);
        if system_ram.is_empty() {
            tracing::warn!(
                "no System RAM ranges in {}; every address maps as device memory",
                iomem.as_ref().display()
            );
        }

        Ok(Self {
            path: device.as_ref().to_path_buf(),
            page_size: page_size as u64,
            system_ram,
            reservations: ReservationTable::system(),
        })
    }

    pub fn system_ram(&self) -> &[Range<u64>] {
        &self.system_ram
    }
}

impl PhysicalMemory for DevMem {
    fn name(&self) -> &str {
        "devmem"
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn is_managed(&self, pfn: u64) -> bool {
        let Some(addr) = pfn.checked_mul(self.page_size) else {
            return false;
        };
        self.system_ram.iter().any(|ram| ram.contains(&addr))
    }

    fn file_offset(&self, phys: u64) -> Option<u64> {
        Some(phys)
    }

    fn open(&self, policy: CachePolicy) -> io::Result<File> {
        let mut options = OpenOptions::new();
        options.read(true);
        match policy {
            CachePolicy::Cached => {}
            CachePolicy::Uncached => {
                options.custom_flags(libc::O_SYNC);
            }
            CachePolicy::WriteCombine => {
                tracing::debug!("/dev/mem has no write-combining mappings, using uncached");
                options.custom_flags(libc::O_SYNC);
            }
        }
        options.open(&self.path)
    }

    fn reservations(&self) -> Arc<ReservationTable> {
        Arc::clone(&self.reservations)
    }
}

/// Parse `System RAM` ranges out of a `/proc/iomem` listing
///
/// Listing ends are inclusive; the returned ranges are half-open.
pub fn parse_iomem(listing: &str) -> Vec<Range<u64>> {
    listing
        .lines()
        .filter_map(|line| {
            let (span, name) = line.split_once(" : ")?;
            if name.trim() != "System RAM" {
                return None;
            }
            let (start, end) = span.trim().split_once('-')?;
            let start = u64::from_str_radix(start, 16).ok()?;
            let end = u64::from_str_radix(end, 16).ok()?;
            Some(start..end.checked_add(1)?)
        })
        .collect()
}

/// Physical memory captured in a file
///
/// File offset 0 holds physical address `base`. Addresses inside the
/// optional device window are treated as device memory.
#[derive(Debug)]
pub struct MemoryImage {
    path: PathBuf,
    base: u64,
    page_size: u64,
    device_window: Option<Range<u64>>,
    reservations: Arc<ReservationTable>,
}

impl MemoryImage {
    pub const DEFAULT_PAGE_SIZE: u64 = 4096;

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            base: 0,
            page_size: Self::DEFAULT_PAGE_SIZE,
            device_window: None,
            reservations: Arc::new(ReservationTable::new()),
        }
    }

    /// Physical address held at file offset 0
    pub fn with_base(mut self, base: u64) -> Self {
        self.base = base;
        self
    }

    /// # Panics
    ///
    /// Panics if `page_size` is not a power of two.
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        assert!(page_size.is_power_of_two(), "page size must be a power of two");
        self.page_size = page_size;
        self
    }

    /// Treat `window` as device memory
    pub fn with_device_window(mut self, window: Range<u64>) -> Self {
        self.device_window = Some(window);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PhysicalMemory for MemoryImage {
    fn name(&self) -> &str {
        "image"
    }

    fn page_size(&self) -> u64 {
        self.page_size
    }

    fn is_managed(&self, pfn: u64) -> bool {
        let Some(addr) = pfn.checked_mul(self.page_size) else {
            return false;
        };
        match &self.device_window {
            Some(window) => !window.contains(&addr),
            None => true,
        }
    }

    fn file_offset(&self, phys: u64) -> Option<u64> {
        phys.checked_sub(self.base)
    }

    fn open(&self, policy: CachePolicy) -> io::Result<File> {
        tracing::trace!("memory image ignores cache policy {:?}", policy);
        File::open(&self.path)
    }

    fn reservations(&self) -> Arc<ReservationTable> {
        Arc::clone(&self.reservations)
    }
}
