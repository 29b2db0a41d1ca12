//! Trace region and buffer state
//!
//! [`TraceRegion`] owns the mapping of the physical trace area.
//! [`TraceBuffer`] adds the record count and enabled flag and drives the
//! external producer through its reset and finalize calls.
//!
//! The count is only authoritative while tracing is disabled. Readers that
//! run while tracing is enabled see the count from the last finalize.

use crate::mapper::{CachePolicy, MapError, MapStrategy, Mapping, PhysRange, StrategyKind};
use crate::record::{TraceEntry, RECORD_SIZE};
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// The producer that owns the log contents
pub trait LogProducer: Send + Sync {
    /// Discard the log and start recording from scratch
    fn reset_log(&self) -> io::Result<()>;

    /// Stop recording and report how many records are valid
    fn finalize_log(&self) -> io::Result<u64>;
}

/// Errors from reading a record
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    #[error("record {index} is out of range ({count} valid)")]
    OutOfRange { index: u64, count: u64 },

    #[error("trace region is not mapped")]
    Unmapped,
}

/// The mapped physical trace area
#[derive(Debug)]
pub struct TraceRegion {
    range: PhysRange,
    mapping: Option<Mapping>,
}

impl TraceRegion {
    /// Map `range` with `strategy`; the region is mapped for its whole life
    /// until [`TraceRegion::unmap`]
    pub fn map(
        range: PhysRange,
        strategy: &dyn MapStrategy,
        policy: CachePolicy,
    ) -> Result<Self, MapError> {
        let mapping = strategy.map(range, policy)?;
        Ok(Self {
            range,
            mapping: Some(mapping),
        })
    }

    pub fn range(&self) -> PhysRange {
        self.range
    }

    pub fn virtual_base(&self) -> Option<usize> {
        self.mapping.as_ref().map(Mapping::virtual_base)
    }

    pub fn strategy(&self) -> Option<StrategyKind> {
        self.mapping.as_ref().map(Mapping::kind)
    }

    /// Number of whole records that fit in the region
    pub fn capacity(&self) -> u64 {
        self.range.size / RECORD_SIZE as u64
    }

    /// Release the mapping; later reads fail with `Unmapped`
    pub fn unmap(&mut self) {
        if let Some(mapping) = self.mapping.take() {
            mapping.unmap();
        }
    }

    fn read_slot(&self, index: u64) -> Result<[u8; RECORD_SIZE], ReadError> {
        let mapping = self.mapping.as_ref().ok_or(ReadError::Unmapped)?;
        let out_of_range = ReadError::OutOfRange {
            index,
            count: self.capacity(),
        };
        if index >= self.capacity() {
            return Err(out_of_range);
        }
        let at = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(RECORD_SIZE))
            .ok_or(out_of_range)?;
        mapping.read_bytes(at).ok_or(out_of_range)
    }
}

/// Record count and enabled flag; only ever changed together
#[derive(Debug, Clone, Copy, Default)]
struct LogState {
    entries: u64,
    enabled: bool,
}

/// Record count, enabled flag, and access to the mapped records
///
/// Reset and finalize hold the state lock across the producer call, so
/// concurrent transitions are serialized and never leave a mixed state.
pub struct TraceBuffer {
    region: TraceRegion,
    producer: Box<dyn LogProducer>,
    state: Mutex<LogState>,
}

impl std::fmt::Debug for TraceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = *self.state();
        f.debug_struct("TraceBuffer")
            .field("region", &self.region)
            .field("entries", &state.entries)
            .field("enabled", &state.enabled)
            .finish_non_exhaustive()
    }
}

impl TraceBuffer {
    /// New buffer, disabled with no valid records
    pub fn new(region: TraceRegion, producer: Box<dyn LogProducer>) -> Self {
        Self {
            region,
            producer,
            state: Mutex::new(LogState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn region(&self) -> &TraceRegion {
        &self.region
    }

    /// Valid record count from the last finalize
    pub fn count(&self) -> u64 {
        self.state().entries
    }

    pub fn capacity(&self) -> u64 {
        self.region.capacity()
    }

    pub fn is_enabled(&self) -> bool {
        self.state().enabled
    }

    /// Count and enabled flag read in one step
    pub fn snapshot(&self) -> (u64, bool) {
        let state = *self.state();
        (state.entries, state.enabled)
    }

    /// Copy out and decode record `index`
    pub fn read_entry(&self, index: u64) -> Result<TraceEntry, ReadError> {
        self.read_raw(index).map(|raw| TraceEntry::decode(&raw))
    }

    /// Copy out the raw bytes of record `index`
    pub fn read_raw(&self, index: u64) -> Result<[u8; RECORD_SIZE], ReadError> {
        if self.region.virtual_base().is_none() {
            return Err(ReadError::Unmapped);
        }
        let count = self.count();
        if index >= count {
            return Err(ReadError::OutOfRange { index, count });
        }
        self.region.read_slot(index)
    }

    /// Read a slot bounded only by the region, for cursors that fixed
    /// their length at open
    pub(crate) fn read_slot(&self, index: u64) -> Result<[u8; RECORD_SIZE], ReadError> {
        self.region.read_slot(index)
    }

    /// Clear the log and enable tracing
    pub fn reset(&self) -> io::Result<()> {
        let mut state = self.state();
        self.producer.reset_log()?;
        *state = LogState {
            entries: 0,
            enabled: true,
        };
        Ok(())
    }

    /// Disable tracing and take the valid record count from the producer
    pub fn finalize(&self) -> io::Result<u64> {
        let mut state = self.state();
        if !state.enabled {
            tracing::debug!("finalizing trace log while already disabled, re-querying count");
        }
        let entries = self.producer.finalize_log()?;
        if entries > self.capacity() {
            tracing::warn!(
                "producer reports {} records but the region holds {}; reads stop at {}",
                entries,
                self.capacity(),
                self.capacity()
            );
        }
        *state = LogState {
            entries,
            enabled: false,
        };
        Ok(entries)
    }

    pub(crate) fn unmap(&mut self) {
        self.region.unmap();
    }
}
