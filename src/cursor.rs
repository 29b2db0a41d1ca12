//! Restartable iteration over trace records
//!
//! A [`RecordCursor`] walks logical positions `0..len` where `len` is the
//! buffer's record count sampled once at open. Later changes to the count
//! (a reset or finalize on the control endpoint) do not change how many
//! records an open cursor yields.

use crate::buffer::TraceBuffer;
use crate::record::{TraceEntry, RECORD_SIZE};
use std::iter::FusedIterator;

/// Presentation of records on a read endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    /// One formatted line per record
    Text,
    /// Raw record bytes, concatenated
    Binary,
}

impl View {
    /// Append the rendering of one raw record to `out`
    pub fn render(self, raw: &[u8; RECORD_SIZE], out: &mut Vec<u8>) {
        match self {
            View::Text => out.extend_from_slice(TraceEntry::decode(raw).to_line().as_bytes()),
            View::Binary => out.extend_from_slice(raw),
        }
    }
}

/// Lazy forward-only cursor over a [`TraceBuffer`]
#[derive(Debug, Clone)]
pub struct RecordCursor<'a> {
    buffer: &'a TraceBuffer,
    position: u64,
    end: u64,
}

impl<'a> RecordCursor<'a> {
    /// Cursor at position 0
    pub fn open(buffer: &'a TraceBuffer) -> Self {
        Self::open_at(buffer, 0)
    }

    /// Cursor at logical `position`
    pub fn open_at(buffer: &'a TraceBuffer, position: u64) -> Self {
        let end = buffer.count().min(buffer.capacity());
        Self {
            buffer,
            position: position.min(end),
            end,
        }
    }

    /// Next logical position to be read
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Records this cursor yields in total
    pub fn len(&self) -> u64 {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Move to logical `position`, clamped to the end
    pub fn seek(&mut self, position: u64) {
        self.position = position.min(self.end);
    }

    /// Step to the next record, yielding its raw bytes
    pub fn advance_raw(&mut self) -> Option<(u64, [u8; RECORD_SIZE])> {
        if self.position >= self.end {
            return None;
        }
        match self.buffer.read_slot(self.position) {
            Ok(raw) => {
                let at = self.position;
                self.position += 1;
                Some((at, raw))
            }
            Err(e) => {
                tracing::debug!("cursor stopped at {}: {}", self.position, e);
                self.position = self.end;
                None
            }
        }
    }

    /// Step to the next record, yielding it decoded
    pub fn advance(&mut self) -> Option<(u64, TraceEntry)> {
        self.advance_raw()
            .map(|(at, raw)| (at, TraceEntry::decode(&raw)))
    }
}

impl Iterator for RecordCursor<'_> {
    type Item = (u64, TraceEntry);

    fn next(&mut self) -> Option<Self::Item> {
        self.advance()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::try_from(self.end - self.position).unwrap_or(usize::MAX);
        (0, Some(left))
    }
}

impl FusedIterator for RecordCursor<'_> {}
