//! Kernel entry trace record layout
//!
//! Every record in the trace region is a fixed 24-byte, native-endian
//! structure written by the firmware benchmark subsystem. This crate never
//! writes records; it only copies them out and decodes them.
//!
//! # Layout (version 1)
//!
//! ```text
//! offset  width  field
//! ------  -----  ---------------------------------
//!      0    u64  start_time
//!      8    u32  duration
//!     12    u32  path (kernel entry kind tag)
//!     16    u64  next (producer-internal pointer)
//! ```
//!
//! The layout has no padding, so decoding and re-encoding a record yields
//! the same bytes the producer wrote.

use std::fmt::Write as _;

/// Size of one trace record in bytes
pub const RECORD_SIZE: usize = 24;

/// Version of the record layout this crate decodes
pub const LAYOUT_VERSION: u32 = 1;

/// Placeholder name rendered for path tags outside the known range
pub const UNKNOWN_KIND: &str = "Wrong_Entry_Type";

const START_TIME: std::ops::Range<usize> = 0..8;
const DURATION: std::ops::Range<usize> = 8..12;
const PATH: std::ops::Range<usize> = 12..16;
const NEXT: std::ops::Range<usize> = 16..24;

/// Kernel entry path recorded in a trace entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    Interrupt,
    UnknownSyscall,
    UserLevelFault,
    DebugFault,
    VMFault,
    Syscall,
    UnimplementedDevice,
    VCPUFault,
}

impl PathKind {
    /// All known kinds, indexed by their tag value
    pub const ALL: [PathKind; 8] = [
        PathKind::Interrupt,
        PathKind::UnknownSyscall,
        PathKind::UserLevelFault,
        PathKind::DebugFault,
        PathKind::VMFault,
        PathKind::Syscall,
        PathKind::UnimplementedDevice,
        PathKind::VCPUFault,
    ];

    /// Map a raw tag to a known kind
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Tag value stored in the record
    pub fn tag(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            PathKind::Interrupt => "Interrupt",
            PathKind::UnknownSyscall => "UnknownSyscall",
            PathKind::UserLevelFault => "UserLevelFault",
            PathKind::DebugFault => "DebugFault",
            PathKind::VMFault => "VMFault",
            PathKind::Syscall => "Syscall",
            PathKind::UnimplementedDevice => "UnimplementedDevice",
            PathKind::VCPUFault => "VCPUFault",
        }
    }
}

/// One decoded trace record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEntry {
    /// Raw path tag (see [`PathKind`])
    pub path: u32,
    /// Timestamp of kernel entry
    pub start_time: u64,
    /// Time spent in the kernel
    pub duration: u32,
    /// Producer-internal link, only ever displayed
    pub next: u64,
}

impl TraceEntry {
    /// Decode a record from its raw bytes
    pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut start_time = [0u8; 8];
        let mut duration = [0u8; 4];
        let mut path = [0u8; 4];
        let mut next = [0u8; 8];
        start_time.copy_from_slice(&bytes[START_TIME]);
        duration.copy_from_slice(&bytes[DURATION]);
        path.copy_from_slice(&bytes[PATH]);
        next.copy_from_slice(&bytes[NEXT]);

        Self {
            path: u32::from_ne_bytes(path),
            start_time: u64::from_ne_bytes(start_time),
            duration: u32::from_ne_bytes(duration),
            next: u64::from_ne_bytes(next),
        }
    }

    /// Encode the record in the producer's layout
    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[START_TIME].copy_from_slice(&self.start_time.to_ne_bytes());
        bytes[DURATION].copy_from_slice(&self.duration.to_ne_bytes());
        bytes[PATH].copy_from_slice(&self.path.to_ne_bytes());
        bytes[NEXT].copy_from_slice(&self.next.to_ne_bytes());
        bytes
    }

    pub fn kind(&self) -> Option<PathKind> {
        PathKind::from_tag(self.path)
    }

    /// Kind name, or [`UNKNOWN_KIND`] for tags outside the known range
    pub fn kind_name(&self) -> &'static str {
        self.kind().map_or(UNKNOWN_KIND, PathKind::name)
    }

    /// Append the human-readable line for this record to `out`
    pub fn write_line(&self, out: &mut String) {
        // Writing into a String cannot fail
        let _ = writeln!(
            out,
            "{:>25} -- {:>12} -- {:>12} -- 0x{:>10x}",
            self.kind_name(),
            self.start_time,
            self.duration,
            self.next
        );
    }

    /// Human-readable line for this record, newline terminated
    pub fn to_line(&self) -> String {
        let mut line = String::with_capacity(72);
        self.write_line(&mut line);
        line
    }
}
