//! JSON output format for trace records
//!
//! `tracebuf dump --format json` implementation

use crate::mapper::StrategyKind;
use crate::record::{TraceEntry, LAYOUT_VERSION, RECORD_SIZE};
use serde::{Deserialize, Serialize};

/// A single trace record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonTraceEntry {
    /// Logical index in the log
    pub index: u64,
    /// Entry kind name (or the unknown placeholder)
    pub kind: String,
    /// Raw path tag
    pub path: u32,
    pub start_time: u64,
    pub duration: u32,
    /// Producer-internal pointer, hex formatted
    pub next: String,
}

impl JsonTraceEntry {
    pub fn new(index: u64, entry: &TraceEntry) -> Self {
        Self {
            index,
            kind: entry.kind_name().to_string(),
            path: entry.path,
            start_time: entry.start_time,
            duration: entry.duration,
            next: format!("{:#x}", entry.next),
        }
    }
}

/// Region the records were read from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRegion {
    /// Physical start, hex formatted
    pub start: String,
    pub size: u64,
    pub capacity: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyKind>,
}

/// Complete JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonOutput {
    pub version: String,
    pub layout_version: u32,
    pub record_size: usize,
    pub region: JsonRegion,
    pub entries: Vec<JsonTraceEntry>,
}

impl JsonOutput {
    pub fn new(region: JsonRegion) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            layout_version: LAYOUT_VERSION,
            record_size: RECORD_SIZE,
            region,
            entries: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, index: u64, entry: &TraceEntry) {
        self.entries.push(JsonTraceEntry::new(index, entry));
    }

    /// Serialize to pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
