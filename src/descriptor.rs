//! Hardware descriptor of the trace region
//!
//! The region is described by a memory resource `(start, size)`. It can be
//! given directly or read from a device-tree node exported under
//! `/proc/device-tree` (or `/sys/firmware/devicetree/base`).

use crate::mapper::PhysRange;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

/// `compatible` strings that identify a trace buffer node
pub const COMPATIBLE: [&str; 2] = ["sel4_tracebuffer", "memory,sel4_tracebuffer"];

/// Memory resource describing the trace region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub start: u64,
    pub size: u64,
}

/// Errors resolving a descriptor
#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("failed to read device-tree property {property}: {source}")]
    Io {
        property: String,
        #[source]
        source: io::Error,
    },

    #[error("node is not compatible with {:?}", COMPATIBLE)]
    Incompatible,

    #[error("malformed reg property: {0}")]
    MalformedReg(String),
}

impl ResourceDescriptor {
    pub fn new(start: u64, size: u64) -> Self {
        Self { start, size }
    }

    pub fn range(&self) -> PhysRange {
        PhysRange::new(self.start, self.size)
    }

    /// Read the first memory resource of a device-tree node
    ///
    /// `address_cells` and `size_cells` are the parent's `#address-cells`
    /// and `#size-cells` (2 and 2 on 64-bit platforms).
    pub fn from_device_tree(
        node: &Path,
        address_cells: usize,
        size_cells: usize,
    ) -> Result<Self, DescriptorError> {
        let read = |property: &str| {
            std::fs::read(node.join(property)).map_err(|source| DescriptorError::Io {
                property: property.to_string(),
                source,
            })
        };

        let compatible = read("compatible")?;
        let matches = compatible
            .split(|b| *b == 0)
            .filter_map(|s| std::str::from_utf8(s).ok())
            .any(|s| COMPATIBLE.contains(&s));
        if !matches {
            return Err(DescriptorError::Incompatible);
        }

        Self::from_reg(&read("reg")?, address_cells, size_cells)
    }

    /// Decode the first `(address, size)` pair of a big-endian `reg` value
    pub fn from_reg(
        reg: &[u8],
        address_cells: usize,
        size_cells: usize,
    ) -> Result<Self, DescriptorError> {
        if !(1..=2).contains(&address_cells) || !(1..=2).contains(&size_cells) {
            return Err(DescriptorError::MalformedReg(format!(
                "unsupported cell counts {address_cells}/{size_cells}"
            )));
        }
        let needed = (address_cells + size_cells) * 4;
        if reg.len() < needed {
            return Err(DescriptorError::MalformedReg(format!(
                "{} bytes, need at least {}",
                reg.len(),
                needed
            )));
        }

        let start = read_cells(&reg[..address_cells * 4]);
        let size = read_cells(&reg[address_cells * 4..needed]);
        if size == 0 {
            return Err(DescriptorError::MalformedReg("zero-sized region".to_string()));
        }
        Ok(Self { start, size })
    }
}

fn read_cells(bytes: &[u8]) -> u64 {
    bytes
        .chunks_exact(4)
        .fold(0u64, |acc, cell| {
            let mut word = [0u8; 4];
            word.copy_from_slice(cell);
            (acc << 32) | u64::from(u32::from_be_bytes(word))
        })
}
