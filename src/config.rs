//! Device configuration
//!
//! Settings come from an optional TOML file and are then overridden by
//! command-line flags.
//!
//! # Example
//! ```
//! use tracebuf::config::{DeviceConfig, MemorySource};
//!
//! let config = DeviceConfig::from_toml_str(r#"
//!     cache_policy = "write-combine"
//!
//!     [region]
//!     start = 0x8000_0000
//!     size = 0x10_0000
//!
//!     [memory]
//!     kind = "image"
//!     path = "trace.img"
//!     base = 0x8000_0000
//! "#).unwrap();
//! assert_eq!(config.region.unwrap().size, 0x10_0000);
//! assert!(matches!(config.memory, MemorySource::Image { .. }));
//! ```

use crate::buffer::LogProducer;
use crate::descriptor::{DescriptorError, ResourceDescriptor};
use crate::mapper::{CachePolicy, PhysRange};
use crate::phys::{DevMem, MemoryImage, PhysicalMemory};
use crate::producer::{CommandProducer, StaticProducer};
use serde::{Deserialize, Serialize};
use std::io;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Errors loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where physical memory comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum MemorySource {
    /// The running system
    #[serde(rename = "devmem")]
    DevMem {
        #[serde(default = "default_device")]
        device: PathBuf,
        #[serde(default = "default_iomem")]
        iomem: PathBuf,
    },
    /// A captured memory image
    Image {
        path: PathBuf,
        #[serde(default)]
        base: u64,
        #[serde(default = "default_page_size")]
        page_size: u64,
        #[serde(default)]
        device_window: Option<PhysRange>,
    },
}

impl Default for MemorySource {
    fn default() -> Self {
        MemorySource::DevMem {
            device: default_device(),
            iomem: default_iomem(),
        }
    }
}

fn default_device() -> PathBuf {
    PathBuf::from(DevMem::DEFAULT_PATH)
}

fn default_iomem() -> PathBuf {
    PathBuf::from(DevMem::IOMEM_PATH)
}

fn default_page_size() -> u64 {
    MemoryImage::DEFAULT_PAGE_SIZE
}

/// How reset and finalize reach the firmware
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProducerConfig {
    /// Finalize reports a fixed count; the whole region when unset
    Static {
        #[serde(default)]
        entries: Option<u64>,
    },
    /// External commands
    Command {
        reset: Vec<String>,
        finalize: Vec<String>,
    },
}

impl Default for ProducerConfig {
    fn default() -> Self {
        ProducerConfig::Static { entries: None }
    }
}

/// Device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Trace region; takes precedence over `device_tree_node`
    pub region: Option<ResourceDescriptor>,

    /// Device-tree node describing the region
    pub device_tree_node: Option<PathBuf>,

    /// Parent `#address-cells` / `#size-cells` for `device_tree_node`
    pub address_cells: usize,
    pub size_cells: usize,

    pub cache_policy: CachePolicy,

    /// Name recorded with device-memory reservations
    pub label: String,

    pub memory: MemorySource,

    pub producer: ProducerConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            region: None,
            device_tree_node: None,
            address_cells: 2,
            size_cells: 2,
            cache_policy: CachePolicy::default(),
            label: "sel4_tracebuffer".to_string(),
            memory: MemorySource::default(),
            producer: ProducerConfig::default(),
        }
    }
}

impl DeviceConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Region descriptor from the explicit region or the device tree
    pub fn resolve_descriptor(&self) -> Result<Option<ResourceDescriptor>, DescriptorError> {
        if let Some(region) = self.region {
            return Ok(Some(region));
        }
        self.device_tree_node
            .as_deref()
            .map(|node| {
                ResourceDescriptor::from_device_tree(node, self.address_cells, self.size_cells)
            })
            .transpose()
    }

    /// Open the configured memory backend
    pub fn build_memory(&self) -> io::Result<Arc<dyn PhysicalMemory>> {
        let memory: Arc<dyn PhysicalMemory> = match &self.memory {
            MemorySource::DevMem { device, iomem } => Arc::new(DevMem::with_paths(device, iomem)?),
            MemorySource::Image {
                path,
                base,
                page_size,
                device_window,
            } => {
                if !page_size.is_power_of_two() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("page size {page_size} is not a power of two"),
                    ));
                }
                let mut image = MemoryImage::new(path)
                    .with_base(*base)
                    .with_page_size(*page_size);
                if let Some(window) = device_window {
                    let end = window.end().ok_or_else(|| {
                        io::Error::new(io::ErrorKind::InvalidInput, "device window wraps")
                    })?;
                    image = image.with_device_window(window.start..end);
                }
                Arc::new(image)
            }
        };
        Ok(memory)
    }

    /// Build the producer; a static producer without a count reports
    /// `capacity`
    pub fn build_producer(&self, capacity: u64) -> io::Result<Box<dyn LogProducer>> {
        let producer: Box<dyn LogProducer> = match &self.producer {
            ProducerConfig::Static { entries } => {
                Box::new(StaticProducer::new(entries.unwrap_or(capacity)))
            }
            ProducerConfig::Command { reset, finalize } => {
                if reset.is_empty() || finalize.is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "producer commands must not be empty",
                    ));
                }
                Box::new(CommandProducer::new(reset.clone(), finalize.clone()))
            }
        };
        Ok(producer)
    }
}

/// Parse an integer given in decimal or with a `0x` prefix
pub fn parse_u64(text: &str) -> Result<u64, ParseIntError> {
    let text = text.trim().replace('_', "");
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    }
}
