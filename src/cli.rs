//! CLI argument parsing for tracebuf

use crate::config::{parse_u64, ConfigError, DeviceConfig, MemorySource, ProducerConfig};
use crate::descriptor::ResourceDescriptor;
use crate::mapper::CachePolicy;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for dumped records
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text lines (default)
    Text,
    /// Raw record bytes, as on the tracedata endpoint
    Raw,
    /// One hex-encoded record per line
    Hex,
    /// JSON format for machine parsing
    Json,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum TraceCommand {
    /// Stop tracing and print the recorded entries
    Dump {
        /// Output format
        #[arg(long = "format", value_enum, default_value = "text")]
        format: OutputFormat,

        /// Write to a file instead of stdout
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Reset the log and start tracing
    Start,
    /// Stop tracing and print the number of recorded entries
    Stop,
    /// Show the trace region and switch state
    Status,
    /// List the endpoints an attached instance exposes
    Endpoints,
}

#[derive(Parser, Debug)]
#[command(name = "tracebuf")]
#[command(version)]
#[command(about = "Read the seL4 kernel entry trace buffer from physical memory", long_about = None)]
pub struct Cli {
    /// TOML configuration file (flags override its values)
    #[arg(short = 'C', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Physical start address of the trace region (e.g. 0x80000000)
    #[arg(long = "phys", value_name = "ADDR", value_parser = parse_number, requires = "size")]
    pub phys: Option<u64>,

    /// Size of the trace region in bytes
    #[arg(long = "size", value_name = "BYTES", value_parser = parse_number, requires = "phys")]
    pub size: Option<u64>,

    /// Device-tree node describing the trace region
    #[arg(long = "dt-node", value_name = "DIR")]
    pub dt_node: Option<PathBuf>,

    /// Read physical memory from a captured image instead of /dev/mem
    #[arg(long = "image", value_name = "FILE")]
    pub image: Option<PathBuf>,

    /// Physical address stored at offset 0 of the image
    #[arg(long = "image-base", value_name = "ADDR", value_parser = parse_number, requires = "image")]
    pub image_base: Option<u64>,

    /// Cache attribute for the mapping
    #[arg(long = "cache", value_enum)]
    pub cache: Option<CachePolicy>,

    /// Record count reported when tracing stops
    #[arg(long = "entries", value_name = "N", value_parser = parse_number)]
    pub entries: Option<u64>,

    /// Command that resets the firmware log
    #[arg(long = "reset-cmd", value_name = "CMD", requires = "finalize_cmd")]
    pub reset_cmd: Option<String>,

    /// Command that stops the firmware log and prints its record count
    #[arg(long = "finalize-cmd", value_name = "CMD", requires = "reset_cmd")]
    pub finalize_cmd: Option<String>,

    /// Enable debug logging to stderr
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: TraceCommand,
}

fn parse_number(text: &str) -> Result<u64, String> {
    parse_u64(text).map_err(|e| format!("{text:?}: {e}"))
}

fn split_command(line: &str) -> Vec<String> {
    line.split_whitespace().map(str::to_string).collect()
}

impl Cli {
    /// Configuration file contents with flag overrides applied
    pub fn device_config(&self) -> Result<DeviceConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => DeviceConfig::from_file(path)?,
            None => DeviceConfig::default(),
        };

        if let (Some(start), Some(size)) = (self.phys, self.size) {
            config.region = Some(ResourceDescriptor::new(start, size));
        }
        if let Some(node) = &self.dt_node {
            config.device_tree_node = Some(node.clone());
        }
        if let Some(path) = &self.image {
            config.memory = MemorySource::Image {
                path: path.clone(),
                base: self.image_base.unwrap_or(0),
                page_size: crate::phys::MemoryImage::DEFAULT_PAGE_SIZE,
                device_window: None,
            };
        }
        if let Some(policy) = self.cache {
            config.cache_policy = policy;
        }
        if let Some(entries) = self.entries {
            config.producer = ProducerConfig::Static {
                entries: Some(entries),
            };
        }
        if let (Some(reset), Some(finalize)) = (&self.reset_cmd, &self.finalize_cmd) {
            config.producer = ProducerConfig::Command {
                reset: split_command(reset),
                finalize: split_command(finalize),
            };
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_region_and_command() {
        let cli = Cli::parse_from(["tracebuf", "--phys", "0x80000000", "--size", "4096", "status"]);
        assert_eq!(cli.phys, Some(0x8000_0000));
        assert_eq!(cli.size, Some(4096));
        assert_eq!(cli.command, TraceCommand::Status);
    }

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["tracebuf"]).is_err());
    }

    #[test]
    fn test_cli_phys_requires_size() {
        assert!(Cli::try_parse_from(["tracebuf", "--phys", "0x1000", "status"]).is_err());
    }

    #[test]
    fn test_cli_rejects_bad_number() {
        assert!(Cli::try_parse_from(["tracebuf", "--entries", "many", "stop"]).is_err());
    }

    #[test]
    fn test_cli_dump_defaults_to_text() {
        let cli = Cli::parse_from(["tracebuf", "dump"]);
        assert_eq!(
            cli.command,
            TraceCommand::Dump {
                format: OutputFormat::Text,
                output: None
            }
        );
    }

    #[test]
    fn test_cli_dump_json_to_file() {
        let cli = Cli::parse_from(["tracebuf", "dump", "--format", "json", "-o", "out.json"]);
        assert_eq!(
            cli.command,
            TraceCommand::Dump {
                format: OutputFormat::Json,
                output: Some(PathBuf::from("out.json"))
            }
        );
    }

    #[test]
    fn test_cli_debug_default_false() {
        let cli = Cli::parse_from(["tracebuf", "status"]);
        assert!(!cli.debug);
    }

    #[test]
    fn test_device_config_overrides() {
        let cli = Cli::parse_from([
            "tracebuf",
            "--phys",
            "0x1000",
            "--size",
            "72",
            "--image",
            "trace.img",
            "--image-base",
            "0x1000",
            "--cache",
            "write-combine",
            "--entries",
            "2",
            "dump",
        ]);
        let config = cli.device_config().unwrap();
        assert_eq!(config.region, Some(ResourceDescriptor::new(0x1000, 72)));
        assert_eq!(config.cache_policy, CachePolicy::WriteCombine);
        assert_eq!(config.producer, ProducerConfig::Static { entries: Some(2) });
        assert!(matches!(
            config.memory,
            MemorySource::Image { base: 0x1000, .. }
        ));
    }

    #[test]
    fn test_device_config_command_producer() {
        let cli = Cli::parse_from([
            "tracebuf",
            "--reset-cmd",
            "tracectl reset",
            "--finalize-cmd",
            "tracectl finalize --count",
            "start",
        ]);
        let config = cli.device_config().unwrap();
        assert_eq!(
            config.producer,
            ProducerConfig::Command {
                reset: vec!["tracectl".to_string(), "reset".to_string()],
                finalize: vec![
                    "tracectl".to_string(),
                    "finalize".to_string(),
                    "--count".to_string()
                ],
            }
        );
    }

    #[test]
    fn test_reset_cmd_requires_finalize_cmd() {
        assert!(Cli::try_parse_from(["tracebuf", "--reset-cmd", "x", "start"]).is_err());
    }
}
