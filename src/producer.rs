//! Concrete trace log producers
//!
//! The firmware owns the log; these adapters are how user space reaches it.

use crate::buffer::LogProducer;
use crate::config::parse_u64;
use std::io;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

/// Producer whose finalize always reports a fixed record count
///
/// Used for captured images where the valid count is already known.
#[derive(Debug)]
pub struct StaticProducer {
    count: AtomicU64,
}

impl StaticProducer {
    pub fn new(count: u64) -> Self {
        Self {
            count: AtomicU64::new(count),
        }
    }

    /// Change the count reported by the next finalize
    pub fn set_count(&self, count: u64) {
        self.count.store(count, Ordering::Release);
    }
}

impl LogProducer for StaticProducer {
    fn reset_log(&self) -> io::Result<()> {
        tracing::debug!("static producer: reset is a no-op");
        Ok(())
    }

    fn finalize_log(&self) -> io::Result<u64> {
        Ok(self.count.load(Ordering::Acquire))
    }
}

/// Producer driven by external commands
///
/// The reset command must exit successfully. The finalize command must exit
/// successfully and print the record count (decimal or `0x` hex) on stdout.
#[derive(Debug, Clone)]
pub struct CommandProducer {
    reset: Vec<String>,
    finalize: Vec<String>,
}

impl CommandProducer {
    /// # Panics
    ///
    /// Panics if either command line is empty.
    pub fn new(reset: Vec<String>, finalize: Vec<String>) -> Self {
        assert!(!reset.is_empty(), "reset command must not be empty");
        assert!(!finalize.is_empty(), "finalize command must not be empty");
        Self { reset, finalize }
    }

    fn run(argv: &[String]) -> io::Result<String> {
        let output = Command::new(&argv[0]).args(&argv[1..]).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "`{}` failed with {}: {}",
                argv.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl LogProducer for CommandProducer {
    fn reset_log(&self) -> io::Result<()> {
        Self::run(&self.reset).map(drop)
    }

    fn finalize_log(&self) -> io::Result<u64> {
        let stdout = Self::run(&self.finalize)?;
        let text = stdout.trim();
        parse_u64(text).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("finalize command printed {text:?}, expected a record count: {e}"),
            )
        })
    }
}
