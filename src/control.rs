//! Trace on/off switch
//!
//! The switch has two states, Disabled (initial) and Enabled, held in the
//! buffer's enabled flag. A write carries one command token:
//!
//! | token                     | effect                         |
//! |---------------------------|--------------------------------|
//! | `start`, `enable`, `1`    | reset the log, enter Enabled   |
//! | `stop`, `disable`, `0`    | finalize the log, enter Disabled |
//! | anything else             | logged, no state change        |
//!
//! Reading the switch yields `"1\n"` or `"0\n"`.

use crate::buffer::TraceBuffer;
use std::io;
use thiserror::Error;

/// Longest accepted command token in bytes
pub const MAX_COMMAND_LEN: usize = 10;

/// Commands listed when an unsupported one is written
pub const SUPPORTED_COMMANDS: &str = "start, stop, enable, disable, 0, 1";

/// Errors from a control write
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("trace producer failed: {0}")]
    Producer(#[from] io::Error),
}

impl From<CommandError> for io::Error {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::InvalidCommand(_) => io::Error::new(io::ErrorKind::InvalidInput, err),
            CommandError::Producer(source) => source,
        }
    }
}

/// A parsed control command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Well-formed token that names no command
    Unsupported(String),
}

impl Command {
    /// Parse the first whitespace-delimited token of `input`
    pub fn parse(input: &[u8]) -> Result<Self, CommandError> {
        let token = input
            .split(|b| b.is_ascii_whitespace())
            .find(|t| !t.is_empty())
            .ok_or_else(|| CommandError::InvalidCommand("no command given".to_string()))?;

        if token.len() > MAX_COMMAND_LEN {
            return Err(CommandError::InvalidCommand(format!(
                "command longer than {MAX_COMMAND_LEN} bytes"
            )));
        }

        let token = std::str::from_utf8(token)
            .map_err(|_| CommandError::InvalidCommand("command is not UTF-8".to_string()))?;

        Ok(match token {
            "start" | "enable" | "1" => Command::Start,
            "stop" | "disable" | "0" => Command::Stop,
            other => Command::Unsupported(other.to_string()),
        })
    }
}

impl std::str::FromStr for Command {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::parse(s.as_bytes())
    }
}

/// Switch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Disabled,
    Enabled,
}

impl SwitchState {
    /// Text returned by a read of the switch
    pub fn as_str(self) -> &'static str {
        match self {
            SwitchState::Disabled => "0\n",
            SwitchState::Enabled => "1\n",
        }
    }
}

/// Outcome of executing a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Log reset, tracing on
    Enabled,
    /// Tracing off with this many valid records
    Disabled { entries: u64 },
    /// Unsupported command, nothing changed
    Ignored,
}

/// State machine over a [`TraceBuffer`]
#[derive(Debug, Clone, Copy)]
pub struct ControlSwitch<'a> {
    buffer: &'a TraceBuffer,
}

impl<'a> ControlSwitch<'a> {
    pub fn new(buffer: &'a TraceBuffer) -> Self {
        Self { buffer }
    }

    pub fn state(&self) -> SwitchState {
        if self.buffer.is_enabled() {
            SwitchState::Enabled
        } else {
            SwitchState::Disabled
        }
    }

    pub fn execute(&self, command: &Command) -> Result<Transition, CommandError> {
        match command {
            Command::Start => {
                tracing::debug!("starting trace log");
                self.buffer.reset()?;
                Ok(Transition::Enabled)
            }
            Command::Stop => {
                tracing::debug!("stopping trace log");
                let entries = self.buffer.finalize()?;
                tracing::debug!("trace log holds {} records", entries);
                Ok(Transition::Disabled { entries })
            }
            Command::Unsupported(token) => {
                tracing::error!(
                    "unsupported command {:?}; supported commands are: {}",
                    token,
                    SUPPORTED_COMMANDS
                );
                Ok(Transition::Ignored)
            }
        }
    }

    /// Handle a write of `input`; the whole buffer counts as consumed
    /// unless the command is malformed or the producer fails
    pub fn write(&self, input: &[u8]) -> Result<usize, CommandError> {
        let command = Command::parse(input)?;
        self.execute(&command)?;
        Ok(input.len())
    }
}
