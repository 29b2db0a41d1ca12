//! Non-blocking session exclusion
//!
//! Each endpoint class has one [`AccessGate`]. Opening a session takes the
//! gate's token without waiting; a second open fails immediately with
//! [`SessionBusy`]. The token is released when it is dropped, so every exit
//! path of a session gives it back.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Kind of session a gate protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionClass {
    /// `trace` and `tracedata` share one reader
    Read,
    /// `trace_on`
    Control,
}

impl fmt::Display for SessionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionClass::Read => f.write_str("read"),
            SessionClass::Control => f.write_str("control"),
        }
    }
}

/// Open attempted while another session of the same class is live
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("device busy: a {0} session is already open")]
pub struct SessionBusy(pub SessionClass);

/// Try-lock gate for one session class
#[derive(Debug)]
pub struct AccessGate {
    class: SessionClass,
    held: AtomicBool,
}

impl AccessGate {
    pub const fn new(class: SessionClass) -> Self {
        Self {
            class,
            held: AtomicBool::new(false),
        }
    }

    pub fn class(&self) -> SessionClass {
        self.class
    }

    /// Take the token, or fail at once if it is held
    pub fn try_acquire(&self) -> Result<GateToken<'_>, SessionBusy> {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map(|_| GateToken { gate: self })
            .map_err(|_| {
                tracing::error!("device busy: {} session already open", self.class);
                SessionBusy(self.class)
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Proof of a held gate; dropping it releases the gate
#[derive(Debug)]
#[must_use = "the gate is released as soon as the token is dropped"]
pub struct GateToken<'a> {
    gate: &'a AccessGate,
}

impl GateToken<'_> {
    pub fn class(&self) -> SessionClass {
        self.gate.class
    }

    /// Release explicitly
    pub fn release(self) {}
}

impl Drop for GateToken<'_> {
    fn drop(&mut self) {
        self.gate.held.store(false, Ordering::Release);
    }
}
