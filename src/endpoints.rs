//! Exposed endpoints and their registration
//!
//! The registration layer itself (debugfs in the kernel, a FUSE mount, an
//! RPC table) lives outside this crate. It only has to accept
//! `register(name, mode, endpoint)` and `unregister_all()`.
//! [`EndpointTable`] is the in-process implementation.

use std::collections::BTreeMap;
use thiserror::Error;

/// Directory the endpoints are grouped under
pub const ENDPOINT_DIR: &str = "sel4_tracebuffer";

/// One exposed endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    /// Records as text lines
    Trace,
    /// Records as raw bytes
    TraceData,
    /// Tracing on/off switch
    TraceOn,
}

impl Endpoint {
    pub const ALL: [Endpoint; 3] = [Endpoint::Trace, Endpoint::TraceData, Endpoint::TraceOn];

    pub fn name(self) -> &'static str {
        match self {
            Endpoint::Trace => "trace",
            Endpoint::TraceData => "tracedata",
            Endpoint::TraceOn => "trace_on",
        }
    }

    /// Permission bits for the entry
    pub fn mode(self) -> u32 {
        match self {
            Endpoint::Trace | Endpoint::TraceData => 0o444,
            Endpoint::TraceOn => 0o644,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }
}

/// Errors from the registration layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("endpoint {0} is already registered")]
    Duplicate(String),
}

/// Registration layer interface
pub trait EndpointRegistry {
    fn register(&mut self, name: &str, mode: u32, endpoint: Endpoint) -> Result<(), RegistryError>;

    /// Remove every endpoint registered through this registry
    fn unregister_all(&mut self);
}

/// A registered endpoint entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub mode: u32,
    pub endpoint: Endpoint,
}

/// In-memory endpoint table
#[derive(Debug, Clone, Default)]
pub struct EndpointTable {
    entries: BTreeMap<String, Registration>,
}

impl EndpointTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Registration> {
        self.entries.get(name).copied()
    }

    /// Entries as `(path, registration)`, sorted by name
    pub fn iter(&self) -> impl Iterator<Item = (String, Registration)> + '_ {
        self.entries
            .iter()
            .map(|(name, reg)| (format!("{ENDPOINT_DIR}/{name}"), *reg))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl EndpointRegistry for EndpointTable {
    fn register(&mut self, name: &str, mode: u32, endpoint: Endpoint) -> Result<(), RegistryError> {
        if self.entries.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.entries
            .insert(name.to_string(), Registration { mode, endpoint });
        Ok(())
    }

    fn unregister_all(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_names_and_modes() {
        assert_eq!(Endpoint::Trace.name(), "trace");
        assert_eq!(Endpoint::TraceData.name(), "tracedata");
        assert_eq!(Endpoint::TraceOn.name(), "trace_on");
        assert_eq!(Endpoint::Trace.mode(), 0o444);
        assert_eq!(Endpoint::TraceData.mode(), 0o444);
        assert_eq!(Endpoint::TraceOn.mode(), 0o644);
    }

    #[test]
    fn test_from_name() {
        for endpoint in Endpoint::ALL {
            assert_eq!(Endpoint::from_name(endpoint.name()), Some(endpoint));
        }
        assert_eq!(Endpoint::from_name("tracing"), None);
    }

    #[test]
    fn test_table_rejects_duplicates() {
        let mut table = EndpointTable::new();
        table.register("trace", 0o444, Endpoint::Trace).unwrap();
        assert_eq!(
            table.register("trace", 0o444, Endpoint::Trace),
            Err(RegistryError::Duplicate("trace".to_string()))
        );
        table.unregister_all();
        assert!(table.is_empty());
    }

    #[test]
    fn test_table_paths() {
        let mut table = EndpointTable::new();
        table.register("trace_on", 0o644, Endpoint::TraceOn).unwrap();
        let paths: Vec<_> = table.iter().map(|(path, _)| path).collect();
        assert_eq!(paths, vec!["sel4_tracebuffer/trace_on".to_string()]);
    }
}
