//! tracebuf - seL4 kernel entry trace buffer reader
//!
//! This library maps the physical region where the firmware logs kernel
//! entries, decodes its fixed-size records, and exposes them through the
//! `trace`, `tracedata`, and `trace_on` endpoints with non-blocking
//! single-session access.

pub mod buffer;
pub mod cli;
pub mod config;
pub mod control;
pub mod cursor;
pub mod descriptor;
pub mod device;
pub mod endpoints;
pub mod gate;
pub mod json_output;
pub mod mapper;
pub mod phys;
pub mod producer;
pub mod record;
pub mod session;
