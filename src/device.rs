//! Trace buffer driver instance
//!
//! Attaching maps the trace region described by the hardware descriptor and
//! builds the buffer. At most one instance may be attached per
//! [`DeviceSlot`]; the binary uses [`DeviceSlot::global`]. Detaching tears
//! down the endpoints, unmaps the region, and frees the slot.

use crate::buffer::{LogProducer, TraceBuffer, TraceRegion};
use crate::config::DeviceConfig;
use crate::control::ControlSwitch;
use crate::cursor::{RecordCursor, View};
use crate::descriptor::{DescriptorError, ResourceDescriptor};
use crate::endpoints::{Endpoint, EndpointRegistry, RegistryError};
use crate::gate::{AccessGate, SessionBusy, SessionClass};
use crate::mapper::{self, CachePolicy, MapError};
use crate::phys::PhysicalMemory;
use crate::record::RECORD_SIZE;
use crate::session::{ControlSession, ReadSession, Session};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Errors that keep an instance from attaching
#[derive(Error, Debug)]
pub enum AttachError {
    #[error("sel4 tracebuffer: only one instance is allowed")]
    InstanceConflict,

    #[error("failed to locate the trace buffer memory resource")]
    MissingDescriptor,

    #[error("invalid trace buffer descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("failed to open physical memory: {0}")]
    Backend(#[source] io::Error),

    #[error("failed to map trace buffer: {0}")]
    Map(#[from] MapError),
}

/// Single-instance slot
#[derive(Debug, Clone, Default)]
pub struct DeviceSlot {
    attached: Arc<AtomicBool>,
}

impl DeviceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide slot
    pub fn global() -> DeviceSlot {
        static GLOBAL: OnceLock<DeviceSlot> = OnceLock::new();
        GLOBAL.get_or_init(DeviceSlot::new).clone()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn claim(&self) -> Result<SlotClaim, AttachError> {
        self.attached
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AttachError::InstanceConflict)?;
        Ok(SlotClaim {
            attached: Arc::clone(&self.attached),
        })
    }
}

#[derive(Debug)]
struct SlotClaim {
    attached: Arc<AtomicBool>,
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        self.attached.store(false, Ordering::Release);
    }
}

/// Mapping options applied at attach
#[derive(Debug, Clone)]
pub struct AttachOptions {
    pub cache_policy: CachePolicy,
    /// Owner name for device-memory reservations
    pub label: String,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self {
            cache_policy: CachePolicy::default(),
            label: "sel4_tracebuffer".to_string(),
        }
    }
}

/// An attached trace buffer
#[derive(Debug)]
pub struct TraceDevice {
    // Dropped in order: the buffer unmaps before the slot is freed
    buffer: TraceBuffer,
    read_gate: AccessGate,
    control_gate: AccessGate,
    _claim: SlotClaim,
}

impl TraceDevice {
    /// Map the described region and build the instance
    pub fn attach(
        slot: &DeviceSlot,
        descriptor: Option<ResourceDescriptor>,
        memory: Arc<dyn PhysicalMemory>,
        producer: Box<dyn LogProducer>,
        options: &AttachOptions,
    ) -> Result<Self, AttachError> {
        let claim = slot.claim().inspect_err(|e| tracing::error!("{}", e))?;
        let descriptor = descriptor.ok_or_else(|| {
            tracing::error!("failed to locate trace buffer resource");
            AttachError::MissingDescriptor
        })?;

        let range = descriptor.range();
        let strategy = mapper::select_strategy(memory, range, &options.label);
        let region = TraceRegion::map(range, strategy.as_ref(), options.cache_policy)
            .inspect_err(|e| tracing::error!("failed to map trace buffer: {}", e))?;

        tracing::warn!(
            "map phaddr:{:#x} to vaddr:{:#x}",
            range.start,
            region.virtual_base().unwrap_or_default()
        );
        tracing::warn!(
            "probed sel4 trace buffer {:#x}@{:#x} ({} records)",
            range.size,
            range.start,
            region.capacity()
        );

        Ok(Self {
            buffer: TraceBuffer::new(region, producer),
            read_gate: AccessGate::new(SessionClass::Read),
            control_gate: AccessGate::new(SessionClass::Control),
            _claim: claim,
        })
    }

    /// Resolve the descriptor, memory, and producer from `config`, then
    /// attach
    pub fn from_config(slot: &DeviceSlot, config: &DeviceConfig) -> Result<Self, AttachError> {
        let descriptor = config.resolve_descriptor()?;
        let memory = config.build_memory().map_err(AttachError::Backend)?;
        let capacity = descriptor.map_or(0, |d| d.size / RECORD_SIZE as u64);
        let producer = config
            .build_producer(capacity)
            .map_err(AttachError::Backend)?;
        let options = AttachOptions {
            cache_policy: config.cache_policy,
            label: config.label.clone(),
        };
        Self::attach(slot, descriptor, memory, producer, &options)
    }

    pub fn buffer(&self) -> &TraceBuffer {
        &self.buffer
    }

    /// The on/off switch, without taking the control gate; callers hold a
    /// control token
    pub(crate) fn switch(&self) -> ControlSwitch<'_> {
        ControlSwitch::new(&self.buffer)
    }

    /// Register `trace`, `tracedata`, and `trace_on`
    ///
    /// On failure every endpoint registered so far is torn down again.
    pub fn register_endpoints(
        &self,
        registry: &mut dyn EndpointRegistry,
    ) -> Result<(), RegistryError> {
        for endpoint in Endpoint::ALL {
            if let Err(e) = registry.register(endpoint.name(), endpoint.mode(), endpoint) {
                tracing::error!("failed to register {}: {}", endpoint.name(), e);
                registry.unregister_all();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Tear down the endpoints, unmap, and free the slot
    pub fn detach(mut self, registry: &mut dyn EndpointRegistry) {
        registry.unregister_all();
        self.buffer.unmap();
    }

    /// Open a read session over the records in `view`
    pub fn open_read(&self, view: View) -> Result<ReadSession<'_>, SessionBusy> {
        let token = self.read_gate.try_acquire()?;
        Ok(ReadSession::new(token, RecordCursor::open(&self.buffer), view))
    }

    /// Open `trace`
    pub fn open_trace(&self) -> Result<ReadSession<'_>, SessionBusy> {
        self.open_read(View::Text)
    }

    /// Open `tracedata`
    pub fn open_tracedata(&self) -> Result<ReadSession<'_>, SessionBusy> {
        self.open_read(View::Binary)
    }

    /// Open `trace_on`
    pub fn open_control(&self) -> Result<ControlSession<'_>, SessionBusy> {
        let token = self.control_gate.try_acquire()?;
        Ok(ControlSession::new(token, self.switch()))
    }

    /// Open an endpoint by identity
    pub fn open(&self, endpoint: Endpoint) -> Result<Session<'_>, SessionBusy> {
        Ok(match endpoint {
            Endpoint::Trace => Session::Read(self.open_trace()?),
            Endpoint::TraceData => Session::Read(self.open_tracedata()?),
            Endpoint::TraceOn => Session::Control(self.open_control()?),
        })
    }
}
