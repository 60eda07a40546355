//! Scripted transport for unit-testing the engine layers.
//!
//! # Why a scripted transport?
//!
//! The wait engine's contracts are about *when* events become visible:
//! nothing may be observed before a synchronization round-trip, skipped
//! events must be discarded, deadlines must hold.  Testing that against the
//! full simulated server would entangle queue mechanics with input-pipeline
//! semantics.  `ScriptedTransport` is the minimal queue: events are staged
//! in batches and one batch is flushed per [`sync`](super::super::transport::ServerTransport::sync)
//! call, exactly mirroring the flush-on-round-trip rule real connections
//! follow.
//!
//! Management requests (device list, pointer position, version) answer from
//! plain fields tests can preload; mutating requests record their arguments
//! for inspection.

use std::collections::VecDeque;

use xtestbed_core::protocol::{
    DeviceId, DeviceInfo, DeviceScope, EventKind, ExtensionInfo, PropertyValue, ServerEvent,
    WindowId,
};

use crate::transport::{BarrierId, BarrierSegment, ServerTransport, TransportError};

/// A transport whose event stream is fully scripted by the test.
pub struct ScriptedTransport {
    /// Batches awaiting a round-trip; the front batch moves to `delivered`
    /// on each `sync`.
    staged: VecDeque<Vec<ServerEvent>>,
    /// Locally queued events, popped by `poll_event`.
    delivered: VecDeque<ServerEvent>,
    /// Device list answered by `query_devices`.
    pub devices: Vec<DeviceInfo>,
    /// Position answered by `query_pointer`.
    pub pointer: (f64, f64),
    /// Version string answered by `server_version`.
    pub version: String,
    /// Extension context answered by `query_extension`, `None` = extension
    /// missing.
    pub extension: Option<ExtensionInfo>,
    /// Version pair answered by `negotiate_version`.
    pub negotiated: (u16, u16),
    /// Every `select_events` call, in order.
    pub selections: Vec<(WindowId, DeviceScope, Vec<EventKind>)>,
    /// Every `add_master` name, in order.
    pub added_masters: Vec<String>,
    /// Every `attach_slave` pair, in order.
    pub attachments: Vec<(DeviceId, DeviceId)>,
    /// Number of `sync` round-trips performed.
    pub sync_count: usize,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self {
            staged: VecDeque::new(),
            delivered: VecDeque::new(),
            devices: Vec::new(),
            pointer: (0.0, 0.0),
            version: "scripted-server 0.0".to_string(),
            extension: Some(ExtensionInfo {
                opcode: 131,
                event_base: 91,
                error_base: 129,
            }),
            negotiated: (2, 3),
            selections: Vec::new(),
            added_masters: Vec::new(),
            attachments: Vec::new(),
            sync_count: 0,
        }
    }
}

impl ScriptedTransport {
    /// An empty transport: no events, a default device list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events delivered by the first round-trip.
    pub fn with_events(events: Vec<ServerEvent>) -> Self {
        let mut transport = Self::default();
        transport.staged.push_back(events);
        transport
    }

    /// Events held back one extra round-trip, to exercise flush timing.
    pub fn with_unflushed_events(events: Vec<ServerEvent>) -> Self {
        let mut transport = Self::default();
        transport.staged.push_back(Vec::new());
        transport.staged.push_back(events);
        transport
    }

    /// Stages another batch behind the existing ones.
    pub fn stage(&mut self, events: Vec<ServerEvent>) {
        self.staged.push_back(events);
    }
}

impl ServerTransport for ScriptedTransport {
    fn query_extension(&mut self, _name: &str) -> Result<Option<ExtensionInfo>, TransportError> {
        Ok(self.extension)
    }

    fn negotiate_version(
        &mut self,
        _major: u16,
        _minor: u16,
    ) -> Result<(u16, u16), TransportError> {
        Ok(self.negotiated)
    }

    fn select_events(
        &mut self,
        window: WindowId,
        scope: DeviceScope,
        kinds: &[EventKind],
    ) -> Result<(), TransportError> {
        self.selections.push((window, scope, kinds.to_vec()));
        Ok(())
    }

    fn query_devices(&mut self) -> Result<Vec<DeviceInfo>, TransportError> {
        Ok(self.devices.clone())
    }

    fn query_pointer(&mut self, _device: DeviceId) -> Result<(f64, f64), TransportError> {
        Ok(self.pointer)
    }

    fn warp_pointer(
        &mut self,
        _device: DeviceId,
        _screen: usize,
        x: f64,
        y: f64,
    ) -> Result<(), TransportError> {
        self.pointer = (x, y);
        Ok(())
    }

    fn change_property(
        &mut self,
        _device: DeviceId,
        _name: &str,
        _value: PropertyValue,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    fn get_property(
        &mut self,
        _device: DeviceId,
        _name: &str,
    ) -> Result<Option<PropertyValue>, TransportError> {
        Ok(None)
    }

    fn create_barrier(
        &mut self,
        _segment: BarrierSegment,
        _masters: &[DeviceId],
    ) -> Result<BarrierId, TransportError> {
        Ok(1)
    }

    fn destroy_barrier(&mut self, _id: BarrierId) -> Result<(), TransportError> {
        Ok(())
    }

    fn add_master(&mut self, name: &str) -> Result<(), TransportError> {
        self.added_masters.push(name.to_string());
        Ok(())
    }

    fn attach_slave(&mut self, slave: DeviceId, master: DeviceId) -> Result<(), TransportError> {
        self.attachments.push((slave, master));
        Ok(())
    }

    fn screen_count(&mut self) -> Result<usize, TransportError> {
        Ok(1)
    }

    fn screen_size(&mut self, _screen: usize) -> Result<(u32, u32), TransportError> {
        Ok((1024, 768))
    }

    fn root_window(&mut self, screen: usize) -> Result<WindowId, TransportError> {
        Ok(screen as WindowId + 1)
    }

    fn sync(&mut self) -> Result<(), TransportError> {
        self.sync_count += 1;
        if let Some(batch) = self.staged.pop_front() {
            self.delivered.extend(batch);
        }
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<ServerEvent>, TransportError> {
        Ok(self.delivered.pop_front())
    }

    fn pending(&mut self) -> Result<usize, TransportError> {
        Ok(self.delivered.len())
    }

    fn server_version(&mut self) -> Result<String, TransportError> {
        Ok(self.version.clone())
    }
}
