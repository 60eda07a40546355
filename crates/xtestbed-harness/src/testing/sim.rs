//! In-process simulated server.
//!
//! Implements [`ServerTransport`] and the input pipeline with just enough
//! server semantics to exercise every harness contract without a display:
//! frame-buffered event processing, constant deceleration with sub-pixel
//! accumulation, per-device coordinate transforms, wheel-to-button mapping,
//! touch sequences with pointer emulation, master/slave hierarchy changes,
//! two-screen crossing, pointer barriers, and the touch-subscription
//! conflict rule.
//!
//! This is a test vehicle, not a server: it models only what the harness
//! observes.  All state lives in a single [`SimCore`] behind `Rc<RefCell>`,
//! matching the harness's single-threaded execution model; each connection
//! gets a private in-flight queue that only a synchronization round-trip
//! flushes, which is what the wait engine's ordering guarantee leans on.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::debug;

use xtestbed_core::geometry::Transform;
use xtestbed_core::input::{codes, is_button_code, EventType, RawEvent};
use xtestbed_core::protocol::{
    crossing, hierarchy, properties, Capabilities, DeviceId, DeviceInfo, DeviceScope, DeviceUse,
    EventKind, ExtensionInfo, PropertyValue, ProtocolError, ProtocolErrorCode, ServerEvent,
    WindowId, CORE_KEYBOARD, CORE_POINTER,
};
use xtestbed_core::recording::DeviceDescriptor;

use crate::emulation::{EmulatedDevice, EmulationError, InputNode};
use crate::server::{ServerRuntime, SpawnError};
use crate::transport::{
    BarrierId, BarrierSegment, ServerTransport, TransportError, INPUT_EXTENSION,
};

/// Extension context the simulated server reports.
const SIM_EXTENSION: ExtensionInfo = ExtensionInfo {
    opcode: 131,
    event_base: 91,
    error_base: 129,
};

/// Highest input-extension version the simulated server speaks.
const SIM_XI_VERSION: (u16, u16) = (2, 3);

/// X servers map the lowest hardware keycode to 8.
const KEYCODE_OFFSET: u32 = 8;

/// Layout and identity options of a simulated server.
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Screen sizes, laid out left to right.
    pub screens: Vec<(u32, u32)>,
    /// Merge the screens into one root instead of separate roots.
    pub xinerama: bool,
    /// Version string reported to clients.
    pub version: String,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            screens: vec![(1024, 768)],
            xinerama: false,
            version: "xtestbed-sim 1.21.1".to_string(),
        }
    }
}

/// Pointer state of a master pointer device.
#[derive(Debug, Clone, Copy)]
struct PointerState {
    screen: usize,
    x: f64,
    y: f64,
    buttons: u32,
    /// Slave that last drove this master, for slave-switch notifications.
    last_source: Option<DeviceId>,
}

impl PointerState {
    fn origin() -> Self {
        Self {
            screen: 0,
            x: 0.0,
            y: 0.0,
            buttons: 0,
            last_source: None,
        }
    }
}

/// An active touch sequence on a touch device.
#[derive(Debug, Clone, Copy)]
struct ActiveTouch {
    id: u32,
    x: f64,
    y: f64,
}

/// One device known to the simulated server.
struct SimDevice {
    id: DeviceId,
    name: String,
    device_use: DeviceUse,
    attachment: DeviceId,
    enabled: bool,
    capabilities: Capabilities,
    descriptor: Option<DeviceDescriptor>,
    node_path: Option<PathBuf>,
    transform: Transform,
    accel_profile: i32,
    constant_deceleration: f64,
    pointer: Option<PointerState>,
    touch: Option<ActiveTouch>,
    next_touch_id: u32,
    pending_frame: Vec<RawEvent>,
}

impl SimDevice {
    fn new(id: DeviceId, name: &str, device_use: DeviceUse, attachment: DeviceId) -> Self {
        let pointer = match device_use {
            DeviceUse::MasterPointer => Some(PointerState::origin()),
            _ => None,
        };
        Self {
            id,
            name: name.to_string(),
            device_use,
            attachment,
            enabled: true,
            capabilities: Capabilities::default(),
            descriptor: None,
            node_path: None,
            transform: Transform::identity(),
            accel_profile: 0,
            constant_deceleration: 1.0,
            pointer,
            touch: None,
            next_touch_id: 0,
            pending_frame: Vec::new(),
        }
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            name: self.name.clone(),
            device_use: self.device_use,
            attachment: self.attachment,
            enabled: self.enabled,
            capabilities: self.capabilities,
        }
    }
}

/// One event subscription of one session.
#[derive(Debug, Clone)]
struct Subscription {
    window: WindowId,
    scope: DeviceScope,
    kinds: BTreeSet<EventKind>,
}

/// Per-connection state.
struct SessionSlot {
    open: bool,
    /// Generated but not yet flushed to the client.
    in_flight: Vec<ServerEvent>,
    /// Flushed and locally readable.
    delivered: Vec<ServerEvent>,
    subscriptions: Vec<Subscription>,
}

struct SimBarrier {
    id: BarrierId,
    segment: BarrierSegment,
    masters: Vec<DeviceId>,
}

/// The complete state of one simulated server.
pub(crate) struct SimCore {
    options: SimOptions,
    running: bool,
    devices: Vec<SimDevice>,
    next_device_id: DeviceId,
    sessions: Vec<SessionSlot>,
    barriers: Vec<SimBarrier>,
    next_barrier_id: BarrierId,
}

impl SimCore {
    fn new(options: SimOptions) -> Self {
        let mut devices = Vec::new();
        let mut vcp = SimDevice::new(CORE_POINTER, "Virtual core pointer", DeviceUse::MasterPointer, CORE_KEYBOARD);
        vcp.capabilities.pointer = true;
        let mut vck = SimDevice::new(CORE_KEYBOARD, "Virtual core keyboard", DeviceUse::MasterKeyboard, CORE_POINTER);
        vck.capabilities.keyboard = true;
        let mut xtest_ptr = SimDevice::new(4, "Virtual core XTEST pointer", DeviceUse::SlavePointer, CORE_POINTER);
        xtest_ptr.capabilities.pointer = true;
        let mut xtest_kbd = SimDevice::new(5, "Virtual core XTEST keyboard", DeviceUse::SlaveKeyboard, CORE_KEYBOARD);
        xtest_kbd.capabilities.keyboard = true;
        devices.extend([vcp, vck, xtest_ptr, xtest_kbd]);
        Self {
            options,
            running: false,
            devices,
            next_device_id: 6,
            sessions: Vec::new(),
            barriers: Vec::new(),
            next_barrier_id: 1,
        }
    }

    // ── Topology helpers ──────────────────────────────────────────────────────

    fn screen_count(&self) -> usize {
        if self.options.xinerama {
            1
        } else {
            self.options.screens.len()
        }
    }

    fn screen_size(&self, screen: usize) -> (u32, u32) {
        if self.options.xinerama {
            let width: u32 = self.options.screens.iter().map(|(w, _)| *w).sum();
            let height: u32 = self.options.screens.iter().map(|(_, h)| *h).max().unwrap_or(0);
            (width, height)
        } else {
            self.options.screens[screen]
        }
    }

    fn root(&self, screen: usize) -> WindowId {
        100 + screen as WindowId
    }

    fn device_index(&self, id: DeviceId) -> Option<usize> {
        self.devices.iter().position(|d| d.id == id)
    }

    fn is_master(&self, id: DeviceId) -> bool {
        self.device_index(id)
            .map(|i| self.devices[i].device_use.is_master())
            .unwrap_or(false)
    }

    fn master_of(&self, id: DeviceId) -> DeviceId {
        match self.device_index(id) {
            Some(i) if self.devices[i].device_use.is_master() => id,
            Some(i) => self.devices[i].attachment,
            None => CORE_POINTER,
        }
    }

    // ── Connections ───────────────────────────────────────────────────────────

    fn connect(&mut self) -> Result<usize, TransportError> {
        if !self.running {
            return Err(TransportError::ConnectionLost(
                "server is not accepting connections".into(),
            ));
        }
        self.sessions.push(SessionSlot {
            open: true,
            in_flight: Vec::new(),
            delivered: Vec::new(),
            subscriptions: Vec::new(),
        });
        Ok(self.sessions.len() - 1)
    }

    // ── Event delivery ────────────────────────────────────────────────────────

    fn push(&mut self, session: usize, event: ServerEvent) {
        let slot = &mut self.sessions[session];
        if slot.open {
            slot.in_flight.push(event);
        }
    }

    /// Delivers a pointer/keyboard-family event to every subscribed session.
    #[allow(clippy::too_many_arguments)]
    fn deliver_input_event(
        &mut self,
        kind: EventKind,
        master: DeviceId,
        source: DeviceId,
        detail: u32,
        screen: usize,
        x: f64,
        y: f64,
        buttons: u32,
        emulated: bool,
    ) {
        let window = self.root(screen);
        let is_master_lookup: Vec<DeviceId> = self
            .devices
            .iter()
            .filter(|d| d.device_use.is_master())
            .map(|d| d.id)
            .collect();
        for session in 0..self.sessions.len() {
            if !self.sessions[session].open {
                continue;
            }
            // Pointer-emulated events are withheld from sessions observing
            // the touch sequence itself.
            if emulated && self.session_observes_touch(session, source) {
                continue;
            }
            let mut deliver_as = None;
            for sub in &self.sessions[session].subscriptions {
                if sub.window != window || !sub.kinds.contains(&kind) {
                    continue;
                }
                if kind.is_core() {
                    deliver_as = Some(master);
                    break;
                }
                let matches = match sub.scope {
                    DeviceScope::AllDevices => true,
                    DeviceScope::AllMasterDevices => is_master_lookup.contains(&master),
                    DeviceScope::Device(id) => id == master || id == source,
                };
                if matches {
                    deliver_as = Some(match sub.scope {
                        DeviceScope::Device(id) if id == source => source,
                        _ => master,
                    });
                    break;
                }
            }
            if let Some(device) = deliver_as {
                let extension_opcode = if kind.is_core() {
                    None
                } else {
                    Some(SIM_EXTENSION.opcode)
                };
                self.push(
                    session,
                    ServerEvent {
                        kind,
                        extension_opcode,
                        device,
                        source,
                        detail,
                        root_x: x,
                        root_y: y,
                        screen,
                        buttons,
                        emulated,
                    },
                );
            }
        }
    }

    fn session_observes_touch(&self, session: usize, source: DeviceId) -> bool {
        let master = self.master_of(source);
        self.sessions[session].subscriptions.iter().any(|sub| {
            sub.kinds.iter().any(EventKind::is_touch)
                && match sub.scope {
                    DeviceScope::AllDevices => true,
                    DeviceScope::AllMasterDevices => self.is_master(master),
                    DeviceScope::Device(id) => id == master || id == source,
                }
        })
    }

    /// Delivers a hierarchy/property notification to every session
    /// subscribed anywhere.
    fn deliver_notification(&mut self, kind: EventKind, changed: DeviceId, detail: u32) {
        for session in 0..self.sessions.len() {
            if !self.sessions[session].open {
                continue;
            }
            let subscribed = self.sessions[session]
                .subscriptions
                .iter()
                .any(|sub| sub.kinds.contains(&kind));
            if subscribed {
                self.push(
                    session,
                    ServerEvent {
                        kind,
                        extension_opcode: Some(SIM_EXTENSION.opcode),
                        device: changed,
                        source: changed,
                        detail,
                        root_x: 0.0,
                        root_y: 0.0,
                        screen: 0,
                        buttons: 0,
                        emulated: false,
                    },
                );
            }
        }
    }

    // ── Subscription bookkeeping ──────────────────────────────────────────────

    fn select_events(
        &mut self,
        session: usize,
        window: WindowId,
        scope: DeviceScope,
        kinds: &[EventKind],
    ) -> Result<(), TransportError> {
        let kinds: BTreeSet<EventKind> = kinds.iter().copied().collect();

        // The touch family allows at most one subscriber per overlapping
        // scope: an existing broader-or-equal claim by another session
        // rejects the request.
        if kinds.iter().any(EventKind::is_touch) {
            let is_master = |id: DeviceId| self.is_master(id);
            for (other_idx, other) in self.sessions.iter().enumerate() {
                if other_idx == session || !other.open {
                    continue;
                }
                for sub in &other.subscriptions {
                    let has_touch = sub.kinds.iter().any(EventKind::is_touch);
                    if has_touch
                        && sub.scope.broadness() <= scope.broadness()
                        && sub.scope.overlaps(&scope, is_master)
                    {
                        return Err(TransportError::Protocol(ProtocolError::new(
                            ProtocolErrorCode::Access,
                            "select_events",
                        )));
                    }
                }
            }
        }

        let slot = &mut self.sessions[session];
        // Replacing this session's own subscription for the same
        // (window, scope) is always allowed.
        slot.subscriptions
            .retain(|sub| !(sub.window == window && sub.scope == scope));
        if !kinds.is_empty() {
            slot.subscriptions.push(Subscription {
                window,
                scope,
                kinds,
            });
        }
        Ok(())
    }

    // ── Device registry ───────────────────────────────────────────────────────

    fn register_device(&mut self, descriptor: DeviceDescriptor) -> DeviceId {
        let id = self.next_device_id;
        self.next_device_id += 1;
        let capabilities = Capabilities::from(&descriptor);
        let is_pointer_like =
            capabilities.pointer || capabilities.touch || capabilities.tablet_tool;
        let (device_use, attachment) = if is_pointer_like {
            (DeviceUse::SlavePointer, CORE_POINTER)
        } else {
            (DeviceUse::SlaveKeyboard, CORE_KEYBOARD)
        };
        let mut device = SimDevice::new(id, &descriptor.name, device_use, attachment);
        device.capabilities = capabilities;
        device.node_path = Some(PathBuf::from(format!("/dev/input/sim-event{id}")));
        device.descriptor = Some(descriptor);
        debug!(id, name = %device.name, "simulated device registered");
        self.devices.push(device);
        self.deliver_notification(EventKind::HierarchyChanged, id, hierarchy::SLAVE_ADDED);
        id
    }

    fn remove_device(&mut self, id: DeviceId) {
        if let Some(index) = self.device_index(id) {
            self.devices.remove(index);
            self.deliver_notification(EventKind::HierarchyChanged, id, hierarchy::SLAVE_REMOVED);
        }
    }

    fn add_master(&mut self, name: &str) {
        let pointer_id = self.next_device_id;
        let keyboard_id = pointer_id + 1;
        self.next_device_id += 2;
        let mut pointer = SimDevice::new(
            pointer_id,
            &format!("{name} pointer"),
            DeviceUse::MasterPointer,
            keyboard_id,
        );
        pointer.capabilities.pointer = true;
        let mut keyboard = SimDevice::new(
            keyboard_id,
            &format!("{name} keyboard"),
            DeviceUse::MasterKeyboard,
            pointer_id,
        );
        keyboard.capabilities.keyboard = true;
        self.devices.push(pointer);
        self.devices.push(keyboard);
        self.deliver_notification(
            EventKind::HierarchyChanged,
            pointer_id,
            hierarchy::MASTER_ADDED,
        );
    }

    fn attach_slave(&mut self, slave: DeviceId, master: DeviceId) -> Result<(), TransportError> {
        let master_ok = self.is_master(master);
        match self.device_index(slave) {
            Some(index) if master_ok && !self.devices[index].device_use.is_master() => {
                self.devices[index].attachment = master;
                self.deliver_notification(
                    EventKind::HierarchyChanged,
                    slave,
                    hierarchy::SLAVE_ATTACHED,
                );
                Ok(())
            }
            _ => Err(TransportError::Protocol(ProtocolError::new(
                ProtocolErrorCode::Device,
                "attach_slave",
            ))),
        }
    }

    // ── Properties ────────────────────────────────────────────────────────────

    fn change_property(
        &mut self,
        id: DeviceId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), TransportError> {
        let index = self.device_index(id).ok_or_else(|| {
            TransportError::Protocol(ProtocolError::new(
                ProtocolErrorCode::Device,
                "change_property",
            ))
        })?;
        match name {
            properties::ACCEL_PROFILE => {
                let profile = value.as_int().ok_or_else(bad_value("change_property"))?;
                self.devices[index].accel_profile = profile;
            }
            properties::CONSTANT_DECELERATION => {
                let factor = match &value {
                    PropertyValue::Floats(v) if v.len() == 1 => f64::from(v[0]),
                    PropertyValue::Integers(v) if v.len() == 1 => f64::from(v[0]),
                    _ => return Err(bad_value("change_property")()),
                };
                if factor <= 0.0 {
                    return Err(bad_value("change_property")());
                }
                self.devices[index].constant_deceleration = factor;
            }
            properties::TRANSFORM_MATRIX => {
                let floats = value.as_floats().ok_or_else(bad_value("change_property"))?;
                if floats.len() != 9 {
                    return Err(bad_value("change_property")());
                }
                let mut row = [0.0f64; 9];
                for (slot, v) in row.iter_mut().zip(floats) {
                    *slot = f64::from(*v);
                }
                self.devices[index].transform = Transform::from_row_major(row);
            }
            properties::DEVICE_ENABLED => {
                let enable = value.as_int().ok_or_else(bad_value("change_property"))? != 0;
                self.set_device_enabled(id, enable);
            }
            _ => {
                // Unmodeled properties are accepted and dropped; the server
                // under test does the same for unknown driver options.
            }
        }
        self.deliver_notification(EventKind::PropertyChanged, id, 0);
        Ok(())
    }

    fn get_property(
        &mut self,
        id: DeviceId,
        name: &str,
    ) -> Result<Option<PropertyValue>, TransportError> {
        let index = self.device_index(id).ok_or_else(|| {
            TransportError::Protocol(ProtocolError::new(
                ProtocolErrorCode::Device,
                "get_property",
            ))
        })?;
        let device = &self.devices[index];
        let value = match name {
            properties::ACCEL_PROFILE => {
                Some(PropertyValue::Integers(vec![device.accel_profile]))
            }
            properties::CONSTANT_DECELERATION => Some(PropertyValue::Floats(vec![
                device.constant_deceleration as f32,
            ])),
            properties::TRANSFORM_MATRIX => Some(PropertyValue::Floats(
                device.transform.to_row_major().iter().map(|v| *v as f32).collect(),
            )),
            properties::DEVICE_ENABLED => {
                Some(PropertyValue::Integers(vec![i32::from(device.enabled)]))
            }
            properties::DEVICE_NODE => device
                .node_path
                .as_ref()
                .map(|p| PropertyValue::Text(p.display().to_string())),
            _ => None,
        };
        Ok(value)
    }

    fn set_device_enabled(&mut self, id: DeviceId, enable: bool) {
        let Some(index) = self.device_index(id) else {
            return;
        };
        if self.devices[index].enabled == enable {
            return;
        }
        self.devices[index].enabled = enable;
        if !enable {
            // Disabling a touch device ends its active sequence.
            if let Some(touch) = self.devices[index].touch.take() {
                let source = self.devices[index].id;
                self.finish_touch(source, touch);
            }
        }
        let flag = if enable {
            hierarchy::DEVICE_ENABLED
        } else {
            hierarchy::DEVICE_DISABLED
        };
        self.deliver_notification(EventKind::HierarchyChanged, id, flag);
    }

    // ── Barriers ──────────────────────────────────────────────────────────────

    fn create_barrier(
        &mut self,
        segment: BarrierSegment,
        masters: &[DeviceId],
    ) -> Result<BarrierId, TransportError> {
        let zero_length = segment.x1 == segment.x2 && segment.y1 == segment.y2;
        if zero_length || (!segment.is_vertical() && !segment.is_horizontal()) {
            return Err(TransportError::Protocol(ProtocolError::new(
                ProtocolErrorCode::Value,
                "create_barrier",
            )));
        }
        for master in masters {
            if !self.is_master(*master) {
                return Err(TransportError::Protocol(ProtocolError::new(
                    ProtocolErrorCode::Device,
                    "create_barrier",
                )));
            }
        }
        let id = self.next_barrier_id;
        self.next_barrier_id += 1;
        self.barriers.push(SimBarrier {
            id,
            segment,
            masters: masters.to_vec(),
        });
        Ok(id)
    }

    fn destroy_barrier(&mut self, id: BarrierId) -> Result<(), TransportError> {
        let before = self.barriers.len();
        self.barriers.retain(|b| b.id != id);
        if self.barriers.len() == before {
            return Err(TransportError::Protocol(ProtocolError::new(
                ProtocolErrorCode::Value,
                "destroy_barrier",
            )));
        }
        Ok(())
    }

    /// Constrains a relative move of `master` by its barriers; returns the
    /// permitted end position and the id of the barrier hit, if any.
    fn constrain(
        &self,
        master: DeviceId,
        from: (f64, f64),
        to: (f64, f64),
    ) -> ((f64, f64), Option<BarrierId>) {
        use crate::transport::barrier_directions as dir;
        let (x0, y0) = from;
        let (mut x1, mut y1) = to;
        let mut hit = None;
        for barrier in &self.barriers {
            if !barrier.masters.is_empty() && !barrier.masters.contains(&master) {
                continue;
            }
            let seg = barrier.segment;
            if seg.is_vertical() {
                let bx = f64::from(seg.x1);
                let (lo, hi) = (seg.y1.min(seg.y2), seg.y1.max(seg.y2));
                let within = y0 >= f64::from(lo) && y0 <= f64::from(hi);
                if within && x0 < bx && x1 >= bx && seg.allow & dir::POSITIVE_X == 0 {
                    x1 = bx - 1.0;
                    hit = Some(barrier.id);
                } else if within && x0 > bx && x1 <= bx && seg.allow & dir::NEGATIVE_X == 0 {
                    x1 = bx;
                    hit = Some(barrier.id);
                }
            } else if seg.is_horizontal() {
                let by = f64::from(seg.y1);
                let (lo, hi) = (seg.x1.min(seg.x2), seg.x1.max(seg.x2));
                let within = x0 >= f64::from(lo) && x0 <= f64::from(hi);
                if within && y0 < by && y1 >= by && seg.allow & dir::POSITIVE_Y == 0 {
                    y1 = by - 1.0;
                    hit = Some(barrier.id);
                } else if within && y0 > by && y1 <= by && seg.allow & dir::NEGATIVE_Y == 0 {
                    y1 = by;
                    hit = Some(barrier.id);
                }
            }
        }
        ((x1, y1), hit)
    }

    // ── Input pipeline ────────────────────────────────────────────────────────

    fn input(&mut self, device: DeviceId, event: RawEvent) {
        let Some(index) = self.device_index(device) else {
            return;
        };
        if !self.devices[index].enabled {
            return;
        }
        if event.is_sync() {
            let frame = std::mem::take(&mut self.devices[index].pending_frame);
            self.process_frame(device, &frame);
        } else {
            self.devices[index].pending_frame.push(event);
        }
    }

    fn process_frame(&mut self, source: DeviceId, frame: &[RawEvent]) {
        let index = match self.device_index(source) {
            Some(i) => i,
            None => return,
        };
        if self.devices[index].capabilities.touch {
            self.process_touch_frame(index, source, frame);
        } else {
            self.process_pointer_frame(index, source, frame);
        }
    }

    fn process_pointer_frame(&mut self, index: usize, source: DeviceId, frame: &[RawEvent]) {
        let transform = self.devices[index].transform;
        let deceleration = self.devices[index].constant_deceleration;

        let mut dx = 0.0f64;
        let mut dy = 0.0f64;
        let mut wheel_v = 0i32;
        let mut wheel_h = 0i32;
        let mut abs_x = None;
        let mut abs_y = None;
        let mut key_changes: Vec<(u16, bool)> = Vec::new();

        for event in frame {
            match (event.event_type, event.code) {
                (EventType::Relative, codes::REL_X) => dx += f64::from(event.value),
                (EventType::Relative, codes::REL_Y) => dy += f64::from(event.value),
                (EventType::Relative, codes::REL_WHEEL) => wheel_v += event.value,
                (EventType::Relative, codes::REL_HWHEEL) => wheel_h += event.value,
                (EventType::Absolute, codes::ABS_X) => abs_x = Some(event.value),
                (EventType::Absolute, codes::ABS_Y) => abs_y = Some(event.value),
                (EventType::Key, code) => key_changes.push((code, event.value != 0)),
                _ => {}
            }
        }

        let master = self.master_of(source);
        self.note_slave_switch(master, source);

        // Motion first, then buttons, then wheel: matches the order drivers
        // post a mixed frame in.
        if dx != 0.0 || dy != 0.0 {
            dx /= deceleration;
            dy /= deceleration;
            let (dx, dy) = transform.apply_delta(dx, dy);
            self.move_master(master, source, dx, dy);
        }
        if abs_x.is_some() || abs_y.is_some() {
            self.place_master(master, source, abs_x, abs_y);
        }
        for (code, pressed) in key_changes {
            if is_button_code(code) {
                let button = match code {
                    codes::BTN_LEFT => 1,
                    codes::BTN_MIDDLE => 2,
                    codes::BTN_RIGHT => 3,
                    _ => continue,
                };
                self.press_button(master, source, button, pressed, false);
            } else {
                self.press_key(master, source, code, pressed);
            }
        }
        for _ in 0..wheel_v.unsigned_abs() {
            let button = if wheel_v > 0 { 4 } else { 5 };
            self.press_button(master, source, button, true, false);
            self.press_button(master, source, button, false, false);
        }
        for _ in 0..wheel_h.unsigned_abs() {
            let button = if wheel_h > 0 { 7 } else { 6 };
            self.press_button(master, source, button, true, false);
            self.press_button(master, source, button, false, false);
        }
    }

    fn note_slave_switch(&mut self, master: DeviceId, source: DeviceId) {
        let Some(master_index) = self.device_index(master) else {
            return;
        };
        let Some(state) = self.devices[master_index].pointer.as_mut() else {
            return;
        };
        let switched = state.last_source.is_some() && state.last_source != Some(source);
        state.last_source = Some(source);
        if switched {
            self.deliver_notification(EventKind::DeviceChanged, source, 1);
        }
    }

    fn pointer_state(&self, master: DeviceId) -> Option<PointerState> {
        self.device_index(master)
            .and_then(|i| self.devices[i].pointer)
    }

    fn store_pointer_state(&mut self, master: DeviceId, state: PointerState) {
        if let Some(i) = self.device_index(master) {
            self.devices[i].pointer = Some(state);
        }
    }

    /// Applies a relative move with barrier and screen-edge semantics, then
    /// emits motion events.
    fn move_master(&mut self, master: DeviceId, source: DeviceId, dx: f64, dy: f64) {
        let Some(mut state) = self.pointer_state(master) else {
            return;
        };
        let old = state;
        let target = (state.x + dx, state.y + dy);
        let ((mut x, mut y), hit) = self.constrain(master, (state.x, state.y), target);

        let mut crossed_to: Option<usize> = None;
        let (width, _) = self.screen_size(state.screen);
        if hit.is_none() && !self.options.xinerama {
            // Separate roots: running off the edge moves onto the adjacent
            // screen, keeping the overshoot.
            if x > f64::from(width - 1) && state.screen + 1 < self.screen_count() {
                crossed_to = Some(state.screen + 1);
                x -= f64::from(width);
            } else if x < 0.0 && state.screen > 0 {
                crossed_to = Some(state.screen - 1);
                let (prev_width, _) = self.screen_size(state.screen - 1);
                x += f64::from(prev_width);
            }
        }
        let clamp_screen = crossed_to.unwrap_or(state.screen);
        let (cw, ch) = self.screen_size(clamp_screen);
        x = x.clamp(0.0, f64::from(cw - 1));
        y = y.clamp(0.0, f64::from(ch - 1));

        state.x = x;
        state.y = y;
        if let Some(new_screen) = crossed_to {
            let old_screen = state.screen;
            state.screen = new_screen;
            self.store_pointer_state(master, state);
            self.deliver_input_event(
                EventKind::Leave,
                master,
                source,
                crossing::NONLINEAR,
                old_screen,
                old.x,
                old.y,
                state.buttons,
                false,
            );
            self.deliver_input_event(
                EventKind::Enter,
                master,
                source,
                crossing::NONLINEAR,
                new_screen,
                x,
                y,
                state.buttons,
                false,
            );
        } else {
            self.store_pointer_state(master, state);
        }

        if let Some(barrier) = hit {
            self.deliver_input_event(
                EventKind::BarrierHit,
                master,
                source,
                barrier,
                state.screen,
                state.x,
                state.y,
                state.buttons,
                false,
            );
        }

        self.emit_motion(master, source, old, state, false);
    }

    /// Places a master from absolute axes, scaling the device range onto the
    /// full desktop.
    fn place_master(
        &mut self,
        master: DeviceId,
        source: DeviceId,
        abs_x: Option<i32>,
        abs_y: Option<i32>,
    ) {
        let Some(mut state) = self.pointer_state(master) else {
            return;
        };
        let old = state;
        let (width, height) = self.screen_size(state.screen);
        let descriptor = self
            .device_index(source)
            .and_then(|i| self.devices[i].descriptor.clone());
        let scale = |value: i32, axis: u16, extent: u32| -> f64 {
            let range = descriptor.as_ref().and_then(|d| d.axis_range(axis));
            match range {
                Some((min, max)) if max > min => {
                    f64::from(value - min) / f64::from(max - min) * f64::from(extent - 1)
                }
                _ => f64::from(value),
            }
        };
        if let Some(v) = abs_x {
            state.x = scale(v, codes::ABS_X, width).clamp(0.0, f64::from(width - 1));
        }
        if let Some(v) = abs_y {
            state.y = scale(v, codes::ABS_Y, height).clamp(0.0, f64::from(height - 1));
        }
        self.store_pointer_state(master, state);
        self.emit_motion(master, source, old, state, false);
    }

    fn emit_motion(
        &mut self,
        master: DeviceId,
        source: DeviceId,
        old: PointerState,
        new: PointerState,
        emulated: bool,
    ) {
        if old.x == new.x && old.y == new.y && old.screen == new.screen {
            return;
        }
        // Extended motion carries the sub-pixel position on every frame.
        self.deliver_input_event(
            EventKind::Motion,
            master,
            source,
            0,
            new.screen,
            new.x,
            new.y,
            new.buttons,
            emulated,
        );
        // The legacy stream only reports whole-pixel changes; sub-pixel
        // accumulation stays invisible until it crosses a pixel boundary.
        let moved_whole_pixel = old.screen != new.screen
            || old.x.floor() != new.x.floor()
            || old.y.floor() != new.y.floor();
        if moved_whole_pixel {
            self.deliver_input_event(
                EventKind::CoreMotion,
                master,
                source,
                0,
                new.screen,
                new.x.floor(),
                new.y.floor(),
                new.buttons,
                emulated,
            );
        }
    }

    fn press_button(
        &mut self,
        master: DeviceId,
        source: DeviceId,
        button: u8,
        pressed: bool,
        emulated: bool,
    ) {
        let Some(mut state) = self.pointer_state(master) else {
            return;
        };
        // Event state reflects the buttons held *before* this transition.
        let buttons_before = state.buttons;
        if pressed {
            state.buttons |= 1 << button;
        } else {
            state.buttons &= !(1 << button);
        }
        self.store_pointer_state(master, state);
        let (core_kind, xi_kind) = if pressed {
            (EventKind::CoreButtonPress, EventKind::ButtonPress)
        } else {
            (EventKind::CoreButtonRelease, EventKind::ButtonRelease)
        };
        for kind in [core_kind, xi_kind] {
            self.deliver_input_event(
                kind,
                master,
                source,
                u32::from(button),
                state.screen,
                state.x.floor(),
                state.y.floor(),
                buttons_before,
                emulated,
            );
        }
    }

    fn press_key(&mut self, master_pointer: DeviceId, source: DeviceId, code: u16, pressed: bool) {
        // Key events are delivered with the paired master keyboard as the
        // delivering device.
        let keyboard = self
            .device_index(source)
            .map(|i| self.devices[i].attachment)
            .unwrap_or(CORE_KEYBOARD);
        let state = self.pointer_state(master_pointer).unwrap_or(PointerState::origin());
        let (core_kind, xi_kind) = if pressed {
            (EventKind::CoreKeyPress, EventKind::KeyPress)
        } else {
            (EventKind::CoreKeyRelease, EventKind::KeyRelease)
        };
        for kind in [core_kind, xi_kind] {
            self.deliver_input_event(
                kind,
                keyboard,
                source,
                u32::from(code) + KEYCODE_OFFSET,
                state.screen,
                state.x.floor(),
                state.y.floor(),
                state.buttons,
                false,
            );
        }
    }

    // ── Touch pipeline ────────────────────────────────────────────────────────

    fn process_touch_frame(&mut self, index: usize, source: DeviceId, frame: &[RawEvent]) {
        let descriptor = self.devices[index].descriptor.clone();
        let (width, height) = self.screen_size(0);

        let mut pos_x = None;
        let mut pos_y = None;
        let mut begin = false;
        let mut end = false;
        for event in frame {
            match (event.event_type, event.code) {
                (EventType::Absolute, codes::ABS_MT_POSITION_X)
                | (EventType::Absolute, codes::ABS_X) => pos_x = Some(event.value),
                (EventType::Absolute, codes::ABS_MT_POSITION_Y)
                | (EventType::Absolute, codes::ABS_Y) => pos_y = Some(event.value),
                (EventType::Absolute, codes::ABS_MT_TRACKING_ID) => {
                    if event.value >= 0 {
                        begin = true;
                    } else {
                        end = true;
                    }
                }
                (EventType::Key, codes::BTN_TOUCH) => {
                    if event.value != 0 {
                        begin = true;
                    } else {
                        end = true;
                    }
                }
                _ => {}
            }
        }

        let scale = |value: i32, axis: u16, extent: u32| -> f64 {
            // Single-touch devices declare only the plain axis; fall back
            // from the multitouch range to it.
            let fallback = match axis {
                codes::ABS_MT_POSITION_X => codes::ABS_X,
                codes::ABS_MT_POSITION_Y => codes::ABS_Y,
                other => other,
            };
            let range = descriptor
                .as_ref()
                .and_then(|d| d.axis_range(axis).or_else(|| d.axis_range(fallback)));
            match range {
                Some((min, max)) if max > min => {
                    f64::from(value - min) / f64::from(max - min) * f64::from(extent - 1)
                }
                _ => f64::from(value),
            }
        };

        let active = self.devices[index].touch;
        let x = pos_x
            .map(|v| scale(v, codes::ABS_MT_POSITION_X, width))
            .or(active.map(|t| t.x))
            .unwrap_or(0.0);
        let y = pos_y
            .map(|v| scale(v, codes::ABS_MT_POSITION_Y, height))
            .or(active.map(|t| t.y))
            .unwrap_or(0.0);

        if begin && active.is_none() {
            let touch_id = self.devices[index].next_touch_id;
            self.devices[index].next_touch_id += 1;
            self.devices[index].touch = Some(ActiveTouch { id: touch_id, x, y });
            self.begin_touch(source, touch_id, x, y);
        } else if end {
            if let Some(mut touch) = self.devices[index].touch.take() {
                touch.x = x;
                touch.y = y;
                self.finish_touch(source, touch);
            }
        } else if let Some(mut touch) = self.devices[index].touch {
            touch.x = x;
            touch.y = y;
            self.devices[index].touch = Some(touch);
            self.update_touch(source, touch);
        }
    }

    fn begin_touch(&mut self, source: DeviceId, touch_id: u32, x: f64, y: f64) {
        let master = self.master_of(source);
        let Some(mut state) = self.pointer_state(master) else {
            return;
        };
        let old = state;
        state.x = x;
        state.y = y;
        self.store_pointer_state(master, state);
        self.deliver_input_event(
            EventKind::TouchBegin,
            master,
            source,
            touch_id,
            state.screen,
            x,
            y,
            state.buttons,
            false,
        );
        // Pointer emulation for non-touch observers: the contact drives the
        // legacy pointer with button 1 held.
        self.emit_motion(master, source, old, state, true);
        self.press_button(master, source, 1, true, true);
    }

    fn update_touch(&mut self, source: DeviceId, touch: ActiveTouch) {
        let master = self.master_of(source);
        let Some(mut state) = self.pointer_state(master) else {
            return;
        };
        let old = state;
        state.x = touch.x;
        state.y = touch.y;
        self.store_pointer_state(master, state);
        self.deliver_input_event(
            EventKind::TouchUpdate,
            master,
            source,
            touch.id,
            state.screen,
            touch.x,
            touch.y,
            state.buttons,
            false,
        );
        self.emit_motion(master, source, old, state, true);
    }

    fn finish_touch(&mut self, source: DeviceId, touch: ActiveTouch) {
        let master = self.master_of(source);
        let state = self.pointer_state(master).unwrap_or(PointerState::origin());
        self.deliver_input_event(
            EventKind::TouchEnd,
            master,
            source,
            touch.id,
            state.screen,
            touch.x,
            touch.y,
            state.buttons,
            false,
        );
        self.press_button(master, source, 1, false, true);
    }
}

fn bad_value(request: &'static str) -> impl Fn() -> TransportError {
    move || TransportError::Protocol(ProtocolError::new(ProtocolErrorCode::Value, request))
}

// ── Public handles ────────────────────────────────────────────────────────────

/// A simulated server.  Clone-cheap handles hand out runtimes, transports,
/// and emulated devices that all share one core.
pub struct SimServer {
    core: Rc<RefCell<SimCore>>,
}

impl SimServer {
    pub fn new(options: SimOptions) -> Self {
        Self {
            core: Rc::new(RefCell::new(SimCore::new(options))),
        }
    }

    /// A lifecycle runtime driving this simulated server.
    pub fn runtime(&self) -> Box<dyn ServerRuntime> {
        Box::new(SimRuntime {
            core: Rc::clone(&self.core),
        })
    }

    /// Registers a slave device and returns the emulated device driving it.
    ///
    /// The device appears in the hierarchy immediately (with a
    /// hierarchy-changed notification); dropping the returned value unplugs
    /// it.
    pub fn create_device(&self, descriptor: DeviceDescriptor) -> EmulatedDevice {
        let id = self.core.borrow_mut().register_device(descriptor.clone());
        let node_path = self
            .core
            .borrow()
            .devices
            .iter()
            .find(|d| d.id == id)
            .and_then(|d| d.node_path.clone());
        EmulatedDevice::new(
            descriptor,
            Box::new(SimNode {
                core: Rc::clone(&self.core),
                device: id,
                node_path,
            }),
        )
    }
}

/// Virtual input node feeding the simulated input pipeline.
struct SimNode {
    core: Rc<RefCell<SimCore>>,
    device: DeviceId,
    node_path: Option<PathBuf>,
}

impl InputNode for SimNode {
    fn emit(&mut self, event: RawEvent) -> Result<(), EmulationError> {
        self.core.borrow_mut().input(self.device, event);
        Ok(())
    }

    fn node_path(&self) -> Option<&Path> {
        self.node_path.as_deref()
    }
}

impl Drop for SimNode {
    fn drop(&mut self) {
        self.core.borrow_mut().remove_device(self.device);
    }
}

/// Lifecycle runtime over a simulated server.
pub struct SimRuntime {
    core: Rc<RefCell<SimCore>>,
}

impl ServerRuntime for SimRuntime {
    fn spawn(&mut self, _display: u32, config: &Path, _log: &Path) -> Result<(), SpawnError> {
        if !config.exists() {
            return Err(SpawnError::MissingConfig(config.to_path_buf()));
        }
        self.core.borrow_mut().running = true;
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        self.core.borrow().running
    }

    fn terminate(&mut self) -> Result<(), SpawnError> {
        self.core.borrow_mut().running = false;
        Ok(())
    }

    fn kill(&mut self) -> Result<(), SpawnError> {
        self.core.borrow_mut().running = false;
        Ok(())
    }

    fn try_connect(&mut self, _screen: usize) -> Result<Box<dyn ServerTransport>, TransportError> {
        let session = self.core.borrow_mut().connect()?;
        Ok(Box::new(SimTransport {
            core: Rc::clone(&self.core),
            session,
        }))
    }

    fn display_available(&self, _display: u32) -> bool {
        true
    }
}

/// One connection to the simulated server.
struct SimTransport {
    core: Rc<RefCell<SimCore>>,
    session: usize,
}

impl SimTransport {
    fn check_open(&self) -> Result<(), TransportError> {
        let core = self.core.borrow();
        if !core.running || !core.sessions[self.session].open {
            return Err(TransportError::ConnectionLost("server terminated".into()));
        }
        Ok(())
    }
}

impl ServerTransport for SimTransport {
    fn query_extension(&mut self, name: &str) -> Result<Option<ExtensionInfo>, TransportError> {
        self.check_open()?;
        Ok((name == INPUT_EXTENSION).then_some(SIM_EXTENSION))
    }

    fn negotiate_version(
        &mut self,
        _major: u16,
        minor: u16,
    ) -> Result<(u16, u16), TransportError> {
        self.check_open()?;
        Ok((SIM_XI_VERSION.0, minor.min(SIM_XI_VERSION.1)))
    }

    fn select_events(
        &mut self,
        window: WindowId,
        scope: DeviceScope,
        kinds: &[EventKind],
    ) -> Result<(), TransportError> {
        self.check_open()?;
        self.core
            .borrow_mut()
            .select_events(self.session, window, scope, kinds)
    }

    fn query_devices(&mut self) -> Result<Vec<DeviceInfo>, TransportError> {
        self.check_open()?;
        Ok(self.core.borrow().devices.iter().map(SimDevice::info).collect())
    }

    fn query_pointer(&mut self, device: DeviceId) -> Result<(f64, f64), TransportError> {
        self.check_open()?;
        let core = self.core.borrow();
        let master = core.master_of(device);
        let state = core.pointer_state(master).ok_or_else(|| {
            TransportError::Protocol(ProtocolError::new(
                ProtocolErrorCode::Device,
                "query_pointer",
            ))
        })?;
        Ok((state.x.floor(), state.y.floor()))
    }

    fn warp_pointer(
        &mut self,
        device: DeviceId,
        screen: usize,
        x: f64,
        y: f64,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        let mut core = self.core.borrow_mut();
        let master = core.master_of(device);
        let Some(mut state) = core.pointer_state(master) else {
            return Err(TransportError::Protocol(ProtocolError::new(
                ProtocolErrorCode::Device,
                "warp_pointer",
            )));
        };
        let old = state;
        let (width, height) = core.screen_size(screen);
        state.screen = screen;
        state.x = x.clamp(0.0, f64::from(width - 1));
        state.y = y.clamp(0.0, f64::from(height - 1));
        core.store_pointer_state(master, state);
        core.emit_motion(master, master, old, state, false);
        Ok(())
    }

    fn change_property(
        &mut self,
        device: DeviceId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), TransportError> {
        self.check_open()?;
        self.core.borrow_mut().change_property(device, name, value)
    }

    fn get_property(
        &mut self,
        device: DeviceId,
        name: &str,
    ) -> Result<Option<PropertyValue>, TransportError> {
        self.check_open()?;
        self.core.borrow_mut().get_property(device, name)
    }

    fn create_barrier(
        &mut self,
        segment: BarrierSegment,
        masters: &[DeviceId],
    ) -> Result<BarrierId, TransportError> {
        self.check_open()?;
        self.core.borrow_mut().create_barrier(segment, masters)
    }

    fn destroy_barrier(&mut self, id: BarrierId) -> Result<(), TransportError> {
        self.check_open()?;
        self.core.borrow_mut().destroy_barrier(id)
    }

    fn add_master(&mut self, name: &str) -> Result<(), TransportError> {
        self.check_open()?;
        self.core.borrow_mut().add_master(name);
        Ok(())
    }

    fn attach_slave(&mut self, slave: DeviceId, master: DeviceId) -> Result<(), TransportError> {
        self.check_open()?;
        self.core.borrow_mut().attach_slave(slave, master)
    }

    fn screen_count(&mut self) -> Result<usize, TransportError> {
        self.check_open()?;
        Ok(self.core.borrow().screen_count())
    }

    fn screen_size(&mut self, screen: usize) -> Result<(u32, u32), TransportError> {
        self.check_open()?;
        let core = self.core.borrow();
        if screen >= core.screen_count() {
            return Err(TransportError::Protocol(ProtocolError::new(
                ProtocolErrorCode::Value,
                "screen_size",
            )));
        }
        Ok(core.screen_size(screen))
    }

    fn root_window(&mut self, screen: usize) -> Result<WindowId, TransportError> {
        self.check_open()?;
        let core = self.core.borrow();
        if screen >= core.screen_count() {
            return Err(TransportError::Protocol(ProtocolError::new(
                ProtocolErrorCode::Value,
                "root_window",
            )));
        }
        Ok(core.root(screen))
    }

    fn sync(&mut self) -> Result<(), TransportError> {
        self.check_open()?;
        let mut core = self.core.borrow_mut();
        let slot = &mut core.sessions[self.session];
        let flushed = std::mem::take(&mut slot.in_flight);
        slot.delivered.extend(flushed);
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<ServerEvent>, TransportError> {
        let mut core = self.core.borrow_mut();
        let slot = &mut core.sessions[self.session];
        if slot.delivered.is_empty() {
            Ok(None)
        } else {
            Ok(Some(slot.delivered.remove(0)))
        }
    }

    fn pending(&mut self) -> Result<usize, TransportError> {
        Ok(self.core.borrow().sessions[self.session].delivered.len())
    }

    fn server_version(&mut self) -> Result<String, TransportError> {
        self.check_open()?;
        Ok(self.core.borrow().options.version.clone())
    }
}

impl Drop for SimTransport {
    fn drop(&mut self) {
        let mut core = self.core.borrow_mut();
        let slot = &mut core.sessions[self.session];
        slot.open = false;
        slot.subscriptions.clear();
        slot.in_flight.clear();
        slot.delivered.clear();
    }
}
