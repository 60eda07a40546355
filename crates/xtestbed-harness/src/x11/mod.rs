//! Live-server transport over xlib/XInput2/XFixes.
//!
//! Only compiled with the `x11-backend` feature: it links the X client
//! libraries and talks to a real display.  The translation layer is thin:
//! the protocol model in `xtestbed-core` was shaped after XInput2, so most
//! of this module is marshalling C structs.
//!
//! xlib reports request errors asynchronously through a process-global
//! handler.  The handler here only records the error code; each request
//! path synchronizes and drains the record, converting the first entry into
//! a [`TransportError::Protocol`], which is what keeps the session-level
//! scoped error trap working against a live server.

use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uchar, c_ulong};
use std::sync::Mutex;

use x11::xinput2;
use x11::xlib;

use xtestbed_core::protocol::{
    crossing, Capabilities, DeviceId, DeviceInfo, DeviceScope, DeviceUse, EventKind,
    ExtensionInfo, PropertyValue, ProtocolError, ProtocolErrorCode, ServerEvent, WindowId,
};

use crate::transport::{BarrierId, BarrierSegment, ServerTransport, TransportError};

// XFixes pointer barriers; the x11 crate links libXfixes for us.
extern "C" {
    fn XFixesQueryExtension(
        dpy: *mut xlib::Display,
        event_base: *mut c_int,
        error_base: *mut c_int,
    ) -> c_int;
    fn XFixesCreatePointerBarrier(
        dpy: *mut xlib::Display,
        window: xlib::Window,
        x1: c_int,
        y1: c_int,
        x2: c_int,
        y2: c_int,
        directions: c_int,
        num_devices: c_int,
        devices: *mut c_int,
    ) -> c_ulong;
    fn XFixesDestroyPointerBarrier(dpy: *mut xlib::Display, barrier: c_ulong);
}

/// Error codes recorded by the global xlib handler, drained per request.
static TRAPPED_ERRORS: Mutex<Vec<u8>> = Mutex::new(Vec::new());

extern "C" fn record_error(
    _dpy: *mut xlib::Display,
    event: *mut xlib::XErrorEvent,
) -> c_int {
    // SAFETY: xlib hands us a valid event for the duration of the call.
    let code = unsafe { (*event).error_code };
    if let Ok(mut errors) = TRAPPED_ERRORS.lock() {
        errors.push(code);
    }
    0
}

fn map_error_code(code: u8) -> ProtocolErrorCode {
    match code {
        2 => ProtocolErrorCode::Value,
        3 => ProtocolErrorCode::Window,
        8 => ProtocolErrorCode::Match,
        10 => ProtocolErrorCode::Access,
        17 => ProtocolErrorCode::Implementation,
        // Extension errors (BadDevice and friends) sit above the core
        // range.
        _ => ProtocolErrorCode::Device,
    }
}

/// A connection to a live X server.
pub struct X11Transport {
    display: *mut xlib::Display,
    default_screen: usize,
    xi_opcode: c_int,
    queue: VecDeque<ServerEvent>,
}

impl X11Transport {
    /// Opens a connection to `:{display}.{screen}`.
    ///
    /// # Errors
    ///
    /// [`TransportError::ConnectionLost`] when the server refuses the
    /// connection; the lifecycle manager treats that as "not ready yet".
    pub fn connect(display: u32, screen: usize) -> Result<Self, TransportError> {
        let name = CString::new(format!(":{display}.{screen}"))
            .map_err(|_| TransportError::ConnectionLost("bad display string".into()))?;
        // SAFETY: name is a valid C string; a null return is handled.
        let dpy = unsafe { xlib::XOpenDisplay(name.as_ptr()) };
        if dpy.is_null() {
            return Err(TransportError::ConnectionLost(format!(
                "cannot open display :{display}"
            )));
        }
        // SAFETY: installing the recording handler; xlib keeps it global.
        unsafe { xlib::XSetErrorHandler(Some(record_error)) };
        Ok(Self {
            display: dpy,
            default_screen: screen,
            xi_opcode: -1,
            queue: VecDeque::new(),
        })
    }

    /// Synchronizes and surfaces the first error xlib recorded, if any.
    fn check_errors(&mut self, request: &'static str) -> Result<(), TransportError> {
        // SAFETY: display is open for the lifetime of self.
        unsafe { xlib::XSync(self.display, xlib::False) };
        let mut errors = TRAPPED_ERRORS
            .lock()
            .map_err(|_| TransportError::ConnectionLost("error trap poisoned".into()))?;
        if let Some(code) = errors.first().copied() {
            errors.clear();
            return Err(TransportError::Protocol(ProtocolError::new(
                map_error_code(code),
                request,
            )));
        }
        Ok(())
    }

    fn screen_of_root(&self, root: xlib::Window) -> usize {
        // SAFETY: read-only queries on an open display.
        unsafe {
            let count = xlib::XScreenCount(self.display);
            for screen in 0..count {
                if xlib::XRootWindow(self.display, screen) == root {
                    return screen as usize;
                }
            }
        }
        self.default_screen
    }

    fn intern(&self, name: &str) -> xlib::Atom {
        let name = CString::new(name).unwrap_or_default();
        // SAFETY: name is a valid C string.
        unsafe { xlib::XInternAtom(self.display, name.as_ptr(), xlib::False) }
    }

    /// Pulls every event xlib has locally queued into our typed queue.
    fn drain_xlib_queue(&mut self) {
        // SAFETY: standard xlib event pump on an open display.
        unsafe {
            while xlib::XPending(self.display) > 0 {
                let mut event: xlib::XEvent = std::mem::zeroed();
                xlib::XNextEvent(self.display, &mut event);
                if let Some(translated) = self.translate(&mut event) {
                    self.queue.push_back(translated);
                }
            }
        }
    }

    unsafe fn translate(&mut self, event: &mut xlib::XEvent) -> Option<ServerEvent> {
        let kind = event.get_type();
        match kind {
            xlib::KeyPress | xlib::KeyRelease => {
                let key = event.key;
                Some(ServerEvent {
                    kind: if kind == xlib::KeyPress {
                        EventKind::CoreKeyPress
                    } else {
                        EventKind::CoreKeyRelease
                    },
                    extension_opcode: None,
                    device: 0,
                    source: 0,
                    detail: key.keycode,
                    root_x: f64::from(key.x_root),
                    root_y: f64::from(key.y_root),
                    screen: self.screen_of_root(key.root),
                    buttons: u32::from(key.state),
                    emulated: false,
                })
            }
            xlib::ButtonPress | xlib::ButtonRelease => {
                let button = event.button;
                Some(ServerEvent {
                    kind: if kind == xlib::ButtonPress {
                        EventKind::CoreButtonPress
                    } else {
                        EventKind::CoreButtonRelease
                    },
                    extension_opcode: None,
                    device: 0,
                    source: 0,
                    detail: button.button,
                    root_x: f64::from(button.x_root),
                    root_y: f64::from(button.y_root),
                    screen: self.screen_of_root(button.root),
                    buttons: u32::from(button.state),
                    emulated: false,
                })
            }
            xlib::MotionNotify => {
                let motion = event.motion;
                Some(ServerEvent {
                    kind: EventKind::CoreMotion,
                    extension_opcode: None,
                    device: 0,
                    source: 0,
                    detail: 0,
                    root_x: f64::from(motion.x_root),
                    root_y: f64::from(motion.y_root),
                    screen: self.screen_of_root(motion.root),
                    buttons: u32::from(motion.state),
                    emulated: false,
                })
            }
            xlib::EnterNotify | xlib::LeaveNotify => {
                let cross = event.crossing;
                Some(ServerEvent {
                    kind: if kind == xlib::EnterNotify {
                        EventKind::Enter
                    } else {
                        EventKind::Leave
                    },
                    extension_opcode: None,
                    device: 0,
                    source: 0,
                    detail: cross.detail as u32,
                    root_x: f64::from(cross.x_root),
                    root_y: f64::from(cross.y_root),
                    screen: self.screen_of_root(cross.root),
                    buttons: u32::from(cross.state),
                    emulated: false,
                })
            }
            xlib::GenericEvent => self.translate_generic(event),
            _ => None,
        }
    }

    unsafe fn translate_generic(&mut self, event: &mut xlib::XEvent) -> Option<ServerEvent> {
        let cookie = &mut event.generic_event_cookie;
        if cookie.extension != self.xi_opcode {
            return None;
        }
        if xlib::XGetEventData(self.display, cookie) == 0 {
            return None;
        }
        let opcode = self.xi_opcode as u8;
        let translated = match cookie.evtype {
            xinput2::XI_HierarchyChanged => {
                let hierarchy = &*(cookie.data as *const xinput2::XIHierarchyEvent);
                Some(ServerEvent {
                    kind: EventKind::HierarchyChanged,
                    extension_opcode: Some(opcode),
                    device: 0,
                    source: 0,
                    // The XI2 flag values match the model's hierarchy
                    // constants bit for bit.
                    detail: hierarchy.flags as u32,
                    root_x: 0.0,
                    root_y: 0.0,
                    screen: self.default_screen,
                    buttons: 0,
                    emulated: false,
                })
            }
            xinput2::XI_PropertyEvent => {
                let property = &*(cookie.data as *const xinput2::XIPropertyEvent);
                Some(ServerEvent {
                    kind: EventKind::PropertyChanged,
                    extension_opcode: Some(opcode),
                    device: property.deviceid as DeviceId,
                    source: property.deviceid as DeviceId,
                    detail: 0,
                    root_x: 0.0,
                    root_y: 0.0,
                    screen: self.default_screen,
                    buttons: 0,
                    emulated: false,
                })
            }
            evtype => {
                let kind = match evtype {
                    xinput2::XI_KeyPress => Some(EventKind::KeyPress),
                    xinput2::XI_KeyRelease => Some(EventKind::KeyRelease),
                    xinput2::XI_ButtonPress => Some(EventKind::ButtonPress),
                    xinput2::XI_ButtonRelease => Some(EventKind::ButtonRelease),
                    xinput2::XI_Motion => Some(EventKind::Motion),
                    xinput2::XI_TouchBegin => Some(EventKind::TouchBegin),
                    xinput2::XI_TouchUpdate => Some(EventKind::TouchUpdate),
                    xinput2::XI_TouchEnd => Some(EventKind::TouchEnd),
                    xinput2::XI_BarrierHit => Some(EventKind::BarrierHit),
                    xinput2::XI_BarrierLeave => Some(EventKind::BarrierLeave),
                    _ => None,
                };
                kind.map(|kind| {
                    let device = &*(cookie.data as *const xinput2::XIDeviceEvent);
                    let mut buttons = 0u32;
                    let mask_len = device.buttons.mask_len.max(0) as usize;
                    for i in 0..(mask_len * 8).min(32) {
                        let byte = *device.buttons.mask.add(i / 8);
                        if byte & (1 << (i % 8)) != 0 {
                            buttons |= 1 << i;
                        }
                    }
                    ServerEvent {
                        kind,
                        extension_opcode: Some(opcode),
                        device: device.deviceid as DeviceId,
                        source: device.sourceid as DeviceId,
                        detail: device.detail as u32,
                        root_x: device.root_x,
                        root_y: device.root_y,
                        screen: self.screen_of_root(device.root),
                        buttons,
                        emulated: device.flags & xinput2::XIPointerEmulated != 0,
                    }
                })
            }
        };
        xlib::XFreeEventData(self.display, cookie);
        translated
    }
}

fn xi_event_bit(kind: EventKind) -> Option<c_int> {
    match kind {
        EventKind::KeyPress => Some(xinput2::XI_KeyPress),
        EventKind::KeyRelease => Some(xinput2::XI_KeyRelease),
        EventKind::ButtonPress => Some(xinput2::XI_ButtonPress),
        EventKind::ButtonRelease => Some(xinput2::XI_ButtonRelease),
        EventKind::Motion => Some(xinput2::XI_Motion),
        EventKind::TouchBegin => Some(xinput2::XI_TouchBegin),
        EventKind::TouchUpdate => Some(xinput2::XI_TouchUpdate),
        EventKind::TouchEnd => Some(xinput2::XI_TouchEnd),
        EventKind::HierarchyChanged => Some(xinput2::XI_HierarchyChanged),
        EventKind::PropertyChanged => Some(xinput2::XI_PropertyEvent),
        EventKind::BarrierHit => Some(xinput2::XI_BarrierHit),
        EventKind::BarrierLeave => Some(xinput2::XI_BarrierLeave),
        _ => None,
    }
}

fn core_event_mask(kinds: &[EventKind]) -> std::os::raw::c_long {
    let mut mask = 0 as std::os::raw::c_long;
    for kind in kinds {
        mask |= match kind {
            EventKind::CoreMotion => xlib::PointerMotionMask,
            EventKind::CoreButtonPress => xlib::ButtonPressMask,
            EventKind::CoreButtonRelease => xlib::ButtonReleaseMask,
            EventKind::CoreKeyPress => xlib::KeyPressMask,
            EventKind::CoreKeyRelease => xlib::KeyReleaseMask,
            EventKind::Enter => xlib::EnterWindowMask,
            EventKind::Leave => xlib::LeaveWindowMask,
            _ => 0,
        };
    }
    mask
}

impl ServerTransport for X11Transport {
    fn query_extension(&mut self, name: &str) -> Result<Option<ExtensionInfo>, TransportError> {
        let c_name = CString::new(name)
            .map_err(|_| TransportError::ConnectionLost("bad extension name".into()))?;
        let (mut opcode, mut event_base, mut error_base) = (0, 0, 0);
        // SAFETY: out-params are valid for the call.
        let present = unsafe {
            xlib::XQueryExtension(
                self.display,
                c_name.as_ptr(),
                &mut opcode,
                &mut event_base,
                &mut error_base,
            )
        };
        self.check_errors("query_extension")?;
        if present == 0 {
            return Ok(None);
        }
        if name == crate::transport::INPUT_EXTENSION {
            self.xi_opcode = opcode;
        }
        Ok(Some(ExtensionInfo {
            opcode: opcode as u8,
            event_base: event_base as u8,
            error_base: error_base as u8,
        }))
    }

    fn negotiate_version(
        &mut self,
        major: u16,
        minor: u16,
    ) -> Result<(u16, u16), TransportError> {
        let mut major = c_int::from(major);
        let mut minor = c_int::from(minor);
        // SAFETY: in-out version negotiation on an open display.
        unsafe { xinput2::XIQueryVersion(self.display, &mut major, &mut minor) };
        self.check_errors("negotiate_version")?;
        Ok((major as u16, minor as u16))
    }

    fn select_events(
        &mut self,
        window: WindowId,
        scope: DeviceScope,
        kinds: &[EventKind],
    ) -> Result<(), TransportError> {
        let core_mask = core_event_mask(kinds);
        if core_mask != 0 {
            // SAFETY: standard mask selection on a window we were handed.
            unsafe { xlib::XSelectInput(self.display, window as xlib::Window, core_mask) };
        }

        let bits: Vec<c_int> = kinds.iter().filter_map(|k| xi_event_bit(*k)).collect();
        if !bits.is_empty() {
            let deviceid = match scope {
                DeviceScope::AllDevices => xinput2::XIAllDevices,
                DeviceScope::AllMasterDevices => xinput2::XIAllMasterDevices,
                DeviceScope::Device(id) => c_int::from(id),
            };
            let max_bit = bits.iter().copied().max().unwrap_or(0) as usize;
            let mut mask = vec![0u8; max_bit / 8 + 1];
            for bit in bits {
                mask[bit as usize / 8] |= 1 << (bit as usize % 8);
            }
            let mut event_mask = xinput2::XIEventMask {
                deviceid,
                mask_len: mask.len() as c_int,
                mask: mask.as_mut_ptr(),
            };
            // SAFETY: event_mask points at a live buffer for the call.
            unsafe {
                xinput2::XISelectEvents(self.display, window as xlib::Window, &mut event_mask, 1)
            };
        }
        self.check_errors("select_events")
    }

    fn query_devices(&mut self) -> Result<Vec<DeviceInfo>, TransportError> {
        let mut count = 0;
        // SAFETY: the returned array is freed with XIFreeDeviceInfo below.
        let info =
            unsafe { xinput2::XIQueryDevice(self.display, xinput2::XIAllDevices, &mut count) };
        self.check_errors("query_devices")?;
        if info.is_null() {
            return Ok(Vec::new());
        }
        let mut devices = Vec::with_capacity(count.max(0) as usize);
        // SAFETY: count entries as reported by xlib.
        unsafe {
            for i in 0..count as usize {
                let entry = &*info.add(i);
                let name = CStr::from_ptr(entry.name as *const c_char)
                    .to_string_lossy()
                    .into_owned();
                let device_use = match entry._use {
                    xinput2::XIMasterPointer => DeviceUse::MasterPointer,
                    xinput2::XIMasterKeyboard => DeviceUse::MasterKeyboard,
                    xinput2::XISlavePointer => DeviceUse::SlavePointer,
                    xinput2::XISlaveKeyboard => DeviceUse::SlaveKeyboard,
                    _ => DeviceUse::FloatingSlave,
                };
                let mut capabilities = Capabilities {
                    pointer: matches!(
                        device_use,
                        DeviceUse::MasterPointer | DeviceUse::SlavePointer
                    ),
                    keyboard: matches!(
                        device_use,
                        DeviceUse::MasterKeyboard | DeviceUse::SlaveKeyboard
                    ),
                    ..Capabilities::default()
                };
                for c in 0..entry.num_classes as usize {
                    let class = *entry.classes.add(c);
                    if (*class)._type == xinput2::XITouchClass {
                        capabilities.touch = true;
                    }
                }
                devices.push(DeviceInfo {
                    id: entry.deviceid as DeviceId,
                    name,
                    device_use,
                    attachment: entry.attachment as DeviceId,
                    enabled: entry.enabled != 0,
                    capabilities,
                });
            }
            xinput2::XIFreeDeviceInfo(info);
        }
        Ok(devices)
    }

    fn query_pointer(&mut self, device: DeviceId) -> Result<(f64, f64), TransportError> {
        let root =
            // SAFETY: read-only root lookup.
            unsafe { xlib::XRootWindow(self.display, self.default_screen as c_int) };
        let (mut root_ret, mut child_ret) = (0 as xlib::Window, 0 as xlib::Window);
        let (mut root_x, mut root_y, mut win_x, mut win_y) = (0.0, 0.0, 0.0, 0.0);
        let mut buttons = xinput2::XIButtonState {
            mask_len: 0,
            mask: std::ptr::null_mut(),
        };
        let mut mods = xinput2::XIModifierState {
            base: 0,
            latched: 0,
            locked: 0,
            effective: 0,
        };
        let mut group = xinput2::XIGroupState {
            base: 0,
            latched: 0,
            locked: 0,
            effective: 0,
        };
        // SAFETY: all out-params valid for the call.
        unsafe {
            xinput2::XIQueryPointer(
                self.display,
                c_int::from(device),
                root,
                &mut root_ret,
                &mut child_ret,
                &mut root_x,
                &mut root_y,
                &mut win_x,
                &mut win_y,
                &mut buttons,
                &mut mods,
                &mut group,
            );
            if !buttons.mask.is_null() {
                xlib::XFree(buttons.mask.cast());
            }
        }
        self.check_errors("query_pointer")?;
        Ok((root_x.floor(), root_y.floor()))
    }

    fn warp_pointer(
        &mut self,
        device: DeviceId,
        screen: usize,
        x: f64,
        y: f64,
    ) -> Result<(), TransportError> {
        // SAFETY: warp to the given screen's root.
        unsafe {
            let root = xlib::XRootWindow(self.display, screen as c_int);
            xinput2::XIWarpPointer(
                self.display,
                c_int::from(device),
                0,
                root,
                0.0,
                0.0,
                0,
                0,
                x,
                y,
            );
        }
        self.check_errors("warp_pointer")
    }

    fn change_property(
        &mut self,
        device: DeviceId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), TransportError> {
        let property = self.intern(name);
        // SAFETY: data buffers live across the call; lengths are exact.
        unsafe {
            match &value {
                PropertyValue::Integers(values) => {
                    xinput2::XIChangeProperty(
                        self.display,
                        c_int::from(device),
                        property,
                        xlib::XA_INTEGER,
                        32,
                        xlib::PropModeReplace,
                        values.as_ptr() as *mut c_uchar,
                        values.len() as c_int,
                    );
                }
                PropertyValue::Floats(values) => {
                    let float_atom = self.intern("FLOAT");
                    xinput2::XIChangeProperty(
                        self.display,
                        c_int::from(device),
                        property,
                        float_atom,
                        32,
                        xlib::PropModeReplace,
                        values.as_ptr() as *mut c_uchar,
                        values.len() as c_int,
                    );
                }
                PropertyValue::Text(text) => {
                    xinput2::XIChangeProperty(
                        self.display,
                        c_int::from(device),
                        property,
                        xlib::XA_STRING,
                        8,
                        xlib::PropModeReplace,
                        text.as_ptr() as *mut c_uchar,
                        text.len() as c_int,
                    );
                }
            }
        }
        self.check_errors("change_property")
    }

    fn get_property(
        &mut self,
        device: DeviceId,
        name: &str,
    ) -> Result<Option<PropertyValue>, TransportError> {
        let property = self.intern(name);
        let float_atom = self.intern("FLOAT");
        let mut type_ret: xlib::Atom = 0;
        let mut format_ret: c_int = 0;
        let mut num_items: c_ulong = 0;
        let mut bytes_after: c_ulong = 0;
        let mut data: *mut c_uchar = std::ptr::null_mut();
        // SAFETY: out-params valid; data freed below.
        let status = unsafe {
            xinput2::XIGetProperty(
                self.display,
                c_int::from(device),
                property,
                0,
                256,
                xlib::False,
                xlib::AnyPropertyType as xlib::Atom,
                &mut type_ret,
                &mut format_ret,
                &mut num_items,
                &mut bytes_after,
                &mut data,
            )
        };
        self.check_errors("get_property")?;
        if status != xlib::Success as c_int || data.is_null() || num_items == 0 {
            return Ok(None);
        }
        let count = num_items as usize;
        // SAFETY: xlib allocated `count` items of the reported format.
        let value = unsafe {
            let value = if type_ret == float_atom && format_ret == 32 {
                let slice = std::slice::from_raw_parts(data as *const f32, count);
                Some(PropertyValue::Floats(slice.to_vec()))
            } else if format_ret == 32 {
                let slice = std::slice::from_raw_parts(data as *const i32, count);
                Some(PropertyValue::Integers(slice.to_vec()))
            } else if format_ret == 8 {
                let slice = std::slice::from_raw_parts(data, count);
                Some(PropertyValue::Text(
                    String::from_utf8_lossy(slice).into_owned(),
                ))
            } else {
                None
            };
            xlib::XFree(data.cast());
            value
        };
        Ok(value)
    }

    fn create_barrier(
        &mut self,
        segment: BarrierSegment,
        masters: &[DeviceId],
    ) -> Result<BarrierId, TransportError> {
        let mut fixes_event = 0;
        let mut fixes_error = 0;
        // SAFETY: presence probe with valid out-params.
        let present =
            unsafe { XFixesQueryExtension(self.display, &mut fixes_event, &mut fixes_error) };
        if present == 0 {
            return Err(TransportError::Unsupported("server lacks XFixes"));
        }
        let mut devices: Vec<c_int> = masters.iter().map(|d| c_int::from(*d)).collect();
        // SAFETY: device list valid for the call.
        let barrier = unsafe {
            let root = xlib::XRootWindow(self.display, self.default_screen as c_int);
            XFixesCreatePointerBarrier(
                self.display,
                root,
                segment.x1,
                segment.y1,
                segment.x2,
                segment.y2,
                segment.allow as c_int,
                devices.len() as c_int,
                devices.as_mut_ptr(),
            )
        };
        self.check_errors("create_barrier")?;
        Ok(barrier as BarrierId)
    }

    fn destroy_barrier(&mut self, id: BarrierId) -> Result<(), TransportError> {
        // SAFETY: destroying a barrier id previously returned by the server.
        unsafe { XFixesDestroyPointerBarrier(self.display, c_ulong::from(id)) };
        self.check_errors("destroy_barrier")
    }

    fn add_master(&mut self, name: &str) -> Result<(), TransportError> {
        let c_name = CString::new(name)
            .map_err(|_| TransportError::ConnectionLost("bad master name".into()))?;
        let mut add = xinput2::XIAddMasterInfo {
            _type: xinput2::XIAddMaster,
            name: c_name.as_ptr() as *mut c_char,
            send_core: xlib::False,
            enable: xlib::True,
        };
        // SAFETY: with one change the add-info struct stands in for the
        // hierarchy-change union.
        unsafe {
            xinput2::XIChangeHierarchy(
                self.display,
                &mut add as *mut xinput2::XIAddMasterInfo
                    as *mut xinput2::XIAnyHierarchyChangeInfo,
                1,
            );
        }
        self.check_errors("add_master")
    }

    fn attach_slave(&mut self, slave: DeviceId, master: DeviceId) -> Result<(), TransportError> {
        let mut attach = xinput2::XIAttachSlaveInfo {
            _type: xinput2::XIAttachSlave,
            deviceid: c_int::from(slave),
            new_master: c_int::from(master),
        };
        // SAFETY: as in add_master.
        unsafe {
            xinput2::XIChangeHierarchy(
                self.display,
                &mut attach as *mut xinput2::XIAttachSlaveInfo
                    as *mut xinput2::XIAnyHierarchyChangeInfo,
                1,
            );
        }
        self.check_errors("attach_slave")
    }

    fn screen_count(&mut self) -> Result<usize, TransportError> {
        // SAFETY: read-only query.
        Ok(unsafe { xlib::XScreenCount(self.display) } as usize)
    }

    fn screen_size(&mut self, screen: usize) -> Result<(u32, u32), TransportError> {
        // SAFETY: read-only queries.
        unsafe {
            let width = xlib::XDisplayWidth(self.display, screen as c_int);
            let height = xlib::XDisplayHeight(self.display, screen as c_int);
            Ok((width as u32, height as u32))
        }
    }

    fn root_window(&mut self, screen: usize) -> Result<WindowId, TransportError> {
        // SAFETY: read-only query.
        Ok(unsafe { xlib::XRootWindow(self.display, screen as c_int) } as WindowId)
    }

    fn sync(&mut self) -> Result<(), TransportError> {
        // SAFETY: round-trip on an open display.
        unsafe { xlib::XSync(self.display, xlib::False) };
        self.drain_xlib_queue();
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<ServerEvent>, TransportError> {
        if self.queue.is_empty() {
            self.drain_xlib_queue();
        }
        Ok(self.queue.pop_front())
    }

    fn pending(&mut self) -> Result<usize, TransportError> {
        self.drain_xlib_queue();
        Ok(self.queue.len())
    }

    fn server_version(&mut self) -> Result<String, TransportError> {
        // SAFETY: read-only queries; the vendor string belongs to xlib.
        unsafe {
            let vendor = CStr::from_ptr(xlib::XServerVendor(self.display))
                .to_string_lossy()
                .into_owned();
            let release = xlib::XVendorRelease(self.display);
            Ok(format!("{vendor} {release}"))
        }
    }
}

impl Drop for X11Transport {
    fn drop(&mut self) {
        // SAFETY: display was opened by connect and not closed elsewhere.
        unsafe { xlib::XCloseDisplay(self.display) };
    }
}

// Crossing detail constants from the core protocol are the xlib values;
// keep the assertion close to the translation that relies on it.
const _: () = {
    assert!(crossing::NONLINEAR == xlib::NotifyNonlinear as u32);
};
