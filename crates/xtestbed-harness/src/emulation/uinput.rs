//! Kernel uinput backend.
//!
//! Provisions a virtual input node through `/dev/uinput` using the legacy
//! `uinput_user_dev` setup path, which every kernel the harness targets
//! supports.  The sequence is: open the control node, declare the event
//! bits from the capability report, write the device record, then
//! `UI_DEV_CREATE`.  The kernel materialises a matching
//! `/dev/input/event*` node which is discovered by name so it can be
//! embedded into the server configuration.
//!
//! Opening `/dev/uinput` requires write access (typically root or an
//! `input`-group udev rule); the failure is reported as a recoverable
//! [`EmulationError::Creation`].

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use xtestbed_core::input::{EventType, RawEvent};
use xtestbed_core::recording::DeviceDescriptor;

use super::{EmulationError, InputNode};

const UINPUT_MAX_NAME_SIZE: usize = 80;
const ABS_CNT: usize = 0x40;

// ioctl request numbers from <linux/uinput.h>.
const UI_DEV_CREATE: u64 = 0x5501;
const UI_DEV_DESTROY: u64 = 0x5502;
const UI_SET_EVBIT: u64 = 0x4004_5564;
const UI_SET_KEYBIT: u64 = 0x4004_5565;
const UI_SET_RELBIT: u64 = 0x4004_5566;
const UI_SET_ABSBIT: u64 = 0x4004_5567;
const UI_SET_MSCBIT: u64 = 0x4004_5568;
const UI_SET_SWBIT: u64 = 0x4004_556d;

/// `EVIOCGNAME(len)` from `<linux/input.h>`.
const fn eviocgname(len: u64) -> u64 {
    (2 << 30) | (len << 16) | (0x45 << 8) | 0x06
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct InputId {
    bustype: u16,
    vendor: u16,
    product: u16,
    version: u16,
}

#[repr(C)]
struct UinputUserDev {
    name: [u8; UINPUT_MAX_NAME_SIZE],
    id: InputId,
    ff_effects_max: u32,
    absmax: [i32; ABS_CNT],
    absmin: [i32; ABS_CNT],
    absfuzz: [i32; ABS_CNT],
    absflat: [i32; ABS_CNT],
}

#[repr(C)]
struct KernelInputEvent {
    time: libc::timeval,
    event_type: u16,
    code: u16,
    value: i32,
}

fn last_os_error() -> String {
    std::io::Error::last_os_error().to_string()
}

fn ioctl_int(fd: RawFd, request: u64, value: i32) -> Result<(), EmulationError> {
    // SAFETY: the request numbers above take an int argument by value.
    let rc = unsafe { libc::ioctl(fd, request as libc::c_ulong, value as libc::c_int) };
    if rc < 0 {
        return Err(EmulationError::Creation(format!(
            "ioctl {request:#x} failed: {}",
            last_os_error()
        )));
    }
    Ok(())
}

/// A kernel-backed virtual input node.
///
/// The node exists for the lifetime of this value; dropping it destroys the
/// kernel device, which the server observes as an unplug.
pub struct UinputNode {
    fd: RawFd,
    node_path: Option<PathBuf>,
}

impl UinputNode {
    /// Provisions a kernel node matching the capability report.
    ///
    /// # Errors
    ///
    /// [`EmulationError::Creation`] when `/dev/uinput` cannot be opened or
    /// the device cannot be registered; recoverable by contract.
    pub fn create(descriptor: &DeviceDescriptor) -> Result<Self, EmulationError> {
        // SAFETY: plain open(2) on a path we control.
        let fd = unsafe {
            libc::open(
                b"/dev/uinput\0".as_ptr().cast(),
                libc::O_WRONLY | libc::O_NONBLOCK,
            )
        };
        if fd < 0 {
            return Err(EmulationError::Creation(format!(
                "cannot open /dev/uinput: {}",
                last_os_error()
            )));
        }

        let node = Self::register(fd, descriptor);
        match node {
            Ok(node_path) => {
                debug!(
                    device = %descriptor.name,
                    node = ?node_path,
                    "uinput node created"
                );
                Ok(Self { fd, node_path })
            }
            Err(e) => {
                // SAFETY: fd came from open above and is not used again.
                unsafe { libc::close(fd) };
                Err(e)
            }
        }
    }

    fn register(
        fd: RawFd,
        descriptor: &DeviceDescriptor,
    ) -> Result<Option<PathBuf>, EmulationError> {
        for event_type in [
            EventType::Key,
            EventType::Relative,
            EventType::Absolute,
            EventType::Misc,
            EventType::Switch,
        ] {
            let codes: Vec<u16> = descriptor.codes_for(event_type).collect();
            if codes.is_empty() {
                continue;
            }
            ioctl_int(fd, UI_SET_EVBIT, event_type as i32)?;
            let set_request = match event_type {
                EventType::Key => UI_SET_KEYBIT,
                EventType::Relative => UI_SET_RELBIT,
                EventType::Absolute => UI_SET_ABSBIT,
                EventType::Misc => UI_SET_MSCBIT,
                EventType::Switch => UI_SET_SWBIT,
                EventType::Synchronization => continue,
            };
            for code in codes {
                ioctl_int(fd, set_request, i32::from(code))?;
            }
        }

        let mut record = UinputUserDev {
            name: [0; UINPUT_MAX_NAME_SIZE],
            id: InputId {
                bustype: descriptor.identity.bus_type,
                vendor: descriptor.identity.vendor,
                product: descriptor.identity.product,
                version: descriptor.identity.version,
            },
            ff_effects_max: 0,
            absmax: [0; ABS_CNT],
            absmin: [0; ABS_CNT],
            absfuzz: [0; ABS_CNT],
            absflat: [0; ABS_CNT],
        };
        let name_bytes = descriptor.name.as_bytes();
        let len = name_bytes.len().min(UINPUT_MAX_NAME_SIZE - 1);
        record.name[..len].copy_from_slice(&name_bytes[..len]);
        for axis in descriptor.codes_for(EventType::Absolute) {
            if let Some(info) = descriptor.abs_info(axis) {
                let axis = axis as usize;
                if axis < ABS_CNT {
                    record.absmin[axis] = info.minimum;
                    record.absmax[axis] = info.maximum;
                    record.absfuzz[axis] = info.fuzz;
                    record.absflat[axis] = info.flat;
                }
            }
        }

        // SAFETY: record is a plain repr(C) struct; write consumes
        // exactly its size.
        let written = unsafe {
            libc::write(
                fd,
                std::ptr::addr_of!(record).cast(),
                std::mem::size_of::<UinputUserDev>(),
            )
        };
        if written != std::mem::size_of::<UinputUserDev>() as isize {
            return Err(EmulationError::Creation(format!(
                "writing device record failed: {}",
                last_os_error()
            )));
        }

        // SAFETY: UI_DEV_CREATE takes no argument.
        let rc = unsafe { libc::ioctl(fd, UI_DEV_CREATE as libc::c_ulong) };
        if rc < 0 {
            return Err(EmulationError::Creation(format!(
                "UI_DEV_CREATE failed: {}",
                last_os_error()
            )));
        }

        Ok(Self::discover_node(&descriptor.name))
    }

    /// Finds the `/dev/input/event*` node the kernel created, by name.
    /// Udev may take a moment to surface it, hence the bounded retry.
    fn discover_node(name: &str) -> Option<PathBuf> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(path) = Self::scan_event_nodes(name) {
                return Some(path);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn scan_event_nodes(name: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir("/dev/input").ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name();
            if !file_name.to_string_lossy().starts_with("event") {
                continue;
            }
            if Self::node_name(&path).as_deref() == Some(name) {
                return Some(path);
            }
        }
        None
    }

    fn node_name(path: &Path) -> Option<String> {
        use std::os::unix::ffi::OsStrExt;
        let mut bytes = path.as_os_str().as_bytes().to_vec();
        bytes.push(0);
        // SAFETY: nul-terminated path buffer, read-only open.
        let fd = unsafe { libc::open(bytes.as_ptr().cast(), libc::O_RDONLY | libc::O_NONBLOCK) };
        if fd < 0 {
            return None;
        }
        let mut buf = [0u8; 256];
        // SAFETY: buf is 256 bytes, matching the request length.
        let rc = unsafe {
            libc::ioctl(
                fd,
                eviocgname(buf.len() as u64) as libc::c_ulong,
                buf.as_mut_ptr(),
            )
        };
        // SAFETY: fd from open above.
        unsafe { libc::close(fd) };
        if rc < 0 {
            return None;
        }
        let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
        Some(String::from_utf8_lossy(&buf[..end]).into_owned())
    }
}

impl InputNode for UinputNode {
    fn emit(&mut self, event: RawEvent) -> Result<(), EmulationError> {
        let record = KernelInputEvent {
            time: libc::timeval {
                tv_sec: 0,
                tv_usec: 0,
            },
            event_type: event.event_type as u16,
            code: event.code,
            value: event.value,
        };
        // SAFETY: record is a plain repr(C) struct; write consumes exactly
        // its size.
        let written = unsafe {
            libc::write(
                self.fd,
                std::ptr::addr_of!(record).cast(),
                std::mem::size_of::<KernelInputEvent>(),
            )
        };
        if written != std::mem::size_of::<KernelInputEvent>() as isize {
            return Err(EmulationError::Io(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    fn node_path(&self) -> Option<&Path> {
        self.node_path.as_deref()
    }
}

impl Drop for UinputNode {
    fn drop(&mut self) {
        // SAFETY: fd is owned; destroying an already-gone device is
        // harmless.
        unsafe {
            libc::ioctl(self.fd, UI_DEV_DESTROY as libc::c_ulong);
            libc::close(self.fd);
        }
    }
}
