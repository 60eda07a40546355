//! Abstract protocol model.
//!
//! The harness observes the server through a narrow slice of the wire
//! protocol: device enumeration, event selection, pointer queries, property
//! access, and the event stream itself.  This module models exactly that
//! slice as plain Rust types; transports translate it to and from whatever
//! the server actually speaks.

mod device;
mod events;

pub use device::{Capabilities, DeviceInfo, DeviceScope, DeviceUse};
pub use events::{crossing, hierarchy, EventKind, EventPredicate, ServerEvent};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies an input device on one server instance.
///
/// Identifiers are reused by the server after device removal; resolve names
/// freshly after every hierarchy change instead of caching.
pub type DeviceId = u16;

/// Identifies a window on one server instance.
pub type WindowId = u32;

/// Device id of the built-in core pointer.
pub const CORE_POINTER: DeviceId = 2;

/// Device id of the built-in core keyboard.
pub const CORE_KEYBOARD: DeviceId = 3;

/// Negotiated context of the input extension on one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    /// Major opcode assigned to the extension by the server.
    pub opcode: u8,
    /// First event code owned by the extension.
    pub event_base: u8,
    /// First error code owned by the extension.
    pub error_base: u8,
}

/// Error codes a server may answer a request with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolErrorCode {
    /// The resource is already claimed by another client (BadAccess).
    Access,
    /// A request parameter is out of range (BadValue).
    Value,
    /// The referenced window does not exist (BadWindow).
    Window,
    /// The referenced device does not exist (BadDevice).
    Device,
    /// The request does not apply to the referenced resource (BadMatch).
    Match,
    /// The server failed internally (BadImplementation).
    Implementation,
}

/// A server-returned error in response to a harness action.
///
/// Expected in negative-test scenarios; captured via the session's scoped
/// error trap rather than aborting the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("protocol error {code:?} in response to {request}")]
pub struct ProtocolError {
    /// The error code.
    pub code: ProtocolErrorCode,
    /// The request that triggered it, for diagnostics.
    pub request: String,
}

impl ProtocolError {
    pub fn new(code: ProtocolErrorCode, request: impl Into<String>) -> Self {
        Self {
            code,
            request: request.into(),
        }
    }
}

/// Device property names the harness reads or writes.
pub mod properties {
    /// 3×3 row-major coordinate transformation matrix (float).
    pub const TRANSFORM_MATRIX: &str = "Coordinate Transformation Matrix";
    /// Pointer acceleration profile; `-1` disables acceleration.
    pub const ACCEL_PROFILE: &str = "Device Accel Profile";
    /// Constant deceleration divisor applied to relative deltas.
    pub const CONSTANT_DECELERATION: &str = "Device Accel Constant Deceleration";
    /// Kernel device node backing the server device (string).
    pub const DEVICE_NODE: &str = "Device Node";
    /// Whether the device delivers events (integer 0/1).
    pub const DEVICE_ENABLED: &str = "Device Enabled";
}

/// A typed device property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Integers(Vec<i32>),
    Floats(Vec<f32>),
    Text(String),
}

impl PropertyValue {
    /// Single-integer accessor.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            PropertyValue::Integers(v) if v.len() == 1 => Some(v[0]),
            _ => None,
        }
    }

    /// Float-slice accessor.
    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            PropertyValue::Floats(v) => Some(v),
            _ => None,
        }
    }

    /// Text accessor.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }
}
