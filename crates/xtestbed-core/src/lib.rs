//! # xtestbed-core
//!
//! Shared library for the xtestbed harness containing the raw input event
//! vocabulary, recorded-device formats, the abstract protocol event model,
//! and coordinate geometry.
//!
//! This crate is used by the harness and by scenario test suites.
//! It has zero dependencies on OS APIs, processes, or sockets.
//!
//! # Architecture overview
//!
//! The harness drives a windowing/input server from the outside: it creates
//! virtual input devices, replays recorded hardware events into them, and
//! observes the protocol events the server emits in response.  This crate is
//! the vocabulary both sides share:
//!
//! - **`input`** – The kernel-level event model: (type, code, value) tuples
//!   as emitted by evdev-class input hardware, plus the code constants the
//!   recordings reference.
//!
//! - **`recording`** – Parsers for the on-disk recording formats: device
//!   capability descriptions and time-ordered event transcripts.
//!
//! - **`protocol`** – The server-side event model: devices, event kinds,
//!   subscriptions, and the events a client connection observes.  This is an
//!   abstraction over the wire protocol, not a reimplementation of it.
//!
//! - **`geometry`** – Coordinate transforms and screen rectangles used to
//!   compute expected pointer positions.

pub mod geometry;
pub mod input;
pub mod protocol;
pub mod recording;

// Re-export the most-used types at the crate root so callers can write
// `xtestbed_core::RawEvent` instead of `xtestbed_core::input::RawEvent`.
pub use geometry::{ScreenRect, Transform};
pub use input::{EventType, RawEvent};
pub use protocol::{
    DeviceId, DeviceInfo, DeviceScope, DeviceUse, EventKind, ExtensionInfo, ProtocolError,
    ProtocolErrorCode, ServerEvent,
};
pub use recording::{DeviceDescriptor, EventScript, RecordingError};
