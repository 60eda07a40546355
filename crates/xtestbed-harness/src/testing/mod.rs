//! Testing infrastructure for the harness itself.
//!
//! This module provides everything needed to exercise the full harness
//! (lifecycle, sessions, waits, resolution, injection) without a display
//! server or uinput access.
//!
//! # Architecture
//!
//! 1. **SimServer**: an in-process server implementing the transport trait
//!    with real input-stack semantics (frame processing, acceleration,
//!    transforms, touch emulation, barriers, screen crossing).
//!
//! 2. **TestFixture**: the composition-style scenario entry point: one
//!    options struct in, a started instance plus negotiated session out.
//!
//! 3. **ScriptedTransport**: a bare queue transport for unit-testing the
//!    wait engine's flush and deadline mechanics in isolation.
//!
//! # Example
//!
//! ```no_run
//! use xtestbed_harness::testing::{FixtureOptions, TestFixture};
//! use xtestbed_core::recording::DeviceDescriptor;
//!
//! let mut options = FixtureOptions::default();
//! options.devices.push(DeviceDescriptor::usb_optical_mouse());
//! let mut fixture = TestFixture::start(options).unwrap();
//! let resolution = fixture.session_mut().find_device("USB OPTICAL MOUSE").unwrap();
//! assert!(!resolution.is_ambiguous());
//! ```

mod fixture;
pub mod scripted;
mod sim;

pub use fixture::{FixtureOptions, TestFixture};
pub use sim::{SimOptions, SimRuntime, SimServer};
