//! # xtestbed-harness
//!
//! The synchronization and assertion engine for driving a live
//! windowing/input server end-to-end: bring a server to a verified-ready
//! state, replay recorded input through emulated device nodes, and assert
//! on the protocol event stream within bounded time.
//!
//! # Architecture
//!
//! ```text
//! ServerConfig ──▶ ServerInstance::start()       (lifecycle, readiness poll)
//!                        │
//!                        ▼ connect()
//!                  ProtocolSession ◀──────────── ServerTransport (seam)
//!                   │         │                    ├─ X11Transport  (live)
//!                   │         │                    └─ SimServer     (tests)
//!      wait engine ─┘         └─ resolver
//!                        ▲
//!  EmulatedDevice ───────┘ events observed after injection
//!        └─ InputNode (seam): UinputNode (kernel) / SimNode (tests)
//! ```
//!
//! Determinism over an asynchronous multi-process system comes from two
//! rules enforced across this crate: every blocking wait carries an
//! explicit deadline, and a session's queue is only sampled after a
//! synchronization round-trip on that same session.

pub mod config;
pub mod emulation;
pub mod resolver;
pub mod server;
pub mod session;
pub mod settings;
pub mod testing;
pub mod transport;
pub mod wait;

#[cfg(target_os = "linux")]
pub mod runtime;

#[cfg(all(target_os = "linux", feature = "x11-backend"))]
pub mod x11;

// Re-export the types a scenario touches on nearly every line.
pub use config::{ConfigError, ScreenArrangement, ServerConfig};
pub use emulation::{EmulatedDevice, EmulationError, InputNode, TimingMode};
pub use resolver::{Resolution, ResolveError};
pub use server::{FailureWitness, Readiness, ServerInstance, ServerRuntime, SpawnError};
pub use session::{ProtocolSession, SessionError};
pub use settings::{HarnessSettings, SettingsError};
pub use transport::{BarrierId, BarrierSegment, ServerTransport, TransportError};
pub use wait::WaitError;

use thiserror::Error;

/// Top-level error taxonomy: every failure a scenario can hit, in one type.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Emulation(#[from] EmulationError),
    #[error(transparent)]
    Wait(#[from] WaitError),
    #[error(transparent)]
    Recording(#[from] xtestbed_core::recording::RecordingError),
}

impl HarnessError {
    /// `true` for failures a scenario may legitimately skip on instead of
    /// failing: provisioning a device node needs privileges the
    /// environment may not have.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            HarnessError::Emulation(EmulationError::Creation(_))
        )
    }
}
