//! The transport seam between the harness and a running server.
//!
//! Everything the harness does to a server goes through [`ServerTransport`]:
//! the live X11 backend (feature `x11-backend`) translates these calls to
//! the wire protocol, and the simulated server in [`crate::testing`]
//! implements them in-process.  The harness core never talks to a socket
//! directly, which is what makes every assertion testable without a display.
//!
//! Transports are deliberately synchronous and non-blocking on the event
//! side: [`ServerTransport::poll_event`] returns what has already been
//! flushed to this connection, and [`ServerTransport::sync`] performs the
//! round-trip that forces the server to flush.  All blocking-with-deadline
//! logic lives in the wait engine on top.

use thiserror::Error;

use xtestbed_core::protocol::{
    DeviceId, DeviceInfo, DeviceScope, EventKind, ExtensionInfo, PropertyValue, ProtocolError,
    ServerEvent, WindowId,
};

/// Name of the input extension the harness negotiates.
pub const INPUT_EXTENSION: &str = "XInputExtension";

/// Error type for transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered the request with a protocol error.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The connection is gone (server terminated or closed it).
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The backend cannot express this request.
    #[error("unsupported by this transport: {0}")]
    Unsupported(&'static str),

    /// An I/O error below the protocol layer.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identifies a pointer barrier created through a transport.
pub type BarrierId = u32;

/// Allowed crossing directions of a barrier.  A zero mask blocks the bound
/// masters in every direction.
pub mod barrier_directions {
    pub const POSITIVE_X: u32 = 1 << 0;
    pub const POSITIVE_Y: u32 = 1 << 1;
    pub const NEGATIVE_X: u32 = 1 << 2;
    pub const NEGATIVE_Y: u32 = 1 << 3;
}

/// An axis-aligned barrier line segment in root coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierSegment {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    /// Directions pointers may still cross in (see [`barrier_directions`]).
    pub allow: u32,
}

impl BarrierSegment {
    /// A vertical barrier at `x` spanning `y1..=y2`, blocking both
    /// directions.
    pub fn vertical(x: i32, y1: i32, y2: i32) -> Self {
        Self {
            x1: x,
            y1,
            x2: x,
            y2,
            allow: 0,
        }
    }

    /// A horizontal barrier at `y` spanning `x1..=x2`, blocking both
    /// directions.
    pub fn horizontal(y: i32, x1: i32, x2: i32) -> Self {
        Self {
            x1,
            y1: y,
            x2,
            y2: y,
            allow: 0,
        }
    }

    pub fn is_vertical(&self) -> bool {
        self.x1 == self.x2 && self.y1 != self.y2
    }

    pub fn is_horizontal(&self) -> bool {
        self.y1 == self.y2 && self.x1 != self.x2
    }
}

/// One live connection to a server, as the protocol sees it.
///
/// Implementations keep a private event queue per connection; nothing read
/// through one transport is visible through another.
pub trait ServerTransport {
    /// Looks up an extension by name, returning its opcode context if the
    /// server supports it.
    fn query_extension(&mut self, name: &str) -> Result<Option<ExtensionInfo>, TransportError>;

    /// Announces the client's supported extension version and returns the
    /// `(major, minor)` the server actually speaks.
    fn negotiate_version(&mut self, major: u16, minor: u16)
        -> Result<(u16, u16), TransportError>;

    /// Installs or replaces this connection's event subscription for
    /// `(window, scope)`.
    fn select_events(
        &mut self,
        window: WindowId,
        scope: DeviceScope,
        kinds: &[EventKind],
    ) -> Result<(), TransportError>;

    /// Enumerates the server's current device list.
    fn query_devices(&mut self) -> Result<Vec<DeviceInfo>, TransportError>;

    /// Current root-coordinate position of a pointer device, whole pixels.
    fn query_pointer(&mut self, device: DeviceId) -> Result<(f64, f64), TransportError>;

    /// Moves a master pointer to an absolute position on `screen`.
    fn warp_pointer(
        &mut self,
        device: DeviceId,
        screen: usize,
        x: f64,
        y: f64,
    ) -> Result<(), TransportError>;

    /// Writes a device property.
    fn change_property(
        &mut self,
        device: DeviceId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), TransportError>;

    /// Reads a device property.
    fn get_property(
        &mut self,
        device: DeviceId,
        name: &str,
    ) -> Result<Option<PropertyValue>, TransportError>;

    /// Creates a pointer barrier bound to `masters` (empty = all masters).
    fn create_barrier(
        &mut self,
        segment: BarrierSegment,
        masters: &[DeviceId],
    ) -> Result<BarrierId, TransportError>;

    /// Destroys a barrier created on this connection.
    fn destroy_barrier(&mut self, id: BarrierId) -> Result<(), TransportError>;

    /// Creates a new master device pair named `name`.
    fn add_master(&mut self, name: &str) -> Result<(), TransportError>;

    /// Reparents a slave device under a master.
    fn attach_slave(&mut self, slave: DeviceId, master: DeviceId) -> Result<(), TransportError>;

    /// Number of screens this connection sees.
    fn screen_count(&mut self) -> Result<usize, TransportError>;

    /// Pixel size of one screen.
    fn screen_size(&mut self, screen: usize) -> Result<(u32, u32), TransportError>;

    /// Root window of one screen.
    fn root_window(&mut self, screen: usize) -> Result<WindowId, TransportError>;

    /// Forces a synchronization round-trip: when this returns, every event
    /// the server generated for this connection so far is locally queued.
    fn sync(&mut self) -> Result<(), TransportError>;

    /// Pops the next locally queued event, if any.  Never blocks.
    fn poll_event(&mut self) -> Result<Option<ServerEvent>, TransportError>;

    /// Number of locally queued events.
    fn pending(&mut self) -> Result<usize, TransportError>;

    /// Server version string.
    fn server_version(&mut self) -> Result<String, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_barrier_segment_orientation() {
        assert!(BarrierSegment::vertical(50, 0, 50).is_vertical());
        assert!(!BarrierSegment::vertical(50, 0, 50).is_horizontal());
        assert!(BarrierSegment::horizontal(100, 0, 640).is_horizontal());

        // Degenerate: a point is neither.
        let point = BarrierSegment {
            x1: 5,
            y1: 5,
            x2: 5,
            y2: 5,
            allow: 0,
        };
        assert!(!point.is_vertical());
        assert!(!point.is_horizontal());
    }
}
