//! Protocol sessions.
//!
//! A [`ProtocolSession`] is one live connection to a running server: it
//! carries the negotiated extension context, installs event subscriptions,
//! and owns a private event queue (inside its transport) that the wait
//! engine samples.  Several sessions may exist against one instance to model
//! independent clients; nothing is shared between them except the server.

use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use xtestbed_core::geometry::Transform;
use xtestbed_core::protocol::{
    properties, DeviceId, DeviceInfo, DeviceScope, EventKind, ExtensionInfo, PropertyValue,
    ProtocolError, WindowId,
};

use crate::server::FailureWitness;
use crate::transport::{
    BarrierId, BarrierSegment, ServerTransport, TransportError, INPUT_EXTENSION,
};

/// Error type for session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Sessions can only be opened against a Ready instance.
    #[error("server instance is not ready")]
    InstanceNotReady,

    /// The server does not offer the input extension at all.
    #[error("input extension is unavailable on this server")]
    ExtensionUnavailable,

    /// The server offers a different major version than required.
    #[error("extension major mismatch: required {required}, server offers {offered}")]
    MajorMismatch { required: u16, offered: u16 },

    /// The server answered a request with a protocol error.
    #[error(transparent)]
    Protocol(ProtocolError),

    /// The transport failed below the protocol layer.
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        // Surface server-answered errors distinctly so the scoped trap can
        // capture them; everything else is a transport failure.
        match err {
            TransportError::Protocol(e) => SessionError::Protocol(e),
            other => SessionError::Transport(other),
        }
    }
}

/// One client connection with its negotiated extension context.
pub struct ProtocolSession {
    transport: Box<dyn ServerTransport>,
    label: String,
    witness: FailureWitness,
    extension: Option<ExtensionInfo>,
    negotiated: Option<(u16, u16)>,
    poll_interval: Duration,
}

impl ProtocolSession {
    pub(crate) fn new(
        transport: Box<dyn ServerTransport>,
        label: String,
        witness: FailureWitness,
    ) -> Self {
        Self {
            transport,
            label,
            witness,
            extension: None,
            negotiated: None,
            poll_interval: Duration::from_millis(5),
        }
    }

    /// Human-readable connection label for diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Overrides the sleep between event-queue polls.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    pub(crate) fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub(crate) fn witness(&self) -> &FailureWitness {
        &self.witness
    }

    pub(crate) fn transport_mut(&mut self) -> &mut dyn ServerTransport {
        self.transport.as_mut()
    }

    /// Negotiates the input extension, requiring an exact major match.
    ///
    /// Returns the minor version the server actually speaks; the server may
    /// offer a lower minor than requested and callers must branch on the
    /// returned value, not on what they asked for.
    ///
    /// # Errors
    ///
    /// [`SessionError::ExtensionUnavailable`] when the server lacks the
    /// extension, [`SessionError::MajorMismatch`] when the major differs.
    pub fn negotiate_extension(&mut self, major: u16, minor: u16) -> Result<u16, SessionError> {
        let info = self
            .transport
            .query_extension(INPUT_EXTENSION)?
            .ok_or(SessionError::ExtensionUnavailable)?;
        let (offered_major, offered_minor) = self.transport.negotiate_version(major, minor)?;
        if offered_major != major {
            return Err(SessionError::MajorMismatch {
                required: major,
                offered: offered_major,
            });
        }
        debug!(
            session = %self.label,
            opcode = info.opcode,
            version = format_args!("{offered_major}.{offered_minor}"),
            "input extension negotiated"
        );
        self.extension = Some(info);
        self.negotiated = Some((offered_major, offered_minor));
        Ok(offered_minor)
    }

    /// The negotiated extension context, if negotiation succeeded.
    pub fn extension(&self) -> Option<ExtensionInfo> {
        self.extension
    }

    /// The extension's major opcode, if negotiated.
    pub fn opcode(&self) -> Option<u8> {
        self.extension.map(|e| e.opcode)
    }

    /// The negotiated `(major, minor)` version, if any.
    pub fn negotiated_version(&self) -> Option<(u16, u16)> {
        self.negotiated
    }

    /// Installs or replaces this session's event subscription for
    /// `(window, scope)`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Protocol`] with an Access code when the requested
    /// scope conflicts with a broader-or-equal subscription held by another
    /// session (touch kinds).
    pub fn select_events(
        &mut self,
        window: WindowId,
        scope: DeviceScope,
        kinds: &[EventKind],
    ) -> Result<(), SessionError> {
        self.transport
            .select_events(window, scope, kinds)
            .map_err(Into::into)
    }

    /// Enumerates the server's devices.
    pub fn query_devices(&mut self) -> Result<Vec<DeviceInfo>, SessionError> {
        self.transport.query_devices().map_err(Into::into)
    }

    /// Current whole-pixel position of a pointer device.
    pub fn query_pointer(&mut self, device: DeviceId) -> Result<(f64, f64), SessionError> {
        self.transport.query_pointer(device).map_err(Into::into)
    }

    /// Warps a master pointer to an absolute position.
    pub fn warp_pointer(
        &mut self,
        device: DeviceId,
        screen: usize,
        x: f64,
        y: f64,
    ) -> Result<(), SessionError> {
        self.transport
            .warp_pointer(device, screen, x, y)
            .map_err(Into::into)
    }

    /// Writes a device property.
    pub fn change_property(
        &mut self,
        device: DeviceId,
        name: &str,
        value: PropertyValue,
    ) -> Result<(), SessionError> {
        self.transport
            .change_property(device, name, value)
            .map_err(Into::into)
    }

    /// Reads a device property.
    pub fn get_property(
        &mut self,
        device: DeviceId,
        name: &str,
    ) -> Result<Option<PropertyValue>, SessionError> {
        self.transport
            .get_property(device, name)
            .map_err(Into::into)
    }

    /// Sets a device's coordinate transformation matrix.
    pub fn set_transform(
        &mut self,
        device: DeviceId,
        transform: &Transform,
    ) -> Result<(), SessionError> {
        let floats: Vec<f32> = transform.to_row_major().iter().map(|v| *v as f32).collect();
        self.change_property(device, properties::TRANSFORM_MATRIX, PropertyValue::Floats(floats))
    }

    /// Disables pointer acceleration for a device.
    pub fn disable_acceleration(&mut self, device: DeviceId) -> Result<(), SessionError> {
        self.change_property(
            device,
            properties::ACCEL_PROFILE,
            PropertyValue::Integers(vec![-1]),
        )
    }

    /// Applies a constant deceleration divisor to a device's deltas.
    pub fn set_constant_deceleration(
        &mut self,
        device: DeviceId,
        factor: f32,
    ) -> Result<(), SessionError> {
        self.change_property(
            device,
            properties::CONSTANT_DECELERATION,
            PropertyValue::Floats(vec![factor]),
        )
    }

    /// Creates a pointer barrier bound to the listed masters.
    pub fn create_barrier(
        &mut self,
        segment: BarrierSegment,
        masters: &[DeviceId],
    ) -> Result<BarrierId, SessionError> {
        self.transport
            .create_barrier(segment, masters)
            .map_err(Into::into)
    }

    /// Destroys a barrier created on this session.
    pub fn destroy_barrier(&mut self, id: BarrierId) -> Result<(), SessionError> {
        self.transport.destroy_barrier(id).map_err(Into::into)
    }

    /// Number of screens this connection sees.
    pub fn screen_count(&mut self) -> Result<usize, SessionError> {
        self.transport.screen_count().map_err(Into::into)
    }

    /// Pixel size of a screen.
    pub fn screen_size(&mut self, screen: usize) -> Result<(u32, u32), SessionError> {
        self.transport.screen_size(screen).map_err(Into::into)
    }

    /// Root window of a screen.
    pub fn root_window(&mut self, screen: usize) -> Result<WindowId, SessionError> {
        self.transport.root_window(screen).map_err(Into::into)
    }

    /// Forces a synchronization round-trip on this connection.
    pub fn sync(&mut self) -> Result<(), SessionError> {
        self.transport.sync().map_err(Into::into)
    }

    /// Runs `action` with protocol errors trapped: a server-answered error
    /// is returned as a value instead of an `Err`, so negative tests read
    /// linearly and an expected error cannot escape into later assertions.
    ///
    /// # Errors
    ///
    /// Non-protocol failures (transport loss, I/O) still propagate.
    pub fn trapped<F>(&mut self, action: F) -> Result<Option<ProtocolError>, SessionError>
    where
        F: FnOnce(&mut Self) -> Result<(), SessionError>,
    {
        match action(self) {
            Ok(()) => {
                // Flush so an asynchronously reported error surfaces inside
                // the trap, not after it.
                match self.sync() {
                    Ok(()) => Ok(None),
                    Err(SessionError::Protocol(e)) => Ok(Some(e)),
                    Err(other) => Err(other),
                }
            }
            Err(SessionError::Protocol(e)) => Ok(Some(e)),
            Err(other) => Err(other),
        }
    }

    /// Closes the connection.
    pub fn close(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xtestbed_core::protocol::ProtocolErrorCode;

    #[test]
    fn test_transport_error_routing() {
        let protocol: SessionError =
            TransportError::Protocol(ProtocolError::new(ProtocolErrorCode::Access, "select")).into();
        assert!(matches!(protocol, SessionError::Protocol(_)));

        let io: SessionError =
            TransportError::ConnectionLost("server died".into()).into();
        assert!(matches!(io, SessionError::Transport(_)));
    }
}
