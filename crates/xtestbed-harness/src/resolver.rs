//! Device and hierarchy resolution.
//!
//! Devices are resolved by display name against the *live* device list on
//! every call.  Identifiers are never cached: the server reuses ids after
//! removal, and a hierarchy change invalidates everything resolved before
//! it.  A kernel node existing does not imply the server has finished
//! enumerating the device, so appearance is awaited, not assumed.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use xtestbed_core::protocol::{properties, DeviceId, DeviceInfo, PropertyValue};

use crate::session::{ProtocolSession, SessionError};

/// Error type for device resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No live device carries the name.
    #[error("no device named '{0}'")]
    NotFound(String),

    /// A dynamically created master never showed up in the hierarchy.
    #[error("master device '{0}' did not appear in the device list")]
    MasterNotFound(String),

    /// The session failed underneath the lookup.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Result of a name lookup.
///
/// Duplicate names are a legitimate, if undesirable, real-world condition;
/// the lookup reports them instead of silently trusting the first match.
/// Callers decide whether ambiguity fails their scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Identifier of the first matching device, in server list order.
    pub id: DeviceId,
    /// Total number of devices carrying the name.
    pub matches: usize,
}

impl Resolution {
    /// `true` when more than one device carries the name.
    pub fn is_ambiguous(&self) -> bool {
        self.matches > 1
    }
}

impl ProtocolSession {
    /// Resolves a device name to an identifier.
    ///
    /// More than one match is surfaced as a warning and in the returned
    /// [`Resolution`]; it is not a hard failure.
    ///
    /// # Errors
    ///
    /// [`ResolveError::NotFound`] when nothing matches.
    pub fn find_device(&mut self, name: &str) -> Result<Resolution, ResolveError> {
        let devices = self.query_devices()?;
        let mut matching = devices.iter().filter(|d| d.name == name);
        let first = matching
            .next()
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))?;
        let matches = 1 + matching.count();
        if matches > 1 {
            warn!(
                session = %self.label(),
                name,
                matches,
                "device name is ambiguous, using the first match"
            );
        }
        Ok(Resolution {
            id: first.id,
            matches,
        })
    }

    /// Full device-list entry for a name, when one exists.
    pub fn find_device_info(&mut self, name: &str) -> Result<DeviceInfo, ResolveError> {
        let resolution = self.find_device(name)?;
        let devices = self.query_devices()?;
        devices
            .into_iter()
            .find(|d| d.id == resolution.id)
            .ok_or_else(|| ResolveError::NotFound(name.to_string()))
    }

    /// Blocks until a device named `name` appears in the hierarchy, or the
    /// timeout elapses.  Returns whether it appeared.
    ///
    /// Used after server start and after adding master devices: creation at
    /// the kernel level does not imply the server has enumerated the device.
    pub fn wait_for_device(
        &mut self,
        name: &str,
        timeout: Duration,
    ) -> Result<bool, ResolveError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.sync()?;
            if self.find_device(name).is_ok() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                debug!(session = %self.label(), name, "device did not appear in time");
                return Ok(false);
            }
            std::thread::sleep(self.poll_interval());
        }
    }

    /// Creates a new master device pair and resolves the new master
    /// pointer's id.  The server names the pointer half `"<name> pointer"`.
    ///
    /// # Errors
    ///
    /// [`ResolveError::MasterNotFound`] when the pointer never appears
    /// within `timeout`.
    pub fn add_master(
        &mut self,
        name: &str,
        timeout: Duration,
    ) -> Result<DeviceId, ResolveError> {
        self.transport_mut()
            .add_master(name)
            .map_err(SessionError::from)?;
        let pointer_name = format!("{name} pointer");
        if !self.wait_for_device(&pointer_name, timeout)? {
            return Err(ResolveError::MasterNotFound(pointer_name));
        }
        Ok(self.find_device(&pointer_name)?.id)
    }

    /// Reparents a slave device under a master.
    pub fn attach_slave(
        &mut self,
        slave: DeviceId,
        master: DeviceId,
    ) -> Result<(), ResolveError> {
        self.transport_mut()
            .attach_slave(slave, master)
            .map_err(SessionError::from)?;
        self.sync()?;
        Ok(())
    }

    /// Blocks until the next hierarchy-change notification arrives.
    /// Requires a subscription to hierarchy events; the returned event's
    /// `detail` carries the add/remove/enable/disable flags.
    ///
    /// # Errors
    ///
    /// [`crate::wait::WaitError::Timeout`] when no change arrives in time.
    pub fn wait_for_hierarchy_change(
        &mut self,
        timeout: Duration,
    ) -> Result<xtestbed_core::protocol::ServerEvent, crate::wait::WaitError> {
        use xtestbed_core::protocol::{EventKind, EventPredicate};
        self.wait_for(EventPredicate::kind(EventKind::HierarchyChanged), timeout)
    }

    /// Enables a device through its enable property.
    pub fn enable_device(&mut self, device: DeviceId) -> Result<(), ResolveError> {
        self.change_property(
            device,
            properties::DEVICE_ENABLED,
            PropertyValue::Integers(vec![1]),
        )?;
        Ok(())
    }

    /// Disables a device.  Active touch sequences on the device end.
    pub fn disable_device(&mut self, device: DeviceId) -> Result<(), ResolveError> {
        self.change_property(
            device,
            properties::DEVICE_ENABLED,
            PropertyValue::Integers(vec![0]),
        )?;
        Ok(())
    }
}
