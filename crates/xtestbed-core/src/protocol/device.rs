//! Device enumeration types and subscription scopes.

use serde::{Deserialize, Serialize};

use super::DeviceId;
use crate::recording::DeviceDescriptor;

/// Role of a device within the input hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceUse {
    /// A virtual pointer stream applications subscribe to.
    MasterPointer,
    /// A virtual keyboard stream paired with a master pointer.
    MasterKeyboard,
    /// A physical pointer feeding a master.
    SlavePointer,
    /// A physical keyboard feeding a master.
    SlaveKeyboard,
    /// A physical device detached from every master.
    FloatingSlave,
}

impl DeviceUse {
    /// `true` for either master role.
    pub fn is_master(&self) -> bool {
        matches!(self, DeviceUse::MasterPointer | DeviceUse::MasterKeyboard)
    }
}

/// Capability tags derived from a device's capability report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub pointer: bool,
    pub keyboard: bool,
    pub touch: bool,
    pub tablet_tool: bool,
}

impl From<&DeviceDescriptor> for Capabilities {
    fn from(desc: &DeviceDescriptor) -> Self {
        Self {
            pointer: desc.is_pointer(),
            keyboard: desc.is_keyboard(),
            touch: desc.is_touch(),
            tablet_tool: desc.is_tablet_tool(),
        }
    }
}

/// One entry of the server's device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: DeviceId,
    /// Display name; not guaranteed unique.
    pub name: String,
    pub device_use: DeviceUse,
    /// For slaves, the master they feed; for masters, their paired master.
    pub attachment: DeviceId,
    pub enabled: bool,
    pub capabilities: Capabilities,
}

/// Which devices an event subscription applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceScope {
    /// Every device, master or slave.
    AllDevices,
    /// Every master device.
    AllMasterDevices,
    /// One specific device.
    Device(DeviceId),
}

impl DeviceScope {
    /// Broadness rank: lower values cover more devices.  The server's
    /// overlap-conflict rule compares ranks: an existing subscription blocks
    /// a later one iff it is broader or equal and the two scopes overlap.
    pub fn broadness(&self) -> u8 {
        match self {
            DeviceScope::AllDevices => 0,
            DeviceScope::AllMasterDevices => 1,
            DeviceScope::Device(_) => 2,
        }
    }

    /// `true` if both scopes can deliver events for at least one common
    /// device.  `is_master` classifies the specific device id involved.
    pub fn overlaps(&self, other: &DeviceScope, is_master: impl Fn(DeviceId) -> bool) -> bool {
        use DeviceScope::*;
        match (self, other) {
            (AllDevices, _) | (_, AllDevices) => true,
            (AllMasterDevices, AllMasterDevices) => true,
            (AllMasterDevices, Device(id)) | (Device(id), AllMasterDevices) => is_master(*id),
            (Device(a), Device(b)) => a == b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master_2(id: DeviceId) -> bool {
        id == 2
    }

    #[test]
    fn test_broadness_ordering() {
        assert!(DeviceScope::AllDevices.broadness() < DeviceScope::AllMasterDevices.broadness());
        assert!(DeviceScope::AllMasterDevices.broadness() < DeviceScope::Device(9).broadness());
    }

    #[test]
    fn test_overlap_all_devices_covers_everything() {
        let all = DeviceScope::AllDevices;
        assert!(all.overlaps(&DeviceScope::Device(14), master_2));
        assert!(all.overlaps(&DeviceScope::AllMasterDevices, master_2));
    }

    #[test]
    fn test_overlap_all_masters_only_covers_masters() {
        let masters = DeviceScope::AllMasterDevices;
        assert!(masters.overlaps(&DeviceScope::Device(2), master_2));
        assert!(!masters.overlaps(&DeviceScope::Device(14), master_2));
    }

    #[test]
    fn test_overlap_specific_devices_must_match() {
        let a = DeviceScope::Device(14);
        assert!(a.overlaps(&DeviceScope::Device(14), master_2));
        assert!(!a.overlaps(&DeviceScope::Device(15), master_2));
    }
}
