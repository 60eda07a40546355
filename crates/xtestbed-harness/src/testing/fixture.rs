//! Scenario fixture over the simulated server.
//!
//! Scenario variation travels in one explicit options struct (device set,
//! screen layout, required extension version) instead of fixture
//! inheritance chains; call sites state exactly what they need and get a
//! ready instance with a negotiated session back.

use xtestbed_core::recording::DeviceDescriptor;

use crate::config::{ScreenArrangement, ServerConfig};
use crate::emulation::EmulatedDevice;
use crate::server::ServerInstance;
use crate::session::ProtocolSession;
use crate::settings::HarnessSettings;
use crate::HarnessError;

use super::sim::{SimOptions, SimServer};

use std::time::Duration;

/// Everything that varies between scenarios.
#[derive(Debug, Clone)]
pub struct FixtureOptions {
    /// Screen sizes, left to right.
    pub screens: Vec<(u32, u32)>,
    /// Merge screens into one root.
    pub xinerama: bool,
    /// Devices provisioned before server start, in order.
    pub devices: Vec<DeviceDescriptor>,
    /// Input-extension version the scenario requires.
    pub required_extension: (u16, u16),
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            screens: vec![(1024, 768)],
            xinerama: false,
            devices: Vec::new(),
            required_extension: (2, 0),
        }
    }
}

impl FixtureOptions {
    /// Two screens of equal size, separate roots.
    pub fn dual_head(width: u32, height: u32) -> Self {
        Self {
            screens: vec![(width, height), (width, height)],
            ..Self::default()
        }
    }
}

/// A started simulated server with devices and a negotiated session.
pub struct TestFixture {
    server: SimServer,
    instance: ServerInstance,
    session: ProtocolSession,
    devices: Vec<EmulatedDevice>,
    negotiated_minor: u16,
}

impl TestFixture {
    /// Provisions devices, assembles and writes a configuration, starts the
    /// server, connects, and negotiates the required extension version.
    ///
    /// # Errors
    ///
    /// Any stage's error propagates as [`HarnessError`]; on startup failure
    /// the config and log artifacts are retained as in the live path.
    pub fn start(options: FixtureOptions) -> Result<Self, HarnessError> {
        let mut settings = HarnessSettings::default();
        settings.server.startup_timeout_ms = 500;
        settings.server.grace_ms = 50;
        settings.waits.poll_interval_ms = 1;

        let server = SimServer::new(SimOptions {
            screens: options.screens.clone(),
            xinerama: options.xinerama,
            ..SimOptions::default()
        });

        // Devices exist before the server starts, like nodes referenced
        // from an on-disk configuration.
        let devices: Vec<EmulatedDevice> = options
            .devices
            .iter()
            .cloned()
            .map(|descriptor| server.create_device(descriptor))
            .collect();

        let mut config = ServerConfig::new(settings.artifacts.dir.clone(), "sim");
        config.set_arrangement(match (options.screens.len(), options.xinerama) {
            (0 | 1, _) => ScreenArrangement::Single,
            (_, false) => ScreenArrangement::DualHead,
            (_, true) => ScreenArrangement::DualHeadXinerama,
        });
        for device in &devices {
            let node = device
                .device_node()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            config.add_input_section(
                "evdev",
                &device.descriptor().name,
                &[("CorePointer", "on"), ("Device", node.as_str())],
            );
        }
        config.write()?;

        let mut instance = ServerInstance::start(config, server.runtime(), &settings)?;
        let mut session = instance.connect()?;
        session.set_poll_interval(Duration::from_millis(1));
        let (major, minor) = options.required_extension;
        let negotiated_minor = session.negotiate_extension(major, minor)?;

        // A node existing does not mean the server has enumerated it; wait
        // for each device to appear in the hierarchy.
        for device in &devices {
            session.wait_for_device(&device.descriptor().name, Duration::from_millis(500))?;
        }

        Ok(Self {
            server,
            instance,
            session,
            devices,
            negotiated_minor,
        })
    }

    /// The primary session.
    pub fn session_mut(&mut self) -> &mut ProtocolSession {
        &mut self.session
    }

    /// The server instance.
    pub fn instance_mut(&mut self) -> &mut ServerInstance {
        &mut self.instance
    }

    /// Opens an additional independent session, with its own private queue.
    ///
    /// # Errors
    ///
    /// Propagates connection failures.
    pub fn new_session(&mut self) -> Result<ProtocolSession, HarnessError> {
        let mut session = self.instance.connect()?;
        session.set_poll_interval(Duration::from_millis(1));
        Ok(session)
    }

    /// The `i`-th provisioned device, in options order.
    pub fn device_mut(&mut self, i: usize) -> &mut EmulatedDevice {
        &mut self.devices[i]
    }

    /// Provisions another device on the running server (hot-plug).
    pub fn plug_device(&mut self, descriptor: DeviceDescriptor) -> usize {
        self.devices.push(self.server.create_device(descriptor));
        self.devices.len() - 1
    }

    /// Unplugs a device, removing it from the hierarchy.
    pub fn unplug_device(&mut self, i: usize) -> EmulatedDevice {
        self.devices.remove(i)
    }

    /// Minor extension version the server actually negotiated.
    pub fn negotiated_minor(&self) -> u16 {
        self.negotiated_minor
    }
}
