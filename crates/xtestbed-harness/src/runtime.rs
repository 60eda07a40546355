//! Operating-system server runtime.
//!
//! Drives a real server binary: spawn with config/log arguments, SIGTERM
//! then SIGKILL teardown, and display-slot probing via the conventional
//! lock files.  Protocol connections come from the `x11-backend` feature;
//! without it this runtime can manage the process but not talk to it, which
//! is still enough for spawn/teardown smoke checks.

use std::path::Path;
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::server::{ServerRuntime, SpawnError};
use crate::settings::HarnessSettings;
use crate::transport::{ServerTransport, TransportError};

/// Runtime managing a real server process.
pub struct OsServerRuntime {
    binary: String,
    child: Option<Child>,
    display: Option<u32>,
}

impl OsServerRuntime {
    pub fn new(settings: &HarnessSettings) -> Self {
        Self {
            binary: settings.server.binary.clone(),
            child: None,
            display: None,
        }
    }
}

impl ServerRuntime for OsServerRuntime {
    fn spawn(&mut self, display: u32, config: &Path, log: &Path) -> Result<(), SpawnError> {
        let child = Command::new(&self.binary)
            .arg(format!(":{display}"))
            .arg("-config")
            .arg(config)
            .arg("-logfile")
            .arg(log)
            .arg("-noreset")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let display_slot = display;
        debug!(pid = child.id(), display = display_slot, "server process spawned");
        self.child = Some(child);
        self.display = Some(display);
        Ok(())
    }

    fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn terminate(&mut self) -> Result<(), SpawnError> {
        if let Some(child) = self.child.as_ref() {
            // SAFETY: signalling a child pid we own.
            let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                return Err(SpawnError::Io(std::io::Error::last_os_error()));
            }
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<(), SpawnError> {
        if let Some(child) = self.child.as_mut() {
            child.kill()?;
            let _ = child.wait();
        }
        Ok(())
    }

    fn try_connect(&mut self, screen: usize) -> Result<Box<dyn ServerTransport>, TransportError> {
        #[cfg(feature = "x11-backend")]
        {
            let display = self.display.ok_or_else(|| {
                TransportError::ConnectionLost("server was never spawned".into())
            })?;
            let transport = crate::x11::X11Transport::connect(display, screen)?;
            return Ok(Box::new(transport));
        }
        #[cfg(not(feature = "x11-backend"))]
        {
            let _ = (screen, self.display);
            Err(TransportError::Unsupported(
                "live connections require the x11-backend feature",
            ))
        }
    }

    fn display_available(&self, display: u32) -> bool {
        let lock = format!("/tmp/.X{display}-lock");
        let socket = format!("/tmp/.X11-unix/X{display}");
        !Path::new(&lock).exists() && !Path::new(&socket).exists()
    }
}

impl Drop for OsServerRuntime {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.kill();
        }
    }
}
