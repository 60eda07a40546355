//! Server lifecycle management.
//!
//! A [`ServerInstance`] owns one server process for one test: it allocates a
//! display slot, writes nothing itself (the configuration is consumed
//! opaquely), spawns the process with its diagnostics redirected to a
//! per-test log file, polls until the server accepts connections, and tears
//! everything down on drop.
//!
//! Artifact retention is asymmetric on purpose: config and log files are
//! deleted when the test passed and retained when anything failed, keyed off
//! the shared [`FailureWitness`] rather than off the stop call, so a failed
//! assertion anywhere in the test leaves the evidence behind.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::session::{ProtocolSession, SessionError};
use crate::settings::HarnessSettings;
use crate::transport::{ServerTransport, TransportError};

/// Error type for lifecycle operations.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// No free display slot in the probed range.
    #[error("no free display slot in :{base}..:{end}")]
    NoDisplaySlot { base: u32, end: u32 },

    /// The configuration file does not exist on disk.
    #[error("configuration file missing at {0}")]
    MissingConfig(PathBuf),

    /// The process could not be spawned at all.
    #[error("failed to spawn server process: {0}")]
    Io(#[from] std::io::Error),

    /// The server never accepted connections; the log is retained.
    #[error("server not ready within {timeout:?}; log retained at {log}")]
    StartupTimeout { timeout: Duration, log: PathBuf },

    /// The server exited during startup; the log is retained.
    #[error("server exited during startup; log retained at {log}")]
    ExitedEarly { log: PathBuf },

    /// The running server rejected a management request.
    #[error("server management request failed: {0}")]
    Transport(#[from] TransportError),
}

/// Readiness of a server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Unstarted,
    Starting,
    Ready,
    Terminated,
}

/// Shared flag recording whether any assertion failed while the owning
/// instance was alive.  Cloned into every session; read at teardown to
/// decide artifact retention.
#[derive(Debug, Clone, Default)]
pub struct FailureWitness {
    failed: Arc<AtomicBool>,
}

impl FailureWitness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failure.  Irreversible for the lifetime of the instance.
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }

    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Everything the lifecycle manager needs from the outside world: spawning
/// and signalling the process, and opening protocol connections.
///
/// The operating-system implementation lives in [`crate::runtime`]; the
/// simulated server provides its own; unit tests mock this seam.
#[cfg_attr(test, mockall::automock)]
pub trait ServerRuntime {
    /// Spawns the server bound to `display` with the given config and log
    /// paths.
    fn spawn(&mut self, display: u32, config: &Path, log: &Path) -> Result<(), SpawnError>;

    /// Whether the spawned process is still alive.
    fn is_running(&mut self) -> bool;

    /// Requests graceful termination.
    fn terminate(&mut self) -> Result<(), SpawnError>;

    /// Forcefully kills the process.
    fn kill(&mut self) -> Result<(), SpawnError>;

    /// Attempts one protocol connection to `screen`.  Failing is normal
    /// while the server is still starting.
    fn try_connect(&mut self, screen: usize) -> Result<Box<dyn ServerTransport>, TransportError>;

    /// Whether `display` is free to bind.
    fn display_available(&self, display: u32) -> bool;
}

/// A running server owned by one test case.
pub struct ServerInstance {
    runtime: Box<dyn ServerRuntime>,
    readiness: Readiness,
    display: u32,
    config: ServerConfig,
    log_path: PathBuf,
    grace: Duration,
    witness: FailureWitness,
    sessions_opened: usize,
}

impl std::fmt::Debug for ServerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInstance")
            .field("runtime", &"<dyn ServerRuntime>")
            .field("readiness", &self.readiness)
            .field("display", &self.display)
            .field("config", &self.config)
            .field("log_path", &self.log_path)
            .field("grace", &self.grace)
            .field("witness", &self.witness)
            .field("sessions_opened", &self.sessions_opened)
            .finish()
    }
}

impl ServerInstance {
    /// Starts a server with the given (already written) configuration.
    ///
    /// # Errors
    ///
    /// [`SpawnError::MissingConfig`] if the configuration was never written;
    /// [`SpawnError::StartupTimeout`] / [`SpawnError::ExitedEarly`] when the
    /// server does not come up; in both cases the log file is retained for
    /// post-mortem reading.
    pub fn start(
        config: ServerConfig,
        mut runtime: Box<dyn ServerRuntime>,
        settings: &HarnessSettings,
    ) -> Result<Self, SpawnError> {
        let config_path = config
            .written_path()
            .map_err(|_| SpawnError::MissingConfig(config.path().to_path_buf()))?
            .to_path_buf();

        let display = Self::allocate_display(runtime.as_ref(), settings)?;
        let log_path = config_path.with_extension("log");

        let display_slot = display;
        debug!(display = display_slot, config = %config_path.display(), "starting server");
        runtime.spawn(display, &config_path, &log_path)?;

        let witness = FailureWitness::new();
        let mut instance = Self {
            runtime,
            readiness: Readiness::Starting,
            display,
            config,
            log_path,
            grace: settings.grace_period(),
            witness,
            sessions_opened: 0,
        };

        instance.await_ready(settings.startup_timeout(), settings.poll_interval())?;
        let display_slot = display;
        info!(display = display_slot, "server ready");
        Ok(instance)
    }

    fn allocate_display(
        runtime: &dyn ServerRuntime,
        settings: &HarnessSettings,
    ) -> Result<u32, SpawnError> {
        let base = settings.server.display_base;
        let end = base + settings.server.display_span;
        (base..end)
            .find(|d| runtime.display_available(*d))
            .ok_or(SpawnError::NoDisplaySlot { base, end })
    }

    fn await_ready(&mut self, timeout: Duration, poll: Duration) -> Result<(), SpawnError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.runtime.is_running() {
                self.readiness = Readiness::Terminated;
                self.witness.mark_failed();
                return Err(SpawnError::ExitedEarly {
                    log: self.log_path.clone(),
                });
            }
            match self.runtime.try_connect(0) {
                Ok(_) => {
                    self.readiness = Readiness::Ready;
                    return Ok(());
                }
                Err(e) => debug!(error = %e, "server not accepting connections yet"),
            }
            if Instant::now() >= deadline {
                let _ = self.runtime.kill();
                self.readiness = Readiness::Terminated;
                self.witness.mark_failed();
                return Err(SpawnError::StartupTimeout {
                    timeout,
                    log: self.log_path.clone(),
                });
            }
            std::thread::sleep(poll);
        }
    }

    /// Opens a protocol session against the default screen.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the instance is not ready or the
    /// connection fails.
    pub fn connect(&mut self) -> Result<ProtocolSession, SessionError> {
        self.connect_screen(0)
    }

    /// Opens a protocol session against a specific screen.
    pub fn connect_screen(&mut self, screen: usize) -> Result<ProtocolSession, SessionError> {
        if self.readiness != Readiness::Ready {
            return Err(SessionError::InstanceNotReady);
        }
        let transport = self.runtime.try_connect(screen)?;
        self.sessions_opened += 1;
        let label = format!(":{}.{} #{}", self.display, screen, self.sessions_opened);
        Ok(ProtocolSession::new(transport, label, self.witness.clone()))
    }

    /// Queries the running server's version string.
    pub fn version(&mut self) -> Result<String, SpawnError> {
        if self.readiness != Readiness::Ready {
            return Err(SpawnError::Transport(TransportError::ConnectionLost(
                "instance is not ready".into(),
            )));
        }
        let mut transport = self.runtime.try_connect(0)?;
        Ok(transport.server_version()?)
    }

    /// Requests termination, escalating to a kill after the grace period.
    /// Calling this on an already-terminated instance is a no-op.
    pub fn stop(&mut self) {
        if self.readiness == Readiness::Terminated {
            return;
        }
        if self.runtime.is_running() {
            if self.runtime.terminate().is_err() {
                let _ = self.runtime.kill();
            } else {
                let deadline = Instant::now() + self.grace;
                while self.runtime.is_running() && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(20));
                }
                if self.runtime.is_running() {
                    warn!(display = self.display, "graceful stop timed out, killing");
                    let _ = self.runtime.kill();
                }
            }
        }
        self.readiness = Readiness::Terminated;
    }

    pub fn readiness(&self) -> Readiness {
        self.readiness
    }

    /// The display identifier the server is bound to.
    pub fn display(&self) -> u32 {
        self.display
    }

    /// Path of the server's diagnostic log.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// The shared failure flag for this instance.
    pub fn witness(&self) -> FailureWitness {
        self.witness.clone()
    }

    /// Records a failure against this instance (artifacts will be retained).
    pub fn mark_failed(&self) {
        self.witness.mark_failed();
    }
}

impl Drop for ServerInstance {
    fn drop(&mut self) {
        self.stop();
        if self.witness.has_failed() {
            info!(
                config = %self.config.path().display(),
                log = %self.log_path.display(),
                "test failed, artifacts retained"
            );
        } else {
            self.config.remove();
            let _ = std::fs::remove_file(&self.log_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::*;
    use std::cell::Cell;
    use std::rc::Rc;

    use xtestbed_core::protocol::{
        DeviceId, DeviceInfo, DeviceScope, EventKind, ExtensionInfo, PropertyValue, ServerEvent,
        WindowId,
    };

    use crate::transport::{BarrierId, BarrierSegment};

    /// Transport stub for lifecycle tests; the lifecycle manager only ever
    /// opens and drops it.
    struct StubTransport;

    impl ServerTransport for StubTransport {
        fn query_extension(
            &mut self,
            _name: &str,
        ) -> Result<Option<ExtensionInfo>, TransportError> {
            Ok(None)
        }
        fn negotiate_version(
            &mut self,
            major: u16,
            minor: u16,
        ) -> Result<(u16, u16), TransportError> {
            Ok((major, minor))
        }
        fn select_events(
            &mut self,
            _window: WindowId,
            _scope: DeviceScope,
            _kinds: &[EventKind],
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn query_devices(&mut self) -> Result<Vec<DeviceInfo>, TransportError> {
            Ok(Vec::new())
        }
        fn query_pointer(&mut self, _device: DeviceId) -> Result<(f64, f64), TransportError> {
            Ok((0.0, 0.0))
        }
        fn warp_pointer(
            &mut self,
            _device: DeviceId,
            _screen: usize,
            _x: f64,
            _y: f64,
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn change_property(
            &mut self,
            _device: DeviceId,
            _name: &str,
            _value: PropertyValue,
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn get_property(
            &mut self,
            _device: DeviceId,
            _name: &str,
        ) -> Result<Option<PropertyValue>, TransportError> {
            Ok(None)
        }
        fn create_barrier(
            &mut self,
            _segment: BarrierSegment,
            _masters: &[DeviceId],
        ) -> Result<BarrierId, TransportError> {
            Err(TransportError::Unsupported("stub"))
        }
        fn destroy_barrier(&mut self, _id: BarrierId) -> Result<(), TransportError> {
            Ok(())
        }
        fn add_master(&mut self, _name: &str) -> Result<(), TransportError> {
            Ok(())
        }
        fn attach_slave(
            &mut self,
            _slave: DeviceId,
            _master: DeviceId,
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn screen_count(&mut self) -> Result<usize, TransportError> {
            Ok(1)
        }
        fn screen_size(&mut self, _screen: usize) -> Result<(u32, u32), TransportError> {
            Ok((1024, 768))
        }
        fn root_window(&mut self, _screen: usize) -> Result<WindowId, TransportError> {
            Ok(1)
        }
        fn sync(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn poll_event(&mut self) -> Result<Option<ServerEvent>, TransportError> {
            Ok(None)
        }
        fn pending(&mut self) -> Result<usize, TransportError> {
            Ok(0)
        }
        fn server_version(&mut self) -> Result<String, TransportError> {
            Ok("stub-server 1.0".to_string())
        }
    }

    /// Hand-rolled runtime double tracking lifecycle calls.
    struct ScriptedRuntime {
        running: Rc<Cell<bool>>,
        graceful_stop_works: bool,
        terminate_calls: Rc<Cell<usize>>,
        kill_calls: Rc<Cell<usize>>,
    }

    impl ScriptedRuntime {
        fn new(graceful_stop_works: bool) -> Self {
            Self {
                running: Rc::new(Cell::new(false)),
                graceful_stop_works,
                terminate_calls: Rc::new(Cell::new(0)),
                kill_calls: Rc::new(Cell::new(0)),
            }
        }

        fn counters(&self) -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
            (Rc::clone(&self.terminate_calls), Rc::clone(&self.kill_calls))
        }
    }

    impl ServerRuntime for ScriptedRuntime {
        fn spawn(&mut self, _display: u32, _config: &Path, _log: &Path) -> Result<(), SpawnError> {
            self.running.set(true);
            Ok(())
        }
        fn is_running(&mut self) -> bool {
            self.running.get()
        }
        fn terminate(&mut self) -> Result<(), SpawnError> {
            self.terminate_calls.set(self.terminate_calls.get() + 1);
            if self.graceful_stop_works {
                self.running.set(false);
            }
            Ok(())
        }
        fn kill(&mut self) -> Result<(), SpawnError> {
            self.kill_calls.set(self.kill_calls.get() + 1);
            self.running.set(false);
            Ok(())
        }
        fn try_connect(
            &mut self,
            _screen: usize,
        ) -> Result<Box<dyn ServerTransport>, TransportError> {
            if self.running.get() {
                Ok(Box::new(StubTransport))
            } else {
                Err(TransportError::ConnectionLost("not running".into()))
            }
        }
        fn display_available(&self, _display: u32) -> bool {
            true
        }
    }

    fn settings_with_fast_timeouts() -> HarnessSettings {
        let mut settings = HarnessSettings::default();
        settings.server.startup_timeout_ms = 50;
        settings.server.grace_ms = 10;
        settings.waits.poll_interval_ms = 1;
        settings
    }

    fn written_config(prefix: &str) -> ServerConfig {
        let dir = std::env::temp_dir().join("xtestbed-lifecycle-test");
        let mut config = ServerConfig::new(dir, prefix);
        config.write().unwrap();
        config
    }

    #[test]
    fn test_start_requires_written_config() {
        // Arrange – a config that was never written
        let config = ServerConfig::new("/tmp/xtestbed-lifecycle-test", "unwritten");
        let runtime = MockServerRuntime::new();

        // Act
        let err = ServerInstance::start(
            config,
            Box::new(runtime),
            &settings_with_fast_timeouts(),
        )
        .unwrap_err();

        // Assert
        assert!(matches!(err, SpawnError::MissingConfig(_)));
    }

    #[test]
    fn test_startup_timeout_kills_and_retains_log() {
        // Arrange – a process that runs but never accepts connections
        let mut runtime = MockServerRuntime::new();
        runtime.expect_display_available().return_const(true);
        runtime.expect_spawn().times(1).returning(|_, _, _| Ok(()));
        runtime.expect_is_running().return_const(true);
        runtime.expect_try_connect().returning(|_| {
            Err(TransportError::ConnectionLost("refused".into()))
        });
        runtime.expect_kill().times(1).returning(|| Ok(()));

        let config = written_config("startup-timeout");
        let log_path = config.path().with_extension("log");
        std::fs::write(&log_path, "diagnostics\n").unwrap();

        // Act
        let err = ServerInstance::start(
            config,
            Box::new(runtime),
            &settings_with_fast_timeouts(),
        )
        .unwrap_err();

        // Assert – timeout reported, log retained for post-mortem
        assert!(matches!(err, SpawnError::StartupTimeout { .. }));
        assert!(log_path.exists());
        std::fs::remove_file(&log_path).unwrap();
    }

    #[test]
    fn test_early_exit_is_distinguished_from_timeout() {
        // Arrange – the process dies immediately
        let mut runtime = MockServerRuntime::new();
        runtime.expect_display_available().return_const(true);
        runtime.expect_spawn().times(1).returning(|_, _, _| Ok(()));
        runtime.expect_is_running().return_const(false);

        // Act
        let err = ServerInstance::start(
            written_config("early-exit"),
            Box::new(runtime),
            &settings_with_fast_timeouts(),
        )
        .unwrap_err();

        // Assert
        assert!(matches!(err, SpawnError::ExitedEarly { .. }));
    }

    #[test]
    fn test_display_allocation_skips_taken_slots() {
        // Arrange – display_base and base+1 taken, base+2 free
        let mut settings = settings_with_fast_timeouts();
        settings.server.display_base = 40;
        let mut runtime = MockServerRuntime::new();
        runtime
            .expect_display_available()
            .returning(|d| d >= 42);
        runtime
            .expect_spawn()
            .with(eq(42), always(), always())
            .times(1)
            .returning(|_, _, _| Ok(()));
        runtime.expect_is_running().return_const(true);
        runtime
            .expect_try_connect()
            .returning(|_| Err(TransportError::ConnectionLost("not yet".into())));
        runtime.expect_kill().returning(|| Ok(()));

        // Act – startup still times out, but the spawn expectation proves
        // the probed slot was used
        let _ = ServerInstance::start(
            written_config("display-alloc"),
            Box::new(runtime),
            &settings,
        );
    }

    #[test]
    fn test_graceful_stop_does_not_escalate_and_is_idempotent() {
        // Arrange
        let runtime = ScriptedRuntime::new(true);
        let (terminates, kills) = runtime.counters();
        let mut instance = ServerInstance::start(
            written_config("graceful-stop"),
            Box::new(runtime),
            &settings_with_fast_timeouts(),
        )
        .unwrap();
        assert_eq!(instance.readiness(), Readiness::Ready);

        // Act
        instance.stop();
        instance.stop(); // second call must be a no-op

        // Assert
        assert_eq!(instance.readiness(), Readiness::Terminated);
        assert_eq!(terminates.get(), 1);
        assert_eq!(kills.get(), 0);
    }

    #[test]
    fn test_stop_escalates_to_kill_after_grace() {
        // Arrange – terminate never takes effect
        let runtime = ScriptedRuntime::new(false);
        let (terminates, kills) = runtime.counters();
        let mut instance = ServerInstance::start(
            written_config("escalating-stop"),
            Box::new(runtime),
            &settings_with_fast_timeouts(),
        )
        .unwrap();

        // Act
        instance.stop();

        // Assert
        assert_eq!(terminates.get(), 1);
        assert_eq!(kills.get(), 1);
    }

    #[test]
    fn test_artifacts_removed_on_success() {
        // Arrange
        let config = written_config("artifacts-pass");
        let config_path = config.path().to_path_buf();
        let instance = ServerInstance::start(
            config,
            Box::new(ScriptedRuntime::new(true)),
            &settings_with_fast_timeouts(),
        )
        .unwrap();
        let log_path = instance.log_path().to_path_buf();
        std::fs::write(&log_path, "diagnostics\n").unwrap();

        // Act – no failure recorded, instance torn down
        drop(instance);

        // Assert
        assert!(!config_path.exists());
        assert!(!log_path.exists());
    }

    #[test]
    fn test_artifacts_retained_on_failure() {
        // Arrange
        let config = written_config("artifacts-fail");
        let config_path = config.path().to_path_buf();
        let instance = ServerInstance::start(
            config,
            Box::new(ScriptedRuntime::new(true)),
            &settings_with_fast_timeouts(),
        )
        .unwrap();
        let log_path = instance.log_path().to_path_buf();
        std::fs::write(&log_path, "diagnostics\n").unwrap();

        // Act – an assertion failed somewhere during the instance's life
        instance.mark_failed();
        drop(instance);

        // Assert – evidence left behind
        assert!(config_path.exists());
        assert!(log_path.exists());
        std::fs::remove_file(&config_path).unwrap();
        std::fs::remove_file(&log_path).unwrap();
    }

    #[test]
    fn test_version_query_reaches_the_server() {
        let mut instance = ServerInstance::start(
            written_config("version"),
            Box::new(ScriptedRuntime::new(true)),
            &settings_with_fast_timeouts(),
        )
        .unwrap();
        assert_eq!(instance.version().unwrap(), "stub-server 1.0");
    }
}
