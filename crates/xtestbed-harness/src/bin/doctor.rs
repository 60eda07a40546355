//! Environment preflight for the harness.
//!
//! Reports whether this machine can run live-server scenarios: uinput
//! access for device emulation, the server binary, and a free display
//! slot.  Exits non-zero when any mandatory piece is missing so CI can
//! gate the live suite on it.

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use xtestbed_core::recording::DeviceDescriptor;
use xtestbed_harness::settings::HarnessSettings;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = HarnessSettings::load(
        std::env::args()
            .nth(1)
            .unwrap_or_else(|| "xtestbed.toml".to_string()),
    )?;
    info!("xtestbed doctor");

    let mut healthy = true;

    // ── Device emulation ──────────────────────────────────────────────────────
    #[cfg(target_os = "linux")]
    {
        use xtestbed_harness::emulation::EmulatedDevice;
        match EmulatedDevice::with_uinput(DeviceDescriptor::usb_optical_mouse()) {
            Ok(device) => info!(
                node = ?device.device_node(),
                "uinput: virtual device created"
            ),
            Err(e) => {
                warn!(error = %e, "uinput: unavailable, emulation scenarios will skip");
                healthy = false;
            }
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = DeviceDescriptor::usb_optical_mouse();
        warn!("uinput: unsupported on this platform");
        healthy = false;
    }

    // ── Server binary ─────────────────────────────────────────────────────────
    let binary = &settings.server.binary;
    let found = if std::path::Path::new(binary).is_absolute() {
        std::path::Path::new(binary).exists()
    } else {
        std::env::var_os("PATH")
            .map(|paths| {
                std::env::split_paths(&paths).any(|dir| dir.join(binary).exists())
            })
            .unwrap_or(false)
    };
    if found {
        info!(binary, "server: binary found");
    } else {
        warn!(binary, "server: binary not found (set XTESTBED_SERVER)");
        healthy = false;
    }

    // ── Display slot ──────────────────────────────────────────────────────────
    #[cfg(target_os = "linux")]
    {
        use xtestbed_harness::runtime::OsServerRuntime;
        use xtestbed_harness::server::ServerRuntime;
        let runtime = OsServerRuntime::new(&settings);
        let base = settings.server.display_base;
        let end = base + settings.server.display_span;
        match (base..end).find(|d| runtime.display_available(*d)) {
            Some(slot) => info!(display = slot, "display: free slot available"),
            None => {
                warn!(base, end, "display: no free slot in probe range");
                healthy = false;
            }
        }
    }

    if healthy {
        info!("environment is ready for live scenarios");
        Ok(())
    } else {
        anyhow::bail!("environment is not ready; see warnings above");
    }
}
