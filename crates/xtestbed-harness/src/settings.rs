//! TOML-based harness runtime settings.
//!
//! Settings cover what varies between machines, not between scenarios: where
//! the server binary lives, where per-run artifacts go, and the default
//! timeouts.  Scenario-level variation (devices, config sections, extension
//! versions) travels in explicit option structs instead.
//!
//! Every field has a default, so the harness runs without any settings file;
//! `XTESTBED_SERVER` overrides the binary path from the environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for settings file operations.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing settings at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse settings TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level harness settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessSettings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub artifacts: ArtifactSettings,
    #[serde(default)]
    pub waits: WaitSettings,
}

/// Server binary and startup behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSettings {
    /// Server executable; resolved through `PATH` when not absolute.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// First display number to probe when allocating a slot.
    #[serde(default = "default_display_base")]
    pub display_base: u32,
    /// Number of display slots probed before giving up.
    #[serde(default = "default_display_span")]
    pub display_span: u32,
    /// How long to wait for the server to accept connections, milliseconds.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
    /// Grace period between terminate and kill, milliseconds.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

/// Per-run artifact placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactSettings {
    /// Directory receiving per-test config and log files.
    #[serde(default = "default_artifact_dir")]
    pub dir: PathBuf,
}

/// Default deadlines of the wait engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitSettings {
    /// Default wait deadline, milliseconds.
    #[serde(default = "default_wait_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Sleep between queue polls, milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_binary() -> String {
    "Xorg".to_string()
}
fn default_display_base() -> u32 {
    133
}
fn default_display_span() -> u32 {
    64
}
fn default_startup_timeout_ms() -> u64 {
    10_000
}
fn default_grace_ms() -> u64 {
    2_000
}
fn default_artifact_dir() -> PathBuf {
    std::env::temp_dir().join("xtestbed")
}
fn default_wait_timeout_ms() -> u64 {
    1_000
}
fn default_poll_interval_ms() -> u64 {
    5
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            display_base: default_display_base(),
            display_span: default_display_span(),
            startup_timeout_ms: default_startup_timeout_ms(),
            grace_ms: default_grace_ms(),
        }
    }
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            dir: default_artifact_dir(),
        }
    }
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_wait_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            artifacts: ArtifactSettings::default(),
            waits: WaitSettings::default(),
        }
    }
}

impl HarnessSettings {
    /// Parses settings from TOML text, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Parse`] on malformed TOML.
    pub fn from_toml(text: &str) -> Result<Self, SettingsError> {
        let mut settings: Self = toml::from_str(text)?;
        settings.apply_env();
        Ok(settings)
    }

    /// Loads settings from a file, falling back to defaults if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Io`] on read failures other than
    /// file-not-found, and [`SettingsError::Parse`] on malformed TOML.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut settings = Self::default();
                settings.apply_env();
                Ok(settings)
            }
            Err(source) => Err(SettingsError::Io { path, source }),
        }
    }

    fn apply_env(&mut self) {
        if let Ok(binary) = std::env::var("XTESTBED_SERVER") {
            if !binary.is_empty() {
                self.server.binary = binary;
            }
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.server.startup_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.server.grace_ms)
    }

    pub fn default_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.waits.default_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.waits.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_usable() {
        // Arrange / Act
        let settings = HarnessSettings::default();

        // Assert
        assert_eq!(settings.server.binary, "Xorg");
        assert!(settings.startup_timeout() > Duration::ZERO);
        assert!(settings.poll_interval() < settings.default_wait_timeout());
    }

    #[test]
    fn test_partial_toml_fills_missing_fields() {
        // Arrange
        let text = "\
[server]
binary = \"/usr/libexec/Xorg\"
startup_timeout_ms = 3000
";

        // Act
        let settings = HarnessSettings::from_toml(text).unwrap();

        // Assert – given fields applied, the rest defaulted
        assert_eq!(settings.server.binary, "/usr/libexec/Xorg");
        assert_eq!(settings.startup_timeout(), Duration::from_millis(3000));
        assert_eq!(settings.server.grace_ms, 2000);
        assert_eq!(settings.waits.default_timeout_ms, 1000);
    }

    #[test]
    fn test_malformed_toml_is_a_parse_error() {
        let err = HarnessSettings::from_toml("[server\nbinary = 3").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }
}
