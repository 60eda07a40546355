//! Server configuration assembly.
//!
//! The lifecycle manager consumes a configuration opaquely: it only needs
//! the written file's path and the guarantee that it exists before the
//! server starts.  This module provides the minimal concrete assembler the
//! scenarios need: screen/layout/input sections with free-form driver
//! options rendered to the server's text format.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;
use uuid::Uuid;

/// Error type for configuration assembly.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration was not written before use.
    #[error("configuration has not been written to disk yet")]
    NotWritten,

    /// A file system I/O error occurred.
    #[error("I/O error writing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One input section: a driver, an identifier, and free-form options.
#[derive(Debug, Clone)]
struct InputSection {
    driver: String,
    identifier: String,
    options: Vec<(String, String)>,
    /// Whether the section is referenced from the server layout (a
    /// non-referenced section is only picked up with device auto-adding).
    in_layout: bool,
}

/// Screen arrangement of the generated configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScreenArrangement {
    /// One screen on the dummy video driver.
    #[default]
    Single,
    /// Two screens, the second right of the first, separate roots.
    DualHead,
    /// Two screens merged into one root.
    DualHeadXinerama,
}

/// Assembles a server configuration file.
///
/// ```no_run
/// # use xtestbed_harness::config::ServerConfig;
/// let mut config = ServerConfig::new("/tmp/xtestbed", "pointer-motion");
/// config.add_input_section(
///     "evdev",
///     "--device--",
///     &[("CorePointer", "on"), ("Device", "/dev/input/event7")],
/// );
/// config.write().unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ServerConfig {
    path: PathBuf,
    arrangement: ScreenArrangement,
    auto_add_devices: bool,
    inputs: Vec<InputSection>,
    written: bool,
}

impl ServerConfig {
    /// Creates an assembler whose file will live under `artifact_dir` with a
    /// unique, prefix-tagged name.
    pub fn new(artifact_dir: impl AsRef<Path>, prefix: &str) -> Self {
        let file = format!("{prefix}-{}.conf", Uuid::new_v4());
        Self {
            path: artifact_dir.as_ref().join(file),
            arrangement: ScreenArrangement::Single,
            auto_add_devices: false,
            inputs: Vec::new(),
            written: false,
        }
    }

    /// Chooses the screen arrangement.
    pub fn set_arrangement(&mut self, arrangement: ScreenArrangement) {
        self.arrangement = arrangement;
    }

    /// Controls whether the server picks up devices not named in the
    /// configuration.
    pub fn set_auto_add_devices(&mut self, enabled: bool) {
        self.auto_add_devices = enabled;
    }

    /// Adds an input section referenced from the server layout.
    pub fn add_input_section(&mut self, driver: &str, identifier: &str, options: &[(&str, &str)]) {
        self.push_input(driver, identifier, options, true);
    }

    /// Adds an input section *not* referenced from the layout; the server
    /// only binds it when auto-adding is enabled.
    pub fn add_unreferenced_input_section(
        &mut self,
        driver: &str,
        identifier: &str,
        options: &[(&str, &str)],
    ) {
        self.push_input(driver, identifier, options, false);
    }

    fn push_input(
        &mut self,
        driver: &str,
        identifier: &str,
        options: &[(&str, &str)],
        in_layout: bool,
    ) {
        self.inputs.push(InputSection {
            driver: driver.to_string(),
            identifier: identifier.to_string(),
            options: options
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            in_layout,
        });
    }

    /// Renders the configuration text.
    pub fn render(&self) -> String {
        let mut out = String::new();

        writeln!(out, "Section \"ServerFlags\"").unwrap();
        writeln!(out, "\tOption \"Log\" \"flush\"").unwrap();
        writeln!(
            out,
            "\tOption \"AutoAddDevices\" \"{}\"",
            if self.auto_add_devices { "on" } else { "off" }
        )
        .unwrap();
        writeln!(out, "EndSection\n").unwrap();

        writeln!(out, "Section \"ServerLayout\"").unwrap();
        writeln!(out, "\tIdentifier \"layout\"").unwrap();
        match self.arrangement {
            ScreenArrangement::Single => {
                writeln!(out, "\tScreen 0 \"Screen0\"").unwrap();
            }
            ScreenArrangement::DualHead | ScreenArrangement::DualHeadXinerama => {
                writeln!(out, "\tScreen 0 \"Screen0\"").unwrap();
                writeln!(out, "\tScreen 1 \"Screen1\" RightOf \"Screen0\"").unwrap();
                let xinerama =
                    matches!(self.arrangement, ScreenArrangement::DualHeadXinerama);
                writeln!(
                    out,
                    "\tOption \"Xinerama\" \"{}\"",
                    if xinerama { "on" } else { "off" }
                )
                .unwrap();
            }
        }
        for input in self.inputs.iter().filter(|i| i.in_layout) {
            writeln!(out, "\tInputDevice \"{}\"", input.identifier).unwrap();
        }
        writeln!(out, "EndSection\n").unwrap();

        let screen_count = match self.arrangement {
            ScreenArrangement::Single => 1,
            _ => 2,
        };
        for n in 0..screen_count {
            writeln!(out, "Section \"Device\"").unwrap();
            writeln!(out, "\tIdentifier \"Card{n}\"").unwrap();
            writeln!(out, "\tDriver \"dummy\"").unwrap();
            writeln!(out, "EndSection\n").unwrap();

            writeln!(out, "Section \"Screen\"").unwrap();
            writeln!(out, "\tIdentifier \"Screen{n}\"").unwrap();
            writeln!(out, "\tDevice \"Card{n}\"").unwrap();
            writeln!(out, "EndSection\n").unwrap();
        }

        for input in &self.inputs {
            writeln!(out, "Section \"InputDevice\"").unwrap();
            writeln!(out, "\tIdentifier \"{}\"", input.identifier).unwrap();
            writeln!(out, "\tDriver \"{}\"", input.driver).unwrap();
            for (key, value) in &input.options {
                writeln!(out, "\tOption \"{key}\" \"{value}\"").unwrap();
            }
            writeln!(out, "EndSection\n").unwrap();
        }

        out
    }

    /// Writes the rendered configuration, creating the artifact directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] on write failure.
    pub fn write(&mut self) -> Result<(), ConfigError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, self.render()).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.written = true;
        Ok(())
    }

    /// Path of the written file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotWritten`] until [`ServerConfig::write`] has
    /// succeeded; the lifecycle manager requires the file to exist.
    pub fn written_path(&self) -> Result<&Path, ConfigError> {
        if self.written {
            Ok(&self.path)
        } else {
            Err(ConfigError::NotWritten)
        }
    }

    /// Path the file will be written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the written file.  Missing files are ignored.
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
