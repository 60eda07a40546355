//! On-disk recording formats for emulated devices.
//!
//! Two text formats are supported, matching the corpus of recordings the
//! harness replays:
//!
//! - **Capability descriptions** (`*.desc`) list what a device *is*: its
//!   name, bus identity, and the full set of event types, codes, and
//!   absolute-axis ranges it can report.  See [`DeviceDescriptor`].
//! - **Event transcripts** (`*.events`) list what a device *did*: a
//!   time-ordered sequence of raw events captured from real hardware.
//!   See [`EventScript`].
//!
//! A description provisions a virtual device node; a transcript replays
//! through one.

mod descriptor;
mod script;

pub use descriptor::{AbsRange, DeviceDescriptor, DeviceIdentity};
pub use script::EventScript;

use thiserror::Error;

/// Error type for recording parse failures.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// A line did not match the expected format.
    #[error("parse error at line {line}: {reason}")]
    Parse { line: usize, reason: String },

    /// The recording is missing a mandatory section.
    #[error("incomplete recording: {0}")]
    Incomplete(&'static str),

    /// A file system I/O error occurred.
    #[error("I/O error reading recording at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RecordingError {
    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        RecordingError::Parse {
            line,
            reason: reason.into(),
        }
    }
}
