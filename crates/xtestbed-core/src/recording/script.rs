//! Recorded event transcripts.
//!
//! # Format
//!
//! One event per line, as captured from real hardware:
//!
//! ```text
//! E: 0.000000 0003 0035 2544
//! E: 0.000000 0003 0036 1348
//! E: 0.000000 0000 0000 0000
//! E: 0.010001 0003 0035 2550
//! ```
//!
//! `E: <seconds>.<microseconds> <type> <code> <value>` with type and code in
//! hex and the value in decimal.  Timestamps are offsets from the first
//! event; replay preserves the gaps between frames, which is what makes
//! multi-finger gestures reproduce exactly.

use std::path::Path;
use std::time::Duration;

use crate::input::{EventType, RawEvent};

use super::RecordingError;

/// A parsed, time-ordered event transcript.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventScript {
    events: Vec<RawEvent>,
}

impl EventScript {
    /// Parses a transcript from text.
    ///
    /// Unknown line tags are skipped (captures often embed the device
    /// description before the event list); timestamps are normalised so the
    /// first event sits at offset zero.
    ///
    /// # Errors
    ///
    /// Returns [`RecordingError::Parse`] with the offending line number.
    pub fn parse(text: &str) -> Result<Self, RecordingError> {
        let mut events = Vec::new();
        let mut first_stamp: Option<Duration> = None;

        for (idx, raw_line) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw_line.trim();
            let Some(rest) = line.strip_prefix("E:") else {
                continue;
            };

            let fields: Vec<&str> = rest.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(RecordingError::parse(lineno, "E: expects 4 fields"));
            }

            let stamp = parse_timestamp(fields[0], lineno)?;
            let type_raw = u16::from_str_radix(fields[1], 16)
                .map_err(|_| RecordingError::parse(lineno, "bad event type"))?;
            let event_type = EventType::try_from(type_raw)
                .map_err(|()| RecordingError::parse(lineno, format!("unknown event type {type_raw:#06x}")))?;
            let code = u16::from_str_radix(fields[2], 16)
                .map_err(|_| RecordingError::parse(lineno, "bad event code"))?;
            let value: i32 = fields[3]
                .parse()
                .map_err(|_| RecordingError::parse(lineno, "bad event value"))?;

            let base = *first_stamp.get_or_insert(stamp);
            events.push(RawEvent {
                offset: stamp.saturating_sub(base),
                event_type,
                code,
                value,
            });
        }

        if events.is_empty() {
            return Err(RecordingError::Incomplete("no E: event lines"));
        }
        Ok(Self { events })
    }

    /// Loads and parses a transcript file.
    ///
    /// # Errors
    ///
    /// Returns [`RecordingError::Io`] if the file cannot be read, otherwise
    /// as [`EventScript::parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Builds a script from in-memory events (offsets preserved as given).
    pub fn from_events(events: Vec<RawEvent>) -> Self {
        Self { events }
    }

    /// The events in replay order.
    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// `true` if the script holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total recorded duration (offset of the last event).
    pub fn duration(&self) -> Duration {
        self.events.last().map(|e| e.offset).unwrap_or_default()
    }

    /// Number of complete input frames (sync markers).
    pub fn frame_count(&self) -> usize {
        self.events.iter().filter(|e| e.is_sync()).count()
    }
}

fn parse_timestamp(field: &str, lineno: usize) -> Result<Duration, RecordingError> {
    let (secs, usecs) = field
        .split_once('.')
        .ok_or_else(|| RecordingError::parse(lineno, "timestamp must be <sec>.<usec>"))?;
    let secs: u64 = secs
        .parse()
        .map_err(|_| RecordingError::parse(lineno, "bad timestamp seconds"))?;
    let usecs: u32 = usecs
        .parse()
        .map_err(|_| RecordingError::parse(lineno, "bad timestamp microseconds"))?;
    Ok(Duration::from_secs(secs) + Duration::from_micros(u64::from(usecs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::codes;

    const SCROLL_SCRIPT: &str = "\
# two-finger scroll, trimmed
E: 1.000000 0003 0035 2544
E: 1.000000 0003 0036 1348
E: 1.000000 0000 0000 0000
E: 1.010000 0003 0036 1340
E: 1.010000 0000 0000 0000
";

    #[test]
    fn test_parse_normalises_timestamps() {
        // Arrange / Act
        let script = EventScript::parse(SCROLL_SCRIPT).unwrap();

        // Assert – first event at zero, last at the 10ms gap
        assert_eq!(script.len(), 5);
        assert_eq!(script.events()[0].offset, Duration::ZERO);
        assert_eq!(script.duration(), Duration::from_millis(10));
        assert_eq!(script.frame_count(), 2);
    }

    #[test]
    fn test_parse_reads_hex_codes_and_decimal_values() {
        let script = EventScript::parse("E: 0.000000 0002 0008 -1\n").unwrap();
        let ev = script.events()[0];
        assert_eq!(ev.event_type, EventType::Relative);
        assert_eq!(ev.code, codes::REL_WHEEL);
        assert_eq!(ev.value, -1);
    }

    #[test]
    fn test_empty_transcript_is_incomplete() {
        let err = EventScript::parse("# nothing recorded\n").unwrap_err();
        assert!(matches!(err, RecordingError::Incomplete(_)));
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let err = EventScript::parse("E: 0.000000 0002 0008\n").unwrap_err();
        match err {
            RecordingError::Parse { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
    }
}
