//! Device capability descriptions.
//!
//! # Format
//!
//! A description is a line-oriented text file.  Lines starting with `#` are
//! comments.  Every other line starts with a single-letter tag:
//!
//! ```text
//! N: PIXART USB OPTICAL MOUSE
//! I: 0003 093a 2510 0100
//! B: 02 43 00 00 00 00 00 00 00
//! A: 00 0 1023 0 0 0
//! ```
//!
//! - `N:` device name.
//! - `I:` identity: bus type, vendor, product, version (hex).
//! - `P:` input property bitmask (accepted and ignored).
//! - `B:` capability bitmask: the first byte is the event type, the
//!   remaining bytes are a little-endian bitmask of supported codes.
//!   Multiple `B:` lines for the same type continue the bitmask where the
//!   previous line left off.
//! - `A:` absolute-axis parameters: axis code, minimum, maximum, fuzz,
//!   flat, resolution.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::input::{codes, is_button_code, EventType};

use super::RecordingError;

/// Bus identity of a recorded device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceIdentity {
    pub bus_type: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// Declared range of an absolute axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AbsRange {
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

/// A parsed device capability description.
///
/// The descriptor is the authoritative statement of what the emulated device
/// can report; the virtual node is provisioned from it and the harness
/// consults it to clamp absolute values and compute expected coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Human-readable device name, as it will appear in the server's
    /// device list.
    pub name: String,
    /// Bus identity.
    pub identity: DeviceIdentity,
    /// Supported event codes, keyed by event type.
    supported: BTreeMap<EventType, BTreeSet<u16>>,
    /// Absolute-axis ranges, keyed by axis code.
    abs_ranges: BTreeMap<u16, AbsRange>,
}

impl DeviceDescriptor {
    /// Parses a description from text.
    ///
    /// # Errors
    ///
    /// Returns [`RecordingError::Parse`] with the offending line number on
    /// malformed input, or [`RecordingError::Incomplete`] if no `N:` line
    /// is present.
    pub fn parse(text: &str) -> Result<Self, RecordingError> {
        let mut name = None;
        let mut identity = DeviceIdentity::default();
        let mut supported: BTreeMap<EventType, BTreeSet<u16>> = BTreeMap::new();
        let mut abs_ranges = BTreeMap::new();
        // Byte offset within each type's capability bitmask, advanced by
        // every B: line so continuation lines land at the right codes.
        let mut bitmask_offsets: BTreeMap<u16, usize> = BTreeMap::new();

        for (idx, raw_line) in text.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (tag, rest) = line
                .split_once(':')
                .ok_or_else(|| RecordingError::parse(lineno, "missing ':' tag separator"))?;
            let rest = rest.trim();

            match tag {
                "N" => name = Some(rest.trim_matches('"').to_string()),
                "I" => {
                    let fields = parse_hex_fields(rest, lineno)?;
                    if fields.len() != 4 {
                        return Err(RecordingError::parse(lineno, "I: expects 4 fields"));
                    }
                    identity = DeviceIdentity {
                        bus_type: fields[0],
                        vendor: fields[1],
                        product: fields[2],
                        version: fields[3],
                    };
                }
                "P" => { /* input properties are accepted but not modeled */ }
                "B" => {
                    let fields = parse_hex_fields(rest, lineno)?;
                    let (type_raw, mask) = fields
                        .split_first()
                        .ok_or_else(|| RecordingError::parse(lineno, "B: line is empty"))?;
                    let offset = bitmask_offsets.entry(*type_raw).or_insert(0);
                    if let Ok(event_type) = EventType::try_from(*type_raw) {
                        let set = supported.entry(event_type).or_default();
                        for (byte_idx, byte) in mask.iter().enumerate() {
                            for bit in 0..8 {
                                if byte & (1 << bit) != 0 {
                                    set.insert(((*offset + byte_idx) * 8 + bit) as u16);
                                }
                            }
                        }
                    }
                    // Unknown types (EV_LED, force feedback, ...) still
                    // advance the offset so later lines stay aligned.
                    *offset += mask.len();
                }
                "A" => {
                    let fields: Vec<&str> = rest.split_whitespace().collect();
                    if fields.len() < 5 {
                        return Err(RecordingError::parse(lineno, "A: expects at least 5 fields"));
                    }
                    let axis = u16::from_str_radix(fields[0], 16)
                        .map_err(|_| RecordingError::parse(lineno, "bad axis code"))?;
                    let nums: Result<Vec<i32>, _> =
                        fields[1..].iter().map(|f| f.parse::<i32>()).collect();
                    let nums =
                        nums.map_err(|_| RecordingError::parse(lineno, "bad axis parameter"))?;
                    abs_ranges.insert(
                        axis,
                        AbsRange {
                            minimum: nums[0],
                            maximum: nums[1],
                            fuzz: nums[2],
                            flat: nums[3],
                            resolution: nums.get(4).copied().unwrap_or(0),
                        },
                    );
                }
                // evemu emits additional tags (L:, S:, ...) for LED and
                // switch state; none of the corpus devices rely on them.
                _ => {}
            }
        }

        let name = name.ok_or(RecordingError::Incomplete("no N: name line"))?;
        Ok(Self {
            name,
            identity,
            supported,
            abs_ranges,
        })
    }

    /// Loads and parses a description file.
    ///
    /// # Errors
    ///
    /// Returns [`RecordingError::Io`] if the file cannot be read, otherwise
    /// as [`DeviceDescriptor::parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RecordingError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RecordingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Returns `true` if the device declares the given event code.
    pub fn has_event(&self, event_type: EventType, code: u16) -> bool {
        self.supported
            .get(&event_type)
            .is_some_and(|set| set.contains(&code))
    }

    /// All declared codes for one event type.
    pub fn codes_for(&self, event_type: EventType) -> impl Iterator<Item = u16> + '_ {
        self.supported
            .get(&event_type)
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    /// Declared (minimum, maximum) of an absolute axis, if the device has it.
    pub fn axis_range(&self, axis: u16) -> Option<(i32, i32)> {
        self.abs_ranges.get(&axis).map(|r| (r.minimum, r.maximum))
    }

    /// Full absolute-axis parameters.
    pub fn abs_info(&self, axis: u16) -> Option<AbsRange> {
        self.abs_ranges.get(&axis).copied()
    }

    /// Clamps an absolute value into the axis's declared range.  Values on
    /// axes the device does not declare pass through unchanged.
    pub fn clamp_abs(&self, axis: u16, value: i32) -> i32 {
        match self.abs_ranges.get(&axis) {
            Some(r) => value.clamp(r.minimum, r.maximum),
            None => value,
        }
    }

    /// Reports relative motion on the X axis: a pointer.
    pub fn is_pointer(&self) -> bool {
        self.has_event(EventType::Relative, codes::REL_X)
            || (self.has_event(EventType::Absolute, codes::ABS_X)
                && self.has_event(EventType::Key, codes::BTN_TOUCH))
    }

    /// Reports at least one keyboard key (buttons excluded).
    pub fn is_keyboard(&self) -> bool {
        self.codes_for(EventType::Key).any(|c| !is_button_code(c))
    }

    /// Reports multitouch contacts.
    pub fn is_touch(&self) -> bool {
        self.has_event(EventType::Absolute, codes::ABS_MT_POSITION_X)
    }

    /// Reports a pen tool.
    pub fn is_tablet_tool(&self) -> bool {
        self.has_event(EventType::Key, codes::BTN_TOOL_PEN)
    }

    // ── Corpus templates ──────────────────────────────────────────────────────
    // Programmatic equivalents of the most common recordings, for scenarios
    // that do not need a byte-exact capability report.

    /// A three-button USB optical mouse with vertical and horizontal wheels.
    pub fn usb_optical_mouse() -> Self {
        let mut builder = DescriptorBuilder::new("USB OPTICAL MOUSE");
        builder.identity(0x0003, 0x093a, 0x2510, 0x0100);
        builder.event(EventType::Relative, codes::REL_X);
        builder.event(EventType::Relative, codes::REL_Y);
        builder.event(EventType::Relative, codes::REL_WHEEL);
        builder.event(EventType::Relative, codes::REL_HWHEEL);
        builder.event(EventType::Key, codes::BTN_LEFT);
        builder.event(EventType::Key, codes::BTN_RIGHT);
        builder.event(EventType::Key, codes::BTN_MIDDLE);
        builder.build()
    }

    /// A standard AT translated keyboard.
    pub fn at_keyboard() -> Self {
        let mut builder = DescriptorBuilder::new("AT Translated Set 2 Keyboard");
        builder.identity(0x0011, 0x0001, 0x0001, 0xab41);
        for key in 1u16..=127 {
            builder.event(EventType::Key, key);
        }
        builder.build()
    }

    /// A direct-touch multitouch screen.
    pub fn multitouch_screen() -> Self {
        let mut builder = DescriptorBuilder::new("MultiTouch Screen");
        builder.identity(0x0003, 0x1b96, 0x0001, 0x0110);
        builder.event(EventType::Key, codes::BTN_TOUCH);
        builder.abs_axis(codes::ABS_X, AbsRange { minimum: 0, maximum: 9600, ..Default::default() });
        builder.abs_axis(codes::ABS_Y, AbsRange { minimum: 0, maximum: 7200, ..Default::default() });
        builder.abs_axis(codes::ABS_MT_POSITION_X, AbsRange { minimum: 0, maximum: 9600, ..Default::default() });
        builder.abs_axis(codes::ABS_MT_POSITION_Y, AbsRange { minimum: 0, maximum: 7200, ..Default::default() });
        builder.abs_axis(codes::ABS_MT_TRACKING_ID, AbsRange { minimum: 0, maximum: 65535, ..Default::default() });
        builder.build()
    }

    /// A pen tablet with distance reporting.
    pub fn pen_tablet() -> Self {
        let mut builder = DescriptorBuilder::new("Pen Tablet");
        builder.identity(0x0003, 0x056a, 0x00b9, 0x0107);
        builder.event(EventType::Key, codes::BTN_TOOL_PEN);
        builder.abs_axis(codes::ABS_X, AbsRange { minimum: 0, maximum: 44704, resolution: 200, ..Default::default() });
        builder.abs_axis(codes::ABS_Y, AbsRange { minimum: 0, maximum: 27940, resolution: 200, ..Default::default() });
        builder.abs_axis(codes::ABS_PRESSURE, AbsRange { minimum: 0, maximum: 2047, ..Default::default() });
        builder.abs_axis(codes::ABS_DISTANCE, AbsRange { minimum: 0, maximum: 63, ..Default::default() });
        builder.build()
    }
}

/// Incremental construction of a [`DeviceDescriptor`].
#[derive(Debug)]
pub(crate) struct DescriptorBuilder {
    descriptor: DeviceDescriptor,
}

impl DescriptorBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                name: name.to_string(),
                identity: DeviceIdentity::default(),
                supported: BTreeMap::new(),
                abs_ranges: BTreeMap::new(),
            },
        }
    }

    pub(crate) fn identity(&mut self, bus_type: u16, vendor: u16, product: u16, version: u16) {
        self.descriptor.identity = DeviceIdentity {
            bus_type,
            vendor,
            product,
            version,
        };
    }

    pub(crate) fn event(&mut self, event_type: EventType, code: u16) {
        self.descriptor
            .supported
            .entry(event_type)
            .or_default()
            .insert(code);
    }

    pub(crate) fn abs_axis(&mut self, axis: u16, range: AbsRange) {
        self.event(EventType::Absolute, axis);
        self.descriptor.abs_ranges.insert(axis, range);
    }

    pub(crate) fn build(self) -> DeviceDescriptor {
        self.descriptor
    }
}

fn parse_hex_fields(s: &str, lineno: usize) -> Result<Vec<u16>, RecordingError> {
    s.split_whitespace()
        .map(|f| {
            u16::from_str_radix(f, 16)
                .map_err(|_| RecordingError::parse(lineno, format!("bad hex field '{f}'")))
        })
        .collect()
}
