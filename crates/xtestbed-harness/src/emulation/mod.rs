//! Device emulation injection.
//!
//! An [`EmulatedDevice`] pairs a capability descriptor with a virtual input
//! node and replays events through it: either discrete programmatic events
//! or a full recorded transcript.  The node itself sits behind the
//! [`InputNode`] trait: the real backend provisions a kernel uinput node
//! ([`UinputNode`]), the simulated server provides its own, and unit tests
//! record.
//!
//! Creation failure is *recoverable* by contract: provisioning a kernel node
//! needs privileges the environment may lack, and scenarios treat that as
//! skip-worthy rather than fatal.

#[cfg(target_os = "linux")]
mod uinput;

#[cfg(target_os = "linux")]
pub use uinput::UinputNode;

use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use xtestbed_core::input::{codes, EventType, RawEvent};
use xtestbed_core::recording::{DeviceDescriptor, EventScript};

/// Error type for emulation operations.
#[derive(Debug, Error)]
pub enum EmulationError {
    /// The virtual node could not be provisioned (typically missing
    /// privileges).  Callers may skip the scenario instead of failing it.
    #[error("virtual input node creation failed: {0}")]
    Creation(String),

    /// The device's capability report does not declare this event.
    #[error("device does not declare event type {event_type:?} code {code:#x}")]
    UndeclaredEvent { event_type: EventType, code: u16 },

    /// An I/O error talking to the node.
    #[error("I/O error on virtual input node: {0}")]
    Io(#[from] std::io::Error),
}

/// A kernel-visible (or simulated) virtual input source.
pub trait InputNode {
    /// Pushes one raw event into the input stack.
    fn emit(&mut self, event: RawEvent) -> Result<(), EmulationError>;

    /// Path of the kernel node, when one exists.
    fn node_path(&self) -> Option<&Path>;
}

/// How transcript replay treats recorded timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimingMode {
    /// Preserve the recorded gaps between events.  Required whenever the
    /// consumer's interpretation depends on timing (gestures, scroll
    /// velocity).
    #[default]
    Recorded,
    /// Replay as fast as possible.
    Immediate,
}

/// One emulated input device, exclusively owned by a test case.
pub struct EmulatedDevice {
    descriptor: DeviceDescriptor,
    node: Box<dyn InputNode>,
    timing: TimingMode,
}

impl EmulatedDevice {
    /// Wraps a descriptor around an already-provisioned node.
    pub fn new(descriptor: DeviceDescriptor, node: Box<dyn InputNode>) -> Self {
        Self {
            descriptor,
            node,
            timing: TimingMode::default(),
        }
    }

    /// Provisions a kernel uinput node for the descriptor.
    ///
    /// # Errors
    ///
    /// [`EmulationError::Creation`] when `/dev/uinput` is inaccessible;
    /// recoverable, scenarios may skip.
    #[cfg(target_os = "linux")]
    pub fn with_uinput(descriptor: DeviceDescriptor) -> Result<Self, EmulationError> {
        let node = UinputNode::create(&descriptor)?;
        Ok(Self::new(descriptor, Box::new(node)))
    }

    /// Switches transcript replay timing.
    pub fn set_timing(&mut self, timing: TimingMode) {
        self.timing = timing;
    }

    /// The device's capability report.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Path of the kernel node, for embedding into server configuration.
    pub fn device_node(&self) -> Option<&Path> {
        self.node.node_path()
    }

    /// Declared (min, max) of an absolute axis.
    pub fn axis_range(&self, axis: u16) -> Option<(i32, i32)> {
        self.descriptor.axis_range(axis)
    }

    /// Emits one event, optionally completing the input frame with a
    /// synchronization marker.
    ///
    /// Without the marker the event stays batched on the consumer side;
    /// several axes can be combined into one frame by syncing only the last
    /// (`REL_X` then `REL_Y` with `sync` makes a single diagonal motion).
    /// Absolute values are clamped to the declared axis range; relative
    /// values are signed deltas and pass through.
    ///
    /// # Errors
    ///
    /// [`EmulationError::UndeclaredEvent`] when the capability report does
    /// not cover the event.
    pub fn play_one(
        &mut self,
        event_type: EventType,
        code: u16,
        value: i32,
        sync: bool,
    ) -> Result<(), EmulationError> {
        if event_type != EventType::Synchronization
            && !self.descriptor.has_event(event_type, code)
        {
            return Err(EmulationError::UndeclaredEvent { event_type, code });
        }
        let value = match event_type {
            // Tracking ids sit outside their declared range by convention:
            // -1 ends the contact.
            EventType::Absolute if code != codes::ABS_MT_TRACKING_ID => {
                self.descriptor.clamp_abs(code, value)
            }
            _ => value,
        };
        self.node.emit(RawEvent::new(event_type, code, value))?;
        if sync {
            self.node
                .emit(RawEvent::new(EventType::Synchronization, codes::SYN_REPORT, 0))?;
        }
        Ok(())
    }

    /// Replays a recorded transcript exactly as captured.
    ///
    /// Events are emitted verbatim, with no clamping and no capability check,
    /// because the transcript is ground truth from real hardware.  Timing
    /// follows [`TimingMode`].
    pub fn play_script(&mut self, script: &EventScript) -> Result<(), EmulationError> {
        debug!(
            device = %self.descriptor.name,
            events = script.len(),
            frames = script.frame_count(),
            "replaying transcript"
        );
        let mut last_offset = Duration::ZERO;
        for event in script.events() {
            if self.timing == TimingMode::Recorded {
                let gap = event.offset.saturating_sub(last_offset);
                if !gap.is_zero() {
                    std::thread::sleep(gap);
                }
                last_offset = event.offset;
            }
            self.node.emit(*event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every emitted event.
    #[derive(Default)]
    struct RecordingNode {
        events: Rc<RefCell<Vec<RawEvent>>>,
    }

    impl RecordingNode {
        fn shared(&self) -> Rc<RefCell<Vec<RawEvent>>> {
            Rc::clone(&self.events)
        }
    }

    impl InputNode for RecordingNode {
        fn emit(&mut self, event: RawEvent) -> Result<(), EmulationError> {
            self.events.borrow_mut().push(event);
            Ok(())
        }

        fn node_path(&self) -> Option<&Path> {
            None
        }
    }

    fn mouse_device() -> (EmulatedDevice, Rc<RefCell<Vec<RawEvent>>>) {
        let node = RecordingNode::default();
        let events = node.shared();
        let device = EmulatedDevice::new(DeviceDescriptor::usb_optical_mouse(), Box::new(node));
        (device, events)
    }

    #[test]
    fn test_play_one_with_sync_appends_frame_marker() {
        // Arrange
        let (mut device, events) = mouse_device();

        // Act
        device
            .play_one(EventType::Relative, codes::REL_X, 10, true)
            .unwrap();

        // Assert
        let events = events.borrow();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].code, codes::REL_X);
        assert_eq!(events[0].value, 10);
        assert!(events[1].is_sync());
    }

    #[test]
    fn test_play_one_without_sync_leaves_frame_open() {
        // Arrange
        let (mut device, events) = mouse_device();

        // Act – batch X and Y into a single frame
        device
            .play_one(EventType::Relative, codes::REL_X, 3, false)
            .unwrap();
        device
            .play_one(EventType::Relative, codes::REL_Y, -2, true)
            .unwrap();

        // Assert – exactly one sync marker at the end
        let events = events.borrow();
        let syncs: Vec<_> = events.iter().filter(|e| e.is_sync()).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(syncs.len(), 1);
        assert!(events[2].is_sync());
    }

    #[test]
    fn test_undeclared_event_is_rejected() {
        let (mut device, _) = mouse_device();
        let err = device
            .play_one(EventType::Absolute, codes::ABS_X, 100, true)
            .unwrap_err();
        assert!(matches!(err, EmulationError::UndeclaredEvent { .. }));
    }

    #[test]
    fn test_absolute_values_clamp_to_declared_range() {
        // Arrange – tablet declares ABS_X in 0..=44704
        let node = RecordingNode::default();
        let events = node.shared();
        let mut device =
            EmulatedDevice::new(DeviceDescriptor::pen_tablet(), Box::new(node));

        // Act
        device
            .play_one(EventType::Absolute, codes::ABS_X, 99_999, true)
            .unwrap();

        // Assert
        assert_eq!(events.borrow()[0].value, 44_704);
    }

    #[test]
    fn test_script_replay_is_verbatim() {
        // Arrange
        let (mut device, events) = mouse_device();
        device.set_timing(TimingMode::Immediate);
        let script = EventScript::parse(
            "E: 0.000000 0002 0000 5\nE: 0.000000 0002 0001 7\nE: 0.000000 0000 0000 0\n",
        )
        .unwrap();

        // Act
        device.play_script(&script).unwrap();

        // Assert
        let events = events.borrow();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].value, 5);
        assert_eq!(events[1].value, 7);
        assert!(events[2].is_sync());
    }

    #[test]
    fn test_axis_range_reports_descriptor_values() {
        let node = RecordingNode::default();
        let device = EmulatedDevice::new(DeviceDescriptor::pen_tablet(), Box::new(node));
        assert_eq!(device.axis_range(codes::ABS_X), Some((0, 44_704)));
        assert_eq!(device.axis_range(codes::REL_X), None);
    }
}
