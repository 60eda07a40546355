//! Multi-screen scenarios: pointer crossing between separate roots, merged
//! layouts, and cross-connection event ordering.

use std::time::Duration;

use xtestbed_core::input::{codes, EventType};
use xtestbed_core::protocol::{
    crossing, DeviceScope, EventKind, EventPredicate, CORE_POINTER,
};
use xtestbed_core::recording::DeviceDescriptor;

use xtestbed_harness::testing::{FixtureOptions, TestFixture};

const WAIT: Duration = Duration::from_millis(200);
const QUIET: Duration = Duration::from_millis(30);

fn dual_head_fixture(xinerama: bool) -> TestFixture {
    let mut options = FixtureOptions::dual_head(640, 480);
    options.xinerama = xinerama;
    options.devices.push(DeviceDescriptor::usb_optical_mouse());
    TestFixture::start(options).unwrap()
}

const CROSSING_KINDS: &[EventKind] = &[EventKind::CoreMotion, EventKind::Enter, EventKind::Leave];

#[test]
fn pointer_crosses_between_separate_roots() {
    let mut fixture = dual_head_fixture(false);
    assert_eq!(fixture.session_mut().screen_count().unwrap(), 2);

    // One observer per screen, on independent connections.
    let root0 = fixture.session_mut().root_window(0).unwrap();
    let root1 = fixture.session_mut().root_window(1).unwrap();
    fixture
        .session_mut()
        .select_events(root0, DeviceScope::AllDevices, CROSSING_KINDS)
        .unwrap();
    let mut second = fixture.new_session().unwrap();
    second
        .select_events(root1, DeviceScope::AllDevices, CROSSING_KINDS)
        .unwrap();

    // Start near the right edge of screen 0 and run off it.
    fixture
        .session_mut()
        .warp_pointer(CORE_POINTER, 0, 638.0, 240.0)
        .unwrap();
    fixture.session_mut().drain_pending().unwrap();

    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, 5, true)
        .unwrap();

    // First connection sees the leave (non-linear crossing), then silence.
    let leave = fixture
        .session_mut()
        .wait_for(EventPredicate::kind(EventKind::Leave), WAIT)
        .unwrap();
    assert_eq!(leave.screen, 0);
    assert_eq!(leave.detail, crossing::NONLINEAR);
    fixture.session_mut().assert_no_event(QUIET).unwrap();

    // Second connection sees the enter and the motion, in that order, with
    // the overshoot carried across.
    let matched = second
        .wait_for_ordered(
            &[
                EventPredicate::kind(EventKind::Enter),
                EventPredicate::kind(EventKind::CoreMotion),
            ],
            WAIT,
        )
        .unwrap();
    assert_eq!(matched[0].screen, 1);
    assert_eq!(matched[0].detail, crossing::NONLINEAR);
    assert_eq!(matched[1].root_x, 3.0);

    // Moving further generates motion on the second screen only.
    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, 3, true)
        .unwrap();
    second
        .wait_for(EventPredicate::kind(EventKind::CoreMotion), WAIT)
        .unwrap();
    fixture.session_mut().assert_no_event(QUIET).unwrap();

    // And back across: the events mirror.
    second.drain_pending().unwrap();
    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, -20, true)
        .unwrap();
    second
        .wait_for(EventPredicate::kind(EventKind::Leave), WAIT)
        .unwrap();
    fixture
        .session_mut()
        .wait_for(EventPredicate::kind(EventKind::Enter), WAIT)
        .unwrap();
}

#[test]
fn merged_layout_clamps_at_the_combined_edge() {
    let mut fixture = dual_head_fixture(true);

    // Merged roots present a single screen spanning both heads.
    assert_eq!(fixture.session_mut().screen_count().unwrap(), 1);
    assert_eq!(
        fixture.session_mut().screen_size(0).unwrap(),
        (1280, 480)
    );

    fixture
        .session_mut()
        .warp_pointer(CORE_POINTER, 0, 1275.0, 100.0)
        .unwrap();
    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, 50, true)
        .unwrap();

    // No crossing; the pointer pins to the last addressable column.
    let position = fixture.session_mut().query_pointer(CORE_POINTER).unwrap();
    assert_eq!(position, (1279.0, 100.0));

    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, -2000, true)
        .unwrap();
    let position = fixture.session_mut().query_pointer(CORE_POINTER).unwrap();
    assert_eq!(position, (0.0, 100.0));
}

#[test]
fn waits_on_two_connections_observe_server_side_order() {
    let mut fixture = dual_head_fixture(false);
    let root0 = fixture.session_mut().root_window(0).unwrap();
    let root1 = fixture.session_mut().root_window(1).unwrap();
    fixture
        .session_mut()
        .select_events(root0, DeviceScope::AllDevices, CROSSING_KINDS)
        .unwrap();
    let mut second = fixture.new_session().unwrap();
    second
        .select_events(root1, DeviceScope::AllDevices, CROSSING_KINDS)
        .unwrap();

    fixture
        .session_mut()
        .warp_pointer(CORE_POINTER, 0, 639.0, 240.0)
        .unwrap();
    fixture.session_mut().drain_pending().unwrap();

    // One physical action observed from both connections: sampling session
    // A then session B must not race, because each wait synchronizes its
    // own connection before reading.
    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, 4, true)
        .unwrap();

    fixture
        .session_mut()
        .wait_for(EventPredicate::kind(EventKind::Leave), WAIT)
        .unwrap();
    second
        .wait_for(EventPredicate::kind(EventKind::Enter), WAIT)
        .unwrap();
}
