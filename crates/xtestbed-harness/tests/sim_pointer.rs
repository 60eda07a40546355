//! Pointer pipeline scenarios against the simulated server: wheel-to-button
//! mapping, button numbering, sub-pixel accumulation, and transformation
//! matrices.

use std::time::Duration;

use xtestbed_core::geometry::Transform;
use xtestbed_core::input::{codes, EventType};
use xtestbed_core::protocol::{
    DeviceScope, EventKind, EventPredicate, CORE_POINTER,
};
use xtestbed_core::recording::DeviceDescriptor;

use xtestbed_harness::testing::{FixtureOptions, TestFixture};

const WAIT: Duration = Duration::from_millis(200);
const QUIET: Duration = Duration::from_millis(30);

fn mouse_fixture() -> TestFixture {
    let mut options = FixtureOptions::default();
    options.devices.push(DeviceDescriptor::usb_optical_mouse());
    TestFixture::start(options).unwrap()
}

fn subscribe_core_buttons(fixture: &mut TestFixture) {
    let root = fixture.session_mut().root_window(0).unwrap();
    fixture
        .session_mut()
        .select_events(
            root,
            DeviceScope::AllDevices,
            &[EventKind::CoreButtonPress, EventKind::CoreButtonRelease],
        )
        .unwrap();
}

#[test]
fn scroll_wheel_produces_one_button_pair_per_unit() {
    let mut fixture = mouse_fixture();
    subscribe_core_buttons(&mut fixture);

    // (axis, value, expected button): vertical maps to 4/5, horizontal to
    // 6/7, the button encodes both axis and sign.
    let cases = [
        (codes::REL_WHEEL, 1, 4),
        (codes::REL_WHEEL, 3, 4),
        (codes::REL_WHEEL, -2, 5),
        (codes::REL_HWHEEL, 2, 7),
        (codes::REL_HWHEEL, -3, 6),
    ];

    for (axis, value, button) in cases {
        fixture
            .device_mut(0)
            .play_one(EventType::Relative, axis, value, true)
            .unwrap();

        let events = fixture.session_mut().drain_pending().unwrap();
        let pairs = value.unsigned_abs() as usize;
        assert_eq!(
            events.len(),
            pairs * 2,
            "axis {axis} value {value}: expected {pairs} press/release pairs"
        );
        for pair in events.chunks(2) {
            assert_eq!(pair[0].kind, EventKind::CoreButtonPress);
            assert_eq!(pair[0].detail, button);
            assert_eq!(pair[1].kind, EventKind::CoreButtonRelease);
            assert_eq!(pair[1].detail, button);
        }
    }
}

#[test]
fn physical_buttons_map_to_logical_numbers() {
    let mut fixture = mouse_fixture();
    subscribe_core_buttons(&mut fixture);

    for (code, logical) in [
        (codes::BTN_LEFT, 1),
        (codes::BTN_MIDDLE, 2),
        (codes::BTN_RIGHT, 3),
    ] {
        fixture
            .device_mut(0)
            .play_one(EventType::Key, code, 1, true)
            .unwrap();
        fixture
            .device_mut(0)
            .play_one(EventType::Key, code, 0, true)
            .unwrap();

        let press = fixture
            .session_mut()
            .wait_for(
                EventPredicate::kind(EventKind::CoreButtonPress).with_detail(logical),
                WAIT,
            )
            .unwrap();
        // Button state reflects what was held before the transition.
        assert!(!press.button_pressed(logical as u8));
        fixture
            .session_mut()
            .wait_for(
                EventPredicate::kind(EventKind::CoreButtonRelease).with_detail(logical),
                WAIT,
            )
            .unwrap();
    }
}

#[test]
fn subpixel_motion_stays_invisible_to_the_legacy_stream() {
    let mut fixture = mouse_fixture();

    // Legacy observer and extended observer on separate connections.
    let root = fixture.session_mut().root_window(0).unwrap();
    fixture
        .session_mut()
        .select_events(root, DeviceScope::AllDevices, &[EventKind::CoreMotion])
        .unwrap();
    let mut extended = fixture.new_session().unwrap();
    extended
        .select_events(root, DeviceScope::AllMasterDevices, &[EventKind::Motion])
        .unwrap();

    let slave = fixture.session_mut().find_device("USB OPTICAL MOUSE").unwrap();
    fixture
        .session_mut()
        .set_constant_deceleration(slave.id, 20.0)
        .unwrap();

    let before = fixture.session_mut().query_pointer(CORE_POINTER).unwrap();

    // Four one-unit moves accumulate 0.2 pixels.
    for _ in 0..4 {
        fixture
            .device_mut(0)
            .play_one(EventType::Relative, codes::REL_X, 1, true)
            .unwrap();
    }

    // No legacy motion, but an extended motion per input frame.
    fixture.session_mut().assert_no_event(QUIET).unwrap();
    for _ in 0..4 {
        extended
            .wait_for(EventPredicate::kind(EventKind::Motion), WAIT)
            .unwrap();
    }

    // Integer position unchanged until the accumulator crosses a pixel.
    let after = fixture.session_mut().query_pointer(CORE_POINTER).unwrap();
    assert_eq!(before, after);

    // Sixteen more moves push the accumulator to exactly one pixel.
    for _ in 0..16 {
        fixture
            .device_mut(0)
            .play_one(EventType::Relative, codes::REL_X, 1, true)
            .unwrap();
    }
    fixture
        .session_mut()
        .wait_for(EventPredicate::kind(EventKind::CoreMotion), WAIT)
        .unwrap();
    let crossed = fixture.session_mut().query_pointer(CORE_POINTER).unwrap();
    assert_eq!(crossed.0, before.0 + 1.0);
}

#[test]
fn assert_no_event_is_idempotent_between_actions() {
    let mut fixture = mouse_fixture();
    let root = fixture.session_mut().root_window(0).unwrap();
    fixture
        .session_mut()
        .select_events(root, DeviceScope::AllDevices, &[EventKind::CoreMotion])
        .unwrap();

    // Two consecutive quiet windows with no intervening action: the first
    // must not leave synchronization state that breaks the second.
    fixture.session_mut().assert_no_event(QUIET).unwrap();
    fixture.session_mut().assert_no_event(QUIET).unwrap();
}

#[test]
fn rotation_matrices_steer_relative_motion() {
    let mut fixture = mouse_fixture();
    let root = fixture.session_mut().root_window(0).unwrap();
    fixture
        .session_mut()
        .select_events(root, DeviceScope::AllMasterDevices, &[EventKind::Motion])
        .unwrap();
    let slave = fixture.session_mut().find_device("USB OPTICAL MOUSE").unwrap();

    let deltas = [(1.0, 0.0), (-2.0, 0.0), (3.0, 2.0), (4.0, -7.0), (-3.0, 6.0)];

    for angle_deg in (0..360).step_by(15) {
        let angle = f64::from(angle_deg).to_radians();
        let transform = Transform::rotation(angle);
        fixture
            .session_mut()
            .set_transform(slave.id, &transform)
            .unwrap();

        // Center the pointer so rotated deltas never clamp at an edge,
        // then discard the warp motion.
        fixture
            .session_mut()
            .warp_pointer(CORE_POINTER, 0, 512.0, 384.0)
            .unwrap();
        fixture.session_mut().drain_pending().unwrap();
        let (mut x, mut y) = (512.0f64, 384.0f64);

        for (dx, dy) in deltas {
            fixture
                .device_mut(0)
                .play_one(EventType::Relative, codes::REL_X, dx as i32, false)
                .unwrap();
            fixture
                .device_mut(0)
                .play_one(EventType::Relative, codes::REL_Y, dy as i32, true)
                .unwrap();

            let (tdx, tdy) = transform.apply_delta(dx, dy);
            x += tdx;
            y += tdy;

            let motion = fixture
                .session_mut()
                .wait_for(EventPredicate::kind(EventKind::Motion), WAIT)
                .unwrap();
            assert!(
                (motion.root_x - x).abs() < 0.001 && (motion.root_y - y).abs() < 0.001,
                "angle {angle_deg}: expected ({x:.3}, {y:.3}), got ({:.3}, {:.3})",
                motion.root_x,
                motion.root_y
            );
        }
    }
}

#[test]
fn translation_component_does_not_displace_relative_motion() {
    let mut fixture = mouse_fixture();
    let root = fixture.session_mut().root_window(0).unwrap();
    fixture
        .session_mut()
        .select_events(root, DeviceScope::AllMasterDevices, &[EventKind::Motion])
        .unwrap();
    let slave = fixture.session_mut().find_device("USB OPTICAL MOUSE").unwrap();

    fixture
        .session_mut()
        .set_transform(slave.id, &Transform::translation(10.0, 0.0))
        .unwrap();
    fixture
        .session_mut()
        .warp_pointer(CORE_POINTER, 0, 100.0, 100.0)
        .unwrap();
    fixture.session_mut().drain_pending().unwrap();

    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, 5, false)
        .unwrap();
    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_Y, 5, true)
        .unwrap();

    let motion = fixture
        .session_mut()
        .wait_for(EventPredicate::kind(EventKind::Motion), WAIT)
        .unwrap();
    assert_eq!(motion.root_x, 105.0);
    assert_eq!(motion.root_y, 105.0);
}
