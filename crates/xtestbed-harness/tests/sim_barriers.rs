//! Pointer barrier scenarios: per-master blocking and barrier validity.

use std::time::Duration;

use xtestbed_core::input::{codes, EventType};
use xtestbed_core::protocol::{ProtocolErrorCode, CORE_POINTER};
use xtestbed_core::recording::DeviceDescriptor;

use xtestbed_harness::testing::{FixtureOptions, TestFixture};
use xtestbed_harness::transport::BarrierSegment;

const WAIT: Duration = Duration::from_millis(200);

fn two_pointer_fixture() -> TestFixture {
    let mut first = DeviceDescriptor::usb_optical_mouse();
    first.name = "--device1--".to_string();
    let mut second = DeviceDescriptor::usb_optical_mouse();
    second.name = "--device2--".to_string();
    let mut options = FixtureOptions::default();
    options.devices = vec![first, second];
    TestFixture::start(options).unwrap()
}

#[test]
fn barrier_blocks_only_the_master_it_is_bound_to() {
    let mut fixture = two_pointer_fixture();

    // Second master pointer with device 2 reparented under it.
    let device2 = fixture.session_mut().find_device("--device2--").unwrap();
    let master2 = fixture
        .session_mut()
        .add_master("New Master", WAIT)
        .unwrap();
    fixture
        .session_mut()
        .attach_slave(device2.id, master2)
        .unwrap();

    // Both masters parked at (30, 30).
    for master in [CORE_POINTER, master2] {
        fixture
            .session_mut()
            .warp_pointer(master, 0, 30.0, 30.0)
            .unwrap();
        assert_eq!(
            fixture.session_mut().query_pointer(master).unwrap(),
            (30.0, 30.0)
        );
    }

    // Vertical barrier at x=50 spanning y 0..50, bound to the core pointer
    // only.  Ensure it exists before events play.
    fixture
        .session_mut()
        .create_barrier(BarrierSegment::vertical(50, 0, 50), &[CORE_POINTER])
        .unwrap();
    fixture.session_mut().sync().unwrap();

    // The bound master stops one pixel short; the other passes through.
    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, 100, true)
        .unwrap();
    assert_eq!(
        fixture.session_mut().query_pointer(CORE_POINTER).unwrap(),
        (49.0, 30.0)
    );

    fixture
        .device_mut(1)
        .play_one(EventType::Relative, codes::REL_X, 100, true)
        .unwrap();
    assert_eq!(
        fixture.session_mut().query_pointer(master2).unwrap(),
        (130.0, 30.0)
    );
}

#[test]
fn destroyed_barrier_stops_blocking() {
    let mut fixture = two_pointer_fixture();
    fixture
        .session_mut()
        .warp_pointer(CORE_POINTER, 0, 30.0, 30.0)
        .unwrap();

    let barrier = fixture
        .session_mut()
        .create_barrier(BarrierSegment::vertical(50, 0, 50), &[CORE_POINTER])
        .unwrap();
    fixture.session_mut().destroy_barrier(barrier).unwrap();

    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, 100, true)
        .unwrap();
    assert_eq!(
        fixture.session_mut().query_pointer(CORE_POINTER).unwrap(),
        (130.0, 30.0)
    );
}

#[test]
fn invalid_barriers_are_rejected_with_a_value_error() {
    let mut fixture = two_pointer_fixture();

    // Zero length.
    let trapped = fixture
        .session_mut()
        .trapped(|s| {
            s.create_barrier(
                BarrierSegment {
                    x1: 50,
                    y1: 50,
                    x2: 50,
                    y2: 50,
                    allow: 0,
                },
                &[],
            )
            .map(|_| ())
        })
        .unwrap();
    assert_eq!(trapped.map(|e| e.code), Some(ProtocolErrorCode::Value));

    // Not axis-aligned.
    let trapped = fixture
        .session_mut()
        .trapped(|s| {
            s.create_barrier(
                BarrierSegment {
                    x1: 0,
                    y1: 0,
                    x2: 50,
                    y2: 50,
                    allow: 0,
                },
                &[],
            )
            .map(|_| ())
        })
        .unwrap();
    assert_eq!(trapped.map(|e| e.code), Some(ProtocolErrorCode::Value));

    // Destroying a barrier that never existed.
    let trapped = fixture
        .session_mut()
        .trapped(|s| s.destroy_barrier(4242))
        .unwrap();
    assert_eq!(trapped.map(|e| e.code), Some(ProtocolErrorCode::Value));

    // A valid barrier still works afterwards: the trap is scoped and the
    // session survives the expected errors.
    fixture
        .session_mut()
        .create_barrier(BarrierSegment::vertical(50, 0, 50), &[])
        .unwrap();
}

#[test]
fn unbound_barrier_blocks_every_master() {
    let mut fixture = two_pointer_fixture();
    let device2 = fixture.session_mut().find_device("--device2--").unwrap();
    let master2 = fixture
        .session_mut()
        .add_master("Second Master", WAIT)
        .unwrap();
    fixture
        .session_mut()
        .attach_slave(device2.id, master2)
        .unwrap();
    for master in [CORE_POINTER, master2] {
        fixture
            .session_mut()
            .warp_pointer(master, 0, 30.0, 30.0)
            .unwrap();
    }

    // An empty device list binds the barrier to all masters.
    fixture
        .session_mut()
        .create_barrier(BarrierSegment::vertical(50, 0, 50), &[])
        .unwrap();

    fixture
        .device_mut(0)
        .play_one(EventType::Relative, codes::REL_X, 100, true)
        .unwrap();
    fixture
        .device_mut(1)
        .play_one(EventType::Relative, codes::REL_X, 100, true)
        .unwrap();

    assert_eq!(
        fixture.session_mut().query_pointer(CORE_POINTER).unwrap(),
        (49.0, 30.0)
    );
    assert_eq!(
        fixture.session_mut().query_pointer(master2).unwrap(),
        (49.0, 30.0)
    );
}
