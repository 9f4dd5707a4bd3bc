mod common;

use common::{Event, Rig};
use embassy_futures::block_on;
use orchestra_board::{BoardError, config};
use orchestra_board::hardware::Color;

#[test]
fn status_snapshot_reads_the_sensor() {
    let rig = Rig::new();
    rig.light.set(u16::MAX);

    let status = block_on(rig.device.status()).unwrap();
    assert_eq!(status.device_id.as_str(), "a00bc200ff10");
    assert_eq!(status.api_version, config::API_VERSION);
    assert_eq!(status.firmware_version, env!("CARGO_PKG_VERSION"));
    assert_eq!(status.light.raw, u16::MAX);
    assert_eq!(status.light.norm, 1.0);
    assert_eq!(status.light.lux_est, 200.0);
}

#[test]
fn sounding_guard_silences_on_drop() {
    let rig = Rig::new();
    {
        let sounding = rig.device.sound(440, 0.5).unwrap();
        sounding.set_duty(0.25).unwrap();
    }
    assert_eq!(
        rig.trace.events(),
        vec![
            Event::Frequency(440),
            Event::Duty(32767),
            Event::Duty(16383),
            Event::Duty(0)
        ]
    );
}

#[test]
fn shutdown_zeroes_outputs_and_latches() {
    let rig = Rig::new();
    rig.device.set_color(Color::GREEN).unwrap();
    assert!(!rig.device.is_halted());

    rig.device.shutdown();
    assert!(rig.device.is_halted());
    assert_eq!(rig.device.color(), Color::OFF);
    assert_eq!(rig.trace.last_duty(), Some(0));

    // Already halted, so this returns immediately
    block_on(rig.device.wait_halted());

    rig.device.shutdown();
    assert!(rig.device.is_halted());
}

#[test]
fn halted_board_refuses_to_sound() {
    let rig = Rig::new();
    let sounding = rig.device.sound(440, 0.5).unwrap();
    rig.device.shutdown();

    assert_eq!(sounding.set_duty(0.5).err(), Some(BoardError::Halted));
    assert!(matches!(rig.device.sound(880, 0.5), Err(BoardError::Halted)));
    drop(sounding);
    assert_eq!(rig.trace.last_duty(), Some(0));
    assert!(!rig.trace.events().contains(&Event::Frequency(880)));
}

#[test]
fn long_device_ids_are_truncated() {
    let rig = Rig::with_id(&"x".repeat(40));
    assert_eq!(rig.device.device_id().len(), 32);
}
