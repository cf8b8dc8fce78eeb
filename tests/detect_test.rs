#![cfg(test)]

use cascade::cascade_core::{AdminStatus, FeatureId, Opcode, TransportCmd};
use serial_test::serial;


/// Checks against real boards.
///
/// Note: These tests require physical hardware to run. By default, they are
/// annotated with #[ignore] to avoid false failures on systems without hardware.
/// To run all hardware tests:
///
///   cargo test --test detect_test --features test_hardware
#[test]
#[serial]
#[cfg_attr(not(feature = "test_hardware"), ignore = "Requires hardware")]
fn every_board_answers_hw_info_and_info() {
    if !test_utils::hardware_available() {
        return;
    }

    let config = cascade::config::load(None).unwrap();
    for device in cascade::detect_devices(&config).unwrap() {
        let mut cmd = TransportCmd::feature(Opcode::GetFeature, FeatureId::HwInfo);
        device.admin_command(&mut cmd).unwrap();
        assert_eq!(cmd.status(), AdminStatus::NO_ERROR);
        assert_eq!(cmd.cq.data[1], device.topology().total_chip_count);

        let mut cmd = TransportCmd::feature(Opcode::GetFeature, FeatureId::Info);
        device.admin_command(&mut cmd).unwrap();
        assert_eq!(cmd.status(), AdminStatus::NO_ERROR);
        println!(
            "{} device {}: firmware info {:08x?}",
            device.transport_name(),
            device.id,
            &cmd.cq.data[..7]
        );
    }
}
