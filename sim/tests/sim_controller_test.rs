/// End-to-end tests: the real controller stack against the simulated firmware.
use arm_gcode::{
    ArmError, CoordinateMode, DeviceLink, LinkConfig, RobotController, Role, TrajectoryStore,
};
use sim::SimFirmware;

fn connected(dir: &std::path::Path) -> (SimFirmware, RobotController) {
    let firmware = SimFirmware::new();
    let config = LinkConfig::new("sim".to_string(), 115200).without_delays();
    let link = DeviceLink::new(Box::new(firmware.clone()), config);
    let store = TrajectoryStore::open(dir).unwrap();
    let mut controller = RobotController::new(link, store);
    assert!(controller.connect(3), "simulator should accept the connection");
    (firmware, controller)
}

#[test]
fn test_boot_banner_is_flushed_before_probe() {
    let dir = tempfile::tempdir().unwrap();
    let (firmware, mut controller) = connected(dir.path());

    assert_eq!(firmware.received(), vec!["M114", "G90"]);
    let status = controller.status().unwrap();
    assert!(!status.contains("start"), "stale banner leaked into status: {status}");
}

#[test]
fn test_moves_update_reported_position() {
    let dir = tempfile::tempdir().unwrap();
    let (firmware, mut controller) = connected(dir.path());

    controller.set_motors(true).unwrap();
    controller.move_to(10.0, 20.0, 30.0, 100.0).unwrap();
    assert!(controller.set_coordinate_mode(CoordinateMode::Relative));
    let outcome = controller.move_to(1.5, 0.0, -5.0, 0.0).unwrap();
    assert_eq!(outcome.summary(), "LINEAR MOVE: [X:11.50 Y:20.00 Z:25.00]");

    let status = controller.status().unwrap();
    assert!(status.contains("X:11.50 Y:20.00 Z:25.00"), "status was {status}");
    assert_eq!(firmware.state().position, [11.5, 20.0, 25.0]);
}

#[test]
fn test_injected_firmware_error_surfaces_as_protocol_error() {
    let dir = tempfile::tempdir().unwrap();
    let (firmware, mut controller) = connected(dir.path());
    controller.set_motors(true).unwrap();

    firmware.fail_next("AXIS LIMIT");
    match controller.move_to(1.0, 1.0, 1.0, 100.0) {
        Err(ArmError::Protocol(msg)) => assert_eq!(msg, "AXIS LIMIT"),
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert_eq!(firmware.state().position, [0.0, 0.0, 0.0]);
}

#[test]
fn test_silent_firmware_fails_connect_probe() {
    let dir = tempfile::tempdir().unwrap();
    let firmware = SimFirmware::new();
    firmware.go_silent(true);
    let config = LinkConfig::new("sim".to_string(), 115200).without_delays();
    let link = DeviceLink::new(Box::new(firmware.clone()), config);
    let mut controller = RobotController::new(link, TrajectoryStore::open(dir.path()).unwrap());

    assert!(!controller.connect(2));
    assert_eq!(firmware.received(), vec!["M114", "M114"]);
}

#[test]
fn test_refused_connection_never_sends() {
    let dir = tempfile::tempdir().unwrap();
    let firmware = SimFirmware::new();
    firmware.refuse_connections(true);
    let config = LinkConfig::new("sim".to_string(), 115200).without_delays();
    let link = DeviceLink::new(Box::new(firmware.clone()), config);
    let mut controller = RobotController::new(link, TrajectoryStore::open(dir.path()).unwrap());

    assert!(!controller.connect(3));
    assert!(firmware.received().is_empty());
}

#[test]
fn test_record_then_replay() {
    let dir = tempfile::tempdir().unwrap();
    let (firmware, mut controller) = connected(dir.path());
    controller.set_motors(true).unwrap();

    assert!(controller.start_recording(9, "Box Pattern"));
    controller.move_to(10.0, 0.0, 5.0, 120.0).unwrap();
    controller.set_gripper(true).unwrap();
    controller.move_to(10.0, 10.0, 5.0, 120.0).unwrap();
    controller.set_gripper(false).unwrap();
    assert!(controller.stop_recording());

    let files = controller.list_files(9, Role::Operator);
    assert_eq!(files.len(), 1);
    assert!(controller.list_files(10, Role::Operator).is_empty());

    let report = controller.run_file(9, "Box Pattern").unwrap();
    assert_eq!(report.executed, 4);
    assert_eq!(report.skipped, 0);
    assert_eq!(firmware.state().position, [10.0, 10.0, 5.0]);
    assert!(!firmware.state().gripper_closed);

    let received = firmware.received();
    let tail: Vec<&str> = received[received.len() - 6..].iter().map(String::as_str).collect();
    assert_eq!(
        tail,
        vec![
            "G90",
            "G28",
            "G1 X10.00 Y0.00 Z5.00 F120",
            "M3",
            "G1 X10.00 Y10.00 Z5.00 F120",
            "M5",
        ]
    );
}

#[test]
fn test_upload_and_run_in_relative_mode_forces_absolute() {
    let dir = tempfile::tempdir().unwrap();
    let (firmware, mut controller) = connected(dir.path());
    controller.set_motors(true).unwrap();
    assert!(controller.set_coordinate_mode(CoordinateMode::Relative));

    let name = controller
        .upload_file(4, "line.gcode", "G1 X5 Y5 Z5 F60\nG1 X6 Y5 Z5\n")
        .unwrap();
    assert!(name.starts_with("4__line__") && name.ends_with(".gcode"));

    controller.run_file(4, &name).unwrap();
    assert!(firmware.state().absolute);
    assert_eq!(firmware.state().position, [6.0, 5.0, 5.0]);
    assert_eq!(controller.state().coordinate_mode, CoordinateMode::Absolute);

    assert!(controller.delete_file(4, &name).unwrap());
    assert!(!controller.delete_file(4, &name).unwrap());
}

#[test]
fn test_playback_after_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let (firmware, mut controller) = connected(dir.path());
    controller.set_motors(true).unwrap();
    let stored = controller.upload_file(2, "square", "G1 X5 Y5 Z5\nG1 X0 Y0 Z0\n").unwrap();

    controller.disconnect();
    assert!(controller.connect(1));
    assert!(!firmware.state().motors_enabled, "reopening the port resets the board");
    assert!(!controller.state().motors_enabled);

    let report = controller.run_file(2, &stored).unwrap();
    assert_eq!(report.executed, 2);
    assert!(firmware.received().iter().rev().any(|line| line == "M17"));
    assert!(controller.state().motors_enabled);
}
