use etcher_communication::{AckPolicy, LineProgress, MockBus, MockDevice, StreamOptions};
use etcher_core::reasons;
use etcher_session::{DeviceSession, Hardware, HomingProgram};
use etcher_settings::Config;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

const MOTION_PORT: &str = "/dev/ttyUSB0";
const SERIAL: &str = "MCU-1234";

fn fast_policy() -> AckPolicy {
    AckPolicy::default()
        .with_timeout(Duration::from_millis(30))
        .with_poll_interval(Duration::from_millis(1))
}

fn homing_file(dir: &TempDir, lines: usize) -> PathBuf {
    let path = dir.path().join("homing.gcode");
    let text: Vec<String> = (1..=lines).map(|i| format!("G28 ; step {}", i)).collect();
    std::fs::write(&path, text.join("\n")).unwrap();
    path
}

fn session(bus: &MockBus, serial: Option<&str>, homing: PathBuf) -> DeviceSession {
    DeviceSession::new(
        &Hardware::simulated(bus.clone()),
        serial.map(str::to_string),
        homing,
        fast_policy(),
        StreamOptions::default(),
    )
}

#[test]
fn test_prepare_ready_when_homing_acknowledged() {
    let dir = TempDir::new().unwrap();
    let bus = MockBus::new().with_device(MockDevice::new(MOTION_PORT, Some(SERIAL)));

    let outcome = session(&bus, Some(SERIAL), homing_file(&dir, 5)).prepare();

    assert!(outcome.ready);
    assert_eq!(outcome.device_path.as_deref(), Some(MOTION_PORT));
    assert!(outcome.reason.is_empty());
    assert_eq!(bus.written_lines(MOTION_PORT).len(), 5);
    assert_eq!(bus.open_links(), 0);
}

#[test]
fn test_prepare_streaming_error_when_line_three_times_out() {
    let dir = TempDir::new().unwrap();
    let bus = MockBus::new()
        .with_device(MockDevice::new(MOTION_PORT, Some(SERIAL)).timing_out_at(3));

    let outcome = session(&bus, Some(SERIAL), homing_file(&dir, 5)).prepare();

    assert!(!outcome.ready);
    assert_eq!(outcome.reason, reasons::STREAMING_ERROR);
    assert_eq!(bus.written_lines(MOTION_PORT).len(), 3);
    assert_eq!(bus.open_links(), 0);
}

#[test]
fn test_prepare_port_not_found_without_io() {
    let dir = TempDir::new().unwrap();
    let bus = MockBus::new().with_device(MockDevice::new(MOTION_PORT, Some("OTHER-1")));
    let session = session(&bus, Some(SERIAL), homing_file(&dir, 5));

    let first = session.prepare();
    let second = session.prepare();

    assert!(!first.ready);
    assert_eq!(first.reason, reasons::PORT_NOT_FOUND);
    assert_eq!(first.reason, second.reason);
    assert_eq!(first.device_path, None);
    assert_eq!(bus.total_opens(), 0);
    assert_eq!(bus.enumerations(), 2);
}

#[test]
fn test_prepare_without_serial_number_skips_enumeration() {
    let dir = TempDir::new().unwrap();
    let bus = MockBus::new().with_device(MockDevice::new(MOTION_PORT, Some(SERIAL)));

    let outcome = session(&bus, None, homing_file(&dir, 2)).prepare();

    assert_eq!(outcome.reason, reasons::PORT_NOT_FOUND);
    assert_eq!(bus.enumerations(), 0);
    assert_eq!(bus.total_opens(), 0);
}

#[test]
fn test_prepare_enumeration_failure_is_port_not_found() {
    let dir = TempDir::new().unwrap();
    let bus = MockBus::new()
        .with_device(MockDevice::new(MOTION_PORT, Some(SERIAL)))
        .failing_enumeration();

    let outcome = session(&bus, Some(SERIAL), homing_file(&dir, 2)).prepare();

    assert_eq!(outcome.reason, reasons::PORT_NOT_FOUND);
    assert!(outcome.detail.is_some());
}

#[test]
fn test_prepare_missing_homing_file_is_streaming_error() {
    let dir = TempDir::new().unwrap();
    let bus = MockBus::new().with_device(MockDevice::new(MOTION_PORT, Some(SERIAL)));

    let outcome = session(&bus, Some(SERIAL), dir.path().join("missing.gcode")).prepare();

    assert!(!outcome.ready);
    assert_eq!(outcome.reason, reasons::STREAMING_ERROR);
    assert!(outcome.detail.unwrap().contains("missing.gcode"));
    assert_eq!(bus.total_opens(), 0);
}

#[test]
fn test_prepare_open_failure_is_streaming_error() {
    let dir = TempDir::new().unwrap();
    let bus = MockBus::new()
        .with_device(MockDevice::new(MOTION_PORT, Some(SERIAL)).failing_open());

    let outcome = session(&bus, Some(SERIAL), homing_file(&dir, 3)).prepare();

    assert_eq!(outcome.reason, reasons::STREAMING_ERROR);
    assert_eq!(outcome.device_path.as_deref(), Some(MOTION_PORT));
}

#[test]
fn test_prepare_reports_homing_progress() {
    let dir = TempDir::new().unwrap();
    let bus = MockBus::new().with_device(MockDevice::new(MOTION_PORT, Some(SERIAL)));
    let session = session(&bus, Some(SERIAL), homing_file(&dir, 4));

    let mut seen = Vec::new();
    let mut observer = |progress: &LineProgress<'_>| {
        seen.push((progress.line_number, progress.total_lines));
    };
    let outcome = session.prepare_with(&mut observer, &Default::default());

    assert!(outcome.ready);
    assert_eq!(seen, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
}

#[test]
fn test_from_config_resolves_homing_against_config_dir() {
    let dir = TempDir::new().unwrap();
    homing_file(&dir, 3);
    let config_path = dir.path().join("config.toml");
    let text = concat!(
        "[devices]\nserial_number = \"MCU-1234\"\n\n",
        "[protocol]\nack_timeout_ms = 50\npoll_interval_ms = 1\n\n",
        "[files]\nhoming_program = \"homing.gcode\"\n",
    );
    std::fs::write(&config_path, text).unwrap();
    let config = Config::load_from_file(&config_path).unwrap();
    let bus = MockBus::new().with_device(MockDevice::new(MOTION_PORT, Some(SERIAL)));

    let session = DeviceSession::from_config(&Hardware::simulated(bus.clone()), &config);

    assert_eq!(
        session.homing_program(),
        &HomingProgram::File(dir.path().join("homing.gcode"))
    );
    assert!(session.prepare().ready);
    assert_eq!(bus.written_lines(MOTION_PORT).len(), 3);
}

#[test]
fn test_default_config_homes_with_bundled_program() {
    let mut config = Config::default().with_base_dir("/nonexistent/etcher");
    config.devices.serial_number = Some(SERIAL.to_string());
    config.protocol.ack_timeout_ms = 50;
    config.protocol.poll_interval_ms = 1;
    let bus = MockBus::new().with_device(MockDevice::new(MOTION_PORT, Some(SERIAL)));

    let session = DeviceSession::from_config(&Hardware::simulated(bus.clone()), &config);
    let outcome = session.prepare();

    assert_eq!(session.homing_program(), &HomingProgram::Bundled);
    assert!(outcome.ready, "bundled homing failed: {:?}", outcome.detail);
    let bundled = HomingProgram::Bundled.load().unwrap();
    assert!(!bundled.is_empty());
    assert_eq!(bus.written_lines(MOTION_PORT).len(), bundled.len());
}
