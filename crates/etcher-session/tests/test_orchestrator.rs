use etcher_communication::{
    AckPolicy, GcodeProgram, LaserCommands, LaserControl, LaserSwitch, MockBus, MockDevice,
    MockReply, StreamOptions,
};
use etcher_core::{reasons, LaserCommand, LaserOutcome, SessionState};
use etcher_session::{DeviceSession, EtchSession, Hardware};
use etcher_settings::Config;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const MOTION_PORT: &str = "/dev/ttyUSB0";
const LASER_PORT: &str = "/dev/ttyUSB1";
const SERIAL: &str = "MCU-1234";
const LASER_SERIAL: &str = "LZR-77";

/// Laser that counts commands and records how many motion links were open
/// whenever it was stopped
struct RecordingLaser {
    bus: MockBus,
    fires: AtomicUsize,
    stops: AtomicUsize,
    open_links_at_stop: Mutex<Vec<usize>>,
    reachable: bool,
}

impl RecordingLaser {
    fn new(bus: &MockBus, reachable: bool) -> Arc<Self> {
        Arc::new(Self {
            bus: bus.clone(),
            fires: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            open_links_at_stop: Mutex::new(Vec::new()),
            reachable,
        })
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn fires(&self) -> usize {
        self.fires.load(Ordering::SeqCst)
    }

    fn outcome(&self, command: LaserCommand) -> LaserOutcome {
        if self.reachable {
            LaserOutcome::Sent {
                command,
                port: LASER_PORT.to_string(),
            }
        } else {
            LaserOutcome::DeviceNotFound {
                command,
                warning: "Could not find laser to turn off! Turn it off manually!".to_string(),
            }
        }
    }
}

impl LaserSwitch for RecordingLaser {
    fn fire(&self) -> LaserOutcome {
        self.fires.fetch_add(1, Ordering::SeqCst);
        self.outcome(LaserCommand::Fire)
    }

    fn stop(&self) -> LaserOutcome {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.open_links_at_stop
            .lock()
            .unwrap()
            .push(self.bus.open_links());
        self.outcome(LaserCommand::Stop)
    }
}

struct Rig {
    dir: TempDir,
    bus: MockBus,
    laser: Arc<RecordingLaser>,
    session: EtchSession,
}

impl Rig {
    fn new(motion: MockDevice, laser_reachable: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let homing = dir.path().join("homing.gcode");
        std::fs::write(&homing, "G21\nG90\nG28\n").unwrap();

        let bus = MockBus::new().with_device(motion);
        let laser = RecordingLaser::new(&bus, laser_reachable);
        let device = DeviceSession::new(
            &Hardware::simulated(bus.clone()),
            Some(SERIAL.to_string()),
            homing,
            AckPolicy::default()
                .with_timeout(Duration::from_millis(30))
                .with_poll_interval(Duration::from_millis(1)),
            StreamOptions::default(),
        );
        let session = EtchSession::new(device, laser.clone());

        Self {
            dir,
            bus,
            laser,
            session,
        }
    }

    fn program(&self, lines: usize) -> PathBuf {
        let path = self.dir.path().join("job.gcode");
        let text: Vec<String> = (1..=lines).map(|i| format!("G1 X{} F600", i)).collect();
        std::fs::write(&path, text.join("\n")).unwrap();
        path
    }
}

#[test]
fn test_prepare_then_etch_completes() {
    let mut rig = Rig::new(MockDevice::new(MOTION_PORT, Some(SERIAL)), true);

    let prepared = rig.session.prepare();
    assert!(prepared.ready);
    assert_eq!(rig.session.state(), SessionState::Ready);
    assert_eq!(rig.session.device_path(), Some(MOTION_PORT));

    let job = rig.program(10);
    let result = rig.session.etch(&job);

    assert!(result.success, "{:?}", result);
    assert!(result.warnings.is_empty());
    assert_eq!(rig.session.state(), SessionState::Done);
    assert_eq!(rig.session.device_path(), None);
    assert_eq!(rig.bus.written_lines(MOTION_PORT).len(), 3 + 10);
    assert_eq!(rig.laser.fires(), 1);
    assert_eq!(rig.laser.stops(), 1);
}

#[test]
fn test_etch_before_prepare_is_refused() {
    let mut rig = Rig::new(MockDevice::new(MOTION_PORT, Some(SERIAL)), true);
    let job = rig.program(3);

    let result = rig.session.etch(&job);

    assert!(!result.success);
    assert_eq!(result.reason, reasons::NOT_PREPARED);
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert_eq!(rig.bus.total_opens(), 0);
    assert_eq!(rig.laser.stops(), 0);
}

#[test]
fn test_no_second_etch_without_prepare() {
    let mut rig = Rig::new(MockDevice::new(MOTION_PORT, Some(SERIAL)), true);
    let job = rig.program(2);
    assert!(rig.session.prepare().ready);
    assert!(rig.session.etch(&job).success);
    let opens = rig.bus.total_opens();

    let again = rig.session.etch(&job);

    assert_eq!(again.reason, reasons::NOT_PREPARED);
    assert_eq!(rig.session.state(), SessionState::Done);
    assert_eq!(rig.bus.total_opens(), opens);

    assert!(rig.session.prepare().ready);
    assert!(rig.session.etch(&job).success);
}

#[test]
fn test_stream_failure_stops_laser_exactly_once() {
    // Homing is 3 lines; the job times out on its 4th line
    let motion = MockDevice::new(MOTION_PORT, Some(SERIAL)).responding({
        let mut total = 0;
        move |_, _| {
            total += 1;
            if total == 3 + 4 {
                MockReply::Silent
            } else {
                MockReply::Ack
            }
        }
    });
    let mut rig = Rig::new(motion, true);
    assert!(rig.session.prepare().ready);
    let job = rig.program(8);

    let result = rig.session.etch(&job);

    assert!(!result.success);
    assert_eq!(result.reason, reasons::CRITICAL_STREAM_ERROR);
    assert_eq!(rig.session.state(), SessionState::Failed);
    assert_eq!(rig.laser.stops(), 1);
    assert_eq!(*rig.laser.open_links_at_stop.lock().unwrap(), vec![0]);
    assert_eq!(rig.bus.written_lines(MOTION_PORT).len(), 3 + 4);
}

#[test]
fn test_panic_in_stream_stops_laser_exactly_once() {
    let motion = MockDevice::new(MOTION_PORT, Some(SERIAL)).responding(|_, line| {
        if line.contains("X2 ") {
            panic!("controller fault");
        }
        MockReply::Ack
    });
    let mut rig = Rig::new(motion, true);
    assert!(rig.session.prepare().ready);
    let job = rig.program(5);

    let result = rig.session.etch(&job);

    assert!(!result.success);
    assert_eq!(result.reason, reasons::UNEXPECTED_FAULT);
    assert_eq!(result.detail.as_deref(), Some("controller fault"));
    assert_eq!(rig.session.state(), SessionState::Failed);
    assert_eq!(rig.laser.stops(), 1);
    assert_eq!(rig.bus.open_links(), 0);
}

#[test]
fn test_laser_absent_during_failure_keeps_reason_and_warns() {
    let motion = MockDevice::new(MOTION_PORT, Some(SERIAL)).responding(|_, line| {
        if line.starts_with("G1 X3") {
            MockReply::Reply(vec!["error:9".to_string()])
        } else {
            MockReply::Ack
        }
    });
    let mut rig = Rig::new(motion, false);
    assert!(rig.session.prepare().ready);
    let job = rig.program(5);

    let result = rig.session.etch(&job);

    assert!(!result.success);
    assert_eq!(result.reason, reasons::CRITICAL_STREAM_ERROR);
    assert!(result.detail.unwrap().contains("error:9"));
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("Turn it off manually")));
    assert_eq!(rig.laser.stops(), 1);
}

#[test]
fn test_missing_program_fails_with_safety_stop() {
    let mut rig = Rig::new(MockDevice::new(MOTION_PORT, Some(SERIAL)), true);
    assert!(rig.session.prepare().ready);
    let missing = rig.dir.path().join("nope.gcode");

    let result = rig.session.etch(&missing);

    assert_eq!(result.reason, reasons::CRITICAL_STREAM_ERROR);
    assert_eq!(rig.session.state(), SessionState::Failed);
    assert_eq!(rig.laser.fires(), 0);
    assert_eq!(rig.laser.stops(), 1);
}

#[test]
fn test_cancelled_etch_fails_with_safety_stop() {
    let mut rig = Rig::new(MockDevice::new(MOTION_PORT, Some(SERIAL)), true);
    assert!(rig.session.prepare().ready);
    let cancel = rig.session.cancel_token();
    let program = GcodeProgram::from_lines(["G1 X1", "G1 X2", "G1 X3", "G1 X4"]);

    let mut observer = |progress: &etcher_communication::LineProgress<'_>| {
        if progress.line_number == 2 {
            cancel.cancel();
        }
    };
    let result = rig.session.etch_program_with(&program, &mut observer);

    assert_eq!(result.reason, reasons::CANCELLED);
    assert_eq!(rig.bus.written_lines(MOTION_PORT).len(), 3 + 2);
    assert_eq!(rig.laser.stops(), 1);

    // The cancelled etch consumed the cancellation
    assert!(!cancel.is_cancelled());
    assert!(rig.session.prepare().ready);
    assert!(rig.session.etch_program(&program).success);
}

#[test]
fn test_cancel_before_prepare_stops_the_pre_test() {
    let mut rig = Rig::new(MockDevice::new(MOTION_PORT, Some(SERIAL)), true);
    let cancel = rig.session.cancel_token();
    cancel.cancel();

    let outcome = rig.session.prepare();

    assert!(!outcome.ready);
    assert_eq!(outcome.reason, reasons::CANCELLED);
    assert!(rig.bus.written_lines(MOTION_PORT).is_empty());
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert!(!cancel.is_cancelled());

    assert!(rig.session.prepare().ready);
    assert_eq!(rig.bus.written_lines(MOTION_PORT).len(), 3);
}

#[test]
fn test_cancel_between_prepare_and_etch_stops_the_etch() {
    let mut rig = Rig::new(MockDevice::new(MOTION_PORT, Some(SERIAL)), true);
    assert!(rig.session.prepare().ready);
    rig.session.cancel_token().cancel();

    let result = rig.session.etch_program(&GcodeProgram::from_lines(["G1 X1", "G1 X2"]));

    assert_eq!(result.reason, reasons::CANCELLED);
    assert_eq!(rig.bus.written_lines(MOTION_PORT).len(), 3);
    assert_eq!(rig.laser.stops(), 1);
    assert_eq!(rig.session.state(), SessionState::Failed);
}

#[test]
fn test_without_fire_on_etch_success_leaves_laser_alone() {
    let mut rig = Rig::new(MockDevice::new(MOTION_PORT, Some(SERIAL)), true);
    let dir = TempDir::new().unwrap();
    let homing = dir.path().join("homing.gcode");
    std::fs::write(&homing, "G28\n").unwrap();
    let device = DeviceSession::new(
        &Hardware::simulated(rig.bus.clone()),
        Some(SERIAL.to_string()),
        homing,
        AckPolicy::default().with_timeout(Duration::from_millis(30)),
        StreamOptions::default(),
    );
    rig.session = EtchSession::new(device, rig.laser.clone()).with_fire_on_etch(false);
    assert!(rig.session.prepare().ready);

    let result = rig.session.etch_program(&GcodeProgram::from_lines(["G1 X1"]));

    assert!(result.success);
    assert_eq!(rig.laser.fires(), 0);
    assert_eq!(rig.laser.stops(), 0);
}

#[test]
fn test_failed_prepare_returns_to_idle() {
    let mut rig = Rig::new(MockDevice::new(MOTION_PORT, Some(SERIAL)), true);
    assert!(rig.session.prepare().ready);

    rig.bus.unplug(MOTION_PORT);
    let outcome = rig.session.prepare();

    assert_eq!(outcome.reason, reasons::PORT_NOT_FOUND);
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert_eq!(rig.session.device_path(), None);
}

#[test]
fn test_simulated_rig_from_config_never_overlaps_connections() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("homing.gcode"), "G21\nG28\n").unwrap();
    let config_path = dir.path().join("config.toml");
    let text = format!(
        concat!(
            "[devices]\nserial_number = \"{}\"\nlaser_number = \"{}\"\n\n",
            "[protocol]\nack_timeout_ms = 50\npoll_interval_ms = 1\n\n",
            "[files]\nhoming_program = \"homing.gcode\"\n",
        ),
        SERIAL, LASER_SERIAL
    );
    std::fs::write(&config_path, text).unwrap();
    let config = Config::load_from_file(&config_path).unwrap();
    let bus = MockBus::simulated_rig(Some(SERIAL), Some(LASER_SERIAL));
    let mut session = EtchSession::from_config(&Hardware::simulated(bus.clone()), &config);

    assert!(session.prepare().ready);
    let result = session.etch_program(&GcodeProgram::from_lines(["G1 X1", "G1 X2"]));

    assert!(result.success, "{:?}", result);
    assert_eq!(
        bus.written_lines(MockBus::SIM_LASER_PORT),
        vec!["$FIRE 01".to_string(), "$STOP 00".to_string()]
    );
    assert_eq!(bus.max_open_links(), 1);
    assert_eq!(bus.open_links(), 0);
}

#[test]
fn test_stop_laser_without_laser_hardware_warns() {
    let bus = MockBus::new();
    let laser = LaserControl::new(
        Arc::new(bus.clone()),
        Arc::new(bus.clone()),
        Some(LASER_SERIAL.to_string()),
        LaserCommands::default(),
    );
    let device = DeviceSession::new(
        &Hardware::simulated(bus.clone()),
        Some(SERIAL.to_string()),
        "homing.gcode",
        AckPolicy::default(),
        StreamOptions::default(),
    );
    let session = EtchSession::new(device, Arc::new(laser));

    let outcome = session.stop_laser();

    assert!(!outcome.is_sent());
    assert!(outcome.warning().is_some());
    assert_eq!(bus.total_opens(), 0);
}
