//! # Etcher Communication
//!
//! Serial communication with the etching rig's two controllers:
//! - Port discovery by hardware serial number
//! - Acknowledgment-gated line transport to the motion controller
//! - Whole-program G-code streaming with progress and cancellation
//! - Fire/stop commands to the laser controller
//!
//! Hardware access goes through the [`PortEnumerator`] and [`PortConnector`]
//! traits; [`SystemPorts`] is the real implementation and [`MockBus`] a
//! simulated one.

pub mod communication;
pub mod laser;
pub mod resolver;
pub mod streaming;
pub mod transport;

pub use communication::{
    list_ports, mock::MockBus, mock::MockDevice, mock::MockReply, ConnectionParams,
    PortConnector, PortEnumerator, RealSerialPort, SerialLink, SerialParity, SerialPortInfo,
    SystemPorts,
};

pub use laser::{LaserCommands, LaserControl, LaserSwitch};
pub use resolver::{find_by_serial, PortResolver, SerialDevice};
pub use streaming::{
    CancelToken, GcodeProgram, GcodeStreamer, LineProgress, NoopObserver, StreamObserver,
    StreamOptions, StreamReport,
};
pub use transport::{AckPolicy, LineOutcome, LineTransport};
