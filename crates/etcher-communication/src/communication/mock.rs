//! Simulated serial bus
//!
//! A [`MockBus`] holds a set of simulated devices, each with a port name, an
//! optional hardware serial number and a responder that decides how the
//! device answers every `\r`-terminated line written to it. It implements
//! both [`PortEnumerator`] and [`PortConnector`], records every line written
//! and counts enumerations and opens, so tests can check exactly what reached
//! the wire. The CLI's `--simulate` mode runs against [`MockBus::simulated_rig`].

use super::{ConnectionParams, PortConnector, PortEnumerator, SerialLink, SerialPortInfo};
use etcher_core::{ConnectionError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

/// How a simulated device answers one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockReply {
    /// Answer with `ok`
    Ack,
    /// Answer with the given response lines
    Reply(Vec<String>),
    /// Do not answer
    Silent,
    /// Accept the line, then behave as if the cable was pulled
    Disconnect,
}

type Responder = Arc<Mutex<dyn FnMut(usize, &str) -> MockReply + Send>>;

/// A simulated serial device
pub struct MockDevice {
    info: SerialPortInfo,
    responder: Responder,
    fail_open: bool,
    write_chunk: Option<usize>,
}

impl MockDevice {
    /// A device that acknowledges every line
    pub fn new(port_name: &str, serial_number: Option<&str>) -> Self {
        let mut info = SerialPortInfo::new(port_name, "Simulated Serial Port");
        if let Some(serial) = serial_number {
            info = info.with_serial_number(serial);
        }
        Self {
            info,
            responder: Arc::new(Mutex::new(|_: usize, _: &str| MockReply::Ack)),
            fail_open: false,
            write_chunk: None,
        }
    }

    /// Never answer (e.g. the laser controller)
    pub fn silent(self) -> Self {
        self.responding(|_, _| MockReply::Silent)
    }

    /// Answer through `responder`, called with the 0-based line index of the
    /// current connection and the line text
    pub fn responding<F>(mut self, responder: F) -> Self
    where
        F: FnMut(usize, &str) -> MockReply + Send + 'static,
    {
        self.responder = Arc::new(Mutex::new(responder));
        self
    }

    /// Acknowledge every line except 1-based `line_number`, which gets no answer
    pub fn timing_out_at(self, line_number: usize) -> Self {
        self.responding(move |index, _| {
            if index + 1 == line_number {
                MockReply::Silent
            } else {
                MockReply::Ack
            }
        })
    }

    /// Accept at most `chunk` bytes per write call
    pub fn with_write_chunk(mut self, chunk: usize) -> Self {
        self.write_chunk = Some(chunk.max(1));
        self
    }

    /// Refuse to open
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }
}

struct DeviceState {
    device: MockDevice,
    written: Vec<String>,
    opens: usize,
}

#[derive(Default)]
struct BusState {
    devices: Vec<DeviceState>,
    enumerations: usize,
    open_links: usize,
    max_open_links: usize,
    fail_enumeration: bool,
}

impl BusState {
    fn device_mut(&mut self, port: &str) -> Option<&mut DeviceState> {
        self.devices
            .iter_mut()
            .find(|d| d.device.info.port_name == port)
    }
}

/// Simulated serial bus
#[derive(Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    /// Port name of the simulated motion controller
    pub const SIM_MOTION_PORT: &'static str = "/dev/ttySIM0";
    /// Port name of the simulated laser controller
    pub const SIM_LASER_PORT: &'static str = "/dev/ttySIM1";

    /// An empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device (builder form)
    pub fn with_device(self, device: MockDevice) -> Self {
        self.plug(device);
        self
    }

    /// Make every enumeration fail
    pub fn failing_enumeration(self) -> Self {
        self.state.lock().fail_enumeration = true;
        self
    }

    /// A bench rig: an acknowledging motion controller and a silent laser
    /// controller, each present only if its serial number is given
    pub fn simulated_rig(motion_serial: Option<&str>, laser_serial: Option<&str>) -> Self {
        let bus = Self::new();
        if let Some(serial) = motion_serial {
            bus.plug(MockDevice::new(Self::SIM_MOTION_PORT, Some(serial)));
        }
        if let Some(serial) = laser_serial {
            bus.plug(MockDevice::new(Self::SIM_LASER_PORT, Some(serial)).silent());
        }
        bus
    }

    /// Attach a device
    pub fn plug(&self, device: MockDevice) {
        self.state.lock().devices.push(DeviceState {
            device,
            written: Vec::new(),
            opens: 0,
        });
    }

    /// Detach a device; open links to it start failing
    pub fn unplug(&self, port: &str) {
        self.state
            .lock()
            .devices
            .retain(|d| d.device.info.port_name != port);
    }

    /// Every line written to `port`, terminators stripped
    pub fn written_lines(&self, port: &str) -> Vec<String> {
        self.state
            .lock()
            .devices
            .iter()
            .find(|d| d.device.info.port_name == port)
            .map(|d| d.written.clone())
            .unwrap_or_default()
    }

    /// Number of enumerations performed
    pub fn enumerations(&self) -> usize {
        self.state.lock().enumerations
    }

    /// Number of times `port` was opened
    pub fn opens(&self, port: &str) -> usize {
        self.state
            .lock()
            .devices
            .iter()
            .find(|d| d.device.info.port_name == port)
            .map_or(0, |d| d.opens)
    }

    /// Total number of successful opens across all devices
    pub fn total_opens(&self) -> usize {
        self.state.lock().devices.iter().map(|d| d.opens).sum()
    }

    /// Links currently open
    pub fn open_links(&self) -> usize {
        self.state.lock().open_links
    }

    /// Highest number of links that were open at the same time
    pub fn max_open_links(&self) -> usize {
        self.state.lock().max_open_links
    }
}

impl PortEnumerator for MockBus {
    fn available_ports(&self) -> Result<Vec<SerialPortInfo>> {
        let mut state = self.state.lock();
        state.enumerations += 1;
        if state.fail_enumeration {
            return Err(ConnectionError::EnumerationFailed {
                reason: "simulated enumeration failure".to_string(),
            }
            .into());
        }
        Ok(state.devices.iter().map(|d| d.device.info.clone()).collect())
    }
}

impl PortConnector for MockBus {
    fn open(&self, params: &ConnectionParams) -> Result<Box<dyn SerialLink>> {
        let mut state = self.state.lock();
        let device = state
            .device_mut(&params.port)
            .ok_or_else(|| ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: "No such device".to_string(),
            })?;

        if device.device.fail_open {
            return Err(ConnectionError::FailedToOpen {
                port: params.port.clone(),
                reason: "Permission denied".to_string(),
            }
            .into());
        }

        device.opens += 1;
        let write_chunk = device.device.write_chunk;
        state.open_links += 1;
        state.max_open_links = state.max_open_links.max(state.open_links);

        Ok(Box::new(MockLink {
            bus: Arc::clone(&self.state),
            port: params.port.clone(),
            pending: Vec::new(),
            rx: VecDeque::new(),
            line_index: 0,
            write_chunk,
            open: true,
            disconnected: false,
        }))
    }
}

struct MockLink {
    bus: Arc<Mutex<BusState>>,
    port: String,
    pending: Vec<u8>,
    rx: VecDeque<u8>,
    line_index: usize,
    write_chunk: Option<usize>,
    open: bool,
    disconnected: bool,
}

impl MockLink {
    fn check_usable(&self) -> io::Result<()> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.disconnected {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
        }
        Ok(())
    }

    fn complete_line(&mut self) -> io::Result<()> {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();

        let mut bus = self.bus.lock();
        let device = match bus.device_mut(&self.port) {
            Some(device) => device,
            None => {
                self.disconnected = true;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device unplugged"));
            }
        };

        device.written.push(line.clone());
        let responder = Arc::clone(&device.device.responder);
        drop(bus);

        // Bus lock released: responders may call back into the bus
        let reply = {
            let mut respond = responder.lock();
            (&mut *respond)(self.line_index, &line)
        };
        self.line_index += 1;

        match reply {
            MockReply::Ack => self.rx.extend(b"ok\r\n"),
            MockReply::Reply(lines) => {
                for response in lines {
                    self.rx.extend(response.as_bytes());
                    self.rx.extend(b"\r\n");
                }
            }
            MockReply::Silent => {}
            MockReply::Disconnect => self.disconnected = true,
        }
        Ok(())
    }
}

impl SerialLink for MockLink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.check_usable()?;
        let accepted = self.write_chunk.map_or(data.len(), |c| c.min(data.len()));

        for &byte in &data[..accepted] {
            match byte {
                b'\r' => self.complete_line()?,
                b'\n' => {}
                other => self.pending.push(other),
            }
        }
        Ok(accepted)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if self.rx.is_empty() {
            if self.disconnected {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "device disconnected"));
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }

        let count = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.rx.clear();
        Ok(())
    }

    fn name(&self) -> String {
        self.port.clone()
    }

    fn close(&mut self) -> io::Result<()> {
        if self.open {
            self.open = false;
            let mut bus = self.bus.lock();
            bus.open_links = bus.open_links.saturating_sub(1);
        }
        Ok(())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_link_acknowledges_lines() {
        let bus = MockBus::new().with_device(MockDevice::new("/dev/ttyUSB0", Some("A1")));
        let mut link = bus.open(&ConnectionParams::serial("/dev/ttyUSB0")).unwrap();

        assert_eq!(link.write(b"G28\r").unwrap(), 4);
        let mut buf = [0u8; 16];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ok\r\n");
        assert_eq!(bus.written_lines("/dev/ttyUSB0"), vec!["G28".to_string()]);
        assert_eq!(bus.open_links(), 1);

        drop(link);
        assert_eq!(bus.open_links(), 0);
    }

    #[test]
    fn test_mock_link_read_times_out_when_idle() {
        let bus = MockBus::new().with_device(MockDevice::new("COM4", None).silent());
        let mut link = bus.open(&ConnectionParams::serial("COM4")).unwrap();
        link.write(b"$STOP 00\r").unwrap();

        let mut buf = [0u8; 8];
        let err = link.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_responder_may_query_the_bus() {
        let bus = MockBus::new();
        let observer = bus.clone();
        bus.plug(MockDevice::new("/dev/ttyUSB0", None).responding(move |_, _| {
            MockReply::Reply(vec![format!("seen {}", observer.written_lines("/dev/ttyUSB0").len())])
        }));
        let mut link = bus.open(&ConnectionParams::serial("/dev/ttyUSB0")).unwrap();

        link.write(b"G28\r").unwrap();
        let mut buf = [0u8; 16];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"seen 1\r\n");
    }

    #[test]
    fn test_open_unknown_port_fails() {
        let bus = MockBus::new();
        assert!(bus.open(&ConnectionParams::serial("/dev/ttyACM9")).is_err());
        assert_eq!(bus.total_opens(), 0);
    }
}
