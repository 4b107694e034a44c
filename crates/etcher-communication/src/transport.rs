//! Line Transport
//!
//! Owns one open connection to the motion controller and implements the
//! acknowledgment handshake: every line goes out terminated by `\r`, then the
//! transport blocks until the controller answers.
//!
//! What counts as an answer is firmware behaviour, so it is carried in an
//! [`AckPolicy`] rather than assumed:
//! - a response equal to `ack_token` acknowledges the line
//! - a response starting with `error_prefix` rejects it
//! - a response containing `busy_token` restarts the deadline, but never past
//!   `max_busy_wait` after the line was sent
//! - anything else (banners, status chatter) is ignored
//!
//! The wait also ends as soon as the caller's [`CancelToken`] is set.

use crate::communication::{ConnectionParams, PortConnector, SerialLink};
use crate::streaming::CancelToken;
use etcher_core::{ConnectionError, Error, Result};
use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// Acknowledgment handshake parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckPolicy {
    /// Response that acknowledges a line
    pub ack_token: String,
    /// Prefix of responses that reject a line
    pub error_prefix: Option<String>,
    /// Substring of responses that report the controller as busy
    pub busy_token: Option<String>,
    /// How long to wait for an acknowledgment
    pub timeout: Duration,
    /// Longest total wait for one line while the controller reports busy
    pub max_busy_wait: Duration,
    /// Pause between polls of an idle port
    pub poll_interval: Duration,
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self {
            ack_token: "ok".to_string(),
            error_prefix: Some("error".to_string()),
            busy_token: Some("busy".to_string()),
            timeout: Duration::from_secs(30),
            max_busy_wait: Duration::from_secs(120),
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl AckPolicy {
    /// Set the acknowledgment timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the total busy wait allowed per line
    pub fn with_max_busy_wait(mut self, max_busy_wait: Duration) -> Self {
        self.max_busy_wait = max_busy_wait;
        self
    }

    /// Set the acknowledgment token
    pub fn with_ack_token(mut self, token: impl Into<String>) -> Self {
        self.ack_token = token.into();
        self
    }

    /// Set the idle poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Responses arrive trimmed, so tokens are compared trimmed as well
    fn classify(&self, response: &str) -> Response {
        if response == self.ack_token.trim() {
            Response::Ack
        } else if self
            .error_prefix
            .as_deref()
            .map(str::trim)
            .is_some_and(|p| !p.is_empty() && response.starts_with(p))
        {
            Response::Error
        } else if self
            .busy_token
            .as_deref()
            .map(str::trim)
            .is_some_and(|b| !b.is_empty() && response.contains(b))
        {
            Response::Busy
        } else {
            Response::Other
        }
    }
}

enum Response {
    Ack,
    Error,
    Busy,
    Other,
}

/// Outcome of writing one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// The controller acknowledged the line
    Acknowledged,
    /// The controller answered with an error response
    Rejected(String),
    /// No acknowledgment before the deadline
    TimedOut,
    /// The caller cancelled while waiting for the answer
    Cancelled,
}

impl LineOutcome {
    /// Whether the line was acknowledged
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, Self::Acknowledged)
    }
}

/// Acknowledgment-gated connection to the motion controller
pub struct LineTransport {
    link: Box<dyn SerialLink>,
    port: String,
    policy: AckPolicy,
    pending: String,
}

impl LineTransport {
    /// Open `device_path` at 9600-8-N-1
    ///
    /// Input left over from before the connection (boot banners and the
    /// like) is discarded.
    pub fn open(
        connector: &dyn PortConnector,
        device_path: &str,
        policy: AckPolicy,
    ) -> Result<Self> {
        let params = ConnectionParams::serial(device_path)
            .with_timeout_ms(policy.poll_interval.as_millis() as u64);
        let mut link = connector.open(&params)?;

        if let Err(e) = link.discard_input() {
            tracing::debug!("Could not discard stale input on {}: {}", device_path, e);
        }

        Ok(Self {
            link,
            port: device_path.to_string(),
            policy,
            pending: String::new(),
        })
    }

    /// Wrap an already-open link
    pub fn from_link(link: Box<dyn SerialLink>, policy: AckPolicy) -> Self {
        Self {
            port: link.name(),
            link,
            policy,
            pending: String::new(),
        }
    }

    /// Device path of the connection
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Send one line and wait for the controller's answer
    ///
    /// Trailing line terminators in `line` are replaced by a single `\r`.
    /// I/O failures are errors; a missing or negative answer is an outcome.
    pub fn write_line(&mut self, line: &str) -> Result<LineOutcome> {
        self.write_line_with(line, &CancelToken::new())
    }

    /// Like [`write_line`](Self::write_line), but gives up waiting once
    /// `cancel` is set
    pub fn write_line_with(&mut self, line: &str, cancel: &CancelToken) -> Result<LineOutcome> {
        let frame = format!("{}\r", line.trim_end_matches(['\r', '\n']));
        let sent_at = Instant::now();
        let hard_deadline = sent_at + self.policy.timeout.max(self.policy.max_busy_wait);
        let mut deadline = sent_at + self.policy.timeout;

        tracing::debug!("-> {}: {}", self.port, frame.trim_end());
        if !write_fully(self.link.as_mut(), frame.as_bytes(), deadline, self.policy.poll_interval)
            .map_err(|e| self.io_error(e))?
        {
            return Ok(LineOutcome::TimedOut);
        }
        self.link.flush().map_err(|e| self.io_error(e))?;

        let mut buf = [0u8; 256];
        loop {
            while let Some(response) = self.next_response() {
                tracing::debug!("<- {}: {}", self.port, response);
                match self.policy.classify(&response) {
                    Response::Ack => return Ok(LineOutcome::Acknowledged),
                    Response::Error => return Ok(LineOutcome::Rejected(response)),
                    Response::Busy => {
                        deadline = (Instant::now() + self.policy.timeout).min(hard_deadline)
                    }
                    Response::Other => {}
                }
            }

            if Instant::now() >= deadline {
                return Ok(LineOutcome::TimedOut);
            }
            if cancel.is_cancelled() {
                tracing::debug!("Wait on {} cancelled", self.port);
                return Ok(LineOutcome::Cancelled);
            }

            match self.link.read(&mut buf) {
                Ok(0) => thread::sleep(self.policy.poll_interval),
                Ok(n) => self.pending.push_str(&String::from_utf8_lossy(&buf[..n])),
                Err(e) if is_retryable(&e) => thread::sleep(self.policy.poll_interval),
                Err(e) => return Err(self.io_error(e)),
            }
        }
    }

    /// Close the connection
    pub fn close(mut self) -> Result<()> {
        let port = self.port.clone();
        self.link.close().map_err(|e| io_error(&port, e))
    }

    fn next_response(&mut self) -> Option<String> {
        loop {
            let end = self.pending.find(['\r', '\n'])?;
            let response = self.pending[..end].trim().to_string();
            self.pending.drain(..=end);
            if !response.is_empty() {
                return Some(response);
            }
        }
    }

    fn io_error(&self, e: io::Error) -> Error {
        io_error(&self.port, e)
    }
}

fn io_error(port: &str, e: io::Error) -> Error {
    ConnectionError::Io {
        port: port.to_string(),
        reason: e.to_string(),
    }
    .into()
}

fn is_retryable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Write all of `data`, retrying partial and timed-out writes until `deadline`
///
/// Returns `Ok(false)` if the deadline passed before everything was written.
pub(crate) fn write_fully(
    link: &mut dyn SerialLink,
    data: &[u8],
    deadline: Instant,
    poll_interval: Duration,
) -> io::Result<bool> {
    let mut written = 0;
    while written < data.len() {
        if Instant::now() >= deadline {
            return Ok(false);
        }
        match link.write(&data[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "port accepted no data",
                ))
            }
            Ok(n) => written += n,
            Err(e) if is_retryable(&e) => thread::sleep(poll_interval),
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
