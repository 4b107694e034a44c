//! G-code Streamer
//!
//! Drives a [`LineTransport`] through a whole program. The connection is
//! opened once, lines go out in file order, and the first line that is not
//! acknowledged ends the run. The connection is closed on every path before
//! the call returns. A failed run is not resumable; callers restart from
//! line one.

use super::program::GcodeProgram;
use crate::communication::PortConnector;
use crate::transport::{AckPolicy, LineOutcome, LineTransport};
use etcher_core::{Error, ProtocolError, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress after one acknowledged line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineProgress<'a> {
    /// 1-based line number within the program
    pub line_number: usize,
    /// Number of lines in the program
    pub total_lines: usize,
    /// The line that was acknowledged
    pub line: &'a str,
}

/// Receives per-line progress while a program streams
pub trait StreamObserver {
    /// Called after each acknowledged line
    fn on_line_acknowledged(&mut self, progress: &LineProgress<'_>);
}

impl<F> StreamObserver for F
where
    F: FnMut(&LineProgress<'_>),
{
    fn on_line_acknowledged(&mut self, progress: &LineProgress<'_>) {
        self(progress)
    }
}

/// Observer that ignores progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl StreamObserver for NoopObserver {
    fn on_line_acknowledged(&mut self, _progress: &LineProgress<'_>) {}
}

/// Cooperative cancellation flag, checked before every line and while
/// waiting for an acknowledgment
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear a previous request
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Streaming options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOptions {
    /// Do not transmit empty or whitespace-only lines
    pub skip_blank_lines: bool,
}

/// Summary of a completed stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamReport {
    /// Lines transmitted and acknowledged
    pub lines_sent: usize,
    /// Wall time from open to close
    pub elapsed: Duration,
}

/// Transient state of one streaming call
struct StreamSession {
    transport: LineTransport,
    line_index: usize,
    last_status: Option<LineOutcome>,
}

impl StreamSession {
    fn run(
        &mut self,
        program: &GcodeProgram,
        options: StreamOptions,
        timeout: Duration,
        observer: &mut dyn StreamObserver,
        cancel: &CancelToken,
    ) -> Result<usize> {
        let total_lines = program.len();
        let mut sent = 0;

        for (index, line) in program.lines().iter().enumerate() {
            self.line_index = index;
            let line_number = index + 1;

            if cancel.is_cancelled() {
                let port = self.transport.port();
                tracing::warn!("Stream to {} cancelled at line {}", port, line_number);
                return Err(Error::Cancelled { line_number });
            }

            if options.skip_blank_lines && line.trim().is_empty() {
                continue;
            }

            let outcome = self.transport.write_line_with(line, cancel)?;
            self.last_status = Some(outcome.clone());

            match outcome {
                LineOutcome::Acknowledged => {
                    sent += 1;
                    observer.on_line_acknowledged(&LineProgress {
                        line_number,
                        total_lines,
                        line,
                    });
                }
                LineOutcome::TimedOut => {
                    return Err(ProtocolError::AckTimeout {
                        line_number,
                        timeout_ms: timeout.as_millis() as u64,
                    }
                    .into())
                }
                LineOutcome::Rejected(response) => {
                    return Err(ProtocolError::Rejected {
                        line_number,
                        response,
                    }
                    .into())
                }
                LineOutcome::Cancelled => {
                    let port = self.transport.port();
                    tracing::warn!("Stream to {} cancelled at line {}", port, line_number);
                    return Err(Error::Cancelled { line_number });
                }
            }
        }

        Ok(sent)
    }
}

/// Streams G-code programs to the motion controller
#[derive(Clone)]
pub struct GcodeStreamer {
    connector: Arc<dyn PortConnector>,
    policy: AckPolicy,
    options: StreamOptions,
}

impl GcodeStreamer {
    /// Create a streamer using `connector` to open ports
    pub fn new(connector: Arc<dyn PortConnector>, policy: AckPolicy) -> Self {
        Self {
            connector,
            policy,
            options: StreamOptions::default(),
        }
    }

    /// Set streaming options
    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// The acknowledgment policy in use
    pub fn policy(&self) -> &AckPolicy {
        &self.policy
    }

    /// Load `program_path` and stream it to `device_path`
    pub fn stream_file(&self, program_path: &Path, device_path: &str) -> Result<StreamReport> {
        let program = GcodeProgram::load(program_path)?;
        self.stream(&program, device_path)
    }

    /// Stream `program` to `device_path`
    pub fn stream(&self, program: &GcodeProgram, device_path: &str) -> Result<StreamReport> {
        self.stream_with(program, device_path, &mut NoopObserver, &CancelToken::new())
    }

    /// Stream `program` to `device_path`, reporting progress to `observer` and
    /// stopping before the next line once `cancel` is set
    pub fn stream_with(
        &self,
        program: &GcodeProgram,
        device_path: &str,
        observer: &mut dyn StreamObserver,
        cancel: &CancelToken,
    ) -> Result<StreamReport> {
        let started = Instant::now();
        tracing::info!("Streaming {} lines to {}", program.len(), device_path);

        let transport =
            LineTransport::open(self.connector.as_ref(), device_path, self.policy.clone())?;
        let mut session = StreamSession {
            transport,
            line_index: 0,
            last_status: None,
        };

        let result = session.run(program, self.options, self.policy.timeout, observer, cancel);
        let StreamSession {
            transport,
            line_index,
            last_status,
        } = session;
        let closed = transport.close();

        match result {
            Ok(lines_sent) => {
                if let Err(e) = closed {
                    tracing::warn!("Error closing {} after stream: {}", device_path, e);
                }
                let report = StreamReport {
                    lines_sent,
                    elapsed: started.elapsed(),
                };
                tracing::info!(
                    "Streamed {} lines to {} in {:.1}s",
                    report.lines_sent,
                    device_path,
                    report.elapsed.as_secs_f64()
                );
                Ok(report)
            }
            Err(e) => {
                tracing::error!(
                    "Stream to {} failed at line {} (last status {:?}): {}",
                    device_path,
                    line_index + 1,
                    last_status,
                    e
                );
                Err(e)
            }
        }
    }
}
