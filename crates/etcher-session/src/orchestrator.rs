//! Etch Session
//!
//! State machine over one etching rig:
//!
//! ```text
//! IDLE --prepare ok--> READY --etch--> ETCHING --+--> DONE
//!   ^                                           |
//!   +-------------- prepare ---------------------+--> FAILED
//! ```
//!
//! A device path is cached by a successful pre-test and consumed by the next
//! etch, so every etch needs its own `prepare`. While etching, a safety stop is
//! armed; every failure, including a panic inside the stream, stops the laser
//! exactly once before the result is returned.

use crate::device::DeviceSession;
use crate::hardware::Hardware;
use crate::safety::SafetyStop;
use chrono::Utc;
use etcher_communication::{
    CancelToken, GcodeProgram, LaserSwitch, NoopObserver, StreamObserver, StreamReport,
};
use etcher_core::{reasons, EtchAttemptResult, LaserOutcome, PrepareOutcome, Result, SessionState};
use etcher_settings::Config;
use std::any::Any;
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// Where the program of an etch comes from
enum ProgramSource<'a> {
    File(&'a Path),
    Loaded(&'a GcodeProgram),
}

impl<'a> ProgramSource<'a> {
    fn load(&self) -> Result<Cow<'a, GcodeProgram>> {
        match *self {
            Self::File(path) => GcodeProgram::load(path).map(Cow::Owned),
            Self::Loaded(program) => Ok(Cow::Borrowed(program)),
        }
    }
}

/// One etching rig: motion controller pre-test, program streaming and laser
pub struct EtchSession {
    device: DeviceSession,
    laser: Arc<dyn LaserSwitch>,
    fire_on_etch: bool,
    state: SessionState,
    device_path: Option<String>,
    cancel: CancelToken,
}

impl EtchSession {
    /// Create a session; the laser is fired when etching starts
    pub fn new(device: DeviceSession, laser: Arc<dyn LaserSwitch>) -> Self {
        Self {
            device,
            laser,
            fire_on_etch: true,
            state: SessionState::Idle,
            device_path: None,
            cancel: CancelToken::new(),
        }
    }

    /// Create a session from configuration
    pub fn from_config(hardware: &Hardware, config: &Config) -> Self {
        Self::new(
            DeviceSession::from_config(hardware, config),
            Arc::new(hardware.laser_control(config)),
        )
        .with_fire_on_etch(config.etch.fire_laser)
    }

    /// Whether to fire the laser when etching starts and stop it on success
    pub fn with_fire_on_etch(mut self, fire: bool) -> Self {
        self.fire_on_etch = fire;
        self
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Motion controller path cached by the last successful pre-test
    pub fn device_path(&self) -> Option<&str> {
        self.device_path.as_deref()
    }

    /// Token that cancels the running pre-test or etch
    ///
    /// A cancellation raised before an operation starts stops that operation.
    /// The operation that stops on it clears the token.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run the pre-test
    pub fn prepare(&mut self) -> PrepareOutcome {
        self.prepare_with(&mut NoopObserver)
    }

    /// Run the pre-test, reporting homing progress to `observer`
    ///
    /// Allowed from every state.
    pub fn prepare_with(&mut self, observer: &mut dyn StreamObserver) -> PrepareOutcome {
        let outcome = self.device.prepare_with(observer, &self.cancel);
        if outcome.reason == reasons::CANCELLED {
            self.cancel.reset();
        }

        if outcome.ready {
            self.device_path = outcome.device_path.clone();
            self.transition(SessionState::Ready);
        } else {
            self.device_path = None;
            self.transition(SessionState::Idle);
        }
        outcome
    }

    /// Etch the program at `path`
    pub fn etch(&mut self, path: &Path) -> EtchAttemptResult {
        self.run(ProgramSource::File(path), &mut NoopObserver)
    }

    /// Etch the program at `path`, reporting progress to `observer`
    pub fn etch_with(
        &mut self,
        path: &Path,
        observer: &mut dyn StreamObserver,
    ) -> EtchAttemptResult {
        self.run(ProgramSource::File(path), observer)
    }

    /// Etch an already loaded program
    pub fn etch_program(&mut self, program: &GcodeProgram) -> EtchAttemptResult {
        self.run(ProgramSource::Loaded(program), &mut NoopObserver)
    }

    /// Etch an already loaded program, reporting progress to `observer`
    pub fn etch_program_with(
        &mut self,
        program: &GcodeProgram,
        observer: &mut dyn StreamObserver,
    ) -> EtchAttemptResult {
        self.run(ProgramSource::Loaded(program), observer)
    }

    /// Fire the laser outside an etch
    pub fn fire_laser(&self) -> LaserOutcome {
        self.laser.fire()
    }

    /// Stop the laser; safe in every state
    pub fn stop_laser(&self) -> LaserOutcome {
        self.laser.stop()
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::info!("Etch session {} -> {}", self.state, next);
        }
        self.state = next;
    }

    fn run(
        &mut self,
        source: ProgramSource<'_>,
        observer: &mut dyn StreamObserver,
    ) -> EtchAttemptResult {
        let session_id = Uuid::new_v4();
        let started_at = Utc::now();

        let device_path = match (self.state, self.device_path.clone()) {
            (SessionState::Ready, Some(path)) => path,
            (state, _) => {
                tracing::warn!("Etch {} refused: session is {}", session_id, state);
                return EtchAttemptResult::failed(
                    session_id,
                    started_at,
                    reasons::NOT_PREPARED,
                    Some(format!("session is {}", state)),
                );
            }
        };

        self.device_path = None;
        self.transition(SessionState::Etching);
        tracing::info!("Etch {} started on {}", session_id, device_path);

        let laser = Arc::clone(&self.laser);
        let guard = SafetyStop::arm(laser.as_ref());
        let fire_on_etch = self.fire_on_etch;
        let streamer = self.device.streamer();
        let cancel = &self.cancel;
        let mut fired: Option<LaserOutcome> = None;

        let streamed = panic::catch_unwind(AssertUnwindSafe(|| -> Result<StreamReport> {
            let program = source.load()?;
            if fire_on_etch {
                fired = Some(laser.fire());
            }
            streamer.stream_with(&program, &device_path, observer, cancel)
        }));

        let mut result = match streamed {
            Ok(Ok(report)) => {
                tracing::info!(
                    "Etch {} completed: {} lines in {:.1}s",
                    session_id,
                    report.lines_sent,
                    report.elapsed.as_secs_f64()
                );
                EtchAttemptResult::succeeded(session_id, started_at)
            }
            Ok(Err(e)) => {
                tracing::error!("Etch {} failed: {}", session_id, e);
                let reason = if e.is_cancelled() {
                    reasons::CANCELLED
                } else {
                    reasons::CRITICAL_STREAM_ERROR
                };
                EtchAttemptResult::failed(session_id, started_at, reason, Some(e.to_string()))
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Etch {} faulted: {}", session_id, message);
                EtchAttemptResult::failed(
                    session_id,
                    started_at,
                    reasons::UNEXPECTED_FAULT,
                    Some(message),
                )
            }
        };

        if let Some(fired) = &fired {
            result.note_laser(fired);
        }

        if result.success && !fire_on_etch {
            guard.disarm();
        } else {
            result.note_laser(&guard.trigger());
        }

        if self.cancel.is_cancelled() {
            self.cancel.reset();
        }
        self.transition(if result.success {
            SessionState::Done
        } else {
            SessionState::Failed
        });
        result.finished_at = Utc::now();
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");

        let payload: Box<dyn Any + Send> = Box::new(String::from("line 3"));
        assert_eq!(panic_message(payload.as_ref()), "line 3");

        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
