//! Safety stop guard
//!
//! Armed when an etch starts. Exactly one laser stop is issued for every armed
//! guard: explicitly through [`SafetyStop::trigger`], or from `Drop` when the
//! guard goes out of scope armed, which includes unwinding.

use etcher_communication::LaserSwitch;
use etcher_core::LaserOutcome;

/// Scoped guard that stops the laser once
pub struct SafetyStop<'a> {
    laser: &'a dyn LaserSwitch,
    armed: bool,
}

impl<'a> SafetyStop<'a> {
    /// Arm a guard over `laser`
    pub fn arm(laser: &'a dyn LaserSwitch) -> Self {
        Self { laser, armed: true }
    }

    /// Whether the stop is still pending
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Stop the laser now and report the outcome
    pub fn trigger(mut self) -> LaserOutcome {
        self.armed = false;
        self.laser.stop()
    }

    /// Release the guard without stopping the laser
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for SafetyStop<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;

        let outcome = self.laser.stop();
        match outcome.warning() {
            Some(warning) => tracing::warn!("Safety stop: {}", warning),
            None => tracing::info!("Safety stop sent"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etcher_core::LaserCommand;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLaser {
        stops: AtomicUsize,
    }

    impl LaserSwitch for CountingLaser {
        fn fire(&self) -> LaserOutcome {
            LaserOutcome::Sent {
                command: LaserCommand::Fire,
                port: "/dev/null".to_string(),
            }
        }

        fn stop(&self) -> LaserOutcome {
            self.stops.fetch_add(1, Ordering::SeqCst);
            LaserOutcome::Sent {
                command: LaserCommand::Stop,
                port: "/dev/null".to_string(),
            }
        }
    }

    #[test]
    fn test_trigger_stops_once() {
        let laser = CountingLaser::default();
        let guard = SafetyStop::arm(&laser);
        assert!(guard.is_armed());
        assert!(guard.trigger().is_sent());
        assert_eq!(laser.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_stops_once() {
        let laser = CountingLaser::default();
        {
            let _guard = SafetyStop::arm(&laser);
        }
        assert_eq!(laser.stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disarm_skips_stop() {
        let laser = CountingLaser::default();
        SafetyStop::arm(&laser).disarm();
        assert_eq!(laser.stops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unwinding_stops() {
        let laser = CountingLaser::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = SafetyStop::arm(&laser);
            panic!("stream fault");
        }));
        assert!(result.is_err());
        assert_eq!(laser.stops.load(Ordering::SeqCst), 1);
    }
}
