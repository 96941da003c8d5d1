//! Hysteretic actuator guard.
//!
//! Noisy consecutive measurements must not make the backlight flicker. Two
//! mechanisms cooperate: a phase gate (during dawn the backlight only rises,
//! during sunset it only falls) and a 45-second write lock acquired on every
//! accepted write that suppresses further single-step corrections. An abrupt
//! change of more than one step means the room lighting actually changed and
//! always goes through.

use std::time::{Duration, Instant};

use log::{debug, error};

use crate::backlight::{Backlight, BacklightError};
use crate::solar::DayPhase;

/// How long a freshly written step is protected from small corrections.
pub const LOCK_DURATION: Duration = Duration::from_secs(45);

/// Time-boxed write-suppression window. Owned exclusively by the guard;
/// the loop only drives expiry via [`ActuatorGuard::tick`].
#[derive(Debug)]
pub struct WriteLock {
    acquired_at: Option<Instant>,
    duration: Duration,
}

impl WriteLock {
    pub fn new(duration: Duration) -> Self {
        Self {
            acquired_at: None,
            duration,
        }
    }

    pub fn held(&self) -> bool {
        self.acquired_at.is_some()
    }

    pub fn acquire(&mut self, now: Instant) {
        self.acquired_at = Some(now);
    }

    /// Releases the lock once its duration has elapsed.
    pub fn check(&mut self, now: Instant) {
        if let Some(acquired_at) = self.acquired_at {
            if now.duration_since(acquired_at) > self.duration {
                self.acquired_at = None;
            }
        }
    }
}

/// What `apply` did with the computed target step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(i32),
    /// Hysteresis or the lock held the write back.
    Suppressed,
    /// The actuator refused the write; the cycle continues degraded.
    Denied,
}

pub struct ActuatorGuard {
    backlight: Box<dyn Backlight>,
    lock: WriteLock,
    inverted: bool,
}

impl ActuatorGuard {
    pub fn new(backlight: Box<dyn Backlight>, inverted: bool) -> Self {
        Self {
            backlight,
            lock: WriteLock::new(LOCK_DURATION),
            inverted,
        }
    }

    pub fn lock_held(&self) -> bool {
        self.lock.held()
    }

    /// Expiry check, driven once per cycle by the loop.
    pub fn tick(&mut self, now: Instant) {
        self.lock.check(now);
    }

    pub fn read_step(&mut self) -> Result<i32, BacklightError> {
        self.backlight.read_step()
    }

    pub fn read_max(&mut self) -> Result<i32, BacklightError> {
        self.backlight.read_max()
    }

    /// Pure decision: should `target` replace `current` right now?
    ///
    /// `inverted` flips the dawn/sunset direction gates for max-to-min
    /// scales, where rising light means a falling step number.
    pub fn should_write(
        current: i32,
        target: i32,
        phase: Option<DayPhase>,
        inverted: bool,
        lock_held: bool,
    ) -> bool {
        let diff = target - current;
        // Room lighting lit or shut: a large correction is never suppressed.
        if diff.abs() > 1 {
            return true;
        }
        if diff == 0 {
            return false;
        }
        let rising = if inverted { diff < 0 } else { diff > 0 };
        let phase_allows = match phase {
            Some(DayPhase::Dawn) => rising,
            Some(DayPhase::Sunset) => !rising,
            Some(DayPhase::Day) | Some(DayPhase::Night) | None => true,
        };
        phase_allows && !lock_held
    }

    /// Writes `target` if the decision logic allows it, acquiring the lock on
    /// success. Permission denial is logged and reported, never raised.
    pub fn apply(
        &mut self,
        current: i32,
        target: i32,
        phase: Option<DayPhase>,
        now: Instant,
    ) -> WriteOutcome {
        if !Self::should_write(current, target, phase, self.inverted, self.lock.held()) {
            return WriteOutcome::Suppressed;
        }
        match self.backlight.write_step(target) {
            Ok(()) => {
                debug!("backlight step {current} -> {target}");
                self.lock.acquire(now);
                WriteOutcome::Written(target)
            }
            Err(BacklightError::PermissionDenied(path)) => {
                error!(
                    "cannot write backlight step: permission denied on {:?}",
                    path
                );
                WriteOutcome::Denied
            }
            Err(err) => {
                error!("backlight write failed: {err}");
                WriteOutcome::Denied
            }
        }
    }
}
