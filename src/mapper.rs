//! Closed-form mapping from a filtered ambient reading to a backlight step.
//!
//! The correction formula and the percentage exponent were fitted against one
//! reference camera/monitor pair; they are calibration data, not derived
//! math. Changing any of them invalidates existing offset/delta profiles.

use serde::{Deserialize, Serialize};

/// Ambient level at and above which the screen cannot add measurable bleed.
const AMBIENT_CEILING: f64 = 160.0;

/// Empirically fitted constants for the screen-bleed correction and the
/// ambient-to-percent curve. Defaults reproduce the reference calibration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Calibration {
    /// Numerator gain of the correction amplitude.
    pub cor_gain: f64,
    /// Denominator shift of the correction amplitude.
    pub cor_shift: f64,
    /// Backlight-position term gain (step weight).
    pub backlight_gain: f64,
    /// Backlight-position term divisor.
    pub backlight_div: f64,
    /// Exponent of the ambient-to-percent curve.
    pub exponent: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            cor_gain: 2.0,
            cor_shift: 136.0,
            backlight_gain: 1.0 / 5.0,
            backlight_div: 5.0 / 4.0,
            exponent: 0.73,
        }
    }
}

impl Calibration {
    /// Estimates how much of the measured ambient brightness is the screen's
    /// own light bleeding into the sensor, in the same 0-255 scale.
    ///
    /// `backlight_position` is the current step reduced to the 0-10 scale
    /// produced by [`adjust_scale`].
    pub fn correction(&self, ambient: f64, screen: f64, backlight_position: f64) -> f64 {
        if ambient > AMBIENT_CEILING {
            return 0.0;
        }
        let max_cor = self.cor_gain * (AMBIENT_CEILING - ambient).powi(2)
            / (ambient + self.cor_shift).powi(2);
        let screen_term = (screen / 255.0).powi(2);
        let backlight_term = self.backlight_gain * (backlight_position / self.backlight_div);
        ambient * max_cor * screen_term * backlight_term
    }

    /// Corrected brightness percentage on the operator's calibrated scale.
    ///
    /// `offset` and `delta` come from the per-device calibration profile; the
    /// offset is capped at the corrected reading so the base of the curve can
    /// never go negative.
    pub fn percentage(
        &self,
        ambient: f64,
        offset: f64,
        delta: f64,
        screen: f64,
        backlight_position: f64,
    ) -> f64 {
        let corrected = ambient - self.correction(ambient, screen, backlight_position);
        let offset = offset.min(corrected);
        ((corrected - offset) / delta).powf(self.exponent)
    }
}

/// Default `delta` for an uncalibrated device: maps ambient 255 to 100%.
pub fn default_delta(exponent: f64) -> f64 {
    255.0 / 100f64.powf(1.0 / exponent)
}

/// Reduces the current backlight step to the 0-10 position scale the
/// correction formula expects.
pub fn adjust_scale(current_step: i32, steps: i32, bkofs: i32, inverted: bool) -> f64 {
    let den = 100.0 / steps as f64;
    if inverted {
        (steps - 1 - (current_step - bkofs)) as f64 * (den / 10.0)
    } else {
        (current_step - bkofs) as f64 * (den / 10.0)
    }
}

/// Maps a percentage to a discrete backlight step, reflecting on inverted
/// scales and clamping to `[bkofs, bkofs + steps - 1]`.
pub fn step_from_percentage(pct: f64, steps: i32, bkofs: i32, inverted: bool) -> i32 {
    let mut stp = (pct / (100.0 / steps as f64) - 0.5).floor() as i32 + bkofs;
    if inverted {
        stp = (steps - 1 + bkofs) - (stp - bkofs);
    }
    stp.clamp(bkofs, steps - 1 + bkofs)
}
