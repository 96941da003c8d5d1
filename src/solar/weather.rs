//! Weather-condition lookup and its mapping onto a daytime sleep multiplier.
//!
//! Cloudier skies change perceived brightness faster, so the daytime capture
//! cadence shortens with worsening weather. The lookup itself is best-effort:
//! any failure yields `None` and the scheduler falls back to the midpoint.

const MUL_MIN: f64 = 0.2;
const MUL_MAX: f64 = 1.0;
const MUL_STEP: f64 = (MUL_MAX - MUL_MIN) / 7.0;

/// Multiplier used when no weather condition can be obtained.
pub const DEFAULT_MULTIPLIER: f64 = (MUL_MIN + MUL_MAX) / 2.0;

/// External weather collaborator. Must never block the control loop: a slow
/// or failed lookup returns `None`.
pub trait WeatherLookup: Send {
    fn condition(&self, latitude: f64, longitude: f64) -> Option<String>;
}

/// Lookup that is always unavailable.
pub struct NullWeather;

impl WeatherLookup for NullWeather {
    fn condition(&self, _latitude: f64, _longitude: f64) -> Option<String> {
        None
    }
}

/// Maps a reported weather condition onto the 0.2-1.0 multiplier scale.
/// Unknown conditions land on the midpoint.
pub fn multiplier_for(condition: &str) -> f64 {
    let steps = match condition.to_ascii_lowercase().as_str() {
        "clear" => 7.0,
        "mostly sunny" => 6.0,
        "partly sunny" | "mist" => 5.0,
        "partly cloudy" => 4.0,
        "mostly cloudy" | "chance of rain" | "chance of storm" | "chance of snow" | "fog" => 3.0,
        "light snow" => 2.5,
        "cloudy" | "light rain" | "light storm" | "snow" => 2.0,
        "overcast" | "rain" | "storm" => 1.0,
        _ => return DEFAULT_MULTIPLIER,
    };
    MUL_MIN + MUL_STEP * steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_sky_maxes_the_multiplier() {
        assert!((multiplier_for("clear") - 1.0).abs() < 1e-12);
        assert!((multiplier_for("Clear") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bad_weather_shortens_the_cadence() {
        assert!(multiplier_for("overcast") < multiplier_for("partly cloudy"));
        assert!((multiplier_for("storm") - (MUL_MIN + MUL_STEP)).abs() < 1e-12);
    }

    #[test]
    fn unknown_condition_uses_midpoint() {
        assert_eq!(multiplier_for("sharknado"), DEFAULT_MULTIPLIER);
    }

    #[test]
    fn multipliers_stay_in_range() {
        for condition in [
            "clear",
            "mostly sunny",
            "partly sunny",
            "partly cloudy",
            "mostly cloudy",
            "cloudy",
            "overcast",
            "light rain",
            "rain",
            "light snow",
            "snow",
            "fog",
            "mist",
        ] {
            let mul = multiplier_for(condition);
            assert!((MUL_MIN..=MUL_MAX).contains(&mul), "{condition}: {mul}");
        }
    }
}
