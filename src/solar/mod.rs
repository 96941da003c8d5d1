//! Solar-position-driven sampling scheduler.
//!
//! Decides what part of the day we are in and how long the control loop may
//! sleep before the next capture. During twilight the light changes fast, so
//! the cadence tightens; at night there is usually nothing to track at all.

mod geo;
mod weather;

pub use geo::{GeoLookup, NullGeo};
pub use weather::{multiplier_for, NullWeather, WeatherLookup, DEFAULT_MULTIPLIER};

use chrono::{Duration as ChronoDuration, Local, TimeZone};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::Settings;

/// Sleep used when no coordinates are configured or derivable.
const FALLBACK_SLEEP_S: f64 = 90.0;

/// Minimum age before the weather multiplier is refreshed.
const WEATHER_REFRESH_S: f64 = 3600.0;

/// Minimum age before geoip coordinates are refreshed.
const GEO_REFRESH_S: f64 = 1800.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPhase {
    Dawn,
    Day,
    Sunset,
    Night,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Where the sun sits relative to the horizon over the queried day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Horizon {
    /// Ordinary day with a sunrise and a sunset, as epoch seconds.
    Normal { sunrise: f64, sunset: f64 },
    /// Polar day: the sun never sets.
    AlwaysUp,
    /// Polar night: the sun never rises.
    NeverUp,
}

/// Ephemeris output for one location and day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunInfo {
    pub horizon: Horizon,
    /// Seconds of rapidly changing light after sunrise.
    pub dawn_twilight_s: f64,
    /// Seconds of rapidly changing light before sunset.
    pub dusk_twilight_s: f64,
}

/// Astronomical collaborator: sunrise/sunset/twilight for a coordinate.
pub trait SunTimes: Send {
    fn sun_times(&self, latitude: f64, longitude: f64, at_epoch: f64) -> SunInfo;
}

/// One scheduling decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schedule {
    /// `None` when no coordinates are available (degraded mode).
    pub phase: Option<DayPhase>,
    /// Seconds until the next phase transition, when known.
    pub next_state_in: Option<f64>,
    /// Proposed sleep before the next capture session.
    pub sleep_s: f64,
}

pub struct Scheduler {
    sun: Box<dyn SunTimes>,
    weather: Box<dyn WeatherLookup>,
    geo: Box<dyn GeoLookup>,
    coords: Option<Coordinates>,
    daytime_mul: f64,
    weather_checked_at: Option<f64>,
    geo_checked_at: Option<f64>,
    warned_no_coords: bool,
}

impl Scheduler {
    pub fn new(
        sun: Box<dyn SunTimes>,
        weather: Box<dyn WeatherLookup>,
        geo: Box<dyn GeoLookup>,
        coords: Option<Coordinates>,
    ) -> Self {
        Self {
            sun,
            weather,
            geo,
            coords,
            daytime_mul: DEFAULT_MULTIPLIER,
            weather_checked_at: None,
            geo_checked_at: None,
            warned_no_coords: false,
        }
    }

    pub fn coords(&self) -> Option<Coordinates> {
        self.coords
    }

    /// Overrides coordinates, e.g. from a `set latitude` command.
    pub fn set_coords(&mut self, coords: Option<Coordinates>) {
        self.coords = coords;
    }

    /// Classifies the current time of day and proposes a sleep interval.
    pub fn evaluate(&mut self, now: f64, settings: &Settings) -> Schedule {
        if settings.geoip {
            self.refresh_geo(now);
        }

        let Some(coords) = self.coords else {
            if !self.warned_no_coords {
                warn!(
                    "no coordinates available, using arbitrary sleep of {}s",
                    FALLBACK_SLEEP_S
                );
                self.warned_no_coords = true;
            }
            return Schedule {
                phase: None,
                next_state_in: None,
                sleep_s: FALLBACK_SLEEP_S,
            };
        };

        let sun = self
            .sun
            .sun_times(coords.latitude, coords.longitude, now);
        let daw_tw = sun.dawn_twilight_s;
        let sus_tw = sun.dusk_twilight_s;
        // A full min-to-max brightness sweep over a twilight window means a
        // step change roughly every hundredth of the window.
        let daw_sl = daw_tw / 100.0;
        let sus_sl = sus_tw / 100.0;

        let (daw, sus) = match sun.horizon {
            Horizon::AlwaysUp => {
                let mul = self.daytime_multiplier(now, settings, coords);
                return Schedule {
                    phase: Some(DayPhase::Day),
                    next_state_in: None,
                    sleep_s: settings.day_sleep_s * mul,
                };
            }
            Horizon::NeverUp => {
                let sleep_s = if settings.night_sleep_s == 0.0 {
                    seconds_until_next_midnight(now)
                } else {
                    settings.night_sleep_s
                };
                return Schedule {
                    phase: Some(DayPhase::Night),
                    next_state_in: None,
                    sleep_s,
                };
            }
            Horizon::Normal { sunrise, sunset } => (sunrise, sunset),
        };

        // High-latitude edge: the sun never clears the rapid-change
        // elevation, so the dawn and sunset windows cover the whole day
        // between them. Split it in half.
        if (sus - (daw + daw_tw)).abs() < 1e-6 {
            let phase = if now < daw + daw_tw / 2.0 {
                DayPhase::Dawn
            } else {
                DayPhase::Sunset
            };
            return Schedule {
                phase: Some(phase),
                next_state_in: None,
                sleep_s: daw_sl * settings.dusk_sleep_mul,
            };
        }

        if now > daw && now <= daw + daw_tw {
            Schedule {
                phase: Some(DayPhase::Dawn),
                next_state_in: Some(daw + daw_tw - now),
                sleep_s: daw_sl * settings.dusk_sleep_mul,
            }
        } else if now >= sus - sus_tw && now < sus {
            Schedule {
                phase: Some(DayPhase::Sunset),
                next_state_in: Some(sus - now),
                sleep_s: sus_sl * settings.dusk_sleep_mul,
            }
        } else if now > sus || now < daw {
            // Past sunset the relevant dawn is tomorrow's.
            let next_dawn = if now > sus {
                match self
                    .sun
                    .sun_times(coords.latitude, coords.longitude, now + 86_400.0)
                    .horizon
                {
                    Horizon::Normal { sunrise, .. } => sunrise,
                    _ => daw,
                }
            } else {
                daw
            };
            let sleep_s = if settings.night_sleep_s == 0.0 {
                next_dawn - now
            } else {
                settings.night_sleep_s
            };
            Schedule {
                phase: Some(DayPhase::Night),
                next_state_in: Some(next_dawn - now),
                sleep_s,
            }
        } else {
            let until_dusk = sus - sus_tw - now;
            let mul = self.daytime_multiplier(now, settings, coords);
            Schedule {
                phase: Some(DayPhase::Day),
                next_state_in: Some(until_dusk),
                sleep_s: (settings.day_sleep_s * mul).min(until_dusk),
            }
        }
    }

    /// Converts a proposed sleep into an absolute wake epoch, enforcing the
    /// time a full capture session needs plus one second of margin.
    pub fn wake_epoch(now: f64, sleep_s: f64, capture_session_s: f64) -> f64 {
        if sleep_s < capture_session_s + 1.0 {
            now + capture_session_s + 1.0
        } else {
            now + sleep_s - capture_session_s
        }
    }

    fn daytime_multiplier(&mut self, now: f64, settings: &Settings, coords: Coordinates) -> f64 {
        if !settings.weather {
            self.daytime_mul = DEFAULT_MULTIPLIER;
            return self.daytime_mul;
        }
        let stale = self
            .weather_checked_at
            .map(|ts| now - ts > WEATHER_REFRESH_S)
            .unwrap_or(true);
        if stale {
            self.weather_checked_at = Some(now);
            self.daytime_mul = match self.weather.condition(coords.latitude, coords.longitude) {
                Some(condition) => {
                    let mul = multiplier_for(&condition);
                    debug!("weather condition {condition:?}, multiplier {mul:.3}");
                    mul
                }
                None => {
                    debug!("weather condition unavailable, multiplier {DEFAULT_MULTIPLIER:.3}");
                    DEFAULT_MULTIPLIER
                }
            };
        }
        self.daytime_mul
    }

    fn refresh_geo(&mut self, now: f64) {
        let stale = self
            .geo_checked_at
            .map(|ts| now - ts > GEO_REFRESH_S)
            .unwrap_or(true);
        if stale {
            self.geo_checked_at = Some(now);
            if let Some(coords) = self.geo.locate() {
                debug!(
                    "geoip coordinates: {:.4}, {:.4}",
                    coords.latitude, coords.longitude
                );
                self.coords = Some(coords);
                self.warned_no_coords = false;
            }
        }
    }
}

/// Fixed-schedule stand-in for a real ephemeris provider: the same local
/// sunrise and sunset hours every day of the year. Good enough to exercise
/// the scheduler until an actual astronomical collaborator is wired in.
pub struct FixedSun {
    pub sunrise_hour: u32,
    pub sunset_hour: u32,
    pub twilight_s: f64,
}

impl Default for FixedSun {
    fn default() -> Self {
        Self {
            sunrise_hour: 6,
            sunset_hour: 20,
            twilight_s: 3600.0,
        }
    }
}

impl SunTimes for FixedSun {
    fn sun_times(&self, _latitude: f64, _longitude: f64, at_epoch: f64) -> SunInfo {
        let twilight = SunInfo {
            horizon: Horizon::NeverUp,
            dawn_twilight_s: self.twilight_s,
            dusk_twilight_s: self.twilight_s,
        };
        let Some(local) = Local.timestamp_opt(at_epoch as i64, 0).single() else {
            return twilight;
        };
        let date = local.date_naive();
        let at_hour = |hour: u32| {
            date.and_hms_opt(hour, 0, 0)
                .and_then(|naive| Local.from_local_datetime(&naive).single())
                .map(|dt| dt.timestamp() as f64)
        };
        match (at_hour(self.sunrise_hour), at_hour(self.sunset_hour)) {
            (Some(sunrise), Some(sunset)) if sunset > sunrise => SunInfo {
                horizon: Horizon::Normal { sunrise, sunset },
                dawn_twilight_s: self.twilight_s,
                dusk_twilight_s: self.twilight_s,
            },
            _ => twilight,
        }
    }
}

/// Seconds from `now` until the next local midnight.
fn seconds_until_next_midnight(now: f64) -> f64 {
    let Some(local) = Local.timestamp_opt(now as i64, 0).single() else {
        return 3600.0;
    };
    let next = (local.date_naive() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| Local.from_local_datetime(&naive).single());
    match next {
        Some(midnight) => (midnight.timestamp() as f64 - now).max(0.0),
        // DST gap right at midnight: just try again in an hour.
        None => 3600.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    /// Repeats the same solar day forever: sunrise 06:00, sunset 20:00,
    /// one-hour twilight windows.
    struct RepeatingSun;

    impl SunTimes for RepeatingSun {
        fn sun_times(&self, _lat: f64, _lon: f64, at_epoch: f64) -> SunInfo {
            let day = (at_epoch / 86_400.0).floor() * 86_400.0;
            SunInfo {
                horizon: Horizon::Normal {
                    sunrise: day + 6.0 * 3600.0,
                    sunset: day + 20.0 * 3600.0,
                },
                dawn_twilight_s: 3600.0,
                dusk_twilight_s: 3600.0,
            }
        }
    }

    struct FixedHorizon(Horizon);

    impl SunTimes for FixedHorizon {
        fn sun_times(&self, _lat: f64, _lon: f64, _at: f64) -> SunInfo {
            SunInfo {
                horizon: self.0,
                dawn_twilight_s: 1800.0,
                dusk_twilight_s: 1800.0,
            }
        }
    }

    fn scheduler(sun: Box<dyn SunTimes>) -> Scheduler {
        Scheduler::new(
            sun,
            Box::new(NullWeather),
            Box::new(NullGeo),
            Some(Coordinates {
                latitude: 46.0,
                longitude: 11.0,
            }),
        )
    }

    #[test]
    fn full_day_phase_sequence() {
        let mut sched = scheduler(Box::new(RepeatingSun));
        let settings = Settings::default();
        let day0 = 86_400.0 * 1000.0;

        let mut phases = Vec::new();
        for minute in 0..1440 {
            // 30s offset keeps samples off the exact transition epochs.
            let now = day0 + minute as f64 * 60.0 + 30.0;
            let schedule = sched.evaluate(now, &settings);
            let phase = schedule.phase.expect("coordinates are configured");
            assert!(schedule.sleep_s > 0.0);
            phases.push(phase);
        }

        let mut transitions = Vec::new();
        for pair in phases.windows(2) {
            if pair[0] != pair[1] {
                transitions.push((pair[0], pair[1]));
            }
        }
        assert_eq!(
            transitions,
            vec![
                (DayPhase::Night, DayPhase::Dawn),
                (DayPhase::Dawn, DayPhase::Day),
                (DayPhase::Day, DayPhase::Sunset),
                (DayPhase::Sunset, DayPhase::Night),
            ]
        );
    }

    #[test]
    fn night_with_zero_interval_sleeps_until_dawn() {
        let mut sched = scheduler(Box::new(RepeatingSun));
        let settings = Settings {
            night_sleep_s: 0.0,
            ..Settings::default()
        };
        // 23:00, one hour before midnight: next dawn is tomorrow 06:00.
        let now = 86_400.0 * 1000.0 + 23.0 * 3600.0;
        let schedule = sched.evaluate(now, &settings);
        assert_eq!(schedule.phase, Some(DayPhase::Night));
        assert!((schedule.sleep_s - 7.0 * 3600.0).abs() < 1.0);
    }

    #[test]
    fn day_sleep_is_capped_at_dusk() {
        let mut sched = scheduler(Box::new(RepeatingSun));
        let settings = Settings {
            day_sleep_s: 100_000.0,
            weather: false,
            ..Settings::default()
        };
        // Noon: dusk twilight starts at 19:00.
        let now = 86_400.0 * 1000.0 + 12.0 * 3600.0;
        let schedule = sched.evaluate(now, &settings);
        assert_eq!(schedule.phase, Some(DayPhase::Day));
        assert!((schedule.sleep_s - 7.0 * 3600.0).abs() < 1e-6);
    }

    #[test]
    fn polar_day_and_night() {
        let settings = Settings {
            night_sleep_s: 600.0,
            ..Settings::default()
        };
        let mut sched = scheduler(Box::new(FixedHorizon(Horizon::AlwaysUp)));
        let schedule = sched.evaluate(0.0, &settings);
        assert_eq!(schedule.phase, Some(DayPhase::Day));
        assert_eq!(schedule.next_state_in, None);

        let mut sched = scheduler(Box::new(FixedHorizon(Horizon::NeverUp)));
        let schedule = sched.evaluate(0.0, &settings);
        assert_eq!(schedule.phase, Some(DayPhase::Night));
        assert_eq!(schedule.sleep_s, 600.0);
    }

    #[test]
    fn coincident_twilight_windows_split_the_day() {
        // Sunset exactly at the end of dawn twilight.
        struct MidnightSun;
        impl SunTimes for MidnightSun {
            fn sun_times(&self, _lat: f64, _lon: f64, _at: f64) -> SunInfo {
                SunInfo {
                    horizon: Horizon::Normal {
                        sunrise: 1000.0,
                        sunset: 1000.0 + 7200.0,
                    },
                    dawn_twilight_s: 7200.0,
                    dusk_twilight_s: 7200.0,
                }
            }
        }
        let mut sched = scheduler(Box::new(MidnightSun));
        let settings = Settings::default();
        let early = sched.evaluate(2000.0, &settings);
        assert_eq!(early.phase, Some(DayPhase::Dawn));
        let late = sched.evaluate(6000.0, &settings);
        assert_eq!(late.phase, Some(DayPhase::Sunset));
    }

    #[test]
    fn missing_coordinates_degrade_to_fallback() {
        let mut sched = Scheduler::new(
            Box::new(RepeatingSun),
            Box::new(NullWeather),
            Box::new(NullGeo),
            None,
        );
        let schedule = sched.evaluate(0.0, &Settings::default());
        assert_eq!(schedule.phase, None);
        assert_eq!(schedule.sleep_s, FALLBACK_SLEEP_S);
    }

    #[test]
    fn wake_epoch_enforces_session_duration() {
        // Sleep shorter than a capture session stretches to session + 1s.
        assert_eq!(Scheduler::wake_epoch(100.0, 2.0, 3.5), 100.0 + 4.5);
        // Otherwise the session time is carved out of the sleep.
        assert_eq!(Scheduler::wake_epoch(100.0, 60.0, 3.5), 100.0 + 56.5);
    }
}
