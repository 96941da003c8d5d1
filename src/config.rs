//! Daemon configuration.
//!
//! `Settings` is built once at startup (TOML file plus CLI overrides) and
//! handed to the control loop by value. Runtime changes go through the
//! whitelisted [`Settings::set`] API only; there is no ambient global state.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::mapper::{default_delta, Calibration};

/// Keys that may be changed at runtime through the command surface.
pub const SETTABLE_KEYS: &[&str] = &[
    "geoip",
    "weather",
    "screen",
    "latitude",
    "longitude",
    "capnum",
    "capint",
    "dayst",
    "nightst",
    "dusksm",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Ambient sensor device, e.g. an iio illuminance file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<PathBuf>,
    /// Sysfs backlight directory, e.g. `/sys/class/backlight/intel_backlight`.
    pub backlight_path: PathBuf,
    /// Number of discrete backlight steps.
    pub steps: i32,
    /// First (lowest) step value.
    pub bkofs: i32,
    /// True when the scale runs max-to-min.
    pub invert: bool,
    /// Calibrated sensor reading in full darkness.
    pub offset: f64,
    /// Calibrated scale divisor of the percentage curve.
    pub delta: f64,
    /// Raw samples per capture session.
    pub capture_count: u32,
    /// Pause between raw samples within a session, seconds.
    pub capture_interval_s: f64,
    /// Base sleep between daytime sessions, seconds.
    pub day_sleep_s: f64,
    /// Sleep between nighttime sessions; 0 means sleep until dawn.
    pub night_sleep_s: f64,
    /// Multiplier applied to the twilight cadence.
    pub dusk_sleep_mul: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    /// Derive coordinates through the geoip collaborator.
    pub geoip: bool,
    /// Refresh the daytime multiplier through the weather collaborator.
    pub weather: bool,
    /// Subtract screen-bleed from ambient readings.
    pub screen: bool,
    /// Rolling window capacity, in cycle records.
    pub window_capacity: usize,
    /// Also append every record to the unbounded export history.
    pub record_history: bool,
    /// Default CSV export destination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
    pub calibration: Calibration,
}

impl Default for Settings {
    fn default() -> Self {
        let calibration = Calibration::default();
        Self {
            device: None,
            backlight_path: PathBuf::from("/sys/class/backlight/acpi_video0"),
            steps: 10,
            bkofs: 0,
            invert: false,
            offset: 0.0,
            delta: default_delta(calibration.exponent),
            capture_count: 14,
            capture_interval_s: 0.1,
            day_sleep_s: 300.0,
            night_sleep_s: 0.0,
            dusk_sleep_mul: 0.7,
            latitude: None,
            longitude: None,
            geoip: true,
            weather: true,
            screen: true,
            window_capacity: 134,
            record_history: false,
            export_path: None,
            calibration,
        }
    }
}

impl Settings {
    /// Parse the config file at the specified path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {path:?}"))?;
        toml::from_str(&contents).with_context(|| format!("Failed to parse config at {path:?}"))
    }

    pub fn example() -> Self {
        Self {
            device: Some(PathBuf::from(
                "/sys/bus/iio/devices/iio:device0/in_illuminance_raw",
            )),
            latitude: Some(46.06),
            longitude: Some(11.12),
            record_history: true,
            export_path: Some(PathBuf::from("luxd.csv")),
            ..Self::default()
        }
    }

    /// Seconds one full capture session takes.
    pub fn capture_session_s(&self) -> f64 {
        self.capture_count as f64 * self.capture_interval_s
    }

    /// Applies a runtime override. Only the documented whitelist is accepted;
    /// everything else is rejected with an error instead of silently ignored.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "geoip" => self.geoip = parse_bool(key, value)?,
            "weather" => self.weather = parse_bool(key, value)?,
            "screen" => self.screen = parse_bool(key, value)?,
            "latitude" => self.latitude = Some(parse_num(key, value)?),
            "longitude" => self.longitude = Some(parse_num(key, value)?),
            "capnum" => {
                let n: u32 = value
                    .parse()
                    .with_context(|| format!("invalid value for {key}: {value:?}"))?;
                if n == 0 {
                    bail!("capnum must be at least 1");
                }
                self.capture_count = n;
            }
            "capint" => self.capture_interval_s = parse_num(key, value)?,
            "dayst" => self.day_sleep_s = parse_num(key, value)?,
            "nightst" => self.night_sleep_s = parse_num(key, value)?,
            "dusksm" => self.dusk_sleep_mul = parse_num(key, value)?,
            other => bail!("setting {other:?} is not runtime-settable"),
        }
        Ok(())
    }

    /// Flat key/value view for the `dump_settings` query.
    pub fn snapshot_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("geoip".into(), self.geoip.to_string());
        map.insert("weather".into(), self.weather.to_string());
        map.insert("screen".into(), self.screen.to_string());
        map.insert(
            "latitude".into(),
            self.latitude.map_or_else(|| "none".into(), |v| v.to_string()),
        );
        map.insert(
            "longitude".into(),
            self.longitude.map_or_else(|| "none".into(), |v| v.to_string()),
        );
        map.insert("capnum".into(), self.capture_count.to_string());
        map.insert("capint".into(), self.capture_interval_s.to_string());
        map.insert("dayst".into(), self.day_sleep_s.to_string());
        map.insert("nightst".into(), self.night_sleep_s.to_string());
        map.insert("dusksm".into(), self.dusk_sleep_mul.to_string());
        map.insert("steps".into(), self.steps.to_string());
        map.insert("bkofs".into(), self.bkofs.to_string());
        map.insert("invert".into(), self.invert.to_string());
        map.insert("offset".into(), self.offset.to_string());
        map.insert("delta".into(), self.delta.to_string());
        map
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "True" | "on" | "yes" => Ok(true),
        "0" | "false" | "False" | "off" | "no" => Ok(false),
        other => bail!("invalid boolean for {key}: {other:?}"),
    }
}

fn parse_num(key: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .with_context(|| format!("invalid value for {key}: {value:?}"))
}

/// Persists runtime overrides between daemon runs, so a `set` survives a
/// restart without editing the config file.
pub struct OverrideStore {
    path: PathBuf,
    data: BTreeMap<String, String>,
}

impl OverrideStore {
    pub fn new(path: PathBuf) -> Self {
        let data = fs::read_to_string(&path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();
        Self { path, data }
    }

    /// Re-applies every persisted override. Invalid entries are dropped.
    pub fn apply(&mut self, settings: &mut Settings) {
        self.data
            .retain(|key, value| settings.set(key, value).is_ok());
    }

    pub fn record(&mut self, key: &str, value: &str) -> Result<()> {
        self.data.insert(key.to_string(), value.to_string());
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let serialized = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write overrides to {}", self.path.display()))
    }
}
