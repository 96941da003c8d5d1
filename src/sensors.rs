//! Collaborator interfaces at the sensing edge of the control loop.
//!
//! The loop owns one `AmbientSensor` and one `ScreenSampler` exclusively;
//! both must tolerate open/close cycling (pause releases the hardware,
//! resume re-acquires it) but not concurrent access.

use std::{fmt, fs, io, path::PathBuf};

/// Why a single sensor read failed.
///
/// `Retryable` is the EAGAIN-equivalent: the device is momentarily out of
/// data and a new attempt may succeed. `Fatal` means busy/disconnected; the
/// cycle aborts and the loop owner should stop the service.
#[derive(Debug)]
pub enum SensorError {
    Retryable(String),
    Fatal(String),
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorError::Retryable(msg) => write!(f, "sensor temporarily unavailable: {msg}"),
            SensorError::Fatal(msg) => write!(f, "sensor failure: {msg}"),
        }
    }
}

impl std::error::Error for SensorError {}

impl SensorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SensorError::Retryable(_))
    }
}

/// Optical sensor producing raw ambient-brightness readings (0-255 scale).
pub trait AmbientSensor: Send {
    fn open(&mut self) -> Result<(), SensorError>;
    fn start(&mut self) -> Result<(), SensorError>;
    fn read_one(&mut self) -> Result<f64, SensorError>;
    fn stop(&mut self);
    fn close(&mut self);
}

/// Screen-bleed collaborator: brightness of the display content itself.
/// `None` when no display session is active.
pub trait ScreenSampler: Send {
    fn read_display_brightness(&mut self) -> Option<f64>;
}

/// Sampler for headless sessions.
pub struct NullScreen;

impl ScreenSampler for NullScreen {
    fn read_display_brightness(&mut self) -> Option<f64> {
        None
    }
}

/// Ambient sensor backed by a sysfs illuminance file (iio light sensors
/// expose e.g. `in_illuminance_raw`). Values are clamped to the 0-255 scale
/// the mapper works in.
pub struct SysfsAmbientSensor {
    path: PathBuf,
    ready: bool,
}

impl SysfsAmbientSensor {
    pub fn new(path: PathBuf) -> Self {
        Self { path, ready: false }
    }
}

impl AmbientSensor for SysfsAmbientSensor {
    fn open(&mut self) -> Result<(), SensorError> {
        if !self.path.is_file() {
            return Err(SensorError::Fatal(format!(
                "no such sensor file: {}",
                self.path.display()
            )));
        }
        self.ready = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), SensorError> {
        if !self.ready {
            return Err(SensorError::Fatal("sensor not opened".into()));
        }
        Ok(())
    }

    fn read_one(&mut self) -> Result<f64, SensorError> {
        let contents = fs::read_to_string(&self.path).map_err(|err| match err.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
                SensorError::Retryable(err.to_string())
            }
            _ => SensorError::Fatal(err.to_string()),
        })?;
        let value: f64 = contents
            .trim()
            .parse()
            .map_err(|_| SensorError::Retryable(format!("unparsable reading {contents:?}")))?;
        Ok(value.clamp(0.0, 255.0))
    }

    fn stop(&mut self) {}

    fn close(&mut self) {
        self.ready = false;
    }
}
