//! Backlight actuator collaborator.
//!
//! The sysfs implementation drives the usual `/sys/class/backlight/<dev>/`
//! triple: `brightness` (read/write), `max_brightness` and
//! `actual_brightness` (read-only). Permission denial on write is a distinct,
//! non-fatal outcome: the daemon keeps sensing and just reports it.

use std::{fmt, fs, io, path::PathBuf};

#[derive(Debug)]
pub enum BacklightError {
    /// Write permission is missing on the brightness file.
    PermissionDenied(PathBuf),
    Io(io::Error),
    /// The file exists but does not hold an integer.
    Malformed(PathBuf),
}

impl fmt::Display for BacklightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BacklightError::PermissionDenied(path) => {
                write!(
                    f,
                    "permission denied on {:?}, set write permission for the current user",
                    path
                )
            }
            BacklightError::Io(err) => write!(f, "backlight i/o error: {err}"),
            BacklightError::Malformed(path) => write!(f, "{path:?} does not hold an integer"),
        }
    }
}

impl std::error::Error for BacklightError {}

impl From<io::Error> for BacklightError {
    fn from(err: io::Error) -> Self {
        BacklightError::Io(err)
    }
}

/// Stepped actuator the guard writes through.
pub trait Backlight: Send {
    /// Current effective step.
    fn read_step(&mut self) -> Result<i32, BacklightError>;
    /// Highest supported step.
    fn read_max(&mut self) -> Result<i32, BacklightError>;
    fn write_step(&mut self, step: i32) -> Result<(), BacklightError>;
}

pub struct SysfsBacklight {
    dir: PathBuf,
}

impl SysfsBacklight {
    /// `dir` may be the device directory or any file inside it.
    pub fn new(dir: PathBuf) -> Self {
        let dir = if dir.is_file() {
            dir.parent().map(PathBuf::from).unwrap_or(dir)
        } else {
            dir
        };
        Self { dir }
    }

    fn read_int(&self, name: &str) -> Result<i32, BacklightError> {
        let path = self.dir.join(name);
        let contents = fs::read_to_string(&path)?;
        contents
            .trim()
            .parse()
            .map_err(|_| BacklightError::Malformed(path))
    }
}

impl Backlight for SysfsBacklight {
    fn read_step(&mut self) -> Result<i32, BacklightError> {
        // Kernels that report the effective level expose actual_brightness;
        // brightness alone only echoes the last commanded value.
        if self.dir.join("actual_brightness").is_file() {
            self.read_int("actual_brightness")
        } else {
            self.read_int("brightness")
        }
    }

    fn read_max(&mut self) -> Result<i32, BacklightError> {
        self.read_int("max_brightness")
    }

    fn write_step(&mut self, step: i32) -> Result<(), BacklightError> {
        let path = self.dir.join("brightness");
        match fs::write(&path, format!("{step}\n")) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                Err(BacklightError::PermissionDenied(path))
            }
            Err(err) => Err(err.into()),
        }
    }
}
