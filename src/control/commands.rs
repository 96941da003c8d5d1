//! Command and query surface of the control loop.
//!
//! Commands travel over a single-producer channel and are consumed only at
//! the loop's sleep-tick boundaries; queries are served from a snapshot the
//! loop republishes every cycle, so readers never touch loop-owned state.

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{bail, Result};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::{config::SETTABLE_KEYS, record::CycleRecord, solar::DayPhase};

/// Closed set of things the outside world may ask the loop to do.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopCommand {
    /// Release the sensor hardware and stop sampling.
    Pause,
    /// Re-acquire the sensor and resume sampling immediately.
    Resume,
    /// Run a cycle now instead of waiting for the scheduled wake.
    CaptureNow,
    /// Flush the export history to a CSV file (default path when `None`).
    Export(Option<PathBuf>),
    /// Runtime settings override, whitelisted.
    Set { key: String, value: String },
    /// Terminate after the current cycle.
    Quit,
}

/// Read-only view of the loop, refreshed once per cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoopSnapshot {
    /// Rolling-window contents, oldest first.
    pub records: Vec<CycleRecord>,
    pub settings: BTreeMap<String, String>,
    pub phase: Option<DayPhase>,
    pub paused: bool,
    pub lock_held: bool,
    pub cycles: u64,
}

/// Cheap cloneable handle held by front-ends and the IPC layer.
#[derive(Clone)]
pub struct LoopHandle {
    commands: mpsc::UnboundedSender<LoopCommand>,
    snapshot: watch::Receiver<LoopSnapshot>,
}

impl LoopHandle {
    pub(crate) fn new(
        commands: mpsc::UnboundedSender<LoopCommand>,
        snapshot: watch::Receiver<LoopSnapshot>,
    ) -> Self {
        Self { commands, snapshot }
    }

    fn send(&self, command: LoopCommand) -> Result<()> {
        if self.commands.send(command).is_err() {
            bail!("control loop has shut down");
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.send(LoopCommand::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(LoopCommand::Resume)
    }

    pub fn capture_now(&self) -> Result<()> {
        self.send(LoopCommand::CaptureNow)
    }

    pub fn export(&self, path: Option<PathBuf>) -> Result<()> {
        self.send(LoopCommand::Export(path))
    }

    pub fn quit(&self) -> Result<()> {
        self.send(LoopCommand::Quit)
    }

    /// Whitelists the key before it ever reaches the loop, so callers get an
    /// immediate error for typos instead of a silently dropped command.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        if !SETTABLE_KEYS.contains(&key) {
            bail!("setting {key:?} is not runtime-settable");
        }
        self.send(LoopCommand::Set {
            key: key.to_string(),
            value: value.to_string(),
        })
    }

    /// Latest completed cycle, if any.
    pub fn dump(&self) -> Option<CycleRecord> {
        self.snapshot.borrow().records.last().copied()
    }

    /// Full rolling-window contents.
    pub fn dump_all(&self) -> Vec<CycleRecord> {
        self.snapshot.borrow().records.clone()
    }

    pub fn dump_settings(&self) -> BTreeMap<String, String> {
        self.snapshot.borrow().settings.clone()
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Resolves once the loop publishes its next snapshot.
    pub async fn changed(&mut self) -> Result<()> {
        if self.snapshot.changed().await.is_err() {
            bail!("control loop has shut down");
        }
        Ok(())
    }
}
