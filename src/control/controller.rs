//! Starts and stops the control-loop task.

use anyhow::{bail, Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    backlight::Backlight,
    config::Settings,
    guard::ActuatorGuard,
    sensors::{AmbientSensor, ScreenSampler},
    solar::{Coordinates, GeoLookup, Scheduler, SunTimes, WeatherLookup},
};

use super::commands::LoopHandle;
use super::loop_worker::control_loop;

/// Everything the loop talks to at its I/O edges. Ownership moves into the
/// loop task; the devices must not be shared.
pub struct Collaborators {
    pub sensor: Box<dyn AmbientSensor>,
    pub screen: Box<dyn ScreenSampler>,
    pub backlight: Box<dyn Backlight>,
    pub sun: Box<dyn SunTimes>,
    pub weather: Box<dyn WeatherLookup>,
    pub geo: Box<dyn GeoLookup>,
}

pub struct LoopController {
    task: Option<JoinHandle<Result<()>>>,
    cancel: Option<CancellationToken>,
}

impl LoopController {
    pub fn new() -> Self {
        Self {
            task: None,
            cancel: None,
        }
    }

    /// Spawns the control loop and returns the command/query handle.
    pub fn start(&mut self, settings: Settings, collaborators: Collaborators) -> Result<LoopHandle> {
        if self.task.is_some() {
            bail!("control loop already running");
        }

        let coords = settings
            .latitude
            .zip(settings.longitude)
            .map(|(latitude, longitude)| Coordinates {
                latitude,
                longitude,
            });
        let scheduler = Scheduler::new(
            collaborators.sun,
            collaborators.weather,
            collaborators.geo,
            coords,
        );
        let guard = ActuatorGuard::new(collaborators.backlight, settings.invert);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Default::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(control_loop(
            settings,
            scheduler,
            guard,
            collaborators.sensor,
            collaborators.screen,
            command_rx,
            snapshot_tx,
            cancel.clone(),
        ));

        self.task = Some(task);
        self.cancel = Some(cancel);
        Ok(LoopHandle::new(command_tx, snapshot_rx))
    }

    /// Cancels the loop and waits for it, surfacing any fatal loop error.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            task.await.context("control loop task failed to join")?
        } else {
            Ok(())
        }
    }

    /// Waits for the loop to end on its own (e.g. after a Quit command),
    /// surfacing any fatal loop error.
    pub async fn join(&mut self) -> Result<()> {
        self.cancel.take();
        if let Some(task) = self.task.take() {
            task.await.context("control loop task failed to join")?
        } else {
            Ok(())
        }
    }
}

impl Default for LoopController {
    fn default() -> Self {
        Self::new()
    }
}
