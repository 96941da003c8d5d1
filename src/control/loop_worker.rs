//! The control-loop cycle: schedule, capture, filter, map, actuate, record.
//!
//! A single task owns every piece of mutable state here. It is preemptible
//! only at ~10ms sleep ticks, where it drains the command channel; it never
//! suspends mid-computation.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Settings,
    filter,
    guard::{ActuatorGuard, WriteOutcome},
    log_debug, log_error, log_info, log_warn,
    mapper,
    record::{CycleRecord, History, Window},
    sensors::{AmbientSensor, ScreenSampler},
    solar::{Coordinates, Schedule, Scheduler},
};

use super::commands::{LoopCommand, LoopSnapshot};

const ENABLE_LOGS: bool = true;

/// Granularity at which the sleeping loop notices commands and cancellation.
const TICK: Duration = Duration::from_millis(10);

/// Anti-lockup timeout for one raw sample acquisition.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Screen-bleed readings are reused for this long before re-sampling; the
/// display content does not change meaningfully faster.
const SCREEN_REFRESH: Duration = Duration::from_secs(5);

/// Percent jump between consecutive cycles that invalidates the smoothing
/// window (lights switched, not drifting).
const PERCENT_JUMP_TOLERANCE: f64 = 20.0;

fn epoch_now() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

pub async fn control_loop(
    mut settings: Settings,
    mut scheduler: Scheduler,
    mut guard: ActuatorGuard,
    mut sensor: Box<dyn AmbientSensor>,
    mut screen: Box<dyn ScreenSampler>,
    mut commands: mpsc::UnboundedReceiver<LoopCommand>,
    snapshot_tx: watch::Sender<LoopSnapshot>,
    cancel: CancellationToken,
) -> Result<()> {
    sensor.open().context("ambient sensor open failed")?;

    let mut window = Window::new(settings.window_capacity);
    let mut history = History::default();
    let mut paused = false;
    let mut warned_low_precision = false;
    let mut last_screen: Option<(Instant, f64)> = None;
    let mut cycles: u64 = 0;
    let mut last_phase = None;

    let result = 'outer: loop {
        let cycle_start = epoch_now();
        let schedule = scheduler.evaluate(cycle_start, &settings);
        last_phase = schedule.phase;

        match perform_cycle(
            &settings,
            &schedule,
            sensor.as_mut(),
            screen.as_mut(),
            &mut guard,
            &mut window,
            &mut last_screen,
            &mut warned_low_precision,
        )
        .await
        {
            Ok(Some(record)) => {
                cycles += 1;
                if settings.record_history {
                    history.push(record);
                }
            }
            Ok(None) => {}
            Err(err) => break 'outer Err(err),
        }

        publish_snapshot(
            &snapshot_tx,
            &window,
            &settings,
            schedule.phase,
            paused,
            &guard,
            cycles,
        );

        let mut wake = Scheduler::wake_epoch(
            cycle_start,
            schedule.sleep_s,
            settings.capture_session_s(),
        );
        if epoch_now() > wake {
            // Best-effort cadence: a long capture just starts the next cycle
            // late instead of backpressuring anything.
            log_debug!("cycle overran its schedule by {:.1}s", epoch_now() - wake);
        }

        loop {
            if epoch_now() >= wake && !paused {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break 'outer Ok(()),
                _ = sleep(TICK) => {}
            }
            while let Ok(command) = commands.try_recv() {
                match command {
                    LoopCommand::Pause => {
                        if !paused {
                            log_info!("pausing: releasing sensor hardware");
                            sensor.stop();
                            sensor.close();
                            paused = true;
                            publish_snapshot(
                                &snapshot_tx, &window, &settings, last_phase, paused, &guard,
                                cycles,
                            );
                        }
                    }
                    LoopCommand::Resume => {
                        if paused {
                            log_info!("resuming: re-acquiring sensor hardware");
                            if let Err(err) = sensor.open() {
                                break 'outer Err(anyhow::Error::new(err)
                                    .context("sensor re-open on resume failed"));
                            }
                            paused = false;
                            warned_low_precision = false;
                            wake = epoch_now();
                            publish_snapshot(
                                &snapshot_tx, &window, &settings, last_phase, paused, &guard,
                                cycles,
                            );
                        }
                    }
                    LoopCommand::CaptureNow => {
                        if !paused {
                            wake = epoch_now();
                        }
                    }
                    LoopCommand::Export(path) => {
                        export_history(&mut history, path, &settings);
                    }
                    LoopCommand::Set { key, value } => {
                        apply_set(&mut settings, &mut scheduler, &key, &value);
                        publish_snapshot(
                            &snapshot_tx, &window, &settings, last_phase, paused, &guard, cycles,
                        );
                    }
                    LoopCommand::Quit => break 'outer Ok(()),
                }
            }
        }
    };

    sensor.stop();
    sensor.close();
    result
}

/// One complete sensing/actuation pass. `Ok(None)` means the burst never
/// settled and this cycle produced no record.
#[allow(clippy::too_many_arguments)]
async fn perform_cycle(
    settings: &Settings,
    schedule: &Schedule,
    sensor: &mut dyn AmbientSensor,
    screen: &mut dyn ScreenSampler,
    guard: &mut ActuatorGuard,
    window: &mut Window,
    last_screen: &mut Option<(Instant, f64)>,
    warned_low_precision: &mut bool,
) -> Result<Option<CycleRecord>> {
    let timestamp = epoch_now();

    let samples = capture_burst(sensor, settings).await?;
    let mut cleaned = filter::filter(&samples);
    if cleaned.is_empty() {
        if !*warned_low_precision {
            log_info!("capture precision too low, requesting an additional burst");
            *warned_low_precision = true;
        }
        let samples = capture_burst(sensor, settings).await?;
        cleaned = filter::filter(&samples);
    }
    if cleaned.is_empty() {
        log_warn!("no trustworthy samples this cycle, skipping actuation");
        return Ok(None);
    }
    let ambient = cleaned.iter().sum::<f64>() / cleaned.len() as f64;

    let screen_bri = if settings.screen {
        sample_screen(screen, last_screen)
    } else {
        0.0
    };

    let current_step = guard
        .read_step()
        .context("current backlight step unreadable")?;
    let position =
        mapper::adjust_scale(current_step, settings.steps, settings.bkofs, settings.invert);
    let correction = settings
        .calibration
        .correction(ambient, screen_bri, position);
    let percent = settings.calibration.percentage(
        ambient,
        settings.offset,
        settings.delta,
        screen_bri,
        position,
    );

    if let Some(last) = window.latest() {
        if (percent - last.percent).abs() > PERCENT_JUMP_TOLERANCE {
            log_debug!(
                "percent jumped {:.1} -> {:.1}, flushing smoothing window",
                last.percent,
                percent
            );
            window.flush();
        }
    }
    let smoothed = window.smoothed_percent(percent);
    let target =
        mapper::step_from_percentage(smoothed, settings.steps, settings.bkofs, settings.invert);

    let now = Instant::now();
    guard.tick(now);
    match guard.apply(current_step, target, schedule.phase, now) {
        WriteOutcome::Written(step) => {
            log_debug!(
                "amb {ambient:.1} scr {screen_bri:.0} cor {correction:.1} pct {percent:.1} -> step {step}"
            );
        }
        WriteOutcome::Suppressed => {
            log_debug!(
                "amb {ambient:.1} pct {percent:.1} target {target} held back (current {current_step})"
            );
        }
        WriteOutcome::Denied => {}
    }

    let record = CycleRecord {
        timestamp,
        ambient,
        screen: screen_bri,
        correction,
        percent,
        step: target,
        real_step: current_step,
    };
    window.push(record);
    Ok(Some(record))
}

/// Takes one capture session: `capture_count` reads spaced by
/// `capture_interval_s`. The first frame after start is a settling frame and
/// is discarded.
async fn capture_burst(sensor: &mut dyn AmbientSensor, settings: &Settings) -> Result<Vec<f64>> {
    sensor.start().context("sensor start failed")?;
    let _ = read_one(sensor, READ_TIMEOUT).await;

    let mut values = Vec::with_capacity(settings.capture_count as usize);
    for i in 0..settings.capture_count {
        match read_one(sensor, READ_TIMEOUT).await {
            Ok(value) => values.push(value),
            Err(err) => {
                sensor.stop();
                return Err(err);
            }
        }
        if i + 1 < settings.capture_count && settings.capture_interval_s > 0.0 {
            sleep(Duration::from_secs_f64(settings.capture_interval_s)).await;
        }
    }
    sensor.stop();
    Ok(values)
}

/// Single acquisition with the anti-lockup timeout: retryable errors are
/// retried until the deadline, then the cycle fails loudly rather than spin
/// on a stuck device.
async fn read_one(sensor: &mut dyn AmbientSensor, timeout: Duration) -> Result<f64> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match sensor.read_one() {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() => return Err(err.into()),
            Err(err) => {
                if tokio::time::Instant::now() >= deadline {
                    return Err(anyhow::Error::new(err)
                        .context(format!("sensor stuck for more than {timeout:?}")));
                }
                sleep(TICK).await;
            }
        }
    }
}

fn sample_screen(screen: &mut dyn ScreenSampler, last: &mut Option<(Instant, f64)>) -> f64 {
    if let Some((at, value)) = last {
        if at.elapsed() < SCREEN_REFRESH {
            return *value;
        }
    }
    let value = screen.read_display_brightness().unwrap_or(0.0);
    *last = Some((Instant::now(), value));
    value
}

fn export_history(history: &mut History, path: Option<PathBuf>, settings: &Settings) {
    let mut path = path
        .or_else(|| settings.export_path.clone())
        .unwrap_or_else(|| PathBuf::from("luxd.csv"));
    if path.extension().and_then(|ext| ext.to_str()) != Some("csv") {
        path.set_extension("csv");
    }
    match history.export(&path) {
        Ok(count) => log_info!("exported {count} records to {}", path.display()),
        Err(err) => log_error!("export failed: {err:#}"),
    }
}

fn apply_set(settings: &mut Settings, scheduler: &mut Scheduler, key: &str, value: &str) {
    match settings.set(key, value) {
        Ok(()) => {
            if key == "latitude" || key == "longitude" {
                let coords = settings.latitude.zip(settings.longitude).map(
                    |(latitude, longitude)| Coordinates {
                        latitude,
                        longitude,
                    },
                );
                scheduler.set_coords(coords);
            }
            log_info!("setting {key} changed to {value}");
        }
        Err(err) => log_warn!("rejected setting {key}={value}: {err:#}"),
    }
}

fn publish_snapshot(
    tx: &watch::Sender<LoopSnapshot>,
    window: &Window,
    settings: &Settings,
    phase: Option<crate::solar::DayPhase>,
    paused: bool,
    guard: &ActuatorGuard,
    cycles: u64,
) {
    let _ = tx.send(LoopSnapshot {
        records: window.to_vec(),
        settings: settings.snapshot_map(),
        phase,
        paused,
        lock_held: guard.lock_held(),
        cycles,
    });
}
