use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use luxd::{
    backlight::SysfsBacklight,
    config::{OverrideStore, Settings},
    sensors::{NullScreen, SysfsAmbientSensor},
    solar::{FixedSun, NullGeo, NullWeather},
    Collaborators, LoopController,
};

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    /// Path to config file
    #[arg(short, long, default_value = "luxd.toml")]
    config: PathBuf,

    /// Path to the runtime-overrides store
    #[arg(long, default_value = "luxd-overrides.json")]
    overrides: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut settings = match Settings::load(&args.config) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("Error: failed to load config: {err:#}");
            eprintln!();
            eprintln!("Example config:\n\n{}", toml::to_string(&Settings::example())?);
            return Ok(());
        }
    };
    let mut overrides = OverrideStore::new(args.overrides);
    overrides.apply(&mut settings);

    let device = settings
        .device
        .clone()
        .context("no ambient sensor device configured")?;
    let collaborators = Collaborators {
        sensor: Box::new(SysfsAmbientSensor::new(device)),
        screen: Box::new(NullScreen),
        backlight: Box::new(SysfsBacklight::new(settings.backlight_path.clone())),
        sun: Box::new(FixedSun::default()),
        weather: Box::new(NullWeather),
        geo: Box::new(NullGeo),
    };

    let mut controller = LoopController::new();
    let handle = controller.start(settings, collaborators)?;
    info!("control loop running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested, finishing current cycle");
    let _ = handle.quit();
    controller.join().await
}
