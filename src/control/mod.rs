mod commands;
mod controller;
mod loop_worker;

pub use commands::{LoopCommand, LoopHandle, LoopSnapshot};
pub use controller::{Collaborators, LoopController};

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use crate::{
        backlight::{Backlight, BacklightError},
        config::Settings,
        sensors::{AmbientSensor, NullScreen, SensorError},
        solar::{Horizon, NullGeo, NullWeather, SunInfo, SunTimes},
    };

    use super::*;

    /// Sensor scripted to repeat a fixed reading forever.
    struct SteadySensor {
        value: f64,
        reads: Arc<AtomicUsize>,
    }

    impl AmbientSensor for SteadySensor {
        fn open(&mut self) -> Result<(), SensorError> {
            Ok(())
        }

        fn start(&mut self) -> Result<(), SensorError> {
            Ok(())
        }

        fn read_one(&mut self) -> Result<f64, SensorError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }

        fn stop(&mut self) {}

        fn close(&mut self) {}
    }

    /// Sensor that counts its lifecycle transitions.
    struct LifecycleSensor {
        value: f64,
        opens: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    impl AmbientSensor for LifecycleSensor {
        fn open(&mut self) -> Result<(), SensorError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn start(&mut self) -> Result<(), SensorError> {
            Ok(())
        }

        fn read_one(&mut self) -> Result<f64, SensorError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.value)
        }

        fn stop(&mut self) {}

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Sensor whose bursts never settle: cycling extremes defeat the strict
    /// pass and leave no stable window for the fallback.
    struct NoisySensor {
        index: usize,
    }

    impl AmbientSensor for NoisySensor {
        fn open(&mut self) -> Result<(), SensorError> {
            Ok(())
        }

        fn start(&mut self) -> Result<(), SensorError> {
            Ok(())
        }

        fn read_one(&mut self) -> Result<f64, SensorError> {
            let value = [0.0, 100.0, 250.0][self.index % 3];
            self.index += 1;
            Ok(value)
        }

        fn stop(&mut self) {}

        fn close(&mut self) {}
    }

    struct SharedBacklight {
        step: Arc<AtomicUsize>,
    }

    impl Backlight for SharedBacklight {
        fn read_step(&mut self) -> Result<i32, BacklightError> {
            Ok(self.step.load(Ordering::SeqCst) as i32)
        }

        fn read_max(&mut self) -> Result<i32, BacklightError> {
            Ok(9)
        }

        fn write_step(&mut self, step: i32) -> Result<(), BacklightError> {
            self.step.store(step as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Always reports high noon, so every test cycle classifies as Day no
    /// matter when the suite actually runs.
    struct NoonSun;

    impl SunTimes for NoonSun {
        fn sun_times(&self, _lat: f64, _lon: f64, at_epoch: f64) -> SunInfo {
            SunInfo {
                horizon: Horizon::Normal {
                    sunrise: at_epoch - 43_200.0,
                    sunset: at_epoch + 43_200.0,
                },
                dawn_twilight_s: 3600.0,
                dusk_twilight_s: 3600.0,
            }
        }
    }

    fn test_settings() -> Settings {
        Settings {
            capture_count: 3,
            capture_interval_s: 0.0,
            latitude: Some(46.0),
            longitude: Some(11.0),
            geoip: false,
            weather: false,
            screen: false,
            day_sleep_s: 30.0,
            window_capacity: 8,
            ..Settings::default()
        }
    }

    fn collaborators(
        sensor: Box<dyn AmbientSensor>,
        step: Arc<AtomicUsize>,
    ) -> Collaborators {
        Collaborators {
            sensor,
            screen: Box::new(NullScreen),
            backlight: Box::new(SharedBacklight { step }),
            sun: Box::new(NoonSun),
            weather: Box::new(NullWeather),
            geo: Box::new(NullGeo),
        }
    }

    #[tokio::test]
    async fn cycle_produces_a_record_and_writes_a_step() {
        let step = Arc::new(AtomicUsize::new(0));
        let reads = Arc::new(AtomicUsize::new(0));
        let sensor = SteadySensor {
            value: 200.0,
            reads: Arc::clone(&reads),
        };

        let mut controller = LoopController::new();
        let mut handle = controller
            .start(test_settings(), collaborators(Box::new(sensor), Arc::clone(&step)))
            .unwrap();

        handle.changed().await.unwrap();
        let record = handle.dump().expect("one cycle completed");
        assert!((record.ambient - 200.0).abs() < 1e-9);
        assert_eq!(record.real_step, 0);
        assert!(record.step > 0, "bright ambient should raise the step");
        assert_eq!(step.load(Ordering::SeqCst) as i32, record.step);
        assert!(reads.load(Ordering::SeqCst) >= 3);

        handle.quit().unwrap();
        controller.join().await.unwrap();
    }

    #[tokio::test]
    async fn unusable_bursts_skip_actuation() {
        let step = Arc::new(AtomicUsize::new(4));
        let settings = Settings {
            capture_count: 6,
            ..test_settings()
        };
        let mut controller = LoopController::new();
        let mut handle = controller
            .start(
                settings,
                collaborators(Box::new(NoisySensor { index: 0 }), Arc::clone(&step)),
            )
            .unwrap();

        handle.changed().await.unwrap();
        assert!(handle.dump().is_none(), "no record from a hopeless burst");
        assert_eq!(step.load(Ordering::SeqCst), 4, "step untouched");

        handle.quit().unwrap();
        controller.join().await.unwrap();
    }

    #[tokio::test]
    async fn pause_releases_the_sensor_and_resume_recaptures() {
        let step = Arc::new(AtomicUsize::new(0));
        let opens = Arc::new(AtomicUsize::new(0));
        let reads = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let sensor = LifecycleSensor {
            value: 150.0,
            opens: Arc::clone(&opens),
            reads: Arc::clone(&reads),
            closes: Arc::clone(&closes),
        };

        let mut controller = LoopController::new();
        let mut handle = controller
            .start(test_settings(), collaborators(Box::new(sensor), step))
            .unwrap();

        handle.changed().await.unwrap();
        let cycles_before = handle.snapshot().cycles;
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        handle.pause().unwrap();
        handle.changed().await.unwrap();
        assert!(handle.snapshot().paused);
        assert_eq!(closes.load(Ordering::SeqCst), 1, "pause releases the device");

        let reads_at_pause = reads.load(Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(
            reads.load(Ordering::SeqCst),
            reads_at_pause,
            "no sampling while paused"
        );

        handle.resume().unwrap();
        while handle.snapshot().cycles <= cycles_before {
            handle.changed().await.unwrap();
        }
        assert!(!handle.snapshot().paused);
        assert_eq!(opens.load(Ordering::SeqCst), 2, "resume re-acquires the device");
        assert!(reads.load(Ordering::SeqCst) > reads_at_pause);

        handle.quit().unwrap();
        controller.join().await.unwrap();
    }

    #[tokio::test]
    async fn export_writes_history_csv() {
        let step = Arc::new(AtomicUsize::new(0));
        let reads = Arc::new(AtomicUsize::new(0));
        let sensor = SteadySensor {
            value: 120.0,
            reads,
        };
        let path = std::env::temp_dir().join(format!("luxd-loop-export-{}.csv", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let settings = Settings {
            record_history: true,
            export_path: Some(path.clone()),
            ..test_settings()
        };

        let mut controller = LoopController::new();
        let mut handle = controller
            .start(settings, collaborators(Box::new(sensor), step))
            .unwrap();

        handle.changed().await.unwrap();
        handle.export(None).unwrap();
        handle.quit().unwrap();
        controller.join().await.unwrap();

        let contents = std::fs::read_to_string(&path).expect("export file exists");
        assert!(contents.starts_with(crate::record::CSV_HEADER));
        assert!(contents.lines().count() >= 2);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn set_command_updates_published_settings() {
        let step = Arc::new(AtomicUsize::new(0));
        let reads = Arc::new(AtomicUsize::new(0));
        let sensor = SteadySensor {
            value: 90.0,
            reads,
        };

        let mut controller = LoopController::new();
        let mut handle = controller
            .start(test_settings(), collaborators(Box::new(sensor), step))
            .unwrap();

        assert!(handle.set("steps", "20").is_err());

        handle.changed().await.unwrap();
        handle.set("dayst", "120").unwrap();
        handle.changed().await.unwrap();
        assert_eq!(
            handle.dump_settings().get("dayst").map(String::as_str),
            Some("120")
        );

        handle.quit().unwrap();
        controller.stop().await.unwrap();
    }
}
