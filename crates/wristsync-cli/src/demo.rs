//! Synthetic sensor samples
//!
//! Drives the simulated companion's CSV stream and the `companion
//! --demo-sensors` GATT server when no real sensors are attached.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;
use wristsync_ble::{SensorFeed, SensorUpdate};
use wristsync_core::peripheral::PeripheralNotifier;
use wristsync_core::{NotifierConfig, TimeSource};
use wristsync_runtime::{SimulatedLinkHandle, TokioTimeSource};

const SAMPLE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemoSample {
    pub heart_rate: f32,
    pub acceleration: [f32; 3],
}

/// Slow heart-rate swing between 60 and 80 bpm with a little wrist motion
#[derive(Debug, Default)]
pub struct DemoSensors {
    step: u64,
}

impl DemoSensors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_sample(&mut self) -> DemoSample {
        let phase = self.step as f32 * 0.1;
        self.step += 1;
        DemoSample {
            heart_rate: 70.0 + 10.0 * phase.sin(),
            acceleration: [0.02 * phase.sin(), 0.01 * phase.cos(), 1.0],
        }
    }
}

/// Push CSV rows through a simulated companion at the notifier cadence
pub fn spawn_simulated_rows(link: SimulatedLinkHandle, config: NotifierConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let clock = TokioTimeSource::new();
        let mut sensors = DemoSensors::new();
        let mut notifier = PeripheralNotifier::new(config);
        // The simulated link sends its own header on subscription
        let _ = notifier.subscribe("headset");
        let mut ticker = tokio::time::interval(SAMPLE_PERIOD);
        loop {
            ticker.tick().await;
            let sample = sensors.next_sample();
            notifier.update_heart_rate(sample.heart_rate);
            notifier.update_acceleration(sample.acceleration);
            for notification in notifier.poll(clock.now()) {
                link.notify(notification.chunk);
            }
        }
    })
}

/// Feed a companion server until it stops accepting samples
pub fn spawn_companion_sensors(feed: SensorFeed) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sensors = DemoSensors::new();
        let mut ticker = tokio::time::interval(SAMPLE_PERIOD);
        loop {
            ticker.tick().await;
            let sample = sensors.next_sample();
            if !feed.push(SensorUpdate::HeartRate(sample.heart_rate))
                || !feed.push(SensorUpdate::Acceleration(sample.acceleration))
            {
                debug!("Companion stopped, demo sensors exiting");
                break;
            }
        }
    })
}
