//! Companion server for platforms without a supported peripheral stack

use std::future::Future;

use tokio::sync::mpsc;
use tracing::warn;

use super::{SensorFeed, SensorUpdate};
use crate::config::CompanionServerConfig;
use crate::error::{BleError, Result};

pub struct CompanionServer {
    config: CompanionServerConfig,
    feed: SensorFeed,
    _sensors: mpsc::UnboundedReceiver<SensorUpdate>,
}

impl CompanionServer {
    pub fn new(config: CompanionServerConfig) -> Self {
        let (feed, sensors) = SensorFeed::channel();
        Self {
            config,
            feed,
            _sensors: sensors,
        }
    }

    pub fn sensor_feed(&self) -> SensorFeed {
        self.feed.clone()
    }

    pub async fn run<F>(self, _shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        warn!(
            "BLE peripheral role not supported on this platform. Companion '{}' will not be discoverable.",
            self.config.local_name
        );
        Err(BleError::PeripheralUnsupported)
    }
}
