//! Headset application wiring
//!
//! Builds a [`SyncRuntime`] on either the Bluetooth central link or the
//! simulated companion, and owns the persisted preferences.

use std::path::{Path, PathBuf};

use tracing::info;
use wristsync_ble::BleCentralLink;
use wristsync_core::channel::SyncEventReceiver;
use wristsync_runtime::{
    normalize_address, Preferences, SimulatedLink, SimulatedLinkConfig, SimulatedLinkHandle,
    SyncHandle, SyncRuntime, TokioTimeSource,
};

use crate::config::AppConfig;
use crate::error::Result;

pub struct WristSyncApp {
    config: AppConfig,
    data_dir: PathBuf,
    preferences: Preferences,
    runtime: SyncRuntime,
    simulated: Option<SimulatedLinkHandle>,
}

impl WristSyncApp {
    pub async fn new(config: AppConfig, data_dir: PathBuf, simulate: bool) -> Result<Self> {
        let preferences = Preferences::load(&data_dir)?;
        let runtime = SyncRuntime::new(config.sync.clone())
            .with_companion_address(preferences.companion_address.clone());

        let (runtime, simulated) = if simulate {
            let link = SimulatedLink::new(SimulatedLinkConfig::default(), TokioTimeSource::new());
            let handle = link.handle();
            info!("Using simulated companion");
            (runtime.with_link(link), Some(handle))
        } else {
            let mut link = BleCentralLink::new(config.ble_link_config());
            link.initialize().await?;
            (runtime.with_link(link), None)
        };

        Ok(Self {
            config,
            data_dir,
            preferences,
            runtime,
            simulated,
        })
    }

    /// Subscribe before `start` to see every event
    pub fn subscribe(&self) -> SyncEventReceiver {
        self.runtime.subscribe()
    }

    pub async fn start(&mut self) -> Result<SyncHandle> {
        Ok(self.runtime.start().await?)
    }

    pub async fn stop(&mut self) -> Result<()> {
        Ok(self.runtime.stop().await?)
    }

    /// Persist `address` as the companion for future connects
    pub fn remember_companion(&mut self, address: &str) -> Result<()> {
        if self.preferences.companion_address.as_deref() == Some(normalize_address(address).as_str()) {
            return Ok(());
        }
        self.preferences.set_companion_address(address);
        self.preferences.save(&self.data_dir)?;
        info!("Remembered companion {}", address);
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn simulated(&self) -> Option<&SimulatedLinkHandle> {
        self.simulated.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn simulated_app_remembers_companion() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = WristSyncApp::new(AppConfig::default(), dir.path().to_path_buf(), true)
            .await
            .unwrap();
        assert!(app.simulated().is_some());
        assert!(app.preferences().companion_address.is_none());

        app.remember_companion("c0:ff:ee:00:00:01").unwrap();
        let stored = Preferences::load(dir.path()).unwrap();
        assert_eq!(stored.companion_address.as_deref(), Some("C0:FF:EE:00:00:01"));
    }

    #[tokio::test]
    async fn simulated_app_connects_to_remembered_companion() {
        let dir = tempfile::tempdir().unwrap();
        let mut prefs = Preferences::default();
        prefs.set_companion_address("C0:FF:EE:00:00:01");
        prefs.save(dir.path()).unwrap();

        let mut app = WristSyncApp::new(AppConfig::default(), dir.path().to_path_buf(), true)
            .await
            .unwrap();
        let mut events = app.subscribe();
        let handle = app.start().await.unwrap();
        handle.connect(None).await.unwrap();

        let connected = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            loop {
                if let Ok(wristsync_core::SyncEvent::Connected { address }) = events.recv().await {
                    return address;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(connected, "C0:FF:EE:00:00:01");
        app.stop().await.unwrap();
    }
}
