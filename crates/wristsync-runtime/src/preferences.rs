//! Persisted user preferences
//!
//! Only the remembered companion address today. Stored as JSON under the
//! platform data directory so it survives restarts.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::link::normalize_address;

pub const PREFERENCES_FILE: &str = "preferences.json";

#[derive(Error, Debug)]
pub enum PreferencesError {
    #[error("No data directory available on this platform")]
    NoDataDir,

    #[error("Preferences I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Preferences file is malformed: {0}")]
    Format(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub companion_address: Option<String>,
}

impl Preferences {
    /// `<data dir>/wristsync`
    pub fn default_dir() -> Result<PathBuf, PreferencesError> {
        dirs::data_dir()
            .map(|dir| dir.join("wristsync"))
            .ok_or(PreferencesError::NoDataDir)
    }

    /// Load from `dir`; a missing file yields defaults
    pub fn load(dir: &Path) -> Result<Self, PreferencesError> {
        let path = dir.join(PREFERENCES_FILE);
        if !path.exists() {
            debug!("No preferences at {}", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, dir: &Path) -> Result<(), PreferencesError> {
        fs::create_dir_all(dir)?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(PREFERENCES_FILE), content)?;
        Ok(())
    }

    pub fn set_companion_address(&mut self, address: &str) {
        self.companion_address = Some(normalize_address(address));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Preferences::load(dir.path()).unwrap(), Preferences::default());

        let mut prefs = Preferences::default();
        prefs.set_companion_address("aa:bb:cc:dd:ee:ff");
        prefs.save(dir.path()).unwrap();

        let loaded = Preferences::load(dir.path()).unwrap();
        assert_eq!(loaded.companion_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn malformed_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PREFERENCES_FILE), "not json").unwrap();
        assert!(matches!(
            Preferences::load(dir.path()),
            Err(PreferencesError::Format(_))
        ));
    }
}
