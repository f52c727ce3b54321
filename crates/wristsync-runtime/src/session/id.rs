//! Session id generation
//!
//! Ids look like `VR_20240131_142501_3fa2c91b_1_9c04e7a2`: prefix, UTC wall
//! clock, a device seed, a per-process counter and a random nonce. The seed
//! keeps ids from two devices apart, the counter keeps ids from one process
//! apart, and the nonce keeps restarts within the same second apart.

use sha2::{Digest, Sha256};
use tracing::debug;
use wristsync_core::Timestamp;

/// Suffix appended to sessions recorded without the companion
pub const LOCAL_SUFFIX: &str = "_LOCAL";

#[derive(Debug, Clone)]
pub struct SessionIdGenerator {
    prefix: String,
    device_seed: String,
    counter: u32,
}

impl SessionIdGenerator {
    pub fn new(prefix: impl Into<String>, device_seed: Option<String>) -> Self {
        let device_seed = device_seed.unwrap_or_else(derive_device_seed);
        Self {
            prefix: prefix.into(),
            device_seed,
            counter: 0,
        }
    }

    pub fn device_seed(&self) -> &str {
        &self.device_seed
    }

    pub fn generate(&mut self, now: Timestamp) -> String {
        self.counter = self.counter.wrapping_add(1);
        format!(
            "{}_{}_{}_{}_{}",
            self.prefix,
            now.to_utc().format("%Y%m%d_%H%M%S"),
            self.device_seed,
            self.counter,
            nonce()
        )
    }

    pub fn generate_local(&mut self, now: Timestamp) -> String {
        format!("{}{}", self.generate(now), LOCAL_SUFFIX)
    }
}

fn nonce() -> String {
    hex::encode(&uuid::Uuid::new_v4().as_bytes()[..4])
}

/// First four bytes of SHA-256 over the hostname, hex encoded
fn derive_device_seed() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|e| {
            debug!("Hostname unavailable ({}), using random device seed", e);
            uuid::Uuid::new_v4().to_string()
        });
    let digest = Sha256::digest(host.as_bytes());
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_format_and_are_unique() {
        let mut ids = SessionIdGenerator::new("VR", Some("cafe0001".into()));
        let now = Timestamp::new(1_700_000_000_000);
        let first = ids.generate(now);
        let second = ids.generate(now);
        assert!(first.starts_with("VR_20231114_221320_cafe0001_1_"));
        assert_eq!(first.len(), "VR_20231114_221320_cafe0001_1_".len() + 8);
        assert!(second.starts_with("VR_20231114_221320_cafe0001_2_"));
        assert!(ids.generate_local(now).ends_with("_LOCAL"));
    }

    #[test]
    fn fresh_generators_in_the_same_second_differ() {
        let now = Timestamp::new(1_700_000_000_000);
        let first = SessionIdGenerator::new("VR", None).generate(now);
        let second = SessionIdGenerator::new("VR", None).generate(now);
        assert_ne!(first, second);
    }

    #[test]
    fn derived_seed_is_eight_hex_chars() {
        let ids = SessionIdGenerator::new("VR", None);
        assert_eq!(ids.device_seed().len(), 8);
        assert!(ids.device_seed().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
