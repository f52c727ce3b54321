//! Companion-side (GATT peripheral) behavior
//!
//! - [`notifier`] - periodic CSV row emission to subscribed centrals
//! - [`hrv`] - RMSSD / SDNN from RR intervals
//! - [`responder`] - replies to headset commands

pub mod hrv;
pub mod notifier;
pub mod responder;

pub use hrv::HrvWindow;
pub use notifier::{Notification, PeripheralNotifier, SensorSnapshot};
pub use responder::CompanionResponder;
