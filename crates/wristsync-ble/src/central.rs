//! Headset-side link over btleplug
//!
//! `BleCentralLink` executes [`RadioEffect`]s against a real adapter. Slow
//! operations (connect, service discovery, the notification stream) run in
//! spawned tasks that report back through the shared [`RadioEventSender`], so
//! the effect loop never blocks on the radio.

use std::collections::{BTreeSet, HashMap};
use std::pin::Pin;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use wristsync_core::channel::{EffectReceiver, RadioEventSender};
use wristsync_core::protocol::chunk_payload;
use wristsync_core::{LinkTask, RadioEffect, RadioEvent, SyncError};

use crate::config::BleLinkConfig;
use crate::error::{BleError, Result};

type CentralEvents = Pin<Box<dyn Stream<Item = CentralEvent> + Send>>;
type Notifications = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

// ----------------------------------------------------------------------------
// Active Link
// ----------------------------------------------------------------------------

/// The companion we are connecting or connected to
struct ActiveLink {
    id: PeripheralId,
    address: String,
    peripheral: Peripheral,
    /// Connect task, later the subscription and notification forwarder
    task: Option<JoinHandle<()>>,
}

impl ActiveLink {
    fn replace_task(&mut self, task: JoinHandle<()>) {
        if let Some(previous) = self.task.replace(task) {
            previous.abort();
        }
    }

    async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Err(e) = self.peripheral.disconnect().await {
            debug!("Disconnect from {} reported: {}", self.address, e);
        }
    }
}

// ----------------------------------------------------------------------------
// Central Link
// ----------------------------------------------------------------------------

pub struct BleCentralLink {
    config: BleLinkConfig,
    adapter: Option<Adapter>,
    radio: Option<RadioEventSender>,
    effects: Option<EffectReceiver>,
    /// Companions reported during the current scan, by address
    seen: HashMap<String, PeripheralId>,
    active: Option<ActiveLink>,
    scanning: bool,
}

impl BleCentralLink {
    pub fn new(config: BleLinkConfig) -> Self {
        Self {
            config,
            adapter: None,
            radio: None,
            effects: None,
            seen: HashMap::new(),
            active: None,
            scanning: false,
        }
    }

    /// Open the adapter
    ///
    /// `run` calls this too; calling it early surfaces a missing adapter
    /// before the runtime starts.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.adapter.is_some() {
            return Ok(());
        }
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .nth(self.config.adapter_index)
            .ok_or(BleError::AdapterNotAvailable)?;
        match adapter.adapter_info().await {
            Ok(info) => info!("BLE adapter initialized: {}", info),
            Err(e) => debug!("BLE adapter initialized, no info: {}", e),
        }
        self.adapter = Some(adapter);
        Ok(())
    }

    fn adapter(&self) -> Result<&Adapter> {
        self.adapter.as_ref().ok_or(BleError::AdapterNotAvailable)
    }

    fn radio(&self) -> wristsync_core::Result<&RadioEventSender> {
        self.radio.as_ref().ok_or_else(|| SyncError::Channel {
            reason: "BLE link has no event sender".to_string(),
        })
    }

    // ------------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------------

    async fn apply(&mut self, effect: RadioEffect) -> wristsync_core::Result<()> {
        match effect {
            RadioEffect::StartScan => {
                self.seen.clear();
                if let Err(e) = self.start_scan().await {
                    error!("{}", e);
                    self.radio()?.send(RadioEvent::ScanStopped)?;
                }
            }
            RadioEffect::StopScan => self.stop_scan().await,
            RadioEffect::Connect { address, attempt } => self.connect(address, attempt).await?,
            RadioEffect::Discover { attempt } => self.discover(attempt)?,
            RadioEffect::Write { data } => self.write(&data).await?,
            RadioEffect::Disconnect => {
                if let Some(active) = self.active.take() {
                    info!("Disconnecting from {}", active.address);
                    active.close().await;
                    self.radio()?.send(RadioEvent::Disconnected {
                        reason: "local disconnect".to_string(),
                    })?;
                }
            }
        }
        Ok(())
    }

    async fn start_scan(&mut self) -> Result<()> {
        let filter = ScanFilter {
            services: vec![self.config.service_uuid],
        };
        self.adapter()?
            .start_scan(filter)
            .await
            .map_err(|e| BleError::ScanFailed(e.to_string()))?;
        self.scanning = true;
        info!("Started BLE scan for {}", self.config.service_uuid);
        Ok(())
    }

    async fn stop_scan(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        if let Ok(adapter) = self.adapter() {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop BLE scan: {}", e);
            }
        }
    }

    async fn connect(&mut self, address: String, attempt: u64) -> wristsync_core::Result<()> {
        if let Some(previous) = self.active.take() {
            debug!("Dropping link to {} for attempt {}", previous.address, attempt);
            previous.close().await;
        }
        self.stop_scan().await;

        let peripheral = match self.find_peripheral(&address).await {
            Ok(peripheral) => peripheral,
            Err(e) => {
                warn!("Cannot connect to {}: {}", address, e);
                return self.radio()?.send(RadioEvent::ConnectFailed {
                    attempt,
                    error: e.into(),
                });
            }
        };

        let radio = self.radio()?.clone();
        let connecting = peripheral.clone();
        let target = address.clone();
        let task = tokio::spawn(async move {
            let event = match connecting.connect().await {
                Ok(()) => RadioEvent::Connected { attempt },
                Err(e) => RadioEvent::ConnectFailed {
                    attempt,
                    error: BleError::ConnectionFailed {
                        address: target,
                        reason: e.to_string(),
                    }
                    .into(),
                },
            };
            report(&radio, attempt, event);
        });

        self.active = Some(ActiveLink {
            id: peripheral.id(),
            address,
            peripheral,
            task: Some(task),
        });
        Ok(())
    }

    fn discover(&mut self, attempt: u64) -> wristsync_core::Result<()> {
        let radio = self.radio()?.clone();
        let Some(active) = self.active.as_mut() else {
            return radio.send(RadioEvent::ConnectFailed {
                attempt,
                error: BleError::NotConnected.into(),
            });
        };
        let task = tokio::spawn(subscribe_and_forward(
            active.peripheral.clone(),
            self.config.data_characteristic_uuid,
            attempt,
            radio,
        ));
        active.replace_task(task);
        Ok(())
    }

    async fn write(&self, data: &[u8]) -> wristsync_core::Result<()> {
        let radio = self.radio()?;
        let Some(active) = &self.active else {
            return radio.send(RadioEvent::WriteFailed {
                reason: BleError::NotConnected.to_string(),
            });
        };
        let characteristics = active.peripheral.characteristics();
        let Some(target) = select_write_characteristic(&characteristics, &self.config) else {
            return radio.send(RadioEvent::WriteFailed {
                reason: BleError::CharacteristicNotFound {
                    characteristic: self.config.command_characteristic_uuid.to_string(),
                }
                .to_string(),
            });
        };
        let write_type = if self.config.write_with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        for chunk in chunk_payload(data, self.config.max_payload) {
            if let Err(e) = active.peripheral.write(&target, chunk, write_type).await {
                warn!("Write to {} failed: {}", active.address, e);
                return radio.send(RadioEvent::WriteFailed {
                    reason: BleError::WriteFailed(e.to_string()).to_string(),
                });
            }
        }
        debug!("Wrote {} bytes to {}", data.len(), active.address);
        Ok(())
    }

    async fn find_peripheral(&self, address: &str) -> Result<Peripheral> {
        let adapter = self.adapter()?;
        if let Some(id) = self.seen.get(address) {
            return Ok(adapter.peripheral(id).await?);
        }
        for peripheral in adapter.peripherals().await? {
            if address_of(&peripheral).eq_ignore_ascii_case(address) {
                return Ok(peripheral);
            }
        }
        Err(BleError::DeviceNotFound {
            address: address.to_string(),
        })
    }

    // ------------------------------------------------------------------------
    // Adapter events
    // ------------------------------------------------------------------------

    async fn on_central_event(&mut self, event: CentralEvent) -> wristsync_core::Result<()> {
        match event {
            CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                if self.scanning {
                    self.on_discovered(id).await?;
                }
            }
            CentralEvent::DeviceDisconnected(id) => {
                if self.active.as_ref().is_some_and(|active| active.id == id) {
                    if let Some(active) = self.active.take() {
                        info!("Companion {} disconnected", active.address);
                        if let Some(task) = active.task {
                            task.abort();
                        }
                    }
                    self.radio()?.send(RadioEvent::Disconnected {
                        reason: "peer disconnected".to_string(),
                    })?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_discovered(&mut self, id: PeripheralId) -> wristsync_core::Result<()> {
        let Ok(adapter) = self.adapter() else {
            return Ok(());
        };
        let Ok(peripheral) = adapter.peripheral(&id).await else {
            return Ok(());
        };
        let properties = match peripheral.properties().await {
            Ok(Some(properties)) => properties,
            Ok(None) => return Ok(()),
            Err(e) => {
                debug!("No properties for {:?}: {}", id, e);
                return Ok(());
            }
        };
        if !properties.services.is_empty() && !properties.services.contains(&self.config.service_uuid)
        {
            return Ok(());
        }
        let name = properties.local_name;
        if !self.config.accepts_name(name.as_deref()) {
            return Ok(());
        }
        let address = display_address(properties.address, || format!("{:?}", id));
        if self.seen.contains_key(&address) {
            return Ok(());
        }
        debug!("Discovered {} ({:?}, rssi {:?})", address, name, properties.rssi);
        self.seen.insert(address.clone(), id);
        self.radio()?.send(RadioEvent::DeviceFound {
            address,
            name,
            rssi: properties.rssi,
        })
    }

    async fn shutdown(&mut self) {
        self.stop_scan().await;
        if let Some(active) = self.active.take() {
            active.close().await;
        }
    }
}

#[async_trait]
impl LinkTask for BleCentralLink {
    fn attach_channels(
        &mut self,
        event_sender: RadioEventSender,
        effect_receiver: EffectReceiver,
    ) -> wristsync_core::Result<()> {
        self.radio = Some(event_sender);
        self.effects = Some(effect_receiver);
        Ok(())
    }

    async fn run(&mut self) -> wristsync_core::Result<()> {
        let mut effects = self.effects.take().ok_or_else(|| SyncError::Channel {
            reason: "BLE link started without channels".to_string(),
        })?;
        self.initialize().await?;
        let mut central_events: CentralEvents = self.adapter()?.events().await.map_err(BleError::from)?;
        info!("BLE central link running");

        loop {
            tokio::select! {
                effect = effects.recv() => match effect {
                    Some(effect) => self.apply(effect).await?,
                    None => break,
                },
                Some(event) = central_events.next() => self.on_central_event(event).await?,
            }
        }

        self.shutdown().await;
        info!("BLE central link stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ble"
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

/// Deliver the outcome of `attempt`; false once the engine has gone away
fn report(radio: &RadioEventSender, attempt: u64, event: RadioEvent) -> bool {
    match radio.send(event) {
        Ok(()) => true,
        Err(e) => {
            debug!("Engine gone before attempt {} was reported: {}", attempt, e);
            false
        }
    }
}

async fn subscribe_and_forward(
    peripheral: Peripheral,
    data_uuid: Uuid,
    attempt: u64,
    radio: RadioEventSender,
) {
    let mut notifications = match subscribe(&peripheral, data_uuid).await {
        Ok(notifications) => notifications,
        Err(e) => {
            warn!("Subscription for attempt {} failed: {}", attempt, e);
            report(
                &radio,
                attempt,
                RadioEvent::ConnectFailed {
                    attempt,
                    error: e.into(),
                },
            );
            return;
        }
    };
    if radio.send(RadioEvent::Subscribed { attempt }).is_err() {
        return;
    }

    while let Some(notification) = notifications.next().await {
        if notification.uuid != data_uuid {
            continue;
        }
        if radio.send(RadioEvent::Data(notification.value)).is_err() {
            break;
        }
    }
    debug!("Notification stream for attempt {} ended", attempt);
}

async fn subscribe(peripheral: &Peripheral, data_uuid: Uuid) -> Result<Notifications> {
    peripheral
        .discover_services()
        .await
        .map_err(|e| BleError::ServiceDiscoveryFailed(e.to_string()))?;
    let characteristic = peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.uuid == data_uuid)
        .ok_or_else(|| BleError::CharacteristicNotFound {
            characteristic: data_uuid.to_string(),
        })?;
    let notifications = peripheral
        .notifications()
        .await
        .map_err(|e| BleError::SubscriptionFailed(e.to_string()))?;
    peripheral
        .subscribe(&characteristic)
        .await
        .map_err(|e| BleError::SubscriptionFailed(e.to_string()))?;
    Ok(notifications)
}

/// Command characteristic when present, else a writable data characteristic
fn select_write_characteristic(
    characteristics: &BTreeSet<Characteristic>,
    config: &BleLinkConfig,
) -> Option<Characteristic> {
    let writable = |c: &&Characteristic| {
        c.properties
            .intersects(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE)
    };
    characteristics
        .iter()
        .filter(writable)
        .find(|c| c.uuid == config.command_characteristic_uuid)
        .or_else(|| {
            characteristics
                .iter()
                .filter(writable)
                .find(|c| c.uuid == config.data_characteristic_uuid)
        })
        .cloned()
}

fn address_of(peripheral: &Peripheral) -> String {
    display_address(peripheral.address(), || format!("{:?}", peripheral.id()))
}

/// Platforms that hide the MAC report all zeros; fall back to the stack's id
fn display_address(address: BDAddr, fallback: impl FnOnce() -> String) -> String {
    if address == BDAddr::default() {
        fallback()
    } else {
        address.to_string().to_ascii_uppercase()
    }
}
