//! Linux companion server using bluer (BlueZ)

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

use bluer::adv::{Advertisement, Type as AdvertisementType};
use bluer::gatt::local::{
    characteristic_control, Application, Characteristic, CharacteristicControlEvent,
    CharacteristicNotify, CharacteristicNotifyMethod, CharacteristicWrite, CharacteristicWriteMethod, Service,
};
use bluer::gatt::{CharacteristicReader, CharacteristicWriter};
use futures::{pin_mut, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use wristsync_core::peripheral::Notification;
use wristsync_core::{SystemTimeSource, TimeSource};

use super::{CompanionState, SensorFeed, SensorUpdate};
use crate::config::CompanionServerConfig;
use crate::error::{BleError, Result};

const TICK: Duration = Duration::from_millis(250);
const INBOUND_BUFFER: usize = 64;

// ----------------------------------------------------------------------------
// Linux Implementation
// ----------------------------------------------------------------------------

pub struct CompanionServer {
    config: CompanionServerConfig,
    state: CompanionState,
    feed: SensorFeed,
    sensors: mpsc::UnboundedReceiver<SensorUpdate>,
}

impl CompanionServer {
    pub fn new(config: CompanionServerConfig) -> Self {
        let state = CompanionState::new(&config);
        let (feed, sensors) = SensorFeed::channel();
        Self {
            config,
            state,
            feed,
            sensors,
        }
    }

    /// Handle for pushing sensor samples while the server runs
    pub fn sensor_feed(&self) -> SensorFeed {
        self.feed.clone()
    }

    /// Serve the GATT application and advertise until `shutdown` resolves
    pub async fn run<F>(mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let session = bluer::Session::new().await?;
        let adapter = session.default_adapter().await?;
        if !adapter.is_powered().await.unwrap_or(false) {
            adapter.set_powered(true).await?;
        }

        let (data_control, data_handle) = characteristic_control();
        let (command_control, command_handle) = characteristic_control();
        let app = Application {
            services: vec![Service {
                uuid: self.config.service_uuid,
                primary: true,
                characteristics: vec![
                    Characteristic {
                        uuid: self.config.data_characteristic_uuid,
                        notify: Some(CharacteristicNotify {
                            notify: true,
                            method: CharacteristicNotifyMethod::Io,
                            ..Default::default()
                        }),
                        control_handle: data_handle,
                        ..Default::default()
                    },
                    Characteristic {
                        uuid: self.config.command_characteristic_uuid,
                        write: Some(CharacteristicWrite {
                            write: true,
                            write_without_response: true,
                            method: CharacteristicWriteMethod::Io,
                            ..Default::default()
                        }),
                        control_handle: command_handle,
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            ..Default::default()
        };
        let _app_handle = adapter
            .serve_gatt_application(app)
            .await
            .map_err(|e| BleError::GattServer(e.to_string()))?;

        let advertisement = Advertisement {
            advertisement_type: AdvertisementType::Peripheral,
            service_uuids: BTreeSet::from([self.config.service_uuid]),
            local_name: Some(self.config.local_name.clone()),
            discoverable: Some(true),
            ..Default::default()
        };
        let _advertisement_handle = adapter.advertise(advertisement).await?;
        info!(
            "Companion '{}' advertising {} on {}",
            self.config.local_name,
            self.config.service_uuid,
            adapter.name()
        );

        let clock = SystemTimeSource::new();
        let (inbound_tx, mut inbound_rx) = mpsc::channel::<(String, Vec<u8>)>(INBOUND_BUFFER);
        let mut writers: HashMap<String, CharacteristicWriter> = HashMap::new();
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut next_heartbeat = Instant::now() + self.config.heartbeat_interval;

        pin_mut!(data_control, command_control, shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                event = data_control.next() => match event {
                    Some(CharacteristicControlEvent::Notify(writer)) => {
                        let peer = writer.device_address().to_string();
                        debug!("Notify session from {} (mtu {})", peer, writer.mtu());
                        writers.insert(peer.clone(), writer);
                        let header = self.state.open_session(&peer);
                        deliver(&mut writers, &mut self.state, header).await;
                    }
                    Some(_) => {}
                    None => break,
                },
                event = command_control.next() => match event {
                    Some(CharacteristicControlEvent::Write(request)) => {
                        let peer = request.device_address().to_string();
                        match request.accept() {
                            Ok(reader) => {
                                tokio::spawn(forward_writes(peer, reader, inbound_tx.clone()));
                            }
                            Err(e) => warn!("Rejected command session from {}: {}", peer, e),
                        }
                    }
                    Some(_) => {}
                    None => break,
                },
                Some((peer, bytes)) = inbound_rx.recv() => {
                    let replies = self.state.on_write(&peer, &bytes, clock.now());
                    deliver(&mut writers, &mut self.state, replies).await;
                }
                Some(update) = self.sensors.recv() => self.state.apply(update),
                _ = ticker.tick() => {
                    let now = clock.now();
                    let mut due = self.state.poll(now);
                    if Instant::now() >= next_heartbeat {
                        next_heartbeat = Instant::now() + self.config.heartbeat_interval;
                        due.extend(self.state.heartbeat(now));
                    }
                    deliver(&mut writers, &mut self.state, due).await;
                }
            }
        }

        let (computed, delivered) = self.state.notifier().counts();
        info!(
            "Companion stopped after {} rows ({} delivered)",
            computed, delivered
        );
        Ok(())
    }
}

/// Send chunks in order; a failed write ends that peer's subscription
async fn deliver(
    writers: &mut HashMap<String, CharacteristicWriter>,
    state: &mut CompanionState,
    notifications: Vec<Notification>,
) {
    for notification in notifications {
        let Some(writer) = writers.get_mut(&notification.peer) else {
            continue;
        };
        let mtu = writer.mtu().max(1);
        let mut failed = false;
        for piece in notification.chunk.chunks(mtu) {
            if let Err(e) = writer.write_all(piece).await {
                warn!("Notify to {} failed: {}", notification.peer, e);
                failed = true;
                break;
            }
        }
        if failed {
            writers.remove(&notification.peer);
            state.unsubscribe(&notification.peer);
        }
    }
}

async fn forward_writes(
    peer: String,
    mut reader: CharacteristicReader,
    inbound: mpsc::Sender<(String, Vec<u8>)>,
) {
    let mut buf = vec![0u8; reader.mtu().max(1)];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                debug!("{} wrote {}", peer, hex::encode(&buf[..n]));
                if inbound.send((peer.clone(), buf[..n].to_vec())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!("Command session from {} ended: {}", peer, e);
                break;
            }
        }
    }
}
