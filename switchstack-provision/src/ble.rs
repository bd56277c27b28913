//! btleplug-backed BLE central
//!
//! Uses the first Bluetooth adapter of the platform manager.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::adapter::{Advertisement, BleCentral, Connected, PeripheralId, Subscription};
use crate::error::AdapterError;

pub struct BtleCentral {
    adapter: Adapter,
    scan_task: Mutex<Option<JoinHandle<()>>>,
}

/// A connected btleplug peripheral plus the task watching for its disconnect
pub struct BtleLink {
    peripheral: Peripheral,
    watcher: JoinHandle<()>,
}

impl BtleCentral {
    /// Open the default Bluetooth adapter
    pub async fn new() -> Result<Self, AdapterError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(AdapterError::NoAdapter)?;
        info!("using Bluetooth adapter: {}", adapter.adapter_info().await?);
        Ok(Self {
            adapter,
            scan_task: Mutex::new(None),
        })
    }

    /// Platform description of the adapter in use
    pub async fn adapter_info(&self) -> Result<String, AdapterError> {
        Ok(self.adapter.adapter_info().await?)
    }

    async fn find_peripheral(&self, id: &str) -> Result<Peripheral, AdapterError> {
        self.adapter
            .peripherals()
            .await?
            .into_iter()
            .find(|p| p.id().to_string() == id)
            .ok_or_else(|| AdapterError::PeripheralNotFound(id.to_string()))
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    service: Uuid,
    uuid: Uuid,
) -> Result<Characteristic, AdapterError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.service_uuid == service && c.uuid == uuid)
        .ok_or(AdapterError::CharacteristicNotFound(uuid))
}

#[async_trait]
impl BleCentral for BtleCentral {
    type Link = BtleLink;

    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<Advertisement>, AdapterError> {
        let mut events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let adapter = self.adapter.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let Ok(Some(props)) = peripheral.properties().await else {
                    continue;
                };
                let advert = Advertisement {
                    id: id.to_string(),
                    local_name: props.local_name,
                    rssi: props.rssi,
                };
                if tx.send(advert).is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
            self.adapter.stop_scan().await?;
        }
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId) -> Result<Connected<BtleLink>, AdapterError> {
        let peripheral = self.find_peripheral(id).await?;
        // Subscribe to central events first so a drop right after connect
        // is not missed.
        let mut events = self.adapter.events().await?;

        peripheral.connect().await?;
        if let Err(e) = peripheral.discover_services().await {
            let _ = peripheral.disconnect().await;
            return Err(e.into());
        }
        debug!(%id, "connected, services discovered");

        let link_lost = CancellationToken::new();
        let lost = link_lost.clone();
        let watched = peripheral.id();
        let watcher = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == watched {
                        lost.cancel();
                        break;
                    }
                }
            }
        });

        Ok(Connected {
            link: BtleLink {
                peripheral,
                watcher,
            },
            link_lost,
        })
    }

    async fn write(
        &self,
        link: &BtleLink,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        let c = find_characteristic(&link.peripheral, service, characteristic)?;
        link.peripheral
            .write(&c, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn subscribe(
        &self,
        link: &BtleLink,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Subscription, AdapterError> {
        let c = find_characteristic(&link.peripheral, service, characteristic)?;
        let mut notifications = link.peripheral.notifications().await?;
        link.peripheral.subscribe(&c).await?;

        let (tx, values) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    notification = notifications.next() => match notification {
                        Some(n) if n.uuid == characteristic => {
                            if tx.send(n.value).is_err() {
                                break;
                            }
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });

        Ok(Subscription {
            service,
            characteristic,
            values,
        })
    }

    async fn unsubscribe(
        &self,
        link: &BtleLink,
        subscription: Subscription,
    ) -> Result<(), AdapterError> {
        let c = find_characteristic(
            &link.peripheral,
            subscription.service,
            subscription.characteristic,
        )?;
        // Dropping the receiver stops the forwarding task
        drop(subscription);
        link.peripheral.unsubscribe(&c).await?;
        Ok(())
    }

    async fn disconnect(&self, link: BtleLink) -> Result<(), AdapterError> {
        link.watcher.abort();
        if link.peripheral.is_connected().await.unwrap_or(false) {
            link.peripheral.disconnect().await?;
        }
        Ok(())
    }
}
