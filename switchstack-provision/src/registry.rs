//! Peripherals discovered during one scan window

use std::sync::Arc;
use std::time::Duration;

use switchstack_proto::ble::is_provisioning_name;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{Advertisement, BleCentral, PeripheralId};
use crate::error::{AdapterError, CoordinatorError};

/// A provisionable peripheral seen during the current scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub id: PeripheralId,
    pub name: String,
    /// Most recent signal strength in dBm
    pub rssi: Option<i16>,
}

#[derive(Default)]
struct Inner {
    devices: Vec<DiscoveredDevice>,
    scan: Option<CancellationToken>,
}

pub struct DeviceRegistry<A: BleCentral> {
    adapter: Arc<A>,
    name_prefix: String,
    inner: Mutex<Inner>,
}

impl<A: BleCentral> DeviceRegistry<A> {
    pub fn new(adapter: Arc<A>, name_prefix: impl Into<String>) -> Self {
        Self {
            adapter,
            name_prefix: name_prefix.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Scan for `window` and return the peripherals whose advertised name
    /// carries the provisioning prefix, in first-seen order.
    ///
    /// Starting a scan discards the previous result. An empty result means
    /// nothing was in range; it is not retried.
    pub async fn begin_scan(
        &self,
        window: Duration,
    ) -> Result<Vec<DiscoveredDevice>, CoordinatorError> {
        let stop = self.open_scan().await?;
        self.run_scan(window, &stop).await
    }

    /// Claim the scan slot and discard the previous result. The scan itself
    /// runs in [`DeviceRegistry::run_scan`].
    pub(crate) async fn open_scan(&self) -> Result<CancellationToken, CoordinatorError> {
        let mut inner = self.inner.lock().await;
        if inner.scan.is_some() {
            return Err(CoordinatorError::ScanInProgress);
        }
        inner.devices.clear();
        let token = CancellationToken::new();
        inner.scan = Some(token.clone());
        Ok(token)
    }

    pub(crate) async fn run_scan(
        &self,
        window: Duration,
        stop: &CancellationToken,
    ) -> Result<Vec<DiscoveredDevice>, CoordinatorError> {
        info!(prefix = %self.name_prefix, ?window, "scanning for peripherals");
        let collected = self.collect(window, stop).await;

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("failed to stop scan: {e}");
        }

        let mut inner = self.inner.lock().await;
        inner.scan = None;
        collected?;

        info!(found = inner.devices.len(), "scan finished");
        Ok(inner.devices.clone())
    }

    async fn collect(&self, window: Duration, stop: &CancellationToken) -> Result<(), AdapterError> {
        let mut adverts = self.adapter.start_scan().await?;
        let window_end = tokio::time::sleep(window);
        tokio::pin!(window_end);

        loop {
            tokio::select! {
                _ = &mut window_end => break,
                _ = stop.cancelled() => {
                    debug!("scan cancelled");
                    break;
                }
                advert = adverts.recv() => match advert {
                    Some(advert) => {
                        let mut inner = self.inner.lock().await;
                        record(&mut inner.devices, &self.name_prefix, advert);
                    }
                    None => {
                        debug!("adapter ended the scan early");
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    /// Stop a running scan early. `begin_scan` then returns what it has.
    pub async fn cancel_scan(&self) {
        if let Some(token) = self.inner.lock().await.scan.as_ref() {
            token.cancel();
        }
    }

    pub async fn is_scanning(&self) -> bool {
        self.inner.lock().await.scan.is_some()
    }

    /// Snapshot of the devices seen so far
    pub async fn devices(&self) -> Vec<DiscoveredDevice> {
        self.inner.lock().await.devices.clone()
    }

    pub async fn get(&self, id: &str) -> Option<DiscoveredDevice> {
        self.inner
            .lock()
            .await
            .devices
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }
}

/// Insert or update a device from one advertisement.
///
/// Repeat advertisements only refresh the signal strength; they may omit
/// the name, as scan responses often do.
fn record(devices: &mut Vec<DiscoveredDevice>, prefix: &str, advert: Advertisement) {
    if let Some(known) = devices.iter_mut().find(|d| d.id == advert.id) {
        if advert.rssi.is_some() {
            known.rssi = advert.rssi;
        }
        return;
    }

    let Some(name) = advert.local_name else {
        return;
    };
    if !is_provisioning_name(&name, prefix) {
        return;
    }

    debug!(id = %advert.id, %name, rssi = ?advert.rssi, "discovered peripheral");
    devices.push(DiscoveredDevice {
        id: advert.id,
        name,
        rssi: advert.rssi,
    });
}
