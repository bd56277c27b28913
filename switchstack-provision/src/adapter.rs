//! BLE central abstraction consumed by the provisioning engine
//!
//! The engine never talks to a Bluetooth stack directly. Anything that can
//! scan, connect, write, subscribe and disconnect implements [`BleCentral`]:
//! [`BtleCentral`](crate::BtleCentral) for real hardware, a scripted mock in
//! tests. Callbacks of the underlying stack are surfaced as channels and
//! cancellation tokens so a single task can consume them.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AdapterError;

/// Platform-defined identity of a peripheral, stable for a scan's duration
pub type PeripheralId = String;

/// One advertisement observed during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub id: PeripheralId,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
}

/// A freshly established link.
///
/// `link_lost` is cancelled by the adapter when the peripheral or transport
/// drops the link without being asked to.
pub struct Connected<L> {
    pub link: L,
    pub link_lost: CancellationToken,
}

/// An active notification subscription.
///
/// Values arrive on `values` until the subscription is handed back to
/// [`BleCentral::unsubscribe`], which consumes it.
#[derive(Debug)]
pub struct Subscription {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub values: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// Trait for platform BLE central operations
#[async_trait]
pub trait BleCentral: Send + Sync + 'static {
    /// Exclusive handle to one connected peripheral
    type Link: Send + Sync + 'static;

    /// Start scanning. Advertisements, duplicates included, are delivered on
    /// the returned channel until [`BleCentral::stop_scan`] is called.
    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<Advertisement>, AdapterError>;

    /// Stop scanning. Safe to call when no scan is running.
    async fn stop_scan(&self) -> Result<(), AdapterError>;

    /// Connect to a peripheral. There is no timeout at this layer.
    async fn connect(&self, id: &PeripheralId) -> Result<Connected<Self::Link>, AdapterError>;

    /// Write with response, resolves once the peripheral acknowledged
    async fn write(
        &self,
        link: &Self::Link,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), AdapterError>;

    async fn subscribe(
        &self,
        link: &Self::Link,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Subscription, AdapterError>;

    async fn unsubscribe(
        &self,
        link: &Self::Link,
        subscription: Subscription,
    ) -> Result<(), AdapterError>;

    /// Release the link. Must succeed quietly on a link that is already broken.
    async fn disconnect(&self, link: Self::Link) -> Result<(), AdapterError>;
}
