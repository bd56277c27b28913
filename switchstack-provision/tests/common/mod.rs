//! Scripted in-memory BLE central for driving the engine without hardware

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use switchstack_provision::session::WIFI_CONNECT_UUID;
use switchstack_provision::{
    AdapterError, Advertisement, BleCentral, Connected, DiscoveredDevice, PeripheralId,
    Subscription,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// What the fake peripheral does
#[derive(Default, Clone)]
pub struct Script {
    /// Advertisements, each delivered at its offset from the scan start
    pub adverts: Vec<(Duration, Advertisement)>,
    pub connect_error: bool,
    pub connect_delay: Option<Duration>,
    pub fail_write: Option<Uuid>,
    pub fail_subscribe: bool,
    /// Drop the link while a write to this characteristic is in flight; the
    /// write itself never completes
    pub drop_link_on_write: Option<Uuid>,
    /// Status notified this long after the connect command is acknowledged
    pub status_reply: Option<(Duration, Vec<u8>)>,
    /// How long `disconnect` takes to return
    pub disconnect_delay: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(String),
    Write(Uuid, Vec<u8>),
    Subscribe(Uuid),
    Unsubscribe(Uuid),
    Disconnect(String),
}

#[derive(Debug)]
pub struct MockLink {
    id: String,
}

#[derive(Default)]
struct State {
    script: Script,
    calls: Vec<Call>,
    link_lost: Option<CancellationToken>,
    notify: Option<mpsc::UnboundedSender<Vec<u8>>>,
}

pub struct MockCentral {
    state: Mutex<State>,
}

impl MockCentral {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                script,
                ..State::default()
            }),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    /// Characteristics written, in order
    pub fn written(&self) -> Vec<Uuid> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Write(uuid, _) => Some(uuid),
                _ => None,
            })
            .collect()
    }

    /// Push a status value on the active subscription
    pub fn notify(&self, value: &[u8]) {
        if let Some(tx) = self.state.lock().unwrap().notify.as_ref() {
            let _ = tx.send(value.to_vec());
        }
    }

    /// Simulate the peripheral dropping the link
    pub fn drop_link(&self) {
        if let Some(token) = self.state.lock().unwrap().link_lost.as_ref() {
            token.cancel();
        }
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl BleCentral for MockCentral {
    type Link = MockLink;

    async fn start_scan(&self) -> Result<mpsc::UnboundedReceiver<Advertisement>, AdapterError> {
        self.record(Call::StartScan);
        let adverts = self.state.lock().unwrap().script.adverts.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let started = tokio::time::Instant::now();
        tokio::spawn(async move {
            for (offset, advert) in adverts {
                tokio::time::sleep_until(started + offset).await;
                if tx.send(advert).is_err() {
                    return;
                }
            }
            tx.closed().await;
        });
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), AdapterError> {
        self.record(Call::StopScan);
        Ok(())
    }

    async fn connect(&self, id: &PeripheralId) -> Result<Connected<MockLink>, AdapterError> {
        self.record(Call::Connect(id.clone()));
        let (delay, fail) = {
            let state = self.state.lock().unwrap();
            (state.script.connect_delay, state.script.connect_error)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(AdapterError::Other("link layer timeout".to_string()));
        }
        let link_lost = CancellationToken::new();
        self.state.lock().unwrap().link_lost = Some(link_lost.clone());
        Ok(Connected {
            link: MockLink { id: id.clone() },
            link_lost,
        })
    }

    async fn write(
        &self,
        _link: &MockLink,
        _service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), AdapterError> {
        self.record(Call::Write(characteristic, value.to_vec()));
        let (script, link_lost, notify) = {
            let state = self.state.lock().unwrap();
            (
                state.script.clone(),
                state.link_lost.clone(),
                state.notify.clone(),
            )
        };

        if script.drop_link_on_write == Some(characteristic) {
            if let Some(token) = link_lost {
                token.cancel();
            }
            std::future::pending::<()>().await;
        }
        if script.fail_write == Some(characteristic) {
            return Err(AdapterError::Other("GATT error 0x0e".to_string()));
        }
        if characteristic == WIFI_CONNECT_UUID {
            if let (Some((delay, value)), Some(tx)) = (script.status_reply, notify) {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(value);
                });
            }
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        _link: &MockLink,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Subscription, AdapterError> {
        self.record(Call::Subscribe(characteristic));
        if self.state.lock().unwrap().script.fail_subscribe {
            return Err(AdapterError::Other("CCCD write rejected".to_string()));
        }
        let (tx, values) = mpsc::unbounded_channel();
        self.state.lock().unwrap().notify = Some(tx);
        Ok(Subscription {
            service,
            characteristic,
            values,
        })
    }

    async fn unsubscribe(
        &self,
        _link: &MockLink,
        subscription: Subscription,
    ) -> Result<(), AdapterError> {
        self.record(Call::Unsubscribe(subscription.characteristic));
        self.state.lock().unwrap().notify = None;
        Ok(())
    }

    async fn disconnect(&self, link: MockLink) -> Result<(), AdapterError> {
        self.record(Call::Disconnect(link.id));
        let delay = self.state.lock().unwrap().script.disconnect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

pub fn advert(id: &str, name: &str, rssi: i16) -> Advertisement {
    Advertisement {
        id: id.to_string(),
        local_name: Some(name.to_string()),
        rssi: Some(rssi),
    }
}

pub fn kitchen() -> DiscoveredDevice {
    DiscoveredDevice {
        id: "AA:BB:CC:DD:EE:01".to_string(),
        name: "SH-IN-kitchen-01".to_string(),
        rssi: Some(-48),
    }
}
