//! One credential-delivery attempt against one peripheral
//!
//! A session is driven by a single task: [`ProvisioningSession::start`]
//! consumes the session and returns once a terminal [`Outcome`] is reached.
//! Every wait inside it (connect, each write, the status notification) is a
//! biased `select!` against link loss and cancellation, so whichever signal
//! arrives first decides the outcome and later signals are dropped.
//!
//! Signals that are ready at the same poll are taken in a fixed order: link
//! loss, then cancellation, then the adapter result or status notification,
//! then the deadline. A cancel that lands while a status value is already
//! queued therefore records `Cancelled`.
//!
//! The terminal state is published as soon as the outcome is known; teardown
//! (unsubscribe, disconnect) runs afterwards with each call bounded by
//! [`TEARDOWN_TIMEOUT`].
//!
//! ```text
//! Idle -> Connecting -> WritingCredentials -> AwaitingStatus -> Finished(outcome)
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use switchstack_proto::ble::{self, WifiStatus, commands};
use tokio::sync::watch;
use tokio::time::{Instant, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{BleCentral, Connected, PeripheralId, Subscription};
use crate::credentials::Credentials;
use crate::error::{AdapterError, TransportError};
use crate::registry::DiscoveredDevice;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(ble::SERVICE_UUID);
pub const WIFI_SSID_UUID: Uuid = Uuid::from_u128(ble::WIFI_SSID_UUID);
pub const WIFI_PASS_UUID: Uuid = Uuid::from_u128(ble::WIFI_PASS_UUID);
pub const WIFI_CONNECT_UUID: Uuid = Uuid::from_u128(ble::WIFI_CONNECT_UUID);
pub const STATUS_UUID: Uuid = Uuid::from_u128(ble::STATUS_UUID);

/// Connect budget used when none is configured
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for each unsubscribe/disconnect call during teardown
pub const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// The three writes of a provisioning attempt, in the order they are issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStep {
    Ssid,
    Password,
    Connect,
}

impl CredentialStep {
    pub fn characteristic(self) -> Uuid {
        match self {
            CredentialStep::Ssid => WIFI_SSID_UUID,
            CredentialStep::Password => WIFI_PASS_UUID,
            CredentialStep::Connect => WIFI_CONNECT_UUID,
        }
    }
}

impl fmt::Display for CredentialStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialStep::Ssid => f.write_str("SSID"),
            CredentialStep::Password => f.write_str("password"),
            CredentialStep::Connect => f.write_str("connect command"),
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The peripheral reported it joined the network
    Succeeded,
    /// The peripheral reported it could not join; ask for other credentials
    Rejected { status: u8 },
    /// No status arrived in time. The WiFi join may or may not have worked.
    TimedOut,
    TransportError(TransportError),
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => f.write_str("device joined the WiFi network"),
            Outcome::Rejected { status } => write!(
                f,
                "device could not join the WiFi network (status 0x{status:02x})"
            ),
            Outcome::TimedOut => f.write_str("no status from device before the deadline"),
            Outcome::TransportError(e) => write!(f, "{e}"),
            Outcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    WritingCredentials,
    AwaitingStatus { deadline: Instant },
    Finished(Outcome),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Finished(_))
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            SessionState::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }
}

/// Cancels a session from outside its driving task.
///
/// Has no effect once the session is finished.
#[derive(Debug, Clone)]
pub struct CancelHandle(CancellationToken);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.cancel();
    }
}

pub struct ProvisioningSession<A: BleCentral> {
    adapter: Arc<A>,
    connect_timeout: Duration,
    status_timeout: Duration,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
    link: Option<A::Link>,
    link_lost: CancellationToken,
    subscription: Option<Subscription>,
}

impl<A: BleCentral> ProvisioningSession<A> {
    pub fn new(adapter: Arc<A>, status_timeout: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self::with_state(adapter, status_timeout, Arc::new(state))
    }

    /// Create a session that publishes into an existing state channel,
    /// resetting it to `Idle`.
    pub(crate) fn with_state(
        adapter: Arc<A>,
        status_timeout: Duration,
        state: Arc<watch::Sender<SessionState>>,
    ) -> Self {
        state.send_replace(SessionState::Idle);
        Self {
            adapter,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            status_timeout,
            state,
            cancel: CancellationToken::new(),
            link: None,
            link_lost: CancellationToken::new(),
            subscription: None,
        }
    }

    /// Give up on `connect` after `timeout`
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Deliver `credentials` to `device` and wait for its verdict.
    ///
    /// The link is always released before this returns, whatever the outcome.
    pub async fn start(mut self, device: &DiscoveredDevice, credentials: Credentials) -> Outcome {
        let outcome = match self.deliver(device, &credentials).await {
            Ok(()) => self.await_status().await,
            Err(outcome) => outcome,
        };
        self.finish(outcome).await
    }

    async fn deliver(
        &mut self,
        device: &DiscoveredDevice,
        credentials: &Credentials,
    ) -> Result<(), Outcome> {
        if self.cancel.is_cancelled() {
            return Err(Outcome::Cancelled);
        }

        self.transition(SessionState::Connecting);
        info!(device = %device.id, name = %device.name, "connecting");
        self.connect(&device.id).await?;

        self.transition(SessionState::WritingCredentials);
        info!(ssid = %credentials.ssid(), "sending WiFi credentials");
        self.write(CredentialStep::Ssid, credentials.ssid().as_bytes())
            .await?;
        self.write(CredentialStep::Password, credentials.password().as_bytes())
            .await?;

        // Subscribed before the connect command, so a fast status push is
        // already queued when we start waiting.
        let link = self.link()?;
        let subscription = self
            .guarded(self.adapter.subscribe(link, SERVICE_UUID, STATUS_UUID))
            .await?
            .map_err(|e| Outcome::TransportError(TransportError::SubscribeFailed(e.to_string())))?;
        self.subscription = Some(subscription);

        self.write(CredentialStep::Connect, &[commands::CONNECT])
            .await
    }

    async fn connect(&mut self, id: &PeripheralId) -> Result<(), Outcome> {
        let adapter = Arc::clone(&self.adapter);
        let target = id.clone();
        let mut connecting = Box::pin(async move { adapter.connect(&target).await });
        let expiry = tokio::time::sleep(self.connect_timeout);
        tokio::pin!(expiry);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                release_late_link(Arc::clone(&self.adapter), connecting);
                Err(Outcome::Cancelled)
            }
            result = &mut connecting => match result {
                Ok(connected) => {
                    self.link = Some(connected.link);
                    self.link_lost = connected.link_lost;
                    Ok(())
                }
                Err(e) => Err(Outcome::TransportError(TransportError::ConnectFailed(e.to_string()))),
            },
            _ = &mut expiry => {
                warn!(timeout = ?self.connect_timeout, "connect timed out");
                release_late_link(Arc::clone(&self.adapter), connecting);
                Err(Outcome::TransportError(TransportError::ConnectFailed(format!(
                    "no link after {}s",
                    self.connect_timeout.as_secs()
                ))))
            }
        }
    }

    async fn write(&self, step: CredentialStep, value: &[u8]) -> Result<(), Outcome> {
        debug!(%step, len = value.len(), "writing characteristic");
        let link = self.link()?;
        self.guarded(
            self.adapter
                .write(link, SERVICE_UUID, step.characteristic(), value),
        )
        .await?
        .map_err(|e| {
            Outcome::TransportError(TransportError::WriteFailed {
                step,
                reason: e.to_string(),
            })
        })
    }

    async fn await_status(&mut self) -> Outcome {
        let deadline = Instant::now() + self.status_timeout;
        self.transition(SessionState::AwaitingStatus { deadline });
        debug!(timeout = ?self.status_timeout, "waiting for status notification");

        let Some(subscription) = self.subscription.as_mut() else {
            return Outcome::TransportError(TransportError::UnsolicitedDisconnect);
        };
        let expiry = tokio::time::sleep_until(deadline);
        tokio::pin!(expiry);

        loop {
            tokio::select! {
                biased;
                _ = self.link_lost.cancelled() => {
                    return Outcome::TransportError(TransportError::UnsolicitedDisconnect);
                }
                _ = self.cancel.cancelled() => return Outcome::Cancelled,
                value = subscription.values.recv() => match value {
                    Some(value) => match WifiStatus::from_notification(&value) {
                        Some(WifiStatus::Connected) => return Outcome::Succeeded,
                        Some(WifiStatus::Failed(status)) => return Outcome::Rejected { status },
                        None => warn!("ignoring empty status notification"),
                    },
                    // The adapter closes the stream when the link goes away
                    None => return Outcome::TransportError(TransportError::UnsolicitedDisconnect),
                },
                _ = &mut expiry => return Outcome::TimedOut,
            }
        }
    }

    /// Run one adapter call unless the link drops or the session is
    /// cancelled first.
    async fn guarded<T>(&self, op: impl Future<Output = T>) -> Result<T, Outcome> {
        tokio::select! {
            biased;
            _ = self.link_lost.cancelled() => {
                Err(Outcome::TransportError(TransportError::UnsolicitedDisconnect))
            }
            _ = self.cancel.cancelled() => Err(Outcome::Cancelled),
            out = op => Ok(out),
        }
    }

    fn link(&self) -> Result<&A::Link, Outcome> {
        self.link
            .as_ref()
            .ok_or(Outcome::TransportError(TransportError::UnsolicitedDisconnect))
    }

    async fn finish(mut self, outcome: Outcome) -> Outcome {
        if outcome.is_success() {
            info!("provisioning succeeded");
        } else {
            warn!("provisioning failed: {outcome}");
        }
        self.transition(SessionState::Finished(outcome.clone()));
        self.release().await;
        outcome
    }

    /// Unsubscribe and disconnect. Runs once, from `finish`; the `take`s make
    /// a second run a no-op.
    async fn release(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        if let Some(subscription) = self.subscription.take() {
            match timeout(TEARDOWN_TIMEOUT, self.adapter.unsubscribe(&link, subscription)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("unsubscribe failed: {e}"),
                Err(_) => warn!("unsubscribe did not complete within {TEARDOWN_TIMEOUT:?}"),
            }
        }
        match timeout(TEARDOWN_TIMEOUT, self.adapter.disconnect(link)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("disconnect failed: {e}"),
            Err(_) => warn!("disconnect did not complete within {TEARDOWN_TIMEOUT:?}"),
        }
    }

    /// Publish a new state unless a terminal one has already been published
    fn transition(&self, next: SessionState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            debug!(from = ?current, to = ?next, "session transition");
            *current = next;
            true
        });
    }
}

/// Let a connect that lost its race finish in the background and drop
/// whatever link it yields.
fn release_late_link<A: BleCentral>(
    adapter: Arc<A>,
    connecting: impl Future<Output = Result<Connected<A::Link>, AdapterError>> + Send + 'static,
) {
    tokio::spawn(async move {
        if let Ok(connected) = connecting.await {
            debug!("releasing link established after the connect was abandoned");
            if let Err(e) = adapter.disconnect(connected.link).await {
                debug!("disconnect of abandoned link failed: {e}");
            }
        }
    });
}
