//! Scan, select, provision: the entry point for UIs
//!
//! The coordinator runs at most one [`ProvisioningSession`] at a time. The
//! session's state is published on a `watch` channel that outlives
//! individual attempts, so a UI can subscribe once and follow every attempt.

use std::sync::Arc;

use tokio::sync::{Mutex, watch};
use tracing::{debug, info};

use crate::adapter::BleCentral;
use crate::config::ProvisionConfig;
use crate::credentials::Credentials;
use crate::error::CoordinatorError;
use crate::registry::{DeviceRegistry, DiscoveredDevice};
use crate::session::{CancelHandle, Outcome, ProvisioningSession, SessionState};

struct ActiveSession {
    attempt: u64,
    device: DiscoveredDevice,
    cancel: CancelHandle,
}

#[derive(Default)]
struct Attempts {
    selected: Option<DiscoveredDevice>,
    active: Option<ActiveSession>,
    last_attempt: u64,
}

pub struct Coordinator<A: BleCentral> {
    adapter: Arc<A>,
    config: ProvisionConfig,
    registry: DeviceRegistry<A>,
    state: Arc<watch::Sender<SessionState>>,
    attempts: Arc<Mutex<Attempts>>,
}

impl<A: BleCentral> Coordinator<A> {
    pub fn new(adapter: Arc<A>, config: ProvisionConfig) -> Self {
        let registry = DeviceRegistry::new(Arc::clone(&adapter), config.name_prefix.clone());
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            adapter,
            config,
            registry,
            state: Arc::new(state),
            attempts: Arc::new(Mutex::new(Attempts::default())),
        }
    }

    pub fn config(&self) -> &ProvisionConfig {
        &self.config
    }

    /// Scan for one window. Clears any previous selection.
    pub async fn scan(&self) -> Result<Vec<DiscoveredDevice>, CoordinatorError> {
        let stop = {
            // Held until the scan slot is claimed so `start` cannot slip in
            let mut attempts = self.attempts.lock().await;
            if self.occupied(&attempts) {
                return Err(CoordinatorError::AlreadyInProgress);
            }
            attempts.selected = None;
            self.registry.open_scan().await?
        };
        self.registry
            .run_scan(self.config.scan_window(), &stop)
            .await
    }

    pub async fn cancel_scan(&self) {
        self.registry.cancel_scan().await;
    }

    /// Devices found by the last scan
    pub async fn devices(&self) -> Vec<DiscoveredDevice> {
        self.registry.devices().await
    }

    /// Pick the device the next [`Coordinator::start`] provisions
    pub async fn select(&self, id: &str) -> Result<DiscoveredDevice, CoordinatorError> {
        let device = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| CoordinatorError::UnknownDevice(id.to_string()))?;
        debug!(device = %device.id, name = %device.name, "device selected");
        self.attempts.lock().await.selected = Some(device.clone());
        Ok(device)
    }

    /// Start provisioning the selected device in the background.
    ///
    /// Follow progress with [`Coordinator::subscribe`] or block on
    /// [`Coordinator::wait`].
    pub async fn start(&self, credentials: Credentials) -> Result<(), CoordinatorError> {
        let mut attempts = self.attempts.lock().await;
        if self.registry.is_scanning().await {
            return Err(CoordinatorError::ScanInProgress);
        }
        if self.occupied(&attempts) {
            return Err(CoordinatorError::AlreadyInProgress);
        }
        let device = attempts
            .selected
            .take()
            .ok_or(CoordinatorError::NoDeviceSelected)?;

        attempts.last_attempt += 1;
        let attempt = attempts.last_attempt;
        let session = ProvisioningSession::with_state(
            Arc::clone(&self.adapter),
            self.config.status_timeout(),
            Arc::clone(&self.state),
        )
        .with_connect_timeout(self.config.connect_timeout());
        attempts.active = Some(ActiveSession {
            attempt,
            device: device.clone(),
            cancel: session.cancel_handle(),
        });
        info!(attempt, device = %device.id, "provisioning started");

        let slot = Arc::clone(&self.attempts);
        tokio::spawn(async move {
            let outcome = session.start(&device, credentials).await;
            debug!(attempt, %outcome, "session ended");
            release(&slot, attempt).await;
        });
        Ok(())
    }

    /// Wait for the running attempt to finish. With nothing running, returns
    /// the outcome of the last attempt.
    pub async fn wait(&self) -> Result<Outcome, CoordinatorError> {
        let attempt = self.attempts.lock().await.active.as_ref().map(|a| a.attempt);
        let Some(attempt) = attempt else {
            return self
                .state
                .borrow()
                .outcome()
                .cloned()
                .ok_or(CoordinatorError::NoActiveSession);
        };

        let mut states = self.state.subscribe();
        let outcome = states
            .wait_for(SessionState::is_terminal)
            .await
            .ok()
            .and_then(|state| state.outcome().cloned())
            .ok_or(CoordinatorError::NoActiveSession)?;

        // The session task releases too; whichever runs first wins
        release(&self.attempts, attempt).await;
        Ok(outcome)
    }

    /// Select, start and wait in one call
    pub async fn provision(
        &self,
        id: &str,
        credentials: Credentials,
    ) -> Result<Outcome, CoordinatorError> {
        self.select(id).await?;
        self.start(credentials).await?;
        self.wait().await
    }

    /// Cancel the running attempt. Returns false if nothing was running.
    pub async fn cancel(&self) -> bool {
        let attempts = self.attempts.lock().await;
        match &attempts.active {
            Some(active) if self.occupied(&attempts) => {
                info!(attempt = active.attempt, "cancelling provisioning");
                active.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub async fn is_active(&self) -> bool {
        self.occupied(&*self.attempts.lock().await)
    }

    /// Device of the running attempt
    pub async fn active_device(&self) -> Option<DiscoveredDevice> {
        let attempts = self.attempts.lock().await;
        if !self.occupied(&attempts) {
            return None;
        }
        attempts.active.as_ref().map(|a| a.device.clone())
    }

    /// An attempt holds the slot until its outcome is published. Teardown
    /// after that does not block the next scan or attempt.
    fn occupied(&self, attempts: &Attempts) -> bool {
        attempts.active.is_some() && !self.state.borrow().is_terminal()
    }
}

async fn release(attempts: &Mutex<Attempts>, attempt: u64) {
    let mut attempts = attempts.lock().await;
    if attempts.active.as_ref().map(|a| a.attempt) == Some(attempt) {
        attempts.active = None;
    }
}
