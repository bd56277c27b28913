//! Error types for provisioning

use uuid::Uuid;

use crate::credentials::CredentialField;
use crate::session::CredentialStep;

/// Failure reported by a [`BleCentral`](crate::BleCentral) implementation
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("no Bluetooth adapter found")]
    NoAdapter,
    #[error("peripheral not found: {0}")]
    PeripheralNotFound(String),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
    #[error(transparent)]
    Btle(#[from] btleplug::Error),
    #[error("{0}")]
    Other(String),
}

/// Why a session ended in `TransportError`
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    ConnectFailed(String),
    #[error("failed to write {step}: {reason}")]
    WriteFailed { step: CredentialStep, reason: String },
    #[error("failed to subscribe to status notifications: {0}")]
    SubscribeFailed(String),
    #[error("peripheral disconnected unexpectedly")]
    UnsolicitedDisconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("{0} must not be empty")]
    Empty(CredentialField),
    #[error("{field} is {len} bytes, at most {max} fit in one write")]
    TooLong {
        field: CredentialField,
        len: usize,
        max: usize,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("a provisioning session is already in progress")]
    AlreadyInProgress,
    #[error("a scan is already in progress")]
    ScanInProgress,
    #[error("device {0} was not found in the last scan")]
    UnknownDevice(String),
    #[error("no device selected")]
    NoDeviceSelected,
    #[error("no provisioning session to wait for")]
    NoActiveSession,
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },
    #[error("could not determine home directory, set SWITCHSTACK_HOME")]
    NoHome,
}
