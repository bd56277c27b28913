//! SwitchStack Provisioning
//!
//! BLE client that hands WiFi credentials to SwitchStack peripherals.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use switchstack_provision::{BtleCentral, Coordinator, Credentials, ProvisionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let central = Arc::new(BtleCentral::new().await?);
//!     let coordinator = Coordinator::new(central, ProvisionConfig::default());
//!
//!     let devices = coordinator.scan().await?;
//!     for device in &devices {
//!         println!("{} ({})", device.name, device.id);
//!     }
//!
//!     let credentials = Credentials::new("MySSID", "MyPassword")?;
//!     let outcome = coordinator.provision(&devices[0].id, credentials).await?;
//!     println!("{outcome}");
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod ble;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod registry;
pub mod session;

pub use adapter::{Advertisement, BleCentral, Connected, PeripheralId, Subscription};
pub use ble::{BtleCentral, BtleLink};
pub use config::{ProvisionConfig, switchstack_home};
pub use coordinator::Coordinator;
pub use credentials::{CredentialField, Credentials};
pub use error::{AdapterError, ConfigError, CoordinatorError, CredentialsError, TransportError};
pub use registry::{DeviceRegistry, DiscoveredDevice};
pub use session::{CancelHandle, CredentialStep, Outcome, ProvisioningSession, SessionState};
