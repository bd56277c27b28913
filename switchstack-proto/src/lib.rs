//! SwitchStack wire protocol - BLE GATT identifiers and byte encodings
//!
//! Shared by the provisioning engine and, on the firmware side, by anything
//! that has to agree with it byte for byte. No dependencies.

pub mod ble;
