//! BLE GATT Service Protocol Constants for SwitchStack Device Provisioning
//!
//! This module defines the BLE service UUIDs, advertised-name prefix and the
//! single-byte encodings used for WiFi provisioning over BLE. UUIDs are kept
//! as `u128` so that dependants can build `const` UUID values from them.

/// BLE Service UUID: 4fafc201-1fb5-459e-8fcc-c5c9c331914b
pub const SERVICE_UUID: u128 = 0x4fafc201_1fb5_459e_8fcc_c5c9c331914b;

/// WiFi SSID Characteristic UUID (write)
pub const WIFI_SSID_UUID: u128 = 0x8801c9f9_df5c_4d86_9fa7_a2358c48db18;

/// WiFi Password Characteristic UUID (write)
pub const WIFI_PASS_UUID: u128 = 0xc8bda280_c946_463b_9da9_a3cb3c9481e6;

/// WiFi Connect Characteristic UUID (write), the commit trigger
pub const WIFI_CONNECT_UUID: u128 = 0xbeb5483e_36e1_4688_b7f5_ea07361b26a8;

/// Status Characteristic UUID (notify)
pub const STATUS_UUID: u128 = 0x86077f48_d9ec_4b0b_b543_53be4c18a6c2;

/// Advertised name prefix of provisionable SwitchStack peripherals
pub const DEVICE_NAME_PREFIX: &str = "SH-IN-";

/// Largest value the peripheral accepts in a single characteristic write
pub const MAX_WRITE_LEN: usize = 512;

/// Bytes written to the connect characteristic
pub mod commands {
    /// Join the WiFi network using the SSID and password written so far
    pub const CONNECT: u8 = 0x01;
}

/// Bytes notified on the status characteristic
pub mod status {
    /// The peripheral joined the network
    pub const CONNECTED: u8 = 0x01;
}

/// Result reported by the peripheral after a connect command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiStatus {
    Connected,
    /// Anything other than [`status::CONNECTED`]; carries the raw byte
    Failed(u8),
}

impl WifiStatus {
    /// Decode a status notification. Only the first byte is significant;
    /// an empty value carries no status.
    pub fn from_notification(value: &[u8]) -> Option<Self> {
        value.first().map(|&b| match b {
            status::CONNECTED => WifiStatus::Connected,
            other => WifiStatus::Failed(other),
        })
    }
}

/// Does an advertised local name belong to a provisionable peripheral?
pub fn is_provisioning_name(name: &str, prefix: &str) -> bool {
    !prefix.is_empty() && name.starts_with(prefix)
}
