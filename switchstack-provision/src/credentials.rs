//! WiFi credentials delivered to a peripheral

use std::fmt;

use switchstack_proto::ble::MAX_WRITE_LEN;

use crate::error::CredentialsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    Ssid,
    Password,
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialField::Ssid => f.write_str("SSID"),
            CredentialField::Password => f.write_str("password"),
        }
    }
}

/// SSID and password for one provisioning attempt.
///
/// Both are written to the peripheral as raw UTF-8 with no framing, so each
/// must fit in a single characteristic write.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    ssid: String,
    password: String,
}

impl Credentials {
    pub fn new(
        ssid: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let ssid = ssid.into();
        let password = password.into();
        check(CredentialField::Ssid, &ssid)?;
        check(CredentialField::Password, &password)?;
        Ok(Self { ssid, password })
    }

    /// Read credentials from a file: SSID on line 1, password on line 2
    pub fn from_file(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::parse(&content)?)
    }

    fn parse(content: &str) -> Result<Self, CredentialsError> {
        let mut lines = content.lines();
        let ssid = lines.next().unwrap_or_default().trim();
        let password = lines.next().unwrap_or_default().trim();
        Self::new(ssid, password)
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn check(field: CredentialField, value: &str) -> Result<(), CredentialsError> {
    if value.is_empty() {
        return Err(CredentialsError::Empty(field));
    }
    if value.len() > MAX_WRITE_LEN {
        return Err(CredentialsError::TooLong {
            field,
            len: value.len(),
            max: MAX_WRITE_LEN,
        });
    }
    Ok(())
}
