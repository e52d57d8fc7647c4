// Provisioned configuration: lock serial, authorization certificate and
// the two P-256 public keys, all supplied out of band (the vendor API).
//
// The lock advertises a GATT service whose UUID is derived from its
// serial number; the secure-session characteristics live under fixed
// UUIDs inside it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use latchtrust::crypto::ecdh::{parse_public_key, PUBLIC_KEY_LEN};

use crate::error::{LatchLinkError, Result};

/// Characteristic written with outbound secure-session frames.
pub const SECURE_SESSION_CHARACTERISTIC: &str = "00000401-4899-489F-A301-FBEE544B1DB0";
/// Characteristic notifying inbound secure-session frames.
pub const RECEIVE_SECURE_SESSION_CHARACTERISTIC: &str = "00000301-4899-489F-A301-FBEE544B1DB0";
/// Characteristic carrying encrypted API commands once established.
pub const API_CHARACTERISTIC: &str = "00000501-4899-489F-A301-FBEE544B1DB0";
/// Characteristic carrying encrypted lock notifications.
pub const NOTIFICATIONS_CHARACTERISTIC: &str = "00000101-4899-489F-A301-FBEE544B1DB0";

/// Raw provisioned values, as delivered by the vendor API (base64).
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Lock serial number, e.g. `12345678-901234`.
    pub serial_number: String,
    /// Base64 authorization certificate blob.
    pub certificate: String,
    /// Base64 uncompressed P-256 public key of the lock.
    pub device_public_key: String,
    /// Base64 uncompressed P-256 public key the local identity must match.
    pub mobile_public_key: String,
}

/// Decoded and validated configuration, consumed at session construction.
pub struct ProvisionedConfig {
    pub certificate: Vec<u8>,
    pub device_public_key: [u8; PUBLIC_KEY_LEN],
    pub mobile_public_key: [u8; PUBLIC_KEY_LEN],
    pub service_uuid: String,
}

impl LockConfig {
    /// Decode every field, failing hard on anything missing or malformed.
    pub fn decode(&self) -> Result<ProvisionedConfig> {
        if self.certificate.is_empty() {
            return Err(LatchLinkError::MissingCertificate);
        }
        let certificate = BASE64
            .decode(&self.certificate)
            .map_err(|_| LatchLinkError::MissingCertificate)?;

        let device_public_key = decode_public_key(&self.device_public_key, "device public key")?;
        let mobile_public_key = decode_public_key(&self.mobile_public_key, "mobile public key")?;
        let service_uuid = derive_service_uuid(&self.serial_number)?;

        Ok(ProvisionedConfig {
            certificate,
            device_public_key,
            mobile_public_key,
            service_uuid,
        })
    }
}

fn decode_public_key(encoded: &str, what: &str) -> Result<[u8; PUBLIC_KEY_LEN]> {
    if encoded.is_empty() {
        return Err(LatchLinkError::InvalidConfig(format!("{what} is empty")));
    }
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| LatchLinkError::InvalidConfig(format!("{what}: {e}")))?;
    let key: [u8; PUBLIC_KEY_LEN] = bytes
        .try_into()
        .map_err(|_| LatchLinkError::InvalidConfig(format!("{what}: wrong length")))?;
    parse_public_key(&key)
        .map_err(|e| LatchLinkError::InvalidConfig(format!("{what}: {e}")))?;
    Ok(key)
}

/// Derive the lock's GATT service UUID from its serial number: strip the
/// dash, splice `0000` after the first four digits, zero-pad to 32 hex
/// characters and hyphenate as 8-4-4-4-12.
pub fn derive_service_uuid(serial_number: &str) -> Result<String> {
    let cleaned: String = serial_number.chars().filter(|c| *c != '-').collect();
    if cleaned.len() != 14 || !cleaned.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(LatchLinkError::InvalidConfig(format!(
            "serial number {serial_number:?} is not a 14-character identifier"
        )));
    }
    let mut hex = String::with_capacity(32);
    hex.push_str(&cleaned[..4]);
    hex.push_str("0000");
    hex.push_str(&cleaned[4..]);
    hex.push_str(&"0".repeat(14));

    let uuid = format!(
        "{}-{}-{}-{}-{}",
        &hex[..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..]
    );
    Ok(uuid.to_uppercase())
}
