// LatchTrust error types

use thiserror::Error;

/// Top-level error type for the LatchTrust crate.
#[derive(Debug, Error)]
pub enum LatchTrustError {
    // ── Key material ────────────────────────────────────────────────────
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),

    // ── Record layer ────────────────────────────────────────────────────
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    #[error("AEAD decryption failed")]
    DecryptionFailed,

    #[error("record counter exhausted, session must be re-established")]
    AlgorithmLimitExceeded,

    // ── Handshake ───────────────────────────────────────────────────────
    #[error("malformed message: {0}")]
    InvalidData(String),

    #[error("protocol alert: 0x{0:02x}")]
    Alert(u8),

    #[error("session is not established")]
    NotReady,

    #[error("invalid handshake state transition: {from} -> {to}")]
    InvalidState {
        from: &'static str,
        to: &'static str,
    },
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, LatchTrustError>;
