use latchtrust::LatchTrustError;
use thiserror::Error;

/// All errors produced by the LatchLink session layer.
#[derive(Debug, Error)]
pub enum LatchLinkError {
    // ── Construction-time configuration problems ────────────────────────
    #[error("identity keys are missing or unusable")]
    MissingKeys,

    #[error("authorization certificate is missing or malformed")]
    MissingCertificate,

    #[error("local identity does not match the provisioned mobile public key")]
    InvalidCertificate,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Session lifetime ────────────────────────────────────────────────
    #[error("handshake parse failure: {0}")]
    ParseError(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] LatchTrustError),
}

pub type Result<T> = std::result::Result<T, LatchLinkError>;
