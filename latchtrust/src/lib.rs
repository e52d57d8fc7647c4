// LatchTrust — secure-session core for the Latch smart-lock protocol.
//
// Crate root: module declarations and public re-exports.

pub mod crypto;
pub mod error;
pub mod handshake;
pub mod record;

// Re-export key types at crate root for convenience.
pub use crypto::ecdh::EcdhKeyPair;
pub use crypto::identity::{IdentityStore, SoftwareKeyStore};
pub use error::{LatchTrustError, Result};
pub use handshake::{HandshakeEngine, HandshakeState};
pub use record::{Mode, RecordCipher};
