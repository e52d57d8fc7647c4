// LatchLink — session orchestration for the Latch smart-lock protocol.
//
// Crate root: module declarations and public re-exports.

pub mod config;
pub mod error;
pub mod frame;
pub mod session;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use config::{LockConfig, ProvisionedConfig};
pub use error::{LatchLinkError, Result};
pub use frame::Opcode;
pub use session::{Session, SessionPhase};
pub use transport::FrameTransport;
