// Handshake engine, state machine and wire layout.

pub mod engine;
pub mod state;
pub mod wire;

pub use engine::HandshakeEngine;
pub use state::HandshakeState;
