// Handshake state machine.

/// The current state of a Latch secure-session handshake (client role).
///
/// Strictly forward-progressing; no phase is ever re-entered. Any parse
/// or verification failure jumps straight to `Failed`, which is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Fresh engine, nothing sent yet.
    Initialized,
    /// Client hello built and handed to the transport.
    HelloSent,
    /// Server hello parsed; handshake-phase traffic keys derived.
    ServerHelloReceived,
    /// Verify-init nonce produced, waiting for the server's verify.
    ServerVerifyInitiated,
    /// Server verify decrypted and its echoed hash checked.
    VerifyExchanged,
    /// Application-phase traffic keys active.
    Established,
    /// Terminal failure; all session secrets discarded.
    Failed,
}

impl HandshakeState {
    /// Human-readable label for the current state (used in error messages).
    pub fn label(&self) -> &'static str {
        match self {
            HandshakeState::Initialized => "Initialized",
            HandshakeState::HelloSent => "HelloSent",
            HandshakeState::ServerHelloReceived => "ServerHelloReceived",
            HandshakeState::ServerVerifyInitiated => "ServerVerifyInitiated",
            HandshakeState::VerifyExchanged => "VerifyExchanged",
            HandshakeState::Established => "Established",
            HandshakeState::Failed => "Failed",
        }
    }
}
