// Transport frames: a one-byte opcode followed by the message payload.
//
// Outbound verify messages are the only ones long enough to exceed the
// negotiated MTU; they are split here into continuation/final fragments.
// Inbound reassembly is the transport collaborator's job.

use bytes::Bytes;

/// One-byte tag identifying a transport frame's logical message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Client hello, sent once at session construction.
    ClientHello = 0x00,
    /// Lock's hello response, carrying the proposed MTU.
    ServerHello = 0x03,
    /// Protocol abort, either direction.
    Alert = 0x04,
    /// Verify-init nonce outbound; the lock's verify message inbound.
    ServerVerify = 0x05,
    /// Non-final fragment of the client verify.
    VerifyContinuation = 0x06,
    /// Final fragment of the client verify.
    VerifyFinal = 0x07,
    /// Lock accepted the handshake; session is established.
    Initialized = 0x08,
}

impl Opcode {
    /// Resolve from a wire byte. Unknown values yield `None` and are
    /// ignored by the orchestrator without error.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Opcode::ClientHello),
            0x03 => Some(Opcode::ServerHello),
            0x04 => Some(Opcode::Alert),
            0x05 => Some(Opcode::ServerVerify),
            0x06 => Some(Opcode::VerifyContinuation),
            0x07 => Some(Opcode::VerifyFinal),
            0x08 => Some(Opcode::Initialized),
            _ => None,
        }
    }

    /// The wire byte.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Split an outbound verify message into MTU-sized fragments.
///
/// Every chunk carries at most `max_payload` bytes (the negotiated MTU
/// minus the opcode byte). All fragments but the last are tagged
/// [`Opcode::VerifyContinuation`]; the last is [`Opcode::VerifyFinal`].
pub fn fragment_verify(message: Bytes, max_payload: usize) -> Vec<(Opcode, Bytes)> {
    debug_assert!(max_payload > 0);
    let mut fragments = Vec::with_capacity(message.len() / max_payload + 1);
    let mut index = 0;
    while index < message.len() {
        let remaining = message.len() - index;
        if remaining <= max_payload {
            fragments.push((Opcode::VerifyFinal, message.slice(index..)));
        } else {
            fragments.push((
                Opcode::VerifyContinuation,
                message.slice(index..index + max_payload),
            ));
        }
        index += max_payload;
    }
    fragments
}
