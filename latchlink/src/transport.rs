// Port over the BLE transport collaborator.

use crate::error::Result;
use crate::frame::Opcode;

/// The transport surface the session orchestrator consumes.
///
/// Implementations own the BLE central plumbing (discovery, connection,
/// characteristic writes). Writes are fire-and-forget: an error from
/// `send_frame` is treated as a disconnect trigger, never retried.
/// Inbound frames are delivered by the transport calling
/// [`Session::handle_frame`](crate::session::Session::handle_frame) on
/// its single callback context; fragmented inbound messages must be
/// reassembled before delivery.
pub trait FrameTransport {
    /// Write one opcode-tagged frame to the secure-session characteristic.
    fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()>;

    /// Tear down the underlying connection.
    fn disconnect(&mut self);
}
