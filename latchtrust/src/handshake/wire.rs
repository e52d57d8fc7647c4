// Handshake wire layout: fixed offsets, traffic labels and the
// 2-byte big-endian length-prefix codec used by the verify messages.

use crate::crypto::ecdh::PUBLIC_KEY_LEN;
use crate::error::{LatchTrustError, Result};

/// Protocol version byte carried in the hello header.
pub const VERSION: u8 = 0x02;

/// Hello header: version, MTU placeholder, reserved.
pub const LEN_HEADER: usize = 3;
/// Length-prefix width.
pub const LEN_LENGTH: usize = 2;
/// Client/server random.
pub const LEN_RANDOM: usize = 32;
/// Reserved zero block after the public point (unused authorization slot).
pub const LEN_RESERVED_AUTH: usize = 48;
/// Reserved zero block at the end of the hello (unused session id slot).
pub const LEN_RESERVED_SESSION: usize = 4;

/// Offset of the random bytes inside a hello.
pub const OFFSET_RANDOM: usize = LEN_HEADER;
/// Offset of the ephemeral public point inside a hello.
pub const OFFSET_PUBLIC: usize = LEN_HEADER + LEN_RANDOM;
/// Total length of the client hello.
pub const HELLO_LEN: usize =
    LEN_HEADER + LEN_RANDOM + PUBLIC_KEY_LEN + LEN_RESERVED_AUTH + LEN_RESERVED_SESSION;

/// Alert payload codes.
pub const ALERT_CLOSE: u8 = 0x00;
pub const ALERT_FAIL: u8 = 0xFF;

// Traffic-key labels. Fixed protocol constants; the lock derives the same
// contexts with the client/server roles mirrored.
pub const CLIENT_HS_TRAFFIC: &[u8] = b"ptlsc hs traffic";
pub const SERVER_HS_TRAFFIC: &[u8] = b"ptlss hs traffic";
pub const CLIENT_AP_TRAFFIC: &[u8] = b"ptlsc ap traffic";
pub const SERVER_AP_TRAFFIC: &[u8] = b"ptlss ap traffic";

/// Read a 2-byte big-endian length at `offset`, checking that the declared
/// payload actually fits in `message`.
pub fn read_length(message: &[u8], offset: usize) -> Result<usize> {
    if message.len() < offset + LEN_LENGTH {
        return Err(LatchTrustError::InvalidData(
            "truncated length prefix".into(),
        ));
    }
    let len = ((message[offset] as usize) << 8) | message[offset + 1] as usize;
    if message.len() < offset + LEN_LENGTH + len {
        return Err(LatchTrustError::InvalidData(
            "length prefix exceeds message".into(),
        ));
    }
    Ok(len)
}

/// Append `field` to `out` preceded by its 2-byte big-endian length.
pub fn push_prefixed(out: &mut Vec<u8>, field: &[u8]) {
    out.push(((field.len() >> 8) & 0xff) as u8);
    out.push((field.len() & 0xff) as u8);
    out.extend_from_slice(field);
}
