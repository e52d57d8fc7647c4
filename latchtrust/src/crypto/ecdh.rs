// NIST P-256 ephemeral key exchange.
//
// The wire carries uncompressed SEC1 points (65 bytes, 0x04 || X || Y).
// One keypair is generated per session and discarded with it; the secret
// scalar never leaves this module.

use p256::ecdh;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::error::{LatchTrustError, Result};

/// Length of an uncompressed SEC1 P-256 point.
pub const PUBLIC_KEY_LEN: usize = 65;

/// An ephemeral P-256 keypair for one handshake.
pub struct EcdhKeyPair {
    secret: SecretKey,
    public_bytes: [u8; PUBLIC_KEY_LEN],
}

impl EcdhKeyPair {
    /// Generate a new random ephemeral keypair.
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public_bytes = encode_public(&secret.public_key());
        Self {
            secret,
            public_bytes,
        }
    }

    /// Create from existing secret bytes (used in deterministic tests).
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| LatchTrustError::InvalidKey(format!("ecdh secret: {e}")))?;
        let public_bytes = encode_public(&secret.public_key());
        Ok(Self {
            secret,
            public_bytes,
        })
    }

    /// The 65-byte uncompressed public point.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public_bytes
    }

    /// Perform Diffie-Hellman with the peer's public key, returning the
    /// 32-byte shared secret (the raw X coordinate).
    pub fn diffie_hellman(&self, peer_public: &PublicKey) -> Zeroizing<[u8; 32]> {
        let shared = ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer_public.as_affine());
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes());
        out
    }
}

/// Parse an uncompressed SEC1 point, rejecting bytes that are not a valid
/// point on the curve.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey> {
    PublicKey::from_sec1_bytes(bytes)
        .map_err(|e| LatchTrustError::InvalidKey(format!("peer public key: {e}")))
}

fn encode_public(public: &PublicKey) -> [u8; PUBLIC_KEY_LEN] {
    let point = public.to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(point.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_key_is_uncompressed_sec1() {
        let kp = EcdhKeyPair::generate();
        let bytes = kp.public_key_bytes();
        assert_eq!(bytes.len(), PUBLIC_KEY_LEN);
        assert_eq!(bytes[0], 0x04);
    }

    #[test]
    fn shared_secret_agrees() {
        let a = EcdhKeyPair::generate();
        let b = EcdhKeyPair::generate();
        let a_pub = parse_public_key(&a.public_key_bytes()).unwrap();
        let b_pub = parse_public_key(&b.public_key_bytes()).unwrap();
        assert_eq!(*a.diffie_hellman(&b_pub), *b.diffie_hellman(&a_pub));
    }

    #[test]
    fn garbage_point_rejected() {
        assert!(parse_public_key(&[0xAB; 65]).is_err());
        assert!(parse_public_key(&[]).is_err());
    }
}
