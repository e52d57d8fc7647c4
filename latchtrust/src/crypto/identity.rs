// Long-term identity keys: ECDSA P-256 signing behind a key-store capability.
//
// The engine never sees private key bytes for the long-term identity; it
// only asks the store to sign a digest. Signatures are ASN.1 DER (X9.62),
// so their length varies and they travel length-prefixed on the wire.

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;

use crate::crypto::ecdh::PUBLIC_KEY_LEN;
use crate::error::{LatchTrustError, Result};

/// Capability interface over the platform key store.
///
/// Implementations hold the long-term P-256 identity keypair (a secure
/// enclave, a keychain, or [`SoftwareKeyStore`] for tests and hosts
/// without one).
pub trait IdentityStore {
    /// The 65-byte uncompressed public point of the identity key.
    fn public_key(&self) -> [u8; PUBLIC_KEY_LEN];

    /// ECDSA-sign a precomputed SHA-256 digest, returning a DER signature.
    fn sign(&self, digest: &[u8; 32]) -> Result<Vec<u8>>;
}

/// In-memory identity key store backed by a `p256` signing key.
pub struct SoftwareKeyStore {
    signing_key: SigningKey,
    public_bytes: [u8; PUBLIC_KEY_LEN],
}

impl SoftwareKeyStore {
    /// Generate a fresh random identity keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let public_bytes = encode_verifying_key(signing_key.verifying_key());
        Self {
            signing_key,
            public_bytes,
        }
    }

    /// Reconstruct from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| LatchTrustError::InvalidKey(format!("identity secret: {e}")))?;
        let public_bytes = encode_verifying_key(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            public_bytes,
        })
    }
}

impl IdentityStore for SoftwareKeyStore {
    fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.public_bytes
    }

    fn sign(&self, digest: &[u8; 32]) -> Result<Vec<u8>> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest)
            .map_err(|e| LatchTrustError::Signing(e.to_string()))?;
        Ok(signature.to_der().as_bytes().to_vec())
    }
}

/// Verify a DER ECDSA signature over a precomputed SHA-256 digest.
///
/// Returns `false` for malformed keys or signatures as well as for honest
/// verification failures; the caller treats all of them as fatal.
pub fn verify_signature(public_key: &[u8], digest: &[u8; 32], signature_der: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_sec1_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_der(signature_der) else {
        return false;
    };
    verifying_key.verify_prehash(digest, &signature).is_ok()
}

fn encode_verifying_key(key: &VerifyingKey) -> [u8; PUBLIC_KEY_LEN] {
    let point = key.to_encoded_point(false);
    let mut out = [0u8; PUBLIC_KEY_LEN];
    out.copy_from_slice(point.as_bytes());
    out
}
