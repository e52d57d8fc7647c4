// Record layer: AES-128-GCM with traffic keys derived from the shared
// secret and a transcript digest.
//
// Derivation is a single HMAC-SHA256(key = shared_secret,
// msg = label || digest): bytes 0..16 are the AEAD key, 16..28 the base
// IV. Nonces are never transmitted; both sides XOR the last two IV bytes
// with an independently tracked 16-bit record counter.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{LatchTrustError, Result};

type HmacSha256 = Hmac<Sha256>;

/// AEAD key length (AES-128).
pub const KEY_LEN: usize = 16;
/// GCM nonce length.
pub const IV_LEN: usize = 12;
/// GCM authentication tag length, appended to the ciphertext.
pub const TAG_LEN: usize = 16;
/// Highest permitted record counter value. The counter is folded into a
/// 16-bit nonce suffix, so a 65537th record would reuse a nonce.
pub const MAX_COUNTER: u32 = 0xFFFF;

/// Direction of a record cipher context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Encrypt,
    Decrypt,
}

/// One direction of record protection. Two independent contexts exist per
/// session phase (send and receive), derived under distinct labels.
pub struct RecordCipher {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
    counter_base: [u8; 2],
    counter: u32,
    mode: Mode,
}

impl RecordCipher {
    /// Derive a fresh context from the ECDH shared secret, a traffic label
    /// and a transcript digest. Deterministic: both peers derive identical
    /// key material from the same inputs.
    pub fn derive(
        shared_secret: &[u8],
        label: &[u8],
        transcript_digest: &[u8],
        mode: Mode,
    ) -> Result<Self> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(shared_secret)
            .map_err(|e| LatchTrustError::InvalidKey(format!("hmac key: {e}")))?;
        mac.update(label);
        mac.update(transcript_digest);
        let material = mac.finalize().into_bytes();

        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&material[..KEY_LEN]);
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&material[KEY_LEN..KEY_LEN + IV_LEN]);
        let counter_base = [iv[10], iv[11]];

        Ok(Self {
            key,
            iv,
            counter_base,
            counter: 0,
            mode,
        })
    }

    /// The number of records transformed so far.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Encrypt or decrypt one record (combined mode: ciphertext || tag).
    ///
    /// The counter advances only on success, so a rejected record does not
    /// desynchronize the nonce sequence.
    pub fn transform(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        if self.counter > MAX_COUNTER {
            return Err(LatchTrustError::AlgorithmLimitExceeded);
        }

        let nonce_bytes = self.nonce();
        let cipher = Aes128Gcm::new_from_slice(&self.key)
            .map_err(|e| LatchTrustError::InvalidKey(format!("aes key: {e}")))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let result = match self.mode {
            Mode::Encrypt => cipher
                .encrypt(nonce, message)
                .map_err(|_| LatchTrustError::EncryptionFailed)?,
            Mode::Decrypt => cipher
                .decrypt(nonce, message)
                .map_err(|_| LatchTrustError::DecryptionFailed)?,
        };
        self.counter += 1;
        Ok(result)
    }

    /// Per-record nonce: base IV with its last two bytes XORed with the
    /// big-endian record counter.
    fn nonce(&self) -> [u8; IV_LEN] {
        let mut nonce = self.iv;
        nonce[10] = self.counter_base[0] ^ ((self.counter >> 8) & 0xff) as u8;
        nonce[11] = self.counter_base[1] ^ (self.counter & 0xff) as u8;
        nonce
    }

    #[cfg(test)]
    fn set_counter(&mut self, counter: u32) {
        self.counter = counter;
    }
}

impl Drop for RecordCipher {
    fn drop(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
        self.counter_base.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: [u8; 32] = [0x5A; 32];
    const DIGEST: [u8; 32] = [0x13; 32];
    const LABEL: &[u8] = b"ptlsc hs traffic";

    fn pair() -> (RecordCipher, RecordCipher) {
        let tx = RecordCipher::derive(&SECRET, LABEL, &DIGEST, Mode::Encrypt).unwrap();
        let rx = RecordCipher::derive(&SECRET, LABEL, &DIGEST, Mode::Decrypt).unwrap();
        (tx, rx)
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = RecordCipher::derive(&SECRET, LABEL, &DIGEST, Mode::Encrypt).unwrap();
        let b = RecordCipher::derive(&SECRET, LABEL, &DIGEST, Mode::Encrypt).unwrap();
        assert_eq!(a.key, b.key);
        assert_eq!(a.iv, b.iv);
        assert_eq!(a.counter_base, b.counter_base);
    }

    #[test]
    fn distinct_labels_yield_distinct_keys() {
        let a = RecordCipher::derive(&SECRET, b"ptlsc hs traffic", &DIGEST, Mode::Encrypt).unwrap();
        let b = RecordCipher::derive(&SECRET, b"ptlss hs traffic", &DIGEST, Mode::Encrypt).unwrap();
        assert_ne!(a.key, b.key);
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn roundtrip() {
        let (mut tx, mut rx) = pair();
        let ct = tx.transform(b"open sesame").unwrap();
        assert_eq!(ct.len(), b"open sesame".len() + TAG_LEN);
        let pt = rx.transform(&ct).unwrap();
        assert_eq!(pt, b"open sesame");
    }

    #[test]
    fn counter_makes_nonces_unique() {
        let (mut tx, _) = pair();
        let ct1 = tx.transform(b"same plaintext").unwrap();
        let ct2 = tx.transform(b"same plaintext").unwrap();
        assert_ne!(ct1, ct2);
        assert_eq!(tx.counter(), 2);
    }

    #[test]
    fn receiver_tracks_sender_counter() {
        let (mut tx, mut rx) = pair();
        for i in 0u8..5 {
            let ct = tx.transform(&[i]).unwrap();
            assert_eq!(rx.transform(&ct).unwrap(), [i]);
        }
    }

    #[test]
    fn tampered_record_rejected_without_advancing_counter() {
        let (mut tx, mut rx) = pair();
        let mut ct = tx.transform(b"data").unwrap();
        ct[0] ^= 0xFF;
        assert!(matches!(
            rx.transform(&ct),
            Err(LatchTrustError::DecryptionFailed)
        ));
        assert_eq!(rx.counter(), 0);
        // The untampered record still decrypts under counter 0.
        let ct = {
            let (mut tx2, _) = pair();
            tx2.transform(b"data").unwrap()
        };
        assert_eq!(rx.transform(&ct).unwrap(), b"data");
    }

    #[test]
    fn truncated_record_rejected() {
        let (mut tx, mut rx) = pair();
        let ct = tx.transform(b"data").unwrap();
        assert!(rx.transform(&ct[..TAG_LEN - 1]).is_err());
    }

    #[test]
    fn counter_exhaustion() {
        let (mut tx, _) = pair();
        tx.set_counter(MAX_COUNTER);
        // Counter 65535 is the last usable value.
        tx.transform(b"last").unwrap();
        assert_eq!(tx.counter(), MAX_COUNTER + 1);
        assert!(matches!(
            tx.transform(b"one too many"),
            Err(LatchTrustError::AlgorithmLimitExceeded)
        ));
        // Failure is sticky; the counter stays where it was.
        assert_eq!(tx.counter(), MAX_COUNTER + 1);
    }
}
