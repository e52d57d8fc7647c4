// Client-side handshake engine.
//
//   Client                              Lock
//     |--- Hello (152 B) ----------->|
//     |<-- ServerHello ---------------|   ECDH, hello_hash, hs traffic keys
//     |--- VerifyInit (timestamp) -->|
//     |<-- ServerVerify (encrypted) --|   peer auth data + signature + echoed hash
//     |--- Verify (encrypted) ------->|   ap traffic keys
//     |==== encrypted application ====|
//
// The engine owns the transcript (the ordered concatenation of every
// handshake message) and the two-phase key schedule hanging off it.
// Handshake-phase keys protect only the verify exchange; application keys
// replace them once the client verify is built.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::ecdh::{parse_public_key, EcdhKeyPair, PUBLIC_KEY_LEN};
use crate::crypto::hash::sha256;
use crate::crypto::identity::{verify_signature, IdentityStore};
use crate::error::{LatchTrustError, Result};
use crate::handshake::state::HandshakeState;
use crate::handshake::wire::{
    push_prefixed, read_length, ALERT_FAIL, CLIENT_AP_TRAFFIC, CLIENT_HS_TRAFFIC, HELLO_LEN,
    LEN_LENGTH, LEN_RANDOM, LEN_RESERVED_AUTH, LEN_RESERVED_SESSION, OFFSET_PUBLIC, OFFSET_RANDOM,
    SERVER_AP_TRAFFIC, SERVER_HS_TRAFFIC, VERSION,
};
use crate::record::{Mode, RecordCipher};

/// Client-role handshake engine for one secure session.
pub struct HandshakeEngine {
    state: HandshakeState,

    // Identity and trust material.
    identity: Box<dyn IdentityStore>,
    ephemeral: EcdhKeyPair,
    auth_data: Vec<u8>,

    // Local hello material.
    header: [u8; 3],
    random: [u8; LEN_RANDOM],
    local_public: [u8; PUBLIC_KEY_LEN],

    // Peer hello material.
    peer_header: [u8; 3],
    peer_random: [u8; LEN_RANDOM],
    peer_public: [u8; PUBLIC_KEY_LEN],
    /// Reserved bytes the peer sent after its fixed-length point. Ignored as
    /// key material but bound into the transcript and signed buffers.
    peer_key_suffix: Vec<u8>,

    // Verify-phase material received from the peer.
    peer_auth_data: Vec<u8>,
    peer_signature: Vec<u8>,

    // Transcript and key schedule.
    transcript: Vec<u8>,
    shared_secret: Option<Zeroizing<[u8; 32]>>,
    hello_hash: Option<[u8; 32]>,
    hello_verify_hash: Option<[u8; 32]>,
    hs_hash: Option<[u8; 32]>,

    // Current cipher pair: handshake-phase after the server hello,
    // application-phase once established.
    send: Option<RecordCipher>,
    recv: Option<RecordCipher>,
}

impl HandshakeEngine {
    /// Create a fresh engine from the provisioned authorization certificate,
    /// the long-term identity store and a session-scoped ephemeral keypair.
    pub fn new(
        auth_data: Vec<u8>,
        identity: Box<dyn IdentityStore>,
        ephemeral: EcdhKeyPair,
    ) -> Self {
        let local_public = ephemeral.public_key_bytes();
        Self {
            state: HandshakeState::Initialized,
            identity,
            ephemeral,
            auth_data,
            header: [VERSION, 0x00, 0x00],
            random: [0u8; LEN_RANDOM],
            local_public,
            peer_header: [0u8; 3],
            peer_random: [0u8; LEN_RANDOM],
            peer_public: [0u8; PUBLIC_KEY_LEN],
            peer_key_suffix: Vec::new(),
            peer_auth_data: Vec::new(),
            peer_signature: Vec::new(),
            transcript: Vec::new(),
            shared_secret: None,
            hello_hash: None,
            hello_verify_hash: None,
            hs_hash: None,
            send: None,
            recv: None,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// The 65-byte public point of the local long-term identity key.
    pub fn identity_public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.identity.public_key()
    }

    // ── Hello ───────────────────────────────────────────────────────────

    /// Build the 152-byte client hello and append it to the transcript.
    pub fn build_hello(&mut self) -> Result<Vec<u8>> {
        self.expect(HandshakeState::Initialized, "HelloSent")?;
        OsRng.fill_bytes(&mut self.random);
        let message = self.hello_image();
        debug_assert_eq!(message.len(), HELLO_LEN);
        self.transcript.extend_from_slice(&message);
        self.state = HandshakeState::HelloSent;
        Ok(message)
    }

    /// Parse the lock's hello, run ECDH and derive the handshake-phase
    /// traffic keys from the transcript digest.
    pub fn parse_server_hello(&mut self, message: &[u8]) -> Result<()> {
        self.expect(HandshakeState::HelloSent, "ServerHelloReceived")?;
        self.parse_server_hello_inner(message).map_err(|e| {
            self.abort();
            e
        })
    }

    fn parse_server_hello_inner(&mut self, message: &[u8]) -> Result<()> {
        if message.len() <= OFFSET_PUBLIC {
            return Err(LatchTrustError::InvalidData(format!(
                "server hello too short: {} bytes",
                message.len()
            )));
        }
        if message.len() < OFFSET_PUBLIC + PUBLIC_KEY_LEN {
            return Err(LatchTrustError::InvalidKey(
                "server hello truncates the public point".into(),
            ));
        }
        self.peer_header.copy_from_slice(&message[..OFFSET_RANDOM]);
        self.peer_random
            .copy_from_slice(&message[OFFSET_RANDOM..OFFSET_PUBLIC]);
        self.peer_public
            .copy_from_slice(&message[OFFSET_PUBLIC..OFFSET_PUBLIC + PUBLIC_KEY_LEN]);
        self.peer_key_suffix = message[OFFSET_PUBLIC + PUBLIC_KEY_LEN..].to_vec();

        let peer_public = parse_public_key(&self.peer_public)?;
        self.transcript.extend_from_slice(message);

        let shared = self.ephemeral.diffie_hellman(&peer_public);
        let hello_hash = sha256(&self.transcript);
        self.send = Some(RecordCipher::derive(
            &*shared,
            CLIENT_HS_TRAFFIC,
            &hello_hash,
            Mode::Encrypt,
        )?);
        self.recv = Some(RecordCipher::derive(
            &*shared,
            SERVER_HS_TRAFFIC,
            &hello_hash,
            Mode::Decrypt,
        )?);
        self.shared_secret = Some(shared);
        self.hello_hash = Some(hello_hash);
        self.state = HandshakeState::ServerHelloReceived;
        Ok(())
    }

    // ── Verify ──────────────────────────────────────────────────────────

    /// Produce the verify-init nonce (current Unix time in milliseconds,
    /// big-endian). Carries no cryptographic state change.
    pub fn verify_init_nonce(&mut self) -> Result<[u8; 8]> {
        self.expect(HandshakeState::ServerHelloReceived, "ServerVerifyInitiated")?;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.state = HandshakeState::ServerVerifyInitiated;
        Ok(millis.to_be_bytes())
    }

    /// Decrypt and parse the lock's verify message: length-prefixed
    /// authorization data, signature and echoed hello hash.
    pub fn parse_server_verify(&mut self, ciphertext: &[u8]) -> Result<()> {
        self.expect(HandshakeState::ServerVerifyInitiated, "VerifyExchanged")?;
        self.parse_server_verify_inner(ciphertext).map_err(|e| {
            self.abort();
            e
        })
    }

    fn parse_server_verify_inner(&mut self, ciphertext: &[u8]) -> Result<()> {
        let recv = self
            .recv
            .as_mut()
            .ok_or(LatchTrustError::InvalidData("handshake keys missing".into()))?;
        let plaintext = recv.transform(ciphertext)?;

        let mut offset = 0;
        let auth_len = read_length(&plaintext, offset)?;
        offset += LEN_LENGTH;
        self.peer_auth_data = plaintext[offset..offset + auth_len].to_vec();
        offset += auth_len;

        let sig_len = read_length(&plaintext, offset)?;
        offset += LEN_LENGTH;
        self.peer_signature = plaintext[offset..offset + sig_len].to_vec();
        offset += sig_len;

        let hash_len = read_length(&plaintext, offset)?;
        offset += LEN_LENGTH;
        if hash_len != 32 {
            return Err(LatchTrustError::Alert(ALERT_FAIL));
        }
        let hello_hash = self
            .hello_hash
            .ok_or(LatchTrustError::InvalidData("hello hash missing".into()))?;
        if plaintext[offset..offset + 32] != hello_hash {
            return Err(LatchTrustError::Alert(ALERT_FAIL));
        }
        offset += 32;

        self.transcript.extend_from_slice(&plaintext[..offset]);
        self.hello_verify_hash = Some(sha256(&self.transcript));
        self.state = HandshakeState::VerifyExchanged;
        Ok(())
    }

    /// Verify the lock's signature over the handshake transcript using its
    /// provisioned public key.
    ///
    /// A bad signature returns `Ok(false)`, never an error; the caller must
    /// treat `false` as fatal.
    pub fn peer_verify(&self, peer_public_key: &[u8]) -> Result<bool> {
        if self.state != HandshakeState::VerifyExchanged {
            return Err(LatchTrustError::InvalidState {
                from: self.state.label(),
                to: "VerifyExchanged",
            });
        }
        let buffer = self.signed_prefix();
        let digest = sha256(&buffer);
        Ok(verify_signature(
            peer_public_key,
            &digest,
            &self.peer_signature,
        ))
    }

    /// Build the client's encrypted verify message, then switch the cipher
    /// pair to the application-phase traffic keys.
    pub fn build_verify(&mut self) -> Result<Vec<u8>> {
        self.expect(HandshakeState::VerifyExchanged, "Established")?;
        self.build_verify_inner().map_err(|e| {
            self.abort();
            e
        })
    }

    fn build_verify_inner(&mut self) -> Result<Vec<u8>> {
        let hello_hash = self
            .hello_hash
            .ok_or(LatchTrustError::InvalidData("hello hash missing".into()))?;
        let hello_verify_hash = self.hello_verify_hash.ok_or(LatchTrustError::InvalidData(
            "hello verify hash missing".into(),
        ))?;

        let mut to_sign = self.signed_prefix();
        push_prefixed(&mut to_sign, &self.peer_signature);
        push_prefixed(&mut to_sign, &hello_hash);
        push_prefixed(&mut to_sign, &self.auth_data);
        let digest = sha256(&to_sign);
        let signature = self.identity.sign(&digest)?;

        let mut message = Vec::with_capacity(
            3 * LEN_LENGTH + self.auth_data.len() + signature.len() + hello_verify_hash.len(),
        );
        push_prefixed(&mut message, &self.auth_data);
        push_prefixed(&mut message, &signature);
        push_prefixed(&mut message, &hello_verify_hash);

        self.transcript.extend_from_slice(&message);
        let ciphertext = self
            .send
            .as_mut()
            .ok_or(LatchTrustError::InvalidData("handshake keys missing".into()))?
            .transform(&message)?;

        let hs_hash = sha256(&self.transcript);
        let shared = self
            .shared_secret
            .as_ref()
            .ok_or(LatchTrustError::InvalidData("shared secret missing".into()))?;
        self.send = Some(RecordCipher::derive(
            &**shared,
            CLIENT_AP_TRAFFIC,
            &hs_hash,
            Mode::Encrypt,
        )?);
        self.recv = Some(RecordCipher::derive(
            &**shared,
            SERVER_AP_TRAFFIC,
            &hs_hash,
            Mode::Decrypt,
        )?);
        self.hs_hash = Some(hs_hash);
        self.state = HandshakeState::Established;
        Ok(ciphertext)
    }

    // ── Application records ─────────────────────────────────────────────

    /// Encrypt one application record.
    pub fn write(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.state != HandshakeState::Established {
            return Err(LatchTrustError::NotReady);
        }
        self.send
            .as_mut()
            .ok_or(LatchTrustError::NotReady)?
            .transform(plaintext)
    }

    /// Decrypt one application record.
    pub fn read(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if self.state != HandshakeState::Established {
            return Err(LatchTrustError::NotReady);
        }
        self.recv
            .as_mut()
            .ok_or(LatchTrustError::NotReady)?
            .transform(ciphertext)
    }

    /// Discard all session secrets and move to the terminal `Failed` state.
    pub fn fail(&mut self) {
        self.abort();
    }

    // ── Internals ───────────────────────────────────────────────────────

    /// The local hello image: header || random || public point || reserved
    /// zeros. Identical bytes to the hello on the wire; also the first
    /// section of both to-be-signed buffers.
    fn hello_image(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HELLO_LEN);
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.random);
        out.extend_from_slice(&self.local_public);
        out.extend_from_slice(&[0u8; LEN_RESERVED_AUTH]);
        out.extend_from_slice(&[0u8; LEN_RESERVED_SESSION]);
        out
    }

    /// The peer hello image exactly as received, reserved suffix included.
    fn peer_hello_image(&self) -> Vec<u8> {
        let mut out =
            Vec::with_capacity(OFFSET_PUBLIC + PUBLIC_KEY_LEN + self.peer_key_suffix.len());
        out.extend_from_slice(&self.peer_header);
        out.extend_from_slice(&self.peer_random);
        out.extend_from_slice(&self.peer_public);
        out.extend_from_slice(&self.peer_key_suffix);
        out
    }

    /// Common prefix of both signature buffers: local hello image, peer
    /// hello image, length-prefixed peer authorization data.
    fn signed_prefix(&self) -> Vec<u8> {
        let mut out = self.hello_image();
        out.extend_from_slice(&self.peer_hello_image());
        push_prefixed(&mut out, &self.peer_auth_data);
        out
    }

    fn expect(&self, expected: HandshakeState, to: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LatchTrustError::InvalidState {
                from: self.state.label(),
                to,
            })
        }
    }

    fn abort(&mut self) {
        self.random.zeroize();
        self.peer_random.zeroize();
        self.peer_header = [0u8; 3];
        self.peer_public.zeroize();
        self.peer_key_suffix.zeroize();
        self.peer_auth_data.clear();
        self.peer_signature.clear();
        self.transcript.zeroize();
        self.shared_secret = None;
        self.hello_hash = None;
        self.hello_verify_hash = None;
        self.hs_hash = None;
        self.send = None;
        self.recv = None;
        self.state = HandshakeState::Failed;
    }
}
