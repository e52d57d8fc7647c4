// End-to-end session tests against a mock transport and a simulated lock.

use std::cell::RefCell;
use std::rc::Rc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use latchtrust::crypto::ecdh::{parse_public_key, EcdhKeyPair, PUBLIC_KEY_LEN};
use latchtrust::crypto::hash::sha256;
use latchtrust::crypto::identity::{IdentityStore, SoftwareKeyStore};
use latchtrust::handshake::wire::{
    push_prefixed, read_length, CLIENT_AP_TRAFFIC, CLIENT_HS_TRAFFIC, OFFSET_PUBLIC,
    SERVER_AP_TRAFFIC, SERVER_HS_TRAFFIC, VERSION,
};
use latchtrust::record::{Mode, RecordCipher};

use latchlink::config::LockConfig;
use latchlink::error::LatchLinkError;
use latchlink::frame::Opcode;
use latchlink::session::{Session, SessionPhase};
use latchlink::transport::FrameTransport;

// ── Mock transport ───────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct MockTransport {
    sent: Rc<RefCell<Vec<(u8, Vec<u8>)>>>,
    disconnected: Rc<RefCell<bool>>,
}

impl FrameTransport for MockTransport {
    fn send_frame(&mut self, opcode: Opcode, payload: &[u8]) -> latchlink::Result<()> {
        self.sent
            .borrow_mut()
            .push((opcode.as_u8(), payload.to_vec()));
        Ok(())
    }

    fn disconnect(&mut self) {
        *self.disconnected.borrow_mut() = true;
    }
}

/// Completion callback that records each invocation.
fn completion_recorder() -> (
    Box<dyn FnOnce(latchlink::Result<()>)>,
    Rc<RefCell<Vec<bool>>>,
) {
    let outcomes: Rc<RefCell<Vec<bool>>> = Rc::default();
    let handle = outcomes.clone();
    let callback = Box::new(move |result: latchlink::Result<()>| {
        handle.borrow_mut().push(result.is_ok());
    });
    (callback, outcomes)
}

// ── Simulated lock (server side of the protocol) ─────────────────────────

struct SimulatedLock {
    identity: SoftwareKeyStore,
    ephemeral: EcdhKeyPair,
    auth_data: Vec<u8>,
    transcript: Vec<u8>,
    client_hello: Vec<u8>,
    server_hello: Vec<u8>,
    shared: [u8; 32],
    hello_hash: [u8; 32],
    send: Option<RecordCipher>,
    recv: Option<RecordCipher>,
}

impl SimulatedLock {
    fn new() -> Self {
        Self {
            identity: SoftwareKeyStore::generate(),
            ephemeral: EcdhKeyPair::generate(),
            auth_data: b"lock authorization".to_vec(),
            transcript: Vec::new(),
            client_hello: Vec::new(),
            server_hello: Vec::new(),
            shared: [0u8; 32],
            hello_hash: [0u8; 32],
            send: None,
            recv: None,
        }
    }

    fn public_key(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.identity.public_key()
    }

    fn process_hello(&mut self, client_hello: &[u8], mtu: u8) -> Vec<u8> {
        self.client_hello = client_hello.to_vec();
        self.transcript.extend_from_slice(client_hello);

        let mut hello = vec![VERSION, mtu, 0x00];
        hello.extend_from_slice(&[0x7Eu8; 32]);
        hello.extend_from_slice(&self.ephemeral.public_key_bytes());
        self.server_hello = hello.clone();
        self.transcript.extend_from_slice(&hello);

        let client_point =
            parse_public_key(&client_hello[OFFSET_PUBLIC..OFFSET_PUBLIC + PUBLIC_KEY_LEN])
                .expect("client point");
        self.shared = *self.ephemeral.diffie_hellman(&client_point);
        self.hello_hash = sha256(&self.transcript);
        self.send = Some(
            RecordCipher::derive(&self.shared, SERVER_HS_TRAFFIC, &self.hello_hash, Mode::Encrypt)
                .unwrap(),
        );
        self.recv = Some(
            RecordCipher::derive(&self.shared, CLIENT_HS_TRAFFIC, &self.hello_hash, Mode::Decrypt)
                .unwrap(),
        );
        hello
    }

    fn build_server_verify(&mut self) -> Vec<u8> {
        let mut to_sign = self.client_hello.clone();
        to_sign.extend_from_slice(&self.server_hello);
        push_prefixed(&mut to_sign, &self.auth_data);
        let signature = self.identity.sign(&sha256(&to_sign)).unwrap();

        let mut plaintext = Vec::new();
        push_prefixed(&mut plaintext, &self.auth_data);
        push_prefixed(&mut plaintext, &signature);
        push_prefixed(&mut plaintext, &self.hello_hash);

        self.transcript.extend_from_slice(&plaintext);
        self.send.as_mut().unwrap().transform(&plaintext).unwrap()
    }

    /// Decrypt the reassembled client verify, check the echoed transcript
    /// hash and switch to the application-phase cipher pair.
    fn process_client_verify(&mut self, ciphertext: &[u8]) {
        let expected_hello_verify = sha256(&self.transcript);
        let plaintext = self.recv.as_mut().unwrap().transform(ciphertext).unwrap();

        let mut offset = 0;
        let auth_len = read_length(&plaintext, offset).unwrap();
        offset += 2 + auth_len;
        let sig_len = read_length(&plaintext, offset).unwrap();
        offset += 2 + sig_len;
        let hash_len = read_length(&plaintext, offset).unwrap();
        offset += 2;
        assert_eq!(hash_len, 32);
        assert_eq!(&plaintext[offset..offset + 32], &expected_hello_verify);
        offset += 32;

        self.transcript.extend_from_slice(&plaintext[..offset]);
        let hs_hash = sha256(&self.transcript);
        self.send = Some(
            RecordCipher::derive(&self.shared, SERVER_AP_TRAFFIC, &hs_hash, Mode::Encrypt)
                .unwrap(),
        );
        self.recv = Some(
            RecordCipher::derive(&self.shared, CLIENT_AP_TRAFFIC, &hs_hash, Mode::Decrypt)
                .unwrap(),
        );
    }

    fn decrypt(&mut self, record: &[u8]) -> Vec<u8> {
        self.recv.as_mut().unwrap().transform(record).unwrap()
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Vec<u8> {
        self.send.as_mut().unwrap().transform(plaintext).unwrap()
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────

fn config_for(lock: &SimulatedLock, mobile: &SoftwareKeyStore) -> LockConfig {
    LockConfig {
        serial_number: "12345678-901234".into(),
        certificate: BASE64.encode(b"mobile certificate"),
        device_public_key: BASE64.encode(lock.public_key()),
        mobile_public_key: BASE64.encode(mobile.public_key()),
    }
}

fn frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![opcode];
    out.extend_from_slice(payload);
    out
}

struct Fixture {
    session: Session<MockTransport>,
    lock: SimulatedLock,
    sent: Rc<RefCell<Vec<(u8, Vec<u8>)>>>,
    disconnected: Rc<RefCell<bool>>,
    outcomes: Rc<RefCell<Vec<bool>>>,
}

fn fixture() -> Fixture {
    let lock = SimulatedLock::new();
    let mobile = SoftwareKeyStore::generate();
    let config = config_for(&lock, &mobile);
    let transport = MockTransport::default();
    let sent = transport.sent.clone();
    let disconnected = transport.disconnected.clone();
    let (completion, outcomes) = completion_recorder();
    let session = Session::establish(&config, Box::new(mobile), transport, completion).unwrap();
    Fixture {
        session,
        lock,
        sent,
        disconnected,
        outcomes,
    }
}

/// Drive the handshake until the client verify fragments have been sent.
fn run_verify_exchange(fx: &mut Fixture, mtu: u8) {
    let hello = fx.sent.borrow()[0].1.clone();
    let server_hello = fx.lock.process_hello(&hello, mtu);
    fx.session.handle_frame(&frame(3, &server_hello));

    // The session answered with the verify-init nonce under opcode 5.
    assert_eq!(fx.sent.borrow()[1].0, 5);
    assert_eq!(fx.sent.borrow()[1].1.len(), 8);

    let server_verify = fx.lock.build_server_verify();
    fx.session.handle_frame(&frame(5, &server_verify));
}

// ── Construction ─────────────────────────────────────────────────────────

#[test]
fn construction_sends_hello_with_opcode_zero() {
    let fx = fixture();
    let sent = fx.sent.borrow();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, 0x00);
    assert_eq!(sent[0].1.len(), 152);
    assert_eq!(fx.session.phase(), SessionPhase::Handshaking);
}

#[test]
fn identity_mismatch_fails_construction() {
    let lock = SimulatedLock::new();
    let provisioned_mobile = SoftwareKeyStore::generate();
    let actual_identity = SoftwareKeyStore::generate();
    let config = config_for(&lock, &provisioned_mobile);
    let transport = MockTransport::default();
    let sent = transport.sent.clone();
    let (completion, outcomes) = completion_recorder();

    let result = Session::establish(&config, Box::new(actual_identity), transport, completion);
    assert!(matches!(result, Err(LatchLinkError::InvalidCertificate)));
    assert!(sent.borrow().is_empty());
    // Construction failures never invoke the completion callback.
    assert!(outcomes.borrow().is_empty());
}

#[test]
fn missing_certificate_fails_construction() {
    let lock = SimulatedLock::new();
    let mobile = SoftwareKeyStore::generate();
    let mut config = config_for(&lock, &mobile);
    config.certificate = String::new();
    let (completion, _) = completion_recorder();

    let result = Session::establish(
        &config,
        Box::new(mobile),
        MockTransport::default(),
        completion,
    );
    assert!(matches!(result, Err(LatchLinkError::MissingCertificate)));
}

// ── Handshake ────────────────────────────────────────────────────────────

#[test]
fn full_session_reaches_ready_and_roundtrips() {
    let mut fx = fixture();
    run_verify_exchange(&mut fx, 64);

    // Reassemble the fragmented client verify the way the lock's transport
    // would, then let the lock validate it.
    let reassembled: Vec<u8> = fx.sent.borrow()[2..]
        .iter()
        .flat_map(|(_, payload)| payload.clone())
        .collect();
    fx.lock.process_client_verify(&reassembled);

    fx.session.handle_frame(&[8]);
    assert_eq!(fx.session.phase(), SessionPhase::Ready);
    assert_eq!(*fx.outcomes.borrow(), vec![true]);
    assert!(!*fx.disconnected.borrow());

    // Application data both ways.
    let record = fx.session.encrypt(&[0x51]).unwrap();
    assert_eq!(fx.lock.decrypt(&record), [0x51]);
    let reply = fx.lock.encrypt(b"ack");
    assert_eq!(fx.session.decrypt(&reply).unwrap(), b"ack");
}

#[test]
fn verify_is_fragmented_to_the_negotiated_mtu() {
    let mut fx = fixture();
    run_verify_exchange(&mut fx, 100);

    let sent = fx.sent.borrow();
    // Frames 0 and 1 are the hello and the verify-init nonce.
    let fragments = &sent[2..];
    assert!(fragments.len() >= 2, "verify should span several fragments");
    for (opcode, payload) in &fragments[..fragments.len() - 1] {
        assert_eq!(*opcode, 6);
        assert_eq!(payload.len(), 99);
    }
    let (last_opcode, last_payload) = &fragments[fragments.len() - 1];
    assert_eq!(*last_opcode, 7);
    assert!(!last_payload.is_empty());
    assert!(last_payload.len() <= 99);
}

#[test]
fn unusable_mtu_is_fatal() {
    let mut fx = fixture();
    let hello = fx.sent.borrow()[0].1.clone();
    let mut server_hello = fx.lock.process_hello(&hello, 1);
    server_hello[1] = 1; // usable payload after the opcode byte is zero
    fx.session.handle_frame(&frame(3, &server_hello));

    assert_eq!(fx.session.phase(), SessionPhase::Failed);
    assert!(*fx.disconnected.borrow());
    assert_eq!(*fx.outcomes.borrow(), vec![false]);
}

#[test]
fn truncated_server_hello_is_fatal() {
    let mut fx = fixture();
    fx.session.handle_frame(&[3, 0x02]);
    assert_eq!(fx.session.phase(), SessionPhase::Failed);
    assert_eq!(*fx.outcomes.borrow(), vec![false]);
}

#[test]
fn forged_lock_key_is_fatal() {
    // The lock signs with a key other than the provisioned one.
    let real_lock = SimulatedLock::new();
    let mobile = SoftwareKeyStore::generate();
    let config = config_for(&real_lock, &mobile);
    let transport = MockTransport::default();
    let sent = transport.sent.clone();
    let disconnected = transport.disconnected.clone();
    let (completion, outcomes) = completion_recorder();
    let mut session =
        Session::establish(&config, Box::new(mobile), transport, completion).unwrap();

    let mut impostor = SimulatedLock::new();
    let hello = sent.borrow()[0].1.clone();
    let server_hello = impostor.process_hello(&hello, 64);
    session.handle_frame(&frame(3, &server_hello));
    let server_verify = impostor.build_server_verify();
    session.handle_frame(&frame(5, &server_verify));

    assert_eq!(session.phase(), SessionPhase::Failed);
    assert!(*disconnected.borrow());
    assert_eq!(*outcomes.borrow(), vec![false]);
}

// ── Alerts and unknown opcodes ───────────────────────────────────────────

#[test]
fn alert_fails_the_session_exactly_once() {
    let mut fx = fixture();
    fx.session.handle_frame(&[4]);
    assert_eq!(fx.session.phase(), SessionPhase::Failed);
    assert!(*fx.disconnected.borrow());
    assert_eq!(*fx.outcomes.borrow(), vec![false]);

    // A second alert must not fire the callback again.
    fx.session.handle_frame(&[4]);
    assert_eq!(fx.outcomes.borrow().len(), 1);
}

#[test]
fn alert_mid_handshake_is_fatal() {
    let mut fx = fixture();
    let hello = fx.sent.borrow()[0].1.clone();
    let server_hello = fx.lock.process_hello(&hello, 64);
    fx.session.handle_frame(&frame(3, &server_hello));

    fx.session.handle_frame(&[4, 0xFF]);
    assert_eq!(fx.session.phase(), SessionPhase::Failed);
    assert_eq!(*fx.outcomes.borrow(), vec![false]);
}

#[test]
fn unknown_opcodes_are_ignored() {
    let mut fx = fixture();
    fx.session.handle_frame(&[0xEE, 1, 2, 3]);
    fx.session.handle_frame(&[0x01]);
    fx.session.handle_frame(&[]);

    assert_eq!(fx.session.phase(), SessionPhase::Handshaking);
    assert!(!*fx.disconnected.borrow());
    assert!(fx.outcomes.borrow().is_empty());
    assert_eq!(fx.sent.borrow().len(), 1);
}

#[test]
fn close_sends_close_alert_and_disconnects() {
    let mut fx = fixture();
    fx.session.close();

    assert_eq!(fx.session.phase(), SessionPhase::Failed);
    assert!(*fx.disconnected.borrow());
    let sent = fx.sent.borrow();
    assert_eq!(sent.last().unwrap().0, 4);
    assert_eq!(sent.last().unwrap().1, vec![0x00]);
    // A deliberate close is not a handshake outcome.
    assert!(fx.outcomes.borrow().is_empty());

    drop(sent);
    // Close is idempotent: no second alert frame.
    fx.session.close();
    assert_eq!(fx.sent.borrow().len(), 2);
}

// ── Post-establishment guard rails ───────────────────────────────────────

#[test]
fn encrypt_before_ready_is_rejected_and_disconnects() {
    let mut fx = fixture();
    let err = fx.session.encrypt(b"too early").unwrap_err();
    assert!(matches!(err, LatchLinkError::Protocol(_)));
    assert!(*fx.disconnected.borrow());
}
