// Session orchestrator: binds the handshake engine to the transport.
//
// Advanced only from the transport's single callback context — inbound
// frames arrive through `handle_frame`, outbound frames leave through the
// `FrameTransport` port. There is no internal locking or parallelism; the
// engine's counters and transcript are unsynchronized by design.
//
// Every fatal path disconnects the transport and fires the completion
// callback exactly once. Nothing is retried; a failed session is
// discarded and a new one constructed.

use bytes::Bytes;
use tracing::{debug, warn};

use latchtrust::crypto::ecdh::parse_public_key;
use latchtrust::handshake::wire::ALERT_CLOSE;
use latchtrust::{EcdhKeyPair, HandshakeEngine, IdentityStore};

use crate::config::LockConfig;
use crate::error::{LatchLinkError, Result};
use crate::frame::{fragment_verify, Opcode};
use crate::transport::FrameTransport;

/// Lifecycle phase reported to the presentation layer.
///
/// `Connecting` belongs to the transport (scan/connect); a session enters
/// at `Handshaking` the moment it is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    Handshaking,
    Ready,
    Failed,
}

/// Invoked exactly once with the session's terminal handshake outcome.
pub type Completion = Box<dyn FnOnce(Result<()>)>;

/// One secure session against one lock.
pub struct Session<T: FrameTransport> {
    transport: T,
    engine: HandshakeEngine,
    device_public_key: [u8; 65],
    phase: SessionPhase,
    /// Usable payload bytes per verify fragment (negotiated MTU minus the
    /// opcode byte). Zero until the server hello arrives.
    fragment_payload: usize,
    completion: Option<Completion>,
}

impl<T: FrameTransport> Session<T> {
    /// Validate the provisioned configuration, build the handshake engine
    /// and send the client hello.
    ///
    /// Configuration problems fail construction; no session object exists
    /// and the completion callback is never invoked.
    pub fn establish(
        config: &LockConfig,
        identity: Box<dyn IdentityStore>,
        mut transport: T,
        completion: Completion,
    ) -> Result<Self> {
        let provisioned = config.decode()?;
        let local_public = identity.public_key();
        parse_public_key(&local_public).map_err(|_| LatchLinkError::MissingKeys)?;
        if local_public != provisioned.mobile_public_key {
            return Err(LatchLinkError::InvalidCertificate);
        }

        let mut engine = HandshakeEngine::new(
            provisioned.certificate,
            identity,
            EcdhKeyPair::generate(),
        );
        let hello = engine
            .build_hello()
            .map_err(|e| LatchLinkError::ParseError(e.to_string()))?;
        transport.send_frame(Opcode::ClientHello, &hello)?;
        debug!(service = %provisioned.service_uuid, "client hello sent");

        Ok(Self {
            transport,
            engine,
            device_public_key: provisioned.device_public_key,
            phase: SessionPhase::Handshaking,
            fragment_payload: 0,
            completion: Some(completion),
        })
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Deliver one complete inbound frame (opcode byte plus payload).
    ///
    /// Unknown opcodes are ignored without error or state change.
    pub fn handle_frame(&mut self, frame: &[u8]) {
        let Some((&first, payload)) = frame.split_first() else {
            debug!("ignoring empty frame");
            return;
        };
        let Some(opcode) = Opcode::from_u8(first) else {
            debug!(opcode = first, "ignoring unknown opcode");
            return;
        };
        match opcode {
            Opcode::ServerHello => self.on_server_hello(payload),
            Opcode::ServerVerify => self.on_server_verify(payload),
            Opcode::Initialized => self.on_initialized(),
            Opcode::Alert => {
                warn!("peer alert received");
                self.fail(LatchLinkError::ParseError("peer alert".into()));
            }
            Opcode::ClientHello | Opcode::VerifyContinuation | Opcode::VerifyFinal => {
                debug!(opcode = first, "ignoring client-bound opcode");
            }
        }
    }

    /// Encrypt one application message for the lock. Only valid once the
    /// session is `Ready`; any record-layer failure tears the session down.
    pub fn encrypt(&mut self, message: &[u8]) -> Result<Vec<u8>> {
        match self.engine.write(message) {
            Ok(record) => Ok(record),
            Err(e) => {
                self.transport.disconnect();
                self.phase = SessionPhase::Failed;
                Err(e.into())
            }
        }
    }

    /// Deliberate local teardown: notify the lock with a close alert and
    /// drop the connection.
    ///
    /// The completion callback is not invoked; a local close is not a
    /// handshake outcome.
    pub fn close(&mut self) {
        if self.phase == SessionPhase::Failed {
            return;
        }
        debug!("closing session");
        if let Err(e) = self.transport.send_frame(Opcode::Alert, &[ALERT_CLOSE]) {
            debug!(%e, "close alert not delivered");
        }
        self.engine.fail();
        self.transport.disconnect();
        self.phase = SessionPhase::Failed;
        self.completion = None;
    }

    /// Decrypt one application record from the lock.
    pub fn decrypt(&mut self, record: &[u8]) -> Result<Vec<u8>> {
        match self.engine.read(record) {
            Ok(message) => Ok(message),
            Err(e) => {
                self.transport.disconnect();
                self.phase = SessionPhase::Failed;
                Err(e.into())
            }
        }
    }

    // ── Inbound handlers ────────────────────────────────────────────────

    fn on_server_hello(&mut self, payload: &[u8]) {
        let Some(mtu) = extract_mtu(payload) else {
            self.fail(LatchLinkError::ParseError("server hello carries no MTU".into()));
            return;
        };
        // One byte of every fragment is the opcode.
        let usable = mtu as usize;
        if usable <= 1 {
            self.fail(LatchLinkError::ParseError(format!(
                "unusable MTU {mtu}"
            )));
            return;
        }
        self.fragment_payload = usable - 1;

        if let Err(e) = self.engine.parse_server_hello(payload) {
            self.fail(LatchLinkError::ParseError(e.to_string()));
            return;
        }
        let nonce = match self.engine.verify_init_nonce() {
            Ok(nonce) => nonce,
            Err(e) => {
                self.fail(LatchLinkError::ParseError(e.to_string()));
                return;
            }
        };
        if let Err(e) = self.transport.send_frame(Opcode::ServerVerify, &nonce) {
            self.fail(e);
        }
    }

    fn on_server_verify(&mut self, payload: &[u8]) {
        if let Err(e) = self.engine.parse_server_verify(payload) {
            self.fail(LatchLinkError::ParseError(e.to_string()));
            return;
        }
        match self.engine.peer_verify(&self.device_public_key) {
            Ok(true) => {}
            Ok(false) => {
                warn!("lock signature rejected");
                self.fail(LatchLinkError::ParseError("lock signature rejected".into()));
                return;
            }
            Err(e) => {
                self.fail(LatchLinkError::ParseError(e.to_string()));
                return;
            }
        }
        let verify = match self.engine.build_verify() {
            Ok(verify) => verify,
            Err(e) => {
                self.fail(LatchLinkError::ParseError(e.to_string()));
                return;
            }
        };
        debug!(
            len = verify.len(),
            fragment_payload = self.fragment_payload,
            "sending client verify"
        );
        for (opcode, chunk) in fragment_verify(Bytes::from(verify), self.fragment_payload) {
            if let Err(e) = self.transport.send_frame(opcode, &chunk) {
                self.fail(e);
                return;
            }
        }
    }

    fn on_initialized(&mut self) {
        if self.phase != SessionPhase::Handshaking {
            debug!("ignoring initialized frame outside handshake");
            return;
        }
        self.phase = SessionPhase::Ready;
        if let Some(completion) = self.completion.take() {
            completion(Ok(()));
        }
    }

    // ── Failure path ────────────────────────────────────────────────────

    fn fail(&mut self, error: LatchLinkError) {
        if self.phase == SessionPhase::Failed {
            return;
        }
        warn!(%error, "session failed");
        self.engine.fail();
        self.transport.disconnect();
        self.phase = SessionPhase::Failed;
        if let Some(completion) = self.completion.take() {
            completion(Err(error));
        }
    }
}

/// The lock's proposed MTU from its hello header (byte 1). `None` when the
/// payload is too short to carry one.
fn extract_mtu(payload: &[u8]) -> Option<u8> {
    if payload.len() > 2 {
        Some(payload[1])
    } else {
        None
    }
}
