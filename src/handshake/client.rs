//! Client-side TLS 1.3 handshake engine.
//!
//! Drives the flow ClientHello → ServerHello → EncryptedExtensions →
//! Certificate → CertificateVerify → Finished → client Finished. The
//! server's CertificateVerify signature is checked against the public key
//! in its certificate, and the chain is then passed to the injected
//! [`TrustStore`] for the trust decision.

use crate::alert::AlertDescription;
use crate::config::{ClientConfig, TrustStore};
use crate::crypto::suite::{supported_suites, CipherSuite};
use crate::crypto::{ecdsa_p256, ed25519, Hkdf, Rng};
use crate::error::Error;
use crate::handshake::extensions::{
    encode_client_hello_extensions, parse_encrypted_extensions_data,
    parse_server_hello_extensions,
};
use crate::handshake::key_schedule::{compute_finished_verify_data, TlsKeySchedule};
use crate::handshake::messages::{
    self, encode_client_hello, encode_finished, parse_certificate, parse_certificate_verify,
    parse_encrypted_extensions, parse_finished, parse_server_hello, read_handshake_header,
    HandshakeType, SignatureScheme,
};
use crate::handshake::transcript::TranscriptHash;
use crate::handshake::{ct_eq, DerivedKeys, HandshakeState, Level};

/// Fine-grained client states, one per message we are waiting to send or
/// receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    /// Initial state, ClientHello needs to be written.
    Start,
    /// ClientHello has been sent, waiting for ServerHello.
    WaitServerHello,
    /// ServerHello received, waiting for EncryptedExtensions.
    WaitEncryptedExtensions,
    /// Waiting for server Certificate.
    WaitCertificate,
    /// Waiting for CertificateVerify.
    WaitCertificateVerify,
    /// Waiting for server Finished.
    WaitFinished,
    /// Need to send client Finished.
    SendFinished,
    /// Handshake is complete.
    Complete,
    /// A fatal error occurred.
    Failed,
}

/// Client-side TLS 1.3 handshake engine.
pub struct ClientEngine<H: Hkdf> {
    state: ClientState,
    hkdf: H,

    // X25519 keypair and ClientHello random
    private_key: x25519_dalek::StaticSecret,
    public_key: x25519_dalek::PublicKey,
    random: [u8; 32],

    // Negotiated cipher suite
    cipher_suite: Option<CipherSuite>,

    // TLS key schedule
    key_schedule: TlsKeySchedule,
    client_hs_secret: [u8; 32],
    server_hs_secret: [u8; 32],
    client_app_secret: [u8; 32],
    server_app_secret: [u8; 32],

    // Transcript hash
    transcript: TranscriptHash,

    // Output buffer for pending handshake messages
    pending_write: heapless::Vec<u8, 2048>,
    pending_level: Level,

    // Keys ready to be picked up by the record layer
    pending_keys: heapless::Deque<DerivedKeys, 4>,

    // Alert to send for the last error
    alert: Option<AlertDescription>,

    // Configuration
    server_name: heapless::String<64>,
    alpn_protocols: &'static [&'static [u8]],
    trust_store: &'static dyn TrustStore,

    // Negotiated ALPN
    negotiated_alpn: Option<heapless::Vec<u8, 16>>,

    // Server certificate chain, leaf first; entries sit back to back in
    // chain_buf with chain_ends marking where each one stops
    chain_buf: heapless::Vec<u8, 4096>,
    chain_ends: heapless::Vec<usize, 4>,

    complete: bool,
}

impl<H: Hkdf + Default> ClientEngine<H> {
    /// Create a new client engine.
    ///
    /// The X25519 private key and the ClientHello random are drawn from
    /// `rng`.
    pub fn new(config: ClientConfig, rng: &mut dyn Rng) -> Self {
        let mut secret_bytes = [0u8; 32];
        rng.fill(&mut secret_bytes);
        let mut random = [0u8; 32];
        rng.fill(&mut random);

        let private_key = x25519_dalek::StaticSecret::from(secret_bytes);
        let public_key = x25519_dalek::PublicKey::from(&private_key);

        let hkdf = H::default();
        let key_schedule = TlsKeySchedule::new(&hkdf);

        Self {
            state: ClientState::Start,
            hkdf,
            private_key,
            public_key,
            random,
            cipher_suite: None,
            key_schedule,
            client_hs_secret: [0u8; 32],
            server_hs_secret: [0u8; 32],
            client_app_secret: [0u8; 32],
            server_app_secret: [0u8; 32],
            transcript: TranscriptHash::new(),
            pending_write: heapless::Vec::new(),
            pending_level: Level::Plaintext,
            pending_keys: heapless::Deque::new(),
            alert: None,
            server_name: config.server_name,
            alpn_protocols: config.alpn_protocols,
            trust_store: config.trust_store,
            negotiated_alpn: None,
            chain_buf: heapless::Vec::new(),
            chain_ends: heapless::Vec::new(),
            complete: false,
        }
    }

    pub fn state(&self) -> HandshakeState {
        match self.state {
            ClientState::Start => HandshakeState::Start,
            ClientState::WaitServerHello => HandshakeState::SentHello,
            ClientState::WaitEncryptedExtensions
            | ClientState::WaitCertificate
            | ClientState::WaitCertificateVerify => HandshakeState::KeyExchange,
            ClientState::WaitFinished | ClientState::SendFinished => {
                HandshakeState::AwaitFinished
            }
            ClientState::Complete => HandshakeState::Established,
            ClientState::Failed => HandshakeState::Failed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.negotiated_alpn.as_ref().map(|v| v.as_slice())
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite
    }

    pub fn derived_keys(&mut self) -> Option<DerivedKeys> {
        self.pending_keys.pop_front()
    }

    pub fn take_alert(&mut self) -> Option<AlertDescription> {
        self.alert.take()
    }

    /// Record the alert for an error and hand the error back.
    fn fail(&mut self, desc: AlertDescription, err: Error) -> Error {
        self.alert = Some(desc);
        err
    }

    /// Process incoming handshake bytes received at `level`.
    ///
    /// Any error is fatal: the engine moves to its failed state and must
    /// not be fed further data.
    pub fn read_handshake(&mut self, level: Level, data: &[u8]) -> Result<(), Error> {
        let result = self.read_handshake_inner(level, data);
        if result.is_err() {
            self.state = ClientState::Failed;
        }
        result
    }

    fn read_handshake_inner(&mut self, level: Level, data: &[u8]) -> Result<(), Error> {
        // Multiple TLS messages may be coalesced in a single record.
        let mut off = 0;
        while off < data.len() {
            let remaining = &data[off..];
            let (msg_type_byte, body_len) = read_handshake_header(remaining)?;
            let msg_len = 4 + body_len;

            if remaining.len() < msg_len {
                return Err(self.fail(AlertDescription::DecodeError, Error::Protocol));
            }

            let full_msg = &remaining[..msg_len];
            let msg_body = &remaining[4..msg_len];

            let Some(msg_type) = HandshakeType::from_u8(msg_type_byte) else {
                return Err(self.fail(AlertDescription::UnexpectedMessage, Error::Protocol));
            };

            // ServerHello arrives in a plaintext record; everything after
            // it must come in under the handshake keys.
            let expected_level = match msg_type {
                HandshakeType::ServerHello => Level::Plaintext,
                _ => Level::Handshake,
            };
            if level != expected_level {
                return Err(self.fail(AlertDescription::UnexpectedMessage, Error::Protocol));
            }

            match (self.state, msg_type) {
                (ClientState::WaitServerHello, HandshakeType::ServerHello) => {
                    // Full message (including header) goes into the transcript
                    self.transcript.update(full_msg);
                    self.process_server_hello(msg_body)?;
                }
                (ClientState::WaitEncryptedExtensions, HandshakeType::EncryptedExtensions) => {
                    self.transcript.update(full_msg);
                    self.process_encrypted_extensions(msg_body)?;
                }
                (ClientState::WaitCertificate, HandshakeType::Certificate) => {
                    self.transcript.update(full_msg);
                    self.process_certificate(msg_body)?;
                }
                (ClientState::WaitCertificateVerify, HandshakeType::CertificateVerify) => {
                    // The signature covers the transcript up to Certificate,
                    // so hash before adding CertificateVerify itself.
                    let transcript_before = self.transcript.current_hash();
                    self.transcript.update(full_msg);
                    self.process_certificate_verify(msg_body, &transcript_before)?;
                }
                (ClientState::WaitFinished, HandshakeType::Finished) => {
                    // verify_data covers the transcript before Finished
                    let transcript_before = self.transcript.current_hash();
                    self.transcript.update(full_msg);
                    self.process_server_finished(msg_body, &transcript_before)?;
                }
                _ => {
                    return Err(self.fail(AlertDescription::UnexpectedMessage, Error::Protocol));
                }
            }

            off += msg_len;
        }

        Ok(())
    }

    /// Write outgoing handshake bytes into `buf`.
    /// Returns `(bytes_written, target_level)`; `(0, _)` means nothing to send.
    pub fn write_handshake(&mut self, buf: &mut [u8]) -> Result<(usize, Level), Error> {
        if self.state == ClientState::Start {
            self.build_client_hello()?;
        }

        if self.pending_write.is_empty() {
            return Ok((0, Level::Plaintext));
        }

        let len = self.pending_write.len();
        if buf.len() < len {
            return Err(Error::BufferTooSmall { needed: len });
        }

        buf[..len].copy_from_slice(&self.pending_write);
        let level = self.pending_level;
        self.pending_write.clear();

        if self.state == ClientState::SendFinished {
            self.state = ClientState::Complete;
            self.complete = true;
            // Our Finished is out; outgoing switches to application keys.
            self.pending_keys
                .push_back(DerivedKeys {
                    level: Level::Application,
                    send_secret: Some(self.client_app_secret),
                    recv_secret: None,
                })
                .map_err(|_| Error::Internal)?;
        }

        Ok((len, level))
    }

    /// Build and buffer the ClientHello message.
    fn build_client_hello(&mut self) -> Result<(), Error> {
        let suites = supported_suites();
        if suites.is_empty() {
            return Err(self.fail(AlertDescription::InternalError, Error::Internal));
        }

        let mut ext_buf = [0u8; 1024];
        let ext_len = encode_client_hello_extensions(
            self.server_name.as_str(),
            self.public_key.as_bytes(),
            self.alpn_protocols,
            &mut ext_buf,
        )?;

        // The legacy session ID stays empty; ChangeCipherSpec covers
        // middlebox compatibility.
        let session_id: &[u8] = &[];

        let mut msg_buf = [0u8; 2048];
        let msg_len = encode_client_hello(
            &self.random,
            session_id,
            suites,
            &ext_buf[..ext_len],
            &mut msg_buf,
        )?;

        self.transcript.update(&msg_buf[..msg_len]);

        self.pending_write.clear();
        self.pending_write
            .extend_from_slice(&msg_buf[..msg_len])
            .map_err(|_| Error::BufferTooSmall { needed: msg_len })?;
        self.pending_level = Level::Plaintext;

        self.state = ClientState::WaitServerHello;
        Ok(())
    }

    /// Process a ServerHello message.
    fn process_server_hello(&mut self, msg_body: &[u8]) -> Result<(), Error> {
        let sh = parse_server_hello(msg_body)?;

        // The suite must be one we offered
        if !supported_suites().contains(&sh.cipher_suite) {
            return Err(self.fail(AlertDescription::IllegalParameter, Error::Protocol));
        }
        self.cipher_suite = Some(sh.cipher_suite);

        let ext = parse_server_hello_extensions(sh.extensions)?;

        // Must have negotiated TLS 1.3
        if ext.selected_version != 0x0304 {
            return Err(self.fail(AlertDescription::ProtocolVersion, Error::Protocol));
        }

        // Must have a key_share
        let Some(server_public) = ext.key_share else {
            return Err(self.fail(AlertDescription::MissingExtension, Error::Protocol));
        };

        // X25519 Diffie-Hellman
        let server_pk = x25519_dalek::PublicKey::from(server_public);
        let shared_secret = self.private_key.diffie_hellman(&server_pk);

        self.key_schedule
            .derive_handshake_secret(&self.hkdf, shared_secret.as_bytes())?;

        // The hello exchange is sealed into the transcript here; handshake
        // traffic secrets bind to this snapshot.
        self.transcript.checkpoint_hello();
        let hello_hash = *self.transcript.hello_hash().ok_or(Error::Internal)?;

        self.key_schedule.derive_handshake_traffic_secrets(
            &self.hkdf,
            &hello_hash,
            &mut self.client_hs_secret,
            &mut self.server_hs_secret,
        )?;

        self.pending_keys
            .push_back(DerivedKeys {
                level: Level::Handshake,
                send_secret: Some(self.client_hs_secret),
                recv_secret: Some(self.server_hs_secret),
            })
            .map_err(|_| Error::Internal)?;

        self.state = ClientState::WaitEncryptedExtensions;
        Ok(())
    }

    /// Process an EncryptedExtensions message.
    fn process_encrypted_extensions(&mut self, msg_body: &[u8]) -> Result<(), Error> {
        let ext_data = parse_encrypted_extensions(msg_body)?;
        let parsed = parse_encrypted_extensions_data(ext_data)?;

        if let Some(ref alpn) = parsed.alpn {
            // The server must pick one of the protocols we offered
            if !self
                .alpn_protocols
                .iter()
                .any(|p| *p == alpn.as_slice())
            {
                return Err(
                    self.fail(AlertDescription::NoApplicationProtocol, Error::Protocol)
                );
            }
        }
        self.negotiated_alpn = parsed.alpn;

        self.state = ClientState::WaitCertificate;
        Ok(())
    }

    /// Process a Certificate message.
    fn process_certificate(&mut self, msg_body: &[u8]) -> Result<(), Error> {
        let cert = parse_certificate(msg_body)?;

        // Store every entry the server presented, leaf first; the whole
        // chain goes to the trust store once the signature has checked out.
        self.chain_buf.clear();
        self.chain_ends.clear();
        for entry in messages::iter_certificate_entries(cert.entries) {
            let entry = entry?;
            // At most four entries are retained; a deeper chain is refused
            if self.chain_ends.is_full() {
                return Err(self.fail(AlertDescription::BadCertificate, Error::Protocol));
            }
            self.chain_buf
                .extend_from_slice(entry.cert_data)
                .map_err(|_| Error::BufferTooSmall {
                    needed: entry.cert_data.len(),
                })?;
            self.chain_ends
                .push(self.chain_buf.len())
                .map_err(|_| Error::Internal)?;
        }

        if self.chain_ends.is_empty() {
            return Err(self.fail(AlertDescription::BadCertificate, Error::Protocol));
        }

        self.state = ClientState::WaitCertificateVerify;
        Ok(())
    }

    /// Entry `i` of the stored chain; entry 0 is the leaf.
    fn chain_entry(&self, i: usize) -> &[u8] {
        let start = if i == 0 { 0 } else { self.chain_ends[i - 1] };
        &self.chain_buf[start..self.chain_ends[i]]
    }

    /// Process a CertificateVerify message.
    ///
    /// `transcript_before` is the transcript hash up to and including the
    /// Certificate message, which is what the signature covers.
    fn process_certificate_verify(
        &mut self,
        msg_body: &[u8],
        transcript_before: &[u8; 32],
    ) -> Result<(), Error> {
        let cv = parse_certificate_verify(msg_body)?;

        let Some(scheme) = SignatureScheme::from_u16(cv.algorithm) else {
            return Err(self.fail(AlertDescription::IllegalParameter, Error::Protocol));
        };

        // The signature is always checked against the leaf certificate
        match scheme {
            SignatureScheme::Ed25519 => {
                let pubkey = ed25519::extract_ed25519_pubkey_from_cert(self.chain_entry(0))
                    .map_err(|e| self.fail(AlertDescription::BadCertificate, e))?;
                ed25519::verify_certificate_verify(&pubkey, cv.signature, transcript_before)
                    .map_err(|e| self.fail(AlertDescription::DecryptError, e))?;
            }
            SignatureScheme::EcdsaSecp256r1Sha256 => {
                let pubkey = ecdsa_p256::extract_p256_pubkey_from_cert(self.chain_entry(0))
                    .map_err(|e| self.fail(AlertDescription::BadCertificate, e))?;
                ecdsa_p256::verify_certificate_verify(&pubkey, cv.signature, transcript_before)
                    .map_err(|e| self.fail(AlertDescription::DecryptError, e))?;
            }
        }

        // Signature checks out; the trust decision belongs to the caller,
        // who sees the chain exactly as the server presented it.
        let trusted = {
            let mut chain: heapless::Vec<&[u8], 4> = heapless::Vec::new();
            for i in 0..self.chain_ends.len() {
                chain.push(self.chain_entry(i)).map_err(|_| Error::Internal)?;
            }
            self.trust_store.verify(&chain, self.server_name.as_str())
        };
        if !trusted {
            return Err(self.fail(AlertDescription::BadCertificate, Error::AuthFailure));
        }

        self.state = ClientState::WaitFinished;
        Ok(())
    }

    /// Process the server Finished message.
    ///
    /// `transcript_before` is the transcript hash before the Finished
    /// message was added.
    fn process_server_finished(
        &mut self,
        msg_body: &[u8],
        transcript_before: &[u8; 32],
    ) -> Result<(), Error> {
        let verify_data = parse_finished(msg_body)?;

        let mut server_finished_key = [0u8; 32];
        TlsKeySchedule::derive_finished_key(
            &self.hkdf,
            &self.server_hs_secret,
            &mut server_finished_key,
        )?;

        let expected =
            compute_finished_verify_data(&self.hkdf, &server_finished_key, transcript_before)?;

        if !ct_eq(&expected, verify_data) {
            return Err(self.fail(AlertDescription::DecryptError, Error::AuthFailure));
        }

        // The transcript now contains the server Finished; application
        // traffic secrets bind to this snapshot.
        self.transcript.checkpoint_server_finished();
        let finished_hash = *self.transcript.server_finished_hash().ok_or(Error::Internal)?;

        self.key_schedule.derive_master_secret(&self.hkdf)?;
        self.key_schedule.derive_app_traffic_secrets(
            &self.hkdf,
            &finished_hash,
            &mut self.client_app_secret,
            &mut self.server_app_secret,
        )?;

        // Incoming switches to application keys right away; outgoing stays
        // on handshake keys until our own Finished has been flushed.
        self.pending_keys
            .push_back(DerivedKeys {
                level: Level::Application,
                send_secret: None,
                recv_secret: Some(self.server_app_secret),
            })
            .map_err(|_| Error::Internal)?;

        // Build the client Finished over the same post-Finished transcript
        let mut client_finished_key = [0u8; 32];
        TlsKeySchedule::derive_finished_key(
            &self.hkdf,
            &self.client_hs_secret,
            &mut client_finished_key,
        )?;
        let client_verify =
            compute_finished_verify_data(&self.hkdf, &client_finished_key, &finished_hash)?;

        let mut fin_buf = [0u8; 36];
        let fin_len = encode_finished(&client_verify, &mut fin_buf)?;

        self.transcript.update(&fin_buf[..fin_len]);

        self.pending_write.clear();
        self.pending_write
            .extend_from_slice(&fin_buf[..fin_len])
            .map_err(|_| Error::BufferTooSmall { needed: fin_len })?;
        self.pending_level = Level::Handshake;

        self.state = ClientState::SendFinished;
        Ok(())
    }
}
