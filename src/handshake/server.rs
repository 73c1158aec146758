//! Server-side TLS 1.3 handshake engine.
//!
//! Consumes a ClientHello, answers with ServerHello in plaintext, then an
//! encrypted flight of EncryptedExtensions, Certificate, CertificateVerify
//! and Finished, and finally verifies the client Finished. Cipher suite and
//! ALPN selection follow the server's preference order.

use crate::alert::AlertDescription;
use crate::config::ServerConfig;
use crate::crypto::suite::{supported_suites, CipherSuite};
use crate::crypto::{ecdsa_p256, ed25519, Hkdf, Rng};
use crate::error::Error;
use crate::handshake::extensions::{
    encode_encrypted_extensions_data, encode_server_hello_extensions,
    parse_client_hello_extensions,
};
use crate::handshake::key_schedule::{compute_finished_verify_data, TlsKeySchedule};
use crate::handshake::messages::{
    encode_certificate, encode_certificate_verify, encode_encrypted_extensions, encode_finished,
    encode_server_hello, iter_cipher_suites, parse_client_hello, parse_finished,
    read_handshake_header, HandshakeType, SignatureScheme,
};
use crate::handshake::transcript::TranscriptHash;
use crate::handshake::{ct_eq, DerivedKeys, HandshakeState, Level};

/// Fine-grained server states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    /// Waiting for the ClientHello.
    WaitClientHello,
    /// ClientHello accepted, ServerHello needs to be written.
    RecvHello,
    /// ServerHello flushed, the encrypted flight needs to be written.
    SendFlight,
    /// Encrypted flight buffered, waiting to be flushed.
    FlushFlight,
    /// Waiting for the client Finished.
    WaitClientFinished,
    /// Handshake is complete.
    Complete,
    /// A fatal error occurred.
    Failed,
}

/// Server-side TLS 1.3 handshake engine.
pub struct ServerEngine<H: Hkdf> {
    state: ServerState,
    hkdf: H,

    // X25519 keypair and ServerHello random
    private_key: x25519_dalek::StaticSecret,
    public_key: x25519_dalek::PublicKey,
    random: [u8; 32],

    // Client's X25519 public key from its key_share
    client_key_share: [u8; 32],

    // Legacy session ID echoed back in the ServerHello
    session_id: heapless::Vec<u8, 32>,

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

    // Server identity
    cert_der: &'static [u8],
    intermediates: &'static [&'static [u8]],
    private_key_der: &'static [u8],
    signature_scheme: SignatureScheme,
    server_name: Option<&'static str>,
    alpn_protocols: &'static [&'static [u8]],

    // Negotiated ALPN
    negotiated_alpn: Option<heapless::Vec<u8, 16>>,

    // Host name the client asked for in SNI
    sni: Option<heapless::String<64>>,

    complete: bool,
}

impl<H: Hkdf + Default> ServerEngine<H> {
    /// Create a new server engine.
    ///
    /// The X25519 private key and the ServerHello random are drawn from
    /// `rng`; the signing identity comes from `config`.
    pub fn new(config: ServerConfig, rng: &mut dyn Rng) -> Self {
        let mut secret_bytes = [0u8; 32];
        rng.fill(&mut secret_bytes);
        let mut random = [0u8; 32];
        rng.fill(&mut random);

        let private_key = x25519_dalek::StaticSecret::from(secret_bytes);
        let public_key = x25519_dalek::PublicKey::from(&private_key);

        let hkdf = H::default();
        let key_schedule = TlsKeySchedule::new(&hkdf);

        Self {
            state: ServerState::WaitClientHello,
            hkdf,
            private_key,
            public_key,
            random,
            client_key_share: [0u8; 32],
            session_id: heapless::Vec::new(),
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
            cert_der: config.cert_der,
            intermediates: config.intermediates,
            private_key_der: config.private_key_der,
            signature_scheme: config.signature_scheme,
            server_name: config.server_name,
            alpn_protocols: config.alpn_protocols,
            negotiated_alpn: None,
            sni: None,
            complete: false,
        }
    }

    pub fn state(&self) -> HandshakeState {
        match self.state {
            ServerState::WaitClientHello => HandshakeState::Start,
            ServerState::RecvHello => HandshakeState::RecvHello,
            ServerState::SendFlight | ServerState::FlushFlight => HandshakeState::KeyExchange,
            ServerState::WaitClientFinished => HandshakeState::AwaitFinished,
            ServerState::Complete => HandshakeState::Established,
            ServerState::Failed => HandshakeState::Failed,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.negotiated_alpn.as_ref().map(|v| v.as_slice())
    }

    /// Host name the client asked for via SNI, if it sent one.
    pub fn sni(&self) -> Option<&str> {
        self.sni.as_deref()
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
            self.state = ServerState::Failed;
        }
        result
    }

    fn read_handshake_inner(&mut self, level: Level, data: &[u8]) -> Result<(), Error> {
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

            // ClientHello arrives in a plaintext record, the client
            // Finished under the handshake keys.
            let expected_level = match msg_type {
                HandshakeType::ClientHello => Level::Plaintext,
                _ => Level::Handshake,
            };
            if level != expected_level {
                return Err(self.fail(AlertDescription::UnexpectedMessage, Error::Protocol));
            }

            match (self.state, msg_type) {
                (ServerState::WaitClientHello, HandshakeType::ClientHello) => {
                    self.transcript.update(full_msg);
                    self.process_client_hello(msg_body)?;
                }
                (ServerState::WaitClientFinished, HandshakeType::Finished) => {
                    // verify_data covers the transcript through the server
                    // Finished, which is everything hashed so far
                    let transcript_before = self.transcript.current_hash();
                    self.transcript.update(full_msg);
                    self.process_client_finished(msg_body, &transcript_before)?;
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
        if self.pending_write.is_empty() {
            match self.state {
                ServerState::RecvHello => self.build_server_hello()?,
                ServerState::SendFlight => self.build_encrypted_flight()?,
                _ => return Ok((0, Level::Plaintext)),
            }
        }

        let len = self.pending_write.len();
        if buf.len() < len {
            return Err(Error::BufferTooSmall { needed: len });
        }

        buf[..len].copy_from_slice(&self.pending_write);
        let level = self.pending_level;
        self.pending_write.clear();

        if self.state == ServerState::FlushFlight {
            self.state = ServerState::WaitClientFinished;
            // The flight is out; outgoing switches to application keys.
            self.pending_keys
                .push_back(DerivedKeys {
                    level: Level::Application,
                    send_secret: Some(self.server_app_secret),
                    recv_secret: None,
                })
                .map_err(|_| Error::Internal)?;
        }

        Ok((len, level))
    }

    /// Process a ClientHello: negotiate suite and ALPN, stash the key share.
    fn process_client_hello(&mut self, msg_body: &[u8]) -> Result<(), Error> {
        let ch = parse_client_hello(msg_body)?;

        if ch.session_id.len() > 32 {
            return Err(self.fail(AlertDescription::IllegalParameter, Error::Protocol));
        }
        self.session_id.clear();
        self.session_id
            .extend_from_slice(ch.session_id)
            .map_err(|_| Error::Internal)?;

        // First of our suites the client offered
        let mut selected = None;
        for suite in supported_suites() {
            if iter_cipher_suites(ch.cipher_suites).any(|code| code == suite.to_u16()) {
                selected = Some(*suite);
                break;
            }
        }
        let Some(suite) = selected else {
            return Err(self.fail(AlertDescription::HandshakeFailure, Error::Protocol));
        };
        self.cipher_suite = Some(suite);

        let ext = parse_client_hello_extensions(ch.extensions)?;

        if !ext.supports_tls13 {
            return Err(self.fail(AlertDescription::ProtocolVersion, Error::Protocol));
        }

        let Some(key_share) = ext.key_share else {
            return Err(self.fail(AlertDescription::MissingExtension, Error::Protocol));
        };
        self.client_key_share = key_share;

        // A configured host name must match what the client asked for; a
        // client that sent no SNI is accepted either way.
        if let (Some(expected), Some(requested)) = (self.server_name, ext.server_name.as_ref()) {
            if requested.as_str() != expected {
                return Err(self.fail(AlertDescription::UnrecognizedName, Error::Protocol));
            }
        }
        self.sni = ext.server_name;

        // ALPN by our preference order. No overlap with a configured list
        // and a non-empty offer is fatal; a silent client gets no ALPN.
        if !self.alpn_protocols.is_empty() && !ext.alpn_protocols.is_empty() {
            let mut chosen = None;
            for ours in self.alpn_protocols {
                if ext.alpn_protocols.iter().any(|p| p.as_slice() == *ours) {
                    chosen = Some(*ours);
                    break;
                }
            }
            let Some(proto) = chosen else {
                return Err(
                    self.fail(AlertDescription::NoApplicationProtocol, Error::Protocol)
                );
            };
            self.negotiated_alpn =
                Some(heapless::Vec::from_slice(proto).map_err(|_| Error::Internal)?);
        }

        self.state = ServerState::RecvHello;
        Ok(())
    }

    /// Build and buffer the ServerHello, then derive the handshake traffic
    /// secrets.
    fn build_server_hello(&mut self) -> Result<(), Error> {
        let suite = self.cipher_suite.ok_or(Error::Internal)?;

        let mut ext_buf = [0u8; 128];
        let ext_len = encode_server_hello_extensions(self.public_key.as_bytes(), &mut ext_buf)?;

        let mut msg_buf = [0u8; 512];
        let msg_len = encode_server_hello(
            &self.random,
            &self.session_id,
            suite,
            &ext_buf[..ext_len],
            &mut msg_buf,
        )?;

        self.transcript.update(&msg_buf[..msg_len]);

        // The hello exchange is sealed into the transcript here
        self.transcript.checkpoint_hello();
        let hello_hash = *self.transcript.hello_hash().ok_or(Error::Internal)?;

        let client_pk = x25519_dalek::PublicKey::from(self.client_key_share);
        let shared_secret = self.private_key.diffie_hellman(&client_pk);

        self.key_schedule
            .derive_handshake_secret(&self.hkdf, shared_secret.as_bytes())?;
        self.key_schedule.derive_handshake_traffic_secrets(
            &self.hkdf,
            &hello_hash,
            &mut self.client_hs_secret,
            &mut self.server_hs_secret,
        )?;

        self.pending_keys
            .push_back(DerivedKeys {
                level: Level::Handshake,
                send_secret: Some(self.server_hs_secret),
                recv_secret: Some(self.client_hs_secret),
            })
            .map_err(|_| Error::Internal)?;

        self.pending_write.clear();
        self.pending_write
            .extend_from_slice(&msg_buf[..msg_len])
            .map_err(|_| Error::BufferTooSmall { needed: msg_len })?;
        self.pending_level = Level::Plaintext;

        self.state = ServerState::SendFlight;
        Ok(())
    }

    /// Build the encrypted flight: EncryptedExtensions, Certificate,
    /// CertificateVerify and Finished, all at the handshake level.
    fn build_encrypted_flight(&mut self) -> Result<(), Error> {
        self.pending_write.clear();

        // EncryptedExtensions
        let mut ee_ext = [0u8; 64];
        let selected_alpn = self
            .negotiated_alpn
            .as_ref()
            .map(|v| v.as_slice())
            .unwrap_or(&[]);
        let ee_ext_len = encode_encrypted_extensions_data(selected_alpn, &mut ee_ext)?;

        let mut ee_buf = [0u8; 96];
        let ee_len = encode_encrypted_extensions(&ee_ext[..ee_ext_len], &mut ee_buf)?;
        self.transcript.update(&ee_buf[..ee_len]);
        self.append_pending(&ee_buf[..ee_len])?;

        // Certificate: the configured leaf plus any intermediates
        let mut chain: heapless::Vec<&[u8], 4> = heapless::Vec::new();
        chain.push(self.cert_der).map_err(|_| Error::Internal)?;
        for &cert in self.intermediates {
            chain.push(cert).map_err(|_| Error::Internal)?;
        }
        let mut cert_buf = [0u8; 1024];
        let cert_len = encode_certificate(&chain, &mut cert_buf)?;
        self.transcript.update(&cert_buf[..cert_len]);
        self.append_pending(&cert_buf[..cert_len])?;

        // CertificateVerify signs the transcript through Certificate
        let cv_hash = self.transcript.current_hash();
        let mut cv_buf = [0u8; 256];
        let cv_len = match self.signature_scheme {
            SignatureScheme::Ed25519 => {
                let seed: &[u8; 32] = self
                    .private_key_der
                    .try_into()
                    .map_err(|_| Error::Internal)?;
                let signature = ed25519::sign_certificate_verify(seed, &cv_hash)
                    .map_err(|e| self.fail(AlertDescription::InternalError, e))?;
                encode_certificate_verify(
                    SignatureScheme::Ed25519.to_u16(),
                    &signature,
                    &mut cv_buf,
                )?
            }
            SignatureScheme::EcdsaSecp256r1Sha256 => {
                let signature =
                    ecdsa_p256::sign_certificate_verify(self.private_key_der, &cv_hash)
                        .map_err(|e| self.fail(AlertDescription::InternalError, e))?;
                encode_certificate_verify(
                    SignatureScheme::EcdsaSecp256r1Sha256.to_u16(),
                    &signature,
                    &mut cv_buf,
                )?
            }
        };
        self.transcript.update(&cv_buf[..cv_len]);
        self.append_pending(&cv_buf[..cv_len])?;

        // Finished over the transcript through CertificateVerify
        let mut finished_key = [0u8; 32];
        TlsKeySchedule::derive_finished_key(
            &self.hkdf,
            &self.server_hs_secret,
            &mut finished_key,
        )?;
        let fin_hash = self.transcript.current_hash();
        let verify_data = compute_finished_verify_data(&self.hkdf, &finished_key, &fin_hash)?;

        let mut fin_buf = [0u8; 64];
        let fin_len = encode_finished(&verify_data, &mut fin_buf)?;
        self.transcript.update(&fin_buf[..fin_len]);
        self.append_pending(&fin_buf[..fin_len])?;

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

        self.pending_level = Level::Handshake;
        self.state = ServerState::FlushFlight;
        Ok(())
    }

    fn append_pending(&mut self, data: &[u8]) -> Result<(), Error> {
        self.pending_write
            .extend_from_slice(data)
            .map_err(|_| Error::BufferTooSmall { needed: data.len() })
    }

    /// Verify the client Finished.
    ///
    /// `transcript_before` is the transcript hash through the server
    /// Finished, which is what the client's verify_data covers.
    fn process_client_finished(
        &mut self,
        msg_body: &[u8],
        transcript_before: &[u8; 32],
    ) -> Result<(), Error> {
        let verify_data = parse_finished(msg_body)?;

        let mut client_finished_key = [0u8; 32];
        TlsKeySchedule::derive_finished_key(
            &self.hkdf,
            &self.client_hs_secret,
            &mut client_finished_key,
        )?;

        let expected =
            compute_finished_verify_data(&self.hkdf, &client_finished_key, transcript_before)?;

        if !ct_eq(&expected, verify_data) {
            return Err(self.fail(AlertDescription::DecryptError, Error::AuthFailure));
        }

        // Incoming switches to application keys now that the client
        // Finished has arrived under the handshake keys.
        self.pending_keys
            .push_back(DerivedKeys {
                level: Level::Application,
                send_secret: None,
                recv_secret: Some(self.client_app_secret),
            })
            .map_err(|_| Error::Internal)?;

        self.state = ServerState::Complete;
        self.complete = true;
        Ok(())
    }
}

#[cfg(test)]
#[cfg(any(feature = "rustcrypto-chacha", feature = "rustcrypto-aes"))]
mod tests {
    extern crate std;

    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::{AcceptAll, ClientConfig, TrustStore};
    use crate::crypto::ed25519::{build_ed25519_cert_der, ed25519_public_key_from_seed};
    use crate::crypto::rustcrypto::HkdfSha256;
    use crate::handshake::client::ClientEngine;
    use crate::handshake::messages::{encode_client_hello, parse_server_hello};

    static ACCEPT: AcceptAll = AcceptAll;
    static SEED: [u8; 32] = [7u8; 32];

    struct TestRng(u8);

    impl Rng for TestRng {
        fn fill(&mut self, buf: &mut [u8]) {
            for b in buf.iter_mut() {
                self.0 = self.0.wrapping_add(1);
                *b = self.0;
            }
        }
    }

    fn test_cert() -> &'static [u8] {
        let pubkey = ed25519_public_key_from_seed(&SEED);
        let mut buf = [0u8; 512];
        let len = build_ed25519_cert_der(&pubkey, &mut buf).unwrap();
        let leaked: &'static mut [u8; 512] = std::boxed::Box::leak(std::boxed::Box::new(buf));
        &leaked[..len]
    }

    fn server_config(alpn: &'static [&'static [u8]]) -> ServerConfig {
        ServerConfig {
            cert_der: test_cert(),
            intermediates: &[],
            private_key_der: &SEED,
            signature_scheme: SignatureScheme::Ed25519,
            server_name: None,
            alpn_protocols: alpn,
            cancel: None,
        }
    }

    fn client_config(alpn: &'static [&'static [u8]]) -> ClientConfig {
        ClientConfig {
            server_name: heapless::String::try_from("test.local").unwrap(),
            alpn_protocols: alpn,
            trust_store: &ACCEPT,
            cancel: None,
        }
    }

    /// Run both engines against each other until completion, passing each
    /// flight at the level the writer asked for.
    fn pump(
        client: &mut ClientEngine<HkdfSha256>,
        server: &mut ServerEngine<HkdfSha256>,
    ) -> Result<(), Error> {
        let mut buf = [0u8; 2048];
        for _ in 0..10 {
            let (n, level) = client.write_handshake(&mut buf)?;
            if n > 0 {
                server.read_handshake(level, &buf[..n])?;
            }

            let (n, level) = server.write_handshake(&mut buf)?;
            if n > 0 {
                client.read_handshake(level, &buf[..n])?;
            }

            if client.is_complete() && server.is_complete() {
                return Ok(());
            }
        }
        panic!("handshake did not complete");
    }

    #[test]
    fn full_handshake_between_engines() {
        let mut rng = TestRng(0);
        let mut client = ClientEngine::<HkdfSha256>::new(client_config(&[b"ping/1"]), &mut rng);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[b"ping/1"]), &mut rng);

        pump(&mut client, &mut server).unwrap();

        assert_eq!(client.state(), HandshakeState::Established);
        assert_eq!(server.state(), HandshakeState::Established);
        assert_eq!(client.alpn(), Some(&b"ping/1"[..]));
        assert_eq!(server.alpn(), Some(&b"ping/1"[..]));
        assert_eq!(client.cipher_suite(), server.cipher_suite());
        assert!(client.cipher_suite().is_some());
    }

    #[test]
    fn engines_derive_matching_secrets() {
        let mut rng = TestRng(0);
        let mut client = ClientEngine::<HkdfSha256>::new(client_config(&[]), &mut rng);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[]), &mut rng);

        pump(&mut client, &mut server).unwrap();

        // Client: handshake pair, then app recv, then app send
        let c_hs = client.derived_keys().unwrap();
        let c_app_recv = client.derived_keys().unwrap();
        let c_app_send = client.derived_keys().unwrap();
        assert!(client.derived_keys().is_none());

        // Server: handshake pair, then app send, then app recv
        let s_hs = server.derived_keys().unwrap();
        let s_app_send = server.derived_keys().unwrap();
        let s_app_recv = server.derived_keys().unwrap();
        assert!(server.derived_keys().is_none());

        assert_eq!(c_hs.level, Level::Handshake);
        assert_eq!(s_hs.level, Level::Handshake);
        assert_eq!(c_hs.send_secret, s_hs.recv_secret);
        assert_eq!(c_hs.recv_secret, s_hs.send_secret);

        assert_eq!(c_app_recv.level, Level::Application);
        assert!(c_app_recv.send_secret.is_none());
        assert_eq!(c_app_recv.recv_secret, s_app_send.send_secret);

        assert_eq!(c_app_send.level, Level::Application);
        assert!(c_app_send.recv_secret.is_none());
        assert_eq!(c_app_send.send_secret, s_app_recv.recv_secret);
    }

    #[test]
    fn server_prefers_its_own_alpn_order() {
        let mut rng = TestRng(0);
        let mut client =
            ClientEngine::<HkdfSha256>::new(client_config(&[b"ping/1", b"echo/2"]), &mut rng);
        let mut server =
            ServerEngine::<HkdfSha256>::new(server_config(&[b"echo/2", b"ping/1"]), &mut rng);

        pump(&mut client, &mut server).unwrap();

        assert_eq!(client.alpn(), Some(&b"echo/2"[..]));
        assert_eq!(server.alpn(), Some(&b"echo/2"[..]));
    }

    #[test]
    fn server_rejects_alpn_mismatch() {
        let mut rng = TestRng(0);
        let mut client = ClientEngine::<HkdfSha256>::new(client_config(&[b"ping/1"]), &mut rng);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[b"other/9"]), &mut rng);

        let mut buf = [0u8; 2048];
        let (n, level) = client.write_handshake(&mut buf).unwrap();
        let result = server.read_handshake(level, &buf[..n]);

        assert_eq!(result, Err(Error::Protocol));
        assert_eq!(server.state(), HandshakeState::Failed);
        assert_eq!(
            server.take_alert(),
            Some(AlertDescription::NoApplicationProtocol)
        );
    }

    #[test]
    fn server_rejects_hello_without_tls13() {
        let mut rng = TestRng(0);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[]), &mut rng);

        // ClientHello with no extensions at all
        let random = [0u8; 32];
        let mut msg = [0u8; 256];
        let len =
            encode_client_hello(&random, &[], supported_suites(), &[], &mut msg).unwrap();

        let result = server.read_handshake(Level::Plaintext, &msg[..len]);
        assert_eq!(result, Err(Error::Protocol));
        assert_eq!(server.state(), HandshakeState::Failed);
        assert_eq!(server.take_alert(), Some(AlertDescription::ProtocolVersion));
    }

    #[test]
    fn server_rejects_unknown_cipher_suites() {
        let mut rng = TestRng(0);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[]), &mut rng);

        // Suite bytes the server does not implement (TLS_AES_256_GCM_SHA384)
        let random = [0u8; 32];
        let mut msg = [0u8; 256];
        msg[0] = HandshakeType::ClientHello as u8;
        let body = {
            let mut body = heapless::Vec::<u8, 128>::new();
            body.extend_from_slice(&[0x03, 0x03]).unwrap();
            body.extend_from_slice(&random).unwrap();
            body.push(0).unwrap(); // empty session id
            body.extend_from_slice(&[0x00, 0x02, 0x13, 0x02]).unwrap();
            body.extend_from_slice(&[0x01, 0x00]).unwrap(); // null compression
            body.extend_from_slice(&[0x00, 0x00]).unwrap(); // no extensions
            body
        };
        msg[1] = 0;
        msg[2] = 0;
        msg[3] = body.len() as u8;
        msg[4..4 + body.len()].copy_from_slice(&body);

        let result = server.read_handshake(Level::Plaintext, &msg[..4 + body.len()]);
        assert_eq!(result, Err(Error::Protocol));
        assert_eq!(server.take_alert(), Some(AlertDescription::HandshakeFailure));
    }

    #[test]
    fn server_echoes_session_id() {
        let mut rng = TestRng(0);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[]), &mut rng);

        // Hand-built ClientHello with a non-empty legacy session ID
        let mut client_rng = TestRng(0x80);
        let mut secret = [0u8; 32];
        client_rng.fill(&mut secret);
        let client_secret = x25519_dalek::StaticSecret::from(secret);
        let client_public = x25519_dalek::PublicKey::from(&client_secret);

        let mut ext_buf = [0u8; 256];
        let ext_len = crate::handshake::extensions::encode_client_hello_extensions(
            "",
            client_public.as_bytes(),
            &[],
            &mut ext_buf,
        )
        .unwrap();

        let random = [0x11u8; 32];
        let session_id = [0xAA, 0xBB, 0xCC];
        let mut msg = [0u8; 512];
        let len = encode_client_hello(
            &random,
            &session_id,
            supported_suites(),
            &ext_buf[..ext_len],
            &mut msg,
        )
        .unwrap();

        server.read_handshake(Level::Plaintext, &msg[..len]).unwrap();

        let mut out = [0u8; 512];
        let (n, level) = server.write_handshake(&mut out).unwrap();
        assert!(n > 0);
        assert_eq!(level, Level::Plaintext);

        let (_, body_len) = read_handshake_header(&out[..n]).unwrap();
        let sh = parse_server_hello(&out[4..4 + body_len]).unwrap();
        assert_eq!(sh.session_id, &session_id);
    }

    #[test]
    fn server_rejects_tampered_client_finished() {
        let mut rng = TestRng(0);
        let mut client = ClientEngine::<HkdfSha256>::new(client_config(&[]), &mut rng);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[]), &mut rng);

        let mut buf = [0u8; 2048];

        // ClientHello
        let (n, level) = client.write_handshake(&mut buf).unwrap();
        server.read_handshake(level, &buf[..n]).unwrap();
        // ServerHello
        let (n, level) = server.write_handshake(&mut buf).unwrap();
        client.read_handshake(level, &buf[..n]).unwrap();
        // Encrypted flight
        let (n, level) = server.write_handshake(&mut buf).unwrap();
        client.read_handshake(level, &buf[..n]).unwrap();
        // Client Finished, tampered
        let (n, level) = client.write_handshake(&mut buf).unwrap();
        assert!(n > 0);
        buf[n - 1] ^= 0xFF;

        let result = server.read_handshake(level, &buf[..n]);
        assert_eq!(result, Err(Error::AuthFailure));
        assert_eq!(server.state(), HandshakeState::Failed);
        assert_eq!(server.take_alert(), Some(AlertDescription::DecryptError));
    }

    #[test]
    fn server_rejects_finished_before_hello() {
        let mut rng = TestRng(0);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[]), &mut rng);

        let mut msg = [0u8; 64];
        let len = encode_finished(&[0u8; 32], &mut msg).unwrap();

        let result = server.read_handshake(Level::Handshake, &msg[..len]);
        assert_eq!(result, Err(Error::Protocol));
        assert_eq!(server.state(), HandshakeState::Failed);
        assert_eq!(
            server.take_alert(),
            Some(AlertDescription::UnexpectedMessage)
        );
    }

    #[test]
    fn client_detects_tampered_server_finished() {
        let mut rng = TestRng(0);
        let mut client = ClientEngine::<HkdfSha256>::new(client_config(&[]), &mut rng);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[]), &mut rng);

        let mut buf = [0u8; 2048];

        let (n, level) = client.write_handshake(&mut buf).unwrap();
        server.read_handshake(level, &buf[..n]).unwrap();
        let (n, level) = server.write_handshake(&mut buf).unwrap();
        client.read_handshake(level, &buf[..n]).unwrap();

        // Flip a byte in the last message of the flight (server Finished)
        let (n, level) = server.write_handshake(&mut buf).unwrap();
        assert!(n > 0);
        buf[n - 1] ^= 0xFF;

        let result = client.read_handshake(level, &buf[..n]);
        assert_eq!(result, Err(Error::AuthFailure));
        assert_eq!(client.state(), HandshakeState::Failed);
    }

    /// Records what the client hands to its trust store.
    struct ChainRecorder {
        entries: AtomicUsize,
        leaf_len: AtomicUsize,
    }

    impl TrustStore for ChainRecorder {
        fn verify(&self, chain: &[&[u8]], _hostname: &str) -> bool {
            self.entries.store(chain.len(), Ordering::Relaxed);
            self.leaf_len
                .store(chain.first().map_or(0, |c| c.len()), Ordering::Relaxed);
            true
        }
    }

    #[test]
    fn trust_store_sees_full_chain() {
        const INTERMEDIATE: &[u8] = &[0x30, 0x03, 0x0A, 0x0B, 0x0C];
        static RECORDER: ChainRecorder = ChainRecorder {
            entries: AtomicUsize::new(0),
            leaf_len: AtomicUsize::new(0),
        };

        let mut rng = TestRng(0);
        let mut client = ClientEngine::<HkdfSha256>::new(
            ClientConfig {
                server_name: heapless::String::try_from("test.local").unwrap(),
                alpn_protocols: &[],
                trust_store: &RECORDER,
                cancel: None,
            },
            &mut rng,
        );
        let mut server = ServerEngine::<HkdfSha256>::new(
            ServerConfig {
                intermediates: &[INTERMEDIATE],
                ..server_config(&[])
            },
            &mut rng,
        );

        pump(&mut client, &mut server).unwrap();

        // Both entries reach the trust store, leaf first
        assert_eq!(RECORDER.entries.load(Ordering::Relaxed), 2);
        assert_eq!(RECORDER.leaf_len.load(Ordering::Relaxed), test_cert().len());
    }

    #[test]
    fn server_surfaces_client_sni() {
        let mut rng = TestRng(0);
        let mut client = ClientEngine::<HkdfSha256>::new(client_config(&[]), &mut rng);
        let mut server = ServerEngine::<HkdfSha256>::new(server_config(&[]), &mut rng);

        assert_eq!(server.sni(), None);
        pump(&mut client, &mut server).unwrap();
        assert_eq!(server.sni(), Some("test.local"));
    }

    #[test]
    fn server_accepts_matching_server_name() {
        let mut rng = TestRng(0);
        let mut client = ClientEngine::<HkdfSha256>::new(client_config(&[]), &mut rng);
        let mut server = ServerEngine::<HkdfSha256>::new(
            ServerConfig {
                server_name: Some("test.local"),
                ..server_config(&[])
            },
            &mut rng,
        );

        pump(&mut client, &mut server).unwrap();
        assert_eq!(server.sni(), Some("test.local"));
    }

    #[test]
    fn server_rejects_unexpected_server_name() {
        let mut rng = TestRng(0);
        let mut client = ClientEngine::<HkdfSha256>::new(client_config(&[]), &mut rng);
        let mut server = ServerEngine::<HkdfSha256>::new(
            ServerConfig {
                server_name: Some("files.internal"),
                ..server_config(&[])
            },
            &mut rng,
        );

        let mut buf = [0u8; 2048];
        let (n, level) = client.write_handshake(&mut buf).unwrap();
        let result = server.read_handshake(level, &buf[..n]);

        assert_eq!(result, Err(Error::Protocol));
        assert_eq!(server.state(), HandshakeState::Failed);
        assert_eq!(
            server.take_alert(),
            Some(AlertDescription::UnrecognizedName)
        );
    }
}
