//! Sans-io TLS connection: record framing over a handshake engine.
//!
//! [`Connection`] owns no transport. Wire bytes go in through
//! [`feed_data`](Connection::feed_data), come out through
//! [`poll_output`](Connection::poll_output), and state changes surface as
//! [`TlsEvent`]s. The caller moves bytes between the connection and
//! whatever transport it has.
//!
//! Incoming records are buffered until complete, unprotected, and routed
//! by content type: handshake bytes to the engine, alerts to the close and
//! failure paths, application data to the receive buffer. Outgoing
//! handshake flights, application data and alerts are sealed under the
//! current send keys as they are flushed.

use crate::alert::{encode_alert, parse_alert, AlertDescription, AlertLevel};
use crate::buf::{Buf, BufExt};
use crate::config::{ClientConfig, ServerConfig};
use crate::crypto::suite::CipherSuite;
use crate::crypto::{derive_record_keys, AeadCipher, Hkdf, Rng};
use crate::error::Error;
use crate::handshake::key_schedule::next_traffic_secret;
use crate::handshake::messages::{
    encode_key_update, parse_key_update, read_handshake_header, HandshakeType,
};
use crate::handshake::{client::ClientEngine, server::ServerEngine};
use crate::handshake::{HandshakeEngine, HandshakeState, Level};
use crate::record::{
    decode_record_header, encode_record_header, ContentType, RecordLayer, MAX_PLAINTEXT,
    MAX_RECORD_PAYLOAD, RECORD_HEADER_LEN,
};

/// Events produced by the connection for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsEvent {
    /// The handshake finished; application data may flow.
    HandshakeComplete,
    /// Decrypted application data is waiting in the receive buffer.
    AppData,
    /// The peer sent close_notify; no more data will arrive.
    PeerClosed,
}

/// Connection lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnState {
    /// Handshake in progress.
    Handshake,
    /// Handshake complete, application data flows.
    Active,
    /// We sent close_notify; the peer may still send.
    Closing,
    /// Both sides are done.
    Closed,
    /// A fatal error occurred; nothing but a pending alert leaves.
    Failed,
}

/// ChangeCipherSpec record sent once for middlebox compatibility.
const CCS_RECORD: [u8; 6] = [0x14, 0x03, 0x03, 0x00, 0x01, 0x01];

/// Records the peer may still send under retired keys after a key update.
const REKEY_DRAIN_WINDOW: u32 = 64;

/// A TLS 1.3 connection over caller-supplied byte buffers.
///
/// `BUF` sizes the four internal staging buffers (incoming wire bytes,
/// outgoing wire bytes, decrypted application data, queued application
/// data). The default fits one maximum-size record with room for
/// handshake flights and alerts.
pub struct Connection<H: Hkdf + Default, const BUF: usize = 18432> {
    engine: HandshakeEngine<H>,
    record: RecordLayer,
    hkdf: H,
    state: ConnState,

    // Level the current traffic keys belong to, per direction
    send_level: Level,
    recv_level: Level,

    // Wire bytes in, wire bytes out
    recv_buf: Buf<BUF>,
    send_buf: Buf<BUF>,

    // Application data: decrypted for the caller, queued from the caller
    app_recv: Buf<BUF>,
    app_send: Buf<BUF>,

    events: heapless::Deque<TlsEvent, 8>,

    // Current application traffic secrets, advanced on key update
    app_send_secret: Option<[u8; 32]>,
    app_recv_secret: Option<[u8; 32]>,

    cipher_suite: Option<CipherSuite>,

    // Alert waiting to be flushed for a failure we detected
    pending_alert: Option<(AlertLevel, AlertDescription)>,

    sent_ccs: bool,
    sent_close: bool,
    recvd_close: bool,
}

impl<H: Hkdf + Default, const BUF: usize> Connection<H, BUF> {
    /// Create a client connection.
    pub fn client(config: ClientConfig, rng: &mut dyn Rng) -> Self {
        Self::new(HandshakeEngine::Client(ClientEngine::new(config, rng)))
    }

    /// Create a server connection.
    pub fn server(config: ServerConfig, rng: &mut dyn Rng) -> Self {
        Self::new(HandshakeEngine::Server(ServerEngine::new(config, rng)))
    }

    fn new(engine: HandshakeEngine<H>) -> Self {
        Self {
            engine,
            record: RecordLayer::new(),
            hkdf: H::default(),
            state: ConnState::Handshake,
            send_level: Level::Plaintext,
            recv_level: Level::Plaintext,
            recv_buf: Buf::new(),
            send_buf: Buf::new(),
            app_recv: Buf::new(),
            app_send: Buf::new(),
            events: heapless::Deque::new(),
            app_send_secret: None,
            app_recv_secret: None,
            cipher_suite: None,
            pending_alert: None,
            sent_ccs: false,
            sent_close: false,
            recvd_close: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == ConnState::Active
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    pub fn is_failed(&self) -> bool {
        self.state == ConnState::Failed
    }

    /// True once we have sent close_notify (the peer may still be sending).
    pub fn is_closing(&self) -> bool {
        self.state == ConnState::Closing || self.state == ConnState::Closed
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.engine.alpn()
    }

    /// Host name the client asked for via SNI (server role only).
    pub fn sni(&self) -> Option<&str> {
        self.engine.sni()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.cipher_suite.or_else(|| self.engine.cipher_suite())
    }

    /// Handshake machine state, folding in connection-level closure.
    pub fn handshake_state(&self) -> HandshakeState {
        match self.state {
            ConnState::Closing | ConnState::Closed => HandshakeState::Closed,
            ConnState::Failed => HandshakeState::Failed,
            _ => self.engine.state(),
        }
    }

    pub fn poll_event(&mut self) -> Option<TlsEvent> {
        self.events.pop_front()
    }

    /// Space left in the receive staging buffer.
    ///
    /// Transport readers cap each read at this so a buffered partial
    /// record plus the next read always fit.
    pub fn recv_capacity(&self) -> usize {
        BUF.saturating_sub(self.recv_buf.len())
    }

    /// Feed wire bytes received from the transport.
    ///
    /// Complete records are processed immediately; a trailing partial
    /// record waits for more data. Fatal errors latch the failed state and
    /// leave an alert for [`poll_output`](Self::poll_output) to emit.
    pub fn feed_data(&mut self, data: &[u8]) -> Result<(), Error> {
        if self.state == ConnState::Closed || self.state == ConnState::Failed {
            return Ok(());
        }
        if self.recv_buf.len() + data.len() > BUF {
            return Err(Error::BufferTooSmall {
                needed: self.recv_buf.len() + data.len(),
            });
        }
        self.recv_buf.buf_extend_from_slice(data)?;
        self.process_recv()
    }

    /// Move pending wire bytes into `out`. Returns the number of bytes
    /// copied; zero means nothing to send right now.
    pub fn poll_output(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        self.flush_alert()?;
        if self.state != ConnState::Failed {
            self.flush_engine_output()?;
            self.flush_app_send()?;
        }

        let n = out.len().min(self.send_buf.len());
        if n > 0 {
            out[..n].copy_from_slice(&self.send_buf[..n]);
            self.send_buf.buf_drain_front(n);
        }
        Ok(n)
    }

    /// Queue application data for encrypted delivery.
    pub fn send_app_data(&mut self, data: &[u8]) -> Result<(), Error> {
        match self.state {
            ConnState::Active => {}
            ConnState::Handshake => return Err(Error::NotEstablished),
            _ => return Err(Error::Closed),
        }
        if self.app_send.len() + data.len() > BUF {
            return Err(Error::BufferTooSmall {
                needed: self.app_send.len() + data.len(),
            });
        }
        self.app_send.buf_extend_from_slice(data)
    }

    /// Drain decrypted application data into `out`; returns bytes copied.
    pub fn recv_app_data(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.app_recv.len());
        if n > 0 {
            out[..n].copy_from_slice(&self.app_recv[..n]);
            self.app_recv.buf_drain_front(n);
        }
        n
    }

    /// Send close_notify after any queued application data. The peer may
    /// keep sending until it closes its own direction.
    pub fn close(&mut self) -> Result<(), Error> {
        if self.sent_close || self.state == ConnState::Failed {
            return Ok(());
        }
        self.flush_app_send()?;
        self.write_alert(AlertLevel::Warning, AlertDescription::CloseNotify)?;
        self.sent_close = true;
        self.state = if self.recvd_close {
            ConnState::Closed
        } else {
            ConnState::Closing
        };
        Ok(())
    }

    /// Abandon the connection without sending an alert. Used for
    /// caller-initiated cancellation; the peer sees a dead transport.
    pub fn abort(&mut self) {
        self.state = ConnState::Failed;
        self.pending_alert = None;
    }

    /// Rotate our outgoing traffic keys and ask the peer to do the same.
    ///
    /// The KeyUpdate goes out under the retiring keys; records already
    /// sealed stay valid. The peer gets a bounded window of records under
    /// its current keys before its own rotation must land.
    pub fn update_keys(&mut self) -> Result<(), Error> {
        match self.state {
            ConnState::Active => {}
            ConnState::Handshake => return Err(Error::NotEstablished),
            _ => return Err(Error::Closed),
        }

        let mut msg = [0u8; 8];
        let len = encode_key_update(true, &mut msg)?;
        self.seal_append(&msg[..len], ContentType::Handshake)?;

        self.rotate_send()?;
        self.record.expect_recv_rekey(REKEY_DRAIN_WINDOW);
        Ok(())
    }

    // --- incoming path ---

    fn process_recv(&mut self) -> Result<(), Error> {
        loop {
            if self.state == ConnState::Closed || self.state == ConnState::Failed {
                self.recv_buf.buf_clear();
                return Ok(());
            }
            if self.recv_buf.len() < RECORD_HEADER_LEN {
                return Ok(());
            }

            let header = match decode_record_header(&self.recv_buf[..RECORD_HEADER_LEN]) {
                Ok(h) => h,
                Err(e) => {
                    let length =
                        ((self.recv_buf[3] as usize) << 8) | (self.recv_buf[4] as usize);
                    let desc = if length > MAX_RECORD_PAYLOAD {
                        AlertDescription::RecordOverflow
                    } else {
                        AlertDescription::DecodeError
                    };
                    return Err(self.fatal(desc, e));
                }
            };

            let total = RECORD_HEADER_LEN + header.length as usize;
            if total > BUF {
                // A record that can never fit the staging buffer
                return Err(self.fatal(
                    AlertDescription::InternalError,
                    Error::BufferTooSmall { needed: total },
                ));
            }
            if self.recv_buf.len() < total {
                return Ok(());
            }

            self.handle_record(header.content_type, total)?;
            self.recv_buf.buf_drain_front(total);
            self.check_keys()?;
        }
    }

    /// Process one complete record sitting at the front of `recv_buf`.
    fn handle_record(&mut self, outer_ct: ContentType, total: usize) -> Result<(), Error> {
        match outer_ct {
            // Middlebox compatibility, carries nothing
            ContentType::ChangeCipherSpec => Ok(()),

            ContentType::Handshake => {
                // Plaintext handshake records are only legal before any
                // incoming traffic keys exist
                if self.record.has_recv_keys() {
                    return Err(self.fatal(AlertDescription::UnexpectedMessage, Error::Protocol));
                }
                let result = self
                    .engine
                    .read_handshake(Level::Plaintext, &self.recv_buf[RECORD_HEADER_LEN..total]);
                if let Err(e) = result {
                    return Err(self.engine_fatal(e));
                }
                Ok(())
            }

            ContentType::Alert => {
                // A peer that failed before keys were established alerts in
                // the clear; afterwards alerts must be sealed
                if self.engine.is_complete() {
                    return Err(self.fatal(AlertDescription::UnexpectedMessage, Error::Protocol));
                }
                self.handle_alert_at(RECORD_HEADER_LEN, total)
            }

            ContentType::ApplicationData => {
                let mut header_bytes = [0u8; RECORD_HEADER_LEN];
                header_bytes.copy_from_slice(&self.recv_buf[..RECORD_HEADER_LEN]);

                let opened = self
                    .record
                    .open_in_place(&header_bytes, &mut self.recv_buf[RECORD_HEADER_LEN..total]);
                let (plain_len, inner_ct) = match opened {
                    Ok(v) => v,
                    Err(e) => {
                        let desc = match e {
                            Error::AuthFailure => AlertDescription::BadRecordMac,
                            _ => AlertDescription::UnexpectedMessage,
                        };
                        return Err(self.fatal(desc, e));
                    }
                };

                let start = RECORD_HEADER_LEN;
                match inner_ct {
                    ContentType::Handshake => {
                        if self.engine.is_complete() {
                            self.handle_post_handshake(start, plain_len)
                        } else {
                            let result = self.engine.read_handshake(
                                self.recv_level,
                                &self.recv_buf[start..start + plain_len],
                            );
                            if let Err(e) = result {
                                return Err(self.engine_fatal(e));
                            }
                            Ok(())
                        }
                    }
                    ContentType::Alert => self.handle_alert_at(start, start + plain_len),
                    ContentType::ApplicationData => {
                        if self.state == ConnState::Handshake {
                            // No early data
                            return Err(
                                self.fatal(AlertDescription::UnexpectedMessage, Error::Protocol)
                            );
                        }
                        if plain_len > 0 {
                            if self.app_recv.len() + plain_len > BUF {
                                return Err(self.fatal(
                                    AlertDescription::InternalError,
                                    Error::BufferTooSmall {
                                        needed: self.app_recv.len() + plain_len,
                                    },
                                ));
                            }
                            let data_end = start + plain_len;
                            let res = self
                                .app_recv
                                .buf_extend_from_slice(&self.recv_buf[start..data_end]);
                            if let Err(e) = res {
                                return Err(self.fatal(AlertDescription::InternalError, e));
                            }
                            self.push_event(TlsEvent::AppData);
                        }
                        Ok(())
                    }
                    // CCS is never sealed
                    ContentType::ChangeCipherSpec => {
                        Err(self.fatal(AlertDescription::UnexpectedMessage, Error::Protocol))
                    }
                }
            }
        }
    }

    /// Parse and act on an alert found at `recv_buf[start..end]`.
    fn handle_alert_at(&mut self, start: usize, end: usize) -> Result<(), Error> {
        let (_level, desc) = match parse_alert(&self.recv_buf[start..end]) {
            Ok(v) => v,
            Err(e) => return Err(self.fatal(AlertDescription::DecodeError, e)),
        };

        if desc == AlertDescription::CloseNotify {
            self.recvd_close = true;
            self.push_event(TlsEvent::PeerClosed);
            if !self.sent_close {
                self.write_alert(AlertLevel::Warning, AlertDescription::CloseNotify)?;
                self.sent_close = true;
            }
            self.state = ConnState::Closed;
            return Ok(());
        }

        // The peer reported a fatal condition; nothing goes back
        self.state = ConnState::Failed;
        Err(Error::Protocol)
    }

    /// Handle handshake messages arriving after the handshake finished.
    fn handle_post_handshake(&mut self, start: usize, len: usize) -> Result<(), Error> {
        let mut off = 0;
        while off < len {
            let (msg_type, body_len) =
                match read_handshake_header(&self.recv_buf[start + off..start + len]) {
                    Ok(v) => v,
                    Err(e) => return Err(self.fatal(AlertDescription::DecodeError, e)),
                };
            let msg_len = 4 + body_len;
            if off + msg_len > len {
                return Err(self.fatal(AlertDescription::DecodeError, Error::Protocol));
            }

            if msg_type == HandshakeType::KeyUpdate as u8 {
                if body_len != 1 {
                    return Err(self.fatal(AlertDescription::DecodeError, Error::Protocol));
                }
                let body = [self.recv_buf[start + off + 4]];
                let request = match parse_key_update(&body) {
                    Ok(v) => v,
                    Err(e) => {
                        return Err(self.fatal(AlertDescription::IllegalParameter, e));
                    }
                };

                // The peer switched its sending keys after this message
                self.rotate_recv()?;
                if request {
                    // Our acknowledging KeyUpdate goes out under the keys
                    // we are about to retire
                    let mut msg = [0u8; 8];
                    let ku_len = encode_key_update(false, &mut msg)?;
                    self.seal_append(&msg[..ku_len], ContentType::Handshake)?;
                    self.rotate_send()?;
                }
            } else if msg_type == 4 {
                // NewSessionTicket: session resumption is not supported,
                // tolerate and drop
            } else {
                return Err(self.fatal(AlertDescription::UnexpectedMessage, Error::Protocol));
            }

            off += msg_len;
        }
        Ok(())
    }

    // --- outgoing path ---

    /// Drain the engine's pending flights into `send_buf`.
    ///
    /// Keys derived by an earlier flight are installed before the next one
    /// is sealed; keys derived by the flight being written only take
    /// effect for what follows it.
    fn flush_engine_output(&mut self) -> Result<(), Error> {
        loop {
            self.check_keys()?;

            let mut msg_buf = [0u8; 2048];
            let (len, level) = match self.engine.write_handshake(&mut msg_buf) {
                Ok(v) => v,
                Err(e) => return Err(self.engine_fatal(e)),
            };
            if len == 0 {
                break;
            }

            match level {
                Level::Plaintext => {
                    let mut header = [0u8; RECORD_HEADER_LEN];
                    encode_record_header(ContentType::Handshake, len as u16, &mut header)?;
                    self.send_buf.buf_extend_from_slice(&header)?;
                    self.send_buf.buf_extend_from_slice(&msg_buf[..len])?;
                }
                Level::Handshake | Level::Application => {
                    if !self.sent_ccs {
                        self.send_buf.buf_extend_from_slice(&CCS_RECORD)?;
                        self.sent_ccs = true;
                    }
                    self.seal_append(&msg_buf[..len], ContentType::Handshake)?;
                }
            }
        }
        self.check_keys()
    }

    /// Seal queued application data, stopping when `send_buf` is full.
    fn flush_app_send(&mut self) -> Result<(), Error> {
        while !self.app_send.is_empty() && self.send_level == Level::Application {
            let chunk = self.app_send.len().min(MAX_PLAINTEXT);
            let needed = RECORD_HEADER_LEN + chunk + 1 + 16;
            let start = self.send_buf.len();
            if start + needed > BUF {
                // Backpressure: the caller drains send_buf and polls again
                break;
            }
            self.send_buf.buf_resize(start + needed)?;
            let sealed = self.record.seal(
                &self.app_send[..chunk],
                ContentType::ApplicationData,
                &mut self.send_buf[start..],
            );
            let n = match sealed {
                Ok(n) => n,
                Err(e) => {
                    self.send_buf.buf_truncate(start);
                    return Err(e);
                }
            };
            self.send_buf.buf_truncate(start + n);
            self.app_send.buf_drain_front(chunk);
        }
        Ok(())
    }

    /// Emit the alert recorded for a failure, sealed if keys exist.
    fn flush_alert(&mut self) -> Result<(), Error> {
        if let Some((level, desc)) = self.pending_alert.take() {
            self.write_alert(level, desc)?;
        }
        Ok(())
    }

    /// Append an alert record to `send_buf`, sealed when send keys exist.
    fn write_alert(&mut self, level: AlertLevel, desc: AlertDescription) -> Result<(), Error> {
        let bytes = encode_alert(level, desc);
        if self.record.has_send_keys() {
            self.seal_append(&bytes, ContentType::Alert)
        } else {
            let mut header = [0u8; RECORD_HEADER_LEN];
            encode_record_header(ContentType::Alert, bytes.len() as u16, &mut header)?;
            self.send_buf.buf_extend_from_slice(&header)?;
            self.send_buf.buf_extend_from_slice(&bytes)
        }
    }

    /// Seal `data` as one record appended to `send_buf`.
    fn seal_append(&mut self, data: &[u8], inner_ct: ContentType) -> Result<(), Error> {
        let needed = RECORD_HEADER_LEN + data.len() + 1 + 16;
        let start = self.send_buf.len();
        if start + needed > BUF {
            return Err(Error::BufferTooSmall {
                needed: start + needed,
            });
        }
        self.send_buf.buf_resize(start + needed)?;
        let n = match self.record.seal(data, inner_ct, &mut self.send_buf[start..]) {
            Ok(n) => n,
            Err(e) => {
                self.send_buf.buf_truncate(start);
                return Err(e);
            }
        };
        self.send_buf.buf_truncate(start + n);
        Ok(())
    }

    // --- key management ---

    /// Install any traffic secrets the engine has derived and surface
    /// handshake completion.
    fn check_keys(&mut self) -> Result<(), Error> {
        while let Some(keys) = self.engine.derived_keys() {
            let suite = self.engine.cipher_suite().ok_or(Error::Internal)?;
            self.cipher_suite = Some(suite);

            if let Some(secret) = keys.send_secret {
                self.install_send_keys(suite, &secret)?;
                self.send_level = keys.level;
                if keys.level == Level::Application {
                    self.app_send_secret = Some(secret);
                }
            }
            if let Some(secret) = keys.recv_secret {
                self.install_recv_keys(suite, &secret)?;
                self.recv_level = keys.level;
                if keys.level == Level::Application {
                    self.app_recv_secret = Some(secret);
                }
            }
        }

        if self.state == ConnState::Handshake && self.engine.is_complete() {
            self.state = ConnState::Active;
            self.push_event(TlsEvent::HandshakeComplete);
        }
        Ok(())
    }

    /// Queue an event unless an identical one is already waiting; at most
    /// one of each event kind is ever queued, so the deque cannot fill.
    fn push_event(&mut self, ev: TlsEvent) {
        if self.events.iter().any(|e| *e == ev) {
            return;
        }
        let _ = self.events.push_back(ev);
    }

    fn install_send_keys(&mut self, suite: CipherSuite, secret: &[u8; 32]) -> Result<(), Error> {
        let mut key = [0u8; 32];
        let mut iv = [0u8; 12];
        derive_record_keys(&self.hkdf, secret, &mut key[..suite.key_len()], &mut iv)?;
        let cipher = AeadCipher::new(suite, &key[..suite.key_len()])?;
        self.record.install_send(cipher, iv);
        Ok(())
    }

    fn install_recv_keys(&mut self, suite: CipherSuite, secret: &[u8; 32]) -> Result<(), Error> {
        let mut key = [0u8; 32];
        let mut iv = [0u8; 12];
        derive_record_keys(&self.hkdf, secret, &mut key[..suite.key_len()], &mut iv)?;
        let cipher = AeadCipher::new(suite, &key[..suite.key_len()])?;
        self.record.install_recv(cipher, iv);
        Ok(())
    }

    /// Advance the outgoing application traffic secret one generation.
    fn rotate_send(&mut self) -> Result<(), Error> {
        let suite = self.cipher_suite.ok_or(Error::Internal)?;
        let current = self.app_send_secret.ok_or(Error::Internal)?;
        let mut next = [0u8; 32];
        next_traffic_secret(&self.hkdf, &current, &mut next)?;
        self.install_send_keys(suite, &next)?;
        self.app_send_secret = Some(next);
        Ok(())
    }

    /// Advance the incoming application traffic secret one generation.
    fn rotate_recv(&mut self) -> Result<(), Error> {
        let suite = self.cipher_suite.ok_or(Error::Internal)?;
        let current = self.app_recv_secret.ok_or(Error::Internal)?;
        let mut next = [0u8; 32];
        next_traffic_secret(&self.hkdf, &current, &mut next)?;
        self.install_recv_keys(suite, &next)?;
        self.app_recv_secret = Some(next);
        Ok(())
    }

    // --- failure path ---

    /// Latch the failed state with an alert to emit, and hand the error back.
    fn fatal(&mut self, desc: AlertDescription, err: Error) -> Error {
        self.state = ConnState::Failed;
        self.pending_alert = Some((AlertLevel::Fatal, desc));
        err
    }

    /// Like [`fatal`](Self::fatal), preferring the alert the engine chose.
    fn engine_fatal(&mut self, err: Error) -> Error {
        let desc = self.engine.take_alert().unwrap_or(match err {
            Error::AuthFailure => AlertDescription::BadRecordMac,
            Error::Protocol => AlertDescription::DecodeError,
            _ => AlertDescription::InternalError,
        });
        self.fatal(desc, err)
    }
}
