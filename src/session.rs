//! Blocking-style TLS session over a [`ByteStream`].
//!
//! [`Session`] pairs a [`Connection`] with a transport and moves bytes
//! between the two. The transport may be non-blocking: every operation
//! returns [`Error::WouldBlock`] when it cannot make progress without more
//! bytes from the peer, and the caller retries once the transport is
//! ready. Two sessions over an in-memory pipe are driven by alternating
//! calls until each side reports completion.

use crate::buf::{Buf, BufExt};
use crate::config::{CancelToken, ClientConfig, ServerConfig};
use crate::connection::Connection;
use crate::crypto::suite::CipherSuite;
use crate::crypto::{Hkdf, Rng};
use crate::error::Error;
use crate::handshake::HandshakeState;
use crate::stream::{ByteStream, ReadOutcome, WriteOutcome};

/// A TLS endpoint bound to a transport.
pub struct Session<S: ByteStream, H: Hkdf + Default, const BUF: usize = 18432> {
    stream: S,
    conn: Connection<H, BUF>,
    cancel: Option<CancelToken>,

    // Wire bytes the transport has not accepted yet
    out_pending: Buf<BUF>,
    saw_eof: bool,
}

impl<S: ByteStream, H: Hkdf + Default, const BUF: usize> Session<S, H, BUF> {
    /// Create a client session. The handshake starts on the first call to
    /// [`connect`](Self::connect).
    pub fn client(stream: S, config: ClientConfig, rng: &mut dyn Rng) -> Self {
        let cancel = config.cancel;
        Self {
            stream,
            conn: Connection::client(config, rng),
            cancel,
            out_pending: Buf::new(),
            saw_eof: false,
        }
    }

    /// Create a server session. The handshake starts on the first call to
    /// [`accept`](Self::accept).
    pub fn server(stream: S, config: ServerConfig, rng: &mut dyn Rng) -> Self {
        let cancel = config.cancel;
        Self {
            stream,
            conn: Connection::server(config, rng),
            cancel,
            out_pending: Buf::new(),
            saw_eof: false,
        }
    }

    pub fn is_established(&self) -> bool {
        self.conn.is_active()
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        self.conn.alpn()
    }

    /// Host name the client asked for via SNI (server role only).
    pub fn sni(&self) -> Option<&str> {
        self.conn.sni()
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        self.conn.cipher_suite()
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.conn.handshake_state()
    }

    /// Release the transport, discarding session state.
    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Drive the client handshake. Returns `Ok(())` once established,
    /// [`Error::WouldBlock`] while waiting on the peer.
    pub fn connect(&mut self) -> Result<(), Error> {
        self.drive_handshake()
    }

    /// Drive the server handshake. Returns `Ok(())` once established,
    /// [`Error::WouldBlock`] while waiting on the peer.
    pub fn accept(&mut self) -> Result<(), Error> {
        self.drive_handshake()
    }

    /// Queue application data and flush as much as the transport accepts.
    /// Rejected before the handshake completes and after close.
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.check_cancel()?;
        self.conn.send_app_data(data)?;
        self.flush_output()?;
        Ok(())
    }

    /// Receive decrypted application data into `out`.
    ///
    /// Drives the transport as needed. Returns the number of bytes copied,
    /// [`Error::WouldBlock`] when no data is available yet,
    /// [`Error::Closed`] once the peer's close_notify has been consumed,
    /// and [`Error::Transport`] if the stream ends without one.
    pub fn receive(&mut self, out: &mut [u8]) -> Result<usize, Error> {
        self.check_cancel()?;
        match self.conn.handshake_state() {
            HandshakeState::Established | HandshakeState::Closed => {}
            HandshakeState::Failed => return Err(Error::Protocol),
            _ => return Err(Error::NotEstablished),
        }

        loop {
            self.check_cancel()?;

            let n = self.conn.recv_app_data(out);
            if n > 0 {
                return Ok(n);
            }
            if self.conn.is_closed() {
                // Push out the answering close_notify before reporting
                let _ = self.flush_output();
                return Err(Error::Closed);
            }
            if self.conn.is_failed() {
                let _ = self.flush_output();
                return Err(Error::Protocol);
            }

            // Keep key-update and close responses moving while we wait
            self.flush_output()?;

            match self.pump_input() {
                Ok(true) => {}
                Ok(false) => {
                    if self.saw_eof {
                        // Stream ended without close_notify: truncated
                        return Err(Error::Transport);
                    }
                    return Err(Error::WouldBlock);
                }
                Err(e) => {
                    let _ = self.flush_output();
                    return Err(e);
                }
            }
        }
    }

    /// Send close_notify after queued data. Returns [`Error::WouldBlock`]
    /// until the transport has taken every outgoing byte.
    pub fn close(&mut self) -> Result<(), Error> {
        self.conn.close()?;
        if self.flush_output()? {
            Ok(())
        } else {
            Err(Error::WouldBlock)
        }
    }

    /// Rotate outgoing traffic keys and request the peer to rotate too.
    pub fn update_keys(&mut self) -> Result<(), Error> {
        self.check_cancel()?;
        self.conn.update_keys()?;
        if self.flush_output()? {
            Ok(())
        } else {
            Err(Error::WouldBlock)
        }
    }

    /// Retry writing output the transport previously refused. `Ok(true)`
    /// once everything pending has been accepted.
    pub fn flush(&mut self) -> Result<bool, Error> {
        self.check_cancel()?;
        self.flush_output()
    }

    fn drive_handshake(&mut self) -> Result<(), Error> {
        loop {
            self.check_cancel()?;

            if self.conn.is_failed() {
                let _ = self.flush_output();
                return Err(Error::Protocol);
            }
            if self.conn.is_active() {
                self.flush_output()?;
                return Ok(());
            }

            self.flush_output()?;

            match self.pump_input() {
                Ok(true) => {}
                Ok(false) => {
                    if self.saw_eof {
                        return Err(Error::Transport);
                    }
                    return Err(Error::WouldBlock);
                }
                Err(e) => {
                    // Push out the alert describing the failure
                    let _ = self.flush_output();
                    return Err(e);
                }
            }
        }
    }

    /// Write pending output to the transport. `Ok(true)` means everything
    /// was accepted; `Ok(false)` means the transport pushed back.
    fn flush_output(&mut self) -> Result<bool, Error> {
        loop {
            if self.out_pending.is_empty() {
                let mut tmp = [0u8; 2048];
                let n = self.conn.poll_output(&mut tmp)?;
                if n == 0 {
                    return Ok(true);
                }
                self.out_pending.buf_extend_from_slice(&tmp[..n])?;
            }

            match self.stream.write(&self.out_pending[..])? {
                WriteOutcome::Wrote(n) => {
                    self.out_pending.buf_drain_front(n);
                }
                WriteOutcome::WouldBlock => return Ok(false),
            }
        }
    }

    /// Read once from the transport and feed the connection. `Ok(true)`
    /// means bytes arrived.
    ///
    /// Reads are capped at the connection's remaining staging space so a
    /// buffered partial record plus the read always fit.
    fn pump_input(&mut self) -> Result<bool, Error> {
        let mut tmp = [0u8; 2048];
        let cap = self.conn.recv_capacity().min(tmp.len());
        if cap == 0 {
            return Ok(false);
        }
        match self.stream.read(&mut tmp[..cap])? {
            ReadOutcome::Data(n) => {
                self.conn.feed_data(&tmp[..n])?;
                Ok(true)
            }
            ReadOutcome::WouldBlock => Ok(false),
            ReadOutcome::Eof => {
                self.saw_eof = true;
                Ok(false)
            }
        }
    }

    /// A set cancel token aborts the session with no alert; the peer is
    /// left with a dead transport.
    fn check_cancel(&mut self) -> Result<(), Error> {
        match self.cancel {
            Some(token) if token.is_cancelled() => {
                self.conn.abort();
                Err(Error::Cancelled)
            }
            _ => Ok(()),
        }
    }
}
