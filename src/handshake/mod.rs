//! TLS 1.3 handshake state machines.
//!
//! The engines here are sans-io: they consume handshake message bytes via
//! `read_handshake`, produce outgoing messages via `write_handshake`, and
//! hand traffic secrets to the record layer through [`DerivedKeys`]. The
//! connection layer owns records, alerts, and all transport concerns.

pub mod client;
pub mod extensions;
pub mod key_schedule;
pub mod messages;
pub mod server;
pub mod transcript;

pub use client::ClientEngine;
pub use server::ServerEngine;

use crate::alert::AlertDescription;
use crate::crypto::suite::CipherSuite;
use crate::crypto::Hkdf;
use crate::error::Error;

/// Protection level of a handshake message on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Unprotected records (ClientHello, ServerHello).
    Plaintext,
    /// Sealed under the handshake traffic keys.
    Handshake,
    /// Sealed under the application traffic keys.
    Application,
}

/// Observable handshake progress, common to both roles.
///
/// A client moves Start → SentHello → KeyExchange → AwaitFinished →
/// Established; a server moves Start → RecvHello → KeyExchange →
/// AwaitFinished → Established. Failed is reachable from every state and
/// is terminal, as is Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Nothing sent or received yet.
    Start,
    /// ClientHello is out, waiting for the server's reply.
    SentHello,
    /// ClientHello received, our hello flight is being produced.
    RecvHello,
    /// Key exchange material is flowing; secrets are being derived.
    KeyExchange,
    /// Waiting for (or sending) the final Finished message.
    AwaitFinished,
    /// Handshake verified on both sides; application data may flow.
    Established,
    /// Connection was shut down cleanly.
    Closed,
    /// A fatal error occurred; no further progress is possible.
    Failed,
}

/// Client or server role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Traffic secrets handed from a handshake engine to the record layer.
///
/// The two directions switch keys at different moments: outgoing keys are
/// armed only once everything queued under the old keys has been flushed,
/// and incoming keys only once the peer's own Finished shows it switched.
/// A `None` direction keeps whatever keys it currently has.
pub struct DerivedKeys {
    pub level: Level,
    pub send_secret: Option<[u8; 32]>,
    pub recv_secret: Option<[u8; 32]>,
}

/// Role dispatch over the two handshake engines.
///
/// The connection holds one of these; every method forwards to the
/// underlying engine.
pub enum HandshakeEngine<H: Hkdf> {
    Client(ClientEngine<H>),
    Server(ServerEngine<H>),
}

impl<H: Hkdf + Default> HandshakeEngine<H> {
    pub fn role(&self) -> Role {
        match self {
            HandshakeEngine::Client(_) => Role::Client,
            HandshakeEngine::Server(_) => Role::Server,
        }
    }

    /// Process incoming handshake bytes received at `level`.
    pub fn read_handshake(&mut self, level: Level, data: &[u8]) -> Result<(), Error> {
        match self {
            HandshakeEngine::Client(e) => e.read_handshake(level, data),
            HandshakeEngine::Server(e) => e.read_handshake(level, data),
        }
    }

    /// Write outgoing handshake bytes into `buf`.
    /// Returns `(bytes_written, target_level)`; `(0, _)` means nothing to send.
    pub fn write_handshake(&mut self, buf: &mut [u8]) -> Result<(usize, Level), Error> {
        match self {
            HandshakeEngine::Client(e) => e.write_handshake(buf),
            HandshakeEngine::Server(e) => e.write_handshake(buf),
        }
    }

    /// Pull the next batch of derived traffic secrets, if any.
    pub fn derived_keys(&mut self) -> Option<DerivedKeys> {
        match self {
            HandshakeEngine::Client(e) => e.derived_keys(),
            HandshakeEngine::Server(e) => e.derived_keys(),
        }
    }

    pub fn is_complete(&self) -> bool {
        match self {
            HandshakeEngine::Client(e) => e.is_complete(),
            HandshakeEngine::Server(e) => e.is_complete(),
        }
    }

    pub fn alpn(&self) -> Option<&[u8]> {
        match self {
            HandshakeEngine::Client(e) => e.alpn(),
            HandshakeEngine::Server(e) => e.alpn(),
        }
    }

    /// Host name the client asked for via SNI. Always `None` on clients.
    pub fn sni(&self) -> Option<&str> {
        match self {
            HandshakeEngine::Client(_) => None,
            HandshakeEngine::Server(e) => e.sni(),
        }
    }

    pub fn cipher_suite(&self) -> Option<CipherSuite> {
        match self {
            HandshakeEngine::Client(e) => e.cipher_suite(),
            HandshakeEngine::Server(e) => e.cipher_suite(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        match self {
            HandshakeEngine::Client(e) => e.state(),
            HandshakeEngine::Server(e) => e.state(),
        }
    }

    /// The alert the engine wants sent for the last error, if any.
    pub fn take_alert(&mut self) -> Option<AlertDescription> {
        match self {
            HandshakeEngine::Client(e) => e.take_alert(),
            HandshakeEngine::Server(e) => e.take_alert(),
        }
    }
}

/// Constant-time comparison of two byte slices.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (&x, &y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
