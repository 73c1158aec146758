//! Session configuration and caller-injected collaborators.
//!
//! Everything the engine needs from its environment arrives through these
//! structs: certificate trust policy, the signing identity, ALPN preferences
//! and the cancellation flag. No process-wide state is consulted anywhere.

use core::sync::atomic::{AtomicBool, Ordering};

use crate::handshake::messages::SignatureScheme;

/// Certificate trust policy, injected by the caller.
///
/// `chain` holds the DER certificates exactly as presented by the peer,
/// leaf first. Returning `false` fails the handshake with a
/// `bad_certificate` alert. Signature verification of CertificateVerify
/// has already happened when this is called; implementations only decide
/// whether the chain is trusted for `hostname`.
pub trait TrustStore {
    fn verify(&self, chain: &[&[u8]], hostname: &str) -> bool;
}

/// Trust policy that accepts exactly the pinned DER certificates.
///
/// An empty pin set rejects everything.
pub struct PinnedCerts(pub &'static [&'static [u8]]);

impl TrustStore for PinnedCerts {
    fn verify(&self, chain: &[&[u8]], _hostname: &str) -> bool {
        let Some(leaf) = chain.first() else {
            return false;
        };
        self.0.iter().any(|pinned| pinned == leaf)
    }
}

/// Trust policy that accepts any chain. Insecure, for testing.
pub struct AcceptAll;

impl TrustStore for AcceptAll {
    fn verify(&self, _chain: &[&[u8]], _hostname: &str) -> bool {
        true
    }
}

/// Caller-owned abort flag, checked at every transport suspension point.
///
/// The flag outlives the session (typically a `static`), so the token is
/// `Copy` and can be handed to a timer context while the session runs. A
/// set flag aborts the session into its failed state with
/// `Error::Cancelled`; no alert is sent.
#[derive(Clone, Copy)]
pub struct CancelToken {
    flag: &'static AtomicBool,
}

impl CancelToken {
    pub const fn new(flag: &'static AtomicBool) -> Self {
        CancelToken { flag }
    }

    /// Request cancellation. Takes effect at the next suspension point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Configuration for a client session.
pub struct ClientConfig {
    /// Server name, sent as SNI and passed to the trust store.
    pub server_name: heapless::String<64>,
    /// ALPN protocols to offer, most preferred first. Empty offers none.
    pub alpn_protocols: &'static [&'static [u8]],
    /// Certificate trust policy.
    pub trust_store: &'static dyn TrustStore,
    /// Optional abort flag.
    pub cancel: Option<CancelToken>,
}

/// Configuration for a server session.
pub struct ServerConfig {
    /// DER-encoded leaf certificate presented to clients.
    pub cert_der: &'static [u8],
    /// DER-encoded intermediate certificates sent after the leaf, in
    /// chain order. At most three.
    pub intermediates: &'static [&'static [u8]],
    /// Private key matching the certificate: a 32-byte Ed25519 seed or a
    /// 32-byte P-256 scalar, per `signature_scheme`.
    pub private_key_der: &'static [u8],
    /// Signature scheme of the configured key.
    pub signature_scheme: SignatureScheme,
    /// Host name this server answers to. When set, a client SNI naming
    /// anything else is rejected with `unrecognized_name`; `None` accepts
    /// any name.
    pub server_name: Option<&'static str>,
    /// ALPN protocols accepted, most preferred first. Empty disables ALPN.
    pub alpn_protocols: &'static [&'static [u8]],
    /// Optional abort flag.
    pub cancel: Option<CancelToken>,
}
