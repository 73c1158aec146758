//! Cryptographic traits and implementations for TLS record protection.
//!
//! The engine needs three primitives: AEAD for record encryption, HKDF for
//! the key schedule, and signatures for certificate verification. The
//! traits here keep the state machines independent of any particular
//! backend; [`rustcrypto`] provides the software implementations, and the
//! [`suite`] module dispatches over the cipher suite negotiated at
//! runtime.

mod aead;
pub mod ecdsa_p256;
pub mod ed25519;
mod hkdf;
pub mod suite;

#[cfg(any(feature = "rustcrypto-chacha", feature = "rustcrypto-aes"))]
pub mod rustcrypto;

pub use aead::Aead;
pub use hkdf::{derive_record_keys, hkdf_expand_label, Hkdf};
pub use suite::AeadCipher;

/// Random byte source, injected by the caller.
///
/// Used for the handshake randoms and the ephemeral X25519 secret. Must be
/// cryptographically secure in production; tests inject deterministic
/// counters.
pub trait Rng {
    fn fill(&mut self, buf: &mut [u8]);
}
