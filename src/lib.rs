#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(any(test, feature = "std"))]
extern crate std;

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod buf;

pub mod alert;
pub mod error;
pub mod stream;

pub mod config;
pub use config::{AcceptAll, CancelToken, ClientConfig, PinnedCerts, ServerConfig, TrustStore};

pub mod crypto;
pub use crypto::suite::CipherSuite;
pub use crypto::{Hkdf, Rng};

pub mod handshake;
pub use handshake::messages::SignatureScheme;
pub use handshake::{ClientEngine, HandshakeState, Level, Role, ServerEngine};

pub mod record;
pub use record::{ContentType, RecordLayer, MAX_PLAINTEXT};

pub mod connection;
pub use connection::{Connection, TlsEvent};

pub mod session;
pub use session::Session;

pub use error::Error;
pub use stream::{ByteStream, ReadOutcome, WriteOutcome};

#[cfg(any(feature = "rustcrypto-chacha", feature = "rustcrypto-aes"))]
pub use crypto::rustcrypto::HkdfSha256;
