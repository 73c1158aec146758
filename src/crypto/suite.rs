//! Cipher suite negotiation support.
//!
//! The suite is chosen once, when ServerHello is produced or parsed; from
//! then on every record operation dispatches through [`AeadCipher`], a
//! tagged variant over the enabled backends. No trait objects, no generics
//! on the connection: the variant carries the keyed cipher selected at
//! negotiation.

use crate::crypto::Aead;
use crate::error::Error;

#[cfg(feature = "rustcrypto-aes")]
use crate::crypto::rustcrypto::Aes128GcmAead;
#[cfg(feature = "rustcrypto-chacha")]
use crate::crypto::rustcrypto::ChaCha20Poly1305Aead;

/// TLS cipher suites we support. Both hash with SHA-256.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    TlsAes128GcmSha256,
    TlsChacha20Poly1305Sha256,
}

impl CipherSuite {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::TlsAes128GcmSha256 => 0x1301,
            Self::TlsChacha20Poly1305Sha256 => 0x1303,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x1301 => Some(Self::TlsAes128GcmSha256),
            0x1303 => Some(Self::TlsChacha20Poly1305Sha256),
            _ => None,
        }
    }

    /// AEAD key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Self::TlsAes128GcmSha256 => 16,
            Self::TlsChacha20Poly1305Sha256 => 32,
        }
    }
}

/// Suites offered and accepted, most preferred first, per enabled backend.
pub fn supported_suites() -> &'static [CipherSuite] {
    #[cfg(all(feature = "rustcrypto-aes", feature = "rustcrypto-chacha"))]
    return &[
        CipherSuite::TlsAes128GcmSha256,
        CipherSuite::TlsChacha20Poly1305Sha256,
    ];
    #[cfg(all(feature = "rustcrypto-aes", not(feature = "rustcrypto-chacha")))]
    return &[CipherSuite::TlsAes128GcmSha256];
    #[cfg(all(not(feature = "rustcrypto-aes"), feature = "rustcrypto-chacha"))]
    return &[CipherSuite::TlsChacha20Poly1305Sha256];
    #[cfg(not(any(feature = "rustcrypto-aes", feature = "rustcrypto-chacha")))]
    return &[];
}

/// A keyed AEAD for the negotiated suite.
///
/// Nonce and tag are 12/16 bytes for both variants; only the key length
/// differs. Construction fails if the suite's backend is not compiled in.
pub enum AeadCipher {
    #[cfg(feature = "rustcrypto-aes")]
    Aes128Gcm(Aes128GcmAead),
    #[cfg(feature = "rustcrypto-chacha")]
    ChaCha20Poly1305(ChaCha20Poly1305Aead),
}

impl AeadCipher {
    /// Key the AEAD for `suite`. `key` must be `suite.key_len()` bytes.
    pub fn new(suite: CipherSuite, key: &[u8]) -> Result<Self, Error> {
        match suite {
            #[cfg(feature = "rustcrypto-aes")]
            CipherSuite::TlsAes128GcmSha256 => {
                Ok(AeadCipher::Aes128Gcm(Aes128GcmAead::new(key)?))
            }
            #[cfg(feature = "rustcrypto-chacha")]
            CipherSuite::TlsChacha20Poly1305Sha256 => {
                Ok(AeadCipher::ChaCha20Poly1305(ChaCha20Poly1305Aead::new(key)?))
            }
            #[allow(unreachable_patterns)]
            _ => Err(Error::Internal),
        }
    }

    pub fn suite(&self) -> CipherSuite {
        match self {
            #[cfg(feature = "rustcrypto-aes")]
            AeadCipher::Aes128Gcm(_) => CipherSuite::TlsAes128GcmSha256,
            #[cfg(feature = "rustcrypto-chacha")]
            AeadCipher::ChaCha20Poly1305(_) => CipherSuite::TlsChacha20Poly1305Sha256,
        }
    }

    pub fn tag_len(&self) -> usize {
        16
    }

    /// Encrypt `buf[..payload_len]` in place; returns ciphertext + tag length.
    pub fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error> {
        match self {
            #[cfg(feature = "rustcrypto-aes")]
            AeadCipher::Aes128Gcm(aead) => aead.seal_in_place(nonce, aad, buf, payload_len),
            #[cfg(feature = "rustcrypto-chacha")]
            AeadCipher::ChaCha20Poly1305(aead) => {
                aead.seal_in_place(nonce, aad, buf, payload_len)
            }
        }
    }

    /// Decrypt `buf[..ciphertext_len]` in place; returns plaintext length.
    pub fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error> {
        match self {
            #[cfg(feature = "rustcrypto-aes")]
            AeadCipher::Aes128Gcm(aead) => aead.open_in_place(nonce, aad, buf, ciphertext_len),
            #[cfg(feature = "rustcrypto-chacha")]
            AeadCipher::ChaCha20Poly1305(aead) => {
                aead.open_in_place(nonce, aad, buf, ciphertext_len)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_code_roundtrip() {
        assert_eq!(
            CipherSuite::from_u16(CipherSuite::TlsAes128GcmSha256.to_u16()),
            Some(CipherSuite::TlsAes128GcmSha256)
        );
        assert_eq!(
            CipherSuite::from_u16(CipherSuite::TlsChacha20Poly1305Sha256.to_u16()),
            Some(CipherSuite::TlsChacha20Poly1305Sha256)
        );
        assert_eq!(CipherSuite::from_u16(0xFFFF), None);
        assert_eq!(CipherSuite::from_u16(0x1302), None);
    }

    #[test]
    fn suite_key_lengths() {
        assert_eq!(CipherSuite::TlsAes128GcmSha256.key_len(), 16);
        assert_eq!(CipherSuite::TlsChacha20Poly1305Sha256.key_len(), 32);
    }

    #[cfg(feature = "rustcrypto-aes")]
    #[test]
    fn tagged_dispatch_aes_roundtrip() {
        let cipher = AeadCipher::new(CipherSuite::TlsAes128GcmSha256, &[0x11; 16]).unwrap();
        assert_eq!(cipher.suite(), CipherSuite::TlsAes128GcmSha256);

        let mut buf = [0u8; 64];
        buf[..5].copy_from_slice(b"hello");
        let nonce = [0u8; 12];
        let ct_len = cipher.seal_in_place(&nonce, b"aad", &mut buf, 5).unwrap();
        assert_eq!(ct_len, 5 + cipher.tag_len());
        let pt_len = cipher.open_in_place(&nonce, b"aad", &mut buf, ct_len).unwrap();
        assert_eq!(&buf[..pt_len], b"hello");
    }

    #[cfg(feature = "rustcrypto-chacha")]
    #[test]
    fn tagged_dispatch_chacha_roundtrip() {
        let cipher =
            AeadCipher::new(CipherSuite::TlsChacha20Poly1305Sha256, &[0x22; 32]).unwrap();
        assert_eq!(cipher.suite(), CipherSuite::TlsChacha20Poly1305Sha256);

        let mut buf = [0u8; 64];
        buf[..5].copy_from_slice(b"world");
        let nonce = [0u8; 12];
        let ct_len = cipher.seal_in_place(&nonce, b"aad", &mut buf, 5).unwrap();
        let pt_len = cipher.open_in_place(&nonce, b"aad", &mut buf, ct_len).unwrap();
        assert_eq!(&buf[..pt_len], b"world");
    }

    #[cfg(feature = "rustcrypto-aes")]
    #[test]
    fn wrong_key_length_rejected() {
        assert!(AeadCipher::new(CipherSuite::TlsAes128GcmSha256, &[0x11; 32]).is_err());
    }

    #[test]
    fn supported_suites_prefer_aes() {
        let suites = supported_suites();
        #[cfg(feature = "rustcrypto-aes")]
        assert_eq!(suites[0], CipherSuite::TlsAes128GcmSha256);
        #[cfg(all(feature = "rustcrypto-aes", feature = "rustcrypto-chacha"))]
        assert_eq!(suites.len(), 2);
    }
}
