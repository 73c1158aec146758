//! RustCrypto-backed implementations of the crypto traits.

use crate::crypto::{Aead as AeadTrait, Hkdf as HkdfTrait};
use crate::error::Error;

// ---- HKDF-SHA256 ----

/// HKDF using SHA-256 (via the `hkdf` crate).
#[derive(Default)]
pub struct HkdfSha256;

impl HkdfTrait for HkdfSha256 {
    const HASH_LEN: usize = 32;

    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]) {
        let (out, _) = hkdf::Hkdf::<sha2::Sha256>::extract(Some(salt), ikm);
        prk[..32].copy_from_slice(&out);
    }

    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error> {
        let hk = hkdf::Hkdf::<sha2::Sha256>::from_prk(prk).map_err(|_| Error::Internal)?;
        hk.expand(info, okm).map_err(|_| Error::Internal)
    }
}

// ---- AES-128-GCM AEAD ----

#[cfg(feature = "rustcrypto-aes")]
/// AES-128-GCM AEAD implementation.
pub struct Aes128GcmAead {
    cipher: aes_gcm::Aes128Gcm,
}

#[cfg(feature = "rustcrypto-aes")]
impl Aes128GcmAead {
    /// Key the cipher. `key` must be 16 bytes.
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        use aes_gcm::KeyInit;
        if key.len() != Self::KEY_LEN {
            return Err(Error::Internal);
        }
        let cipher = aes_gcm::Aes128Gcm::new_from_slice(key).map_err(|_| Error::Internal)?;
        Ok(Aes128GcmAead { cipher })
    }
}

#[cfg(feature = "rustcrypto-aes")]
impl AeadTrait for Aes128GcmAead {
    const KEY_LEN: usize = 16;
    const NONCE_LEN: usize = 12;
    const TAG_LEN: usize = 16;

    fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error> {
        use aes_gcm::aead::AeadInPlace;
        use aes_gcm::Nonce;

        if nonce.len() != 12 {
            return Err(Error::Internal);
        }
        let total = payload_len + Self::TAG_LEN;
        if buf.len() < total {
            return Err(Error::BufferTooSmall { needed: total });
        }

        let nonce = Nonce::from_slice(nonce);
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, aad, &mut buf[..payload_len])
            .map_err(|_| Error::Internal)?;
        buf[payload_len..total].copy_from_slice(&tag);
        Ok(total)
    }

    fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error> {
        use aes_gcm::aead::AeadInPlace;
        use aes_gcm::{Nonce, Tag};

        if nonce.len() != 12 {
            return Err(Error::Internal);
        }
        if ciphertext_len < Self::TAG_LEN {
            return Err(Error::AuthFailure);
        }
        let plaintext_len = ciphertext_len - Self::TAG_LEN;
        let mut tag_bytes = [0u8; 16];
        tag_bytes.copy_from_slice(&buf[plaintext_len..ciphertext_len]);
        let tag = Tag::from(tag_bytes);
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                aad,
                &mut buf[..plaintext_len],
                &tag,
            )
            .map_err(|_| Error::AuthFailure)?;
        Ok(plaintext_len)
    }
}

// ---- ChaCha20-Poly1305 AEAD ----

#[cfg(feature = "rustcrypto-chacha")]
/// ChaCha20-Poly1305 AEAD implementation.
pub struct ChaCha20Poly1305Aead {
    cipher: chacha20poly1305::ChaCha20Poly1305,
}

#[cfg(feature = "rustcrypto-chacha")]
impl ChaCha20Poly1305Aead {
    /// Key the cipher. `key` must be 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self, Error> {
        use chacha20poly1305::KeyInit;
        if key.len() != Self::KEY_LEN {
            return Err(Error::Internal);
        }
        let cipher =
            chacha20poly1305::ChaCha20Poly1305::new_from_slice(key).map_err(|_| Error::Internal)?;
        Ok(ChaCha20Poly1305Aead { cipher })
    }
}

#[cfg(feature = "rustcrypto-chacha")]
impl AeadTrait for ChaCha20Poly1305Aead {
    const KEY_LEN: usize = 32;
    const NONCE_LEN: usize = 12;
    const TAG_LEN: usize = 16;

    fn seal_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        payload_len: usize,
    ) -> Result<usize, Error> {
        use chacha20poly1305::aead::AeadInPlace;

        if nonce.len() != 12 {
            return Err(Error::Internal);
        }
        let total = payload_len + Self::TAG_LEN;
        if buf.len() < total {
            return Err(Error::BufferTooSmall { needed: total });
        }

        let nonce = chacha20poly1305::Nonce::from_slice(nonce);
        let tag = self
            .cipher
            .encrypt_in_place_detached(nonce, aad, &mut buf[..payload_len])
            .map_err(|_| Error::Internal)?;
        buf[payload_len..total].copy_from_slice(&tag);
        Ok(total)
    }

    fn open_in_place(
        &self,
        nonce: &[u8],
        aad: &[u8],
        buf: &mut [u8],
        ciphertext_len: usize,
    ) -> Result<usize, Error> {
        use chacha20poly1305::aead::AeadInPlace;

        if nonce.len() != 12 {
            return Err(Error::Internal);
        }
        if ciphertext_len < Self::TAG_LEN {
            return Err(Error::AuthFailure);
        }
        let plaintext_len = ciphertext_len - Self::TAG_LEN;
        let mut tag_bytes = [0u8; 16];
        tag_bytes.copy_from_slice(&buf[plaintext_len..ciphertext_len]);
        let tag = chacha20poly1305::Tag::from(tag_bytes);
        self.cipher
            .decrypt_in_place_detached(
                chacha20poly1305::Nonce::from_slice(nonce),
                aad,
                &mut buf[..plaintext_len],
                &tag,
            )
            .map_err(|_| Error::AuthFailure)?;
        Ok(plaintext_len)
    }
}
