//! HKDF trait and the TLS 1.3 label expansion built on it (RFC 8446
//! section 7.1 / 7.3).

use crate::error::Error;

/// HMAC-based Key Derivation Function (RFC 5869).
///
/// Every secret in the key schedule is produced by extract/expand over the
/// negotiated hash.
pub trait Hkdf {
    /// Hash output length in bytes (e.g., 32 for SHA-256).
    const HASH_LEN: usize;

    /// HKDF-Extract: derive a pseudorandom key from salt and input keying material.
    fn extract(&self, salt: &[u8], ikm: &[u8], prk: &mut [u8]);

    /// HKDF-Expand: expand a pseudorandom key with info into output keying material.
    fn expand(&self, prk: &[u8], info: &[u8], okm: &mut [u8]) -> Result<(), Error>;
}

/// HKDF-Expand-Label as defined in RFC 8446 section 7.1.
///
/// Constructs the HkdfLabel structure:
///   uint16 length = out.len()
///   opaque label<7..255> = "tls13 " + label
///   opaque context<0..255> = context
///
/// Then calls HKDF-Expand(secret, HkdfLabel, out.len()).
pub fn hkdf_expand_label<H: Hkdf>(
    hkdf: &H,
    secret: &[u8],
    label: &[u8],
    context: &[u8],
    out: &mut [u8],
) -> Result<(), Error> {
    // Build the HkdfLabel info structure on the stack.
    // Max info: 2 + 1 + 6 + label.len() + 1 + context.len()
    let tls13_prefix = b"tls13 ";
    let full_label_len = tls13_prefix.len() + label.len();
    let info_len = 2 + 1 + full_label_len + 1 + context.len();

    // 80 bytes is ample for every label plus a hash-sized context.
    if info_len > 80 {
        return Err(Error::Internal);
    }

    let mut info = [0u8; 80];
    let out_len = out.len() as u16;
    info[0] = (out_len >> 8) as u8;
    info[1] = out_len as u8;
    info[2] = full_label_len as u8;
    info[3..3 + tls13_prefix.len()].copy_from_slice(tls13_prefix);
    info[3 + tls13_prefix.len()..3 + full_label_len].copy_from_slice(label);
    info[3 + full_label_len] = context.len() as u8;
    if !context.is_empty() {
        info[4 + full_label_len..4 + full_label_len + context.len()].copy_from_slice(context);
    }

    hkdf.expand(secret, &info[..info_len], out)
}

/// Derive record protection material from a traffic secret (RFC 8446
/// section 7.3).
///
/// `key` length must be the AEAD key size (16 for AES-128-GCM, 32 for
/// ChaCha20-Poly1305); `iv` length must be 12.
pub fn derive_record_keys<H: Hkdf>(
    hkdf: &H,
    secret: &[u8],
    key: &mut [u8],
    iv: &mut [u8],
) -> Result<(), Error> {
    hkdf_expand_label(hkdf, secret, b"key", &[], key)?;
    hkdf_expand_label(hkdf, secret, b"iv", &[], iv)?;
    Ok(())
}
