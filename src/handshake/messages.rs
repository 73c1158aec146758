//! TLS 1.3 handshake message encoding and decoding.
//!
//! Handshake message format:
//!   HandshakeType (1 byte)
//!   Length (3 bytes, big-endian)
//!   Body (Length bytes)

use crate::crypto::suite::CipherSuite;
use crate::error::Error;

/// TLS handshake message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HandshakeType {
    ClientHello = 1,
    ServerHello = 2,
    EncryptedExtensions = 8,
    Certificate = 11,
    CertificateVerify = 15,
    Finished = 20,
    KeyUpdate = 24,
}

impl HandshakeType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::ClientHello),
            2 => Some(Self::ServerHello),
            8 => Some(Self::EncryptedExtensions),
            11 => Some(Self::Certificate),
            15 => Some(Self::CertificateVerify),
            20 => Some(Self::Finished),
            24 => Some(Self::KeyUpdate),
            _ => None,
        }
    }
}

/// Signature schemes we support in CertificateVerify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    Ed25519,
    EcdsaSecp256r1Sha256,
}

impl SignatureScheme {
    pub fn to_u16(self) -> u16 {
        match self {
            Self::Ed25519 => 0x0807,
            Self::EcdsaSecp256r1Sha256 => 0x0403,
        }
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0807 => Some(Self::Ed25519),
            0x0403 => Some(Self::EcdsaSecp256r1Sha256),
            _ => None,
        }
    }
}

/// Parsed ClientHello message.
pub struct ClientHello<'a> {
    pub random: &'a [u8; 32],
    pub session_id: &'a [u8],
    pub cipher_suites: &'a [u8],
    pub extensions: &'a [u8],
}

/// Parsed ServerHello message.
pub struct ServerHello<'a> {
    pub random: &'a [u8; 32],
    pub session_id: &'a [u8],
    pub cipher_suite: CipherSuite,
    pub extensions: &'a [u8],
}

/// Parsed Certificate message.
pub struct CertificatePayload<'a> {
    /// The certificate request context (usually empty for server certs).
    pub context: &'a [u8],
    /// Raw certificate entries data (list of CertificateEntry).
    pub entries: &'a [u8],
}

/// A single certificate entry from the Certificate message.
pub struct CertificateEntry<'a> {
    /// DER-encoded certificate data.
    pub cert_data: &'a [u8],
    /// Extensions (usually empty).
    pub extensions: &'a [u8],
}

/// Parsed CertificateVerify message.
pub struct CertificateVerify<'a> {
    pub algorithm: u16,
    pub signature: &'a [u8],
}

/// Write the 4-byte handshake header (type + 3-byte length).
fn write_handshake_header(
    msg_type: HandshakeType,
    body_len: usize,
    out: &mut [u8],
) -> Result<(), Error> {
    if out.len() < 4 {
        return Err(Error::BufferTooSmall { needed: 4 });
    }
    out[0] = msg_type as u8;
    let len = body_len as u32;
    out[1] = ((len >> 16) & 0xFF) as u8;
    out[2] = ((len >> 8) & 0xFF) as u8;
    out[3] = (len & 0xFF) as u8;
    Ok(())
}

/// Read the handshake header: returns (type_byte, body_length).
pub fn read_handshake_header(data: &[u8]) -> Result<(u8, usize), Error> {
    if data.len() < 4 {
        return Err(Error::Protocol);
    }
    let msg_type = data[0];
    let length = ((data[1] as usize) << 16) | ((data[2] as usize) << 8) | (data[3] as usize);
    Ok((msg_type, length))
}

/// Encode a ClientHello message.
///
/// Format:
///   - ProtocolVersion: 0x0303 (TLS 1.2 for compatibility)
///   - Random: 32 bytes
///   - SessionID: length-prefixed (1 byte length)
///   - CipherSuites: length-prefixed (2 byte length)
///   - CompressionMethods: length-prefixed (1 byte length, always [0])
///   - Extensions: length-prefixed (2 byte length)
pub fn encode_client_hello(
    random: &[u8; 32],
    session_id: &[u8],
    cipher_suites: &[CipherSuite],
    extensions_buf: &[u8],
    out: &mut [u8],
) -> Result<usize, Error> {
    // Body size:
    // 2 (version) + 32 (random) + 1 (session_id len) + session_id.len()
    // + 2 (cipher_suites len) + cipher_suites.len() * 2
    // + 2 (compression: length byte + null method)
    // + 2 (extensions len) + extensions_buf.len()
    let cs_len = cipher_suites.len() * 2;
    let body_len = 2 + 32 + 1 + session_id.len() + 2 + cs_len + 2 + 2 + extensions_buf.len();
    let total = 4 + body_len;

    if out.len() < total {
        return Err(Error::BufferTooSmall { needed: total });
    }

    // Handshake header
    write_handshake_header(HandshakeType::ClientHello, body_len, out)?;
    let mut off = 4;

    // ProtocolVersion: legacy TLS 1.2
    out[off] = 0x03;
    out[off + 1] = 0x03;
    off += 2;

    // Random
    out[off..off + 32].copy_from_slice(random);
    off += 32;

    // Session ID
    out[off] = session_id.len() as u8;
    off += 1;
    if !session_id.is_empty() {
        out[off..off + session_id.len()].copy_from_slice(session_id);
        off += session_id.len();
    }

    // Cipher suites
    out[off] = ((cs_len >> 8) & 0xFF) as u8;
    out[off + 1] = (cs_len & 0xFF) as u8;
    off += 2;
    for cs in cipher_suites {
        let v = cs.to_u16();
        out[off] = (v >> 8) as u8;
        out[off + 1] = (v & 0xFF) as u8;
        off += 2;
    }

    // Compression methods: 1 byte length, 1 null method
    out[off] = 1;
    out[off + 1] = 0;
    off += 2;

    // Extensions
    let ext_len = extensions_buf.len();
    out[off] = ((ext_len >> 8) & 0xFF) as u8;
    out[off + 1] = (ext_len & 0xFF) as u8;
    off += 2;
    out[off..off + ext_len].copy_from_slice(extensions_buf);
    off += ext_len;

    Ok(off)
}

/// Parse a ClientHello message body (after the 4-byte handshake header).
pub fn parse_client_hello(data: &[u8]) -> Result<ClientHello<'_>, Error> {
    if data.len() < 2 + 32 + 1 {
        return Err(Error::Protocol);
    }

    let mut off = 0;

    // ProtocolVersion (legacy, should be 0x0303)
    let _version = u16::from_be_bytes([data[off], data[off + 1]]);
    off += 2;

    // Random
    let random: &[u8; 32] = data[off..off + 32]
        .try_into()
        .map_err(|_| Error::Protocol)?;
    off += 32;

    // Session ID
    let sid_len = data[off] as usize;
    off += 1;
    if off + sid_len > data.len() {
        return Err(Error::Protocol);
    }
    let session_id = &data[off..off + sid_len];
    off += sid_len;

    // Cipher suites (2-byte length prefix)
    if off + 2 > data.len() {
        return Err(Error::Protocol);
    }
    let cs_len = u16::from_be_bytes([data[off], data[off + 1]]) as usize;
    off += 2;
    if off + cs_len > data.len() {
        return Err(Error::Protocol);
    }
    let cipher_suites = &data[off..off + cs_len];
    off += cs_len;

    // Compression methods (1-byte length prefix)
    if off >= data.len() {
        return Err(Error::Protocol);
    }
    let comp_len = data[off] as usize;
    off += 1;
    if off + comp_len > data.len() {
        return Err(Error::Protocol);
    }
    // Skip compression methods
    off += comp_len;

    // Extensions
    let extensions = if off + 2 <= data.len() {
        let ext_len = u16::from_be_bytes([data[off], data[off + 1]]) as usize;
        off += 2;
        if off + ext_len > data.len() {
            return Err(Error::Protocol);
        }
        &data[off..off + ext_len]
    } else {
        &[]
    };

    Ok(ClientHello {
        random,
        session_id,
        cipher_suites,
        extensions,
    })
}

/// Iterate over cipher suites in a ClientHello cipher_suites field.
/// The field is raw bytes: pairs of (u8, u8) representing u16 cipher suite IDs.
pub fn iter_cipher_suites(data: &[u8]) -> impl Iterator<Item = u16> + '_ {
    data.chunks_exact(2).map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
}

/// Encode a ServerHello message.
///
/// Format:
///   - ProtocolVersion: 0x0303 (TLS 1.2 for compatibility)
///   - Random: 32 bytes
///   - SessionID: length-prefixed (1 byte length), echoed from ClientHello
///   - CipherSuite: 2 bytes
///   - CompressionMethod: 1 byte (0 = null)
///   - Extensions: length-prefixed (2 byte length)
pub fn encode_server_hello(
    random: &[u8; 32],
    session_id: &[u8],
    cipher_suite: CipherSuite,
    extensions_buf: &[u8],
    out: &mut [u8],
) -> Result<usize, Error> {
    // Body: 2 (version) + 32 (random) + 1 (sid len) + sid.len()
    //       + 2 (cipher suite) + 1 (compression)
    //       + 2 (ext len) + extensions_buf.len()
    let body_len = 2 + 32 + 1 + session_id.len() + 2 + 1 + 2 + extensions_buf.len();
    let total = 4 + body_len;

    if out.len() < total {
        return Err(Error::BufferTooSmall { needed: total });
    }

    write_handshake_header(HandshakeType::ServerHello, body_len, out)?;
    let mut off = 4;

    // ProtocolVersion: legacy TLS 1.2
    out[off] = 0x03;
    out[off + 1] = 0x03;
    off += 2;

    // Random
    out[off..off + 32].copy_from_slice(random);
    off += 32;

    // Session ID (echo client's)
    out[off] = session_id.len() as u8;
    off += 1;
    if !session_id.is_empty() {
        out[off..off + session_id.len()].copy_from_slice(session_id);
        off += session_id.len();
    }

    // Cipher suite
    let cs = cipher_suite.to_u16();
    out[off] = (cs >> 8) as u8;
    out[off + 1] = (cs & 0xFF) as u8;
    off += 2;

    // Compression method: null
    out[off] = 0;
    off += 1;

    // Extensions
    let ext_len = extensions_buf.len();
    out[off] = ((ext_len >> 8) & 0xFF) as u8;
    out[off + 1] = (ext_len & 0xFF) as u8;
    off += 2;
    out[off..off + ext_len].copy_from_slice(extensions_buf);
    off += ext_len;

    Ok(off)
}

/// Parse a ServerHello message body (after the 4-byte handshake header).
pub fn parse_server_hello(data: &[u8]) -> Result<ServerHello<'_>, Error> {
    if data.len() < 2 + 32 + 1 {
        return Err(Error::Protocol);
    }

    let mut off = 0;

    // ProtocolVersion (legacy, should be 0x0303)
    let _version = u16::from_be_bytes([data[off], data[off + 1]]);
    off += 2;

    // Random
    let random: &[u8; 32] = data[off..off + 32]
        .try_into()
        .map_err(|_| Error::Protocol)?;
    off += 32;

    // Session ID
    let sid_len = data[off] as usize;
    off += 1;
    if off + sid_len > data.len() {
        return Err(Error::Protocol);
    }
    let session_id = &data[off..off + sid_len];
    off += sid_len;

    // Cipher suite
    if off + 2 > data.len() {
        return Err(Error::Protocol);
    }
    let cs_val = u16::from_be_bytes([data[off], data[off + 1]]);
    let cipher_suite = CipherSuite::from_u16(cs_val).ok_or(Error::Protocol)?;
    off += 2;

    // Compression method (should be 0)
    if off >= data.len() {
        return Err(Error::Protocol);
    }
    let _compression = data[off];
    off += 1;

    // Extensions
    let extensions = if off + 2 <= data.len() {
        let ext_len = u16::from_be_bytes([data[off], data[off + 1]]) as usize;
        off += 2;
        if off + ext_len > data.len() {
            return Err(Error::Protocol);
        }
        &data[off..off + ext_len]
    } else {
        &[]
    };

    Ok(ServerHello {
        random,
        session_id,
        cipher_suite,
        extensions,
    })
}

/// Encode an EncryptedExtensions message.
///
/// `extensions_buf` is the already-encoded extensions data.
/// The body is simply: extensions_length(2) + extensions_data.
pub fn encode_encrypted_extensions(
    extensions_buf: &[u8],
    out: &mut [u8],
) -> Result<usize, Error> {
    let body_len = 2 + extensions_buf.len();
    let total = 4 + body_len;

    if out.len() < total {
        return Err(Error::BufferTooSmall { needed: total });
    }

    write_handshake_header(HandshakeType::EncryptedExtensions, body_len, out)?;
    let mut off = 4;

    // Extensions list length
    let ext_len = extensions_buf.len();
    out[off] = ((ext_len >> 8) & 0xFF) as u8;
    out[off + 1] = (ext_len & 0xFF) as u8;
    off += 2;

    out[off..off + ext_len].copy_from_slice(extensions_buf);
    off += ext_len;

    Ok(off)
}

/// Parse an EncryptedExtensions message body (after header).
/// Returns the raw extensions bytes.
pub fn parse_encrypted_extensions(data: &[u8]) -> Result<&[u8], Error> {
    if data.len() < 2 {
        return Err(Error::Protocol);
    }
    let ext_len = u16::from_be_bytes([data[0], data[1]]) as usize;
    if 2 + ext_len > data.len() {
        return Err(Error::Protocol);
    }
    Ok(&data[2..2 + ext_len])
}

/// Encode a Certificate message carrying `chain`, leaf first.
///
/// Format:
///   - certificate_request_context length (1 byte) = 0
///   - certificate_list length (3 bytes)
///   - per CertificateEntry:
///     - cert_data length (3 bytes)
///     - cert_data (DER bytes)
///     - extensions length (2 bytes) = 0
pub fn encode_certificate(
    chain: &[&[u8]],
    out: &mut [u8],
) -> Result<usize, Error> {
    // Each entry: 3 (cert_data_len) + cert + 2 (ext_len)
    let mut list_len = 0usize;
    for cert in chain {
        list_len += 3 + cert.len() + 2;
    }
    // Body: 1 (context_len) + 3 (list_len) + entries
    let body_len = 1 + 3 + list_len;
    let total = 4 + body_len;

    if out.len() < total {
        return Err(Error::BufferTooSmall { needed: total });
    }

    write_handshake_header(HandshakeType::Certificate, body_len, out)?;
    let mut off = 4;

    // certificate_request_context length = 0
    out[off] = 0;
    off += 1;

    // certificate_list length (3 bytes)
    out[off] = ((list_len >> 16) & 0xFF) as u8;
    out[off + 1] = ((list_len >> 8) & 0xFF) as u8;
    out[off + 2] = (list_len & 0xFF) as u8;
    off += 3;

    for cert in chain {
        // cert_data length (3 bytes)
        let cert_len = cert.len();
        out[off] = ((cert_len >> 16) & 0xFF) as u8;
        out[off + 1] = ((cert_len >> 8) & 0xFF) as u8;
        out[off + 2] = (cert_len & 0xFF) as u8;
        off += 3;

        // cert_data
        out[off..off + cert_len].copy_from_slice(cert);
        off += cert_len;

        // extensions length = 0
        out[off] = 0;
        out[off + 1] = 0;
        off += 2;
    }

    Ok(off)
}

/// Parse a Certificate message body (after header).
pub fn parse_certificate(data: &[u8]) -> Result<CertificatePayload<'_>, Error> {
    if data.is_empty() {
        return Err(Error::Protocol);
    }

    let mut off = 0;

    // certificate_request_context
    let ctx_len = data[off] as usize;
    off += 1;
    if off + ctx_len > data.len() {
        return Err(Error::Protocol);
    }
    let context = &data[off..off + ctx_len];
    off += ctx_len;

    // certificate_list (3-byte length prefix)
    if off + 3 > data.len() {
        return Err(Error::Protocol);
    }
    let list_len = ((data[off] as usize) << 16) | ((data[off + 1] as usize) << 8) | (data[off + 2] as usize);
    off += 3;
    if off + list_len > data.len() {
        return Err(Error::Protocol);
    }
    let entries = &data[off..off + list_len];

    Ok(CertificatePayload { context, entries })
}

/// Iterate over certificate entries in a CertificatePayload.
pub fn iter_certificate_entries(mut data: &[u8]) -> impl Iterator<Item = Result<CertificateEntry<'_>, Error>> + '_ {
    core::iter::from_fn(move || {
        if data.is_empty() {
            return None;
        }
        if data.len() < 3 {
            let err = Err(Error::Protocol);
            data = &[];
            return Some(err);
        }
        let cert_len = ((data[0] as usize) << 16) | ((data[1] as usize) << 8) | (data[2] as usize);
        data = &data[3..];
        if data.len() < cert_len {
            let err = Err(Error::Protocol);
            data = &[];
            return Some(err);
        }
        let cert_data = &data[..cert_len];
        data = &data[cert_len..];

        // Extensions (2-byte length prefix)
        if data.len() < 2 {
            let err = Err(Error::Protocol);
            data = &[];
            return Some(err);
        }
        let ext_len = u16::from_be_bytes([data[0], data[1]]) as usize;
        data = &data[2..];
        if data.len() < ext_len {
            let err = Err(Error::Protocol);
            data = &[];
            return Some(err);
        }
        let extensions = &data[..ext_len];
        data = &data[ext_len..];

        Some(Ok(CertificateEntry {
            cert_data,
            extensions,
        }))
    })
}

/// Encode a CertificateVerify message.
///
/// `algorithm` is the signature algorithm (e.g., 0x0807 for Ed25519).
/// `signature` is the signature bytes.
pub fn encode_certificate_verify(
    algorithm: u16,
    signature: &[u8],
    out: &mut [u8],
) -> Result<usize, Error> {
    // Body: 2 (algorithm) + 2 (sig_len) + signature.len()
    let body_len = 2 + 2 + signature.len();
    let total = 4 + body_len;

    if out.len() < total {
        return Err(Error::BufferTooSmall { needed: total });
    }

    write_handshake_header(HandshakeType::CertificateVerify, body_len, out)?;
    let mut off = 4;

    // Algorithm
    out[off] = (algorithm >> 8) as u8;
    out[off + 1] = (algorithm & 0xFF) as u8;
    off += 2;

    // Signature length
    let sig_len = signature.len();
    out[off] = ((sig_len >> 8) & 0xFF) as u8;
    out[off + 1] = (sig_len & 0xFF) as u8;
    off += 2;

    // Signature
    out[off..off + sig_len].copy_from_slice(signature);
    off += sig_len;

    Ok(off)
}

/// Parse a CertificateVerify message body (after header).
pub fn parse_certificate_verify(data: &[u8]) -> Result<CertificateVerify<'_>, Error> {
    if data.len() < 4 {
        return Err(Error::Protocol);
    }

    let algorithm = u16::from_be_bytes([data[0], data[1]]);
    let sig_len = u16::from_be_bytes([data[2], data[3]]) as usize;

    if 4 + sig_len > data.len() {
        return Err(Error::Protocol);
    }

    Ok(CertificateVerify {
        algorithm,
        signature: &data[4..4 + sig_len],
    })
}

/// Encode a Finished message (header + verify_data).
pub fn encode_finished(verify_data: &[u8], out: &mut [u8]) -> Result<usize, Error> {
    let total = 4 + verify_data.len();
    if out.len() < total {
        return Err(Error::BufferTooSmall { needed: total });
    }
    write_handshake_header(HandshakeType::Finished, verify_data.len(), out)?;
    out[4..4 + verify_data.len()].copy_from_slice(verify_data);
    Ok(total)
}

/// Parse a Finished message body (after header).
/// Returns the verify_data.
pub fn parse_finished(data: &[u8]) -> Result<&[u8], Error> {
    // For SHA-256, verify_data is 32 bytes
    if data.len() < 32 {
        return Err(Error::Protocol);
    }
    Ok(&data[..32])
}

/// Encode a KeyUpdate message (RFC 8446 §4.6.3).
///
/// The body is one byte: 0 = update_not_requested, 1 = update_requested.
pub fn encode_key_update(request_update: bool, out: &mut [u8]) -> Result<usize, Error> {
    if out.len() < 5 {
        return Err(Error::BufferTooSmall { needed: 5 });
    }
    write_handshake_header(HandshakeType::KeyUpdate, 1, out)?;
    out[4] = if request_update { 1 } else { 0 };
    Ok(5)
}

/// Parse a KeyUpdate message body (after header).
/// Returns whether the peer requested an update in return.
pub fn parse_key_update(data: &[u8]) -> Result<bool, Error> {
    if data.len() != 1 {
        return Err(Error::Protocol);
    }
    match data[0] {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(Error::Protocol),
    }
}
