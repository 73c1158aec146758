//! TLS 1.3 record layer (RFC 8446 §5): framing codec plus the stateful
//! per-direction protection machinery.
//!
//! [`RecordLayer`] owns the traffic keys for both directions, the monotonic
//! sequence numbers that feed nonce construction, and the drain window used
//! during key rotation. It fails closed: after one authentication failure no
//! further record is ever opened.

use crate::crypto::AeadCipher;
use crate::error::Error;

/// TLS record content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl ContentType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            20 => Some(Self::ChangeCipherSpec),
            21 => Some(Self::Alert),
            22 => Some(Self::Handshake),
            23 => Some(Self::ApplicationData),
            _ => None,
        }
    }
}

/// TLS record header (5 bytes).
#[derive(Debug, Clone, Copy)]
pub struct RecordHeader {
    pub content_type: ContentType,
    pub legacy_version: u16,
    pub length: u16,
}

/// TLS 1.3 record header size.
pub const RECORD_HEADER_LEN: usize = 5;

/// Maximum plaintext in one record (RFC 8446 §5.1). Longer payloads are
/// split across records by [`RecordLayer::seal_into`].
pub const MAX_PLAINTEXT: usize = 16384;

/// Maximum protected record payload (RFC 8446 §5.2): plaintext + expansion.
pub const MAX_RECORD_PAYLOAD: usize = 16384 + 256;

/// Encode a TLS record header.
pub fn encode_record_header(ct: ContentType, length: u16, buf: &mut [u8]) -> Result<usize, Error> {
    if buf.len() < RECORD_HEADER_LEN {
        return Err(Error::BufferTooSmall { needed: RECORD_HEADER_LEN });
    }
    buf[0] = ct as u8;
    buf[1] = 0x03;
    buf[2] = 0x03; // legacy_record_version = TLS 1.2
    buf[3] = (length >> 8) as u8;
    buf[4] = (length & 0xff) as u8;
    Ok(RECORD_HEADER_LEN)
}

/// Decode a TLS record header from exactly 5 bytes.
///
/// Rejects lengths above [`MAX_RECORD_PAYLOAD`] (record_overflow).
pub fn decode_record_header(data: &[u8]) -> Result<RecordHeader, Error> {
    if data.len() < RECORD_HEADER_LEN {
        return Err(Error::BufferTooSmall { needed: RECORD_HEADER_LEN });
    }
    let content_type = ContentType::from_byte(data[0]).ok_or(Error::Protocol)?;
    let legacy_version = ((data[1] as u16) << 8) | (data[2] as u16);
    let length = ((data[3] as u16) << 8) | (data[4] as u16);
    if length as usize > MAX_RECORD_PAYLOAD {
        return Err(Error::Protocol);
    }
    Ok(RecordHeader {
        content_type,
        legacy_version,
        length,
    })
}

/// Build a nonce for AEAD: iv XOR padded_sequence_number (RFC 8446 §5.3).
pub fn build_nonce(iv: &[u8; 12], seq: u64) -> [u8; 12] {
    let mut nonce = *iv;
    let seq_bytes = seq.to_be_bytes();
    // XOR the last 8 bytes of the IV with the sequence number
    for i in 0..8 {
        nonce[12 - 8 + i] ^= seq_bytes[i];
    }
    nonce
}

/// Find the inner content type in decrypted record plaintext (RFC 8446 §5.4).
/// The inner CT is the last non-zero byte; everything before it is the data.
pub fn find_inner_content_type(plaintext: &[u8]) -> Result<(usize, ContentType), Error> {
    let mut pos = plaintext.len();
    while pos > 0 && plaintext[pos - 1] == 0 {
        pos -= 1;
    }
    if pos == 0 {
        return Err(Error::Protocol); // all padding, no content type
    }
    let ct = ContentType::from_byte(plaintext[pos - 1]).ok_or(Error::Protocol)?;
    Ok((pos - 1, ct))
}

/// Traffic keys and sequence number for one direction.
struct DirectionKeys {
    cipher: AeadCipher,
    iv: [u8; 12],
    seq: u64,
}

impl DirectionKeys {
    fn new(cipher: AeadCipher, iv: [u8; 12]) -> Self {
        Self { cipher, iv, seq: 0 }
    }

    fn next_nonce(&mut self) -> Result<[u8; 12], Error> {
        let seq = self.seq;
        // Refuse the final sequence value so the counter can never wrap
        self.seq = seq.checked_add(1).ok_or(Error::Internal)?;
        Ok(build_nonce(&self.iv, seq))
    }
}

/// Stateful record protection for one connection.
///
/// Keys are installed per direction as the handshake (and later key updates)
/// derive them; each install resets that direction's sequence number to zero.
pub struct RecordLayer {
    send: Option<DirectionKeys>,
    recv: Option<DirectionKeys>,
    /// Records still acceptable under the current receive keys while a
    /// peer key update is outstanding. `Some(0)` means the window is spent.
    recv_drain: Option<u32>,
    poisoned: bool,
}

impl RecordLayer {
    pub fn new() -> Self {
        Self {
            send: None,
            recv: None,
            recv_drain: None,
            poisoned: false,
        }
    }

    /// Install new outgoing traffic keys. Resets the send sequence number.
    pub fn install_send(&mut self, cipher: AeadCipher, iv: [u8; 12]) {
        self.send = Some(DirectionKeys::new(cipher, iv));
    }

    /// Install new incoming traffic keys. Resets the receive sequence number
    /// and closes any pending drain window.
    pub fn install_recv(&mut self, cipher: AeadCipher, iv: [u8; 12]) {
        self.recv = Some(DirectionKeys::new(cipher, iv));
        self.recv_drain = None;
    }

    /// Bound how many more records the peer may send under its current keys
    /// before it must rotate. Exceeding the window is a protocol violation.
    pub fn expect_recv_rekey(&mut self, window: u32) {
        self.recv_drain = Some(window);
    }

    pub fn has_send_keys(&self) -> bool {
        self.send.is_some()
    }

    pub fn has_recv_keys(&self) -> bool {
        self.recv.is_some()
    }

    /// Protect `data` as one or more records written to the front of `out`.
    ///
    /// Payloads above [`MAX_PLAINTEXT`] are split across records; each
    /// fragment carries `inner_ct` as its inner content type. Empty `data`
    /// produces a single empty record. Returns the total bytes written.
    pub fn seal_into(
        &mut self,
        data: &[u8],
        inner_ct: ContentType,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        let mut offset = 0;
        let mut written = 0;
        loop {
            let chunk_len = (data.len() - offset).min(MAX_PLAINTEXT);
            written += self.seal(&data[offset..offset + chunk_len], inner_ct, &mut out[written..])?;
            offset += chunk_len;
            if offset >= data.len() {
                return Ok(written);
            }
        }
    }

    /// Protect a single record written to the front of `out`.
    ///
    /// `out` receives a complete TLS record: 5-byte header +
    /// AEAD(data + inner_ct) + tag. Returns the record size.
    pub fn seal(
        &mut self,
        data: &[u8],
        inner_ct: ContentType,
        out: &mut [u8],
    ) -> Result<usize, Error> {
        if data.len() > MAX_PLAINTEXT {
            return Err(Error::Internal);
        }
        let keys = self.send.as_mut().ok_or(Error::Internal)?;

        let inner_len = data.len() + 1; // data + inner content type byte
        let outer_payload_len = inner_len + keys.cipher.tag_len();
        let total = RECORD_HEADER_LEN + outer_payload_len;
        if out.len() < total {
            return Err(Error::BufferTooSmall { needed: total });
        }

        // Record header doubles as the AAD
        encode_record_header(ContentType::ApplicationData, outer_payload_len as u16, out)?;
        let (header, body) = out.split_at_mut(RECORD_HEADER_LEN);
        body[..data.len()].copy_from_slice(data);
        body[data.len()] = inner_ct as u8;

        let nonce = keys.next_nonce()?;
        let ct_len = keys.cipher.seal_in_place(&nonce, header, body, inner_len)?;
        Ok(RECORD_HEADER_LEN + ct_len)
    }

    /// Unprotect a received record in place.
    ///
    /// `payload` is the record body (`header.length` bytes, tag included);
    /// `header_bytes` is the raw 5-byte record header used as AAD. On success
    /// `payload[..data_len]` holds the plaintext.
    ///
    /// Any authentication failure poisons the layer: every later call fails
    /// with [`Error::AuthFailure`] without touching the cipher.
    pub fn open_in_place(
        &mut self,
        header_bytes: &[u8; 5],
        payload: &mut [u8],
    ) -> Result<(usize, ContentType), Error> {
        if self.poisoned {
            return Err(Error::AuthFailure);
        }
        if payload.len() > MAX_RECORD_PAYLOAD {
            return Err(Error::Protocol);
        }
        if let Some(0) = self.recv_drain {
            // Peer kept sending under keys it was told to retire
            return Err(Error::Protocol);
        }

        let keys = self.recv.as_mut().ok_or(Error::Protocol)?;
        let nonce = keys.next_nonce()?;
        let ciphertext_len = payload.len();

        let plain_len = match keys
            .cipher
            .open_in_place(&nonce, header_bytes, payload, ciphertext_len)
        {
            Ok(n) => n,
            Err(e) => {
                if e == Error::AuthFailure {
                    self.poisoned = true;
                }
                return Err(e);
            }
        };

        if let Some(remaining) = self.recv_drain.as_mut() {
            *remaining -= 1;
        }

        find_inner_content_type(&payload[..plain_len])
    }
}

impl Default for RecordLayer {
    fn default() -> Self {
        Self::new()
    }
}
