//! TLS 1.3 alerts (RFC 8446 section 6): description codes and the
//! two-byte alert record payload.

use crate::error::Error;

/// TLS alert description codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertDescription {
    CloseNotify = 0,
    UnexpectedMessage = 10,
    BadRecordMac = 20,
    RecordOverflow = 22,
    HandshakeFailure = 40,
    BadCertificate = 42,
    CertificateExpired = 45,
    CertificateUnknown = 46,
    IllegalParameter = 47,
    UnknownCa = 48,
    DecodeError = 50,
    DecryptError = 51,
    ProtocolVersion = 70,
    InsufficientSecurity = 71,
    InternalError = 80,
    MissingExtension = 109,
    UnsupportedExtension = 110,
    UnrecognizedName = 112,
    NoApplicationProtocol = 120,
}

impl AlertDescription {
    /// Convert from a raw u8 byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::CloseNotify),
            10 => Some(Self::UnexpectedMessage),
            20 => Some(Self::BadRecordMac),
            22 => Some(Self::RecordOverflow),
            40 => Some(Self::HandshakeFailure),
            42 => Some(Self::BadCertificate),
            45 => Some(Self::CertificateExpired),
            46 => Some(Self::CertificateUnknown),
            47 => Some(Self::IllegalParameter),
            48 => Some(Self::UnknownCa),
            50 => Some(Self::DecodeError),
            51 => Some(Self::DecryptError),
            70 => Some(Self::ProtocolVersion),
            71 => Some(Self::InsufficientSecurity),
            80 => Some(Self::InternalError),
            109 => Some(Self::MissingExtension),
            110 => Some(Self::UnsupportedExtension),
            112 => Some(Self::UnrecognizedName),
            120 => Some(Self::NoApplicationProtocol),
            _ => None,
        }
    }

    /// Convert to raw u8 byte.
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// TLS alert levels. In TLS 1.3 every alert except `close_notify` and
/// `user_canceled` is implicitly fatal regardless of the level byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AlertLevel {
    Warning = 1,
    Fatal = 2,
}

impl AlertLevel {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Warning),
            2 => Some(Self::Fatal),
            _ => None,
        }
    }
}

/// Encode an alert record payload.
pub fn encode_alert(level: AlertLevel, desc: AlertDescription) -> [u8; 2] {
    [level as u8, desc.to_u8()]
}

/// Parse an alert record payload. The payload must be exactly two bytes
/// with known level and description codes.
pub fn parse_alert(payload: &[u8]) -> Result<(AlertLevel, AlertDescription), Error> {
    if payload.len() != 2 {
        return Err(Error::Protocol);
    }
    let level = AlertLevel::from_u8(payload[0]).ok_or(Error::Protocol)?;
    let desc = AlertDescription::from_u8(payload[1]).ok_or(Error::Protocol)?;
    Ok((level, desc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_alert_codes() {
        let codes = [
            AlertDescription::CloseNotify,
            AlertDescription::UnexpectedMessage,
            AlertDescription::BadRecordMac,
            AlertDescription::RecordOverflow,
            AlertDescription::HandshakeFailure,
            AlertDescription::BadCertificate,
            AlertDescription::CertificateExpired,
            AlertDescription::CertificateUnknown,
            AlertDescription::IllegalParameter,
            AlertDescription::UnknownCa,
            AlertDescription::DecodeError,
            AlertDescription::DecryptError,
            AlertDescription::ProtocolVersion,
            AlertDescription::InsufficientSecurity,
            AlertDescription::InternalError,
            AlertDescription::MissingExtension,
            AlertDescription::UnsupportedExtension,
            AlertDescription::UnrecognizedName,
            AlertDescription::NoApplicationProtocol,
        ];
        for code in codes {
            assert_eq!(AlertDescription::from_u8(code.to_u8()), Some(code));
        }
    }

    #[test]
    fn unknown_alert_code() {
        assert_eq!(AlertDescription::from_u8(255), None);
        assert_eq!(AlertDescription::from_u8(1), None);
    }

    #[test]
    fn alert_payload_roundtrip() {
        let bytes = encode_alert(AlertLevel::Fatal, AlertDescription::DecodeError);
        assert_eq!(bytes, [2, 50]);
        let (level, desc) = parse_alert(&bytes).unwrap();
        assert_eq!(level, AlertLevel::Fatal);
        assert_eq!(desc, AlertDescription::DecodeError);
    }

    #[test]
    fn alert_payload_rejects_bad_length_and_codes() {
        assert_eq!(parse_alert(&[2]), Err(Error::Protocol));
        assert_eq!(parse_alert(&[2, 50, 0]), Err(Error::Protocol));
        assert_eq!(parse_alert(&[3, 50]), Err(Error::Protocol));
        assert_eq!(parse_alert(&[2, 99]), Err(Error::Protocol));
    }
}
