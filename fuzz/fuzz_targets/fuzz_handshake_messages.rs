#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_tls::handshake::messages;

fuzz_target!(|data: &[u8]| {
    // Fuzz all handshake message parsers: should never panic on any input.

    // Try reading a handshake header
    if let Ok((msg_type, body_len)) = messages::read_handshake_header(data) {
        // If header parsed, try to parse the body based on the message type
        if data.len() >= 4 + body_len {
            let body = &data[4..4 + body_len];

            match messages::HandshakeType::from_u8(msg_type) {
                Some(messages::HandshakeType::ClientHello) => {
                    if let Ok(hello) = messages::parse_client_hello(body) {
                        for suite in messages::iter_cipher_suites(hello.cipher_suites) {
                            let _ = suite;
                        }
                    }
                }
                Some(messages::HandshakeType::ServerHello) => {
                    let _ = messages::parse_server_hello(body);
                }
                Some(messages::HandshakeType::EncryptedExtensions) => {
                    let _ = messages::parse_encrypted_extensions(body);
                }
                Some(messages::HandshakeType::Certificate) => {
                    if let Ok(cert) = messages::parse_certificate(body) {
                        // Try iterating certificate entries
                        for entry in messages::iter_certificate_entries(cert.entries) {
                            if entry.is_err() {
                                break;
                            }
                        }
                    }
                }
                Some(messages::HandshakeType::CertificateVerify) => {
                    let _ = messages::parse_certificate_verify(body);
                }
                Some(messages::HandshakeType::Finished) => {
                    let _ = messages::parse_finished(body);
                }
                Some(messages::HandshakeType::KeyUpdate) => {
                    let _ = messages::parse_key_update(body);
                }
                None => {}
            }
        }
    }

    // Also try each parser directly on the raw data
    let _ = messages::parse_client_hello(data);
    let _ = messages::parse_server_hello(data);
    let _ = messages::parse_encrypted_extensions(data);
    let _ = messages::parse_certificate(data);
    let _ = messages::parse_certificate_verify(data);
    let _ = messages::parse_finished(data);
    let _ = messages::parse_key_update(data);
});
