#![no_main]

use libfuzzer_sys::fuzz_target;
use milli_tls::handshake::extensions;

fuzz_target!(|data: &[u8]| {
    // Extension block parsers: should never panic on any input.

    let _ = extensions::parse_client_hello_extensions(data);
    let _ = extensions::parse_server_hello_extensions(data);
    let _ = extensions::parse_encrypted_extensions_data(data);
});
