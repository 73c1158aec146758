#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Record framing and alert parsers: should never panic on any input.

    let _ = milli_tls::record::decode_record_header(data);
    let _ = milli_tls::record::find_inner_content_type(data);
    let _ = milli_tls::alert::parse_alert(data);
});
