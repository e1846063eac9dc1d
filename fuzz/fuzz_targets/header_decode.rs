#![no_main]

use {dgram_frag::FragmentHeader, libfuzzer_sys::fuzz_target};

fuzz_target!(|data: &[u8]| {
    if let Ok(header) = FragmentHeader::decode(data) {
        _ = header.validate(data.len());
    }
});
