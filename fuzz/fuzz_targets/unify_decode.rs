#![no_main]

use {
    dgram_frag::{Unifier, UnifierConfig},
    libfuzzer_sys::fuzz_target,
};

fuzz_target!(|frames: Vec<Vec<u8>>| {
    let mut unifier = Unifier::new(UnifierConfig {
        max_delay_us: 500,
        fault_tolerance_rate: 0.5,
        max_open_groups: Some(64),
    });
    for frame in frames.into_iter().take(256) {
        _ = unifier.decode(Some(&frame));
    }
});
