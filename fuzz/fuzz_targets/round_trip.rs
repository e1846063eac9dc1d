#![no_main]

use {
    dgram_frag::{Divider, Unifier, UnifierConfig},
    libfuzzer_sys::fuzz_target,
};

fuzz_target!(|input: (Vec<u8>, bool, Vec<bool>)| {
    let (message, use_xor, drop_mask) = input;
    if message.is_empty() || message.len() > 4096 {
        return;
    }

    let mut divider = Divider::new(64, use_xor);
    let Ok(frames) = divider.encode(&message) else {
        return;
    };

    let mut unifier = Unifier::new(UnifierConfig::default());
    let mut delivered = Vec::new();
    for (i, frame) in frames.iter().enumerate() {
        let drop = drop_mask.get(i % drop_mask.len().max(1)).copied().unwrap_or(false);
        if drop {
            continue;
        }
        delivered.extend(unifier.decode(Some(frame)));
    }

    // A fully-delivered, drop-free run must always reassemble the original.
    if drop_mask.iter().all(|&d| !d) {
        assert_eq!(delivered, vec![message]);
    }
});
