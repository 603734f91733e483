//! Fuzz target for the frame codec.
//!
//! Run with: cargo +nightly fuzz run fuzz_frame_decode
//!
//! Arbitrary bytes must decode to an error or to a message that encodes
//! back to exactly the bytes consumed.

#![no_main]

use libfuzzer_sys::fuzz_target;
use radiolink_core::ipc::Message;

fuzz_target!(|data: &[u8]| {
    if let Ok((message, consumed)) = Message::decode_prefix(data) {
        let encoded = message.encode().expect("decoded message must re-encode");
        // NaN payloads compare unequal, so compare bytes instead of values.
        assert_eq!(encoded.as_slice(), &data[..consumed]);
        assert_eq!(Message::decode(data).is_ok(), consumed == data.len());
    }
});
