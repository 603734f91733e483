//! Fuzz target for report decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_report_decode
//!
//! Any well-framed response, however inconsistent its payload lengths,
//! must decode without panicking under both layouts.

#![no_main]

use libfuzzer_sys::fuzz_target;
use radiolink_core::ipc::Message;
use radiolink_core::report::{ReportLayout, decode_report};

fuzz_target!(|data: &[u8]| {
    if let Ok((message, _)) = Message::decode_prefix(data) {
        for layout in [ReportLayout::V1, ReportLayout::V2] {
            let entries = decode_report(&message, layout, 0.0);
            assert!(entries.len() <= message.payload_char.len());
        }
    }
});
