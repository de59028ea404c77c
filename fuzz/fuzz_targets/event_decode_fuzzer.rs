//! Fuzz target for channel event decoding
//!
//! # Strategy
//!
//! - Random bytes under every known event name, and under garbage names
//! - Deeply nested CBOR arrays and maps
//! - CBOR headers claiming huge lengths
//! - Valid payloads re-tagged with the wrong event name
//!
//! # Invariants
//!
//! - Decoding NEVER panics
//! - Anything that decodes re-encodes, and decodes again to the same event

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_proto::{ChannelFrame, EventName, OutboundEvent, PushEvent};

#[derive(Debug, Clone, Arbitrary)]
enum Input {
    Raw { name: NameChoice, payload: Vec<u8> },
    Nested { name: NameChoice, depth: u8, map: bool },
    HugeLength { name: NameChoice, major: u8, exponent: u8 },
}

#[derive(Debug, Clone, Arbitrary)]
enum NameChoice {
    Known(u8),
    Other(String),
}

impl NameChoice {
    fn resolve(&self) -> String {
        match self {
            Self::Known(index) => EventName::ALL[usize::from(*index) % EventName::ALL.len()].as_str().to_owned(),
            Self::Other(name) => name.clone(),
        }
    }
}

fn nested(depth: usize, map: bool) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(depth * 2 + 1);
    for _ in 0..depth {
        if map {
            // Map of one entry keyed by the empty string
            bytes.extend_from_slice(&[0xA1, 0x60]);
        } else {
            bytes.push(0x81);
        }
    }
    bytes.push(0xF6);
    bytes
}

fn huge_length(major: u8, exponent: u8) -> Vec<u8> {
    // Byte string, text string, array or map with an 8-byte length
    let major = [0x5B, 0x7B, 0x9B, 0xBB][usize::from(major) % 4];
    let claimed = 1u64 << (exponent % 64);
    let mut bytes = vec![major];
    bytes.extend_from_slice(&claimed.to_be_bytes());
    bytes
}

fn check(frame: &ChannelFrame) {
    if let Ok(event) = PushEvent::decode(frame) {
        let encoded = event.encode().expect("decoded push event must re-encode");
        assert_eq!(PushEvent::decode(&encoded).ok(), Some(event));
    }
    if let Ok(event) = OutboundEvent::decode(frame) {
        let encoded = event.encode().expect("decoded outbound event must re-encode");
        assert_eq!(OutboundEvent::decode(&encoded).ok(), Some(event));
    }
}

fuzz_target!(|input: Input| {
    let frame = match input {
        Input::Raw { name, payload } => ChannelFrame::new(name.resolve(), payload),
        Input::Nested { name, depth, map } => ChannelFrame::new(name.resolve(), nested(usize::from(depth), map)),
        Input::HugeLength { name, major, exponent } => {
            ChannelFrame::new(name.resolve(), huge_length(major, exponent))
        },
    };
    check(&frame);
});
