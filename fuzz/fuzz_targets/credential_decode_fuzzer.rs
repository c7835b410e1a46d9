//! Fuzz target for credential inspection
//!
//! # Strategy
//!
//! - Raw: arbitrary strings fed straight to the decoder
//! - Framed: arbitrary bytes base64url-encoded into the payload segment, so
//!   the JSON parser and the identity lookup see hostile input too
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A successful inspection always yields a non-empty identity

#![no_main]

use arbitrary::Arbitrary;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use carelink_core::credential;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum Input {
    Raw(String),
    Framed { header: String, payload: Vec<u8>, signature: String },
}

fuzz_target!(|input: Input| {
    let token = match input {
        Input::Raw(token) => token,
        Input::Framed { header, payload, signature } => {
            format!("{header}.{}.{signature}", URL_SAFE_NO_PAD.encode(payload))
        },
    };

    let _ = credential::decode_payload(&token);
    if let Ok(claims) = credential::inspect(&token) {
        assert!(!claims.identity.is_empty(), "accepted credential without identity");
    }
});
