#![no_main]

//! Fuzz target for Theora token expansion.
//!
//! Feeds arbitrary token sequences through the coefficient cursor and
//! checks that a block is never written past its last coefficient.

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use transcode_theora::{expand_token, CoeffCursor, Token};

#[derive(Arbitrary, Debug)]
struct TokenInput {
    tokens: Vec<(u8, u16)>,
}

fuzz_target!(|input: TokenInput| {
    if input.tokens.len() > 4096 {
        return;
    }

    let mut cursor = CoeffCursor::new();
    for (id, extra) in input.tokens {
        let Ok(token) = Token::new(id % 32, extra) else {
            continue;
        };
        let result = expand_token(&mut cursor, token);
        assert!(cursor.index <= 64);
        if result.is_err() || cursor.is_complete() {
            cursor = CoeffCursor::new();
        }
    }
});
