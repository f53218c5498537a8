//! DCT coefficient tokens.
//!
//! Coefficients of a block are coded in zig-zag order as a sequence of
//! tokens drawn from the 32-entry VP3 alphabet. Each token carries a small
//! number of extra bits holding run lengths, magnitudes and signs.
//!
//! | ids   | meaning                                   | extra bits |
//! |-------|-------------------------------------------|------------|
//! | 0-6   | end of block, optionally for a run of blocks | 0,0,0,2,3,4,12 |
//! | 7-8   | run of zeros (short / long)               | 3, 6       |
//! | 9-12  | +1, -1, +2, -2                            | 0          |
//! | 13-16 | +-3 .. +-6                                | 1          |
//! | 17-22 | magnitude categories from 7 to 580        | 2-10       |
//! | 23-31 | zeros followed by a small value           | 1-4        |

use crate::error::{Result, TheoraError};

/// End of block.
pub const DCT_EOB: u8 = 0;
/// End of block for this and the next block.
pub const DCT_EOB_PAIR: u8 = 1;
/// End of block for this and the next two blocks.
pub const DCT_EOB_TRIPLE: u8 = 2;
/// End-of-block run of 4 to 7 blocks.
pub const DCT_REPEAT_RUN: u8 = 3;
/// End-of-block run of 8 to 15 blocks.
pub const DCT_REPEAT_RUN2: u8 = 4;
/// End-of-block run of 16 to 31 blocks.
pub const DCT_REPEAT_RUN3: u8 = 5;
/// End-of-block run of up to 4095 blocks.
pub const DCT_REPEAT_RUN4: u8 = 6;
/// Run of 1 to 8 zeros.
pub const DCT_SHORT_ZRL: u8 = 7;
/// Run of 1 to 64 zeros.
pub const DCT_ZRL: u8 = 8;
/// Value +1.
pub const ONE: u8 = 9;
/// Value -1.
pub const MINUS_ONE: u8 = 10;
/// Value +2.
pub const TWO: u8 = 11;
/// Value -2.
pub const MINUS_TWO: u8 = 12;
/// First of the +-3..+-6 tokens.
pub const DCT_VAL_CAT2: u8 = 13;
/// First magnitude category token.
pub const DCT_VAL_CAT3: u8 = 17;
/// Last magnitude category token.
pub const DCT_VAL_CAT8: u8 = 22;
/// First of the zeros-then-+-1 tokens (run of one zero).
pub const DCT_RUN_CAT1: u8 = 23;
/// Zeros-then-+-1 with a run of 6 to 9.
pub const DCT_RUN_CAT1B: u8 = 28;
/// Zeros-then-+-1 with a run of 10 to 17.
pub const DCT_RUN_CAT1C: u8 = 29;
/// One zero then +-2 or +-3.
pub const DCT_RUN_CAT2: u8 = 30;
/// Two or three zeros then +-2 or +-3.
pub const DCT_RUN_CAT2B: u8 = 31;

/// Number of token ids.
pub const NUM_TOKENS: usize = 32;

/// Largest magnitude a single token can carry.
pub const MAX_TOKEN_VALUE: i32 = 580;

/// Extra bits carried by each token id.
pub const EXTRA_BITS: [u8; NUM_TOKENS] = [
    0, 0, 0, 2, 3, 4, 12, 3, 6, 0, 0, 0, 0, 1, 1, 1, 1, 2, 3, 4, 5, 6, 10, 1, 1, 1, 1, 1, 3, 4, 2,
    3,
];

/// Smallest magnitude in each of the categories 17..=22.
const CAT_MIN: [i32; 6] = [7, 9, 13, 21, 37, 69];

/// Largest end-of-block run a single token can express.
pub const MAX_EOB_RUN: u32 = 4095;

const EOB_TOKEN: Token = Token { id: DCT_EOB, extra: 0 };

/// A token id and its extra-bits payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Token id, 0..32.
    pub id: u8,
    /// Extra bits, right aligned.
    pub extra: u16,
}

/// Decoded meaning of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// The current block ends here, as do the next `blocks - 1` blocks.
    EndOfBlock {
        /// Number of blocks ended, at least 1 except for a zero-length run4.
        blocks: u32,
    },
    /// A run of zero coefficients.
    ZeroRun {
        /// Number of zeros.
        run: usize,
    },
    /// A single nonzero coefficient.
    Value {
        /// Coefficient value.
        value: i32,
    },
    /// A run of zeros followed by a nonzero coefficient.
    RunValue {
        /// Number of zeros.
        run: usize,
        /// Coefficient value after the zeros.
        value: i32,
    },
}

#[inline]
fn signed(magnitude: i32, negative: bool) -> i32 {
    if negative {
        -magnitude
    } else {
        magnitude
    }
}

impl Token {
    /// Create a token, checking the id and payload width.
    pub fn new(id: u8, extra: u16) -> Result<Self> {
        let token = Self { id, extra };
        token.check()?;
        Ok(token)
    }

    fn check(&self) -> Result<()> {
        let bits = *EXTRA_BITS
            .get(self.id as usize)
            .ok_or(TheoraError::InvalidToken {
                token: self.id,
                extra: self.extra,
            })?;
        if (self.extra as u32) >> bits != 0 {
            return Err(TheoraError::InvalidToken {
                token: self.id,
                extra: self.extra,
            });
        }
        Ok(())
    }

    /// Number of extra bits this token carries.
    pub fn extra_bits(&self) -> u8 {
        EXTRA_BITS.get(self.id as usize).copied().unwrap_or(0)
    }

    /// Decode the run and value this token stands for.
    pub fn kind(&self) -> Result<TokenKind> {
        self.check()?;
        let e = self.extra as i32;
        let kind = match self.id {
            DCT_EOB => TokenKind::EndOfBlock { blocks: 1 },
            DCT_EOB_PAIR => TokenKind::EndOfBlock { blocks: 2 },
            DCT_EOB_TRIPLE => TokenKind::EndOfBlock { blocks: 3 },
            DCT_REPEAT_RUN => TokenKind::EndOfBlock {
                blocks: self.extra as u32 + 4,
            },
            DCT_REPEAT_RUN2 => TokenKind::EndOfBlock {
                blocks: self.extra as u32 + 8,
            },
            DCT_REPEAT_RUN3 => TokenKind::EndOfBlock {
                blocks: self.extra as u32 + 16,
            },
            DCT_REPEAT_RUN4 => TokenKind::EndOfBlock {
                blocks: self.extra as u32,
            },
            DCT_SHORT_ZRL | DCT_ZRL => TokenKind::ZeroRun {
                run: self.extra as usize + 1,
            },
            ONE => TokenKind::Value { value: 1 },
            MINUS_ONE => TokenKind::Value { value: -1 },
            TWO => TokenKind::Value { value: 2 },
            MINUS_TWO => TokenKind::Value { value: -2 },
            13..=16 => TokenKind::Value {
                value: signed(3 + (self.id - DCT_VAL_CAT2) as i32, e != 0),
            },
            DCT_VAL_CAT3..=DCT_VAL_CAT8 => {
                let cat = (self.id - DCT_VAL_CAT3) as usize;
                let bits = EXTRA_BITS[self.id as usize] - 1;
                let mag = CAT_MIN[cat] + (e & ((1 << bits) - 1));
                TokenKind::Value {
                    value: signed(mag, e >> bits != 0),
                }
            }
            23..=27 => TokenKind::RunValue {
                run: (self.id - DCT_RUN_CAT1 + 1) as usize,
                value: signed(1, e != 0),
            },
            DCT_RUN_CAT1B => TokenKind::RunValue {
                run: 6 + (e & 3) as usize,
                value: signed(1, e & 4 != 0),
            },
            DCT_RUN_CAT1C => TokenKind::RunValue {
                run: 10 + (e & 7) as usize,
                value: signed(1, e & 8 != 0),
            },
            DCT_RUN_CAT2 => TokenKind::RunValue {
                run: 1,
                value: signed(2 + (e & 1), e & 2 != 0),
            },
            DCT_RUN_CAT2B => TokenKind::RunValue {
                run: 2 + (e & 1) as usize,
                value: signed(2 + ((e >> 1) & 1), e & 4 != 0),
            },
            _ => {
                return Err(TheoraError::InvalidToken {
                    token: self.id,
                    extra: self.extra,
                })
            }
        };
        Ok(kind)
    }
}

/// Token for a lone nonzero value.
pub fn value_token(index: usize, value: i32) -> Result<Token> {
    let mag = value.abs();
    let neg = value < 0;
    let sign = neg as u16;
    let token = match mag {
        1 => Token {
            id: if neg { MINUS_ONE } else { ONE },
            extra: 0,
        },
        2 => Token {
            id: if neg { MINUS_TWO } else { TWO },
            extra: 0,
        },
        3..=6 => Token {
            id: DCT_VAL_CAT2 + (mag - 3) as u8,
            extra: sign,
        },
        7..=MAX_TOKEN_VALUE => {
            let cat = CAT_MIN.iter().rposition(|&m| mag >= m).unwrap_or(0);
            let id = DCT_VAL_CAT3 + cat as u8;
            let bits = EXTRA_BITS[id as usize] - 1;
            Token {
                id,
                extra: (sign << bits) | (mag - CAT_MIN[cat]) as u16,
            }
        }
        _ => return Err(TheoraError::CoefficientOutOfRange { index, value }),
    };
    Ok(token)
}

/// Composite zeros-then-value token, if one exists for this pair.
fn run_value_token(run: usize, value: i32) -> Option<Token> {
    let mag = value.abs();
    let sign = (value < 0) as u16;
    match (run, mag) {
        (1..=5, 1) => Some(Token {
            id: DCT_RUN_CAT1 + (run - 1) as u8,
            extra: sign,
        }),
        (6..=9, 1) => Some(Token {
            id: DCT_RUN_CAT1B,
            extra: (sign << 2) | (run - 6) as u16,
        }),
        (10..=17, 1) => Some(Token {
            id: DCT_RUN_CAT1C,
            extra: (sign << 3) | (run - 10) as u16,
        }),
        (1, 2..=3) => Some(Token {
            id: DCT_RUN_CAT2,
            extra: (sign << 1) | (mag - 2) as u16,
        }),
        (2..=3, 2..=3) => Some(Token {
            id: DCT_RUN_CAT2B,
            extra: (sign << 2) | (((mag - 2) as u16) << 1) | (run - 2) as u16,
        }),
        _ => None,
    }
}

/// Token ending a run of `blocks` consecutive blocks.
pub fn eob_run_token(blocks: u32) -> Result<Token> {
    let token = match blocks {
        1 => Token { id: DCT_EOB, extra: 0 },
        2 => Token {
            id: DCT_EOB_PAIR,
            extra: 0,
        },
        3 => Token {
            id: DCT_EOB_TRIPLE,
            extra: 0,
        },
        4..=7 => Token {
            id: DCT_REPEAT_RUN,
            extra: (blocks - 4) as u16,
        },
        8..=15 => Token {
            id: DCT_REPEAT_RUN2,
            extra: (blocks - 8) as u16,
        },
        16..=31 => Token {
            id: DCT_REPEAT_RUN3,
            extra: (blocks - 16) as u16,
        },
        32..=MAX_EOB_RUN => Token {
            id: DCT_REPEAT_RUN4,
            extra: blocks as u16,
        },
        _ => {
            return Err(TheoraError::config(format!(
                "end-of-block run {} not representable",
                blocks
            )))
        }
    };
    Ok(token)
}

/// Convert zig-zag ordered coefficients into tokens.
///
/// Short zero runs are folded into the following value where a composite
/// token exists; longer runs get their own zero-run token. A zero tail
/// becomes a single end-of-block token.
pub fn tokenize_block(coeffs: &[i16; 64]) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut run = 0usize;

    for (index, &c) in coeffs.iter().enumerate() {
        if c == 0 {
            run += 1;
            continue;
        }
        let value = c as i32;
        if value.abs() > MAX_TOKEN_VALUE {
            return Err(TheoraError::CoefficientOutOfRange { index, value });
        }
        if run > 0 {
            if let Some(token) = run_value_token(run, value) {
                tokens.push(token);
                run = 0;
                continue;
            }
            let id = if run <= 8 { DCT_SHORT_ZRL } else { DCT_ZRL };
            tokens.push(Token {
                id,
                extra: (run - 1) as u16,
            });
            run = 0;
        }
        tokens.push(value_token(index, value)?);
    }

    if run > 0 {
        tokens.push(EOB_TOKEN);
    }
    Ok(tokens)
}

/// Write position inside a block being rebuilt from tokens.
#[derive(Debug, Clone)]
pub struct CoeffCursor {
    /// Coefficients in zig-zag order.
    pub coeffs: [i16; 64],
    /// Next zig-zag index to be written.
    pub index: usize,
    /// Whether an end-of-block token has been applied.
    pub ended: bool,
}

impl CoeffCursor {
    /// Cursor at the start of an empty block.
    pub fn new() -> Self {
        Self {
            coeffs: [0; 64],
            index: 0,
            ended: false,
        }
    }

    /// Whether no further tokens belong to this block.
    pub fn is_complete(&self) -> bool {
        self.ended || self.index >= 64
    }
}

impl Default for CoeffCursor {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply one token to a block.
///
/// Returns the decoded token so callers can carry end-of-block runs over to
/// subsequent blocks. Writing past coefficient 63 is an error.
pub fn expand_token(cursor: &mut CoeffCursor, token: Token) -> Result<TokenKind> {
    let kind = token.kind()?;
    if cursor.ended {
        return Err(TheoraError::TokenOverrun {
            index: cursor.index,
            reason: "token after end of block",
        });
    }
    match kind {
        TokenKind::EndOfBlock { .. } => {
            cursor.ended = true;
        }
        TokenKind::ZeroRun { run } => {
            if cursor.index + run > 64 {
                return Err(TheoraError::TokenOverrun {
                    index: cursor.index,
                    reason: "zero run",
                });
            }
            cursor.index += run;
        }
        TokenKind::Value { value } => {
            if cursor.index >= 64 {
                return Err(TheoraError::TokenOverrun {
                    index: cursor.index,
                    reason: "value",
                });
            }
            cursor.coeffs[cursor.index] = value as i16;
            cursor.index += 1;
        }
        TokenKind::RunValue { run, value } => {
            let pos = cursor.index + run;
            if pos >= 64 {
                return Err(TheoraError::TokenOverrun {
                    index: cursor.index,
                    reason: "run and value",
                });
            }
            cursor.coeffs[pos] = value as i16;
            cursor.index = pos + 1;
        }
    }
    Ok(kind)
}

/// Fold blocks that hold nothing but an end of block into runs.
///
/// `blocks` are the token lists of consecutive coded blocks. A block whose
/// last token is a plain end of block takes over the following blocks that
/// consist only of an end of block: its token becomes a run token and theirs
/// are emptied. [`expand_blocks`] undoes this.
pub fn merge_eob_runs(blocks: &mut [Vec<Token>]) -> Result<()> {
    let is_empty_block = |b: &Vec<Token>| b.len() == 1 && b[0] == EOB_TOKEN;
    let mut i = 0;
    while i < blocks.len() {
        if blocks[i].last() != Some(&EOB_TOKEN) {
            i += 1;
            continue;
        }
        let mut run = 1usize;
        while run < MAX_EOB_RUN as usize && blocks.get(i + run).is_some_and(is_empty_block) {
            run += 1;
        }
        if run > 1 {
            let token = eob_run_token(run as u32)?;
            if let Some(last) = blocks[i].last_mut() {
                *last = token;
            }
            for b in &mut blocks[i + 1..i + run] {
                b.clear();
            }
        }
        i += run;
    }
    Ok(())
}

/// Expand the token lists of consecutive coded blocks.
///
/// An end-of-block run ends the current block and the next `blocks - 1`
/// blocks, which must carry no tokens of their own. A run reaching past the
/// last block is an error.
pub fn expand_blocks(blocks: &[Vec<Token>]) -> Result<Vec<[i16; 64]>> {
    let mut out = Vec::with_capacity(blocks.len());
    let mut pending = 0u32;
    for tokens in blocks {
        let mut cursor = CoeffCursor::new();
        if pending > 0 {
            if !tokens.is_empty() {
                return Err(TheoraError::TokenOverrun {
                    index: 0,
                    reason: "tokens inside end-of-block run",
                });
            }
            pending -= 1;
            out.push(cursor.coeffs);
            continue;
        }
        for &token in tokens {
            if let TokenKind::EndOfBlock { blocks } = expand_token(&mut cursor, token)? {
                pending = blocks.saturating_sub(1);
            }
        }
        if !cursor.is_complete() {
            return Err(TheoraError::TokenOverrun {
                index: cursor.index,
                reason: "block ended without end of block",
            });
        }
        out.push(cursor.coeffs);
    }
    if pending > 0 {
        return Err(TheoraError::TokenOverrun {
            index: 64,
            reason: "end-of-block run past last block",
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(coeffs: &[i16; 64]) -> [i16; 64] {
        let tokens = tokenize_block(coeffs).unwrap();
        let mut cursor = CoeffCursor::new();
        for t in tokens {
            expand_token(&mut cursor, t).unwrap();
        }
        assert!(cursor.is_complete());
        cursor.coeffs
    }

    #[test]
    fn test_all_zero_block() {
        let tokens = tokenize_block(&[0; 64]).unwrap();
        assert_eq!(tokens, vec![Token { id: DCT_EOB, extra: 0 }]);
    }

    #[test]
    fn test_composite_tokens() {
        let mut c = [0i16; 64];
        c[0] = 5;
        c[3] = -1; // run 2, value -1
        c[7] = 3; // run 3, value 3
        let tokens = tokenize_block(&c).unwrap();
        assert_eq!(tokens[0], Token { id: 15, extra: 0 });
        assert_eq!(tokens[1], Token { id: 24, extra: 1 });
        assert_eq!(
            tokens[2],
            Token {
                id: DCT_RUN_CAT2B,
                extra: 0b011
            }
        );
        assert_eq!(tokens[3], Token { id: DCT_EOB, extra: 0 });
        assert_eq!(roundtrip(&c), c);
    }

    #[test]
    fn test_long_runs_use_zrl() {
        let mut c = [0i16; 64];
        c[5] = 4; // run 5, |v| 4: no composite
        c[30] = 1; // run 24 > 17
        c[63] = -200;
        let tokens = tokenize_block(&c).unwrap();
        assert_eq!(tokens[0], Token { id: DCT_SHORT_ZRL, extra: 4 });
        assert_eq!(tokens[1].id, 14);
        assert_eq!(tokens[2], Token { id: DCT_ZRL, extra: 23 });
        assert_eq!(tokens[3].id, ONE);
        assert_eq!(tokens[4], Token { id: DCT_ZRL, extra: 31 });
        assert_eq!(tokens.last().unwrap().id, DCT_VAL_CAT8);
        assert_eq!(roundtrip(&c), c);
    }

    #[test]
    fn test_value_categories() {
        for v in 1..=MAX_TOKEN_VALUE {
            for value in [v, -v] {
                let t = value_token(0, value).unwrap();
                assert!(t.extra >> t.extra_bits() == 0);
                assert_eq!(t.kind().unwrap(), TokenKind::Value { value });
            }
        }
        assert!(value_token(0, 581).is_err());
        assert!(value_token(0, 0).is_err());
    }

    #[test]
    fn test_coefficient_out_of_range() {
        let mut c = [0i16; 64];
        c[10] = 600;
        assert_eq!(
            tokenize_block(&c),
            Err(TheoraError::CoefficientOutOfRange {
                index: 10,
                value: 600
            })
        );
    }

    #[test]
    fn test_eob_runs() {
        for blocks in 1..=MAX_EOB_RUN {
            let t = eob_run_token(blocks).unwrap();
            assert_eq!(t.kind().unwrap(), TokenKind::EndOfBlock { blocks });
        }
        assert!(eob_run_token(0).is_err());
        assert!(eob_run_token(4096).is_err());
    }

    #[test]
    fn test_overrun_detected() {
        let mut cursor = CoeffCursor::new();
        expand_token(&mut cursor, Token { id: DCT_ZRL, extra: 62 }).unwrap();
        assert_eq!(cursor.index, 63);
        let err = expand_token(&mut cursor, Token { id: DCT_RUN_CAT1, extra: 0 }).unwrap_err();
        assert!(matches!(err, TheoraError::TokenOverrun { index: 63, .. }));

        let mut cursor = CoeffCursor::new();
        cursor.index = 60;
        assert!(expand_token(&mut cursor, Token { id: DCT_SHORT_ZRL, extra: 4 }).is_err());

        let mut cursor = CoeffCursor::new();
        expand_token(&mut cursor, Token { id: DCT_EOB, extra: 0 }).unwrap();
        assert!(expand_token(&mut cursor, Token { id: ONE, extra: 0 }).is_err());
    }

    #[test]
    fn test_invalid_tokens() {
        assert!(Token::new(32, 0).is_err());
        assert!(Token::new(ONE, 1).is_err());
        assert!(Token::new(DCT_VAL_CAT8, 1023).is_ok());
        assert!(Token::new(DCT_VAL_CAT8, 1024).is_err());
        let mut cursor = CoeffCursor::new();
        assert!(matches!(
            expand_token(&mut cursor, Token { id: 40, extra: 0 }),
            Err(TheoraError::InvalidToken { token: 40, .. })
        ));
    }

    fn dc_block(dc: i16) -> [i16; 64] {
        let mut c = [0i16; 64];
        c[0] = dc;
        c
    }

    #[test]
    fn test_merge_eob_runs() {
        let coeffs = [dc_block(4), [0; 64], [0; 64], [0; 64], dc_block(-1), [0; 64]];
        let mut blocks: Vec<Vec<Token>> = coeffs.iter().map(|c| tokenize_block(c).unwrap()).collect();
        merge_eob_runs(&mut blocks).unwrap();

        // the first block's end of block now covers the three empty ones
        assert_eq!(blocks[0].last(), Some(&eob_run_token(4).unwrap()));
        assert!(blocks[1..4].iter().all(|b| b.is_empty()));
        assert_eq!(blocks[4].last(), Some(&eob_run_token(2).unwrap()));
        assert!(blocks[5].is_empty());

        assert_eq!(expand_blocks(&blocks).unwrap(), coeffs.to_vec());
    }

    #[test]
    fn test_merge_leaves_full_blocks_alone() {
        let mut full = [1i16; 64];
        full[63] = 2;
        let mut blocks = vec![tokenize_block(&full).unwrap(), tokenize_block(&[0; 64]).unwrap()];
        let before = blocks.clone();
        merge_eob_runs(&mut blocks).unwrap();
        assert_eq!(blocks, before);
    }

    #[test]
    fn test_long_runs_split() {
        let n = MAX_EOB_RUN as usize + 10;
        let mut blocks = vec![vec![EOB_TOKEN]; n];
        merge_eob_runs(&mut blocks).unwrap();
        assert_eq!(blocks[0], vec![eob_run_token(MAX_EOB_RUN).unwrap()]);
        assert_eq!(blocks[MAX_EOB_RUN as usize], vec![eob_run_token(10).unwrap()]);
        assert_eq!(blocks.iter().filter(|b| !b.is_empty()).count(), 2);
        assert_eq!(expand_blocks(&blocks).unwrap().len(), n);
    }

    #[test]
    fn test_expand_blocks_errors() {
        let pair = eob_run_token(2).unwrap();
        // run covers a block that still has tokens
        let blocks = vec![vec![pair], vec![Token { id: ONE, extra: 0 }, EOB_TOKEN]];
        assert!(matches!(
            expand_blocks(&blocks),
            Err(TheoraError::TokenOverrun { index: 0, .. })
        ));
        // run past the last block
        assert!(matches!(
            expand_blocks(&[vec![pair]]),
            Err(TheoraError::TokenOverrun { index: 64, .. })
        ));
        // block never ended
        assert!(matches!(
            expand_blocks(&[vec![Token { id: ONE, extra: 0 }]]),
            Err(TheoraError::TokenOverrun { index: 1, .. })
        ));
    }
}
