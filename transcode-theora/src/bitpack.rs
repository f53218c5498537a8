//! MSB-first bit packing for Theora header fields.
//!
//! Theora headers are written most-significant bit first, a byte at a time.
//! Only the quantizer table header uses this here; frame-level entropy
//! coding lives outside this crate.

use crate::error::{Result, TheoraError};

/// Number of bits needed to represent `v` (0 for 0).
#[inline]
pub fn ilog(v: u32) -> u32 {
    32 - v.leading_zeros()
}

/// Bit writer producing a big-endian packed byte vector.
#[derive(Debug, Clone, Default)]
pub struct BitPacker {
    data: Vec<u8>,
    bit_pos: u8,
}

impl BitPacker {
    /// Create an empty packer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of bits written.
    pub fn bit_len(&self) -> usize {
        if self.bit_pos == 0 {
            self.data.len() * 8
        } else {
            (self.data.len() - 1) * 8 + self.bit_pos as usize
        }
    }

    /// Write the low `n` bits of `value`, most significant first.
    pub fn write(&mut self, value: u32, n: u32) {
        debug_assert!(n <= 32);
        for i in (0..n).rev() {
            if self.bit_pos == 0 {
                self.data.push(0);
            }
            if (value >> i) & 1 != 0 {
                if let Some(last) = self.data.last_mut() {
                    *last |= 0x80 >> self.bit_pos;
                }
            }
            self.bit_pos = (self.bit_pos + 1) & 7;
        }
    }

    /// Finish packing; the final partial byte is zero padded.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

/// Bit reader over a big-endian packed byte slice.
#[derive(Debug, Clone)]
pub struct BitUnpacker<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitUnpacker<'a> {
    /// Create a reader positioned at the first bit of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current position in bits.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bits left before the end of the buffer.
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.pos)
    }

    /// Read `n` bits (at most 32) as an unsigned value.
    pub fn read(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(TheoraError::BitstreamError(format!(
                "cannot read {} bits at once",
                n
            )));
        }
        if self.remaining_bits() < n as usize {
            return Err(TheoraError::BitstreamError(format!(
                "unexpected end of data at bit {}",
                self.pos
            )));
        }
        let mut value = 0u32;
        for _ in 0..n {
            let byte = self.data[self.pos >> 3];
            let bit = (byte >> (7 - (self.pos & 7))) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Ok(value)
    }

    /// Read a single flag bit.
    pub fn read_flag(&mut self) -> Result<bool> {
        self.read(1).map(|b| b != 0)
    }
}
