//! Forward quantization.
//!
//! A [`QuantizerSet`] holds the fixed-point reciprocal, rounding offset and
//! dead-zone width for every coefficient of one quantizer matrix. Sets are
//! built per frame from the selected quality index and handed explicitly to
//! [`quantize`].

use crate::error::{Result, TheoraError};
use crate::quant::QuantTables;
use crate::{CodingMode, FrameType, Plane, ZIGZAG_INDEX};

/// Largest quantized coefficient magnitude.
pub const MAX_QUANTIZED: i32 = 511;

/// Encoder sharpness preset.
///
/// Higher sharpness widens the dead zone and rounds less aggressively,
/// trading detail for fewer ringing artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sharpness {
    /// Narrow dead zone, near-nearest rounding.
    #[default]
    Sharp = 0,
    /// Moderate dead zone.
    Medium = 1,
    /// Wide dead zone, strong rounding toward zero.
    Soft = 2,
}

impl Sharpness {
    /// Zero-bin factor and rounding factor for an AC scale value.
    pub fn factors(self, ac_scale: u16) -> (f64, f64) {
        let fine = ac_scale <= 50;
        match self {
            Self::Sharp => (0.65, if fine { 0.499 } else { 0.46 }),
            Self::Medium => (0.75, if fine { 0.476 } else { 0.400 }),
            Self::Soft => (0.9, if fine { 0.476 } else { 0.333 }),
        }
    }
}

impl TryFrom<u8> for Sharpness {
    type Error = TheoraError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Sharp),
            1 => Ok(Self::Medium),
            2 => Ok(Self::Soft),
            _ => Err(TheoraError::config(format!("Invalid sharpness: {}", value))),
        }
    }
}

/// Fixed-point forward quantizer parameters for one matrix, in natural order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizerSet {
    /// Reciprocal of each quantizer step, scaled by 2^16.
    pub coeffs: [i32; 64],
    /// Rounding offset added before the multiply.
    pub round: [i32; 64],
    /// Dead-zone threshold.
    pub zero_bin: [i32; 64],
}

impl QuantizerSet {
    /// Derive a set from a natural-order quantizer matrix.
    pub fn new(matrix: &[u16; 64], sharpness: Sharpness, ac_scale: u16) -> Self {
        let (zbin_factor, round_factor) = sharpness.factors(ac_scale);
        let mut set = Self {
            coeffs: [0; 64],
            round: [0; 64],
            zero_bin: [0; 64],
        };
        for i in 0..64 {
            let q = matrix[i].max(1) as f64;
            set.coeffs[i] = (0.5 + 65536.0 / q) as i32;
            set.round[i] = (0.5 + q * round_factor) as i32;
            set.zero_bin[i] = (0.5 + q * zbin_factor) as i32;
        }
        set
    }
}

/// The six quantizer sets for one frame's quality index.
#[derive(Debug, Clone)]
pub struct FrameQuantizers {
    sets: [[QuantizerSet; 3]; 2],
}

impl FrameQuantizers {
    /// Build all sets for a quality index.
    pub fn new(tables: &QuantTables, qi: u8, sharpness: Sharpness) -> Self {
        let ac_scale = tables.info().ac_scale[(qi as usize).min(63)];
        let build = |qti: usize, plane: Plane| {
            QuantizerSet::new(tables.matrix(qti, plane, qi), sharpness, ac_scale)
        };
        Self {
            sets: [
                [build(0, Plane::Y), build(0, Plane::U), build(0, Plane::V)],
                [build(1, Plane::Y), build(1, Plane::U), build(1, Plane::V)],
            ],
        }
    }

    /// Set for a block, chosen the same way as the dequantization table.
    pub fn select(&self, frame_type: FrameType, plane: Plane, mode: CodingMode) -> &QuantizerSet {
        let qti = if frame_type == FrameType::Intra || mode.is_intra() {
            0
        } else {
            1
        };
        &self.sets[qti][plane.index()]
    }
}

/// Quantize a natural-order DCT block into zig-zag order.
pub fn quantize(dct: &[i16; 64], set: &QuantizerSet) -> [i16; 64] {
    let mut out = [0i16; 64];
    for i in 0..64 {
        let val = dct[i] as i32;
        let zbin = set.zero_bin[i];
        let q = if val >= zbin {
            ((set.coeffs[i] * (val + set.round[i])) >> 16).min(MAX_QUANTIZED)
        } else if val <= -zbin {
            ((set.coeffs[i] * (val - set.round[i]) + 65535) >> 16).max(-MAX_QUANTIZED)
        } else {
            continue;
        };
        out[ZIGZAG_INDEX[i]] = q as i16;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quant::QuantInfo;

    fn flat_set(q: u16, sharpness: Sharpness) -> QuantizerSet {
        QuantizerSet::new(&[q; 64], sharpness, 100)
    }

    #[test]
    fn test_sharpness_from_u8() {
        assert_eq!(Sharpness::try_from(1u8).unwrap(), Sharpness::Medium);
        assert!(Sharpness::try_from(3u8).is_err());
    }

    #[test]
    fn test_set_parameters() {
        let set = flat_set(64, Sharpness::Sharp);
        assert_eq!(set.coeffs[0], 1024);
        // 64 * 0.46 = 29.44
        assert_eq!(set.round[0], 29);
        // 64 * 0.65 = 41.6
        assert_eq!(set.zero_bin[0], 42);

        let fine = QuantizerSet::new(&[64; 64], Sharpness::Sharp, 50);
        assert_eq!(fine.round[0], 32);
    }

    #[test]
    fn test_dead_zone() {
        let set = flat_set(64, Sharpness::Soft);
        let mut dct = [0i16; 64];
        dct[0] = 57;
        dct[1] = -57;
        let q = quantize(&dct, &set);
        assert!(q.iter().all(|&c| c == 0));

        dct[0] = 58;
        dct[1] = -58;
        let q = quantize(&dct, &set);
        assert_eq!(q[0], 1);
        assert_eq!(q[1], -1);
    }

    #[test]
    fn test_symmetric_rounding() {
        let set = flat_set(16, Sharpness::Sharp);
        let mut dct = [0i16; 64];
        for (i, v) in [100i16, 200, 333, 1000].iter().enumerate() {
            dct[crate::ZIGZAG[i]] = *v;
            dct[crate::ZIGZAG[i + 4]] = -*v;
        }
        let q = quantize(&dct, &set);
        for i in 0..4 {
            assert_eq!(q[i], -q[i + 4], "asymmetric at {}", i);
            assert!(q[i] > 0);
        }
    }

    #[test]
    fn test_clamp_and_zigzag_placement() {
        let set = flat_set(8, Sharpness::Sharp);
        let mut dct = [0i16; 64];
        dct[8] = 32000;
        dct[63] = -32000;
        let q = quantize(&dct, &set);
        // raster 8 is zig-zag index 2
        assert_eq!(q[2], 511);
        assert_eq!(q[63], -511);
    }

    #[test]
    fn test_frame_quantizers_select() {
        let tables = QuantTables::build(&QuantInfo::vp3_default()).unwrap();
        let fq = FrameQuantizers::new(&tables, 10, Sharpness::Medium);
        let intra = fq.select(FrameType::Intra, Plane::Y, CodingMode::InterNoMv);
        let expected = QuantizerSet::new(
            tables.matrix(0, Plane::Y, 10),
            Sharpness::Medium,
            tables.info().ac_scale[10],
        );
        assert_eq!(*intra, expected);
        let inter = fq.select(FrameType::Predicted, Plane::V, CodingMode::InterMv);
        assert_ne!(inter, intra);
    }
}
