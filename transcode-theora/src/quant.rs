//! Quantizer tables.
//!
//! Theora headers describe quantization as a handful of 8x8 base matrices
//! attached to quality-index ranges, plus per-qi DC and AC scale factors.
//! [`QuantTables::build`] expands that description into one 64-entry matrix
//! for every (frame type, plane, qi) triple. Every entry carries two extra
//! bits of fixed-point headroom for the forward transform.

use crate::bitpack::{ilog, BitPacker, BitUnpacker};
use crate::error::{Result, TheoraError};
use crate::{CodingMode, FrameType, Plane, QI_COUNT, ZIGZAG};
use tracing::debug;

/// Largest dequantization value.
pub const QUANT_MAX: u16 = 4096;

/// Minimum DC quantizer, indexed by quantizer type (0 = intra, 1 = inter).
pub const DC_QUANT_MIN: [u16; 2] = [32, 16];

/// Minimum AC quantizer, indexed by quantizer type (0 = intra, 1 = inter).
pub const AC_QUANT_MIN: [u16; 2] = [16, 8];

/// An 8x8 base matrix in natural (raster) order.
pub type BaseMatrix = [u8; 64];

/// VP3.1 AC scale factors.
pub const VP31_AC_SCALE: [u16; 64] = [
    500, 450, 400, 370, 340, 310, 285, 265, 245, 225, 210, 195, 185, 180, 170, 160, 150, 145, 135,
    130, 125, 115, 110, 107, 100, 96, 93, 89, 85, 82, 75, 74, 70, 68, 64, 60, 57, 56, 52, 50, 49,
    45, 44, 43, 40, 38, 37, 35, 33, 32, 30, 29, 28, 25, 24, 22, 21, 19, 18, 17, 15, 13, 12, 10,
];

/// VP3.1 DC scale factors.
pub const VP31_DC_SCALE: [u16; 64] = [
    220, 200, 190, 180, 170, 170, 160, 160, 150, 150, 140, 140, 130, 130, 120, 120, 110, 110, 100,
    100, 90, 90, 90, 80, 80, 80, 70, 70, 70, 60, 60, 60, 60, 50, 50, 50, 50, 40, 40, 40, 40, 40,
    30, 30, 30, 30, 30, 30, 30, 20, 20, 20, 20, 20, 20, 20, 20, 10, 10, 10, 10, 10, 10, 10,
];

/// VP3.1 loop filter limits.
pub const VP31_LOOP_FILTER_LIMITS: [u8; 64] = [
    30, 25, 20, 20, 15, 15, 14, 14, 13, 13, 12, 12, 11, 11, 10, 10, 9, 9, 8, 8, 7, 7, 7, 7, 6, 6,
    6, 6, 5, 5, 5, 5, 4, 4, 4, 4, 3, 3, 3, 3, 2, 2, 2, 2, 2, 2, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    0, 0, 0, 0, 0, 0, 0,
];

/// VP3 intra luma base matrix.
pub const VP3_QMAT_Y: BaseMatrix = [
    16, 11, 10, 16, 24, 40, 51, 61, 12, 12, 14, 19, 26, 58, 60, 55, 14, 13, 16, 24, 40, 57, 69,
    56, 14, 17, 22, 29, 51, 87, 80, 62, 18, 22, 37, 58, 68, 109, 103, 77, 24, 35, 55, 64, 81, 104,
    113, 92, 49, 64, 78, 87, 103, 121, 120, 101, 72, 92, 95, 98, 112, 100, 103, 99,
];

/// VP3 intra chroma base matrix.
pub const VP3_QMAT_C: BaseMatrix = [
    17, 18, 24, 47, 99, 99, 99, 99, 18, 21, 26, 66, 99, 99, 99, 99, 24, 26, 56, 99, 99, 99, 99,
    99, 47, 66, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
    99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99, 99,
];

/// VP3 inter base matrix (all planes).
pub const VP3_QMAT_INTER: BaseMatrix = [
    16, 16, 16, 20, 24, 28, 32, 40, 16, 16, 20, 24, 28, 32, 40, 48, 16, 20, 24, 28, 32, 40, 48,
    64, 20, 24, 28, 32, 40, 48, 64, 64, 24, 28, 32, 40, 48, 64, 64, 64, 28, 32, 40, 48, 64, 64, 64,
    96, 32, 40, 48, 64, 64, 64, 96, 128, 40, 48, 64, 64, 64, 96, 128, 128,
];

/// Quality-index ranges for one (frame type, plane) pair.
///
/// Range `i` covers `sizes[i]` consecutive quality indices and is bounded
/// by `base_matrices[i]` and `base_matrices[i + 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantRanges {
    /// Number of quality indices spanned by each range.
    pub sizes: Vec<u8>,
    /// Base matrices at the range boundaries.
    pub base_matrices: Vec<BaseMatrix>,
}

impl QuantRanges {
    /// A single range spanning all quality indices with a constant matrix.
    pub fn flat(matrix: BaseMatrix) -> Self {
        Self {
            sizes: vec![(QI_COUNT - 1) as u8],
            base_matrices: vec![matrix, matrix],
        }
    }

    /// Check that the ranges cover qi 0..=63 exactly.
    pub fn validate(&self) -> Result<()> {
        if self.sizes.is_empty() {
            return Err(TheoraError::quant("no quality-index ranges"));
        }
        if self.base_matrices.len() != self.sizes.len() + 1 {
            return Err(TheoraError::quant(format!(
                "{} ranges need {} base matrices, got {}",
                self.sizes.len(),
                self.sizes.len() + 1,
                self.base_matrices.len()
            )));
        }
        if self.sizes.iter().any(|&s| s == 0) {
            return Err(TheoraError::quant("empty quality-index range"));
        }
        let total: usize = self.sizes.iter().map(|&s| s as usize).sum();
        if total != QI_COUNT - 1 {
            return Err(TheoraError::quant(format!(
                "range sizes sum to {}, expected {}",
                total,
                QI_COUNT - 1
            )));
        }
        Ok(())
    }
}

/// Header-level quantizer configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantInfo {
    /// DC scale factor per quality index.
    pub dc_scale: [u16; 64],
    /// AC scale factor per quality index.
    pub ac_scale: [u16; 64],
    /// Loop filter limit per quality index.
    pub loop_filter_limits: [u8; 64],
    /// Ranges indexed by `[qti][plane]`.
    pub qi_ranges: [[QuantRanges; 3]; 2],
}

impl QuantInfo {
    /// The VP3.1 defaults used by streams that do not override them.
    pub fn vp3_default() -> Self {
        let intra_c = QuantRanges::flat(VP3_QMAT_C);
        let inter = QuantRanges::flat(VP3_QMAT_INTER);
        Self {
            dc_scale: VP31_DC_SCALE,
            ac_scale: VP31_AC_SCALE,
            loop_filter_limits: VP31_LOOP_FILTER_LIMITS,
            qi_ranges: [
                [QuantRanges::flat(VP3_QMAT_Y), intra_c.clone(), intra_c],
                [inter.clone(), inter.clone(), inter],
            ],
        }
    }

    /// Validate every range table and the loop filter limits.
    pub fn validate(&self) -> Result<()> {
        for (qti, planes) in self.qi_ranges.iter().enumerate() {
            for (pli, ranges) in planes.iter().enumerate() {
                ranges.validate().map_err(|e| match e {
                    TheoraError::InvalidQuantInfo(msg) => {
                        TheoraError::quant(format!("qti {} plane {}: {}", qti, pli, msg))
                    }
                    other => other,
                })?;
            }
        }
        if let Some(qi) = self.loop_filter_limits.iter().position(|&l| l > 127) {
            return Err(TheoraError::quant(format!(
                "loop filter limit {} at qi {} exceeds 127",
                self.loop_filter_limits[qi], qi
            )));
        }
        Ok(())
    }
}

impl Default for QuantInfo {
    fn default() -> Self {
        Self::vp3_default()
    }
}

/// Dequantization factors in zig-zag order, ready for the inverse DCT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequantTable {
    /// Factor for each zig-zag index.
    pub coeffs: [u16; 64],
}

impl DequantTable {
    /// Reorder a natural-order matrix into zig-zag order.
    pub fn from_natural(natural: &[u16; 64]) -> Self {
        let mut coeffs = [0u16; 64];
        for (zz, c) in coeffs.iter_mut().enumerate() {
            *c = natural[ZIGZAG[zz]];
        }
        Self { coeffs }
    }

    /// The DC factor.
    #[inline]
    pub fn dc(&self) -> u16 {
        self.coeffs[0]
    }
}

/// Expanded quantizer matrices for every (qti, plane, qi).
#[derive(Debug, Clone)]
pub struct QuantTables {
    info: QuantInfo,
    /// Natural-order matrices, indexed `(qti * 3 + pli) * 64 + qi`.
    matrices: Vec<[u16; 64]>,
}

impl QuantTables {
    /// Expand header quantizer info into full tables.
    ///
    /// Malformed ranges are rejected here, before any table is handed out.
    pub fn build(info: &QuantInfo) -> Result<Self> {
        info.validate()?;

        let mut matrices = vec![[0u16; 64]; 2 * 3 * QI_COUNT];
        for qti in 0..2 {
            for pli in 0..3 {
                let ranges = &info.qi_ranges[qti][pli];
                let out = &mut matrices[(qti * 3 + pli) * QI_COUNT..][..QI_COUNT];
                expand_ranges(info, qti, ranges, out);
            }
        }

        debug!(
            ranges = info
                .qi_ranges
                .iter()
                .flatten()
                .map(|r| r.sizes.len())
                .sum::<usize>(),
            "Built quantizer tables"
        );

        Ok(Self {
            info: info.clone(),
            matrices,
        })
    }

    /// The header info these tables were built from.
    pub fn info(&self) -> &QuantInfo {
        &self.info
    }

    /// Natural-order matrix for `(qti, plane, qi)`.
    pub fn matrix(&self, qti: usize, plane: Plane, qi: u8) -> &[u16; 64] {
        &self.matrices[(qti * 3 + plane.index()) * QI_COUNT + (qi as usize).min(QI_COUNT - 1)]
    }

    /// Zig-zag dequantization table for `(qti, plane, qi)`.
    pub fn dequant(&self, qti: usize, plane: Plane, qi: u8) -> DequantTable {
        DequantTable::from_natural(self.matrix(qti, plane, qi))
    }

    /// All six zig-zag dequantization tables for one quality index.
    pub fn frame_dequant(&self, qi: u8) -> FrameDequant {
        let mut tables = [[DequantTable { coeffs: [0; 64] }; 3]; 2];
        for (qti, row) in tables.iter_mut().enumerate() {
            for (plane, table) in Plane::ALL.iter().zip(row.iter_mut()) {
                *table = self.dequant(qti, *plane, qi);
            }
        }
        FrameDequant { qi, tables }
    }

    /// Loop filter limit for a quality index.
    pub fn filter_limit(&self, qi: u8) -> u8 {
        self.info.loop_filter_limits[(qi as usize).min(QI_COUNT - 1)]
    }
}

/// Dequantization tables selected for one frame's quality index.
#[derive(Debug, Clone)]
pub struct FrameDequant {
    qi: u8,
    tables: [[DequantTable; 3]; 2],
}

impl FrameDequant {
    /// Quality index these tables belong to.
    pub fn qi(&self) -> u8 {
        self.qi
    }

    /// Table for a block, by frame type, plane and coding mode.
    ///
    /// Intra blocks use the intra tables even inside predicted frames.
    pub fn select(&self, frame_type: FrameType, plane: Plane, mode: CodingMode) -> &DequantTable {
        let qti = if frame_type == FrameType::Intra || mode.is_intra() {
            0
        } else {
            1
        };
        &self.tables[qti][plane.index()]
    }
}

fn expand_ranges(info: &QuantInfo, qti: usize, ranges: &QuantRanges, out: &mut [[u16; 64]]) {
    let nranges = ranges.sizes.len();
    let mut base = [0u32; 64];
    let mut qi = 0usize;

    for qri in 0..=nranges {
        for (b, &m) in base.iter_mut().zip(ranges.base_matrices[qri].iter()) {
            *b = m as u32;
        }
        let qi_start = qi;
        let qi_end = if qri == nranges {
            qi + 1
        } else {
            qi + ranges.sizes[qri] as usize
        };

        loop {
            out[qi] = scale_matrix(info, qti, qi, &base);
            qi += 1;
            if qi >= qi_end {
                break;
            }
            let size = ranges.sizes[qri] as u32;
            let lo = &ranges.base_matrices[qri];
            let hi = &ranges.base_matrices[qri + 1];
            let w_lo = (qi_end - qi) as u32;
            let w_hi = (qi - qi_start) as u32;
            for ci in 0..64 {
                base[ci] =
                    (2 * (w_lo * lo[ci] as u32 + w_hi * hi[ci] as u32) + size) / (2 * size);
            }
        }
    }
}

fn scale_matrix(info: &QuantInfo, qti: usize, qi: usize, base: &[u32; 64]) -> [u16; 64] {
    let mut m = [0u16; 64];
    let dc = (info.dc_scale[qi] as u32 * base[0] / 100) << 2;
    m[0] = dc.clamp(DC_QUANT_MIN[qti] as u32, QUANT_MAX as u32) as u16;
    let ac_scale = info.ac_scale[qi] as u32;
    for ci in 1..64 {
        let q = (ac_scale * base[ci] / 100) << 2;
        m[ci] = q.clamp(AC_QUANT_MIN[qti] as u32, QUANT_MAX as u32) as u16;
    }
    m
}

/// Serialize quantizer info into the compact header bit layout.
///
/// Identical base matrices are stored once. A range table equal to the
/// previous plane's (or, for inter tables, the intra table of the same
/// plane) is replaced by a one- or two-bit reuse flag.
pub fn write_qtables(info: &QuantInfo) -> Result<Vec<u8>> {
    info.validate()?;
    let mut w = BitPacker::new();

    let max_limit = info.loop_filter_limits.iter().copied().max().unwrap_or(0) as u32;
    let nbits = ilog(max_limit);
    w.write(nbits, 3);
    for &limit in &info.loop_filter_limits {
        w.write(limit as u32, nbits);
    }

    for scale in [&info.ac_scale, &info.dc_scale] {
        let max = scale.iter().copied().max().unwrap_or(0) as u32;
        let nbits = ilog(max).max(1);
        w.write(nbits - 1, 4);
        for &v in scale.iter() {
            w.write(v as u32, nbits);
        }
    }

    let mut unique: Vec<&BaseMatrix> = Vec::new();
    let mut indices: [[Vec<u32>; 3]; 2] = Default::default();
    for qti in 0..2 {
        for pli in 0..3 {
            for m in &info.qi_ranges[qti][pli].base_matrices {
                let idx = match unique.iter().position(|u| *u == m) {
                    Some(i) => i,
                    None => {
                        unique.push(m);
                        unique.len() - 1
                    }
                };
                indices[qti][pli].push(idx as u32);
            }
        }
    }
    if unique.len() > 512 {
        return Err(TheoraError::quant(format!(
            "{} distinct base matrices, at most 512 can be stored",
            unique.len()
        )));
    }
    w.write(unique.len() as u32 - 1, 9);
    for m in &unique {
        for &v in m.iter() {
            w.write(v as u32, 8);
        }
    }

    let nbits = ilog(unique.len() as u32 - 1);
    for i in 0..6 {
        let qti = i / 3;
        let pli = i % 3;
        let ranges = &info.qi_ranges[qti][pli];
        if i > 0 {
            if qti > 0 && *ranges == info.qi_ranges[qti - 1][pli] {
                w.write(1, 2);
                continue;
            }
            let prev = &info.qi_ranges[(i - 1) / 3][(i - 1) % 3];
            if ranges == prev {
                w.write(0, 1 + (qti > 0) as u32);
                continue;
            }
            w.write(1, 1);
        }

        let idx = &indices[qti][pli];
        w.write(idx[0], nbits);
        let mut qi = 0u32;
        for (qri, &size) in ranges.sizes.iter().enumerate() {
            w.write(size as u32 - 1, ilog(62 - qi));
            qi += size as u32;
            w.write(idx[qri + 1], nbits);
        }
    }

    Ok(w.into_bytes())
}

/// Parse quantizer info written by [`write_qtables`].
pub fn read_qtables(data: &[u8]) -> Result<QuantInfo> {
    let mut r = BitUnpacker::new(data);

    let nbits = r.read(3)?;
    let mut loop_filter_limits = [0u8; 64];
    for limit in loop_filter_limits.iter_mut() {
        *limit = r.read(nbits)? as u8;
    }

    let mut scales = [[0u16; 64]; 2];
    for scale in scales.iter_mut() {
        let nbits = r.read(4)? + 1;
        for v in scale.iter_mut() {
            *v = r.read(nbits)? as u16;
        }
    }
    let [ac_scale, dc_scale] = scales;

    let nmats = r.read(9)? as usize + 1;
    let mut mats = Vec::with_capacity(nmats);
    for _ in 0..nmats {
        let mut m = [0u8; 64];
        for v in m.iter_mut() {
            *v = r.read(8)? as u8;
        }
        mats.push(m);
    }

    let nbits = ilog(nmats as u32 - 1);
    let read_index = |r: &mut BitUnpacker<'_>| -> Result<BaseMatrix> {
        let idx = r.read(nbits)? as usize;
        mats.get(idx).copied().ok_or_else(|| {
            TheoraError::BitstreamError(format!(
                "base matrix index {} out of range ({} matrices)",
                idx, nmats
            ))
        })
    };

    let mut sets: Vec<QuantRanges> = Vec::with_capacity(6);
    for i in 0..6 {
        let qti = i / 3;
        let pli = i % 3;
        if i > 0 && !r.read_flag()? {
            let src = if qti > 0 && r.read_flag()? {
                (qti - 1) * 3 + pli
            } else {
                i - 1
            };
            let copy = sets[src].clone();
            sets.push(copy);
            continue;
        }

        let mut sizes = Vec::new();
        let mut base_matrices = vec![read_index(&mut r)?];
        let mut qi = 0u32;
        while qi < 63 {
            let size = r.read(ilog(62 - qi))? + 1;
            qi += size;
            sizes.push(size as u8);
            base_matrices.push(read_index(&mut r)?);
        }
        if qi > 63 {
            return Err(TheoraError::BitstreamError(format!(
                "quantizer ranges cover {} indices",
                qi + 1
            )));
        }
        sets.push(QuantRanges {
            sizes,
            base_matrices,
        });
    }

    let mut it = sets.into_iter();
    let mut next = || {
        it.next()
            .ok_or_else(|| TheoraError::BitstreamError("missing range table".into()))
    };
    let qi_ranges = [
        [next()?, next()?, next()?],
        [next()?, next()?, next()?],
    ];

    let info = QuantInfo {
        dc_scale,
        ac_scale,
        loop_filter_limits,
        qi_ranges,
    };
    info.validate()?;
    Ok(info)
}
