//! Transform and pixel kernels behind a runtime-selected backend.
//!
//! Everything that runs once per block per frame goes through the
//! [`Transforms`] trait. [`GenericTransforms`] is the portable
//! implementation; [`select_transforms`] picks a backend once from the
//! detected CPU capabilities.

use crate::fdct;
use crate::idct;
use crate::loop_filter::{self, BoundingValues};
use crate::quant::DequantTable;
use std::fmt;
use tracing::debug;

/// Block-level kernels used by reconstruction, the loop filter and the encoder.
///
/// Pixel kernels address 8x8 blocks inside larger plane buffers by offset and
/// stride. Residuals and predictions are natural-order 8x8 arrays.
pub trait Transforms: Send + Sync + fmt::Debug {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// DC-only inverse transform.
    fn idct1(&self, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64];

    /// Inverse transform for zig-zag support 0..3.
    fn idct3(&self, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64];

    /// Inverse transform for zig-zag support 0..10.
    fn idct10(&self, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64];

    /// Full inverse transform.
    fn idct_slow(&self, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64];

    /// Inverse transform selected by end-of-block position.
    fn idct(&self, eob: usize, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
        match eob {
            0 | 1 => self.idct1(coeffs, dq),
            2 | 3 => self.idct3(coeffs, dq),
            4..=10 => self.idct10(coeffs, dq),
            _ => self.idct_slow(coeffs, dq),
        }
    }

    /// Forward transform.
    fn fdct(&self, input: &[i16; 64]) -> [i16; 64];

    /// Loop filter across the vertical edge left of `pos`.
    fn filter_vertical_edge(&self, pix: &mut [u8], pos: usize, stride: usize, bv: &BoundingValues);

    /// Loop filter across the horizontal edge above `pos`.
    fn filter_horizontal_edge(
        &self,
        pix: &mut [u8],
        pos: usize,
        stride: usize,
        bv: &BoundingValues,
    );

    /// Write `residual + 128`, clamped.
    fn recon_intra(&self, dst: &mut [u8], pos: usize, stride: usize, residual: &[i16; 64]);

    /// Write `reference + residual`, clamped.
    fn recon_inter(
        &self,
        dst: &mut [u8],
        pos: usize,
        reference: &[u8],
        ref_pos: usize,
        stride: usize,
        residual: &[i16; 64],
    );

    /// Write the average of two reference blocks plus the residual, clamped.
    fn recon_inter2(
        &self,
        dst: &mut [u8],
        pos: usize,
        reference: &[u8],
        ref_pos1: usize,
        ref_pos2: usize,
        stride: usize,
        residual: &[i16; 64],
    );

    /// Copy an 8x8 block between equally laid out buffers.
    fn copy_block(&self, dst: &mut [u8], src: &[u8], pos: usize, stride: usize);

    /// Source block minus 128.
    fn sub_intra(&self, src: &[u8], pos: usize, stride: usize) -> [i16; 64];

    /// Source block minus a prediction block.
    fn sub_predicted(
        &self,
        src: &[u8],
        pos: usize,
        stride: usize,
        prediction: &[u8; 64],
    ) -> [i16; 64];

    /// Prediction block from one or two reference positions.
    fn predict(
        &self,
        reference: &[u8],
        ref_pos1: usize,
        ref_pos2: Option<usize>,
        stride: usize,
    ) -> [u8; 64];
}

/// Portable scalar kernels.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericTransforms;

#[inline(always)]
fn clamp255(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

impl Transforms for GenericTransforms {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn idct1(&self, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
        idct::idct1(coeffs, dq)
    }

    fn idct3(&self, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
        idct::idct3(coeffs, dq)
    }

    fn idct10(&self, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
        idct::idct10(coeffs, dq)
    }

    fn idct_slow(&self, coeffs: &[i16; 64], dq: &DequantTable) -> [i16; 64] {
        idct::idct_slow(coeffs, dq)
    }

    fn fdct(&self, input: &[i16; 64]) -> [i16; 64] {
        fdct::fdct(input)
    }

    fn filter_vertical_edge(&self, pix: &mut [u8], pos: usize, stride: usize, bv: &BoundingValues) {
        loop_filter::filter_vertical_edge(pix, pos, stride, bv)
    }

    fn filter_horizontal_edge(
        &self,
        pix: &mut [u8],
        pos: usize,
        stride: usize,
        bv: &BoundingValues,
    ) {
        loop_filter::filter_horizontal_edge(pix, pos, stride, bv)
    }

    fn recon_intra(&self, dst: &mut [u8], pos: usize, stride: usize, residual: &[i16; 64]) {
        for r in 0..8 {
            let row = &mut dst[pos + r * stride..pos + r * stride + 8];
            for (c, px) in row.iter_mut().enumerate() {
                *px = clamp255(residual[r * 8 + c] as i32 + 128);
            }
        }
    }

    fn recon_inter(
        &self,
        dst: &mut [u8],
        pos: usize,
        reference: &[u8],
        ref_pos: usize,
        stride: usize,
        residual: &[i16; 64],
    ) {
        for r in 0..8 {
            let src = &reference[ref_pos + r * stride..ref_pos + r * stride + 8];
            let row = &mut dst[pos + r * stride..pos + r * stride + 8];
            for c in 0..8 {
                row[c] = clamp255(src[c] as i32 + residual[r * 8 + c] as i32);
            }
        }
    }

    fn recon_inter2(
        &self,
        dst: &mut [u8],
        pos: usize,
        reference: &[u8],
        ref_pos1: usize,
        ref_pos2: usize,
        stride: usize,
        residual: &[i16; 64],
    ) {
        for r in 0..8 {
            let s1 = &reference[ref_pos1 + r * stride..ref_pos1 + r * stride + 8];
            let s2 = &reference[ref_pos2 + r * stride..ref_pos2 + r * stride + 8];
            let row = &mut dst[pos + r * stride..pos + r * stride + 8];
            for c in 0..8 {
                let avg = (s1[c] as i32 + s2[c] as i32) >> 1;
                row[c] = clamp255(avg + residual[r * 8 + c] as i32);
            }
        }
    }

    fn copy_block(&self, dst: &mut [u8], src: &[u8], pos: usize, stride: usize) {
        for r in 0..8 {
            let start = pos + r * stride;
            dst[start..start + 8].copy_from_slice(&src[start..start + 8]);
        }
    }

    fn sub_intra(&self, src: &[u8], pos: usize, stride: usize) -> [i16; 64] {
        let mut out = [0i16; 64];
        for r in 0..8 {
            for c in 0..8 {
                out[r * 8 + c] = src[pos + r * stride + c] as i16 - 128;
            }
        }
        out
    }

    fn sub_predicted(
        &self,
        src: &[u8],
        pos: usize,
        stride: usize,
        prediction: &[u8; 64],
    ) -> [i16; 64] {
        let mut out = [0i16; 64];
        for r in 0..8 {
            for c in 0..8 {
                out[r * 8 + c] = src[pos + r * stride + c] as i16 - prediction[r * 8 + c] as i16;
            }
        }
        out
    }

    fn predict(
        &self,
        reference: &[u8],
        ref_pos1: usize,
        ref_pos2: Option<usize>,
        stride: usize,
    ) -> [u8; 64] {
        let mut out = [0u8; 64];
        for r in 0..8 {
            for c in 0..8 {
                let a = reference[ref_pos1 + r * stride + c];
                out[r * 8 + c] = match ref_pos2 {
                    Some(p2) => ((a as u16 + reference[p2 + r * stride + c] as u16) >> 1) as u8,
                    None => a,
                };
            }
        }
        out
    }
}

/// CPU features relevant to the block kernels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCapabilities {
    /// SSE2 (x86_64 baseline).
    pub sse2: bool,
    /// SSSE3.
    pub ssse3: bool,
    /// AVX2.
    pub avx2: bool,
    /// NEON (AArch64 baseline).
    pub neon: bool,
}

impl CpuCapabilities {
    /// Best available level as a string.
    pub fn best_level(&self) -> &'static str {
        if self.avx2 {
            "AVX2"
        } else if self.ssse3 {
            "SSSE3"
        } else if self.sse2 {
            "SSE2"
        } else if self.neon {
            "NEON"
        } else {
            "Scalar"
        }
    }
}

/// Probe the running CPU.
#[cfg(target_arch = "x86_64")]
pub fn detect_capabilities() -> CpuCapabilities {
    CpuCapabilities {
        sse2: is_x86_feature_detected!("sse2"),
        ssse3: is_x86_feature_detected!("ssse3"),
        avx2: is_x86_feature_detected!("avx2"),
        neon: false,
    }
}

/// Probe the running CPU.
#[cfg(target_arch = "aarch64")]
pub fn detect_capabilities() -> CpuCapabilities {
    CpuCapabilities {
        neon: true,
        ..Default::default()
    }
}

/// Probe the running CPU.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn detect_capabilities() -> CpuCapabilities {
    CpuCapabilities::default()
}

/// Choose a kernel backend for the given capabilities.
///
/// Only the portable backend exists today, so every capability set maps to
/// it; accelerated backends slot in here.
pub fn select_transforms(caps: &CpuCapabilities) -> Box<dyn Transforms> {
    let backend = GenericTransforms;
    debug!(
        cpu = caps.best_level(),
        backend = backend.name(),
        "Selected transform backend"
    );
    Box::new(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        let caps = detect_capabilities();
        #[cfg(target_arch = "x86_64")]
        assert!(caps.sse2);
        #[cfg(target_arch = "aarch64")]
        assert!(caps.neon);
        assert!(!caps.best_level().is_empty());
    }

    #[test]
    fn test_select_transforms() {
        let dsp = select_transforms(&detect_capabilities());
        assert_eq!(dsp.name(), "generic");
        let dq = DequantTable { coeffs: [16; 64] };
        let mut c = [0i16; 64];
        c[0] = 8;
        c[4] = 3;
        assert_eq!(dsp.idct(5, &c, &dq), idct::idct10(&c, &dq));
    }

    #[test]
    fn test_recon_clamps() {
        let dsp = GenericTransforms;
        let mut dst = vec![0u8; 16 * 8];
        let mut residual = [0i16; 64];
        residual[0] = 200;
        residual[1] = -200;
        dsp.recon_intra(&mut dst, 0, 16, &residual);
        assert_eq!(dst[0], 255);
        assert_eq!(dst[1], 0);
        assert_eq!(dst[2], 128);
        assert_eq!(dst[8], 0); // outside the block
    }

    #[test]
    fn test_recon_inter2_average() {
        let dsp = GenericTransforms;
        let reference: Vec<u8> = (0..16 * 9).map(|i| (i % 16) as u8 * 10).collect();
        let mut dst = vec![0u8; 16 * 8];
        dsp.recon_inter2(&mut dst, 0, &reference, 0, 1, 16, &[1; 64]);
        // (0 + 10) / 2 + 1, (10 + 20) / 2 + 1
        assert_eq!(dst[0], 6);
        assert_eq!(dst[1], 16);
        let pred = dsp.predict(&reference, 0, Some(1), 16);
        assert_eq!(pred[0], 5);
    }

    #[test]
    fn test_sub_and_recon_inverse() {
        let dsp = GenericTransforms;
        let src: Vec<u8> = (0..64).map(|i| (i * 4) as u8).collect();
        let residual = dsp.sub_intra(&src, 0, 8);
        let mut dst = vec![0u8; 64];
        dsp.recon_intra(&mut dst, 0, 8, &residual);
        assert_eq!(dst, src);

        let pred = [100u8; 64];
        let residual = dsp.sub_predicted(&src, 0, 8, &pred);
        dsp.recon_inter(&mut dst, 0, &pred, 0, 8, &residual);
        assert_eq!(dst, src);
    }
}
