//! Motion-compensated block reconstruction.

use crate::dsp::Transforms;
use crate::error::{Result, TheoraError};
use crate::fragment::{Fragment, PlaneLayout};
use crate::quant::DequantTable;
use crate::{MotionVector, RefFrame};

/// Reference positions for a motion vector.
///
/// `secondary` is set when either component has a fractional part; the
/// prediction is then the average of the two positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionOffsets {
    /// Primary reference position.
    pub primary: usize,
    /// Second position for sub-pixel averaging.
    pub secondary: Option<usize>,
}

/// Resolve a motion vector to buffer positions around `offset`.
///
/// The integer part is the vector divided by the sub-pixel denominator,
/// truncated toward zero. A fractional part on an axis moves the secondary
/// position one pixel further in the vector's direction on that axis. The
/// pixel-aligned path is taken exactly when neither axis moved.
pub fn motion_offsets(
    layout: &PlaneLayout,
    offset: usize,
    mv: MotionVector,
) -> Option<MotionOffsets> {
    let (xs, ys) = layout.mv_shift();
    let stride = layout.stride as isize;
    let (mx, my) = (mv.x as isize, mv.y as isize);

    let base = my / (1 << ys) * stride + mx / (1 << xs);
    let fx = if mx & ((1 << xs) - 1) != 0 { mx.signum() } else { 0 };
    let fy = if my & ((1 << ys) - 1) != 0 { my.signum() } else { 0 };

    let primary = offset.checked_add_signed(base)?;
    let secondary = if fx != 0 || fy != 0 {
        Some(primary.checked_add_signed(fx + fy * stride)?)
    } else {
        None
    };
    Some(MotionOffsets { primary, secondary })
}

/// Rebuilds fragments from residuals and reference frames.
#[derive(Debug, Clone, Copy)]
pub struct MotionReconstructor<'a> {
    dsp: &'a dyn Transforms,
}

impl<'a> MotionReconstructor<'a> {
    /// Reconstructor using the given kernels.
    pub fn new(dsp: &'a dyn Transforms) -> Self {
        Self { dsp }
    }

    /// Motion vector a fragment actually applies.
    fn effective_mv(index: usize, frag: &Fragment) -> Result<MotionVector> {
        if !frag.mode.uses_mv() {
            return Ok(MotionVector::zero());
        }
        if !frag.mv.in_range() {
            return Err(TheoraError::MotionVectorOutOfRange {
                fragment: index,
                x: frag.mv.x,
                y: frag.mv.y,
            });
        }
        Ok(frag.mv)
    }

    fn offsets(
        index: usize,
        layout: &PlaneLayout,
        offset: usize,
        mv: MotionVector,
    ) -> Result<MotionOffsets> {
        motion_offsets(layout, offset, mv).ok_or(TheoraError::MotionVectorOutOfRange {
            fragment: index,
            x: mv.x,
            y: mv.y,
        })
    }

    /// Write fragment `index` into `this`.
    ///
    /// `frag.coeffs[0]` must already hold the reconstructed DC. Uncoded
    /// fragments are copied from `last`.
    pub fn reconstruct(
        &self,
        index: usize,
        layout: &PlaneLayout,
        offset: usize,
        frag: &Fragment,
        dq: &DequantTable,
        this: &mut [u8],
        last: &[u8],
        golden: &[u8],
    ) -> Result<()> {
        let stride = layout.stride;
        if !frag.coded {
            self.dsp.copy_block(this, last, offset, stride);
            return Ok(());
        }

        let residual = self.dsp.idct(frag.eob(), &frag.coeffs, dq);
        let reference = match frag.mode.reference() {
            RefFrame::Intra => {
                self.dsp.recon_intra(this, offset, stride, &residual);
                return Ok(());
            }
            RefFrame::Last => last,
            RefFrame::Golden => golden,
        };

        let mv = Self::effective_mv(index, frag)?;
        let off = Self::offsets(index, layout, offset, mv)?;
        match off.secondary {
            None => {
                self.dsp
                    .recon_inter(this, offset, reference, off.primary, stride, &residual)
            }
            Some(secondary) => self.dsp.recon_inter2(
                this,
                offset,
                reference,
                off.primary,
                secondary,
                stride,
                &residual,
            ),
        }
        Ok(())
    }

    /// Prediction block for an inter fragment, as the decoder will form it.
    pub fn prediction(
        &self,
        index: usize,
        layout: &PlaneLayout,
        offset: usize,
        frag: &Fragment,
        last: &[u8],
        golden: &[u8],
    ) -> Result<[u8; 64]> {
        let reference = match frag.mode.reference() {
            RefFrame::Intra => return Ok([128; 64]),
            RefFrame::Last => last,
            RefFrame::Golden => golden,
        };
        let mv = Self::effective_mv(index, frag)?;
        let off = Self::offsets(index, layout, offset, mv)?;
        Ok(self
            .dsp
            .predict(reference, off.primary, off.secondary, layout.stride))
    }
}
