//! Spatial DC prediction.
//!
//! The DC coefficient of each coded fragment is predicted from up to four
//! causal neighbors (left, up-left, up, up-right) that were coded from the
//! same reference frame. The stream carries only the difference.

use crate::fragment::{Fragment, PlaneLayout};
use crate::token::MAX_TOKEN_VALUE;

const L: u8 = 1;
const UL: u8 = 2;
const U: u8 = 4;
const UR: u8 = 8;

/// Weights `[left, up-left, up, up-right, divisor]` for each neighbor mask.
pub const DC_WEIGHTS: [[i32; 5]; 16] = [
    [0, 0, 0, 0, 0],
    [1, 0, 0, 0, 1],
    [0, 1, 0, 0, 1],
    [1, 0, 0, 0, 1],
    [0, 0, 1, 0, 1],
    [1, 0, 1, 0, 2],
    [0, 0, 1, 0, 1],
    [29, -26, 29, 0, 32],
    [0, 0, 0, 1, 1],
    [75, 0, 0, 53, 128],
    [0, 1, 0, 1, 2],
    [75, 0, 0, 53, 128],
    [0, 0, 1, 0, 1],
    [75, 0, 0, 53, 128],
    [0, 3, 10, 3, 16],
    [29, -26, 29, 0, 32],
];

/// Neighbors that exist for a block position, ignoring coded state.
pub fn boundary_mask(bx: usize, by: usize, blocks_x: usize) -> u8 {
    let mut mask = L | UL | U | UR;
    if bx == 0 {
        mask &= !(L | UL);
    }
    if by == 0 {
        mask &= !(UL | U | UR);
    }
    if bx + 1 == blocks_x {
        mask &= !UR;
    }
    mask
}

/// Running prediction state for one plane.
#[derive(Debug)]
pub struct DcPredictor<'a> {
    layout: &'a PlaneLayout,
    /// Reconstructed DC of every fragment seen so far.
    dc: Vec<i32>,
    /// Most recent DC per reference class.
    last_dc: [i32; 3],
}

impl<'a> DcPredictor<'a> {
    /// Fresh state for a plane.
    pub fn new(layout: &'a PlaneLayout) -> Self {
        Self {
            layout,
            dc: vec![0; layout.num_fragments()],
            last_dc: [0; 3],
        }
    }

    /// Predicted DC for the coded fragment at (bx, by).
    pub fn predict(&self, frags: &[Fragment], bx: usize, by: usize) -> i32 {
        let bw = self.layout.blocks_x;
        let i = by * bw + bx;
        let class = frags[i].mode.reference().class();
        let avail = boundary_mask(bx, by, bw);

        let mut mask = 0u8;
        let mut v = [0i32; 4];
        for (k, bit) in [L, UL, U, UR].into_iter().enumerate() {
            if avail & bit == 0 {
                continue;
            }
            let j = match bit {
                L => i - 1,
                UL => i - bw - 1,
                U => i - bw,
                _ => i - bw + 1,
            };
            let n = &frags[j];
            if n.coded && n.mode.reference().class() == class {
                mask |= bit;
                v[k] = self.dc[j];
            }
        }

        if mask == 0 {
            return self.last_dc[class];
        }

        let w = &DC_WEIGHTS[mask as usize];
        let mut sum: i32 = (0..4).map(|k| w[k] * v[k]).sum();
        let shift = w[4].trailing_zeros();
        if sum < 0 {
            sum += (1 << shift) - 1;
        }
        let mut pred = sum >> shift;

        if mask & (L | UL | U) == (L | UL | U) {
            let (left, up_left, up) = (v[0], v[1], v[2]);
            if (pred - up).abs() > 128 {
                pred = up;
            } else if (pred - up_left).abs() > 128 {
                pred = up_left;
            } else if (pred - left).abs() > 128 {
                pred = left;
            }
        }
        pred
    }

    /// Record the reconstructed DC of the fragment at (bx, by).
    pub fn commit(&mut self, frags: &[Fragment], bx: usize, by: usize, dc: i32) {
        let i = by * self.layout.blocks_x + bx;
        self.dc[i] = dc;
        self.last_dc[frags[i].mode.reference().class()] = dc;
    }
}

/// Turn DC residuals into DC values, in raster order.
///
/// `frags` is one plane's fragment slice.
pub fn reconstruct_plane_dc(layout: &PlaneLayout, frags: &mut [Fragment]) {
    let mut pred = DcPredictor::new(layout);
    for by in 0..layout.blocks_y {
        for bx in 0..layout.blocks_x {
            let i = by * layout.blocks_x + bx;
            if !frags[i].coded {
                continue;
            }
            let dc = frags[i].coeffs[0] as i32 + pred.predict(frags, bx, by);
            frags[i].coeffs[0] = dc as i16;
            pred.commit(frags, bx, by, dc as i16 as i32);
        }
    }
}

/// Turn DC values into DC residuals, in raster order.
///
/// Residuals are clamped to the tokenizable range; the DC actually
/// reconstructed is then `prediction + residual`, and later predictions use
/// that value so encoder and decoder stay in step.
pub fn residual_plane_dc(layout: &PlaneLayout, frags: &mut [Fragment]) {
    let mut pred = DcPredictor::new(layout);
    for by in 0..layout.blocks_y {
        for bx in 0..layout.blocks_x {
            let i = by * layout.blocks_x + bx;
            if !frags[i].coded {
                continue;
            }
            let p = pred.predict(frags, bx, by);
            let residual = (frags[i].coeffs[0] as i32 - p).clamp(-MAX_TOKEN_VALUE, MAX_TOKEN_VALUE);
            frags[i].coeffs[0] = residual as i16;
            pred.commit(frags, bx, by, (p + residual) as i16 as i32);
        }
    }
}
