//! In-loop deblocking filter.
//!
//! Each coded fragment has its block edges smoothed with a four-tap filter
//! whose correction is bounded by a per-qi limit. Uncoded neighbors were
//! already filtered when they were last coded, so an edge between two
//! uncoded fragments is left alone.

use crate::dsp::Transforms;
use crate::fragment::PlaneLayout;
use tracing::trace;

/// Lookup table clamping filter corrections to the current limit.
///
/// Entry `127 + x` holds `x` for `|x| < L`, ramps back to zero between `L`
/// and `2L`, and is zero beyond.
#[derive(Debug, Clone)]
pub struct BoundingValues {
    table: [i16; 256],
    limit: u8,
}

impl BoundingValues {
    /// Build the table for a filter limit.
    pub fn new(limit: u8) -> Self {
        let l = limit as i32;
        let mut table = [0i16; 256];
        for (i, v) in table.iter_mut().enumerate() {
            let x = i as i32 - 127;
            let mag = x.abs();
            let bounded = if mag < l {
                mag
            } else if mag < 2 * l {
                2 * l - mag
            } else {
                0
            };
            *v = (x.signum() * bounded) as i16;
        }
        Self { table, limit }
    }

    /// The filter limit.
    pub fn limit(&self) -> u8 {
        self.limit
    }

    /// Whether filtering is switched off.
    pub fn is_disabled(&self) -> bool {
        self.limit == 0
    }

    /// The raw 256-entry table.
    pub fn table(&self) -> &[i16; 256] {
        &self.table
    }

    /// Bounded correction for a filter response already scaled by `>> 3`.
    #[inline]
    pub fn get(&self, x: i32) -> i32 {
        self.table[(127 + x.clamp(-127, 128)) as usize] as i32
    }
}

#[inline(always)]
fn filter_pixels(pix: &mut [u8], p: usize, step: usize, bv: &BoundingValues) {
    let a = pix[p - 2 * step] as i32;
    let b = pix[p - step] as i32;
    let c = pix[p] as i32;
    let d = pix[p + step] as i32;
    let f = a - 3 * b + 3 * c - d;
    let v = bv.get((f + 4) >> 3);
    pix[p - step] = (b + v).clamp(0, 255) as u8;
    pix[p] = (c - v).clamp(0, 255) as u8;
}

/// Filter across a vertical edge; `pos` is the first pixel right of the edge
/// on the top row.
pub fn filter_vertical_edge(pix: &mut [u8], pos: usize, stride: usize, bv: &BoundingValues) {
    for row in 0..8 {
        filter_pixels(pix, pos + row * stride, 1, bv);
    }
}

/// Filter across a horizontal edge; `pos` is the first pixel below the edge
/// in the leftmost column.
pub fn filter_horizontal_edge(pix: &mut [u8], pos: usize, stride: usize, bv: &BoundingValues) {
    for col in 0..8 {
        filter_pixels(pix, pos + col, stride, bv);
    }
}

/// Filter every coded fragment edge of one plane in place.
///
/// `coded` holds one flag per fragment of the plane, in raster order.
/// Edges on the picture boundary are never filtered.
pub fn filter_plane(
    dsp: &dyn Transforms,
    pix: &mut [u8],
    layout: &PlaneLayout,
    coded: &[bool],
    bv: &BoundingValues,
) {
    if bv.is_disabled() {
        trace!(plane = ?layout.plane, "Loop filter disabled");
        return;
    }
    let (bw, bh) = (layout.blocks_x, layout.blocks_y);
    let stride = layout.stride;

    for by in 0..bh {
        for bx in 0..bw {
            let i = by * bw + bx;
            if !coded[i] {
                continue;
            }
            let pos = layout.block_offset(bx, by);
            if bx > 0 {
                dsp.filter_vertical_edge(pix, pos, stride, bv);
            }
            if by > 0 {
                dsp.filter_horizontal_edge(pix, pos, stride, bv);
            }
            if bx + 1 < bw && !coded[i + 1] {
                dsp.filter_vertical_edge(pix, pos + 8, stride, bv);
            }
            if by + 1 < bh && !coded[i + bw] {
                dsp.filter_horizontal_edge(pix, pos + 8 * stride, stride, bv);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::GenericTransforms;
    use crate::fragment::FrameLayout;
    use crate::{Plane, TheoraConfig};

    #[test]
    fn test_bounding_values_shape() {
        let bv = BoundingValues::new(10);
        assert_eq!(bv.get(0), 0);
        assert_eq!(bv.get(5), 5);
        assert_eq!(bv.get(-9), -9);
        assert_eq!(bv.get(10), 10);
        assert_eq!(bv.get(15), 5);
        assert_eq!(bv.get(-19), -1);
        assert_eq!(bv.get(20), 0);
        assert_eq!(bv.get(500), 0);
    }

    #[test]
    fn test_bounding_values_symmetric() {
        for limit in 0..=127u8 {
            let bv = BoundingValues::new(limit);
            let t = bv.table();
            for x in 0..=127usize {
                assert_eq!(t[127 + x], -t[127 - x], "limit {} x {}", limit, x);
            }
        }
    }

    #[test]
    fn test_step_edge_is_smoothed() {
        let bv = BoundingValues::new(30);
        let mut pix = vec![0u8; 16 * 8];
        for row in 0..8 {
            for col in 0..16 {
                pix[row * 16 + col] = if col < 8 { 100 } else { 120 };
            }
        }
        filter_vertical_edge(&mut pix, 8, 16, &bv);
        // f = 100 - 300 + 360 - 120 = 40; (40 + 4) >> 3 = 5
        for row in 0..8 {
            assert_eq!(pix[row * 16 + 7], 105);
            assert_eq!(pix[row * 16 + 8], 115);
            assert_eq!(pix[row * 16 + 6], 100);
        }
    }

    #[test]
    fn test_disabled_filter_is_noop() {
        let config = TheoraConfig::new(32, 32).unwrap();
        let layout = FrameLayout::new(&config).unwrap();
        let y = *layout.plane(Plane::Y);
        let mut pix: Vec<u8> = (0..y.buffer_len()).map(|i| (i * 37 % 251) as u8).collect();
        let before = pix.clone();
        let coded = vec![true; y.num_fragments()];
        filter_plane(&GenericTransforms, &mut pix, &y, &coded, &BoundingValues::new(0));
        assert_eq!(pix, before);
    }

    #[test]
    fn test_uncoded_pairs_untouched() {
        let config = TheoraConfig::new(32, 16).unwrap();
        let layout = FrameLayout::new(&config).unwrap();
        let y = *layout.plane(Plane::Y);
        let mut pix: Vec<u8> = (0..y.buffer_len()).map(|i| (i * 13 % 200) as u8).collect();
        let before = pix.clone();
        // only fragment 0 coded: touches its right and bottom edges
        let mut coded = vec![false; y.num_fragments()];
        coded[0] = true;
        filter_plane(&GenericTransforms, &mut pix, &y, &coded, &BoundingValues::new(20));
        // edge between fragments 2 and 3 (x = 24) stays as it was
        let pos = y.block_offset(3, 0);
        for row in 0..8 {
            assert_eq!(pix[pos + row * y.stride - 1], before[pos + row * y.stride - 1]);
            assert_eq!(pix[pos + row * y.stride], before[pos + row * y.stride]);
        }
    }
}
