//! Fragments and frame geometry.
//!
//! A fragment is one 8x8 block of one plane. Fragments are numbered plane by
//! plane (Y, U, V), in raster order inside each plane. [`FrameLayout`]
//! precomputes where every fragment lives inside a padded plane buffer.

use crate::error::{Result, TheoraError};
use crate::idct::end_of_block;
use crate::{CodingMode, MotionVector, Plane, TheoraConfig, BLOCK_SIZE, LUMA_BORDER, MAX_MV};

/// Per-frame state of one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Whether the fragment carries data this frame.
    pub coded: bool,
    /// Coding mode; ignored for uncoded fragments.
    pub mode: CodingMode,
    /// Motion vector in the plane's sub-pixel units.
    pub mv: MotionVector,
    /// Quantized coefficients in zig-zag order.
    ///
    /// The decoder replaces `coeffs[0]` with the predicted DC before the
    /// inverse transform runs.
    pub coeffs: [i16; 64],
}

impl Fragment {
    /// A fragment that is not coded this frame.
    pub fn uncoded() -> Self {
        Self {
            coded: false,
            mode: CodingMode::InterNoMv,
            mv: MotionVector::zero(),
            coeffs: [0; 64],
        }
    }

    /// An intra-coded fragment.
    pub fn intra(coeffs: [i16; 64]) -> Self {
        Self {
            coded: true,
            mode: CodingMode::Intra,
            mv: MotionVector::zero(),
            coeffs,
        }
    }

    /// An inter-coded fragment.
    pub fn inter(mode: CodingMode, mv: MotionVector, coeffs: [i16; 64]) -> Self {
        Self {
            coded: true,
            mode,
            mv,
            coeffs,
        }
    }

    /// End-of-block position of the coefficients.
    pub fn eob(&self) -> usize {
        end_of_block(&self.coeffs)
    }
}

impl Default for Fragment {
    fn default() -> Self {
        Self::uncoded()
    }
}

/// Geometry of one padded plane buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Which plane this is.
    pub plane: Plane,
    /// Coded width in pixels.
    pub width: usize,
    /// Coded height in pixels.
    pub height: usize,
    /// Fragments per row.
    pub blocks_x: usize,
    /// Fragment rows.
    pub blocks_y: usize,
    /// Padding on every side, in pixels.
    pub border: usize,
    /// Distance between rows in the buffer.
    pub stride: usize,
    /// Offset of pixel (0, 0).
    pub origin: usize,
    /// Index of this plane's first fragment.
    pub first_fragment: usize,
    /// Horizontal chroma decimation (0 or 1).
    pub xdec: u32,
    /// Vertical chroma decimation (0 or 1).
    pub ydec: u32,
}

impl PlaneLayout {
    /// Total buffer length including borders.
    pub fn buffer_len(&self) -> usize {
        self.stride * (self.height + 2 * self.border)
    }

    /// Number of fragments in this plane.
    pub fn num_fragments(&self) -> usize {
        self.blocks_x * self.blocks_y
    }

    /// Buffer offset of the top-left pixel of block (bx, by).
    #[inline]
    pub fn block_offset(&self, bx: usize, by: usize) -> usize {
        self.origin + by * BLOCK_SIZE * self.stride + bx * BLOCK_SIZE
    }

    /// Global fragment index of block (bx, by).
    #[inline]
    pub fn fragment_index(&self, bx: usize, by: usize) -> usize {
        self.first_fragment + by * self.blocks_x + bx
    }

    /// Motion vector shift on each axis: 1 for half-pel, 2 for quarter-pel.
    pub fn mv_shift(&self) -> (u32, u32) {
        (1 + self.xdec, 1 + self.ydec)
    }

    /// Largest pixel distance a legal motion vector can reach outside a block.
    pub fn max_reach(&self) -> usize {
        let (xs, ys) = self.mv_shift();
        let reach_x = (MAX_MV as usize >> xs) + 1;
        let reach_y = (MAX_MV as usize >> ys) + 1;
        reach_x.max(reach_y)
    }
}

/// Location of a fragment inside the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentPos {
    /// Plane holding the fragment.
    pub plane: Plane,
    /// Column, in blocks.
    pub bx: usize,
    /// Row, in blocks.
    pub by: usize,
    /// Buffer offset of the top-left pixel.
    pub offset: usize,
}

/// Fragment geometry for a whole frame.
#[derive(Debug, Clone)]
pub struct FrameLayout {
    planes: [PlaneLayout; 3],
    positions: Vec<FragmentPos>,
}

impl FrameLayout {
    /// Layout with the standard border widths.
    pub fn new(config: &TheoraConfig) -> Result<Self> {
        Self::with_border(config, LUMA_BORDER)
    }

    /// Layout with a custom luma border; chroma borders are half as wide.
    ///
    /// Fails if a maximal motion vector could reach past the border.
    pub fn with_border(config: &TheoraConfig, luma_border: usize) -> Result<Self> {
        let (xsub, ysub) = config.pixel_format.chroma_subsampling();
        let mut first_fragment = 0;
        let mut planes = Vec::with_capacity(3);

        for plane in Plane::ALL {
            let (w, h) = config.plane_dimensions(plane.index());
            let (w, h) = (w as usize, h as usize);
            if w % BLOCK_SIZE != 0 || h % BLOCK_SIZE != 0 {
                return Err(TheoraError::InvalidDimensions {
                    width: config.frame_width,
                    height: config.frame_height,
                });
            }
            let (border, xdec, ydec) = if plane.is_chroma() {
                (luma_border / 2, (xsub == 2) as u32, (ysub == 2) as u32)
            } else {
                (luma_border, 0, 0)
            };
            let stride = w + 2 * border;
            let layout = PlaneLayout {
                plane,
                width: w,
                height: h,
                blocks_x: w / BLOCK_SIZE,
                blocks_y: h / BLOCK_SIZE,
                border,
                stride,
                origin: border * stride + border,
                first_fragment,
                xdec,
                ydec,
            };
            if layout.max_reach() > border {
                return Err(TheoraError::config(format!(
                    "{:?} border of {} pixels is narrower than the motion vector reach of {}",
                    plane,
                    border,
                    layout.max_reach()
                )));
            }
            first_fragment += layout.num_fragments();
            planes.push(layout);
        }

        let planes = [planes[0], planes[1], planes[2]];
        let mut positions = Vec::with_capacity(first_fragment);
        for layout in &planes {
            for by in 0..layout.blocks_y {
                for bx in 0..layout.blocks_x {
                    positions.push(FragmentPos {
                        plane: layout.plane,
                        bx,
                        by,
                        offset: layout.block_offset(bx, by),
                    });
                }
            }
        }

        Ok(Self { planes, positions })
    }

    /// Layout of one plane.
    pub fn plane(&self, plane: Plane) -> &PlaneLayout {
        &self.planes[plane.index()]
    }

    /// All three plane layouts.
    pub fn planes(&self) -> &[PlaneLayout; 3] {
        &self.planes
    }

    /// Total fragment count.
    pub fn num_fragments(&self) -> usize {
        self.positions.len()
    }

    /// Where fragment `index` lives.
    pub fn position(&self, index: usize) -> FragmentPos {
        self.positions[index]
    }

    /// Fragment index range of one plane.
    pub fn plane_fragments(&self, plane: Plane) -> std::ops::Range<usize> {
        let p = self.plane(plane);
        p.first_fragment..p.first_fragment + p.num_fragments()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PixelFormat, CHROMA_BORDER};

    #[test]
    fn test_layout_420() {
        let config = TheoraConfig::new(64, 48).unwrap();
        let layout = FrameLayout::new(&config).unwrap();
        let y = layout.plane(Plane::Y);
        assert_eq!((y.blocks_x, y.blocks_y), (8, 6));
        assert_eq!(y.stride, 64 + 64);
        assert_eq!(y.origin, 32 * 128 + 32);
        let u = layout.plane(Plane::U);
        assert_eq!((u.blocks_x, u.blocks_y), (4, 3));
        assert_eq!(u.border, CHROMA_BORDER);
        assert_eq!(u.first_fragment, 48);
        assert_eq!(layout.num_fragments(), 48 + 12 + 12);
        assert_eq!(layout.plane_fragments(Plane::V), 60..72);
    }

    #[test]
    fn test_fragment_positions() {
        let config = TheoraConfig::new(32, 32).unwrap();
        let layout = FrameLayout::new(&config).unwrap();
        let y = *layout.plane(Plane::Y);
        let pos = layout.position(5);
        assert_eq!((pos.plane, pos.bx, pos.by), (Plane::Y, 1, 1));
        assert_eq!(pos.offset, y.origin + 8 * y.stride + 8);
        assert_eq!(y.fragment_index(1, 1), 5);

        let pos = layout.position(16);
        assert_eq!((pos.plane, pos.bx, pos.by), (Plane::U, 0, 0));
    }

    #[test]
    fn test_border_too_narrow() {
        let config = TheoraConfig::new(32, 32).unwrap();
        assert!(matches!(
            FrameLayout::with_border(&config, 8),
            Err(TheoraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_mv_shift_by_format() {
        let mut config = TheoraConfig::new(32, 32).unwrap();
        config.set_pixel_format(PixelFormat::Yuv422);
        let layout = FrameLayout::new(&config).unwrap();
        assert_eq!(layout.plane(Plane::Y).mv_shift(), (1, 1));
        assert_eq!(layout.plane(Plane::U).mv_shift(), (2, 1));
        // 4:2:2 chroma: half-pel vertically, reach 16 == border
        assert_eq!(layout.plane(Plane::U).max_reach(), 16);
    }

    #[test]
    fn test_fragment_eob() {
        let mut coeffs = [0i16; 64];
        coeffs[6] = 3;
        let frag = Fragment::intra(coeffs);
        assert_eq!(frag.eob(), 7);
        assert!(!Fragment::uncoded().coded);
    }
}
