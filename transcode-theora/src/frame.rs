//! Reference frame buffers.
//!
//! Two slots alternate between the "this frame" and "last frame" roles; a
//! third buffer holds the golden frame. Swapping roles flips an index, no
//! pixels move.

use crate::dsp::Transforms;
use crate::fragment::{FrameLayout, PlaneLayout};
use crate::Plane;
use tracing::trace;

/// Three padded planes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    planes: [Vec<u8>; 3],
}

impl FrameBuffer {
    /// Allocate zeroed planes for a layout.
    pub fn new(layout: &FrameLayout) -> Self {
        let [y, u, v] = layout.planes();
        Self {
            planes: [
                vec![0; y.buffer_len()],
                vec![0; u.buffer_len()],
                vec![0; v.buffer_len()],
            ],
        }
    }

    /// Pixels of one plane, borders included.
    pub fn plane(&self, plane: Plane) -> &[u8] {
        &self.planes[plane.index()]
    }

    /// Mutable pixels of one plane, borders included.
    pub fn plane_mut(&mut self, plane: Plane) -> &mut [u8] {
        &mut self.planes[plane.index()]
    }

    /// Replicate edge pixels into the border of every plane.
    pub fn extend_borders(&mut self, layout: &FrameLayout) {
        for pl in layout.planes() {
            extend_plane_borders(&mut self.planes[pl.plane.index()], pl);
        }
    }

    /// Copy the visible area of one plane into a tightly packed vector.
    pub fn crop(&self, layout: &PlaneLayout, width: usize, height: usize) -> Vec<u8> {
        let width = width.min(layout.width);
        let height = height.min(layout.height);
        let pix = &self.planes[layout.plane.index()];
        let mut out = Vec::with_capacity(width * height);
        for y in 0..height {
            let start = layout.origin + y * layout.stride;
            out.extend_from_slice(&pix[start..start + width]);
        }
        out
    }
}

/// Replicate the outermost rows and columns of a plane into its border.
pub fn extend_plane_borders(pix: &mut [u8], layout: &PlaneLayout) {
    let b = layout.border;
    let stride = layout.stride;
    let (w, h) = (layout.width, layout.height);

    for y in 0..h {
        let row = (y + b) * stride;
        let left = pix[row + b];
        let right = pix[row + b + w - 1];
        pix[row..row + b].fill(left);
        pix[row + b + w..row + stride].fill(right);
    }

    let first = b * stride;
    let last = (b + h - 1) * stride;
    for y in 0..b {
        pix.copy_within(first..first + stride, y * stride);
        pix.copy_within(last..last + stride, (b + h + y) * stride);
    }
}

/// Which branch a buffer rotation took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Roles swapped; uncoded fragments copied into the new "this" slot.
    Swapped,
    /// Roles kept; coded fragments copied into "last".
    Merged,
}

/// Owner of the reconstruction, previous and golden frames.
#[derive(Debug, Clone)]
pub struct FrameBufferManager {
    layout: FrameLayout,
    slots: [FrameBuffer; 2],
    golden: FrameBuffer,
    /// Slot currently holding "this frame".
    current: usize,
    /// Number of role swaps so far.
    generation: u64,
}

fn split_slots(slots: &mut [FrameBuffer; 2], current: usize) -> (&mut FrameBuffer, &mut FrameBuffer) {
    let (a, b) = slots.split_at_mut(1);
    if current == 0 {
        (&mut a[0], &mut b[0])
    } else {
        (&mut b[0], &mut a[0])
    }
}

fn copy_fragments(
    dsp: &dyn Transforms,
    layout: &FrameLayout,
    dst: &mut FrameBuffer,
    src: &FrameBuffer,
    coded: &[bool],
    want_coded: bool,
) -> usize {
    let mut copied = 0;
    for (index, &c) in coded.iter().enumerate() {
        if c != want_coded {
            continue;
        }
        let pos = layout.position(index);
        let stride = layout.plane(pos.plane).stride;
        dsp.copy_block(dst.plane_mut(pos.plane), src.plane(pos.plane), pos.offset, stride);
        copied += 1;
    }
    copied
}

impl FrameBufferManager {
    /// Allocate all buffers for a layout.
    pub fn new(layout: FrameLayout) -> Self {
        let slot = FrameBuffer::new(&layout);
        Self {
            slots: [slot.clone(), slot.clone()],
            golden: slot,
            layout,
            current: 0,
            generation: 0,
        }
    }

    /// Frame geometry.
    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    /// The frame being reconstructed.
    pub fn this_frame(&self) -> &FrameBuffer {
        &self.slots[self.current]
    }

    /// The previous reconstructed frame.
    pub fn last_frame(&self) -> &FrameBuffer {
        &self.slots[self.current ^ 1]
    }

    /// Mutable previous frame, for in-place loop filtering.
    pub fn last_frame_mut(&mut self) -> &mut FrameBuffer {
        &mut self.slots[self.current ^ 1]
    }

    /// The golden frame.
    pub fn golden_frame(&self) -> &FrameBuffer {
        &self.golden
    }

    /// Number of role swaps performed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Borrow one plane of "this" mutably alongside the matching "last" and
    /// golden planes.
    pub fn recon_planes(&mut self, plane: Plane) -> (&mut [u8], &[u8], &[u8]) {
        let (this, last) = split_slots(&mut self.slots, self.current);
        (
            this.plane_mut(plane),
            last.plane(plane),
            self.golden.plane(plane),
        )
    }

    /// Make "last" hold the frame just reconstructed in "this".
    ///
    /// When more than half of the fragments were coded the roles swap and
    /// only uncoded fragments are copied back; otherwise only the coded
    /// fragments are copied forward.
    pub fn rotate_buffers(&mut self, dsp: &dyn Transforms, coded: &[bool]) -> Rotation {
        let total = self.layout.num_fragments();
        let n_coded = coded.iter().filter(|&&c| c).count();

        if n_coded * 2 > total {
            self.current ^= 1;
            self.generation += 1;
            let (this, last) = split_slots(&mut self.slots, self.current);
            let copied = copy_fragments(dsp, &self.layout, this, last, coded, false);
            trace!(n_coded, total, copied, "Swapped frame buffers");
            Rotation::Swapped
        } else {
            let (this, last) = split_slots(&mut self.slots, self.current);
            let copied = copy_fragments(dsp, &self.layout, last, this, coded, true);
            trace!(n_coded, total, copied, "Merged coded fragments into last frame");
            Rotation::Merged
        }
    }

    /// Extend the borders of the last frame.
    pub fn extend_last_borders(&mut self) {
        let idx = self.current ^ 1;
        self.slots[idx].extend_borders(&self.layout);
    }

    /// Copy the last frame into the golden frame and extend its borders.
    pub fn update_golden(&mut self) {
        self.golden.clone_from(&self.slots[self.current ^ 1]);
        self.golden.extend_borders(&self.layout);
    }
}
