//! Theora frame reconstruction.
//!
//! [`TheoraDecoder`] takes per-frame block data that the entropy layer has
//! already produced (modes, motion vectors and coefficients with DC
//! residuals) and rebuilds the reference frames from it.

use crate::dc_pred::reconstruct_plane_dc;
use crate::dsp::{detect_capabilities, select_transforms, Transforms};
use crate::error::{Result, TheoraError};
use crate::fragment::{Fragment, FrameLayout};
use crate::frame::{FrameBuffer, FrameBufferManager, Rotation};
use crate::loop_filter::{filter_plane, BoundingValues};
use crate::quant::{FrameDequant, QuantInfo, QuantTables};
use crate::recon::MotionReconstructor;
use crate::{FrameType, Plane, TheoraConfig, QI_COUNT};
use tracing::{debug, trace, warn};

/// Block data for one frame.
///
/// `fragments` is indexed like [`FrameLayout`]: Y, then U, then V, each in
/// raster order. The DC coefficient of every coded fragment holds the
/// prediction residual, not the final value.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Key frame or predicted frame.
    pub frame_type: FrameType,
    /// Quality index of the frame.
    pub qi: u8,
    /// One entry per fragment.
    pub fragments: Vec<Fragment>,
}

impl FrameData {
    /// Frame data from parts.
    pub fn new(frame_type: FrameType, qi: u8, fragments: Vec<Fragment>) -> Self {
        Self {
            frame_type,
            qi,
            fragments,
        }
    }

    /// Key frame with every fragment intra coded and all coefficients zero.
    pub fn blank_key_frame(layout: &FrameLayout, qi: u8) -> Self {
        Self::new(
            FrameType::Intra,
            qi,
            vec![Fragment::intra([0; 64]); layout.num_fragments()],
        )
    }

    /// Predicted frame with no fragment coded.
    pub fn skipped(layout: &FrameLayout, qi: u8) -> Self {
        Self::new(
            FrameType::Predicted,
            qi,
            vec![Fragment::uncoded(); layout.num_fragments()],
        )
    }

    /// Number of coded fragments.
    pub fn coded_count(&self) -> usize {
        self.fragments.iter().filter(|f| f.coded).count()
    }

    /// Whether this is a key frame.
    pub fn is_keyframe(&self) -> bool {
        self.frame_type == FrameType::Intra
    }

    fn check(&self, layout: &FrameLayout, has_reference: bool) -> Result<()> {
        if self.fragments.len() != layout.num_fragments() {
            return Err(TheoraError::FragmentCountMismatch {
                expected: layout.num_fragments(),
                actual: self.fragments.len(),
            });
        }
        if self.qi as usize >= QI_COUNT {
            return Err(TheoraError::BitstreamError(format!(
                "quality index {} out of range",
                self.qi
            )));
        }
        match self.frame_type {
            FrameType::Intra => {
                if let Some(i) = self
                    .fragments
                    .iter()
                    .position(|f| !f.coded || !f.mode.is_intra())
                {
                    return Err(TheoraError::BitstreamError(format!(
                        "key frame fragment {} is not intra coded",
                        i
                    )));
                }
            }
            FrameType::Predicted if !has_reference => return Err(TheoraError::MissingReference),
            FrameType::Predicted => {}
        }
        Ok(())
    }
}

/// Working state reused from one frame to the next.
#[derive(Debug)]
pub(crate) struct FrameContext {
    /// Dequantization tables for the most recent quality index.
    dequant: FrameDequant,
    /// Fragments with DC prediction applied.
    fragments: Vec<Fragment>,
}

impl FrameContext {
    pub(crate) fn new(tables: &QuantTables) -> Self {
        Self {
            dequant: tables.frame_dequant(0),
            fragments: Vec::new(),
        }
    }

    /// Rebuild the dequantization tables if the quality index changed.
    fn select_qi(&mut self, tables: &QuantTables, qi: u8) {
        if self.dequant.qi() != qi {
            trace!(from = self.dequant.qi(), to = qi, "Quality index changed");
            self.dequant = tables.frame_dequant(qi);
        }
    }

    /// Quality index the cached tables belong to.
    pub(crate) fn qi(&self) -> u8 {
        self.dequant.qi()
    }
}

/// Run the reconstruction pipeline for one frame.
///
/// DC prediction, block reconstruction into "this" frame, buffer rotation,
/// loop filter and border extension of the new "last" frame, then the golden
/// update on key frames. Returns the number of coded fragments.
pub(crate) fn reconstruct_frame(
    dsp: &dyn Transforms,
    tables: &QuantTables,
    ctx: &mut FrameContext,
    buffers: &mut FrameBufferManager,
    frame: &FrameData,
) -> Result<usize> {
    ctx.select_qi(tables, frame.qi);
    ctx.fragments.clone_from(&frame.fragments);
    let frags = &mut ctx.fragments;
    let planes = *buffers.layout().planes();

    for pl in &planes {
        let range = pl.first_fragment..pl.first_fragment + pl.num_fragments();
        reconstruct_plane_dc(pl, &mut frags[range]);
    }

    let dequant = &ctx.dequant;
    let recon = MotionReconstructor::new(dsp);
    for pl in &planes {
        let (this, last, golden) = buffers.recon_planes(pl.plane);
        for by in 0..pl.blocks_y {
            for bx in 0..pl.blocks_x {
                let index = pl.fragment_index(bx, by);
                let frag = &frags[index];
                let dq = dequant.select(frame.frame_type, pl.plane, frag.mode);
                recon.reconstruct(index, pl, pl.block_offset(bx, by), frag, dq, this, last, golden)?;
            }
        }
    }

    let coded: Vec<bool> = frags.iter().map(|f| f.coded).collect();
    let n_coded = coded.iter().filter(|&&c| c).count();
    let rotation = buffers.rotate_buffers(dsp, &coded);

    let bv = BoundingValues::new(tables.filter_limit(frame.qi));
    for pl in &planes {
        let range = pl.first_fragment..pl.first_fragment + pl.num_fragments();
        let pix = buffers.last_frame_mut().plane_mut(pl.plane);
        filter_plane(dsp, pix, pl, &coded[range], &bv);
    }
    buffers.extend_last_borders();

    if frame.frame_type == FrameType::Intra {
        buffers.update_golden();
    }

    debug!(
        frame_type = ?frame.frame_type,
        qi = frame.qi,
        n_coded,
        swapped = rotation == Rotation::Swapped,
        "Reconstructed frame"
    );
    Ok(n_coded)
}

/// Theora decoder state.
#[derive(Debug)]
pub struct TheoraDecoder {
    /// Configuration.
    config: TheoraConfig,
    /// Dequantization matrices for every quality index.
    tables: QuantTables,
    /// Reference frames.
    buffers: FrameBufferManager,
    /// Block kernels.
    dsp: Box<dyn Transforms>,
    /// Cached dequantization tables and fragment scratch.
    context: FrameContext,
    /// Whether a key frame has been decoded.
    has_reference: bool,
    /// Frame count.
    frame_count: u64,
}

impl TheoraDecoder {
    /// Create a decoder using the best kernels for this CPU.
    pub fn new(config: TheoraConfig, info: &QuantInfo) -> Result<Self> {
        Self::with_transforms(config, info, select_transforms(&detect_capabilities()))
    }

    /// Create a decoder with an explicit kernel backend.
    pub fn with_transforms(
        config: TheoraConfig,
        info: &QuantInfo,
        dsp: Box<dyn Transforms>,
    ) -> Result<Self> {
        let tables = QuantTables::build(info)?;
        let layout = FrameLayout::new(&config)?;
        let context = FrameContext::new(&tables);
        debug!(
            width = config.frame_width,
            height = config.frame_height,
            fragments = layout.num_fragments(),
            backend = dsp.name(),
            "Created Theora decoder"
        );
        Ok(Self {
            config,
            tables,
            buffers: FrameBufferManager::new(layout),
            dsp,
            context,
            has_reference: false,
            frame_count: 0,
        })
    }

    /// Get configuration.
    pub fn config(&self) -> &TheoraConfig {
        &self.config
    }

    /// Fragment geometry.
    pub fn layout(&self) -> &FrameLayout {
        self.buffers.layout()
    }

    /// Quantizer tables in use.
    pub fn tables(&self) -> &QuantTables {
        &self.tables
    }

    /// Reference frame buffers.
    pub fn buffers(&self) -> &FrameBufferManager {
        &self.buffers
    }

    /// Decode one frame into the reference buffers.
    ///
    /// On error the reference frames are left as they were.
    pub fn decode_frame(&mut self, frame: &FrameData) -> Result<()> {
        if let Err(e) = frame.check(self.buffers.layout(), self.has_reference) {
            warn!(frame = self.frame_count, error = %e, "Rejected frame");
            return Err(e);
        }

        if let Err(e) = reconstruct_frame(
            self.dsp.as_ref(),
            &self.tables,
            &mut self.context,
            &mut self.buffers,
            frame,
        ) {
            warn!(frame = self.frame_count, error = %e, "Frame reconstruction failed");
            return Err(e);
        }

        if frame.is_keyframe() {
            self.has_reference = true;
        }
        self.frame_count += 1;
        Ok(())
    }

    /// The most recent decoded frame, borders included.
    pub fn reference(&self) -> &FrameBuffer {
        self.buffers.last_frame()
    }

    /// Visible picture area of one plane of the most recent frame.
    pub fn picture(&self, plane: Plane) -> Vec<u8> {
        let (w, h) = self.config.picture_dimensions(plane.index());
        let layout = self.buffers.layout().plane(plane);
        self.buffers.last_frame().crop(layout, w as usize, h as usize)
    }

    /// Forget all reference frames.
    pub fn reset(&mut self) {
        self.buffers = FrameBufferManager::new(self.buffers.layout().clone());
        self.has_reference = false;
        self.frame_count = 0;
    }

    /// Number of frames decoded.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Whether a key frame has been decoded since creation or reset.
    pub fn has_reference(&self) -> bool {
        self.has_reference
    }
}
