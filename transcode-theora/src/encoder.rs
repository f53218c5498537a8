//! Theora frame encoder.
//!
//! Chooses a coding mode per fragment, transforms and quantizes the
//! residual, applies forward DC prediction and tokenizes the result. The
//! frame is then reconstructed through the same pipeline the decoder runs,
//! so both sides hold identical reference frames.

use crate::dc_pred::residual_plane_dc;
use crate::decoder::{reconstruct_frame, FrameContext, FrameData};
use crate::dsp::{detect_capabilities, select_transforms, Transforms};
use crate::error::{Result, TheoraError};
use crate::fragment::{Fragment, FrameLayout, PlaneLayout};
use crate::frame::{FrameBuffer, FrameBufferManager};
use crate::quant::{write_qtables, QuantInfo, QuantTables};
use crate::quantizer::{quantize, FrameQuantizers, Sharpness};
use crate::recon::MotionReconstructor;
use crate::token::{expand_blocks, merge_eob_runs, tokenize_block, Token};
use crate::{CodingMode, FrameType, MotionVector, Plane, TheoraConfig, BLOCK_SIZE};
use tracing::{debug, trace};

/// Added to the intra cost so flat inter predictions win ties.
const INTRA_PENALTY: u32 = 384;

/// Added to the cost of a nonzero motion vector.
const MV_PENALTY: u32 = 32;

/// Encoder tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Quality index (0-63).
    pub quality: u8,
    /// Dead zone and rounding preset.
    pub sharpness: Sharpness,
    /// Maximum distance between key frames.
    pub keyframe_interval: u32,
    /// Motion search radius in whole pixels.
    pub search_range: u8,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            quality: 48,
            sharpness: Sharpness::default(),
            keyframe_interval: 64,
            search_range: 7,
        }
    }
}

impl EncoderConfig {
    /// Set quality (0-63).
    pub fn set_quality(&mut self, quality: u8) {
        self.quality = quality.min(63);
    }

    /// Set sharpness preset.
    pub fn set_sharpness(&mut self, sharpness: Sharpness) {
        self.sharpness = sharpness;
    }

    /// Set keyframe interval.
    pub fn set_keyframe_interval(&mut self, interval: u32) {
        self.keyframe_interval = interval.max(1);
    }

    /// Set motion search radius; vectors past the legal range are never tried.
    pub fn set_search_range(&mut self, range: u8) {
        self.search_range = range.min(15);
    }
}

/// One fragment of an encoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFragment {
    /// Whether the fragment is coded.
    pub coded: bool,
    /// Coding mode.
    pub mode: CodingMode,
    /// Motion vector in the plane's sub-pixel units.
    pub mv: MotionVector,
    /// Coefficient tokens, DC residual first. Empty when uncoded, and also
    /// for a coded fragment covered by an earlier fragment's end-of-block run.
    pub tokens: Vec<Token>,
}

/// Output of [`TheoraEncoder::encode_frame`].
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Frame type.
    pub frame_type: FrameType,
    /// Quality index.
    pub qi: u8,
    /// One entry per fragment, in layout order.
    pub fragments: Vec<EncodedFragment>,
}

impl EncodedFrame {
    /// Whether this is a key frame.
    pub fn is_keyframe(&self) -> bool {
        self.frame_type == FrameType::Intra
    }

    /// Number of coded fragments.
    pub fn coded_count(&self) -> usize {
        self.fragments.iter().filter(|f| f.coded).count()
    }

    /// Total number of tokens.
    pub fn token_count(&self) -> usize {
        self.fragments.iter().map(|f| f.tokens.len()).sum()
    }

    /// Expand the tokens back into decoder input.
    ///
    /// End-of-block runs carry over from one coded fragment to the next.
    pub fn to_frame_data(&self) -> Result<FrameData> {
        let coded: Vec<Vec<Token>> = self
            .fragments
            .iter()
            .filter(|ef| ef.coded)
            .map(|ef| ef.tokens.clone())
            .collect();
        let mut blocks = expand_blocks(&coded)?.into_iter();

        let mut fragments = Vec::with_capacity(self.fragments.len());
        for ef in &self.fragments {
            if !ef.coded {
                fragments.push(Fragment::uncoded());
                continue;
            }
            let coeffs = blocks.next().ok_or(TheoraError::TokenOverrun {
                index: 0,
                reason: "missing coded block",
            })?;
            fragments.push(Fragment::inter(ef.mode, ef.mv, coeffs));
        }
        Ok(FrameData::new(self.frame_type, self.qi, fragments))
    }
}

fn sad(src: &[u8], pos: usize, stride: usize, pred: &[u8; 64]) -> u32 {
    let mut sum = 0u32;
    for r in 0..BLOCK_SIZE {
        let row = &src[pos + r * stride..pos + r * stride + BLOCK_SIZE];
        for c in 0..BLOCK_SIZE {
            sum += (row[c] as i32 - pred[r * BLOCK_SIZE + c] as i32).unsigned_abs();
        }
    }
    sum
}

fn intra_cost(src: &[u8], pos: usize, stride: usize) -> u32 {
    let mut total = 0u32;
    for r in 0..BLOCK_SIZE {
        total += src[pos + r * stride..pos + r * stride + BLOCK_SIZE]
            .iter()
            .map(|&p| p as u32)
            .sum::<u32>();
    }
    let mean = ((total + 32) / 64) as u8;
    sad(src, pos, stride, &[mean; 64]) + INTRA_PENALTY
}

/// Theora encoder.
#[derive(Debug)]
pub struct TheoraEncoder {
    config: TheoraConfig,
    enc: EncoderConfig,
    tables: QuantTables,
    /// Reconstructed reference frames, kept in step with the decoder.
    buffers: FrameBufferManager,
    /// Current input frame in the padded layout.
    source: FrameBuffer,
    dsp: Box<dyn Transforms>,
    /// Cached dequantization tables and fragment scratch.
    context: FrameContext,
    /// Frame counter.
    frame_count: u64,
    /// Frames since the last key frame.
    since_key: u32,
}

impl TheoraEncoder {
    /// Create a new Theora encoder.
    pub fn new(config: TheoraConfig, enc: EncoderConfig, info: &QuantInfo) -> Result<Self> {
        let tables = QuantTables::build(info)?;
        let layout = FrameLayout::new(&config)?;
        let dsp = select_transforms(&detect_capabilities());
        let context = FrameContext::new(&tables);
        debug!(
            width = config.frame_width,
            height = config.frame_height,
            quality = enc.quality,
            sharpness = ?enc.sharpness,
            "Created Theora encoder"
        );
        Ok(Self {
            source: FrameBuffer::new(&layout),
            buffers: FrameBufferManager::new(layout),
            config,
            enc,
            tables,
            dsp,
            context,
            frame_count: 0,
            since_key: 0,
        })
    }

    /// Get frame configuration.
    pub fn config(&self) -> &TheoraConfig {
        &self.config
    }

    /// Get encoder tuning.
    pub fn encoder_config(&self) -> &EncoderConfig {
        &self.enc
    }

    /// Fragment geometry.
    pub fn layout(&self) -> &FrameLayout {
        self.buffers.layout()
    }

    /// Serialized quantizer tables for the stream header.
    pub fn quant_header(&self) -> Result<Vec<u8>> {
        write_qtables(self.tables.info())
    }

    /// Visible area of one plane of the most recent reconstruction.
    pub fn reconstruction(&self, plane: Plane) -> Vec<u8> {
        let (w, h) = self.config.picture_dimensions(plane.index());
        let layout = self.buffers.layout().plane(plane);
        self.buffers.last_frame().crop(layout, w as usize, h as usize)
    }

    /// Reference frame buffers.
    pub fn buffers(&self) -> &FrameBufferManager {
        &self.buffers
    }

    /// Get frame count.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Drop all reference state; the next frame is a key frame.
    pub fn reset(&mut self) {
        self.buffers = FrameBufferManager::new(self.buffers.layout().clone());
        self.frame_count = 0;
        self.since_key = 0;
    }

    fn load_source(&mut self, planes: [&[u8]; 3]) -> Result<()> {
        for (plane, input) in Plane::ALL.into_iter().zip(planes) {
            let pl = *self.buffers.layout().plane(plane);
            let required = pl.width * pl.height;
            if input.len() < required {
                return Err(TheoraError::BufferTooSmall {
                    required,
                    available: input.len(),
                });
            }
            let dst = self.source.plane_mut(plane);
            for (y, row) in input.chunks_exact(pl.width).take(pl.height).enumerate() {
                let start = pl.origin + y * pl.stride;
                dst[start..start + pl.width].copy_from_slice(row);
            }
        }
        Ok(())
    }

    /// Encode one frame of tightly packed planes at the coded frame size.
    ///
    /// The first frame, every `keyframe_interval`-th frame and any frame
    /// with `force_key` set are key frames.
    pub fn encode_frame(&mut self, planes: [&[u8]; 3], force_key: bool) -> Result<EncodedFrame> {
        self.load_source(planes)?;

        let key = force_key || self.frame_count == 0 || self.since_key >= self.enc.keyframe_interval;
        let frame_type = if key {
            FrameType::Intra
        } else {
            FrameType::Predicted
        };
        let qi = self.enc.quality;
        let quantizers = FrameQuantizers::new(&self.tables, qi, self.enc.sharpness);
        let planes_layout = *self.buffers.layout().planes();

        let mut frags = Vec::with_capacity(self.buffers.layout().num_fragments());
        for pl in &planes_layout {
            for by in 0..pl.blocks_y {
                for bx in 0..pl.blocks_x {
                    let index = pl.fragment_index(bx, by);
                    let frag = self.code_block(index, pl, bx, by, frame_type, &quantizers)?;
                    frags.push(frag);
                }
            }
        }

        for pl in &planes_layout {
            let range = pl.first_fragment..pl.first_fragment + pl.num_fragments();
            residual_plane_dc(pl, &mut frags[range]);
        }

        let mut coded_tokens = Vec::with_capacity(frags.len());
        for frag in frags.iter().filter(|f| f.coded) {
            coded_tokens.push(tokenize_block(&frag.coeffs)?);
        }
        merge_eob_runs(&mut coded_tokens)?;

        let mut coded_tokens = coded_tokens.into_iter();
        let fragments: Vec<EncodedFragment> = frags
            .iter()
            .map(|frag| EncodedFragment {
                coded: frag.coded,
                mode: frag.mode,
                mv: frag.mv,
                tokens: if frag.coded {
                    coded_tokens.next().unwrap_or_default()
                } else {
                    Vec::new()
                },
            })
            .collect();

        let data = FrameData::new(frame_type, qi, frags);
        reconstruct_frame(
            self.dsp.as_ref(),
            &self.tables,
            &mut self.context,
            &mut self.buffers,
            &data,
        )?;

        self.frame_count += 1;
        self.since_key = if key { 1 } else { self.since_key + 1 };

        let frame = EncodedFrame {
            frame_type,
            qi,
            fragments,
        };
        debug!(
            frame = self.frame_count - 1,
            frame_type = ?frame_type,
            qi,
            n_coded = frame.coded_count(),
            tokens = frame.token_count(),
            "Encoded frame"
        );
        Ok(frame)
    }

    /// Pick a mode for one block and quantize its residual.
    fn code_block(
        &self,
        index: usize,
        pl: &PlaneLayout,
        bx: usize,
        by: usize,
        frame_type: FrameType,
        quantizers: &FrameQuantizers,
    ) -> Result<Fragment> {
        let dsp = self.dsp.as_ref();
        let src = self.source.plane(pl.plane);
        let pos = pl.block_offset(bx, by);
        let stride = pl.stride;

        let (mode, mv, pred) = if frame_type == FrameType::Intra {
            (CodingMode::Intra, MotionVector::zero(), None)
        } else {
            self.choose_mode(index, pl, pos)?
        };

        let residual = match &pred {
            Some(p) => dsp.sub_predicted(src, pos, stride, p),
            None => dsp.sub_intra(src, pos, stride),
        };
        let coeffs = quantize(&dsp.fdct(&residual), quantizers.select(frame_type, pl.plane, mode));

        if mode == CodingMode::InterNoMv && coeffs.iter().all(|&c| c == 0) {
            return Ok(Fragment::uncoded());
        }
        Ok(match mode {
            CodingMode::Intra => Fragment::intra(coeffs),
            _ => Fragment::inter(mode, mv, coeffs),
        })
    }

    /// Cheapest of intra, last without motion, golden without motion and
    /// last with a searched vector.
    fn choose_mode(
        &self,
        index: usize,
        pl: &PlaneLayout,
        pos: usize,
    ) -> Result<(CodingMode, MotionVector, Option<[u8; 64]>)> {
        let recon = MotionReconstructor::new(self.dsp.as_ref());
        let src = self.source.plane(pl.plane);
        let last = self.buffers.last_frame().plane(pl.plane);
        let golden = self.buffers.golden_frame().plane(pl.plane);
        let stride = pl.stride;

        let predict = |mode: CodingMode, mv: MotionVector| {
            let frag = Fragment::inter(mode, mv, [0; 64]);
            recon.prediction(index, pl, pos, &frag, last, golden)
        };

        let no_mv = predict(CodingMode::InterNoMv, MotionVector::zero())?;
        let mut best = (CodingMode::InterNoMv, MotionVector::zero(), no_mv);
        let mut best_cost = sad(src, pos, stride, &no_mv);

        let gold = predict(CodingMode::InterGolden, MotionVector::zero())?;
        let cost = sad(src, pos, stride, &gold);
        if cost < best_cost {
            best = (CodingMode::InterGolden, MotionVector::zero(), gold);
            best_cost = cost;
        }

        let (mv, mv_pred, mv_cost) = self.search(pl, pos, &predict)?;
        if mv_cost < best_cost {
            best = (CodingMode::InterMv, mv, mv_pred);
            best_cost = mv_cost;
        }

        if intra_cost(src, pos, stride) < best_cost {
            trace!(index, "Intra block in predicted frame");
            return Ok((CodingMode::Intra, MotionVector::zero(), None));
        }
        Ok((best.0, best.1, Some(best.2)))
    }

    /// Whole-pixel search around zero, then a sub-pixel refinement step.
    fn search<F>(&self, pl: &PlaneLayout, pos: usize, predict: &F) -> Result<(MotionVector, [u8; 64], u32)>
    where
        F: Fn(CodingMode, MotionVector) -> Result<[u8; 64]>,
    {
        let src = self.source.plane(pl.plane);
        let (xs, ys) = pl.mv_shift();
        let (ux, uy) = (1i16 << xs, 1i16 << ys);
        let range = self.enc.search_range as i16;

        let eval = |mv: MotionVector, best: &mut Option<(MotionVector, [u8; 64], u32)>| -> Result<()> {
            if !mv.in_range() {
                return Ok(());
            }
            let pred = predict(CodingMode::InterMv, mv)?;
            let cost = sad(src, pos, pl.stride, &pred) + MV_PENALTY;
            if best.as_ref().map_or(true, |b| cost < b.2) {
                *best = Some((mv, pred, cost));
            }
            Ok(())
        };

        let mut best = None;
        for dy in -range..=range {
            for dx in -range..=range {
                if dx != 0 || dy != 0 {
                    eval(MotionVector::new(dx * ux, dy * uy), &mut best)?;
                }
            }
        }
        if let Some((center, _, _)) = best {
            for ey in -1..=1 {
                for ex in -1..=1 {
                    if ex != 0 || ey != 0 {
                        eval(center.add(&MotionVector::new(ex, ey)), &mut best)?;
                    }
                }
            }
        }
        Ok(best.unwrap_or((MotionVector::zero(), [0; 64], u32::MAX)))
    }
}
