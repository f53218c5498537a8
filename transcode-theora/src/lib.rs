//! Theora/VP3 transform and reconstruction core.
//!
//! Theora is an open, royalty-free video codec developed by the Xiph.Org Foundation.
//! It is based on the VP3 codec. This crate implements the numerically exact part
//! of the codec: everything between the entropy layer and the reference frames.
//!
//! # Features
//!
//! - Quantizer table construction from header base matrices, with header
//!   serialization and parsing
//! - Forward quantization with a sharpness-controlled dead zone
//! - Bit-exact integer 8x8 inverse DCT with DC-only, 3- and 10-coefficient
//!   shortcuts, and the matching forward DCT
//! - Coefficient tokenization and token expansion
//! - Motion-compensated reconstruction with half-pixel interpolation and
//!   spatial DC prediction
//! - In-loop deblocking filter
//! - Reference frame management (last/golden frames, UMV border extension)
//!
//! # Example
//!
//! ```ignore
//! use transcode_theora::{Plane, QuantInfo, TheoraConfig, TheoraDecoder};
//!
//! let config = TheoraConfig::new(320, 240)?;
//! let mut decoder = TheoraDecoder::new(config, &QuantInfo::vp3_default())?;
//! decoder.decode_frame(&frame_data)?;
//! let luma = decoder.picture(Plane::Y);
//! ```

#![allow(clippy::needless_range_loop)]
#![allow(clippy::too_many_arguments)]

pub mod bitpack;
pub mod dc_pred;
pub mod decoder;
pub mod dsp;
#[cfg(feature = "encoder")]
pub mod encoder;
pub mod error;
pub mod fdct;
pub mod fragment;
pub mod frame;
pub mod idct;
pub mod loop_filter;
pub mod quant;
pub mod quantizer;
pub mod recon;
pub mod token;

pub use decoder::{FrameData, TheoraDecoder};
pub use dsp::{detect_capabilities, select_transforms, CpuCapabilities, GenericTransforms, Transforms};
pub use error::{Result, TheoraError};
pub use fragment::{Fragment, FrameLayout};
pub use frame::{FrameBuffer, FrameBufferManager};
pub use loop_filter::BoundingValues;
pub use quant::{read_qtables, write_qtables, DequantTable, QuantInfo, QuantRanges, QuantTables};
pub use quantizer::{QuantizerSet, Sharpness};
pub use recon::MotionReconstructor;
pub use token::{
    expand_blocks, expand_token, merge_eob_runs, tokenize_block, CoeffCursor, Token, TokenKind,
};

#[cfg(feature = "encoder")]
pub use encoder::{EncodedFragment, EncodedFrame, EncoderConfig, TheoraEncoder};

/// Block size for DCT.
pub const BLOCK_SIZE: usize = 8;

/// Number of quality indices.
pub const QI_COUNT: usize = 64;

/// Largest legal motion vector component, in luma half-pixel units.
pub const MAX_MV: i16 = 31;

/// Width of the padded border around the luma plane.
pub const LUMA_BORDER: usize = 32;

/// Width of the padded border around the chroma planes.
pub const CHROMA_BORDER: usize = LUMA_BORDER / 2;

/// Zigzag scan order for 8x8 blocks: zigzag index to raster position.
pub const ZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27, 20,
    13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58, 59,
    52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Raster position to zigzag index (inverse of [`ZIGZAG`]).
pub const ZIGZAG_INDEX: [usize; 64] = invert_zigzag();

const fn invert_zigzag() -> [usize; 64] {
    let mut inv = [0usize; 64];
    let mut i = 0;
    while i < 64 {
        inv[ZIGZAG[i]] = i;
        i += 1;
    }
    inv
}

/// Theora pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// YCbCr 4:2:0.
    #[default]
    Yuv420,
    /// YCbCr 4:2:2.
    Yuv422,
    /// YCbCr 4:4:4.
    Yuv444,
}

impl PixelFormat {
    /// Get chroma subsampling factors (horizontal, vertical).
    pub fn chroma_subsampling(&self) -> (u32, u32) {
        match self {
            Self::Yuv420 => (2, 2),
            Self::Yuv422 => (2, 1),
            Self::Yuv444 => (1, 1),
        }
    }
}

impl TryFrom<u8> for PixelFormat {
    type Error = TheoraError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Yuv420),
            2 => Ok(Self::Yuv422),
            3 => Ok(Self::Yuv444),
            _ => Err(TheoraError::config(format!("Invalid pixel format: {}", value))),
        }
    }
}

/// Image plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    /// Luma.
    Y = 0,
    /// Blue-difference chroma.
    U = 1,
    /// Red-difference chroma.
    V = 2,
}

impl Plane {
    /// All planes in coding order.
    pub const ALL: [Plane; 3] = [Plane::Y, Plane::U, Plane::V];

    /// Plane index (0=Y, 1=U, 2=V).
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this is a chroma plane.
    pub fn is_chroma(self) -> bool {
        self != Plane::Y
    }
}

impl TryFrom<usize> for Plane {
    type Error = TheoraError;

    fn try_from(value: usize) -> Result<Self> {
        match value {
            0 => Ok(Self::Y),
            1 => Ok(Self::U),
            2 => Ok(Self::V),
            _ => Err(TheoraError::config(format!("Invalid plane index: {}", value))),
        }
    }
}

/// Frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameType {
    /// Intra frame (keyframe).
    #[default]
    Intra,
    /// Predicted frame.
    Predicted,
}

impl FrameType {
    /// Quantizer table index: 0 for intra, 1 for inter.
    pub fn qti(self) -> usize {
        match self {
            Self::Intra => 0,
            Self::Predicted => 1,
        }
    }
}

/// Reference frame a block predicts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefFrame {
    /// No reference, flat 128 predictor.
    Intra,
    /// Previous reconstructed frame.
    Last,
    /// Golden frame.
    Golden,
}

impl RefFrame {
    /// DC prediction class: 0 = intra, 1 = last frame, 2 = golden frame.
    pub fn class(self) -> usize {
        match self {
            Self::Intra => 0,
            Self::Last => 1,
            Self::Golden => 2,
        }
    }
}

/// Coding mode for blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodingMode {
    /// Intra-coded.
    #[default]
    Intra,
    /// Inter, no motion.
    InterNoMv,
    /// Inter with motion vector.
    InterMv,
    /// Inter with motion from last frame.
    InterMvLast,
    /// Inter with motion from last2 frame.
    InterMvLast2,
    /// Inter using golden frame.
    InterGolden,
    /// Inter using golden frame with motion.
    InterGoldenMv,
    /// Four motion vectors.
    InterFourMv,
}

impl CodingMode {
    /// Reference frame selected by this mode.
    pub fn reference(self) -> RefFrame {
        match self {
            Self::Intra => RefFrame::Intra,
            Self::InterGolden | Self::InterGoldenMv => RefFrame::Golden,
            _ => RefFrame::Last,
        }
    }

    /// Whether the block is intra-coded.
    pub fn is_intra(self) -> bool {
        self == Self::Intra
    }

    /// Whether the block's motion vector is applied.
    pub fn uses_mv(self) -> bool {
        matches!(
            self,
            Self::InterMv
                | Self::InterMvLast
                | Self::InterMvLast2
                | Self::InterGoldenMv
                | Self::InterFourMv
        )
    }
}

impl TryFrom<u8> for CodingMode {
    type Error = TheoraError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Intra),
            1 => Ok(Self::InterNoMv),
            2 => Ok(Self::InterMv),
            3 => Ok(Self::InterMvLast),
            4 => Ok(Self::InterMvLast2),
            5 => Ok(Self::InterGolden),
            6 => Ok(Self::InterGoldenMv),
            7 => Ok(Self::InterFourMv),
            _ => Err(TheoraError::BitstreamError(format!(
                "Invalid coding mode: {}",
                value
            ))),
        }
    }
}

/// Motion vector.
///
/// Units are half pixels on the luma plane and quarter pixels on 2x
/// subsampled chroma axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionVector {
    /// X component.
    pub x: i16,
    /// Y component.
    pub y: i16,
}

impl MotionVector {
    /// Create zero motion vector.
    pub fn zero() -> Self {
        Self { x: 0, y: 0 }
    }

    /// Create new motion vector.
    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }

    /// Add two motion vectors.
    pub fn add(&self, other: &MotionVector) -> MotionVector {
        MotionVector {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    /// Whether both components lie within the legal range.
    pub fn in_range(&self) -> bool {
        (-MAX_MV..=MAX_MV).contains(&self.x) && (-MAX_MV..=MAX_MV).contains(&self.y)
    }
}

/// Theora codec configuration.
#[derive(Debug, Clone)]
pub struct TheoraConfig {
    /// Picture width in pixels.
    pub pic_width: u32,
    /// Picture height in pixels.
    pub pic_height: u32,
    /// Frame width (multiple of 16).
    pub frame_width: u32,
    /// Frame height (multiple of 16).
    pub frame_height: u32,
    /// Pixel format.
    pub pixel_format: PixelFormat,
}

impl TheoraConfig {
    /// Create new configuration with defaults.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 || width > 0xF_FFF0 || height > 0xF_FFF0 {
            return Err(TheoraError::InvalidDimensions { width, height });
        }

        // Frame dimensions must be multiples of 16
        let frame_width = (width + 15) & !15;
        let frame_height = (height + 15) & !15;

        Ok(Self {
            pic_width: width,
            pic_height: height,
            frame_width,
            frame_height,
            pixel_format: PixelFormat::Yuv420,
        })
    }

    /// Set pixel format.
    pub fn set_pixel_format(&mut self, format: PixelFormat) {
        self.pixel_format = format;
    }

    /// Get number of blocks for a plane.
    pub fn num_blocks(&self, plane: usize) -> usize {
        let (width, height) = self.plane_dimensions(plane);
        (width as usize / BLOCK_SIZE) * (height as usize / BLOCK_SIZE)
    }

    /// Get plane dimensions.
    pub fn plane_dimensions(&self, plane: usize) -> (u32, u32) {
        if plane == 0 {
            (self.frame_width, self.frame_height)
        } else {
            let (h_sub, v_sub) = self.pixel_format.chroma_subsampling();
            (self.frame_width / h_sub, self.frame_height / v_sub)
        }
    }

    /// Get plane dimensions of the visible picture.
    pub fn picture_dimensions(&self, plane: usize) -> (u32, u32) {
        if plane == 0 {
            (self.pic_width, self.pic_height)
        } else {
            let (h_sub, v_sub) = self.pixel_format.chroma_subsampling();
            (self.pic_width.div_ceil(h_sub), self.pic_height.div_ceil(v_sub))
        }
    }
}

impl Default for TheoraConfig {
    fn default() -> Self {
        Self {
            pic_width: 640,
            pic_height: 480,
            frame_width: 640,
            frame_height: 480,
            pixel_format: PixelFormat::Yuv420,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = TheoraConfig::new(1920, 1080).unwrap();
        assert_eq!(config.pic_width, 1920);
        assert_eq!(config.pic_height, 1080);
        assert_eq!(config.frame_width, 1920);
        assert_eq!(config.frame_height, 1088); // Rounded up to multiple of 16
    }

    #[test]
    fn test_config_invalid_dimensions() {
        assert!(TheoraConfig::new(0, 480).is_err());
        assert!(TheoraConfig::new(640, 0).is_err());
    }

    #[test]
    fn test_config_default() {
        let config = TheoraConfig::default();
        assert_eq!(config.pic_width, 640);
        assert_eq!(config.pic_height, 480);
        assert_eq!(config.frame_width, 640);
    }

    #[test]
    fn test_config_pixel_format_setter() {
        let mut config = TheoraConfig::new(100, 50).unwrap();
        assert_eq!((config.frame_width, config.frame_height), (112, 64));
        assert_eq!(config.pixel_format, PixelFormat::Yuv420);
        assert_eq!(config.plane_dimensions(1), (56, 32));

        config.set_pixel_format(PixelFormat::Yuv422);
        assert_eq!(config.plane_dimensions(1), (56, 64));
        assert_eq!(config.picture_dimensions(1), (50, 50));
        assert_eq!(config.plane_dimensions(0), (112, 64));
    }

    #[test]
    fn test_plane_from_index() {
        for plane in Plane::ALL {
            assert_eq!(Plane::try_from(plane.index()).unwrap(), plane);
        }
        assert!(matches!(
            Plane::try_from(3usize),
            Err(TheoraError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_pixel_format() {
        assert_eq!(PixelFormat::Yuv420.chroma_subsampling(), (2, 2));
        assert_eq!(PixelFormat::Yuv422.chroma_subsampling(), (2, 1));
        assert_eq!(PixelFormat::Yuv444.chroma_subsampling(), (1, 1));
    }

    #[test]
    fn test_pixel_format_from_u8() {
        assert_eq!(PixelFormat::try_from(0u8).unwrap(), PixelFormat::Yuv420);
        assert_eq!(PixelFormat::try_from(2u8).unwrap(), PixelFormat::Yuv422);
        assert_eq!(PixelFormat::try_from(3u8).unwrap(), PixelFormat::Yuv444);
        assert!(PixelFormat::try_from(1u8).is_err());
    }

    #[test]
    fn test_coding_mode_from_u8() {
        assert_eq!(CodingMode::try_from(0u8).unwrap(), CodingMode::Intra);
        assert_eq!(CodingMode::try_from(7u8).unwrap(), CodingMode::InterFourMv);
        assert!(CodingMode::try_from(8u8).is_err());
    }

    #[test]
    fn test_coding_mode_reference_class() {
        assert_eq!(CodingMode::Intra.reference().class(), 0);
        assert_eq!(CodingMode::InterNoMv.reference().class(), 1);
        assert_eq!(CodingMode::InterFourMv.reference().class(), 1);
        assert_eq!(CodingMode::InterGolden.reference().class(), 2);
        assert_eq!(CodingMode::InterGoldenMv.reference().class(), 2);
        assert!(!CodingMode::InterGolden.uses_mv());
        assert!(CodingMode::InterGoldenMv.uses_mv());
    }

    #[test]
    fn test_plane_dimensions() {
        let config = TheoraConfig::new(640, 480).unwrap();
        assert_eq!(config.plane_dimensions(0), (640, 480)); // Y
        assert_eq!(config.plane_dimensions(1), (320, 240)); // U
        assert_eq!(config.plane_dimensions(2), (320, 240)); // V
        assert_eq!(config.num_blocks(0), 80 * 60);
        assert_eq!(config.num_blocks(1), 40 * 30);
    }

    #[test]
    fn test_motion_vector() {
        let mv1 = MotionVector::new(5, -3);
        let mv2 = MotionVector::new(-2, 4);
        let sum = mv1.add(&mv2);
        assert_eq!(sum, MotionVector::new(3, 1));
        assert!(MotionVector::new(31, -31).in_range());
        assert!(!MotionVector::new(32, 0).in_range());
    }

    #[test]
    fn test_zigzag_coverage() {
        // Verify zigzag covers all indices exactly once
        let mut seen = [false; 64];
        for &idx in &ZIGZAG {
            assert!(!seen[idx], "Duplicate index in zigzag: {}", idx);
            seen[idx] = true;
        }
        assert!(seen.iter().all(|&s| s), "Missing indices in zigzag");
        for zz in 0..64 {
            assert_eq!(ZIGZAG_INDEX[ZIGZAG[zz]], zz);
        }
    }
}
