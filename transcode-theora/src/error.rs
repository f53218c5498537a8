//! Error types for the Theora reconstruction core.

use thiserror::Error;

/// Theora codec error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TheoraError {
    /// Quantizer range table or scale table is malformed.
    #[error("Invalid quantizer info: {0}")]
    InvalidQuantInfo(String),

    /// Invalid frame dimensions.
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// Invalid codec configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Motion vector reaches past the padded reference border.
    #[error("Motion vector ({x}, {y}) out of range for fragment {fragment}")]
    MotionVectorOutOfRange { fragment: usize, x: i16, y: i16 },

    /// Token stream would write past the last coefficient of a block.
    #[error("Token stream desynchronized at coefficient {index}: {reason}")]
    TokenOverrun { index: usize, reason: &'static str },

    /// Token id outside the VP3 alphabet or extra bits wider than the token allows.
    #[error("Invalid token {token} with extra bits {extra}")]
    InvalidToken { token: u8, extra: u16 },

    /// Coefficient magnitude cannot be represented by any value token.
    #[error("Coefficient {value} at index {index} cannot be tokenized")]
    CoefficientOutOfRange { index: usize, value: i32 },

    /// Header or table data ended early or held an illegal value.
    #[error("Bitstream error: {0}")]
    BitstreamError(String),

    /// Per-frame block data does not match the frame layout.
    #[error("Frame data mismatch: expected {expected} fragments, got {actual}")]
    FragmentCountMismatch { expected: usize, actual: usize },

    /// Input picture plane is smaller than the configured frame.
    #[error("Buffer too small: required {required}, available {available}")]
    BufferTooSmall { required: usize, available: usize },

    /// Inter frame requested before any key frame established the references.
    #[error("No reference frame available")]
    MissingReference,
}

impl TheoraError {
    /// Create an invalid quantizer info error.
    pub fn quant(msg: impl Into<String>) -> Self {
        TheoraError::InvalidQuantInfo(msg.into())
    }

    /// Create an invalid configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        TheoraError::InvalidConfig(msg.into())
    }

    /// Check if this error indicates a corrupt or non-conforming stream
    /// rather than a caller configuration bug.
    #[must_use]
    pub fn is_stream_error(&self) -> bool {
        matches!(
            self,
            TheoraError::MotionVectorOutOfRange { .. }
                | TheoraError::TokenOverrun { .. }
                | TheoraError::InvalidToken { .. }
                | TheoraError::BitstreamError(_)
        )
    }
}

/// Result type for Theora operations.
pub type Result<T> = std::result::Result<T, TheoraError>;
