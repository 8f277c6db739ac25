use thiserror::Error;

/// Errors raised while constructing inputs for the development core.
///
/// Once a [`MosaicImage`](crate::MosaicImage) or [`Raster`](crate::Raster)
/// exists, demosaicing and the phase pipeline never fail; they clamp or
/// substitute algorithms instead.
#[derive(Debug, Error)]
pub enum DevelopError {
    /// Sample buffer length doesn't match `width * height`.
    #[error("mosaic buffer: expected {expected} samples, got {got}")]
    MosaicSizeMismatch { expected: usize, got: usize },

    /// Pixel buffer length doesn't match `width * height`.
    #[error("raster buffer: expected {expected} pixels, got {got}")]
    RasterSizeMismatch { expected: usize, got: usize },

    /// Zero or otherwise unusable dimensions.
    #[error("invalid dimensions {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },

    /// Pattern table holds a channel index out of range.
    #[error("filter pattern {0} holds an out-of-range channel")]
    InvalidPattern(String),

    /// Channel count other than 3 or 4.
    #[error("unsupported channel count {0}")]
    InvalidColors(usize),

    /// A multi-shot source reported no shots.
    #[error("multi-shot source has no shots")]
    NoShots,

    /// A shot differs in geometry from the first one.
    #[error("shot {index} is {got_width}x{got_height}, expected {width}x{height}")]
    ShotMismatch {
        index: usize,
        width: usize,
        height: usize,
        got_width: usize,
        got_height: usize,
    },

    /// The collaborator decoding a shot failed.
    #[error("failed to load shot {index}")]
    ShotSource {
        index: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Crate result alias.
pub type Result<T> = std::result::Result<T, DevelopError>;
