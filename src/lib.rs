//! Raw development core: demosaicing, noise reduction, geometry and colour
//! development of colour filter array sensor data.
//!
//! Takes a single-channel [`MosaicImage`] and reconstructs a full-colour
//! [`Raster`]. Works with 2x2 Bayer layouts (optionally with a separate
//! fourth green), 16x16 periodic tables and 6x6 non-Bayer layouts such as
//! Fujifilm X-Trans.
//!
//! # Algorithms
//!
//! - [`Bilinear`](Algorithm::Bilinear): neighbour averaging, any layout
//! - [`Vng`](Algorithm::Vng): variable number of gradients, any layout
//! - [`Ppg`](Algorithm::Ppg): patterned pixel grouping, 2x2 Bayer
//! - [`Ahd`](Algorithm::Ahd): adaptive homogeneity-directed, 2x2 Bayer
//! - [`SixColor`](Algorithm::SixColor): homogeneity-directed
//!   reconstruction for 6x6 layouts
//!
//! Asking for an algorithm the layout can't support never fails: it is
//! substituted (see [`Algorithm::resolve`]).
//!
//! # Pipeline
//!
//! [`Pipeline`] chains the stages over five [`Phase`]s and keeps a 32-tile
//! validity mask per phase, so interactive callers only recompute what a
//! parameter change made stale.
//!
//! # Example
//!
//! ```
//! use rawdev::{demosaic, Algorithm, DemosaicContext, FilterPattern, MosaicImage};
//!
//! let mosaic = MosaicImage::new(8, 8, FilterPattern::rggb(), vec![8192; 64]).unwrap();
//! let raster = demosaic(&mosaic, Algorithm::Bilinear, &DemosaicContext::default());
//! assert_eq!(raster[(4, 4)][..3], [8192, 8192, 8192]);
//! ```

mod bayer;
mod border;
mod cfa;
pub mod config;
mod denoise;
pub mod develop;
mod error;
mod generic;
pub mod geometry;
mod image;
mod lab;
pub mod multishot;
mod parallel;
pub mod pipeline;
mod xtrans;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

pub use border::border_interpolate;
pub use cfa::{Channel, FilterPattern, RowColors, BAYER_BGGR, BAYER_GBRG, BAYER_GRBG, BAYER_RGGB};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use denoise::{equilibrate_greens, wavelet_denoise, wavelet_denoise_mosaic};
pub use develop::{DevelopParams, Developer};
pub use error::{DevelopError, Result};
pub use geometry::{Flip, Rect};
pub use image::{DisplayImage, MosaicImage, Pixel, RawHistogram, Raster, SensorLevels, MAX_SAMPLE};
pub use lab::{CieLab, IDENTITY_RGB_CAM};
pub use pipeline::{Phase, PhaseBuffer, Pipeline, Source, TileMask};

/// Demosaicing algorithm selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// Bilinear interpolation.
    Bilinear,
    /// Variable Number of Gradients.
    Vng,
    /// Patterned Pixel Grouping. 2x2 Bayer, three channels.
    Ppg,
    /// Adaptive Homogeneity-Directed. 2x2 Bayer, three channels.
    #[default]
    Ahd,
    /// Homogeneity-directed reconstruction for 6x6 layouts. One pass
    /// interpolates along 2 directions; more passes use 4 directions and
    /// `passes - 1` green refinement rounds.
    SixColor {
        /// Quality level, at least 1.
        passes: u32,
    },
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bilinear => f.write_str("Bilinear"),
            Self::Vng => f.write_str("VNG"),
            Self::Ppg => f.write_str("PPG"),
            Self::Ahd => f.write_str("AHD"),
            Self::SixColor { passes } => write!(f, "six-colour ({passes}-pass)"),
        }
    }
}

impl Algorithm {
    /// The algorithm that will actually run on `mosaic`.
    ///
    /// PPG and AHD need a 2x2 Bayer layout with three channels and fall
    /// back to VNG otherwise. A 16x16 table that merely repeats a Bayer
    /// quad counts as Bayer, since [`MosaicImage`] stores it as the
    /// equivalent code (see [`FilterPattern::normalized`]). The six-colour
    /// algorithm needs a 6x6 layout and falls back to AHD (and from there
    /// to VNG).
    pub fn resolve(self, mosaic: &MosaicImage) -> Algorithm {
        let pattern = mosaic.pattern();
        match self {
            Self::Ppg | Self::Ahd if !pattern.is_bayer() || mosaic.colors() != 3 => Self::Vng,
            Self::SixColor { .. } if !pattern.is_six_color() => Self::Ahd.resolve(mosaic),
            Self::SixColor { passes } => Self::SixColor { passes: passes.max(1) },
            other => other,
        }
    }
}

/// Camera description the perceptual algorithms need.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DemosaicContext {
    /// Camera channels to linear sRGB.
    pub rgb_cam: [[f32; 4]; 3],
}

impl Default for DemosaicContext {
    fn default() -> Self {
        Self { rgb_cam: IDENTITY_RGB_CAM }
    }
}

/// Demosaic `mosaic` into a fully populated raster.
///
/// The interior comes from `algorithm` (after [`Algorithm::resolve`]),
/// the border from [`border_interpolate`]. Never fails; samples clamp to
/// `0..=65535`.
pub fn demosaic(mosaic: &MosaicImage, algorithm: Algorithm, context: &DemosaicContext) -> Raster {
    let resolved = algorithm.resolve(mosaic);
    if resolved != algorithm {
        debug!(requested = %algorithm, using = %resolved, pattern = %mosaic.pattern(), "algorithm substituted");
    }
    let _span = debug_span!("demosaic", algorithm = %resolved, width = mosaic.width(), height = mosaic.height()).entered();

    match resolved {
        Algorithm::Bilinear => generic::bilinear(mosaic),
        Algorithm::Vng => generic::vng(mosaic),
        Algorithm::Ppg => bayer::ppg(mosaic),
        Algorithm::Ahd => bayer::ahd(mosaic, &CieLab::new(&context.rgb_cam)),
        Algorithm::SixColor { passes } => xtrans::six_color(mosaic, &CieLab::new(&context.rgb_cam), passes),
    }
}
