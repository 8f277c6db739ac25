//! Pipeline configuration.
//!
//! [`PipelineConfig`] derives `serde` traits with `#[serde(default)]`, so a
//! collaborator can persist it in any format and older files missing newer
//! fields still load.

use serde::{Deserialize, Serialize};

use crate::develop::DevelopParams;
use crate::geometry::{Flip, Rect};
use crate::image::SensorLevels;
use crate::{Algorithm, DemosaicContext};

/// Everything that shapes a [`Pipeline`](crate::Pipeline) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Requested demosaicing algorithm; substituted when the layout can't
    /// support it.
    pub algorithm: Algorithm,
    /// Camera matrix used by the perceptual algorithms.
    pub camera: DemosaicContext,
    /// Black levels, saturation and multipliers from the raw decoder.
    pub levels: SensorLevels,
    /// Wavelet denoise threshold; 0 disables it.
    pub denoise_threshold: f32,
    /// Green equilibration threshold for Bayer layouts; 0 disables it.
    pub green_threshold: f32,
    /// Collapse each 2x2 Bayer block into one pixel instead of demosaicing.
    pub half_size: bool,
    /// Hot-pixel threshold in sample units; 0 disables despeckling.
    pub despeckle: f32,
    /// Width over height of one photosite.
    pub pixel_aspect: f64,
    /// Diagonal width of a 45-degree sensor layout; 0 when not rotated.
    pub derotate_width: usize,
    pub flip: Flip,
    /// Clockwise rotation in degrees.
    pub rotation: f64,
    /// Region of the rotated image to keep.
    pub crop: Option<Rect>,
    /// Integer downscale factor.
    pub shrink: usize,
    pub develop: DevelopParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::default(),
            camera: DemosaicContext::default(),
            levels: SensorLevels::default(),
            denoise_threshold: 0.0,
            green_threshold: 0.0,
            half_size: false,
            despeckle: 0.0,
            pixel_aspect: 1.0,
            derotate_width: 0,
            flip: Flip::NONE,
            rotation: 0.0,
            crop: None,
            shrink: 1,
            develop: DevelopParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Start a builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

/// Builder for [`PipelineConfig`]. Unset fields take their defaults.
#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    algorithm: Option<Algorithm>,
    camera: Option<DemosaicContext>,
    levels: Option<SensorLevels>,
    denoise_threshold: Option<f32>,
    green_threshold: Option<f32>,
    half_size: Option<bool>,
    despeckle: Option<f32>,
    pixel_aspect: Option<f64>,
    derotate_width: Option<usize>,
    flip: Option<Flip>,
    rotation: Option<f64>,
    crop: Option<Rect>,
    shrink: Option<usize>,
    develop: Option<DevelopParams>,
}

impl PipelineConfigBuilder {
    /// Set the demosaicing algorithm.
    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = Some(algorithm);
        self
    }

    /// Set the camera to sRGB matrix.
    pub fn camera(mut self, camera: DemosaicContext) -> Self {
        self.camera = Some(camera);
        self
    }

    /// Set the sensor levels.
    pub fn levels(mut self, levels: SensorLevels) -> Self {
        self.levels = Some(levels);
        self
    }

    /// Set the wavelet denoise threshold.
    pub fn denoise(mut self, threshold: f32) -> Self {
        self.denoise_threshold = Some(threshold);
        self
    }

    /// Set the green equilibration threshold.
    pub fn green_equilibration(mut self, threshold: f32) -> Self {
        self.green_threshold = Some(threshold);
        self
    }

    /// Enable half-size extraction.
    pub fn half_size(mut self, half_size: bool) -> Self {
        self.half_size = Some(half_size);
        self
    }

    /// Set the hot-pixel threshold.
    pub fn despeckle(mut self, threshold: f32) -> Self {
        self.despeckle = Some(threshold);
        self
    }

    /// Set the photosite aspect ratio.
    pub fn pixel_aspect(mut self, aspect: f64) -> Self {
        self.pixel_aspect = Some(aspect);
        self
    }

    /// Set the 45-degree sensor width.
    pub fn derotate(mut self, sensor_width: usize) -> Self {
        self.derotate_width = Some(sensor_width);
        self
    }

    /// Set the orientation flags.
    pub fn flip(mut self, flip: Flip) -> Self {
        self.flip = Some(flip);
        self
    }

    /// Set the clockwise rotation in degrees.
    pub fn rotation(mut self, degrees: f64) -> Self {
        self.rotation = Some(degrees);
        self
    }

    /// Keep only `rect` of the rotated image.
    pub fn crop(mut self, rect: Rect) -> Self {
        self.crop = Some(rect);
        self
    }

    /// Set the downscale factor.
    pub fn shrink(mut self, factor: usize) -> Self {
        self.shrink = Some(factor);
        self
    }

    /// Set the development parameters.
    pub fn develop(mut self, params: DevelopParams) -> Self {
        self.develop = Some(params);
        self
    }

    pub fn build(self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            algorithm: self.algorithm.unwrap_or(defaults.algorithm),
            camera: self.camera.unwrap_or(defaults.camera),
            levels: self.levels.unwrap_or(defaults.levels),
            denoise_threshold: self.denoise_threshold.unwrap_or(defaults.denoise_threshold),
            green_threshold: self.green_threshold.unwrap_or(defaults.green_threshold),
            half_size: self.half_size.unwrap_or(defaults.half_size),
            despeckle: self.despeckle.unwrap_or(defaults.despeckle),
            pixel_aspect: self.pixel_aspect.unwrap_or(defaults.pixel_aspect),
            derotate_width: self.derotate_width.unwrap_or(defaults.derotate_width),
            flip: self.flip.unwrap_or(defaults.flip),
            rotation: self.rotation.unwrap_or(defaults.rotation),
            crop: self.crop.or(defaults.crop),
            shrink: self.shrink.unwrap_or(defaults.shrink).max(1),
            develop: self.develop.unwrap_or(defaults.develop),
        }
    }
}
