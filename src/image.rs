//! Buffer types: the single-channel mosaic and the channel-interleaved raster.

use std::ops::{Index, IndexMut};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cfa::FilterPattern;
use crate::error::{DevelopError, Result};

/// One raster pixel: up to four channel samples.
pub type Pixel = [u16; 4];

/// Largest representable sample.
pub const MAX_SAMPLE: u16 = u16::MAX;

/// Clamp an integer into the sample range.
#[inline(always)]
pub(crate) fn clip(v: i32) -> u16 {
    v.clamp(0, MAX_SAMPLE as i32) as u16
}

/// Clamp a float into the sample range, rounding to nearest.
#[inline(always)]
pub(crate) fn clip_f32(v: f32) -> u16 {
    (v + 0.5).clamp(0.0, MAX_SAMPLE as f32) as u16
}

/// Per-channel black levels, raw maximum and pre-normalized multipliers
/// reported by the raw decoder.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorLevels {
    /// Black level per channel.
    pub black: [u16; 4],
    /// Raw value at sensor saturation.
    pub maximum: u16,
    /// Sensor multipliers, normalized so the smallest is 1.0.
    pub multipliers: [f32; 4],
}

impl Default for SensorLevels {
    fn default() -> Self {
        Self { black: [0; 4], maximum: MAX_SAMPLE, multipliers: [1.0; 4] }
    }
}

impl SensorLevels {
    /// Rescale so the smallest multiplier of the first `colors` channels is 1.0.
    pub fn normalized(mut self, colors: usize) -> Self {
        let min = self.multipliers[..colors]
            .iter()
            .copied()
            .filter(|m| *m > 0.0)
            .fold(f32::INFINITY, f32::min);
        if min.is_finite() {
            for m in &mut self.multipliers {
                *m /= min;
            }
        }
        self
    }

    fn is_identity(&self) -> bool {
        self.black == [0; 4] && self.maximum == MAX_SAMPLE && self.multipliers == [1.0; 4]
    }

    /// Gain per channel from black-subtracted samples to the 16-bit range.
    fn gains(&self) -> [f32; 4] {
        std::array::from_fn(|c| {
            let range = self.maximum.saturating_sub(self.black[c]).max(1) as f32;
            self.multipliers[c] * MAX_SAMPLE as f32 / range
        })
    }
}

/// Raw photosite grid: one sample per pixel, tagged with its filter pattern.
#[derive(Clone, Debug, PartialEq)]
pub struct MosaicImage {
    width: usize,
    height: usize,
    top_margin: usize,
    left_margin: usize,
    pattern: FilterPattern,
    data: Vec<u16>,
}

impl MosaicImage {
    /// Wrap an active-area sample buffer.
    pub fn new(width: usize, height: usize, pattern: FilterPattern, data: Vec<u16>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(DevelopError::InvalidDimensions { width, height });
        }
        if data.len() != width * height {
            return Err(DevelopError::MosaicSizeMismatch { expected: width * height, got: data.len() });
        }
        if !pattern.is_well_formed() {
            return Err(DevelopError::InvalidPattern(pattern.to_string()));
        }
        Ok(Self { width, height, top_margin: 0, left_margin: 0, pattern: pattern.normalized(), data })
    }

    /// Cut the active area out of a full sensor readout.
    ///
    /// `pattern` is given relative to the readout origin; the stored
    /// pattern is shifted so that `pattern()` resolves active-area
    /// coordinates.
    #[allow(clippy::too_many_arguments)]
    pub fn with_margins(
        raw: &[u16],
        raw_width: usize,
        raw_height: usize,
        top_margin: usize,
        left_margin: usize,
        width: usize,
        height: usize,
        pattern: FilterPattern,
    ) -> Result<Self> {
        if raw.len() != raw_width * raw_height {
            return Err(DevelopError::MosaicSizeMismatch { expected: raw_width * raw_height, got: raw.len() });
        }
        if width == 0 || height == 0 || top_margin + height > raw_height || left_margin + width > raw_width {
            return Err(DevelopError::InvalidDimensions { width, height });
        }
        let data = (top_margin..top_margin + height)
            .flat_map(|row| &raw[row * raw_width + left_margin..row * raw_width + left_margin + width])
            .copied()
            .collect();
        let mut image = Self::new(width, height, pattern.shifted(top_margin, left_margin), data)?;
        image.top_margin = top_margin;
        image.left_margin = left_margin;
        Ok(image)
    }

    /// Build a mosaic by sampling `f(row, col, channel)` at every photosite.
    pub fn from_fn(
        width: usize,
        height: usize,
        pattern: FilterPattern,
        f: impl Fn(usize, usize, usize) -> u16,
    ) -> Result<Self> {
        let mut data = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                data.push(f(row, col, pattern.fc(row, col)));
            }
        }
        Self::new(width, height, pattern, data)
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Offset of the active area within the sensor readout.
    pub fn margins(&self) -> (usize, usize) {
        (self.top_margin, self.left_margin)
    }

    /// Filter pattern resolved in active-area coordinates.
    pub fn pattern(&self) -> &FilterPattern {
        &self.pattern
    }

    /// Number of channels the pattern produces (3 or 4).
    pub fn colors(&self) -> usize {
        self.pattern.colors()
    }

    /// Raw samples, row-major.
    pub fn data(&self) -> &[u16] {
        &self.data
    }

    /// Mutable raw samples, row-major.
    pub fn data_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }

    /// Sample at `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u16 {
        debug_assert!(row < self.height && col < self.width);
        self.data[row * self.width + col]
    }

    /// Replace the pattern, e.g. to split the Bayer greens into four channels.
    pub fn set_pattern(&mut self, pattern: FilterPattern) {
        debug_assert!(pattern.is_well_formed());
        self.pattern = pattern.normalized();
    }

    /// Subtract black, apply the sensor multipliers and stretch to 16 bits.
    pub fn scale_levels(&mut self, levels: &SensorLevels) {
        if levels.is_identity() {
            return;
        }
        let scale = levels.gains();
        let width = self.width;
        let pattern = &self.pattern;
        self.data.par_chunks_mut(width).enumerate().for_each(|(row, line)| {
            let colors = pattern.row_colors(row);
            for (col, v) in line.iter_mut().enumerate() {
                let c = colors.at(col);
                let lifted = v.saturating_sub(levels.black[c]) as f32;
                *v = clip_f32(lifted * scale[c]);
            }
        });
    }

    /// Count samples per channel into `65536 >> shift` bins.
    pub fn histogram(&self, shift: u32) -> RawHistogram {
        let bins = (1usize << 16) >> shift.min(16);
        let mut counts: [Vec<u32>; 4] = std::array::from_fn(|_| vec![0; bins.max(1)]);
        for row in 0..self.height {
            let colors = self.pattern.row_colors(row);
            for (col, &v) in self.data[row * self.width..(row + 1) * self.width].iter().enumerate() {
                let bin = ((v as usize) >> shift.min(16)).min(bins.max(1) - 1);
                counts[colors.at(col)][bin] += 1;
            }
        }
        RawHistogram { shift, counts }
    }

    /// Collapse every 2x2 Bayer quad into one pixel without interpolation.
    ///
    /// Returns `None` for patterns that are not 2x2 periodic. Duplicate
    /// channels within a quad are averaged.
    pub fn half_size(&self) -> Option<Raster> {
        if !self.pattern.is_bayer() {
            return None;
        }
        let width = self.width / 2;
        let height = self.height / 2;
        if width == 0 || height == 0 {
            return None;
        }
        let colors = self.colors();
        let mut raster = Raster::new(width, height, colors);
        raster.pixels.par_chunks_mut(width).enumerate().for_each(|(row, line)| {
            for (col, pix) in line.iter_mut().enumerate() {
                let mut sum = [0u32; 4];
                let mut count = [0u32; 4];
                for dy in 0..2 {
                    for dx in 0..2 {
                        let (r, c) = (row * 2 + dy, col * 2 + dx);
                        let ch = self.pattern.fc(r, c);
                        sum[ch] += self.data[r * self.width + c] as u32;
                        count[ch] += 1;
                    }
                }
                for c in 0..4 {
                    if count[c] > 0 {
                        pix[c] = ((sum[c] + count[c] / 2) / count[c]) as u16;
                    }
                }
            }
        });
        Some(raster)
    }
}

/// Channel-wise counts over the mosaic.
#[derive(Clone, Debug, PartialEq)]
pub struct RawHistogram {
    shift: u32,
    counts: [Vec<u32>; 4],
}

impl RawHistogram {
    /// Bins of channel `c`.
    pub fn channel(&self, c: usize) -> &[u32] {
        &self.counts[c]
    }

    /// Right shift applied to samples before binning.
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Samples counted for channel `c`.
    pub fn total(&self, c: usize) -> u64 {
        self.counts[c].iter().map(|&n| n as u64).sum()
    }

    /// Smallest sample value (bin start) reached by the top `fraction` of
    /// channel `c`, e.g. `0.01` for the 99th percentile.
    pub fn upper_percentile(&self, c: usize, fraction: f64) -> u16 {
        let total = self.total(c);
        let target = (total as f64 * fraction.clamp(0.0, 1.0)) as u64;
        let mut seen = 0u64;
        for (bin, &n) in self.counts[c].iter().enumerate().rev() {
            seen += n as u64;
            if seen > target {
                return ((bin as u32) << self.shift).min(MAX_SAMPLE as u32) as u16;
            }
        }
        0
    }
}

/// Channel-interleaved raster of [`Pixel`] records.
///
/// `colors` says how many of the four slots carry data (3 or 4).
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    width: usize,
    height: usize,
    colors: usize,
    pixels: Vec<Pixel>,
}

impl Raster {
    /// Zero-filled raster.
    pub fn new(width: usize, height: usize, colors: usize) -> Self {
        debug_assert!(colors == 3 || colors == 4);
        Self { width, height, colors, pixels: vec![[0; 4]; width * height] }
    }

    /// Wrap an existing pixel buffer.
    pub fn from_pixels(width: usize, height: usize, colors: usize, pixels: Vec<Pixel>) -> Result<Self> {
        if !(colors == 3 || colors == 4) {
            return Err(DevelopError::InvalidColors(colors));
        }
        if pixels.len() != width * height {
            return Err(DevelopError::RasterSizeMismatch { expected: width * height, got: pixels.len() });
        }
        Ok(Self { width, height, colors, pixels })
    }

    /// Place every mosaic sample into its native channel; others stay zero.
    pub fn from_mosaic(mosaic: &MosaicImage) -> Self {
        let width = mosaic.width;
        let mut raster = Self::new(width, mosaic.height, mosaic.colors());
        raster.pixels.par_chunks_mut(width).enumerate().for_each(|(row, line)| {
            let colors = mosaic.pattern.row_colors(row);
            let src = &mosaic.data[row * width..(row + 1) * width];
            for (col, (pix, &v)) in line.iter_mut().zip(src).enumerate() {
                pix[colors.at(col)] = v;
            }
        });
        raster
    }

    /// Sample the native channel of each pixel back into a mosaic.
    pub fn remosaic(&self, pattern: &FilterPattern) -> MosaicImage {
        let mut data = Vec::with_capacity(self.pixels.len());
        for row in 0..self.height {
            let colors = pattern.row_colors(row);
            for col in 0..self.width {
                data.push(self.pixels[row * self.width + col][colors.at(col)]);
            }
        }
        MosaicImage {
            width: self.width,
            height: self.height,
            top_margin: 0,
            left_margin: 0,
            pattern: pattern.clone().normalized(),
            data,
        }
    }

    /// Width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Populated channel count.
    pub fn colors(&self) -> usize {
        self.colors
    }

    /// Pixel at `(row, col)`.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> &Pixel {
        debug_assert!(row < self.height && col < self.width);
        &self.pixels[row * self.width + col]
    }

    /// Mutable pixel at `(row, col)`.
    #[inline]
    pub fn get_mut(&mut self, row: usize, col: usize) -> &mut Pixel {
        debug_assert!(row < self.height && col < self.width);
        &mut self.pixels[row * self.width + col]
    }

    /// All pixels, row-major.
    pub fn pixels(&self) -> &[Pixel] {
        &self.pixels
    }

    /// All pixels, row-major, mutable.
    pub fn pixels_mut(&mut self) -> &mut [Pixel] {
        &mut self.pixels
    }

    /// Reinterpret the buffer with new dimensions of the same area.
    pub(crate) fn reshape(&mut self, width: usize, height: usize) {
        debug_assert_eq!(width * height, self.pixels.len());
        self.width = width;
        self.height = height;
    }

    /// Consume and return the pixel buffer.
    pub fn into_pixels(self) -> Vec<Pixel> {
        self.pixels
    }

    /// [`MosaicImage::scale_levels`] for samples that are already full
    /// colour, such as a pixel-shift merge.
    pub fn scale_levels(&mut self, levels: &SensorLevels) {
        if levels.is_identity() {
            return;
        }
        let scale = levels.gains();
        let colors = self.colors;
        self.pixels.par_iter_mut().for_each(|pix| {
            for c in 0..colors {
                pix[c] = clip_f32(pix[c].saturating_sub(levels.black[c]) as f32 * scale[c]);
            }
        });
    }

    /// Fold the second Bayer green into channel 1 and drop to three channels.
    pub fn merge_fourth_green(&mut self) {
        if self.colors != 4 {
            return;
        }
        self.pixels.par_iter_mut().for_each(|pix| {
            pix[1] = ((pix[1] as u32 + pix[3] as u32) >> 1) as u16;
            pix[3] = 0;
        });
        self.colors = 3;
    }

    /// Interleaved 16-bit RGB samples for encoders.
    pub fn to_rgb16(&self) -> Vec<u16> {
        self.pixels.iter().flat_map(|p| [p[0], p[1], p[2]]).collect()
    }
}

impl Index<(usize, usize)> for Raster {
    type Output = Pixel;

    #[inline]
    fn index(&self, (row, col): (usize, usize)) -> &Pixel {
        self.get(row, col)
    }
}

impl IndexMut<(usize, usize)> for Raster {
    #[inline]
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut Pixel {
        self.get_mut(row, col)
    }
}

/// 8-bit RGB image handed to display renderers.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct DisplayImage {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Row-major RGB triplets.
    pub pixels: Vec<[u8; 3]>,
}
