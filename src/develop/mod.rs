//! Colour development of a demosaiced raster.
//!
//! Per pixel, in order:
//! 1. white balance and exposure gain
//! 2. highlight clip or recovery
//! 3. optional colour matrix
//! 4. tone table (base curve and gamma)
//! 5. external [`ColorTransform`]
//! 6. optional grayscale reduction

mod curve;
mod highlights;
mod transform;

use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use curve::{BaseCurve, Gamma, TABLE_SIZE};
pub use highlights::{recover, Highlights, Recovery};
pub use transform::{ColorTransform, Grayscale};

use crate::geometry::Rect;
use crate::image::{DisplayImage, Pixel, Raster, MAX_SAMPLE};
use curve::{build_table, ToneKey};

/// User-facing development settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevelopParams {
    /// Per-channel white balance multipliers. Normalized on use so the
    /// smallest is 1.0.
    pub white_balance: [f32; 4],
    /// Exposure compensation in EV.
    pub exposure: f32,
    /// Camera to working RGB matrix: output row `i` is the dot product of
    /// `matrix[i]` with the input channels.
    pub matrix: Option<[[f32; 4]; 3]>,
    /// What happens to channels pushed past 65535 by white balance and exposure.
    pub highlights: Highlights,
    /// Gamma exponent.
    pub gamma: f32,
    /// Input below which the gamma curve is linear.
    pub linearity: f32,
    /// Tone curve applied before gamma.
    pub base_curve: BaseCurve,
    /// Final reduction to gray, after the colour transform.
    pub grayscale: Grayscale,
}

impl Default for DevelopParams {
    fn default() -> Self {
        Self {
            white_balance: [1.0; 4],
            exposure: 0.0,
            matrix: None,
            highlights: Highlights::Clip,
            gamma: 0.45,
            linearity: 0.10,
            base_curve: BaseCurve::default(),
            grayscale: Grayscale::None,
        }
    }
}

impl DevelopParams {
    /// White balance scaled so its smallest positive entry is 1.0.
    /// Non-positive entries become 1.0.
    pub fn normalized_white_balance(&self) -> [f32; 4] {
        let min = self
            .white_balance
            .iter()
            .copied()
            .filter(|m| *m > 0.0 && m.is_finite())
            .fold(f32::INFINITY, f32::min);
        if !min.is_finite() {
            return [1.0; 4];
        }
        self.white_balance.map(|m| if m > 0.0 && m.is_finite() { m / min } else { 1.0 })
    }

    /// Linear gain of the exposure setting.
    pub fn exposure_gain(&self) -> f32 {
        2f32.powf(self.exposure)
    }

    /// Range above the clip level that recovery keeps, as a multiple of
    /// the clip level. Always 1.0 when highlights are clipped.
    pub fn headroom(&self) -> f32 {
        match self.highlights {
            Highlights::Clip => 1.0,
            Highlights::Recover(_) => {
                let wb_max = self.normalized_white_balance().into_iter().fold(1.0f32, f32::max);
                (self.exposure_gain() * wb_max).max(1.0)
            }
        }
    }

    fn tone_key(&self) -> ToneKey {
        ToneKey {
            gamma: self.gamma,
            linearity: self.linearity,
            headroom: self.headroom(),
            base_curve: self.base_curve.clone(),
        }
    }
}

/// Applies [`DevelopParams`] to rasters.
///
/// Owns the 16-bit tone table built from the parameters. The table is
/// rebuilt exactly when gamma, linearity, headroom or the base curve
/// change; [`Developer::table_generation`] counts rebuilds.
pub struct Developer {
    params: DevelopParams,
    white_balance: [f32; 4],
    gain: f32,
    headroom: f32,
    key: ToneKey,
    table: Vec<u16>,
    generation: u64,
    transform: Option<Arc<dyn ColorTransform>>,
}

impl Developer {
    pub fn new(params: DevelopParams) -> Self {
        let key = params.tone_key();
        let table = build_table(&key);
        Self {
            white_balance: params.normalized_white_balance(),
            gain: params.exposure_gain(),
            headroom: key.headroom,
            params,
            key,
            table,
            generation: 1,
            transform: None,
        }
    }

    pub fn params(&self) -> &DevelopParams {
        &self.params
    }

    /// Replace the parameters, rebuilding the tone table only if its
    /// inputs changed.
    pub fn set_params(&mut self, params: DevelopParams) {
        let key = params.tone_key();
        if key != self.key {
            self.table = build_table(&key);
            self.generation += 1;
            debug!(generation = self.generation, headroom = key.headroom, "tone table rebuilt");
            self.key = key;
        }
        self.white_balance = params.normalized_white_balance();
        self.gain = params.exposure_gain();
        self.headroom = self.key.headroom;
        self.params = params;
    }

    /// Install or remove the output colour transform.
    pub fn set_transform(&mut self, transform: Option<Arc<dyn ColorTransform>>) {
        self.transform = transform;
    }

    /// Number of tone tables built so far.
    pub fn table_generation(&self) -> u64 {
        self.generation
    }

    /// Multiple of the clip level covered by the tone table.
    pub fn headroom(&self) -> f32 {
        self.headroom
    }

    /// Current tone table.
    pub fn table(&self) -> &[u16] {
        &self.table
    }

    /// Steps 1 to 3 for one pixel of `colors` channels: white balance and
    /// exposure, highlight handling, colour matrix. Values are in sample
    /// units and may exceed 65535 when highlights are recovered.
    pub fn linear(&self, pix: &Pixel, colors: usize) -> [f32; 3] {
        let clip = MAX_SAMPLE as f32;
        let mut v = [0.0f32; 4];
        for c in 0..colors {
            v[c] = pix[c] as f32 * self.white_balance[c] * self.gain;
        }

        let mut rgb = match self.params.matrix {
            Some(_) => [v[0], v[1], v[2]],
            None if colors == 4 => [v[0], (v[1] + v[3]) * 0.5, v[2]],
            None => [v[0], v[1], v[2]],
        };
        rgb = match self.params.highlights {
            Highlights::Clip => rgb.map(|x| x.min(clip)),
            Highlights::Recover(mode) => recover(rgb, clip, mode),
        };
        if colors == 4 && self.params.matrix.is_some() {
            v[3] = match self.params.highlights {
                Highlights::Clip => v[3].min(clip),
                Highlights::Recover(_) => v[3],
            };
        }

        match &self.params.matrix {
            None => rgb,
            Some(m) => {
                let input = [rgb[0], rgb[1], rgb[2], v[3]];
                std::array::from_fn(|i| (0..colors).map(|j| m[i][j] * input[j]).sum())
            }
        }
    }

    /// Steps 1 to 4: linear value through the tone table.
    #[inline]
    fn tone(&self, pix: &Pixel, colors: usize) -> Pixel {
        let rgb = self.linear(pix, colors);
        let scale = 1.0 / self.headroom;
        let mut out = [0u16; 4];
        for c in 0..3 {
            let idx = (rgb[c] * scale + 0.5).clamp(0.0, MAX_SAMPLE as f32) as usize;
            out[c] = self.table[idx];
        }
        out
    }

    /// Develop one row of pixels into `out` (same length).
    pub fn develop_row(&self, src: &[Pixel], colors: usize, out: &mut [Pixel]) {
        for (o, p) in out.iter_mut().zip(src) {
            *o = self.tone(p, colors);
        }
        if let Some(transform) = &self.transform {
            transform.apply(out);
        }
        if self.params.grayscale != Grayscale::None {
            for p in out.iter_mut() {
                self.params.grayscale.apply(p);
            }
        }
    }

    /// Develop a whole raster, rows in parallel.
    pub fn develop(&self, src: &Raster) -> Raster {
        let width = src.width();
        let mut out = Raster::new(width, src.height(), 3);
        if width == 0 {
            return out;
        }
        let colors = src.colors();
        out.pixels_mut()
            .par_chunks_mut(width)
            .zip(src.pixels().par_chunks(width))
            .for_each(|(dst, line)| self.develop_row(line, colors, dst));
        out
    }

    /// Develop the pixels of `rect` from `src` into the same place of `dst`,
    /// which has the dimensions of `src`.
    pub fn develop_region(&self, src: &Raster, rect: Rect, dst: &mut Raster) {
        debug_assert_eq!((src.width(), src.height()), (dst.width(), dst.height()));
        let width = src.width();
        if width == 0 || rect.width == 0 {
            return;
        }
        let colors = src.colors();
        let (left, right) = (rect.left, rect.left + rect.width);
        dst.pixels_mut()
            .par_chunks_mut(width)
            .zip(src.pixels().par_chunks(width))
            .skip(rect.top)
            .take(rect.height)
            .for_each(|(out, line)| self.develop_row(&line[left..right], colors, &mut out[left..right]));
    }
}

impl fmt::Debug for Developer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Developer")
            .field("params", &self.params)
            .field("generation", &self.generation)
            .field("transform", &self.transform.is_some())
            .finish()
    }
}

/// 16-bit sample to 8 bits, rounded.
#[inline(always)]
pub fn to_display(v: u16) -> u8 {
    ((v as u32 * 255 + 32767) / 65535) as u8
}

/// Map the developed pixels of `rect` into `dst`.
pub fn display_region(src: &Raster, rect: Rect, dst: &mut DisplayImage) {
    let width = src.width();
    if width == 0 || rect.width == 0 {
        return;
    }
    let (left, right) = (rect.left, rect.left + rect.width);
    dst.pixels
        .par_chunks_mut(width)
        .zip(src.pixels().par_chunks(width))
        .skip(rect.top)
        .take(rect.height)
        .for_each(|(out, line)| {
            for (d, p) in out[left..right].iter_mut().zip(&line[left..right]) {
                *d = [to_display(p[0]), to_display(p[1]), to_display(p[2])];
            }
        });
}

/// 8-bit copy of a developed raster.
pub fn display(src: &Raster) -> DisplayImage {
    let mut out = DisplayImage {
        width: src.width(),
        height: src.height(),
        pixels: vec![[0; 3]; src.width() * src.height()],
    };
    display_region(src, Rect::full(src.width(), src.height()), &mut out);
    out
}
