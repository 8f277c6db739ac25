//! Geometric transforms of a fully populated raster.
//!
//! Order inside the pipeline: [`derotate`], [`stretch`], [`flip`], then
//! the [`Resample`] step (rotation, crop and shrink) of the transformed
//! phase.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::image::{clip_f32, Pixel, Raster};

/// Dihedral orientation as a 3-bit flag set.
///
/// Bits are applied in order: mirror columns, mirror rows, transpose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Flip(u8);

impl Flip {
    /// No change.
    pub const NONE: Flip = Flip(0);
    /// Mirror left to right.
    pub const MIRROR_COLUMNS: Flip = Flip(1);
    /// Mirror top to bottom.
    pub const MIRROR_ROWS: Flip = Flip(2);
    /// Swap rows and columns.
    pub const TRANSPOSE: Flip = Flip(4);
    /// Quarter turn clockwise.
    pub const ROTATE_90: Flip = Flip(6);
    /// Half turn.
    pub const ROTATE_180: Flip = Flip(3);
    /// Quarter turn counter-clockwise.
    pub const ROTATE_270: Flip = Flip(5);

    /// Flag set from its low three bits.
    pub fn from_bits(bits: u8) -> Self {
        Flip(bits & 7)
    }

    /// Raw bits.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Clockwise rotation by `quarter_turns * 90` degrees.
    pub fn from_quarter_turns(quarter_turns: i32) -> Self {
        match quarter_turns.rem_euclid(4) {
            0 => Self::NONE,
            1 => Self::ROTATE_90,
            2 => Self::ROTATE_180,
            _ => Self::ROTATE_270,
        }
    }

    /// `true` when width and height swap.
    pub fn swaps_axes(self) -> bool {
        self.0 & 4 != 0
    }

    /// Output dimensions for a `width` x `height` input.
    pub fn output_dimensions(self, width: usize, height: usize) -> (usize, usize) {
        if self.swaps_axes() { (height, width) } else { (width, height) }
    }

    /// Source coordinate of output pixel `(row, col)` for an input of
    /// `width` x `height`.
    pub fn source(self, row: usize, col: usize, width: usize, height: usize) -> (usize, usize) {
        let (mut r, mut c) = if self.swaps_axes() { (col, row) } else { (row, col) };
        if self.0 & 2 != 0 {
            r = height - 1 - r;
        }
        if self.0 & 1 != 0 {
            c = width - 1 - c;
        }
        (r, c)
    }

    /// Flag set equivalent to applying `self` and then `next`.
    pub fn then(self, next: Flip) -> Flip {
        // Use a 2x3 grid; its eight orientations are all distinct.
        let (w, h) = (3usize, 2usize);
        let (w1, h1) = self.output_dimensions(w, h);
        let (w2, h2) = next.output_dimensions(w1, h1);
        let composed = |row: usize, col: usize| {
            let (r1, c1) = next.source(row, col, w1, h1);
            self.source(r1, c1, w, h)
        };
        (0..8u8)
            .map(Flip)
            .find(|candidate| {
                candidate.output_dimensions(w, h) == (w2, h2)
                    && (0..h2).all(|r| (0..w2).all(|c| candidate.source(r, c, w, h) == composed(r, c)))
            })
            .unwrap_or(Flip::NONE)
    }
}

impl fmt::Display for Flip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "flip {:03b}", self.0)
    }
}

/// Apply `flip` in place.
///
/// Mirrors swap elements within rows or between rows; the transpose walks
/// the permutation cycles of the buffer, marking moved slots in a visited
/// bitmap so every element moves exactly once.
pub fn flip(raster: &mut Raster, flip: Flip) {
    let width = raster.width();
    let height = raster.height();
    if flip == Flip::NONE || width == 0 || height == 0 {
        return;
    }
    let pixels = raster.pixels_mut();
    if flip.bits() & 1 != 0 {
        pixels.par_chunks_mut(width).for_each(|line| line.reverse());
    }
    if flip.bits() & 2 != 0 {
        for row in 0..height / 2 {
            let (top, bottom) = pixels.split_at_mut((height - 1 - row) * width);
            top[row * width..(row + 1) * width].swap_with_slice(&mut bottom[..width]);
        }
    }
    if flip.swaps_axes() {
        transpose_in_place(pixels, width, height);
        raster.reshape(height, width);
    }
}

/// Transpose a row-major `width` x `height` buffer into `height` x `width`.
fn transpose_in_place(pixels: &mut [Pixel], width: usize, height: usize) {
    let n = pixels.len();
    if n < 3 || width == 1 || height == 1 {
        return;
    }
    let mut visited = vec![0u64; n.div_ceil(64)];
    let is_visited = |v: &[u64], i: usize| v[i >> 6] & (1 << (i & 63)) != 0;
    // Element at `i = r * width + c` lands at `c * height + r`.
    let dest = |i: usize| (i % width) * height + i / width;

    for start in 1..n - 1 {
        if is_visited(&visited, start) {
            continue;
        }
        let mut carried = pixels[start];
        let mut i = start;
        loop {
            let j = dest(i);
            std::mem::swap(&mut pixels[j], &mut carried);
            visited[j >> 6] |= 1 << (j & 63);
            i = j;
            if i == start {
                break;
            }
        }
    }
}

/// Resample non-square pixels to square ones.
///
/// `pixel_aspect < 1` adds rows, `> 1` adds columns, each output sample
/// linearly interpolated from the two nearest input samples.
pub fn stretch(raster: Raster, pixel_aspect: f64) -> Raster {
    if pixel_aspect == 1.0 || pixel_aspect <= 0.0 || !pixel_aspect.is_finite() {
        return raster;
    }
    if raster.width() == 0 || raster.height() == 0 {
        return raster;
    }
    let width = raster.width();
    let height = raster.height();
    let colors = raster.colors();
    let lerp = |a: &Pixel, b: &Pixel, frac: f64| -> Pixel {
        std::array::from_fn(|c| (a[c] as f64 * (1.0 - frac) + b[c] as f64 * frac + 0.5) as u16)
    };

    if pixel_aspect < 1.0 {
        let new_height = (height as f64 / pixel_aspect + 0.5) as usize;
        let mut out = Raster::new(width, new_height, colors);
        out.pixels_mut().par_chunks_mut(width).enumerate().for_each(|(row, line)| {
            let rc = row as f64 * pixel_aspect;
            let r0 = (rc as usize).min(height - 1);
            let r1 = (r0 + 1).min(height - 1);
            let frac = rc - r0 as f64;
            for (col, pix) in line.iter_mut().enumerate() {
                *pix = lerp(raster.get(r0, col), raster.get(r1, col), frac);
            }
        });
        out
    } else {
        let new_width = (width as f64 * pixel_aspect + 0.5) as usize;
        let mut out = Raster::new(new_width, height, colors);
        out.pixels_mut().par_chunks_mut(new_width).enumerate().for_each(|(row, line)| {
            for (col, pix) in line.iter_mut().enumerate() {
                let cc = col as f64 / pixel_aspect;
                let c0 = (cc as usize).min(width - 1);
                let c1 = (c0 + 1).min(width - 1);
                *pix = lerp(raster.get(row, c0), raster.get(row, c1), cc - c0 as f64);
            }
        });
        out
    }
}

/// Dimensions produced by [`derotate`].
pub fn derotated_dimensions(height: usize, sensor_width: usize) -> (usize, usize) {
    let step = std::f64::consts::FRAC_1_SQRT_2;
    let wide = (sensor_width as f64 / step) as usize;
    let high = (height.saturating_sub(sensor_width) as f64 / step) as usize;
    (wide, high)
}

/// Turn the 45-degree capture of a diagonal sensor upright.
///
/// `sensor_width` is the diagonal width of the photosite layout. Each
/// output pixel bilinearly samples the input at
/// `(sensor_width + (row - col) * step, (row + col) * step)` with
/// `step = sqrt(0.5)`; positions outside the input stay zero.
pub fn derotate(raster: Raster, sensor_width: usize) -> Raster {
    if sensor_width == 0 {
        return raster;
    }
    let width = raster.width();
    let height = raster.height();
    let colors = raster.colors();
    let (wide, high) = derotated_dimensions(height, sensor_width);
    let step = std::f64::consts::FRAC_1_SQRT_2;
    let mut out = Raster::new(wide, high, colors);
    if wide == 0 || high == 0 {
        return out;
    }

    out.pixels_mut().par_chunks_mut(wide).enumerate().for_each(|(row, line)| {
        for (col, pix) in line.iter_mut().enumerate() {
            let r = sensor_width as f64 + (row as f64 - col as f64) * step;
            let c = (row + col) as f64 * step;
            if r < 0.0 || c < 0.0 {
                continue;
            }
            let (ur, uc) = (r as usize, c as usize);
            if ur + 2 > height || uc + 2 > width {
                continue;
            }
            let fr = r - ur as f64;
            let fc = c - uc as f64;
            let p00 = raster.get(ur, uc);
            let p01 = raster.get(ur, uc + 1);
            let p10 = raster.get(ur + 1, uc);
            let p11 = raster.get(ur + 1, uc + 1);
            for i in 0..colors {
                let v = (p00[i] as f64 * (1.0 - fc) + p01[i] as f64 * fc) * (1.0 - fr)
                    + (p10[i] as f64 * (1.0 - fc) + p11[i] as f64 * fc) * fr;
                pix[i] = clip_f32(v as f32);
            }
        }
    });
    out
}

/// Rectangle in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    /// First row.
    pub top: usize,
    /// First column.
    pub left: usize,
    /// Row count.
    pub height: usize,
    /// Column count.
    pub width: usize,
}

impl Rect {
    /// Rectangle covering a whole `width` x `height` image.
    pub fn full(width: usize, height: usize) -> Self {
        Rect { top: 0, left: 0, height, width }
    }

    /// Intersection with `0..width` x `0..height`.
    pub fn clamp_to(self, width: usize, height: usize) -> Self {
        let top = self.top.min(height);
        let left = self.left.min(width);
        Rect {
            top,
            left,
            height: self.height.min(height - top),
            width: self.width.min(width - left),
        }
    }

    /// `true` when the two rectangles share at least one pixel.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.top < other.top + other.height
            && other.top < self.top + self.height
            && self.left < other.left + other.width
            && other.left < self.left + self.width
    }
}

/// Bounding box of a `width` x `height` image rotated by `angle` degrees.
pub fn rotated_dimensions(width: usize, height: usize, angle: f64) -> (usize, usize) {
    if angle.rem_euclid(360.0) == 0.0 {
        return (width, height);
    }
    let (s, c) = angle.to_radians().sin_cos();
    let (w, h) = (width as f64, height as f64);
    (
        (w * c.abs() + h * s.abs()).round() as usize,
        (w * s.abs() + h * c.abs()).round() as usize,
    )
}

/// Rotation, crop and shrink as one inverse mapping from output pixels to
/// source samples, so any output region can be rendered on its own.
///
/// The source is rotated clockwise by `angle` degrees into its bounding
/// box, `crop` selects a rectangle of that rotated image, and every output
/// pixel averages a `shrink` x `shrink` block of the crop.
#[derive(Clone, Debug, PartialEq)]
pub struct Resample {
    src_width: usize,
    src_height: usize,
    sin: f64,
    cos: f64,
    rotated: (usize, usize),
    crop: Rect,
    shrink: usize,
}

impl Resample {
    /// Build the mapping for a `src_width` x `src_height` source. A `None`
    /// crop keeps the whole rotated image.
    pub fn new(src_width: usize, src_height: usize, angle: f64, crop: Option<Rect>, shrink: usize) -> Self {
        let rotated = rotated_dimensions(src_width, src_height, angle);
        let (sin, cos) = if angle.rem_euclid(360.0) == 0.0 { (0.0, 1.0) } else { angle.to_radians().sin_cos() };
        let crop = crop.unwrap_or_else(|| Rect::full(rotated.0, rotated.1)).clamp_to(rotated.0, rotated.1);
        Resample { src_width, src_height, sin, cos, rotated, crop, shrink: shrink.max(1) }
    }

    /// `true` when the mapping copies the source unchanged.
    pub fn is_identity(&self) -> bool {
        self.sin == 0.0
            && self.cos == 1.0
            && self.shrink == 1
            && self.crop == Rect::full(self.src_width, self.src_height)
    }

    /// Output dimensions.
    pub fn output_dimensions(&self) -> (usize, usize) {
        (self.crop.width / self.shrink, self.crop.height / self.shrink)
    }

    fn is_rotated(&self) -> bool {
        !(self.sin == 0.0 && self.cos == 1.0)
    }

    /// Source position of a point in rotated-image coordinates.
    #[inline]
    fn inverse(&self, y: f64, x: f64) -> (f64, f64) {
        let dx = x + 0.5 - self.rotated.0 as f64 / 2.0;
        let dy = y + 0.5 - self.rotated.1 as f64 / 2.0;
        let sx = self.cos * dx + self.sin * dy + self.src_width as f64 / 2.0 - 0.5;
        let sy = -self.sin * dx + self.cos * dy + self.src_height as f64 / 2.0 - 0.5;
        (sy, sx)
    }

    fn sample(&self, src: &Raster, y: usize, x: usize) -> [f64; 4] {
        if !self.is_rotated() {
            return src.get(y, x).map(|v| v as f64);
        }
        let (sy, sx) = self.inverse(y as f64, x as f64);
        let (h, w) = (self.src_height as f64, self.src_width as f64);
        if sy < -0.5 || sx < -0.5 || sy > h - 0.5 || sx > w - 0.5 {
            return [0.0; 4];
        }
        let sy = sy.clamp(0.0, h - 1.0);
        let sx = sx.clamp(0.0, w - 1.0);
        let (r0, c0) = (sy as usize, sx as usize);
        let (r1, c1) = ((r0 + 1).min(self.src_height - 1), (c0 + 1).min(self.src_width - 1));
        let (fr, fc) = (sy - r0 as f64, sx - c0 as f64);
        let (p00, p01, p10, p11) = (src.get(r0, c0), src.get(r0, c1), src.get(r1, c0), src.get(r1, c1));
        std::array::from_fn(|i| {
            (p00[i] as f64 * (1.0 - fc) + p01[i] as f64 * fc) * (1.0 - fr) + (p10[i] as f64 * (1.0 - fc) + p11[i] as f64 * fc) * fr
        })
    }

    /// Output pixel `(row, col)`.
    pub fn pixel(&self, src: &Raster, row: usize, col: usize) -> Pixel {
        let s = self.shrink;
        let mut sum = [0.0f64; 4];
        for i in 0..s {
            for j in 0..s {
                let v = self.sample(src, self.crop.top + row * s + i, self.crop.left + col * s + j);
                for c in 0..4 {
                    sum[c] += v[c];
                }
            }
        }
        let n = (s * s) as f64;
        sum.map(|v| clip_f32((v / n) as f32))
    }

    /// Source rectangle that output region `out` reads, one pixel wider
    /// than the bilinear footprint on each side.
    pub fn source_footprint(&self, out: Rect) -> Rect {
        let s = self.shrink;
        let top = (self.crop.top + out.top * s) as f64;
        let left = (self.crop.left + out.left * s) as f64;
        let bottom = (self.crop.top + (out.top + out.height) * s) as f64;
        let right = (self.crop.left + (out.left + out.width) * s) as f64;
        let corners = [self.inverse(top, left), self.inverse(top, right), self.inverse(bottom, left), self.inverse(bottom, right)];
        let min_y = corners.iter().map(|c| c.0).fold(f64::INFINITY, f64::min).floor() - 1.0;
        let max_y = corners.iter().map(|c| c.0).fold(f64::NEG_INFINITY, f64::max).ceil() + 1.0;
        let min_x = corners.iter().map(|c| c.1).fold(f64::INFINITY, f64::min).floor() - 1.0;
        let max_x = corners.iter().map(|c| c.1).fold(f64::NEG_INFINITY, f64::max).ceil() + 1.0;
        let top = min_y.max(0.0) as usize;
        let left = min_x.max(0.0) as usize;
        let bottom = (max_y.max(0.0) as usize).min(self.src_height);
        let right = (max_x.max(0.0) as usize).min(self.src_width);
        Rect {
            top,
            left,
            height: bottom.saturating_sub(top),
            width: right.saturating_sub(left),
        }
    }

    /// Render output rows starting at `first_row` into `out`, which holds
    /// whole rows.
    pub fn render_rows(&self, src: &Raster, first_row: usize, out: &mut [Pixel]) {
        let (width, _) = self.output_dimensions();
        if width == 0 {
            return;
        }
        for (i, line) in out.chunks_mut(width).enumerate() {
            for (col, pix) in line.iter_mut().enumerate() {
                *pix = self.pixel(src, first_row + i, col);
            }
        }
    }

    /// Render the output pixels of `rect` into the same place of `dst`,
    /// which has the output dimensions.
    pub fn render_region(&self, src: &Raster, rect: Rect, dst: &mut Raster) {
        let width = dst.width();
        if width == 0 || rect.width == 0 || rect.height == 0 {
            return;
        }
        let (left, right) = (rect.left, rect.left + rect.width);
        dst.pixels_mut()
            .par_chunks_mut(width)
            .enumerate()
            .skip(rect.top)
            .take(rect.height)
            .for_each(|(row, line)| {
                for col in left..right {
                    line[col] = self.pixel(src, row, col);
                }
            });
    }

    /// Render the whole output.
    pub fn apply(&self, src: &Raster) -> Raster {
        let (width, height) = self.output_dimensions();
        let mut out = Raster::new(width, height, src.colors());
        if width > 0 {
            out.pixels_mut()
                .par_chunks_mut(width)
                .enumerate()
                .for_each(|(row, line)| self.render_rows(src, row, line));
        }
        out
    }
}

/// Rotate clockwise by `angle` degrees into the bounding box; uncovered
/// corners are zero.
pub fn rotate(raster: &Raster, angle: f64) -> Raster {
    Resample::new(raster.width(), raster.height(), angle, None, 1).apply(raster)
}

/// Box-average downscale by an integer `factor`.
pub fn shrink(raster: &Raster, factor: usize) -> Raster {
    Resample::new(raster.width(), raster.height(), 0.0, None, factor).apply(raster)
}

/// Copy out a rectangle, clamped to the raster.
pub fn crop(raster: &Raster, rect: Rect) -> Raster {
    Resample::new(raster.width(), raster.height(), 0.0, Some(rect), 1).apply(raster)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(w: usize, h: usize) -> Raster {
        let pixels = (0..w * h).map(|i| [i as u16, (i * 2) as u16, (i * 3) as u16, 0]).collect();
        Raster::from_pixels(w, h, 3, pixels).unwrap()
    }

    #[test]
    fn quarter_turn_convention() {
        let input = numbered(10, 4);
        let mut out = input.clone();
        flip(&mut out, Flip::ROTATE_90);
        assert_eq!((out.width(), out.height()), (4, 10));
        for y in 0..10 {
            for x in 0..4 {
                // Output column x, row y reads input row (height - 1 - x), column y.
                assert_eq!(out[(y, x)], input[(4 - 1 - x, y)]);
            }
        }
    }

    #[test]
    fn opposite_turns_cancel() {
        let input = numbered(7, 5);
        let mut out = input.clone();
        flip(&mut out, Flip::ROTATE_90);
        flip(&mut out, Flip::ROTATE_270);
        assert_eq!(out, input);
        flip(&mut out, Flip::ROTATE_180);
        flip(&mut out, Flip::ROTATE_180);
        assert_eq!(out, input);
    }

    #[test]
    fn every_flag_matches_its_source_mapping() {
        let input = numbered(6, 3);
        for bits in 0..8 {
            let f = Flip::from_bits(bits);
            let mut out = input.clone();
            flip(&mut out, f);
            assert_eq!((out.width(), out.height()), f.output_dimensions(6, 3));
            for row in 0..out.height() {
                for col in 0..out.width() {
                    let (r, c) = f.source(row, col, 6, 3);
                    assert_eq!(out[(row, col)], input[(r, c)], "{f} ({row},{col})");
                }
            }
        }
    }

    #[test]
    fn composition_matches_sequential_application() {
        let input = numbered(5, 3);
        for a in 0..8 {
            for b in 0..8 {
                let (fa, fb) = (Flip::from_bits(a), Flip::from_bits(b));
                let mut seq = input.clone();
                flip(&mut seq, fa);
                flip(&mut seq, fb);
                let mut once = input.clone();
                flip(&mut once, fa.then(fb));
                assert_eq!(seq, once, "{fa} then {fb}");
            }
        }
        assert_eq!(Flip::ROTATE_90.then(Flip::ROTATE_90), Flip::ROTATE_180);
        assert_eq!(Flip::from_quarter_turns(-1), Flip::ROTATE_270);
    }

    #[test]
    fn stretch_adds_rows_or_columns() {
        let input = Raster::from_pixels(2, 2, 3, vec![[0; 4], [100; 4], [200; 4], [300; 4]]).unwrap();
        let tall = stretch(input.clone(), 0.5);
        assert_eq!((tall.width(), tall.height()), (2, 4));
        assert_eq!(tall[(1, 0)][0], 100);
        assert_eq!(tall[(3, 0)][0], 200);
        let wide = stretch(input.clone(), 2.0);
        assert_eq!((wide.width(), wide.height()), (4, 2));
        assert_eq!(wide[(0, 1)][0], 50);
        assert_eq!(stretch(input.clone(), 1.0), input);
    }

    #[test]
    fn derotation_samples_the_diagonal() {
        let input = Raster::from_pixels(20, 20, 3, vec![[1000, 2000, 3000, 0]; 400]).unwrap();
        let out = derotate(input, 10);
        assert_eq!((out.width(), out.height()), derotated_dimensions(20, 10));
        assert_eq!((out.width(), out.height()), (14, 14));
        // Row 0 col 0 samples (10, 0); the bottom-left corner falls outside.
        assert_eq!(out[(0, 0)][..3], [1000, 2000, 3000]);
        assert_eq!(out[(13, 0)], [0; 4]);
    }

    #[test]
    fn zero_angle_resample_is_exact() {
        let input = numbered(9, 7);
        assert_eq!(rotate(&input, 0.0), input);
        assert!(Resample::new(9, 7, 360.0, None, 1).is_identity());
    }

    #[test]
    fn small_rotation_keeps_center() {
        let input = Raster::from_pixels(31, 21, 3, vec![[4000, 4000, 4000, 0]; 31 * 21]).unwrap();
        let out = rotate(&input, 10.0);
        let (w, h) = rotated_dimensions(31, 21, 10.0);
        assert_eq!((out.width(), out.height()), (w, h));
        assert_eq!(out[(h / 2, w / 2)][0], 4000);
        assert_eq!(out[(0, 0)], [0; 4]);
    }

    #[test]
    fn crop_and_shrink() {
        let input = numbered(8, 6);
        let c = crop(&input, Rect { top: 1, left: 2, height: 3, width: 4 });
        assert_eq!((c.width(), c.height()), (4, 3));
        assert_eq!(c[(0, 0)], input[(1, 2)]);
        let s = shrink(&input, 2);
        assert_eq!((s.width(), s.height()), (4, 3));
        // Average of 0, 1, 8, 9.
        assert_eq!(s[(0, 0)][0], 5);
    }

    #[test]
    fn footprint_covers_the_sampled_region() {
        let r = Resample::new(100, 80, 15.0, None, 1);
        let out = Rect { top: 20, left: 30, height: 10, width: 12 };
        let fp = r.source_footprint(out);
        assert!(fp.width > 0 && fp.height > 0);
        let center = r.inverse(25.0, 36.0);
        assert!(center.0 >= fp.top as f64 && center.0 < (fp.top + fp.height) as f64);
        assert!(center.1 >= fp.left as f64 && center.1 < (fp.left + fp.width) as f64);
    }
}
