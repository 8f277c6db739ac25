//! Wavelet noise reduction.

use rayon::prelude::*;
use tracing::debug;

use crate::border::border_interpolate;
use crate::geometry::Rect;
use crate::image::{clip_f32, MosaicImage, Raster};
use crate::parallel;

/// Number of hat-transform levels.
const LEVELS: usize = 5;

/// Empirical noise amplitude per level, relative to the finest one.
const LEVEL_NOISE: [f32; LEVELS] = [0.8002, 0.2735, 0.1202, 0.0585, 0.0291];

/// Mirror `j` into `0..n`, reflecting at both ends without repeating the
/// edge sample.
#[inline(always)]
fn reflect(j: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let j = j.rem_euclid(period);
    if j < n as isize { j as usize } else { (period - j) as usize }
}

/// One smoothing pass of the a-trous hat kernel `[1, 2, 1] / 4` with holes
/// of `scale` samples. Reads `size` samples of `base` spaced by `stride`.
fn hat_transform(out: &mut [f32], base: &[f32], stride: usize, size: usize, scale: usize) {
    let sc = scale as isize;
    for (i, o) in out.iter_mut().enumerate().take(size) {
        let i = i as isize;
        let left = base[reflect(i - sc, size) * stride];
        let right = base[reflect(i + sc, size) * stride];
        *o = (2.0 * base[i as usize * stride] + left + right) * 0.25;
    }
}

fn denoise_plane(plane: &mut [f32], width: usize, height: usize, threshold: f32) {
    let size = width * height;
    // Current low-pass, next low-pass, and the accumulated detail.
    let mut low = plane.to_vec();
    let mut next = vec![0.0f32; size];
    let mut detail = vec![0.0f32; size];
    let mut temp = vec![0.0f32; width.max(height)];

    for (level, noise) in LEVEL_NOISE.iter().enumerate() {
        let scale = 1 << level;
        for row in 0..height {
            hat_transform(&mut temp, &low[row * width..(row + 1) * width], 1, width, scale);
            next[row * width..(row + 1) * width].copy_from_slice(&temp[..width]);
        }
        for col in 0..width {
            hat_transform(&mut temp, &next[col..], width, height, scale);
            for row in 0..height {
                next[row * width + col] = temp[row];
            }
        }

        let thold = threshold * noise;
        for i in 0..size {
            let band = low[i] - next[i];
            detail[i] += if band < -thold {
                band + thold
            } else if band > thold {
                band - thold
            } else {
                0.0
            };
        }
        std::mem::swap(&mut low, &mut next);
    }

    for i in 0..size {
        plane[i] = detail[i] + low[i];
    }
}

/// Soft-threshold wavelet denoising of every populated raster channel.
///
/// Samples are moved into a `256 * sqrt(v)` domain so noise is roughly
/// uniform across brightness, decomposed with five hat-transform levels,
/// each band-pass soft-thresholded at `threshold * LEVEL_NOISE[level]`,
/// then recomposed and squared back. `threshold <= 0` leaves the raster
/// untouched.
pub fn wavelet_denoise(raster: &mut Raster, threshold: f32) {
    if threshold <= 0.0 || raster.width() == 0 || raster.height() == 0 {
        return;
    }
    let width = raster.width();
    let height = raster.height();
    let colors = raster.colors();
    debug!(width, height, colors, threshold, "wavelet denoise");

    let planes: Vec<Vec<f32>> = (0..colors)
        .into_par_iter()
        .map(|c| {
            let mut plane: Vec<f32> = raster.pixels().iter().map(|p| 256.0 * (p[c] as f32).sqrt()).collect();
            denoise_plane(&mut plane, width, height, threshold);
            plane
        })
        .collect();

    raster.pixels_mut().par_iter_mut().enumerate().for_each(|(i, pix)| {
        for (c, plane) in planes.iter().enumerate() {
            let v = plane[i];
            pix[c] = clip_f32(v * v / 65536.0);
        }
    });
}

/// Wavelet pass on an undemosaiced mosaic, for layouts whose channels
/// don't sit on a regular grid.
///
/// Every channel plane is completed with the 3x3 same-channel averages of
/// [`border_interpolate`], denoised like [`wavelet_denoise`], and only the
/// native sample of each photosite is written back.
pub fn wavelet_denoise_mosaic(mosaic: &mut MosaicImage, threshold: f32) {
    if threshold <= 0.0 || mosaic.width() == 0 {
        return;
    }
    let width = mosaic.width();
    let mut planes = Raster::from_mosaic(mosaic);
    border_interpolate(&mut planes, mosaic.pattern(), width.max(mosaic.height()));
    wavelet_denoise(&mut planes, threshold);

    let pattern = mosaic.pattern().clone();
    mosaic.data_mut().par_chunks_mut(width).enumerate().for_each(|(row, line)| {
        let colors = pattern.row_colors(row);
        let src = &planes.pixels()[row * width..(row + 1) * width];
        for (col, (v, pix)) in line.iter_mut().zip(src).enumerate() {
            *v = pix[colors.at(col)];
        }
    });
}

/// Pull the two greens of a Bayer mosaic towards each other.
///
/// Expects samples already brought to a common scale by
/// [`MosaicImage::scale_levels`], so both green sub-channels carry the same
/// gain. Each green is compared, in the square-root domain, with a blend of
/// itself and its four diagonal greens from the other green rows.
/// Differences within `threshold / 512` are removed, larger ones shrink by
/// that amount. Every green reads the untouched neighbours, so the result
/// does not depend on visiting order.
pub fn equilibrate_greens(mosaic: &mut MosaicImage, threshold: f32) {
    if threshold <= 0.0 || !mosaic.pattern().is_bayer() {
        return;
    }
    let width = mosaic.width();
    let height = mosaic.height();
    if width < 3 || height < 3 {
        return;
    }
    let pattern = mosaic.pattern().clone();
    let original = mosaic.data().to_vec();
    let thold = threshold / 512.0;
    debug!(threshold, "green equilibration");

    parallel::for_each_row(mosaic.data_mut(), width, |row, line| {
        if row == 0 || row + 1 == height {
            return;
        }
        let at = |y: usize, x: usize| original[y * width + x] as f32;
        for col in 1..width - 1 {
            let c = pattern.fc(row, col);
            if c != 1 && c != 3 {
                continue;
            }
            let diagonals = at(row - 1, col - 1) + at(row - 1, col + 1) + at(row + 1, col - 1) + at(row + 1, col + 1);
            let own = at(row, col);
            let avg = (diagonals * 0.125 + own * 0.5).max(0.0).sqrt();
            let mut diff = own.sqrt() - avg;
            diff = if diff < -thold {
                diff + thold
            } else if diff > thold {
                diff - thold
            } else {
                0.0
            };
            let v = avg + diff;
            line[col] = clip_f32(v * v);
        }
    });
}

/// Replace isolated hot and dead samples inside `rect` of `dst`.
///
/// A channel sample more than `threshold` above the largest (or below the
/// smallest) of the same channel in its 3x3 neighbourhood is clamped to
/// that neighbour value. Reads only `src`, so regions can be repaired in
/// any order; `dst` has the dimensions of `src`.
pub fn despeckle_region(src: &Raster, rect: Rect, threshold: f32, dst: &mut Raster) {
    debug_assert_eq!((src.width(), src.height()), (dst.width(), dst.height()));
    let width = src.width();
    let height = src.height();
    if width == 0 || rect.width == 0 || rect.height == 0 {
        return;
    }
    let colors = src.colors();
    let (left, right) = (rect.left, rect.left + rect.width);
    dst.pixels_mut()
        .par_chunks_mut(width)
        .enumerate()
        .skip(rect.top)
        .take(rect.height)
        .for_each(|(row, line)| {
            for col in left..right {
                let center = src.get(row, col);
                let mut lo = [u16::MAX; 4];
                let mut hi = [0u16; 4];
                for y in row.saturating_sub(1)..(row + 2).min(height) {
                    for x in col.saturating_sub(1)..(col + 2).min(width) {
                        if y == row && x == col {
                            continue;
                        }
                        let n = src.get(y, x);
                        for c in 0..colors {
                            lo[c] = lo[c].min(n[c]);
                            hi[c] = hi[c].max(n[c]);
                        }
                    }
                }
                let out = &mut line[col];
                *out = *center;
                if width * height == 1 {
                    continue;
                }
                for c in 0..colors {
                    let v = center[c] as f32;
                    if v > hi[c] as f32 + threshold {
                        out[c] = hi[c];
                    } else if v < lo[c] as f32 - threshold {
                        out[c] = lo[c];
                    }
                }
            }
        });
}

/// [`despeckle_region`] over the whole raster.
pub fn despeckle(src: &Raster, threshold: f32) -> Raster {
    let mut out = src.clone();
    if threshold > 0.0 {
        despeckle_region(src, Rect::full(src.width(), src.height()), threshold, &mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::FilterPattern;
    use crate::image::SensorLevels;

    fn noisy_raster(w: usize, h: usize) -> Raster {
        let pixels = (0..w * h)
            .map(|i| {
                let n = ((i * 7919) % 97) as u16 * 40;
                [20000 + n, 30000 - n, 10000 + n / 2, 0]
            })
            .collect();
        Raster::from_pixels(w, h, 3, pixels).unwrap()
    }

    #[test]
    fn reflect_mirrors_without_repeating_edges() {
        assert_eq!(reflect(-1, 5), 1);
        assert_eq!(reflect(-3, 5), 3);
        assert_eq!(reflect(5, 5), 3);
        assert_eq!(reflect(7, 5), 1);
        assert_eq!(reflect(12, 5), 4);
        assert_eq!(reflect(3, 1), 0);
    }

    #[test]
    fn zero_threshold_is_identity() {
        let mut raster = noisy_raster(19, 11);
        let before = raster.clone();
        wavelet_denoise(&mut raster, 0.0);
        assert_eq!(raster, before);
    }

    #[test]
    fn flat_field_survives_denoising() {
        let mut raster = Raster::from_pixels(16, 16, 3, vec![[9000, 9000, 9000, 0]; 256]).unwrap();
        wavelet_denoise(&mut raster, 500.0);
        for pix in raster.pixels() {
            for &v in &pix[..3] {
                assert!((v as i32 - 9000).abs() <= 1, "{v}");
            }
        }
    }

    #[test]
    fn denoising_reduces_variance() {
        let variance = |r: &Raster| {
            let n = r.pixels().len() as f64;
            let mean = r.pixels().iter().map(|p| p[0] as f64).sum::<f64>() / n;
            r.pixels().iter().map(|p| (p[0] as f64 - mean).powi(2)).sum::<f64>() / n
        };
        let mut raster = noisy_raster(32, 24);
        let before = variance(&raster);
        wavelet_denoise(&mut raster, 2000.0);
        assert!(variance(&raster) < before * 0.5);
    }

    #[test]
    fn green_equilibration_closes_the_gap() {
        let pattern = FilterPattern::rggb();
        let mut mosaic = MosaicImage::from_fn(12, 12, pattern.clone(), |row, _, c| match c {
            1 if row % 2 == 0 => 10000,
            1 => 10400,
            _ => 5000,
        })
        .unwrap();
        // (4,5) is a green on a red row, (5,4) one on a blue row.
        let gap = |m: &MosaicImage| (m.get(4, 5) as i32 - m.get(5, 4) as i32).abs();
        assert_eq!(gap(&mosaic), 400);
        equilibrate_greens(&mut mosaic, 10000.0);
        assert!(gap(&mosaic) < 40, "gap {}", gap(&mosaic));
        // Red and blue are never touched.
        assert_eq!(mosaic.get(6, 6), 5000);
        assert_eq!(mosaic.get(5, 5), 5000);
    }

    #[test]
    fn small_green_offset_is_removed() {
        let mut mosaic = MosaicImage::from_fn(10, 10, FilterPattern::rggb(), |row, _, c| match c {
            1 if row % 2 == 0 => 10000,
            1 => 10400,
            _ => 7000,
        })
        .unwrap();
        equilibrate_greens(&mut mosaic, 2000.0);
        for (row, col) in [(2, 3), (3, 2), (4, 5), (5, 6)] {
            assert_eq!(mosaic.get(row, col), 10200, "({row}, {col})");
        }
    }

    #[test]
    fn scaled_fourth_green_stays_flat() {
        // The second green reads half as bright until its level multiplier
        // is applied; afterwards nothing is left to equilibrate.
        let pattern = FilterPattern::rggb().with_fourth_green();
        let mut mosaic = MosaicImage::from_fn(12, 12, pattern, |_, _, c| [8000, 10000, 3000, 5000][c]).unwrap();
        let levels = SensorLevels { multipliers: [1.0, 1.0, 1.0, 2.0], ..SensorLevels::default() };
        mosaic.scale_levels(&levels);
        let scaled = mosaic.clone();
        assert_eq!((mosaic.get(4, 5), mosaic.get(5, 4)), (10000, 10000));

        equilibrate_greens(&mut mosaic, 1000.0);
        assert_eq!(mosaic, scaled);
    }

    #[test]
    fn mosaic_wavelet_keeps_flat_channels() {
        let pattern = FilterPattern::xtrans_default();
        let mut mosaic = MosaicImage::from_fn(24, 18, pattern, |_, _, c| [12000, 20000, 6000, 0][c]).unwrap();
        let before = mosaic.clone();
        wavelet_denoise_mosaic(&mut mosaic, 0.0);
        assert_eq!(mosaic, before);

        wavelet_denoise_mosaic(&mut mosaic, 800.0);
        for (a, b) in mosaic.data().iter().zip(before.data()) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{a} vs {b}");
        }
    }

    #[test]
    fn mosaic_wavelet_smooths_each_channel() {
        let pattern = FilterPattern::xtrans_default();
        let noise = |row: usize, col: usize| ((row * 131 + col * 7919) % 89) as u16 * 30;
        let mut mosaic = MosaicImage::from_fn(36, 30, pattern.clone(), |row, col, c| [12000, 20000, 6000, 0][c] + noise(row, col)).unwrap();
        let spread = |m: &MosaicImage, channel: usize| {
            let samples: Vec<f64> = (0..m.height())
                .flat_map(|row| (0..m.width()).map(move |col| (row, col)))
                .filter(|&(row, col)| pattern.fc(row, col) == channel)
                .map(|(row, col)| m.get(row, col) as f64)
                .collect();
            let mean = samples.iter().sum::<f64>() / samples.len() as f64;
            samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64
        };
        let before: Vec<f64> = (0..3).map(|c| spread(&mosaic, c)).collect();
        wavelet_denoise_mosaic(&mut mosaic, 3000.0);
        for c in 0..3 {
            assert!(spread(&mosaic, c) < before[c] * 0.5, "channel {c}");
        }
    }

    #[test]
    fn despeckle_removes_hot_pixels_only() {
        let mut raster = Raster::from_pixels(7, 5, 3, vec![[1000, 2000, 3000, 0]; 35]).unwrap();
        raster[(2, 3)] = [60000, 2100, 0, 0];
        raster[(0, 0)] = [1200, 2000, 3000, 0];
        let out = despeckle(&raster, 500.0);
        assert_eq!(out[(2, 3)], [1000, 2100, 3000, 0]);
        assert_eq!(out[(0, 0)], [1200, 2000, 3000, 0]);
        assert_eq!(out[(4, 6)], [1000, 2000, 3000, 0]);
    }

    #[test]
    fn despeckle_regions_compose() {
        let pixels = (0..96u32).map(|i| [((i * 7919) % 65536) as u16, (i * 300) as u16, 5000, 0]).collect();
        let raster = Raster::from_pixels(12, 8, 3, pixels).unwrap();
        let full = despeckle(&raster, 100.0);
        let mut parts = raster.clone();
        despeckle_region(&raster, Rect { top: 0, left: 0, height: 8, width: 5 }, 100.0, &mut parts);
        despeckle_region(&raster, Rect { top: 0, left: 5, height: 8, width: 7 }, 100.0, &mut parts);
        assert_eq!(parts, full);
    }

    #[test]
    fn equilibration_skips_six_color() {
        let mut mosaic = MosaicImage::from_fn(12, 12, FilterPattern::xtrans_default(), |row, col, _| (row * 12 + col) as u16).unwrap();
        let before = mosaic.clone();
        equilibrate_greens(&mut mosaic, 1000.0);
        assert_eq!(mosaic, before);
    }
}
