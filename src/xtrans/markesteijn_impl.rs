use rayon::prelude::*;

use crate::border::border_interpolate;
use crate::cfa::FilterPattern;
use crate::image::{MosaicImage, Raster, MAX_SAMPLE};
use crate::lab::CieLab;

/// Tile edge of the working buffers, padding included.
const TS: usize = 512;
/// Minimum context around each tile core; also the final border width.
const PAD: usize = 8;
/// Farthest step searched for a green sample along a direction.
const GREEN_REACH: isize = 3;

/// Horizontal, vertical and the two diagonals. Two-direction mode uses
/// the first two only.
const DIRS: [(isize, isize); 4] = [(0, 1), (1, 0), (1, 1), (1, -1)];

/// Flat 6x6 channel lookup, avoids the enum dispatch in hot loops.
type CfaLut = [[u8; 6]; 6];

fn build_cfa_lut(pattern: &FilterPattern) -> CfaLut {
    let mut lut = [[0u8; 6]; 6];
    for (y, row) in lut.iter_mut().enumerate() {
        for (x, cell) in row.iter_mut().enumerate() {
            *cell = pattern.fc(y, x) as u8;
        }
    }
    lut
}

#[inline(always)]
fn cfa_color(lut: &CfaLut, y: usize, x: usize) -> usize {
    lut[y % 6][x % 6] as usize
}

/// Context shared by every tile.
struct Frame<'a> {
    data: &'a [u16],
    width: usize,
    height: usize,
    lut: CfaLut,
    cielab: &'a CieLab,
    ndir: usize,
    refinements: usize,
}

impl Frame<'_> {
    #[inline(always)]
    fn native(&self, row: usize, col: usize) -> i32 {
        self.data[row * self.width + col] as i32
    }

    #[inline(always)]
    fn color(&self, row: usize, col: usize) -> usize {
        cfa_color(&self.lut, row, col)
    }

    /// Range spanned by the green samples of the 3x3 neighbourhood.
    fn green_bounds(&self, row: usize, col: usize) -> (i32, i32) {
        let mut lo = i32::MAX;
        let mut hi = i32::MIN;
        for y in row.saturating_sub(1)..=(row + 1).min(self.height - 1) {
            for x in col.saturating_sub(1)..=(col + 1).min(self.width - 1) {
                if self.color(y, x) == 1 {
                    let v = self.native(y, x);
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
            }
        }
        if lo > hi { (0, MAX_SAMPLE as i32) } else { (lo, hi) }
    }

    /// Nearest green along `(dy, dx)` within [`GREEN_REACH`] steps.
    fn green_along(&self, row: usize, col: usize, dy: isize, dx: isize) -> Option<(i32, i32)> {
        for k in 1..=GREEN_REACH {
            let y = row as isize + k * dy;
            let x = col as isize + k * dx;
            if y < 0 || x < 0 || y >= self.height as isize || x >= self.width as isize {
                return None;
            }
            let (y, x) = (y as usize, x as usize);
            if self.color(y, x) == 1 {
                return Some((k as i32, self.native(y, x)));
            }
        }
        None
    }

    /// Green at a non-green site interpolated along one direction,
    /// clamped to the local green range.
    fn directional_green(&self, row: usize, col: usize, (dy, dx): (isize, isize), (lo, hi): (i32, i32)) -> i32 {
        let estimate = match (self.green_along(row, col, dy, dx), self.green_along(row, col, -dy, -dx)) {
            (Some((k1, g1)), Some((k2, g2))) => (g1 * k2 + g2 * k1 + (k1 + k2) / 2) / (k1 + k2),
            (Some((_, g)), None) | (None, Some((_, g))) => g,
            (None, None) => (lo + hi) / 2,
        };
        estimate.clamp(lo, hi)
    }
}

/// Work area of one tile: the core it produces plus its context.
struct Area {
    top: usize,
    left: usize,
    rows: usize,
    cols: usize,
}

impl Area {
    #[inline(always)]
    fn idx(&self, row: usize, col: usize) -> usize {
        (row - self.top) * self.cols + (col - self.left)
    }

    /// `true` when the `reach` neighbourhood of `(row, col)` lies inside.
    #[inline(always)]
    fn holds(&self, row: usize, col: usize, reach: usize) -> bool {
        row >= self.top + reach && row + reach < self.top + self.rows && col >= self.left + reach && col + reach < self.left + self.cols
    }
}

struct TileResult {
    top: usize,
    left: usize,
    cols: usize,
    pixels: Vec<[u16; 3]>,
}

/// Six-colour demosaicing for 6x6 non-Bayer layouts.
///
/// `passes == 1` interpolates green along the two axes only; more passes
/// add the two diagonals and run `passes - 1` colour-difference refinement
/// rounds on the green estimates. Red and blue follow from colour
/// differences, then every direction is scored by the CIELab derivative
/// along it and the most homogeneous directions are averaged.
pub fn demosaic(mosaic: &MosaicImage, cielab: &CieLab, passes: u32) -> Raster {
    demosaic_tiled(mosaic, cielab, passes, TS)
}

fn demosaic_tiled(mosaic: &MosaicImage, cielab: &CieLab, passes: u32, tile: usize) -> Raster {
    let width = mosaic.width();
    let height = mosaic.height();
    let passes = passes.max(1) as usize;
    let frame = Frame {
        data: mosaic.data(),
        width,
        height,
        lut: build_cfa_lut(mosaic.pattern()),
        cielab,
        ndir: if passes > 1 { 4 } else { 2 },
        refinements: passes - 1,
    };
    // Context needed by one output pixel: 2 (5x5 vote) + 1 (3x3 homogeneity)
    // + 1 (derivative) + 1 (red/blue), plus 2 per refinement round.
    let pad = PAD.max(5 + 2 * frame.refinements);

    let mut raster = Raster::from_mosaic(mosaic);
    if width > 2 * PAD && height > 2 * PAD {
        let core = tile.saturating_sub(2 * pad).max(16);
        let origins: Vec<(usize, usize)> = (PAD..height - PAD)
            .step_by(core)
            .flat_map(|top| (PAD..width - PAD).step_by(core).map(move |left| (top, left)))
            .collect();

        let tiles: Vec<TileResult> = origins
            .par_iter()
            .map(|&(top, left)| {
                let bottom = (top + core).min(height - PAD);
                let right = (left + core).min(width - PAD);
                process_tile(&frame, top, left, bottom, right, pad)
            })
            .collect();

        for tile in tiles {
            for (i, rgb) in tile.pixels.iter().enumerate() {
                let pix = raster.get_mut(tile.top + i / tile.cols, tile.left + i % tile.cols);
                pix[..3].copy_from_slice(rgb);
            }
        }
    }
    border_interpolate(&mut raster, mosaic.pattern(), PAD);
    raster
}

fn process_tile(frame: &Frame<'_>, top: usize, left: usize, bottom: usize, right: usize, pad: usize) -> TileResult {
    let area_top = top.saturating_sub(pad);
    let area_left = left.saturating_sub(pad);
    let area = Area {
        top: area_top,
        left: area_left,
        rows: (bottom + pad).min(frame.height) - area_top,
        cols: (right + pad).min(frame.width) - area_left,
    };
    let n = area.rows * area.cols;
    let ndir = frame.ndir;

    let green = interpolate_green(frame, &area);
    let rgb: Vec<Vec<[u16; 3]>> = green.iter().map(|g| interpolate_rb(frame, &area, g)).collect();

    // CIELab derivative along each direction.
    let mut drv = vec![vec![i64::MAX; n]; ndir];
    for d in 0..ndir {
        let lab: Vec<[i32; 3]> = rgb[d].iter().map(|&[r, g, b]| frame.cielab.lab(&[r, g, b, 0], 3)).collect();
        let (dy, dx) = DIRS[d];
        for row in area.top + 2..area.top + area.rows - 2 {
            for col in area.left + 2..area.left + area.cols - 2 {
                let i = area.idx(row, col);
                let fwd = area.idx((row as isize + dy) as usize, (col as isize + dx) as usize);
                let back = area.idx((row as isize - dy) as usize, (col as isize - dx) as usize);
                let dl = (2 * lab[i][0] - lab[fwd][0] - lab[back][0]) as i64;
                let da = (2 * lab[i][1] - lab[fwd][1] - lab[back][1]) as i64 + dl * 500 / 232;
                let db = (2 * lab[i][2] - lab[fwd][2] - lab[back][2]) as i64 - dl * 500 / 580;
                drv[d][i] = dl * dl + da * da + db * db;
            }
        }
    }

    // Homogeneity: neighbours whose derivative is within 8x the best one.
    let mut homo = vec![vec![0u8; n]; ndir];
    for row in area.top + 3..area.top + area.rows - 3 {
        for col in area.left + 3..area.left + area.cols - 3 {
            let i = area.idx(row, col);
            let best = (0..ndir).map(|d| drv[d][i]).min().unwrap_or(0).saturating_mul(8);
            for d in 0..ndir {
                let mut count = 0u8;
                for y in row - 1..=row + 1 {
                    for x in col - 1..=col + 1 {
                        if drv[d][area.idx(y, x)] <= best {
                            count += 1;
                        }
                    }
                }
                homo[d][i] = count;
            }
        }
    }

    // Average the directions whose 5x5 score is close to the best.
    let cols = right - left;
    let mut pixels = Vec::with_capacity(cols * (bottom - top));
    for row in top..bottom {
        for col in left..right {
            let mut hm = [0u32; 4];
            for (d, score) in hm.iter_mut().enumerate().take(ndir) {
                for y in row - 2..=row + 2 {
                    for x in col - 2..=col + 2 {
                        *score += homo[d][area.idx(y, x)] as u32;
                    }
                }
            }
            let max = hm[..ndir].iter().copied().max().unwrap_or(0);
            let threshold = max - (max >> 3);
            let i = area.idx(row, col);
            let mut sum = [0u32; 3];
            let mut num = 0u32;
            for d in 0..ndir {
                if hm[d] >= threshold {
                    for c in 0..3 {
                        sum[c] += rgb[d][i][c] as u32;
                    }
                    num += 1;
                }
            }
            pixels.push(std::array::from_fn(|c| ((sum[c] + num / 2) / num) as u16));
        }
    }

    TileResult { top, left, cols, pixels }
}

/// Directional green planes, refined `frame.refinements` times.
fn interpolate_green(frame: &Frame<'_>, area: &Area) -> Vec<Vec<u16>> {
    let n = area.rows * area.cols;
    let mut planes = vec![vec![0u16; n]; frame.ndir];
    let mut bounds = vec![(0i32, 0i32); n];

    for row in area.top..area.top + area.rows {
        for col in area.left..area.left + area.cols {
            let i = area.idx(row, col);
            let v = frame.native(row, col);
            if frame.color(row, col) == 1 {
                bounds[i] = (v, v);
                for plane in planes.iter_mut() {
                    plane[i] = v as u16;
                }
                continue;
            }
            bounds[i] = frame.green_bounds(row, col);
            for (d, plane) in planes.iter_mut().enumerate() {
                plane[i] = frame.directional_green(row, col, DIRS[d], bounds[i]) as u16;
            }
        }
    }

    // Refinement: pull each estimate towards the median colour difference
    // of same-colour sites in the 5x5 window.
    for _ in 0..frame.refinements {
        for plane in planes.iter_mut() {
            let snap = plane.clone();
            for row in area.top..area.top + area.rows {
                for col in area.left..area.left + area.cols {
                    let native = frame.color(row, col);
                    if native == 1 || !area.holds(row, col, 2) {
                        continue;
                    }
                    let mut diffs = [0i32; 25];
                    let mut k = 0;
                    for y in row - 2..=row + 2 {
                        for x in col - 2..=col + 2 {
                            if frame.color(y, x) == native {
                                diffs[k] = frame.native(y, x) - snap[area.idx(y, x)] as i32;
                                k += 1;
                            }
                        }
                    }
                    if k >= 3 {
                        diffs[..k].sort_unstable();
                        let i = area.idx(row, col);
                        let (lo, hi) = bounds[i];
                        plane[i] = (frame.native(row, col) - diffs[k / 2]).clamp(lo, hi) as u16;
                    }
                }
            }
        }
    }
    planes
}

/// Red and blue from the colour differences of the 3x3 neighbourhood.
fn interpolate_rb(frame: &Frame<'_>, area: &Area, green: &[u16]) -> Vec<[u16; 3]> {
    let mut rgb = vec![[0u16; 3]; area.rows * area.cols];
    for row in area.top..area.top + area.rows {
        for col in area.left..area.left + area.cols {
            let i = area.idx(row, col);
            let native = frame.color(row, col);
            let g = green[i] as i32;
            let mut pix = [g as u16; 3];
            pix[native] = frame.native(row, col) as u16;
            if area.holds(row, col, 1) {
                for target in [0usize, 2] {
                    if target == native {
                        continue;
                    }
                    let mut sum = 0i32;
                    let mut num = 0i32;
                    for y in row - 1..=row + 1 {
                        for x in col - 1..=col + 1 {
                            if frame.color(y, x) == target {
                                sum += frame.native(y, x) - green[area.idx(y, x)] as i32;
                                num += 1;
                            }
                        }
                    }
                    if num > 0 {
                        let diff = if sum >= 0 { (sum + num / 2) / num } else { (sum - num / 2) / num };
                        pix[target] = (g + diff).clamp(0, MAX_SAMPLE as i32) as u16;
                    }
                }
            }
            rgb[i] = pix;
        }
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::IDENTITY_RGB_CAM;

    fn textured(w: usize, h: usize) -> MosaicImage {
        MosaicImage::from_fn(w, h, FilterPattern::xtrans_default(), |row, col, c| {
            let base = ((row * 7 + col * 13) % 23) as u16 * 1200 + (row as u16 * 97);
            base + [3000, 1000, 0][c]
        })
        .unwrap()
    }

    #[test]
    fn cfa_lut_matches_pattern() {
        let pattern = FilterPattern::xtrans_default();
        let lut = build_cfa_lut(&pattern);
        for y in 0..12 {
            for x in 0..12 {
                assert_eq!(cfa_color(&lut, y, x), pattern.fc(y, x));
            }
        }
    }

    #[test]
    fn uniform_color_reconstructed() {
        let cielab = CieLab::new(&IDENTITY_RGB_CAM);
        for passes in [1, 3] {
            let mosaic = MosaicImage::from_fn(48, 40, FilterPattern::xtrans_default(), |_, _, c| [7000, 15000, 4000, 0][c]).unwrap();
            let raster = demosaic(&mosaic, &cielab, passes);
            for pix in raster.pixels() {
                assert_eq!(&pix[..3], &[7000, 15000, 4000], "passes={passes}");
            }
        }
    }

    #[test]
    fn known_channel_preserved() {
        let cielab = CieLab::new(&IDENTITY_RGB_CAM);
        let mosaic = textured(40, 40);
        let raster = demosaic(&mosaic, &cielab, 1);
        for row in 0..40 {
            for col in 0..40 {
                assert_eq!(raster[(row, col)][mosaic.pattern().fc(row, col)], mosaic.get(row, col));
            }
        }
    }

    #[test]
    fn direction_count_follows_passes() {
        let cielab = CieLab::new(&IDENTITY_RGB_CAM);
        let mosaic = textured(48, 48);
        let fast = demosaic(&mosaic, &cielab, 1);
        let quality = demosaic(&mosaic, &cielab, 3);
        assert_ne!(fast, quality);
    }

    #[test]
    fn tiling_is_seamless() {
        let cielab = CieLab::new(&IDENTITY_RGB_CAM);
        let mosaic = textured(150, 90);
        for passes in [1, 3] {
            let whole = demosaic_tiled(&mosaic, &cielab, passes, TS);
            let small = demosaic_tiled(&mosaic, &cielab, passes, 48);
            assert_eq!(whole, small, "passes={passes}");
        }
    }

    #[test]
    fn small_images_only_get_borders() {
        let cielab = CieLab::new(&IDENTITY_RGB_CAM);
        let mosaic = MosaicImage::from_fn(12, 12, FilterPattern::xtrans_default(), |_, _, c| [1, 2, 3, 0][c]).unwrap();
        let raster = demosaic(&mosaic, &cielab, 1);
        assert!(raster.pixels().iter().all(|p| p[..3] == [1, 2, 3]));
    }
}
