use rayon::prelude::*;

use crate::border::border_interpolate;
use crate::image::{clip, MosaicImage, Raster};
use crate::lab::CieLab;

/// Tile edge of the working buffers.
const TS: usize = 512;
const BORDER: usize = 5;

/// Horizontal then vertical neighbours, in tile-relative `(dy, dx)`.
const DIRS: [(isize, isize); 4] = [(0, -1), (0, 1), (-1, 0), (1, 0)];

/// Final pixels of one tile, ready to be copied into the raster.
struct TileResult {
    top: usize,
    left: usize,
    cols: usize,
    pixels: Vec<[u16; 3]>,
}

/// Adaptive Homogeneity-Directed demosaicing for 2x2 Bayer patterns.
///
/// Works on 512x512 tiles stepping by 506 so neighbouring tiles overlap by
/// their context margin. Each tile builds a horizontally and a vertically
/// interpolated candidate, converts both to CIELab and keeps, per pixel,
/// the candidate whose 3x3 neighbourhood is more homogeneous (the average
/// of both on a tie).
///
/// Tiles read only the native samples, so they run in parallel and are
/// written back once all of them are done.
pub fn demosaic(mosaic: &MosaicImage, cielab: &CieLab) -> Raster {
    let width = mosaic.width();
    let height = mosaic.height();
    let mut raster = Raster::from_mosaic(mosaic);
    border_interpolate(&mut raster, mosaic.pattern(), BORDER);
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return raster;
    }

    let tops = (2..height - BORDER).step_by(TS - 6);
    let origins: Vec<(usize, usize)> = tops
        .flat_map(|top| (2..width - BORDER).step_by(TS - 6).map(move |left| (top, left)))
        .collect();

    let tiles: Vec<TileResult> = origins
        .par_iter()
        .map(|&(top, left)| process_tile(mosaic, cielab, top, left))
        .collect();

    for tile in tiles {
        for (i, rgb) in tile.pixels.iter().enumerate() {
            let pix = raster.get_mut(tile.top + i / tile.cols, tile.left + i % tile.cols);
            pix[..3].copy_from_slice(rgb);
        }
    }
    raster
}

fn process_tile(mosaic: &MosaicImage, cielab: &CieLab, top: usize, left: usize) -> TileResult {
    let width = mosaic.width();
    let height = mosaic.height();
    let pattern = mosaic.pattern();
    let data = mosaic.data();
    let tw = TS.min(width - left);
    let th = TS.min(height - top);
    let pix = |row: usize, col: usize| data[row * width + col] as i32;
    let at = |tr: usize, tc: usize| tr * tw + tc;

    let mut rgb = [vec![[0u16; 3]; tw * th], vec![[0u16; 3]; tw * th]];
    let mut lab = [vec![[0i32; 3]; tw * th], vec![[0i32; 3]; tw * th]];

    // Green along rows and along columns.
    for row in top..(top + TS).min(height - 2) {
        for col in left..(left + TS).min(width - 2) {
            let c = pattern.fc(row, col);
            let i = at(row - top, col - left);
            if c == 1 {
                rgb[0][i][1] = pix(row, col) as u16;
                rgb[1][i][1] = pix(row, col) as u16;
                continue;
            }
            let val = ((pix(row, col - 1) + pix(row, col) + pix(row, col + 1)) * 2 - pix(row, col - 2) - pix(row, col + 2)) >> 2;
            rgb[0][i][1] = ulim(val, pix(row, col - 1), pix(row, col + 1)) as u16;
            let val = ((pix(row - 1, col) + pix(row, col) + pix(row + 1, col)) * 2 - pix(row - 2, col) - pix(row + 2, col)) >> 2;
            rgb[1][i][1] = ulim(val, pix(row - 1, col), pix(row + 1, col)) as u16;
        }
    }

    // Red and blue from colour differences, then CIELab.
    for d in 0..2 {
        let rix = &mut rgb[d];
        for row in top + 1..(top + TS - 1).min(height - 3) {
            let tr = row - top;
            for col in left + 1..(left + TS - 1).min(width - 3) {
                let tc = col - left;
                let native = pattern.fc(row, col);
                let g = |r: usize, c: usize| rix[at(r, c)][1] as i32;
                if native == 1 {
                    let c = pattern.fc(row + 1, col);
                    let h = pix(row, col) + ((pix(row, col - 1) + pix(row, col + 1) - g(tr, tc - 1) - g(tr, tc + 1)) >> 1);
                    let v = pix(row, col) + ((pix(row - 1, col) + pix(row + 1, col) - g(tr - 1, tc) - g(tr + 1, tc)) >> 1);
                    let i = at(tr, tc);
                    rix[i][2 - c] = clip(h);
                    rix[i][c] = clip(v);
                } else {
                    let c = 2 - native;
                    let val = g(tr, tc)
                        + ((pix(row - 1, col - 1) + pix(row - 1, col + 1) + pix(row + 1, col - 1) + pix(row + 1, col + 1)
                            - g(tr - 1, tc - 1)
                            - g(tr - 1, tc + 1)
                            - g(tr + 1, tc - 1)
                            - g(tr + 1, tc + 1)
                            + 1)
                            >> 2);
                    rix[at(tr, tc)][c] = clip(val);
                }
                let i = at(tr, tc);
                rix[i][native] = pix(row, col) as u16;
                let [r, g, b] = rix[i];
                lab[d][i] = cielab.lab(&[r, g, b, 0], 3);
            }
        }
    }

    // Homogeneity maps.
    let mut homo = [vec![0u8; tw * th], vec![0u8; tw * th]];
    for row in top + 2..(top + TS - 2).min(height - 4) {
        let tr = row - top;
        for col in left + 2..(left + TS - 2).min(width - 4) {
            let tc = col - left;
            let mut ldiff = [[0i64; 4]; 2];
            let mut abdiff = [[0i64; 4]; 2];
            for d in 0..2 {
                let center = lab[d][at(tr, tc)];
                for (i, &(dy, dx)) in DIRS.iter().enumerate() {
                    let other = lab[d][at((tr as isize + dy) as usize, (tc as isize + dx) as usize)];
                    ldiff[d][i] = (center[0] - other[0]).abs() as i64;
                    let da = (center[1] - other[1]) as i64;
                    let db = (center[2] - other[2]) as i64;
                    abdiff[d][i] = da * da + db * db;
                }
            }
            let leps = ldiff[0][0].max(ldiff[0][1]).min(ldiff[1][2].max(ldiff[1][3]));
            let abeps = abdiff[0][0].max(abdiff[0][1]).min(abdiff[1][2].max(abdiff[1][3]));
            for d in 0..2 {
                for i in 0..4 {
                    if ldiff[d][i] <= leps && abdiff[d][i] <= abeps {
                        homo[d][at(tr, tc)] += 1;
                    }
                }
            }
        }
    }

    // Pick the more homogeneous candidate.
    let out_top = top + 3;
    let out_left = left + 3;
    let out_bottom = (top + TS - 3).min(height - BORDER);
    let out_right = (left + TS - 3).min(width - BORDER);
    let cols = out_right.saturating_sub(out_left);
    let mut pixels = Vec::with_capacity(cols * out_bottom.saturating_sub(out_top));
    for row in out_top..out_bottom {
        let tr = row - top;
        for col in out_left..out_right {
            let tc = col - left;
            let mut hm = [0u32; 2];
            for (d, score) in hm.iter_mut().enumerate() {
                for i in tr - 1..=tr + 1 {
                    for j in tc - 1..=tc + 1 {
                        *score += homo[d][at(i, j)] as u32;
                    }
                }
            }
            let i = at(tr, tc);
            let px = if hm[0] != hm[1] {
                rgb[(hm[1] > hm[0]) as usize][i]
            } else {
                std::array::from_fn(|c| ((rgb[0][i][c] as u32 + rgb[1][i][c] as u32) >> 1) as u16)
            };
            pixels.push(px);
        }
    }

    TileResult { top: out_top, left: out_left, cols, pixels }
}

#[inline(always)]
fn ulim(x: i32, a: i32, b: i32) -> i32 {
    if a < b { x.clamp(a, b) } else { x.clamp(b, a) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::FilterPattern;
    use crate::lab::IDENTITY_RGB_CAM;

    #[test]
    fn uniform_color_reconstructed() {
        let cielab = CieLab::new(&IDENTITY_RGB_CAM);
        for pattern in [FilterPattern::rggb(), FilterPattern::bggr(), FilterPattern::grbg(), FilterPattern::gbrg()] {
            let mosaic = MosaicImage::from_fn(24, 20, pattern.clone(), |_, _, c| [30000, 18000, 9000, 0][c]).unwrap();
            let raster = demosaic(&mosaic, &cielab);
            for pix in raster.pixels() {
                assert_eq!(&pix[..3], &[30000, 18000, 9000], "{pattern}");
            }
        }
    }

    #[test]
    fn known_channel_preserved() {
        let cielab = CieLab::new(&IDENTITY_RGB_CAM);
        let pattern = FilterPattern::grbg();
        let mosaic = MosaicImage::from_fn(32, 32, pattern.clone(), |row, col, c| ((row * 31 + col * 17 + c * 7) % 64) as u16 * 900).unwrap();
        let raster = demosaic(&mosaic, &cielab);
        for row in 0..32 {
            for col in 0..32 {
                assert_eq!(raster[(row, col)][pattern.fc(row, col)], mosaic.get(row, col));
            }
        }
    }

    #[test]
    fn tiles_cover_the_interior_once() {
        let cielab = CieLab::new(&IDENTITY_RGB_CAM);
        let mosaic = MosaicImage::from_fn(1100, 12, FilterPattern::rggb(), |_, _, c| [100, 200, 300, 0][c]).unwrap();
        let raster = demosaic(&mosaic, &cielab);
        assert!(raster.pixels().iter().all(|p| p[..3] == [100, 200, 300]));
    }
}
