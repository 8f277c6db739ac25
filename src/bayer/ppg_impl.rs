use crate::border::border_interpolate;
use crate::image::{clip, MosaicImage, Raster};
use crate::parallel;

const BORDER: usize = 3;

/// Clamp `x` into the range spanned by `a` and `b`, whichever order.
#[inline(always)]
fn ulim(x: i32, a: i32, b: i32) -> i32 {
    if a < b { x.clamp(a, b) } else { x.clamp(b, a) }
}

/// Patterned Pixel Grouping demosaicing for 2x2 Bayer patterns.
///
/// Three passes, each reading a snapshot of the previous one:
/// 1. Green at red/blue sites from the horizontal or vertical estimate
///    with the smaller gradient, clamped to the two neighbouring greens.
/// 2. Red and blue at green sites from gradient-corrected averages.
/// 3. Blue at red sites and red at blue sites along the flatter diagonal
///    (the average of both when they tie).
pub fn demosaic(mosaic: &MosaicImage) -> Raster {
    let width = mosaic.width();
    let height = mosaic.height();
    let pattern = mosaic.pattern();
    let mut raster = Raster::from_mosaic(mosaic);
    border_interpolate(&mut raster, pattern, BORDER);
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return raster;
    }

    // Pass 1: green.
    let snap = raster.clone();
    parallel::for_each_row(raster.pixels_mut(), width, |row, line| {
        if row < BORDER || row >= height - BORDER {
            return;
        }
        for col in BORDER..width - BORDER {
            let c = pattern.fc(row, col);
            if c == 1 {
                continue;
            }
            let at = |dy: isize, dx: isize, ch: usize| snap[((row as isize + dy) as usize, (col as isize + dx) as usize)][ch] as i32;
            let center = at(0, 0, c);
            let mut guess = [0i32; 2];
            let mut diff = [0i32; 2];
            for (i, (dy, dx)) in [(0isize, 1isize), (1, 0)].into_iter().enumerate() {
                guess[i] = (at(-dy, -dx, 1) + center + at(dy, dx, 1)) * 2 - at(-2 * dy, -2 * dx, c) - at(2 * dy, 2 * dx, c);
                diff[i] = ((at(-2 * dy, -2 * dx, c) - center).abs()
                    + (at(2 * dy, 2 * dx, c) - center).abs()
                    + (at(-dy, -dx, 1) - at(dy, dx, 1)).abs())
                    * 3
                    + ((at(3 * dy, 3 * dx, 1) - at(dy, dx, 1)).abs() + (at(-3 * dy, -3 * dx, 1) - at(-dy, -dx, 1)).abs()) * 2;
            }
            let i = (diff[0] > diff[1]) as usize;
            let (dy, dx) = if i == 0 { (0, 1) } else { (1, 0) };
            line[col][1] = ulim(guess[i] >> 2, at(dy, dx, 1), at(-dy, -dx, 1)) as u16;
        }
    });

    // Pass 2: red and blue at green sites.
    let snap = raster.clone();
    parallel::for_each_row(raster.pixels_mut(), width, |row, line| {
        if row == 0 || row + 1 >= height {
            return;
        }
        for col in 1..width - 1 {
            if pattern.fc(row, col) != 1 {
                continue;
            }
            let at = |dy: isize, dx: isize, ch: usize| snap[((row as isize + dy) as usize, (col as isize + dx) as usize)][ch] as i32;
            let green = at(0, 0, 1);
            for (dy, dx) in [(0isize, 1isize), (1, 0)] {
                let c = pattern.color_at(row as isize + dy, col as isize + dx);
                line[col][c] = clip((at(-dy, -dx, c) + at(dy, dx, c) + 2 * green - at(-dy, -dx, 1) - at(dy, dx, 1)) >> 1);
            }
        }
    });

    // Pass 3: blue at red, red at blue.
    let snap = raster.clone();
    parallel::for_each_row(raster.pixels_mut(), width, |row, line| {
        if row == 0 || row + 1 >= height {
            return;
        }
        for col in 1..width - 1 {
            let native = pattern.fc(row, col);
            if native == 1 {
                continue;
            }
            let c = 2 - native;
            let at = |dy: isize, dx: isize, ch: usize| snap[((row as isize + dy) as usize, (col as isize + dx) as usize)][ch] as i32;
            let green = at(0, 0, 1);
            let mut guess = [0i32; 2];
            let mut diff = [0i32; 2];
            for (i, (dy, dx)) in [(1isize, 1isize), (1, -1)].into_iter().enumerate() {
                diff[i] = (at(-dy, -dx, c) - at(dy, dx, c)).abs()
                    + (at(-dy, -dx, 1) - green).abs()
                    + (at(dy, dx, 1) - green).abs();
                guess[i] = at(-dy, -dx, c) + at(dy, dx, c) + 2 * green - at(-dy, -dx, 1) - at(dy, dx, 1);
            }
            line[col][c] = if diff[0] != diff[1] {
                clip(guess[(diff[0] > diff[1]) as usize] >> 1)
            } else {
                clip((guess[0] + guess[1]) >> 2)
            };
        }
    });

    raster
}
