use crate::cfa::FilterPattern;
use crate::image::{clip, MosaicImage, Pixel, Raster};
use crate::parallel;

/// Gradient terms: `(y1, x1, y2, x2, weight, gradient mask)`.
///
/// Each term compares two same-colour samples of the 5x5 window; the
/// shifted absolute difference is added to every gradient in the mask
/// (bit `g` = direction `g` of [`NEIGHBOURS`]).
#[rustfmt::skip]
const TERMS: [(i8, i8, i8, i8, u8, u8); 64] = [
    (-2, -2, 0, -1, 0, 0x01), (-2, -2, 0, 0, 1, 0x01), (-2, -1, -1, 0, 0, 0x01),
    (-2, -1, 0, -1, 0, 0x02), (-2, -1, 0, 0, 0, 0x03), (-2, -1, 0, 1, 1, 0x01),
    (-2, 0, 0, -1, 0, 0x06), (-2, 0, 0, 0, 1, 0x02), (-2, 0, 0, 1, 0, 0x03),
    (-2, 1, -1, 0, 0, 0x04), (-2, 1, 0, -1, 1, 0x04), (-2, 1, 0, 0, 0, 0x06),
    (-2, 1, 0, 1, 0, 0x02), (-2, 2, 0, 0, 1, 0x04), (-2, 2, 0, 1, 0, 0x04),
    (-1, -2, -1, 0, 0, 0x80), (-1, -2, 0, -1, 0, 0x01), (-1, -2, 1, -1, 0, 0x01),
    (-1, -2, 1, 0, 1, 0x01), (-1, -1, -1, 1, 0, 0x88), (-1, -1, 1, -2, 0, 0x40),
    (-1, -1, 1, -1, 0, 0x22), (-1, -1, 1, 0, 0, 0x33), (-1, -1, 1, 1, 1, 0x11),
    (-1, 0, -1, 2, 0, 0x08), (-1, 0, 0, -1, 0, 0x44), (-1, 0, 0, 1, 0, 0x11),
    (-1, 0, 1, -2, 1, 0x40), (-1, 0, 1, -1, 0, 0x66), (-1, 0, 1, 0, 1, 0x22),
    (-1, 0, 1, 1, 0, 0x33), (-1, 0, 1, 2, 1, 0x10), (-1, 1, 1, -1, 1, 0x44),
    (-1, 1, 1, 0, 0, 0x66), (-1, 1, 1, 1, 0, 0x22), (-1, 1, 1, 2, 0, 0x10),
    (-1, 2, 0, 1, 0, 0x04), (-1, 2, 1, 0, 1, 0x04), (-1, 2, 1, 1, 0, 0x04),
    (0, -2, 0, 0, 1, 0x80), (0, -1, 0, 1, 1, 0x88), (0, -1, 1, -2, 0, 0x40),
    (0, -1, 1, 0, 0, 0x11), (0, -1, 2, -2, 0, 0x40), (0, -1, 2, -1, 0, 0x20),
    (0, -1, 2, 0, 0, 0x30), (0, -1, 2, 1, 1, 0x10), (0, 0, 0, 2, 1, 0x08),
    (0, 0, 2, -2, 1, 0x40), (0, 0, 2, -1, 0, 0x60), (0, 0, 2, 0, 1, 0x20),
    (0, 0, 2, 1, 0, 0x30), (0, 0, 2, 2, 1, 0x10), (0, 1, 1, 0, 0, 0x44),
    (0, 1, 1, 2, 0, 0x10), (0, 1, 2, -1, 1, 0x40), (0, 1, 2, 0, 0, 0x60),
    (0, 1, 2, 1, 0, 0x20), (0, 1, 2, 2, 0, 0x10), (1, -2, 1, 0, 0, 0x80),
    (1, -1, 1, 1, 0, 0x88), (1, 0, 1, 2, 0, 0x08), (1, 0, 2, -1, 0, 0x40),
    (1, 0, 2, 1, 0, 0x10),
];

/// The eight directions, clockwise from north-west.
const NEIGHBOURS: [(isize, isize); 8] = [(-1, -1), (-1, 0), (-1, 1), (0, 1), (1, 1), (1, 0), (1, -1), (0, -1)];

/// Rows of context above and below the row being computed.
const REACH: usize = 2;

#[derive(Clone, Copy, Debug)]
struct GradTerm {
    a: (isize, isize),
    b: (isize, isize),
    color: usize,
    shift: u32,
    grads: u8,
}

#[derive(Clone, Debug)]
struct CellCode {
    native: usize,
    terms: Vec<GradTerm>,
    /// Per direction: the neighbour one step away has a different colour
    /// but the one two steps away shares the native colour.
    two_away: [bool; 8],
}

struct CodeTable {
    period: usize,
    cells: Vec<CellCode>,
}

impl CodeTable {
    fn new(pattern: &FilterPattern) -> Self {
        let period = pattern.period();
        let mut cells = Vec::with_capacity(period * period);
        for row in 0..period as isize {
            for col in 0..period as isize {
                let native = pattern.color_at(row, col);
                let mut terms = Vec::with_capacity(TERMS.len());
                for &(y1, x1, y2, x2, weight, grads) in &TERMS {
                    let (y1, x1, y2, x2) = (y1 as isize, x1 as isize, y2 as isize, x2 as isize);
                    let color = pattern.color_at(row + y1, col + x1);
                    if pattern.color_at(row + y2, col + x2) != color {
                        continue;
                    }
                    let diag = if pattern.color_at(row, col + 1) == color && pattern.color_at(row + 1, col) == color {
                        2
                    } else {
                        1
                    };
                    if (y1 - y2).abs() == diag && (x1 - x2).abs() == diag {
                        continue;
                    }
                    terms.push(GradTerm { a: (y1, x1), b: (y2, x2), color, shift: weight as u32, grads });
                }
                let two_away = NEIGHBOURS.map(|(y, x)| {
                    pattern.color_at(row + y, col + x) != native && pattern.color_at(row + 2 * y, col + 2 * x) == native
                });
                cells.push(CellCode { native, terms, two_away });
            }
        }
        Self { period, cells }
    }

    #[inline(always)]
    fn cell(&self, row: usize, col: usize) -> &CellCode {
        &self.cells[(row % self.period) * self.period + col % self.period]
    }
}

/// Seed rows copied from just outside a band, so neighbouring bands never
/// observe each other's results.
struct Halo {
    above: Vec<Pixel>,
    above_first: usize,
    below: Vec<Pixel>,
}

/// Read-only view of the seed image around one band.
struct SeedView<'a> {
    band: &'a [Pixel],
    first: usize,
    rows: usize,
    width: usize,
    halo: &'a Halo,
}

impl SeedView<'_> {
    #[inline(always)]
    fn row(&self, row: usize) -> &[Pixel] {
        let w = self.width;
        if row < self.first {
            let i = row - self.halo.above_first;
            &self.halo.above[i * w..(i + 1) * w]
        } else if row < self.first + self.rows {
            let i = row - self.first;
            &self.band[i * w..(i + 1) * w]
        } else {
            let i = row - self.first - self.rows;
            &self.halo.below[i * w..(i + 1) * w]
        }
    }

    #[inline(always)]
    fn at(&self, row: usize, col: usize, dy: isize, dx: isize) -> &Pixel {
        &self.row((row as isize + dy) as usize)[(col as isize + dx) as usize]
    }
}

/// Variable Number of Gradients demosaicing.
///
/// Starts from the bilinear result. For every interior pixel eight
/// directional gradients are accumulated from the per-cell term table;
/// the directions whose gradient is at most `min + (max - min) / 2` are
/// averaged as colour differences against the native channel.
///
/// Rows are split into parallel bands. Inside a band a three-row window
/// holds finished rows and each row goes back into the buffer two rows
/// later, once nothing still in flight reads it as seed data.
pub fn demosaic(mosaic: &MosaicImage) -> Raster {
    let mut raster = super::bilinear(mosaic);
    let width = raster.width();
    let height = raster.height();
    if width <= 2 * REACH || height <= 2 * REACH {
        return raster;
    }

    let table = CodeTable::new(mosaic.pattern());
    let colors = raster.colors();
    let rows = parallel::rows_per_band(height);

    let halos: Vec<Halo> = {
        let pixels = raster.pixels();
        (0..height.div_ceil(rows))
            .map(|band| {
                let first = band * rows;
                let end = (first + rows).min(height);
                let above_first = first.saturating_sub(REACH);
                let below_end = (end + REACH).min(height);
                Halo {
                    above: pixels[above_first * width..first * width].to_vec(),
                    above_first,
                    below: pixels[end * width..below_end * width].to_vec(),
                }
            })
            .collect()
    };

    parallel::for_each_band(raster.pixels_mut(), width, |first, band| {
        let band_rows = band.len() / width;
        let halo = &halos[first / rows];
        let start = first.max(REACH);
        let end = (first + band_rows).min(height - REACH);
        let mut window = vec![[0u16; 4]; 3 * width];

        for row in start..end {
            {
                let seed = SeedView { band, first, rows: band_rows, width, halo };
                let slot = &mut window[(row % 3) * width..(row % 3 + 1) * width];
                for col in REACH..width - REACH {
                    slot[col] = interpolate(&seed, &table, colors, row, col);
                }
            }
            if row >= start + REACH {
                write_back(band, &window, first, row - REACH, width);
            }
        }
        for row in end.saturating_sub(REACH).max(start)..end {
            write_back(band, &window, first, row, width);
        }
    });
    raster
}

fn write_back(band: &mut [Pixel], window: &[Pixel], first: usize, row: usize, width: usize) {
    let src = &window[(row % 3) * width..(row % 3 + 1) * width];
    let dst = &mut band[(row - first) * width..(row - first + 1) * width];
    dst[REACH..width - REACH].copy_from_slice(&src[REACH..width - REACH]);
}

#[inline]
fn interpolate(seed: &SeedView<'_>, table: &CodeTable, colors: usize, row: usize, col: usize) -> Pixel {
    let cell = table.cell(row, col);
    let pix = *seed.at(row, col, 0, 0);

    let mut gval = [0i32; 8];
    for term in &cell.terms {
        let p1 = seed.at(row, col, term.a.0, term.a.1)[term.color] as i32;
        let p2 = seed.at(row, col, term.b.0, term.b.1)[term.color] as i32;
        let diff = (p1 - p2).abs() << term.shift;
        for (g, v) in gval.iter_mut().enumerate() {
            if term.grads & (1 << g) != 0 {
                *v += diff;
            }
        }
    }

    let gmin = *gval.iter().min().unwrap_or(&0);
    let gmax = *gval.iter().max().unwrap_or(&0);
    if gmax == 0 {
        return pix;
    }
    let threshold = gmin + (gmax - gmin) / 2;

    let native = cell.native;
    let mut sum = [0i32; 4];
    let mut num = 0i32;
    for (g, &(dy, dx)) in NEIGHBOURS.iter().enumerate() {
        if gval[g] > threshold {
            continue;
        }
        let neighbour = seed.at(row, col, dy, dx);
        for c in 0..colors {
            if c == native && cell.two_away[g] {
                let far = seed.at(row, col, 2 * dy, 2 * dx)[c] as i32;
                sum[c] += (pix[c] as i32 + far) >> 1;
            } else {
                sum[c] += neighbour[c] as i32;
            }
        }
        num += 1;
    }

    let mut out = pix;
    for c in 0..colors {
        if c != native {
            out[c] = clip(pix[native] as i32 + (sum[c] - sum[native]) / num);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_mosaic(pattern: FilterPattern, w: usize, h: usize) -> MosaicImage {
        MosaicImage::from_fn(w, h, pattern, |row, col, c| (1000 + row * 150 + col * 90 + c * 400) as u16).unwrap()
    }

    #[test]
    fn term_table_has_64_entries() {
        assert_eq!(TERMS.len(), 64);
        let table = CodeTable::new(&FilterPattern::rggb());
        assert!(table.cells.iter().all(|cell| !cell.terms.is_empty()));
    }

    #[test]
    fn known_channel_preserved() {
        for pattern in [FilterPattern::rggb(), FilterPattern::bggr(), FilterPattern::grbg(), FilterPattern::gbrg()] {
            let mosaic = gradient_mosaic(pattern.clone(), 16, 16);
            let raster = demosaic(&mosaic);
            for row in 0..16 {
                for col in 0..16 {
                    assert_eq!(raster[(row, col)][pattern.fc(row, col)], mosaic.get(row, col), "{pattern} ({row},{col})");
                }
            }
        }
    }

    #[test]
    fn uniform_color_reconstructed() {
        for pattern in [FilterPattern::rggb(), FilterPattern::xtrans_default(), FilterPattern::rggb().with_fourth_green()] {
            let mosaic = MosaicImage::from_fn(24, 18, pattern.clone(), |_, _, c| [8000, 4000, 2000, 4000][c]).unwrap();
            let raster = demosaic(&mosaic);
            for pix in raster.pixels() {
                assert_eq!(&pix[..3], &[8000, 4000, 2000], "{pattern}");
            }
        }
    }

    #[test]
    fn band_split_matches_single_pass() {
        let mosaic = gradient_mosaic(FilterPattern::grbg(), 33, 57);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let single = pool.install(|| demosaic(&mosaic));
        let pool = rayon::ThreadPoolBuilder::new().num_threads(5).build().unwrap();
        let many = pool.install(|| demosaic(&mosaic));
        assert_eq!(single, many);
    }

    #[test]
    fn tiny_images_fall_back_to_seed() {
        let mosaic = gradient_mosaic(FilterPattern::rggb(), 4, 4);
        assert_eq!(demosaic(&mosaic), super::super::bilinear(&mosaic));
    }
}
