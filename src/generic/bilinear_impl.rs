use crate::border::border_interpolate;
use crate::cfa::FilterPattern;
use crate::image::{MosaicImage, Raster};
use crate::parallel;

/// One neighbour sample feeding a missing channel.
#[derive(Clone, Copy, Debug)]
struct Tap {
    dy: isize,
    dx: isize,
    /// Weight exponent: 1 for same row or column, 0 for diagonals.
    shift: u32,
    color: usize,
}

/// Precomputed taps of one pattern cell.
#[derive(Clone, Debug)]
struct Cell {
    native: usize,
    taps: Vec<Tap>,
    /// Sum of tap weights per channel.
    weight: [u32; 4],
}

/// Per-cell tap tables for one repeat period of the pattern.
struct TapTable {
    period: usize,
    cells: Vec<Cell>,
}

impl TapTable {
    fn new(pattern: &FilterPattern) -> Self {
        let period = pattern.period();
        let mut cells = Vec::with_capacity(period * period);
        for row in 0..period as isize {
            for col in 0..period as isize {
                let native = pattern.color_at(row, col);
                let mut taps = Vec::with_capacity(8);
                let mut weight = [0u32; 4];
                for dy in -1..=1isize {
                    for dx in -1..=1isize {
                        let color = pattern.color_at(row + dy, col + dx);
                        if color == native {
                            continue;
                        }
                        let shift = (dy == 0) as u32 + (dx == 0) as u32;
                        taps.push(Tap { dy, dx, shift, color });
                        weight[color] += 1 << shift;
                    }
                }
                cells.push(Cell { native, taps, weight });
            }
        }
        Self { period, cells }
    }

    #[inline(always)]
    fn cell(&self, row: usize, col: usize) -> &Cell {
        &self.cells[(row % self.period) * self.period + col % self.period]
    }
}

/// Bilinear demosaicing for any pattern.
///
/// Each missing channel is the weighted average of the native samples of
/// that channel in the 3x3 window: weight 2 for the four orthogonal
/// neighbours, 1 for diagonals. The one-pixel border is filled by
/// [`border_interpolate`] first.
pub fn demosaic(mosaic: &MosaicImage) -> Raster {
    let width = mosaic.width();
    let height = mosaic.height();
    let colors = mosaic.colors();
    let mut raster = Raster::from_mosaic(mosaic);
    border_interpolate(&mut raster, mosaic.pattern(), 1);
    if width < 3 || height < 3 {
        return raster;
    }

    let table = TapTable::new(mosaic.pattern());
    let data = mosaic.data();

    parallel::for_each_row(raster.pixels_mut(), width, |row, line| {
        if row == 0 || row + 1 == height {
            return;
        }
        for col in 1..width - 1 {
            let cell = table.cell(row, col);
            let mut sum = [0u32; 4];
            for tap in &cell.taps {
                let y = (row as isize + tap.dy) as usize;
                let x = (col as isize + tap.dx) as usize;
                sum[tap.color] += (data[y * width + x] as u32) << tap.shift;
            }
            let pix = &mut line[col];
            for c in 0..colors {
                let w = cell.weight[c];
                if c != cell.native && w > 0 {
                    pix[c] = ((sum[c] + w / 2) / w) as u16;
                }
            }
        }
    });
    raster
}
