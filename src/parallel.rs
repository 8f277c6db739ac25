//! Row-band helpers for fork-join image passes.

use rayon::prelude::*;

/// Number of bands per worker thread; a little oversubscription keeps
/// threads busy when some bands finish early.
const BANDS_PER_THREAD: usize = 2;

/// Rows per band so an image of `height` rows splits into roughly
/// `threads * 2` bands. At least one row.
#[inline]
pub fn rows_per_band(height: usize) -> usize {
    let bands = rayon::current_num_threads() * BANDS_PER_THREAD;
    height.div_ceil(bands).max(1)
}

/// Run `f(first_row, band)` over disjoint horizontal bands of a row-major
/// buffer in parallel. Every band holds whole rows of `width` elements.
pub fn for_each_band<T, F>(data: &mut [T], width: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    if data.is_empty() || width == 0 {
        return;
    }
    let height = data.len() / width;
    let rows = rows_per_band(height);
    data.par_chunks_mut(rows * width)
        .enumerate()
        .for_each(|(band, chunk)| f(band * rows, chunk));
}

/// Run `f(row, row_slice)` for every row of a row-major buffer in parallel.
pub fn for_each_row<T, F>(data: &mut [T], width: usize, f: F)
where
    T: Send,
    F: Fn(usize, &mut [T]) + Sync + Send,
{
    if data.is_empty() || width == 0 {
        return;
    }
    data.par_chunks_mut(width).enumerate().for_each(|(row, line)| f(row, line));
}
