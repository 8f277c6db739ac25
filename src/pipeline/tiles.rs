//! The fixed 4 x 8 tile grid and per-phase validity masks.

use std::fmt;

use crate::geometry::Rect;

/// Tile rows of the grid.
pub const TILE_ROWS: usize = 4;
/// Tile columns of the grid.
pub const TILE_COLS: usize = 8;
/// Tiles per image.
pub const TILE_COUNT: usize = TILE_ROWS * TILE_COLS;

/// One validity bit per tile; bit `i` covers grid cell `(i / 8, i % 8)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TileMask(u32);

impl TileMask {
    /// No tile valid.
    pub const EMPTY: TileMask = TileMask(0);
    /// Every tile valid.
    pub const FULL: TileMask = TileMask(u32::MAX);

    pub fn from_bits(bits: u32) -> Self {
        TileMask(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// `true` when `tile` is marked.
    #[inline]
    pub fn contains(self, tile: usize) -> bool {
        tile < TILE_COUNT && self.0 & (1 << tile) != 0
    }

    #[inline]
    pub fn insert(&mut self, tile: usize) {
        debug_assert!(tile < TILE_COUNT);
        self.0 |= 1 << tile;
    }

    pub fn is_full(self) -> bool {
        self == Self::FULL
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of marked tiles.
    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Marked tile indices, ascending.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..TILE_COUNT).filter(move |&t| self.contains(t))
    }

    /// Tiles not marked.
    pub fn missing(self) -> TileMask {
        TileMask(!self.0)
    }
}

impl fmt::Display for TileMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Pixel rectangle of `tile` in a `width` x `height` image. Edges are
/// spread evenly, so tiles of tiny images may be empty.
pub fn tile_rect(tile: usize, width: usize, height: usize) -> Rect {
    let (row, col) = (tile / TILE_COLS, tile % TILE_COLS);
    let top = row * height / TILE_ROWS;
    let bottom = (row + 1) * height / TILE_ROWS;
    let left = col * width / TILE_COLS;
    let right = (col + 1) * width / TILE_COLS;
    Rect { top, left, height: bottom - top, width: right - left }
}

/// Tiles of a `width` x `height` image that share a pixel with `rect`.
pub fn tiles_touching(rect: Rect, width: usize, height: usize) -> TileMask {
    let mut mask = TileMask::EMPTY;
    for tile in 0..TILE_COUNT {
        let r = tile_rect(tile, width, height);
        if r.width > 0 && r.height > 0 && r.intersects(&rect) {
            mask.insert(tile);
        }
    }
    mask
}
