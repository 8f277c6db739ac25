use std::fmt;

use serde::{Deserialize, Serialize};

/// Color channel of a CFA photosite.
///
/// `Green2` is the second green of a Bayer quad, kept apart only while the
/// mosaic is processed in four-color mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Red channel.
    Red = 0,
    /// Green channel.
    Green = 1,
    /// Blue channel.
    Blue = 2,
    /// Second green of a Bayer quad.
    Green2 = 3,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Red => f.write_str("R"),
            Self::Green => f.write_str("G"),
            Self::Blue => f.write_str("B"),
            Self::Green2 => f.write_str("g"),
        }
    }
}

use Channel::*;

/// Standard X-Trans 6x6 layout.
const XTRANS_DEFAULT: [[Channel; 6]; 6] = [
    [Red,   Blue,  Green, Blue,  Red,   Green],
    [Green, Green, Red,   Green, Green, Blue],
    [Green, Green, Blue,  Green, Green, Red],
    [Blue,  Red,   Green, Red,   Blue,  Green],
    [Green, Green, Blue,  Green, Green, Red],
    [Green, Green, Red,   Green, Green, Blue],
];

/// Filter pattern descriptor.
///
/// Exactly one interpretation is active per image:
/// - `Bayer` holds the classic 32-bit code whose 2-bit groups give the
///   channel for each `(row, col)` parity (rows repeat every 8, which
///   covers all 2x2 layouts);
/// - `Table16` is a 16x16 periodic table, offset by the sensor margins;
/// - `SixBySix` is a 6x6 non-Bayer table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterPattern {
    /// 2x2 Bayer-family code.
    Bayer(u32),
    /// 16x16 table indexed by `(row + top_margin, col + left_margin) mod 16`.
    Table16 {
        /// Channel per cell.
        table: [[u8; 16]; 16],
        /// Row offset applied before the lookup.
        top_margin: usize,
        /// Column offset applied before the lookup.
        left_margin: usize,
    },
    /// 6x6 table indexed by `(row, col) mod 6`.
    SixBySix([[u8; 6]; 6]),
}

/// RGGB code.
pub const BAYER_RGGB: u32 = 0x9494_9494;
/// BGGR code.
pub const BAYER_BGGR: u32 = 0x1616_1616;
/// GRBG code.
pub const BAYER_GRBG: u32 = 0x6161_6161;
/// GBRG code.
pub const BAYER_GBRG: u32 = 0x4949_4949;

impl FilterPattern {
    /// Bayer RGGB.
    pub fn rggb() -> Self {
        Self::Bayer(BAYER_RGGB)
    }

    /// Bayer BGGR.
    pub fn bggr() -> Self {
        Self::Bayer(BAYER_BGGR)
    }

    /// Bayer GRBG.
    pub fn grbg() -> Self {
        Self::Bayer(BAYER_GRBG)
    }

    /// Bayer GBRG.
    pub fn gbrg() -> Self {
        Self::Bayer(BAYER_GBRG)
    }

    /// Build a Bayer code from the four channels of the top-left quad
    /// (`[row0col0, row0col1, row1col0, row1col1]`).
    pub fn bayer_from_quad(quad: [Channel; 4]) -> Self {
        Self::Bayer(quad_code(quad.map(|ch| ch as u32)))
    }

    /// Rewrite a [`Table16`](Self::Table16) that only repeats one 2x2 quad
    /// with a single red and a single blue as the matching `Bayer` code.
    ///
    /// PPG, AHD and half-size extraction only accept `Bayer` codes, so a
    /// decoder that hands over such a table gets the same treatment as a
    /// plain Bayer sensor. Anything else is returned unchanged.
    pub fn normalized(self) -> Self {
        if !matches!(self, Self::Table16 { .. }) {
            return self;
        }
        let quad: [usize; 4] = std::array::from_fn(|i| self.color_at((i >> 1) as isize, (i & 1) as isize));
        let periodic = (0..16isize)
            .all(|row| (0..16isize).all(|col| self.color_at(row, col) == quad[((row & 1) * 2 + (col & 1)) as usize]));
        if !periodic || quad.iter().any(|&c| c > 3) {
            return self;
        }
        let count = |ch: usize| quad.iter().filter(|&&c| c == ch).count();
        if count(0) != 1 || count(2) != 1 {
            return self;
        }
        Self::Bayer(quad_code(quad.map(|c| c as u32)))
    }

    /// Standard X-Trans layout.
    pub fn xtrans_default() -> Self {
        Self::six_by_six(XTRANS_DEFAULT)
    }

    /// Custom 6x6 layout.
    pub fn six_by_six(layout: [[Channel; 6]; 6]) -> Self {
        let mut table = [[0u8; 6]; 6];
        for (row, cells) in layout.iter().enumerate() {
            for (col, &ch) in cells.iter().enumerate() {
                table[row][col] = ch as u8;
            }
        }
        Self::SixBySix(table)
    }

    /// Same pattern with the second green split into its own channel.
    ///
    /// Only Bayer codes change; the green on the blue row becomes channel 3.
    pub fn with_fourth_green(&self) -> Self {
        match *self {
            Self::Bayer(code) => {
                let mut split = code;
                for row in 0..8isize {
                    for col in 0..2isize {
                        let shift = ((((row << 1) & 14) | (col & 1)) << 1) as u32;
                        if (code >> shift) & 3 != 1 {
                            continue;
                        }
                        let row_has_blue = (0..2).any(|c| self.color_at(row, c) == 2);
                        if row_has_blue {
                            split |= 3 << shift;
                        }
                    }
                }
                Self::Bayer(split)
            }
            _ => self.clone(),
        }
    }

    /// Return a shifted view of this pattern.
    ///
    /// The shift follows the additive convention:
    /// `shifted.color_at(row, col) == self.color_at(row + dy, col + dx)`.
    pub fn shifted(&self, dy: usize, dx: usize) -> Self {
        match self {
            Self::Bayer(_) => {
                let mut code = 0u32;
                for row in 0..8isize {
                    for col in 0..2isize {
                        let ch = self.color_at(row + dy as isize, col + dx as isize) as u32;
                        code |= ch << ((((row << 1) & 14) | col) << 1);
                    }
                }
                Self::Bayer(code)
            }
            Self::Table16 { table, top_margin, left_margin } => Self::Table16 {
                table: *table,
                top_margin: (top_margin + dy) % 16,
                left_margin: (left_margin + dx) % 16,
            },
            Self::SixBySix(_) => {
                let mut table = [[0u8; 6]; 6];
                for (row, cells) in table.iter_mut().enumerate() {
                    for (col, cell) in cells.iter_mut().enumerate() {
                        *cell = self.fc(row + dy, col + dx) as u8;
                    }
                }
                Self::SixBySix(table)
            }
        }
    }

    /// Channel at the given coordinate. Total over all integers.
    #[inline]
    pub fn color_at(&self, row: isize, col: isize) -> usize {
        match self {
            Self::Bayer(code) => {
                let shift = ((((row << 1) & 14) | (col & 1)) << 1) as u32;
                ((code >> shift) & 3) as usize
            }
            Self::Table16 { table, top_margin, left_margin } => {
                let r = (row + *top_margin as isize).rem_euclid(16) as usize;
                let c = (col + *left_margin as isize).rem_euclid(16) as usize;
                table[r][c] as usize
            }
            Self::SixBySix(table) => {
                let r = (row + 6).rem_euclid(6) as usize;
                let c = (col + 6).rem_euclid(6) as usize;
                table[r][c] as usize
            }
        }
    }

    /// Shorthand for in-bounds coordinates.
    #[inline(always)]
    pub fn fc(&self, row: usize, col: usize) -> usize {
        self.color_at(row as isize, col as isize)
    }

    /// Repeat period of the pattern along both axes.
    pub fn period(&self) -> usize {
        match self {
            Self::Bayer(_) => 16,
            Self::Table16 { .. } => 16,
            Self::SixBySix(_) => 6,
        }
    }

    /// `true` for a 2x2 Bayer code.
    pub fn is_bayer(&self) -> bool {
        matches!(self, Self::Bayer(_))
    }

    /// `true` for a 6x6 table.
    pub fn is_six_color(&self) -> bool {
        matches!(self, Self::SixBySix(_))
    }

    /// `true` when some cell resolves to the fourth channel.
    pub fn uses_fourth_green(&self) -> bool {
        let n = self.period() as isize;
        (0..n).any(|row| (0..n).any(|col| self.color_at(row, col) == 3))
    }

    /// Number of distinct channels the pattern resolves to.
    pub fn colors(&self) -> usize {
        if self.uses_fourth_green() { 4 } else { 3 }
    }

    /// Debug check of the table contents.
    pub(crate) fn is_well_formed(&self) -> bool {
        match self {
            Self::Bayer(_) => true,
            Self::Table16 { table, .. } => table.iter().flatten().all(|&c| c < 4),
            Self::SixBySix(table) => table.iter().flatten().all(|&c| c < 3),
        }
    }

    /// Precomputed channels of one row.
    #[inline]
    pub fn row_colors(&self, row: usize) -> RowColors {
        match self {
            Self::SixBySix(table) => {
                let r = table[row % 6];
                RowColors::Six(r)
            }
            _ => {
                let mut packed = 0u32;
                for col in 0..16 {
                    packed |= (self.fc(row, col) as u32) << (col * 2);
                }
                RowColors::Packed(packed)
            }
        }
    }
}

/// Bayer code repeating `quad` (`[row0col0, row0col1, row1col0, row1col1]`).
fn quad_code(quad: [u32; 4]) -> u32 {
    let mut code = 0u32;
    for row in 0..8u32 {
        for col in 0..2u32 {
            code |= quad[((row & 1) * 2 + col) as usize] << ((((row << 1) & 14) | col) << 1);
        }
    }
    code
}

/// Channel sequence of a single row, so inner pixel loops skip the
/// per-pixel pattern dispatch.
#[derive(Clone, Copy, Debug)]
pub enum RowColors {
    /// 2 bits per column for 16 columns.
    Packed(u32),
    /// One period of a six-color row.
    Six([u8; 6]),
}

impl RowColors {
    /// Channel at `col` of this row.
    #[inline(always)]
    pub fn at(&self, col: usize) -> usize {
        match self {
            Self::Packed(bits) => ((bits >> ((col & 15) * 2)) & 3) as usize,
            Self::Six(row) => row[col % 6] as usize,
        }
    }
}

impl fmt::Display for FilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [char; 4] = ['R', 'G', 'B', 'g'];
        match self {
            Self::Bayer(_) => {
                for (row, col) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
                    write!(f, "{}", NAMES[self.color_at(row, col)])?;
                }
                Ok(())
            }
            Self::Table16 { .. } => f.write_str("16x16 table"),
            Self::SixBySix(_) => f.write_str("6x6 table"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bayer_rggb_pattern() {
        let cfa = FilterPattern::rggb();
        assert_eq!(cfa.color_at(0, 0), Red as usize);
        assert_eq!(cfa.color_at(0, 1), Green as usize);
        assert_eq!(cfa.color_at(1, 0), Green as usize);
        assert_eq!(cfa.color_at(1, 1), Blue as usize);
        // Tiling
        assert_eq!(cfa.color_at(2, 2), Red as usize);
        assert_eq!(cfa.color_at(3, 3), Blue as usize);
    }

    #[test]
    fn named_codes_match_quads() {
        assert_eq!(FilterPattern::bayer_from_quad([Red, Green, Green, Blue]), FilterPattern::rggb());
        assert_eq!(FilterPattern::bayer_from_quad([Blue, Green, Green, Red]), FilterPattern::bggr());
        assert_eq!(FilterPattern::bayer_from_quad([Green, Red, Blue, Green]), FilterPattern::grbg());
        assert_eq!(FilterPattern::bayer_from_quad([Green, Blue, Red, Green]), FilterPattern::gbrg());
    }

    #[test]
    fn negative_coordinates_wrap() {
        let patterns = [
            FilterPattern::rggb(),
            FilterPattern::xtrans_default(),
            FilterPattern::Table16 { table: [[0, 1, 1, 2, 0, 1, 1, 2, 0, 1, 1, 2, 0, 1, 1, 2]; 16], top_margin: 3, left_margin: 5 },
        ];
        for cfa in &patterns {
            let n = cfa.period() as isize;
            for row in -9..9isize {
                for col in -9..9isize {
                    let c = cfa.color_at(row, col);
                    assert!(c < 3, "{cfa}: color {c} at ({row},{col})");
                    assert_eq!(c, cfa.color_at(row + n, col + n));
                }
            }
        }
    }

    #[test]
    fn only_bayer_tables_normalize() {
        let bayer_table = |quad: [u8; 4]| {
            let mut table = [[0u8; 16]; 16];
            for (row, cells) in table.iter_mut().enumerate() {
                for (col, cell) in cells.iter_mut().enumerate() {
                    *cell = quad[(row & 1) * 2 + (col & 1)];
                }
            }
            table
        };
        let rggb = FilterPattern::Table16 { table: bayer_table([0, 1, 1, 2]), top_margin: 0, left_margin: 0 };
        assert_eq!(rggb.normalized(), FilterPattern::rggb());
        // Margins are folded into the code.
        let shifted = FilterPattern::Table16 { table: bayer_table([0, 1, 1, 2]), top_margin: 1, left_margin: 0 };
        assert_eq!(shifted.normalized(), FilterPattern::gbrg());
        let split = FilterPattern::Table16 { table: bayer_table([0, 1, 3, 2]), top_margin: 0, left_margin: 0 };
        assert_eq!(split.normalized(), FilterPattern::rggb().with_fourth_green());

        let two_reds = FilterPattern::Table16 { table: bayer_table([0, 1, 0, 2]), top_margin: 0, left_margin: 0 };
        assert_eq!(two_reds.clone().normalized(), two_reds);
        let mut seam = bayer_table([0, 1, 1, 2]);
        seam[9][5] = 1;
        let seam = FilterPattern::Table16 { table: seam, top_margin: 0, left_margin: 0 };
        assert_eq!(seam.clone().normalized(), seam);
        assert_eq!(FilterPattern::xtrans_default().normalized(), FilterPattern::xtrans_default());
    }

    #[test]
    fn table16_honours_margins() {
        let mut table = [[0u8; 16]; 16];
        table[3][5] = 2;
        let cfa = FilterPattern::Table16 { table, top_margin: 3, left_margin: 5 };
        assert_eq!(cfa.color_at(0, 0), 2);
        assert_eq!(cfa.color_at(16, 16), 2);
        assert_eq!(cfa.color_at(0, 1), 0);
    }

    #[test]
    fn xtrans_default_pattern() {
        let cfa = FilterPattern::xtrans_default();
        assert_eq!(cfa.period(), 6);
        // Top-left corner: R B G B R G
        assert_eq!(cfa.color_at(0, 0), Red as usize);
        assert_eq!(cfa.color_at(0, 1), Blue as usize);
        assert_eq!(cfa.color_at(0, 2), Green as usize);
        assert_eq!(cfa.color_at(6, 0), Red as usize);
        assert_eq!(cfa.color_at(-6, 0), Red as usize);
        assert_eq!(cfa.color_at(0, -1), Green as usize);
    }

    #[test]
    fn xtrans_every_3x3_has_all_colors() {
        let cfa = FilterPattern::xtrans_default();
        for by in 0..6 {
            for bx in 0..6 {
                let mut has = [false; 3];
                for y in 0..3 {
                    for x in 0..3 {
                        has[cfa.fc(by + y, bx + x)] = true;
                    }
                }
                assert!(has[0] && has[1] && has[2], "3x3 block at ({by},{bx}) missing a color");
            }
        }
    }

    #[test]
    fn shifted_views() {
        let bayer = FilterPattern::rggb();
        assert_eq!(bayer.shifted(1, 0), FilterPattern::gbrg());
        assert_eq!(bayer.shifted(0, 1), FilterPattern::grbg());
        assert_eq!(bayer.shifted(1, 1), FilterPattern::bggr());

        let xtrans = FilterPattern::xtrans_default();
        let shifted = xtrans.shifted(1, 1);
        assert_eq!(shifted.fc(0, 0), xtrans.fc(1, 1));
        assert_eq!(shifted.fc(2, 3), xtrans.fc(3, 4));
    }

    #[test]
    fn fourth_green_sits_on_blue_rows() {
        let cfa = FilterPattern::rggb().with_fourth_green();
        assert!(cfa.uses_fourth_green());
        assert_eq!(cfa.colors(), 4);
        assert_eq!(cfa.color_at(0, 1), 1);
        assert_eq!(cfa.color_at(1, 0), 3);
        assert_eq!(cfa.color_at(1, 1), 2);
        assert!(!FilterPattern::rggb().uses_fourth_green());
    }

    #[test]
    fn row_colors_match_lookup() {
        for cfa in [FilterPattern::grbg(), FilterPattern::xtrans_default()] {
            for row in 0..12 {
                let rc = cfa.row_colors(row);
                for col in 0..40 {
                    assert_eq!(rc.at(col), cfa.fc(row, col), "{cfa} ({row},{col})");
                }
            }
        }
    }
}
