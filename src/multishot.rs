//! Merging captures made of several exposures of the same scene.
//!
//! Shots are pulled one at a time from a [`ShotSource`] by a small state
//! machine ([`Stage`]), accumulated, and merged at the end.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cfa::FilterPattern;
use crate::error::{DevelopError, Result};
use crate::image::{MosaicImage, Raster};

/// Error type a [`ShotSource`] reports.
pub type ShotError = Box<dyn std::error::Error + Send + Sync>;

/// Decoder collaborator that yields the individual shots of a capture.
pub trait ShotSource {
    /// Number of shots in the capture.
    fn shot_count(&self) -> usize;

    /// Decode shot `index`.
    fn load_shot(&mut self, index: usize) -> std::result::Result<MosaicImage, ShotError>;
}

/// How shots combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MergeMode {
    /// Average co-sited samples to reduce noise; the result is still a
    /// mosaic.
    #[default]
    Average,

    /// Shot `n` was taken with the sensor moved by one photosite along the
    /// cycle `(0, 0), (0, 1), (1, 1), (1, 0)`, so every pixel sees every
    /// filter colour and no demosaicing is needed.
    PixelShift,
}

/// Merge output. Either kind converts into a pipeline
/// [`Source`](crate::pipeline::Source).
#[derive(Debug, Clone, PartialEq)]
pub enum Merged {
    Mosaic(MosaicImage),
    Raster(Raster),
}

/// Step of the merge loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    FirstShot,
    NextShot(usize),
    Merge,
}

/// Sensor offset `(dy, dx)` of pixel-shift shot `index`.
pub fn shift_offset(index: usize) -> (usize, usize) {
    let row = (index >> 1) & 1;
    let col = ((index >> 1) ^ index) & 1;
    (row, col)
}

/// Running sums of the shots seen so far.
struct Accumulator {
    mode: MergeMode,
    width: usize,
    height: usize,
    pattern: FilterPattern,
    sums: Vec<[u32; 4]>,
    counts: Vec<[u16; 4]>,
}

impl Accumulator {
    fn new(first: &MosaicImage, mode: MergeMode) -> Self {
        let n = first.width() * first.height();
        let mut acc = Self {
            mode,
            width: first.width(),
            height: first.height(),
            pattern: first.pattern().clone(),
            sums: vec![[0; 4]; n],
            counts: vec![[0; 4]; n],
        };
        acc.add(0, first);
        acc
    }

    fn add(&mut self, index: usize, shot: &MosaicImage) {
        let width = shot.width();
        let pattern = shot.pattern();
        let (dy, dx) = match self.mode {
            MergeMode::Average => (0, 0),
            MergeMode::PixelShift => shift_offset(index),
        };
        for row in 0..shot.height() {
            for col in 0..width {
                let i = row * width + col;
                let c = match self.mode {
                    MergeMode::Average => 0,
                    MergeMode::PixelShift => pattern.fc(row + dy, col + dx),
                };
                self.sums[i][c] += shot.data()[i] as u32;
                self.counts[i][c] += 1;
            }
        }
    }

    fn finish(self) -> Result<Merged> {
        let average = |sum: u32, count: u16| if count == 0 { 0 } else { ((sum + count as u32 / 2) / count as u32) as u16 };
        match self.mode {
            MergeMode::Average => {
                let data = self.sums.iter().zip(&self.counts).map(|(s, n)| average(s[0], n[0])).collect();
                Ok(Merged::Mosaic(MosaicImage::new(self.width, self.height, self.pattern, data)?))
            }
            MergeMode::PixelShift => {
                let colors = self.pattern.colors();
                let pixels = self
                    .sums
                    .iter()
                    .zip(&self.counts)
                    .map(|(s, n)| std::array::from_fn(|c| average(s[c], n[c])))
                    .collect();
                let raster = Raster::from_pixels(self.width, self.height, colors, pixels)?;
                Ok(Merged::Raster(raster))
            }
        }
    }
}

/// Load every shot of `source` and merge them.
///
/// Fails with [`DevelopError::NoShots`] for an empty capture,
/// [`DevelopError::ShotSource`] when a shot can't be decoded and
/// [`DevelopError::ShotMismatch`] when a shot's size differs from the
/// first one.
pub fn merge_shots<S: ShotSource + ?Sized>(source: &mut S, mode: MergeMode) -> Result<Merged> {
    let count = source.shot_count();
    if count == 0 {
        return Err(DevelopError::NoShots);
    }
    let mut stage = Stage::FirstShot;
    let mut acc: Option<Accumulator> = None;

    loop {
        stage = match stage {
            Stage::FirstShot => {
                let shot = load(source, 0)?;
                acc = Some(Accumulator::new(&shot, mode));
                if count > 1 { Stage::NextShot(1) } else { Stage::Merge }
            }
            Stage::NextShot(index) => {
                let shot = load(source, index)?;
                if let Some(acc) = acc.as_mut() {
                    let (width, height) = (acc.width, acc.height);
                    if shot.width() != width || shot.height() != height {
                        return Err(DevelopError::ShotMismatch {
                            index,
                            width,
                            height,
                            got_width: shot.width(),
                            got_height: shot.height(),
                        });
                    }
                    acc.add(index, &shot);
                }
                if index + 1 < count { Stage::NextShot(index + 1) } else { Stage::Merge }
            }
            Stage::Merge => {
                debug!(shots = count, ?mode, "merging shots");
                return match acc {
                    Some(acc) => acc.finish(),
                    None => Err(DevelopError::NoShots),
                };
            }
        };
    }
}

fn load<S: ShotSource + ?Sized>(source: &mut S, index: usize) -> Result<MosaicImage> {
    source
        .load_shot(index)
        .map_err(|source| DevelopError::ShotSource { index, source })
}
