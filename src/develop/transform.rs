//! Output colour transforms and grayscale reduction.

use serde::{Deserialize, Serialize};

use crate::image::Pixel;

/// Working-RGB to output-RGB conversion supplied by a colour management
/// collaborator (an ICC transform, typically).
///
/// Called on one row of developed 16-bit pixels at a time, possibly from
/// several threads at once. Only the first three channels carry data.
pub trait ColorTransform: Send + Sync {
    fn apply(&self, row: &mut [Pixel]);
}

impl<F> ColorTransform for F
where
    F: Fn(&mut [Pixel]) + Send + Sync,
{
    fn apply(&self, row: &mut [Pixel]) {
        self(row)
    }
}

/// Reduction to a single gray value written to all three channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum Grayscale {
    /// Keep colour.
    #[default]
    None,

    /// Weighted sum of R, G and B; the weights are normalized to sum to 1.
    Mixer([f32; 3]),

    /// `(min + max) / 2`.
    Lightness,

    /// `max`.
    Value,
}

impl Grayscale {
    pub fn apply(&self, pix: &mut Pixel) {
        let [r, g, b] = [pix[0], pix[1], pix[2]];
        let gray = match *self {
            Grayscale::None => return,
            Grayscale::Mixer(weights) => {
                let total: f32 = weights.iter().sum();
                if total == 0.0 {
                    return;
                }
                let v = (r as f32 * weights[0] + g as f32 * weights[1] + b as f32 * weights[2]) / total;
                (v + 0.5).clamp(0.0, 65535.0) as u16
            }
            Grayscale::Lightness => ((r.min(g).min(b) as u32 + r.max(g).max(b) as u32) / 2) as u16,
            Grayscale::Value => r.max(g).max(b),
        };
        pix[..3].fill(gray);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grayscale_modes() {
        let px = [1000, 4000, 3000, 0];
        let run = |mode: Grayscale| {
            let mut p = px;
            mode.apply(&mut p);
            p
        };
        assert_eq!(run(Grayscale::None), px);
        assert_eq!(run(Grayscale::Lightness), [2500, 2500, 2500, 0]);
        assert_eq!(run(Grayscale::Value), [4000, 4000, 4000, 0]);
        assert_eq!(run(Grayscale::Mixer([2.0, 1.0, 1.0])), [2250, 2250, 2250, 0]);
    }

    #[test]
    fn closures_are_transforms() {
        let invert = |row: &mut [Pixel]| {
            for p in row {
                for v in &mut p[..3] {
                    *v = 65535 - *v;
                }
            }
        };
        let mut row = [[0, 100, 65535, 0]];
        ColorTransform::apply(&invert, &mut row);
        assert_eq!(row[0][..3], [65535, 65435, 0]);
    }
}
