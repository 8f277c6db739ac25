//! Tone curves: base curve, gamma with a linear toe, and the 16-bit table
//! combining them.

use serde::{Deserialize, Serialize};

/// Size of the tone table: one entry per 16-bit input value.
pub const TABLE_SIZE: usize = 0x10000;

/// Fraction of the output range passed through unchanged before the
/// highlight roll-off starts.
const ROLL_OFF_KNEE: f32 = 0.8;

/// Piecewise-linear curve through `(input, output)` control points on
/// `[0, 1]`. No points means the identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BaseCurve {
    points: Vec<[f32; 2]>,
}

impl BaseCurve {
    /// Curve through `points`, sorted by input.
    pub fn new(mut points: Vec<[f32; 2]>) -> Self {
        points.retain(|p| p[0].is_finite() && p[1].is_finite());
        points.sort_by(|a, b| a[0].total_cmp(&b[0]));
        Self { points }
    }

    /// Control points.
    pub fn points(&self) -> &[[f32; 2]] {
        &self.points
    }

    /// `true` when the curve maps every input to itself.
    pub fn is_identity(&self) -> bool {
        self.points.iter().all(|p| p[0] == p[1])
    }

    /// Evaluate at `x`. Outside the control points the first and last
    /// segments are extended.
    pub fn eval(&self, x: f32) -> f32 {
        match self.points.as_slice() {
            [] => x,
            [p] => x + (p[1] - p[0]),
            points => {
                let i = points.partition_point(|p| p[0] <= x).clamp(1, points.len() - 1);
                let (a, b) = (points[i - 1], points[i]);
                let span = b[0] - a[0];
                if span <= 0.0 {
                    return b[1];
                }
                a[1] + (x - a[0]) * (b[1] - a[1]) / span
            }
        }
    }
}

/// Power curve with a linear segment near black.
///
/// `gamma` is the exponent (0.45 for a typical display encoding) and
/// `linearity` the input below which the curve is a straight line through
/// the origin. The two pieces meet with matching value and slope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gamma {
    exponent: f32,
    linear: f32,
    a: f32,
    b: f32,
    c: f32,
}

impl Gamma {
    pub fn new(gamma: f32, linearity: f32) -> Self {
        let gamma = if gamma > 0.0 { gamma } else { 1.0 };
        let linear = linearity.clamp(0.0, 0.99);
        if linear <= 0.0 || gamma * linear >= 1.0 {
            return Self { exponent: gamma, linear: 0.0, a: 1.0, b: 0.0, c: 1.0 };
        }
        let g = gamma * (1.0 - linear) / (1.0 - gamma * linear);
        let a = 1.0 / (1.0 + linear * (g - 1.0));
        let b = linear * (g - 1.0) * a;
        let c = (a * linear + b).powf(g) / linear;
        Self { exponent: g, linear, a, b, c }
    }

    /// Map `x` in `[0, 1]`.
    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        if x <= 0.0 {
            0.0
        } else if x < self.linear {
            self.c * x
        } else {
            (self.a * x + self.b).powf(self.exponent)
        }
    }
}

/// Compress values above the knee so `[knee, inf)` lands in `[knee, 1)`.
#[inline]
fn roll_off(x: f32) -> f32 {
    if x <= ROLL_OFF_KNEE {
        return x;
    }
    let room = 1.0 - ROLL_OFF_KNEE;
    ROLL_OFF_KNEE + room * (1.0 - (-(x - ROLL_OFF_KNEE) / room).exp())
}

/// Inputs the tone table depends on. The table is rebuilt exactly when
/// this changes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ToneKey {
    pub gamma: f32,
    pub linearity: f32,
    pub headroom: f32,
    pub base_curve: BaseCurve,
}

/// Build the 16-bit tone table.
///
/// Entry `i` stands for linear value `i / 65535 * headroom` (white = 1).
/// The base curve is applied first, then a highlight roll-off when the
/// table spans more than the clipped range, then gamma.
pub(crate) fn build_table(key: &ToneKey) -> Vec<u16> {
    let scale = key.headroom / (TABLE_SIZE - 1) as f32;
    let gamma = Gamma::new(key.gamma, key.linearity);
    let rolls_off = key.headroom > 1.0;
    (0..TABLE_SIZE)
        .map(|i| {
            let mut v = key.base_curve.eval(i as f32 * scale);
            if rolls_off {
                v = roll_off(v);
            }
            let out = gamma.apply(v.clamp(0.0, 1.0));
            (out * 65535.0 + 0.5).clamp(0.0, 65535.0) as u16
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_gamma_is_identity() {
        let g = Gamma::new(1.0, 0.1);
        for x in [0.0, 0.05, 0.3, 0.99] {
            assert!((g.apply(x) - x).abs() < 1e-6, "{x}");
        }
    }

    #[test]
    fn gamma_pieces_meet() {
        let g = Gamma::new(0.45, 0.1);
        let below = g.apply(0.1 - 1e-4);
        let above = g.apply(0.1 + 1e-4);
        assert!((below - above).abs() < 1e-3);
        assert!((g.apply(1.0) - 1.0).abs() < 1e-5);
        // Brightens mid tones.
        assert!(g.apply(0.18) > 0.4);
    }

    #[test]
    fn zero_linearity_is_a_pure_power() {
        let g = Gamma::new(0.5, 0.0);
        assert!((g.apply(0.25) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn base_curve_interpolates() {
        let curve = BaseCurve::new(vec![[1.0, 1.0], [0.0, 0.0], [0.5, 0.25]]);
        assert_eq!(curve.eval(0.5), 0.25);
        assert!((curve.eval(0.25) - 0.125).abs() < 1e-6);
        assert!((curve.eval(0.75) - 0.625).abs() < 1e-6);
        assert!(!curve.is_identity());
        assert!(BaseCurve::default().is_identity());
        assert_eq!(BaseCurve::default().eval(0.3), 0.3);
    }

    #[test]
    fn linear_table_is_identity() {
        let key = ToneKey { gamma: 1.0, linearity: 0.0, headroom: 1.0, base_curve: BaseCurve::default() };
        let table = build_table(&key);
        assert_eq!(table.len(), TABLE_SIZE);
        for i in [0usize, 1, 1000, 32768, 65535] {
            assert_eq!(table[i] as usize, i);
        }
    }

    #[test]
    fn headroom_keeps_highlights_below_white() {
        let key = ToneKey { gamma: 1.0, linearity: 0.0, headroom: 2.0, base_curve: BaseCurve::default() };
        let table = build_table(&key);
        // Index 32767 is linear 1.0, rolled off below white.
        assert!(table[32767] < 65535);
        assert!(table.windows(2).all(|w| w[0] <= w[1]));
        assert!(table[65535] > table[32767]);
    }
}
