//! Highlight clipping and recovery.

use serde::{Deserialize, Serialize};

use crate::lab::{lab_to_rgb, rgb_to_lab};

/// How recovered highlights are blended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Recovery {
    /// Lightness of the unclipped pixel with the chroma and hue of the
    /// clipped one, mixed in CIELab.
    #[default]
    Lab,

    /// Scale the clipped pixel so its HSL lightness `(max + min) / 2`
    /// matches the unclipped one; hue and the max/mid/min ordering stay.
    MaxMidMin,
}

/// What happens to channels pushed past the clip level by white balance
/// and exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Highlights {
    /// Clamp every channel at the clip level.
    #[default]
    Clip,

    /// Keep detail above the clip level, blended per [`Recovery`].
    Recover(Recovery),
}

/// Recover a pixel whose channels may exceed `clip`.
///
/// The blend is projected channel by channel onto the box between the
/// clipped and the unclipped pixel, so the result never leaves it.
pub fn recover(unclipped: [f32; 3], clip: f32, mode: Recovery) -> [f32; 3] {
    let clipped = unclipped.map(|v| v.min(clip));
    if clipped == unclipped {
        return unclipped;
    }
    let blended = match mode {
        Recovery::Lab => lab_blend(unclipped, clipped, clip),
        Recovery::MaxMidMin => lightness_scale(unclipped, clipped),
    };
    std::array::from_fn(|c| {
        let (lo, hi) = if clipped[c] <= unclipped[c] { (clipped[c], unclipped[c]) } else { (unclipped[c], clipped[c]) };
        if blended[c].is_finite() { blended[c].clamp(lo, hi) } else { lo }
    })
}

fn lab_blend(unclipped: [f32; 3], clipped: [f32; 3], clip: f32) -> [f32; 3] {
    let norm = |rgb: [f32; 3]| rgb.map(|v| v.max(0.0) / clip);
    let lab_u = rgb_to_lab(norm(unclipped));
    let lab_c = rgb_to_lab(norm(clipped));
    lab_to_rgb([lab_u[0], lab_c[1], lab_c[2]]).map(|v| v * clip)
}

fn lightness_scale(unclipped: [f32; 3], clipped: [f32; 3]) -> [f32; 3] {
    let max_min = |rgb: [f32; 3]| {
        let max = rgb.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let min = rgb.iter().copied().fold(f32::INFINITY, f32::min);
        max + min
    };
    let target = max_min(unclipped);
    let current = max_min(clipped);
    if current <= 0.0 {
        return clipped;
    }
    let scale = target / current;
    clipped.map(|v| v * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIP: f32 = 65535.0;

    fn assert_between(out: [f32; 3], unclipped: [f32; 3]) {
        for c in 0..3 {
            let lo = unclipped[c].min(CLIP);
            assert!(out[c] >= lo && out[c] <= unclipped[c], "channel {c}: {} not in [{lo}, {}]", out[c], unclipped[c]);
        }
    }

    #[test]
    fn unclipped_pixels_pass_through() {
        let px = [1000.0, 30000.0, 65535.0];
        assert_eq!(recover(px, CLIP, Recovery::Lab), px);
        assert_eq!(recover(px, CLIP, Recovery::MaxMidMin), px);
    }

    #[test]
    fn single_channel_overflow_stays_in_box() {
        for unclipped in [[98000.0, 52000.0, 39000.0], [20000.0, 80000.0, 10000.0], [1000.0, 2000.0, 120000.0]] {
            for mode in [Recovery::Lab, Recovery::MaxMidMin] {
                assert_between(recover(unclipped, CLIP, mode), unclipped);
            }
        }
    }

    #[test]
    fn lightness_scaling_lifts_the_clipped_channel() {
        let unclipped = [1.5 * CLIP, 0.8 * CLIP, 0.6 * CLIP];
        let out = recover(unclipped, CLIP, Recovery::MaxMidMin);
        // Scale (1.5 + 0.6) / (1.0 + 0.6) lifts red above the clip level.
        assert!((out[0] / CLIP - 1.3125).abs() < 1e-4);
        assert_eq!(out[1], 0.8 * CLIP);
        assert_eq!(out[2], 0.6 * CLIP);
    }

    #[test]
    fn lab_recovery_keeps_lightness_direction() {
        let unclipped = [1.4 * CLIP, 0.9 * CLIP, 0.7 * CLIP];
        let out = recover(unclipped, CLIP, Recovery::Lab);
        assert_between(out, unclipped);
        assert!(out[0] >= CLIP);
    }
}
