//! CIELab conversions.
//!
//! [`CieLab`] is the integer, table-driven converter used by the
//! homogeneity tests of AHD and the six-colour algorithm. The free
//! functions are the float pair used by highlight recovery, which needs
//! the inverse as well.

/// sRGB primaries to XYZ.
const XYZ_RGB: [[f32; 3]; 3] = [
    [0.412453, 0.357580, 0.180423],
    [0.212671, 0.715160, 0.072169],
    [0.019334, 0.119193, 0.950227],
];

/// D65 reference white.
const D65_WHITE: [f32; 3] = [0.950456, 1.0, 1.088754];

const EPSILON: f32 = 0.008856;
const KAPPA_SLOPE: f32 = 7.787;
const F_OFFSET: f32 = 16.0 / 116.0;

/// Camera-space to Lab converter with a 64K cube-root table.
///
/// Output components are scaled by 64 so they keep sub-unit precision in
/// integers: `L` spans `0..=6400` for in-gamut input.
pub struct CieLab {
    cbrt: Vec<f32>,
    xyz_cam: [[f32; 4]; 3],
}

impl CieLab {
    /// Build the converter for a camera whose `rgb_cam` matrix maps camera
    /// channels to linear sRGB.
    pub fn new(rgb_cam: &[[f32; 4]; 3]) -> Self {
        let cbrt = (0..=0xffffu32)
            .map(|i| {
                let r = i as f32 / 65535.0;
                if r > EPSILON { r.cbrt() } else { KAPPA_SLOPE * r + F_OFFSET }
            })
            .collect();

        let mut xyz_cam = [[0.0f32; 4]; 3];
        for (i, row) in xyz_cam.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| XYZ_RGB[i][k] * rgb_cam[k][j]).sum::<f32>() / D65_WHITE[i];
            }
        }
        Self { cbrt, xyz_cam }
    }

    /// Convert one pixel of `colors` camera channels.
    #[inline]
    pub fn lab(&self, rgb: &[u16; 4], colors: usize) -> [i32; 3] {
        let mut xyz = [0.5f32; 3];
        for c in 0..colors {
            let v = rgb[c] as f32;
            xyz[0] += self.xyz_cam[0][c] * v;
            xyz[1] += self.xyz_cam[1][c] * v;
            xyz[2] += self.xyz_cam[2][c] * v;
        }
        let f = xyz.map(|v| self.cbrt[(v as i32).clamp(0, 0xffff) as usize]);
        [
            (64.0 * (116.0 * f[1] - 16.0)) as i32,
            (64.0 * 500.0 * (f[0] - f[1])) as i32,
            (64.0 * 200.0 * (f[1] - f[2])) as i32,
        ]
    }
}

/// Identity camera matrix: camera channels are already linear sRGB.
pub const IDENTITY_RGB_CAM: [[f32; 4]; 3] = [
    [1.0, 0.0, 0.0, 0.0],
    [0.0, 1.0, 0.0, 0.0],
    [0.0, 0.0, 1.0, 0.0],
];

/// Convert linear RGB (1.0 = white) to CIELab.
#[inline]
pub fn rgb_to_lab(rgb: [f32; 3]) -> [f32; 3] {
    let xyz: [f32; 3] = std::array::from_fn(|i| {
        (XYZ_RGB[i][0] * rgb[0] + XYZ_RGB[i][1] * rgb[1] + XYZ_RGB[i][2] * rgb[2]) / D65_WHITE[i]
    });
    let fx = lab_f(xyz[0]);
    let fy = lab_f(xyz[1]);
    let fz = lab_f(xyz[2]);
    [116.0 * fy - 16.0, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// Inverse of [`rgb_to_lab`].
#[inline]
pub fn lab_to_rgb(lab: [f32; 3]) -> [f32; 3] {
    let fy = (lab[0] + 16.0) / 116.0;
    let fx = fy + lab[1] / 500.0;
    let fz = fy - lab[2] / 200.0;
    let xyz = [lab_f_inv(fx) * D65_WHITE[0], lab_f_inv(fy) * D65_WHITE[1], lab_f_inv(fz) * D65_WHITE[2]];
    // Inverse of XYZ_RGB.
    const RGB_XYZ: [[f32; 3]; 3] = [
        [3.240479, -1.537150, -0.498535],
        [-0.969256, 1.875992, 0.041556],
        [0.055648, -0.204043, 1.057311],
    ];
    std::array::from_fn(|i| RGB_XYZ[i][0] * xyz[0] + RGB_XYZ[i][1] * xyz[1] + RGB_XYZ[i][2] * xyz[2])
}

#[inline(always)]
fn lab_f(t: f32) -> f32 {
    if t > EPSILON {
        t.cbrt()
    } else {
        KAPPA_SLOPE * t + F_OFFSET
    }
}

#[inline(always)]
fn lab_f_inv(f: f32) -> f32 {
    let cube = f * f * f;
    if cube > EPSILON {
        cube
    } else {
        (f - F_OFFSET) / KAPPA_SLOPE
    }
}
