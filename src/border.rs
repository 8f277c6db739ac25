use crate::cfa::FilterPattern;
use crate::image::Raster;

/// Fill the missing channels of every pixel within `margin` of an edge.
///
/// Each non-native channel becomes the rounded average of the native
/// samples of that channel in the 3x3 neighbourhood, clipped to the image.
/// Channels with no such neighbour keep their current value. Native
/// samples are never touched, so the result does not depend on the order
/// in which border pixels are visited.
pub fn border_interpolate(raster: &mut Raster, pattern: &FilterPattern, margin: usize) {
    let width = raster.width();
    let height = raster.height();
    let colors = raster.colors();

    for row in 0..height {
        let mut col = 0;
        while col < width {
            // Skip the interior span of this row.
            if col == margin && row >= margin && row + margin < height && width > 2 * margin {
                col = width - margin;
                if col >= width {
                    break;
                }
            }

            let mut sum = [0u32; 4];
            let mut count = [0u32; 4];
            for y in row.saturating_sub(1)..=(row + 1).min(height - 1) {
                for x in col.saturating_sub(1)..=(col + 1).min(width - 1) {
                    let c = pattern.fc(y, x);
                    sum[c] += raster[(y, x)][c] as u32;
                    count[c] += 1;
                }
            }

            let native = pattern.fc(row, col);
            let pix = raster.get_mut(row, col);
            for c in 0..colors {
                if c != native && count[c] > 0 {
                    pix[c] = ((sum[c] + count[c] / 2) / count[c]) as u16;
                }
            }
            col += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::MosaicImage;

    fn constant_mosaic(pattern: FilterPattern, w: usize, h: usize) -> MosaicImage {
        MosaicImage::from_fn(w, h, pattern, |_, _, c| [4000, 9000, 2500, 9000][c]).unwrap()
    }

    #[test]
    fn border_of_constant_field_is_exact() {
        for pattern in [FilterPattern::rggb(), FilterPattern::gbrg(), FilterPattern::xtrans_default()] {
            let mosaic = constant_mosaic(pattern.clone(), 18, 13);
            let mut raster = Raster::from_mosaic(&mosaic);
            border_interpolate(&mut raster, &pattern, 3);
            for row in 0..13 {
                for col in 0..18 {
                    let border = row < 3 || col < 3 || row >= 10 || col >= 15;
                    if border {
                        assert_eq!(&raster[(row, col)][..3], &[4000, 9000, 2500], "{pattern} ({row},{col})");
                    }
                }
            }
        }
    }

    #[test]
    fn interior_left_untouched() {
        let pattern = FilterPattern::rggb();
        let mosaic = constant_mosaic(pattern.clone(), 10, 10);
        let mut raster = Raster::from_mosaic(&mosaic);
        border_interpolate(&mut raster, &pattern, 1);
        // (4,4) is red: green and blue must still be zero.
        assert_eq!(raster[(4, 4)], [4000, 0, 0, 0]);
        assert_eq!(raster[(0, 4)], [4000, 9000, 2500, 0]);
    }

    #[test]
    fn margin_larger_than_image_covers_everything() {
        let pattern = FilterPattern::bggr();
        let mosaic = constant_mosaic(pattern.clone(), 3, 2);
        let mut raster = Raster::from_mosaic(&mosaic);
        border_interpolate(&mut raster, &pattern, 8);
        assert!(raster.pixels().iter().all(|p| p[..3] == [4000, 9000, 2500]));
    }
}
