//! Algorithms for 6x6 non-Bayer layouts.

mod markesteijn_impl;

use crate::image::{MosaicImage, Raster};
use crate::lab::CieLab;

pub fn six_color(mosaic: &MosaicImage, cielab: &CieLab, passes: u32) -> Raster {
    markesteijn_impl::demosaic(mosaic, cielab, passes)
}
