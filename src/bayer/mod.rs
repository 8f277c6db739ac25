//! Algorithms that need a 2x2 Bayer layout with exactly three channels.

mod ahd_impl;
mod ppg_impl;

use crate::image::{MosaicImage, Raster};
use crate::lab::CieLab;

pub fn ppg(mosaic: &MosaicImage) -> Raster {
    ppg_impl::demosaic(mosaic)
}

pub fn ahd(mosaic: &MosaicImage, cielab: &CieLab) -> Raster {
    ahd_impl::demosaic(mosaic, cielab)
}
