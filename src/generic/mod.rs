//! Pattern-agnostic algorithms: they work from per-cell lookup tables, so
//! any [`FilterPattern`](crate::FilterPattern) layout is accepted.

mod bilinear_impl;
mod vng_impl;

use crate::image::{MosaicImage, Raster};

pub fn bilinear(mosaic: &MosaicImage) -> Raster {
    bilinear_impl::demosaic(mosaic)
}

pub fn vng(mosaic: &MosaicImage) -> Raster {
    vng_impl::demosaic(mosaic)
}
