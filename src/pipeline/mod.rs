//! Staged development with per-tile invalidation.
//!
//! Five phases run in order:
//!
//! | phase | work | granularity |
//! |---|---|---|
//! | [`Phase::Raw`] | levels, green equilibration, wavelet denoise, demosaic or half-size, derotation, stretch, flip | whole image |
//! | [`Phase::PreProcessed`] | hot-pixel despeckle | tile |
//! | [`Phase::Transformed`] | rotation, crop, shrink | tile |
//! | [`Phase::Developed`] | colour development | tile |
//! | [`Phase::Display`] | 8-bit mapping | tile |
//!
//! Every phase keeps a [`TileMask`]. A tile is marked only after the
//! predecessor tiles it reads from are marked, so a fully marked phase
//! always equals a from-scratch render ([`Pipeline::render_uncached`]).

mod tiles;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument};

pub use tiles::{tile_rect, tiles_touching, TileMask, TILE_COLS, TILE_COUNT, TILE_ROWS};

use crate::config::PipelineConfig;
use crate::denoise::{despeckle, despeckle_region, equilibrate_greens, wavelet_denoise, wavelet_denoise_mosaic};
use crate::develop::{display, display_region, ColorTransform, DevelopParams, Developer};
use crate::geometry::{self, Flip, Rect, Resample};
use crate::image::{DisplayImage, MosaicImage, Raster};
use crate::multishot::Merged;
use crate::{demosaic, Algorithm};

/// Pipeline stage, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Raw,
    PreProcessed,
    Transformed,
    Developed,
    Display,
}

impl Phase {
    /// All phases in order.
    pub const ALL: [Phase; 5] = [Phase::Raw, Phase::PreProcessed, Phase::Transformed, Phase::Developed, Phase::Display];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Phase this one reads from.
    pub fn previous(self) -> Option<Phase> {
        match self {
            Phase::Raw => None,
            Phase::PreProcessed => Some(Phase::Raw),
            Phase::Transformed => Some(Phase::PreProcessed),
            Phase::Developed => Some(Phase::Transformed),
            Phase::Display => Some(Phase::Developed),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Raw => "raw",
            Phase::PreProcessed => "pre-processed",
            Phase::Transformed => "transformed",
            Phase::Developed => "developed",
            Phase::Display => "display",
        })
    }
}

/// Borrowed buffer of one phase.
#[derive(Clone, Copy, Debug)]
pub enum PhaseBuffer<'a> {
    Raster(&'a Raster),
    Display(&'a DisplayImage),
}

impl<'a> PhaseBuffer<'a> {
    pub fn width(&self) -> usize {
        match self {
            PhaseBuffer::Raster(r) => r.width(),
            PhaseBuffer::Display(d) => d.width,
        }
    }

    pub fn height(&self) -> usize {
        match self {
            PhaseBuffer::Raster(r) => r.height(),
            PhaseBuffer::Display(d) => d.height,
        }
    }

    /// The 16-bit raster of every phase but [`Phase::Display`].
    pub fn as_raster(&self) -> Option<&'a Raster> {
        match *self {
            PhaseBuffer::Raster(r) => Some(r),
            PhaseBuffer::Display(_) => None,
        }
    }

    /// The 8-bit image of [`Phase::Display`].
    pub fn as_display(&self) -> Option<&'a DisplayImage> {
        match *self {
            PhaseBuffer::Display(d) => Some(d),
            PhaseBuffer::Raster(_) => None,
        }
    }

    /// Owned copy.
    pub fn to_image(&self) -> PhaseImage {
        match *self {
            PhaseBuffer::Raster(r) => PhaseImage::Raster(r.clone()),
            PhaseBuffer::Display(d) => PhaseImage::Display(d.clone()),
        }
    }
}

/// Owned buffer of one phase.
#[derive(Clone, Debug, PartialEq)]
pub enum PhaseImage {
    Raster(Raster),
    Display(DisplayImage),
}

/// What a [`Pipeline`] develops.
#[derive(Clone, Debug, PartialEq)]
pub enum Source {
    /// Undemosaiced sensor data.
    Mosaic(MosaicImage),
    /// Samples that already carry every channel, such as a pixel-shift
    /// merge. The raw phase skips demosaicing and green equilibration.
    Full(Raster),
}

impl Source {
    pub fn width(&self) -> usize {
        match self {
            Source::Mosaic(m) => m.width(),
            Source::Full(r) => r.width(),
        }
    }

    pub fn height(&self) -> usize {
        match self {
            Source::Mosaic(m) => m.height(),
            Source::Full(r) => r.height(),
        }
    }
}

impl From<MosaicImage> for Source {
    fn from(mosaic: MosaicImage) -> Self {
        Source::Mosaic(mosaic)
    }
}

impl From<Raster> for Source {
    fn from(raster: Raster) -> Self {
        Source::Full(raster)
    }
}

impl From<Merged> for Source {
    fn from(merged: Merged) -> Self {
        match merged {
            Merged::Mosaic(mosaic) => Source::Mosaic(mosaic),
            Merged::Raster(raster) => Source::Full(raster),
        }
    }
}

/// Raw phase: everything before the image becomes tileable.
///
/// Levels, green equilibration, demosaic (or half-size extraction), fourth
/// green merge, wavelet denoise, 45-degree derotation, aspect stretch and
/// flip, in that order. Layouts other than 2x2 Bayer are wavelet-denoised
/// on the mosaic instead, before demosaicing.
#[instrument(level = "debug", skip_all, fields(width = mosaic.width(), height = mosaic.height(), algorithm = %config.algorithm))]
pub fn develop_raw(mosaic: &MosaicImage, config: &PipelineConfig) -> Raster {
    let started = Instant::now();
    let mut mosaic = mosaic.clone();
    mosaic.scale_levels(&config.levels);

    if config.green_threshold > 0.0 {
        equilibrate_greens(&mut mosaic, config.green_threshold);
    }
    let denoise_mosaic = !mosaic.pattern().is_bayer();
    if denoise_mosaic {
        wavelet_denoise_mosaic(&mut mosaic, config.denoise_threshold);
    }

    let half = if config.half_size { mosaic.half_size() } else { None };
    let mut raster = match half {
        Some(raster) => raster,
        None => demosaic(&mosaic, config.algorithm, &config.camera),
    };
    raster.merge_fourth_green();
    if !denoise_mosaic {
        wavelet_denoise(&mut raster, config.denoise_threshold);
    }
    finish_raw(raster, config, started)
}

/// Raw phase of a full-colour source: levels, wavelet denoise and the
/// geometry of [`develop_raw`]. `half_size` has no effect here.
#[instrument(level = "debug", skip_all, fields(width = raster.width(), height = raster.height()))]
pub fn develop_full(raster: &Raster, config: &PipelineConfig) -> Raster {
    let started = Instant::now();
    let mut raster = raster.clone();
    raster.scale_levels(&config.levels);
    raster.merge_fourth_green();
    wavelet_denoise(&mut raster, config.denoise_threshold);
    finish_raw(raster, config, started)
}

/// Raw phase of either kind of [`Source`].
pub fn develop_source(source: &Source, config: &PipelineConfig) -> Raster {
    match source {
        Source::Mosaic(mosaic) => develop_raw(mosaic, config),
        Source::Full(raster) => develop_full(raster, config),
    }
}

fn finish_raw(mut raster: Raster, config: &PipelineConfig, started: Instant) -> Raster {
    if config.derotate_width > 0 {
        raster = geometry::derotate(raster, config.derotate_width);
    }
    raster = geometry::stretch(raster, config.pixel_aspect);
    geometry::flip(&mut raster, config.flip);

    info!(
        width = raster.width(),
        height = raster.height(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "raw phase complete"
    );
    raster
}

fn resample_for(config: &PipelineConfig, width: usize, height: usize) -> Resample {
    Resample::new(width, height, config.rotation, config.crop, config.shrink)
}

/// Allocate `slot` unless it already holds a buffer of the right shape.
fn reuse_or_alloc(slot: &mut Option<Raster>, width: usize, height: usize, colors: usize) -> &mut Raster {
    let fits = slot
        .as_ref()
        .is_some_and(|r| r.width() == width && r.height() == height && r.colors() == colors);
    if !fits {
        *slot = Some(Raster::new(width, height, colors));
    }
    slot.get_or_insert_with(|| Raster::new(width, height, colors))
}

/// Staged, tile-cached development of one [`Source`].
///
/// ```
/// use rawdev::{FilterPattern, MosaicImage, Phase, Pipeline, PipelineConfig};
///
/// let mosaic = MosaicImage::new(32, 16, FilterPattern::rggb(), vec![4000; 512]).unwrap();
/// let mut pipeline = Pipeline::new(mosaic, PipelineConfig::default());
/// pipeline.get_tile(Phase::Display, 0);
/// assert!(pipeline.valid_tiles(Phase::Display).contains(0));
/// let display = pipeline.get_phase(Phase::Display, true);
/// assert_eq!((display.width(), display.height()), (32, 16));
/// ```
pub struct Pipeline {
    source: Source,
    config: PipelineConfig,
    developer: Developer,
    raw: Option<Arc<Raster>>,
    pre: Option<Arc<Raster>>,
    transformed: Option<Raster>,
    developed: Option<Raster>,
    display: Option<DisplayImage>,
    valid: [TileMask; 5],
}

impl Pipeline {
    /// Takes a [`MosaicImage`], a full-colour [`Raster`] or a multi-shot
    /// [`Merged`] result.
    pub fn new(source: impl Into<Source>, config: PipelineConfig) -> Self {
        Self {
            developer: Developer::new(config.develop.clone()),
            source: source.into(),
            config,
            raw: None,
            pre: None,
            transformed: None,
            developed: None,
            display: None,
            valid: [TileMask::EMPTY; 5],
        }
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn developer(&self) -> &Developer {
        &self.developer
    }

    /// Tiles of `phase` that are current.
    pub fn valid_tiles(&self, phase: Phase) -> TileMask {
        self.valid[phase.index()]
    }

    /// Mark `phase` and every later phase stale. Buffers are kept so a
    /// non-full [`get_phase`](Self::get_phase) can still show them.
    pub fn invalidate_from(&mut self, phase: Phase) {
        debug!(%phase, "invalidate");
        for mask in &mut self.valid[phase.index()..] {
            *mask = TileMask::EMPTY;
        }
    }

    /// Buffer of `phase`.
    ///
    /// With `full`, stale tiles are computed first. Without, the buffer is
    /// returned as it is, possibly with stale tiles; a phase that has no
    /// buffer yet is computed in full once.
    pub fn get_phase(&mut self, phase: Phase, full: bool) -> PhaseBuffer<'_> {
        if full || !self.has_buffer(phase) {
            self.ensure_phase(phase);
        }
        self.buffer(phase)
    }

    /// Make `tile` of `phase` current, computing predecessor tiles it
    /// depends on first.
    ///
    /// # Panics
    ///
    /// Panics if `tile >= 32`.
    pub fn get_tile(&mut self, phase: Phase, tile: usize) {
        assert!(tile < TILE_COUNT, "tile index {tile} out of range (0..{TILE_COUNT})");
        self.ensure_tile(phase, tile);
    }

    /// From-scratch render of `phase` with no cache and no tiling.
    pub fn render_uncached(&self, phase: Phase) -> PhaseImage {
        let raw = develop_source(&self.source, &self.config);
        if phase == Phase::Raw {
            return PhaseImage::Raster(raw);
        }
        let pre = if self.config.despeckle > 0.0 { despeckle(&raw, self.config.despeckle) } else { raw };
        if phase == Phase::PreProcessed {
            return PhaseImage::Raster(pre);
        }
        let transformed = resample_for(&self.config, pre.width(), pre.height()).apply(&pre);
        if phase == Phase::Transformed {
            return PhaseImage::Raster(transformed);
        }
        let developed = self.developer.develop(&transformed);
        if phase == Phase::Developed {
            return PhaseImage::Raster(developed);
        }
        PhaseImage::Display(display(&developed))
    }

    /// Replace the configuration, invalidating from the earliest phase
    /// whose inputs changed. Changes to output dimensions drop the
    /// affected buffers.
    pub fn set_config(&mut self, config: PipelineConfig) {
        let old = &self.config;
        let raw_shape = old.half_size != config.half_size
            || old.pixel_aspect != config.pixel_aspect
            || old.derotate_width != config.derotate_width
            || old.flip != config.flip;
        let raw_changed = raw_shape
            || old.algorithm != config.algorithm
            || old.camera != config.camera
            || old.levels != config.levels
            || old.denoise_threshold != config.denoise_threshold
            || old.green_threshold != config.green_threshold;
        let pre_changed = old.despeckle != config.despeckle;
        let transform_shape = old.rotation != config.rotation || old.crop != config.crop || old.shrink != config.shrink;
        let develop_changed = old.develop != config.develop;

        if develop_changed {
            self.developer.set_params(config.develop.clone());
        }
        self.config = config;

        if raw_shape {
            self.raw = None;
        }
        if raw_shape || transform_shape {
            self.transformed = None;
            self.developed = None;
            self.display = None;
        }

        let from = if raw_changed {
            Some(Phase::Raw)
        } else if pre_changed {
            Some(Phase::PreProcessed)
        } else if transform_shape {
            Some(Phase::Transformed)
        } else if develop_changed {
            Some(Phase::Developed)
        } else {
            None
        };
        if let Some(phase) = from {
            self.invalidate_from(phase);
        }
    }

    /// Replace the development parameters.
    pub fn set_develop_params(&mut self, params: DevelopParams) {
        let config = PipelineConfig { develop: params, ..self.config.clone() };
        self.set_config(config);
    }

    /// Set the white balance multipliers. Only the developed phase and
    /// later are invalidated.
    pub fn set_white_balance(&mut self, white_balance: [f32; 4]) {
        let mut config = self.config.clone();
        config.develop.white_balance = white_balance;
        self.set_config(config);
    }

    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        let config = PipelineConfig { algorithm, ..self.config.clone() };
        self.set_config(config);
    }

    /// Set the wavelet and green equilibration thresholds.
    pub fn set_denoise(&mut self, threshold: f32, green_threshold: f32) {
        let config = PipelineConfig { denoise_threshold: threshold, green_threshold, ..self.config.clone() };
        self.set_config(config);
    }

    pub fn set_despeckle(&mut self, threshold: f32) {
        let config = PipelineConfig { despeckle: threshold, ..self.config.clone() };
        self.set_config(config);
    }

    pub fn set_half_size(&mut self, half_size: bool) {
        let config = PipelineConfig { half_size, ..self.config.clone() };
        self.set_config(config);
    }

    /// Set the sensor geometry corrections and orientation of the raw phase.
    pub fn set_geometry(&mut self, pixel_aspect: f64, derotate_width: usize, flip: Flip) {
        let config = PipelineConfig { pixel_aspect, derotate_width, flip, ..self.config.clone() };
        self.set_config(config);
    }

    /// Set rotation, crop and shrink of the transformed phase.
    pub fn set_transform(&mut self, rotation: f64, crop: Option<Rect>, shrink: usize) {
        let config = PipelineConfig { rotation, crop, shrink: shrink.max(1), ..self.config.clone() };
        self.set_config(config);
    }

    /// Install or remove the output colour transform.
    pub fn set_color_transform(&mut self, transform: Option<Arc<dyn ColorTransform>>) {
        self.developer.set_transform(transform);
        self.invalidate_from(Phase::Developed);
    }

    fn has_buffer(&self, phase: Phase) -> bool {
        match phase {
            Phase::Raw => self.raw.is_some(),
            Phase::PreProcessed => self.pre.is_some(),
            Phase::Transformed => self.transformed.is_some(),
            Phase::Developed => self.developed.is_some(),
            Phase::Display => self.display.is_some(),
        }
    }

    fn buffer(&mut self, phase: Phase) -> PhaseBuffer<'_> {
        let empty = || Raster::new(0, 0, 3);
        match phase {
            Phase::Raw => PhaseBuffer::Raster(self.raw.get_or_insert_with(|| Arc::new(empty()))),
            Phase::PreProcessed => PhaseBuffer::Raster(self.pre.get_or_insert_with(|| Arc::new(empty()))),
            Phase::Transformed => PhaseBuffer::Raster(self.transformed.get_or_insert_with(empty)),
            Phase::Developed => PhaseBuffer::Raster(self.developed.get_or_insert_with(empty)),
            Phase::Display => PhaseBuffer::Display(self.display.get_or_insert_with(DisplayImage::default)),
        }
    }

    fn ensure_phase(&mut self, phase: Phase) {
        match phase.previous() {
            None => {
                self.ensure_raw();
            }
            Some(previous) => {
                self.ensure_phase(previous);
                for tile in self.valid[phase.index()].missing().iter() {
                    self.ensure_tile(phase, tile);
                }
            }
        }
    }

    fn ensure_tile(&mut self, phase: Phase, tile: usize) {
        match phase {
            Phase::Raw => {
                self.ensure_raw();
            }
            Phase::PreProcessed => self.ensure_pre_tile(tile),
            Phase::Transformed => self.ensure_transformed_tile(tile),
            Phase::Developed => self.ensure_developed_tile(tile),
            Phase::Display => self.ensure_display_tile(tile),
        }
    }

    /// The raw phase, computed in full when stale.
    fn ensure_raw(&mut self) -> Arc<Raster> {
        if let Some(raw) = &self.raw {
            if self.valid[Phase::Raw.index()].is_full() {
                return Arc::clone(raw);
            }
        }
        let raster = Arc::new(develop_source(&self.source, &self.config));
        let reshaped = self
            .raw
            .as_ref()
            .map_or(true, |old| old.width() != raster.width() || old.height() != raster.height());
        if reshaped {
            self.pre = None;
            self.transformed = None;
            self.developed = None;
            self.display = None;
        }
        self.raw = Some(Arc::clone(&raster));
        self.valid = [TileMask::EMPTY; 5];
        self.valid[Phase::Raw.index()] = TileMask::FULL;
        raster
    }

    fn ensure_pre_tile(&mut self, tile: usize) {
        let raw = self.ensure_raw();
        let index = Phase::PreProcessed.index();
        if self.valid[index].contains(tile) {
            return;
        }
        let threshold = self.config.despeckle;
        if threshold <= 0.0 {
            self.pre = Some(raw);
            self.valid[index] = TileMask::FULL;
            return;
        }

        let fits = self.pre.as_ref().is_some_and(|pre| {
            !Arc::ptr_eq(pre, &raw) && pre.width() == raw.width() && pre.height() == raw.height() && pre.colors() == raw.colors()
        });
        if !fits {
            self.pre = Some(Arc::new(Raster::new(raw.width(), raw.height(), raw.colors())));
        }
        let pre = self.pre.get_or_insert_with(|| Arc::new(Raster::new(raw.width(), raw.height(), raw.colors())));
        let rect = tile_rect(tile, raw.width(), raw.height());
        despeckle_region(&raw, rect, threshold, Arc::make_mut(pre));
        self.valid[index].insert(tile);
        debug!(tile, "pre-processed tile");
    }

    fn ensure_transformed_tile(&mut self, tile: usize) {
        let raw = self.ensure_raw();
        let index = Phase::Transformed.index();
        if self.valid[index].contains(tile) {
            return;
        }
        let (width, height) = (raw.width(), raw.height());
        let resample = resample_for(&self.config, width, height);
        let (out_width, out_height) = resample.output_dimensions();
        let rect = tile_rect(tile, out_width, out_height);

        if rect.width > 0 && rect.height > 0 {
            let footprint = resample.source_footprint(rect);
            for source in tiles_touching(footprint, width, height).iter() {
                self.ensure_pre_tile(source);
            }
        }
        let pre = match &self.pre {
            Some(pre) => Arc::clone(pre),
            None => raw,
        };
        let out = reuse_or_alloc(&mut self.transformed, out_width, out_height, pre.colors());
        resample.render_region(&pre, rect, out);
        self.valid[index].insert(tile);
        debug!(tile, "transformed tile");
    }

    fn ensure_developed_tile(&mut self, tile: usize) {
        self.ensure_transformed_tile(tile);
        let index = Phase::Developed.index();
        if self.valid[index].contains(tile) {
            return;
        }
        let Some(src) = &self.transformed else {
            return;
        };
        let rect = tile_rect(tile, src.width(), src.height());
        let out = reuse_or_alloc(&mut self.developed, src.width(), src.height(), 3);
        self.developer.develop_region(src, rect, out);
        self.valid[index].insert(tile);
        debug!(tile, "developed tile");
    }

    fn ensure_display_tile(&mut self, tile: usize) {
        self.ensure_developed_tile(tile);
        let index = Phase::Display.index();
        if self.valid[index].contains(tile) {
            return;
        }
        let Some(src) = &self.developed else {
            return;
        };
        let (width, height) = (src.width(), src.height());
        let fits = self.display.as_ref().is_some_and(|d| d.width == width && d.height == height);
        if !fits {
            self.display = Some(DisplayImage { width, height, pixels: vec![[0; 3]; width * height] });
        }
        let out = self.display.get_or_insert_with(DisplayImage::default);
        display_region(src, tile_rect(tile, width, height), out);
        self.valid[index].insert(tile);
        debug!(tile, "display tile");
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("width", &self.source.width())
            .field("height", &self.source.height())
            .field("config", &self.config)
            .field("valid", &self.valid.map(|m| m.to_string()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfa::FilterPattern;
    use crate::develop::Highlights;

    fn gradient_mosaic(w: usize, h: usize) -> MosaicImage {
        MosaicImage::from_fn(w, h, FilterPattern::rggb(), |row, col, c| (row * 400 + col * 250 + c * 3000) as u16).unwrap()
    }

    fn assert_matches_uncached(pipeline: &mut Pipeline) {
        for phase in Phase::ALL {
            let expected = pipeline.render_uncached(phase);
            assert_eq!(pipeline.get_phase(phase, true).to_image(), expected, "{phase}");
            assert!(pipeline.valid_tiles(phase).is_full());
        }
    }

    #[test]
    fn phases_are_ordered() {
        assert!(Phase::Raw < Phase::Display);
        assert_eq!(Phase::Developed.previous(), Some(Phase::Transformed));
        assert_eq!(Phase::ALL.map(Phase::index), [0, 1, 2, 3, 4]);
    }

    #[test]
    fn tile_requests_mark_only_what_they_need() {
        let mut pipeline = Pipeline::new(gradient_mosaic(64, 32), PipelineConfig::default());
        pipeline.get_tile(Phase::Developed, 9);
        assert!(pipeline.valid_tiles(Phase::Raw).is_full());
        assert!(pipeline.valid_tiles(Phase::Developed).contains(9));
        assert_eq!(pipeline.valid_tiles(Phase::Developed).count(), 1);
        assert!(pipeline.valid_tiles(Phase::Display).is_empty());
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn tile_index_is_checked() {
        let mut pipeline = Pipeline::new(gradient_mosaic(16, 16), PipelineConfig::default());
        pipeline.get_tile(Phase::Raw, 32);
    }

    #[test]
    fn tiled_render_matches_uncached() {
        let config = PipelineConfig::builder().despeckle(300.0).rotation(7.5).shrink(2).build();
        let mut pipeline = Pipeline::new(gradient_mosaic(80, 48), config);
        // Compute a few tiles out of order before asking for everything.
        pipeline.get_tile(Phase::Display, 31);
        pipeline.get_tile(Phase::Transformed, 4);
        assert_matches_uncached(&mut pipeline);
    }

    #[test]
    fn develop_changes_keep_earlier_phases() {
        let mut pipeline = Pipeline::new(gradient_mosaic(48, 32), PipelineConfig::default());
        pipeline.get_phase(Phase::Display, true);
        pipeline.set_develop_params(DevelopParams { exposure: 0.5, ..DevelopParams::default() });
        assert!(pipeline.valid_tiles(Phase::Transformed).is_full());
        assert!(pipeline.valid_tiles(Phase::Developed).is_empty());
        assert_matches_uncached(&mut pipeline);

        pipeline.set_white_balance([1.5, 1.0, 1.2, 1.0]);
        assert!(pipeline.valid_tiles(Phase::Transformed).is_full());
        assert!(pipeline.valid_tiles(Phase::Developed).is_empty());
        assert_matches_uncached(&mut pipeline);
    }

    #[test]
    fn transform_changes_resize_buffers() {
        let mut pipeline = Pipeline::new(gradient_mosaic(40, 24), PipelineConfig::default());
        pipeline.get_phase(Phase::Display, true);
        pipeline.set_transform(0.0, Some(Rect { top: 2, left: 4, height: 10, width: 20 }), 1);
        assert!(pipeline.valid_tiles(Phase::PreProcessed).is_full());
        let buffer = pipeline.get_phase(Phase::Developed, true);
        assert_eq!((buffer.width(), buffer.height()), (20, 10));
        assert_matches_uncached(&mut pipeline);

        pipeline.set_geometry(1.0, 0, Flip::ROTATE_90);
        let buffer = pipeline.get_phase(Phase::Raw, true);
        assert_eq!((buffer.width(), buffer.height()), (24, 40));
        assert_matches_uncached(&mut pipeline);
    }

    #[test]
    fn non_full_request_returns_stale_buffer() {
        let mut pipeline = Pipeline::new(gradient_mosaic(32, 32), PipelineConfig::default());
        let first = pipeline.get_phase(Phase::Developed, false).to_image();
        pipeline.set_develop_params(DevelopParams { highlights: Highlights::Recover(Default::default()), exposure: 1.0, ..DevelopParams::default() });
        let stale = pipeline.get_phase(Phase::Developed, false).to_image();
        assert_eq!(stale, first);
        assert!(pipeline.valid_tiles(Phase::Developed).is_empty());
        let fresh = pipeline.get_phase(Phase::Developed, true).to_image();
        assert_ne!(fresh, first);
    }

    #[test]
    fn wavelet_runs_before_demosaic_only_off_bayer() {
        let noise = |row: usize, col: usize| ((row * 131 + col * 7919) % 89) as u16 * 30;
        let config = PipelineConfig::builder().algorithm(Algorithm::SixColor { passes: 1 }).denoise(1500.0).build();

        let six = MosaicImage::from_fn(36, 30, FilterPattern::xtrans_default(), |row, col, c| [9000, 14000, 5000, 0][c] + noise(row, col)).unwrap();
        let mut early = six.clone();
        wavelet_denoise_mosaic(&mut early, 1500.0);
        let early = demosaic(&early, config.algorithm, &config.camera);
        let mut late = demosaic(&six, config.algorithm, &config.camera);
        wavelet_denoise(&mut late, 1500.0);
        let raw = develop_raw(&six, &config);
        assert_eq!(raw, early);
        assert_ne!(raw, late);

        let bayer = MosaicImage::from_fn(36, 30, FilterPattern::rggb(), |row, col, c| [9000, 14000, 5000, 0][c] + noise(row, col)).unwrap();
        let mut late = demosaic(&bayer, config.algorithm, &config.camera);
        wavelet_denoise(&mut late, 1500.0);
        assert_eq!(develop_raw(&bayer, &config), late);
    }

    #[test]
    fn white_balance_stays_out_of_the_raw_phase() {
        let flat = MosaicImage::from_fn(16, 16, FilterPattern::rggb(), |_, _, c| [6000, 10000, 4000, 0][c]).unwrap();
        let config = PipelineConfig::builder()
            .algorithm(Algorithm::Bilinear)
            .green_equilibration(1000.0)
            .develop(DevelopParams { white_balance: [1.0, 2.0, 1.0, 1.0], ..DevelopParams::default() })
            .build();
        let raw = develop_raw(&flat, &config);
        assert!(raw.pixels().iter().all(|p| p[..3] == [6000, 10000, 4000]));
    }

    #[test]
    fn full_color_source_skips_demosaic() {
        let pixels = (0..12 * 8).map(|i| [1000 + i as u16 * 10, 2000, 3000, 0]).collect();
        let raster = Raster::from_pixels(12, 8, 3, pixels).unwrap();
        let mut pipeline = Pipeline::new(raster.clone(), PipelineConfig::default());
        assert!(matches!(pipeline.source(), Source::Full(_)));
        assert_eq!(pipeline.get_phase(Phase::Raw, true).as_raster(), Some(&raster));

        pipeline.set_geometry(1.0, 0, Flip::ROTATE_90);
        let turned = pipeline.get_phase(Phase::Raw, true);
        assert_eq!((turned.width(), turned.height()), (8, 12));
        assert_matches_uncached(&mut pipeline);
    }

    #[test]
    fn despeckle_off_shares_the_raw_buffer() {
        let mut pipeline = Pipeline::new(gradient_mosaic(24, 24), PipelineConfig::default());
        pipeline.get_tile(Phase::PreProcessed, 0);
        assert!(pipeline.valid_tiles(Phase::PreProcessed).is_full());
        let (Some(raw), Some(pre)) = (&pipeline.raw, &pipeline.pre) else {
            panic!("buffers missing");
        };
        assert!(Arc::ptr_eq(raw, pre));
    }
}
