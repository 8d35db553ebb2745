//! Compositor strategies
//!
//! One [`Compositor`] per process group wraps a closed set of strategies
//! behind a small lifecycle: `init` once per image size (collective),
//! `submit_tile` for every locally rendered patch, `composite` once per pass
//! on every member. `composite` returns whether this rank holds the finished
//! image.
//!
//! Module structure:
//!
//! - [`single`]: no communication, everything blended locally
//! - [`serial`]: every tile shipped whole to rank 0
//! - [`direct_send`]: one patch per rank, region fan-out
//! - [`multi_patch`]: many patches per rank, region fan-out
//! - [`external`]: hook for an external reduction backend

pub mod direct_send;
pub mod external;
pub mod multi_patch;
pub mod serial;
pub mod single;

use crate::blend::{self, Blender};
use crate::comm::ParallelContext;
use crate::config::CompositorConfig;
use crate::error::{CompositeError, CompositeResult};
use crate::stats::{CompositorStats, PassReport};
use crate::types::{CompositeContext, DepthOrder, Extents, Rgba, Tile, TRANSPARENT};

use direct_send::DirectSend;
use multi_patch::MultiPatch;
use serial::SerialDirectSend;
use single::SingleProcess;

// =============================================================================
// Strategy selection
// =============================================================================

/// The closed set of compositing strategies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyKind {
    /// Blend every submitted tile locally, no communication.
    SingleProcess,
    /// Ship whole tiles to rank 0 and blend there. The simple baseline.
    SerialDirectSend,
    /// Classic direct-send over row regions, one patch per rank per pass.
    DirectSend,
    /// Direct-send generalized to many patches per rank per pass.
    MultiPatch,
    /// Delegate the reduction to an external backend.
    External,
}

// =============================================================================
// Strategy interface
// =============================================================================

pub(crate) trait CompositeStrategy {
    /// Collective: set the image dimensions for subsequent passes.
    fn init(&mut self, width: u32, height: u32) -> CompositeResult<()>;

    /// Hand one locally rendered tile to the pass being assembled.
    fn submit_tile(&mut self, tile: Tile) -> CompositeResult<()>;

    /// Collective: run the pass, draining all submitted tiles. Fills
    /// `output` with the finished image and returns `true` on exactly one
    /// rank; other ranks leave `output` untouched and return `false`.
    fn composite(&mut self, output: &mut Vec<f32>) -> CompositeResult<bool>;

    /// What the most recent pass did on this rank.
    fn report(&self) -> PassReport;
}

pub(crate) enum StrategyImpl {
    Single(SingleProcess),
    Serial(SerialDirectSend),
    Direct(DirectSend),
    Multi(MultiPatch),
}

impl StrategyImpl {
    fn as_dyn(&mut self) -> &mut dyn CompositeStrategy {
        match self {
            StrategyImpl::Single(s) => s,
            StrategyImpl::Serial(s) => s,
            StrategyImpl::Direct(s) => s,
            StrategyImpl::Multi(s) => s,
        }
    }

    fn report(&self) -> PassReport {
        match self {
            StrategyImpl::Single(s) => s.report(),
            StrategyImpl::Serial(s) => s.report(),
            StrategyImpl::Direct(s) => s.report(),
            StrategyImpl::Multi(s) => s.report(),
        }
    }
}

// =============================================================================
// Compositor facade
// =============================================================================

/// A compositing engine bound to one process group.
pub struct Compositor {
    kind: StrategyKind,
    strategy: StrategyImpl,
    blender: Blender,
    initialized: bool,
    stats: CompositorStats,
}

impl Compositor {
    /// Build a compositor for `kind` over the given group.
    ///
    /// Selecting [`StrategyKind::External`] (or setting `use_external` in the
    /// configuration) fails with [`CompositeError::ExternalUnavailable`] when
    /// no backend is linked; there is no silent fallback to a built-in
    /// strategy.
    pub fn new(
        kind: StrategyKind,
        comm: ParallelContext,
        background: Rgba,
        order: DepthOrder,
        config: &CompositorConfig,
    ) -> CompositeResult<Self> {
        if kind == StrategyKind::External || config.use_external {
            return Err(external::create(config));
        }

        let context = CompositeContext::new(background, order);
        let blender = Blender::from_config(config);
        let strategy = match kind {
            StrategyKind::SingleProcess => {
                StrategyImpl::Single(SingleProcess::new(context, blender))
            }
            StrategyKind::SerialDirectSend => {
                StrategyImpl::Serial(SerialDirectSend::new(comm, context, blender))
            }
            StrategyKind::DirectSend => {
                StrategyImpl::Direct(DirectSend::new(comm, context, blender))
            }
            StrategyKind::MultiPatch => {
                StrategyImpl::Multi(MultiPatch::new(comm, context, blender))
            }
            StrategyKind::External => unreachable!("handled above"),
        };

        Ok(Self {
            kind,
            strategy,
            blender,
            initialized: false,
            stats: CompositorStats::default(),
        })
    }

    /// The strategy this compositor was built with.
    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Collective: set the image dimensions. Must run on every group member
    /// before the first pass and again whenever the size changes.
    pub fn init(&mut self, width: u32, height: u32) -> CompositeResult<()> {
        log::debug!("compositor init {width}x{height} ({:?})", self.kind);
        self.strategy.as_dyn().init(width, height)?;
        self.initialized = true;
        Ok(())
    }

    /// Submit one locally rendered tile to the pass being assembled.
    pub fn submit_tile(&mut self, tile: Tile) -> CompositeResult<()> {
        if !self.initialized {
            return Err(CompositeError::NotInitialized);
        }
        check_tile_shape(&tile)?;
        self.strategy.as_dyn().submit_tile(tile)?;
        self.stats.tiles_submitted += 1;
        Ok(())
    }

    /// Collective: run the pass. Returns `true` on the rank holding the
    /// finished image in `output`.
    pub fn composite(&mut self, output: &mut Vec<f32>) -> CompositeResult<bool> {
        if !self.initialized {
            return Err(CompositeError::NotInitialized);
        }
        let is_root = self.strategy.as_dyn().composite(output)?;
        let report = self.strategy.report();
        self.stats.passes += 1;
        self.stats.fragments_blended += report.fragments_blended;
        self.stats.last_worker_count = self.blender.workers();
        Ok(is_root)
    }

    /// What the most recent pass did on this rank.
    pub fn last_report(&self) -> PassReport {
        self.strategy.report()
    }

    /// Cumulative counters since construction.
    pub fn stats(&self) -> &CompositorStats {
        &self.stats
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

pub(crate) fn check_tile_shape(tile: &Tile) -> CompositeResult<()> {
    let expected = tile.extents.area() * 4;
    if tile.pixels.len() != expected {
        return Err(CompositeError::TileShape {
            len: tile.pixels.len(),
            expected,
            extents: tile.extents,
        });
    }
    Ok(())
}

/// Fixed wire size of one tile descriptor.
pub(crate) const TILE_META_WORDS: usize = 7;

/// Pack a tile descriptor as `u32` words. Signed coordinates and the depth
/// travel bit-cast; the unpack side reverses the casts exactly.
pub(crate) fn pack_tile_meta(
    extents: &Extents,
    depth: f32,
    owner: u32,
    patch: u32,
) -> [u32; TILE_META_WORDS] {
    [
        extents.xmin as u32,
        extents.xmax as u32,
        extents.ymin as u32,
        extents.ymax as u32,
        depth.to_bits(),
        owner,
        patch,
    ]
}

/// Copy the `out_ext` sub-rectangle of a buffer laid out per `src_ext` into
/// a tight new buffer. `out_ext` must lie inside `src_ext`.
pub(crate) fn extract_region(src: &[f32], src_ext: &Extents, out_ext: &Extents) -> Vec<f32> {
    let mut out = vec![0.0f32; out_ext.area() * 4];
    blend::place_image(src, src_ext, &mut out, out_ext);
    out
}

pub(crate) fn unpack_tile_meta(words: &[u32]) -> (Extents, f32, u32, u32) {
    let extents = Extents::new(
        words[0] as i32,
        words[1] as i32,
        words[2] as i32,
        words[3] as i32,
    );
    (extents, f32::from_bits(words[4]), words[5], words[6])
}

/// Blend a rank-local tile set into a full canvas, honoring the configured
/// traversal direction. Both directions produce the same image; traversal
/// only changes which end of the depth order is visited first.
pub(crate) fn composite_tiles(
    tiles: &mut [Tile],
    context: &CompositeContext,
    blender: &Blender,
) -> Vec<f32> {
    let full = context.full_extents();
    let mut canvas = vec![0.0f32; context.pixel_count() * 4];
    tiles.sort_by(Tile::depth_cmp);

    match context.order {
        DepthOrder::BackToFront => {
            blend::color_image(&mut canvas, context.width, context.height, context.background);
            for tile in tiles.iter().rev() {
                blender.back_to_front(&tile.pixels, &tile.extents, &full, &mut canvas, &full);
            }
        }
        DepthOrder::FrontToBack => {
            blend::color_image(&mut canvas, context.width, context.height, TRANSPARENT);
            for tile in tiles.iter() {
                blender.front_to_back(&tile.pixels, &tile.extents, &full, &mut canvas, &full);
            }
            blend::blend_with_background(&mut canvas, &full, context.background);
        }
    }
    canvas
}
