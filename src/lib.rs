//! Sort-last parallel image compositing
//!
//! Each rank of a process group renders some patches of a scene, then the
//! group reduces the patch images into one final picture ordered by depth.
//! The engine provides the pixel blend kernels, a row-strip partition of the
//! screen, an MPI-flavored process-group layer over an in-process message
//! fabric, and a closed set of compositing strategies from a serial baseline
//! up to multi-patch direct-send.
//!
//! Module structure:
//!
//! - [`types`]: colors, extents, tiles, depth ordering
//! - [`blend`]: pure blend kernels and the row-band worker pool
//! - [`region`]: row-strip screen partition
//! - [`comm`]: process groups, point-to-point, collectives
//! - [`compositor`]: the strategies and the [`Compositor`] facade
//! - [`gather`]: final-image assembly at rank 0
//! - [`config`]: engine configuration, optionally from the environment
//! - [`stats`]: per-engine counters
//!
//! ```
//! use sortlast::{
//!     Compositor, CompositorConfig, DepthOrder, Extents, StrategyKind, Tile, OPAQUE_BLACK,
//! };
//! use sortlast::comm::ParallelContext;
//!
//! let world = ParallelContext::local_world(1).pop().unwrap();
//! let mut engine = Compositor::new(
//!     StrategyKind::SingleProcess,
//!     world,
//!     OPAQUE_BLACK,
//!     DepthOrder::BackToFront,
//!     &CompositorConfig::default(),
//! )
//! .unwrap();
//! engine.init(2, 2).unwrap();
//! engine
//!     .submit_tile(Tile::new(vec![1.0; 16], Extents::new(0, 2, 0, 2), 1.0))
//!     .unwrap();
//! let mut image = Vec::new();
//! assert!(engine.composite(&mut image).unwrap());
//! ```

pub mod blend;
pub mod comm;
pub mod compositor;
pub mod config;
pub mod error;
pub mod gather;
pub mod region;
pub mod stats;
pub mod types;

pub use compositor::{Compositor, StrategyKind};
pub use config::{CompositorConfig, ExternalStrategy};
pub use error::{CommError, CompositeError, CompositeResult};
pub use gather::image_to_rgb8;
pub use region::{find_regions_for_patch, RegionPartition};
pub use stats::{CompositorStats, PassReport};
pub use types::{
    CompositeContext, DepthOrder, Extents, Rgba, Tile, OPAQUE_BLACK, TRANSPARENT,
};
