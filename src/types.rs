//! Core types for the compositing engine
//!
//! This module defines the fundamental data structures shared by the blend
//! kernels, the region partitioner and the compositor strategies.

// =============================================================================
// Color
// =============================================================================

/// An RGBA color, 4 floats, channels conceptually in `[0, 1]`.
pub type Rgba = [f32; 4];

/// Fully transparent black, the initial state of every accumulator.
pub const TRANSPARENT: Rgba = [0.0, 0.0, 0.0, 0.0];

/// Opaque black, the conventional background.
pub const OPAQUE_BLACK: Rgba = [0.0, 0.0, 0.0, 1.0];

// =============================================================================
// Extents
// =============================================================================

/// Half-open pixel-space extents `[xmin, xmax) x [ymin, ymax)` in full-image
/// coordinates. Extents may lie partially or entirely outside the image;
/// kernels clamp via intersection and treat zero-area results as no-ops.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extents {
    pub xmin: i32,
    pub xmax: i32,
    pub ymin: i32,
    pub ymax: i32,
}

impl Extents {
    /// Create new extents.
    pub const fn new(xmin: i32, xmax: i32, ymin: i32, ymax: i32) -> Self {
        Self { xmin, xmax, ymin, ymax }
    }

    /// Extents covering a full `width x height` image anchored at the origin.
    pub const fn full(width: u32, height: u32) -> Self {
        Self {
            xmin: 0,
            xmax: width as i32,
            ymin: 0,
            ymax: height as i32,
        }
    }

    /// Width in pixels; non-positive for degenerate extents.
    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    /// Height in pixels; non-positive for degenerate extents.
    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }

    /// Check whether the extents enclose no pixels.
    pub fn is_empty(&self) -> bool {
        self.xmax <= self.xmin || self.ymax <= self.ymin
    }

    /// Area in pixels; zero for degenerate extents.
    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width() as usize * self.height() as usize
        }
    }

    /// Smallest extents enclosing both. Empty inputs contribute nothing.
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            xmin: self.xmin.min(other.xmin),
            xmax: self.xmax.max(other.xmax),
            ymin: self.ymin.min(other.ymin),
            ymax: self.ymax.max(other.ymax),
        }
    }

    /// Intersection with another extents. The result may be empty.
    pub fn intersection(&self, other: &Self) -> Self {
        Self {
            xmin: self.xmin.max(other.xmin),
            xmax: self.xmax.min(other.xmax),
            ymin: self.ymin.max(other.ymin),
            ymax: self.ymax.min(other.ymax),
        }
    }
}

// =============================================================================
// Depth ordering
// =============================================================================

/// Traversal direction for alpha compositing.
///
/// Front-to-back stops accumulating once a pixel is fully opaque;
/// back-to-front always accumulates. Both require the caller to feed patches
/// in strict depth order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthOrder {
    FrontToBack,
    BackToFront,
}

// =============================================================================
// Tile
// =============================================================================

/// A locally rendered fragment: row-major RGBA pixel data plus its placement
/// and depth key. Submitted to a compositor strategy once per pass; the
/// strategy takes ownership and drains all tiles when `composite` runs.
#[derive(Clone, Debug)]
pub struct Tile {
    /// Row-major RGBA buffer, 4 floats per pixel, `extents.area() * 4` long.
    pub pixels: Vec<f32>,
    /// Placement in full-image coordinates.
    pub extents: Extents,
    /// Depth key (eye-space distance or any consistent ordering scalar).
    pub depth: f32,
    /// Rank that produced the tile, first tie-break key.
    pub owner_rank: u32,
    /// Per-owner patch identifier, second tie-break key.
    pub patch_id: u32,
}

impl Tile {
    /// Create a tile with default origin identity (owner 0, patch 0).
    pub fn new(pixels: Vec<f32>, extents: Extents, depth: f32) -> Self {
        Self {
            pixels,
            extents,
            depth,
            owner_rank: 0,
            patch_id: 0,
        }
    }

    /// Strict total order over `(depth, owner_rank, patch_id)`, ascending.
    /// Front-to-back traversal iterates this order directly; back-to-front
    /// iterates it reversed. Using a total order keeps repeated runs
    /// bitwise-reproducible even with duplicate depths.
    pub fn depth_cmp(a: &Tile, b: &Tile) -> std::cmp::Ordering {
        a.depth
            .total_cmp(&b.depth)
            .then(a.owner_rank.cmp(&b.owner_rank))
            .then(a.patch_id.cmp(&b.patch_id))
    }
}

// =============================================================================
// Composite context
// =============================================================================

/// Per-pass configuration: image dimensions, background fill and the
/// compositing traversal direction.
#[derive(Clone, Copy, Debug)]
pub struct CompositeContext {
    pub width: u32,
    pub height: u32,
    pub background: Rgba,
    pub order: DepthOrder,
}

impl CompositeContext {
    /// Context with dimensions not yet known (filled in by `init`).
    pub fn new(background: Rgba, order: DepthOrder) -> Self {
        Self {
            width: 0,
            height: 0,
            background,
            order,
        }
    }

    /// Full-image extents for the current dimensions.
    pub fn full_extents(&self) -> Extents {
        Extents::full(self.width, self.height)
    }

    /// Pixel count of the full image.
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extents_intersection() {
        let a = Extents::new(0, 10, 0, 10);
        let b = Extents::new(5, 15, -3, 7);
        let i = a.intersection(&b);
        assert_eq!(i, Extents::new(5, 10, 0, 7));
        assert_eq!(i.area(), 35);
    }

    #[test]
    fn test_extents_disjoint_is_empty() {
        let a = Extents::new(0, 10, 0, 10);
        let b = Extents::new(10, 20, 0, 10);
        assert!(a.intersection(&b).is_empty());
        assert_eq!(a.intersection(&b).area(), 0);
    }

    #[test]
    fn test_extents_union_ignores_empty() {
        let a = Extents::new(2, 5, 1, 4);
        let empty = Extents::new(0, 0, 0, 0);
        assert_eq!(a.union(&empty), a);
        assert_eq!(empty.union(&a), a);
        assert_eq!(a.union(&Extents::new(4, 9, -1, 2)), Extents::new(2, 9, -1, 4));
    }

    #[test]
    fn test_depth_cmp_tie_break() {
        let mk = |depth, owner, patch| Tile {
            pixels: Vec::new(),
            extents: Extents::new(0, 1, 0, 1),
            depth,
            owner_rank: owner,
            patch_id: patch,
        };
        let mut tiles = vec![mk(1.0, 2, 0), mk(1.0, 1, 5), mk(0.5, 3, 0), mk(1.0, 1, 2)];
        tiles.sort_by(Tile::depth_cmp);
        let keys: Vec<_> = tiles.iter().map(|t| (t.owner_rank, t.patch_id)).collect();
        assert_eq!(keys, vec![(3, 0), (1, 2), (1, 5), (2, 0)]);
    }
}
