//! Single-process compositing
//!
//! No communication: every submitted tile is blended locally and the calling
//! rank always holds the result. Also the degenerate path for groups of
//! size 1.

use crate::blend::Blender;
use crate::error::CompositeResult;
use crate::stats::PassReport;
use crate::types::{CompositeContext, Tile};

use super::{composite_tiles, CompositeStrategy};

pub(crate) struct SingleProcess {
    context: CompositeContext,
    blender: Blender,
    tiles: Vec<Tile>,
    report: PassReport,
}

impl SingleProcess {
    pub fn new(context: CompositeContext, blender: Blender) -> Self {
        Self {
            context,
            blender,
            tiles: Vec::new(),
            report: PassReport::default(),
        }
    }
}

impl CompositeStrategy for SingleProcess {
    fn init(&mut self, width: u32, height: u32) -> CompositeResult<()> {
        self.context.width = width;
        self.context.height = height;
        Ok(())
    }

    fn submit_tile(&mut self, mut tile: Tile) -> CompositeResult<()> {
        // Stamp the origin identity so duplicate depths stay totally ordered.
        tile.owner_rank = 0;
        tile.patch_id = self.tiles.len() as u32;
        self.tiles.push(tile);
        Ok(())
    }

    fn composite(&mut self, output: &mut Vec<f32>) -> CompositeResult<bool> {
        let mut tiles = std::mem::take(&mut self.tiles);
        *output = composite_tiles(&mut tiles, &self.context, &self.blender);
        self.report = PassReport {
            fragments_blended: tiles.len() as u64,
            pixels_sent: 0,
        };
        Ok(true)
    }

    fn report(&self) -> PassReport {
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepthOrder, Extents, OPAQUE_BLACK};

    fn engine(order: DepthOrder) -> SingleProcess {
        let mut s = SingleProcess::new(
            CompositeContext::new(OPAQUE_BLACK, order),
            Blender::single_thread(),
        );
        s.init(4, 4).unwrap();
        s
    }

    fn solid_tile(extents: Extents, color: [f32; 4], depth: f32) -> Tile {
        let mut pixels = vec![0.0; extents.area() * 4];
        for px in pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
        Tile::new(pixels, extents, depth)
    }

    #[test]
    fn test_nearest_opaque_tile_wins() {
        for order in [DepthOrder::FrontToBack, DepthOrder::BackToFront] {
            let mut s = engine(order);
            s.submit_tile(solid_tile(Extents::full(4, 4), [0.0, 1.0, 0.0, 1.0], 2.0))
                .unwrap();
            s.submit_tile(solid_tile(Extents::full(4, 4), [1.0, 0.0, 0.0, 1.0], 1.0))
                .unwrap();

            let mut image = Vec::new();
            assert!(s.composite(&mut image).unwrap());
            assert_eq!(&image[..4], &[1.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_uncovered_pixels_show_background() {
        let mut s = engine(DepthOrder::FrontToBack);
        s.submit_tile(solid_tile(Extents::new(0, 1, 0, 1), [1.0, 1.0, 1.0, 1.0], 1.0))
            .unwrap();
        let mut image = Vec::new();
        s.composite(&mut image).unwrap();
        assert_eq!(&image[..4], &[1.0, 1.0, 1.0, 1.0]);
        assert_eq!(&image[4..8], &[0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_tiles_drain_between_passes() {
        let mut s = engine(DepthOrder::BackToFront);
        s.submit_tile(solid_tile(Extents::full(4, 4), [1.0, 0.0, 0.0, 1.0], 1.0))
            .unwrap();
        let mut image = Vec::new();
        s.composite(&mut image).unwrap();
        s.composite(&mut image).unwrap();
        // second pass had no tiles, so the canvas is pure background
        assert_eq!(&image[..4], &[0.0, 0.0, 0.0, 1.0]);
    }
}
