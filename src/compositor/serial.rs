//! Serial compositing
//!
//! The centralized baseline: every rank ships its tiles whole to group
//! rank 0, which sorts the union by depth and blends it alone. No region
//! parallelism, no pixel traffic bound, but trivially correct against the
//! distributed strategies.

use crate::blend::Blender;
use crate::comm::{ParallelContext, Payload};
use crate::error::CompositeResult;
use crate::stats::PassReport;
use crate::types::{CompositeContext, Tile};

use super::{composite_tiles, pack_tile_meta, unpack_tile_meta, CompositeStrategy};

pub(crate) struct SerialDirectSend {
    ctx: ParallelContext,
    context: CompositeContext,
    blender: Blender,
    /// `[meta, pixels]` tag pair, allocated collectively at init.
    tags: Vec<u32>,
    tiles: Vec<Tile>,
    report: PassReport,
}

impl SerialDirectSend {
    pub fn new(ctx: ParallelContext, context: CompositeContext, blender: Blender) -> Self {
        Self {
            ctx,
            context,
            blender,
            tags: Vec::new(),
            tiles: Vec::new(),
            report: PassReport::default(),
        }
    }
}

impl CompositeStrategy for SerialDirectSend {
    fn init(&mut self, width: u32, height: u32) -> CompositeResult<()> {
        self.context.width = width;
        self.context.height = height;
        self.tags = self.ctx.unique_tags(2)?;
        Ok(())
    }

    fn submit_tile(&mut self, mut tile: Tile) -> CompositeResult<()> {
        tile.owner_rank = self.ctx.rank().unwrap_or(0) as u32;
        tile.patch_id = self.tiles.len() as u32;
        self.tiles.push(tile);
        Ok(())
    }

    fn composite(&mut self, output: &mut Vec<f32>) -> CompositeResult<bool> {
        let mut tiles = std::mem::take(&mut self.tiles);
        let Some(my) = self.ctx.rank() else {
            return Ok(false);
        };
        let (meta_tag, pix_tag) = (self.tags[0], self.tags[1]);

        if my != 0 {
            let mut pixels_sent = 0u64;
            self.ctx
                .send(0, meta_tag, Payload::U32(vec![tiles.len() as u32]))?;
            let mut pending = Vec::with_capacity(tiles.len());
            for tile in tiles.drain(..) {
                let meta =
                    pack_tile_meta(&tile.extents, tile.depth, tile.owner_rank, tile.patch_id);
                self.ctx.send(0, meta_tag, Payload::U32(meta.to_vec()))?;
                pixels_sent += tile.pixels.len() as u64;
                pending.push(self.ctx.isend(0, pix_tag, Payload::F32(tile.pixels))?);
            }
            self.ctx.wait_all_sends(pending)?;
            self.report = PassReport {
                fragments_blended: 0,
                pixels_sent,
            };
            return Ok(false);
        }

        for r in 1..self.ctx.size() {
            let count = self.ctx.recv(r, meta_tag)?.into_u32()?[0];
            for _ in 0..count {
                let words = self.ctx.recv(r, meta_tag)?.into_u32()?;
                let (extents, depth, owner, patch) = unpack_tile_meta(&words);
                let pixels = self.ctx.recv(r, pix_tag)?.into_f32()?;
                tiles.push(Tile {
                    pixels,
                    extents,
                    depth,
                    owner_rank: owner,
                    patch_id: patch,
                });
            }
        }

        log::trace!("serial pass: blending {} tiles at root", tiles.len());
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
