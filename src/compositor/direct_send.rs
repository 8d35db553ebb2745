//! Direct-send compositing
//!
//! One patch per rank per pass. Every rank owns one row strip of the screen;
//! patches are cropped against the strips they overlap and sent straight to
//! the owning ranks, which blend their incoming fragments front-to-back and
//! hand the finished strips to the gather stage. Fan-out per patch is
//! bounded by the strips the patch actually touches.

use crate::blend::{blend_with_background, Blender};
use crate::comm::{ParallelContext, Payload};
use crate::error::{CompositeError, CompositeResult};
use crate::gather::gather_image;
use crate::region::RegionPartition;
use crate::stats::PassReport;
use crate::types::{CompositeContext, Extents, Tile};

use super::{
    extract_region, pack_tile_meta, unpack_tile_meta, CompositeStrategy, TILE_META_WORDS,
};

pub(crate) struct DirectSend {
    ctx: ParallelContext,
    context: CompositeContext,
    blender: Blender,
    partition: RegionPartition,
    /// `[piece, gather]` tag pair, allocated collectively at init.
    tags: Vec<u32>,
    tile: Option<Tile>,
    report: PassReport,
}

impl DirectSend {
    pub fn new(ctx: ParallelContext, context: CompositeContext, blender: Blender) -> Self {
        Self {
            ctx,
            context,
            blender,
            partition: RegionPartition::new(0, 1),
            tags: Vec::new(),
            tile: None,
            report: PassReport::default(),
        }
    }

    fn strip_extents(&self, rank: u32) -> Extents {
        Extents::new(
            0,
            self.context.width as i32,
            self.partition.region_start(rank) as i32,
            self.partition.region_end(rank) as i32,
        )
    }
}

impl CompositeStrategy for DirectSend {
    fn init(&mut self, width: u32, height: u32) -> CompositeResult<()> {
        self.context.width = width;
        self.context.height = height;
        self.partition = RegionPartition::new(height, self.ctx.size() as u32);
        self.tags = self.ctx.unique_tags(2)?;
        Ok(())
    }

    fn submit_tile(&mut self, mut tile: Tile) -> CompositeResult<()> {
        if self.tile.is_some() {
            return Err(CompositeError::TooManyTiles {
                strategy: "direct-send",
            });
        }
        tile.owner_rank = self.ctx.rank().unwrap_or(0) as u32;
        tile.patch_id = 0;
        self.tile = Some(tile);
        Ok(())
    }

    fn composite(&mut self, output: &mut Vec<f32>) -> CompositeResult<bool> {
        let tile = self.tile.take();
        let Some(my) = self.ctx.rank() else {
            return Ok(false);
        };
        let size = self.ctx.size();
        let full = self.context.full_extents();
        let (piece_tag, gather_tag) = (self.tags[0], self.tags[1]);

        // Every rank learns every patch's placement and depth key. An empty
        // extents descriptor stands in for "no tile this pass".
        let mut metas = vec![0u32; TILE_META_WORDS * size];
        let mine = match &tile {
            Some(t) => pack_tile_meta(&t.extents, t.depth, t.owner_rank, t.patch_id),
            None => pack_tile_meta(&Extents::new(0, 0, 0, 0), 0.0, my as u32, 0),
        };
        metas[my * TILE_META_WORDS..(my + 1) * TILE_META_WORDS].copy_from_slice(&mine);
        for r in 0..size {
            let slice = &mut metas[r * TILE_META_WORDS..(r + 1) * TILE_META_WORDS];
            self.ctx.broadcast_u32_array(r, slice)?;
        }
        let descs: Vec<(Extents, f32, u32, u32)> = metas
            .chunks_exact(TILE_META_WORDS)
            .map(unpack_tile_meta)
            .collect();

        // Fan my patch out to the strips it overlaps. Receivers recompute
        // the identical crop from the descriptor, so pieces carry no header.
        let mut pending = Vec::new();
        let mut pixels_sent = 0u64;
        if let Some(t) = &tile {
            if let Some((first, last)) = self.partition.regions_for_patch(&t.extents, &full) {
                for r in first..=last {
                    if r as usize == my {
                        continue;
                    }
                    let crop = t.extents.intersection(&self.strip_extents(r)).intersection(&full);
                    if crop.is_empty() {
                        continue;
                    }
                    let piece = extract_region(&t.pixels, &t.extents, &crop);
                    pixels_sent += piece.len() as u64;
                    pending.push(self.ctx.isend(r as usize, piece_tag, Payload::F32(piece))?);
                }
            }
        }

        // Blend my strip front-to-back over the incoming fragments.
        let strip = self.strip_extents(my as u32);
        let mut fragments_blended = 0u64;
        let mut local_region: Option<Vec<f32>> = None;
        if !strip.is_empty() {
            let mut incoming: Vec<(usize, Extents, f32, u32, u32)> = descs
                .iter()
                .enumerate()
                .filter_map(|(s, (ext, depth, owner, patch))| {
                    let crop = ext.intersection(&strip).intersection(&full);
                    (!crop.is_empty()).then_some((s, crop, *depth, *owner, *patch))
                })
                .collect();
            log::trace!(
                "direct-send pass: rank {my} blends {} fragments into rows {}..{}",
                incoming.len(),
                strip.ymin,
                strip.ymax
            );
            if !incoming.is_empty() {
                incoming.sort_by(|a, b| {
                    a.2.total_cmp(&b.2).then(a.3.cmp(&b.3)).then(a.4.cmp(&b.4))
                });
                let mut acc = vec![0.0f32; strip.area() * 4];
                for (s, crop, ..) in &incoming {
                    let piece = if *s == my {
                        match &tile {
                            Some(t) => extract_region(&t.pixels, &t.extents, crop),
                            None => continue,
                        }
                    } else {
                        self.ctx.recv(*s, piece_tag)?.into_f32()?
                    };
                    self.blender.front_to_back(&piece, crop, &strip, &mut acc, &strip);
                    fragments_blended += 1;
                }
                blend_with_background(&mut acc, &strip, self.context.background);
                local_region = Some(acc);
            }
        }

        // Non-emptiness is derivable from the descriptors on every rank, so
        // no extra agreement round is needed before the gather.
        let nonempty: Vec<bool> = (0..size)
            .map(|r| {
                let s = self.strip_extents(r as u32);
                !s.is_empty()
                    && descs
                        .iter()
                        .any(|(ext, ..)| !ext.intersection(&s).intersection(&full).is_empty())
            })
            .collect();

        let gathered = gather_image(
            &self.ctx,
            &self.partition,
            self.context.width,
            local_region.as_deref(),
            &nonempty,
            self.context.background,
            gather_tag,
        )?;
        self.ctx.wait_all_sends(pending)?;

        self.report = PassReport {
            fragments_blended,
            pixels_sent,
        };
        if let Some(canvas) = gathered {
            *output = canvas;
            return Ok(true);
        }
        Ok(false)
    }

    fn report(&self) -> PassReport {
        self.report
    }
}
