//! Multi-patch direct-send compositing
//!
//! Direct-send generalized to any number of patches per rank per pass. Each
//! pass runs in four phases: classify every patch fragment by destination
//! strip, exchange per-destination counts all-to-all, ship fragment batches
//! to their strip owners, then blend each strip front-to-back in the strict
//! `(depth, owner, patch)` order so repeated runs are bitwise identical.

use crate::blend::{blend_with_background, Blender};
use crate::comm::{ParallelContext, Payload};
use crate::error::CompositeResult;
use crate::gather::gather_image;
use crate::region::RegionPartition;
use crate::stats::PassReport;
use crate::types::{CompositeContext, Extents, Tile};

use super::{extract_region, CompositeStrategy};

/// Wire size of one fragment record:
/// `(patch, xmin, xmax, ymin, ymax, depth_bits)`. The sender's rank is the
/// owner key and travels implicitly with the message.
const FRAG_WORDS: usize = 6;

struct Fragment {
    src: u32,
    patch: u32,
    extents: Extents,
    depth: f32,
    pixels: Vec<f32>,
}

pub(crate) struct MultiPatch {
    ctx: ParallelContext,
    context: CompositeContext,
    blender: Blender,
    partition: RegionPartition,
    /// `[meta, pixels, gather]` tags, allocated collectively at init.
    tags: Vec<u32>,
    tiles: Vec<Tile>,
    report: PassReport,
}

impl MultiPatch {
    pub fn new(ctx: ParallelContext, context: CompositeContext, blender: Blender) -> Self {
        Self {
            ctx,
            context,
            blender,
            partition: RegionPartition::new(0, 1),
            tags: Vec::new(),
            tiles: Vec::new(),
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

    fn unpack_batch(src: u32, meta: &[u32], pixels: Vec<f32>, out: &mut Vec<Fragment>) {
        let mut offset = 0usize;
        for record in meta.chunks_exact(FRAG_WORDS) {
            let extents = Extents::new(
                record[1] as i32,
                record[2] as i32,
                record[3] as i32,
                record[4] as i32,
            );
            let len = extents.area() * 4;
            out.push(Fragment {
                src,
                patch: record[0],
                extents,
                depth: f32::from_bits(record[5]),
                pixels: pixels[offset..offset + len].to_vec(),
            });
            offset += len;
        }
    }
}

impl CompositeStrategy for MultiPatch {
    fn init(&mut self, width: u32, height: u32) -> CompositeResult<()> {
        self.context.width = width;
        self.context.height = height;
        self.partition = RegionPartition::new(height, self.ctx.size() as u32);
        self.tags = self.ctx.unique_tags(3)?;
        Ok(())
    }

    fn submit_tile(&mut self, mut tile: Tile) -> CompositeResult<()> {
        tile.owner_rank = self.ctx.rank().unwrap_or(0) as u32;
        tile.patch_id = self.tiles.len() as u32;
        self.tiles.push(tile);
        Ok(())
    }

    fn composite(&mut self, output: &mut Vec<f32>) -> CompositeResult<bool> {
        let tiles = std::mem::take(&mut self.tiles);
        let Some(my) = self.ctx.rank() else {
            return Ok(false);
        };
        let size = self.ctx.size();
        let full = self.context.full_extents();
        let (meta_tag, pix_tag, gather_tag) = (self.tags[0], self.tags[1], self.tags[2]);

        // Phase 1: crop every patch against the strips it overlaps and batch
        // the fragments per destination rank.
        let mut frag_meta: Vec<Vec<u32>> = vec![Vec::new(); size];
        let mut frag_pix: Vec<Vec<f32>> = vec![Vec::new(); size];
        for t in &tiles {
            let Some((first, last)) = self.partition.regions_for_patch(&t.extents, &full) else {
                continue;
            };
            for r in first..=last {
                let crop = t.extents.intersection(&self.strip_extents(r)).intersection(&full);
                if crop.is_empty() {
                    continue;
                }
                frag_meta[r as usize].extend_from_slice(&[
                    t.patch_id,
                    crop.xmin as u32,
                    crop.xmax as u32,
                    crop.ymin as u32,
                    crop.ymax as u32,
                    t.depth.to_bits(),
                ]);
                frag_pix[r as usize].extend(extract_region(&t.pixels, &t.extents, &crop));
            }
        }

        // Phase 2: tell every rank how much to expect from me.
        let mut counts = vec![0u32; 2 * size];
        for r in 0..size {
            counts[2 * r] = (frag_meta[r].len() / FRAG_WORDS) as u32;
            counts[2 * r + 1] = frag_pix[r].len() as u32;
        }
        let incoming = self.ctx.alltoall_u32(&counts, 2)?;

        // Phase 3: ship the non-empty batches; the self batch stays local.
        let mut pending = Vec::new();
        let mut pixels_sent = 0u64;
        for r in (0..size).filter(|&r| r != my) {
            if frag_meta[r].is_empty() {
                continue;
            }
            let meta = std::mem::take(&mut frag_meta[r]);
            let pix = std::mem::take(&mut frag_pix[r]);
            pixels_sent += pix.len() as u64;
            pending.push(self.ctx.isend(r, meta_tag, Payload::U32(meta))?);
            pending.push(self.ctx.isend(r, pix_tag, Payload::F32(pix))?);
        }

        // Phase 4: collect my strip's fragments and blend front-to-back in
        // the strict total depth order.
        let strip = self.strip_extents(my as u32);
        let mut fragments = Vec::new();
        for s in 0..size {
            if incoming[2 * s] == 0 {
                continue;
            }
            if s == my {
                let meta = std::mem::take(&mut frag_meta[my]);
                let pix = std::mem::take(&mut frag_pix[my]);
                Self::unpack_batch(my as u32, &meta, pix, &mut fragments);
            } else {
                let meta = self.ctx.recv(s, meta_tag)?.into_u32()?;
                let pix = self.ctx.recv(s, pix_tag)?.into_f32()?;
                Self::unpack_batch(s as u32, &meta, pix, &mut fragments);
            }
        }

        let mut local_region: Option<Vec<f32>> = None;
        if !strip.is_empty() && !fragments.is_empty() {
            fragments.sort_by(|a, b| {
                a.depth
                    .total_cmp(&b.depth)
                    .then(a.src.cmp(&b.src))
                    .then(a.patch.cmp(&b.patch))
            });
            let mut acc = vec![0.0f32; strip.area() * 4];
            let mut written = Extents::new(0, 0, 0, 0);
            for f in &fragments {
                written = written.union(&f.extents.intersection(&strip));
                self.blender
                    .front_to_back(&f.pixels, &f.extents, &strip, &mut acc, &strip);
            }
            log::trace!(
                "multi-patch pass: rank {my} blended {} fragments, wrote {written:?}",
                fragments.len()
            );
            blend_with_background(&mut acc, &strip, self.context.background);
            local_region = Some(acc);
        }

        // Rank 0 needs every rank's emptiness flag to know who will send
        // during the gather; other ranks only ever read their own slot.
        let mut flags = vec![0u32; size];
        flags[my] = local_region.is_some() as u32;
        self.ctx.collect_sum_u32(&mut flags)?;
        let nonempty: Vec<bool> = flags.iter().map(|&f| f != 0).collect();

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
            fragments_blended: fragments.len() as u64,
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
