//! Final-image assembly
//!
//! After region compositing every rank holds at most one finished row strip.
//! [`gather_image`] ships the non-empty strips to group rank 0, which places
//! them into a background-filled canvas. Empty strips are never transferred;
//! the caller supplies the per-rank non-emptiness flags, agreed beforehand.

use crate::blend::{color_image, place_image};
use crate::comm::{ParallelContext, Payload};
use crate::error::CompositeResult;
use crate::region::RegionPartition;
use crate::types::{Extents, Rgba};

/// Gather the per-rank row strips into a full image at group rank 0.
///
/// `local_region` is this rank's finished strip (background already applied),
/// `None` when the rank owns no rows or produced nothing. `nonempty[r]` must
/// agree across the group on whether rank `r` sends. Returns the assembled
/// canvas on rank 0, `None` elsewhere.
pub(crate) fn gather_image(
    ctx: &ParallelContext,
    partition: &RegionPartition,
    width: u32,
    local_region: Option<&[f32]>,
    nonempty: &[bool],
    background: Rgba,
    tag: u32,
) -> CompositeResult<Option<Vec<f32>>> {
    let Some(my) = ctx.rank() else { return Ok(None) };
    let height = partition.height();
    let full = Extents::full(width, height);

    if my != 0 {
        if nonempty[my] {
            if let Some(region) = local_region {
                ctx.send(0, tag, Payload::F32(region.to_vec()))?;
            }
        }
        return Ok(None);
    }

    let mut canvas = vec![0.0f32; width as usize * height as usize * 4];
    color_image(&mut canvas, width, height, background);

    let strip_extents = |rank: u32| {
        Extents::new(
            0,
            width as i32,
            partition.region_start(rank) as i32,
            partition.region_end(rank) as i32,
        )
    };

    if nonempty[0] {
        if let Some(region) = local_region {
            place_image(region, &strip_extents(0), &mut canvas, &full);
        }
    }

    // Strips are disjoint, so arrival order does not matter.
    let requests: Vec<_> = (1..ctx.size())
        .filter(|&r| nonempty[r] && partition.region_rows(r as u32) > 0)
        .map(|r| (r, ctx.irecv(r, tag)))
        .collect();
    for (r, request) in requests {
        let pixels = ctx.wait_recv(request)?.into_f32()?;
        place_image(&pixels, &strip_extents(r as u32), &mut canvas, &full);
    }

    Ok(Some(canvas))
}

/// Convert a composited RGBA `f32` image to packed 8-bit RGB, dropping alpha.
/// Channels are clamped to `[0, 1]` before quantization.
pub fn image_to_rgb8(image: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(image.len() / 4 * 3);
    for px in image.chunks_exact(4) {
        for &c in &px[..3] {
            out.push((c.clamp(0.0, 1.0) * 255.0).round() as u8);
        }
    }
    out
}
