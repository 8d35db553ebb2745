//! Pixel blend kernels
//!
//! Pure compositing math over row-major `f32` RGBA buffers. No process-group
//! awareness: callers are responsible for feeding patches in strict depth
//! order. Extents outside the destination are silently clamped away via
//! intersection; a zero-area intersection is a no-op.
//!
//! [`Blender`] runs the same algebra either inline or split row-wise across
//! a scoped worker pool. The two paths are bitwise identical because workers
//! own disjoint destination row bands.

use crate::config::{CompositorConfig, MAX_BLEND_WORKERS, MIN_ROWS_PER_WORKER};
use crate::types::{Extents, Rgba};
use std::ops::Range;

// =============================================================================
// Row kernels
// =============================================================================

type RowKernel = fn(&[f32], &mut [f32]);

/// Front-to-back accumulation: `dst += src * (1 - dst.alpha)`, clamped to
/// `[0, 1]` per channel. Once a destination pixel is fully opaque it is never
/// written again, so the kernel is idempotent past saturation.
fn blend_rows_front_to_back(src: &[f32], dst: &mut [f32]) {
    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let da = d[3];
        if da >= 1.0 {
            continue;
        }
        let t = 1.0 - da;
        for c in 0..4 {
            d[c] = (d[c] + s[c] * t).clamp(0.0, 1.0);
        }
    }
}

/// Back-to-front accumulation: `dst = dst * (1 - src.alpha) + src`,
/// unconditional.
fn blend_rows_back_to_front(src: &[f32], dst: &mut [f32]) {
    for (s, d) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let t = 1.0 - s[3];
        for c in 0..4 {
            d[c] = d[c] * t + s[c];
        }
    }
}

fn copy_rows(src: &[f32], dst: &mut [f32]) {
    dst.copy_from_slice(src);
}

// =============================================================================
// Region iteration
// =============================================================================

/// Float range of the pixels of row `y` restricted to `region`, within a
/// buffer laid out according to `ext`.
fn row_span(ext: &Extents, region: &Extents, y: i32) -> Range<usize> {
    let stride = ext.width() as usize * 4;
    let base = (y - ext.ymin) as usize * stride;
    let x0 = (region.xmin - ext.xmin) as usize * 4;
    let x1 = (region.xmax - ext.xmin) as usize * 4;
    base + x0..base + x1
}

fn apply_region(
    src: &[f32],
    src_ext: &Extents,
    dst: &mut [f32],
    dst_ext: &Extents,
    region: &Extents,
    kernel: RowKernel,
) {
    if region.is_empty() {
        return;
    }
    for y in region.ymin..region.ymax {
        let s = &src[row_span(src_ext, region, y)];
        let d = &mut dst[row_span(dst_ext, region, y)];
        kernel(s, d);
    }
}

// =============================================================================
// Single-threaded kernels
// =============================================================================

/// Blend `src` over `dst` front-to-back inside the intersection of
/// `blend_ext`, `src_ext` and `dst_ext`.
///
/// Only valid when patches are applied in strict front-to-back depth order;
/// reordering changes the result.
pub fn blend_front_to_back(
    src: &[f32],
    src_ext: &Extents,
    blend_ext: &Extents,
    dst: &mut [f32],
    dst_ext: &Extents,
) {
    let region = blend_ext.intersection(src_ext).intersection(dst_ext);
    apply_region(src, src_ext, dst, dst_ext, &region, blend_rows_front_to_back);
}

/// Blend `src` under `dst` back-to-front inside the intersection of
/// `blend_ext`, `src_ext` and `dst_ext`. Requires strict back-to-front depth
/// order.
pub fn blend_back_to_front(
    src: &[f32],
    src_ext: &Extents,
    blend_ext: &Extents,
    dst: &mut [f32],
    dst_ext: &Extents,
) {
    let region = blend_ext.intersection(src_ext).intersection(dst_ext);
    apply_region(src, src_ext, dst, dst_ext, &region, blend_rows_back_to_front);
}

/// Unconditional overwrite copy of the intersection of `src_ext` and
/// `dst_ext`. Used for first writes and disjoint-region assembly.
pub fn place_image(src: &[f32], src_ext: &Extents, dst: &mut [f32], dst_ext: &Extents) {
    let region = src_ext.intersection(dst_ext);
    apply_region(src, src_ext, dst, dst_ext, &region, copy_rows);
}

/// Fill every pixel of a `width x height` buffer with a constant color.
pub fn color_image(buffer: &mut [f32], width: u32, height: u32, color: Rgba) {
    debug_assert_eq!(buffer.len(), width as usize * height as usize * 4);
    for px in buffer.chunks_exact_mut(4) {
        px.copy_from_slice(&color);
    }
}

/// One-shot under-blend of a finished image against a background color:
/// `out = bg * (1 - alpha) + image`, per pixel over the whole buffer.
pub fn blend_with_background(image: &mut [f32], extents: &Extents, background: Rgba) {
    debug_assert_eq!(image.len(), extents.area() * 4);
    for px in image.chunks_exact_mut(4) {
        let t = 1.0 - px[3];
        for c in 0..4 {
            px[c] += background[c] * t;
        }
    }
}

// =============================================================================
// Worker-pool executor
// =============================================================================

/// Executes the blend kernels either inline or across a scoped row-band
/// worker pool. The pool never changes the result: each worker owns a
/// disjoint destination band and applies the identical scalar kernel.
#[derive(Clone, Copy, Debug)]
pub struct Blender {
    workers: usize,
}

impl Blender {
    /// Pool sized from the configuration: one worker when single-threaded
    /// blending is forced, otherwise up to one per core.
    pub fn from_config(config: &CompositorConfig) -> Self {
        if config.single_thread_blend {
            Self::single_thread()
        } else {
            Self {
                workers: num_cpus::get().clamp(1, MAX_BLEND_WORKERS),
            }
        }
    }

    /// Inline execution on the calling thread.
    pub fn single_thread() -> Self {
        Self { workers: 1 }
    }

    /// Worker count this blender will use for sufficiently tall regions.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Pooled [`blend_front_to_back`].
    pub fn front_to_back(
        &self,
        src: &[f32],
        src_ext: &Extents,
        blend_ext: &Extents,
        dst: &mut [f32],
        dst_ext: &Extents,
    ) {
        self.run(src, src_ext, blend_ext, dst, dst_ext, blend_rows_front_to_back);
    }

    /// Pooled [`blend_back_to_front`].
    pub fn back_to_front(
        &self,
        src: &[f32],
        src_ext: &Extents,
        blend_ext: &Extents,
        dst: &mut [f32],
        dst_ext: &Extents,
    ) {
        self.run(src, src_ext, blend_ext, dst, dst_ext, blend_rows_back_to_front);
    }

    fn run(
        &self,
        src: &[f32],
        src_ext: &Extents,
        blend_ext: &Extents,
        dst: &mut [f32],
        dst_ext: &Extents,
        kernel: RowKernel,
    ) {
        let region = blend_ext.intersection(src_ext).intersection(dst_ext);
        if region.is_empty() {
            return;
        }
        let rows = region.height() as usize;
        let workers = self.workers.min(rows / MIN_ROWS_PER_WORKER).max(1);
        if workers == 1 {
            apply_region(src, src_ext, dst, dst_ext, &region, kernel);
            return;
        }

        let stride = dst_ext.width() as usize * 4;
        let rows_per_worker = rows.div_ceil(workers);

        std::thread::scope(|scope| {
            let mut rest = dst;
            let mut rest_ymin = dst_ext.ymin;
            for i in 0..workers {
                let y0 = region.ymin + (i * rows_per_worker) as i32;
                let y1 = (y0 + rows_per_worker as i32).min(region.ymax);
                if y0 >= y1 {
                    break;
                }
                let cut = (y1 - rest_ymin) as usize * stride;
                let (band, tail) = rest.split_at_mut(cut);
                let band_ext = Extents::new(dst_ext.xmin, dst_ext.xmax, rest_ymin, y1);
                let band_region = region.intersection(&band_ext);
                rest = tail;
                rest_ymin = y1;
                scope.spawn(move || {
                    apply_region(src, src_ext, band, &band_ext, &band_region, kernel);
                });
            }
        });
    }
}
