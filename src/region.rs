//! Screen-space work partitioning
//!
//! The screen is divided into contiguous horizontal row strips, one per
//! rank. Strips partition `[0, height)` exactly: no gaps, no overlaps, with
//! the last rank absorbing the rounding remainder. Patch fan-out is bounded
//! by the strips a patch actually overlaps, so communication volume scales
//! with patch height rather than rank count.

use crate::types::Extents;

/// Row-strip partition of a `height`-row screen across `num_ranks` ranks.
#[derive(Clone, Copy, Debug)]
pub struct RegionPartition {
    height: u32,
    num_ranks: u32,
    region_height: u32,
}

impl RegionPartition {
    /// Build the partition. `region_height` is `height / num_ranks` rounded
    /// to nearest; clamping keeps every strip inside `[0, height)`.
    pub fn new(height: u32, num_ranks: u32) -> Self {
        let num_ranks = num_ranks.max(1);
        let region_height = (height + num_ranks / 2) / num_ranks;
        Self {
            height,
            num_ranks,
            region_height,
        }
    }

    pub fn num_ranks(&self) -> u32 {
        self.num_ranks
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Nominal strip height before clamping.
    pub fn region_height(&self) -> u32 {
        self.region_height
    }

    /// First row of `rank`'s strip.
    pub fn region_start(&self, rank: u32) -> u32 {
        debug_assert!(rank < self.num_ranks);
        (rank * self.region_height).min(self.height)
    }

    /// One past the last row of `rank`'s strip. The last rank extends to
    /// `height` to absorb the rounding remainder.
    pub fn region_end(&self, rank: u32) -> u32 {
        debug_assert!(rank < self.num_ranks);
        if rank + 1 == self.num_ranks {
            self.height
        } else {
            ((rank + 1) * self.region_height).min(self.height)
        }
    }

    /// Rows owned by `rank`; zero for ranks squeezed out by rounding.
    pub fn region_rows(&self, rank: u32) -> u32 {
        self.region_end(rank) - self.region_start(rank)
    }

    /// Largest single-rank strip size, used to size fixed-capacity receive
    /// buffers.
    pub fn max_region_height(&self) -> u32 {
        (0..self.num_ranks)
            .map(|r| self.region_rows(r))
            .max()
            .unwrap_or(0)
    }

    /// The contiguous span of regions a patch's vertical extent overlaps,
    /// as an inclusive `(first, last)` pair, or `None` when the patch is
    /// degenerate or lies entirely outside `full`.
    pub fn regions_for_patch(&self, patch: &Extents, full: &Extents) -> Option<(u32, u32)> {
        if patch.is_empty() {
            return None;
        }
        let clipped = patch.intersection(full);
        if clipped.is_empty() {
            return None;
        }

        // Rows relative to the top of the screen.
        let ymin = (clipped.ymin - full.ymin) as u32;
        let ymax = (clipped.ymax - full.ymin) as u32;

        let mut first = None;
        let mut last = None;
        for r in 0..self.num_ranks {
            let start = self.region_start(r);
            let end = self.region_end(r);
            if end > ymin && start < ymax {
                if first.is_none() {
                    first = Some(r);
                }
                last = Some(r);
            }
        }
        Some((first?, last?))
    }
}

/// Free-function form: which contiguous span of `num_regions` row regions of
/// `full` does `patch` overlap?
pub fn find_regions_for_patch(
    patch: &Extents,
    full: &Extents,
    num_regions: u32,
) -> Option<(u32, u32)> {
    if full.is_empty() {
        return None;
    }
    RegionPartition::new(full.height() as u32, num_regions).regions_for_patch(patch, full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_covers_exactly() {
        for height in 1u32..=128 {
            for num_ranks in 1..=height {
                let p = RegionPartition::new(height, num_ranks);
                let mut next = 0;
                for r in 0..num_ranks {
                    assert_eq!(p.region_start(r), next, "h={height} n={num_ranks} r={r}");
                    assert!(p.region_end(r) >= p.region_start(r));
                    next = p.region_end(r);
                }
                assert_eq!(next, height, "h={height} n={num_ranks}");
            }
        }
    }

    #[test]
    fn test_last_rank_absorbs_remainder() {
        let p = RegionPartition::new(10, 3);
        assert_eq!(p.region_height(), 3);
        assert_eq!((p.region_start(2), p.region_end(2)), (6, 10));
        assert_eq!(p.max_region_height(), 4);
    }

    #[test]
    fn test_rounding_can_empty_the_last_rank() {
        // 6/4 rounds to 2, ranks 0..3 cover everything, the last is empty.
        let p = RegionPartition::new(6, 4);
        assert_eq!(p.region_rows(3), 0);
        assert_eq!(p.region_end(2), 6);
    }

    #[test]
    fn test_patch_outside_screen_is_empty_span() {
        let full = Extents::full(64, 64);
        let off = Extents::new(0, 16, 70, 90);
        assert_eq!(find_regions_for_patch(&off, &full, 4), None);

        let degenerate = Extents::new(5, 5, 0, 64);
        assert_eq!(find_regions_for_patch(&degenerate, &full, 4), None);
    }

    #[test]
    fn test_full_screen_patch_spans_all_regions() {
        let full = Extents::full(64, 64);
        assert_eq!(find_regions_for_patch(&full, &full, 4), Some((0, 3)));
    }

    #[test]
    fn test_partial_patch_fanout_is_bounded() {
        let full = Extents::full(64, 64);
        // Rows [16, 32) fall entirely inside rank 1's strip of height 16.
        let band = Extents::new(0, 64, 16, 32);
        assert_eq!(find_regions_for_patch(&band, &full, 4), Some((1, 1)));
    }
}
