//! Compositing counters
//!
//! Cheap per-engine counters, read after any pass. Counts are local to the
//! owning rank; nothing here is reduced across the group.

/// Cumulative counters for one compositor instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompositorStats {
    /// Completed `composite` calls.
    pub passes: u64,
    /// Tiles accepted by `submit_tile` since construction.
    pub tiles_submitted: u64,
    /// Patch fragments this rank blended into an accumulator.
    pub fragments_blended: u64,
    /// Blend worker count used by the most recent pass.
    pub last_worker_count: usize,
}

/// What one pass did on this rank.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Fragments blended locally during the pass.
    pub fragments_blended: u64,
    /// RGBA floats shipped to other ranks during the pass.
    pub pixels_sent: u64,
}
