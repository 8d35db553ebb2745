//! Unique message-tag allocation
//!
//! Point-to-point tags below [`TAG_FIRST`] are reserved for the hard-coded
//! control streams of the collectives. User tags come from a per-group
//! [`TagAllocator`], advanced in lock-step by every member through one
//! max-consensus reduction per batch, so tag numbering never diverges across
//! ranks that took different code paths.

/// First tag available to user batches; everything below is control space.
pub const TAG_FIRST: u32 = 16;

/// Exclusive upper bound of the tag space; allocation wraps back to
/// [`TAG_FIRST`] past this point.
pub const TAG_LIMIT: u32 = 1 << 30;

/// Per-group tag cursor. The cursor itself is only a local proposal; the
/// group agrees on each batch via `ParallelContext::unique_tags`, which
/// max-reduces proposals before committing.
#[derive(Debug)]
pub(crate) struct TagAllocator {
    next: u32,
}

impl TagAllocator {
    pub fn new() -> Self {
        Self { next: TAG_FIRST }
    }

    /// This rank's proposal for the next batch base.
    pub fn propose(&self) -> u32 {
        self.next
    }

    /// Commit an agreed batch base, returning the allocated tags and
    /// advancing the cursor. Wraps to [`TAG_FIRST`] when the batch would
    /// exceed the tag space.
    pub fn commit(&mut self, agreed_base: u32, count: usize) -> Vec<u32> {
        let count = count as u32;
        let base = if agreed_base.saturating_add(count) > TAG_LIMIT {
            TAG_FIRST
        } else {
            agreed_base
        };
        self.next = base + count;
        (base..base + count).collect()
    }
}
