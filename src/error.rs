//! Error types
//!
//! Two layers: [`CommError`] for the message-passing substrate wrapper and
//! [`CompositeError`] for the engine proper. Geometric edge cases (off-screen
//! or zero-area patches) are never errors; anything that would need
//! inter-process agreement to recover from is fatal to the whole pass.

use crate::types::Extents;
use thiserror::Error;

/// Errors from the process-group / messaging layer.
///
/// A `GroupLost` is unrecoverable: a peer abandoned a collective mid-pass and
/// the group's collective call counts can no longer match. Callers must treat
/// the whole group as dead.
#[derive(Debug, Error)]
pub enum CommError {
    #[error("process group lost: {0}")]
    GroupLost(&'static str),

    #[error("message payload type mismatch (expected {expected}, got {got})")]
    PayloadType {
        expected: &'static str,
        got: &'static str,
    },

    #[error("collective called on a group this process is not a member of")]
    NotAMember,

    #[error("rank {rank} out of range for group of size {size}")]
    InvalidRank { rank: usize, size: usize },
}

/// Errors from the compositing engine.
#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("communication failure: {0}")]
    Comm(#[from] CommError),

    #[error("external compositing backend requested but not available in this build")]
    ExternalUnavailable,

    #[error("compositor used before init()")]
    NotInitialized,

    #[error(
        "tile pixel buffer length {len} does not match extents {extents:?} \
         ({expected} floats expected)"
    )]
    TileShape {
        len: usize,
        expected: usize,
        extents: Extents,
    },

    #[error("strategy {strategy} accepts at most one tile per rank per pass")]
    TooManyTiles { strategy: &'static str },
}

pub type CommResult<T> = std::result::Result<T, CommError>;
pub type CompositeResult<T> = std::result::Result<T, CompositeError>;
