//! Process groups and message passing
//!
//! An MPI-flavored abstraction over an in-process fabric: every rank is an
//! OS thread holding one [`ParallelContext`] clone per group it belongs to.
//! The layer provides tagged point-to-point streams, root-0 collectives,
//! group subdivision and lock-step unique-tag allocation.
//!
//! Module structure:
//!
//! - [`fabric`]: channel transport, typed payloads, envelope matching
//! - [`group`]: [`ParallelContext`], identity, point-to-point, subgroups
//! - [`collectives`]: barrier, broadcast, reductions, all-to-all
//! - [`tags`]: per-group user-tag allocation

pub mod collectives;
pub mod fabric;
pub mod group;
pub mod tags;

pub use fabric::{Payload, RecvRequest, SendRequest};
pub use group::ParallelContext;
pub use tags::TAG_FIRST;
