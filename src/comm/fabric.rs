//! In-process message fabric
//!
//! The concrete message-passing substrate backing [`ParallelContext`]: one
//! crossbeam mailbox per rank, typed payloads moved by ownership (the
//! in-process analogue of a zero-copy transfer), and `(context, src, tag)`
//! envelope matching with an out-of-order stash. Delivery between two ranks
//! over one logical tag stream is FIFO; distinct streams interleave freely.
//!
//! [`ParallelContext`]: super::ParallelContext

use crate::error::{CommError, CommResult};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

// =============================================================================
// Payload
// =============================================================================

/// Typed message payload. Vectors move by ownership between ranks; there is
/// no serialization step.
#[derive(Clone, Debug)]
pub enum Payload {
    U32(Vec<u32>),
    F32(Vec<f32>),
    U8(Vec<u8>),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::U32(_) => "u32",
            Payload::F32(_) => "f32",
            Payload::U8(_) => "u8",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::U32(v) => v.len(),
            Payload::F32(v) => v.len(),
            Payload::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_u32(self) -> CommResult<Vec<u32>> {
        match self {
            Payload::U32(v) => Ok(v),
            other => Err(CommError::PayloadType {
                expected: "u32",
                got: other.kind(),
            }),
        }
    }

    pub fn into_f32(self) -> CommResult<Vec<f32>> {
        match self {
            Payload::F32(v) => Ok(v),
            other => Err(CommError::PayloadType {
                expected: "f32",
                got: other.kind(),
            }),
        }
    }

    pub fn into_u8(self) -> CommResult<Vec<u8>> {
        match self {
            Payload::U8(v) => Ok(v),
            other => Err(CommError::PayloadType {
                expected: "u8",
                got: other.kind(),
            }),
        }
    }
}

// =============================================================================
// Envelope
// =============================================================================

/// One in-flight message. `src` is the sender's rank within the sending
/// group; `context` keeps sibling groups from cross-talking.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub context: u32,
    pub src: usize,
    pub tag: u32,
    pub payload: Payload,
}

// =============================================================================
// Fabric
// =============================================================================

struct FabricShared {
    senders: Vec<Sender<Envelope>>,
    next_context: AtomicU32,
}

struct Mailbox {
    rx: Receiver<Envelope>,
    /// Messages received while waiting for a different `(context, src, tag)`.
    stash: Vec<Envelope>,
}

/// One process's endpoint on the fabric, shared by every group context the
/// process belongs to.
pub struct Endpoint {
    fabric: Arc<FabricShared>,
    rank: usize,
    mailbox: Mutex<Mailbox>,
}

impl Endpoint {
    /// Identity in the outermost group, independent of subgrouping.
    pub fn global_rank(&self) -> usize {
        self.rank
    }

    pub fn global_size(&self) -> usize {
        self.fabric.senders.len()
    }

    /// Allocate a fabric-unique communication context id. Group creation
    /// broadcasts the id so all members agree on it.
    pub(crate) fn alloc_context(&self) -> u32 {
        self.fabric.next_context.fetch_add(1, Ordering::SeqCst)
    }

    /// Deliver an envelope to a destination's mailbox. Buffered: completes
    /// immediately without waiting for the receiver.
    pub(crate) fn post(&self, dst_global: usize, envelope: Envelope) -> CommResult<()> {
        let sender = self
            .fabric
            .senders
            .get(dst_global)
            .ok_or(CommError::InvalidRank {
                rank: dst_global,
                size: self.fabric.senders.len(),
            })?;
        sender
            .send(envelope)
            .map_err(|_| CommError::GroupLost("peer mailbox closed"))
    }

    /// Blocking receive of the first message matching `(context, src, tag)`,
    /// stashing every mismatch for later waits.
    pub(crate) fn take_matching(&self, context: u32, src: usize, tag: u32) -> CommResult<Payload> {
        let mut mailbox = self.mailbox.lock();
        let matches = |e: &Envelope| e.context == context && e.src == src && e.tag == tag;

        if let Some(pos) = mailbox.stash.iter().position(matches) {
            return Ok(mailbox.stash.remove(pos).payload);
        }
        loop {
            let envelope = mailbox
                .rx
                .recv()
                .map_err(|_| CommError::GroupLost("all peer endpoints dropped"))?;
            if matches(&envelope) {
                return Ok(envelope.payload);
            }
            mailbox.stash.push(envelope);
        }
    }
}

/// Create the endpoints of an `n`-rank in-process fabric. Each endpoint is
/// intended to be driven by exactly one OS thread.
pub(crate) fn create_endpoints(n: usize) -> Vec<Arc<Endpoint>> {
    let mut senders = Vec::with_capacity(n);
    let mut receivers = Vec::with_capacity(n);
    for _ in 0..n {
        let (tx, rx) = unbounded();
        senders.push(tx);
        receivers.push(rx);
    }
    let shared = Arc::new(FabricShared {
        senders,
        // Context 0 is the world group.
        next_context: AtomicU32::new(1),
    });
    receivers
        .into_iter()
        .enumerate()
        .map(|(rank, rx)| {
            Arc::new(Endpoint {
                fabric: Arc::clone(&shared),
                rank,
                mailbox: Mutex::new(Mailbox {
                    rx,
                    stash: Vec::new(),
                }),
            })
        })
        .collect()
}

// =============================================================================
// Request handles
// =============================================================================

/// Handle for a non-blocking send. The channel transport buffers at issue
/// time, so completion is immediate; the handle exists to keep the
/// issue-then-wait discipline explicit at call sites.
#[must_use]
#[derive(Debug)]
pub struct SendRequest(pub(crate) ());

/// Handle for a non-blocking receive, naming the `(src, tag)` stream it will
/// consume. Outstanding requests may be waited in any order; matching is by
/// stream, not arrival.
#[must_use]
#[derive(Debug)]
pub struct RecvRequest {
    pub(crate) src: usize,
    pub(crate) tag: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_order_matching() {
        let endpoints = create_endpoints(2);
        let (a, b) = (&endpoints[0], &endpoints[1]);

        a.post(
            1,
            Envelope {
                context: 0,
                src: 0,
                tag: 21,
                payload: Payload::U32(vec![21]),
            },
        )
        .unwrap();
        a.post(
            1,
            Envelope {
                context: 0,
                src: 0,
                tag: 20,
                payload: Payload::U32(vec![20]),
            },
        )
        .unwrap();

        // Waiting for the later-sent tag first must not lose the earlier one.
        let second = b.take_matching(0, 0, 20).unwrap().into_u32().unwrap();
        let first = b.take_matching(0, 0, 21).unwrap().into_u32().unwrap();
        assert_eq!((first, second), (vec![21], vec![20]));
    }

    #[test]
    fn test_payload_type_mismatch() {
        let endpoints = create_endpoints(2);
        endpoints[0]
            .post(
                1,
                Envelope {
                    context: 0,
                    src: 0,
                    tag: 16,
                    payload: Payload::F32(vec![1.0]),
                },
            )
            .unwrap();
        let err = endpoints[1]
            .take_matching(0, 0, 16)
            .unwrap()
            .into_u32()
            .unwrap_err();
        assert!(matches!(err, CommError::PayloadType { .. }));
    }
}
