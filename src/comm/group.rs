//! Process groups
//!
//! [`ParallelContext`] is a thin, reference-counted wrapper over one
//! process-group handle. Groups can be subdivided; creation is collective
//! (every parent member must call, even ranks excluded from the result,
//! which receive a group whose collective operations are no-ops).

use crate::error::{CommError, CommResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::collectives::CTRL_GROUP;
use super::fabric::{self, Endpoint, Envelope, Payload, RecvRequest, SendRequest};
use super::tags::TagAllocator;

struct GroupShared {
    endpoint: Arc<Endpoint>,
    /// Communication context; messages from sibling groups never match.
    context: u32,
    /// Global ranks of the members, indexed by group rank.
    members: Vec<usize>,
    /// This process's rank within the group, `None` for non-members.
    rank: Option<usize>,
    tags: Mutex<TagAllocator>,
}

/// Handle over one process group. Cloning is cheap and shares the underlying
/// group state, including the tag allocator.
#[derive(Clone)]
pub struct ParallelContext {
    shared: Arc<GroupShared>,
}

impl ParallelContext {
    /// Create the world group of an `n`-rank in-process fabric, one context
    /// per rank. Each returned context must be driven by its own thread.
    pub fn local_world(n: usize) -> Vec<ParallelContext> {
        fabric::create_endpoints(n)
            .into_iter()
            .enumerate()
            .map(|(rank, endpoint)| {
                Self::from_parts(endpoint, 0, (0..n).collect(), Some(rank))
            })
            .collect()
    }

    fn from_parts(
        endpoint: Arc<Endpoint>,
        context: u32,
        members: Vec<usize>,
        rank: Option<usize>,
    ) -> Self {
        Self {
            shared: Arc::new(GroupShared {
                endpoint,
                context,
                members,
                rank,
                tags: Mutex::new(TagAllocator::new()),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Identity
    // -------------------------------------------------------------------------

    /// Rank within this group, `None` if this process is not a member.
    pub fn rank(&self) -> Option<usize> {
        self.shared.rank
    }

    /// Number of members in this group.
    pub fn size(&self) -> usize {
        self.shared.members.len()
    }

    pub fn is_member(&self) -> bool {
        self.shared.rank.is_some()
    }

    /// Rank in the outermost group, independent of subgrouping.
    pub fn global_rank(&self) -> usize {
        self.shared.endpoint.global_rank()
    }

    pub fn global_size(&self) -> usize {
        self.shared.endpoint.global_size()
    }

    pub(crate) fn member_rank(&self) -> CommResult<usize> {
        self.shared.rank.ok_or(CommError::NotAMember)
    }

    fn global_of(&self, group_rank: usize) -> CommResult<usize> {
        self.shared
            .members
            .get(group_rank)
            .copied()
            .ok_or(CommError::InvalidRank {
                rank: group_rank,
                size: self.size(),
            })
    }

    // -------------------------------------------------------------------------
    // Point-to-point
    // -------------------------------------------------------------------------

    /// Buffered send to a group rank over a logical tag stream.
    pub fn send(&self, dst: usize, tag: u32, payload: Payload) -> CommResult<()> {
        let src = self.member_rank()?;
        let dst_global = self.global_of(dst)?;
        self.shared.endpoint.post(
            dst_global,
            Envelope {
                context: self.shared.context,
                src,
                tag,
                payload,
            },
        )
    }

    /// Blocking receive from a group rank over a logical tag stream.
    pub fn recv(&self, src: usize, tag: u32) -> CommResult<Payload> {
        self.member_rank()?;
        if src >= self.size() {
            return Err(CommError::InvalidRank {
                rank: src,
                size: self.size(),
            });
        }
        self.shared
            .endpoint
            .take_matching(self.shared.context, src, tag)
    }

    /// Non-blocking send. The transport buffers immediately; the returned
    /// handle keeps the issue-then-wait discipline explicit.
    pub fn isend(&self, dst: usize, tag: u32, payload: Payload) -> CommResult<SendRequest> {
        self.send(dst, tag, payload)?;
        Ok(SendRequest(()))
    }

    /// Non-blocking receive: returns a handle naming the `(src, tag)` stream.
    pub fn irecv(&self, src: usize, tag: u32) -> RecvRequest {
        RecvRequest { src, tag }
    }

    /// Complete a non-blocking receive. Requests may be waited in any order.
    pub fn wait_recv(&self, request: RecvRequest) -> CommResult<Payload> {
        self.recv(request.src, request.tag)
    }

    /// Complete a non-blocking send.
    pub fn wait_send(&self, _request: SendRequest) -> CommResult<()> {
        Ok(())
    }

    /// Complete a batch of non-blocking sends.
    pub fn wait_all_sends(&self, requests: Vec<SendRequest>) -> CommResult<()> {
        for request in requests {
            self.wait_send(request)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tag allocation
    // -------------------------------------------------------------------------

    /// Allocate a batch of point-to-point tags, unique and monotonically
    /// increasing within the running program (wrapping to the reserved
    /// minimum on overflow). Collective: every member must call in
    /// lock-step, so tag numbering never diverges across ranks that took
    /// different code paths.
    pub fn unique_tags(&self, count: usize) -> CommResult<Vec<u32>> {
        if !self.is_member() {
            return Ok(Vec::new());
        }
        let mut proposal = [self.shared.tags.lock().propose()];
        self.unify_max_array_u32(&mut proposal)?;
        Ok(self.shared.tags.lock().commit(proposal[0], count))
    }

    // -------------------------------------------------------------------------
    // Group construction
    // -------------------------------------------------------------------------

    /// Build a new group containing only the listed parent-group ranks.
    /// Collective over the parent: every parent member must call, including
    /// ranks excluded from the result.
    pub fn create_subgroup(&self, ranks: &[usize]) -> CommResult<ParallelContext> {
        let my = self.member_rank()?;
        for &r in ranks {
            if r >= self.size() {
                return Err(CommError::InvalidRank {
                    rank: r,
                    size: self.size(),
                });
            }
        }

        let context = self.agree_on_context()?;
        let members = ranks
            .iter()
            .map(|&r| self.global_of(r))
            .collect::<CommResult<Vec<_>>>()?;
        let rank = ranks.iter().position(|&r| r == my);

        log::trace!(
            "rank {my}: subgroup context {context} with {} members (member: {})",
            members.len(),
            rank.is_some()
        );
        Ok(Self::from_parts(
            Arc::clone(&self.shared.endpoint),
            context,
            members,
            rank,
        ))
    }

    /// Deterministically partition the group into contiguous blocks of `n`
    /// ranks (last block may be shorter). Returns this process's block
    /// group, its block index and the block count.
    pub fn create_groups_of_n(&self, n: usize) -> CommResult<(ParallelContext, usize, usize)> {
        let my = self.member_rank()?;
        let n = n.max(1);
        let size = self.size();
        let block_count = size.div_ceil(n);

        // One agreed context per block; rank 0 allocates them all.
        let mut contexts = vec![0u32; block_count];
        if my == 0 {
            for slot in contexts.iter_mut() {
                *slot = self.shared.endpoint.alloc_context();
            }
        }
        self.broadcast_u32_array(0, &mut contexts)?;

        let block = my / n;
        let lo = block * n;
        let hi = ((block + 1) * n).min(size);
        let members = (lo..hi)
            .map(|r| self.global_of(r))
            .collect::<CommResult<Vec<_>>>()?;

        let group = Self::from_parts(
            Arc::clone(&self.shared.endpoint),
            contexts[block],
            members,
            Some(my - lo),
        );
        Ok((group, block, block_count))
    }

    /// Color split: all members supplying equal `color` form one new group.
    /// Standard collective rendezvous; `num_groups` is the caller's upper
    /// bound on distinct colors, used for sanity checking only.
    pub fn split(&self, color: u32, num_groups: usize) -> CommResult<ParallelContext> {
        let my = self.member_rank()?;
        let size = self.size();
        debug_assert!((color as usize) < num_groups.max(1));

        let (context, mates) = if my == 0 {
            let mut colors = vec![0u32; size];
            colors[0] = color;
            for r in 1..size {
                let v = self.recv(r, CTRL_GROUP)?.into_u32()?;
                colors[r] = v[0];
            }

            let mut contexts: HashMap<u32, u32> = HashMap::new();
            for &c in &colors {
                contexts
                    .entry(c)
                    .or_insert_with(|| self.shared.endpoint.alloc_context());
            }

            for r in 1..size {
                let mates: Vec<u32> = (0..size as u32)
                    .filter(|&m| colors[m as usize] == colors[r])
                    .collect();
                let mut packed = vec![contexts[&colors[r]]];
                packed.extend(mates);
                self.send(r, CTRL_GROUP, Payload::U32(packed))?;
            }
            let mates: Vec<usize> = (0..size)
                .filter(|&m| colors[m] == colors[0])
                .collect();
            (contexts[&colors[0]], mates)
        } else {
            self.send(0, CTRL_GROUP, Payload::U32(vec![color]))?;
            let packed = self.recv(0, CTRL_GROUP)?.into_u32()?;
            let context = packed[0];
            let mates = packed[1..].iter().map(|&m| m as usize).collect();
            (context, mates)
        };

        let members = mates
            .iter()
            .map(|&r| self.global_of(r))
            .collect::<CommResult<Vec<_>>>()?;
        let rank = mates.iter().position(|&r| r == my);
        Ok(Self::from_parts(
            Arc::clone(&self.shared.endpoint),
            context,
            members,
            rank,
        ))
    }

    /// Agree on a fresh communication context: group rank 0 allocates from
    /// the fabric-wide counter and broadcasts it.
    fn agree_on_context(&self) -> CommResult<u32> {
        let my = self.member_rank()?;
        let proposal = if my == 0 {
            self.shared.endpoint.alloc_context()
        } else {
            0
        };
        self.broadcast_u32(0, proposal)
    }
}
