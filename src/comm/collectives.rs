//! Collective operations
//!
//! Linear root-0 algorithms over reserved control-tag streams. Every member
//! of a group must call each collective exactly once per pass, in the same
//! order; a rank that skips a call deadlocks the group (an explicit design
//! limitation inherited from the messaging model, not recovered locally).
//! Non-members of a group treat every collective as a no-op.

use crate::error::CommResult;

use super::fabric::Payload;
use super::group::ParallelContext;

// Reserved control tags, all below `tags::TAG_FIRST`.
pub(crate) const CTRL_BARRIER: u32 = 0;
pub(crate) const CTRL_BCAST: u32 = 1;
pub(crate) const CTRL_BCAST_LEN: u32 = 2;
pub(crate) const CTRL_REDUCE: u32 = 3;
pub(crate) const CTRL_ALLTOALL: u32 = 4;
pub(crate) const CTRL_GROUP: u32 = 5;

impl ParallelContext {
    // -------------------------------------------------------------------------
    // Barrier
    // -------------------------------------------------------------------------

    /// Synchronization point. Used only for diagnostics and timing in this
    /// subsystem, never for correctness.
    pub fn barrier(&self) -> CommResult<()> {
        let Some(my) = self.rank() else { return Ok(()) };
        let size = self.size();
        if my == 0 {
            for r in 1..size {
                self.recv(r, CTRL_BARRIER)?;
            }
            for r in 1..size {
                self.send(r, CTRL_BARRIER, Payload::U32(Vec::new()))?;
            }
        } else {
            self.send(0, CTRL_BARRIER, Payload::U32(Vec::new()))?;
            self.recv(0, CTRL_BARRIER)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Broadcast
    // -------------------------------------------------------------------------

    /// Broadcast a fixed-size `u32` array from `root` into `data` on every
    /// member.
    pub fn broadcast_u32_array(&self, root: usize, data: &mut [u32]) -> CommResult<()> {
        let Some(my) = self.rank() else { return Ok(()) };
        if my == root {
            for r in (0..self.size()).filter(|&r| r != root) {
                self.send(r, CTRL_BCAST, Payload::U32(data.to_vec()))?;
            }
        } else {
            let v = self.recv(root, CTRL_BCAST)?.into_u32()?;
            data.copy_from_slice(&v);
        }
        Ok(())
    }

    /// Broadcast a fixed-size `f32` array from `root`.
    pub fn broadcast_f32_array(&self, root: usize, data: &mut [f32]) -> CommResult<()> {
        let Some(my) = self.rank() else { return Ok(()) };
        if my == root {
            for r in (0..self.size()).filter(|&r| r != root) {
                self.send(r, CTRL_BCAST, Payload::F32(data.to_vec()))?;
            }
        } else {
            let v = self.recv(root, CTRL_BCAST)?.into_f32()?;
            data.copy_from_slice(&v);
        }
        Ok(())
    }

    /// Broadcast a scalar from `root`; every member returns the root's value.
    pub fn broadcast_u32(&self, root: usize, value: u32) -> CommResult<u32> {
        let mut buf = [value];
        self.broadcast_u32_array(root, &mut buf)?;
        Ok(buf[0])
    }

    /// Broadcast a scalar `f32` from `root`.
    pub fn broadcast_f32(&self, root: usize, value: f32) -> CommResult<f32> {
        let mut buf = [value];
        self.broadcast_f32_array(root, &mut buf)?;
        Ok(buf[0])
    }

    /// Variable-length broadcast: the length goes first, then the payload.
    /// Zero-length payloads skip the payload transfer entirely.
    pub fn broadcast_bytes(&self, root: usize, data: Vec<u8>) -> CommResult<Vec<u8>> {
        let Some(my) = self.rank() else { return Ok(data) };
        if my == root {
            let len = data.len() as u32;
            for r in (0..self.size()).filter(|&r| r != root) {
                self.send(r, CTRL_BCAST_LEN, Payload::U32(vec![len]))?;
                if len > 0 {
                    self.send(r, CTRL_BCAST, Payload::U8(data.clone()))?;
                }
            }
            Ok(data)
        } else {
            let len = self.recv(root, CTRL_BCAST_LEN)?.into_u32()?[0];
            if len == 0 {
                Ok(Vec::new())
            } else {
                self.recv(root, CTRL_BCAST)?.into_u8()
            }
        }
    }

    /// Variable-length string broadcast over [`broadcast_bytes`].
    ///
    /// [`broadcast_bytes`]: ParallelContext::broadcast_bytes
    pub fn broadcast_string(&self, root: usize, value: String) -> CommResult<String> {
        let bytes = self.broadcast_bytes(root, value.into_bytes())?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    // -------------------------------------------------------------------------
    // Reductions
    // -------------------------------------------------------------------------

    fn reduce_u32(&self, data: &mut [u32], op: fn(u32, u32) -> u32) -> CommResult<bool> {
        let Some(my) = self.rank() else { return Ok(false) };
        if my == 0 {
            for r in 1..self.size() {
                let v = self.recv(r, CTRL_REDUCE)?.into_u32()?;
                for (d, x) in data.iter_mut().zip(v) {
                    *d = op(*d, x);
                }
            }
            Ok(true)
        } else {
            self.send(0, CTRL_REDUCE, Payload::U32(data.to_vec()))?;
            Ok(false)
        }
    }

    fn reduce_f32(&self, data: &mut [f32], op: fn(f32, f32) -> f32) -> CommResult<bool> {
        let Some(my) = self.rank() else { return Ok(false) };
        if my == 0 {
            for r in 1..self.size() {
                let v = self.recv(r, CTRL_REDUCE)?.into_f32()?;
                for (d, x) in data.iter_mut().zip(v) {
                    *d = op(*d, x);
                }
            }
            Ok(true)
        } else {
            self.send(0, CTRL_REDUCE, Payload::F32(data.to_vec()))?;
            Ok(false)
        }
    }

    fn allreduce_u32(&self, data: &mut [u32], op: fn(u32, u32) -> u32) -> CommResult<()> {
        self.reduce_u32(data, op)?;
        self.broadcast_u32_array(0, data)
    }

    fn allreduce_f32(&self, data: &mut [f32], op: fn(f32, f32) -> f32) -> CommResult<()> {
        self.reduce_f32(data, op)?;
        self.broadcast_f32_array(0, data)
    }

    /// Element-wise sum across all members; every member gets the result.
    pub fn sum_array_f32(&self, data: &mut [f32]) -> CommResult<()> {
        self.allreduce_f32(data, |a, b| a + b)
    }

    /// Element-wise sum across all members.
    pub fn sum_array_u32(&self, data: &mut [u32]) -> CommResult<()> {
        self.allreduce_u32(data, u32::wrapping_add)
    }

    /// Element-wise minimum across all members.
    pub fn unify_min_array_f32(&self, data: &mut [f32]) -> CommResult<()> {
        self.allreduce_f32(data, f32::min)
    }

    /// Element-wise maximum across all members.
    pub fn unify_max_array_f32(&self, data: &mut [f32]) -> CommResult<()> {
        self.allreduce_f32(data, f32::max)
    }

    /// Element-wise maximum across all members.
    pub fn unify_max_array_u32(&self, data: &mut [u32]) -> CommResult<()> {
        self.allreduce_u32(data, |a, b| a.max(b))
    }

    /// Sum-reduce to the root only. Returns whether this process is the
    /// root (and therefore holds the reduced result).
    pub fn collect_sum_u32(&self, data: &mut [u32]) -> CommResult<bool> {
        self.reduce_u32(data, u32::wrapping_add)
    }

    /// Sum-reduce to the root only; returns "am I root".
    pub fn collect_sum_f32(&self, data: &mut [f32]) -> CommResult<bool> {
        self.reduce_f32(data, |a, b| a + b)
    }

    // -------------------------------------------------------------------------
    // All-to-all
    // -------------------------------------------------------------------------

    /// All-to-all exchange of fixed-size `u32` records:
    /// `send[r*per_rank..(r+1)*per_rank]` goes to rank `r`; the result holds
    /// the records received from each rank at the same layout. The self
    /// slice is copied locally, not sent.
    pub fn alltoall_u32(&self, send: &[u32], per_rank: usize) -> CommResult<Vec<u32>> {
        let Some(my) = self.rank() else { return Ok(Vec::new()) };
        let size = self.size();
        debug_assert_eq!(send.len(), per_rank * size);

        let mut out = vec![0u32; per_rank * size];
        out[my * per_rank..(my + 1) * per_rank]
            .copy_from_slice(&send[my * per_rank..(my + 1) * per_rank]);

        let mut pending = Vec::new();
        for r in (0..size).filter(|&r| r != my) {
            let slice = send[r * per_rank..(r + 1) * per_rank].to_vec();
            pending.push(self.isend(r, CTRL_ALLTOALL, Payload::U32(slice))?);
        }
        for r in (0..size).filter(|&r| r != my) {
            let v = self.recv(r, CTRL_ALLTOALL)?.into_u32()?;
            out[r * per_rank..(r + 1) * per_rank].copy_from_slice(&v);
        }
        self.wait_all_sends(pending)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::super::group::ParallelContext;

    #[test]
    fn test_alltoall_returns_the_assembled_records() {
        // The degenerate one-rank exchange still hands back the self slice.
        let world = ParallelContext::local_world(1).pop().unwrap();
        let got = world.alltoall_u32(&[7, 11, 13], 3).unwrap();
        assert_eq!(got, vec![7, 11, 13]);
    }
}
