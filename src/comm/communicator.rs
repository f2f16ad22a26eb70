//! The communicator trait and the serial backend.
//!
//! Wire format conventions (for higher-level protocols):
//! - All integers are LE fixed width (u16 tags, i64 counts and coordinates).
//! - Structs are `#[repr(C)]` and `bytemuck::Pod`-safe; no `#[repr(packed)]`.
//! - The buffer passed to `irecv` is a length template only; received bytes
//!   are returned by `Wait::wait` and may be truncated to that length.

use bytemuck::cast_slice;

use crate::comm::window::RmaWindow;
use crate::error::DomainError;

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Elementwise reduction applied by [`Communicator::all_reduce_i64`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ReduceOp {
    /// Componentwise minimum.
    Min,
    /// Componentwise maximum.
    Max,
    /// Componentwise sum.
    Sum,
}

impl ReduceOp {
    #[inline]
    fn apply(self, a: i64, b: i64) -> i64 {
        match self {
            ReduceOp::Min => a.min(b),
            ReduceOp::Max => a.max(b),
            ReduceOp::Sum => a + b,
        }
    }
}

/// Non-blocking communication interface for the bulk-synchronous worker
/// model: point-to-point messages, the few collectives domain construction
/// needs, and collective window opens for one-sided reads.
///
/// The provided collective implementations run over `isend`/`irecv` and are
/// correct for any backend with per-pair FIFO ordering; backends with native
/// collectives override them.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;
    /// Handle for one-sided reads after a collective window open.
    type Window: RmaWindow;

    /// Post a non-blocking send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a non-blocking receive from `peer`; `buf` only fixes the length.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this process (`0..size`).
    fn rank(&self) -> usize;
    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Synchronization barrier (no-op for serial backends).
    fn barrier(&self) {}

    /// Collectively publish `shard` and return one-sided read access to
    /// every rank's shard.
    fn open_window(&self, shard: Vec<u8>) -> Result<Self::Window, DomainError>;

    /// Gather one `i64` from every rank, in rank order.
    fn all_gather_i64(&self, value: i64) -> Result<Vec<i64>, DomainError> {
        let me = self.rank();
        let n = self.size();
        let mut out = vec![0i64; n];
        out[me] = value;
        if n == 1 {
            return Ok(out);
        }
        let mut recvs = Vec::with_capacity(n - 1);
        for peer in (0..n).filter(|&p| p != me) {
            let mut buf = [0u8; 8];
            recvs.push((peer, self.irecv(peer, tags::ALL_GATHER.get(), &mut buf)));
        }
        let bytes = value.to_le_bytes();
        let mut sends = Vec::with_capacity(n - 1);
        for peer in (0..n).filter(|&p| p != me) {
            sends.push(self.isend(peer, tags::ALL_GATHER.get(), &bytes));
        }
        for (peer, h) in recvs {
            let data = h.wait().ok_or(DomainError::Transport {
                op: "all_gather",
                peer,
            })?;
            let arr: [u8; 8] = data.as_slice().try_into().map_err(|_| DomainError::Transport {
                op: "all_gather",
                peer,
            })?;
            out[peer] = i64::from_le_bytes(arr);
        }
        for s in sends {
            s.wait();
        }
        Ok(out)
    }

    /// Reduce `values` elementwise across all ranks, in place.
    fn all_reduce_i64(&self, values: &mut [i64], op: ReduceOp) -> Result<(), DomainError> {
        let me = self.rank();
        let n = self.size();
        if n == 1 {
            return Ok(());
        }
        let byte_len = values.len() * std::mem::size_of::<i64>();
        let mut recvs = Vec::with_capacity(n - 1);
        for peer in (0..n).filter(|&p| p != me) {
            let mut buf = vec![0u8; byte_len];
            recvs.push((peer, self.irecv(peer, tags::ALL_REDUCE.get(), &mut buf)));
        }
        let bytes: Vec<u8> = cast_slice(values).to_vec();
        let mut sends = Vec::with_capacity(n - 1);
        for peer in (0..n).filter(|&p| p != me) {
            sends.push(self.isend(peer, tags::ALL_REDUCE.get(), &bytes));
        }
        for (peer, h) in recvs {
            let data = h.wait().ok_or(DomainError::Transport {
                op: "all_reduce",
                peer,
            })?;
            if data.len() != byte_len {
                return Err(DomainError::Transport {
                    op: "all_reduce",
                    peer,
                });
            }
            for (v, chunk) in values.iter_mut().zip(data.chunks_exact(8)) {
                let t = i64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes"));
                *v = op.apply(*v, t);
            }
        }
        for s in sends {
            s.wait();
        }
        Ok(())
    }
}

/// Tag newtype for safer tag arithmetic.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct CommTag(u16);

impl CommTag {
    /// Create a new tag from a raw `u16`.
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    /// Return the underlying `u16` value.
    #[inline]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Safely offset the tag by `dx`, wrapping on overflow.
    #[inline]
    pub const fn offset(self, dx: u16) -> Self {
        Self(self.0.wrapping_add(dx))
    }
}

impl From<u16> for CommTag {
    #[inline]
    fn from(x: u16) -> Self {
        CommTag::new(x)
    }
}

/// Convenience bundle of tags for a two-stage (sizes, then payload)
/// exchange.
#[derive(Copy, Clone, Debug)]
pub struct ExchangeTags {
    /// Tag used during the size-exchange stage.
    pub sizes: CommTag,
    /// Tag used during the payload stage.
    pub data: CommTag,
}

impl ExchangeTags {
    /// Construct tags from a base, assigning deterministic offsets per stage.
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            sizes: base,
            data: base.offset(1),
        }
    }
}

/// Reserved tags for the domain-construction protocols.
pub mod tags {
    use super::{CommTag, ExchangeTags};

    /// Collective gather of per-rank scalars.
    pub const ALL_GATHER: CommTag = CommTag::new(0x0C01);
    /// Collective elementwise reduction.
    pub const ALL_REDUCE: CommTag = CommTag::new(0x0C02);
    /// Directory put routing during the publish epoch.
    pub const DIRECTORY: ExchangeTags = ExchangeTags::from_base(CommTag::new(0x0D00));
    /// Shared-link descriptor pairing during topology build.
    pub const LINKS: ExchangeTags = ExchangeTags::from_base(CommTag::new(0x0E00));
    /// Per-tick shared-distribution exchange.
    pub const STREAM: CommTag = CommTag::new(0x0500);
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();
    type Window = crate::comm::window::LocalWindow;

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn open_window(&self, shard: Vec<u8>) -> Result<Self::Window, DomainError> {
        Ok(crate::comm::window::LocalWindow::new(shard))
    }
}
