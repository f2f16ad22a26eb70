//! One-sided, read-only windows over per-rank byte shards.
//!
//! A window is opened collectively: every rank contributes its shard, and
//! afterwards any rank may read any other rank's bytes without the owner
//! taking part (passive-target access). Shards are immutable for the life
//! of the window; all mutation happens before the collective open.

use crate::error::DomainError;

/// Read access to the byte shards published by a collective window open.
pub trait RmaWindow: Send + Sync + 'static {
    /// This rank's own shard.
    fn local(&self) -> &[u8];

    /// Byte length of `rank`'s shard.
    fn shard_len(&self, rank: usize) -> Result<usize, DomainError>;

    /// Copy `out.len()` bytes of `rank`'s shard starting at `offset`.
    fn read(&self, rank: usize, offset: usize, out: &mut [u8]) -> Result<(), DomainError>;
}

/// Window of a single-process world: the local shard is the whole universe.
#[derive(Debug)]
pub struct LocalWindow {
    shard: Vec<u8>,
}

impl LocalWindow {
    pub(crate) fn new(shard: Vec<u8>) -> Self {
        LocalWindow { shard }
    }
}

impl RmaWindow for LocalWindow {
    fn local(&self) -> &[u8] {
        &self.shard
    }

    fn shard_len(&self, rank: usize) -> Result<usize, DomainError> {
        if rank != 0 {
            return Err(DomainError::Transport {
                op: "window shard_len",
                peer: rank,
            });
        }
        Ok(self.shard.len())
    }

    fn read(&self, rank: usize, offset: usize, out: &mut [u8]) -> Result<(), DomainError> {
        if rank != 0 || offset + out.len() > self.shard.len() {
            return Err(DomainError::Transport {
                op: "window read",
                peer: rank,
            });
        }
        out.copy_from_slice(&self.shard[offset..offset + out.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_window_reads_own_shard() {
        let w = LocalWindow::new(vec![1, 2, 3, 4]);
        assert_eq!(w.local(), &[1, 2, 3, 4]);
        assert_eq!(w.shard_len(0).unwrap(), 4);
        let mut out = [0u8; 2];
        w.read(0, 1, &mut out).unwrap();
        assert_eq!(out, [2, 3]);
    }

    #[test]
    fn local_window_rejects_peers_and_overruns() {
        let w = LocalWindow::new(vec![0; 4]);
        assert!(w.shard_len(1).is_err());
        let mut out = [0u8; 8];
        assert!(w.read(0, 0, &mut out).is_err());
    }
}
