//! Distributed site directory: who owns any fluid site in the universe, and
//! at which local contiguous index.
//!
//! The directory is a windowed distributed array over the occupied blocks.
//! Shards are partitioned across ranks by contiguous leaf-index ranges, so
//! every worker derives the storage rank and offset of any entry from the
//! block store alone. Entries are written during the publish epoch (each
//! worker announces its own fluid sites, remote writes routed with a
//! two-stage size/payload exchange) and are immutable once the window
//! opens. Remote reads fetch the owning peer's shard once and cache it for
//! the life of the directory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::comm::communicator::tags;
use crate::comm::{Communicator, RmaWindow, Wait};
use crate::error::DomainError;
use crate::geometry::{BlockStore, SOLID_RANK};

/// One directory entry: owner rank and local contiguous fluid-site index.
///
/// The explicit tail field keeps the layout free of implicit padding so the
/// struct can be cast for the wire.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct SiteRankIndex {
    index: i64,
    rank: i32,
    pad: i32,
}

impl SiteRankIndex {
    /// Entry stored for solid sites and never-written slots.
    pub const SOLID: SiteRankIndex = SiteRankIndex {
        index: -1,
        rank: SOLID_RANK,
        pad: 0,
    };

    /// Entry naming `rank` as owner at local contiguous `index`.
    #[inline]
    pub fn new(rank: i32, index: i64) -> Self {
        SiteRankIndex {
            index,
            rank,
            pad: 0,
        }
    }

    /// Owner rank, or [`SOLID_RANK`].
    #[inline]
    pub fn rank(&self) -> i32 {
        self.rank
    }

    /// Local contiguous fluid-site index on the owner, `-1` for solid.
    #[inline]
    pub fn index(&self) -> i64 {
        self.index
    }

    /// True for the solid sentinel.
    #[inline]
    pub fn is_solid(&self) -> bool {
        self.rank == SOLID_RANK
    }
}

/// Wire record routing one entry to its storage rank.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
struct DirectoryPut {
    leaf: u64,
    site: u64,
    entry: SiteRankIndex,
}

/// Contiguous split of `count` leaves over `size` ranks.
fn leaf_starts(count: usize, size: usize) -> Vec<usize> {
    (0..=size).map(|r| count * r / size).collect()
}

fn storage_rank(starts: &[usize], leaf: usize) -> usize {
    starts.partition_point(|&s| s <= leaf) - 1
}

/// Accumulates directory entries during the publish epoch.
pub struct DirectoryBuilder {
    rank: usize,
    sites_per_block: usize,
    starts: Vec<usize>,
    local: Vec<SiteRankIndex>,
    outgoing: HashMap<usize, Vec<DirectoryPut>>,
}

impl DirectoryBuilder {
    /// Start a publish epoch over the occupied blocks of `store`.
    pub fn new(store: &BlockStore, sites_per_block: usize, rank: usize, size: usize) -> Self {
        let starts = leaf_starts(store.block_count(), size);
        let local_len = (starts[rank + 1] - starts[rank]) * sites_per_block;
        DirectoryBuilder {
            rank,
            sites_per_block,
            starts,
            local: vec![SiteRankIndex::SOLID; local_len],
            outgoing: HashMap::new(),
        }
    }

    /// Record the entry for `(leaf, site_id)`; remote-stored entries are
    /// routed when the epoch closes.
    pub fn put(&mut self, leaf: usize, site_id: usize, entry: SiteRankIndex) {
        debug_assert!(site_id < self.sites_per_block);
        let target = storage_rank(&self.starts, leaf);
        if target == self.rank {
            let off = (leaf - self.starts[target]) * self.sites_per_block + site_id;
            self.local[off] = entry;
        } else {
            self.outgoing.entry(target).or_default().push(DirectoryPut {
                leaf: leaf as u64,
                site: site_id as u64,
                entry,
            });
        }
    }

    /// Close the epoch: route remote puts, apply received ones, open the
    /// read-only window.
    pub fn finalise<C: Communicator>(
        mut self,
        comm: &C,
    ) -> Result<SiteDirectory<C::Window>, DomainError> {
        let me = comm.rank();
        let n = comm.size();
        if n > 1 {
            // Stage 1: exchange put counts with every peer.
            let mut size_recvs = Vec::with_capacity(n - 1);
            for peer in (0..n).filter(|&p| p != me) {
                let mut buf = [0u8; 8];
                size_recvs.push((peer, comm.irecv(peer, tags::DIRECTORY.sizes.get(), &mut buf)));
            }
            let mut size_sends = Vec::with_capacity(n - 1);
            for peer in (0..n).filter(|&p| p != me) {
                let count = self.outgoing.get(&peer).map_or(0, Vec::len) as u64;
                size_sends.push(comm.isend(peer, tags::DIRECTORY.sizes.get(), &count.to_le_bytes()));
            }
            let mut incoming_counts = HashMap::new();
            for (peer, h) in size_recvs {
                let data = h.wait().ok_or(DomainError::Transport {
                    op: "directory sizes",
                    peer,
                })?;
                let arr: [u8; 8] = data.as_slice().try_into().map_err(|_| DomainError::Transport {
                    op: "directory sizes",
                    peer,
                })?;
                incoming_counts.insert(peer, u64::from_le_bytes(arr) as usize);
            }
            for s in size_sends {
                s.wait();
            }

            // Stage 2: exchange the puts themselves.
            let record = std::mem::size_of::<DirectoryPut>();
            let mut data_recvs = Vec::new();
            for peer in (0..n).filter(|&p| p != me) {
                let count = incoming_counts[&peer];
                if count == 0 {
                    continue;
                }
                let mut buf = vec![0u8; count * record];
                data_recvs.push((peer, count, comm.irecv(peer, tags::DIRECTORY.data.get(), &mut buf)));
            }
            let mut data_sends = Vec::new();
            for peer in (0..n).filter(|&p| p != me) {
                if let Some(puts) = self.outgoing.get(&peer) {
                    if !puts.is_empty() {
                        data_sends.push(comm.isend(
                            peer,
                            tags::DIRECTORY.data.get(),
                            bytemuck::cast_slice(puts),
                        ));
                    }
                }
            }
            for (peer, count, h) in data_recvs {
                let data = h.wait().ok_or(DomainError::Transport {
                    op: "directory puts",
                    peer,
                })?;
                if data.len() != count * record {
                    return Err(DomainError::Transport {
                        op: "directory puts",
                        peer,
                    });
                }
                let puts: Vec<DirectoryPut> = bytemuck::pod_collect_to_vec(&data);
                for put in puts {
                    let leaf = put.leaf as usize;
                    let miss = DomainError::DirectoryMiss {
                        rank: me,
                        peer,
                        leaf,
                    };
                    if put.site as usize >= self.sites_per_block
                        || storage_rank(&self.starts, leaf) != me
                    {
                        return Err(miss);
                    }
                    let off =
                        (leaf - self.starts[me]) * self.sites_per_block + put.site as usize;
                    *self.local.get_mut(off).ok_or(miss)? = put.entry;
                }
            }
            for s in data_sends {
                s.wait();
            }
        }

        let bytes = bytemuck::cast_slice(&self.local).to_vec();
        let window = comm.open_window(bytes)?;
        Ok(SiteDirectory {
            rank: me,
            sites_per_block: self.sites_per_block,
            starts: self.starts,
            local: self.local,
            window,
            cache: RefCell::new(HashMap::new()),
        })
    }
}

/// Read-only handle on the published directory.
pub struct SiteDirectory<W: RmaWindow> {
    rank: usize,
    sites_per_block: usize,
    starts: Vec<usize>,
    local: Vec<SiteRankIndex>,
    window: W,
    cache: RefCell<HashMap<usize, Arc<Vec<SiteRankIndex>>>>,
}

impl<W: RmaWindow> SiteDirectory<W> {
    /// Owner and local index of `(leaf, site_id)`.
    ///
    /// Slots never written during the publish epoch read as
    /// [`SiteRankIndex::SOLID`].
    pub fn get(&self, leaf: usize, site_id: usize) -> Result<SiteRankIndex, DomainError> {
        debug_assert!(site_id < self.sites_per_block);
        let target = storage_rank(&self.starts, leaf);
        let off = (leaf - self.starts[target]) * self.sites_per_block + site_id;
        if target == self.rank {
            return self
                .local
                .get(off)
                .copied()
                .ok_or(DomainError::DirectoryMiss {
                    rank: self.rank,
                    peer: target,
                    leaf,
                });
        }
        let shard = self.fetch(target)?;
        shard.get(off).copied().ok_or(DomainError::DirectoryMiss {
            rank: self.rank,
            peer: target,
            leaf,
        })
    }

    /// Fetch and cache `peer`'s whole shard; later lookups against the same
    /// peer never touch the window again.
    fn fetch(&self, peer: usize) -> Result<Arc<Vec<SiteRankIndex>>, DomainError> {
        if let Some(shard) = self.cache.borrow().get(&peer) {
            return Ok(shard.clone());
        }
        let len = self.window.shard_len(peer)?;
        let mut bytes = vec![0u8; len];
        self.window.read(peer, 0, &mut bytes)?;
        let shard = Arc::new(bytemuck::pod_collect_to_vec::<u8, SiteRankIndex>(&bytes));
        self.cache.borrow_mut().insert(peer, shard.clone());
        Ok(shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::NoComm;
    use glam::U16Vec3;

    fn store() -> BlockStore {
        BlockStore::new(
            U16Vec3::new(2, 1, 1),
            [U16Vec3::new(0, 0, 0), U16Vec3::new(1, 0, 0)],
        )
    }

    #[test]
    fn unwritten_slots_read_solid() {
        let builder = DirectoryBuilder::new(&store(), 8, 0, 1);
        let dir = builder.finalise(&NoComm).unwrap();
        assert_eq!(dir.get(0, 0).unwrap(), SiteRankIndex::SOLID);
        assert_eq!(dir.get(1, 7).unwrap(), SiteRankIndex::SOLID);
    }

    #[test]
    fn put_then_get_round_trip() {
        let mut builder = DirectoryBuilder::new(&store(), 8, 0, 1);
        builder.put(1, 3, SiteRankIndex::new(0, 42));
        let dir = builder.finalise(&NoComm).unwrap();
        let entry = dir.get(1, 3).unwrap();
        assert_eq!(entry.rank(), 0);
        assert_eq!(entry.index(), 42);
        assert!(!entry.is_solid());
    }

    #[test]
    fn leaf_partition_covers_all_leaves() {
        let starts = leaf_starts(7, 3);
        assert_eq!(starts, vec![0, 2, 4, 7]);
        for leaf in 0..7 {
            let r = storage_rank(&starts, leaf);
            assert!(starts[r] <= leaf && leaf < starts[r + 1]);
        }
    }

    #[test]
    fn entry_layout_is_pod_safe() {
        assert_eq!(std::mem::size_of::<SiteRankIndex>(), 16);
        assert_eq!(std::mem::size_of::<DirectoryPut>(), 32);
    }
}
