//! The per-worker fluid-site catalogue and exchange topology.
//!
//! A [`Domain`] is built once from a
//! [`GeometryReadResult`](crate::geometry::GeometryReadResult) and a lattice
//! descriptor and is structurally immutable afterwards: the catalogue
//! arrays, the neighbour-index table and the per-peer exchange plans are
//! read-only inputs to the streaming step, while the distribution values
//! themselves live in [`crate::streaming::DistributionBuffers`].
//!
//! # Catalogue ordering
//!
//! Locally-owned fluid sites are numbered contiguously in the fixed order
//! `[mid-domain buckets 0..5 | domain-edge buckets 0..5]`; a mid-domain
//! site is one whose every non-rest link lands on this worker or on solid,
//! a domain-edge site has at least one link to a remotely-owned fluid site.

mod build;
mod neighbour;

pub use neighbour::NeighbouringProcessor;
pub(crate) use neighbour::LinkAdvert;

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use glam::{I64Vec3, U16Vec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::comm::{Communicator, RmaWindow};
use crate::directory::{SiteDirectory, SiteRankIndex};
use crate::error::DomainError;
use crate::geometry::{BlockStore, CollisionBucket, SiteData, COLLISION_TYPES};
use crate::lattice::{Direction, LatticeDescriptor};

/// Per-block site ownership and contiguous-index tables.
///
/// A block is *empty* until the classification pass touches it; empty
/// blocks carry no storage.
#[derive(Debug, Clone, Default)]
pub(crate) struct Block {
    ranks: Vec<i32>,
    indices: Vec<i64>,
}

impl Block {
    pub(crate) fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Allocate the per-site tables on first touch.
    pub(crate) fn ensure(&mut self, sites_per_block: usize) {
        if self.is_empty() {
            self.ranks = vec![crate::geometry::SOLID_RANK; sites_per_block];
            self.indices = vec![-1; sites_per_block];
        }
    }

    pub(crate) fn set_rank(&mut self, site_id: usize, rank: i32) {
        self.ranks[site_id] = rank;
    }

    pub(crate) fn rank_for_site(&self, site_id: usize) -> i32 {
        self.ranks[site_id]
    }

    pub(crate) fn set_local_index(&mut self, site_id: usize, index: i64) {
        self.indices[site_id] = index;
    }

    pub(crate) fn local_index_for_site(&self, site_id: usize) -> i64 {
        self.indices[site_id]
    }
}

/// Serializable construction summary, for the run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainReport {
    /// Fluid sites in the whole universe.
    pub total_fluid_sites: i64,
    /// Blocks in the universe grid (occupied or not).
    pub block_count: i64,
    /// Site slots per block.
    pub sites_per_block: i64,
    /// Fluid sites held by each rank, in rank order.
    pub fluid_sites_on_each_rank: Vec<i64>,
}

/// The per-worker catalogue of fluid sites plus the cross-worker streaming
/// link tables. See the module docs for the ordering invariant.
pub struct Domain<C: Communicator> {
    pub(crate) lattice: &'static LatticeDescriptor,
    pub(crate) comm: Arc<C>,

    // Universe shape.
    pub(crate) block_size: u16,
    pub(crate) site_dimensions: I64Vec3,
    pub(crate) sites_per_block: usize,
    pub(crate) universe_block_count: i64,

    // Spatial index and ownership tables.
    pub(crate) store: BlockStore,
    pub(crate) blocks: Vec<Block>,
    pub(crate) directory: SiteDirectory<C::Window>,

    // Catalogue arrays, indexed by local contiguous fluid-site index.
    pub(crate) site_data: Vec<SiteData>,
    pub(crate) wall_normals: Vec<Vec3>,
    pub(crate) distance_to_wall: Vec<f32>,
    pub(crate) global_site_coords: Vec<I64Vec3>,

    // Collision-type census.
    pub(crate) mid_domain_counts: [i64; COLLISION_TYPES],
    pub(crate) domain_edge_counts: [i64; COLLISION_TYPES],
    pub(crate) local_fluid_count: i64,

    // Global census.
    pub(crate) fluid_sites_on_each_rank: Vec<i64>,
    pub(crate) total_fluid_sites: i64,
    pub(crate) global_site_min: I64Vec3,
    pub(crate) global_site_max: I64Vec3,

    // Exchange topology.
    pub(crate) total_shared: i64,
    pub(crate) neighbouring_procs: Vec<NeighbouringProcessor>,
    pub(crate) neighbour_indices: Vec<i64>,
    pub(crate) streaming_indices_for_received: Vec<i64>,

    // One-sided view of every rank's collision census.
    pub(crate) counts_window: C::Window,
    pub(crate) counts_cache: RefCell<HashMap<usize, [i64; 2 * COLLISION_TYPES]>>,
}

impl<C: Communicator> Domain<C> {
    /// The lattice this domain was decomposed for.
    #[inline]
    pub fn lattice(&self) -> &'static LatticeDescriptor {
        self.lattice
    }

    /// Number of discrete velocities.
    #[inline]
    pub fn num_vectors(&self) -> usize {
        self.lattice.num_vectors()
    }

    /// Rank of this worker.
    #[inline]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    /// Fluid sites owned by this worker.
    #[inline]
    pub fn local_fluid_site_count(&self) -> i64 {
        self.local_fluid_count
    }

    /// Fluid sites in the whole universe.
    #[inline]
    pub fn total_fluid_sites(&self) -> i64 {
        self.total_fluid_sites
    }

    /// Fluid sites held by each rank, in rank order.
    #[inline]
    pub fn fluid_sites_on_each_rank(&self) -> &[i64] {
        &self.fluid_sites_on_each_rank
    }

    /// Componentwise minimum of all fluid-site coordinates in the universe.
    #[inline]
    pub fn global_site_min(&self) -> I64Vec3 {
        self.global_site_min
    }

    /// Componentwise maximum of all fluid-site coordinates in the universe.
    #[inline]
    pub fn global_site_max(&self) -> I64Vec3 {
        self.global_site_max
    }

    /// Classification record of local fluid site `i`.
    #[inline]
    pub fn site_data(&self, i: i64) -> &SiteData {
        &self.site_data[i as usize]
    }

    /// Wall normal at local fluid site `i`; the sentinel
    /// [`crate::geometry::NO_WALL_NORMAL`] when none was sampled.
    #[inline]
    pub fn wall_normal_at_site(&self, i: i64) -> Vec3 {
        self.wall_normals[i as usize]
    }

    /// Wall-cut distance of site `i` along non-rest direction `q`, as a
    /// fraction of the lattice vector.
    #[inline]
    pub fn distance_to_wall(&self, i: i64, q: Direction) -> f32 {
        debug_assert!(q >= 1);
        self.distance_to_wall[i as usize * (self.num_vectors() - 1) + q - 1]
    }

    /// Global coordinate of local fluid site `i`.
    #[inline]
    pub fn global_site_coords(&self, i: i64) -> I64Vec3 {
        self.global_site_coords[i as usize]
    }

    /// All global coordinates, indexed by local contiguous index.
    #[inline]
    pub fn global_site_coords_slice(&self) -> &[I64Vec3] {
        &self.global_site_coords
    }

    /// Mid-domain sites in collision bucket `l`.
    #[inline]
    pub fn mid_domain_collision_count(&self, l: usize) -> i64 {
        self.mid_domain_counts[l]
    }

    /// Domain-edge sites in collision bucket `l`.
    #[inline]
    pub fn domain_edge_collision_count(&self, l: usize) -> i64 {
        self.domain_edge_counts[l]
    }

    /// Total mid-domain sites.
    pub fn mid_domain_site_count(&self) -> i64 {
        self.mid_domain_counts.iter().sum()
    }

    /// Total domain-edge sites.
    pub fn domain_edge_site_count(&self) -> i64 {
        self.domain_edge_counts.iter().sum()
    }

    /// Distributions crossing to other workers each tick.
    #[inline]
    pub fn total_shared_distributions(&self) -> i64 {
        self.total_shared
    }

    /// Peers sharing distributions with this worker, in discovery order.
    #[inline]
    pub fn neighbouring_procs(&self) -> &[NeighbouringProcessor] {
        &self.neighbouring_procs
    }

    /// The flat streaming target table, `num_vectors()` entries per site.
    #[inline]
    pub fn neighbour_indices(&self) -> &[i64] {
        &self.neighbour_indices
    }

    /// Streaming target of site `s` along direction `q`.
    #[inline]
    pub fn neighbour_index(&self, s: i64, q: Direction) -> i64 {
        self.neighbour_indices[s as usize * self.num_vectors() + q]
    }

    /// Receiver-side slots for the shared distributions, in peer-slot order.
    #[inline]
    pub fn streaming_indices_for_received_distributions(&self) -> &[i64] {
        &self.streaming_indices_for_received
    }

    /// The sacrificial slot that absorbs writes to solid and out-of-universe
    /// neighbours.
    #[inline]
    pub fn rubbish_slot(&self) -> i64 {
        self.local_fluid_count * self.num_vectors() as i64
    }

    /// Required length of each distribution buffer.
    #[inline]
    pub fn distribution_buffer_len(&self) -> usize {
        (self.local_fluid_count * self.num_vectors() as i64 + 1 + self.total_shared) as usize
    }

    /// True if `coords` names a site inside the universe bounding box.
    #[inline]
    pub fn is_valid_lattice_site(&self, coords: I64Vec3) -> bool {
        coords.x >= 0
            && coords.y >= 0
            && coords.z >= 0
            && coords.x < self.site_dimensions.x
            && coords.y < self.site_dimensions.y
            && coords.z < self.site_dimensions.z
    }

    /// Split a global site coordinate into block and block-local coordinates.
    #[inline]
    pub fn split_coords(&self, global: I64Vec3) -> (U16Vec3, U16Vec3) {
        let b = self.block_size as i64;
        let block = global / b;
        let local = global % b;
        (
            U16Vec3::new(block.x as u16, block.y as u16, block.z as u16),
            U16Vec3::new(local.x as u16, local.y as u16, local.z as u16),
        )
    }

    /// Index of a site within its block, from block-local coordinates.
    #[inline]
    pub(crate) fn site_index(&self, local: U16Vec3) -> usize {
        let b = self.block_size as usize;
        (local.x as usize * b + local.y as usize) * b + local.z as usize
    }

    /// Block-local coordinates of a site from its index within the block.
    #[inline]
    pub(crate) fn site_coords(&self, site_id: usize) -> I64Vec3 {
        let b = self.block_size as usize;
        I64Vec3::new(
            (site_id / (b * b)) as i64,
            ((site_id / b) % b) as i64,
            (site_id % b) as i64,
        )
    }

    /// Owner and local index of the site at a global coordinate.
    ///
    /// Out-of-universe coordinates and wholly-solid blocks normalise to
    /// [`SiteRankIndex::SOLID`]; this is the distributed directory read.
    pub fn rank_index_from_global_coords(
        &self,
        global: I64Vec3,
    ) -> Result<SiteRankIndex, DomainError> {
        if !self.is_valid_lattice_site(global) {
            return Ok(SiteRankIndex::SOLID);
        }
        let (block, local) = self.split_coords(global);
        match self.store.get_leaf(block) {
            Err(_) | Ok(None) => Ok(SiteRankIndex::SOLID),
            Ok(Some(leaf)) => self.directory.get(leaf.index(), self.site_index(local)),
        }
    }

    /// Owner rank of the site at a global coordinate.
    pub fn proc_id_from_global_coords(&self, global: I64Vec3) -> Result<i32, DomainError> {
        Ok(self.rank_index_from_global_coords(global)?.rank())
    }

    /// Local contiguous index of the locally-owned fluid site at `global`,
    /// or `None` if the coordinate is not a fluid site of this worker.
    pub fn local_contiguous_id(&self, global: I64Vec3) -> Option<i64> {
        if !self.is_valid_lattice_site(global) {
            return None;
        }
        let (block_coords, local) = self.split_coords(global);
        let leaf = self.store.get_leaf(block_coords).ok()??;
        let block = &self.blocks[leaf.index()];
        if block.is_empty() {
            return None;
        }
        let site_id = self.site_index(local);
        if block.rank_for_site(site_id) != self.comm.rank() as i32 {
            return None;
        }
        let idx = block.local_index_for_site(site_id);
        (idx >= 0).then_some(idx)
    }

    /// Whether local site `idx` on `rank` is a domain-edge site, answered
    /// from the one-sided collision census without contacting `rank`.
    pub fn is_domain_edge(&self, rank: usize, idx: i64) -> Result<bool, DomainError> {
        let counts = self.collision_counts_of(rank)?;
        let n_mid: i64 = counts[..COLLISION_TYPES].iter().sum();
        Ok(idx >= n_mid)
    }

    /// The `[mid 0..5 | edge 0..5]` census of `rank`, cached per peer.
    pub fn collision_counts_of(
        &self,
        rank: usize,
    ) -> Result<[i64; 2 * COLLISION_TYPES], DomainError> {
        if rank == self.comm.rank() {
            let mut counts = [0i64; 2 * COLLISION_TYPES];
            counts[..COLLISION_TYPES].copy_from_slice(&self.mid_domain_counts);
            counts[COLLISION_TYPES..].copy_from_slice(&self.domain_edge_counts);
            return Ok(counts);
        }
        if let Some(counts) = self.counts_cache.borrow().get(&rank) {
            return Ok(*counts);
        }
        let mut bytes = [0u8; 2 * COLLISION_TYPES * 8];
        self.counts_window.read(rank, 0, &mut bytes)?;
        let mut counts = [0i64; 2 * COLLISION_TYPES];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            counts[i] = i64::from_le_bytes(chunk.try_into().expect("chunk is 8 bytes"));
        }
        self.counts_cache.borrow_mut().insert(rank, counts);
        Ok(counts)
    }

    /// Construction summary for the run report.
    pub fn report(&self) -> DomainReport {
        DomainReport {
            total_fluid_sites: self.total_fluid_sites,
            block_count: self.universe_block_count,
            sites_per_block: self.sites_per_block as i64,
            fluid_sites_on_each_rank: self.fluid_sites_on_each_rank.clone(),
        }
    }

    /// The collision bucket the catalogue ordering assigns to slot `i`.
    pub(crate) fn expected_bucket_layout(&self) -> Vec<(CollisionBucket, bool)> {
        let mut layout = Vec::with_capacity(self.local_fluid_count as usize);
        for (edge, counts) in [
            (false, &self.mid_domain_counts),
            (true, &self.domain_edge_counts),
        ] {
            for bucket in CollisionBucket::ALL {
                for _ in 0..counts[bucket.index()] {
                    layout.push((bucket, edge));
                }
            }
        }
        layout
    }
}

impl<C: Communicator> Domain<C> {
    /// Run [`Self::validate_invariants`] in debug builds and under the
    /// `check-invariants` feature, panicking on the first violation. The
    /// build calls this once after the topology is bound.
    pub fn assert_invariants(&self) {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = self.validate_invariants() {
            panic!("domain invariants violated: {}", e);
        }
    }

    /// Verify the structural guarantees the streaming kernel relies on:
    /// every target of the neighbour-index table is the rubbish slot, a
    /// local slot or a shared-region slot; no non-rubbish slot is written
    /// twice; the catalogue is laid out `[mid 0..5 | edge 0..5]`; and the
    /// shared region partitions exactly across the peers in order.
    pub fn validate_invariants(&self) -> Result<(), DomainError> {
        use std::collections::HashSet;

        let q = self.num_vectors() as i64;
        let count = self.local_fluid_count;
        let rubbish = self.rubbish_slot();
        let shared_end = count * q + 1 + self.total_shared;

        if self.neighbour_indices.len() as i64 != count * q {
            return Err(DomainError::InvariantViolated(format!(
                "neighbour table has {} entries, expected {}",
                self.neighbour_indices.len(),
                count * q
            )));
        }

        // Every write target is the rubbish slot, a local slot, or a slot
        // in the shared region; non-rubbish targets are written at most
        // once.
        let mut seen = HashSet::new();
        for (i, &target) in self.neighbour_indices.iter().enumerate() {
            let in_local = (0..count * q).contains(&target);
            let in_shared = (count * q + 1..shared_end).contains(&target);
            if target != rubbish && !in_local && !in_shared {
                return Err(DomainError::InvariantViolated(format!(
                    "entry {} targets {} outside every region",
                    i, target
                )));
            }
            if target != rubbish && !seen.insert(target) {
                return Err(DomainError::InvariantViolated(format!(
                    "slot {} written twice",
                    target
                )));
            }
        }

        // Census totals match the catalogue arrays.
        let census: i64 =
            self.mid_domain_counts.iter().sum::<i64>() + self.domain_edge_counts.iter().sum::<i64>();
        if census != count || self.site_data.len() as i64 != count {
            return Err(DomainError::InvariantViolated(format!(
                "census {} does not match catalogue of {}",
                census, count
            )));
        }

        // Bucket ordering: mid-domain halves first, buckets ascending.
        for (i, (bucket, _)) in self.expected_bucket_layout().iter().enumerate() {
            let actual = self.site_data[i]
                .collision_bucket()
                .ok_or_else(|| DomainError::InvariantViolated(format!("slot {} is solid", i)))?;
            if actual != *bucket {
                return Err(DomainError::InvariantViolated(format!(
                    "slot {} holds bucket {:?}, layout expects {:?}",
                    i, actual, bucket
                )));
            }
        }

        // Shared region partitions exactly across peers in order.
        let mut expected_start = count * q + 1;
        for np in &self.neighbouring_procs {
            if np.first_shared_distribution != expected_start {
                return Err(DomainError::InvariantViolated(format!(
                    "peer {} starts at {}, expected {}",
                    np.rank, np.first_shared_distribution, expected_start
                )));
            }
            expected_start += np.shared_distribution_count;
        }
        if expected_start != shared_end {
            return Err(DomainError::InvariantViolated(format!(
                "shared region ends at {}, expected {}",
                expected_start, shared_end
            )));
        }
        if self.streaming_indices_for_received.len() as i64 != self.total_shared {
            return Err(DomainError::InvariantViolated(format!(
                "receive table has {} entries, expected {}",
                self.streaming_indices_for_received.len(),
                self.total_shared
            )));
        }

        Ok(())
    }
}
