//! The read-geometry contract between the preprocessor and the domain
//! builder.
//!
//! A [`GeometryReadResult`] is the per-worker view of the discretised
//! vessel: the universe's block grid, a global per-block fluid census (the
//! same on every worker, used to build the block store deterministically),
//! and dense site payloads for the blocks this worker was handed. A worker
//! is guaranteed payloads for every block containing one of its sites and
//! for the blocks adjacent to them; neighbour lookups landing in a block
//! without a payload are treated as solid.

use glam::{I64Vec3, U16Vec3, Vec3};
use serde::{Deserialize, Serialize};

use super::site::{CutType, SiteType};
use super::SOLID_RANK;

/// One outgoing link of one site, as produced by the wall-cut sampler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkReadResult {
    /// What the link crosses first.
    pub cut_type: CutType,
    /// Distance to the intersection as a fraction of the lattice vector.
    pub distance: f32,
}

/// One site slot of a block payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteReadResult {
    /// Rank the partitioner assigned this site to; [`SOLID_RANK`] for solid
    /// sites, [`super::UNKNOWN_RANK`] when the owner is some unnamed other
    /// worker.
    pub target_rank: i32,
    /// Basic site nature.
    pub site_type: SiteType,
    /// Iolet this site belongs to, `-1` if none.
    pub iolet_id: i32,
    /// Wall normal, when the sampler produced one.
    pub wall_normal: Option<Vec3>,
    /// `Q - 1` link records, indexed by `direction - 1`.
    pub links: Vec<LinkReadResult>,
}

impl SiteReadResult {
    /// A wholly solid site slot.
    pub fn solid() -> Self {
        SiteReadResult {
            target_rank: SOLID_RANK,
            site_type: SiteType::Solid,
            iolet_id: -1,
            wall_normal: None,
            links: Vec::new(),
        }
    }

    /// True when the partitioner marked this slot solid.
    #[inline]
    pub fn is_solid(&self) -> bool {
        self.target_rank == SOLID_RANK
    }
}

/// Payload of one block: either absent (this worker holds no data for it)
/// or a dense array of `B³` site slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockReadResult {
    /// Site slots in site-id order; empty when this worker holds no payload.
    pub sites: Vec<SiteReadResult>,
}

impl BlockReadResult {
    /// True when this worker holds no payload for the block.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

/// Per-worker result of reading the discretised geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometryReadResult {
    /// Number of blocks along each axis.
    pub block_counts: U16Vec3,
    /// Side length `B` of every block, in sites.
    pub block_size: u16,
    /// Global fluid-site census per block, identical on every worker.
    /// Indexed by [`Self::block_index`]; zero means the block is wholly
    /// solid and carries no storage anywhere.
    pub fluid_sites_per_block: Vec<u32>,
    /// Block payloads, indexed by [`Self::block_index`].
    pub blocks: Vec<BlockReadResult>,
}

impl GeometryReadResult {
    /// Total number of blocks in the universe grid.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.block_counts.x as usize * self.block_counts.y as usize * self.block_counts.z as usize
    }

    /// Number of site slots in one block.
    #[inline]
    pub fn sites_per_block(&self) -> usize {
        let b = self.block_size as usize;
        b * b * b
    }

    /// Universe extent in sites along each axis.
    #[inline]
    pub fn site_dimensions(&self) -> I64Vec3 {
        I64Vec3::new(
            self.block_counts.x as i64,
            self.block_counts.y as i64,
            self.block_counts.z as i64,
        ) * self.block_size as i64
    }

    /// Row-major index of a block in [`Self::blocks`].
    #[inline]
    pub fn block_index(&self, coords: U16Vec3) -> usize {
        (coords.x as usize * self.block_counts.y as usize + coords.y as usize)
            * self.block_counts.z as usize
            + coords.z as usize
    }

    /// Index of a site within its block, from block-local coordinates.
    #[inline]
    pub fn site_index(&self, local: U16Vec3) -> usize {
        let b = self.block_size as usize;
        (local.x as usize * b + local.y as usize) * b + local.z as usize
    }

    /// Block-local coordinates of a site from its index within the block.
    #[inline]
    pub fn site_coords(&self, site_id: usize) -> U16Vec3 {
        let b = self.block_size as usize;
        U16Vec3::new(
            (site_id / (b * b)) as u16,
            ((site_id / b) % b) as u16,
            (site_id % b) as u16,
        )
    }

    /// True if `coords` names a site inside the universe bounding box.
    #[inline]
    pub fn is_valid_site(&self, coords: I64Vec3) -> bool {
        let dims = self.site_dimensions();
        coords.x >= 0
            && coords.y >= 0
            && coords.z >= 0
            && coords.x < dims.x
            && coords.y < dims.y
            && coords.z < dims.z
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

    /// The rank a global site coordinate is assigned to, as far as this
    /// worker's payloads know.
    ///
    /// Returns [`SOLID_RANK`] for coordinates outside the universe, inside
    /// blocks without a local payload, or naming solid sites. For fluid
    /// sites of other workers the payload may carry [`UNKNOWN_RANK`].
    pub fn rank_for_site(&self, global: I64Vec3) -> i32 {
        if !self.is_valid_site(global) {
            return SOLID_RANK;
        }
        let (block, local) = self.split_coords(global);
        let payload = &self.blocks[self.block_index(block)];
        if payload.is_empty() {
            return SOLID_RANK;
        }
        payload.sites[self.site_index(local)].target_rank
    }

    /// Coordinates of every block with at least one fluid site, in block
    /// index order. Identical on every worker.
    pub fn fluid_block_coords(&self) -> Vec<U16Vec3> {
        let mut out = Vec::new();
        for x in 0..self.block_counts.x {
            for y in 0..self.block_counts.y {
                for z in 0..self.block_counts.z {
                    let c = U16Vec3::new(x, y, z);
                    if self.fluid_sites_per_block[self.block_index(c)] > 0 {
                        out.push(c);
                    }
                }
            }
        }
        out
    }

    /// Check the declared shape against the payloads.
    pub fn validate(&self, num_vectors: usize) -> Result<(), crate::error::DomainError> {
        use crate::error::DomainError;
        if self.block_size == 0 {
            return Err(DomainError::MalformedGeometry("zero block size".into()));
        }
        if self.blocks.len() != self.block_count() {
            return Err(DomainError::MalformedGeometry(format!(
                "expected {} block payload slots, found {}",
                self.block_count(),
                self.blocks.len()
            )));
        }
        if self.fluid_sites_per_block.len() != self.block_count() {
            return Err(DomainError::MalformedGeometry(format!(
                "expected {} census entries, found {}",
                self.block_count(),
                self.fluid_sites_per_block.len()
            )));
        }
        for (i, block) in self.blocks.iter().enumerate() {
            if block.is_empty() {
                continue;
            }
            if block.sites.len() != self.sites_per_block() {
                return Err(DomainError::MalformedGeometry(format!(
                    "block {} payload has {} site slots, expected {}",
                    i,
                    block.sites.len(),
                    self.sites_per_block()
                )));
            }
            for site in &block.sites {
                if !site.is_solid() && site.links.len() != num_vectors - 1 {
                    return Err(DomainError::MalformedGeometry(format!(
                        "block {} carries a fluid site with {} link records, expected {}",
                        i,
                        site.links.len(),
                        num_vectors - 1
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_block_universe() -> GeometryReadResult {
        // 2×1×1 blocks of side 2; only the first block holds fluid.
        let b = 2usize;
        let spb = b * b * b;
        let mut first = BlockReadResult::default();
        for _ in 0..spb {
            first.sites.push(SiteReadResult {
                target_rank: 0,
                site_type: SiteType::Fluid,
                iolet_id: -1,
                wall_normal: None,
                links: vec![LinkReadResult::default(); 14],
            });
        }
        GeometryReadResult {
            block_counts: U16Vec3::new(2, 1, 1),
            block_size: 2,
            fluid_sites_per_block: vec![spb as u32, 0],
            blocks: vec![first, BlockReadResult::default()],
        }
    }

    #[test]
    fn indexing_round_trips() {
        let g = two_block_universe();
        assert_eq!(g.block_count(), 2);
        assert_eq!(g.sites_per_block(), 8);
        for id in 0..g.sites_per_block() {
            assert_eq!(g.site_index(g.site_coords(id)), id);
        }
        let (block, local) = g.split_coords(I64Vec3::new(3, 1, 0));
        assert_eq!(block, U16Vec3::new(1, 0, 0));
        assert_eq!(local, U16Vec3::new(1, 1, 0));
    }

    #[test]
    fn rank_lookup_normalises_to_solid() {
        let g = two_block_universe();
        // Outside the universe.
        assert_eq!(g.rank_for_site(I64Vec3::new(-1, 0, 0)), SOLID_RANK);
        assert_eq!(g.rank_for_site(I64Vec3::new(4, 0, 0)), SOLID_RANK);
        // Valid but unread block.
        assert_eq!(g.rank_for_site(I64Vec3::new(2, 0, 0)), SOLID_RANK);
        // Fluid.
        assert_eq!(g.rank_for_site(I64Vec3::new(1, 1, 1)), 0);
    }

    #[test]
    fn validate_rejects_short_payload() {
        let mut g = two_block_universe();
        g.blocks[0].sites.pop();
        assert!(g.validate(15).is_err());
    }

    #[test]
    fn fluid_census_drives_block_list() {
        let g = two_block_universe();
        assert_eq!(g.fluid_block_coords(), vec![U16Vec3::new(0, 0, 0)]);
    }
}
