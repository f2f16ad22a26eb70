//! Toy read-geometries for tests and examples.
//!
//! Every worker of a test world is handed the *full* payload of every
//! occupied block, which satisfies the halo guarantee of the read contract
//! trivially and keeps the builders independent of the rank count.

use std::collections::HashMap;

use glam::{I64Vec3, U16Vec3};

use crate::geometry::{
    BlockReadResult, CutType, GeometryReadResult, LinkReadResult, SiteReadResult, SiteType,
};

/// A plain bulk-fluid site record owned by `rank`, with `q - 1` clear links.
pub fn plain_fluid(rank: i32, num_vectors: usize) -> SiteReadResult {
    SiteReadResult {
        target_rank: rank,
        site_type: SiteType::Fluid,
        iolet_id: -1,
        wall_normal: None,
        links: vec![LinkReadResult::default(); num_vectors - 1],
    }
}

/// Set the link record for non-rest direction `q`.
pub fn with_cut(mut site: SiteReadResult, q: usize, cut: CutType, distance: f32) -> SiteReadResult {
    site.links[q - 1] = LinkReadResult {
        cut_type: cut,
        distance,
    };
    site
}

/// Incrementally builds a [`GeometryReadResult`] from explicit site records;
/// every unnamed site slot stays solid.
pub struct GeometryBuilder {
    block_counts: U16Vec3,
    block_size: u16,
    sites: HashMap<(usize, usize), SiteReadResult>,
}

impl GeometryBuilder {
    /// An all-solid universe of `block_counts` blocks of side `block_size`.
    pub fn new(block_counts: U16Vec3, block_size: u16) -> Self {
        GeometryBuilder {
            block_counts,
            block_size,
            sites: HashMap::new(),
        }
    }

    /// Place `site` at the global coordinate `global`.
    pub fn set_site(&mut self, global: I64Vec3, site: SiteReadResult) -> &mut Self {
        let b = self.block_size as i64;
        let block = global / b;
        let local = global % b;
        let block_idx = (block.x as usize * self.block_counts.y as usize + block.y as usize)
            * self.block_counts.z as usize
            + block.z as usize;
        let bs = self.block_size as usize;
        let site_idx = (local.x as usize * bs + local.y as usize) * bs + local.z as usize;
        self.sites.insert((block_idx, site_idx), site);
        self
    }

    /// Materialise the read result: occupied blocks get dense payloads, the
    /// census counts their non-solid slots, untouched blocks stay empty.
    pub fn build(&self) -> GeometryReadResult {
        let block_count = self.block_counts.x as usize
            * self.block_counts.y as usize
            * self.block_counts.z as usize;
        let bs = self.block_size as usize;
        let spb = bs * bs * bs;

        let mut blocks = vec![BlockReadResult::default(); block_count];
        let mut census = vec![0u32; block_count];
        for (&(block_idx, site_idx), site) in &self.sites {
            if blocks[block_idx].is_empty() {
                blocks[block_idx].sites = vec![SiteReadResult::solid(); spb];
            }
            if !site.is_solid() {
                census[block_idx] += 1;
            }
            blocks[block_idx].sites[site_idx] = site.clone();
        }
        GeometryReadResult {
            block_counts: self.block_counts,
            block_size: self.block_size,
            fluid_sites_per_block: census,
            blocks,
        }
    }
}

/// A single all-fluid block of side `block_size`, wholly owned by `rank`,
/// described with the D3Q15 link count.
pub fn fluid_cube(block_size: u16, rank: i32) -> GeometryReadResult {
    let mut builder = GeometryBuilder::new(U16Vec3::new(1, 1, 1), block_size);
    let n = block_size as i64;
    for x in 0..n {
        for y in 0..n {
            for z in 0..n {
                builder.set_site(I64Vec3::new(x, y, z), plain_fluid(rank, 15));
            }
        }
    }
    builder.build()
}

/// Two 1-site-thick blocks side by side along `x`; rank 0 owns the fluid
/// site at `(0,0,0)`, rank 1 the one at `(1,0,0)`. Described with the D3Q15
/// link count.
pub fn adjacent_pair() -> GeometryReadResult {
    let mut builder = GeometryBuilder::new(U16Vec3::new(2, 1, 1), 1);
    builder.set_site(I64Vec3::new(0, 0, 0), plain_fluid(0, 15));
    builder.set_site(I64Vec3::new(1, 0, 0), plain_fluid(1, 15));
    builder.build()
}

/// Three mutually-adjacent fluid sites on ranks 0, 1 and 2 inside one
/// block. The `1 ↔ 2` link runs along an edge vector, so this geometry
/// needs the D3Q19 (or richer) velocity set.
pub fn triangle() -> GeometryReadResult {
    let mut builder = GeometryBuilder::new(U16Vec3::new(1, 1, 1), 2);
    builder.set_site(I64Vec3::new(0, 0, 0), plain_fluid(0, 19));
    builder.set_site(I64Vec3::new(1, 0, 0), plain_fluid(1, 19));
    builder.set_site(I64Vec3::new(0, 1, 0), plain_fluid(2, 19));
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_census_counts_fluid_only() {
        let mut b = GeometryBuilder::new(U16Vec3::new(2, 1, 1), 2);
        b.set_site(I64Vec3::new(0, 0, 0), plain_fluid(0, 15));
        b.set_site(I64Vec3::new(1, 1, 1), SiteReadResult::solid());
        let read = b.build();
        assert_eq!(read.fluid_sites_per_block, vec![1, 0]);
        assert!(!read.blocks[0].is_empty());
        assert!(read.blocks[1].is_empty());
        assert!(read.validate(15).is_ok());
    }

    #[test]
    fn cube_is_dense() {
        let read = fluid_cube(2, 0);
        assert_eq!(read.fluid_sites_per_block, vec![8]);
        assert!(read.validate(15).is_ok());
    }
}
