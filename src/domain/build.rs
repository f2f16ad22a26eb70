//! Domain construction.
//!
//! The build runs in strictly sequential phases on every worker:
//!
//! 1. *Classification*: walk the occupied blocks, record site ownership,
//!    and stage every locally-owned fluid site into its collision bucket,
//!    split by mid-domain versus domain-edge.
//! 2. *Numbering and publish*: assign contiguous local indices in the
//!    fixed bucket order and announce `(rank, index)` for each site to the
//!    distributed directory.
//! 3. *Peer discovery*: re-walk the domain-edge sites, resolving the true
//!    owner of every foreign link through the directory.
//! 4. *Census collectives*: all-gather the per-rank fluid counts, reduce
//!    the global coordinate extrema.
//! 5. *Topology*: fill the streaming target table, pair the shared links
//!    with each peer (lower rank sends its descriptor list), and derive
//!    the receive table.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use glam::{I64Vec3, Vec3};
use tracing::{debug, info, trace};

use crate::comm::communicator::tags;
use crate::comm::{Communicator, ReduceOp, Wait};
use crate::directory::{DirectoryBuilder, SiteRankIndex};
use crate::error::DomainError;
use crate::geometry::{
    BlockStore, GeometryReadResult, SiteData, COLLISION_TYPES, NO_WALL_NORMAL, SOLID_RANK,
};
use crate::lattice::LatticeDescriptor;

use super::{Block, Domain, LinkAdvert, NeighbouringProcessor};

/// One classified fluid site waiting for its contiguous index.
struct StagedSite {
    block: usize,
    site: usize,
    data: SiteData,
    normal: Vec3,
    distances: Vec<f32>,
}

fn block_origin(coords: glam::U16Vec3, block_size: u16) -> I64Vec3 {
    I64Vec3::new(coords.x as i64, coords.y as i64, coords.z as i64) * block_size as i64
}

impl<C: Communicator> Domain<C> {
    /// Build the catalogue and exchange topology from a read geometry.
    ///
    /// Collective: every rank of `comm` must call this with the same
    /// universe shape and fluid census.
    ///
    /// # Errors
    /// Any classification, partition or transport inconsistency aborts the
    /// build; the returned error names the offending rank, site and
    /// direction.
    pub fn build(
        lattice: &'static LatticeDescriptor,
        read: &GeometryReadResult,
        comm: Arc<C>,
    ) -> Result<Self, DomainError> {
        read.validate(lattice.num_vectors())?;
        let rank = comm.rank();
        let local_rank = rank as i32;
        let q = lattice.num_vectors();
        let spb = read.sites_per_block();

        info!(rank, "processing sites assigned to each worker");
        let store = BlockStore::new(read.block_counts, read.fluid_block_coords());
        let mut blocks = vec![Block::default(); store.block_count()];

        // Phase 1: classification.
        let mut mid: [Vec<StagedSite>; COLLISION_TYPES] = Default::default();
        let mut edge: [Vec<StagedSite>; COLLISION_TYPES] = Default::default();
        let mut edge_sites: Vec<I64Vec3> = Vec::new();
        let mut total_shared = 0i64;

        for leaf in store.iter_leaves() {
            let payload = &read.blocks[read.block_index(leaf.coords())];
            if payload.is_empty() {
                continue;
            }
            let origin = block_origin(leaf.coords(), read.block_size);
            let block = &mut blocks[leaf.index()];
            block.ensure(spb);

            for site_id in 0..spb {
                let site_read = &payload.sites[site_id];
                block.set_rank(site_id, site_read.target_rank);
                if site_read.target_rank != local_rank {
                    continue;
                }

                let sc = read.site_coords(site_id);
                let global = origin + I64Vec3::new(sc.x as i64, sc.y as i64, sc.z as i64);

                let mut is_mid = true;
                for dir in 1..q {
                    let neigh = global + lattice.velocity(dir);
                    let owner = read.rank_for_site(neigh);
                    if owner == SOLID_RANK || owner == local_rank {
                        continue;
                    }
                    is_mid = false;
                    total_shared += 1;
                }
                if !is_mid {
                    edge_sites.push(global);
                }

                let data = SiteData::from_read(site_read);
                let bucket = data
                    .collision_bucket()
                    .ok_or(DomainError::UnclassifiableSite(global))?;
                let staged = StagedSite {
                    block: leaf.index(),
                    site: site_id,
                    data,
                    normal: site_read.wall_normal.unwrap_or(NO_WALL_NORMAL),
                    distances: site_read.links.iter().map(|l| l.distance).collect(),
                };
                if is_mid {
                    mid[bucket.index()].push(staged);
                } else {
                    edge[bucket.index()].push(staged);
                }
            }
        }

        // Phase 2: contiguous numbering and directory publish, mid-domain
        // buckets first, then domain-edge.
        info!(rank, "assigning local indices to sites");
        let mut mid_counts = [0i64; COLLISION_TYPES];
        let mut edge_counts = [0i64; COLLISION_TYPES];
        for l in 0..COLLISION_TYPES {
            mid_counts[l] = mid[l].len() as i64;
            edge_counts[l] = edge[l].len() as i64;
        }

        let total_local: usize = (mid.iter().chain(edge.iter())).map(Vec::len).sum();
        let mut site_data = Vec::with_capacity(total_local);
        let mut wall_normals = Vec::with_capacity(total_local);
        let mut distance_to_wall = Vec::with_capacity(total_local * (q - 1));
        let mut global_site_coords = Vec::with_capacity(total_local);

        let mut dir_builder = DirectoryBuilder::new(&store, spb, rank, comm.size());
        let mut local_fluid = 0i64;
        for half in [&mid, &edge] {
            for bucket in half {
                for staged in bucket {
                    site_data.push(staged.data);
                    wall_normals.push(staged.normal);
                    distance_to_wall.extend_from_slice(&staged.distances);
                    let origin = block_origin(store.leaf_coords(staged.block), read.block_size);
                    let sc = read.site_coords(staged.site);
                    global_site_coords
                        .push(origin + I64Vec3::new(sc.x as i64, sc.y as i64, sc.z as i64));
                    blocks[staged.block].set_local_index(staged.site, local_fluid);
                    dir_builder.put(
                        staged.block,
                        staged.site,
                        SiteRankIndex::new(local_rank, local_fluid),
                    );
                    local_fluid += 1;
                }
            }
        }
        let directory = dir_builder.finalise(&*comm)?;

        // Publish the collision census for one-sided peer queries.
        let mut counts_bytes = Vec::with_capacity(2 * COLLISION_TYPES * 8);
        for v in mid_counts.iter().chain(edge_counts.iter()) {
            counts_bytes.extend_from_slice(&v.to_le_bytes());
        }
        let counts_window = comm.open_window(counts_bytes)?;

        let mut domain = Domain {
            lattice,
            comm: comm.clone(),
            block_size: read.block_size,
            site_dimensions: read.site_dimensions(),
            sites_per_block: spb,
            universe_block_count: read.block_count() as i64,
            store,
            blocks,
            directory,
            site_data,
            wall_normals,
            distance_to_wall,
            global_site_coords,
            mid_domain_counts: mid_counts,
            domain_edge_counts: edge_counts,
            local_fluid_count: local_fluid,
            fluid_sites_on_each_rank: Vec::new(),
            total_fluid_sites: 0,
            global_site_min: I64Vec3::MAX,
            global_site_max: I64Vec3::ZERO,
            total_shared,
            neighbouring_procs: Vec::new(),
            neighbour_indices: Vec::new(),
            streaming_indices_for_received: Vec::new(),
            counts_window,
            counts_cache: RefCell::new(HashMap::new()),
        };

        domain.discover_neighbouring_procs(read, &edge_sites)?;
        domain.collect_fluid_site_distribution()?;
        domain.collect_global_site_extrema()?;
        domain.initialise_neighbour_lookups()?;
        domain.assert_invariants();
        Ok(domain)
    }

    /// Phase 3: resolve the true owner of every foreign link of every
    /// domain-edge site through the directory, accumulating the peer list
    /// in discovery order.
    fn discover_neighbouring_procs(
        &mut self,
        read: &GeometryReadResult,
        edge_sites: &[I64Vec3],
    ) -> Result<(), DomainError> {
        let me = self.comm.rank();
        let local_rank = me as i32;
        for &site in edge_sites {
            let mut found_remote = false;
            for dir in 1..self.num_vectors() {
                let neigh = site + self.lattice.velocity(dir);
                let owner = read.rank_for_site(neigh);
                if owner == SOLID_RANK || owner == local_rank {
                    continue;
                }
                let entry = self.rank_index_from_global_coords(neigh)?;
                if entry.is_solid() {
                    return Err(DomainError::GeometryInconsistency {
                        rank: me,
                        site: neigh,
                        direction: dir,
                    });
                }
                if entry.rank() == local_rank {
                    return Err(DomainError::PartitionInconsistency {
                        rank: me,
                        peer: me,
                        detail: format!(
                            "site {:?} read as foreign but resolved to this worker",
                            neigh
                        ),
                    });
                }
                found_remote = true;
                match self
                    .neighbouring_procs
                    .iter_mut()
                    .find(|np| np.rank == entry.rank())
                {
                    Some(np) => np.shared_distribution_count += 1,
                    None => self.neighbouring_procs.push(NeighbouringProcessor {
                        rank: entry.rank(),
                        shared_distribution_count: 1,
                        first_shared_distribution: 0,
                    }),
                }
            }
            if !found_remote {
                return Err(DomainError::GeometryInconsistency {
                    rank: me,
                    site,
                    direction: 0,
                });
            }
        }

        let advertised: i64 = self
            .neighbouring_procs
            .iter()
            .map(|np| np.shared_distribution_count)
            .sum();
        if advertised != self.total_shared {
            return Err(DomainError::InvariantViolated(format!(
                "peer discovery found {} shared links, classification counted {}",
                advertised, self.total_shared
            )));
        }
        for np in &self.neighbouring_procs {
            trace!(
                rank = me,
                peer = np.rank,
                shared = np.shared_distribution_count,
                "neighbour discovered"
            );
        }
        Ok(())
    }

    /// Phase 4a: gather the per-rank fluid-site counts.
    fn collect_fluid_site_distribution(&mut self) -> Result<(), DomainError> {
        debug!("gathering site counts");
        self.fluid_sites_on_each_rank = self.comm.all_gather_i64(self.local_fluid_count)?;
        self.total_fluid_sites = self.fluid_sites_on_each_rank.iter().sum();
        Ok(())
    }

    /// Phase 4b: reduce the global fluid-site coordinate extrema.
    fn collect_global_site_extrema(&mut self) -> Result<(), DomainError> {
        debug!("gathering bounds");
        let mut mins = [i64::MAX; 3];
        let mut maxes = [0i64; 3];
        for coords in &self.global_site_coords {
            for (axis, &c) in coords.to_array().iter().enumerate() {
                mins[axis] = mins[axis].min(c);
                maxes[axis] = maxes[axis].max(c);
            }
        }
        self.comm.all_reduce_i64(&mut mins, ReduceOp::Min)?;
        self.comm.all_reduce_i64(&mut maxes, ReduceOp::Max)?;
        self.global_site_min = I64Vec3::from_array(mins);
        self.global_site_max = I64Vec3::from_array(maxes);
        Ok(())
    }

    /// Phase 5: streaming target table, shared-link pairing, receive table.
    fn initialise_neighbour_lookups(&mut self) -> Result<(), DomainError> {
        info!("initialising neighbour lookups");
        let q = self.num_vectors() as i64;
        let mut shared_so_far = 0i64;
        for np in &mut self.neighbouring_procs {
            np.first_shared_distribution = self.local_fluid_count * q + 1 + shared_so_far;
            shared_so_far += np.shared_distribution_count;
        }
        let shared_locations = self.build_neighbour_index_table()?;
        let shared_locations = self.pair_shared_links(shared_locations)?;
        self.build_receive_table(&shared_locations)
    }

    /// Fill the flat target table and stage, per peer, the `(coords, q)`
    /// descriptor of every foreign-bound link.
    fn build_neighbour_index_table(
        &mut self,
    ) -> Result<HashMap<i32, Vec<LinkAdvert>>, DomainError> {
        let q = self.num_vectors();
        let local_rank = self.comm.rank() as i32;
        let rubbish = self.rubbish_slot();
        let mut table = vec![0i64; self.local_fluid_count as usize * q];
        let mut shared: HashMap<i32, Vec<LinkAdvert>> = HashMap::new();

        for leaf in self.store.iter_leaves() {
            let block = &self.blocks[leaf.index()];
            if block.is_empty() {
                continue;
            }
            let origin = block_origin(leaf.coords(), self.block_size);
            for site_id in 0..self.sites_per_block {
                if block.rank_for_site(site_id) != local_rank {
                    continue;
                }
                let local_idx = block.local_index_for_site(site_id);
                debug_assert!(local_idx >= 0);
                let global = origin + self.site_coords(site_id);

                // The rest distribution stays put.
                table[local_idx as usize * q] = local_idx * q as i64;
                for dir in 1..q {
                    let neigh = global + self.lattice.velocity(dir);
                    if !self.is_valid_lattice_site(neigh) {
                        table[local_idx as usize * q + dir] = rubbish;
                        continue;
                    }
                    let entry = self.rank_index_from_global_coords(neigh)?;
                    if entry.is_solid() {
                        table[local_idx as usize * q + dir] = rubbish;
                    } else if entry.rank() == local_rank {
                        table[local_idx as usize * q + dir] = entry.index() * q as i64 + dir as i64;
                    } else {
                        shared
                            .entry(entry.rank())
                            .or_default()
                            .push(LinkAdvert::new(global, dir));
                    }
                }
            }
        }
        self.neighbour_indices = table;
        Ok(shared)
    }

    /// Pair the shared links across each peer boundary. Counts are
    /// cross-checked first; then the lower-ranked worker of each pair sends
    /// its native descriptor list and the higher-ranked one receives it,
    /// replacing its own staging for that peer.
    fn pair_shared_links(
        &self,
        mut shared: HashMap<i32, Vec<LinkAdvert>>,
    ) -> Result<HashMap<i32, Vec<LinkAdvert>>, DomainError> {
        let me = self.comm.rank();
        let local_rank = me as i32;

        let total_staged: i64 = shared.values().map(|v| v.len() as i64).sum();
        if total_staged != self.total_shared {
            return Err(DomainError::InvariantViolated(format!(
                "staged {} link descriptors in total, classification counted {}",
                total_staged, self.total_shared
            )));
        }
        for np in &self.neighbouring_procs {
            let staged = shared.get(&np.rank).map_or(0, Vec::len) as i64;
            if staged != np.shared_distribution_count {
                return Err(DomainError::InvariantViolated(format!(
                    "staged {} descriptors for peer {}, census says {}",
                    staged, np.rank, np.shared_distribution_count
                )));
            }
        }

        let mut count_recvs = Vec::with_capacity(self.neighbouring_procs.len());
        for np in &self.neighbouring_procs {
            let mut buf = [0u8; 8];
            count_recvs.push((
                np,
                self.comm
                    .irecv(np.rank as usize, tags::LINKS.sizes.get(), &mut buf),
            ));
        }
        let mut count_sends = Vec::with_capacity(self.neighbouring_procs.len());
        for np in &self.neighbouring_procs {
            count_sends.push(self.comm.isend(
                np.rank as usize,
                tags::LINKS.sizes.get(),
                &np.shared_distribution_count.to_le_bytes(),
            ));
        }
        for (np, h) in count_recvs {
            let peer = np.rank as usize;
            let data = h.wait().ok_or(DomainError::Transport {
                op: "link sizes",
                peer,
            })?;
            let arr: [u8; 8] = data.as_slice().try_into().map_err(|_| DomainError::Transport {
                op: "link sizes",
                peer,
            })?;
            let theirs = i64::from_le_bytes(arr);
            if theirs != np.shared_distribution_count {
                return Err(DomainError::PartitionInconsistency {
                    rank: me,
                    peer,
                    detail: format!(
                        "shared distribution count mismatch: ours {}, theirs {}",
                        np.shared_distribution_count, theirs
                    ),
                });
            }
        }
        for s in count_sends {
            s.wait();
        }

        let record = std::mem::size_of::<LinkAdvert>();
        let mut data_recvs = Vec::new();
        for np in &self.neighbouring_procs {
            if np.rank < local_rank {
                let mut buf = vec![0u8; np.shared_distribution_count as usize * record];
                data_recvs.push((
                    np,
                    self.comm
                        .irecv(np.rank as usize, tags::LINKS.data.get(), &mut buf),
                ));
            }
        }
        let mut data_sends = Vec::new();
        for np in &self.neighbouring_procs {
            if np.rank > local_rank {
                let list = &shared[&np.rank];
                data_sends.push(self.comm.isend(
                    np.rank as usize,
                    tags::LINKS.data.get(),
                    bytemuck::cast_slice(list),
                ));
            }
        }
        for (np, h) in data_recvs {
            let peer = np.rank as usize;
            let data = h.wait().ok_or(DomainError::Transport {
                op: "link descriptors",
                peer,
            })?;
            if data.len() != np.shared_distribution_count as usize * record {
                return Err(DomainError::PartitionInconsistency {
                    rank: me,
                    peer,
                    detail: format!(
                        "descriptor payload of {} bytes, expected {}",
                        data.len(),
                        np.shared_distribution_count as usize * record
                    ),
                });
            }
            shared.insert(np.rank, bytemuck::pod_collect_to_vec(&data));
        }
        for s in data_sends {
            s.wait();
        }
        Ok(shared)
    }

    /// Assign the shared-region slots and derive the receive table. Both
    /// ends of each peer pair walk the identical descriptor list, so slot
    /// `i` of a peer's run names the same physical link on both workers.
    fn build_receive_table(
        &mut self,
        shared: &HashMap<i32, Vec<LinkAdvert>>,
    ) -> Result<(), DomainError> {
        let me = self.comm.rank();
        let local_rank = me as i32;
        let q = self.num_vectors();
        self.streaming_indices_for_received = vec![0i64; self.total_shared as usize];
        let mut f_count = self.local_fluid_count * q as i64;
        let mut seen = 0usize;

        let procs = self.neighbouring_procs.clone();
        for np in &procs {
            let list = &shared[&np.rank];
            for advert in list {
                let mut loc = advert.coords();
                let mut dir = advert.direction();
                // A list received from a lower-ranked peer holds *their*
                // half of each link; mirror it onto ours.
                if np.rank < local_rank {
                    loc += self.lattice.velocity(dir);
                    dir = self.lattice.inverse(dir);
                }
                let t = self
                    .local_contiguous_id(loc)
                    .ok_or(DomainError::GeometryInconsistency {
                        rank: me,
                        site: loc,
                        direction: dir,
                    })?;
                f_count += 1;
                self.neighbour_indices[t as usize * q + dir] = f_count;
                self.streaming_indices_for_received[seen] =
                    t * q as i64 + self.lattice.inverse(dir) as i64;
                seen += 1;
            }
        }
        Ok(())
    }
}
