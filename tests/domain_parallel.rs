//! Multi-worker construction over the in-process backend: one OS thread
//! per rank.

use std::sync::Arc;

use glam::I64Vec3;
use hemoflux::prelude::*;
use hemoflux::test_geometry::{adjacent_pair, triangle};

/// Run `f` once per rank of a fresh world, returning results in rank order.
fn run_world<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize, Arc<ThreadComm>) -> T + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let handles: Vec<_> = ThreadComm::world(size)
        .into_iter()
        .enumerate()
        .map(|(rank, comm)| {
            let f = f.clone();
            std::thread::spawn(move || f(rank, Arc::new(comm)))
        })
        .collect();
    handles
        .into_iter()
        .map(|h| h.join().expect("rank panicked"))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
struct TopologySnapshot {
    neighbour_indices: Vec<i64>,
    streaming_indices: Vec<i64>,
    neighbouring_procs: Vec<NeighbouringProcessor>,
}

fn snapshot<C: Communicator>(domain: &Domain<C>) -> TopologySnapshot {
    TopologySnapshot {
        neighbour_indices: domain.neighbour_indices().to_vec(),
        streaming_indices: domain
            .streaming_indices_for_received_distributions()
            .to_vec(),
        neighbouring_procs: domain.neighbouring_procs().to_vec(),
    }
}

#[test]
fn adjacent_pair_shares_one_link_each_way() {
    let results = run_world(2, |rank, comm| {
        let read = adjacent_pair();
        let domain = Domain::build(&D3Q15, &read, comm).expect("build");
        domain.validate_invariants().expect("invariants");

        assert_eq!(domain.local_fluid_site_count(), 1);
        assert_eq!(domain.total_fluid_sites(), 2);
        assert_eq!(domain.fluid_sites_on_each_rank(), &[1, 1]);
        assert_eq!(domain.mid_domain_collision_count(0), 0);
        assert_eq!(domain.domain_edge_collision_count(0), 1);

        let procs = domain.neighbouring_procs();
        assert_eq!(procs.len(), 1);
        assert_eq!(procs[0].rank, 1 - rank as i32);
        assert_eq!(procs[0].shared_distribution_count, 1);
        // Shared region starts just past the rubbish slot.
        assert_eq!(procs[0].first_shared_distribution, 15 + 1);
        assert_eq!(domain.total_shared_distributions(), 1);

        // Both workers see both sites through the directory.
        let here = domain
            .rank_index_from_global_coords(I64Vec3::new(rank as i64, 0, 0))
            .unwrap();
        let there = domain
            .rank_index_from_global_coords(I64Vec3::new(1 - rank as i64, 0, 0))
            .unwrap();
        assert_eq!(here.rank(), rank as i32);
        assert_eq!(here.index(), 0);
        assert_eq!(there.rank(), 1 - rank as i32);
        assert_eq!(there.index(), 0);

        // Each worker's single site is a domain-edge site of its peer.
        assert!(domain.is_domain_edge(1 - rank, 0).expect("census"));

        snapshot(&domain)
    });

    // The crossing link occupies the first shared slot on both sides, in
    // the direction that points at the peer.
    let q = 15usize;
    assert_eq!(results[0].neighbour_indices[1], 16); // +x out of rank 0
    assert_eq!(results[1].neighbour_indices[2], 16); // -x out of rank 1
    // Received distributions land at the mirror direction of the sender.
    assert_eq!(results[0].streaming_indices, vec![2]);
    assert_eq!(results[1].streaming_indices, vec![1]);
    // All other non-rest links are rubbish.
    let rubbish = q as i64;
    for (rank, snap) in results.iter().enumerate() {
        for dir in 1..q {
            let keep = if rank == 0 { 1 } else { 2 };
            if dir != keep {
                assert_eq!(snap.neighbour_indices[dir], rubbish, "rank {rank} dir {dir}");
            }
        }
    }
}

#[test]
fn adjacent_pair_streams_across_the_boundary() {
    let results = run_world(2, |rank, comm| {
        let read = adjacent_pair();
        let domain = Domain::build(&D3Q15, &read, comm).expect("build");
        let q = domain.num_vectors();

        let mut buffers = DistributionBuffers::new(&domain);
        for dir in 0..q {
            buffers.f_old_mut()[dir] = (100 * (rank + 1) + dir) as f64;
        }
        buffers.tick(&domain).expect("tick");
        (
            buffers.f_old()[1], // +x distribution at the local site
            buffers.f_old()[2], // -x distribution at the local site
        )
    });

    // Rank 0's +x distribution (101) crossed to rank 1 and landed in the
    // +x slot there; rank 1's -x distribution (202) crossed back likewise.
    assert_eq!(results[1].0, 101.0);
    assert_eq!(results[0].1, 202.0);
}

#[test]
fn triangle_partitions_the_shared_region_pairwise() {
    let results = run_world(3, |rank, comm| {
        let read = triangle();
        let domain = Domain::build(&D3Q19, &read, comm).expect("build");
        domain.validate_invariants().expect("invariants");

        assert_eq!(domain.local_fluid_site_count(), 1);
        assert_eq!(domain.total_fluid_sites(), 3);
        assert_eq!(domain.total_shared_distributions(), 2);

        let procs = domain.neighbouring_procs();
        assert_eq!(procs.len(), 2);
        // Two peers in strictly increasing rank order, one link each.
        let expected: Vec<i32> = (0..3).filter(|&r| r != rank as i32).collect();
        assert_eq!(
            procs.iter().map(|np| np.rank).collect::<Vec<_>>(),
            expected
        );
        for np in procs {
            assert_eq!(np.shared_distribution_count, 1);
        }
        // The shared region partitions exactly: 19 + 1, then 19 + 2.
        assert_eq!(procs[0].first_shared_distribution, 20);
        assert_eq!(procs[1].first_shared_distribution, 21);

        snapshot(&domain)
    });

    // Every peer pair agrees on its shared count.
    for a in 0..3usize {
        for snap in &results {
            for np in &snap.neighbouring_procs {
                if np.rank == a as i32 {
                    assert_eq!(np.shared_distribution_count, 1);
                }
            }
        }
    }

    // Symmetry of shared links: each side of every pair binds exactly one
    // send slot and one receive slot.
    for snap in &results {
        assert_eq!(snap.streaming_indices.len(), 2);
        let shared_targets: Vec<i64> = snap
            .neighbour_indices
            .iter()
            .copied()
            .filter(|&t| t > 19)
            .collect();
        assert_eq!(shared_targets.len(), 2);
        assert!(shared_targets.contains(&20));
        assert!(shared_targets.contains(&21));
    }
}

#[test]
fn identical_runs_build_identical_topology() {
    let build_once = || {
        run_world(3, |_rank, comm| {
            let read = triangle();
            let domain = Domain::build(&D3Q19, &read, comm).expect("build");
            snapshot(&domain)
        })
    };
    let first = build_once();
    let second = build_once();
    assert_eq!(first, second);
}
