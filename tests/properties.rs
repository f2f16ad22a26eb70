//! Property tests over randomized single-worker geometries: every build
//! must satisfy the write-target conservation, uniqueness and ordering
//! invariants regardless of the fluid mask.

use std::sync::Arc;

use glam::{I64Vec3, U16Vec3};
use hemoflux::geometry::{CutType, SiteType};
use hemoflux::prelude::*;
use hemoflux::test_geometry::{plain_fluid, with_cut, GeometryBuilder};
use proptest::prelude::*;

/// One randomized site slot of the toy universe.
#[derive(Debug, Clone)]
enum SlotKind {
    Solid,
    Fluid,
    Inlet,
    Outlet,
    WalledFluid { direction: usize, distance: f32 },
}

fn slot_strategy() -> impl Strategy<Value = SlotKind> {
    prop_oneof![
        3 => Just(SlotKind::Solid),
        3 => Just(SlotKind::Fluid),
        1 => Just(SlotKind::Inlet),
        1 => Just(SlotKind::Outlet),
        1 => (1usize..15, 0.0f32..1.0).prop_map(|(direction, distance)| {
            SlotKind::WalledFluid { direction, distance }
        }),
    ]
}

fn build_geometry(slots: &[SlotKind]) -> GeometryReadResult {
    // 2×1×1 blocks of side 2: sixteen site slots.
    let mut builder = GeometryBuilder::new(U16Vec3::new(2, 1, 1), 2);
    for (i, slot) in slots.iter().enumerate() {
        let coords = I64Vec3::new((i / 4) as i64, ((i / 2) % 2) as i64, (i % 2) as i64);
        let site = match slot {
            SlotKind::Solid => continue,
            SlotKind::Fluid => plain_fluid(0, 15),
            SlotKind::Inlet => {
                let mut s = plain_fluid(0, 15);
                s.site_type = SiteType::Inlet;
                s.iolet_id = 0;
                s
            }
            SlotKind::Outlet => {
                let mut s = plain_fluid(0, 15);
                s.site_type = SiteType::Outlet;
                s.iolet_id = 1;
                s
            }
            SlotKind::WalledFluid {
                direction,
                distance,
            } => with_cut(plain_fluid(0, 15), *direction, CutType::Wall, *distance),
        };
        builder.set_site(coords, site);
    }
    builder.build()
}

proptest! {
    #[test]
    fn any_fluid_mask_builds_a_consistent_domain(
        slots in proptest::collection::vec(slot_strategy(), 16)
    ) {
        let read = build_geometry(&slots);
        let fluid_slots = slots.iter().filter(|s| !matches!(s, SlotKind::Solid)).count();
        let domain = Domain::build(&D3Q15, &read, Arc::new(NoComm)).expect("build");

        // Conservation, uniqueness and bucket-ordering of write targets.
        domain.validate_invariants().expect("invariants");

        prop_assert_eq!(domain.local_fluid_site_count() as usize, fluid_slots);
        // A single worker never shares distributions.
        prop_assert_eq!(domain.total_shared_distributions(), 0);
        prop_assert!(domain.neighbouring_procs().is_empty());

        // The directory resolves every fluid site and nothing else.
        for s in 0..domain.local_fluid_site_count() {
            let coords = domain.global_site_coords(s);
            let entry = domain.rank_index_from_global_coords(coords).unwrap();
            prop_assert_eq!(entry.rank(), 0);
            prop_assert_eq!(entry.index(), s);
        }
    }

    #[test]
    fn streaming_conserves_every_distribution(
        slots in proptest::collection::vec(slot_strategy(), 16)
    ) {
        let read = build_geometry(&slots);
        let domain = Domain::build(&D3Q15, &read, Arc::new(NoComm)).expect("build");
        let q = domain.num_vectors();
        let count = domain.local_fluid_site_count() as usize;

        let mut buffers = DistributionBuffers::new(&domain);
        for i in 0..count * q {
            buffers.f_old_mut()[i] = (i + 1) as f64;
        }
        buffers.tick(&domain).expect("tick");

        // Each local distribution either reached exactly the slot its
        // target table names, or died in the rubbish slot.
        for s in 0..count {
            for dir in 0..q {
                let target = domain.neighbour_index(s as i64, dir);
                if target != domain.rubbish_slot() {
                    prop_assert_eq!(
                        buffers.f_old()[target as usize],
                        (s * q + dir + 1) as f64
                    );
                }
            }
        }
    }
}
