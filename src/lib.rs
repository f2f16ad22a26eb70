//! # hemoflux
//!
//! hemoflux is the domain-decomposition core of a distributed
//! lattice-Boltzmann engine for hemodynamic simulation. It ingests a
//! pre-discretised vascular geometry (a block-structured grid of fluid and
//! solid voxels with wall-cut distances), partitions it across parallel
//! workers, and produces the per-worker fluid-site catalogue together with
//! the cross-worker streaming link tables that make the hot LB kernel a
//! straight index chase.
//!
//! ## Features
//! - Static lattice descriptors (D3Q15, D3Q19, D3Q27) with inverse-direction
//!   tables
//! - Sparse octree block store with deterministic dense leaf numbering
//! - Distributed site directory: one-sided `(block, site) → (owner, index)`
//!   lookups with a per-peer read cache
//! - Collision-type-sorted fluid-site catalogue (mid-domain before
//!   domain-edge, six buckets each)
//! - Neighbour-link resolver and per-peer send/receive plans for the
//!   shared-distribution exchange
//! - Pluggable communication backends (serial, in-process threads, MPI)
//!
//! ## Usage
//! Add `hemoflux` as a dependency in your `Cargo.toml` and enable features
//! as needed:
//!
//! ```toml
//! [dependencies]
//! hemoflux = "0.4"
//! # Optional features:
//! # features = ["mpi-support","check-invariants"]
//! ```
//!
//! A domain is built collectively from a read geometry:
//!
//! ```
//! use std::sync::Arc;
//! use hemoflux::prelude::*;
//!
//! // A 2×2×2 all-fluid cube in a single block, on one worker.
//! let read = hemoflux::test_geometry::fluid_cube(2, 0);
//! let domain = Domain::build(&D3Q15, &read, Arc::new(NoComm)).unwrap();
//! assert_eq!(domain.local_fluid_site_count(), 8);
//! let mut buffers = DistributionBuffers::new(&domain);
//! buffers.tick(&domain).unwrap();
//! ```

pub mod comm;
pub mod directory;
pub mod domain;
pub mod error;
pub mod geometry;
pub mod iolet;
pub mod lattice;
pub mod streaming;

#[doc(hidden)]
pub mod test_geometry;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::{Communicator, NoComm, RmaWindow, ThreadComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::directory::SiteRankIndex;
    pub use crate::domain::{Domain, DomainReport, NeighbouringProcessor};
    pub use crate::error::DomainError;
    pub use crate::geometry::{
        BlockStore, CollisionBucket, GeometryReadResult, SiteData, SiteType, COLLISION_TYPES,
    };
    pub use crate::iolet::{BoundaryKind, Iolet, IoletKind};
    pub use crate::lattice::{LatticeDescriptor, D3Q15, D3Q19, D3Q27};
    pub use crate::streaming::DistributionBuffers;
}
