//! `DomainError`: unified error type for the hemoflux public APIs.
//!
//! Every fatal condition carries enough context to identify the offending
//! rank, block or site and, where relevant, the lattice direction, so that
//! a failed initialisation can be traced from a single log line.

use glam::{I64Vec3, U16Vec3};
use thiserror::Error;

/// Unified error type for domain-decomposition operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// A block coordinate lies outside the universe grid.
    #[error("block {0:?} is outside the universe")]
    OutOfDomain(U16Vec3),

    /// A site's two sides disagree about its nature (fluid on one side,
    /// solid or absent on the other).
    #[error("rank {rank}: geometry inconsistency at site {site:?}, direction {direction}")]
    GeometryInconsistency {
        /// Rank that observed the inconsistency.
        rank: usize,
        /// Global coordinate of the site that triggered the check.
        site: I64Vec3,
        /// Lattice direction index of the offending link.
        direction: usize,
    },

    /// Two workers disagree about a shared quantity (owner of a site, or
    /// the number of distributions shared across a peer pair).
    #[error("rank {rank}: partition inconsistency with peer {peer}: {detail}")]
    PartitionInconsistency {
        /// Rank that observed the mismatch.
        rank: usize,
        /// Peer rank on the other side of the disagreement.
        peer: usize,
        /// What disagreed.
        detail: String,
    },

    /// A remote directory read addressed a block the owning peer does not
    /// hold.
    #[error("rank {rank}: directory miss for leaf {leaf} on peer {peer}")]
    DirectoryMiss {
        /// Rank that issued the read.
        rank: usize,
        /// Peer the read was addressed to.
        peer: usize,
        /// Dense octree leaf index of the requested block.
        leaf: usize,
    },

    /// A site slot that must map to a collision bucket turned out solid.
    #[error("site at {0:?} has no collision bucket (solid or malformed type)")]
    UnclassifiableSite(I64Vec3),

    /// The read geometry violates its own declared shape (wrong number of
    /// link records, bad block payload length, zero block size).
    #[error("malformed read geometry: {0}")]
    MalformedGeometry(String),

    /// A structural invariant of the catalogue or exchange tables does not
    /// hold.
    #[error("internal invariant violated: {0}")]
    InvariantViolated(String),

    /// The underlying transport failed a point-to-point or collective
    /// operation.
    #[error("transport failure during {op} with peer {peer}")]
    Transport {
        /// Label of the failed operation.
        op: &'static str,
        /// Peer rank involved, or this rank for collectives.
        peer: usize,
    },
}
