//! Geometry data model: site classification, the read-geometry contract and
//! the sparse block store.
//!
//! This module re-exports the [`site`], [`read_result`], [`morton`] and
//! [`block_store`] submodules.

pub mod block_store;
pub mod morton;
pub mod read_result;
pub mod site;

pub use block_store::{BlockStore, Leaf};
pub use read_result::{BlockReadResult, GeometryReadResult, LinkReadResult, SiteReadResult};
pub use site::{CollisionBucket, CutType, SiteData, SiteType, COLLISION_TYPES};

/// Owner rank stored for solid sites and sites in wholly-solid blocks.
pub const SOLID_RANK: i32 = -1;

/// Owner rank recorded when the read geometry cannot name the owner (the
/// site is fluid but assigned to some other worker).
pub const UNKNOWN_RANK: i32 = -2;

/// Wall-normal sentinel stored when the read geometry carries no normal.
pub const NO_WALL_NORMAL: glam::Vec3 = glam::Vec3::splat(f32::MAX);
