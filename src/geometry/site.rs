//! Per-site classification data.
//!
//! A [`SiteData`] condenses what the streaming and collision kernels need to
//! know about one fluid site: its [`SiteType`], a bitmask of links that cross
//! a wall, a bitmask of links that cross an inlet or outlet plane, and the
//! identifier of that iolet. The derived [`CollisionBucket`] labels the six
//! kernel dispatch groups.

use serde::{Deserialize, Serialize};

use crate::lattice::Direction;

use super::read_result::SiteReadResult;

/// Number of collision dispatch groups.
pub const COLLISION_TYPES: usize = 6;

/// Basic nature of a lattice site as recorded by the geometry preprocessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum SiteType {
    /// Not part of the fluid volume.
    Solid = 0,
    /// Bulk fluid.
    Fluid = 1,
    /// Fluid in an inlet boundary zone.
    Inlet = 2,
    /// Fluid in an outlet boundary zone.
    Outlet = 3,
}

/// What an outgoing link runs into before reaching its neighbour site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum CutType {
    /// The link reaches the neighbour unobstructed.
    #[default]
    None = 0,
    /// The link crosses the vessel wall.
    Wall = 1,
    /// The link crosses an inlet plane.
    Inlet = 2,
    /// The link crosses an outlet plane.
    Outlet = 3,
}

/// Collision dispatch group of a fluid site.
///
/// The discriminant is the bucket index used throughout the catalogue
/// ordering; sites are laid out bucket-by-bucket within the mid-domain and
/// domain-edge halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CollisionBucket {
    /// Bulk fluid, no wall contact.
    Fluid = 0,
    /// Fluid with at least one wall-crossing link.
    Wall = 1,
    /// Inlet site without wall contact.
    Inlet = 2,
    /// Outlet site without wall contact.
    Outlet = 3,
    /// Inlet site with wall contact.
    InletWall = 4,
    /// Outlet site with wall contact.
    OutletWall = 5,
}

impl CollisionBucket {
    /// All buckets in catalogue order.
    pub const ALL: [CollisionBucket; COLLISION_TYPES] = [
        CollisionBucket::Fluid,
        CollisionBucket::Wall,
        CollisionBucket::Inlet,
        CollisionBucket::Outlet,
        CollisionBucket::InletWall,
        CollisionBucket::OutletWall,
    ];

    /// The bucket's position in the catalogue ordering.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Condensed per-site classification record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteData {
    wall_intersection: u32,
    iolet_intersection: u32,
    site_type: SiteType,
    iolet_id: i32,
}

impl SiteData {
    /// Condense one read-geometry site record.
    ///
    /// Bit `q - 1` of the wall mask is set when the link in direction `q`
    /// crosses the wall; the iolet mask is set likewise for links crossing
    /// an inlet or outlet plane.
    pub fn from_read(site: &SiteReadResult) -> Self {
        let mut wall = 0u32;
        let mut iolet = 0u32;
        for (i, link) in site.links.iter().enumerate() {
            match link.cut_type {
                CutType::None => {}
                CutType::Wall => wall |= 1 << i,
                CutType::Inlet | CutType::Outlet => iolet |= 1 << i,
            }
        }
        SiteData {
            wall_intersection: wall,
            iolet_intersection: iolet,
            site_type: site.site_type,
            iolet_id: site.iolet_id,
        }
    }

    /// The site's basic type.
    #[inline]
    pub fn site_type(&self) -> SiteType {
        self.site_type
    }

    /// Identifier of the iolet this site belongs to, `-1` if none.
    #[inline]
    pub fn iolet_id(&self) -> i32 {
        self.iolet_id
    }

    /// True if any link from this site crosses the wall.
    #[inline]
    pub fn is_wall(&self) -> bool {
        self.wall_intersection != 0
    }

    /// True if the link in (non-rest) direction `q` crosses the wall.
    #[inline]
    pub fn has_wall(&self, q: Direction) -> bool {
        debug_assert!(q >= 1);
        self.wall_intersection & (1 << (q - 1)) != 0
    }

    /// True if the link in (non-rest) direction `q` crosses an iolet plane.
    #[inline]
    pub fn has_iolet(&self, q: Direction) -> bool {
        debug_assert!(q >= 1);
        self.iolet_intersection & (1 << (q - 1)) != 0
    }

    /// Raw wall-intersection bitmask.
    #[inline]
    pub fn wall_intersection(&self) -> u32 {
        self.wall_intersection
    }

    /// Raw iolet-intersection bitmask.
    #[inline]
    pub fn iolet_intersection(&self) -> u32 {
        self.iolet_intersection
    }

    /// The collision dispatch group, or `None` for solid sites.
    pub fn collision_bucket(&self) -> Option<CollisionBucket> {
        let walled = self.wall_intersection != 0;
        match (self.site_type, walled) {
            (SiteType::Solid, _) => None,
            (SiteType::Fluid, false) => Some(CollisionBucket::Fluid),
            (SiteType::Fluid, true) => Some(CollisionBucket::Wall),
            (SiteType::Inlet, false) => Some(CollisionBucket::Inlet),
            (SiteType::Inlet, true) => Some(CollisionBucket::InletWall),
            (SiteType::Outlet, false) => Some(CollisionBucket::Outlet),
            (SiteType::Outlet, true) => Some(CollisionBucket::OutletWall),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::read_result::{LinkReadResult, SiteReadResult};
    use crate::geometry::SOLID_RANK;

    fn fluid_site(site_type: SiteType, cuts: &[(usize, CutType)]) -> SiteReadResult {
        let mut links = vec![LinkReadResult::default(); 14];
        for &(q, cut) in cuts {
            links[q - 1] = LinkReadResult {
                cut_type: cut,
                distance: 0.5,
            };
        }
        SiteReadResult {
            target_rank: 0,
            site_type,
            iolet_id: -1,
            wall_normal: None,
            links,
        }
    }

    #[test]
    fn bucket_table() {
        let plain = SiteData::from_read(&fluid_site(SiteType::Fluid, &[]));
        assert_eq!(plain.collision_bucket(), Some(CollisionBucket::Fluid));

        let walled = SiteData::from_read(&fluid_site(SiteType::Fluid, &[(1, CutType::Wall)]));
        assert_eq!(walled.collision_bucket(), Some(CollisionBucket::Wall));
        assert!(walled.has_wall(1));
        assert!(!walled.has_wall(2));

        let inlet = SiteData::from_read(&fluid_site(SiteType::Inlet, &[(3, CutType::Inlet)]));
        assert_eq!(inlet.collision_bucket(), Some(CollisionBucket::Inlet));
        assert!(inlet.has_iolet(3));

        let inlet_wall = SiteData::from_read(&fluid_site(
            SiteType::Inlet,
            &[(3, CutType::Inlet), (5, CutType::Wall)],
        ));
        assert_eq!(
            inlet_wall.collision_bucket(),
            Some(CollisionBucket::InletWall)
        );

        let outlet_wall = SiteData::from_read(&fluid_site(
            SiteType::Outlet,
            &[(2, CutType::Outlet), (7, CutType::Wall)],
        ));
        assert_eq!(
            outlet_wall.collision_bucket(),
            Some(CollisionBucket::OutletWall)
        );
    }

    #[test]
    fn solid_has_no_bucket() {
        let mut site = fluid_site(SiteType::Solid, &[]);
        site.target_rank = SOLID_RANK;
        assert_eq!(SiteData::from_read(&site).collision_bucket(), None);
    }

    #[test]
    fn masks_follow_link_direction() {
        let s = SiteData::from_read(&fluid_site(
            SiteType::Fluid,
            &[(1, CutType::Wall), (14, CutType::Wall)],
        ));
        assert_eq!(s.wall_intersection(), (1 << 0) | (1 << 13));
        assert!(s.has_wall(1));
        assert!(s.has_wall(14));
        assert_eq!(s.iolet_intersection(), 0);
    }
}
