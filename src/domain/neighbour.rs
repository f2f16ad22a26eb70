//! Peer bookkeeping for the exchange topology.

use bytemuck::{Pod, Zeroable};
use glam::I64Vec3;
use serde::{Deserialize, Serialize};

use crate::lattice::Direction;

/// One peer worker this worker shares distributions with.
///
/// Peers appear in the order they were first discovered while walking the
/// domain-edge sites; the shared region of the distribution buffers is
/// partitioned contiguously across them in that order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighbouringProcessor {
    /// Peer rank.
    pub rank: i32,
    /// Number of distributions crossing to this peer each tick.
    pub shared_distribution_count: i64,
    /// First slot of this peer's run in the shared buffer region.
    pub first_shared_distribution: i64,
}

/// Wire record advertising one half of a shared link: the sending site's
/// global coordinate and outgoing direction, as four signed 64-bit values.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub(crate) struct LinkAdvert {
    x: i64,
    y: i64,
    z: i64,
    q: i64,
}

impl LinkAdvert {
    #[inline]
    pub(crate) fn new(coords: I64Vec3, q: Direction) -> Self {
        LinkAdvert {
            x: coords.x,
            y: coords.y,
            z: coords.z,
            q: q as i64,
        }
    }

    #[inline]
    pub(crate) fn coords(&self) -> I64Vec3 {
        I64Vec3::new(self.x, self.y, self.z)
    }

    #[inline]
    pub(crate) fn direction(&self) -> Direction {
        self.q as Direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advert_is_four_words() {
        assert_eq!(std::mem::size_of::<LinkAdvert>(), 32);
        let a = LinkAdvert::new(I64Vec3::new(5, -1, 7), 3);
        assert_eq!(a.coords(), I64Vec3::new(5, -1, 7));
        assert_eq!(a.direction(), 3);
    }
}
