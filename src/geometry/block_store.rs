//! Sparse spatial index over the occupied blocks of the universe.
//!
//! The store maps a 3D block coordinate to a dense *leaf index* in
//! `[0, block_count)`. Leaves are numbered in breadth-first octant-sorted
//! traversal order, realised here as Morton-key order over the occupied
//! block coordinates, so every worker derives identical numbering from the
//! identical global fluid census.

use glam::U16Vec3;

use crate::error::DomainError;

use super::morton::MortonKey;

/// One occupied block: its coordinate and dense leaf index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leaf {
    index: usize,
    coords: U16Vec3,
}

impl Leaf {
    /// Dense index of this leaf, monotone in traversal order.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Block coordinate of this leaf.
    #[inline]
    pub fn coords(&self) -> U16Vec3 {
        self.coords
    }
}

/// Octree over the occupied blocks, stored as the sorted key list.
#[derive(Debug, Clone)]
pub struct BlockStore {
    block_counts: U16Vec3,
    keys: Vec<MortonKey>,
    coords: Vec<U16Vec3>,
}

impl BlockStore {
    /// Build the store from the coordinates of every occupied block.
    ///
    /// # Determinism
    /// The leaf numbering depends only on the *set* of coordinates, never
    /// on their input order.
    pub fn new(block_counts: U16Vec3, occupied: impl IntoIterator<Item = U16Vec3>) -> Self {
        let mut keys: Vec<MortonKey> = occupied.into_iter().map(MortonKey::encode).collect();
        keys.sort_unstable();
        keys.dedup();
        let coords = keys.iter().map(|k| k.decode()).collect();
        BlockStore {
            block_counts,
            keys,
            coords,
        }
    }

    /// Number of occupied blocks.
    #[inline]
    pub fn block_count(&self) -> usize {
        self.keys.len()
    }

    /// Number of blocks along each axis of the universe grid.
    #[inline]
    pub fn block_counts(&self) -> U16Vec3 {
        self.block_counts
    }

    /// Look up the leaf for a block coordinate.
    ///
    /// # Errors
    /// Returns [`DomainError::OutOfDomain`] when the coordinate lies outside
    /// the universe grid. A valid coordinate whose block is wholly solid
    /// yields `Ok(None)`.
    pub fn get_leaf(&self, coords: U16Vec3) -> Result<Option<Leaf>, DomainError> {
        if coords.x >= self.block_counts.x
            || coords.y >= self.block_counts.y
            || coords.z >= self.block_counts.z
        {
            return Err(DomainError::OutOfDomain(coords));
        }
        let key = MortonKey::encode(coords);
        Ok(self
            .keys
            .binary_search(&key)
            .ok()
            .map(|index| Leaf { index, coords }))
    }

    /// The leaf at a dense index.
    ///
    /// # Panics
    /// Panics if `index >= block_count()`.
    #[inline]
    pub fn leaf(&self, index: usize) -> Leaf {
        Leaf {
            index,
            coords: self.coords[index],
        }
    }

    /// Block coordinate of the leaf at a dense index.
    #[inline]
    pub fn leaf_coords(&self, index: usize) -> U16Vec3 {
        self.coords[index]
    }

    /// Lazy traversal of all leaves in index order.
    pub fn iter_leaves(&self) -> impl Iterator<Item = Leaf> + '_ {
        self.coords
            .iter()
            .enumerate()
            .map(|(index, &coords)| Leaf { index, coords })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> BlockStore {
        BlockStore::new(
            U16Vec3::new(4, 4, 4),
            [
                U16Vec3::new(3, 1, 0),
                U16Vec3::new(0, 0, 0),
                U16Vec3::new(1, 0, 0),
                U16Vec3::new(0, 0, 1),
            ],
        )
    }

    #[test]
    fn leaf_indices_are_dense_and_monotone() {
        let s = store();
        assert_eq!(s.block_count(), 4);
        let indices: Vec<usize> = s.iter_leaves().map(|l| l.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
        for leaf in s.iter_leaves() {
            assert_eq!(s.get_leaf(leaf.coords()).unwrap().unwrap().index(), leaf.index());
        }
    }

    #[test]
    fn numbering_ignores_input_order() {
        let a = store();
        let b = BlockStore::new(
            U16Vec3::new(4, 4, 4),
            [
                U16Vec3::new(0, 0, 1),
                U16Vec3::new(1, 0, 0),
                U16Vec3::new(0, 0, 0),
                U16Vec3::new(3, 1, 0),
            ],
        );
        let ca: Vec<U16Vec3> = a.iter_leaves().map(|l| l.coords()).collect();
        let cb: Vec<U16Vec3> = b.iter_leaves().map(|l| l.coords()).collect();
        assert_eq!(ca, cb);
    }

    #[test]
    fn out_of_domain_is_an_error() {
        let s = store();
        assert!(matches!(
            s.get_leaf(U16Vec3::new(4, 0, 0)),
            Err(DomainError::OutOfDomain(_))
        ));
    }

    #[test]
    fn solid_block_is_absent_not_an_error() {
        let s = store();
        assert_eq!(s.get_leaf(U16Vec3::new(2, 2, 2)).unwrap(), None);
    }
}
