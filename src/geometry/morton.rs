//! Morton (Z-order) keys over block coordinates.
//!
//! A block coordinate has 16-bit components, so three spread components fit
//! comfortably in a `u64`. Sorting blocks by Morton key yields exactly the
//! breadth-first, octant-sorted traversal order of the octree over the
//! occupied blocks, which is what makes the dense leaf numbering identical
//! on every worker.

use glam::U16Vec3;

/// Morton key of a block coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MortonKey(u64);

/// Spread the low 21 bits of `v` so consecutive bits land three apart.
const fn spread(v: u64) -> u64 {
    let mut x = v & 0x1f_ffff;
    x = (x | x << 32) & 0x1f00_0000_0000_ffff;
    x = (x | x << 16) & 0x1f00_00ff_0000_00ff;
    x = (x | x << 8) & 0x100f_00f0_0f00_f00f;
    x = (x | x << 4) & 0x10c3_0c30_c30c_30c3;
    (x | x << 2) & 0x1249_2492_4924_9249
}

/// Inverse of [`spread`]: gather every third bit back into the low bits.
const fn compact(v: u64) -> u64 {
    let mut x = v & 0x1249_2492_4924_9249;
    x = (x | x >> 2) & 0x10c3_0c30_c30c_30c3;
    x = (x | x >> 4) & 0x100f_00f0_0f00_f00f;
    x = (x | x >> 8) & 0x1f00_00ff_0000_00ff;
    x = (x | x >> 16) & 0x1f00_0000_0000_ffff;
    (x | x >> 32) & 0x1f_ffff
}

impl MortonKey {
    /// Encode a block coordinate; `x` occupies the most significant bit of
    /// each octant triple.
    pub fn encode(coords: U16Vec3) -> Self {
        MortonKey(
            spread(coords.x as u64) << 2 | spread(coords.y as u64) << 1 | spread(coords.z as u64),
        )
    }

    /// Decode back to the block coordinate.
    pub fn decode(self) -> U16Vec3 {
        U16Vec3::new(
            compact(self.0 >> 2) as u16,
            compact(self.0 >> 1) as u16,
            compact(self.0) as u16,
        )
    }

    /// Raw key value.
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for &(x, y, z) in &[
            (0u16, 0u16, 0u16),
            (1, 0, 0),
            (0, 1, 0),
            (0, 0, 1),
            (7, 3, 1),
            (255, 0, 255),
            (65535, 65535, 65535),
            (12345, 54321, 4242),
        ] {
            let c = U16Vec3::new(x, y, z);
            assert_eq!(MortonKey::encode(c).decode(), c);
        }
    }

    #[test]
    fn octant_order_within_parent() {
        // The eight children of the root octant sort z-fastest, x-slowest.
        let mut keys: Vec<(MortonKey, U16Vec3)> = Vec::new();
        for x in 0..2u16 {
            for y in 0..2u16 {
                for z in 0..2u16 {
                    let c = U16Vec3::new(x, y, z);
                    keys.push((MortonKey::encode(c), c));
                }
            }
        }
        let mut sorted = keys.clone();
        sorted.sort_by_key(|(k, _)| *k);
        assert_eq!(
            sorted.iter().map(|&(_, c)| c).collect::<Vec<_>>(),
            keys.iter().map(|&(_, c)| c).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn keys_are_strictly_monotone_per_octant_level() {
        // Any coordinate in the low octant sorts before any in the high one.
        let low = MortonKey::encode(U16Vec3::new(7, 7, 7));
        let high = MortonKey::encode(U16Vec3::new(8, 0, 0));
        assert!(low < high);
    }
}
