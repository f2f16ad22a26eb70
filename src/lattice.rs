//! Discrete velocity sets for the lattice-Boltzmann method.
//!
//! A [`LatticeDescriptor`] is a static table of the `Q` discrete velocities
//! `c_q`, their quadrature weights `w_q`, the inverse-direction mapping
//! `q̄` with `c[q̄] = -c[q]`, and the squared lattice speed of sound.
//! Direction 0 is always the rest vector. The engine default for vascular
//! flow is [`D3Q15`]; [`D3Q19`] and [`D3Q27`] are provided for kernels that
//! need higher isotropy.

use glam::I64Vec3;

/// Index of a discrete lattice velocity; `0` is the rest direction.
pub type Direction = usize;

/// Static description of one discrete velocity set.
///
/// All tables are `'static`; a descriptor is shared by reference and never
/// mutated. There are no error paths.
#[derive(Debug)]
pub struct LatticeDescriptor {
    /// Human-readable name, e.g. `"D3Q15"`.
    pub name: &'static str,
    /// Discrete velocity vectors, components in `{-1, 0, 1}`; entry 0 is zero.
    pub velocities: &'static [I64Vec3],
    /// Quadrature weights, summing to 1, matching `velocities` by index.
    pub weights: &'static [f64],
    /// `inverse[q]` is the direction with `c[inverse[q]] = -c[q]`.
    pub inverse: &'static [Direction],
    /// Squared lattice speed of sound.
    pub cs2: f64,
}

impl LatticeDescriptor {
    /// Number of discrete velocities, including the rest direction.
    #[inline]
    pub fn num_vectors(&self) -> usize {
        self.velocities.len()
    }

    /// The velocity vector for direction `q`.
    #[inline]
    pub fn velocity(&self, q: Direction) -> I64Vec3 {
        self.velocities[q]
    }

    /// The direction opposite to `q`.
    #[inline]
    pub fn inverse(&self, q: Direction) -> Direction {
        self.inverse[q]
    }

    /// The quadrature weight for direction `q`.
    #[inline]
    pub fn weight(&self, q: Direction) -> f64 {
        self.weights[q]
    }
}

const fn v(x: i64, y: i64, z: i64) -> I64Vec3 {
    I64Vec3::new(x, y, z)
}

/// Fifteen-velocity set: rest, 6 face and 8 corner directions.
pub static D3Q15: LatticeDescriptor = LatticeDescriptor {
    name: "D3Q15",
    velocities: &[
        v(0, 0, 0),
        v(1, 0, 0),
        v(-1, 0, 0),
        v(0, 1, 0),
        v(0, -1, 0),
        v(0, 0, 1),
        v(0, 0, -1),
        v(1, 1, 1),
        v(-1, -1, -1),
        v(1, 1, -1),
        v(-1, -1, 1),
        v(1, -1, 1),
        v(-1, 1, -1),
        v(1, -1, -1),
        v(-1, 1, 1),
    ],
    weights: &[
        2.0 / 9.0,
        1.0 / 9.0,
        1.0 / 9.0,
        1.0 / 9.0,
        1.0 / 9.0,
        1.0 / 9.0,
        1.0 / 9.0,
        1.0 / 72.0,
        1.0 / 72.0,
        1.0 / 72.0,
        1.0 / 72.0,
        1.0 / 72.0,
        1.0 / 72.0,
        1.0 / 72.0,
        1.0 / 72.0,
    ],
    inverse: &[0, 2, 1, 4, 3, 6, 5, 8, 7, 10, 9, 12, 11, 14, 13],
    cs2: 1.0 / 3.0,
};

/// Nineteen-velocity set: rest, 6 face and 12 edge directions.
pub static D3Q19: LatticeDescriptor = LatticeDescriptor {
    name: "D3Q19",
    velocities: &[
        v(0, 0, 0),
        v(1, 0, 0),
        v(-1, 0, 0),
        v(0, 1, 0),
        v(0, -1, 0),
        v(0, 0, 1),
        v(0, 0, -1),
        v(1, 1, 0),
        v(-1, -1, 0),
        v(1, -1, 0),
        v(-1, 1, 0),
        v(1, 0, 1),
        v(-1, 0, -1),
        v(1, 0, -1),
        v(-1, 0, 1),
        v(0, 1, 1),
        v(0, -1, -1),
        v(0, 1, -1),
        v(0, -1, 1),
    ],
    weights: &[
        1.0 / 3.0,
        1.0 / 18.0,
        1.0 / 18.0,
        1.0 / 18.0,
        1.0 / 18.0,
        1.0 / 18.0,
        1.0 / 18.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
        1.0 / 36.0,
    ],
    inverse: &[0, 2, 1, 4, 3, 6, 5, 8, 7, 10, 9, 12, 11, 14, 13, 16, 15, 18, 17],
    cs2: 1.0 / 3.0,
};

/// Twenty-seven-velocity set: rest, 6 face, 12 edge and 8 corner directions.
pub static D3Q27: LatticeDescriptor = LatticeDescriptor {
    name: "D3Q27",
    velocities: &[
        v(0, 0, 0),
        v(1, 0, 0),
        v(-1, 0, 0),
        v(0, 1, 0),
        v(0, -1, 0),
        v(0, 0, 1),
        v(0, 0, -1),
        v(1, 1, 0),
        v(-1, -1, 0),
        v(1, -1, 0),
        v(-1, 1, 0),
        v(1, 0, 1),
        v(-1, 0, -1),
        v(1, 0, -1),
        v(-1, 0, 1),
        v(0, 1, 1),
        v(0, -1, -1),
        v(0, 1, -1),
        v(0, -1, 1),
        v(1, 1, 1),
        v(-1, -1, -1),
        v(1, 1, -1),
        v(-1, -1, 1),
        v(1, -1, 1),
        v(-1, 1, -1),
        v(1, -1, -1),
        v(-1, 1, 1),
    ],
    weights: &[
        8.0 / 27.0,
        2.0 / 27.0,
        2.0 / 27.0,
        2.0 / 27.0,
        2.0 / 27.0,
        2.0 / 27.0,
        2.0 / 27.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 54.0,
        1.0 / 216.0,
        1.0 / 216.0,
        1.0 / 216.0,
        1.0 / 216.0,
        1.0 / 216.0,
        1.0 / 216.0,
        1.0 / 216.0,
        1.0 / 216.0,
    ],
    inverse: &[
        0, 2, 1, 4, 3, 6, 5, 8, 7, 10, 9, 12, 11, 14, 13, 16, 15, 18, 17, 20, 19, 22, 21, 24, 23,
        26, 25,
    ],
    cs2: 1.0 / 3.0,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn check(lat: &LatticeDescriptor) {
        let q = lat.num_vectors();
        assert_eq!(lat.weights.len(), q);
        assert_eq!(lat.inverse.len(), q);
        assert_eq!(lat.velocity(0), I64Vec3::ZERO);

        // Inversion is an involution that negates the velocity.
        for d in 0..q {
            assert_eq!(lat.velocity(lat.inverse(d)), -lat.velocity(d), "{}", d);
            assert_eq!(lat.inverse(lat.inverse(d)), d);
        }

        // Weights are a partition of unity.
        let sum: f64 = lat.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-14, "{} weight sum {}", lat.name, sum);

        // First and second velocity moments: zero mean, cs2-isotropic.
        let mean = lat.velocities.iter().fold(I64Vec3::ZERO, |a, &c| a + c);
        assert_eq!(mean, I64Vec3::ZERO);
        for a in 0..3 {
            for b in 0..3 {
                let m2: f64 = (0..q)
                    .map(|d| {
                        let c = lat.velocity(d).to_array();
                        lat.weight(d) * c[a] as f64 * c[b] as f64
                    })
                    .sum();
                let expect = if a == b { lat.cs2 } else { 0.0 };
                assert!((m2 - expect).abs() < 1e-14, "{} m2[{}][{}]", lat.name, a, b);
            }
        }
    }

    #[test]
    fn d3q15_tables() {
        assert_eq!(D3Q15.num_vectors(), 15);
        check(&D3Q15);
    }

    #[test]
    fn d3q19_tables() {
        assert_eq!(D3Q19.num_vectors(), 19);
        check(&D3Q19);
    }

    #[test]
    fn d3q27_tables() {
        assert_eq!(D3Q27.num_vectors(), 27);
        check(&D3Q27);
    }
}
