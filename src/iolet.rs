//! Inlet and outlet boundary conditions.
//!
//! Each iolet is a plane (centre, unit normal, radius) carrying either a
//! pressure-driven or a velocity-driven condition, expressed as one variant
//! of [`IoletKind`]. Kernels interrogate an iolet through two capability
//! methods: [`Iolet::density_at`] for the imposed lattice density and
//! [`Iolet::momentum_at`] for the imposed velocity at a point of the plane;
//! [`Iolet::matches`] classifies which streamer family applies.
//!
//! Quantities are in lattice units throughout; times are in time steps.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Reference lattice density imposed when a condition fixes none.
pub const REFERENCE_DENSITY: f64 = 1.0;

/// Which streamer family a boundary condition drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryKind {
    /// Density (pressure) is imposed.
    Pressure,
    /// Velocity is imposed.
    Velocity,
}

/// The condition carried by an iolet plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IoletKind {
    /// Constant density.
    Pressure {
        /// Imposed lattice density.
        density: f64,
    },
    /// Sinusoidal density about a mean.
    CosinePressure {
        /// Mean lattice density.
        mean_density: f64,
        /// Oscillation amplitude.
        amplitude: f64,
        /// Phase offset in radians.
        phase: f64,
        /// Oscillation period in time steps.
        period: f64,
    },
    /// Density sampled from a table, linearly interpolated.
    FilePressure {
        /// `(time, density)` samples in ascending time order.
        samples: Vec<(f64, f64)>,
    },
    /// Uniform plug velocity over the plane.
    Velocity {
        /// Imposed speed along the normal.
        max_speed: f64,
    },
    /// Poiseuille profile, zero at the rim.
    ParabolicVelocity {
        /// Centreline speed.
        max_speed: f64,
    },
    /// Oscillatory Poiseuille (pulsatile) profile.
    WomersleyVelocity {
        /// Amplitude of the driving pressure gradient.
        pressure_gradient_amplitude: f64,
        /// Oscillation period in time steps.
        period: f64,
        /// Womersley number of the vessel.
        womersley_number: f64,
    },
    /// Plug speed sampled from a table, linearly interpolated.
    FileVelocity {
        /// `(time, speed)` samples in ascending time order.
        samples: Vec<(f64, f64)>,
    },
}

/// One inlet or outlet plane and its condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iolet {
    /// Identifier matching `SiteData::iolet_id`.
    pub id: i32,
    /// Centre of the plane, in lattice coordinates.
    pub position: Vec3,
    /// Unit normal pointing into the fluid.
    pub normal: Vec3,
    /// Radius of the plane, in lattice units.
    pub radius: f64,
    /// The imposed condition.
    pub kind: IoletKind,
}

impl Iolet {
    /// Whether this iolet drives streamers of `required` kind.
    pub fn matches(&self, required: BoundaryKind) -> bool {
        let kind = match self.kind {
            IoletKind::Pressure { .. }
            | IoletKind::CosinePressure { .. }
            | IoletKind::FilePressure { .. } => BoundaryKind::Pressure,
            IoletKind::Velocity { .. }
            | IoletKind::ParabolicVelocity { .. }
            | IoletKind::WomersleyVelocity { .. }
            | IoletKind::FileVelocity { .. } => BoundaryKind::Velocity,
        };
        kind == required
    }

    /// The lattice density imposed at `time`.
    ///
    /// Velocity-driven iolets fix no density and report
    /// [`REFERENCE_DENSITY`].
    pub fn density_at(&self, time: f64) -> f64 {
        match &self.kind {
            IoletKind::Pressure { density } => *density,
            IoletKind::CosinePressure {
                mean_density,
                amplitude,
                phase,
                period,
            } => {
                let omega = std::f64::consts::TAU / period;
                mean_density + amplitude * (omega * time + phase).cos()
            }
            IoletKind::FilePressure { samples } => interpolate(samples, time),
            _ => REFERENCE_DENSITY,
        }
    }

    /// The velocity imposed at `position` on the plane at `time`.
    ///
    /// Pressure-driven iolets impose no velocity and return zero.
    pub fn momentum_at(&self, position: Vec3, time: f64) -> Vec3 {
        let xi = self.radial_fraction(position);
        if xi > 1.0 {
            return Vec3::ZERO;
        }
        let speed = match &self.kind {
            IoletKind::Velocity { max_speed } => *max_speed,
            IoletKind::ParabolicVelocity { max_speed } => max_speed * (1.0 - xi * xi),
            IoletKind::WomersleyVelocity {
                pressure_gradient_amplitude,
                period,
                womersley_number,
            } => womersley_speed(
                *pressure_gradient_amplitude,
                *period,
                *womersley_number,
                xi,
                time,
            ),
            IoletKind::FileVelocity { samples } => interpolate(samples, time),
            _ => return Vec3::ZERO,
        };
        self.normal * speed as f32
    }

    /// Distance of `position` from the iolet axis, as a fraction of the
    /// radius.
    fn radial_fraction(&self, position: Vec3) -> f64 {
        let offset = position - self.position;
        let axial = offset.dot(self.normal);
        let radial = (offset - self.normal * axial).length() as f64;
        radial / self.radius
    }
}

/// Piecewise-linear lookup over ascending `(t, v)` samples, clamped at the
/// ends.
fn interpolate(samples: &[(f64, f64)], t: f64) -> f64 {
    match samples {
        [] => 0.0,
        [(_, only)] => *only,
        [(t0, v0), ..] if t <= *t0 => *v0,
        [.., (t1, v1)] if t >= *t1 => *v1,
        _ => {
            let hi = samples.partition_point(|&(ts, _)| ts < t);
            let (ta, va) = samples[hi - 1];
            let (tb, vb) = samples[hi];
            va + (vb - va) * (t - ta) / (tb - ta)
        }
    }
}

#[derive(Clone, Copy)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    const ONE: Complex = Complex { re: 1.0, im: 0.0 };

    fn from_polar(r: f64, theta: f64) -> Self {
        Complex {
            re: r * theta.cos(),
            im: r * theta.sin(),
        }
    }

    fn mul(self, o: Complex) -> Complex {
        Complex {
            re: self.re * o.re - self.im * o.im,
            im: self.re * o.im + self.im * o.re,
        }
    }

    fn sub(self, o: Complex) -> Complex {
        Complex {
            re: self.re - o.re,
            im: self.im - o.im,
        }
    }

    fn div(self, o: Complex) -> Complex {
        let d = o.re * o.re + o.im * o.im;
        Complex {
            re: (self.re * o.re + self.im * o.im) / d,
            im: (self.im * o.re - self.re * o.im) / d,
        }
    }

    fn scale(self, s: f64) -> Complex {
        Complex {
            re: self.re * s,
            im: self.im * s,
        }
    }
}

/// Bessel `J0` by its power series; converges comfortably in `f64` for the
/// Womersley numbers of physiological flow.
fn bessel_j0(z: Complex) -> Complex {
    let quarter_z2 = z.mul(z).scale(0.25);
    let mut term = Complex::ONE;
    let mut sum = Complex::ONE;
    for k in 1..=40 {
        term = term.mul(quarter_z2).scale(-1.0 / ((k * k) as f64));
        sum = Complex {
            re: sum.re + term.re,
            im: sum.im + term.im,
        };
    }
    sum
}

/// Axial speed of the Womersley solution at radial fraction `xi`.
fn womersley_speed(gradient_amplitude: f64, period: f64, alpha: f64, xi: f64, time: f64) -> f64 {
    let omega = std::f64::consts::TAU / period;
    // i^(3/2), the argument rotation of the Womersley profile.
    let i_three_halves = Complex::from_polar(1.0, 3.0 * std::f64::consts::FRAC_PI_4);
    let edge = i_three_halves.scale(alpha);
    let ratio = bessel_j0(edge.scale(xi)).div(bessel_j0(edge));
    let envelope = Complex::ONE.sub(ratio);
    let phasor = Complex::from_polar(1.0, omega * time);
    // u = Re{ i G/ω (1 - J0(αξ i^{3/2})/J0(α i^{3/2})) e^{iωt} }
    let factor = Complex {
        re: 0.0,
        im: gradient_amplitude / omega,
    };
    factor.mul(envelope).mul(phasor).re
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(kind: IoletKind) -> Iolet {
        Iolet {
            id: 0,
            position: Vec3::ZERO,
            normal: Vec3::X,
            radius: 4.0,
            kind,
        }
    }

    #[test]
    fn classification_splits_families() {
        let p = plane(IoletKind::Pressure { density: 1.0 });
        assert!(p.matches(BoundaryKind::Pressure));
        assert!(!p.matches(BoundaryKind::Velocity));
        let v = plane(IoletKind::ParabolicVelocity { max_speed: 0.01 });
        assert!(v.matches(BoundaryKind::Velocity));
    }

    #[test]
    fn cosine_pressure_oscillates_about_mean() {
        let p = plane(IoletKind::CosinePressure {
            mean_density: 1.0,
            amplitude: 0.1,
            phase: 0.0,
            period: 100.0,
        });
        assert!((p.density_at(0.0) - 1.1).abs() < 1e-12);
        assert!((p.density_at(50.0) - 0.9).abs() < 1e-12);
        assert!((p.density_at(25.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn file_pressure_interpolates_and_clamps() {
        let p = plane(IoletKind::FilePressure {
            samples: vec![(0.0, 1.0), (10.0, 2.0)],
        });
        assert_eq!(p.density_at(-5.0), 1.0);
        assert_eq!(p.density_at(5.0), 1.5);
        assert_eq!(p.density_at(20.0), 2.0);
    }

    #[test]
    fn parabolic_profile_vanishes_at_rim() {
        let v = plane(IoletKind::ParabolicVelocity { max_speed: 0.02 });
        let centre = v.momentum_at(Vec3::ZERO, 0.0);
        assert!((centre.x - 0.02).abs() < 1e-6);
        let rim = v.momentum_at(Vec3::new(0.0, 4.0, 0.0), 0.0);
        assert!(rim.length() < 1e-6);
        // Outside the plane disc there is no imposed momentum.
        let outside = v.momentum_at(Vec3::new(0.0, 5.0, 0.0), 0.0);
        assert_eq!(outside, Vec3::ZERO);
    }

    #[test]
    fn pressure_imposes_no_momentum() {
        let p = plane(IoletKind::Pressure { density: 1.0 });
        assert_eq!(p.momentum_at(Vec3::ZERO, 0.0), Vec3::ZERO);
    }

    #[test]
    fn womersley_profile_is_zero_at_the_wall_and_periodic() {
        let v = plane(IoletKind::WomersleyVelocity {
            pressure_gradient_amplitude: 0.001,
            period: 200.0,
            womersley_number: 3.0,
        });
        let wall = v.momentum_at(Vec3::new(0.0, 4.0, 0.0), 37.0);
        assert!(wall.length() < 1e-8, "no slip at the rim");
        let a = v.momentum_at(Vec3::new(0.0, 1.0, 0.0), 13.0);
        let b = v.momentum_at(Vec3::new(0.0, 1.0, 0.0), 213.0);
        assert!((a.x - b.x).abs() < 1e-8, "one period apart");
    }

    #[test]
    fn low_womersley_number_approaches_poiseuille_shape() {
        // As alpha → 0 the oscillatory profile tends to a quasi-steady
        // parabola; check the centre-to-mid ratio at peak flow.
        let v = plane(IoletKind::WomersleyVelocity {
            pressure_gradient_amplitude: 0.001,
            period: 1000.0,
            womersley_number: 0.3,
        });
        // Scan one period for the peak centreline speed.
        let mut peak_t = 0.0;
        let mut peak = 0.0f64;
        for step in 0..1000 {
            let u = v.momentum_at(Vec3::ZERO, step as f64).x as f64;
            if u.abs() > peak.abs() {
                peak = u;
                peak_t = step as f64;
            }
        }
        let mid = v.momentum_at(Vec3::new(0.0, 2.0, 0.0), peak_t).x as f64;
        let ratio = mid / peak;
        assert!((ratio - 0.75).abs() < 0.05, "ratio {}", ratio);
    }

    #[test]
    fn serde_round_trip() {
        let v = plane(IoletKind::FileVelocity {
            samples: vec![(0.0, 0.0), (50.0, 0.01)],
        });
        let json = serde_json::to_string(&v).expect("serialize");
        let back: Iolet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, v);
    }
}
