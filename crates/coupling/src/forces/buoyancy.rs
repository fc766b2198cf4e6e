//! Archimedes buoyancy.

use glam::DVec3;

use super::{ForceAccumulator, ForceContext, ForceLaw};
use crate::config::CouplingConfig;
use crate::voidfraction::sphere_volume;

/// Weight of the displaced fluid, −ρ_f·V·g, purely explicit. The
/// computational volume already holds the parcel's cg³ grains, so no extra
/// coarse-graining factor appears.
#[derive(Debug, Clone)]
pub struct ArchimedesBuoyancy {
    fluid_density: f64,
    gravity: DVec3,
}

impl ArchimedesBuoyancy {
    pub fn new(fluid_density: f64, gravity: DVec3) -> Self {
        Self {
            fluid_density,
            gravity,
        }
    }

    pub fn from_config(config: &CouplingConfig) -> Self {
        Self::new(config.fluid_density, config.gravity)
    }
}

impl ForceLaw for ArchimedesBuoyancy {
    fn name(&self) -> &'static str {
        "ArchimedesBuoyancy"
    }

    fn contribute(&self, i: usize, ctx: &ForceContext<'_>, acc: &mut ForceAccumulator) {
        let volume = sphere_volume(ctx.radii[i]);
        acc.add_explicit(-self.fluid_density * volume * self.gravity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_buoyancy_points_against_gravity() {
        let law = ArchimedesBuoyancy::new(1000.0, DVec3::new(0.0, -9.81, 0.0));
        let positions = [DVec3::ZERO];
        let velocities = [DVec3::ZERO];
        let fluid_velocities = [DVec3::ZERO];
        let radii = [0.01];
        let void_fractions = [1.0];
        let ctx = ForceContext {
            dt: 0.01,
            coarse_graining: 1.0,
            positions: &positions,
            velocities: &velocities,
            fluid_velocities: &fluid_velocities,
            radii: &radii,
            void_fractions: &void_fractions,
        };
        let mut acc = ForceAccumulator::default();
        law.contribute(0, &ctx, &mut acc);

        let expected = 1000.0 * sphere_volume(0.01) * 9.81;
        assert_relative_eq!(acc.running_explicit().y, expected, max_relative = 1e-12);
        assert_eq!(acc.running_explicit().x, 0.0);
        assert_eq!(acc.running_implicit_coeff(), 0.0, "buoyancy is explicit only");
    }
}
