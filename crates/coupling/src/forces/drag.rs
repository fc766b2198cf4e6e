//! Schiller-Naumann drag.

use super::{ForceAccumulator, ForceContext, ForceLaw};
use crate::config::CouplingConfig;
use crate::constants::{NEWTON_REGIME_CD, NEWTON_REGIME_RE};

/// Drag per the Schiller-Naumann correlation, linearized as F = k·(u − v) so
/// the coefficient can ride the implicit side of the split:
///
/// ```text
/// Re = vf · |u − v| · d_phys / ν        d_phys = d / cg
/// Cd = 24/Re · (1 + 0.15 · Re^0.687)    Re < 1000, else 0.44
/// k  = ½ · ρ_f · Cd · (π/4) · d_phys² · |u − v| · cg³
/// ```
///
/// The |u − v| in k cancels against Cd's 24/Re below the crossover, which
/// keeps the Stokes limit k → 3π·μ·d_phys·cg³/vf finite at zero slip. The
/// cg³ factor converts one grain's drag to the parcel it stands for.
#[derive(Debug, Clone)]
pub struct SchillerNaumannDrag {
    fluid_density: f64,
    kinematic_viscosity: f64,
}

impl SchillerNaumannDrag {
    pub fn new(fluid_density: f64, kinematic_viscosity: f64) -> Self {
        Self {
            fluid_density,
            kinematic_viscosity,
        }
    }

    pub fn from_config(config: &CouplingConfig) -> Self {
        Self::new(config.fluid_density, config.kinematic_viscosity())
    }

    /// Linearized coefficient for a single physical grain.
    fn grain_coefficient(&self, d_phys: f64, slip_speed: f64, void_fraction: f64) -> f64 {
        if d_phys <= 0.0 {
            return 0.0;
        }
        let vf = void_fraction.max(f64::EPSILON);
        let re = vf * slip_speed * d_phys / self.kinematic_viscosity;
        let mu = self.fluid_density * self.kinematic_viscosity;
        if re < NEWTON_REGIME_RE {
            // ½·ρ·A·|ur|·(24/Re)(1 + 0.15·Re^0.687), with |ur| cancelled.
            3.0 * std::f64::consts::PI * mu * d_phys / vf * (1.0 + 0.15 * re.powf(0.687))
        } else {
            let area = std::f64::consts::FRAC_PI_4 * d_phys * d_phys;
            0.5 * self.fluid_density * NEWTON_REGIME_CD * area * slip_speed
        }
    }
}

impl ForceLaw for SchillerNaumannDrag {
    fn name(&self) -> &'static str {
        "SchillerNaumannDrag"
    }

    fn contribute(&self, i: usize, ctx: &ForceContext<'_>, acc: &mut ForceAccumulator) {
        let radius = ctx.radii[i];
        if radius <= 0.0 {
            return;
        }
        let cg = ctx.coarse_graining;
        let d_phys = 2.0 * radius / cg;
        let slip = ctx.fluid_velocities[i] - ctx.velocities[i];
        let k_grain = self.grain_coefficient(d_phys, slip.length(), ctx.void_fractions[i]);
        let k = k_grain * cg * cg * cg;
        acc.add_explicit(k * ctx.fluid_velocities[i]);
        acc.add_implicit_coeff(k);
    }
}
