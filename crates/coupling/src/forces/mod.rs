//! Fluid-particle force aggregation.
//!
//! Force laws are named contributors invoked in configured order, once per
//! particle per coupling interval. A law adds a velocity-independent explicit
//! part `f_exp` and/or an implicit coefficient `k >= 0` that multiplies the
//! particle velocity. The engine derives
//!
//! ```text
//! f_imp  = -k_total · v_particle
//! f_full = f_exp + f_imp              (raw force, sent to the DEM side)
//! f_blend = f_exp + (1 - s) · f_imp   (fluid-side explicit source)
//! ```
//!
//! with split factor `s` (0 = fully explicit, 1 = fully implicit); the
//! remaining `s · k_total` rides the flow solver's matrix as a sink term.
//! Later laws in the chain see the running sums left by earlier ones.

mod buoyancy;
mod drag;

pub use buoyancy::ArchimedesBuoyancy;
pub use drag::SchillerNaumannDrag;

use std::fmt;

use glam::DVec3;
use rayon::prelude::*;

use crate::config::{CouplingConfig, ShapeCapability};
use crate::error::SetupError;
use crate::mesh::UNLOCATED;

/// Read-only per-particle inputs offered to every force law.
pub struct ForceContext<'a> {
    /// Coupling interval (s).
    pub dt: f64,
    /// Coarse-graining factor: each computational parcel stands for cg³
    /// physical grains of diameter d/cg.
    pub coarse_graining: f64,
    pub positions: &'a [DVec3],
    pub velocities: &'a [DVec3],
    pub fluid_velocities: &'a [DVec3],
    pub radii: &'a [f64],
    pub void_fractions: &'a [f64],
}

/// Running sums for one particle, visible to later laws in the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceAccumulator {
    explicit: DVec3,
    implicit_coeff: f64,
    torque: DVec3,
}

impl ForceAccumulator {
    pub fn add_explicit(&mut self, f: DVec3) {
        self.explicit += f;
    }

    /// `k` multiplies the particle velocity on the implicit side; negative
    /// coefficients would turn the sink into a source.
    pub fn add_implicit_coeff(&mut self, k: f64) {
        debug_assert!(k >= 0.0, "implicit coefficient must be non-negative");
        self.implicit_coeff += k;
    }

    /// Hydrodynamic torque about the particle centre. Persisted only for
    /// shape families that carry torque arrays; laws that depend on it being
    /// exchanged declare [`ShapeCapability::Torque`].
    pub fn add_torque(&mut self, t: DVec3) {
        self.torque += t;
    }

    pub fn running_explicit(&self) -> DVec3 {
        self.explicit
    }

    pub fn running_implicit_coeff(&self) -> f64 {
        self.implicit_coeff
    }

    pub fn running_torque(&self) -> DVec3 {
        self.torque
    }
}

/// One named force contributor.
pub trait ForceLaw: Send + Sync {
    fn name(&self) -> &'static str;

    /// Shape data this law needs beyond the sphere baseline. Checked when
    /// the model list is built.
    fn required_capabilities(&self) -> &'static [ShapeCapability] {
        &[]
    }

    /// Adds the law's contribution for particle `i`.
    fn contribute(&self, i: usize, ctx: &ForceContext<'_>, acc: &mut ForceAccumulator);
}

/// Ordered force-law chain.
pub struct ForceModelList {
    laws: Vec<Box<dyn ForceLaw>>,
}

impl fmt::Debug for ForceModelList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForceModelList")
            .field("laws", &self.names())
            .finish()
    }
}

impl ForceModelList {
    /// Instantiates the laws named in the config, in order.
    pub fn build(config: &CouplingConfig) -> Result<Self, SetupError> {
        let mut laws: Vec<Box<dyn ForceLaw>> = Vec::with_capacity(config.force_laws.len());
        for name in &config.force_laws {
            let law: Box<dyn ForceLaw> = match name.as_str() {
                "SchillerNaumannDrag" => Box::new(SchillerNaumannDrag::from_config(config)),
                "ArchimedesBuoyancy" => Box::new(ArchimedesBuoyancy::from_config(config)),
                _ => return Err(SetupError::UnknownForceLaw(name.clone())),
            };
            laws.push(law);
        }
        Self::with_laws(laws, config)
    }

    /// Assembles a chain from already-constructed laws (the extension point
    /// for host-defined laws). Capability requirements are checked against
    /// the configured shape family here; a mismatch never survives setup.
    pub fn with_laws(
        laws: Vec<Box<dyn ForceLaw>>,
        config: &CouplingConfig,
    ) -> Result<Self, SetupError> {
        for law in &laws {
            for &capability in law.required_capabilities() {
                if !config.shape.supports(capability) {
                    return Err(SetupError::UnsupportedCapability {
                        law: law.name(),
                        capability,
                        shape: config.shape,
                    });
                }
            }
        }
        Ok(Self { laws })
    }

    pub fn len(&self) -> usize {
        self.laws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.laws.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.laws.iter().map(|l| l.name()).collect()
    }

    /// Runs the chain for every located particle and fills the per-particle
    /// output arrays: explicit force, implicit force (−k·v), raw DEM force
    /// (their sum), and the total implicit coefficient. `torques` is the
    /// shape-extended torque array when the registry carries one. Unlocated
    /// particles are written as zeros. Particle-parallel; laws only read
    /// shared state.
    pub fn aggregate(
        &self,
        ctx: &ForceContext<'_>,
        cells: &[i32],
        explicit: &mut [DVec3],
        implicit: &mut [DVec3],
        dem: &mut [DVec3],
        coeffs: &mut [f64],
        torques: Option<&mut [DVec3]>,
    ) {
        let outputs = explicit
            .par_iter_mut()
            .zip(implicit.par_iter_mut())
            .zip(dem.par_iter_mut())
            .zip(coeffs.par_iter_mut());
        match torques {
            Some(torques) => outputs.zip(torques.par_iter_mut()).enumerate().for_each(
                |(i, ((((f_exp, f_imp), f_dem), k), torque))| {
                    let acc = self.run_chain(i, ctx, cells);
                    *f_exp = acc.explicit;
                    *f_imp = -acc.implicit_coeff * ctx.velocities[i];
                    *f_dem = *f_exp + *f_imp;
                    *k = acc.implicit_coeff;
                    *torque = acc.torque;
                },
            ),
            None => outputs
                .enumerate()
                .for_each(|(i, (((f_exp, f_imp), f_dem), k))| {
                    let acc = self.run_chain(i, ctx, cells);
                    *f_exp = acc.explicit;
                    *f_imp = -acc.implicit_coeff * ctx.velocities[i];
                    *f_dem = *f_exp + *f_imp;
                    *k = acc.implicit_coeff;
                }),
        }
    }

    fn run_chain(&self, i: usize, ctx: &ForceContext<'_>, cells: &[i32]) -> ForceAccumulator {
        let mut acc = ForceAccumulator::default();
        if cells[i] == UNLOCATED {
            return acc;
        }
        for law in &self.laws {
            law.contribute(i, ctx, &mut acc);
        }
        acc
    }
}

/// Fluid-side explicit source for one particle under split factor `s`.
pub fn blended_force(explicit: DVec3, implicit: DVec3, split: f64) -> DVec3 {
    explicit + (1.0 - split) * implicit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParticleShape;
    use approx::assert_relative_eq;

    /// Fixed explicit part and implicit coefficient, for contract tests.
    struct StubLaw {
        f_exp: DVec3,
        k: f64,
    }

    impl ForceLaw for StubLaw {
        fn name(&self) -> &'static str {
            "Stub"
        }
        fn contribute(&self, _i: usize, _ctx: &ForceContext<'_>, acc: &mut ForceAccumulator) {
            acc.add_explicit(self.f_exp);
            acc.add_implicit_coeff(self.k);
        }
    }

    /// Doubles whatever explicit force the chain has accumulated so far.
    struct DoublingLaw;

    impl ForceLaw for DoublingLaw {
        fn name(&self) -> &'static str {
            "Doubling"
        }
        fn contribute(&self, _i: usize, _ctx: &ForceContext<'_>, acc: &mut ForceAccumulator) {
            acc.add_explicit(acc.running_explicit());
        }
    }

    struct OrientationLaw;

    impl ForceLaw for OrientationLaw {
        fn name(&self) -> &'static str {
            "Orientation"
        }
        fn required_capabilities(&self) -> &'static [ShapeCapability] {
            &[ShapeCapability::Orientation]
        }
        fn contribute(&self, _i: usize, _ctx: &ForceContext<'_>, _acc: &mut ForceAccumulator) {}
    }

    /// Records a fixed torque, for the rotation plumbing.
    struct SpinLaw {
        torque: DVec3,
    }

    impl ForceLaw for SpinLaw {
        fn name(&self) -> &'static str {
            "Spin"
        }
        fn required_capabilities(&self) -> &'static [ShapeCapability] {
            &[ShapeCapability::Torque]
        }
        fn contribute(&self, _i: usize, _ctx: &ForceContext<'_>, acc: &mut ForceAccumulator) {
            acc.add_torque(self.torque);
        }
    }

    fn make_ctx<'a>(
        velocities: &'a [DVec3],
        fluid: &'a [DVec3],
        radii: &'a [f64],
        vf: &'a [f64],
        positions: &'a [DVec3],
    ) -> ForceContext<'a> {
        ForceContext {
            dt: 0.01,
            coarse_graining: 1.0,
            positions,
            velocities,
            fluid_velocities: fluid,
            radii,
            void_fractions: vf,
        }
    }

    #[test]
    fn test_split_contract_blend_and_raw() {
        // One law: explicit 10, implicit coefficient 2; particle velocity 1.
        let config = CouplingConfig::default();
        let list = ForceModelList::with_laws(
            vec![Box::new(StubLaw {
                f_exp: DVec3::new(10.0, 0.0, 0.0),
                k: 2.0,
            })],
            &config,
        )
        .unwrap();

        let positions = [DVec3::ZERO];
        let velocities = [DVec3::new(1.0, 0.0, 0.0)];
        let fluid = [DVec3::ZERO];
        let radii = [0.01];
        let vf = [1.0];
        let ctx = make_ctx(&velocities, &fluid, &radii, &vf, &positions);

        let cells = [0i32];
        let mut explicit = [DVec3::ZERO];
        let mut implicit = [DVec3::ZERO];
        let mut dem = [DVec3::ZERO];
        let mut coeffs = [0.0];
        list.aggregate(&ctx, &cells, &mut explicit, &mut implicit, &mut dem, &mut coeffs, None);

        assert_relative_eq!(dem[0].x, 8.0, epsilon = 1e-12);
        assert_relative_eq!(coeffs[0], 2.0, epsilon = 1e-12);
        let blend = blended_force(explicit[0], implicit[0], 0.5);
        assert_relative_eq!(blend.x, 9.0, epsilon = 1e-12);
        // Split extremes: fully explicit carries the whole force, fully
        // implicit carries only the velocity-independent part.
        assert_relative_eq!(blended_force(explicit[0], implicit[0], 0.0).x, 8.0, epsilon = 1e-12);
        assert_relative_eq!(blended_force(explicit[0], implicit[0], 1.0).x, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_chain_order_is_visible_to_later_laws() {
        let config = CouplingConfig::default();
        let stub = || {
            Box::new(StubLaw {
                f_exp: DVec3::new(1.0, 0.0, 0.0),
                k: 0.0,
            }) as Box<dyn ForceLaw>
        };
        let forward =
            ForceModelList::with_laws(vec![stub(), Box::new(DoublingLaw)], &config).unwrap();
        let backward =
            ForceModelList::with_laws(vec![Box::new(DoublingLaw), stub()], &config).unwrap();

        let positions = [DVec3::ZERO];
        let velocities = [DVec3::ZERO];
        let fluid = [DVec3::ZERO];
        let radii = [0.01];
        let vf = [1.0];
        let ctx = make_ctx(&velocities, &fluid, &radii, &vf, &positions);
        let cells = [0i32];

        let run = |list: &ForceModelList| {
            let mut explicit = [DVec3::ZERO];
            let mut implicit = [DVec3::ZERO];
            let mut dem = [DVec3::ZERO];
            let mut coeffs = [0.0];
            list.aggregate(&ctx, &cells, &mut explicit, &mut implicit, &mut dem, &mut coeffs, None);
            explicit[0].x
        };
        assert_eq!(run(&forward), 2.0, "stub then doubling: 1 doubled to 2");
        assert_eq!(run(&backward), 1.0, "doubling saw nothing, stub adds 1");
    }

    #[test]
    fn test_unlocated_particles_report_zero() {
        let config = CouplingConfig::default();
        let list = ForceModelList::with_laws(
            vec![Box::new(StubLaw {
                f_exp: DVec3::ONE,
                k: 1.0,
            })],
            &config,
        )
        .unwrap();

        let positions = [DVec3::ZERO];
        let velocities = [DVec3::ONE];
        let fluid = [DVec3::ZERO];
        let radii = [0.01];
        let vf = [1.0];
        let ctx = make_ctx(&velocities, &fluid, &radii, &vf, &positions);

        let cells = [UNLOCATED];
        let mut explicit = [DVec3::ONE];
        let mut implicit = [DVec3::ONE];
        let mut dem = [DVec3::ONE];
        let mut coeffs = [5.0];
        list.aggregate(&ctx, &cells, &mut explicit, &mut implicit, &mut dem, &mut coeffs, None);
        assert_eq!(dem[0], DVec3::ZERO);
        assert_eq!(explicit[0], DVec3::ZERO);
        assert_eq!(coeffs[0], 0.0);
    }

    #[test]
    fn test_unknown_law_name_is_setup_error() {
        let config = CouplingConfig {
            force_laws: vec!["NoSuchLaw".to_string()],
            ..Default::default()
        };
        let err = ForceModelList::build(&config).unwrap_err();
        assert!(matches!(err, SetupError::UnknownForceLaw(name) if name == "NoSuchLaw"));
    }

    #[test]
    fn test_capability_mismatch_rejected_at_build() {
        let config = CouplingConfig::default(); // Sphere
        let err =
            ForceModelList::with_laws(vec![Box::new(OrientationLaw)], &config).unwrap_err();
        match err {
            SetupError::UnsupportedCapability { law, capability, shape } => {
                assert_eq!(law, "Orientation");
                assert_eq!(capability, ShapeCapability::Orientation);
                assert_eq!(shape, ParticleShape::Sphere);
            }
            other => panic!("expected capability error, got {other}"),
        }
        // The same law is fine once the shape family carries orientations.
        let spheroid = CouplingConfig {
            shape: ParticleShape::Spheroid,
            ..Default::default()
        };
        assert!(ForceModelList::with_laws(vec![Box::new(OrientationLaw)], &spheroid).is_ok());
    }

    #[test]
    fn test_default_config_builds_both_laws() {
        let config = CouplingConfig::default();
        let list = ForceModelList::build(&config).unwrap();
        assert_eq!(list.names(), vec!["SchillerNaumannDrag", "ArchimedesBuoyancy"]);
    }

    /// The chain formats through `Debug` (law names, not law internals), so
    /// it can sit in result types and structs that derive it.
    #[test]
    fn test_model_list_debug_lists_law_names() {
        let list = ForceModelList::build(&CouplingConfig::default()).unwrap();
        let rendered = format!("{list:?}");
        assert!(
            rendered.contains("SchillerNaumannDrag") && rendered.contains("ArchimedesBuoyancy"),
            "unexpected rendering: {rendered}"
        );
    }

    #[test]
    fn test_torque_rides_its_own_output_array() {
        let spheroid = CouplingConfig {
            shape: ParticleShape::Spheroid,
            ..Default::default()
        };
        let list = ForceModelList::with_laws(
            vec![Box::new(SpinLaw {
                torque: DVec3::new(0.0, 0.0, 0.3),
            })],
            &spheroid,
        )
        .unwrap();

        let positions = [DVec3::ZERO; 2];
        let velocities = [DVec3::ZERO; 2];
        let fluid = [DVec3::ZERO; 2];
        let radii = [0.01; 2];
        let vf = [1.0; 2];
        let ctx = make_ctx(&velocities, &fluid, &radii, &vf, &positions);

        let cells = [0i32, UNLOCATED];
        let mut explicit = [DVec3::ZERO; 2];
        let mut implicit = [DVec3::ZERO; 2];
        let mut dem = [DVec3::ZERO; 2];
        let mut coeffs = [0.0; 2];
        let mut torques = [DVec3::ONE; 2];
        list.aggregate(
            &ctx,
            &cells,
            &mut explicit,
            &mut implicit,
            &mut dem,
            &mut coeffs,
            Some(&mut torques),
        );

        assert_eq!(torques[0], DVec3::new(0.0, 0.0, 0.3));
        assert_eq!(torques[1], DVec3::ZERO, "unlocated particles get zero torque");
        // A torque-only law leaves the translational outputs untouched.
        assert_eq!(dem[0], DVec3::ZERO);
        assert_eq!(coeffs[0], 0.0);
    }
}
