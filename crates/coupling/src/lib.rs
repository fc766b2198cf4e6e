//! CFD-DEM coupling engine.
//!
//! Sits between a cell-based flow solver (the "fluid side", reached through
//! the narrow [`CouplingMesh`] trait) and an external discrete-particle
//! engine (the "DEM side", reached through [`DataExchange`]). Per coupling
//! interval it refreshes per-particle state, locates particles in cells,
//! computes cell void fractions, averages data both directions, aggregates
//! fluid-particle forces under an implicit/explicit split, and hands the
//! forces back to the DEM side.
//!
//! The engine never integrates particle motion and never solves flow; it
//! produces correctly scaled fields and per-particle arrays for the two host
//! solvers.

pub mod averaging;
pub mod config;
pub mod constants;
pub mod error;
pub mod exchange;
pub mod fields;
pub mod forces;
pub mod locate;
pub mod mesh;
pub mod registry;
mod serde_utils;
pub mod voidfraction;

pub use config::{
    AveragingScheme, CouplingConfig, FluidInterpolation, ParticleShape, ShapeCapability,
    VoidFractionScheme,
};
pub use error::{CouplingError, SetupError};
pub use exchange::DataExchange;
pub use fields::{ScalarField, VectorField};
pub use forces::{blended_force, ForceAccumulator, ForceContext, ForceLaw, ForceModelList};
pub use locate::LocateStats;
pub use mesh::{BlockMesh, CouplingMesh, UNLOCATED};
pub use registry::{ParticleRegistry, UserFieldHandle, UserFieldKind};
pub use voidfraction::{DdtVoidfraction, DepositTable, VoidFractionStats};

use glam::DVec3;
use log::{debug, info, trace};

use averaging::MeanBuffers;
use voidfraction::VoidFractionModel;

/// Outcome of one coupling interval.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepStats {
    pub particles: usize,
    pub located: usize,
    pub unlocated: usize,
    pub clamped_cells: usize,
    pub deposited_volume: f64,
    pub reallocated: bool,
}

/// The coupling engine: owns the per-particle registry and the sub-models,
/// and drives one coupling interval per [`evolve`] call.
///
/// [`evolve`]: CouplingSimulation::evolve
pub struct CouplingSimulation<M: CouplingMesh> {
    mesh: M,
    config: CouplingConfig,
    registry: ParticleRegistry,
    forces: ForceModelList,
    void_fraction: VoidFractionModel,
    deposit_table: DepositTable,
    mean_buffers: MeanBuffers,
    /// Mean particle velocity per cell (zero where no particles live).
    particle_velocity: VectorField,
    /// Implicit momentum-exchange coefficient per cell volume (s·k / V).
    coupling_coeff: ScalarField,
    ddt_voidfraction: Option<DdtVoidfraction>,
    blend_scratch: Vec<DVec3>,
    coeff_scratch: Vec<f64>,
    cg_confirmed: bool,
    step: u64,
    last_stats: StepStats,
}

impl<M: CouplingMesh> CouplingSimulation<M> {
    /// Validates the config, builds the configured force chain, and sizes the
    /// cell-indexed internals to the mesh.
    pub fn new(mesh: M, config: CouplingConfig) -> Result<Self, SetupError> {
        config.validate()?;
        let forces = ForceModelList::build(&config)?;
        Ok(Self::assemble(mesh, config, forces))
    }

    /// Like [`new`], but with an already-constructed force chain: the
    /// extension point for host-defined laws.
    ///
    /// [`new`]: CouplingSimulation::new
    pub fn with_force_laws(
        mesh: M,
        config: CouplingConfig,
        laws: Vec<Box<dyn ForceLaw>>,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let forces = ForceModelList::with_laws(laws, &config)?;
        Ok(Self::assemble(mesh, config, forces))
    }

    fn assemble(mesh: M, config: CouplingConfig, forces: ForceModelList) -> Self {
        info!(
            "coupling setup: force laws {:?}, void fraction {:?}, averaging {:?}, \
             interpolation {:?}, cg {}, split {}",
            forces.names(),
            config.void_fraction_scheme,
            config.averaging_scheme,
            config.interpolation,
            config.coarse_graining,
            config.im_ex_split,
        );
        let cells = mesh.cell_count();
        Self {
            registry: ParticleRegistry::new(config.shape),
            void_fraction: VoidFractionModel::from_config(&config),
            deposit_table: DepositTable::default(),
            mean_buffers: MeanBuffers::new(cells),
            particle_velocity: VectorField::zeros(cells),
            coupling_coeff: ScalarField::zeros(cells),
            ddt_voidfraction: config
                .track_ddt_voidfraction
                .then(|| DdtVoidfraction::new(cells)),
            blend_scratch: Vec::new(),
            coeff_scratch: Vec::new(),
            cg_confirmed: !config.check_coarse_graining,
            step: 0,
            last_stats: StepStats::default(),
            forces,
            config,
            mesh,
        }
    }

    pub fn mesh(&self) -> &M {
        &self.mesh
    }

    pub fn config(&self) -> &CouplingConfig {
        &self.config
    }

    pub fn registry(&self) -> &ParticleRegistry {
        &self.registry
    }

    /// Mutable registry access, e.g. for user-field registration at setup.
    pub fn registry_mut(&mut self) -> &mut ParticleRegistry {
        &mut self.registry
    }

    pub fn step_count(&self) -> u64 {
        self.step
    }

    pub fn last_stats(&self) -> StepStats {
        self.last_stats
    }

    /// Mean particle velocity per cell, from the last interval.
    pub fn particle_velocity_field(&self) -> &VectorField {
        &self.particle_velocity
    }

    /// Implicit momentum-exchange coefficient field (s·k per cell volume),
    /// the sink-term input for the flow solver's matrix.
    pub fn coupling_coefficient_field(&self) -> &ScalarField {
        &self.coupling_coeff
    }

    /// Rate-of-change field of the void fraction, when tracking is enabled.
    pub fn ddt_voidfraction(&self) -> Option<&ScalarField> {
        self.ddt_voidfraction.as_ref().map(DdtVoidfraction::field)
    }

    /// Runs one coupling interval. Returns whether the step produced a
    /// structurally valid coupling (at least one particle located).
    ///
    /// `void_fraction` and `fluid_force` are rebuilt from scratch;
    /// `fluid_velocity` is the flow solver's current state.
    pub fn evolve(
        &mut self,
        exchange: &mut dyn DataExchange,
        void_fraction: &mut ScalarField,
        fluid_velocity: &VectorField,
        fluid_force: &mut VectorField,
        dt: f64,
    ) -> Result<bool, CouplingError> {
        let cells = self.mesh.cell_count();
        check_field_len("void_fraction", cells, void_fraction.len())?;
        check_field_len("fluid_velocity", cells, fluid_velocity.len())?;
        check_field_len("fluid_force", cells, fluid_force.len())?;

        // === 1. Refresh the particle population ===
        self.registry.begin_step();
        let n = exchange.particle_count();
        self.registry.set_count(n);
        let reallocated = self.registry.realloc(false);
        self.registry.reset_step_arrays();

        // === 2. Pull DEM state ===
        {
            let (positions, velocities, radii, dem_forces) = self.registry.pull_views();
            exchange.pull_state(positions, velocities, radii, dem_forces);
        }
        if let Some(omega) = self.registry.angular_velocities_mut() {
            exchange.pull_angular_velocities(omega);
        }

        // === 3. First contact: coarse-graining consistency ===
        if !self.cg_confirmed {
            self.check_coarse_graining()?;
            self.cg_confirmed = true;
        }

        // === 4. Locate particles (seeded by the previous owning cells) ===
        let located = {
            let (positions, cell_seeds) = self.registry.locate_views();
            locate::find_cells(&self.mesh, positions, cell_seeds)
        };

        // === 5. Void fraction ===
        VoidFractionModel::reset(void_fraction);
        let vf_stats = self.void_fraction.compute(
            &self.mesh,
            &mut self.registry,
            void_fraction,
            &mut self.deposit_table,
        );
        if let Some(ddt) = &mut self.ddt_voidfraction {
            ddt.update(void_fraction, dt);
        }

        // === 6. Fluid velocity at particles, mean particle velocity field ===
        {
            let (positions, cell_ids, fluid_at) = self.registry.sample_views();
            averaging::sample_vector_at_particles(
                &self.mesh,
                fluid_velocity,
                positions,
                cell_ids,
                self.config.interpolation,
                fluid_at,
            );
        }
        averaging::mean_vector(
            self.config.averaging_scheme,
            &self.deposit_table,
            self.registry.cells(),
            self.registry.velocities(),
            &mut self.mean_buffers,
            &mut self.particle_velocity,
        );

        // === 7. Force aggregation ===
        {
            let views = self.registry.force_pass_views();
            let ctx = ForceContext {
                dt,
                coarse_graining: self.config.coarse_graining,
                positions: views.positions,
                velocities: views.velocities,
                fluid_velocities: views.fluid_velocities,
                radii: views.radii,
                void_fractions: views.void_fractions,
            };
            self.forces.aggregate(
                &ctx,
                views.cells,
                views.explicit,
                views.implicit,
                views.dem,
                views.coeffs,
                views.torques,
            );
        }

        if self.config.verbose {
            for i in 0..self.registry.count() {
                trace!(
                    "particle {i}: cell {}, vf {:.4}, u_f {:?}, dem force {:?}",
                    self.registry.cell(i),
                    self.registry.void_fraction_at(i),
                    self.registry.fluid_velocities()[i],
                    self.registry.dem_forces()[i]
                );
            }
        }

        // === 8. Fluid-side source fields ===
        self.build_source_fields(fluid_force);

        // === 9. Outbound push, then zeroize user fields ===
        exchange.push_forces(self.registry.dem_forces(), self.registry.torques());
        for (name, values) in self.registry.user_scalar_fields() {
            exchange.push_user_scalar(name, values);
        }
        for (name, values) in self.registry.user_vector_fields() {
            exchange.push_user_vector(name, values);
        }
        self.registry.zero_user_fields();

        // === 10. Bookkeeping ===
        self.step += 1;
        self.last_stats = StepStats {
            particles: n,
            located: located.located,
            unlocated: located.unlocated,
            clamped_cells: vf_stats.clamped_cells,
            deposited_volume: vf_stats.deposited_volume,
            reallocated,
        };
        debug!(
            "coupling step {}: {} particles, {} located, {} clamped cells, solid volume {:.3e}",
            self.step, n, located.located, vf_stats.clamped_cells, vf_stats.deposited_volume
        );
        Ok(located.located > 0)
    }

    /// Reaction of the particle forces on the fluid: the blended explicit
    /// source (−f_blend / V) and the implicit coefficient field (s·k / V).
    fn build_source_fields(&mut self, fluid_force: &mut VectorField) {
        let n = self.registry.count();
        let split = self.config.im_ex_split;

        fluid_force.fill(DVec3::ZERO);
        self.coupling_coeff.fill(0.0);

        self.blend_scratch.resize(n, DVec3::ZERO);
        self.coeff_scratch.resize(n, 0.0);
        {
            let explicit = self.registry.explicit_forces();
            let implicit = self.registry.implicit_forces();
            let coeffs = self.registry.drag_coefficients();
            for i in 0..n {
                self.blend_scratch[i] = -blended_force(explicit[i], implicit[i], split);
                self.coeff_scratch[i] = split * coeffs[i];
            }
        }

        averaging::deposit_vector(
            self.config.averaging_scheme,
            &self.deposit_table,
            self.registry.cells(),
            &self.blend_scratch,
            fluid_force,
        );
        averaging::deposit_scalar(
            self.config.averaging_scheme,
            &self.deposit_table,
            self.registry.cells(),
            &self.coeff_scratch,
            &mut self.coupling_coeff,
        );

        for c in 0..self.mesh.cell_count() {
            let volume = self.mesh.cell_volume(c);
            fluid_force[c] /= volume;
            self.coupling_coeff[c] /= volume;
        }
    }

    fn check_coarse_graining(&self) -> Result<(), SetupError> {
        let cg = self.config.coarse_graining;
        let Some(d_ref) = self.config.reference_diameter else {
            return Ok(());
        };
        let expected = cg * d_ref;
        let tolerance = constants::CG_DIAMETER_TOLERANCE;
        for (i, &r) in self.registry.radii().iter().enumerate() {
            let observed = 2.0 * r;
            if (observed - expected).abs() > tolerance * expected {
                return Err(SetupError::CoarseGrainingMismatch {
                    index: i,
                    observed,
                    expected,
                    tolerance: tolerance * 100.0,
                    cg,
                });
            }
        }
        debug!(
            "coarse-graining check passed: cg {}, reference diameter {:.3e}, d32 {:.3e}",
            cg,
            d_ref,
            self.registry.d32()
        );
        Ok(())
    }

    /// Per-cell voidage-scaled effective viscosity, vf·ν_eff.
    pub fn voidfraction_nu_eff(
        &self,
        void_fraction: &ScalarField,
        nu_eff: &ScalarField,
    ) -> ScalarField {
        debug_assert_eq!(void_fraction.len(), nu_eff.len());
        let mut out = ScalarField::zeros(void_fraction.len());
        for c in 0..out.len() {
            out[c] = void_fraction[c] * nu_eff[c];
        }
        out
    }

    /// Explicit divergence of the voidage-scaled viscous stress,
    /// div(vf·ν_eff·grad u), assembled over the mesh's internal faces and
    /// normalized by cell volume.
    pub fn div_voidfraction_tau(
        &self,
        u: &VectorField,
        void_fraction: &ScalarField,
        nu_eff: &ScalarField,
    ) -> VectorField {
        debug_assert_eq!(u.len(), self.mesh.cell_count());
        let mut out = VectorField::zeros(u.len());
        self.mesh.for_each_internal_face(&mut |a, b, area, dist| {
            let nu_face =
                0.5 * (void_fraction[a] * nu_eff[a] + void_fraction[b] * nu_eff[b]);
            let flux = nu_face * area / dist * (u[b] - u[a]);
            out[a] += flux;
            out[b] -= flux;
        });
        for c in 0..out.len() {
            out[c] /= self.mesh.cell_volume(c);
        }
        out
    }
}

fn check_field_len(
    field: &'static str,
    expected: usize,
    found: usize,
) -> Result<(), CouplingError> {
    if expected == found {
        Ok(())
    } else {
        Err(CouplingError::FieldSizeMismatch {
            field,
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sim(mesh: BlockMesh) -> CouplingSimulation<BlockMesh> {
        CouplingSimulation::new(mesh, CouplingConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let mesh = BlockMesh::cube(2, 1.0);
        let config = CouplingConfig {
            im_ex_split: 2.0,
            ..Default::default()
        };
        assert!(CouplingSimulation::new(mesh, config).is_err());
    }

    #[test]
    fn test_nu_eff_is_voidage_scaled() {
        let s = sim(BlockMesh::cube(2, 1.0));
        let mut vf = ScalarField::constant(8, 0.5);
        vf[3] = 1.0;
        let nu = ScalarField::constant(8, 1e-6);
        let out = s.voidfraction_nu_eff(&vf, &nu);
        assert_relative_eq!(out[0], 5e-7, epsilon = 1e-18);
        assert_relative_eq!(out[3], 1e-6, epsilon = 1e-18);
    }

    #[test]
    fn test_div_tau_vanishes_for_uniform_velocity() {
        let s = sim(BlockMesh::cube(3, 0.5));
        let cells = s.mesh().cell_count();
        let mut u = VectorField::zeros(cells);
        u.fill(DVec3::new(0.3, -0.1, 0.2));
        let vf = ScalarField::constant(cells, 0.9);
        let nu = ScalarField::constant(cells, 1e-6);
        let out = s.div_voidfraction_tau(&u, &vf, &nu);
        for c in 0..cells {
            assert!(
                out[c].length() < 1e-15,
                "uniform flow must not diffuse, cell {c}: {:?}",
                out[c]
            );
        }
    }

    #[test]
    fn test_div_tau_two_cell_exchange() {
        let s = sim(BlockMesh::new(2, 1, 1, 1.0, glam::DVec3::ZERO));
        let mut u = VectorField::zeros(2);
        u[1] = DVec3::new(1.0, 0.0, 0.0);
        let vf = ScalarField::constant(2, 1.0);
        let nu = ScalarField::constant(2, 1.0);
        let out = s.div_voidfraction_tau(&u, &vf, &nu);
        assert_relative_eq!(out[0].x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(out[1].x, -1.0, epsilon = 1e-12);
        // Momentum-conserving: contributions cancel over the pair.
        assert_relative_eq!(out[0].x + out[1].x, 0.0, epsilon = 1e-12);
    }
}
