//! DEM-side data boundary.
//!
//! One implementation per transport (in-process engine, socket bridge).
//! The engine always hands over slices pre-sized to the reported particle
//! count, so implementations never see a stale length.

use glam::DVec3;

/// Boundary to the external discrete-particle engine.
pub trait DataExchange {
    /// Particle count for the coupling interval about to run.
    fn particle_count(&mut self) -> usize;

    /// Fills the per-particle state pulled from the DEM side. `dem_forces`
    /// carries whatever force the particle engine reports inbound; leave it
    /// zeroed when it reports none.
    fn pull_state(
        &mut self,
        positions: &mut [DVec3],
        velocities: &mut [DVec3],
        radii: &mut [f64],
        dem_forces: &mut [DVec3],
    );

    /// Fills per-particle angular velocities. Called only for shape families
    /// that carry them.
    fn pull_angular_velocities(&mut self, _out: &mut [DVec3]) {}

    /// Receives the aggregated coupling forces for the next DEM integration
    /// window; `torques` accompanies them in shape-extended builds.
    fn push_forces(&mut self, forces: &[DVec3], torques: Option<&[DVec3]>);

    /// Receives one user-registered per-particle scalar field.
    fn push_user_scalar(&mut self, _name: &str, _values: &[f64]) {}

    /// Receives one user-registered per-particle vector field.
    fn push_user_vector(&mut self, _name: &str, _values: &[DVec3]) {}
}
