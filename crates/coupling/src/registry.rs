//! Per-particle storage.
//!
//! Structure-of-arrays: every attribute lives in its own growable array, all
//! kept at exactly the current particle count by [`ParticleRegistry::realloc`].
//! A reallocation preserves the overlapping prefix, zero-fills growth (cell
//! indices grow with the unlocated sentinel), and truncates on shrink, so no
//! stale entries survive a count change.
//!
//! Borrowed slice views are invalidated by a reallocation; the borrow checker
//! enforces that within a process, and the generation counter is the
//! observable for consumers that stage data across coupling intervals.
//! User-field handles index slots, not buffers, and stay valid across
//! reallocation.

use glam::{DQuat, DVec3};

use crate::config::ParticleShape;
use crate::error::SetupError;
use crate::mesh::UNLOCATED;

/// Kind of a registered user field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserFieldKind {
    Scalar,
    Vector,
}

/// Stable handle to a user field. Survives reallocation; does not survive
/// being used against a registry it was not issued by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserFieldHandle {
    kind: UserFieldKind,
    slot: usize,
}

impl UserFieldHandle {
    pub fn kind(&self) -> UserFieldKind {
        self.kind
    }
}

#[derive(Debug)]
struct UserScalar {
    name: String,
    values: Vec<f64>,
}

#[derive(Debug)]
struct UserVector {
    name: String,
    values: Vec<DVec3>,
}

/// Per-particle arrays that exist only for shape families that carry them.
#[derive(Debug)]
enum ShapeStorage {
    Sphere,
    Spheroid {
        axes: Vec<DVec3>,
        angular_velocities: Vec<DVec3>,
        torques: Vec<DVec3>,
    },
    Superquadric {
        orientations: Vec<DQuat>,
        blockiness: Vec<[f64; 2]>,
        angular_velocities: Vec<DVec3>,
        torques: Vec<DVec3>,
    },
}

impl ShapeStorage {
    fn new(shape: ParticleShape) -> Self {
        match shape {
            ParticleShape::Sphere => ShapeStorage::Sphere,
            ParticleShape::Spheroid => ShapeStorage::Spheroid {
                axes: Vec::new(),
                angular_velocities: Vec::new(),
                torques: Vec::new(),
            },
            ParticleShape::Superquadric => ShapeStorage::Superquadric {
                orientations: Vec::new(),
                blockiness: Vec::new(),
                angular_velocities: Vec::new(),
                torques: Vec::new(),
            },
        }
    }

    fn resize(&mut self, n: usize) {
        match self {
            ShapeStorage::Sphere => {}
            ShapeStorage::Spheroid {
                axes,
                angular_velocities,
                torques,
            } => {
                axes.resize(n, DVec3::Y);
                angular_velocities.resize(n, DVec3::ZERO);
                torques.resize(n, DVec3::ZERO);
            }
            ShapeStorage::Superquadric {
                orientations,
                blockiness,
                angular_velocities,
                torques,
            } => {
                orientations.resize(n, DQuat::IDENTITY);
                blockiness.resize(n, [2.0, 2.0]);
                angular_velocities.resize(n, DVec3::ZERO);
                torques.resize(n, DVec3::ZERO);
            }
        }
    }
}

/// Disjoint registry views handed to the force pass.
pub(crate) struct ForcePassViews<'a> {
    pub positions: &'a [DVec3],
    pub velocities: &'a [DVec3],
    pub fluid_velocities: &'a [DVec3],
    pub radii: &'a [f64],
    pub void_fractions: &'a [f64],
    pub cells: &'a [i32],
    pub explicit: &'a mut [DVec3],
    pub implicit: &'a mut [DVec3],
    pub dem: &'a mut [DVec3],
    pub coeffs: &'a mut [f64],
    /// Present for shape families that exchange torques.
    pub torques: Option<&'a mut [DVec3]>,
}

/// All per-particle state the coupling engine exchanges and derives.
#[derive(Debug)]
pub struct ParticleRegistry {
    shape: ParticleShape,
    count: usize,
    count_changed: bool,
    arrays_reallocated: bool,
    generation: u64,

    positions: Vec<DVec3>,
    velocities: Vec<DVec3>,
    fluid_velocities: Vec<DVec3>,
    radii: Vec<f64>,
    explicit_forces: Vec<DVec3>,
    implicit_forces: Vec<DVec3>,
    dem_forces: Vec<DVec3>,
    drag_coefficients: Vec<f64>,
    cells: Vec<i32>,
    weights: Vec<f64>,
    void_fractions: Vec<f64>,

    shape_data: ShapeStorage,
    user_scalars: Vec<UserScalar>,
    user_vectors: Vec<UserVector>,
}

impl ParticleRegistry {
    pub fn new(shape: ParticleShape) -> Self {
        Self {
            shape,
            count: 0,
            count_changed: false,
            arrays_reallocated: false,
            generation: 0,
            positions: Vec::new(),
            velocities: Vec::new(),
            fluid_velocities: Vec::new(),
            radii: Vec::new(),
            explicit_forces: Vec::new(),
            implicit_forces: Vec::new(),
            dem_forces: Vec::new(),
            drag_coefficients: Vec::new(),
            cells: Vec::new(),
            weights: Vec::new(),
            void_fractions: Vec::new(),
            shape_data: ShapeStorage::new(shape),
            user_scalars: Vec::new(),
            user_vectors: Vec::new(),
        }
    }

    pub fn shape(&self) -> ParticleShape {
        self.shape
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Records the particle count reported for this coupling interval.
    pub fn set_count(&mut self, n: usize) {
        if n != self.count {
            self.count_changed = true;
        }
        self.count = n;
    }

    pub fn count_changed(&self) -> bool {
        self.count_changed
    }

    /// Whether this interval resized the arrays. Cleared by [`begin_step`].
    ///
    /// [`begin_step`]: ParticleRegistry::begin_step
    pub fn arrays_reallocated(&self) -> bool {
        self.arrays_reallocated
    }

    /// Bumped on every reallocation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Opens a coupling interval: clears the per-interval realloc observable.
    pub fn begin_step(&mut self) {
        self.arrays_reallocated = false;
    }

    /// Resizes every attribute array to the current count if the count changed
    /// since the last reallocation, or unconditionally with `force`. Returns
    /// whether a resize happened.
    pub fn realloc(&mut self, force: bool) -> bool {
        if !self.count_changed && !force {
            return false;
        }
        let n = self.count;
        self.positions.resize(n, DVec3::ZERO);
        self.velocities.resize(n, DVec3::ZERO);
        self.fluid_velocities.resize(n, DVec3::ZERO);
        self.radii.resize(n, 0.0);
        self.explicit_forces.resize(n, DVec3::ZERO);
        self.implicit_forces.resize(n, DVec3::ZERO);
        self.dem_forces.resize(n, DVec3::ZERO);
        self.drag_coefficients.resize(n, 0.0);
        self.cells.resize(n, UNLOCATED);
        self.weights.resize(n, 0.0);
        self.void_fractions.resize(n, 1.0);
        self.shape_data.resize(n);
        for field in &mut self.user_scalars {
            field.values.resize(n, 0.0);
        }
        for field in &mut self.user_vectors {
            field.values.resize(n, DVec3::ZERO);
        }
        self.count_changed = false;
        self.arrays_reallocated = true;
        self.generation += 1;
        true
    }

    /// Zeroes the per-interval derived arrays: forces, torques, drag
    /// coefficients, deposit weights; void fractions reset to all-fluid.
    /// Pulled state (positions, velocities, radii) is left for the exchange
    /// to overwrite.
    pub fn reset_step_arrays(&mut self) {
        self.fluid_velocities.fill(DVec3::ZERO);
        self.explicit_forces.fill(DVec3::ZERO);
        self.implicit_forces.fill(DVec3::ZERO);
        self.dem_forces.fill(DVec3::ZERO);
        self.drag_coefficients.fill(0.0);
        self.weights.fill(0.0);
        self.void_fractions.fill(1.0);
        match &mut self.shape_data {
            ShapeStorage::Sphere => {}
            ShapeStorage::Spheroid { torques, .. }
            | ShapeStorage::Superquadric { torques, .. } => torques.fill(DVec3::ZERO),
        }
    }

    // === Attribute views ===

    pub fn positions(&self) -> &[DVec3] {
        &self.positions
    }

    pub fn positions_mut(&mut self) -> &mut [DVec3] {
        &mut self.positions
    }

    pub fn velocities(&self) -> &[DVec3] {
        &self.velocities
    }

    pub fn velocities_mut(&mut self) -> &mut [DVec3] {
        &mut self.velocities
    }

    pub fn fluid_velocities(&self) -> &[DVec3] {
        &self.fluid_velocities
    }

    pub fn fluid_velocities_mut(&mut self) -> &mut [DVec3] {
        &mut self.fluid_velocities
    }

    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    pub fn radii_mut(&mut self) -> &mut [f64] {
        &mut self.radii
    }

    pub fn explicit_forces(&self) -> &[DVec3] {
        &self.explicit_forces
    }

    pub fn implicit_forces(&self) -> &[DVec3] {
        &self.implicit_forces
    }

    pub fn dem_forces(&self) -> &[DVec3] {
        &self.dem_forces
    }

    pub fn dem_forces_mut(&mut self) -> &mut [DVec3] {
        &mut self.dem_forces
    }

    pub fn drag_coefficients(&self) -> &[f64] {
        &self.drag_coefficients
    }

    pub fn cells(&self) -> &[i32] {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut [i32] {
        &mut self.cells
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    pub fn void_fractions(&self) -> &[f64] {
        &self.void_fractions
    }

    pub fn void_fractions_mut(&mut self) -> &mut [f64] {
        &mut self.void_fractions
    }

    /// Split borrow for the void-fraction set-back pass: (deposit weights,
    /// per-particle void fractions).
    pub(crate) fn deposit_write_views(&mut self) -> (&mut [f64], &mut [f64]) {
        (&mut self.weights, &mut self.void_fractions)
    }

    /// Split borrow for the inbound pull: positions, velocities, radii,
    /// DEM-reported forces.
    pub(crate) fn pull_views(
        &mut self,
    ) -> (&mut [DVec3], &mut [DVec3], &mut [f64], &mut [DVec3]) {
        (
            &mut self.positions,
            &mut self.velocities,
            &mut self.radii,
            &mut self.dem_forces,
        )
    }

    /// Split borrow for the locate pass: read positions, write cells.
    pub(crate) fn locate_views(&mut self) -> (&[DVec3], &mut [i32]) {
        (&self.positions, &mut self.cells)
    }

    /// Split borrow for fluid sampling: positions and cells read, fluid
    /// velocities written.
    pub(crate) fn sample_views(&mut self) -> (&[DVec3], &[i32], &mut [DVec3]) {
        (&self.positions, &self.cells, &mut self.fluid_velocities)
    }

    /// Disjoint views for the force pass: read-only particle state alongside
    /// the output arrays.
    pub(crate) fn force_pass_views(&mut self) -> ForcePassViews<'_> {
        let torques = match &mut self.shape_data {
            ShapeStorage::Sphere => None,
            ShapeStorage::Spheroid { torques, .. }
            | ShapeStorage::Superquadric { torques, .. } => Some(torques.as_mut_slice()),
        };
        ForcePassViews {
            positions: &self.positions,
            velocities: &self.velocities,
            fluid_velocities: &self.fluid_velocities,
            radii: &self.radii,
            void_fractions: &self.void_fractions,
            cells: &self.cells,
            explicit: &mut self.explicit_forces,
            implicit: &mut self.implicit_forces,
            dem: &mut self.dem_forces,
            coeffs: &mut self.drag_coefficients,
            torques,
        }
    }

    // === Single-particle convenience ===

    pub fn position(&self, i: usize) -> DVec3 {
        self.positions[i]
    }

    pub fn velocity(&self, i: usize) -> DVec3 {
        self.velocities[i]
    }

    pub fn radius(&self, i: usize) -> f64 {
        self.radii[i]
    }

    pub fn diameter(&self, i: usize) -> f64 {
        2.0 * self.radii[i]
    }

    pub fn cell(&self, i: usize) -> i32 {
        self.cells[i]
    }

    pub fn void_fraction_at(&self, i: usize) -> f64 {
        self.void_fractions[i]
    }

    /// Sauter mean diameter Σd³/Σd², zero when no particles are present.
    pub fn d32(&self) -> f64 {
        let mut d2 = 0.0;
        let mut d3 = 0.0;
        for &r in &self.radii {
            let d = 2.0 * r;
            d2 += d * d;
            d3 += d * d * d;
        }
        if d2 > 0.0 {
            d3 / d2
        } else {
            0.0
        }
    }

    // === Shape-extended arrays (None for shape families without them) ===

    /// Torques the force pass recorded this interval, for the outbound push.
    pub fn torques(&self) -> Option<&[DVec3]> {
        match &self.shape_data {
            ShapeStorage::Sphere => None,
            ShapeStorage::Spheroid { torques, .. }
            | ShapeStorage::Superquadric { torques, .. } => Some(torques),
        }
    }

    pub fn angular_velocities(&self) -> Option<&[DVec3]> {
        match &self.shape_data {
            ShapeStorage::Sphere => None,
            ShapeStorage::Spheroid {
                angular_velocities, ..
            }
            | ShapeStorage::Superquadric {
                angular_velocities, ..
            } => Some(angular_velocities),
        }
    }

    pub fn angular_velocities_mut(&mut self) -> Option<&mut [DVec3]> {
        match &mut self.shape_data {
            ShapeStorage::Sphere => None,
            ShapeStorage::Spheroid {
                angular_velocities, ..
            }
            | ShapeStorage::Superquadric {
                angular_velocities, ..
            } => Some(angular_velocities),
        }
    }

    pub fn spheroid_axes(&self) -> Option<&[DVec3]> {
        match &self.shape_data {
            ShapeStorage::Spheroid { axes, .. } => Some(axes),
            _ => None,
        }
    }

    pub fn superquadric_orientations(&self) -> Option<&[DQuat]> {
        match &self.shape_data {
            ShapeStorage::Superquadric { orientations, .. } => Some(orientations),
            _ => None,
        }
    }

    pub fn superquadric_blockiness(&self) -> Option<&[[f64; 2]]> {
        match &self.shape_data {
            ShapeStorage::Superquadric { blockiness, .. } => Some(blockiness),
            _ => None,
        }
    }

    // === User-registered fields ===

    /// Registers a named per-particle scalar array. Names are unique across
    /// both kinds.
    pub fn register_user_scalar(&mut self, name: &str) -> Result<UserFieldHandle, SetupError> {
        self.check_user_name(name)?;
        self.user_scalars.push(UserScalar {
            name: name.to_string(),
            values: vec![0.0; self.count],
        });
        Ok(UserFieldHandle {
            kind: UserFieldKind::Scalar,
            slot: self.user_scalars.len() - 1,
        })
    }

    /// Registers a named per-particle vector array.
    pub fn register_user_vector(&mut self, name: &str) -> Result<UserFieldHandle, SetupError> {
        self.check_user_name(name)?;
        self.user_vectors.push(UserVector {
            name: name.to_string(),
            values: vec![DVec3::ZERO; self.count],
        });
        Ok(UserFieldHandle {
            kind: UserFieldKind::Vector,
            slot: self.user_vectors.len() - 1,
        })
    }

    fn check_user_name(&self, name: &str) -> Result<(), SetupError> {
        let taken = self.user_scalars.iter().any(|f| f.name == name)
            || self.user_vectors.iter().any(|f| f.name == name);
        if taken {
            Err(SetupError::DuplicateUserField(name.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn find_user_field(&self, name: &str) -> Option<UserFieldHandle> {
        if let Some(slot) = self.user_scalars.iter().position(|f| f.name == name) {
            return Some(UserFieldHandle {
                kind: UserFieldKind::Scalar,
                slot,
            });
        }
        self.user_vectors
            .iter()
            .position(|f| f.name == name)
            .map(|slot| UserFieldHandle {
                kind: UserFieldKind::Vector,
                slot,
            })
    }

    /// Panics when the handle is of the wrong kind: that is a programming
    /// error, not a runtime condition.
    pub fn user_scalar(&self, handle: UserFieldHandle) -> &[f64] {
        assert_eq!(handle.kind, UserFieldKind::Scalar, "handle is not a scalar field");
        &self.user_scalars[handle.slot].values
    }

    pub fn user_scalar_mut(&mut self, handle: UserFieldHandle) -> &mut [f64] {
        assert_eq!(handle.kind, UserFieldKind::Scalar, "handle is not a scalar field");
        &mut self.user_scalars[handle.slot].values
    }

    pub fn user_vector(&self, handle: UserFieldHandle) -> &[DVec3] {
        assert_eq!(handle.kind, UserFieldKind::Vector, "handle is not a vector field");
        &self.user_vectors[handle.slot].values
    }

    pub fn user_vector_mut(&mut self, handle: UserFieldHandle) -> &mut [DVec3] {
        assert_eq!(handle.kind, UserFieldKind::Vector, "handle is not a vector field");
        &mut self.user_vectors[handle.slot].values
    }

    pub fn user_scalar_fields(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.user_scalars
            .iter()
            .map(|f| (f.name.as_str(), f.values.as_slice()))
    }

    pub fn user_vector_fields(&self) -> impl Iterator<Item = (&str, &[DVec3])> {
        self.user_vectors
            .iter()
            .map(|f| (f.name.as_str(), f.values.as_slice()))
    }

    /// Zeroes every user field. Runs once per coupling interval, after the
    /// outbound push.
    pub fn zero_user_fields(&mut self) {
        for field in &mut self.user_scalars {
            field.values.fill(0.0);
        }
        for field in &mut self.user_vectors {
            field.values.fill(DVec3::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grown(n: usize) -> ParticleRegistry {
        let mut reg = ParticleRegistry::new(ParticleShape::Sphere);
        reg.set_count(n);
        reg.realloc(false);
        reg
    }

    #[test]
    fn test_realloc_sets_every_length() {
        let reg = grown(7);
        assert_eq!(reg.positions().len(), 7);
        assert_eq!(reg.velocities().len(), 7);
        assert_eq!(reg.fluid_velocities().len(), 7);
        assert_eq!(reg.radii().len(), 7);
        assert_eq!(reg.explicit_forces().len(), 7);
        assert_eq!(reg.implicit_forces().len(), 7);
        assert_eq!(reg.dem_forces().len(), 7);
        assert_eq!(reg.drag_coefficients().len(), 7);
        assert_eq!(reg.cells().len(), 7);
        assert_eq!(reg.weights().len(), 7);
        assert_eq!(reg.void_fractions().len(), 7);
    }

    #[test]
    fn test_realloc_preserves_overlap_and_zero_fills_growth() {
        let mut reg = grown(3);
        reg.positions_mut()[1] = DVec3::new(1.0, 2.0, 3.0);
        reg.radii_mut()[2] = 0.05;
        reg.cells_mut()[0] = 42;

        reg.set_count(5);
        assert!(reg.realloc(false));

        assert_eq!(reg.position(1), DVec3::new(1.0, 2.0, 3.0), "overlap kept");
        assert_eq!(reg.radius(2), 0.05);
        assert_eq!(reg.cell(0), 42);
        assert_eq!(reg.position(3), DVec3::ZERO, "growth zero-filled");
        assert_eq!(reg.radius(4), 0.0);
        assert_eq!(reg.cell(3), UNLOCATED, "cell indices grow unlocated");
        assert_eq!(reg.cell(4), UNLOCATED);
    }

    #[test]
    fn test_realloc_truncates_on_shrink() {
        let mut reg = grown(5);
        for i in 0..5 {
            reg.radii_mut()[i] = i as f64;
        }
        reg.set_count(2);
        assert!(reg.realloc(false));
        assert_eq!(reg.radii(), &[0.0, 1.0], "no stale entries past the count");
    }

    #[test]
    fn test_no_realloc_without_count_change() {
        let mut reg = grown(4);
        let gen = reg.generation();
        reg.begin_step();
        reg.set_count(4);
        assert!(!reg.realloc(false), "same count must not resize");
        assert!(!reg.arrays_reallocated());
        assert_eq!(reg.generation(), gen);
        assert!(reg.realloc(true), "forced realloc always resizes");
        assert!(reg.arrays_reallocated());
        assert_eq!(reg.generation(), gen + 1);
    }

    #[test]
    fn test_reset_step_arrays_keeps_pulled_state() {
        let mut reg = grown(2);
        reg.positions_mut()[0] = DVec3::ONE;
        reg.radii_mut()[1] = 0.1;
        reg.dem_forces_mut()[0] = DVec3::X;
        reg.weights_mut()[1] = 0.7;
        reg.reset_step_arrays();
        assert_eq!(reg.position(0), DVec3::ONE);
        assert_eq!(reg.radius(1), 0.1);
        assert_eq!(reg.dem_forces()[0], DVec3::ZERO);
        assert_eq!(reg.weights()[1], 0.0);
        assert_eq!(reg.void_fraction_at(0), 1.0);
    }

    #[test]
    fn test_d32_sauter_mean() {
        let mut reg = grown(2);
        reg.radii_mut()[0] = 0.5; // d = 1
        reg.radii_mut()[1] = 1.0; // d = 2
        let d32 = reg.d32();
        assert!((d32 - 1.8).abs() < 1e-12, "d32 = {d32}, expected 1.8");
        assert_eq!(ParticleRegistry::new(ParticleShape::Sphere).d32(), 0.0);
    }

    #[test]
    fn test_user_field_handles_survive_realloc() {
        let mut reg = grown(3);
        let h = reg.register_user_scalar("conv_heat_flux").unwrap();
        reg.user_scalar_mut(h).copy_from_slice(&[1.0, 2.0, 3.0]);

        reg.set_count(5);
        reg.realloc(false);
        assert_eq!(reg.user_scalar(h), &[1.0, 2.0, 3.0, 0.0, 0.0]);

        reg.zero_user_fields();
        assert!(reg.user_scalar(h).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_user_field_names_unique_across_kinds() {
        let mut reg = grown(1);
        reg.register_user_scalar("tmp").unwrap();
        let err = reg.register_user_vector("tmp").unwrap_err();
        assert!(matches!(err, SetupError::DuplicateUserField(_)));
        assert!(reg.find_user_field("tmp").is_some());
        assert!(reg.find_user_field("missing").is_none());
    }

    #[test]
    fn test_sphere_carries_no_extended_arrays() {
        let mut reg = grown(2);
        assert!(reg.torques().is_none());
        assert!(reg.angular_velocities().is_none());
        assert!(reg.spheroid_axes().is_none());
        assert!(reg.superquadric_orientations().is_none());
        assert!(reg.force_pass_views().torques.is_none());
    }

    #[test]
    fn test_spheroid_arrays_resize_with_registry() {
        let mut reg = ParticleRegistry::new(ParticleShape::Spheroid);
        reg.set_count(4);
        reg.realloc(false);
        assert_eq!(reg.torques().map(<[DVec3]>::len), Some(4));
        assert_eq!(reg.spheroid_axes().map(<[DVec3]>::len), Some(4));
        assert!(reg.superquadric_blockiness().is_none());
        // The force pass writes torques through its views.
        if let Some(torques) = reg.force_pass_views().torques {
            torques[2] = DVec3::X;
        }
        assert_eq!(reg.torques().map(|t| t[2]), Some(DVec3::X));
    }
}
