//! Read-only coupling options.
//!
//! One `CouplingConfig` is validated when the simulation is built and is
//! immutable afterwards; every component reads it by shared reference. There
//! are no process-wide switches.

use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::SetupError;
use crate::serde_utils;

/// Particle shape family a coupling run is built for.
///
/// The tag decides which per-particle arrays exist. Force laws declare the
/// capabilities they need; a mismatch is rejected while the model list is
/// built, never deep inside a coupling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticleShape {
    Sphere,
    Spheroid,
    Superquadric,
}

impl ParticleShape {
    pub fn supports(self, capability: ShapeCapability) -> bool {
        match capability {
            ShapeCapability::Orientation
            | ShapeCapability::AngularVelocity
            | ShapeCapability::Torque => self != ParticleShape::Sphere,
            ShapeCapability::SurfaceParams => self == ParticleShape::Superquadric,
        }
    }
}

/// Per-particle data a force law may require beyond the sphere baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeCapability {
    Orientation,
    AngularVelocity,
    Torque,
    SurfaceParams,
}

/// How particle solid volume is distributed over cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoidFractionScheme {
    /// Whole particle volume into the owning cell.
    Centred,
    /// Volume split over 15 satellite points so particles straddling cell
    /// faces spread their volume across the cells they overlap.
    Divided,
}

/// How per-particle quantities accumulate into cell fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AveragingScheme {
    /// Everything into the owning cell.
    NearestCell,
    /// Distributed with the same weights the void-fraction deposit used.
    VolumeWeighted,
}

/// How cell fields are read back at particle positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FluidInterpolation {
    /// Value of the owning cell.
    CellCentre,
    /// Mesh-side smooth interpolation (trilinear on the block mesh).
    Trilinear,
}

/// Coupling options, owned by the host application's config loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouplingConfig {
    /// Host solves flow this run. Read by the host loop, not by the engine.
    pub solve_flow: bool,
    /// Host solves scalar transport this run. Read by the host loop.
    pub solve_scalar_transport: bool,
    /// Enables per-particle trace logging.
    pub verbose: bool,
    /// Coarse-graining factor cg >= 1: one computational parcel stands in for
    /// cg³ physical grains and carries diameter cg·d_phys.
    pub coarse_graining: f64,
    /// Verify observed diameters against `coarse_graining` at first contact.
    pub check_coarse_graining: bool,
    /// Physical grain diameter (m) the coarse-graining check compares against.
    pub reference_diameter: Option<f64>,
    /// Implicit/explicit force split: 0 = fully explicit source, 1 = the whole
    /// velocity-proportional part becomes a solver-side sink.
    pub im_ex_split: f64,
    /// Maintain the rate-of-change field of the void fraction.
    pub track_ddt_voidfraction: bool,
    /// Lowest admissible cell void fraction; packed cells clamp here.
    pub void_fraction_floor: f64,
    /// Extra multiplier on deposited solid volume.
    pub volume_weight: f64,
    pub void_fraction_scheme: VoidFractionScheme,
    pub averaging_scheme: AveragingScheme,
    pub interpolation: FluidInterpolation,
    /// Ordered force-law names. Later laws see the running per-particle sums
    /// left by earlier ones.
    pub force_laws: Vec<String>,
    pub shape: ParticleShape,
    /// Fluid density (kg/m³).
    pub fluid_density: f64,
    /// Fluid dynamic viscosity (Pa·s).
    pub fluid_viscosity: f64,
    /// Gravity acceleration (m/s²).
    #[serde(
        serialize_with = "serde_utils::serialize_dvec3",
        deserialize_with = "serde_utils::deserialize_dvec3"
    )]
    pub gravity: DVec3,
}

impl Default for CouplingConfig {
    fn default() -> Self {
        Self {
            solve_flow: true,
            solve_scalar_transport: false,
            verbose: false,
            coarse_graining: 1.0,
            check_coarse_graining: false,
            reference_diameter: None,
            im_ex_split: constants::IM_EX_SPLIT,
            track_ddt_voidfraction: false,
            void_fraction_floor: constants::VOID_FRACTION_FLOOR,
            volume_weight: 1.0,
            void_fraction_scheme: VoidFractionScheme::Centred,
            averaging_scheme: AveragingScheme::NearestCell,
            interpolation: FluidInterpolation::CellCentre,
            force_laws: vec![
                "SchillerNaumannDrag".to_string(),
                "ArchimedesBuoyancy".to_string(),
            ],
            shape: ParticleShape::Sphere,
            fluid_density: constants::WATER_DENSITY,
            fluid_viscosity: constants::WATER_VISCOSITY,
            gravity: constants::GRAVITY,
        }
    }
}

impl CouplingConfig {
    /// Checks every statically checkable option. Observed-data checks (the
    /// coarse-graining diameter comparison) run at first particle contact.
    pub fn validate(&self) -> Result<(), SetupError> {
        if !self.coarse_graining.is_finite() || self.coarse_graining < 1.0 {
            return Err(SetupError::InvalidParameter {
                parameter: "coarse_graining",
                value: self.coarse_graining,
                constraint: "must be finite and >= 1",
            });
        }
        if !(0.0..=1.0).contains(&self.im_ex_split) {
            return Err(SetupError::InvalidParameter {
                parameter: "im_ex_split",
                value: self.im_ex_split,
                constraint: "must lie in [0, 1]",
            });
        }
        if !(self.void_fraction_floor > 0.0 && self.void_fraction_floor < 1.0) {
            return Err(SetupError::InvalidParameter {
                parameter: "void_fraction_floor",
                value: self.void_fraction_floor,
                constraint: "must lie in (0, 1)",
            });
        }
        if !(self.volume_weight > 0.0) || !self.volume_weight.is_finite() {
            return Err(SetupError::InvalidParameter {
                parameter: "volume_weight",
                value: self.volume_weight,
                constraint: "must be finite and > 0",
            });
        }
        if !(self.fluid_density > 0.0) {
            return Err(SetupError::InvalidParameter {
                parameter: "fluid_density",
                value: self.fluid_density,
                constraint: "must be > 0",
            });
        }
        if !(self.fluid_viscosity > 0.0) {
            return Err(SetupError::InvalidParameter {
                parameter: "fluid_viscosity",
                value: self.fluid_viscosity,
                constraint: "must be > 0",
            });
        }
        if let Some(d) = self.reference_diameter {
            if !(d > 0.0) || !d.is_finite() {
                return Err(SetupError::InvalidParameter {
                    parameter: "reference_diameter",
                    value: d,
                    constraint: "must be finite and > 0 when set",
                });
            }
        }
        Ok(())
    }

    /// Kinematic viscosity (m²/s).
    pub fn kinematic_viscosity(&self) -> f64 {
        self.fluid_viscosity / self.fluid_density
    }
}
