//! Error taxonomy.
//!
//! Setup-class failures (bad options, unknown models, coarse-graining
//! inconsistencies) are fatal and surface before any coupling work runs.
//! Degraded-but-recoverable conditions (unlocated particles, clamped cells)
//! are never errors; they are counted in step stats and debug-logged.

use thiserror::Error;

use crate::config::{ParticleShape, ShapeCapability};

/// Fatal problems detected while building or first-contacting a coupling run.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid config: {parameter} = {value} ({constraint})")]
    InvalidParameter {
        parameter: &'static str,
        value: f64,
        constraint: &'static str,
    },

    #[error("unknown force law `{0}`")]
    UnknownForceLaw(String),

    #[error("force law `{law}` requires {capability:?} data, which {shape:?} particles do not carry")]
    UnsupportedCapability {
        law: &'static str,
        capability: ShapeCapability,
        shape: ParticleShape,
    },

    #[error(
        "coarse-graining mismatch: particle {index} has diameter {observed:.6e}, \
         expected {expected:.6e} within {tolerance:.0}% (cg = {cg})"
    )]
    CoarseGrainingMismatch {
        index: usize,
        observed: f64,
        expected: f64,
        tolerance: f64,
        cg: f64,
    },

    #[error("user field `{0}` is already registered")]
    DuplicateUserField(String),
}

/// Per-step failures. Setup-class checks that can only run at first particle
/// contact surface here wrapped as `Setup`.
#[derive(Debug, Error)]
pub enum CouplingError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error("{field} field has {found} cells but the mesh has {expected}")]
    FieldSizeMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
}
