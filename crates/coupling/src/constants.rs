//! Physical constants and coupling defaults.
//!
//! All quantities are SI: lengths in m, densities in kg/m³, viscosities in
//! Pa·s (dynamic) or m²/s (kinematic), forces in N. Particle state is double
//! precision throughout; see `registry`.

use glam::DVec3;

/// Gravity acceleration (m/s²), negative Y direction.
pub const GRAVITY: DVec3 = DVec3::new(0.0, -9.81, 0.0);

/// Density of water (kg/m³).
pub const WATER_DENSITY: f64 = 1000.0;

/// Dynamic viscosity of water (Pa·s).
pub const WATER_VISCOSITY: f64 = 0.001;

/// Kinematic viscosity of water (m²/s).
pub const WATER_KINEMATIC_VISCOSITY: f64 = WATER_VISCOSITY / WATER_DENSITY;

/// Density of quartz sand (kg/m³), the default DEM grain material.
pub const SAND_DENSITY: f64 = 2650.0;

// =============================================================================
// Coupling defaults
// =============================================================================

/// Lowest admissible cell void fraction. Cells packed beyond this are clamped,
/// counted, and debug-logged; drag correlations diverge as voidage -> 0.
pub const VOID_FRACTION_FLOOR: f64 = 0.05;

/// Default implicit/explicit force split (0 = fully explicit, 1 = fully
/// implicit in the flow solver's momentum equation).
pub const IM_EX_SPLIT: f64 = 0.5;

/// Relative tolerance for the coarse-graining diameter consistency check.
pub const CG_DIAMETER_TOLERANCE: f64 = 0.1;

/// Weight-sum floor below which a cell average is treated as empty.
pub const MIN_AVERAGING_WEIGHT: f64 = 1e-10;

/// Crossover Reynolds number between the Schiller-Naumann correlation and the
/// constant Newton-regime drag coefficient.
pub const NEWTON_REGIME_RE: f64 = 1000.0;

/// Drag coefficient in the Newton (inertial) regime.
pub const NEWTON_REGIME_CD: f64 = 0.44;
