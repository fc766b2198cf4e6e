//! Cell void fractions from particle solid volumes.
//!
//! Every located particle removes its volume from the void fraction of the
//! cell(s) it overlaps: `vf[c] -= V_p · w / vol(c)`. The distribution weights
//! are recorded per particle in a [`DepositTable`] so the averaging engine can
//! replay exactly the same distribution for momentum deposits.
//!
//! The scatter loop is serial (cell slots are shared); the table and field
//! buffers are reused across intervals.

use glam::DVec3;
use log::debug;

use crate::config::{CouplingConfig, VoidFractionScheme};
use crate::fields::ScalarField;
use crate::mesh::{CouplingMesh, UNLOCATED};
use crate::registry::ParticleRegistry;

/// Satellite directions for the divided scheme: 6 face + 8 corner unit
/// vectors around the particle centre.
const SATELLITE_DIRS: [DVec3; 14] = {
    const C: f64 = 0.577_350_269_189_625_8; // 1/sqrt(3)
    [
        DVec3::new(1.0, 0.0, 0.0),
        DVec3::new(-1.0, 0.0, 0.0),
        DVec3::new(0.0, 1.0, 0.0),
        DVec3::new(0.0, -1.0, 0.0),
        DVec3::new(0.0, 0.0, 1.0),
        DVec3::new(0.0, 0.0, -1.0),
        DVec3::new(C, C, C),
        DVec3::new(C, C, -C),
        DVec3::new(C, -C, C),
        DVec3::new(C, -C, -C),
        DVec3::new(-C, C, C),
        DVec3::new(-C, C, -C),
        DVec3::new(-C, -C, C),
        DVec3::new(-C, -C, -C),
    ]
};

/// Radial position of the satellites, as a fraction of the particle radius.
const SATELLITE_RADIUS_FACTOR: f64 = 0.75;

/// Sample points per particle in the divided scheme (centre + satellites).
const DIVIDED_SAMPLES: usize = SATELLITE_DIRS.len() + 1;

/// Per-particle deposit distribution: up to `stride` (cell, weight) slots per
/// particle. Weights of a located particle's row sum to 1.
#[derive(Debug, Default)]
pub struct DepositTable {
    cells: Vec<i32>,
    weights: Vec<f64>,
    stride: usize,
    particles: usize,
}

impl DepositTable {
    pub(crate) fn reset(&mut self, particles: usize, stride: usize) {
        self.particles = particles;
        self.stride = stride;
        self.cells.clear();
        self.cells.resize(particles * stride, UNLOCATED);
        self.weights.clear();
        self.weights.resize(particles * stride, 0.0);
    }

    pub fn particles(&self) -> usize {
        self.particles
    }

    /// Adds `weight` for `cell` to particle `i`, merging with an existing slot
    /// for the same cell. Rows are tiny; the scan is linear.
    pub(crate) fn add(&mut self, i: usize, cell: usize, weight: f64) {
        let row = i * self.stride;
        for slot in row..row + self.stride {
            if self.cells[slot] == cell as i32 {
                self.weights[slot] += weight;
                return;
            }
            if self.cells[slot] == UNLOCATED {
                self.cells[slot] = cell as i32;
                self.weights[slot] = weight;
                return;
            }
        }
        unreachable!("deposit row overflow: stride {} too small", self.stride);
    }

    /// Occupied (cell, weight) pairs of particle `i`; empty for unlocated
    /// particles.
    pub fn row(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = i * self.stride;
        let end = start + self.stride;
        self.cells[start..end]
            .iter()
            .zip(&self.weights[start..end])
            .take_while(|(&c, _)| c != UNLOCATED)
            .map(|(&c, &w)| (c as usize, w))
    }
}

/// Statistics from one void-fraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoidFractionStats {
    /// Total solid volume placed into cells this pass.
    pub deposited_volume: f64,
    /// Cells that hit the positive floor.
    pub clamped_cells: usize,
}

/// Void-fraction pass over all located particles.
#[derive(Debug)]
pub struct VoidFractionModel {
    scheme: VoidFractionScheme,
    floor: f64,
    volume_weight: f64,
}

impl VoidFractionModel {
    pub fn from_config(config: &CouplingConfig) -> Self {
        Self {
            scheme: config.void_fraction_scheme,
            floor: config.void_fraction_floor,
            volume_weight: config.volume_weight,
        }
    }

    pub fn scheme(&self) -> VoidFractionScheme {
        self.scheme
    }

    /// Restores the all-fluid state. Must precede [`compute`] each interval;
    /// the pass subtracts from whatever the field holds.
    ///
    /// [`compute`]: VoidFractionModel::compute
    pub fn reset(field: &mut ScalarField) {
        field.fill(1.0);
    }

    /// Subtracts particle volumes from `field`, records the distribution in
    /// `table`, clamps packed cells to the floor, and writes the per-particle
    /// void fraction and deposit weight back into the registry.
    pub fn compute<M: CouplingMesh>(
        &self,
        mesh: &M,
        registry: &mut ParticleRegistry,
        field: &mut ScalarField,
        table: &mut DepositTable,
    ) -> VoidFractionStats {
        let n = registry.count();
        let stride = match self.scheme {
            VoidFractionScheme::Centred => 1,
            VoidFractionScheme::Divided => DIVIDED_SAMPLES,
        };
        table.reset(n, stride);

        let mut stats = VoidFractionStats::default();

        // === Pass 1: distribute particle volumes (serial scatter) ===
        {
            let positions = registry.positions();
            let radii = registry.radii();
            let cells = registry.cells();
            for i in 0..n {
                let owner = cells[i];
                if owner == UNLOCATED {
                    continue;
                }
                let owner = owner as usize;
                match self.scheme {
                    VoidFractionScheme::Centred => {
                        table.add(i, owner, 1.0);
                    }
                    VoidFractionScheme::Divided => {
                        let share = 1.0 / DIVIDED_SAMPLES as f64;
                        table.add(i, owner, share);
                        let rs = SATELLITE_RADIUS_FACTOR * radii[i];
                        for dir in SATELLITE_DIRS {
                            let cell = satellite_cell(mesh, positions[i] + rs * dir, owner);
                            table.add(i, cell, share);
                        }
                    }
                }
                let volume = self.volume_weight * sphere_volume(radii[i]);
                for (cell, w) in table.row(i) {
                    field[cell] -= volume * w / mesh.cell_volume(cell);
                }
                stats.deposited_volume += volume;
            }
        }

        // === Pass 2: clamp packed cells ===
        for value in field.values_mut() {
            if *value < self.floor {
                *value = self.floor;
                stats.clamped_cells += 1;
            }
        }
        if stats.clamped_cells > 0 {
            debug!(
                "void fraction: {} cells clamped to floor {}",
                stats.clamped_cells, self.floor
            );
        }

        // === Pass 3: per-particle void fraction and deposit weight ===
        {
            let (weights, void_fractions) = registry.deposit_write_views();
            for i in 0..n {
                let mut w_total = 0.0;
                let mut vf = 0.0;
                for (cell, w) in table.row(i) {
                    w_total += w;
                    vf += w * field[cell];
                }
                if w_total > 0.0 {
                    weights[i] = w_total;
                    void_fractions[i] = vf / w_total;
                } else {
                    weights[i] = 0.0;
                    void_fractions[i] = 1.0;
                }
            }
        }

        stats
    }
}

/// Cell receiving a satellite point: the owner if it still contains the
/// point, otherwise a fresh lookup, falling back to the owner for points off
/// the mesh so the deposit stays conservative.
fn satellite_cell<M: CouplingMesh>(mesh: &M, p: DVec3, owner: usize) -> usize {
    if mesh.cell_contains(owner, p) {
        return owner;
    }
    match mesh.locate(p) {
        UNLOCATED => owner,
        cell => cell as usize,
    }
}

pub fn sphere_volume(radius: f64) -> f64 {
    4.0 / 3.0 * std::f64::consts::PI * radius * radius * radius
}

/// Rate-of-change field of the void fraction across coupling intervals.
///
/// Zero until two consecutive fields exist.
#[derive(Debug)]
pub struct DdtVoidfraction {
    prev: ScalarField,
    ddt: ScalarField,
    have_prev: bool,
}

impl DdtVoidfraction {
    pub fn new(cells: usize) -> Self {
        Self {
            prev: ScalarField::zeros(cells),
            ddt: ScalarField::zeros(cells),
            have_prev: false,
        }
    }

    /// Folds in the freshly computed field; `dt` is the coupling interval.
    pub fn update(&mut self, field: &ScalarField, dt: f64) {
        if self.have_prev && dt > 0.0 {
            for c in 0..field.len() {
                self.ddt[c] = (field[c] - self.prev[c]) / dt;
            }
        }
        self.prev.values_mut().copy_from_slice(field.values());
        self.have_prev = true;
    }

    pub fn field(&self) -> &ScalarField {
        &self.ddt
    }
}
