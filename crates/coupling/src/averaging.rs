//! Bidirectional particle/field averaging.
//!
//! Particle→cell goes two ways: conservative accumulation (`deposit_*`, used
//! for momentum sources; what goes in can be read back out) and weighted
//! means (`mean_vector`, used for the mean particle-velocity field). Deposits
//! carry no volume scaling; callers divide by cell volume where a density is
//! wanted.
//!
//! Cell→particle sampling fills per-particle slots in parallel and leaves
//! unlocated particles at zero.

use glam::DVec3;
use rayon::prelude::*;

use crate::config::{AveragingScheme, FluidInterpolation};
use crate::constants::MIN_AVERAGING_WEIGHT;
use crate::fields::{ScalarField, VectorField};
use crate::mesh::{CouplingMesh, UNLOCATED};
use crate::voidfraction::DepositTable;

/// Accumulation scratch for weighted means: a running sum and weight per
/// cell, reused across intervals.
#[derive(Debug, Default)]
pub struct MeanBuffers {
    sum: Vec<DVec3>,
    weight: Vec<f64>,
}

impl MeanBuffers {
    pub fn new(cells: usize) -> Self {
        Self {
            sum: vec![DVec3::ZERO; cells],
            weight: vec![0.0; cells],
        }
    }

    fn clear(&mut self) {
        self.sum.fill(DVec3::ZERO);
        self.weight.fill(0.0);
    }
}

/// Adds `values[i] · w` into the cells particle `i` touches. Serial scatter;
/// cell slots are shared.
pub fn deposit_vector(
    scheme: AveragingScheme,
    table: &DepositTable,
    cells: &[i32],
    values: &[DVec3],
    field: &mut VectorField,
) {
    match scheme {
        AveragingScheme::NearestCell => {
            for (i, &cell) in cells.iter().enumerate() {
                if cell != UNLOCATED {
                    field[cell as usize] += values[i];
                }
            }
        }
        AveragingScheme::VolumeWeighted => {
            for i in 0..cells.len() {
                for (cell, w) in table.row(i) {
                    field[cell] += values[i] * w;
                }
            }
        }
    }
}

/// Scalar counterpart of [`deposit_vector`].
pub fn deposit_scalar(
    scheme: AveragingScheme,
    table: &DepositTable,
    cells: &[i32],
    values: &[f64],
    field: &mut ScalarField,
) {
    match scheme {
        AveragingScheme::NearestCell => {
            for (i, &cell) in cells.iter().enumerate() {
                if cell != UNLOCATED {
                    field[cell as usize] += values[i];
                }
            }
        }
        AveragingScheme::VolumeWeighted => {
            for i in 0..cells.len() {
                for (cell, w) in table.row(i) {
                    field[cell] += values[i] * w;
                }
            }
        }
    }
}

/// Weighted per-cell mean Σw·v / Σw of a particle vector quantity. Cells
/// whose accumulated weight stays below the floor are left at zero.
pub fn mean_vector(
    scheme: AveragingScheme,
    table: &DepositTable,
    cells: &[i32],
    values: &[DVec3],
    buffers: &mut MeanBuffers,
    out: &mut VectorField,
) {
    debug_assert_eq!(buffers.sum.len(), out.len());
    buffers.clear();
    match scheme {
        AveragingScheme::NearestCell => {
            for (i, &cell) in cells.iter().enumerate() {
                if cell != UNLOCATED {
                    let cell = cell as usize;
                    buffers.sum[cell] += values[i];
                    buffers.weight[cell] += 1.0;
                }
            }
        }
        AveragingScheme::VolumeWeighted => {
            for i in 0..cells.len() {
                for (cell, w) in table.row(i) {
                    buffers.sum[cell] += values[i] * w;
                    buffers.weight[cell] += w;
                }
            }
        }
    }
    for c in 0..out.len() {
        out[c] = if buffers.weight[c] > MIN_AVERAGING_WEIGHT {
            buffers.sum[c] / buffers.weight[c]
        } else {
            DVec3::ZERO
        };
    }
}

/// Reads `field` at every located particle's position into `out`; unlocated
/// particles get zero. Particle-parallel gather.
pub fn sample_vector_at_particles<M: CouplingMesh>(
    mesh: &M,
    field: &VectorField,
    positions: &[DVec3],
    cells: &[i32],
    interpolation: FluidInterpolation,
    out: &mut [DVec3],
) {
    out.par_iter_mut().enumerate().for_each(|(i, v)| {
        let cell = cells[i];
        *v = if cell == UNLOCATED {
            DVec3::ZERO
        } else {
            mesh.sample_vector(field, positions[i], cell as usize, interpolation)
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::BlockMesh;
    use approx::assert_relative_eq;

    fn two_cell_table() -> DepositTable {
        // One particle split 0.6 / 0.4 over cells 0 and 1.
        let mut table = DepositTable::default();
        table.reset(1, 2);
        table.add(0, 0, 0.6);
        table.add(0, 1, 0.4);
        table
    }

    #[test]
    fn test_unit_deposit_reads_back_exactly() {
        let mut table = DepositTable::default();
        table.reset(1, 1);
        table.add(0, 3, 1.0);
        let mut field = ScalarField::zeros(8);
        deposit_scalar(AveragingScheme::NearestCell, &table, &[3], &[1.0], &mut field);
        assert_eq!(field[3], 1.0, "unit quantity in, unit quantity out");
        assert_eq!(field.values().iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_volume_weighted_deposit_follows_table() {
        let table = two_cell_table();
        let mut field = VectorField::zeros(2);
        deposit_vector(
            AveragingScheme::VolumeWeighted,
            &table,
            &[0],
            &[DVec3::new(10.0, 0.0, 0.0)],
            &mut field,
        );
        assert_relative_eq!(field[0].x, 6.0, epsilon = 1e-12);
        assert_relative_eq!(field[1].x, 4.0, epsilon = 1e-12);
        let total = field[0] + field[1];
        assert_relative_eq!(total.x, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_unlocated_particles_deposit_nothing() {
        let mut table = DepositTable::default();
        table.reset(2, 1);
        table.add(1, 0, 1.0);
        let mut field = ScalarField::zeros(2);
        deposit_scalar(
            AveragingScheme::NearestCell,
            &table,
            &[UNLOCATED, 0],
            &[5.0, 7.0],
            &mut field,
        );
        assert_eq!(field[0], 7.0);
        assert_eq!(field[1], 0.0);
    }

    #[test]
    fn test_mean_vector_averages_per_cell() {
        let mut table = DepositTable::default();
        table.reset(3, 1);
        let cells = [0, 0, UNLOCATED];
        for (i, &c) in cells.iter().enumerate() {
            if c != UNLOCATED {
                table.add(i, c as usize, 1.0);
            }
        }
        let values = [
            DVec3::new(1.0, 2.0, 0.0),
            DVec3::new(3.0, 4.0, 0.0),
            DVec3::new(100.0, 100.0, 100.0),
        ];
        let mut buffers = MeanBuffers::new(2);
        let mut out = VectorField::zeros(2);
        mean_vector(
            AveragingScheme::NearestCell,
            &table,
            &cells,
            &values,
            &mut buffers,
            &mut out,
        );
        assert_relative_eq!(out[0].x, 2.0, epsilon = 1e-12);
        assert_relative_eq!(out[0].y, 3.0, epsilon = 1e-12);
        assert_eq!(out[1], DVec3::ZERO, "no particles, no mean");
    }

    #[test]
    fn test_sample_leaves_unlocated_at_zero() {
        let mesh = BlockMesh::cube(2, 1.0);
        let mut field = VectorField::zeros(mesh.cell_count());
        for c in 0..field.len() {
            field[c] = DVec3::new(c as f64, 0.0, 0.0);
        }
        let positions = [DVec3::splat(0.5), DVec3::splat(-9.0)];
        let cells = [0, UNLOCATED];
        let mut out = [DVec3::ONE; 2];
        sample_vector_at_particles(
            &mesh,
            &field,
            &positions,
            &cells,
            FluidInterpolation::CellCentre,
            &mut out,
        );
        assert_eq!(out[0], DVec3::ZERO, "cell 0 holds zero x");
        assert_eq!(out[1], DVec3::ZERO, "unlocated samples zero");
    }
}
