//! Cell-indexed field containers.
//!
//! Fields exchanged with the flow solver are flat, one entry per mesh cell,
//! addressed by the same cell index the mesh reports. The engine never
//! resizes a caller-owned field; length mismatches are rejected at the
//! `evolve` boundary.

use std::ops::{Index, IndexMut};

use glam::DVec3;

/// One scalar per mesh cell.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarField {
    values: Vec<f64>,
}

impl ScalarField {
    pub fn zeros(cells: usize) -> Self {
        Self::constant(cells, 0.0)
    }

    pub fn constant(cells: usize, value: f64) -> Self {
        Self {
            values: vec![value; cells],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn fill(&mut self, value: f64) {
        self.values.fill(value);
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }
}

impl Index<usize> for ScalarField {
    type Output = f64;

    fn index(&self, cell: usize) -> &f64 {
        &self.values[cell]
    }
}

impl IndexMut<usize> for ScalarField {
    fn index_mut(&mut self, cell: usize) -> &mut f64 {
        &mut self.values[cell]
    }
}

/// One 3-vector per mesh cell.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorField {
    values: Vec<DVec3>,
}

impl VectorField {
    pub fn zeros(cells: usize) -> Self {
        Self {
            values: vec![DVec3::ZERO; cells],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn fill(&mut self, value: DVec3) {
        self.values.fill(value);
    }

    pub fn values(&self) -> &[DVec3] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [DVec3] {
        &mut self.values
    }
}

impl Index<usize> for VectorField {
    type Output = DVec3;

    fn index(&self, cell: usize) -> &DVec3 {
        &self.values[cell]
    }
}

impl IndexMut<usize> for VectorField {
    fn index_mut(&mut self, cell: usize) -> &mut DVec3 {
        &mut self.values[cell]
    }
}
