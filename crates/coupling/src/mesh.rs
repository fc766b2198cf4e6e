//! Mesh seam between the engine and the flow solver.
//!
//! `CouplingMesh` is the entire mesh surface the engine is allowed to touch:
//! cell metadata, point-in-cell tests, neighbor topology, a global locate
//! fallback, field sampling, and an internal-face visitor for operator
//! assembly. Everything else about the mesh stays on the solver side.
//!
//! `BlockMesh` is the uniform structured reference implementation used by
//! tests and demos, with half-open cell ownership so a point on a shared face
//! belongs to exactly one cell.

use glam::DVec3;

use crate::config::FluidInterpolation;
use crate::fields::VectorField;

/// Owning-cell sentinel for particles outside the mesh (or partition).
pub const UNLOCATED: i32 = -1;

/// Narrow fluid-side mesh interface.
///
/// `Sync` so particle-parallel passes may read the mesh concurrently.
pub trait CouplingMesh: Sync {
    fn cell_count(&self) -> usize;

    fn cell_volume(&self, cell: usize) -> f64;

    fn cell_centroid(&self, cell: usize) -> DVec3;

    /// Whether `p` lies in `cell` under the mesh's ownership convention.
    fn cell_contains(&self, cell: usize, p: DVec3) -> bool;

    /// Appends the face-adjacent neighbors of `cell` to `out`.
    fn neighbors_of(&self, cell: usize, out: &mut Vec<usize>);

    /// Global lookup without a seed; `UNLOCATED` for points outside the mesh.
    fn locate(&self, p: DVec3) -> i32;

    /// Reads `field` at `p`, whose owning cell is already known.
    fn sample_vector(
        &self,
        field: &VectorField,
        p: DVec3,
        cell: usize,
        interpolation: FluidInterpolation,
    ) -> DVec3;

    /// Visits every internal face as `(owner, neighbour, area, centre distance)`.
    fn for_each_internal_face(&self, visit: &mut dyn FnMut(usize, usize, f64, f64));
}

/// Uniform structured hex mesh.
#[derive(Debug, Clone)]
pub struct BlockMesh {
    pub nx: usize,
    pub ny: usize,
    pub nz: usize,
    /// Edge length of every cell (m).
    pub cell_size: f64,
    /// Position of the low corner of cell (0, 0, 0).
    pub origin: DVec3,
}

impl BlockMesh {
    pub fn new(nx: usize, ny: usize, nz: usize, cell_size: f64, origin: DVec3) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive");
        assert!(nx > 0 && ny > 0 && nz > 0, "mesh must have at least one cell");
        Self {
            nx,
            ny,
            nz,
            cell_size,
            origin,
        }
    }

    /// Cube of `n`³ cells with its low corner at the world origin.
    pub fn cube(n: usize, cell_size: f64) -> Self {
        Self::new(n, n, n, cell_size, DVec3::ZERO)
    }

    pub fn cell_index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert!(i < self.nx && j < self.ny && k < self.nz);
        i + j * self.nx + k * self.nx * self.ny
    }

    pub fn cell_coords(&self, cell: usize) -> (usize, usize, usize) {
        debug_assert!(cell < self.nx * self.ny * self.nz);
        let k = cell / (self.nx * self.ny);
        let rem = cell % (self.nx * self.ny);
        (rem % self.nx, rem / self.nx, k)
    }

    /// Integer coordinates of the cell owning `p`, half-open in each axis:
    /// a point exactly on a shared face belongs to the cell on its high side.
    fn coords_of_point(&self, p: DVec3) -> Option<(usize, usize, usize)> {
        let local = (p - self.origin) / self.cell_size;
        let i = local.x.floor();
        let j = local.y.floor();
        let k = local.z.floor();
        if i < 0.0
            || j < 0.0
            || k < 0.0
            || i >= self.nx as f64
            || j >= self.ny as f64
            || k >= self.nz as f64
        {
            return None;
        }
        Some((i as usize, j as usize, k as usize))
    }

    /// Trilinear interpolation from the 8 cell centres around `p`, with
    /// clamped extension past the outermost centres.
    fn trilinear(&self, field: &VectorField, p: DVec3) -> DVec3 {
        let g = (p - self.origin) / self.cell_size - DVec3::splat(0.5);
        let base = g.floor();
        let frac = g - base;

        let clamp = |v: f64, n: usize| -> usize {
            let max = (n - 1) as f64;
            v.clamp(0.0, max) as usize
        };

        let mut value = DVec3::ZERO;
        for dk in 0..2 {
            for dj in 0..2 {
                for di in 0..2 {
                    let wx = if di == 0 { 1.0 - frac.x } else { frac.x };
                    let wy = if dj == 0 { 1.0 - frac.y } else { frac.y };
                    let wz = if dk == 0 { 1.0 - frac.z } else { frac.z };
                    let i = clamp(base.x + di as f64, self.nx);
                    let j = clamp(base.y + dj as f64, self.ny);
                    let k = clamp(base.z + dk as f64, self.nz);
                    value += wx * wy * wz * field[self.cell_index(i, j, k)];
                }
            }
        }
        value
    }
}

impl CouplingMesh for BlockMesh {
    fn cell_count(&self) -> usize {
        self.nx * self.ny * self.nz
    }

    fn cell_volume(&self, cell: usize) -> f64 {
        debug_assert!(cell < self.cell_count());
        self.cell_size * self.cell_size * self.cell_size
    }

    fn cell_centroid(&self, cell: usize) -> DVec3 {
        let (i, j, k) = self.cell_coords(cell);
        self.origin
            + DVec3::new(
                (i as f64 + 0.5) * self.cell_size,
                (j as f64 + 0.5) * self.cell_size,
                (k as f64 + 0.5) * self.cell_size,
            )
    }

    fn cell_contains(&self, cell: usize, p: DVec3) -> bool {
        match self.coords_of_point(p) {
            Some((i, j, k)) => self.cell_index(i, j, k) == cell,
            None => false,
        }
    }

    fn neighbors_of(&self, cell: usize, out: &mut Vec<usize>) {
        let (i, j, k) = self.cell_coords(cell);
        if i > 0 {
            out.push(self.cell_index(i - 1, j, k));
        }
        if i + 1 < self.nx {
            out.push(self.cell_index(i + 1, j, k));
        }
        if j > 0 {
            out.push(self.cell_index(i, j - 1, k));
        }
        if j + 1 < self.ny {
            out.push(self.cell_index(i, j + 1, k));
        }
        if k > 0 {
            out.push(self.cell_index(i, j, k - 1));
        }
        if k + 1 < self.nz {
            out.push(self.cell_index(i, j, k + 1));
        }
    }

    fn locate(&self, p: DVec3) -> i32 {
        match self.coords_of_point(p) {
            Some((i, j, k)) => self.cell_index(i, j, k) as i32,
            None => UNLOCATED,
        }
    }

    fn sample_vector(
        &self,
        field: &VectorField,
        p: DVec3,
        cell: usize,
        interpolation: FluidInterpolation,
    ) -> DVec3 {
        match interpolation {
            FluidInterpolation::CellCentre => field[cell],
            FluidInterpolation::Trilinear => self.trilinear(field, p),
        }
    }

    fn for_each_internal_face(&self, visit: &mut dyn FnMut(usize, usize, f64, f64)) {
        let area = self.cell_size * self.cell_size;
        let dist = self.cell_size;
        for k in 0..self.nz {
            for j in 0..self.ny {
                for i in 0..self.nx {
                    let own = self.cell_index(i, j, k);
                    if i + 1 < self.nx {
                        visit(own, self.cell_index(i + 1, j, k), area, dist);
                    }
                    if j + 1 < self.ny {
                        visit(own, self.cell_index(i, j + 1, k), area, dist);
                    }
                    if k + 1 < self.nz {
                        visit(own, self.cell_index(i, j, k + 1), area, dist);
                    }
                }
            }
        }
    }
}
