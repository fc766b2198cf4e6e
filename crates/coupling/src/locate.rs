//! Particle-to-cell locate pass.
//!
//! Each particle's previous owning cell seeds the search: verify the seed,
//! then walk outward over face-neighbor rings, then fall back to the mesh's
//! global lookup. Particles outside the mesh get the unlocated sentinel and
//! are skipped by every downstream pass.

use glam::DVec3;
use log::debug;
use rayon::prelude::*;

use crate::mesh::{CouplingMesh, UNLOCATED};

/// Neighbor rings tried around the seed before the global fallback. Two rings
/// cover any particle that moved less than two cell widths per coupling
/// interval.
const SEARCH_DEPTH: usize = 2;

/// Outcome counts for one locate pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocateStats {
    pub located: usize,
    pub unlocated: usize,
}

#[derive(Default)]
struct SearchScratch {
    frontier: Vec<usize>,
    next: Vec<usize>,
    visited: Vec<usize>,
    neighbors: Vec<usize>,
}

/// Updates `cells` in place from `positions`, reusing the previous entries as
/// seeds. Particle-parallel; every write is to the particle's own slot.
pub fn find_cells<M: CouplingMesh>(
    mesh: &M,
    positions: &[DVec3],
    cells: &mut [i32],
) -> LocateStats {
    assert_eq!(positions.len(), cells.len(), "positions and cells must align");
    let located = cells
        .par_iter_mut()
        .zip(positions.par_iter())
        .map_init(SearchScratch::default, |scratch, (cell, &p)| {
            *cell = locate_one(mesh, p, *cell, scratch);
            usize::from(*cell != UNLOCATED)
        })
        .sum::<usize>();
    let stats = LocateStats {
        located,
        unlocated: positions.len() - located,
    };
    if stats.unlocated > 0 {
        debug!(
            "locate: {} of {} particles outside the mesh",
            stats.unlocated,
            positions.len()
        );
    }
    stats
}

fn locate_one<M: CouplingMesh>(mesh: &M, p: DVec3, seed: i32, scratch: &mut SearchScratch) -> i32 {
    if seed != UNLOCATED && (seed as usize) < mesh.cell_count() {
        let seed = seed as usize;
        if mesh.cell_contains(seed, p) {
            return seed as i32;
        }
        if let Some(found) = ring_search(mesh, p, seed, scratch) {
            return found as i32;
        }
    }
    mesh.locate(p)
}

/// Breadth-first walk over face neighbors, at most `SEARCH_DEPTH` rings.
/// Ring membership is tracked in plain vectors: the frontier never exceeds a
/// few dozen cells at this depth.
fn ring_search<M: CouplingMesh>(
    mesh: &M,
    p: DVec3,
    seed: usize,
    scratch: &mut SearchScratch,
) -> Option<usize> {
    scratch.frontier.clear();
    scratch.visited.clear();
    scratch.frontier.push(seed);
    scratch.visited.push(seed);
    for _ in 0..SEARCH_DEPTH {
        scratch.next.clear();
        for fi in 0..scratch.frontier.len() {
            let cell = scratch.frontier[fi];
            scratch.neighbors.clear();
            mesh.neighbors_of(cell, &mut scratch.neighbors);
            for ni in 0..scratch.neighbors.len() {
                let nb = scratch.neighbors[ni];
                if scratch.visited.contains(&nb) {
                    continue;
                }
                if mesh.cell_contains(nb, p) {
                    return Some(nb);
                }
                scratch.visited.push(nb);
                scratch.next.push(nb);
            }
        }
        std::mem::swap(&mut scratch.frontier, &mut scratch.next);
        if scratch.frontier.is_empty() {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FluidInterpolation;
    use crate::fields::VectorField;
    use crate::mesh::BlockMesh;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// BlockMesh wrapper that counts global (seedless) lookups.
    struct CountingMesh {
        inner: BlockMesh,
        global_lookups: AtomicUsize,
    }

    impl CountingMesh {
        fn new(inner: BlockMesh) -> Self {
            Self {
                inner,
                global_lookups: AtomicUsize::new(0),
            }
        }
    }

    impl CouplingMesh for CountingMesh {
        fn cell_count(&self) -> usize {
            self.inner.cell_count()
        }
        fn cell_volume(&self, cell: usize) -> f64 {
            self.inner.cell_volume(cell)
        }
        fn cell_centroid(&self, cell: usize) -> DVec3 {
            self.inner.cell_centroid(cell)
        }
        fn cell_contains(&self, cell: usize, p: DVec3) -> bool {
            self.inner.cell_contains(cell, p)
        }
        fn neighbors_of(&self, cell: usize, out: &mut Vec<usize>) {
            self.inner.neighbors_of(cell, out)
        }
        fn locate(&self, p: DVec3) -> i32 {
            self.global_lookups.fetch_add(1, Ordering::Relaxed);
            self.inner.locate(p)
        }
        fn sample_vector(
            &self,
            field: &VectorField,
            p: DVec3,
            cell: usize,
            interpolation: FluidInterpolation,
        ) -> DVec3 {
            self.inner.sample_vector(field, p, cell, interpolation)
        }
        fn for_each_internal_face(&self, visit: &mut dyn FnMut(usize, usize, f64, f64)) {
            self.inner.for_each_internal_face(visit)
        }
    }

    #[test]
    fn test_cold_start_locates_and_counts() {
        let mesh = BlockMesh::cube(4, 1.0);
        let positions = vec![
            DVec3::new(0.5, 0.5, 0.5),
            DVec3::new(3.5, 3.5, 3.5),
            DVec3::new(-1.0, 0.5, 0.5), // outside
        ];
        let mut cells = vec![UNLOCATED; 3];
        let stats = find_cells(&mesh, &positions, &mut cells);
        assert_eq!(stats, LocateStats { located: 2, unlocated: 1 });
        assert_eq!(cells[0], mesh.cell_index(0, 0, 0) as i32);
        assert_eq!(cells[1], mesh.cell_index(3, 3, 3) as i32);
        assert_eq!(cells[2], UNLOCATED);
    }

    #[test]
    fn test_seeded_search_avoids_global_lookup() {
        let mesh = CountingMesh::new(BlockMesh::cube(6, 1.0));
        let mut positions = vec![DVec3::new(2.5, 2.5, 2.5)];
        let mut cells = vec![UNLOCATED];

        find_cells(&mesh, &positions, &mut cells);
        assert_eq!(mesh.global_lookups.load(Ordering::Relaxed), 1, "cold start is global");

        // Move less than one cell: the seed itself still contains the point.
        positions[0] += DVec3::splat(0.3);
        find_cells(&mesh, &positions, &mut cells);
        // Move about one cell diagonally: found in the neighbor rings.
        positions[0] += DVec3::new(0.9, 0.9, 0.0);
        let stats = find_cells(&mesh, &positions, &mut cells);
        assert_eq!(stats.located, 1);
        assert_eq!(
            mesh.global_lookups.load(Ordering::Relaxed),
            1,
            "seeded searches must not fall back to the global lookup"
        );
        assert_eq!(cells[0], mesh.inner.locate(positions[0]));
    }

    #[test]
    fn test_stale_out_of_range_seed_falls_back() {
        let mesh = BlockMesh::cube(2, 1.0);
        let positions = vec![DVec3::splat(0.5)];
        let mut cells = vec![9999];
        let stats = find_cells(&mesh, &positions, &mut cells);
        assert_eq!(stats.located, 1);
        assert_eq!(cells[0], 0);
    }

    #[test]
    fn test_boundary_particle_deterministic() {
        let mesh = BlockMesh::cube(3, 0.5);
        // Exactly on the face between cells (0,1,1) and (1,1,1).
        let p = DVec3::new(0.5, 0.75, 0.75);
        let mut first = vec![UNLOCATED];
        find_cells(&mesh, &[p], &mut first);
        for _ in 0..5 {
            let mut cells = vec![UNLOCATED];
            find_cells(&mesh, &[p], &mut cells);
            assert_eq!(cells, first, "boundary ownership must be stable");
        }
        assert_eq!(first[0], mesh.cell_index(1, 1, 1) as i32);
    }

    #[test]
    fn test_far_jump_relocates_through_fallback() {
        let mesh = BlockMesh::cube(8, 1.0);
        let mut cells = vec![mesh.cell_index(0, 0, 0) as i32];
        // More than SEARCH_DEPTH cells away from the stale seed.
        let p = DVec3::new(7.5, 7.5, 7.5);
        let stats = find_cells(&mesh, &[p], &mut cells);
        assert_eq!(stats.located, 1);
        assert_eq!(cells[0], mesh.cell_index(7, 7, 7) as i32);
    }
}
