use super::{initialize_interface_cells, solve_eikonal, upwind_candidates, Marker};
use crate::grid::{Array3, ScalarGrid};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Heap entry ordered by smallest tentative distance first.
struct TrialCell {
    dist: f64,
    idx: (usize, usize, usize),
}

impl PartialEq for TrialCell {
    fn eq(&self, other: &Self) -> bool {
        self.dist == other.dist
    }
}
impl Eq for TrialCell {}
impl PartialOrd for TrialCell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for TrialCell {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed for a min-heap; NaNs never enter the heap
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(Ordering::Equal)
    }
}

/// Reinitializes a level set into a signed-distance field by the fast
/// marching method: interface cells are fixed first-order, then distances
/// propagate outward in causal order through a priority queue.
#[derive(Default)]
pub struct FmmLevelSetSolver;

impl FmmLevelSetSolver {
    pub fn new() -> Self {
        FmmLevelSetSolver
    }

    /// Rebuilds `output` so that `|grad(phi)| ~ 1` within `max_distance` of
    /// the interface; the zero isocontour is preserved to first order. Cells
    /// farther than `max_distance` are clamped to `+-max_distance`.
    pub fn reinitialize<G: ScalarGrid>(&self, input: &G, max_distance: f64, output: &mut G) {
        let spacing = input.spec().spacing();
        let size = input.data().size();
        output.resize(input.spec().clone());

        let (mut dist, sign, mut markers) = initialize_interface_cells(input.data(), spacing, max_distance);

        let mut heap = BinaryHeap::new();
        let mut seed_neighbors = |heap: &mut BinaryHeap<TrialCell>,
                                  dist: &Array3<f64>,
                                  markers: &mut Array3<Marker>,
                                  i: usize,
                                  j: usize,
                                  k: usize| {
            for (ni, nj, nk) in neighbors(i, j, k, size.x, size.y, size.z) {
                if markers[(ni, nj, nk)] != Marker::Unknown {
                    continue;
                }
                let mut candidates = upwind_candidates(dist, markers, size, spacing, ni, nj, nk);
                if candidates.is_empty() {
                    continue;
                }
                let d = solve_eikonal(&mut candidates);
                markers[(ni, nj, nk)] = Marker::Trial;
                heap.push(TrialCell { dist: d, idx: (ni, nj, nk) });
            }
        };

        // seed the narrow band around the fixed interface cells
        let mut known = Vec::new();
        markers.for_each_index(|i, j, k| {
            if markers[(i, j, k)] == Marker::Known {
                known.push((i, j, k));
            }
        });
        for (i, j, k) in known {
            seed_neighbors(&mut heap, &dist, &mut markers, i, j, k);
        }

        while let Some(TrialCell { idx: (i, j, k), .. }) = heap.pop() {
            if markers[(i, j, k)] == Marker::Known {
                continue; // stale heap entry
            }
            // re-solve with the current known set; the heap may hold an
            // outdated tentative value
            let mut candidates = upwind_candidates(&dist, &markers, size, spacing, i, j, k);
            if candidates.is_empty() {
                continue;
            }
            let d = solve_eikonal(&mut candidates);
            if d > max_distance {
                markers[(i, j, k)] = Marker::Known;
                dist[(i, j, k)] = max_distance;
                continue;
            }
            dist[(i, j, k)] = d;
            markers[(i, j, k)] = Marker::Known;
            seed_neighbors(&mut heap, &dist, &mut markers, i, j, k);
        }

        let out = output.data_mut().data_mut();
        for (idx, v) in out.iter_mut().enumerate() {
            *v = sign.data()[idx] * dist.data()[idx].min(max_distance);
        }
    }
}

fn neighbors(
    i: usize,
    j: usize,
    k: usize,
    nx: usize,
    ny: usize,
    nz: usize,
) -> impl Iterator<Item = (usize, usize, usize)> {
    let mut list = Vec::with_capacity(6);
    if i > 0 {
        list.push((i - 1, j, k));
    }
    if i + 1 < nx {
        list.push((i + 1, j, k));
    }
    if j > 0 {
        list.push((i, j - 1, k));
    }
    if j + 1 < ny {
        list.push((i, j + 1, k));
    }
    if k > 0 {
        list.push((i, j, k - 1));
    }
    if k + 1 < nz {
        list.push((i, j, k + 1));
    }
    list.into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CellCenteredScalarGrid, GridSpec, ScalarGrid};
    use crate::math::size3;
    use cgmath::MetricSpace;

    #[test]
    fn sphere_distances_are_recovered() {
        let n = 32;
        let h = 1.0 / n as f64;
        let spec = GridSpec::with_uniform_spacing(size3(n, n, n), h).unwrap();
        let center = cgmath::point3(0.5, 0.5, 0.5);
        let radius = 0.3;

        // badly scaled input: 5x the true signed distance
        let mut input = CellCenteredScalarGrid::new(spec.clone());
        input.par_fill_with(|i, j, k| {
            let p = spec.cell_center_position(i, j, k);
            5.0 * (p.distance(center) - radius)
        });

        let mut output = CellCenteredScalarGrid::new(spec.clone());
        FmmLevelSetSolver::new().reinitialize(&input, 0.2, &mut output);

        // within the band the result approximates the true distance
        let mut max_err: f64 = 0.0;
        output.for_each_data_point_index(|i, j, k| {
            let p = spec.cell_center_position(i, j, k);
            let truth = p.distance(center) - radius;
            if truth.abs() < 0.1 {
                max_err = max_err.max((output.data()[(i, j, k)] - truth).abs());
            }
        });
        assert!(max_err < 2.0 * h, "max error {} not within two cells", max_err);
    }

    #[test]
    fn zero_isocontour_is_preserved() {
        let n = 16;
        let h = 1.0 / n as f64;
        let spec = GridSpec::with_uniform_spacing(size3(n, n, n), h).unwrap();
        // plane x = 0.5, scaled arbitrarily
        let mut input = CellCenteredScalarGrid::new(spec.clone());
        input.par_fill_with(|i, j, k| {
            let p = spec.cell_center_position(i, j, k);
            let _ = (j, k);
            3.0 * (p.x - 0.5)
        });
        let mut output = CellCenteredScalarGrid::new(spec.clone());
        FmmLevelSetSolver::new().reinitialize(&input, 1.0, &mut output);

        output.for_each_data_point_index(|i, j, k| {
            let p = spec.cell_center_position(i, j, k);
            let inside_in = input.data()[(i, j, k)] <= 0.0;
            let inside_out = output.data()[(i, j, k)] <= 0.0;
            assert_eq!(inside_in, inside_out, "sign flipped at {:?}", (p, i, j, k));
        });
    }
}
