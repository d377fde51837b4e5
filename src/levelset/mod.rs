mod fast_marching;
mod fast_sweeping;
mod pde;
mod utils;

pub use fast_marching::FmmLevelSetSolver;
pub use fast_sweeping::FsmLevelSetSolver;
pub use pde::{cd2, eno3, upwind1, weno5};
pub use utils::{
    distance_to_zero_level_set, fraction_inside, fraction_inside_sdf, is_inside_sdf,
};

use crate::grid::Array3;
use crate::math::{Size3, Vec3};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Marker {
    Unknown,
    Known,
    Trial,
}

/// Fixes the cells bracketing the zero isocontour with a first order
/// distance estimate; everything else is set to an unsigned "far" value.
/// Returns (unsigned distances, sign array, markers).
pub(crate) fn initialize_interface_cells(
    input: &Array3<f64>,
    spacing: Vec3,
    far: f64,
) -> (Array3<f64>, Array3<f64>, Array3<Marker>) {
    let size = input.size();
    let mut dist = Array3::new(size, far);
    let mut sign = Array3::new(size, 1.0);
    let mut markers = Array3::new(size, Marker::Unknown);

    input.for_each_index(|i, j, k| {
        let phi = input[(i, j, k)];
        sign[(i, j, k)] = if is_inside_sdf(phi) { -1.0 } else { 1.0 };

        let mut min_dist = f64::MAX;
        let mut near_interface = false;
        let mut consider = |neighbor: f64, h: f64| {
            if is_inside_sdf(phi) != is_inside_sdf(neighbor) {
                near_interface = true;
                let denom = phi.abs() + neighbor.abs();
                let d = if denom > f64::EPSILON {
                    h * phi.abs() / denom
                } else {
                    0.0
                };
                min_dist = min_dist.min(d);
            }
        };
        if i > 0 {
            consider(input[(i - 1, j, k)], spacing.x);
        }
        if i + 1 < size.x {
            consider(input[(i + 1, j, k)], spacing.x);
        }
        if j > 0 {
            consider(input[(i, j - 1, k)], spacing.y);
        }
        if j + 1 < size.y {
            consider(input[(i, j + 1, k)], spacing.y);
        }
        if k > 0 {
            consider(input[(i, j, k - 1)], spacing.z);
        }
        if k + 1 < size.z {
            consider(input[(i, j, k + 1)], spacing.z);
        }

        if near_interface {
            dist[(i, j, k)] = min_dist;
            markers[(i, j, k)] = Marker::Known;
        }
    });

    (dist, sign, markers)
}

/// Solves the Godunov-upwind Eikonal update `sum ((x - d_i) / h_i)^2 = 1`
/// from per-axis upwind candidates `(d, h)`, using as many terms as remain
/// causally consistent.
pub(crate) fn solve_eikonal(candidates: &mut [(f64, f64)]) -> f64 {
    candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut solution = f64::MAX;
    for m in (1..=candidates.len()).rev() {
        let used = &candidates[..m];
        let mut a = 0.0;
        let mut b = 0.0;
        let mut c = -1.0;
        for &(d, h) in used {
            let inv_h_sqr = 1.0 / (h * h);
            a += inv_h_sqr;
            b += d * inv_h_sqr;
            c += d * d * inv_h_sqr;
        }
        let discriminant = b * b - a * c;
        if discriminant < 0.0 {
            continue;
        }
        let x = (b + discriminant.sqrt()) / a;
        // causality: the solution must exceed every distance it was built from
        if x >= used[m - 1].0 {
            solution = x;
            break;
        }
    }
    if solution == f64::MAX {
        // at least the single-term update always exists
        candidates[0].0 + candidates[0].1
    } else {
        solution
    }
}

pub(crate) fn upwind_candidates(
    dist: &Array3<f64>,
    markers: &Array3<Marker>,
    size: Size3,
    spacing: Vec3,
    i: usize,
    j: usize,
    k: usize,
) -> Vec<(f64, f64)> {
    let mut candidates = Vec::with_capacity(3);
    let mut push_axis = |lo: Option<(usize, usize, usize)>, hi: Option<(usize, usize, usize)>, h: f64| {
        let mut best = f64::MAX;
        for idx in [lo, hi].into_iter().flatten() {
            if markers[idx] == Marker::Known {
                best = best.min(dist[idx]);
            }
        }
        if best < f64::MAX {
            candidates.push((best, h));
        }
    };
    push_axis(
        (i > 0).then(|| (i - 1, j, k)),
        (i + 1 < size.x).then(|| (i + 1, j, k)),
        spacing.x,
    );
    push_axis(
        (j > 0).then(|| (i, j - 1, k)),
        (j + 1 < size.y).then(|| (i, j + 1, k)),
        spacing.y,
    );
    push_axis(
        (k > 0).then(|| (i, j, k - 1)),
        (k + 1 < size.z).then(|| (i, j, k + 1)),
        spacing.z,
    );
    candidates
}
