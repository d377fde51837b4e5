//! Data-parallel building blocks. Nothing outside this module and the grid
//! containers should touch rayon directly; solver code works in terms of
//! `parallel_for`-style free functions.

use crate::math::Size3;
use rayon::prelude::*;

/// Calls `f(i)` for every index in `range`, in unspecified order.
pub fn parallel_for<F>(range: std::ops::Range<usize>, f: F)
where
    F: Fn(usize) + Sync + Send,
{
    range.into_par_iter().for_each(f);
}

/// Calls `f(i, j, k)` for every index of a 3D shape, in unspecified order.
/// Parallelized over the outermost (z) axis.
pub fn parallel_for_each_index3<F>(size: Size3, f: F)
where
    F: Fn(usize, usize, usize) + Sync + Send,
{
    (0..size.z).into_par_iter().for_each(|k| {
        for j in 0..size.y {
            for i in 0..size.x {
                f(i, j, k);
            }
        }
    });
}

/// Serial x-fastest iteration. The workhorse for order-dependent passes
/// (sweeps, substitutions) and for building compacted enumerations.
pub fn for_each_index3<F>(size: Size3, mut f: F)
where
    F: FnMut(usize, usize, usize),
{
    for k in 0..size.z {
        for j in 0..size.y {
            for i in 0..size.x {
                f(i, j, k);
            }
        }
    }
}

/// Parallel map over z-slabs of a dense x-fastest array: each element is
/// recomputed as `f(i, j, k)`. Writes are partitioned by construction.
pub fn parallel_fill3<T, F>(data: &mut [T], size: Size3, f: F)
where
    T: Send,
    F: Fn(usize, usize, usize) -> T + Sync + Send,
{
    assert_eq!(data.len(), size.x * size.y * size.z);
    data.par_chunks_mut(size.x * size.y).enumerate().for_each(|(k, slab)| {
        for j in 0..size.y {
            for i in 0..size.x {
                slab[i + size.x * j] = f(i, j, k);
            }
        }
    });
}

/// Sums `f(i)` over the range with a parallel reduction. Float reductions are
/// not guaranteed to be bit-stable across thread counts.
pub fn parallel_sum<F>(range: std::ops::Range<usize>, f: F) -> f64
where
    F: Fn(usize) -> f64 + Sync + Send,
{
    range.into_par_iter().map(f).sum()
}

/// Maximum of `f(i)` over the range, or `init` for an empty range.
pub fn parallel_max<F>(range: std::ops::Range<usize>, init: f64, f: F) -> f64
where
    F: Fn(usize) -> f64 + Sync + Send,
{
    range.into_par_iter().map(f).reduce(|| init, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::size3;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn index3_visits_every_index_once() {
        let counter = AtomicUsize::new(0);
        parallel_for_each_index3(size3(3, 4, 5), |_, _, _| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert_eq!(counter.load(Ordering::Relaxed), 60);
    }

    #[test]
    fn fill3_matches_serial_order() {
        let size = size3(4, 3, 2);
        let mut data = vec![0usize; 24];
        parallel_fill3(&mut data, size, |i, j, k| i + 4 * (j + 3 * k));
        for (idx, v) in data.iter().enumerate() {
            assert_eq!(idx, *v);
        }
    }

    #[test]
    fn sum_and_max() {
        assert_eq!(parallel_sum(0..5, |i| i as f64), 10.0);
        assert_eq!(parallel_max(0..5, f64::MIN, |i| (i as f64) - 2.0), 2.0);
    }
}
