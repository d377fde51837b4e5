use crate::grid::Array3;

/// Flood-fills values from `valid` cells into invalid ones, `depth` rings at
/// a time: each pass assigns every still-invalid cell the average of its
/// already-valid six-neighbors. Valid cells are never modified.
pub fn extrapolate_to_region(data: &mut Array3<f64>, valid: &Array3<bool>, depth: usize) {
    let size = data.size();
    debug_assert_eq!(valid.size(), size);

    let mut valid0 = valid.clone();
    let mut valid1 = valid.clone();
    let mut data0 = data.clone();

    for _ in 0..depth {
        let mut changed = false;
        crate::parallel::for_each_index3(size, |i, j, k| {
            if valid0[(i, j, k)] {
                return;
            }
            let mut sum = 0.0;
            let mut count = 0;
            let mut consider = |idx: (usize, usize, usize)| {
                if valid0[idx] {
                    sum += data0[idx];
                    count += 1;
                }
            };
            if i > 0 {
                consider((i - 1, j, k));
            }
            if i + 1 < size.x {
                consider((i + 1, j, k));
            }
            if j > 0 {
                consider((i, j - 1, k));
            }
            if j + 1 < size.y {
                consider((i, j + 1, k));
            }
            if k > 0 {
                consider((i, j, k - 1));
            }
            if k + 1 < size.z {
                consider((i, j, k + 1));
            }

            if count > 0 {
                data[(i, j, k)] = sum / count as f64;
                valid1[(i, j, k)] = true;
                changed = true;
            }
        });

        if !changed {
            break;
        }
        valid0.data_mut().copy_from_slice(valid1.data());
        data0.data_mut().copy_from_slice(data.data());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::size3;

    #[test]
    fn fills_one_ring_per_pass() {
        let size = size3(5, 1, 1);
        let mut data = Array3::new(size, 0.0);
        let mut valid = Array3::new(size, false);
        data[(0, 0, 0)] = 3.0;
        valid[(0, 0, 0)] = true;

        let mut one = data.clone();
        extrapolate_to_region(&mut one, &valid, 1);
        assert_eq!(one[(1, 0, 0)], 3.0);
        assert_eq!(one[(2, 0, 0)], 0.0); // untouched, out of reach

        let mut all = data.clone();
        extrapolate_to_region(&mut all, &valid, 10);
        for i in 0..5 {
            assert_eq!(all[(i, 0, 0)], 3.0);
        }
    }

    #[test]
    fn valid_cells_are_left_alone() {
        let size = size3(3, 3, 1);
        let mut data = Array3::new(size, 0.0);
        let mut valid = Array3::new(size, false);
        data[(0, 0, 0)] = 1.0;
        valid[(0, 0, 0)] = true;
        data[(2, 2, 0)] = 5.0;
        valid[(2, 2, 0)] = true;

        extrapolate_to_region(&mut data, &valid, 4);
        assert_eq!(data[(0, 0, 0)], 1.0);
        assert_eq!(data[(2, 2, 0)], 5.0);
        // middle cell averages contributions flooding in from both seeds
        assert!(data[(1, 1, 0)] > 1.0 && data[(1, 1, 0)] < 5.0);
    }
}
