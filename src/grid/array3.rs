use crate::math::{size3, Size3};
use crate::parallel;

/// Dense 3D array in x-fastest (then y, then z) order.
#[derive(Clone, Debug, PartialEq)]
pub struct Array3<T> {
    size: Size3,
    data: Vec<T>,
}

impl<T: Clone> Array3<T> {
    pub fn new(size: Size3, init: T) -> Self {
        Array3 {
            size,
            data: vec![init; size.x * size.y * size.z],
        }
    }

    pub fn from_vec(size: Size3, data: Vec<T>) -> Self {
        assert_eq!(data.len(), size.x * size.y * size.z);
        Array3 { size, data }
    }

    pub fn size(&self) -> Size3 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        debug_assert_lt!(i, self.size.x);
        debug_assert_lt!(j, self.size.y);
        debug_assert_lt!(k, self.size.z);
        i + self.size.x * (j + self.size.y * k)
    }

    pub fn fill(&mut self, value: T) {
        for v in self.data.iter_mut() {
            *v = value.clone();
        }
    }

    /// Drops the old contents; the array is entirely reinitialized.
    pub fn resize(&mut self, size: Size3, init: T) {
        self.size = size;
        self.data.clear();
        self.data.resize(size.x * size.y * size.z, init);
    }

    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    pub fn for_each_index<F: FnMut(usize, usize, usize)>(&self, f: F) {
        parallel::for_each_index3(self.size, f);
    }

    pub fn swap(&mut self, other: &mut Array3<T>) {
        std::mem::swap(&mut self.size, &mut other.size);
        std::mem::swap(&mut self.data, &mut other.data);
    }
}

impl<T: Clone + Send> Array3<T> {
    /// Recomputes every element as `f(i, j, k)` in parallel.
    pub fn par_fill_with<F>(&mut self, f: F)
    where
        F: Fn(usize, usize, usize) -> T + Sync + Send,
    {
        parallel::parallel_fill3(&mut self.data, self.size, f);
    }
}

impl<T> std::ops::Index<(usize, usize, usize)> for Array3<T> {
    type Output = T;

    #[inline]
    fn index(&self, (i, j, k): (usize, usize, usize)) -> &T {
        debug_assert!(i < self.size.x && j < self.size.y && k < self.size.z);
        &self.data[i + self.size.x * (j + self.size.y * k)]
    }
}

impl<T> std::ops::IndexMut<(usize, usize, usize)> for Array3<T> {
    #[inline]
    fn index_mut(&mut self, (i, j, k): (usize, usize, usize)) -> &mut T {
        debug_assert!(i < self.size.x && j < self.size.y && k < self.size.z);
        &mut self.data[i + self.size.x * (j + self.size.y * k)]
    }
}

impl<T: Clone + Default> Default for Array3<T> {
    fn default() -> Self {
        Array3 {
            size: size3(0, 0, 0),
            data: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_x_fastest() {
        let mut a = Array3::new(size3(2, 3, 4), 0usize);
        a[(1, 2, 3)] = 42;
        assert_eq!(a.data()[1 + 2 * (2 + 3 * 3)], 42);
        assert_eq!(a[(1, 2, 3)], 42);
    }

    #[test]
    fn par_fill_matches_index() {
        let mut a = Array3::new(size3(5, 4, 3), 0.0f64);
        a.par_fill_with(|i, j, k| (i + 10 * j + 100 * k) as f64);
        a.for_each_index(|i, j, k| {
            assert_eq!(a[(i, j, k)], (i + 10 * j + 100 * k) as f64);
        });
    }
}
