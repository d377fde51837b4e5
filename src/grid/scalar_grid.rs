use super::{Array3, GridSpec, GRID_KIND_CELL_CENTERED, GRID_KIND_VERTEX_CENTERED};
use crate::error::{Result, SimulationError};
use crate::math::{get_barycentric, size3, trilerp, Point3, Size3, Vec3};
use crate::parallel;
use crate::serialization as ser;

/// Scalar quantity on a structured grid. The two variants differ only in
/// where their samples sit, which shifts the data extents and every
/// position-dependent operation.
pub trait ScalarGrid {
    fn spec(&self) -> &GridSpec;
    fn data(&self) -> &Array3<f64>;
    fn data_mut(&mut self) -> &mut Array3<f64>;

    /// Position of sample (0, 0, 0).
    fn data_origin(&self) -> Point3;
    /// Data extents for a given grid resolution.
    fn data_size_for(resolution: Size3) -> Size3
    where
        Self: Sized;
    fn serialization_kind(&self) -> u8;

    /// Drops contents and reshapes to the new spec, zero filled.
    fn resize(&mut self, spec: GridSpec);

    fn data_size(&self) -> Size3 {
        self.data().size()
    }

    fn data_position(&self, i: usize, j: usize, k: usize) -> Point3 {
        let o = self.data_origin();
        let h = self.spec().spacing();
        cgmath::point3(
            o.x + i as f64 * h.x,
            o.y + j as f64 * h.y,
            o.z + k as f64 * h.z,
        )
    }

    /// Tri-linear interpolation from the containing cell; out-of-range
    /// coordinates are clamped to the nearest valid sample.
    fn sample(&self, p: Point3) -> f64 {
        let (i, j, k, fx, fy, fz) = self.sample_coords(p);
        let d = self.data();
        let (ip, jp, kp) = clamped_upper(d.size(), i, j, k);
        trilerp(
            d[(i, j, k)],
            d[(ip, j, k)],
            d[(i, jp, k)],
            d[(ip, jp, k)],
            d[(i, j, kp)],
            d[(ip, j, kp)],
            d[(i, jp, kp)],
            d[(ip, jp, kp)],
            fx,
            fy,
            fz,
        )
    }

    /// Lower sample index and per-axis fraction for a world position.
    fn sample_coords(&self, p: Point3) -> (usize, usize, usize, f64, f64, f64) {
        let o = self.data_origin();
        let h = self.spec().spacing();
        let ds = self.data_size();
        let (i, fx) = get_barycentric((p.x - o.x) / h.x, ds.x);
        let (j, fy) = get_barycentric((p.y - o.y) / h.y, ds.y);
        let (k, fz) = get_barycentric((p.z - o.z) / h.z, ds.z);
        (i, j, k, fx, fy, fz)
    }

    /// Central differences, one-sided at the data boundary.
    fn gradient_at_data_point(&self, i: usize, j: usize, k: usize) -> Vec3 {
        let d = self.data();
        let ds = d.size();
        let h = self.spec().spacing();
        Vec3::new(
            axis_derivative(|i| d[(i, j, k)], i, ds.x, h.x),
            axis_derivative(|j| d[(i, j, k)], j, ds.y, h.y),
            axis_derivative(|k| d[(i, j, k)], k, ds.z, h.z),
        )
    }

    /// 7-point Laplacian; missing neighbors at the boundary contribute zero
    /// difference (reflective).
    fn laplacian_at_data_point(&self, i: usize, j: usize, k: usize) -> f64 {
        let d = self.data();
        let ds = d.size();
        let h = self.spec().spacing();
        let center = d[(i, j, k)];

        let mut sum = 0.0;
        let mut dl = 0.0;
        let mut dr = 0.0;
        if i > 0 {
            dl = center - d[(i - 1, j, k)];
        }
        if i + 1 < ds.x {
            dr = d[(i + 1, j, k)] - center;
        }
        sum += (dr - dl) / (h.x * h.x);

        let mut dd = 0.0;
        let mut du = 0.0;
        if j > 0 {
            dd = center - d[(i, j - 1, k)];
        }
        if j + 1 < ds.y {
            du = d[(i, j + 1, k)] - center;
        }
        sum += (du - dd) / (h.y * h.y);

        let mut db = 0.0;
        let mut df = 0.0;
        if k > 0 {
            db = center - d[(i, j, k - 1)];
        }
        if k + 1 < ds.z {
            df = d[(i, j, k + 1)] - center;
        }
        sum += (df - db) / (h.z * h.z);

        sum
    }

    /// Gradient at an arbitrary position, tri-linear over the eight
    /// surrounding data-point gradients.
    fn gradient(&self, p: Point3) -> Vec3 {
        let (i, j, k, fx, fy, fz) = self.sample_coords(p);
        let (ip, jp, kp) = clamped_upper(self.data().size(), i, j, k);

        let g = |i, j, k| self.gradient_at_data_point(i, j, k);
        let corners = [
            g(i, j, k),
            g(ip, j, k),
            g(i, jp, k),
            g(ip, jp, k),
            g(i, j, kp),
            g(ip, j, kp),
            g(i, jp, kp),
            g(ip, jp, kp),
        ];
        Vec3::new(
            trilerp(
                corners[0].x, corners[1].x, corners[2].x, corners[3].x, corners[4].x, corners[5].x,
                corners[6].x, corners[7].x, fx, fy, fz,
            ),
            trilerp(
                corners[0].y, corners[1].y, corners[2].y, corners[3].y, corners[4].y, corners[5].y,
                corners[6].y, corners[7].y, fx, fy, fz,
            ),
            trilerp(
                corners[0].z, corners[1].z, corners[2].z, corners[3].z, corners[4].z, corners[5].z,
                corners[6].z, corners[7].z, fx, fy, fz,
            ),
        )
    }

    fn fill(&mut self, value: f64) {
        self.data_mut().fill(value);
    }

    fn for_each_data_point_index<F: FnMut(usize, usize, usize)>(&self, f: F) {
        parallel::for_each_index3(self.data_size(), f);
    }

    fn par_for_each_data_point_index<F>(&self, f: F)
    where
        F: Fn(usize, usize, usize) + Sync + Send,
    {
        parallel::parallel_for_each_index3(self.data_size(), f);
    }

    fn has_nan(&self) -> bool {
        self.data().data().iter().any(|v| !v.is_finite())
    }

    /// Writes resolution, spacing, origin, then the raw samples in x-fastest
    /// order.
    fn serialize(&self, out: &mut Vec<u8>) {
        let spec = self.spec();
        ser::write_u8(out, self.serialization_kind());
        ser::write_u32(out, spec.resolution().x as u32);
        ser::write_u32(out, spec.resolution().y as u32);
        ser::write_u32(out, spec.resolution().z as u32);
        ser::write_f64(out, spec.spacing().x);
        ser::write_f64(out, spec.spacing().y);
        ser::write_f64(out, spec.spacing().z);
        ser::write_f64(out, spec.origin().x);
        ser::write_f64(out, spec.origin().y);
        ser::write_f64(out, spec.origin().z);
        ser::write_f64_slice(out, self.data().data());
    }

    /// Resizes to whatever the header describes, regardless of prior shape.
    fn deserialize(&mut self, input: &mut &[u8]) -> Result<()>
    where
        Self: Sized,
    {
        let kind = ser::read_u8(input)?;
        if kind != self.serialization_kind() {
            return Err(SimulationError::Serialization(format!(
                "grid kind mismatch: expected {}, found {}",
                self.serialization_kind(),
                kind
            )));
        }
        let resolution = size3(
            ser::read_u32(input)? as usize,
            ser::read_u32(input)? as usize,
            ser::read_u32(input)? as usize,
        );
        let spacing = Vec3::new(ser::read_f64(input)?, ser::read_f64(input)?, ser::read_f64(input)?);
        let origin = cgmath::point3(ser::read_f64(input)?, ser::read_f64(input)?, ser::read_f64(input)?);
        let data = ser::read_f64_vec(input)?;

        let spec = GridSpec::new(resolution, spacing, origin)?;
        let expected = Self::data_size_for(resolution);
        if data.len() != expected.x * expected.y * expected.z {
            return Err(SimulationError::Serialization(format!(
                "scalar grid data length {} does not match header extents {:?}",
                data.len(),
                expected
            )));
        }
        self.resize(spec);
        self.data_mut().data_mut().copy_from_slice(&data);
        Ok(())
    }
}

#[inline]
fn clamped_upper(size: Size3, i: usize, j: usize, k: usize) -> (usize, usize, usize) {
    (
        (i + 1).min(size.x - 1),
        (j + 1).min(size.y - 1),
        (k + 1).min(size.z - 1),
    )
}

fn axis_derivative<F: Fn(usize) -> f64>(value: F, i: usize, size: usize, h: f64) -> f64 {
    if size == 1 {
        0.0
    } else if i == 0 {
        (value(1) - value(0)) / h
    } else if i + 1 == size {
        (value(i) - value(i - 1)) / h
    } else {
        (value(i + 1) - value(i - 1)) / (2.0 * h)
    }
}

/// Samples at cell centers; data extents equal the resolution.
#[derive(Clone, Debug)]
pub struct CellCenteredScalarGrid {
    spec: GridSpec,
    data: Array3<f64>,
}

impl CellCenteredScalarGrid {
    pub fn new(spec: GridSpec) -> Self {
        let data = Array3::new(spec.resolution(), 0.0);
        CellCenteredScalarGrid { spec, data }
    }

    pub fn with_value(spec: GridSpec, value: f64) -> Self {
        let data = Array3::new(spec.resolution(), value);
        CellCenteredScalarGrid { spec, data }
    }

    pub fn par_fill_with<F>(&mut self, f: F)
    where
        F: Fn(usize, usize, usize) -> f64 + Sync + Send,
    {
        self.data.par_fill_with(f);
    }
}

impl ScalarGrid for CellCenteredScalarGrid {
    fn spec(&self) -> &GridSpec {
        &self.spec
    }

    fn data(&self) -> &Array3<f64> {
        &self.data
    }

    fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    fn data_origin(&self) -> Point3 {
        self.spec.cell_center_position(0, 0, 0)
    }

    fn data_size_for(resolution: Size3) -> Size3 {
        resolution
    }

    fn serialization_kind(&self) -> u8 {
        GRID_KIND_CELL_CENTERED
    }

    fn resize(&mut self, spec: GridSpec) {
        self.data.resize(spec.resolution(), 0.0);
        self.spec = spec;
    }
}

/// Samples on cell corners; data extents are resolution + 1 per axis.
#[derive(Clone, Debug)]
pub struct VertexCenteredScalarGrid {
    spec: GridSpec,
    data: Array3<f64>,
}

impl VertexCenteredScalarGrid {
    pub fn new(spec: GridSpec) -> Self {
        let data = Array3::new(Self::data_size_for(spec.resolution()), 0.0);
        VertexCenteredScalarGrid { spec, data }
    }

    pub fn par_fill_with<F>(&mut self, f: F)
    where
        F: Fn(usize, usize, usize) -> f64 + Sync + Send,
    {
        self.data.par_fill_with(f);
    }
}

impl ScalarGrid for VertexCenteredScalarGrid {
    fn spec(&self) -> &GridSpec {
        &self.spec
    }

    fn data(&self) -> &Array3<f64> {
        &self.data
    }

    fn data_mut(&mut self) -> &mut Array3<f64> {
        &mut self.data
    }

    fn data_origin(&self) -> Point3 {
        self.spec.origin()
    }

    fn data_size_for(resolution: Size3) -> Size3 {
        size3(resolution.x + 1, resolution.y + 1, resolution.z + 1)
    }

    fn serialization_kind(&self) -> u8 {
        GRID_KIND_VERTEX_CENTERED
    }

    fn resize(&mut self, spec: GridSpec) {
        self.data.resize(Self::data_size_for(spec.resolution()), 0.0);
        self.spec = spec;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_grid(n: usize) -> CellCenteredScalarGrid {
        CellCenteredScalarGrid::new(GridSpec::with_uniform_spacing(size3(n, n, n), 1.0 / n as f64).unwrap())
    }

    #[test]
    fn sample_of_uniform_grid_is_exact() {
        let mut grid = unit_grid(8);
        grid.fill(3.5);
        for p in [
            cgmath::point3(0.1, 0.9, 0.5),
            cgmath::point3(0.0, 0.0, 0.0),
            cgmath::point3(2.0, -1.0, 0.5), // out of range clamps, still uniform
        ] {
            assert_eq!(grid.sample(p), 3.5);
        }
    }

    #[test]
    fn sample_reproduces_linear_field() {
        let mut grid = unit_grid(8);
        grid.par_fill_with(|i, j, k| {
            let p = grid_pos(i, j, k, 8);
            2.0 * p.0 - p.1 + 0.5 * p.2
        });
        // inside the data extents, away from the clamped boundary band
        let p = cgmath::point3(0.4375, 0.5625, 0.3125);
        assert_relative_eq!(grid.sample(p), 2.0 * p.x - p.y + 0.5 * p.z, epsilon = 1e-12);
    }

    fn grid_pos(i: usize, j: usize, k: usize, n: usize) -> (f64, f64, f64) {
        let h = 1.0 / n as f64;
        ((i as f64 + 0.5) * h, (j as f64 + 0.5) * h, (k as f64 + 0.5) * h)
    }

    #[test]
    fn vertex_grid_extents_and_positions() {
        let grid = VertexCenteredScalarGrid::new(GridSpec::with_uniform_spacing(size3(4, 4, 4), 0.25).unwrap());
        assert_eq!(grid.data_size(), size3(5, 5, 5));
        assert_eq!(grid.data_position(4, 0, 0), cgmath::point3(1.0, 0.0, 0.0));
    }

    #[test]
    fn gradient_of_linear_field() {
        let mut grid = unit_grid(8);
        grid.par_fill_with(|i, j, k| {
            let p = grid_pos(i, j, k, 8);
            3.0 * p.0 + 2.0 * p.1 - p.2
        });
        let g = grid.gradient_at_data_point(4, 4, 4);
        assert_relative_eq!(g.x, 3.0, epsilon = 1e-10);
        assert_relative_eq!(g.y, 2.0, epsilon = 1e-10);
        assert_relative_eq!(g.z, -1.0, epsilon = 1e-10);
        // one-sided at the boundary
        let g = grid.gradient_at_data_point(0, 0, 0);
        assert_relative_eq!(g.x, 3.0, epsilon = 1e-10);
    }

    #[test]
    fn laplacian_of_quadratic_field() {
        let n = 16;
        let mut grid = unit_grid(n);
        grid.par_fill_with(|i, j, k| {
            let h = 1.0 / n as f64;
            let x = (i as f64 + 0.5) * h;
            let _ = (j, k);
            x * x
        });
        // interior laplacian of x^2 is 2
        assert_relative_eq!(grid.laplacian_at_data_point(8, 8, 8), 2.0, epsilon = 1e-8);
    }

    #[test]
    fn serialize_round_trip_resizes_reader() {
        let mut grid = unit_grid(4);
        grid.par_fill_with(|i, j, k| (i * 100 + j * 10 + k) as f64);
        let mut buf = Vec::new();
        grid.serialize(&mut buf);

        let mut other = unit_grid(7); // wrong shape on purpose
        let mut cursor = buf.as_slice();
        other.deserialize(&mut cursor).unwrap();
        assert_eq!(other.spec(), grid.spec());
        assert_eq!(other.data(), grid.data());
    }
}
