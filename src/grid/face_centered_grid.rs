use super::{
    Array3, GridSpec, GRID_KIND_FACE_U, GRID_KIND_FACE_V, GRID_KIND_FACE_W,
};
use crate::error::{Result, SimulationError};
use crate::math::{get_barycentric, size3, trilerp, Point3, Size3, Vec3};
use crate::serialization as ser;

/// Staggered (MAC) vector grid: each velocity component lives on the cell
/// faces perpendicular to its axis. U data is (nx+1, ny, nz), V is
/// (nx, ny+1, nz), W is (nx, ny, nz+1).
#[derive(Clone, Debug)]
pub struct FaceCenteredGrid {
    spec: GridSpec,
    u: Array3<f64>,
    v: Array3<f64>,
    w: Array3<f64>,
}

impl FaceCenteredGrid {
    pub fn new(spec: GridSpec) -> Self {
        let res = spec.resolution();
        FaceCenteredGrid {
            u: Array3::new(size3(res.x + 1, res.y, res.z), 0.0),
            v: Array3::new(size3(res.x, res.y + 1, res.z), 0.0),
            w: Array3::new(size3(res.x, res.y, res.z + 1), 0.0),
            spec,
        }
    }

    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    pub fn resolution(&self) -> Size3 {
        self.spec.resolution()
    }

    pub fn resize(&mut self, spec: GridSpec) {
        let res = spec.resolution();
        self.u.resize(size3(res.x + 1, res.y, res.z), 0.0);
        self.v.resize(size3(res.x, res.y + 1, res.z), 0.0);
        self.w.resize(size3(res.x, res.y, res.z + 1), 0.0);
        self.spec = spec;
    }

    pub fn u(&self) -> &Array3<f64> {
        &self.u
    }

    pub fn v(&self) -> &Array3<f64> {
        &self.v
    }

    pub fn w(&self) -> &Array3<f64> {
        &self.w
    }

    pub fn u_mut(&mut self) -> &mut Array3<f64> {
        &mut self.u
    }

    pub fn v_mut(&mut self) -> &mut Array3<f64> {
        &mut self.v
    }

    pub fn w_mut(&mut self) -> &mut Array3<f64> {
        &mut self.w
    }

    pub fn u_position(&self, i: usize, j: usize, k: usize) -> Point3 {
        let o = self.spec.origin();
        let h = self.spec.spacing();
        cgmath::point3(
            o.x + i as f64 * h.x,
            o.y + (j as f64 + 0.5) * h.y,
            o.z + (k as f64 + 0.5) * h.z,
        )
    }

    pub fn v_position(&self, i: usize, j: usize, k: usize) -> Point3 {
        let o = self.spec.origin();
        let h = self.spec.spacing();
        cgmath::point3(
            o.x + (i as f64 + 0.5) * h.x,
            o.y + j as f64 * h.y,
            o.z + (k as f64 + 0.5) * h.z,
        )
    }

    pub fn w_position(&self, i: usize, j: usize, k: usize) -> Point3 {
        let o = self.spec.origin();
        let h = self.spec.spacing();
        cgmath::point3(
            o.x + (i as f64 + 0.5) * h.x,
            o.y + (j as f64 + 0.5) * h.y,
            o.z + k as f64 * h.z,
        )
    }

    pub fn fill(&mut self, value: Vec3) {
        self.u.fill(value.x);
        self.v.fill(value.y);
        self.w.fill(value.z);
    }

    /// Sets every face component from a vector field evaluated at the face
    /// center.
    pub fn fill_with<F>(&mut self, f: F)
    where
        F: Fn(Point3) -> Vec3 + Sync + Send,
    {
        let spec = self.spec.clone();
        self.u.par_fill_with(|i, j, k| f(u_position_of(&spec, i, j, k)).x);
        self.v.par_fill_with(|i, j, k| f(v_position_of(&spec, i, j, k)).y);
        self.w.par_fill_with(|i, j, k| f(w_position_of(&spec, i, j, k)).z);
    }

    /// Per-component tri-linear interpolation, clamped at the data bounds.
    pub fn sample(&self, p: Point3) -> Vec3 {
        Vec3::new(self.sample_u(p), self.sample_v(p), self.sample_w(p))
    }

    pub fn sample_u(&self, p: Point3) -> f64 {
        let o = self.u_position(0, 0, 0);
        sample_component(&self.u, o, self.spec.spacing(), p)
    }

    pub fn sample_v(&self, p: Point3) -> f64 {
        let o = self.v_position(0, 0, 0);
        sample_component(&self.v, o, self.spec.spacing(), p)
    }

    pub fn sample_w(&self, p: Point3) -> f64 {
        let o = self.w_position(0, 0, 0);
        sample_component(&self.w, o, self.spec.spacing(), p)
    }

    /// Average of the two bracketing faces per component.
    pub fn value_at_cell_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        Vec3::new(
            0.5 * (self.u[(i, j, k)] + self.u[(i + 1, j, k)]),
            0.5 * (self.v[(i, j, k)] + self.v[(i, j + 1, k)]),
            0.5 * (self.w[(i, j, k)] + self.w[(i, j, k + 1)]),
        )
    }

    pub fn divergence_at_cell_center(&self, i: usize, j: usize, k: usize) -> f64 {
        let h = self.spec.spacing();
        (self.u[(i + 1, j, k)] - self.u[(i, j, k)]) / h.x
            + (self.v[(i, j + 1, k)] - self.v[(i, j, k)]) / h.y
            + (self.w[(i, j, k + 1)] - self.w[(i, j, k)]) / h.z
    }

    /// Curl from central differences of cell-center averaged values, clamped
    /// at the domain boundary.
    pub fn curl_at_cell_center(&self, i: usize, j: usize, k: usize) -> Vec3 {
        let res = self.resolution();
        let h = self.spec.spacing();

        let left = self.value_at_cell_center(i.saturating_sub(1), j, k);
        let right = self.value_at_cell_center((i + 1).min(res.x - 1), j, k);
        let down = self.value_at_cell_center(i, j.saturating_sub(1), k);
        let up = self.value_at_cell_center(i, (j + 1).min(res.y - 1), k);
        let back = self.value_at_cell_center(i, j, k.saturating_sub(1));
        let front = self.value_at_cell_center(i, j, (k + 1).min(res.z - 1));

        Vec3::new(
            0.5 * (up.z - down.z) / h.y - 0.5 * (front.y - back.y) / h.z,
            0.5 * (front.x - back.x) / h.z - 0.5 * (right.z - left.z) / h.x,
            0.5 * (right.y - left.y) / h.x - 0.5 * (up.x - down.x) / h.y,
        )
    }

    /// Largest absolute face value over all three components. Drives the CFL
    /// estimate.
    pub fn max_abs_component(&self) -> f64 {
        let fold = |data: &[f64]| data.iter().fold(0.0f64, |acc, v| acc.max(v.abs()));
        fold(self.u.data())
            .max(fold(self.v.data()))
            .max(fold(self.w.data()))
    }

    pub fn has_nan(&self) -> bool {
        self.u.data().iter().any(|v| !v.is_finite())
            || self.v.data().iter().any(|v| !v.is_finite())
            || self.w.data().iter().any(|v| !v.is_finite())
    }

    /// Three scalar blocks: U, V, W.
    pub fn serialize(&self, out: &mut Vec<u8>) {
        for (kind, data) in [
            (GRID_KIND_FACE_U, &self.u),
            (GRID_KIND_FACE_V, &self.v),
            (GRID_KIND_FACE_W, &self.w),
        ] {
            ser::write_u8(out, kind);
            ser::write_u32(out, self.spec.resolution().x as u32);
            ser::write_u32(out, self.spec.resolution().y as u32);
            ser::write_u32(out, self.spec.resolution().z as u32);
            ser::write_f64(out, self.spec.spacing().x);
            ser::write_f64(out, self.spec.spacing().y);
            ser::write_f64(out, self.spec.spacing().z);
            ser::write_f64(out, self.spec.origin().x);
            ser::write_f64(out, self.spec.origin().y);
            ser::write_f64(out, self.spec.origin().z);
            ser::write_f64_slice(out, data.data());
        }
    }

    pub fn deserialize(&mut self, input: &mut &[u8]) -> Result<()> {
        let mut spec = None;
        for expected_kind in [GRID_KIND_FACE_U, GRID_KIND_FACE_V, GRID_KIND_FACE_W] {
            let kind = ser::read_u8(input)?;
            if kind != expected_kind {
                return Err(SimulationError::Serialization(format!(
                    "face grid block kind mismatch: expected {}, found {}",
                    expected_kind, kind
                )));
            }
            let resolution = size3(
                ser::read_u32(input)? as usize,
                ser::read_u32(input)? as usize,
                ser::read_u32(input)? as usize,
            );
            let spacing = Vec3::new(ser::read_f64(input)?, ser::read_f64(input)?, ser::read_f64(input)?);
            let origin = cgmath::point3(ser::read_f64(input)?, ser::read_f64(input)?, ser::read_f64(input)?);
            let block_spec = GridSpec::new(resolution, spacing, origin)?;
            match &spec {
                None => {
                    self.resize(block_spec.clone());
                    spec = Some(block_spec);
                }
                Some(s) if *s != block_spec => {
                    return Err(SimulationError::Serialization(
                        "face grid blocks disagree on grid shape".to_string(),
                    ));
                }
                Some(_) => {}
            }

            let data = ser::read_f64_vec(input)?;
            let target = match expected_kind {
                GRID_KIND_FACE_U => &mut self.u,
                GRID_KIND_FACE_V => &mut self.v,
                _ => &mut self.w,
            };
            if data.len() != target.len() {
                return Err(SimulationError::Serialization(format!(
                    "face grid block data length {} does not match extents {:?}",
                    data.len(),
                    target.size()
                )));
            }
            target.data_mut().copy_from_slice(&data);
        }
        Ok(())
    }
}

fn u_position_of(spec: &GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    cgmath::point3(o.x + i as f64 * h.x, o.y + (j as f64 + 0.5) * h.y, o.z + (k as f64 + 0.5) * h.z)
}

fn v_position_of(spec: &GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    cgmath::point3(o.x + (i as f64 + 0.5) * h.x, o.y + j as f64 * h.y, o.z + (k as f64 + 0.5) * h.z)
}

fn w_position_of(spec: &GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    cgmath::point3(o.x + (i as f64 + 0.5) * h.x, o.y + (j as f64 + 0.5) * h.y, o.z + k as f64 * h.z)
}

fn sample_component(data: &Array3<f64>, data_origin: Point3, h: Vec3, p: Point3) -> f64 {
    let ds = data.size();
    let (i, fx) = get_barycentric((p.x - data_origin.x) / h.x, ds.x);
    let (j, fy) = get_barycentric((p.y - data_origin.y) / h.y, ds.y);
    let (k, fz) = get_barycentric((p.z - data_origin.z) / h.z, ds.z);
    let ip = (i + 1).min(ds.x - 1);
    let jp = (j + 1).min(ds.y - 1);
    let kp = (k + 1).min(ds.z - 1);
    trilerp(
        data[(i, j, k)],
        data[(ip, j, k)],
        data[(i, jp, k)],
        data[(ip, jp, k)],
        data[(i, j, kp)],
        data[(ip, j, kp)],
        data[(i, jp, kp)],
        data[(ip, jp, kp)],
        fx,
        fy,
        fz,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn grid(n: usize) -> FaceCenteredGrid {
        FaceCenteredGrid::new(GridSpec::with_uniform_spacing(size3(n, n, n), 1.0 / n as f64).unwrap())
    }

    #[test]
    fn data_extents_are_staggered() {
        let g = grid(4);
        assert_eq!(g.u().size(), size3(5, 4, 4));
        assert_eq!(g.v().size(), size3(4, 5, 4));
        assert_eq!(g.w().size(), size3(4, 4, 5));
    }

    #[test]
    fn uniform_field_samples_exactly() {
        let mut g = grid(8);
        g.fill(Vec3::new(1.0, -2.0, 0.5));
        let s = g.sample(cgmath::point3(0.3, 0.7, 0.2));
        assert_eq!(s, Vec3::new(1.0, -2.0, 0.5));
        assert_eq!(g.divergence_at_cell_center(3, 3, 3), 0.0);
    }

    #[test]
    fn divergence_of_linear_velocity() {
        let mut g = grid(8);
        // u = x, v = -y, w = 0 has zero divergence
        g.fill_with(|p| Vec3::new(p.x, -p.y, 0.0));
        assert_relative_eq!(g.divergence_at_cell_center(4, 4, 4), 0.0, epsilon = 1e-10);
        // u = x only diverges at rate 1
        g.fill_with(|p| Vec3::new(p.x, 0.0, 0.0));
        assert_relative_eq!(g.divergence_at_cell_center(2, 5, 6), 1.0, epsilon = 1e-10);
    }

    #[test]
    fn curl_of_rigid_rotation() {
        let mut g = grid(16);
        // v = omega x r with omega = (0, 0, 1): u = -y, v = x -> curl_z = 2
        g.fill_with(|p| Vec3::new(-(p.y - 0.5), p.x - 0.5, 0.0));
        let curl = g.curl_at_cell_center(8, 8, 8);
        assert_relative_eq!(curl.z, 2.0, epsilon = 1e-10);
        assert_relative_eq!(curl.x, 0.0, epsilon = 1e-10);
    }

    #[test]
    fn serialize_round_trip() {
        let mut g = grid(3);
        g.fill_with(|p| Vec3::new(p.x + p.y, p.y * p.z, p.z - p.x));
        let mut buf = Vec::new();
        g.serialize(&mut buf);

        let mut other = grid(5);
        let mut cursor = buf.as_slice();
        other.deserialize(&mut cursor).unwrap();
        assert_eq!(other.u(), g.u());
        assert_eq!(other.v(), g.v());
        assert_eq!(other.w(), g.w());
    }
}
