use crate::grid::{Array3, CellCenteredScalarGrid, FaceCenteredGrid, ScalarGrid};
use crate::math::{catmull_rom, get_barycentric, monotonic_catmull_rom, Point3, Vec3};
use cgmath::InnerSpace;

const BACK_TRACE_EPSILON: f64 = 1e-9;

/// Semi-Lagrangian advection: every output sample back-traces along the flow
/// with the mid-point rule and re-samples the input there. The cubic variant
/// swaps the tri-linear input sampler for Catmull-Rom, monotonicity-limited
/// at the domain edges.
#[derive(Clone, Copy, Default)]
pub struct SemiLagrangianSolver {
    use_cubic_sampler: bool,
}

impl SemiLagrangianSolver {
    pub fn new() -> Self {
        SemiLagrangianSolver {
            use_cubic_sampler: false,
        }
    }

    pub fn cubic() -> Self {
        SemiLagrangianSolver {
            use_cubic_sampler: true,
        }
    }

    /// Back-traces a sample position through the flow field. When a boundary
    /// SDF is present the trace is clipped at the solid interface so samples
    /// never come from inside the collider.
    fn back_trace<B>(
        &self,
        flow: &FaceCenteredGrid,
        dt: f64,
        min_h: f64,
        start: Point3,
        boundary_sdf: Option<&B>,
    ) -> Point3
    where
        B: Fn(Point3) -> f64,
    {
        let mut remaining = dt;
        let mut pt0 = start;
        let mut pt1 = start;

        while remaining > BACK_TRACE_EPSILON {
            let vel0 = flow.sample(pt0);
            let num_sub_steps = ((vel0.magnitude() * remaining / min_h).ceil()).max(1.0);
            let sub_dt = remaining / num_sub_steps;

            // mid-point rule
            let mid = pt0 - 0.5 * sub_dt * vel0;
            let mid_vel = flow.sample(mid);
            pt1 = pt0 - sub_dt * mid_vel;

            if let Some(sdf) = boundary_sdf {
                let phi0 = sdf(pt0);
                let phi1 = sdf(pt1);
                if phi0 * phi1 < 0.0 {
                    // clip at the interface
                    let w = phi1.abs() / (phi0.abs() + phi1.abs());
                    pt1 = cgmath::point3(
                        w * pt0.x + (1.0 - w) * pt1.x,
                        w * pt0.y + (1.0 - w) * pt1.y,
                        w * pt0.z + (1.0 - w) * pt1.z,
                    );
                    break;
                }
            }

            remaining -= sub_dt;
            pt0 = pt1;
        }

        pt1
    }

    pub fn advect_scalar(
        &self,
        input: &CellCenteredScalarGrid,
        flow: &FaceCenteredGrid,
        dt: f64,
        output: &mut CellCenteredScalarGrid,
        boundary_sdf: Option<&CellCenteredScalarGrid>,
    ) {
        output.resize(input.spec().clone());
        let h = input.spec().spacing();
        let min_h = h.x.min(h.y).min(h.z);
        let data_origin = input.data_origin();
        let boundary = boundary_sdf.map(|sdf| move |p: Point3| sdf.sample(p));

        let spec = input.spec().clone();
        output.par_fill_with(|i, j, k| {
            let pt = spec.cell_center_position(i, j, k);
            let src = self.back_trace(flow, dt, min_h, pt, boundary.as_ref());
            if self.use_cubic_sampler {
                sample_cubic(input.data(), data_origin, h, src)
            } else {
                input.sample(src)
            }
        });
    }

    pub fn advect_face_centered(
        &self,
        input: &FaceCenteredGrid,
        flow: &FaceCenteredGrid,
        dt: f64,
        output: &mut FaceCenteredGrid,
        boundary_sdf: Option<&CellCenteredScalarGrid>,
    ) {
        output.resize(input.spec().clone());
        let h = input.spec().spacing();
        let min_h = h.x.min(h.y).min(h.z);
        let boundary = boundary_sdf.map(|sdf| move |p: Point3| sdf.sample(p));

        let u_origin = input.u_position(0, 0, 0);
        let v_origin = input.v_position(0, 0, 0);
        let w_origin = input.w_position(0, 0, 0);

        let spec = input.spec().clone();
        let sample_component = |data: &Array3<f64>, origin: Point3, p: Point3| {
            if self.use_cubic_sampler {
                sample_cubic(data, origin, h, p)
            } else {
                sample_linear(data, origin, h, p)
            }
        };

        output.u_mut().par_fill_with(|i, j, k| {
            let pt = u_position(&spec, i, j, k);
            let src = self.back_trace(flow, dt, min_h, pt, boundary.as_ref());
            sample_component(input.u(), u_origin, src)
        });
        output.v_mut().par_fill_with(|i, j, k| {
            let pt = v_position(&spec, i, j, k);
            let src = self.back_trace(flow, dt, min_h, pt, boundary.as_ref());
            sample_component(input.v(), v_origin, src)
        });
        output.w_mut().par_fill_with(|i, j, k| {
            let pt = w_position(&spec, i, j, k);
            let src = self.back_trace(flow, dt, min_h, pt, boundary.as_ref());
            sample_component(input.w(), w_origin, src)
        });
    }
}

fn u_position(spec: &crate::grid::GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    cgmath::point3(o.x + i as f64 * h.x, o.y + (j as f64 + 0.5) * h.y, o.z + (k as f64 + 0.5) * h.z)
}

fn v_position(spec: &crate::grid::GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    cgmath::point3(o.x + (i as f64 + 0.5) * h.x, o.y + j as f64 * h.y, o.z + (k as f64 + 0.5) * h.z)
}

fn w_position(spec: &crate::grid::GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    cgmath::point3(o.x + (i as f64 + 0.5) * h.x, o.y + (j as f64 + 0.5) * h.y, o.z + k as f64 * h.z)
}

fn sample_linear(data: &Array3<f64>, origin: Point3, h: Vec3, p: Point3) -> f64 {
    let ds = data.size();
    let (i, fx) = get_barycentric((p.x - origin.x) / h.x, ds.x);
    let (j, fy) = get_barycentric((p.y - origin.y) / h.y, ds.y);
    let (k, fz) = get_barycentric((p.z - origin.z) / h.z, ds.z);
    let ip = (i + 1).min(ds.x - 1);
    let jp = (j + 1).min(ds.y - 1);
    let kp = (k + 1).min(ds.z - 1);
    crate::math::trilerp(
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

/// Tri-cubic Catmull-Rom; falls back to the monotonic variant whenever the
/// 4-sample stencil had to be clamped against the data bounds.
fn sample_cubic(data: &Array3<f64>, origin: Point3, h: Vec3, p: Point3) -> f64 {
    let ds = data.size();
    let (i, fx) = get_barycentric((p.x - origin.x) / h.x, ds.x);
    let (j, fy) = get_barycentric((p.y - origin.y) / h.y, ds.y);
    let (k, fz) = get_barycentric((p.z - origin.z) / h.z, ds.z);

    let stencil = |c: usize, extent: usize| -> ([usize; 4], bool) {
        let im = if c > 0 { c - 1 } else { 0 };
        let ip = (c + 1).min(extent - 1);
        let ipp = (c + 2).min(extent - 1);
        let clamped = c == 0 || c + 2 >= extent;
        ([im, c, ip, ipp], clamped)
    };
    let (xs, cx) = stencil(i, ds.x);
    let (ys, cy) = stencil(j, ds.y);
    let (zs, cz) = stencil(k, ds.z);
    let limited = cx || cy || cz;

    let interp = |v0: f64, v1: f64, v2: f64, v3: f64, t: f64| {
        if limited {
            monotonic_catmull_rom(v0, v1, v2, v3, t)
        } else {
            catmull_rom(v0, v1, v2, v3, t)
        }
    };

    let mut z_values = [0.0; 4];
    for (zi, z) in zs.iter().enumerate() {
        let mut y_values = [0.0; 4];
        for (yi, y) in ys.iter().enumerate() {
            y_values[yi] = interp(
                data[(xs[0], *y, *z)],
                data[(xs[1], *y, *z)],
                data[(xs[2], *y, *z)],
                data[(xs[3], *y, *z)],
                fx,
            );
        }
        z_values[zi] = interp(y_values[0], y_values[1], y_values[2], y_values[3], fy);
    }
    interp(z_values[0], z_values[1], z_values[2], z_values[3], fz)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridSpec;
    use crate::math::size3;
    use approx::assert_relative_eq;

    fn grids(n: usize) -> (CellCenteredScalarGrid, FaceCenteredGrid) {
        let spec = GridSpec::with_uniform_spacing(size3(n, n, n), 1.0 / n as f64).unwrap();
        (
            CellCenteredScalarGrid::new(spec.clone()),
            FaceCenteredGrid::new(spec),
        )
    }

    #[test]
    fn uniform_field_is_invariant_under_any_flow() {
        let (mut input, mut flow) = grids(16);
        input.fill(4.25);
        flow.fill_with(|p| Vec3::new(p.y, -p.x, 0.3));

        for solver in [SemiLagrangianSolver::new(), SemiLagrangianSolver::cubic()] {
            let mut output = input.clone();
            solver.advect_scalar(&input, &flow, 0.01, &mut output, None);
            for v in output.data().data() {
                assert_relative_eq!(*v, 4.25, max_relative = 1e-15);
            }
        }
    }

    #[test]
    fn constant_flow_translates_a_bump() {
        let n = 32;
        let (mut input, mut flow) = grids(n);
        let h = 1.0 / n as f64;
        // narrow bump centered at x = 0.5
        let spec = input.spec().clone();
        input.par_fill_with(|i, j, k| {
            let p = spec.cell_center_position(i, j, k);
            let _ = (j, k);
            (-((p.x - 0.5) * (p.x - 0.5)) / 0.005).exp()
        });
        flow.fill(Vec3::new(1.0, 0.0, 0.0));

        let solver = SemiLagrangianSolver::new();
        let mut output = input.clone();
        let steps = 8;
        let dt = 0.5 * h;
        let mut current = input.clone();
        for _ in 0..steps {
            solver.advect_scalar(&current, &flow, dt, &mut output, None);
            std::mem::swap(&mut current, &mut output);
        }
        // bump should now be near x = 0.5 + steps*dt
        let expected_center = 0.5 + steps as f64 * dt;
        let mut best = (0.0, 0.0);
        for i in 0..n {
            let x = (i as f64 + 0.5) * h;
            let v = current.data()[(i, n / 2, n / 2)];
            if v > best.1 {
                best = (x, v);
            }
        }
        assert!(
            (best.0 - expected_center).abs() <= h + 1e-12,
            "peak at {} expected {}",
            best.0,
            expected_center
        );
    }

    #[test]
    fn no_nans_for_finite_flows() {
        let (mut input, mut flow) = grids(8);
        input.par_fill_with(|i, _, _| i as f64);
        flow.fill(Vec3::new(100.0, -50.0, 25.0));
        let mut output = input.clone();
        SemiLagrangianSolver::cubic().advect_scalar(&input, &flow, 0.1, &mut output, None);
        assert!(!output.has_nan());
    }

    #[test]
    fn boundary_sdf_keeps_samples_out_of_the_solid() {
        let n = 16;
        let (mut input, mut flow) = grids(n);
        let spec = input.spec().clone();
        // left half is solid, scalar value 1 inside solid region, 0 outside
        let mut boundary = CellCenteredScalarGrid::new(spec.clone());
        boundary.par_fill_with(|i, j, k| {
            let p = spec.cell_center_position(i, j, k);
            let _ = (j, k);
            0.5 - p.x // negative for x > 0.5
        });
        // note: boundary SDF is negative inside the solid (x > 0.5 here)
        input.par_fill_with(|i, _, _| if (i as f64 + 0.5) / n as f64 > 0.5 { 7.0 } else { 0.0 });
        flow.fill(Vec3::new(-1.0, 0.0, 0.0)); // flow pulls samples from the right (solid) side

        let mut output = input.clone();
        SemiLagrangianSolver::new().advect_scalar(&input, &flow, 0.2, &mut output, Some(&boundary));
        // a cell left of the interface would sample the value 7 from deep
        // inside the solid without clipping; the clipped trace stops at the
        // interface where the interpolated value is about 3.5
        let probe = output.data()[(6, 8, 8)];
        assert!(probe < 6.0, "sampled {} from inside the solid", probe);
    }
}
