use super::extrapolation::extrapolate_to_region;
use crate::grid::{Array3, CellCenteredScalarGrid, FaceCenteredGrid, GridSpec, ScalarGrid};
use crate::levelset::is_inside_sdf;
use crate::math::{lerp, Direction, DirectionFlags, Point3, Vec3};
use crate::scene::{ColliderHandle, RigidBodyCollider};
use cgmath::InnerSpace;

/// Large positive stand-in when no collider is present.
const NO_COLLIDER_SDF: f64 = 1e9;

/// Converts the scene colliders into grid-aligned data once per sub-step and
/// constrains face velocities against them. Pairs with the fractional
/// pressure solver, which derives its sub-cell face weights from the same
/// collider SDF.
pub struct FractionalBoundaryConditionSolver {
    colliders: Vec<RigidBodyCollider>,
    collider_sdf: Option<CellCenteredScalarGrid>,
    closed_domain_boundary_flags: DirectionFlags,
}

impl FractionalBoundaryConditionSolver {
    pub fn new() -> Self {
        FractionalBoundaryConditionSolver {
            colliders: Vec::new(),
            collider_sdf: None,
            closed_domain_boundary_flags: DirectionFlags::all(),
        }
    }

    pub fn set_closed_domain_boundary_flags(&mut self, flags: DirectionFlags) {
        self.closed_domain_boundary_flags = flags;
    }

    pub fn closed_domain_boundary_flags(&self) -> DirectionFlags {
        self.closed_domain_boundary_flags
    }

    /// Snapshots collider state and samples the collider SDF onto a
    /// cell-centered grid.
    pub fn update_collider(&mut self, handles: &[ColliderHandle], spec: &GridSpec) {
        self.colliders = handles
            .iter()
            .map(|h| h.read().expect("collider lock poisoned").clone())
            .collect();

        let mut sdf = CellCenteredScalarGrid::new(spec.clone());
        if self.colliders.is_empty() {
            sdf.fill(NO_COLLIDER_SDF);
        } else {
            let colliders = &self.colliders;
            let spec = spec.clone();
            sdf.par_fill_with(|i, j, k| {
                let p = spec.cell_center_position(i, j, k);
                colliders
                    .iter()
                    .map(|c| c.signed_distance(p))
                    .fold(f64::MAX, f64::min)
            });
        }
        self.collider_sdf = Some(sdf);
    }

    pub fn collider_sdf(&self) -> Option<&CellCenteredScalarGrid> {
        self.collider_sdf.as_ref()
    }

    pub fn sample_collider_sdf(&self, p: Point3) -> f64 {
        self.collider_sdf
            .as_ref()
            .map(|sdf| sdf.sample(p))
            .unwrap_or(NO_COLLIDER_SDF)
    }

    /// Rigid velocity of the closest collider at a world point.
    pub fn collider_velocity(&self, p: Point3) -> Vec3 {
        let mut best = None;
        for collider in &self.colliders {
            let d = collider.signed_distance(p);
            if best.map(|(bd, _)| d < bd).unwrap_or(true) {
                best = Some((d, collider));
            }
        }
        best.map(|(_, c)| c.velocity_at(p))
            .unwrap_or(Vec3::new(0.0, 0.0, 0.0))
    }

    fn friction_at(&self, p: Point3) -> f64 {
        let mut best: Option<(f64, f64)> = None;
        for collider in &self.colliders {
            let d = collider.signed_distance(p);
            if best.map(|(bd, _)| d < bd).unwrap_or(true) {
                best = Some((d, collider.friction_coefficient));
            }
        }
        best.map(|(_, f)| f).unwrap_or(0.0)
    }

    /// Enforces no-penetration on collider faces, blends the tangential
    /// component toward the collider by its friction coefficient, and
    /// extrapolates fluid velocity `depth` cells into the solid.
    pub fn constrain_velocity(&self, velocity: &mut FaceCenteredGrid, depth: usize) {
        let spec = velocity.spec().clone();
        let Some(collider_sdf) = self.collider_sdf.as_ref() else {
            self.enforce_closed_domain(velocity);
            return;
        };

        // seed face values inside the collider with the collider's own
        // velocity, then extrapolate fluid values inward for a smooth band
        let mut u_valid = Array3::new(velocity.u().size(), true);
        let mut v_valid = Array3::new(velocity.v().size(), true);
        let mut w_valid = Array3::new(velocity.w().size(), true);

        {
            let solver = &*self;
            let assign = |data: &mut Array3<f64>,
                          valid: &mut Array3<bool>,
                          pos: &dyn Fn(usize, usize, usize) -> Point3,
                          component: usize| {
                let size = data.size();
                crate::parallel::for_each_index3(size, |i, j, k| {
                    let pt = pos(i, j, k);
                    if is_inside_sdf(collider_sdf.sample(pt)) {
                        let cv = solver.collider_velocity(pt);
                        data[(i, j, k)] = match component {
                            0 => cv.x,
                            1 => cv.y,
                            _ => cv.z,
                        };
                        valid[(i, j, k)] = false;
                    }
                });
            };

            let spec_u = spec.clone();
            assign(
                velocity.u_mut(),
                &mut u_valid,
                &move |i, j, k| face_u_position(&spec_u, i, j, k),
                0,
            );
            let spec_v = spec.clone();
            assign(
                velocity.v_mut(),
                &mut v_valid,
                &move |i, j, k| face_v_position(&spec_v, i, j, k),
                1,
            );
            let spec_w = spec.clone();
            assign(
                velocity.w_mut(),
                &mut w_valid,
                &move |i, j, k| face_w_position(&spec_w, i, j, k),
                2,
            );
        }

        extrapolate_to_region(velocity.u_mut(), &u_valid, depth);
        extrapolate_to_region(velocity.v_mut(), &v_valid, depth);
        extrapolate_to_region(velocity.w_mut(), &w_valid, depth);

        // project out the relative normal component on faces inside the
        // collider and apply the friction blend tangentially
        let constrained = |pt: Point3, velocity: &FaceCenteredGrid| -> Vec3 {
            let vel = velocity.sample(pt);
            let collider_vel = self.collider_velocity(pt);
            let g = collider_sdf.gradient(pt);
            if g.magnitude2() > 0.0 {
                let n = g.normalize();
                let vel_r = vel - collider_vel;
                let mut vel_t = vel_r - n * vel_r.dot(n);
                let friction = self.friction_at(pt);
                vel_t = Vec3::new(
                    lerp(vel_t.x, 0.0, friction),
                    lerp(vel_t.y, 0.0, friction),
                    lerp(vel_t.z, 0.0, friction),
                );
                vel_t + collider_vel
            } else {
                collider_vel
            }
        };

        let u_new = {
            let mut out = velocity.u().clone();
            let velocity = &*velocity;
            out.par_fill_with(|i, j, k| {
                let pt = face_u_position(&spec, i, j, k);
                if is_inside_sdf(collider_sdf.sample(pt)) {
                    constrained(pt, velocity).x
                } else {
                    velocity.u()[(i, j, k)]
                }
            });
            out
        };
        let v_new = {
            let mut out = velocity.v().clone();
            let velocity = &*velocity;
            out.par_fill_with(|i, j, k| {
                let pt = face_v_position(&spec, i, j, k);
                if is_inside_sdf(collider_sdf.sample(pt)) {
                    constrained(pt, velocity).y
                } else {
                    velocity.v()[(i, j, k)]
                }
            });
            out
        };
        let w_new = {
            let mut out = velocity.w().clone();
            let velocity = &*velocity;
            out.par_fill_with(|i, j, k| {
                let pt = face_w_position(&spec, i, j, k);
                if is_inside_sdf(collider_sdf.sample(pt)) {
                    constrained(pt, velocity).z
                } else {
                    velocity.w()[(i, j, k)]
                }
            });
            out
        };
        *velocity.u_mut() = u_new;
        *velocity.v_mut() = v_new;
        *velocity.w_mut() = w_new;

        self.enforce_closed_domain(velocity);
    }

    /// Zeroes the normal velocity on domain faces flagged as closed walls.
    fn enforce_closed_domain(&self, velocity: &mut FaceCenteredGrid) {
        let res = velocity.resolution();
        let flags = self.closed_domain_boundary_flags;

        if flags.contains(Direction::Left) {
            for k in 0..res.z {
                for j in 0..res.y {
                    velocity.u_mut()[(0, j, k)] = 0.0;
                }
            }
        }
        if flags.contains(Direction::Right) {
            for k in 0..res.z {
                for j in 0..res.y {
                    velocity.u_mut()[(res.x, j, k)] = 0.0;
                }
            }
        }
        if flags.contains(Direction::Down) {
            for k in 0..res.z {
                for i in 0..res.x {
                    velocity.v_mut()[(i, 0, k)] = 0.0;
                }
            }
        }
        if flags.contains(Direction::Up) {
            for k in 0..res.z {
                for i in 0..res.x {
                    velocity.v_mut()[(i, res.y, k)] = 0.0;
                }
            }
        }
        if flags.contains(Direction::Back) {
            for j in 0..res.y {
                for i in 0..res.x {
                    velocity.w_mut()[(i, j, 0)] = 0.0;
                }
            }
        }
        if flags.contains(Direction::Front) {
            for j in 0..res.y {
                for i in 0..res.x {
                    velocity.w_mut()[(i, j, res.z)] = 0.0;
                }
            }
        }
    }

    pub fn colliders(&self) -> &[RigidBodyCollider] {
        &self.colliders
    }
}

impl Default for FractionalBoundaryConditionSolver {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn face_u_position(spec: &GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    cgmath::point3(o.x + i as f64 * h.x, o.y + (j as f64 + 0.5) * h.y, o.z + (k as f64 + 0.5) * h.z)
}

pub(crate) fn face_v_position(spec: &GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    cgmath::point3(o.x + (i as f64 + 0.5) * h.x, o.y + j as f64 * h.y, o.z + (k as f64 + 0.5) * h.z)
}

pub(crate) fn face_w_position(spec: &GridSpec, i: usize, j: usize, k: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    cgmath::point3(o.x + (i as f64 + 0.5) * h.x, o.y + (j as f64 + 0.5) * h.y, o.z + k as f64 * h.z)
}

/// Full-cell variant: every cell whose center lies in the collider is
/// treated as solid; faces adjacent to solid cells take the collider
/// velocity outright. Cheaper and blockier than the fractional solver.
pub struct BlockedBoundaryConditionSolver {
    inner: FractionalBoundaryConditionSolver,
    markers: Option<Array3<bool>>, // true = fluid
}

impl BlockedBoundaryConditionSolver {
    pub fn new() -> Self {
        BlockedBoundaryConditionSolver {
            inner: FractionalBoundaryConditionSolver::new(),
            markers: None,
        }
    }

    pub fn update_collider(&mut self, handles: &[ColliderHandle], spec: &GridSpec) {
        self.inner.update_collider(handles, spec);
        let sdf = self.inner.collider_sdf().expect("sdf was just built");
        let mut markers = Array3::new(spec.resolution(), true);
        let data = sdf.data();
        crate::parallel::for_each_index3(spec.resolution(), |i, j, k| {
            markers[(i, j, k)] = !is_inside_sdf(data[(i, j, k)]);
        });
        self.markers = Some(markers);
    }

    pub fn markers(&self) -> Option<&Array3<bool>> {
        self.markers.as_ref()
    }

    pub fn collider_velocity(&self, p: Point3) -> Vec3 {
        self.inner.collider_velocity(p)
    }

    pub fn constrain_velocity(&self, velocity: &mut FaceCenteredGrid, depth: usize) {
        let Some(markers) = self.markers.as_ref() else {
            return;
        };
        let spec = velocity.spec().clone();
        let res = spec.resolution();

        let mut u_valid = Array3::new(velocity.u().size(), true);
        let mut v_valid = Array3::new(velocity.v().size(), true);
        let mut w_valid = Array3::new(velocity.w().size(), true);

        // a face is solid when either adjacent cell is solid
        crate::parallel::for_each_index3(velocity.u().size(), |i, j, k| {
            let left_solid = i > 0 && !markers[(i - 1, j, k)];
            let right_solid = i < res.x && !markers[(i, j, k)];
            if left_solid || right_solid {
                let pt = face_u_position(&spec, i, j, k);
                velocity.u_mut()[(i, j, k)] = self.inner.collider_velocity(pt).x;
                u_valid[(i, j, k)] = false;
            }
        });
        crate::parallel::for_each_index3(velocity.v().size(), |i, j, k| {
            let down_solid = j > 0 && !markers[(i, j - 1, k)];
            let up_solid = j < res.y && !markers[(i, j, k)];
            if down_solid || up_solid {
                let pt = face_v_position(&spec, i, j, k);
                velocity.v_mut()[(i, j, k)] = self.inner.collider_velocity(pt).y;
                v_valid[(i, j, k)] = false;
            }
        });
        crate::parallel::for_each_index3(velocity.w().size(), |i, j, k| {
            let back_solid = k > 0 && !markers[(i, j, k - 1)];
            let front_solid = k < res.z && !markers[(i, j, k)];
            if back_solid || front_solid {
                let pt = face_w_position(&spec, i, j, k);
                velocity.w_mut()[(i, j, k)] = self.inner.collider_velocity(pt).z;
                w_valid[(i, j, k)] = false;
            }
        });

        extrapolate_to_region(velocity.u_mut(), &u_valid, depth);
        extrapolate_to_region(velocity.v_mut(), &v_valid, depth);
        extrapolate_to_region(velocity.w_mut(), &w_valid, depth);

        self.inner.enforce_closed_domain(velocity);
    }
}

impl Default for BlockedBoundaryConditionSolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::size3;
    use crate::scene::{RigidBodyCollider, Sphere};
    use std::sync::Arc;

    fn spec(n: usize) -> GridSpec {
        GridSpec::with_uniform_spacing(size3(n, n, n), 1.0 / n as f64).unwrap()
    }

    #[test]
    fn closed_domain_zeroes_perimeter_normal_velocity() {
        let spec = spec(8);
        let mut velocity = FaceCenteredGrid::new(spec.clone());
        velocity.fill(Vec3::new(1.0, 1.0, 1.0));

        let mut solver = FractionalBoundaryConditionSolver::new();
        solver.update_collider(&[], &spec);
        solver.constrain_velocity(&mut velocity, 3);

        assert_eq!(velocity.u()[(0, 3, 3)], 0.0);
        assert_eq!(velocity.u()[(8, 3, 3)], 0.0);
        assert_eq!(velocity.v()[(3, 0, 3)], 0.0);
        assert_eq!(velocity.w()[(3, 3, 8)], 0.0);
        // interior untouched
        assert_eq!(velocity.u()[(4, 3, 3)], 1.0);
    }

    #[test]
    fn no_penetration_on_a_static_sphere() {
        let n = 16;
        let spec = spec(n);
        let collider =
            RigidBodyCollider::new(Arc::new(Sphere::new(cgmath::point3(0.5, 0.5, 0.5), 0.2)))
                .into_handle();

        let mut velocity = FaceCenteredGrid::new(spec.clone());
        velocity.fill(Vec3::new(0.0, -1.0, 0.0)); // uniform downward flow

        let mut solver = FractionalBoundaryConditionSolver::new();
        solver.set_closed_domain_boundary_flags(DirectionFlags::empty());
        solver.update_collider(&[collider], &spec);
        solver.constrain_velocity(&mut velocity, 4);

        // the face closest to the sphere center: normal is vertical there,
        // so the relative normal velocity must be gone
        let v_center = velocity.sample_v(cgmath::point3(0.5, 0.3 + 0.5 / n as f64, 0.5));
        assert!(
            v_center.abs() < 0.5,
            "normal velocity {} not damped near the collider surface",
            v_center
        );
    }

    #[test]
    fn blocked_solver_marks_solid_cells() {
        let n = 8;
        let spec = spec(n);
        let collider =
            RigidBodyCollider::new(Arc::new(Sphere::new(cgmath::point3(0.5, 0.5, 0.5), 0.3)))
                .into_handle();
        let mut solver = BlockedBoundaryConditionSolver::new();
        solver.update_collider(&[collider], &spec);
        let markers = solver.markers().unwrap();
        assert!(!markers[(4, 4, 4)]); // center is solid
        assert!(markers[(0, 0, 0)]); // corner is fluid
    }
}
