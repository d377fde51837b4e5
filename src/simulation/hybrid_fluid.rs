use super::boundary::FractionalBoundaryConditionSolver;
use super::extrapolation::extrapolate_to_region;
use super::fractional_pressure::FractionalSinglePhasePressureSolver;
use super::points_to_implicit::SphericalPointsToImplicit;
use crate::error::{Result, SimulationError};
use crate::grid::{Array3, CellCenteredScalarGrid, FaceCenteredGrid, GridSpec, ScalarGrid};
use crate::math::{get_barycentric, lerp, Point3, Size3, Vec3};
use crate::particles::{ChannelId, ParticleSystemData};
use crate::scene::{ColliderHandle, ParticleEmitter, RigidBodyCollider};
use crate::timer::Frame;
use log::trace;

/// Particle <-> grid velocity transfer family.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TransferScheme {
    /// Plain averaging both ways; stable and dissipative.
    Pic,
    /// Particles keep their velocity and receive the grid delta;
    /// `pic_blending` in [0, 1] mixes plain PIC back in for stability.
    Flip { pic_blending: f64 },
    /// Affine per-particle matrices capture the local velocity gradient, no
    /// blending needed.
    Apic,
}

/// Hybrid particle/grid liquid solver: particles carry the velocity field
/// between frames, the grid enforces incompressibility, a particle-built
/// level set marks the liquid for the fractional pressure solve.
pub struct HybridFluidSolver {
    spec: GridSpec,
    scheme: TransferScheme,

    velocity: FaceCenteredGrid,
    velocity_before_projection: FaceCenteredGrid,
    u_markers: Array3<bool>,
    v_markers: Array3<bool>,
    w_markers: Array3<bool>,

    particles: ParticleSystemData,
    apic_c: Option<(ChannelId, ChannelId, ChannelId)>,

    fluid_sdf: CellCenteredScalarGrid,

    pub gravity: Vec3,
    pub cfl_factor: f64,
    pub extrapolation_depth: usize,

    boundary_solver: FractionalBoundaryConditionSolver,
    pressure_solver: FractionalSinglePhasePressureSolver,

    colliders: Vec<ColliderHandle>,
    emitters: Vec<Box<dyn ParticleEmitter>>,

    current_time: f64,
}

impl HybridFluidSolver {
    pub fn new(spec: GridSpec, scheme: TransferScheme) -> Self {
        let mut particles = ParticleSystemData::new();
        let apic_c = match scheme {
            TransferScheme::Apic => Some((
                particles.add_vector_channel("c_x", Vec3::new(0.0, 0.0, 0.0)),
                particles.add_vector_channel("c_y", Vec3::new(0.0, 0.0, 0.0)),
                particles.add_vector_channel("c_z", Vec3::new(0.0, 0.0, 0.0)),
            )),
            _ => None,
        };

        HybridFluidSolver {
            velocity: FaceCenteredGrid::new(spec.clone()),
            velocity_before_projection: FaceCenteredGrid::new(spec.clone()),
            u_markers: Array3::default(),
            v_markers: Array3::default(),
            w_markers: Array3::default(),
            fluid_sdf: CellCenteredScalarGrid::new(spec.clone()),
            spec,
            scheme,
            particles,
            apic_c,
            gravity: Vec3::new(0.0, -9.8, 0.0),
            cfl_factor: 1.0,
            extrapolation_depth: 5,
            boundary_solver: FractionalBoundaryConditionSolver::new(),
            pressure_solver: FractionalSinglePhasePressureSolver::new(),
            colliders: Vec::new(),
            emitters: Vec::new(),
            current_time: 0.0,
        }
    }

    pub fn particles(&self) -> &ParticleSystemData {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut ParticleSystemData {
        &mut self.particles
    }

    pub fn velocity(&self) -> &FaceCenteredGrid {
        &self.velocity
    }

    pub fn fluid_sdf(&self) -> &CellCenteredScalarGrid {
        &self.fluid_sdf
    }

    pub fn scheme(&self) -> TransferScheme {
        self.scheme
    }

    pub fn boundary_solver_mut(&mut self) -> &mut FractionalBoundaryConditionSolver {
        &mut self.boundary_solver
    }

    pub fn add_collider(&mut self, collider: ColliderHandle) {
        self.colliders.push(collider);
    }

    pub fn add_emitter(&mut self, emitter: Box<dyn ParticleEmitter>) {
        self.emitters.push(emitter);
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn cfl_time_step(&self) -> f64 {
        let h = self.spec.spacing();
        let min_h = h.x.min(h.y).min(h.z);
        let max_vel = self.velocity.max_abs_component().max(
            self.particles
                .velocities()
                .iter()
                .fold(0.0f64, |acc, v| acc.max(v.x.abs()).max(v.y.abs()).max(v.z.abs())),
        );
        self.cfl_factor * min_h / (max_vel + 1e-8)
    }

    /// Advances the simulation to the end of `frame`.
    pub fn update(&mut self, frame: Frame) -> Result<()> {
        let target_time = frame.end_time();
        while self.current_time < target_time - 1e-12 {
            let remaining = target_time - self.current_time;
            let dt = remaining.min(self.cfl_time_step());
            self.advance_sub_step(dt)?;
            self.current_time += dt;
        }
        trace!(
            "hybrid frame {}: {} particles",
            frame.index,
            self.particles.number_of_particles()
        );
        Ok(())
    }

    fn advance_sub_step(&mut self, dt: f64) -> Result<()> {
        for emitter in self.emitters.iter_mut() {
            emitter.update(&mut self.particles, self.current_time, dt);
        }
        self.boundary_solver.update_collider(&self.colliders, &self.spec);

        self.transfer_particles_to_grids();
        self.build_fluid_sdf();
        self.extrapolate_velocity_to_air();
        self.boundary_solver
            .constrain_velocity(&mut self.velocity, self.extrapolation_depth);

        // gravity on the grid
        for v in self.velocity.v_mut().data_mut().iter_mut() {
            *v += dt * self.gravity.y;
        }
        if self.gravity.x != 0.0 {
            for v in self.velocity.u_mut().data_mut().iter_mut() {
                *v += dt * self.gravity.x;
            }
        }
        if self.gravity.z != 0.0 {
            for v in self.velocity.w_mut().data_mut().iter_mut() {
                *v += dt * self.gravity.z;
            }
        }
        self.boundary_solver
            .constrain_velocity(&mut self.velocity, self.extrapolation_depth);

        if matches!(self.scheme, TransferScheme::Flip { .. }) {
            self.velocity_before_projection = self.velocity.clone();
        }

        self.compute_pressure();
        self.extrapolate_velocity_to_air();
        self.boundary_solver
            .constrain_velocity(&mut self.velocity, self.extrapolation_depth);

        self.transfer_grids_to_particles();
        self.move_particles(dt);

        if self.velocity.has_nan() {
            return Err(SimulationError::InvariantViolation {
                stage: "hybrid sub-step",
                what: "NaN in grid velocity".to_string(),
            });
        }
        Ok(())
    }

    /// Scatter particle velocities to the faces with tri-linear weights;
    /// APIC adds the affine contribution `C_p . (x_face - x_p)`.
    fn transfer_particles_to_grids(&mut self) {
        let spec = self.spec.clone();
        let positions = self.particles.positions();
        let velocities = self.particles.velocities();
        let apic = self.apic_c.map(|(cx, cy, cz)| {
            (
                self.particles.vector_channel(cx),
                self.particles.vector_channel(cy),
                self.particles.vector_channel(cz),
            )
        });

        let splat = |origin: Point3,
                     size: Size3,
                     component: usize,
                     affine: Option<&[Vec3]>|
         -> (Array3<f64>, Array3<bool>) {
            let h = spec.spacing();
            let mut data = Array3::new(size, 0.0);
            let mut weights = Array3::new(size, 0.0);

            for (p, pos) in positions.iter().enumerate() {
                let (i, fx) = get_barycentric((pos.x - origin.x) / h.x, size.x);
                let (j, fy) = get_barycentric((pos.y - origin.y) / h.y, size.y);
                let (k, fz) = get_barycentric((pos.z - origin.z) / h.z, size.z);
                let ip = (i + 1).min(size.x - 1);
                let jp = (j + 1).min(size.y - 1);
                let kp = (k + 1).min(size.z - 1);

                let base_value = match component {
                    0 => velocities[p].x,
                    1 => velocities[p].y,
                    _ => velocities[p].z,
                };

                let corners = [
                    ((i, j, k), (1.0 - fx) * (1.0 - fy) * (1.0 - fz)),
                    ((ip, j, k), fx * (1.0 - fy) * (1.0 - fz)),
                    ((i, jp, k), (1.0 - fx) * fy * (1.0 - fz)),
                    ((ip, jp, k), fx * fy * (1.0 - fz)),
                    ((i, j, kp), (1.0 - fx) * (1.0 - fy) * fz),
                    ((ip, j, kp), fx * (1.0 - fy) * fz),
                    ((i, jp, kp), (1.0 - fx) * fy * fz),
                    ((ip, jp, kp), fx * fy * fz),
                ];
                for ((ci, cj, ck), w) in corners {
                    let mut value = base_value;
                    if let Some(c) = affine {
                        use cgmath::InnerSpace;
                        let face_pos = cgmath::point3(
                            origin.x + ci as f64 * h.x,
                            origin.y + cj as f64 * h.y,
                            origin.z + ck as f64 * h.z,
                        );
                        value += c[p].dot(face_pos - *pos);
                    }
                    data[(ci, cj, ck)] += w * value;
                    weights[(ci, cj, ck)] += w;
                }
            }

            let mut markers = Array3::new(size, false);
            for idx in 0..data.len() {
                if weights.data()[idx] > 0.0 {
                    data.data_mut()[idx] /= weights.data()[idx];
                    markers.data_mut()[idx] = true;
                } else {
                    data.data_mut()[idx] = 0.0;
                }
            }
            (data, markers)
        };

        let (u, u_markers) = splat(
            face_origin(&spec, 0),
            self.velocity.u().size(),
            0,
            apic.map(|a| a.0),
        );
        let (v, v_markers) = splat(
            face_origin(&spec, 1),
            self.velocity.v().size(),
            1,
            apic.map(|a| a.1),
        );
        let (w, w_markers) = splat(
            face_origin(&spec, 2),
            self.velocity.w().size(),
            2,
            apic.map(|a| a.2),
        );

        *self.velocity.u_mut() = u;
        *self.velocity.v_mut() = v;
        *self.velocity.w_mut() = w;
        self.u_markers = u_markers;
        self.v_markers = v_markers;
        self.w_markers = w_markers;
    }

    /// Union-of-spheres level set from the particles, reinitialized to true
    /// distances inside a narrow band.
    fn build_fluid_sdf(&mut self) {
        let h = self.spec.spacing();
        let max_h = h.x.max(h.y).max(h.z);
        let radius = 1.2 * max_h / std::f64::consts::SQRT_2;

        self.particles.build_neighbor_searcher(2.0 * radius);
        let converter = SphericalPointsToImplicit::new(radius);
        let searcher = self
            .particles
            .neighbor_searcher()
            .expect("searcher was just built");
        converter.convert(searcher, &mut self.fluid_sdf);
    }

    /// Push the particle-carried velocities out from the splatted faces so
    /// samples near the surface see valid data.
    fn extrapolate_velocity_to_air(&mut self) {
        let depth = (self.cfl_factor.ceil() as usize + 2).max(self.extrapolation_depth);
        extrapolate_to_region(self.velocity.u_mut(), &self.u_markers, depth);
        extrapolate_to_region(self.velocity.v_mut(), &self.v_markers, depth);
        extrapolate_to_region(self.velocity.w_mut(), &self.w_markers, depth);
    }

    fn compute_pressure(&mut self) {
        let input = self.velocity.clone();
        let boundary_solver = &self.boundary_solver;
        let boundary_sdf = move |p: Point3| boundary_solver.sample_collider_sdf(p);
        let boundary_vel = move |p: Point3| boundary_solver.collider_velocity(p);
        let fluid_sdf = &self.fluid_sdf;
        let fluid = move |p: Point3| fluid_sdf.sample(p);

        self.pressure_solver.solve(
            &input,
            &mut self.velocity,
            &boundary_sdf,
            &boundary_vel,
            Some(&fluid),
        );
    }

    fn transfer_grids_to_particles(&mut self) {
        let n = self.particles.number_of_particles();
        if n == 0 {
            return;
        }
        let positions = self.particles.positions().to_vec();

        match self.scheme {
            TransferScheme::Pic => {
                let velocity = &self.velocity;
                let new_velocities: Vec<Vec3> =
                    positions.iter().map(|p| velocity.sample(*p)).collect();
                self.particles
                    .velocities_mut()
                    .copy_from_slice(&new_velocities);
            }
            TransferScheme::Flip { pic_blending } => {
                let velocity = &self.velocity;
                let before = &self.velocity_before_projection;
                let old_velocities = self.particles.velocities().to_vec();
                let new_velocities: Vec<Vec3> = positions
                    .iter()
                    .zip(&old_velocities)
                    .map(|(p, old)| {
                        let pic = velocity.sample(*p);
                        let delta = pic - before.sample(*p);
                        let flip = *old + delta;
                        Vec3::new(
                            lerp(flip.x, pic.x, pic_blending),
                            lerp(flip.y, pic.y, pic_blending),
                            lerp(flip.z, pic.z, pic_blending),
                        )
                    })
                    .collect();
                self.particles
                    .velocities_mut()
                    .copy_from_slice(&new_velocities);
            }
            TransferScheme::Apic => {
                let spec = self.spec.clone();
                let (cx_id, cy_id, cz_id) = self.apic_c.expect("apic scheme keeps c channels");

                let velocity = &self.velocity;
                let new_velocities: Vec<Vec3> =
                    positions.iter().map(|p| velocity.sample(*p)).collect();
                let new_cx: Vec<Vec3> = positions
                    .iter()
                    .map(|p| gradient_weighted_sum(velocity.u(), face_origin(&spec, 0), &spec, *p))
                    .collect();
                let new_cy: Vec<Vec3> = positions
                    .iter()
                    .map(|p| gradient_weighted_sum(velocity.v(), face_origin(&spec, 1), &spec, *p))
                    .collect();
                let new_cz: Vec<Vec3> = positions
                    .iter()
                    .map(|p| gradient_weighted_sum(velocity.w(), face_origin(&spec, 2), &spec, *p))
                    .collect();

                self.particles
                    .velocities_mut()
                    .copy_from_slice(&new_velocities);
                self.particles.vector_channel_mut(cx_id).copy_from_slice(&new_cx);
                self.particles.vector_channel_mut(cy_id).copy_from_slice(&new_cy);
                self.particles.vector_channel_mut(cz_id).copy_from_slice(&new_cz);
            }
        }
    }

    /// Mid-point integration against the grid with CFL-bounded inner steps,
    /// collider collision resolve, domain clamping, and out-of-domain
    /// removal on open faces.
    fn move_particles(&mut self, dt: f64) {
        use crate::math::Direction;
        let bounds = self.spec.bounding_box();
        let num_sub_steps = (self.cfl_factor.max(1.0)) as usize;
        let sub_dt = dt / num_sub_steps as f64;

        let collider_snapshots: Vec<RigidBodyCollider> = self.boundary_solver.colliders().to_vec();
        let closed = self.boundary_solver.closed_domain_boundary_flags();

        let velocity = self.velocity.clone();
        let n = self.particles.number_of_particles();
        let mut new_positions = Vec::with_capacity(n);
        let mut new_velocities = Vec::with_capacity(n);
        let mut out_of_domain = vec![false; n];

        for idx in 0..n {
            let mut pt = self.particles.positions()[idx];
            let mut vel = self.particles.velocities()[idx];

            for _ in 0..num_sub_steps {
                let vel0 = velocity.sample(pt);
                let mid = pt + 0.5 * sub_dt * vel0;
                let mid_vel = velocity.sample(mid);
                pt += sub_dt * mid_vel;
            }

            // closed walls clamp, open walls let particles leave
            let mut clamp_axis = |value: &mut f64,
                                  vel_axis: &mut f64,
                                  lo: f64,
                                  hi: f64,
                                  lo_closed: bool,
                                  hi_closed: bool,
                                  out: &mut bool| {
                if *value <= lo {
                    if lo_closed {
                        *value = lo;
                        *vel_axis = 0.0;
                    } else {
                        *out = true;
                    }
                }
                if *value >= hi {
                    if hi_closed {
                        *value = hi;
                        *vel_axis = 0.0;
                    } else {
                        *out = true;
                    }
                }
            };
            clamp_axis(
                &mut pt.x,
                &mut vel.x,
                bounds.lower_corner.x,
                bounds.upper_corner.x,
                closed.contains(Direction::Left),
                closed.contains(Direction::Right),
                &mut out_of_domain[idx],
            );
            clamp_axis(
                &mut pt.y,
                &mut vel.y,
                bounds.lower_corner.y,
                bounds.upper_corner.y,
                closed.contains(Direction::Down),
                closed.contains(Direction::Up),
                &mut out_of_domain[idx],
            );
            clamp_axis(
                &mut pt.z,
                &mut vel.z,
                bounds.lower_corner.z,
                bounds.upper_corner.z,
                closed.contains(Direction::Back),
                closed.contains(Direction::Front),
                &mut out_of_domain[idx],
            );

            for collider in &collider_snapshots {
                collider.resolve_collision(0.0, 0.0, &mut pt, &mut vel);
            }

            new_positions.push(pt);
            new_velocities.push(vel);
        }

        self.particles.positions_mut().copy_from_slice(&new_positions);
        self.particles
            .velocities_mut()
            .copy_from_slice(&new_velocities);
        if out_of_domain.iter().any(|o| *o) {
            self.particles.remove_particles(|i| out_of_domain[i]);
        }
    }
}

fn face_origin(spec: &GridSpec, component: usize) -> Point3 {
    let o = spec.origin();
    let h = spec.spacing();
    match component {
        0 => cgmath::point3(o.x, o.y + 0.5 * h.y, o.z + 0.5 * h.z),
        1 => cgmath::point3(o.x + 0.5 * h.x, o.y, o.z + 0.5 * h.z),
        _ => cgmath::point3(o.x + 0.5 * h.x, o.y + 0.5 * h.y, o.z),
    }
}

/// `sum_j grad(w_j) * q_j` over the eight faces around `p`: the affine
/// vector the APIC transfer carries per velocity component.
fn gradient_weighted_sum(data: &Array3<f64>, origin: Point3, spec: &GridSpec, p: Point3) -> Vec3 {
    let h = spec.spacing();
    let size = data.size();
    let (i, fx) = get_barycentric((p.x - origin.x) / h.x, size.x);
    let (j, fy) = get_barycentric((p.y - origin.y) / h.y, size.y);
    let (k, fz) = get_barycentric((p.z - origin.z) / h.z, size.z);
    let ip = (i + 1).min(size.x - 1);
    let jp = (j + 1).min(size.y - 1);
    let kp = (k + 1).min(size.z - 1);

    let wx = [1.0 - fx, fx];
    let wy = [1.0 - fy, fy];
    let wz = [1.0 - fz, fz];
    let dx = [-1.0 / h.x, 1.0 / h.x];
    let dy = [-1.0 / h.y, 1.0 / h.y];
    let dz = [-1.0 / h.z, 1.0 / h.z];
    let is = [i, ip];
    let js = [j, jp];
    let ks = [k, kp];

    let mut sum = Vec3::new(0.0, 0.0, 0.0);
    for (c, &kk) in ks.iter().enumerate() {
        for (b, &jj) in js.iter().enumerate() {
            for (a, &ii) in is.iter().enumerate() {
                let q = data[(ii, jj, kk)];
                sum.x += dx[a] * wy[b] * wz[c] * q;
                sum.y += wx[a] * dy[b] * wz[c] * q;
                sum.z += wx[a] * wy[b] * dz[c] * q;
            }
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{size3, Aabb3};
    use crate::scene::{BoxSurface, Sphere, VolumeParticleEmitter};
    use std::sync::Arc;

    fn spec(n: usize) -> GridSpec {
        GridSpec::with_uniform_spacing(size3(n, n, n), 1.0 / n as f64).unwrap()
    }

    fn add_block(solver: &mut HybridFluidSolver) {
        let surface = Arc::new(BoxSurface::new(Aabb3::new(
            cgmath::point3(0.1, 0.1, 0.1),
            cgmath::point3(0.5, 0.5, 0.5),
        )));
        let bounds = solver.spec.bounding_box();
        let spacing = 0.5 * solver.spec.spacing().x;
        let mut emitter =
            VolumeParticleEmitter::new(surface, bounds, spacing, Vec3::new(0.0, 0.0, 0.0));
        emitter.update(&mut solver.particles, 0.0, 0.0);
    }

    #[test]
    fn round_trip_transfer_preserves_uniform_velocity() {
        for scheme in [
            TransferScheme::Pic,
            TransferScheme::Flip { pic_blending: 0.0 },
            TransferScheme::Apic,
        ] {
            let mut solver = HybridFluidSolver::new(spec(16), scheme);
            add_block(&mut solver);
            let vel = Vec3::new(0.5, -0.25, 0.125);
            for v in solver.particles_mut().velocities_mut() {
                *v = vel;
            }

            solver.transfer_particles_to_grids();
            // without projection the FLIP delta is zero
            solver.velocity_before_projection = solver.velocity.clone();
            solver.transfer_grids_to_particles();

            let positions = solver.particles().positions().to_vec();
            for (p, v) in positions.iter().zip(solver.particles().velocities()) {
                let interior =
                    p.x > 0.2 && p.x < 0.4 && p.y > 0.2 && p.y < 0.4 && p.z > 0.2 && p.z < 0.4;
                if interior {
                    assert!(
                        (v.x - vel.x).abs() < 1e-9
                            && (v.y - vel.y).abs() < 1e-9
                            && (v.z - vel.z).abs() < 1e-9,
                        "{:?}: {:?} != {:?}",
                        scheme,
                        v,
                        vel
                    );
                }
            }
        }
    }

    #[test]
    fn fluid_sdf_is_negative_inside_the_particle_block() {
        let mut solver = HybridFluidSolver::new(spec(16), TransferScheme::Pic);
        add_block(&mut solver);
        solver.build_fluid_sdf();
        assert!(solver.fluid_sdf().sample(cgmath::point3(0.3, 0.3, 0.3)) < 0.0);
        assert!(solver.fluid_sdf().sample(cgmath::point3(0.8, 0.8, 0.8)) > 0.0);
    }

    #[test]
    fn apic_recovers_affine_velocity_fields() {
        let mut solver = HybridFluidSolver::new(spec(16), TransferScheme::Apic);
        add_block(&mut solver);
        // rigid rotation about z through the block center
        let center = cgmath::point3(0.3, 0.3, 0.3);
        let positions = solver.particles().positions().to_vec();
        for (v, p) in solver
            .particles_mut()
            .velocities_mut()
            .iter_mut()
            .zip(&positions)
        {
            let r = p - center;
            *v = Vec3::new(-r.y, r.x, 0.0);
        }

        // one full round trip; APIC should retain the rotation rather than
        // flattening it the way plain PIC does
        solver.transfer_particles_to_grids();
        solver.transfer_grids_to_particles();

        let mut worst = 0.0f64;
        let positions = solver.particles().positions().to_vec();
        for (v, p) in solver.particles().velocities().iter().zip(&positions) {
            let interior =
                p.x > 0.2 && p.x < 0.4 && p.y > 0.2 && p.y < 0.4 && p.z > 0.2 && p.z < 0.4;
            if interior {
                let r = p - center;
                let expected = Vec3::new(-r.y, r.x, 0.0);
                worst = worst
                    .max((v.x - expected.x).abs())
                    .max((v.y - expected.y).abs());
            }
        }
        assert!(worst < 0.05, "apic round-trip error {}", worst);
    }

    #[test]
    fn dam_break_front_advances() {
        let n = 24;
        let mut solver =
            HybridFluidSolver::new(spec(n), TransferScheme::Flip { pic_blending: 0.05 });
        // water column on the left fifth of the box
        let surface = Arc::new(BoxSurface::new(Aabb3::new(
            cgmath::point3(0.0, 0.0, 0.0),
            cgmath::point3(0.2, 0.8, 1.0),
        )));
        let bounds = solver.spec.bounding_box();
        let spacing = 0.5 * solver.spec.spacing().x;
        let mut emitter =
            VolumeParticleEmitter::new(surface, bounds, spacing, Vec3::new(0.0, 0.0, 0.0));
        emitter.update(&mut solver.particles, 0.0, 0.0);

        let mut frame = Frame::with_fps(60.0);
        for _ in 0..10 {
            solver.update(frame).unwrap();
            frame.advance();
        }

        // the front (max x of any particle) has moved well past the column
        let front = solver
            .particles()
            .positions()
            .iter()
            .fold(f64::MIN, |acc, p| acc.max(p.x));
        assert!(front > 0.3, "front at {}", front);
        // nothing left the closed box
        for p in solver.particles().positions() {
            assert!(p.x >= -1e-9 && p.x <= 1.0 + 1e-9);
            assert!(p.y >= -1e-9 && p.y <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn particles_collide_with_a_sphere_obstacle() {
        let n = 16;
        let mut solver = HybridFluidSolver::new(spec(n), TransferScheme::Pic);
        let collider =
            RigidBodyCollider::new(Arc::new(Sphere::new(cgmath::point3(0.5, 0.25, 0.5), 0.15)))
                .into_handle();
        solver.add_collider(collider);

        // drop a few particles straight onto the sphere
        solver.particles_mut().add_particles(
            &[
                cgmath::point3(0.5, 0.8, 0.5),
                cgmath::point3(0.52, 0.85, 0.5),
            ],
            &[Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, -1.0, 0.0)],
            &[],
        );

        let mut frame = Frame::with_fps(60.0);
        for _ in 0..30 {
            solver.update(frame).unwrap();
            frame.advance();
        }

        // no particle ended up inside the collider
        for p in solver.particles().positions() {
            use cgmath::MetricSpace;
            let d = p.distance(cgmath::point3(0.5, 0.25, 0.5));
            assert!(d > 0.15 - 1e-6, "particle inside the sphere, d = {}", d);
        }
    }
}
