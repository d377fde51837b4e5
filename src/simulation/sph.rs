use super::kernels::{SphSpikyKernel, SphStdKernel};
use crate::math::{clamp, lerp, Point3, Vec3};
use crate::particles::{ChannelId, ParticleSystemData};
use crate::scene::{ColliderHandle, ParticleEmitter, RigidBodyCollider};
use crate::timer::Frame;
use cgmath::InnerSpace;
use log::{info, trace};

const WATER_DENSITY: f64 = 1000.0;
const TIME_STEP_LIMIT_BY_SPEED_FACTOR: f64 = 0.4;
const TIME_STEP_LIMIT_BY_FORCE_FACTOR: f64 = 0.25;

/// Particle data specialized for SPH: adds per-particle density and pressure
/// columns and ties mass to the target density through the sample lattice.
pub struct SphSystemData {
    particles: ParticleSystemData,
    density_id: ChannelId,
    pressure_id: ChannelId,

    target_density: f64,
    target_spacing: f64,
    kernel_radius_over_target_spacing: f64,
    kernel_radius: f64,
}

impl SphSystemData {
    pub fn new() -> Self {
        let mut particles = ParticleSystemData::new();
        let density_id = particles.add_scalar_channel("density", 0.0);
        let pressure_id = particles.add_scalar_channel("pressure", 0.0);
        let mut data = SphSystemData {
            particles,
            density_id,
            pressure_id,
            target_density: WATER_DENSITY,
            target_spacing: 0.1,
            kernel_radius_over_target_spacing: 1.8,
            kernel_radius: 0.18,
        };
        data.recompute_derived();
        data
    }

    pub fn particles(&self) -> &ParticleSystemData {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut ParticleSystemData {
        &mut self.particles
    }

    pub fn kernel_radius(&self) -> f64 {
        self.kernel_radius
    }

    pub fn target_density(&self) -> f64 {
        self.target_density
    }

    pub fn target_spacing(&self) -> f64 {
        self.target_spacing
    }

    pub fn set_target_spacing(&mut self, spacing: f64) {
        self.target_spacing = spacing;
        self.recompute_derived();
    }

    pub fn set_target_density(&mut self, density: f64) {
        self.target_density = density;
        self.recompute_derived();
    }

    /// Kernel radius follows spacing; mass follows from requiring that a
    /// filled lattice reproduces the target density.
    fn recompute_derived(&mut self) {
        self.kernel_radius = self.kernel_radius_over_target_spacing * self.target_spacing;
        self.particles.set_radius(self.target_spacing);

        let kernel = SphStdKernel::new(self.kernel_radius);
        let mut number_density = 0.0;
        for q in lattice_points(self.target_spacing, 1.5 * self.kernel_radius) {
            number_density += kernel.value(q.magnitude());
        }
        debug_assert!(number_density > 0.0);
        self.particles.set_mass(self.target_density / number_density);
    }

    pub fn densities(&self) -> &[f64] {
        self.particles.scalar_channel(self.density_id)
    }

    pub fn pressures(&self) -> &[f64] {
        self.particles.scalar_channel(self.pressure_id)
    }

    pub fn pressures_mut(&mut self) -> &mut [f64] {
        self.particles.scalar_channel_mut(self.pressure_id)
    }

    /// Poly6 sum over the prebuilt neighbor lists (self term included).
    pub fn update_densities(&mut self) {
        let kernel = SphStdKernel::new(self.kernel_radius);
        let mass = self.particles.mass();
        let positions = self.particles.positions().to_vec();
        let neighbor_lists = self.particles.neighbor_lists().to_vec();

        let densities = self.particles.scalar_channel_mut(self.density_id);
        for i in 0..positions.len() {
            let mut sum = kernel.value(0.0);
            for j in &neighbor_lists[i] {
                use cgmath::MetricSpace;
                sum += kernel.value(positions[i].distance(positions[*j]));
            }
            densities[i] = mass * sum;
        }
    }
}

impl Default for SphSystemData {
    fn default() -> Self {
        Self::new()
    }
}

/// Cubic sample lattice around the origin, clipped to `extent`.
fn lattice_points(spacing: f64, extent: f64) -> Vec<Vec3> {
    let n = (extent / spacing).ceil() as i64;
    let mut points = Vec::new();
    for k in -n..=n {
        for j in -n..=n {
            for i in -n..=n {
                let q = Vec3::new(i as f64 * spacing, j as f64 * spacing, k as f64 * spacing);
                if q.magnitude() <= extent {
                    points.push(q);
                }
            }
        }
    }
    points
}

/// How the pressure force is obtained each sub-step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PressureMode {
    /// Tait equation of state, evaluated once.
    Eos,
    /// Predictive-corrective incompressibility: iterate pressure updates
    /// until the density error drops below the ratio or the budget runs out.
    Pci {
        max_density_error_ratio: f64,
        max_iterations: usize,
    },
}

/// Weakly-compressible SPH solver (standard and predictive-corrective).
pub struct SphSolver {
    data: SphSystemData,
    pressure_mode: PressureMode,

    pub gravity: Vec3,
    pub eos_exponent: f64,
    pub negative_pressure_scale: f64,
    pub viscosity_coefficient: f64,
    pub pseudo_viscosity_coefficient: f64,
    pub speed_of_sound: f64,
    pub timestep_limit_scale: f64,
    pub restitution: f64,

    colliders: Vec<ColliderHandle>,
    emitters: Vec<Box<dyn ParticleEmitter>>,

    current_time: f64,
}

impl SphSolver {
    pub fn new() -> Self {
        SphSolver {
            data: SphSystemData::new(),
            pressure_mode: PressureMode::Eos,
            gravity: Vec3::new(0.0, -9.8, 0.0),
            eos_exponent: 7.0,
            negative_pressure_scale: 0.0,
            viscosity_coefficient: 0.01,
            pseudo_viscosity_coefficient: 10.0,
            speed_of_sound: 100.0,
            timestep_limit_scale: 1.0,
            restitution: 0.0,
            colliders: Vec::new(),
            emitters: Vec::new(),
            current_time: 0.0,
        }
    }

    pub fn pci() -> Self {
        let mut solver = Self::new();
        solver.pressure_mode = PressureMode::Pci {
            max_density_error_ratio: 0.01,
            max_iterations: 5,
        };
        // PCI does not rely on stiffness-driven time steps
        solver.timestep_limit_scale = 5.0;
        solver
    }

    pub fn set_pressure_mode(&mut self, mode: PressureMode) {
        self.pressure_mode = mode;
    }

    pub fn data(&self) -> &SphSystemData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut SphSystemData {
        &mut self.data
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

    /// Advances the simulation to the end of `frame`.
    pub fn update(&mut self, frame: Frame) {
        let target_time = frame.end_time();
        while self.current_time < target_time - 1e-12 {
            let remaining = target_time - self.current_time;
            let dt = remaining.min(self.suggested_sub_time_step());
            self.advance_sub_step(dt);
            self.current_time += dt;
        }
        trace!(
            "sph frame {} done, {} particles",
            frame.index,
            self.data.particles().number_of_particles()
        );
    }

    fn suggested_sub_time_step(&self) -> f64 {
        let h = self.data.kernel_radius();
        let mass = self.data.particles().mass();
        let by_speed = TIME_STEP_LIMIT_BY_SPEED_FACTOR * h / self.speed_of_sound;
        // gravity is the dominant steady external force; use it as the
        // force-based bound estimate
        let gravity_force = (mass * self.gravity.magnitude()).max(f64::MIN_POSITIVE);
        let by_force = TIME_STEP_LIMIT_BY_FORCE_FACTOR * (h * mass / gravity_force).sqrt();
        self.timestep_limit_scale * by_speed.min(by_force)
    }

    fn advance_sub_step(&mut self, dt: f64) {
        for emitter in self.emitters.iter_mut() {
            emitter.update(self.data.particles_mut(), self.current_time, dt);
        }

        let kernel_radius = self.data.kernel_radius();
        self.data.particles_mut().build_neighbor_lists(kernel_radius);
        self.data.update_densities();

        let n = self.data.particles().number_of_particles();
        if n == 0 {
            return;
        }

        // non-pressure forces
        let mut forces = vec![self.gravity * self.data.particles().mass(); n];
        self.accumulate_viscosity_force(&mut forces);

        let pressure_mode = self.pressure_mode;
        match pressure_mode {
            PressureMode::Eos => {
                self.compute_eos_pressure();
                self.accumulate_pressure_force(&mut forces);
            }
            PressureMode::Pci {
                max_density_error_ratio,
                max_iterations,
            } => {
                self.accumulate_pci_pressure_force(dt, max_density_error_ratio, max_iterations, &mut forces);
            }
        }

        self.integrate_and_collide(dt, &forces);
        self.apply_pseudo_viscosity(dt);
    }

    fn compute_eos_pressure(&mut self) {
        let eos_scale = self.data.target_density() * self.speed_of_sound * self.speed_of_sound;
        let eos_exponent = self.eos_exponent;
        let negative_scale = self.negative_pressure_scale;
        let target_density = self.data.target_density();

        let densities = self.data.densities().to_vec();
        let pressures = self.data.pressures_mut();
        for (p, rho) in pressures.iter_mut().zip(densities) {
            let mut value =
                eos_scale / eos_exponent * ((rho / target_density).powf(eos_exponent) - 1.0);
            if value < 0.0 {
                value *= negative_scale;
            }
            *p = value;
        }
    }

    fn accumulate_pressure_force(&self, forces: &mut [Vec3]) {
        use cgmath::MetricSpace;
        let particles = self.data.particles();
        let positions = particles.positions();
        let neighbor_lists = particles.neighbor_lists();
        let densities = self.data.densities();
        let pressures = self.data.pressures();
        let mass_sqr = particles.mass() * particles.mass();
        let kernel = SphSpikyKernel::new(self.data.kernel_radius());

        for i in 0..positions.len() {
            for j in &neighbor_lists[i] {
                let dist = positions[i].distance(positions[*j]);
                if dist > 0.0 {
                    let dir = (positions[*j] - positions[i]) / dist;
                    forces[i] -= mass_sqr
                        * (pressures[i] / (densities[i] * densities[i])
                            + pressures[*j] / (densities[*j] * densities[*j]))
                        * kernel.gradient(dist, dir);
                }
            }
        }
    }

    fn accumulate_viscosity_force(&self, forces: &mut [Vec3]) {
        use cgmath::MetricSpace;
        let particles = self.data.particles();
        let positions = particles.positions();
        let velocities = particles.velocities();
        let neighbor_lists = particles.neighbor_lists();
        let densities = self.data.densities();
        let mass_sqr = particles.mass() * particles.mass();
        let kernel = SphSpikyKernel::new(self.data.kernel_radius());

        for i in 0..positions.len() {
            for j in &neighbor_lists[i] {
                let dist = positions[i].distance(positions[*j]);
                forces[i] += self.viscosity_coefficient * mass_sqr
                    * kernel.second_derivative(dist)
                    * (velocities[*j] - velocities[i])
                    / densities[*j];
            }
        }
    }

    /// Pressure correction loop bounded by the iteration budget; stops once
    /// the worst density error falls under the configured ratio.
    fn accumulate_pci_pressure_force(
        &mut self,
        dt: f64,
        max_density_error_ratio: f64,
        max_iterations: usize,
        forces: &mut [Vec3],
    ) {
        use cgmath::MetricSpace;
        let n = self.data.particles().number_of_particles();
        let delta = self.compute_delta(dt);
        let target_density = self.data.target_density();
        let mass = self.data.particles().mass();
        let kernel = SphStdKernel::new(self.data.kernel_radius());

        for p in self.data.pressures_mut() {
            *p = 0.0;
        }
        let mut pressure_forces = vec![Vec3::new(0.0, 0.0, 0.0); n];

        let collider_snapshots: Vec<RigidBodyCollider> = self
            .colliders
            .iter()
            .map(|c| c.read().expect("collider lock poisoned").clone())
            .collect();
        let particle_radius = self.data.particles().radius();
        let restitution = self.restitution;

        for iteration in 0..max_iterations {
            let positions = self.data.particles().positions().to_vec();
            let velocities = self.data.particles().velocities().to_vec();
            let neighbor_lists = self.data.particles().neighbor_lists().to_vec();

            // predict
            let mut temp_positions = positions.clone();
            let mut temp_velocities = velocities.clone();
            for i in 0..n {
                temp_velocities[i] =
                    velocities[i] + dt / mass * (forces[i] + pressure_forces[i]);
                temp_positions[i] = positions[i] + dt * temp_velocities[i];
                for collider in &collider_snapshots {
                    collider.resolve_collision(
                        particle_radius,
                        restitution,
                        &mut temp_positions[i],
                        &mut temp_velocities[i],
                    );
                }
            }

            // density error -> pressure update
            let mut max_error: f64 = 0.0;
            {
                let pressures = self.data.pressures_mut();
                for i in 0..n {
                    let mut weight_sum = kernel.value(0.0);
                    for j in &neighbor_lists[i] {
                        weight_sum += kernel.value(temp_positions[i].distance(temp_positions[*j]));
                    }
                    let density = mass * weight_sum;
                    let density_error = density - target_density;
                    pressures[i] += delta * density_error;
                    if pressures[i] < 0.0 {
                        pressures[i] *= self.negative_pressure_scale;
                    }
                    max_error = max_error.max(density_error.abs());
                }
            }

            // re-accumulate the pressure force from the original positions
            for f in pressure_forces.iter_mut() {
                *f = Vec3::new(0.0, 0.0, 0.0);
            }
            self.accumulate_pressure_force(&mut pressure_forces);

            if max_error / target_density < max_density_error_ratio {
                trace!("pci converged after {} iterations", iteration + 1);
                break;
            }
        }

        for (f, pf) in forces.iter_mut().zip(&pressure_forces) {
            *f += *pf;
        }
    }

    /// Scaling factor of the PCI pressure update, precomputed from a filled
    /// sample lattice around a reference particle.
    fn compute_delta(&self, dt: f64) -> f64 {
        let h = self.data.kernel_radius();
        let spacing = self.data.target_spacing();
        let kernel = SphSpikyKernel::new(h);

        let mut denom1 = Vec3::new(0.0, 0.0, 0.0);
        let mut denom2 = 0.0;
        for q in lattice_points(spacing, 1.5 * h) {
            let dist_sqr = q.magnitude2();
            if dist_sqr < h * h && dist_sqr > 0.0 {
                let dist = dist_sqr.sqrt();
                let dir = q / dist;
                let grad = kernel.gradient(dist, dir);
                denom1 += grad;
                denom2 += grad.dot(grad);
            }
        }
        let denom = -denom1.dot(denom1) - denom2;
        let mass = self.data.particles().mass();
        let beta = 2.0 * crate::math::square(mass * dt / self.data.target_density());

        if denom.abs() > 0.0 {
            -1.0 / (beta * denom)
        } else {
            0.0
        }
    }

    fn integrate_and_collide(&mut self, dt: f64, forces: &[Vec3]) {
        let mass = self.data.particles().mass();
        let particle_radius = self.data.particles().radius();
        let restitution = self.restitution;
        let collider_snapshots: Vec<RigidBodyCollider> = self
            .colliders
            .iter()
            .map(|c| c.read().expect("collider lock poisoned").clone())
            .collect();

        let n = self.data.particles().number_of_particles();
        let mut new_positions: Vec<Point3> = Vec::with_capacity(n);
        let mut new_velocities: Vec<Vec3> = Vec::with_capacity(n);
        {
            let particles = self.data.particles();
            for i in 0..n {
                // semi-implicit Euler
                let mut v = particles.velocities()[i] + dt * forces[i] / mass;
                let mut x = particles.positions()[i] + dt * v;
                for collider in &collider_snapshots {
                    collider.resolve_collision(particle_radius, restitution, &mut x, &mut v);
                }
                new_positions.push(x);
                new_velocities.push(v);
            }
        }

        let particles = self.data.particles_mut();
        particles.positions_mut().copy_from_slice(&new_positions);
        particles.velocities_mut().copy_from_slice(&new_velocities);
    }

    /// Velocity smoothing pass that trades a little energy for a lot of
    /// stability in splashy regions.
    fn apply_pseudo_viscosity(&mut self, dt: f64) {
        use cgmath::MetricSpace;
        if self.pseudo_viscosity_coefficient <= 0.0 {
            return;
        }
        let n = self.data.particles().number_of_particles();
        let mass = self.data.particles().mass();
        let kernel = SphStdKernel::new(self.data.kernel_radius());
        let factor = clamp(self.pseudo_viscosity_coefficient * dt, 0.0, 1.0);

        let positions = self.data.particles().positions().to_vec();
        let velocities = self.data.particles().velocities().to_vec();
        let neighbor_lists = self.data.particles().neighbor_lists().to_vec();
        let densities = self.data.densities().to_vec();

        let mut smoothed = vec![Vec3::new(0.0, 0.0, 0.0); n];
        for i in 0..n {
            let mut weight_sum = mass / densities[i] * kernel.value(0.0);
            let mut velocity_sum = weight_sum * velocities[i];
            for j in &neighbor_lists[i] {
                let w = mass / densities[*j] * kernel.value(positions[i].distance(positions[*j]));
                weight_sum += w;
                velocity_sum += w * velocities[*j];
            }
            smoothed[i] = if weight_sum > 0.0 {
                velocity_sum / weight_sum
            } else {
                velocities[i]
            };
        }

        let velocities = self.data.particles_mut().velocities_mut();
        for i in 0..n {
            velocities[i] = Vec3::new(
                lerp(velocities[i].x, smoothed[i].x, factor),
                lerp(velocities[i].y, smoothed[i].y, factor),
                lerp(velocities[i].z, smoothed[i].z, factor),
            );
        }
    }
}

impl Default for SphSolver {
    fn default() -> Self {
        Self::new()
    }
}

/// One-line progress report used by the CLI driver.
pub fn log_sph_frame(frame: Frame, solver: &SphSolver) {
    info!(
        "frame {:>5}  t = {:.4}s  particles = {}",
        frame.index,
        frame.end_time(),
        solver.data().particles().number_of_particles()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Plane;
    use std::sync::Arc;

    fn block_of_particles(solver: &mut SphSolver, nx: usize, ny: usize, nz: usize) {
        let spacing = solver.data().target_spacing();
        let mut positions = Vec::new();
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    positions.push(cgmath::point3(
                        i as f64 * spacing,
                        0.5 + j as f64 * spacing,
                        k as f64 * spacing,
                    ));
                }
            }
        }
        solver
            .data_mut()
            .particles_mut()
            .add_particles(&positions, &[], &[]);
    }

    #[test]
    fn densities_come_out_near_target_inside_a_block() {
        let mut solver = SphSolver::new();
        solver.data_mut().set_target_spacing(0.05);
        block_of_particles(&mut solver, 8, 8, 8);
        let kernel_radius = solver.data().kernel_radius();
        solver
            .data_mut()
            .particles_mut()
            .build_neighbor_lists(kernel_radius);
        solver.data_mut().update_densities();

        // interior particle (middle of the block)
        let idx = 4 + 8 * (4 + 8 * 4);
        let rho = solver.data().densities()[idx];
        let target = solver.data().target_density();
        assert!(
            (rho - target).abs() < 0.1 * target,
            "interior density {} vs target {}",
            rho,
            target
        );
    }

    #[test]
    fn particles_fall_under_gravity_and_stop_on_the_floor() {
        let mut solver = SphSolver::new();
        solver.data_mut().set_target_spacing(0.1);
        solver.pseudo_viscosity_coefficient = 0.0;
        solver.add_collider(
            RigidBodyCollider::new(Arc::new(Plane::new(
                cgmath::point3(0.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            )))
            .into_handle(),
        );
        block_of_particles(&mut solver, 3, 3, 3);

        let mut frame = Frame::with_fps(60.0);
        for _ in 0..30 {
            solver.update(frame);
            frame.advance();
        }

        // everything should still be above the floor
        for p in solver.data().particles().positions() {
            assert!(p.y >= -1e-6, "particle fell through the floor: {:?}", p);
        }
        // and the block must have dropped from its initial height
        let max_y = solver
            .data()
            .particles()
            .positions()
            .iter()
            .fold(f64::MIN, |acc, p| acc.max(p.y));
        assert!(max_y < 0.5 + 0.3);
    }

    #[test]
    fn pci_solver_keeps_density_error_bounded() {
        let mut solver = SphSolver::pci();
        solver.data_mut().set_target_spacing(0.05);
        solver.pseudo_viscosity_coefficient = 0.0;
        block_of_particles(&mut solver, 6, 6, 6);

        let mut frame = Frame::with_fps(60.0);
        for _ in 0..3 {
            solver.update(frame);
            frame.advance();
        }

        let target = solver.data().target_density();
        let n = solver.data().particles().number_of_particles();
        let mut over_dense = 0;
        for rho in solver.data().densities() {
            if *rho > 1.3 * target {
                over_dense += 1;
            }
        }
        // free-falling block: no particle should be badly compressed
        assert!(over_dense < n / 10, "{} of {} over-compressed", over_dense, n);
    }
}
