use super::surface::SurfaceHandle;
use crate::grid::{CellCenteredScalarGrid, ScalarGrid};
use crate::math::{Aabb3, Point3, Vec3};
use crate::particles::ParticleSystemData;
use cgmath::InnerSpace;
use log::{info, warn};
use rand::{Rng, SeedableRng};
use std::sync::{Arc, RwLock};

pub trait ParticleEmitter: Send {
    /// Called once per sub-step before physics advances.
    fn update(&mut self, particles: &mut ParticleSystemData, current_time: f64, dt: f64);
}

pub type ParticleEmitterHandle = Arc<RwLock<dyn ParticleEmitter>>;

/// Fills an implicit volume with a jittered particle lattice. Re-emission
/// only tops up the region (one-shot by default); the configured particle
/// maximum silently caps emission.
pub struct VolumeParticleEmitter {
    surface: SurfaceHandle,
    bounds: Aabb3,
    spacing: f64,
    initial_velocity: Vec3,
    max_number_of_particles: usize,
    jitter: f64,
    is_one_shot: bool,
    is_enabled: bool,
    rng: rand::rngs::SmallRng,
}

impl VolumeParticleEmitter {
    pub fn new(
        surface: SurfaceHandle,
        bounds: Aabb3,
        spacing: f64,
        initial_velocity: Vec3,
    ) -> Self {
        VolumeParticleEmitter {
            surface,
            bounds,
            spacing,
            initial_velocity,
            max_number_of_particles: usize::MAX,
            jitter: 0.0,
            is_one_shot: true,
            is_enabled: true,
            rng: rand::rngs::SmallRng::seed_from_u64(0),
        }
    }

    pub fn with_max_particles(mut self, max: usize) -> Self {
        self.max_number_of_particles = max;
        self
    }

    /// 0 = perfect lattice, 1 = up to half a spacing of displacement.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    pub fn with_one_shot(mut self, one_shot: bool) -> Self {
        self.is_one_shot = one_shot;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.rng = rand::rngs::SmallRng::seed_from_u64(seed);
        self
    }
}

impl ParticleEmitter for VolumeParticleEmitter {
    fn update(&mut self, particles: &mut ParticleSystemData, _current_time: f64, _dt: f64) {
        if !self.is_enabled {
            return;
        }

        let region = {
            let surface_bounds = self.surface.bounding_box();
            let mut r = self.bounds;
            r.lower_corner = cgmath::point3(
                r.lower_corner.x.max(surface_bounds.lower_corner.x),
                r.lower_corner.y.max(surface_bounds.lower_corner.y),
                r.lower_corner.z.max(surface_bounds.lower_corner.z),
            );
            r.upper_corner = cgmath::point3(
                r.upper_corner.x.min(surface_bounds.upper_corner.x),
                r.upper_corner.y.min(surface_bounds.upper_corner.y),
                r.upper_corner.z.min(surface_bounds.upper_corner.z),
            );
            r
        };
        let extent = region.extent();
        if extent.x <= 0.0 || extent.y <= 0.0 || extent.z <= 0.0 {
            return;
        }

        let budget = self
            .max_number_of_particles
            .saturating_sub(particles.number_of_particles());

        let nx = (extent.x / self.spacing).ceil() as usize;
        let ny = (extent.y / self.spacing).ceil() as usize;
        let nz = (extent.z / self.spacing).ceil() as usize;
        let jitter_scale = 0.5 * self.spacing * self.jitter;

        let mut new_positions = Vec::new();
        let mut capped = false;
        'fill: for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let jitter = Vec3::new(
                        (self.rng.gen::<f64>() - 0.5) * jitter_scale,
                        (self.rng.gen::<f64>() - 0.5) * jitter_scale,
                        (self.rng.gen::<f64>() - 0.5) * jitter_scale,
                    );
                    let p = cgmath::point3(
                        region.lower_corner.x + (i as f64 + 0.5) * self.spacing,
                        region.lower_corner.y + (j as f64 + 0.5) * self.spacing,
                        region.lower_corner.z + (k as f64 + 0.5) * self.spacing,
                    ) + jitter;

                    if self.surface.signed_distance(p) > 0.0 || !region.contains(p) {
                        continue;
                    }
                    if new_positions.len() >= budget {
                        capped = true;
                        break 'fill;
                    }
                    new_positions.push(p);
                }
            }
        }

        if capped {
            warn!(
                "volume emitter hit the particle cap ({} max)",
                self.max_number_of_particles
            );
        }
        if !new_positions.is_empty() {
            info!("emitting {} particles", new_positions.len());
            let velocities = vec![self.initial_velocity; new_positions.len()];
            particles.add_particles(&new_positions, &velocities, &[]);
        }

        if self.is_one_shot {
            self.is_enabled = false;
        }
    }
}

/// Sprays particles from a point along a cone around `direction`.
pub struct PointParticleEmitter {
    origin: Point3,
    direction: Vec3,
    speed: f64,
    spread_angle_radians: f64,
    max_particles_per_second: f64,
    max_number_of_particles: usize,
    accumulated: f64,
    rng: rand::rngs::SmallRng,
}

impl PointParticleEmitter {
    pub fn new(origin: Point3, direction: Vec3, speed: f64, spread_angle_degrees: f64) -> Self {
        PointParticleEmitter {
            origin,
            direction: direction.normalize(),
            speed,
            spread_angle_radians: spread_angle_degrees.to_radians(),
            max_particles_per_second: 100.0,
            max_number_of_particles: usize::MAX,
            accumulated: 0.0,
            rng: rand::rngs::SmallRng::seed_from_u64(0),
        }
    }

    pub fn with_rate(mut self, particles_per_second: f64) -> Self {
        self.max_particles_per_second = particles_per_second;
        self
    }

    pub fn with_max_particles(mut self, max: usize) -> Self {
        self.max_number_of_particles = max;
        self
    }

    fn random_cone_direction(&mut self) -> Vec3 {
        // perturb the axis within the spread cone
        let axis = self.direction;
        let ortho = if axis.x.abs() < 0.9 {
            axis.cross(Vec3::new(1.0, 0.0, 0.0)).normalize()
        } else {
            axis.cross(Vec3::new(0.0, 1.0, 0.0)).normalize()
        };
        let bitangent = axis.cross(ortho);
        let angle = self.rng.gen::<f64>() * self.spread_angle_radians;
        let azimuth = self.rng.gen::<f64>() * std::f64::consts::TAU;
        (axis * angle.cos()
            + (ortho * azimuth.cos() + bitangent * azimuth.sin()) * angle.sin())
        .normalize()
    }
}

impl ParticleEmitter for PointParticleEmitter {
    fn update(&mut self, particles: &mut ParticleSystemData, _current_time: f64, dt: f64) {
        self.accumulated += self.max_particles_per_second * dt;
        let mut count = self.accumulated.floor() as usize;
        self.accumulated -= count as f64;

        let budget = self
            .max_number_of_particles
            .saturating_sub(particles.number_of_particles());
        count = count.min(budget);
        if count == 0 {
            return;
        }

        let mut positions = Vec::with_capacity(count);
        let mut velocities = Vec::with_capacity(count);
        for _ in 0..count {
            positions.push(self.origin);
            velocities.push(self.random_cone_direction() * self.speed);
        }
        particles.add_particles(&positions, &velocities, &[]);
    }
}

pub trait GridEmitter: Send {
    fn update(&mut self, target: &mut CellCenteredScalarGrid, current_time: f64, dt: f64);
}

pub type GridEmitterHandle = Arc<RwLock<dyn GridEmitter>>;

/// Paints an implicit surface into a scalar grid as a min-union SDF.
pub struct VolumeGridEmitter {
    surface: SurfaceHandle,
    is_one_shot: bool,
    is_enabled: bool,
}

impl VolumeGridEmitter {
    pub fn new(surface: SurfaceHandle) -> Self {
        VolumeGridEmitter {
            surface,
            is_one_shot: true,
            is_enabled: true,
        }
    }

    pub fn with_one_shot(mut self, one_shot: bool) -> Self {
        self.is_one_shot = one_shot;
        self
    }
}

impl GridEmitter for VolumeGridEmitter {
    fn update(&mut self, target: &mut CellCenteredScalarGrid, _current_time: f64, _dt: f64) {
        if !self.is_enabled {
            return;
        }
        let spec = target.spec().clone();
        let surface = self.surface.clone();
        let old = target.data().clone();
        target.par_fill_with(|i, j, k| {
            let p = spec.cell_center_position(i, j, k);
            old[(i, j, k)].min(surface.signed_distance(p))
        });
        if self.is_one_shot {
            self.is_enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::surface::Sphere;

    #[test]
    fn volume_emitter_fills_a_sphere_once() {
        let sphere = Arc::new(Sphere::new(cgmath::point3(0.5, 0.5, 0.5), 0.25));
        let bounds = Aabb3::new(cgmath::point3(0.0, 0.0, 0.0), cgmath::point3(1.0, 1.0, 1.0));
        let mut emitter =
            VolumeParticleEmitter::new(sphere, bounds, 0.05, Vec3::new(0.0, 0.0, 0.0));
        let mut particles = ParticleSystemData::new();

        emitter.update(&mut particles, 0.0, 1.0 / 60.0);
        let emitted = particles.number_of_particles();
        // sphere volume / spacing^3, very roughly
        let expected = (4.0 / 3.0 * std::f64::consts::PI * 0.25f64.powi(3)) / 0.05f64.powi(3);
        assert!((emitted as f64) > 0.5 * expected && (emitted as f64) < 2.0 * expected);

        // one-shot: second update adds nothing
        emitter.update(&mut particles, 1.0 / 60.0, 1.0 / 60.0);
        assert_eq!(particles.number_of_particles(), emitted);
    }

    #[test]
    fn particle_cap_silently_caps_emission() {
        let sphere = Arc::new(Sphere::new(cgmath::point3(0.5, 0.5, 0.5), 0.25));
        let bounds = Aabb3::new(cgmath::point3(0.0, 0.0, 0.0), cgmath::point3(1.0, 1.0, 1.0));
        let mut emitter = VolumeParticleEmitter::new(sphere, bounds, 0.05, Vec3::new(0.0, 0.0, 0.0))
            .with_max_particles(10);
        let mut particles = ParticleSystemData::new();
        emitter.update(&mut particles, 0.0, 1.0 / 60.0);
        assert_eq!(particles.number_of_particles(), 10);
    }

    #[test]
    fn point_emitter_respects_rate() {
        let mut emitter = PointParticleEmitter::new(
            cgmath::point3(0.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            2.0,
            10.0,
        )
        .with_rate(60.0);
        let mut particles = ParticleSystemData::new();
        // 0.5 seconds at 60/s -> 30 particles
        for _ in 0..30 {
            emitter.update(&mut particles, 0.0, 1.0 / 60.0);
        }
        assert_eq!(particles.number_of_particles(), 30);
    }

    #[test]
    fn grid_emitter_paints_min_union() {
        use crate::grid::GridSpec;
        use crate::math::size3;
        let spec = GridSpec::with_uniform_spacing(size3(8, 8, 8), 1.0 / 8.0).unwrap();
        let mut grid = CellCenteredScalarGrid::with_value(spec, f64::MAX);
        let sphere = Arc::new(Sphere::new(cgmath::point3(0.5, 0.5, 0.5), 0.25));
        let mut emitter = VolumeGridEmitter::new(sphere);
        emitter.update(&mut grid, 0.0, 0.0);
        // center cell is inside
        assert!(grid.data()[(4, 4, 4)] < 0.0);
        // corner cell is outside
        assert!(grid.data()[(0, 0, 0)] > 0.0);
    }
}
