pub mod collider;
pub mod emitter;
pub mod surface;

pub use collider::{ColliderHandle, RigidBodyCollider};
pub use emitter::{
    GridEmitter, GridEmitterHandle, ParticleEmitter, ParticleEmitterHandle, PointParticleEmitter,
    VolumeGridEmitter, VolumeParticleEmitter,
};
pub use surface::{BoxSurface, ImplicitSurface, ImplicitSurfaceSet, Plane, Sphere, SurfaceHandle};

use crate::error::{Result, SimulationError};
use crate::grid::GridSpec;
use crate::math::{size3, Aabb3, Vec3};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

/// Scene descriptions are JSON files; every field with a sensible default
/// may be omitted.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SceneConfig {
    pub resolution: [usize; 3],
    /// World-space width of the domain along x; the (uniform) grid spacing
    /// follows from it.
    pub domain_width: f64,
    #[serde(default)]
    pub origin: [f64; 3],
    #[serde(default = "default_gravity")]
    pub gravity: [f64; 3],
    #[serde(default)]
    pub solver: SolverKind,
    /// FLIP <-> PIC blend: 0 is pure FLIP, 1 is pure PIC.
    #[serde(default)]
    pub pic_blending: f64,
    #[serde(default = "default_cfl")]
    pub cfl_factor: f64,
    #[serde(default = "default_max_particles")]
    pub max_particles: usize,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub colliders: Vec<ColliderConfig>,
    #[serde(default)]
    pub emitters: Vec<EmitterConfig>,
}

fn default_gravity() -> [f64; 3] {
    [0.0, -9.8, 0.0]
}

fn default_cfl() -> f64 {
    1.0
}

fn default_max_particles() -> usize {
    1 << 22
}

fn default_fps() -> f64 {
    60.0
}

#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SolverKind {
    Grid,
    Pic,
    #[default]
    Flip,
    Apic,
    Sph,
    PciSph,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShapeConfig {
    Sphere { center: [f64; 3], radius: f64 },
    Box { min: [f64; 3], max: [f64; 3] },
    Plane { point: [f64; 3], normal: [f64; 3] },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ColliderConfig {
    pub shape: ShapeConfig,
    #[serde(default)]
    pub linear_velocity: [f64; 3],
    #[serde(default)]
    pub angular_velocity: [f64; 3],
    #[serde(default)]
    pub friction: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmitterConfig {
    Volume {
        shape: ShapeConfig,
        #[serde(default)]
        jitter: f64,
        #[serde(default)]
        initial_velocity: [f64; 3],
        #[serde(default = "default_true")]
        one_shot: bool,
    },
    Point {
        origin: [f64; 3],
        direction: [f64; 3],
        speed: f64,
        #[serde(default = "default_spread")]
        spread_angle_degrees: f64,
        #[serde(default = "default_rate")]
        particles_per_second: f64,
    },
}

fn default_true() -> bool {
    true
}

fn default_spread() -> f64 {
    15.0
}

fn default_rate() -> f64 {
    1000.0
}

fn vec3_of(v: [f64; 3]) -> Vec3 {
    Vec3::new(v[0], v[1], v[2])
}

pub fn build_surface(shape: &ShapeConfig) -> SurfaceHandle {
    match shape {
        ShapeConfig::Sphere { center, radius } => Arc::new(Sphere::new(
            cgmath::point3(center[0], center[1], center[2]),
            *radius,
        )),
        ShapeConfig::Box { min, max } => Arc::new(BoxSurface::new(Aabb3::new(
            cgmath::point3(min[0], min[1], min[2]),
            cgmath::point3(max[0], max[1], max[2]),
        ))),
        ShapeConfig::Plane { point, normal } => Arc::new(Plane::new(
            cgmath::point3(point[0], point[1], point[2]),
            vec3_of(*normal),
        )),
    }
}

impl SceneConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config: SceneConfig = serde_json::from_reader(reader)
            .map_err(|e| SimulationError::invalid_config(format!("scene parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: SceneConfig = serde_json::from_str(text)
            .map_err(|e| SimulationError::invalid_config(format!("scene parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolution.iter().any(|r| *r == 0) {
            return Err(SimulationError::invalid_config(
                "resolution axes must be non-zero",
            ));
        }
        if self.domain_width <= 0.0 {
            return Err(SimulationError::invalid_config("domain_width must be positive"));
        }
        if !(0.0..=1.0).contains(&self.pic_blending) {
            return Err(SimulationError::invalid_config("pic_blending must be in [0, 1]"));
        }
        for collider in &self.colliders {
            if !(0.0..=1.0).contains(&collider.friction) {
                return Err(SimulationError::invalid_config(
                    "collider friction must be in [0, 1]",
                ));
            }
        }
        Ok(())
    }

    pub fn grid_spacing(&self) -> f64 {
        self.domain_width / self.resolution[0] as f64
    }

    pub fn grid_spec(&self) -> Result<GridSpec> {
        GridSpec::new(
            size3(self.resolution[0], self.resolution[1], self.resolution[2]),
            Vec3::new(self.grid_spacing(), self.grid_spacing(), self.grid_spacing()),
            cgmath::point3(self.origin[0], self.origin[1], self.origin[2]),
        )
    }

    pub fn gravity(&self) -> Vec3 {
        vec3_of(self.gravity)
    }

    pub fn build_colliders(&self) -> Vec<ColliderHandle> {
        self.colliders
            .iter()
            .map(|c| {
                let mut collider = RigidBodyCollider::new(build_surface(&c.shape));
                collider.linear_velocity = vec3_of(c.linear_velocity);
                collider.angular_velocity = vec3_of(c.angular_velocity);
                collider.friction_coefficient = c.friction;
                collider.into_handle()
            })
            .collect()
    }

    /// Particle spacing is half a grid cell (2x2x2 particles per cell).
    pub fn build_particle_emitters(&self) -> Result<Vec<Box<dyn ParticleEmitter>>> {
        let spec = self.grid_spec()?;
        let bounds = spec.bounding_box();
        let spacing = 0.5 * self.grid_spacing();

        Ok(self
            .emitters
            .iter()
            .enumerate()
            .map(|(seed, e)| match e {
                EmitterConfig::Volume {
                    shape,
                    jitter,
                    initial_velocity,
                    one_shot,
                } => Box::new(
                    VolumeParticleEmitter::new(
                        build_surface(shape),
                        bounds,
                        spacing,
                        vec3_of(*initial_velocity),
                    )
                    .with_jitter(*jitter)
                    .with_one_shot(*one_shot)
                    .with_max_particles(self.max_particles)
                    .with_random_seed(seed as u64),
                ) as Box<dyn ParticleEmitter>,
                EmitterConfig::Point {
                    origin,
                    direction,
                    speed,
                    spread_angle_degrees,
                    particles_per_second,
                } => Box::new(
                    PointParticleEmitter::new(
                        cgmath::point3(origin[0], origin[1], origin[2]),
                        vec3_of(*direction),
                        *speed,
                        *spread_angle_degrees,
                    )
                    .with_rate(*particles_per_second)
                    .with_max_particles(self.max_particles),
                ) as Box<dyn ParticleEmitter>,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_scene_parses_with_defaults() {
        let config = SceneConfig::from_json(
            r#"{
                "resolution": [64, 64, 64],
                "domain_width": 1.0,
                "emitters": [
                    {"kind": "volume", "shape": {"type": "box", "min": [0.0, 0.0, 0.0], "max": [0.2, 0.8, 1.0]}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.solver, SolverKind::Flip);
        assert_eq!(config.gravity, [0.0, -9.8, 0.0]);
        assert_eq!(config.fps, 60.0);
        assert!((config.grid_spacing() - 1.0 / 64.0).abs() < 1e-12);
        assert_eq!(config.build_particle_emitters().unwrap().len(), 1);
    }

    #[test]
    fn bad_configs_are_rejected() {
        assert!(SceneConfig::from_json(r#"{"resolution": [0, 4, 4], "domain_width": 1.0}"#).is_err());
        assert!(SceneConfig::from_json(r#"{"resolution": [4, 4, 4], "domain_width": -2.0}"#).is_err());
        let high_friction = r#"{
            "resolution": [4, 4, 4],
            "domain_width": 1.0,
            "colliders": [{"shape": {"type": "sphere", "center": [0.5, 0.5, 0.5], "radius": 0.1}, "friction": 1.5}]
        }"#;
        assert!(SceneConfig::from_json(high_friction).is_err());
    }

    #[test]
    fn solver_kind_round_trips_through_names() {
        use std::str::FromStr;
        assert_eq!(SolverKind::from_str("apic").unwrap(), SolverKind::Apic);
        assert_eq!(SolverKind::PciSph.to_string(), "pci_sph");
    }
}
