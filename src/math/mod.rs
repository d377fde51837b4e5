mod aabb;
mod direction;
mod interpolation;

pub use aabb::Aabb3;
pub use direction::{Direction, DirectionFlags};
pub use interpolation::*;

/// All solver-visible scalars are f64; f32 only appears at serialization /
/// renderer interop boundaries.
pub type Vec3 = cgmath::Vector3<f64>;
pub type Point3 = cgmath::Point3<f64>;
pub type Mat3 = cgmath::Matrix3<f64>;
pub type Size3 = cgmath::Vector3<usize>;

pub fn size3(x: usize, y: usize, z: usize) -> Size3 {
    cgmath::vec3(x, y, z)
}

pub fn clamp(x: f64, low: f64, high: f64) -> f64 {
    x.max(low).min(high)
}

pub fn square(x: f64) -> f64 {
    x * x
}

pub fn cube(x: f64) -> f64 {
    x * x * x
}
