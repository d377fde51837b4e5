use crate::math::{Aabb3, Point3, Vec3};
use cgmath::{EuclideanSpace, InnerSpace};
use std::sync::Arc;

/// Implicit geometry: signed distance plus enough surface queries for
/// collision handling. Negative inside.
pub trait ImplicitSurface: Send + Sync {
    fn signed_distance(&self, p: Point3) -> f64;
    fn closest_point(&self, p: Point3) -> Point3;
    fn closest_normal(&self, p: Point3) -> Vec3;
    fn bounding_box(&self) -> Aabb3;
}

pub type SurfaceHandle = Arc<dyn ImplicitSurface>;

pub struct Sphere {
    pub center: Point3,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: Point3, radius: f64) -> Self {
        Sphere { center, radius }
    }
}

impl ImplicitSurface for Sphere {
    fn signed_distance(&self, p: Point3) -> f64 {
        (p - self.center).magnitude() - self.radius
    }

    fn closest_point(&self, p: Point3) -> Point3 {
        self.center + self.closest_normal(p) * self.radius
    }

    fn closest_normal(&self, p: Point3) -> Vec3 {
        let d = p - self.center;
        if d.magnitude2() > 0.0 {
            d.normalize()
        } else {
            Vec3::new(0.0, 1.0, 0.0)
        }
    }

    fn bounding_box(&self) -> Aabb3 {
        let r = Vec3::new(self.radius, self.radius, self.radius);
        Aabb3::new(self.center - r, self.center + r)
    }
}

/// Axis-aligned solid box.
pub struct BoxSurface {
    pub bound: Aabb3,
}

impl BoxSurface {
    pub fn new(bound: Aabb3) -> Self {
        BoxSurface { bound }
    }
}

impl ImplicitSurface for BoxSurface {
    fn signed_distance(&self, p: Point3) -> f64 {
        let c = self.bound.mid_point();
        let half = 0.5 * self.bound.extent();
        let q = Vec3::new(
            (p.x - c.x).abs() - half.x,
            (p.y - c.y).abs() - half.y,
            (p.z - c.z).abs() - half.z,
        );
        let outside = Vec3::new(q.x.max(0.0), q.y.max(0.0), q.z.max(0.0)).magnitude();
        let inside = q.x.max(q.y).max(q.z).min(0.0);
        outside + inside
    }

    fn closest_point(&self, p: Point3) -> Point3 {
        if self.signed_distance(p) > 0.0 {
            return self.bound.clamp(p);
        }
        // push to the nearest face from inside
        let n = self.closest_normal(p);
        let d = self.signed_distance(p);
        p - n * d
    }

    fn closest_normal(&self, p: Point3) -> Vec3 {
        let c = self.bound.mid_point();
        let half = 0.5 * self.bound.extent();
        if self.signed_distance(p) > 0.0 {
            let cp = self.bound.clamp(p);
            let d = p - cp;
            if d.magnitude2() > 0.0 {
                return d.normalize();
            }
        }
        // inside (or on a face): the axis with the smallest remaining
        // distance to a face wins
        let dist = Vec3::new(
            half.x - (p.x - c.x).abs(),
            half.y - (p.y - c.y).abs(),
            half.z - (p.z - c.z).abs(),
        );
        if dist.x <= dist.y && dist.x <= dist.z {
            Vec3::new((p.x - c.x).signum(), 0.0, 0.0)
        } else if dist.y <= dist.z {
            Vec3::new(0.0, (p.y - c.y).signum(), 0.0)
        } else {
            Vec3::new(0.0, 0.0, (p.z - c.z).signum())
        }
    }

    fn bounding_box(&self) -> Aabb3 {
        self.bound
    }
}

/// Half space below/behind the plane along its normal. Unbounded; the
/// bounding box is clamped to a large constant.
pub struct Plane {
    pub point: Point3,
    pub normal: Vec3,
}

impl Plane {
    pub fn new(point: Point3, normal: Vec3) -> Self {
        Plane {
            point,
            normal: normal.normalize(),
        }
    }
}

const PLANE_EXTENT: f64 = 1e9;

impl ImplicitSurface for Plane {
    fn signed_distance(&self, p: Point3) -> f64 {
        (p - self.point).dot(self.normal)
    }

    fn closest_point(&self, p: Point3) -> Point3 {
        p - self.normal * self.signed_distance(p)
    }

    fn closest_normal(&self, _p: Point3) -> Vec3 {
        self.normal
    }

    fn bounding_box(&self) -> Aabb3 {
        Aabb3::new(
            cgmath::point3(-PLANE_EXTENT, -PLANE_EXTENT, -PLANE_EXTENT),
            cgmath::point3(PLANE_EXTENT, PLANE_EXTENT, PLANE_EXTENT),
        )
    }
}

/// Min-union of surfaces.
pub struct ImplicitSurfaceSet {
    pub surfaces: Vec<SurfaceHandle>,
}

impl ImplicitSurfaceSet {
    pub fn new(surfaces: Vec<SurfaceHandle>) -> Self {
        ImplicitSurfaceSet { surfaces }
    }

    fn closest(&self, p: Point3) -> Option<&SurfaceHandle> {
        self.surfaces.iter().min_by(|a, b| {
            a.signed_distance(p)
                .partial_cmp(&b.signed_distance(p))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

impl ImplicitSurface for ImplicitSurfaceSet {
    fn signed_distance(&self, p: Point3) -> f64 {
        self.surfaces
            .iter()
            .map(|s| s.signed_distance(p))
            .fold(f64::MAX, f64::min)
    }

    fn closest_point(&self, p: Point3) -> Point3 {
        self.closest(p).map(|s| s.closest_point(p)).unwrap_or(p)
    }

    fn closest_normal(&self, p: Point3) -> Vec3 {
        self.closest(p)
            .map(|s| s.closest_normal(p))
            .unwrap_or(Vec3::new(0.0, 1.0, 0.0))
    }

    fn bounding_box(&self) -> Aabb3 {
        let mut bound = Aabb3::new(
            cgmath::point3(f64::MAX, f64::MAX, f64::MAX),
            cgmath::point3(f64::MIN, f64::MIN, f64::MIN),
        );
        for s in &self.surfaces {
            let b = s.bounding_box();
            bound.merge_point(b.lower_corner);
            bound.merge_point(b.upper_corner);
        }
        bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sphere_distance_and_normal() {
        let s = Sphere::new(cgmath::point3(0.0, 0.0, 0.0), 1.0);
        assert_relative_eq!(s.signed_distance(cgmath::point3(2.0, 0.0, 0.0)), 1.0);
        assert_relative_eq!(s.signed_distance(cgmath::point3(0.5, 0.0, 0.0)), -0.5);
        assert_eq!(s.closest_normal(cgmath::point3(2.0, 0.0, 0.0)), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(s.closest_point(cgmath::point3(2.0, 0.0, 0.0)), cgmath::point3(1.0, 0.0, 0.0));
    }

    #[test]
    fn box_distance_inside_and_outside() {
        let b = BoxSurface::new(Aabb3::new(cgmath::point3(0.0, 0.0, 0.0), cgmath::point3(1.0, 1.0, 1.0)));
        assert_relative_eq!(b.signed_distance(cgmath::point3(0.5, 0.5, 0.5)), -0.5);
        assert_relative_eq!(b.signed_distance(cgmath::point3(2.0, 0.5, 0.5)), 1.0);
        // corner distance
        assert_relative_eq!(
            b.signed_distance(cgmath::point3(2.0, 2.0, 0.5)),
            std::f64::consts::SQRT_2
        );
        assert_eq!(
            b.closest_normal(cgmath::point3(0.9, 0.5, 0.5)),
            Vec3::new(1.0, 0.0, 0.0)
        );
    }

    #[test]
    fn plane_half_space() {
        let p = Plane::new(cgmath::point3(0.0, 1.0, 0.0), Vec3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(p.signed_distance(cgmath::point3(5.0, 3.0, 2.0)), 2.0);
        assert_relative_eq!(p.signed_distance(cgmath::point3(0.0, 0.0, 0.0)), -1.0);
    }

    #[test]
    fn set_takes_the_minimum() {
        let set = ImplicitSurfaceSet::new(vec![
            Arc::new(Sphere::new(cgmath::point3(0.0, 0.0, 0.0), 1.0)) as SurfaceHandle,
            Arc::new(Sphere::new(cgmath::point3(3.0, 0.0, 0.0), 1.0)) as SurfaceHandle,
        ]);
        assert_relative_eq!(set.signed_distance(cgmath::point3(2.5, 0.0, 0.0)), -0.5);
        assert_relative_eq!(set.signed_distance(cgmath::point3(1.5, 0.0, 0.0)), 0.5);
    }
}
