use super::{Point3, Vec3};
use cgmath::EuclideanSpace;

/// Axis-aligned bounding box with inclusive corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb3 {
    pub lower_corner: Point3,
    pub upper_corner: Point3,
}

impl Aabb3 {
    pub fn new(lower_corner: Point3, upper_corner: Point3) -> Self {
        Aabb3 {
            lower_corner,
            upper_corner,
        }
    }

    pub fn from_points(points: &[Point3]) -> Self {
        let mut aabb = Aabb3 {
            lower_corner: cgmath::point3(f64::MAX, f64::MAX, f64::MAX),
            upper_corner: cgmath::point3(f64::MIN, f64::MIN, f64::MIN),
        };
        for p in points {
            aabb.merge_point(*p);
        }
        aabb
    }

    pub fn extent(&self) -> Vec3 {
        self.upper_corner - self.lower_corner
    }

    pub fn mid_point(&self) -> Point3 {
        self.lower_corner.midpoint(self.upper_corner)
    }

    pub fn contains(&self, p: Point3) -> bool {
        p.x >= self.lower_corner.x
            && p.x <= self.upper_corner.x
            && p.y >= self.lower_corner.y
            && p.y <= self.upper_corner.y
            && p.z >= self.lower_corner.z
            && p.z <= self.upper_corner.z
    }

    pub fn merge_point(&mut self, p: Point3) {
        self.lower_corner.x = self.lower_corner.x.min(p.x);
        self.lower_corner.y = self.lower_corner.y.min(p.y);
        self.lower_corner.z = self.lower_corner.z.min(p.z);
        self.upper_corner.x = self.upper_corner.x.max(p.x);
        self.upper_corner.y = self.upper_corner.y.max(p.y);
        self.upper_corner.z = self.upper_corner.z.max(p.z);
    }

    pub fn expanded(&self, delta: f64) -> Aabb3 {
        Aabb3 {
            lower_corner: self.lower_corner - Vec3::new(delta, delta, delta),
            upper_corner: self.upper_corner + Vec3::new(delta, delta, delta),
        }
    }

    pub fn clamp(&self, p: Point3) -> Point3 {
        cgmath::point3(
            p.x.max(self.lower_corner.x).min(self.upper_corner.x),
            p.y.max(self.lower_corner.y).min(self.upper_corner.y),
            p.z.max(self.lower_corner.z).min(self.upper_corner.z),
        )
    }

    /// Corner in x-fastest bit order (bit 0 = +x, bit 1 = +y, bit 2 = +z).
    pub fn corner(&self, idx: usize) -> Point3 {
        cgmath::point3(
            if idx & 1 == 0 { self.lower_corner.x } else { self.upper_corner.x },
            if idx & 2 == 0 { self.lower_corner.y } else { self.upper_corner.y },
            if idx & 4 == 0 { self.lower_corner.z } else { self.upper_corner.z },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_and_contains() {
        let aabb = Aabb3::from_points(&[
            cgmath::point3(0.0, 1.0, 2.0),
            cgmath::point3(-1.0, 4.0, 0.5),
        ]);
        assert_eq!(aabb.lower_corner, cgmath::point3(-1.0, 1.0, 0.5));
        assert_eq!(aabb.upper_corner, cgmath::point3(0.0, 4.0, 2.0));
        assert!(aabb.contains(cgmath::point3(-0.5, 2.0, 1.0)));
        assert!(!aabb.contains(cgmath::point3(-0.5, 0.0, 1.0)));
    }

    #[test]
    fn corners_follow_bit_order() {
        let aabb = Aabb3::new(cgmath::point3(0.0, 0.0, 0.0), cgmath::point3(1.0, 2.0, 3.0));
        assert_eq!(aabb.corner(0), cgmath::point3(0.0, 0.0, 0.0));
        assert_eq!(aabb.corner(1), cgmath::point3(1.0, 0.0, 0.0));
        assert_eq!(aabb.corner(6), cgmath::point3(0.0, 2.0, 3.0));
        assert_eq!(aabb.corner(7), cgmath::point3(1.0, 2.0, 3.0));
    }
}
