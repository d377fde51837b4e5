mod marching_cubes;
pub(crate) mod tables;

pub use marching_cubes::marching_cubes;

pub use crate::math::{Direction, DirectionFlags};
use crate::math::{Point3, Vec3};
use std::io::Write;

/// Indexed triangle mesh with per-vertex normals and (empty) UVs.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh {
    pub points: Vec<Point3>,
    pub normals: Vec<Vec3>,
    pub uvs: Vec<[f64; 2]>,
    pub triangles: Vec<[usize; 3]>,
}

impl TriangleMesh {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn clear(&mut self) {
        self.points.clear();
        self.normals.clear();
        self.uvs.clear();
        self.triangles.clear();
    }

    pub fn number_of_points(&self) -> usize {
        self.points.len()
    }

    pub fn number_of_triangles(&self) -> usize {
        self.triangles.len()
    }

    pub fn add_point_normal_uv(&mut self, point: Point3, normal: Vec3, uv: [f64; 2]) -> usize {
        self.points.push(point);
        self.normals.push(normal);
        self.uvs.push(uv);
        self.points.len() - 1
    }

    pub fn add_triangle(&mut self, triangle: [usize; 3]) {
        self.triangles.push(triangle);
    }

    /// Summed area of all triangles.
    pub fn area(&self) -> f64 {
        use cgmath::InnerSpace;
        self.triangles
            .iter()
            .map(|t| {
                let a = self.points[t[0]];
                let b = self.points[t[1]];
                let c = self.points[t[2]];
                0.5 * (b - a).cross(c - a).magnitude()
            })
            .sum()
    }

    /// Wavefront OBJ with positions and normals; faces reference both.
    pub fn write_obj<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for p in &self.points {
            writeln!(writer, "v {} {} {}", p.x, p.y, p.z)?;
        }
        for n in &self.normals {
            writeln!(writer, "vn {} {} {}", n.x, n.y, n.z)?;
        }
        for t in &self.triangles {
            writeln!(
                writer,
                "f {}//{} {}//{} {}//{}",
                t[0] + 1,
                t[0] + 1,
                t[1] + 1,
                t[1] + 1,
                t[2] + 1,
                t[2] + 1
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_of_unit_right_triangle() {
        let mut mesh = TriangleMesh::new();
        let n = Vec3::new(0.0, 0.0, 1.0);
        mesh.add_point_normal_uv(cgmath::point3(0.0, 0.0, 0.0), n, [0.0, 0.0]);
        mesh.add_point_normal_uv(cgmath::point3(1.0, 0.0, 0.0), n, [0.0, 0.0]);
        mesh.add_point_normal_uv(cgmath::point3(0.0, 1.0, 0.0), n, [0.0, 0.0]);
        mesh.add_triangle([0, 1, 2]);
        assert!((mesh.area() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn obj_output_is_one_indexed() {
        let mut mesh = TriangleMesh::new();
        let n = Vec3::new(0.0, 1.0, 0.0);
        mesh.add_point_normal_uv(cgmath::point3(0.0, 0.0, 0.0), n, [0.0, 0.0]);
        mesh.add_point_normal_uv(cgmath::point3(1.0, 0.0, 0.0), n, [0.0, 0.0]);
        mesh.add_point_normal_uv(cgmath::point3(0.0, 0.0, 1.0), n, [0.0, 0.0]);
        mesh.add_triangle([0, 1, 2]);
        let mut out = Vec::new();
        mesh.write_obj(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("f 1//1 2//2 3//3"));
    }
}
