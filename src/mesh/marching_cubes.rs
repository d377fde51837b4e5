use super::tables::*;
use super::{Direction, DirectionFlags, TriangleMesh};
use crate::grid::Array3;
use crate::levelset::distance_to_zero_level_set;
use crate::math::{clamp, Aabb3, Point3, Size3, Vec3};
use cgmath::InnerSpace;
use std::collections::HashMap;

type VertexMap = HashMap<usize, usize>;

/// Maps cube-local edges into doubled-coordinate global ids so that shared
/// edge vertices merge exactly across neighboring cubes.
///
///  v  edge   v
///  |----*----|   ->   |-----|-----|
///  i        i+1      2i   2i+1  2i+2
const EDGE_OFFSET_3D: [[usize; 3]; 12] = [
    [1, 0, 0], [2, 0, 1], [1, 0, 2], [0, 0, 1],
    [1, 2, 0], [2, 2, 1], [1, 2, 2], [0, 2, 1],
    [0, 1, 0], [2, 1, 0], [2, 1, 2], [0, 1, 2],
];

const VERTEX_OFFSET_3D: [[usize; 3]; 8] = [
    [0, 0, 0], [2, 0, 0], [2, 0, 2], [0, 0, 2],
    [0, 2, 0], [2, 2, 0], [2, 2, 2], [0, 2, 2],
];

fn global_edge_id(i: usize, j: usize, k: usize, dim: Size3, local_edge: usize) -> usize {
    let off = EDGE_OFFSET_3D[local_edge];
    ((2 * k + off[2]) * 2 * dim.y + (2 * j + off[1])) * 2 * dim.x + (2 * i + off[0])
}

fn global_vertex_id(i: usize, j: usize, k: usize, dim: Size3, local_vertex: usize) -> usize {
    let off = VERTEX_OFFSET_3D[local_vertex];
    ((2 * k + off[2]) * 2 * dim.y + (2 * j + off[1])) * 2 * dim.x + (2 * i + off[0])
}

/// Central-difference gradient with clamped indices at the data boundary.
fn grad(grid: &Array3<f64>, i: usize, j: usize, k: usize, inv_spacing: Vec3) -> Vec3 {
    let dim = grid.size();
    let ip = (i + 1).min(dim.x - 1);
    let im = i.saturating_sub(1);
    let jp = (j + 1).min(dim.y - 1);
    let jm = j.saturating_sub(1);
    let kp = (k + 1).min(dim.z - 1);
    let km = k.saturating_sub(1);
    Vec3::new(
        0.5 * inv_spacing.x * (grid[(ip, j, k)] - grid[(im, j, k)]),
        0.5 * inv_spacing.y * (grid[(i, jp, k)] - grid[(i, jm, k)]),
        0.5 * inv_spacing.z * (grid[(i, j, kp)] - grid[(i, j, km)]),
    )
}

fn safe_normalize(n: Vec3) -> Vec3 {
    if n.magnitude2() > 0.0 {
        n.normalize()
    } else {
        n
    }
}

fn emit_vertex(
    mesh: &mut TriangleMesh,
    vertex_map: &mut VertexMap,
    key: usize,
    position: Point3,
    normal: Vec3,
) -> usize {
    if let Some(id) = vertex_map.get(&key) {
        return *id;
    }
    let id = mesh.add_point_normal_uv(position, normal, [0.0, 0.0]);
    vertex_map.insert(key, id);
    id
}

#[allow(clippy::too_many_arguments)]
fn single_cube(
    data: &[f64; 8],
    edge_ids: &[usize; 12],
    normals: &[Vec3; 8],
    bound: &Aabb3,
    vertex_map: &mut VertexMap,
    mesh: &mut TriangleMesh,
    iso_value: f64,
) {
    let mut flag_index = 0usize;
    for (v, value) in data.iter().enumerate() {
        if *value <= iso_value {
            flag_index |= 1 << v;
        }
    }
    if flag_index == 0 || flag_index == 255 {
        return;
    }

    let edge_flags = CUBE_EDGE_FLAGS[flag_index];
    let mut e = [cgmath::point3(0.0, 0.0, 0.0); 12];
    let mut n = [Vec3::new(0.0, 0.0, 0.0); 12];

    for edge in 0..12 {
        if edge_flags & (1 << edge) == 0 {
            continue;
        }
        let v0 = EDGE_CONNECTION[edge][0];
        let v1 = EDGE_CONNECTION[edge][1];

        // cube vertex ordering to x-major corner ordering
        const INDEX_MAP: [usize; 8] = [0, 1, 5, 4, 2, 3, 7, 6];
        let pos0 = bound.corner(INDEX_MAP[v0]);
        let pos1 = bound.corner(INDEX_MAP[v1]);

        let phi0 = data[v0] - iso_value;
        let phi1 = data[v1] - iso_value;
        let alpha = clamp(distance_to_zero_level_set(phi0, phi1), 0.000001, 0.999999);

        e[edge] = cgmath::point3(
            (1.0 - alpha) * pos0.x + alpha * pos1.x,
            (1.0 - alpha) * pos0.y + alpha * pos1.y,
            (1.0 - alpha) * pos0.z + alpha * pos1.z,
        );
        n[edge] = (1.0 - alpha) * normals[v0] + alpha * normals[v1];
    }

    let row = &TRIANGLE_CONNECTION_TABLE_3D[flag_index];
    for tri in 0..5 {
        if row[3 * tri] < 0 {
            break;
        }
        let mut face = [0usize; 3];
        for (slot, face_id) in face.iter_mut().enumerate() {
            let edge = row[3 * tri + slot] as usize;
            *face_id = emit_vertex(
                mesh,
                vertex_map,
                edge_ids[edge],
                e[edge],
                safe_normalize(n[edge]),
            );
        }
        mesh.add_triangle(face);
    }
}

#[allow(clippy::too_many_arguments)]
fn single_square(
    data: &[f64; 4],
    vert_and_edge_ids: &[usize; 8],
    normal: Vec3,
    corners: &[Point3; 4],
    vertex_map: &mut VertexMap,
    mesh: &mut TriangleMesh,
    iso_value: f64,
) {
    let mut flag_index = 0usize;
    for (v, value) in data.iter().enumerate() {
        if *value <= iso_value {
            flag_index |= 1 << v;
        }
    }
    if flag_index == 0 {
        return;
    }

    let edge_flags = SQUARE_EDGE_FLAGS[flag_index];
    let mut e = [cgmath::point3(0.0, 0.0, 0.0); 4];

    for edge in 0..4 {
        if edge_flags & (1 << edge) == 0 {
            continue;
        }
        let v0 = EDGE_CONNECTION_2D[edge][0];
        let v1 = EDGE_CONNECTION_2D[edge][1];
        let pos0 = corners[v0];
        let pos1 = corners[v1];
        let phi0 = data[v0] - iso_value;
        let phi1 = data[v1] - iso_value;

        let alpha = if phi0.abs() + phi1.abs() > 1e-12 {
            clamp(phi0.abs() / (phi0.abs() + phi1.abs()), 0.000001, 0.999999)
        } else {
            0.5
        };

        e[edge] = cgmath::point3(
            (1.0 - alpha) * pos0.x + alpha * pos1.x,
            (1.0 - alpha) * pos0.y + alpha * pos1.y,
            (1.0 - alpha) * pos0.z + alpha * pos1.z,
        );
    }

    let row = &TRIANGLE_CONNECTION_TABLE_2D[flag_index];
    for tri in 0..4 {
        if row[3 * tri] < 0 {
            break;
        }
        let mut face = [0usize; 3];
        for (slot, face_id) in face.iter_mut().enumerate() {
            let idx = row[3 * tri + slot] as usize;
            let position = if idx < 4 { corners[idx] } else { e[idx - 4] };
            *face_id = emit_vertex(mesh, vertex_map, vert_and_edge_ids[idx], position, normal);
        }
        mesh.add_triangle(face);
    }
}

/// Extracts the `iso_value` surface of a sampled scalar field as a triangle
/// mesh. `bnd_close` requests flat closing patches on the named domain
/// faces; `bnd_connectivity` controls which of those patches share mesh
/// vertices with the interior surface.
pub fn marching_cubes(
    grid: &Array3<f64>,
    spacing: Vec3,
    origin: Point3,
    iso_value: f64,
    bnd_close: DirectionFlags,
    bnd_connectivity: DirectionFlags,
) -> TriangleMesh {
    let mut mesh = TriangleMesh::new();
    let mut vertex_map = VertexMap::new();

    let dim = grid.size();
    if dim.x < 2 || dim.y < 2 || dim.z < 2 {
        return mesh;
    }
    let inv_spacing = Vec3::new(1.0 / spacing.x, 1.0 / spacing.y, 1.0 / spacing.z);

    let pos = |i: usize, j: usize, k: usize| -> Point3 {
        cgmath::point3(
            origin.x + spacing.x * i as f64,
            origin.y + spacing.y * j as f64,
            origin.z + spacing.z * k as f64,
        )
    };

    for k in 0..dim.z - 1 {
        for j in 0..dim.y - 1 {
            for i in 0..dim.x - 1 {
                // cube vertex layout: 0..3 on the lower y slab (x-z loop),
                // 4..7 above
                let data = [
                    grid[(i, j, k)],
                    grid[(i + 1, j, k)],
                    grid[(i + 1, j, k + 1)],
                    grid[(i, j, k + 1)],
                    grid[(i, j + 1, k)],
                    grid[(i + 1, j + 1, k)],
                    grid[(i + 1, j + 1, k + 1)],
                    grid[(i, j + 1, k + 1)],
                ];
                // the liquid surface faces opposite the SDF gradient
                let normals = [
                    -grad(grid, i, j, k, inv_spacing),
                    -grad(grid, i + 1, j, k, inv_spacing),
                    -grad(grid, i + 1, j, k + 1, inv_spacing),
                    -grad(grid, i, j, k + 1, inv_spacing),
                    -grad(grid, i, j + 1, k, inv_spacing),
                    -grad(grid, i + 1, j + 1, k, inv_spacing),
                    -grad(grid, i + 1, j + 1, k + 1, inv_spacing),
                    -grad(grid, i, j + 1, k + 1, inv_spacing),
                ];
                let mut edge_ids = [0usize; 12];
                for (edge, id) in edge_ids.iter_mut().enumerate() {
                    *id = global_edge_id(i, j, k, dim, edge);
                }
                let bound = Aabb3::new(pos(i, j, k), pos(i + 1, j + 1, k + 1));

                single_cube(&data, &edge_ids, &normals, &bound, &mut vertex_map, &mut mesh, iso_value);
            }
        }
    }

    // flat patches closing the requested domain faces, marched in 2D

    if bnd_close.intersects(Direction::Back | Direction::Front) {
        let mut map_back = VertexMap::new();
        let mut map_front = VertexMap::new();

        for j in 0..dim.y - 1 {
            for i in 0..dim.x - 1 {
                let k = 0;
                if bnd_close.contains(Direction::Back) {
                    let data = [
                        grid[(i + 1, j, k)],
                        grid[(i, j, k)],
                        grid[(i, j + 1, k)],
                        grid[(i + 1, j + 1, k)],
                    ];
                    let ids = [
                        global_vertex_id(i, j, k, dim, 1),
                        global_vertex_id(i, j, k, dim, 0),
                        global_vertex_id(i, j, k, dim, 4),
                        global_vertex_id(i, j, k, dim, 5),
                        global_edge_id(i, j, k, dim, 0),
                        global_edge_id(i, j, k, dim, 8),
                        global_edge_id(i, j, k, dim, 4),
                        global_edge_id(i, j, k, dim, 9),
                    ];
                    let corners = [pos(i + 1, j, k), pos(i, j, k), pos(i, j + 1, k), pos(i + 1, j + 1, k)];
                    let map = if bnd_connectivity.contains(Direction::Back) {
                        &mut vertex_map
                    } else {
                        &mut map_back
                    };
                    single_square(&data, &ids, Vec3::new(0.0, 0.0, -1.0), &corners, map, &mut mesh, iso_value);
                }

                let k = dim.z - 2;
                if bnd_close.contains(Direction::Front) {
                    let data = [
                        grid[(i, j, k + 1)],
                        grid[(i + 1, j, k + 1)],
                        grid[(i + 1, j + 1, k + 1)],
                        grid[(i, j + 1, k + 1)],
                    ];
                    let ids = [
                        global_vertex_id(i, j, k, dim, 3),
                        global_vertex_id(i, j, k, dim, 2),
                        global_vertex_id(i, j, k, dim, 6),
                        global_vertex_id(i, j, k, dim, 7),
                        global_edge_id(i, j, k, dim, 2),
                        global_edge_id(i, j, k, dim, 10),
                        global_edge_id(i, j, k, dim, 6),
                        global_edge_id(i, j, k, dim, 11),
                    ];
                    let corners = [
                        pos(i, j, k + 1),
                        pos(i + 1, j, k + 1),
                        pos(i + 1, j + 1, k + 1),
                        pos(i, j + 1, k + 1),
                    ];
                    let map = if bnd_connectivity.contains(Direction::Front) {
                        &mut vertex_map
                    } else {
                        &mut map_front
                    };
                    single_square(&data, &ids, Vec3::new(0.0, 0.0, 1.0), &corners, map, &mut mesh, iso_value);
                }
            }
        }
    }

    if bnd_close.intersects(Direction::Left | Direction::Right) {
        let mut map_left = VertexMap::new();
        let mut map_right = VertexMap::new();

        for k in 0..dim.z - 1 {
            for j in 0..dim.y - 1 {
                let i = 0;
                if bnd_close.contains(Direction::Left) {
                    let data = [
                        grid[(i, j, k)],
                        grid[(i, j, k + 1)],
                        grid[(i, j + 1, k + 1)],
                        grid[(i, j + 1, k)],
                    ];
                    let ids = [
                        global_vertex_id(i, j, k, dim, 0),
                        global_vertex_id(i, j, k, dim, 3),
                        global_vertex_id(i, j, k, dim, 7),
                        global_vertex_id(i, j, k, dim, 4),
                        global_edge_id(i, j, k, dim, 3),
                        global_edge_id(i, j, k, dim, 11),
                        global_edge_id(i, j, k, dim, 7),
                        global_edge_id(i, j, k, dim, 8),
                    ];
                    let corners = [pos(i, j, k), pos(i, j, k + 1), pos(i, j + 1, k + 1), pos(i, j + 1, k)];
                    let map = if bnd_connectivity.contains(Direction::Left) {
                        &mut vertex_map
                    } else {
                        &mut map_left
                    };
                    single_square(&data, &ids, Vec3::new(-1.0, 0.0, 0.0), &corners, map, &mut mesh, iso_value);
                }

                let i = dim.x - 2;
                if bnd_close.contains(Direction::Right) {
                    let data = [
                        grid[(i + 1, j, k + 1)],
                        grid[(i + 1, j, k)],
                        grid[(i + 1, j + 1, k)],
                        grid[(i + 1, j + 1, k + 1)],
                    ];
                    let ids = [
                        global_vertex_id(i, j, k, dim, 2),
                        global_vertex_id(i, j, k, dim, 1),
                        global_vertex_id(i, j, k, dim, 5),
                        global_vertex_id(i, j, k, dim, 6),
                        global_edge_id(i, j, k, dim, 1),
                        global_edge_id(i, j, k, dim, 9),
                        global_edge_id(i, j, k, dim, 5),
                        global_edge_id(i, j, k, dim, 10),
                    ];
                    let corners = [
                        pos(i + 1, j, k + 1),
                        pos(i + 1, j, k),
                        pos(i + 1, j + 1, k),
                        pos(i + 1, j + 1, k + 1),
                    ];
                    let map = if bnd_connectivity.contains(Direction::Right) {
                        &mut vertex_map
                    } else {
                        &mut map_right
                    };
                    single_square(&data, &ids, Vec3::new(1.0, 0.0, 0.0), &corners, map, &mut mesh, iso_value);
                }
            }
        }
    }

    if bnd_close.intersects(Direction::Down | Direction::Up) {
        let mut map_down = VertexMap::new();
        let mut map_up = VertexMap::new();

        for k in 0..dim.z - 1 {
            for i in 0..dim.x - 1 {
                let j = 0;
                if bnd_close.contains(Direction::Down) {
                    let data = [
                        grid[(i, j, k)],
                        grid[(i + 1, j, k)],
                        grid[(i + 1, j, k + 1)],
                        grid[(i, j, k + 1)],
                    ];
                    let ids = [
                        global_vertex_id(i, j, k, dim, 0),
                        global_vertex_id(i, j, k, dim, 1),
                        global_vertex_id(i, j, k, dim, 2),
                        global_vertex_id(i, j, k, dim, 3),
                        global_edge_id(i, j, k, dim, 0),
                        global_edge_id(i, j, k, dim, 1),
                        global_edge_id(i, j, k, dim, 2),
                        global_edge_id(i, j, k, dim, 3),
                    ];
                    let corners = [pos(i, j, k), pos(i + 1, j, k), pos(i + 1, j, k + 1), pos(i, j, k + 1)];
                    let map = if bnd_connectivity.contains(Direction::Down) {
                        &mut vertex_map
                    } else {
                        &mut map_down
                    };
                    single_square(&data, &ids, Vec3::new(0.0, -1.0, 0.0), &corners, map, &mut mesh, iso_value);
                }

                let j = dim.y - 2;
                if bnd_close.contains(Direction::Up) {
                    let data = [
                        grid[(i + 1, j + 1, k)],
                        grid[(i, j + 1, k)],
                        grid[(i, j + 1, k + 1)],
                        grid[(i + 1, j + 1, k + 1)],
                    ];
                    let ids = [
                        global_vertex_id(i, j, k, dim, 5),
                        global_vertex_id(i, j, k, dim, 4),
                        global_vertex_id(i, j, k, dim, 7),
                        global_vertex_id(i, j, k, dim, 6),
                        global_edge_id(i, j, k, dim, 4),
                        global_edge_id(i, j, k, dim, 7),
                        global_edge_id(i, j, k, dim, 6),
                        global_edge_id(i, j, k, dim, 5),
                    ];
                    let corners = [
                        pos(i + 1, j + 1, k),
                        pos(i, j + 1, k),
                        pos(i, j + 1, k + 1),
                        pos(i + 1, j + 1, k + 1),
                    ];
                    let map = if bnd_connectivity.contains(Direction::Up) {
                        &mut vertex_map
                    } else {
                        &mut map_up
                    };
                    single_square(&data, &ids, Vec3::new(0.0, 1.0, 0.0), &corners, map, &mut mesh, iso_value);
                }
            }
        }
    }

    mesh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::size3;
    use cgmath::MetricSpace;
    use enumflags2::BitFlags;

    fn sphere_sdf(n: usize, radius: f64) -> (Array3<f64>, Vec3, Point3) {
        let h = 1.0 / (n - 1) as f64;
        let center = cgmath::point3(0.5, 0.5, 0.5);
        let mut grid = Array3::new(size3(n, n, n), 0.0);
        grid.par_fill_with(|i, j, k| {
            let p = cgmath::point3(i as f64 * h, j as f64 * h, k as f64 * h);
            p.distance(center) - radius
        });
        (grid, Vec3::new(h, h, h), cgmath::point3(0.0, 0.0, 0.0))
    }

    #[test]
    fn sphere_area_converges() {
        let radius = 0.3;
        let (grid, spacing, origin) = sphere_sdf(65, radius);
        let mesh = marching_cubes(&grid, spacing, origin, 0.0, BitFlags::empty(), BitFlags::empty());
        assert!(mesh.number_of_triangles() > 0);

        let expected = 4.0 * std::f64::consts::PI * radius * radius;
        let area = mesh.area();
        assert!(
            (area - expected).abs() < 0.03 * expected,
            "area {} vs analytic {}",
            area,
            expected
        );
    }

    #[test]
    fn shared_vertices_are_merged() {
        let (grid, spacing, origin) = sphere_sdf(17, 0.3);
        let mesh = marching_cubes(&grid, spacing, origin, 0.0, BitFlags::empty(), BitFlags::empty());
        // every triangle edge is shared by exactly two triangles on a closed
        // surface, which only holds if vertices were merged by edge id
        use std::collections::HashMap;
        let mut edge_count: HashMap<(usize, usize), usize> = HashMap::new();
        for t in &mesh.triangles {
            for (a, b) in [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])] {
                let key = (a.min(b), a.max(b));
                *edge_count.entry(key).or_insert(0) += 1;
            }
        }
        for (edge, count) in edge_count {
            assert_eq!(count, 2, "edge {:?} not manifold", edge);
        }
    }

    #[test]
    fn vertices_sit_on_the_zero_isocontour() {
        let radius = 0.25;
        let (grid, spacing, origin) = sphere_sdf(33, radius);
        let mesh = marching_cubes(&grid, spacing, origin, 0.0, BitFlags::empty(), BitFlags::empty());
        let center = cgmath::point3(0.5, 0.5, 0.5);
        for p in &mesh.points {
            let d = (p.distance(center) - radius).abs();
            assert!(d < spacing.x, "vertex {:?} off-surface by {}", p, d);
        }
    }

    #[test]
    fn plane_through_half_domain_closes_against_walls() {
        // water fills y < 0.5; closing all faces makes a watertight box
        let n = 9;
        let h = 1.0 / (n - 1) as f64;
        let mut grid = Array3::new(size3(n, n, n), 0.0);
        grid.par_fill_with(|_, j, _| j as f64 * h - 0.5);
        let mesh = marching_cubes(
            &grid,
            Vec3::new(h, h, h),
            cgmath::point3(0.0, 0.0, 0.0),
            0.0,
            BitFlags::all(),
            BitFlags::all(),
        );
        // surface area: top plane 1.0, bottom 1.0, four half walls 0.5 each
        let expected = 1.0 + 1.0 + 4.0 * 0.5;
        assert!(
            (mesh.area() - expected).abs() < 0.05,
            "area {} vs {}",
            mesh.area(),
            expected
        );
    }
}
