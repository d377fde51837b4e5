use super::neighbor::PointNeighborSearcher;
use crate::math::{Aabb3, Point3};
use cgmath::MetricSpace;

const LEAF_SIZE: usize = 8;

struct Node {
    bound: Aabb3,
    begin: usize,
    end: usize,
    // leaf iff children are None
    children: Option<(usize, usize)>,
}

/// Kd-tree over particle positions: median split on the longest axis down to
/// a small leaf threshold, bounded recursive query.
#[derive(Default)]
pub struct PointKdTreeSearcher {
    points: Vec<Point3>,
    indices: Vec<usize>,
    nodes: Vec<Node>,
}

impl PointKdTreeSearcher {
    pub fn new() -> Self {
        Default::default()
    }

    fn build_node(&mut self, begin: usize, end: usize) -> usize {
        let bound = {
            let pts: Vec<Point3> = self.indices[begin..end].iter().map(|i| self.points[*i]).collect();
            Aabb3::from_points(&pts)
        };
        let node_id = self.nodes.len();
        self.nodes.push(Node {
            bound,
            begin,
            end,
            children: None,
        });

        if end - begin <= LEAF_SIZE {
            return node_id;
        }

        let extent = bound.extent();
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };

        let mid = (begin + end) / 2;
        let points = &self.points;
        self.indices[begin..end].select_nth_unstable_by(mid - begin, |a, b| {
            let pa = points[*a];
            let pb = points[*b];
            let (va, vb) = match axis {
                0 => (pa.x, pb.x),
                1 => (pa.y, pb.y),
                _ => (pa.z, pb.z),
            };
            va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
        });

        let left = self.build_node(begin, mid);
        let right = self.build_node(mid, end);
        self.nodes[node_id].children = Some((left, right));
        node_id
    }

    fn query(
        &self,
        node_id: usize,
        origin: Point3,
        radius: f64,
        radius_sqr: f64,
        f: &mut dyn FnMut(usize, Point3),
    ) {
        let node = &self.nodes[node_id];
        if !sphere_overlaps_aabb(origin, radius, &node.bound) {
            return;
        }
        match node.children {
            None => {
                for idx in &self.indices[node.begin..node.end] {
                    let p = self.points[*idx];
                    if p.distance2(origin) <= radius_sqr {
                        f(*idx, p);
                    }
                }
            }
            Some((left, right)) => {
                self.query(left, origin, radius, radius_sqr, f);
                self.query(right, origin, radius, radius_sqr, f);
            }
        }
    }
}

fn sphere_overlaps_aabb(center: Point3, radius: f64, aabb: &Aabb3) -> bool {
    let closest = aabb.clamp(center);
    closest.distance2(center) <= radius * radius
}

impl PointNeighborSearcher for PointKdTreeSearcher {
    fn type_name(&self) -> &'static str {
        "kd_tree"
    }

    fn build(&mut self, points: &[Point3], _max_search_radius: f64) {
        self.points = points.to_vec();
        self.indices = (0..points.len()).collect();
        self.nodes.clear();
        if !points.is_empty() {
            self.build_node(0, points.len());
        }
    }

    fn for_each_nearby_point(&self, origin: Point3, radius: f64, f: &mut dyn FnMut(usize, Point3)) {
        if self.nodes.is_empty() {
            return;
        }
        self.query(0, origin, radius, radius * radius, f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::PointSimpleListSearcher;
    use rand::{Rng, SeedableRng};

    #[test]
    fn matches_list_searcher_on_random_points() {
        let mut rng = rand::rngs::SmallRng::seed_from_u64(7);
        let points: Vec<Point3> = (0..500)
            .map(|_| cgmath::point3(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()))
            .collect();

        let mut tree = PointKdTreeSearcher::new();
        tree.build(&points, 0.1);
        let mut list = PointSimpleListSearcher::new();
        list.build(&points, 0.1);

        for _ in 0..50 {
            let origin = cgmath::point3(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
            let mut from_tree = Vec::new();
            let mut from_list = Vec::new();
            tree.for_each_nearby_point(origin, 0.1, &mut |id, _| from_tree.push(id));
            list.for_each_nearby_point(origin, 0.1, &mut |id, _| from_list.push(id));
            from_tree.sort_unstable();
            from_list.sort_unstable();
            assert_eq!(from_tree, from_list);
        }
    }
}
