use crate::math::Point3;
use cgmath::MetricSpace;

/// Radius-bounded point query over a frozen set of particle positions.
///
/// `build` fixes both the point set and the maximum query radius; querying
/// with a larger radius than the build radius is undefined. Positions are
/// copied in, so the searcher stays valid while the source array mutates,
/// but it answers for the positions it was built from.
pub trait PointNeighborSearcher: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn build(&mut self, points: &[Point3], max_search_radius: f64);

    /// Calls `f(id, position)` exactly once for every point within `radius`
    /// of `origin`, in unspecified order.
    fn for_each_nearby_point(&self, origin: Point3, radius: f64, f: &mut dyn FnMut(usize, Point3));

    fn has_nearby_point(&self, origin: Point3, radius: f64) -> bool {
        let mut found = false;
        self.for_each_nearby_point(origin, radius, &mut |_, _| {
            found = true;
        });
        found
    }
}

/// Linear scan over all points. The reference semantics every other searcher
/// must match.
#[derive(Default)]
pub struct PointSimpleListSearcher {
    points: Vec<Point3>,
}

impl PointSimpleListSearcher {
    pub fn new() -> Self {
        Default::default()
    }
}

impl PointNeighborSearcher for PointSimpleListSearcher {
    fn type_name(&self) -> &'static str {
        "list"
    }

    fn build(&mut self, points: &[Point3], _max_search_radius: f64) {
        self.points = points.to_vec();
    }

    fn for_each_nearby_point(&self, origin: Point3, radius: f64, f: &mut dyn FnMut(usize, Point3)) {
        let radius_sqr = radius * radius;
        for (id, p) in self.points.iter().enumerate() {
            if p.distance2(origin) <= radius_sqr {
                f(id, *p);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_searcher_finds_exactly_the_in_radius_points() {
        let points = vec![
            cgmath::point3(0.0, 0.0, 0.0),
            cgmath::point3(0.4, 0.0, 0.0),
            cgmath::point3(1.0, 0.0, 0.0),
        ];
        let mut searcher = PointSimpleListSearcher::new();
        searcher.build(&points, 0.5);

        let mut found = Vec::new();
        searcher.for_each_nearby_point(cgmath::point3(0.1, 0.0, 0.0), 0.5, &mut |id, _| {
            found.push(id)
        });
        found.sort_unstable();
        assert_eq!(found, vec![0, 1]);
        assert!(searcher.has_nearby_point(cgmath::point3(1.1, 0.0, 0.0), 0.2));
        assert!(!searcher.has_nearby_point(cgmath::point3(2.0, 0.0, 0.0), 0.5));
    }
}
