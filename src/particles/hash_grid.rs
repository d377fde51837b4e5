use super::neighbor::PointNeighborSearcher;
use crate::math::Point3;
use cgmath::MetricSpace;
use rayon::prelude::*;

const DEFAULT_HASH_RESOLUTION: usize = 64;

#[inline]
fn bucket_coord(x: f64, grid_spacing: f64) -> i64 {
    (x / grid_spacing).floor() as i64
}

/// Non-negative wrap of a bucket coordinate into the hash resolution.
#[inline]
fn wrap(coord: i64, resolution: usize) -> usize {
    let r = resolution as i64;
    let m = coord % r;
    (if m < 0 { m + r } else { m }) as usize
}

fn hash_key(p: Point3, grid_spacing: f64, resolution: usize) -> usize {
    let i = wrap(bucket_coord(p.x, grid_spacing), resolution);
    let j = wrap(bucket_coord(p.y, grid_spacing), resolution);
    let k = wrap(bucket_coord(p.z, grid_spacing), resolution);
    (k * resolution + j) * resolution + i
}

/// The 8 buckets a radius-bounded query can touch when the bucket side is
/// twice the search radius: one per axis-half the origin falls in.
fn nearby_keys(origin: Point3, grid_spacing: f64, resolution: usize) -> [usize; 8] {
    let base = [
        bucket_coord(origin.x, grid_spacing),
        bucket_coord(origin.y, grid_spacing),
        bucket_coord(origin.z, grid_spacing),
    ];
    let mut offsets = [0i64; 3];
    for (axis, value) in [origin.x, origin.y, origin.z].iter().enumerate() {
        let frac = value / grid_spacing - base[axis] as f64;
        offsets[axis] = if frac < 0.5 { -1 } else { 1 };
    }

    let mut keys = [0usize; 8];
    for (n, key) in keys.iter_mut().enumerate() {
        let i = base[0] + if n & 1 != 0 { offsets[0] } else { 0 };
        let j = base[1] + if n & 2 != 0 { offsets[1] } else { 0 };
        let k = base[2] + if n & 4 != 0 { offsets[2] } else { 0 };
        *key = (wrap(k, resolution) * resolution + wrap(j, resolution)) * resolution
            + wrap(i, resolution);
    }
    keys
}

/// Uniform hash grid with per-bucket id lists; bucket side is `2 * radius`.
pub struct PointHashGridSearcher {
    resolution: usize,
    grid_spacing: f64,
    points: Vec<Point3>,
    buckets: Vec<Vec<usize>>,
}

impl Default for PointHashGridSearcher {
    fn default() -> Self {
        PointHashGridSearcher {
            resolution: DEFAULT_HASH_RESOLUTION,
            grid_spacing: 1.0,
            points: Vec::new(),
            buckets: Vec::new(),
        }
    }
}

impl PointHashGridSearcher {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_resolution(resolution: usize) -> Self {
        PointHashGridSearcher {
            resolution,
            ..Default::default()
        }
    }
}

impl PointNeighborSearcher for PointHashGridSearcher {
    fn type_name(&self) -> &'static str {
        "hash_grid"
    }

    fn build(&mut self, points: &[Point3], max_search_radius: f64) {
        self.grid_spacing = 2.0 * max_search_radius;
        self.points = points.to_vec();
        self.buckets.clear();
        self.buckets
            .resize(self.resolution * self.resolution * self.resolution, Vec::new());
        for (id, p) in points.iter().enumerate() {
            let key = hash_key(*p, self.grid_spacing, self.resolution);
            self.buckets[key].push(id);
        }
    }

    fn for_each_nearby_point(&self, origin: Point3, radius: f64, f: &mut dyn FnMut(usize, Point3)) {
        if self.buckets.is_empty() {
            return;
        }
        debug_assert!(radius <= 0.5 * self.grid_spacing + f64::EPSILON);
        let radius_sqr = radius * radius;
        let mut keys = nearby_keys(origin, self.grid_spacing, self.resolution);
        keys.sort_unstable();
        let mut previous = usize::MAX;
        for key in keys {
            if key == previous {
                continue; // wrapped duplicates must not double-report
            }
            previous = key;
            for id in &self.buckets[key] {
                let p = self.points[*id];
                if p.distance2(origin) <= radius_sqr {
                    f(*id, p);
                }
            }
        }
    }
}

/// Hash grid built with a parallel count / prefix-sum / scatter pass into
/// one contiguous id array. Queries check the 27 surrounding buckets.
pub struct PointParallelHashGridSearcher {
    resolution: usize,
    grid_spacing: f64,
    points: Vec<Point3>,
    start_index_table: Vec<usize>,
    end_index_table: Vec<usize>,
    sorted_ids: Vec<usize>,
}

impl Default for PointParallelHashGridSearcher {
    fn default() -> Self {
        PointParallelHashGridSearcher {
            resolution: DEFAULT_HASH_RESOLUTION,
            grid_spacing: 1.0,
            points: Vec::new(),
            start_index_table: Vec::new(),
            end_index_table: Vec::new(),
            sorted_ids: Vec::new(),
        }
    }
}

impl PointParallelHashGridSearcher {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_resolution(resolution: usize) -> Self {
        PointParallelHashGridSearcher {
            resolution,
            ..Default::default()
        }
    }
}

impl PointNeighborSearcher for PointParallelHashGridSearcher {
    fn type_name(&self) -> &'static str {
        "parallel_hash_grid"
    }

    fn build(&mut self, points: &[Point3], max_search_radius: f64) {
        self.grid_spacing = 2.0 * max_search_radius;
        self.points = points.to_vec();
        let bucket_count = self.resolution * self.resolution * self.resolution;

        let spacing = self.grid_spacing;
        let resolution = self.resolution;
        let keys: Vec<usize> = points
            .par_iter()
            .map(|p| hash_key(*p, spacing, resolution))
            .collect();

        // bucket-count pass
        let mut counts = vec![0usize; bucket_count];
        for key in &keys {
            counts[*key] += 1;
        }

        // exclusive prefix sum gives start offsets
        self.start_index_table.resize(bucket_count, 0);
        let mut running = 0;
        for (bucket, count) in counts.iter().enumerate() {
            self.start_index_table[bucket] = running;
            running += count;
        }
        self.end_index_table = self
            .start_index_table
            .iter()
            .zip(&counts)
            .map(|(s, c)| s + c)
            .collect();

        // single scatter fills the contiguous id array
        self.sorted_ids.resize(points.len(), 0);
        let mut cursor = self.start_index_table.clone();
        for (id, key) in keys.iter().enumerate() {
            self.sorted_ids[cursor[*key]] = id;
            cursor[*key] += 1;
        }
    }

    fn for_each_nearby_point(&self, origin: Point3, radius: f64, f: &mut dyn FnMut(usize, Point3)) {
        if self.start_index_table.is_empty() {
            return;
        }
        debug_assert!(radius <= 0.5 * self.grid_spacing + f64::EPSILON);
        let radius_sqr = radius * radius;
        let base = [
            bucket_coord(origin.x, self.grid_spacing),
            bucket_coord(origin.y, self.grid_spacing),
            bucket_coord(origin.z, self.grid_spacing),
        ];

        let mut keys = [0usize; 27];
        let mut n = 0;
        for dk in -1i64..=1 {
            for dj in -1i64..=1 {
                for di in -1i64..=1 {
                    keys[n] = (wrap(base[2] + dk, self.resolution) * self.resolution
                        + wrap(base[1] + dj, self.resolution))
                        * self.resolution
                        + wrap(base[0] + di, self.resolution);
                    n += 1;
                }
            }
        }
        keys.sort_unstable();

        let mut previous = usize::MAX;
        for key in keys {
            if key == previous {
                continue;
            }
            previous = key;
            for slot in self.start_index_table[key]..self.end_index_table[key] {
                let id = self.sorted_ids[slot];
                let p = self.points[id];
                if p.distance2(origin) <= radius_sqr {
                    f(id, p);
                }
            }
        }
    }
}
