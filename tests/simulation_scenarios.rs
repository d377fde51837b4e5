//! End-to-end scenarios exercising several solver layers together.

use cgmath::MetricSpace;
use splish::grid::{Array3, CellCenteredScalarGrid, FaceCenteredGrid, GridSpec, ScalarGrid};
use splish::math::{size3, DirectionFlags, Vec3};
use splish::mesh::marching_cubes;
use splish::particles::{NeighborSearcherKind, PointNeighborSearcher};
use splish::simulation::SemiLagrangianSolver;

fn unit_spec(n: usize) -> GridSpec {
    GridSpec::with_uniform_spacing(size3(n, n, n), 1.0 / n as f64).unwrap()
}

#[test]
fn box_advection_translates_and_conserves_mass() {
    // 32^3 scalar box advected by a uniform +x flow for 64 steps of 0.5h:
    // the profile translates by 0.5 and keeps its integral within 5%
    let n = 32;
    let h = 1.0 / n as f64;
    let spec = unit_spec(n);

    // the box starts on the left so the translated result stays in-domain:
    // x in [0.05, 0.35], y and z in [0.25, 0.75]
    let mut field = CellCenteredScalarGrid::new(spec.clone());
    let spec2 = spec.clone();
    field.par_fill_with(|i, j, k| {
        let p = spec2.cell_center_position(i, j, k);
        let inside = |x: f64| (0.25..=0.75).contains(&x);
        if (0.05..=0.35).contains(&p.x) && inside(p.y) && inside(p.z) {
            1.0
        } else {
            0.0
        }
    });
    let mut flow = FaceCenteredGrid::new(spec.clone());
    flow.fill(Vec3::new(1.0, 0.0, 0.0));

    let mass_before: f64 = field.data().data().iter().sum::<f64>() * h * h * h;

    let solver = SemiLagrangianSolver::new();
    let mut scratch = field.clone();
    let dt = 0.5 * h;
    for _ in 0..64 {
        solver.advect_scalar(&field, &flow, dt, &mut scratch, None);
        std::mem::swap(&mut field, &mut scratch);
    }

    let mass_after: f64 = field.data().data().iter().sum::<f64>() * h * h * h;
    assert!(
        (mass_after - mass_before).abs() < 0.05 * mass_before,
        "mass {} -> {}",
        mass_before,
        mass_after
    );

    // find the center of mass along x; it must have moved by 64 * 0.5h = 0.5
    let mut weighted = 0.0;
    let mut total = 0.0;
    field.for_each_data_point_index(|i, j, k| {
        let v = field.data()[(i, j, k)];
        weighted += v * (i as f64 + 0.5) * h;
        total += v;
    });
    let center = weighted / total;
    let expected = 0.2 + 0.5; // initial center of the slab plus the shift
    assert!(
        (center - expected).abs() < 2.0 * h,
        "center of mass {} vs {}",
        center,
        expected
    );
}

#[test]
fn neighbor_searchers_are_equivalent_on_large_random_sets() {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::SmallRng::seed_from_u64(1234);
    let points: Vec<_> = (0..10_000)
        .map(|_| cgmath::point3(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>()))
        .collect();
    let radius = 0.05;

    let mut searchers: Vec<Box<dyn PointNeighborSearcher>> = vec![
        NeighborSearcherKind::List.create(),
        NeighborSearcherKind::KdTree.create(),
        NeighborSearcherKind::HashGrid.create(),
        NeighborSearcherKind::ParallelHashGrid.create(),
    ];
    for searcher in searchers.iter_mut() {
        searcher.build(&points, radius);
    }

    for _ in 0..100 {
        let origin = cgmath::point3(rng.gen::<f64>(), rng.gen::<f64>(), rng.gen::<f64>());
        let mut reference: Vec<usize> = Vec::new();
        searchers[0].for_each_nearby_point(origin, radius, &mut |id, _| reference.push(id));
        reference.sort_unstable();

        for searcher in &searchers[1..] {
            let mut found: Vec<usize> = Vec::new();
            searcher.for_each_nearby_point(origin, radius, &mut |id, _| found.push(id));
            found.sort_unstable();
            assert_eq!(found, reference, "{} disagrees with list", searcher.type_name());
        }
    }
}

#[test]
fn marching_cubes_sphere_area_is_within_three_percent() {
    // 64^3 grid, phi = |x - c| - 0.3; mesh area within [0.97, 1.03] * 4 pi r^2
    let n = 64;
    let h = 1.0 / (n - 1) as f64;
    let center = cgmath::point3(0.5, 0.5, 0.5);
    let radius = 0.3;

    let mut grid = Array3::new(size3(n, n, n), 0.0);
    grid.par_fill_with(|i, j, k| {
        let p = cgmath::point3(i as f64 * h, j as f64 * h, k as f64 * h);
        p.distance(center) - radius
    });

    let mesh = marching_cubes(
        &grid,
        Vec3::new(h, h, h),
        cgmath::point3(0.0, 0.0, 0.0),
        0.0,
        DirectionFlags::empty(),
        DirectionFlags::empty(),
    );

    let expected = 4.0 * std::f64::consts::PI * radius * radius;
    assert!(
        mesh.area() > 0.97 * expected && mesh.area() < 1.03 * expected,
        "area {} vs analytic {}",
        mesh.area(),
        expected
    );
}

#[test]
fn grid_serialization_round_trips_between_solver_runs() {
    let spec = unit_spec(12);
    let mut velocity = FaceCenteredGrid::new(spec.clone());
    velocity.fill_with(|p| Vec3::new(p.x * p.y, -p.z, p.x + 2.0 * p.y));
    let mut sdf = CellCenteredScalarGrid::new(spec);
    let spec2 = unit_spec(12);
    sdf.par_fill_with(|i, j, k| {
        let p = spec2.cell_center_position(i, j, k);
        p.distance(cgmath::point3(0.5, 0.5, 0.5)) - 0.3
    });

    let mut buf = Vec::new();
    velocity.serialize(&mut buf);
    sdf.serialize(&mut buf);

    let mut velocity2 = FaceCenteredGrid::new(unit_spec(3));
    let mut sdf2 = CellCenteredScalarGrid::new(unit_spec(3));
    let mut cursor = buf.as_slice();
    velocity2.deserialize(&mut cursor).unwrap();
    sdf2.deserialize(&mut cursor).unwrap();
    assert!(cursor.is_empty());

    assert_eq!(velocity.u(), velocity2.u());
    assert_eq!(velocity.w(), velocity2.w());
    assert_eq!(sdf.data(), sdf2.data());
    assert_eq!(sdf.spec(), sdf2.spec());
}
