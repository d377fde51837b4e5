use log::{error, info};
use splish::grid::ScalarGrid;
use splish::math::DirectionFlags;
use splish::mesh::{marching_cubes, TriangleMesh};
use splish::scene::{SceneConfig, SolverKind, VolumeGridEmitter};
use splish::simulation::{
    log_sph_frame, GridFluidSolver, HybridFluidSolver, SphSolver, SphericalPointsToImplicit,
    TransferScheme,
};
use splish::timer::{Frame, Timer};
use std::path::PathBuf;

struct CliOptions {
    scene_path: Option<PathBuf>,
    num_frames: usize,
    output_dir: PathBuf,
}

const USAGE: &str = "usage: splish [SCENE.json] [--frames N] [--output DIR]";

fn parse_args() -> Result<CliOptions, String> {
    let mut options = CliOptions {
        scene_path: None,
        num_frames: 120,
        output_dir: PathBuf::from("output"),
    };

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => {
                let value = args.next().ok_or("--frames needs a value")?;
                options.num_frames = value
                    .parse()
                    .map_err(|_| format!("invalid frame count '{}'", value))?;
            }
            "--output" => {
                options.output_dir = PathBuf::from(args.next().ok_or("--output needs a value")?);
            }
            "--help" | "-h" => return Err(USAGE.to_string()),
            _ if arg.starts_with('-') => return Err(format!("unknown option '{}'\n{}", arg, USAGE)),
            _ => options.scene_path = Some(PathBuf::from(arg)),
        }
    }
    Ok(options)
}

/// A dam-break in a unit box; used when no scene file is given.
fn default_scene() -> SceneConfig {
    SceneConfig::from_json(
        r#"{
            "resolution": [64, 64, 64],
            "domain_width": 1.0,
            "solver": "flip",
            "pic_blending": 0.05,
            "emitters": [
                {
                    "kind": "volume",
                    "shape": {"type": "box", "min": [0.0, 0.0, 0.0], "max": [0.25, 0.75, 1.0]},
                    "jitter": 0.5
                }
            ]
        }"#,
    )
    .expect("builtin scene is valid")
}

fn write_mesh(mesh: &TriangleMesh, output_dir: &PathBuf, frame: Frame) -> splish::Result<()> {
    let path = output_dir.join(format!("frame_{:05}.obj", frame.index));
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    mesh.write_obj(&mut file)?;
    Ok(())
}

fn run(options: &CliOptions) -> splish::Result<()> {
    let config = match &options.scene_path {
        Some(path) => {
            info!("loading scene {}", path.display());
            SceneConfig::from_file(path)?
        }
        None => {
            info!("no scene given, simulating the builtin dam-break");
            default_scene()
        }
    };

    std::fs::create_dir_all(&options.output_dir)?;
    let spec = config.grid_spec()?;
    let colliders = config.build_colliders();
    let mut frame = Frame::with_fps(config.fps);
    let mut timer = Timer::new();

    match config.solver {
        SolverKind::Grid => {
            let mut solver = GridFluidSolver::new(spec.clone());
            solver.gravity = config.gravity();
            solver.cfl_factor = config.cfl_factor;
            solver.enable_fluid_sdf();
            for collider in colliders {
                solver.add_collider(collider);
            }
            for emitter in &config.emitters {
                if let splish::scene::EmitterConfig::Volume { shape, .. } = emitter {
                    solver.add_grid_emitter(Box::new(VolumeGridEmitter::new(
                        splish::scene::build_surface(shape),
                    )));
                }
            }

            for _ in 0..options.num_frames {
                solver.update(frame)?;
                if let Some(sdf) = solver.fluid_sdf() {
                    let mesh = marching_cubes(
                        sdf.data(),
                        spec.spacing(),
                        sdf.data_origin(),
                        0.0,
                        DirectionFlags::all(),
                        DirectionFlags::all(),
                    );
                    write_mesh(&mesh, &options.output_dir, frame)?;
                }
                timer.on_frame_finished();
                info!(
                    "frame {:>5}  t = {:.4}s  ({} ms)",
                    frame.index,
                    frame.end_time(),
                    timer.frame_duration().as_millis()
                );
                frame.advance();
            }
        }
        SolverKind::Pic | SolverKind::Flip | SolverKind::Apic => {
            let scheme = match config.solver {
                SolverKind::Pic => TransferScheme::Pic,
                SolverKind::Apic => TransferScheme::Apic,
                _ => TransferScheme::Flip {
                    pic_blending: config.pic_blending,
                },
            };
            let mut solver = HybridFluidSolver::new(spec.clone(), scheme);
            solver.gravity = config.gravity();
            solver.cfl_factor = config.cfl_factor;
            for collider in colliders {
                solver.add_collider(collider);
            }
            for emitter in config.build_particle_emitters()? {
                solver.add_emitter(emitter);
            }

            for _ in 0..options.num_frames {
                solver.update(frame)?;
                let sdf = solver.fluid_sdf();
                let mesh = marching_cubes(
                    sdf.data(),
                    spec.spacing(),
                    sdf.data_origin(),
                    0.0,
                    DirectionFlags::all(),
                    DirectionFlags::all(),
                );
                write_mesh(&mesh, &options.output_dir, frame)?;
                timer.on_frame_finished();
                info!(
                    "frame {:>5}  t = {:.4}s  particles = {}  ({} ms)",
                    frame.index,
                    frame.end_time(),
                    solver.particles().number_of_particles(),
                    timer.frame_duration().as_millis()
                );
                frame.advance();
            }
        }
        SolverKind::Sph | SolverKind::PciSph => {
            let mut solver = if config.solver == SolverKind::Sph {
                SphSolver::new()
            } else {
                SphSolver::pci()
            };
            solver.gravity = config.gravity();
            solver
                .data_mut()
                .set_target_spacing(0.5 * config.grid_spacing());
            for collider in colliders {
                solver.add_collider(collider);
            }
            for emitter in config.build_particle_emitters()? {
                solver.add_emitter(emitter);
            }

            let mut surface_grid = splish::grid::CellCenteredScalarGrid::new(spec.clone());
            for _ in 0..options.num_frames {
                solver.update(frame);

                // particles -> level set -> mesh
                let radius = solver.data().target_spacing();
                solver
                    .data_mut()
                    .particles_mut()
                    .build_neighbor_searcher(2.0 * radius);
                if let Some(searcher) = solver.data().particles().neighbor_searcher() {
                    SphericalPointsToImplicit::new(radius).convert(searcher, &mut surface_grid);
                    let mesh = marching_cubes(
                        surface_grid.data(),
                        spec.spacing(),
                        surface_grid.data_origin(),
                        0.0,
                        DirectionFlags::all(),
                        DirectionFlags::all(),
                    );
                    write_mesh(&mesh, &options.output_dir, frame)?;
                }

                timer.on_frame_finished();
                log_sph_frame(frame, &solver);
                frame.advance();
            }
        }
    }

    info!(
        "simulated {} frames in {:.1}s",
        options.num_frames,
        timer.total_elapsed().as_secs_f64()
    );
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = match parse_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{}", message);
            std::process::exit(2);
        }
    };

    if let Err(err) = run(&options) {
        error!("{}", err);
        std::process::exit(1);
    }
}
