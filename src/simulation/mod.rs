mod advection;
mod boundary;
mod diffusion;
mod extrapolation;
mod fractional_pressure;
mod grid_fluid;
mod hybrid_fluid;
mod kernels;
mod points_to_implicit;
mod pressure;
mod sph;

pub use advection::SemiLagrangianSolver;
pub use boundary::{BlockedBoundaryConditionSolver, FractionalBoundaryConditionSolver};
pub use diffusion::{BackwardEulerDiffusionSolver, BoundaryType, ForwardEulerDiffusionSolver};
pub use extrapolation::extrapolate_to_region;
pub use fractional_pressure::{FractionalSinglePhasePressureSolver, PressureSolverBackend};
pub use grid_fluid::GridFluidSolver;
pub use hybrid_fluid::{HybridFluidSolver, TransferScheme};
pub use kernels::{SphSpikyKernel, SphStdKernel};
pub use points_to_implicit::{SphericalPointsToImplicit, ZhuBridsonPointsToImplicit};
pub use pressure::SinglePhasePressureSolver;
pub use sph::{log_sph_frame, PressureMode, SphSolver, SphSystemData};
