//! Hybrid particle/grid fluid simulation for offline animation.
//!
//! The crate couples structured grids (cell-, vertex- and face-centered)
//! with a particle system through a family of incompressible Navier-Stokes
//! solvers: semi-Lagrangian advection, implicit diffusion, fractional
//! pressure projection, and PIC/FLIP/APIC particle transfers, plus SPH
//! solvers for pure particle simulations. Liquid surfaces are extracted as
//! triangle meshes with marching cubes.
//!
//! Everything is frame-driven: a solver's `update(frame)` advances the
//! simulation to the end of that frame, sub-stepping under its CFL bound.

#[macro_use]
extern crate more_asserts;

pub mod error;
pub mod fdm;
pub mod grid;
pub mod levelset;
pub mod math;
pub mod mesh;
pub mod parallel;
pub mod particles;
pub mod scene;
pub mod serialization;
pub mod simulation;
pub mod timer;

pub use error::{Result, SimulationError};
