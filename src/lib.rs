//! EPSILOD: a distributed iterative stencil engine.
//!
//! Given an N-dimensional grid, a stencil described as a pattern of
//! weights, and an iteration count, the engine partitions the domain over a
//! process topology, carves each rank's owned region, halos and outbound
//! borders into tile selections, exchanges halos every iteration while
//! overlapping the interior update, and optionally re-partitions the domain
//! online to track the measured speed of each rank.

pub mod alb;
pub mod comm;
pub mod config;
pub mod engine;
pub mod error;
pub mod kernels;
pub mod partition;
pub mod primitives;
pub mod redistribute;
pub mod runtime;
pub mod stencil;
pub mod test;
pub mod tiles;
pub mod utils;

pub use config::EngineConfig;
pub use engine::{stencil_computation, RunStats, StencilProgram};
pub use error::{EpsilodError, Result};
pub use kernels::{update_cell_default, KernelSet};
pub use primitives::cell::Cell;
pub use primitives::shape::Shape;
pub use primitives::sig::Sig;
pub use primitives::tile::Tile;
pub use runtime::{DeviceSelection, EngineContext, World};
pub use stencil::Stencil;
