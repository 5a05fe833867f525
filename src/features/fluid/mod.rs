//! Grid fluid simulation core.
//!
//! Engine-agnostic apart from `bevy::math`: the simulator drives any
//! [`FluidDevice`], either the render-world GPU device or [`CpuFluidDevice`].

pub mod cell;
pub mod cpu;
pub mod device;
pub mod error;
pub mod grid;
pub mod kernels;
pub mod params;
pub mod simulator;

pub use cell::{FluidCell, TILE_SIZE};
pub use cpu::{CpuFluidDevice, CpuTexture};
pub use device::{FluidDevice, FluidResources};
pub use error::FluidError;
pub use grid::GridSize;
pub use kernels::{FluidBufferSlot, FluidKernel};
pub use params::{FluidStepParams, FluidUniforms, AFFECTOR_SENTINEL};
pub use simulator::{FluidFrame, FluidGridSimulator, SimulatorState};
