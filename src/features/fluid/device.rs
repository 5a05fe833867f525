use bevy::prelude::*;

use super::error::FluidError;
use super::grid::GridSize;
use super::kernels::{FluidBufferSlot, FluidKernel};
use super::params::FluidUniforms;

/// A compute device the simulator can allocate on and dispatch to.
///
/// Dispatches must execute (or be queued for execution) in the order they are
/// issued. Both the GPU and the host device rely on that ordering for the
/// read-after-write chain between passes.
pub trait FluidDevice {
    type Buffer;
    type Texture;

    /// Allocates a zero-filled cell buffer of `cells` entries.
    fn create_buffer(&mut self, slot: FluidBufferSlot, cells: usize) -> Result<Self::Buffer, FluidError>;

    fn release_buffer(&mut self, buffer: Self::Buffer);

    /// Allocates (or acquires) the RGBA float output texture.
    fn create_texture(&mut self, size: GridSize) -> Result<Self::Texture, FluidError>;

    fn release_texture(&mut self, texture: Self::Texture);

    /// Binds the uniform block consumed by the following dispatches.
    fn bind_uniforms(&mut self, uniforms: &FluidUniforms);

    fn dispatch(
        &mut self,
        kernel: FluidKernel,
        resources: &FluidResources<Self::Buffer, Self::Texture>,
        workgroups: UVec3,
    ) -> Result<(), FluidError>;
}

/// Everything allocated for one grid size.
#[derive(Debug)]
pub struct FluidResources<B, T> {
    pub size: GridSize,
    pub divergence: B,
    pub gradient: B,
    pub blur: B,
    pub advection: B,
    pub texture: T,
}

impl<B, T> FluidResources<B, T> {
    pub fn buffer(&self, slot: FluidBufferSlot) -> &B {
        match slot {
            FluidBufferSlot::Divergence => &self.divergence,
            FluidBufferSlot::Gradient => &self.gradient,
            FluidBufferSlot::Blur => &self.blur,
            FluidBufferSlot::Advection => &self.advection,
        }
    }
}
