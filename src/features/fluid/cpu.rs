//! Host-memory fluid device.
//!
//! Runs the reference kernels synchronously on dispatch. Used as the
//! fallback backend when compute shaders are unavailable and by every
//! simulator test, since its buffers can be inspected directly.

use bevy::prelude::*;

use super::cell::FluidCell;
use super::device::{FluidDevice, FluidResources};
use super::error::FluidError;
use super::grid::GridSize;
use super::kernels::{self, FluidBufferSlot, FluidKernel, KernelTarget};
use super::params::FluidUniforms;

/// Handle to a buffer in a [`CpuFluidDevice`]. Ids are never reused, so a
/// released id stays invalid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CpuBufferId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CpuTextureId(usize);

/// RGBA32 float image in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuTexture {
    pub size: GridSize,
    pub texels: Vec<Vec4>,
}

impl CpuTexture {
    /// Raw bytes as laid out in an `Rgba32Float` image.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }
}

#[derive(Default)]
pub struct CpuFluidDevice {
    buffers: Vec<Option<Vec<FluidCell>>>,
    textures: Vec<Option<CpuTexture>>,
    uniforms: FluidUniforms,
    /// Maximum live cells (buffers plus texels), standing in for device memory.
    cell_budget: Option<usize>,
    dispatch_count: u64,
}

impl CpuFluidDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device that fails allocations once `cells` live cells would be exceeded.
    pub fn with_cell_budget(cells: usize) -> Self {
        Self {
            cell_budget: Some(cells),
            ..default()
        }
    }

    pub fn buffer(&self, id: CpuBufferId) -> Option<&[FluidCell]> {
        self.buffers.get(id.0).and_then(|b| b.as_deref())
    }

    pub fn texture(&self, id: CpuTextureId) -> Option<&CpuTexture> {
        self.textures.get(id.0).and_then(|t| t.as_ref())
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.iter().flatten().count()
    }

    /// Lengths of every live buffer, in allocation order.
    pub fn live_buffer_lengths(&self) -> Vec<usize> {
        self.buffers.iter().flatten().map(Vec::len).collect()
    }

    pub fn live_texture_count(&self) -> usize {
        self.textures.iter().flatten().count()
    }

    pub fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    fn live_cells(&self) -> usize {
        let buffer_cells: usize = self.buffers.iter().flatten().map(Vec::len).sum();
        let texels: usize = self.textures.iter().flatten().map(|t| t.texels.len()).sum();
        buffer_cells + texels
    }

    fn reserve(&self, resource: &'static str, cells: usize) -> Result<(), FluidError> {
        match self.cell_budget {
            Some(budget) if self.live_cells() + cells > budget => {
                Err(FluidError::Allocation { resource, cells })
            }
            _ => Ok(()),
        }
    }
}

impl FluidDevice for CpuFluidDevice {
    type Buffer = CpuBufferId;
    type Texture = CpuTextureId;

    fn create_buffer(&mut self, slot: FluidBufferSlot, cells: usize) -> Result<CpuBufferId, FluidError> {
        self.reserve(slot.label(), cells)?;
        let buffer = zeroed(slot.label(), cells, FluidCell::ZERO)?;
        self.buffers.push(Some(buffer));
        Ok(CpuBufferId(self.buffers.len() - 1))
    }

    fn release_buffer(&mut self, buffer: CpuBufferId) {
        if let Some(entry) = self.buffers.get_mut(buffer.0) {
            *entry = None;
        }
    }

    fn create_texture(&mut self, size: GridSize) -> Result<CpuTextureId, FluidError> {
        self.reserve("fluid_texture", size.cell_count())?;
        let texels = zeroed("fluid_texture", size.cell_count(), Vec4::ZERO)?;
        self.textures.push(Some(CpuTexture { size, texels }));
        Ok(CpuTextureId(self.textures.len() - 1))
    }

    fn release_texture(&mut self, texture: CpuTextureId) {
        if let Some(entry) = self.textures.get_mut(texture.0) {
            *entry = None;
        }
    }

    fn bind_uniforms(&mut self, uniforms: &FluidUniforms) {
        self.uniforms = *uniforms;
    }

    fn dispatch(
        &mut self,
        kernel: FluidKernel,
        resources: &FluidResources<CpuBufferId, CpuTextureId>,
        workgroups: UVec3,
    ) -> Result<(), FluidError> {
        self.dispatch_count += 1;
        let uniforms = self.uniforms;

        match kernel.target() {
            KernelTarget::Texture => {
                let source = read(&self.buffers, kernel, resources, FluidBufferSlot::Divergence)?;
                let texture = self
                    .textures
                    .get_mut(resources.texture.0)
                    .and_then(Option::as_mut)
                    .ok_or(FluidError::StaleResource {
                        kernel,
                        resource: "fluid_texture",
                    })?;
                kernels::write_fluid_texture(&uniforms, workgroups, source, &mut texture.texels);
                Ok(())
            }
            KernelTarget::Buffer(slot) => {
                let id = *resources.buffer(slot);
                // Take the target out so the read buffers can be borrowed alongside it.
                let mut target = self
                    .buffers
                    .get_mut(id.0)
                    .and_then(Option::take)
                    .ok_or(FluidError::StaleResource {
                        kernel,
                        resource: slot.label(),
                    })?;
                let result = run_buffer_kernel(kernel, &uniforms, workgroups, &self.buffers, resources, &mut target);
                self.buffers[id.0] = Some(target);
                result
            }
        }
    }
}

/// `cells` copies of `zero`, or an allocation error when the byte count
/// overflows or the allocator refuses.
fn zeroed<T: Clone>(resource: &'static str, cells: usize, zero: T) -> Result<Vec<T>, FluidError> {
    let error = FluidError::Allocation { resource, cells };
    cells.checked_mul(size_of::<T>()).ok_or(error.clone())?;

    let mut values = Vec::new();
    values.try_reserve_exact(cells).map_err(|_| error)?;
    values.resize(cells, zero);
    Ok(values)
}

fn read<'a>(
    buffers: &'a [Option<Vec<FluidCell>>],
    kernel: FluidKernel,
    resources: &FluidResources<CpuBufferId, CpuTextureId>,
    slot: FluidBufferSlot,
) -> Result<&'a [FluidCell], FluidError> {
    let id = resources.buffer(slot);
    buffers
        .get(id.0)
        .and_then(|b| b.as_deref())
        .ok_or(FluidError::StaleResource {
            kernel,
            resource: slot.label(),
        })
}

fn run_buffer_kernel(
    kernel: FluidKernel,
    uniforms: &FluidUniforms,
    workgroups: UVec3,
    buffers: &[Option<Vec<FluidCell>>],
    resources: &FluidResources<CpuBufferId, CpuTextureId>,
    target: &mut [FluidCell],
) -> Result<(), FluidError> {
    match kernel {
        FluidKernel::DivergenceInit => kernels::divergence_init(uniforms, workgroups, target),
        FluidKernel::PressureDivergence => {
            let advection = read(buffers, kernel, resources, FluidBufferSlot::Advection)?;
            kernels::pressure_divergence(uniforms, workgroups, advection, target);
        }
        FluidKernel::PressureGradient => {
            let divergence = read(buffers, kernel, resources, FluidBufferSlot::Divergence)?;
            kernels::pressure_gradient(uniforms, workgroups, divergence, target);
        }
        FluidKernel::Blur => {
            let gradient = read(buffers, kernel, resources, FluidBufferSlot::Gradient)?;
            kernels::blur(uniforms, workgroups, gradient, target);
        }
        FluidKernel::Advection => {
            let blurred = read(buffers, kernel, resources, FluidBufferSlot::Blur)?;
            let gradient = read(buffers, kernel, resources, FluidBufferSlot::Gradient)?;
            kernels::advection(uniforms, workgroups, blurred, gradient, target);
        }
        FluidKernel::WriteFluidTexture => unreachable!("texture kernel has no buffer target"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocate(device: &mut CpuFluidDevice, size: GridSize) -> FluidResources<CpuBufferId, CpuTextureId> {
        let cells = size.cell_count();
        FluidResources {
            size,
            divergence: device.create_buffer(FluidBufferSlot::Divergence, cells).unwrap(),
            gradient: device.create_buffer(FluidBufferSlot::Gradient, cells).unwrap(),
            blur: device.create_buffer(FluidBufferSlot::Blur, cells).unwrap(),
            advection: device.create_buffer(FluidBufferSlot::Advection, cells).unwrap(),
            texture: device.create_texture(size).unwrap(),
        }
    }

    #[test]
    fn test_buffers_start_zeroed() {
        let mut device = CpuFluidDevice::new();
        let id = device.create_buffer(FluidBufferSlot::Blur, 32).unwrap();
        let cells = device.buffer(id).unwrap();
        assert_eq!(cells.len(), 32);
        assert!(cells.iter().all(FluidCell::is_zero));
    }

    #[test]
    fn test_release_invalidates_id() {
        let mut device = CpuFluidDevice::new();
        let id = device.create_buffer(FluidBufferSlot::Gradient, 8).unwrap();
        device.release_buffer(id);
        device.release_buffer(id);
        assert!(device.buffer(id).is_none());
        assert_eq!(device.live_buffer_count(), 0);

        let next = device.create_buffer(FluidBufferSlot::Gradient, 8).unwrap();
        assert_ne!(next, id);
    }

    #[test]
    fn test_cell_budget_rejects_allocation() {
        let mut device = CpuFluidDevice::with_cell_budget(100);
        assert!(device.create_buffer(FluidBufferSlot::Divergence, 64).is_ok());
        let err = device.create_buffer(FluidBufferSlot::Gradient, 64).unwrap_err();
        assert_eq!(
            err,
            FluidError::Allocation {
                resource: "fluid_gradient_buffer",
                cells: 64
            }
        );
        assert_eq!(device.live_buffer_count(), 1);
    }

    #[test]
    fn test_oversized_allocation_is_an_error() {
        let mut device = CpuFluidDevice::new();
        let cells = 1usize << 60;
        assert_eq!(
            device.create_buffer(FluidBufferSlot::Blur, cells),
            Err(FluidError::Allocation {
                resource: "fluid_blur_buffer",
                cells
            })
        );

        let huge = GridSize::new(1 << 31, 1 << 31);
        assert_eq!(
            device.create_texture(huge),
            Err(FluidError::Allocation {
                resource: "fluid_texture",
                cells: huge.cell_count()
            })
        );
        assert_eq!(device.live_buffer_count(), 0);
        assert_eq!(device.live_texture_count(), 0);
    }

    #[test]
    fn test_dispatch_against_released_buffer_fails() {
        let size = GridSize::new(16, 16);
        let mut device = CpuFluidDevice::new();
        let resources = allocate(&mut device, size);
        device.release_buffer(resources.advection);

        let err = device
            .dispatch(FluidKernel::PressureDivergence, &resources, size.workgroups())
            .unwrap_err();
        assert_eq!(
            err,
            FluidError::StaleResource {
                kernel: FluidKernel::PressureDivergence,
                resource: "fluid_advection_buffer"
            }
        );
        // The write target survives a failed read.
        assert!(device.buffer(resources.divergence).is_some());
    }

    #[test]
    fn test_texture_dispatch_writes_texels() {
        let size = GridSize::new(16, 16);
        let mut device = CpuFluidDevice::new();
        let resources = allocate(&mut device, size);
        device.bind_uniforms(&FluidUniforms::for_initialize(size, Vec2::ZERO));
        device
            .dispatch(FluidKernel::WriteFluidTexture, &resources, size.workgroups())
            .unwrap();

        let texture = device.texture(resources.texture).unwrap();
        assert!(texture.texels.iter().all(|t| *t == Vec4::new(0.5, 0.5, 0.0, 1.0)));
        assert_eq!(texture.as_bytes().len(), size.cell_count() * 16);
        assert_eq!(device.dispatch_count(), 1);
    }
}
