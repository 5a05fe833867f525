//! Fluid grid simulator.
//!
//! Owns the four cell buffers and the output texture on some [`FluidDevice`]
//! and issues the kernels in their fixed order:
//!
//! ```text
//! initialize: divergence_init
//! step:       pressure_divergence -> pressure_gradient -> blur -> advection -> write_fluid_texture
//! ```
//!
//! The blur pass is a single relaxation iteration per step. Repeated steps
//! provide the rest of the pressure relaxation; there is no inner solve loop.

use bevy::prelude::*;

use super::device::{FluidDevice, FluidResources};
use super::error::FluidError;
use super::grid::GridSize;
use super::kernels::{FluidBufferSlot, FluidKernel};
use super::params::{FluidStepParams, FluidUniforms};

/// Lifecycle of a [`FluidGridSimulator`].
///
/// `initialize` moves Uninitialized/Ready to Ready, `step` requires Ready and
/// holds Stepping while its passes are issued, `release` returns to
/// Uninitialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SimulatorState {
    #[default]
    Uninitialized,
    Ready,
    Stepping,
}

/// Work requested by the host for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FluidFrame {
    /// Bumped by the host whenever the grid must be recreated.
    pub generation: u64,
    pub size: GridSize,
    /// Steps to run this frame.
    pub steps: u32,
    pub params: FluidStepParams,
}

pub struct FluidGridSimulator<D: FluidDevice> {
    state: SimulatorState,
    resources: Option<FluidResources<D::Buffer, D::Texture>>,
    /// Host generation the current resources were built for.
    generation: Option<u64>,
    /// Generation whose initialization or step failed fatally.
    failed_generation: Option<u64>,
    steps_taken: u64,
}

impl<D: FluidDevice> Default for FluidGridSimulator<D> {
    fn default() -> Self {
        Self {
            state: SimulatorState::Uninitialized,
            resources: None,
            generation: None,
            failed_generation: None,
            steps_taken: 0,
        }
    }
}

impl<D: FluidDevice> FluidGridSimulator<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SimulatorState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SimulatorState::Ready
    }

    pub fn size(&self) -> Option<GridSize> {
        self.resources.as_ref().map(|r| r.size)
    }

    pub fn resources(&self) -> Option<&FluidResources<D::Buffer, D::Texture>> {
        self.resources.as_ref()
    }

    /// Steps completed since the last initialization.
    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    pub fn generation(&self) -> Option<u64> {
        self.generation
    }

    /// Allocates buffers and texture for `size` and zeroes the divergence
    /// buffer. Anything previously allocated is released first.
    pub fn initialize(&mut self, device: &mut D, size: GridSize, global_velocity: Vec2) -> Result<(), FluidError> {
        self.release(device);

        if !size.is_tileable() {
            warn!(
                "FluidSimulation: {} grid is smaller than one tile, passes will not run",
                size
            );
        }

        let resources = allocate(device, size)?;

        device.bind_uniforms(&FluidUniforms::for_initialize(size, global_velocity));
        if let Err(err) = device.dispatch(FluidKernel::DivergenceInit, &resources, size.workgroups()) {
            release_resources(device, resources);
            return Err(err);
        }

        self.resources = Some(resources);
        self.state = SimulatorState::Ready;
        self.steps_taken = 0;

        info!(
            "FluidSimulation: Initialized {} grid ({} cells per buffer)",
            size,
            size.cell_count()
        );
        Ok(())
    }

    /// Issues the five passes of one step. On a dispatch failure the
    /// instance is released; there is no partial-step recovery.
    pub fn step(&mut self, device: &mut D, params: &FluidStepParams) -> Result<(), FluidError> {
        match self.state {
            SimulatorState::Ready => {}
            SimulatorState::Uninitialized => return Err(FluidError::NotInitialized),
            SimulatorState::Stepping => return Err(FluidError::StepInProgress),
        }
        let Some(resources) = self.resources.as_ref() else {
            return Err(FluidError::NotInitialized);
        };

        self.state = SimulatorState::Stepping;
        let result = issue_step(device, resources, params);

        match result {
            Ok(()) => {
                self.state = SimulatorState::Ready;
                self.steps_taken += 1;
                Ok(())
            }
            Err(err) => {
                error!("FluidSimulation: Step failed: {}", err);
                self.release(device);
                Err(err)
            }
        }
    }

    /// Releases buffers and texture. Safe to call any number of times.
    pub fn release(&mut self, device: &mut D) {
        if let Some(resources) = self.resources.take() {
            let size = resources.size;
            release_resources(device, resources);
            info!("FluidSimulation: Released {} grid", size);
        }
        self.state = SimulatorState::Uninitialized;
        self.generation = None;
    }

    /// Runs one host frame: re-initializes when the frame carries a new
    /// generation, then runs `frame.steps` steps.
    ///
    /// A fatal error releases the instance and parks it until the host bumps
    /// the generation; frames of the failed generation are skipped. A texture
    /// that has not reached the device yet is retried on the next frame.
    pub fn run_frame(&mut self, device: &mut D, frame: &FluidFrame) -> Result<(), FluidError> {
        if self.failed_generation == Some(frame.generation) {
            return Ok(());
        }

        let result = self.drive(device, frame);
        if let Err(err) = &result {
            if err.is_fatal() {
                error!(
                    "FluidSimulation: Generation {} failed ({}), waiting for re-initialization",
                    frame.generation, err
                );
                self.release(device);
                self.failed_generation = Some(frame.generation);
            }
        }
        result
    }

    fn drive(&mut self, device: &mut D, frame: &FluidFrame) -> Result<(), FluidError> {
        if self.generation != Some(frame.generation) {
            self.initialize(device, frame.size, frame.params.global_velocity)?;
            self.generation = Some(frame.generation);
            self.failed_generation = None;
        }
        for _ in 0..frame.steps {
            self.step(device, &frame.params)?;
        }
        Ok(())
    }
}

fn issue_step<D: FluidDevice>(
    device: &mut D,
    resources: &FluidResources<D::Buffer, D::Texture>,
    params: &FluidStepParams,
) -> Result<(), FluidError> {
    device.bind_uniforms(&FluidUniforms::for_step(resources.size, params));
    let workgroups = resources.size.workgroups();
    for kernel in FluidKernel::STEP_SEQUENCE {
        device.dispatch(kernel, resources, workgroups)?;
    }
    Ok(())
}

/// Allocates the four buffers and the texture, unwinding on failure so a
/// failed initialization leaves nothing behind.
fn allocate<D: FluidDevice>(device: &mut D, size: GridSize) -> Result<FluidResources<D::Buffer, D::Texture>, FluidError> {
    let cells = size.cell_count();
    let mut allocated = Vec::with_capacity(FluidBufferSlot::ALL.len());
    for slot in FluidBufferSlot::ALL {
        match device.create_buffer(slot, cells) {
            Ok(buffer) => allocated.push(buffer),
            Err(err) => {
                allocated.into_iter().for_each(|b| device.release_buffer(b));
                return Err(err);
            }
        }
    }

    let texture = match device.create_texture(size) {
        Ok(texture) => texture,
        Err(err) => {
            allocated.into_iter().for_each(|b| device.release_buffer(b));
            return Err(err);
        }
    };

    // Same order as FluidBufferSlot::ALL.
    let mut buffers = allocated.into_iter();
    match (buffers.next(), buffers.next(), buffers.next(), buffers.next()) {
        (Some(divergence), Some(gradient), Some(blur), Some(advection)) => Ok(FluidResources {
            size,
            divergence,
            gradient,
            blur,
            advection,
            texture,
        }),
        _ => unreachable!("one buffer is allocated per slot"),
    }
}

fn release_resources<D: FluidDevice>(device: &mut D, resources: FluidResources<D::Buffer, D::Texture>) {
    device.release_buffer(resources.divergence);
    device.release_buffer(resources.gradient);
    device.release_buffer(resources.blur);
    device.release_buffer(resources.advection);
    device.release_texture(resources.texture);
}
