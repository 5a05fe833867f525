//! Fluid Simulation Plugin
//!
//! Grid fluid automata on Bevy compute shaders, with a host fallback.
//!
//! The main world owns the output texture and decides, once per frame, what
//! the simulation should do (`FluidFrameRequest`). The request is extracted to
//! the render world, where `prepare_fluid_dispatches` drives the simulator on
//! a `GpuFluidDevice`. Each dispatch it issues becomes a bind group queued for
//! `FluidSimulationNode`, which records one compute pass per dispatch in issue
//! order. With the CPU backend the same simulator runs on a
//! `CpuFluidDevice` in the main world and its texels are copied into the
//! image asset.

use bevy::{
    app::AppExit,
    prelude::*,
    render::{
        extract_resource::{ExtractResource, ExtractResourcePlugin},
        graph::CameraDriverLabel,
        render_asset::{RenderAssetUsages, RenderAssets},
        render_graph::{Node, NodeRunError, RenderGraph, RenderGraphContext, RenderLabel},
        render_resource::{
            binding_types::{storage_buffer_sized, texture_storage_2d, uniform_buffer},
            *,
        },
        renderer::{RenderContext, RenderDevice, RenderQueue},
        texture::GpuImage,
        Render, RenderApp, RenderSet,
    },
};

use crate::events::ReinitializeFluid;
use crate::features::fluid::{
    CpuFluidDevice, FluidBufferSlot, FluidCell, FluidDevice, FluidError, FluidFrame, FluidGridSimulator,
    FluidKernel, FluidResources, FluidUniforms, GridSize,
};
use crate::resources::{FluidAffector, FluidBackend, FluidSettings};

pub const FLUID_SHADER_PATH: &str = "shaders/fluid_automata.wgsl";

/// Output texture format: velocity in RG, energy in B, alpha 1.
pub const FLUID_TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba32Float;

const FLUID_TEXEL_BYTES: usize = 16;

// ============================================================================
// Plugin
// ============================================================================

/// Runs the fluid grid every frame and publishes `FluidSimulationTexture`.
pub struct FluidSimulationPlugin;

/// Main-world systems that turn settings and input into a frame request.
/// Anything writing `FluidAffector` or `FluidSettings` should run before it.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub struct FluidSimulationSet;

impl Plugin for FluidSimulationPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<FluidSettings>()
            .init_resource::<FluidAffector>()
            .init_resource::<CpuFluidSimulation>()
            .add_event::<ReinitializeFluid>();

        app.add_plugins(ExtractResourcePlugin::<FluidFrameRequest>::default());

        app.add_systems(Startup, setup_fluid_simulation);

        app.add_systems(
            Update,
            (
                normalize_fluid_settings,
                sync_fluid_texture,
                build_fluid_frame,
                run_cpu_simulation,
            )
                .chain()
                .in_set(FluidSimulationSet),
        );

        app.add_systems(Last, shutdown_fluid_simulation);

        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app.add_systems(
            Render,
            prepare_fluid_dispatches.in_set(RenderSet::PrepareBindGroups),
        );

        let mut render_graph = render_app.world_mut().resource_mut::<RenderGraph>();
        render_graph.add_node(FluidSimulationLabel, FluidSimulationNode);
        render_graph.add_node_edge(FluidSimulationLabel, CameraDriverLabel);
    }

    fn finish(&self, app: &mut App) {
        let Some(render_app) = app.get_sub_app_mut(RenderApp) else {
            return;
        };

        render_app
            .init_resource::<FluidComputePipeline>()
            .init_resource::<GpuFluidSimulation>();
    }
}

// ============================================================================
// Resources
// ============================================================================

/// The simulation output. `generation` is bumped, and `image` replaced,
/// whenever the grid is recreated.
#[derive(Resource, Clone, Debug)]
pub struct FluidSimulationTexture {
    pub image: Handle<Image>,
    pub size: GridSize,
    pub generation: u64,
}

/// What the simulation should do this frame. Extracted to the render world.
#[derive(Resource, Clone, Debug, ExtractResource)]
pub struct FluidFrameRequest {
    pub frame: FluidFrame,
    pub image: Handle<Image>,
    pub backend: FluidBackend,
    /// Set once the app is exiting; every backend releases its resources.
    pub shutdown: bool,
}

impl FluidFrameRequest {
    fn runs_on(&self, backend: FluidBackend) -> bool {
        !self.shutdown && self.backend == backend
    }
}

/// Host-side simulator used by the CPU backend.
#[derive(Resource, Default)]
pub struct CpuFluidSimulation {
    pub simulator: FluidGridSimulator<CpuFluidDevice>,
    pub device: CpuFluidDevice,
}

// ============================================================================
// Main World Systems
// ============================================================================

fn setup_fluid_simulation(
    mut commands: Commands,
    mut images: ResMut<Assets<Image>>,
    mut settings: ResMut<FluidSettings>,
    affector: Res<FluidAffector>,
) {
    let normalized = settings.normalized();
    if *settings != normalized {
        *settings = normalized;
    }

    let size = settings.grid_size();
    let image = create_fluid_image(&mut images, size);
    info!(
        "FluidSimulation: Setting up {} grid on the {:?} backend",
        size, settings.backend
    );

    commands.insert_resource(FluidFrameRequest {
        frame: FluidFrame {
            generation: 0,
            size,
            steps: settings.steps_per_frame,
            params: settings.step_params(affector.0, 0.0),
        },
        image: image.clone(),
        backend: settings.backend,
        shutdown: false,
    });
    commands.insert_resource(FluidSimulationTexture {
        image,
        size,
        generation: 0,
    });
}

/// Creates a zeroed storage texture the compute passes can write and sprites
/// can sample.
pub fn create_fluid_image(images: &mut Assets<Image>, size: GridSize) -> Handle<Image> {
    let mut image = Image {
        texture_descriptor: TextureDescriptor {
            label: Some("fluid_texture"),
            size: Extent3d {
                width: size.width,
                height: size.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: FLUID_TEXTURE_FORMAT,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::STORAGE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        },
        // Keep the CPU copy so the host backend can write texels into it.
        asset_usage: RenderAssetUsages::all(),
        ..default()
    };
    image.data = vec![0u8; size.cell_count() * FLUID_TEXEL_BYTES];

    images.add(image)
}

fn normalize_fluid_settings(mut settings: ResMut<FluidSettings>) {
    if !settings.is_changed() {
        return;
    }
    let normalized = settings.normalized();
    if *settings != normalized {
        *settings = normalized;
    }
}

/// Recreates the output texture on a re-initialize request or a grid size
/// change. The new generation makes both backends rebuild their grids.
fn sync_fluid_texture(
    mut reinitialize: EventReader<ReinitializeFluid>,
    settings: Res<FluidSettings>,
    mut texture: ResMut<FluidSimulationTexture>,
    mut images: ResMut<Assets<Image>>,
) {
    let requested = reinitialize.read().count() > 0;
    let size = settings.grid_size();
    if !requested && size == texture.size {
        return;
    }

    let old = std::mem::replace(&mut texture.image, create_fluid_image(&mut images, size));
    images.remove(&old);
    texture.size = size;
    texture.generation += 1;

    info!(
        "FluidSimulation: Re-initializing {} grid (generation {})",
        size, texture.generation
    );
}

fn build_fluid_frame(
    settings: Res<FluidSettings>,
    affector: Res<FluidAffector>,
    texture: Res<FluidSimulationTexture>,
    time: Res<Time>,
    mut request: ResMut<FluidFrameRequest>,
) {
    request.frame = FluidFrame {
        generation: texture.generation,
        size: texture.size,
        steps: settings.steps_per_frame,
        params: settings.step_params(affector.0, time.elapsed_secs()),
    };
    request.image = texture.image.clone();
    request.backend = settings.backend;
}

fn run_cpu_simulation(
    request: Res<FluidFrameRequest>,
    mut simulation: ResMut<CpuFluidSimulation>,
    mut images: ResMut<Assets<Image>>,
) {
    let CpuFluidSimulation { simulator, device } = &mut *simulation;

    if !request.runs_on(FluidBackend::Cpu) {
        if simulator.resources().is_some() {
            simulator.release(device);
        }
        return;
    }

    if let Err(err) = simulator.run_frame(device, &request.frame) {
        if !err.is_fatal() {
            debug!("FluidSimulation: CPU frame deferred: {}", err);
        }
        return;
    }

    let Some(texels) = simulator
        .resources()
        .and_then(|resources| device.texture(resources.texture))
    else {
        return;
    };
    let Some(image) = images.get_mut(&request.image) else {
        return;
    };
    if image.data.len() == texels.as_bytes().len() {
        image.data.copy_from_slice(texels.as_bytes());
    }
}

/// Releases the host grid and tells the render world to release its own.
fn shutdown_fluid_simulation(
    mut exit: EventReader<AppExit>,
    mut request: Option<ResMut<FluidFrameRequest>>,
    mut simulation: ResMut<CpuFluidSimulation>,
) {
    if exit.read().count() == 0 {
        return;
    }
    if let Some(request) = request.as_mut() {
        request.shutdown = true;
    }
    let CpuFluidSimulation { simulator, device } = &mut *simulation;
    simulator.release(device);
}

// ============================================================================
// GPU Device (render world)
// ============================================================================

/// Bytes in one cell buffer, or `None` when the size does not fit.
fn storage_bytes(cells: usize) -> Option<u64> {
    cells
        .checked_mul(size_of::<FluidCell>())
        .and_then(|bytes| u64::try_from(bytes).ok())
}

/// Buffers reused across frames, handed out in order and rewound each frame.
struct UniformPool<B> {
    buffers: Vec<B>,
    next: usize,
}

impl<B> Default for UniformPool<B> {
    fn default() -> Self {
        Self {
            buffers: Vec::new(),
            next: 0,
        }
    }
}

impl<B> UniformPool<B> {
    fn rewind(&mut self) {
        self.next = 0;
    }

    /// Next free buffer, creating one when the pool is exhausted. The flag is
    /// true when the buffer was just created.
    fn acquire(&mut self, create: impl FnOnce() -> B) -> (&B, bool) {
        let created = self.next == self.buffers.len();
        if created {
            self.buffers.push(create());
        }
        let index = self.next;
        self.next += 1;
        (&self.buffers[index], created)
    }
}

/// A compute dispatch recorded by the simulator, replayed by the node.
struct QueuedFluidDispatch {
    kernel: FluidKernel,
    bind_group: BindGroup,
    workgroups: UVec3,
}

/// `FluidDevice` backed by wgpu buffers. Dispatches are queued and recorded
/// later by `FluidSimulationNode` in the order they were issued.
pub struct GpuFluidDevice {
    render_device: RenderDevice,
    render_queue: RenderQueue,
    layout: BindGroupLayout,
    /// One uniform buffer per step issued this frame.
    uniform_pool: UniformPool<Buffer>,
    uniforms: Option<Buffer>,
    /// View and size of the current output image, if uploaded.
    output: Option<(TextureView, UVec2)>,
    queue: Vec<QueuedFluidDispatch>,
}

impl GpuFluidDevice {
    fn new(render_device: RenderDevice, render_queue: RenderQueue, layout: BindGroupLayout) -> Self {
        Self {
            render_device,
            render_queue,
            layout,
            uniform_pool: UniformPool::default(),
            uniforms: None,
            output: None,
            queue: Vec::new(),
        }
    }

    fn set_output(&mut self, image: Option<&GpuImage>) {
        self.output = image.map(|image| (image.texture_view.clone(), image.size));
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
    }

    /// Drops last frame's dispatches and makes its uniform buffers reusable.
    fn begin_frame(&mut self) {
        self.clear_queue();
        self.uniform_pool.rewind();
    }
}

impl FluidDevice for GpuFluidDevice {
    type Buffer = Buffer;
    type Texture = TextureView;

    fn create_buffer(&mut self, slot: FluidBufferSlot, cells: usize) -> Result<Buffer, FluidError> {
        let error = FluidError::Allocation {
            resource: slot.label(),
            cells,
        };
        let Some(bytes) = storage_bytes(cells) else {
            return Err(error);
        };
        let limits = self.render_device.limits();
        if bytes > limits.max_buffer_size || bytes > u64::from(limits.max_storage_buffer_binding_size) {
            return Err(error);
        }

        // wgpu zero-initializes new buffers.
        Ok(self.render_device.create_buffer(&BufferDescriptor {
            label: Some(slot.label()),
            size: bytes,
            usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }))
    }

    fn release_buffer(&mut self, buffer: Buffer) {
        buffer.destroy();
    }

    fn create_texture(&mut self, size: GridSize) -> Result<TextureView, FluidError> {
        match &self.output {
            Some((view, image_size)) if *image_size == UVec2::new(size.width, size.height) => Ok(view.clone()),
            _ => Err(FluidError::TextureUnavailable),
        }
    }

    fn release_texture(&mut self, _texture: TextureView) {
        // The image asset owns the texture.
    }

    fn bind_uniforms(&mut self, uniforms: &FluidUniforms) {
        let contents = bytemuck::bytes_of(uniforms);
        let render_device = &self.render_device;
        let (buffer, created) = self.uniform_pool.acquire(|| {
            render_device.create_buffer_with_data(&BufferInitDescriptor {
                label: Some("fluid_uniform_buffer"),
                contents,
                usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            })
        });
        if !created {
            self.render_queue.write_buffer(buffer, 0, contents);
        }
        self.uniforms = Some(buffer.clone());
    }

    fn dispatch(
        &mut self,
        kernel: FluidKernel,
        resources: &FluidResources<Buffer, TextureView>,
        workgroups: UVec3,
    ) -> Result<(), FluidError> {
        if workgroups.x == 0 || workgroups.y == 0 || workgroups.z == 0 {
            return Ok(());
        }
        let Some(uniforms) = &self.uniforms else {
            return Err(FluidError::NotInitialized);
        };

        let bind_group = self.render_device.create_bind_group(
            kernel.pass_label(),
            &self.layout,
            &BindGroupEntries::sequential((
                uniforms.as_entire_binding(),
                resources.divergence.as_entire_binding(),
                resources.gradient.as_entire_binding(),
                resources.blur.as_entire_binding(),
                resources.advection.as_entire_binding(),
                &resources.texture,
            )),
        );

        self.queue.push(QueuedFluidDispatch {
            kernel,
            bind_group,
            workgroups,
        });
        Ok(())
    }
}

/// Render-world simulator state.
#[derive(Resource)]
pub struct GpuFluidSimulation {
    simulator: FluidGridSimulator<GpuFluidDevice>,
    device: GpuFluidDevice,
}

impl FromWorld for GpuFluidSimulation {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>().clone();
        let render_queue = world.resource::<RenderQueue>().clone();
        let layout = world.resource::<FluidComputePipeline>().layout.clone();
        Self {
            simulator: FluidGridSimulator::new(),
            device: GpuFluidDevice::new(render_device, render_queue, layout),
        }
    }
}

/// Drives the GPU simulator for this frame and leaves its dispatches queued
/// for the node.
fn prepare_fluid_dispatches(
    request: Option<Res<FluidFrameRequest>>,
    pipeline: Res<FluidComputePipeline>,
    pipeline_cache: Res<PipelineCache>,
    gpu_images: Res<RenderAssets<GpuImage>>,
    mut simulation: ResMut<GpuFluidSimulation>,
) {
    let GpuFluidSimulation { simulator, device } = &mut *simulation;
    device.begin_frame();

    let Some(request) = request else { return };
    if !request.runs_on(FluidBackend::Gpu) {
        if simulator.resources().is_some() {
            simulator.release(device);
        }
        return;
    }

    // Hold the grid at rest until every kernel has compiled.
    if !pipeline.is_ready(&pipeline_cache) {
        return;
    }

    device.set_output(gpu_images.get(&request.image));
    if let Err(err) = simulator.run_frame(device, &request.frame) {
        if !err.is_fatal() {
            debug!("FluidSimulation: GPU frame deferred: {}", err);
        }
        device.clear_queue();
    }
}

// ============================================================================
// Render Graph Label
// ============================================================================

#[derive(Debug, Hash, PartialEq, Eq, Clone, RenderLabel)]
pub struct FluidSimulationLabel;

// ============================================================================
// Compute Node
// ============================================================================

struct FluidSimulationNode;

impl Node for FluidSimulationNode {
    fn run(
        &self,
        _graph: &mut RenderGraphContext,
        render_context: &mut RenderContext,
        world: &World,
    ) -> Result<(), NodeRunError> {
        let Some(pipeline) = world.get_resource::<FluidComputePipeline>() else {
            return Ok(());
        };
        let Some(simulation) = world.get_resource::<GpuFluidSimulation>() else {
            return Ok(());
        };
        let pipeline_cache = world.resource::<PipelineCache>();

        for dispatch in &simulation.device.queue {
            let Some(compute_pipeline) = pipeline_cache.get_compute_pipeline(pipeline.pipeline_id(dispatch.kernel))
            else {
                return Ok(());
            };

            let mut pass = render_context
                .command_encoder()
                .begin_compute_pass(&ComputePassDescriptor {
                    label: Some(dispatch.kernel.pass_label()),
                    timestamp_writes: None,
                });

            pass.set_pipeline(compute_pipeline);
            pass.set_bind_group(0, &dispatch.bind_group, &[]);
            pass.dispatch_workgroups(dispatch.workgroups.x, dispatch.workgroups.y, dispatch.workgroups.z);
        }

        Ok(())
    }
}

// ============================================================================
// Compute Pipeline Resource
// ============================================================================

/// One pipeline per kernel, all sharing a single bind group layout:
/// uniforms, the four cell buffers, then the output texture.
#[derive(Resource)]
pub struct FluidComputePipeline {
    layout: BindGroupLayout,
    pipelines: [CachedComputePipelineId; 6],
}

impl FluidComputePipeline {
    fn pipeline_id(&self, kernel: FluidKernel) -> CachedComputePipelineId {
        let index = FluidKernel::ALL
            .iter()
            .position(|k| *k == kernel)
            .unwrap_or_default();
        self.pipelines[index]
    }

    fn is_ready(&self, pipeline_cache: &PipelineCache) -> bool {
        self.pipelines
            .iter()
            .all(|id| pipeline_cache.get_compute_pipeline(*id).is_some())
    }
}

impl FromWorld for FluidComputePipeline {
    fn from_world(world: &mut World) -> Self {
        let render_device = world.resource::<RenderDevice>();

        let layout = render_device.create_bind_group_layout(
            "fluid_bind_group_layout",
            &BindGroupLayoutEntries::sequential(
                ShaderStages::COMPUTE,
                (
                    uniform_buffer::<FluidUniforms>(false),
                    // Divergence, gradient, blur, advection
                    storage_buffer_sized(false, None),
                    storage_buffer_sized(false, None),
                    storage_buffer_sized(false, None),
                    storage_buffer_sized(false, None),
                    texture_storage_2d(FLUID_TEXTURE_FORMAT, StorageTextureAccess::WriteOnly),
                ),
            ),
        );

        let shader = world.resource::<AssetServer>().load(FLUID_SHADER_PATH);

        let pipeline_cache = world.resource::<PipelineCache>();
        let pipelines = FluidKernel::ALL.map(|kernel| {
            pipeline_cache.queue_compute_pipeline(ComputePipelineDescriptor {
                label: Some(format!("fluid_{}_pipeline", kernel.entry_point()).into()),
                layout: vec![layout.clone()],
                shader: shader.clone(),
                shader_defs: vec![],
                entry_point: kernel.entry_point().into(),
                push_constant_ranges: vec![],
                zero_initialize_workgroup_memory: false,
            })
        });

        Self { layout, pipelines }
    }
}
