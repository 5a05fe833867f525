//! Fluid compute kernels.
//!
//! [`FluidKernel`] names the six entry points of `shaders/fluid_automata.wgsl`
//! and declares which buffers each one reads and writes. The functions below
//! are the host reference implementations of the same kernels, used by the
//! CPU device and by the tests. Any change to the numerics here must be made
//! in the shader too.
//!
//! Every kernel runs one invocation per cell over `workgroups * TILE_SIZE`
//! cells, skipping invocations outside the grid. Neighbour reads clamp to the
//! grid edge.

use bevy::prelude::*;

use super::cell::{FluidCell, TILE_SIZE};
use super::grid::GridSize;
use super::params::{affector_active, FluidUniforms};

pub const VELOCITY_DISSIPATION: f32 = 0.999;
pub const PRESSURE_DISSIPATION: f32 = 0.99;
pub const ENERGY_DISSIPATION: f32 = 0.995;

/// Peak impulse added by the affector at its centre.
pub const AFFECTOR_FORCE: f32 = 0.5;
pub const AFFECTOR_PRESSURE: f32 = 1.0;
pub const AFFECTOR_ENERGY: f32 = 0.25;

/// 3x3 binomial weights, sum 16.
const BLUR_WEIGHTS: [[f32; 3]; 3] = [[1.0, 2.0, 1.0], [2.0, 4.0, 2.0], [1.0, 2.0, 1.0]];

/// One of the four cell buffers owned by the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FluidBufferSlot {
    Divergence,
    Gradient,
    Blur,
    Advection,
}

impl FluidBufferSlot {
    pub const ALL: [FluidBufferSlot; 4] = [
        FluidBufferSlot::Divergence,
        FluidBufferSlot::Gradient,
        FluidBufferSlot::Blur,
        FluidBufferSlot::Advection,
    ];

    pub fn label(self) -> &'static str {
        match self {
            FluidBufferSlot::Divergence => "fluid_divergence_buffer",
            FluidBufferSlot::Gradient => "fluid_gradient_buffer",
            FluidBufferSlot::Blur => "fluid_blur_buffer",
            FluidBufferSlot::Advection => "fluid_advection_buffer",
        }
    }
}

/// What a kernel writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelTarget {
    Buffer(FluidBufferSlot),
    Texture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FluidKernel {
    DivergenceInit,
    PressureDivergence,
    PressureGradient,
    Blur,
    Advection,
    WriteFluidTexture,
}

impl FluidKernel {
    pub const ALL: [FluidKernel; 6] = [
        FluidKernel::DivergenceInit,
        FluidKernel::PressureDivergence,
        FluidKernel::PressureGradient,
        FluidKernel::Blur,
        FluidKernel::Advection,
        FluidKernel::WriteFluidTexture,
    ];

    /// Passes of one simulation step, in dispatch order.
    pub const STEP_SEQUENCE: [FluidKernel; 5] = [
        FluidKernel::PressureDivergence,
        FluidKernel::PressureGradient,
        FluidKernel::Blur,
        FluidKernel::Advection,
        FluidKernel::WriteFluidTexture,
    ];

    /// WGSL entry point name.
    pub fn entry_point(self) -> &'static str {
        match self {
            FluidKernel::DivergenceInit => "divergence_init",
            FluidKernel::PressureDivergence => "pressure_divergence",
            FluidKernel::PressureGradient => "pressure_gradient",
            FluidKernel::Blur => "blur",
            FluidKernel::Advection => "advection",
            FluidKernel::WriteFluidTexture => "write_fluid_texture",
        }
    }

    /// Compute pass label.
    pub fn pass_label(self) -> &'static str {
        match self {
            FluidKernel::DivergenceInit => "fluid_divergence_init_pass",
            FluidKernel::PressureDivergence => "fluid_pressure_divergence_pass",
            FluidKernel::PressureGradient => "fluid_pressure_gradient_pass",
            FluidKernel::Blur => "fluid_blur_pass",
            FluidKernel::Advection => "fluid_advection_pass",
            FluidKernel::WriteFluidTexture => "fluid_write_texture_pass",
        }
    }

    pub fn reads(self) -> &'static [FluidBufferSlot] {
        match self {
            FluidKernel::DivergenceInit => &[],
            FluidKernel::PressureDivergence => &[FluidBufferSlot::Advection],
            FluidKernel::PressureGradient => &[FluidBufferSlot::Divergence],
            FluidKernel::Blur => &[FluidBufferSlot::Gradient],
            FluidKernel::Advection => &[FluidBufferSlot::Blur, FluidBufferSlot::Gradient],
            FluidKernel::WriteFluidTexture => &[FluidBufferSlot::Divergence],
        }
    }

    pub fn target(self) -> KernelTarget {
        match self {
            FluidKernel::DivergenceInit => KernelTarget::Buffer(FluidBufferSlot::Divergence),
            FluidKernel::PressureDivergence => KernelTarget::Buffer(FluidBufferSlot::Divergence),
            FluidKernel::PressureGradient => KernelTarget::Buffer(FluidBufferSlot::Gradient),
            FluidKernel::Blur => KernelTarget::Buffer(FluidBufferSlot::Blur),
            FluidKernel::Advection => KernelTarget::Buffer(FluidBufferSlot::Advection),
            FluidKernel::WriteFluidTexture => KernelTarget::Texture,
        }
    }
}

// ============================================================================
// Reference kernels
// ============================================================================

/// Calls `f(x, y)` for every invocation of a dispatch that lands in the grid.
fn for_each_invocation(size: GridSize, workgroups: UVec3, mut f: impl FnMut(u32, u32)) {
    if workgroups.z == 0 {
        return;
    }
    let span_x = (workgroups.x * TILE_SIZE).min(size.width);
    let span_y = (workgroups.y * TILE_SIZE).min(size.height);
    for y in 0..span_y {
        for x in 0..span_x {
            f(x, y);
        }
    }
}

fn fetch(cells: &[FluidCell], size: GridSize, x: i32, y: i32) -> FluidCell {
    let x = x.clamp(0, size.width as i32 - 1) as u32;
    let y = y.clamp(0, size.height as i32 - 1) as u32;
    cells[size.index(x, y)]
}

/// Bilinear sample at a cell-space position, clamped to the grid.
fn sample_bilinear(cells: &[FluidCell], size: GridSize, position: Vec2) -> FluidCell {
    let max = Vec2::new((size.width - 1) as f32, (size.height - 1) as f32);
    let p = position.clamp(Vec2::ZERO, max);
    let x0 = p.x.floor() as i32;
    let y0 = p.y.floor() as i32;
    let fx = p.x - x0 as f32;
    let fy = p.y - y0 as f32;

    let bottom = fetch(cells, size, x0, y0).scaled(1.0 - fx) + fetch(cells, size, x0 + 1, y0).scaled(fx);
    let top = fetch(cells, size, x0, y0 + 1).scaled(1.0 - fx) + fetch(cells, size, x0 + 1, y0 + 1).scaled(fx);
    bottom.scaled(1.0 - fy) + top.scaled(fy)
}

pub fn divergence_init(uniforms: &FluidUniforms, workgroups: UVec3, divergence: &mut [FluidCell]) {
    let size = uniforms.grid_size();
    for_each_invocation(size, workgroups, |x, y| {
        divergence[size.index(x, y)] = FluidCell::ZERO;
    });
}

/// Divergence of the advected velocity, folded into pressure.
pub fn pressure_divergence(
    uniforms: &FluidUniforms,
    workgroups: UVec3,
    advection: &[FluidCell],
    divergence: &mut [FluidCell],
) {
    let size = uniforms.grid_size();
    for_each_invocation(size, workgroups, |x, y| {
        let (xi, yi) = (x as i32, y as i32);
        let center = advection[size.index(x, y)];
        let left = fetch(advection, size, xi - 1, yi);
        let right = fetch(advection, size, xi + 1, yi);
        let down = fetch(advection, size, xi, yi - 1);
        let up = fetch(advection, size, xi, yi + 1);

        let div = 0.5 * ((right.velocity.x - left.velocity.x) + (up.velocity.y - down.velocity.y));

        divergence[size.index(x, y)] = FluidCell {
            velocity: center.velocity,
            pressure: center.pressure - div,
            energy: center.energy,
        };
    });
}

/// Subtracts the pressure gradient from velocity.
pub fn pressure_gradient(
    uniforms: &FluidUniforms,
    workgroups: UVec3,
    divergence: &[FluidCell],
    gradient: &mut [FluidCell],
) {
    let size = uniforms.grid_size();
    for_each_invocation(size, workgroups, |x, y| {
        let (xi, yi) = (x as i32, y as i32);
        let center = divergence[size.index(x, y)];
        let left = fetch(divergence, size, xi - 1, yi);
        let right = fetch(divergence, size, xi + 1, yi);
        let down = fetch(divergence, size, xi, yi - 1);
        let up = fetch(divergence, size, xi, yi + 1);

        let grad = 0.5 * Vec2::new(right.pressure - left.pressure, up.pressure - down.pressure);

        gradient[size.index(x, y)] = FluidCell {
            velocity: center.velocity - grad,
            pressure: center.pressure,
            energy: center.energy,
        };
    });
}

/// One relaxation iteration: 3x3 binomial average of every channel.
pub fn blur(uniforms: &FluidUniforms, workgroups: UVec3, gradient: &[FluidCell], blurred: &mut [FluidCell]) {
    let size = uniforms.grid_size();
    for_each_invocation(size, workgroups, |x, y| {
        let mut sum = FluidCell::ZERO;
        for (row, weights) in BLUR_WEIGHTS.iter().enumerate() {
            for (col, weight) in weights.iter().enumerate() {
                let sample = fetch(gradient, size, x as i32 + col as i32 - 1, y as i32 + row as i32 - 1);
                sum += sample.scaled(*weight);
            }
        }
        blurred[size.index(x, y)] = sum.scaled(1.0 / 16.0);
    });
}

/// Semi-Lagrangian transport of the gradient field along the blurred
/// velocity plus the global velocity, then affector forcing.
pub fn advection(
    uniforms: &FluidUniforms,
    workgroups: UVec3,
    blurred: &[FluidCell],
    gradient: &[FluidCell],
    advected: &mut [FluidCell],
) {
    let size = uniforms.grid_size();
    let affector = uniforms.affector_position;
    let forcing = affector_active(affector) && uniforms.affector_radius > 0.0;
    let impulse_dir = Vec2::new(uniforms.time.cos(), uniforms.time.sin());

    for_each_invocation(size, workgroups, |x, y| {
        let index = size.index(x, y);
        let velocity = blurred[index].velocity + uniforms.global_velocity;
        let source = Vec2::new(x as f32, y as f32) - velocity;
        let carried = sample_bilinear(gradient, size, source);

        let mut cell = FluidCell {
            velocity: carried.velocity * VELOCITY_DISSIPATION,
            pressure: carried.pressure * PRESSURE_DISSIPATION,
            energy: carried.energy * ENERGY_DISSIPATION,
        };

        if forcing {
            let distance = size.cell_uv(x, y).distance(affector);
            if distance < uniforms.affector_radius {
                let falloff = 1.0 - distance / uniforms.affector_radius;
                cell.velocity += impulse_dir * AFFECTOR_FORCE * falloff;
                cell.pressure += AFFECTOR_PRESSURE * falloff;
                cell.energy += AFFECTOR_ENERGY * falloff;
            }
        }

        advected[index] = cell;
    });
}

/// Display colour of a cell: velocity in red/green around 0.5, energy plus
/// pressure magnitude in blue, opaque.
pub fn texel_for(cell: &FluidCell) -> Vec4 {
    Vec4::new(
        0.5 + 0.5 * cell.velocity.x,
        0.5 + 0.5 * cell.velocity.y,
        cell.energy + cell.pressure.abs(),
        1.0,
    )
}

pub fn write_fluid_texture(
    uniforms: &FluidUniforms,
    workgroups: UVec3,
    divergence: &[FluidCell],
    texels: &mut [Vec4],
) {
    let size = uniforms.grid_size();
    for_each_invocation(size, workgroups, |x, y| {
        let index = size.index(x, y);
        texels[index] = texel_for(&divergence[index]);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniforms(size: GridSize) -> FluidUniforms {
        FluidUniforms::for_initialize(size, Vec2::ZERO)
    }

    #[test]
    fn test_step_sequence_is_a_dependency_chain() {
        // Each pass after the first reads what the previous one wrote.
        let writes: Vec<_> = FluidKernel::STEP_SEQUENCE.iter().map(|k| k.target()).collect();
        assert_eq!(writes[0], KernelTarget::Buffer(FluidBufferSlot::Divergence));
        for pair in FluidKernel::STEP_SEQUENCE.windows(2) {
            let KernelTarget::Buffer(written) = pair[0].target() else {
                panic!("only the last pass writes the texture");
            };
            if pair[1] != FluidKernel::WriteFluidTexture {
                assert!(pair[1].reads().contains(&written), "{:?} must read {:?}", pair[1], written);
            }
        }
        assert_eq!(FluidKernel::STEP_SEQUENCE[4].target(), KernelTarget::Texture);
        assert_eq!(FluidKernel::PressureDivergence.reads(), &[FluidBufferSlot::Advection]);
    }

    #[test]
    fn test_divergence_of_outflow_lowers_pressure() {
        let size = GridSize::new(16, 16);
        let mut advected = vec![FluidCell::ZERO; size.cell_count()];
        // Velocity pointing away from (8, 8) on both sides.
        advected[size.index(9, 8)].velocity = Vec2::new(1.0, 0.0);
        advected[size.index(7, 8)].velocity = Vec2::new(-1.0, 0.0);

        let mut divergence = vec![FluidCell::ZERO; size.cell_count()];
        pressure_divergence(&uniforms(size), size.workgroups(), &advected, &mut divergence);

        assert_eq!(divergence[size.index(8, 8)].pressure, -1.0);
        assert_eq!(divergence[size.index(9, 8)].velocity, Vec2::new(1.0, 0.0));
        assert!(divergence[size.index(3, 3)].is_zero());
    }

    #[test]
    fn test_gradient_pushes_velocity_downhill() {
        let size = GridSize::new(16, 16);
        let mut divergence = vec![FluidCell::ZERO; size.cell_count()];
        divergence[size.index(8, 8)].pressure = 2.0;

        let mut gradient = vec![FluidCell::ZERO; size.cell_count()];
        pressure_gradient(&uniforms(size), size.workgroups(), &divergence, &mut gradient);

        // Right of the peak the gradient points left, so velocity points right.
        assert_eq!(gradient[size.index(9, 8)].velocity, Vec2::new(1.0, 0.0));
        assert_eq!(gradient[size.index(7, 8)].velocity, Vec2::new(-1.0, 0.0));
        assert_eq!(gradient[size.index(8, 9)].velocity, Vec2::new(0.0, 1.0));
        assert_eq!(gradient[size.index(8, 8)].pressure, 2.0);
    }

    #[test]
    fn test_blur_preserves_uniform_field() {
        let size = GridSize::new(16, 16);
        let field = vec![
            FluidCell {
                velocity: Vec2::new(0.25, -0.5),
                pressure: 1.0,
                energy: 0.5,
            };
            size.cell_count()
        ];
        let mut blurred = vec![FluidCell::ZERO; size.cell_count()];
        blur(&uniforms(size), size.workgroups(), &field, &mut blurred);
        assert_eq!(blurred, field);
    }

    #[test]
    fn test_blur_spreads_a_spike() {
        let size = GridSize::new(16, 16);
        let mut field = vec![FluidCell::ZERO; size.cell_count()];
        field[size.index(5, 5)].energy = 16.0;

        let mut blurred = vec![FluidCell::ZERO; size.cell_count()];
        blur(&uniforms(size), size.workgroups(), &field, &mut blurred);

        assert_eq!(blurred[size.index(5, 5)].energy, 4.0);
        assert_eq!(blurred[size.index(6, 5)].energy, 2.0);
        assert_eq!(blurred[size.index(6, 6)].energy, 1.0);
        assert_eq!(blurred[size.index(7, 5)].energy, 0.0);
    }

    #[test]
    fn test_advection_transports_along_global_velocity() {
        let size = GridSize::new(16, 16);
        let mut gradient = vec![FluidCell::ZERO; size.cell_count()];
        gradient[size.index(4, 4)].energy = 1.0;
        let blurred = vec![FluidCell::ZERO; size.cell_count()];

        let mut params = uniforms(size);
        params.global_velocity = Vec2::new(1.0, 0.0);
        let mut advected = vec![FluidCell::ZERO; size.cell_count()];
        advection(&params, size.workgroups(), &blurred, &gradient, &mut advected);

        assert_eq!(advected[size.index(5, 4)].energy, ENERGY_DISSIPATION);
        assert_eq!(advected[size.index(4, 4)].energy, 0.0);
    }

    #[test]
    fn test_advection_forcing_is_local() {
        let size = GridSize::new(64, 64);
        let zeros = vec![FluidCell::ZERO; size.cell_count()];
        let mut params = uniforms(size);
        params.affector_position = size.cell_uv(10, 20);
        params.affector_radius = 0.01;

        let mut advected = vec![FluidCell::ZERO; size.cell_count()];
        advection(&params, size.workgroups(), &zeros, &zeros, &mut advected);

        let hit = advected[size.index(10, 20)];
        assert_eq!(hit.pressure, AFFECTOR_PRESSURE);
        assert_eq!(hit.energy, AFFECTOR_ENERGY);
        assert_eq!(hit.velocity, Vec2::new(AFFECTOR_FORCE, 0.0));

        let touched = advected.iter().filter(|c| !c.is_zero()).count();
        assert_eq!(touched, 1);
    }

    #[test]
    fn test_texture_mapping() {
        let cell = FluidCell {
            velocity: Vec2::new(1.0, -1.0),
            pressure: -0.5,
            energy: 0.25,
        };
        assert_eq!(texel_for(&cell), Vec4::new(1.0, 0.0, 0.75, 1.0));
        assert_eq!(texel_for(&FluidCell::ZERO), Vec4::new(0.5, 0.5, 0.0, 1.0));
    }

    #[test]
    fn test_partial_dispatch_only_covers_whole_tiles() {
        let size = GridSize::new(32, 32);
        let mut divergence = vec![
            FluidCell {
                energy: 1.0,
                ..default()
            };
            size.cell_count()
        ];
        divergence_init(&uniforms(size), UVec3::new(1, 1, 1), &mut divergence);

        assert!(divergence[size.index(15, 15)].is_zero());
        assert_eq!(divergence[size.index(16, 0)].energy, 1.0);
        assert_eq!(divergence[size.index(0, 16)].energy, 1.0);
    }
}
