use bevy::prelude::*;

/// Workgroup tile edge for every fluid kernel. Must match `@workgroup_size` in
/// `shaders/fluid_automata.wgsl`.
pub const TILE_SIZE: u32 = 16;

/// Number of f32 lanes in a [`FluidCell`].
pub const FLUID_CELL_FLOAT_COUNT: usize = 4;

/// One cell of fluid state as laid out in the GPU storage buffers.
///
/// Matches the WGSL `FluidCell` struct: `vec2<f32>` velocity followed by two
/// scalars, 16 bytes with no padding.
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct FluidCell {
    /// Velocity in cells per step.
    pub velocity: Vec2,
    /// Pressure seeded by divergence and the affector.
    pub pressure: f32,
    /// Passive scalar injected by the affector, used for display.
    pub energy: f32,
}

impl FluidCell {
    pub const ZERO: Self = Self {
        velocity: Vec2::ZERO,
        pressure: 0.0,
        energy: 0.0,
    };

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Component-wise scale, used by the blur weights and bilinear sampling.
    pub fn scaled(self, factor: f32) -> Self {
        Self {
            velocity: self.velocity * factor,
            pressure: self.pressure * factor,
            energy: self.energy * factor,
        }
    }
}

impl std::ops::Add for FluidCell {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            velocity: self.velocity + rhs.velocity,
            pressure: self.pressure + rhs.pressure,
            energy: self.energy + rhs.energy,
        }
    }
}

impl std::ops::AddAssign for FluidCell {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
