use bevy::prelude::*;
use bevy::render::render_resource::ShaderType;

use super::grid::GridSize;

/// Affector position meaning "no affector". Any coordinate outside [0,1]²
/// disables forcing in the advection kernel; this is the one the host writes.
pub const AFFECTOR_SENTINEL: Vec2 = Vec2::new(-1.0, -1.0);

/// Host-supplied inputs for one simulation step. Immutable for the duration of
/// the step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FluidStepParams {
    /// Affector in normalized texture coordinates, or `None`.
    pub affector: Option<Vec2>,
    /// Influence radius in normalized texture units, [0, 1].
    pub affector_radius: f32,
    /// Added uniformly to the advection velocity.
    pub global_velocity: Vec2,
    /// Host time in seconds. Drives the affector impulse direction.
    pub time: f32,
}

impl Default for FluidStepParams {
    fn default() -> Self {
        Self {
            affector: None,
            affector_radius: 0.05,
            global_velocity: Vec2::ZERO,
            time: 0.0,
        }
    }
}

impl FluidStepParams {
    /// Position as bound to the kernels: the coordinate itself or the sentinel.
    pub fn encoded_affector(&self) -> Vec2 {
        encode_affector(self.affector)
    }
}

pub fn encode_affector(affector: Option<Vec2>) -> Vec2 {
    affector.unwrap_or(AFFECTOR_SENTINEL)
}

/// Whether an encoded affector position is live.
pub fn affector_active(position: Vec2) -> bool {
    position.x >= 0.0 && position.x <= 1.0 && position.y >= 0.0 && position.y <= 1.0
}

/// Uniform block shared by every kernel (`@group(0) @binding(0)`).
///
/// Scalars only, padded to 48 bytes so the std140 layout and the `Pod` bytes
/// agree.
#[derive(Clone, Copy, Debug, Default, PartialEq, ShaderType, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct FluidUniforms {
    pub size_x: u32,
    pub size_y: u32,
    pub size_z: u32,
    pub _padding0: u32,
    pub global_velocity: Vec2,
    pub affector_position: Vec2,
    pub affector_radius: f32,
    pub time: f32,
    pub _padding1: f32,
    pub _padding2: f32,
}

impl FluidUniforms {
    /// Uniforms bound for the divergence-zeroing pass: no affector, no time.
    pub fn for_initialize(size: GridSize, global_velocity: Vec2) -> Self {
        Self {
            size_x: size.width,
            size_y: size.height,
            size_z: size.depth,
            global_velocity,
            affector_position: AFFECTOR_SENTINEL,
            ..default()
        }
    }

    pub fn for_step(size: GridSize, params: &FluidStepParams) -> Self {
        Self {
            size_x: size.width,
            size_y: size.height,
            size_z: size.depth,
            global_velocity: params.global_velocity,
            affector_position: params.encoded_affector(),
            affector_radius: params.affector_radius,
            time: params.time,
            ..default()
        }
    }

    pub fn grid_size(&self) -> GridSize {
        GridSize {
            width: self.size_x,
            height: self.size_y,
            depth: self.size_z,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_block_size() {
        assert_eq!(std::mem::size_of::<FluidUniforms>(), 48);
        assert_eq!(FluidUniforms::min_size().get(), 48);
    }

    #[test]
    fn test_absent_affector_uses_sentinel() {
        let params = FluidStepParams::default();
        assert_eq!(params.encoded_affector(), AFFECTOR_SENTINEL);
        assert!(!affector_active(AFFECTOR_SENTINEL));
    }

    #[test]
    fn test_affector_active_range() {
        assert!(affector_active(Vec2::new(0.0, 0.0)));
        assert!(affector_active(Vec2::new(1.0, 1.0)));
        assert!(affector_active(Vec2::new(0.5, 0.25)));
        assert!(!affector_active(Vec2::new(1.01, 0.5)));
        assert!(!affector_active(Vec2::new(0.5, -0.01)));
    }

    #[test]
    fn test_step_uniforms_carry_params() {
        let size = GridSize::new(64, 32);
        let params = FluidStepParams {
            affector: Some(Vec2::new(0.25, 0.75)),
            affector_radius: 0.1,
            global_velocity: Vec2::new(1.0, 0.0),
            time: 2.5,
        };
        let uniforms = FluidUniforms::for_step(size, &params);
        assert_eq!(uniforms.grid_size(), size);
        assert_eq!(uniforms.affector_position, Vec2::new(0.25, 0.75));
        assert_eq!(uniforms.affector_radius, 0.1);
        assert_eq!(uniforms.global_velocity, Vec2::new(1.0, 0.0));
        assert_eq!(uniforms.time, 2.5);
    }

    #[test]
    fn test_initialize_uniforms_disable_affector() {
        let uniforms = FluidUniforms::for_initialize(GridSize::new(16, 16), Vec2::X);
        assert_eq!(uniforms.affector_position, AFFECTOR_SENTINEL);
        assert_eq!(uniforms.time, 0.0);
        assert_eq!(uniforms.global_velocity, Vec2::X);
    }
}
