//! Shows the fluid texture on a sprite and stirs it with the cursor.

use bevy::prelude::*;
use bevy::window::PrimaryWindow;
use leafwing_input_manager::prelude::*;

use crate::plugins::fluid_simulation::{FluidSimulationSet, FluidSimulationTexture};
use crate::plugins::input::{get_default_input_map, FluidAction};
use crate::resources::FluidAffector;

/// Side length of the displayed fluid quad in world units.
pub const FLUID_DISPLAY_SIZE: f32 = 768.0;

#[derive(Component)]
pub struct MainCamera;

/// Sprite showing `FluidSimulationTexture`.
#[derive(Component)]
pub struct FluidDisplay;

pub struct FluidViewPlugin;

impl Plugin for FluidViewPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, spawn_camera);
        app.add_systems(PostStartup, spawn_fluid_display);
        app.add_systems(
            Update,
            (
                update_affector_from_cursor.before(FluidSimulationSet),
                sync_display_image.after(FluidSimulationSet),
            ),
        );
    }
}

fn spawn_camera(mut commands: Commands) {
    commands.spawn((
        Camera2d,
        MainCamera,
        InputManagerBundle::with_map(get_default_input_map()),
    ));
}

fn spawn_fluid_display(mut commands: Commands, texture: Res<FluidSimulationTexture>) {
    commands.spawn((
        Name::new("FluidDisplay"),
        Sprite {
            image: texture.image.clone(),
            custom_size: Some(Vec2::splat(FLUID_DISPLAY_SIZE)),
            ..default()
        },
        Transform::default(),
        FluidDisplay,
    ));
}

/// Points the sprite at the current texture after a re-initialize.
fn sync_display_image(
    texture: Res<FluidSimulationTexture>,
    mut displays: Query<&mut Sprite, With<FluidDisplay>>,
) {
    if !texture.is_changed() {
        return;
    }
    for mut sprite in &mut displays {
        if sprite.image != texture.image {
            sprite.image = texture.image.clone();
        }
    }
}

fn update_affector_from_cursor(
    window_query: Query<&Window, With<PrimaryWindow>>,
    camera_query: Query<(&Camera, &GlobalTransform, &ActionState<FluidAction>), With<MainCamera>>,
    display_query: Query<&GlobalTransform, With<FluidDisplay>>,
    mut affector: ResMut<FluidAffector>,
) {
    let position = stir_position(&window_query, &camera_query, &display_query);
    if affector.0 != position {
        affector.0 = position;
    }
}

fn stir_position(
    window_query: &Query<&Window, With<PrimaryWindow>>,
    camera_query: &Query<(&Camera, &GlobalTransform, &ActionState<FluidAction>), With<MainCamera>>,
    display_query: &Query<&GlobalTransform, With<FluidDisplay>>,
) -> Option<Vec2> {
    let (camera, camera_transform, action_state) = camera_query.get_single().ok()?;
    if !action_state.pressed(&FluidAction::Stir) {
        return None;
    }
    let window = window_query.get_single().ok()?;
    let display = display_query.get_single().ok()?;

    let cursor = window.cursor_position()?;
    let world = camera.viewport_to_world_2d(camera_transform, cursor).ok()?;
    world_to_uv(world, display.translation().truncate(), FLUID_DISPLAY_SIZE)
}

/// Normalized texture coordinate under a world point, or `None` off the quad.
/// Texture rows run top to bottom while world y grows upward.
pub fn world_to_uv(world: Vec2, center: Vec2, size: f32) -> Option<Vec2> {
    let local = (world - center) / size + Vec2::splat(0.5);
    let uv = Vec2::new(local.x, 1.0 - local.y);
    (uv.cmpge(Vec2::ZERO).all() && uv.cmple(Vec2::ONE).all()).then_some(uv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_to_uv_maps_quad_corners() {
        let center = Vec2::new(100.0, -50.0);
        let uv = world_to_uv(center, center, 200.0).unwrap();
        assert!((uv - Vec2::splat(0.5)).length() < 1e-6);

        // Top-left of the quad is the first texel row.
        let top_left = world_to_uv(center + Vec2::new(-100.0, 100.0), center, 200.0).unwrap();
        assert!((top_left - Vec2::ZERO).length() < 1e-6);

        let bottom_right = world_to_uv(center + Vec2::new(100.0, -100.0), center, 200.0).unwrap();
        assert!((bottom_right - Vec2::ONE).length() < 1e-6);
    }

    #[test]
    fn test_world_to_uv_outside_quad() {
        assert_eq!(world_to_uv(Vec2::new(101.0, 0.0), Vec2::ZERO, 200.0), None);
        assert_eq!(world_to_uv(Vec2::new(0.0, -120.0), Vec2::ZERO, 200.0), None);
    }
}
