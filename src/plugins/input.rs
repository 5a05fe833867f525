use bevy::prelude::*;
use leafwing_input_manager::prelude::*;

use crate::events::ReinitializeFluid;
use crate::plugins::fluid_simulation::FluidSimulationSet;
use crate::resources::FluidSettings;

#[derive(Actionlike, PartialEq, Eq, Clone, Copy, Hash, Debug, Reflect)]
pub enum FluidAction {
    /// Hold to drag the affector through the fluid.
    Stir,
    Reinitialize,
    SaveSettings,
}

pub struct InputPlugin;

impl Plugin for InputPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(InputManagerPlugin::<FluidAction>::default());
        app.add_systems(
            Update,
            (request_reinitialize, save_settings_on_request).before(FluidSimulationSet),
        );
    }
}

pub fn get_default_input_map() -> InputMap<FluidAction> {
    let mut input_map = InputMap::default();

    input_map.insert(FluidAction::Stir, MouseButton::Left);
    input_map.insert(FluidAction::Reinitialize, KeyCode::KeyR);
    input_map.insert(FluidAction::SaveSettings, KeyCode::F5);

    input_map
}

fn request_reinitialize(
    action_query: Query<&ActionState<FluidAction>>,
    mut events: EventWriter<ReinitializeFluid>,
) {
    let Ok(action_state) = action_query.get_single() else { return };
    if action_state.just_pressed(&FluidAction::Reinitialize) {
        info!("Input: Re-initialize requested");
        events.send(ReinitializeFluid);
    }
}

fn save_settings_on_request(
    action_query: Query<&ActionState<FluidAction>>,
    settings: Res<FluidSettings>,
) {
    let Ok(action_state) = action_query.get_single() else { return };
    if !action_state.just_pressed(&FluidAction::SaveSettings) {
        return;
    }
    if let Err(e) = settings.save() {
        warn!("Input: Failed to save fluid settings: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_map_binds_every_action() {
        let input_map = get_default_input_map();
        for action in [FluidAction::Stir, FluidAction::Reinitialize, FluidAction::SaveSettings] {
            assert!(input_map.get_buttonlike(&action).is_some(), "{:?} is unbound", action);
        }
    }
}
