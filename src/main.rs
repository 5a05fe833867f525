use bevy::prelude::*;
use bevy::render::settings::{RenderCreation, WgpuFeatures, WgpuSettings};
use bevy::render::RenderPlugin;
use bevy_egui::EguiPlugin;
use fluid_automata::plugins::debug_ui::DebugUiPlugin;
use fluid_automata::plugins::fluid_simulation::FluidSimulationPlugin;
use fluid_automata::plugins::fluid_view::FluidViewPlugin;
use fluid_automata::plugins::input::InputPlugin;
use fluid_automata::resources::{CliArgs, FluidSettings};

fn main() {
    App::new()
        .add_plugins(
            DefaultPlugins
                .set(ImagePlugin::default_nearest())
                .set(WindowPlugin {
                    primary_window: Some(Window {
                        title: "Fluid Automata".into(),
                        ..default()
                    }),
                    ..default()
                })
                // The sprite samples the Rgba32Float output texture.
                .set(RenderPlugin {
                    render_creation: RenderCreation::Automatic(WgpuSettings {
                        features: WgpuFeatures::FLOAT32_FILTERABLE,
                        ..default()
                    }),
                    ..default()
                }),
        )
        .add_plugins(EguiPlugin)
        .add_systems(PreStartup, load_settings)
        .add_plugins(FluidSimulationPlugin)
        .add_plugins(InputPlugin)
        .add_plugins(FluidViewPlugin)
        .add_plugins(DebugUiPlugin)
        .run();
}

/// Settings file plus command-line overrides. Runs before the simulation
/// creates its grid.
fn load_settings(mut commands: Commands) {
    let cli = CliArgs::parse();
    let settings = cli.apply(&FluidSettings::load_or_default(cli.settings_path.as_deref()));

    if cli.save_settings {
        let saved = match &cli.settings_path {
            Some(path) => settings.save_to_file(path),
            None => settings.save(),
        };
        if let Err(e) = saved {
            warn!("Failed to save fluid settings: {}", e);
        }
    }

    commands.insert_resource(settings);
    commands.insert_resource(cli);
}
