use bevy::prelude::*;
use bevy::diagnostic::{DiagnosticsStore, FrameTimeDiagnosticsPlugin};
use bevy_egui::{egui, EguiContexts};

use crate::events::ReinitializeFluid;
use crate::plugins::fluid_simulation::{CpuFluidSimulation, FluidSimulationSet, FluidSimulationTexture};
use crate::resources::{FluidAffector, FluidBackend, FluidSettings};

/// Power-of-two grid sizes offered in the panel.
const GRID_SIZE_CHOICES: [u32; 7] = [16, 32, 64, 128, 256, 512, 1024];

pub struct DebugUiPlugin;

impl Plugin for DebugUiPlugin {
    fn build(&self, app: &mut App) {
        if !app.is_plugin_added::<FrameTimeDiagnosticsPlugin>() {
            app.add_plugins(FrameTimeDiagnosticsPlugin::default());
        }

        app.add_systems(Update, debug_panel.before(FluidSimulationSet));
    }
}

fn debug_panel(
    mut contexts: EguiContexts,
    mut settings: ResMut<FluidSettings>,
    texture: Option<Res<FluidSimulationTexture>>,
    affector: Res<FluidAffector>,
    cpu: Res<CpuFluidSimulation>,
    diagnostics: Res<DiagnosticsStore>,
    mut reinitialize: EventWriter<ReinitializeFluid>,
) {
    let mut edited = settings.clone();

    egui::Window::new("Fluid Debug").show(contexts.ctx_mut(), |ui| {
        if let Some(fps) = diagnostics
            .get(&FrameTimeDiagnosticsPlugin::FPS)
            .and_then(|diag| diag.smoothed())
        {
            ui.label(format!("FPS: {:.1}", fps));
        }

        if let Some(texture) = &texture {
            ui.label(format!("Grid: {} (generation {})", texture.size, texture.generation));
        }
        if edited.backend == FluidBackend::Cpu {
            ui.label(format!("CPU steps: {}", cpu.simulator.steps_taken()));
        }
        match affector.0 {
            Some(uv) => ui.label(format!("Affector: ({:.3}, {:.3})", uv.x, uv.y)),
            None => ui.label("Affector: none"),
        };

        ui.separator();
        ui.heading("Grid");

        egui::ComboBox::from_label("Size")
            .selected_text(format!("{}", edited.size.x))
            .show_ui(ui, |ui| {
                for choice in GRID_SIZE_CHOICES {
                    ui.selectable_value(&mut edited.size, UVec3::new(choice, choice, 1), format!("{}", choice));
                }
            });

        ui.horizontal(|ui| {
            ui.label("Backend");
            ui.radio_value(&mut edited.backend, FluidBackend::Gpu, "GPU");
            ui.radio_value(&mut edited.backend, FluidBackend::Cpu, "CPU");
        });

        ui.separator();
        ui.heading("Simulation");

        ui.add(egui::Slider::new(&mut edited.steps_per_frame, 1..=16).text("Steps per frame"));
        ui.add(egui::Slider::new(&mut edited.affector_radius, 0.0..=0.5).text("Affector radius"));
        ui.add(egui::Slider::new(&mut edited.global_velocity.x, -2.0..=2.0).text("Global velocity X"));
        ui.add(egui::Slider::new(&mut edited.global_velocity.y, -2.0..=2.0).text("Global velocity Y"));

        ui.separator();

        ui.horizontal(|ui| {
            if ui.button("Re-initialize").clicked() {
                reinitialize.send(ReinitializeFluid);
            }
            if ui.button("Save settings").clicked() {
                if let Err(e) = edited.save() {
                    warn!("DebugUi: Failed to save fluid settings: {}", e);
                }
            }
        });
    });

    if edited != *settings {
        *settings = edited;
    }
}
