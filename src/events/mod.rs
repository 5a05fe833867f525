use bevy::prelude::*;

/// Request to tear down and rebuild the fluid grid at the current settings.
/// Handled between frames; the simulation restarts from rest.
#[derive(Event, Debug, Default, Clone, Copy)]
pub struct ReinitializeFluid;
