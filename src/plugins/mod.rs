pub mod debug_ui;
pub mod fluid_simulation;
pub mod fluid_view;
pub mod input;
