pub mod cli;
pub mod fluid_settings;

pub use cli::*;
pub use fluid_settings::*;
