pub mod events;
pub mod features;
pub mod plugins;
pub mod resources;
