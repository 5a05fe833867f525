//! Fluid simulation configuration.
//!
//! Persisted as JSON under the user config directory. Values are corrected
//! rather than rejected: sizes round up to powers of two no larger than
//! [`MAX_GRID_DIMENSION`] with depth 1, the radius clamps to [0, 1] and at
//! least one step runs per frame.

use std::path::{Path, PathBuf};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::features::fluid::{FluidStepParams, GridSize};

const SETTINGS_DIR_NAME: &str = "fluid_automata";
const SETTINGS_FILE_NAME: &str = "settings.json";

/// Largest configurable grid width or height.
pub const MAX_GRID_DIMENSION: u32 = 8192;

/// Where the simulation runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FluidBackend {
    /// Compute shaders in the render world.
    #[default]
    Gpu,
    /// Host reference kernels, results uploaded through the image asset.
    Cpu,
}

#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidSettings {
    /// Grid extent in cells. Width and height round up to a power of two,
    /// depth is always 1.
    pub size: UVec3,
    /// Simulation steps run per rendered frame.
    pub steps_per_frame: u32,
    /// Added to every cell's advection velocity, in cells per step.
    pub global_velocity: Vec2,
    /// Affector influence radius in normalized texture units.
    pub affector_radius: f32,
    pub backend: FluidBackend,
}

impl Default for FluidSettings {
    fn default() -> Self {
        Self {
            size: UVec3::new(256, 256, 1),
            steps_per_frame: 1,
            global_velocity: Vec2::ZERO,
            affector_radius: 0.05,
            backend: FluidBackend::Gpu,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("settings file i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FluidSettings {
    /// Copy with every field brought into range. Corrections are logged.
    pub fn normalized(&self) -> Self {
        let mut settings = self.clone();

        let capped = self.size.min(UVec3::new(MAX_GRID_DIMENSION, MAX_GRID_DIMENSION, 1));
        let rounded = GridSize::from_extent(capped).extent();
        if rounded != self.size {
            warn!(
                "FluidSettings: Grid size {:?} corrected to {:?} (power of two, at most {} per side, depth 1)",
                self.size, rounded, MAX_GRID_DIMENSION
            );
            settings.size = rounded;
        }

        if self.steps_per_frame == 0 {
            warn!("FluidSettings: steps_per_frame must be at least 1");
            settings.steps_per_frame = 1;
        }

        let radius = if self.affector_radius.is_finite() {
            self.affector_radius.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if radius != self.affector_radius {
            warn!(
                "FluidSettings: Affector radius {} clamped to {}",
                self.affector_radius, radius
            );
            settings.affector_radius = radius;
        }

        if !self.global_velocity.is_finite() {
            warn!("FluidSettings: Non-finite global velocity reset to zero");
            settings.global_velocity = Vec2::ZERO;
        }

        settings
    }

    pub fn grid_size(&self) -> GridSize {
        GridSize::from_extent(self.size)
    }

    /// Parameters for one step at host time `time`.
    pub fn step_params(&self, affector: Option<Vec2>, time: f32) -> FluidStepParams {
        FluidStepParams {
            affector,
            affector_radius: self.affector_radius,
            global_velocity: self.global_velocity,
            time,
        }
    }

    /// `<config dir>/fluid_automata/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut path| {
            path.push(SETTINGS_DIR_NAME);
            path.push(SETTINGS_FILE_NAME);
            path
        })
    }

    pub fn load_from_file(path: &Path) -> Result<Self, SettingsError> {
        let contents = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&contents)?;
        Ok(settings.normalized())
    }

    /// Loads `path`, or the default path when `None`. Any failure falls back
    /// to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => {
                    warn!("FluidSettings: Could not determine config directory, using defaults");
                    return Self::default();
                }
            },
        };

        if !path.exists() {
            info!("FluidSettings: No settings at {:?}, using defaults", path);
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(settings) => {
                info!("FluidSettings: Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("FluidSettings: Failed to load {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    /// Writes pretty JSON to `path`, creating parent directories.
    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
                info!("FluidSettings: Created config directory {:?}", dir);
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        info!("FluidSettings: Saved settings to {:?}", path);
        Ok(())
    }

    /// Saves to the default path.
    pub fn save(&self) -> Result<(), SettingsError> {
        let path = Self::default_path().ok_or(SettingsError::NoConfigDir)?;
        self.save_to_file(&path)
    }
}

/// Affector position in normalized texture coordinates, `None` when nothing
/// is stirring the fluid. Written by input, read once per frame.
#[derive(Resource, Debug, Clone, Copy, Default, PartialEq)]
pub struct FluidAffector(pub Option<Vec2>);

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("fluid_automata_test_{}_{}", std::process::id(), name));
        path.push(SETTINGS_FILE_NAME);
        path
    }

    #[test]
    fn test_default_settings_are_normalized() {
        let settings = FluidSettings::default();
        assert_eq!(settings.normalized(), settings);
        assert_eq!(settings.grid_size(), GridSize::new(256, 256));
    }

    #[test]
    fn test_normalized_corrects_out_of_range_values() {
        let settings = FluidSettings {
            size: UVec3::new(100, 17, 3),
            steps_per_frame: 0,
            global_velocity: Vec2::new(f32::NAN, 1.0),
            affector_radius: 4.0,
            backend: FluidBackend::Cpu,
        }
        .normalized();

        assert_eq!(settings.size, UVec3::new(128, 32, 1));
        assert_eq!(settings.steps_per_frame, 1);
        assert_eq!(settings.global_velocity, Vec2::ZERO);
        assert_eq!(settings.affector_radius, 1.0);
        assert_eq!(settings.backend, FluidBackend::Cpu);
    }

    #[test]
    fn test_normalized_caps_grid_size() {
        let settings = FluidSettings {
            size: UVec3::new(1 << 30, 9000, 0),
            ..default()
        }
        .normalized();

        assert_eq!(
            settings.size,
            UVec3::new(MAX_GRID_DIMENSION, MAX_GRID_DIMENSION, 1)
        );
        assert_eq!(settings.grid_size().cell_count(), 8192 * 8192);
        assert_eq!(settings.normalized(), settings);
    }

    #[test]
    fn test_step_params_carry_settings() {
        let settings = FluidSettings {
            global_velocity: Vec2::new(0.5, -0.25),
            affector_radius: 0.2,
            ..default()
        };
        let params = settings.step_params(Some(Vec2::splat(0.5)), 3.0);
        assert_eq!(params.affector, Some(Vec2::splat(0.5)));
        assert_eq!(params.affector_radius, 0.2);
        assert_eq!(params.global_velocity, Vec2::new(0.5, -0.25));
        assert_eq!(params.time, 3.0);
    }

    #[test]
    fn test_settings_survive_save_and_load() {
        let path = temp_path("roundtrip");
        let settings = FluidSettings {
            size: UVec3::new(64, 128, 1),
            steps_per_frame: 3,
            global_velocity: Vec2::new(1.0, 0.0),
            affector_radius: 0.1,
            backend: FluidBackend::Cpu,
        };

        settings.save_to_file(&path).unwrap();
        let loaded = FluidSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded, settings);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_partial_file_fills_defaults_and_normalizes() {
        let path = temp_path("partial");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{ "size": [100, 100, 1], "backend": "Cpu" }"#).unwrap();

        let loaded = FluidSettings::load_from_file(&path).unwrap();
        assert_eq!(loaded.size, UVec3::new(128, 128, 1));
        assert_eq!(loaded.backend, FluidBackend::Cpu);
        assert_eq!(loaded.steps_per_frame, 1);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_malformed_file_falls_back_to_defaults() {
        let path = temp_path("malformed");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FluidSettings::load_from_file(&path),
            Err(SettingsError::Json(_))
        ));
        assert_eq!(FluidSettings::load_or_default(Some(&path)), FluidSettings::default());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let path = temp_path("missing");
        assert!(matches!(
            FluidSettings::load_from_file(&path),
            Err(SettingsError::Io(_))
        ));
        assert_eq!(FluidSettings::load_or_default(Some(&path)), FluidSettings::default());
    }
}
