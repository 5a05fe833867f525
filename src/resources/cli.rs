use std::path::PathBuf;

use bevy::prelude::*;

use super::fluid_settings::{FluidBackend, FluidSettings};

/// Command-line arguments parsed at startup. Each one overrides the
/// corresponding value from the settings file.
#[derive(Resource, Debug, Default, Clone, PartialEq)]
pub struct CliArgs {
    /// Square grid size in cells.
    /// Usage: `cargo run -- --size 512`
    pub size: Option<u32>,

    /// Steps per frame.
    /// Usage: `cargo run -- --steps 4`
    pub steps: Option<u32>,

    /// Run the host kernels instead of compute shaders.
    pub cpu: bool,

    /// Settings file to load instead of the default location.
    /// Usage: `cargo run -- --settings ./fluid.json`
    pub settings_path: Option<PathBuf>,

    /// Write the effective settings back to the settings file.
    pub save_settings: bool,
}

impl CliArgs {
    /// Parse the process arguments.
    /// Supports:
    /// - `--size <n>`: grid width and height
    /// - `--steps <n>`: steps per frame
    /// - `--cpu`: CPU backend
    /// - `--settings <path>`: settings file
    /// - `--save-settings`: persist the effective settings
    pub fn parse() -> Self {
        Self::parse_from(std::env::args())
    }

    /// Parse from an argument list whose first entry is the program name.
    pub fn parse_from<I>(args: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let mut cli = CliArgs::default();

        let mut i = 1; // Skip program name
        while i < args.len() {
            match args[i].as_str() {
                "--size" => {
                    cli.size = parse_number(&args, i, "--size");
                    i += 2;
                }
                "--steps" => {
                    cli.steps = parse_number(&args, i, "--steps");
                    i += 2;
                }
                "--settings" => {
                    if i + 1 < args.len() {
                        cli.settings_path = Some(PathBuf::from(&args[i + 1]));
                        info!("CLI: Using settings file '{}'", args[i + 1]);
                        i += 2;
                    } else {
                        warn!("CLI: --settings requires a path argument");
                        i += 1;
                    }
                }
                "--cpu" => {
                    cli.cpu = true;
                    info!("CLI: Using CPU fluid backend");
                    i += 1;
                }
                "--save-settings" => {
                    cli.save_settings = true;
                    i += 1;
                }
                arg => {
                    if arg.starts_with('-') {
                        warn!("CLI: Unknown argument '{}'", arg);
                    }
                    i += 1;
                }
            }
        }

        cli
    }

    /// Applies the overrides on top of `settings` and normalizes the result.
    pub fn apply(&self, settings: &FluidSettings) -> FluidSettings {
        let mut settings = settings.clone();
        if let Some(size) = self.size {
            settings.size = UVec3::new(size, size, 1);
        }
        if let Some(steps) = self.steps {
            settings.steps_per_frame = steps;
        }
        if self.cpu {
            settings.backend = FluidBackend::Cpu;
        }
        settings.normalized()
    }
}

fn parse_number(args: &[String], i: usize, flag: &str) -> Option<u32> {
    let Some(value) = args.get(i + 1) else {
        warn!("CLI: {} requires a number", flag);
        return None;
    };
    match value.parse() {
        Ok(n) => {
            info!("CLI: {} {}", flag, n);
            Some(n)
        }
        Err(_) => {
            warn!("CLI: {} expects a number, got '{}'", flag, value);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_flags() {
        let cli = CliArgs::parse_from([
            "fluid_automata",
            "--size",
            "512",
            "--steps",
            "3",
            "--cpu",
            "--settings",
            "fluid.json",
            "--save-settings",
        ]);
        assert_eq!(
            cli,
            CliArgs {
                size: Some(512),
                steps: Some(3),
                cpu: true,
                settings_path: Some(PathBuf::from("fluid.json")),
                save_settings: true,
            }
        );
    }

    #[test]
    fn test_bad_values_are_ignored() {
        let cli = CliArgs::parse_from(["fluid_automata", "--size", "big", "--bogus", "--steps"]);
        assert_eq!(cli, CliArgs::default());
    }

    #[test]
    fn test_apply_overrides_and_normalizes() {
        let cli = CliArgs::parse_from(["fluid_automata", "--size", "300", "--steps", "0", "--cpu"]);
        let settings = cli.apply(&FluidSettings::default());
        assert_eq!(settings.size, UVec3::new(512, 512, 1));
        assert_eq!(settings.steps_per_frame, 1);
        assert_eq!(settings.backend, FluidBackend::Cpu);
    }

    #[test]
    fn test_no_flags_keeps_settings() {
        let base = FluidSettings {
            steps_per_frame: 2,
            ..default()
        };
        assert_eq!(CliArgs::parse_from(["fluid_automata"]).apply(&base), base);
    }
}
