//! Simulation tunables.
//!
//! Set once at construction. Only `shading` may change at runtime, through
//! `FluidSimulation::set_shading`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Degradations applied when the device cannot linearly filter the field
/// formats. Each one is independent of the other.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilteringFallback {
    /// Dye resolution to use instead of `dye_resolution` (None keeps it).
    #[serde(default = "default_fallback_dye_resolution")]
    pub dye_resolution: Option<u32>,
    #[serde(default = "default_true")]
    pub disable_shading: bool,
}

impl Default for FilteringFallback {
    fn default() -> Self {
        Self {
            dye_resolution: default_fallback_dye_resolution(),
            disable_shading: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Shorter-axis resolution of the velocity/pressure grids
    #[serde(default = "default_sim_resolution")]
    pub sim_resolution: u32,
    /// Shorter-axis resolution of the dye (color) field
    #[serde(default = "default_dye_resolution")]
    pub dye_resolution: u32,
    /// Snapshot render size. Reserved; nothing renders at this size yet.
    #[serde(default = "default_capture_resolution")]
    pub capture_resolution: u32,
    #[serde(default = "default_density_dissipation")]
    pub density_dissipation: f32,
    #[serde(default = "default_velocity_dissipation")]
    pub velocity_dissipation: f32,
    /// Fraction of last frame's pressure kept as the Jacobi starting guess
    #[serde(default = "default_pressure")]
    pub pressure: f32,
    #[serde(default = "default_pressure_iterations")]
    pub pressure_iterations: u32,
    /// Vorticity confinement strength
    #[serde(default = "default_curl")]
    pub curl: f32,
    /// Splat radius in percent of the shorter canvas axis
    #[serde(default = "default_splat_radius")]
    pub splat_radius: f32,
    #[serde(default = "default_splat_force")]
    pub splat_force: f32,
    #[serde(default = "default_true")]
    pub shading: bool,
    /// Pointer color cycles per second
    #[serde(default = "default_color_update_speed")]
    pub color_update_speed: f32,
    /// Background RGB in [0, 1], drawn only when `transparent` is false
    #[serde(default = "default_back_color")]
    pub back_color: [f32; 3],
    #[serde(default = "default_true")]
    pub transparent: bool,
    #[serde(default)]
    pub filtering_fallback: FilteringFallback,
    /// Fixed RNG seed for reproducible colors and random splats
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_sim_resolution() -> u32 {
    128
}
fn default_dye_resolution() -> u32 {
    1440
}
fn default_capture_resolution() -> u32 {
    512
}
fn default_density_dissipation() -> f32 {
    3.5
}
fn default_velocity_dissipation() -> f32 {
    2.0
}
fn default_pressure() -> f32 {
    0.1
}
fn default_pressure_iterations() -> u32 {
    20
}
fn default_curl() -> f32 {
    3.0
}
fn default_splat_radius() -> f32 {
    0.2
}
fn default_splat_force() -> f32 {
    6000.0
}
fn default_color_update_speed() -> f32 {
    10.0
}
fn default_back_color() -> [f32; 3] {
    [0.5, 0.0, 0.0]
}
fn default_fallback_dye_resolution() -> Option<u32> {
    Some(256)
}
fn default_true() -> bool {
    true
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sim_resolution: default_sim_resolution(),
            dye_resolution: default_dye_resolution(),
            capture_resolution: default_capture_resolution(),
            density_dissipation: default_density_dissipation(),
            velocity_dissipation: default_velocity_dissipation(),
            pressure: default_pressure(),
            pressure_iterations: default_pressure_iterations(),
            curl: default_curl(),
            splat_radius: default_splat_radius(),
            splat_force: default_splat_force(),
            shading: true,
            color_update_speed: default_color_update_speed(),
            back_color: default_back_color(),
            transparent: true,
            filtering_fallback: FilteringFallback::default(),
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sim_resolution == 0 || self.dye_resolution == 0 {
            return Err(ConfigError::Invalid(
                "sim_resolution and dye_resolution must be positive".to_string(),
            ));
        }
        if self.filtering_fallback.dye_resolution == Some(0) {
            return Err(ConfigError::Invalid(
                "filtering_fallback.dye_resolution must be positive".to_string(),
            ));
        }
        let rates = [
            ("density_dissipation", self.density_dissipation),
            ("velocity_dissipation", self.velocity_dissipation),
            ("splat_radius", self.splat_radius),
            ("color_update_speed", self.color_update_speed),
        ];
        for (name, value) in rates {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be finite and non-negative, got {}",
                    name, value
                )));
            }
        }
        if self.splat_radius == 0.0 {
            return Err(ConfigError::Invalid("splat_radius must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.pressure) {
            return Err(ConfigError::Invalid(format!(
                "pressure must be in [0, 1], got {}",
                self.pressure
            )));
        }
        Ok(())
    }

    /// Load config from a JSON file. Missing fields take their defaults.
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_json(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Grid size whose shorter axis is `resolution` and whose longer axis follows
/// the canvas aspect ratio.
pub fn resolution_for(resolution: u32, width: u32, height: u32) -> (u32, u32) {
    let width = width.max(1);
    let height = height.max(1);
    let mut aspect = width as f32 / height as f32;
    if aspect < 1.0 {
        aspect = 1.0 / aspect;
    }
    let min = resolution as f32;
    let max = (resolution as f32 * aspect).round();
    if width > height {
        (max as u32, min as u32)
    } else {
        (min as u32, max as u32)
    }
}
