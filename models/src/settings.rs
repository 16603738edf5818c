//! Runtime settings for models, streaming and cloth.
//!
//! Settings are read from TOML:
//!
//! ```toml
//! lod_transition_increment = 32
//! keep_cpu_mesh_data = true
//!
//! [streaming]
//! quality = 1.0
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AssetError;

/// Streaming coordinator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Target quality in `[0, 1]`; residency is `ceil(quality * lods)`.
    pub quality: f32,
    /// Upper bound on tasks started by one tick.
    pub max_tasks_per_tick: usize,
    /// Worker threads used to run tasks; `0` runs them on the ticking thread.
    pub worker_threads: usize,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            quality: 1.0,
            max_tasks_per_tick: 16,
            worker_threads: 0,
        }
    }
}

/// Cloth defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClothSettings {
    /// Paint values below this are fully fixed.
    pub fixed_paint_threshold: f32,
    /// Distance a particle with paint `1` may move from its rest position.
    pub max_particle_distance: f32,
}

impl Default for ClothSettings {
    fn default() -> Self {
        Self {
            fixed_paint_threshold: 0.01,
            max_particle_distance: 1000.0,
        }
    }
}

/// Settings shared by model assets and instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsSettings {
    /// Per-frame advance of the LOD transition dither, saturating at 255.
    pub lod_transition_increment: u8,
    /// Keep CPU copies of mesh buffers after upload (deformers and precise raycasts need them).
    pub keep_cpu_mesh_data: bool,
    /// Screen size below which new models are culled.
    pub default_min_screen_size: f32,
    pub streaming: StreamingSettings,
    pub cloth: ClothSettings,
}

impl Default for ModelsSettings {
    fn default() -> Self {
        Self {
            lod_transition_increment: 32,
            keep_cpu_mesh_data: true,
            default_min_screen_size: 0.0,
            streaming: StreamingSettings::default(),
            cloth: ClothSettings::default(),
        }
    }
}

impl ModelsSettings {
    /// Parse settings from a TOML string. Missing keys take default values.
    pub fn from_toml_str(source: &str) -> Result<Self, AssetError> {
        let settings: Self = toml::from_str(source)
            .map_err(|e| AssetError::InvalidData(format!("models settings: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, AssetError> {
        let source = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&source)?;
        log::info!("Loaded models settings from {}", path.display());
        Ok(settings)
    }

    /// Serialize to TOML.
    pub fn to_toml_string(&self) -> Result<String, AssetError> {
        toml::to_string_pretty(self)
            .map_err(|e| AssetError::InvalidData(format!("models settings: {e}")))
    }

    fn validate(&self) -> Result<(), AssetError> {
        if !(0.0..=1.0).contains(&self.streaming.quality) {
            return Err(AssetError::InvalidData(format!(
                "streaming quality {} is outside [0, 1]",
                self.streaming.quality
            )));
        }
        if self.lod_transition_increment == 0 {
            return Err(AssetError::InvalidData(
                "lod_transition_increment must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
