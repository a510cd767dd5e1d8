//! Renderer Settings
//!
//! Renderer-wide configuration. Several fields feed the program permutation
//! key, so [`Renderer::set_settings`](crate::renderer::Renderer::set_settings)
//! bumps a version that invalidates every cached key.
//!
//! ```rust,ignore
//! let settings = RendererSettings::from_json(r#"{ "tone_mapping": "AcesFilmic" }"#)?;
//! renderer.set_settings(settings);
//! ```

use glam::Vec4;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Color space of the final framebuffer write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorSpace {
    #[default]
    Srgb,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ToneMapping {
    #[default]
    None,
    Linear,
    Reinhard,
    Cineon,
    AcesFilmic,
    AgX,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub output_color_space: ColorSpace,
    pub tone_mapping: ToneMapping,
    pub tone_mapping_exposure: f32,

    /// When false, buckets keep traversal order instead of being sorted.
    pub sort_objects: bool,
    pub shadows_enabled: bool,
    /// World-space planes `(normal, constant)`; fragments on the negative
    /// side are clipped.
    pub clipping_planes: Vec<Vec4>,
    pub clear_color: [f32; 4],

    /// Upper bound on lights of one kind in a single permutation.
    pub max_lights_per_kind: usize,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            output_color_space: ColorSpace::Srgb,
            tone_mapping: ToneMapping::None,
            tone_mapping_exposure: 1.0,
            sort_objects: true,
            shadows_enabled: false,
            clipping_planes: Vec::new(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_lights_per_kind: 16,
        }
    }
}

impl RendererSettings {
    /// Parses settings from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
