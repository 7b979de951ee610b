//! Shader Manager Settings
//!
//! [`ShaderManagerSettings`] is consumed once by `ShaderManager::new`. Most
//! fields can also be changed at runtime through the manager, but changes
//! only affect shaders and programs created afterwards.
//!
//! # Example
//!
//! ```rust,ignore
//! use kiln_core::{LightingMethod, ShaderManagerSettings};
//!
//! let settings = ShaderManagerSettings {
//!     shader_path: "resources/shaders".into(),
//!     lighting_method: LightingMethod::SingleUbo,
//!     stereo_geometry_shader: true,
//!     ..Default::default()
//! };
//! ```
//!
//! Settings deserialize from any serde format; missing fields take their
//! defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::backend::{AttributeBinding, UboBinding, UniformBlockBinding};
use crate::defines::DefineMap;

/// How the renderer feeds light data to shaders.
///
/// Only [`SingleUbo`](Self::SingleUbo) changes how programs are linked: the
/// `LightBufferBinding` uniform block is bound to [`UboBinding::LightBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightingMethod {
    /// Fixed-function style per-light uniforms.
    #[default]
    Ffp,
    /// Light list packed into per-object uniforms.
    PerObjectUniform,
    /// All lights in one shared uniform buffer.
    SingleUbo,
}

impl LightingMethod {
    /// Uniform block bindings every program must carry under this method.
    #[must_use]
    pub fn uniform_block_bindings(self) -> Vec<UniformBlockBinding> {
        match self {
            Self::SingleUbo => vec![UboBinding::LightBuffer.binding()],
            Self::Ffp | Self::PerObjectUniform => Vec::new(),
        }
    }
}

/// Configuration for a `ShaderManager`.
///
/// | Field                    | Description                                   | Default                     |
/// |--------------------------|-----------------------------------------------|-----------------------------|
/// | `shader_path`            | Root directory of template files              | `shaders`                   |
/// | `global_defines`         | Defines applied to every compile              | empty                       |
/// | `stereo_geometry_shader` | Synthesize stereo geometry shaders            | `false`                     |
/// | `stereo_view_count`      | Views replicated by the geometry shader       | `2`                         |
/// | `lighting_method`        | Lighting data layout                          | `Ffp`                       |
/// | `attribute_bindings`     | Fixed vertex attribute locations              | `aOffset`=6, `aRotation`=7  |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderManagerSettings {
    pub shader_path: PathBuf,
    pub global_defines: DefineMap,
    pub stereo_geometry_shader: bool,
    pub stereo_view_count: u32,
    pub lighting_method: LightingMethod,
    pub attribute_bindings: Vec<AttributeBinding>,
}

impl Default for ShaderManagerSettings {
    fn default() -> Self {
        Self {
            shader_path: PathBuf::from("shaders"),
            global_defines: DefineMap::new(),
            stereo_geometry_shader: false,
            stereo_view_count: 2,
            lighting_method: LightingMethod::default(),
            attribute_bindings: vec![
                AttributeBinding::new("aOffset", 6),
                AttributeBinding::new("aRotation", 7),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let settings: ShaderManagerSettings = serde_json::from_str(
            r#"{ "lighting_method": "single_ubo", "global_defines": { "clamp": "1" } }"#,
        )
        .unwrap();

        assert_eq!(settings.lighting_method, LightingMethod::SingleUbo);
        assert_eq!(settings.global_defines.get("clamp"), Some("1"));
        assert_eq!(settings.stereo_view_count, 2);
        assert_eq!(settings.attribute_bindings.len(), 2);
    }

    #[test]
    fn only_single_ubo_binds_light_buffer() {
        assert!(LightingMethod::Ffp.uniform_block_bindings().is_empty());
        assert!(LightingMethod::PerObjectUniform.uniform_block_bindings().is_empty());
        assert_eq!(
            LightingMethod::SingleUbo.uniform_block_bindings(),
            vec![UboBinding::LightBuffer.binding()]
        );
    }
}
