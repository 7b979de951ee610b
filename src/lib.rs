#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! Kiln: shader template preprocessing, compilation and caching.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kiln::{DefineMap, ShaderManager, ShaderManagerSettings, ShaderStage};
//!
//! let manager = ShaderManager::new(backend, ShaderManagerSettings::default());
//! let defines = DefineMap::new().with("normalMap", "1");
//! let vs = manager.get_shader("objects.vert", &defines, ShaderStage::Vertex)?;
//! let fs = manager.get_shader("objects.frag", &defines, ShaderStage::Fragment)?;
//! let program = manager.get_program(&vs, &fs)?;
//! ```

pub use kiln_core::{
    AttributeBinding, DefineMap, DeviceId, KilnError, LightingMethod, Program, ProgramDescriptor,
    ProgramId, RawProgram, RawShader, Result, Shader, ShaderBackend, ShaderDescriptor, ShaderId,
    ShaderManagerSettings, ShaderStage, UboBinding, UniformBlockBinding,
};
pub use kiln_shader::{
    FileTemplateSource, GeometryShaderSynthesizer, MemoryTemplateSource, ShaderManager,
    StereoGeometrySynthesizer, TemplateSource,
};
