//! Core types shared by the Kiln crates.
//!
//! - [`DefineMap`]: sorted define name → value map used in cache keys
//! - [`ShaderStage`]: pipeline stage enumeration
//! - [`ShaderBackend`]: the renderer's compiler / linker
//! - [`Shader`] / [`Program`]: shared GPU object handles
//! - [`ShaderManagerSettings`]: manager configuration
//! - [`KilnError`]: the error taxonomy

pub mod backend;
pub mod defines;
pub mod errors;
pub mod handle;
pub mod settings;
pub mod stage;

pub use backend::{
    AttributeBinding, DeviceId, ProgramDescriptor, RawProgram, RawShader, ShaderBackend,
    ShaderDescriptor, UboBinding, UniformBlockBinding,
};
pub use defines::DefineMap;
pub use errors::{KilnError, Result};
pub use handle::{Program, ProgramId, Shader, ShaderId};
pub use settings::{LightingMethod, ShaderManagerSettings};
pub use stage::ShaderStage;
