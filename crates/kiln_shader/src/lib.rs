//! Template store, preprocessor and shader/program caches.
//!
//! [`ShaderManager`] is the entry point; the other modules are usable on
//! their own (the preprocessor is a set of pure string transforms).

pub mod cache;
pub mod manager;
pub mod preprocess;
pub mod stereo;
pub mod template;

pub use cache::{ProgramKey, ShaderKey};
pub use manager::{GEOMETRY_SHADER_DEFINE, ShaderManager};
pub use preprocess::{
    DefineView, LineOrigin, MappedSource, expand_directives, expand_includes, preprocess,
    substitute_defines,
};
pub use stereo::{GeometryShaderSynthesizer, StereoGeometrySynthesizer};
pub use template::{FileTemplateSource, MemoryTemplateSource, TemplateSource, TemplateStore};
