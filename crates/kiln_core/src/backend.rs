//! Graphics backend interface.
//!
//! Kiln never talks to a graphics API directly. Compilation, linking and
//! destruction of GPU objects go through a [`ShaderBackend`] supplied by the
//! renderer; Kiln only tracks the opaque handles it returns.

use serde::{Deserialize, Serialize};

use crate::stage::ShaderStage;

/// Identifies the device / context a GPU object was created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

/// Opaque backend handle of a compiled shader object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawShader {
    pub device: DeviceId,
    pub name: u64,
}

/// Opaque backend handle of a linked program object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawProgram {
    pub device: DeviceId,
    pub name: u64,
}

/// Vertex attribute name bound to a fixed location at link time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributeBinding {
    pub name: String,
    pub location: u32,
}

impl AttributeBinding {
    pub fn new(name: impl Into<String>, location: u32) -> Self {
        Self {
            name: name.into(),
            location,
        }
    }
}

/// Uniform block name bound to a fixed buffer slot at link time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniformBlockBinding {
    pub block: String,
    pub slot: u32,
}

/// Uniform-buffer slots shared between generated shaders and the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UboBinding {
    LightBuffer,
}

impl UboBinding {
    #[must_use]
    pub fn slot(self) -> u32 {
        match self {
            Self::LightBuffer => 0,
        }
    }

    /// Name of the uniform block that must be bound to this slot.
    #[must_use]
    pub fn block_name(self) -> &'static str {
        match self {
            Self::LightBuffer => "LightBufferBinding",
        }
    }

    #[must_use]
    pub fn binding(self) -> UniformBlockBinding {
        UniformBlockBinding {
            block: self.block_name().to_string(),
            slot: self.slot(),
        }
    }
}

/// Everything the backend needs to compile one shader object.
#[derive(Debug, Clone, Copy)]
pub struct ShaderDescriptor<'a> {
    /// Unique debug label of the shader.
    pub label: &'a str,
    pub stage: ShaderStage,
    /// Fully preprocessed source.
    pub source: &'a str,
}

/// Everything the backend needs to link one program object.
#[derive(Debug, Clone, Copy)]
pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    /// Compiled stages in pipeline order.
    pub shaders: &'a [(ShaderStage, RawShader)],
    pub attribute_bindings: &'a [AttributeBinding],
    pub uniform_block_bindings: &'a [UniformBlockBinding],
}

/// The renderer's shader compiler and linker.
///
/// Implementations must be callable from any thread; Kiln serializes its own
/// calls but may issue them from whichever thread requested a shader.
pub trait ShaderBackend: Send + Sync {
    /// Compile `desc.source`, returning the backend diagnostic on failure.
    fn compile(&self, desc: &ShaderDescriptor<'_>) -> Result<RawShader, String>;

    /// Link the given compiled stages, returning the backend diagnostic on failure.
    fn link(&self, desc: &ProgramDescriptor<'_>) -> Result<RawProgram, String>;

    /// Destroy a shader object. Called at most once per handle.
    fn release_shader(&self, shader: RawShader);

    /// Destroy a program object. Called at most once per handle.
    fn release_program(&self, program: RawProgram);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_buffer_binding_contract() {
        let binding = UboBinding::LightBuffer.binding();
        assert_eq!(binding.block, "LightBufferBinding");
        assert_eq!(binding.slot, 0);
    }
}
