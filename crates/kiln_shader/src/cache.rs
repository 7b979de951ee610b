//! Cache keys and tables.
//!
//! All three tables are plain `FxHashMap`s. They are only ever touched while
//! the manager's lock is held.

use kiln_core::{DefineMap, DeviceId, Program, Shader, ShaderId, ShaderStage};
use rustc_hash::FxHashMap;

/// Identifies a compiled shader: template, the caller's defines and stage.
///
/// Global defines are not part of the key; changing them only affects
/// future misses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShaderKey {
    pub template: String,
    pub defines: DefineMap,
    pub stage: ShaderStage,
}

impl ShaderKey {
    pub fn new(template: &str, defines: &DefineMap, stage: ShaderStage) -> Self {
        Self {
            template: template.to_string(),
            defines: defines.clone(),
            stage,
        }
    }
}

/// Identifies a linked program by the identity of its vertex and fragment shaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramKey {
    pub vertex: ShaderId,
    pub fragment: ShaderId,
}

impl ProgramKey {
    pub fn new(vertex: &Shader, fragment: &Shader) -> Self {
        Self {
            vertex: vertex.id(),
            fragment: fragment.id(),
        }
    }
}

#[derive(Default)]
pub struct ShaderCache {
    shaders: FxHashMap<ShaderKey, Shader>,
}

impl ShaderCache {
    pub fn get(&self, key: &ShaderKey) -> Option<&Shader> {
        self.shaders.get(key)
    }

    pub fn insert(&mut self, key: ShaderKey, shader: Shader) {
        self.shaders.insert(key, shader);
    }

    pub fn len(&self) -> usize {
        self.shaders.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &Shader> {
        self.shaders.values()
    }
}

#[derive(Default)]
pub struct ProgramCache {
    programs: FxHashMap<ProgramKey, Program>,
}

impl ProgramCache {
    pub fn get(&self, key: &ProgramKey) -> Option<&Program> {
        self.programs.get(key)
    }

    pub fn insert(&mut self, key: ProgramKey, program: Program) {
        self.programs.insert(key, program);
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &Program> {
        self.programs.values()
    }
}

/// Vertex shader id → synthesized geometry shader.
#[derive(Default)]
pub struct GeometryShaderMap {
    shaders: FxHashMap<ShaderId, Shader>,
}

impl GeometryShaderMap {
    pub fn get(&self, vertex: ShaderId) -> Option<&Shader> {
        self.shaders.get(&vertex)
    }

    pub fn contains(&self, vertex: ShaderId) -> bool {
        self.shaders.contains_key(&vertex)
    }

    pub fn insert(&mut self, vertex: ShaderId, geometry: Shader) {
        self.shaders.insert(vertex, geometry);
    }

    pub fn values(&self) -> impl Iterator<Item = &Shader> {
        self.shaders.values()
    }
}

/// Release GPU objects of everything in the tables. Returns (shaders, programs) released.
pub fn release_all(
    shaders: &ShaderCache,
    geometry: &GeometryShaderMap,
    programs: &ProgramCache,
    device: Option<DeviceId>,
) -> (usize, usize) {
    // programs first so the backend never sees a program outliving its stages
    let released_programs = programs
        .values()
        .filter(|p| p.release_gpu_object(device))
        .count();
    let released_shaders = shaders
        .values()
        .chain(geometry.values())
        .filter(|s| s.release_gpu_object(device))
        .count();
    (released_shaders, released_programs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_keys_discriminate_every_component() {
        let defines = DefineMap::from([("a", "1")]);
        let base = ShaderKey::new("t.vert", &defines, ShaderStage::Vertex);

        assert_eq!(base, ShaderKey::new("t.vert", &defines, ShaderStage::Vertex));
        assert_ne!(base, ShaderKey::new("u.vert", &defines, ShaderStage::Vertex));
        assert_ne!(base, ShaderKey::new("t.vert", &defines, ShaderStage::Fragment));
        assert_ne!(
            base,
            ShaderKey::new("t.vert", &DefineMap::from([("a", "2")]), ShaderStage::Vertex)
        );
        assert_ne!(
            base,
            ShaderKey::new("t.vert", &DefineMap::from([("b", "1")]), ShaderStage::Vertex)
        );
    }

    #[test]
    fn define_insertion_order_does_not_matter() {
        let ab: DefineMap = [("a", "1"), ("b", "2")].into_iter().collect();
        let ba: DefineMap = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(
            ShaderKey::new("t", &ab, ShaderStage::Vertex),
            ShaderKey::new("t", &ba, ShaderStage::Vertex)
        );
    }
}
