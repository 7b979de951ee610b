//! Shader Manager
//!
//! Central entry point: turns `(template, defines, stage)` requests into
//! cached [`Shader`]s and `(vertex, fragment)` pairs into cached
//! [`Program`]s.
//!
//! # Pipeline
//!
//! ```text
//! get_shader(name, defines, stage)
//!     │
//!     ├─ hit  → ensure GPU object → return
//!     └─ miss → template text → #include → @foreach → @defines → backend.compile
//!                    │
//!                    └─ Vertex + geometryShader=1 + stereo enabled
//!                           → synthesize + compile geometry shader (once)
//!
//! get_program(vertex, fragment)
//!     ├─ hit  → ensure GPU object → return
//!     └─ miss → [vertex, geometry?, fragment] → backend.link
//! ```
//!
//! Every operation runs under one lock for its full duration, so concurrent
//! requests for the same key compile exactly once. Failures are logged and
//! never cached.

use std::path::Path;
use std::sync::Arc;

use kiln_core::{
    AttributeBinding, DefineMap, DeviceId, LightingMethod, Program, Result, Shader,
    ShaderBackend, ShaderManagerSettings, ShaderStage,
};
use parking_lot::{Mutex, MutexGuard};
use smallvec::{SmallVec, smallvec};

use crate::cache::{GeometryShaderMap, ProgramCache, ProgramKey, ShaderCache, ShaderKey, release_all};
use crate::preprocess::{expand_includes, preprocess};
use crate::stereo::{GeometryShaderSynthesizer, StereoGeometrySynthesizer};
use crate::template::{FileTemplateSource, TemplateSource, TemplateStore};

/// Define that opts a vertex shader into stereo geometry synthesis.
pub const GEOMETRY_SHADER_DEFINE: &str = "geometryShader";

// Everything the manager mutates, protected by the lock.
struct ManagerState {
    templates: TemplateStore,
    shaders: ShaderCache,
    programs: ProgramCache,
    geometry: GeometryShaderMap,
    global_defines: DefineMap,
    stereo_geometry_shader: bool,
    lighting_method: LightingMethod,
    attribute_bindings: Vec<AttributeBinding>,
}

impl ManagerState {
    /// Template text → final source → compiled shader. Nothing is stored.
    fn build_shader(
        &mut self,
        backend: &Arc<dyn ShaderBackend>,
        template: &str,
        defines: &DefineMap,
        stage: ShaderStage,
    ) -> Result<Shader> {
        let text = self.templates.get_template_source(template)?;

        let templates = &mut self.templates;
        let included = expand_includes(&text, template, &mut |name: &str| {
            templates.get_template_source(name)
        })?;
        let source = preprocess(&included, defines, &self.global_defines)?;
        log::trace!("Preprocessed {template} ({stage}):\n{source}");

        Shader::compile(backend, template, stage, source)
    }
}

// Single-lock guard around the manager state. Call sites only see `lock()`,
// so finer-grained locking can be introduced here alone.
struct SharedState {
    inner: Mutex<ManagerState>,
}

impl SharedState {
    fn new(state: ManagerState) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.inner.lock()
    }
}

/// Compiles, links and caches shaders and programs.
///
/// `Send + Sync`; share it with `Arc`.
pub struct ShaderManager {
    backend: Arc<dyn ShaderBackend>,
    synthesizer: Box<dyn GeometryShaderSynthesizer>,
    state: SharedState,
}

impl ShaderManager {
    /// Create a manager reading templates from `settings.shader_path`.
    pub fn new(backend: Arc<dyn ShaderBackend>, settings: ShaderManagerSettings) -> Self {
        let templates = TemplateStore::new(FileTemplateSource::new(&settings.shader_path));
        let synthesizer = StereoGeometrySynthesizer::new(settings.stereo_view_count);

        Self {
            backend,
            synthesizer: Box::new(synthesizer),
            state: SharedState::new(ManagerState {
                templates,
                shaders: ShaderCache::default(),
                programs: ProgramCache::default(),
                geometry: GeometryShaderMap::default(),
                global_defines: settings.global_defines,
                stereo_geometry_shader: settings.stereo_geometry_shader,
                lighting_method: settings.lighting_method,
                attribute_bindings: settings.attribute_bindings,
            }),
        }
    }

    /// Replace where template text is loaded from.
    #[must_use]
    pub fn with_template_source(self, source: impl TemplateSource + 'static) -> Self {
        self.state.lock().templates.set_source(source);
        self
    }

    /// Replace the geometry shader synthesizer.
    #[must_use]
    pub fn with_geometry_synthesizer(
        mut self,
        synthesizer: impl GeometryShaderSynthesizer + 'static,
    ) -> Self {
        self.synthesizer = Box::new(synthesizer);
        self
    }

    // ========================================================================
    // Shaders
    // ========================================================================

    /// Cached shader for `(template, defines, stage)`, compiling it on first use.
    ///
    /// Failures are logged and yield `None`.
    pub fn get_shader(
        &self,
        template: &str,
        defines: &DefineMap,
        stage: ShaderStage,
    ) -> Option<Shader> {
        self.try_get_shader(template, defines, stage)
            .inspect_err(|e| log::error!("Failed to create shader {template} ({stage}): {e}"))
            .ok()
    }

    /// [`get_shader`](Self::get_shader) returning the error instead of logging it.
    pub fn try_get_shader(
        &self,
        template: &str,
        defines: &DefineMap,
        stage: ShaderStage,
    ) -> Result<Shader> {
        let mut state = self.state.lock();

        let key = ShaderKey::new(template, defines, stage);
        let shader = if let Some(cached) = state.shaders.get(&key) {
            let cached = cached.clone();
            cached.ensure_resident()?;
            cached
        } else {
            let shader = state.build_shader(&self.backend, template, defines, stage)?;
            log::debug!(
                "Compiled shader {} (cache size: {})",
                shader.name(),
                state.shaders.len() + 1
            );
            state.shaders.insert(key, shader.clone());
            shader
        };

        if stage == ShaderStage::Vertex
            && defines.is_enabled(GEOMETRY_SHADER_DEFINE)
            && state.stereo_geometry_shader
            && !state.geometry.contains(shader.id())
        {
            match self.create_geometry_shader(&shader) {
                Ok(geometry) => state.geometry.insert(shader.id(), geometry),
                Err(e) => log::error!(
                    "Failed to synthesize geometry shader for {}: {e}",
                    shader.name()
                ),
            }
        }

        Ok(shader)
    }

    fn create_geometry_shader(&self, vertex: &Shader) -> Result<Shader> {
        let source = self.synthesizer.synthesize(vertex)?;
        log::trace!("Synthesized geometry shader for {}:\n{source}", vertex.name());

        let template = format!("{}/stereo", vertex.template());
        let geometry = Shader::compile(&self.backend, &template, ShaderStage::Geometry, source)?;
        log::debug!(
            "Attached geometry shader {} to {}",
            geometry.name(),
            vertex.name()
        );
        Ok(geometry)
    }

    // ========================================================================
    // Programs
    // ========================================================================

    /// Cached program linking `vertex` and `fragment`, plus the vertex
    /// shader's synthesized geometry shader if it has one.
    pub fn get_program(&self, vertex: &Shader, fragment: &Shader) -> Option<Program> {
        self.try_get_program(vertex, fragment)
            .inspect_err(|e| {
                log::error!(
                    "Failed to link program {} + {}: {e}",
                    vertex.name(),
                    fragment.name()
                );
            })
            .ok()
    }

    /// [`get_program`](Self::get_program) returning the error instead of logging it.
    pub fn try_get_program(&self, vertex: &Shader, fragment: &Shader) -> Result<Program> {
        let mut state = self.state.lock();

        let key = ProgramKey::new(vertex, fragment);
        if let Some(cached) = state.programs.get(&key) {
            let cached = cached.clone();
            cached.ensure_resident()?;
            return Ok(cached);
        }

        let mut shaders: SmallVec<[Shader; 3]> = smallvec![vertex.clone()];
        if let Some(geometry) = state.geometry.get(vertex.id()) {
            shaders.push(geometry.clone());
        }
        shaders.push(fragment.clone());

        let program = Program::link(
            &self.backend,
            shaders,
            state.attribute_bindings.clone(),
            state.lighting_method.uniform_block_bindings(),
        )?;
        log::debug!("Linked program {}", program.name());

        state.programs.insert(key, program.clone());
        Ok(program)
    }

    // ========================================================================
    // Registry & toggles
    // ========================================================================

    /// Copy of the defines applied to every compile.
    pub fn global_defines(&self) -> DefineMap {
        self.state.lock().global_defines.clone()
    }

    /// Replace the global defines. Already compiled shaders keep their source.
    pub fn set_global_defines(&self, defines: DefineMap) {
        self.state.lock().global_defines = defines;
    }

    pub fn stereo_geometry_shader_enabled(&self) -> bool {
        self.state.lock().stereo_geometry_shader
    }

    /// Affects vertex shaders requested from now on.
    pub fn set_stereo_geometry_shader_enabled(&self, enabled: bool) {
        self.state.lock().stereo_geometry_shader = enabled;
    }

    pub fn lighting_method(&self) -> LightingMethod {
        self.state.lock().lighting_method
    }

    /// Affects programs linked from now on.
    pub fn set_lighting_method(&self, method: LightingMethod) {
        self.state.lock().lighting_method = method;
    }

    /// Load templates from files below `path` and forget memoized template text.
    pub fn set_shader_path(&self, path: impl AsRef<Path>) {
        let source = FileTemplateSource::new(path);
        log::debug!("Shader path set to {}", source.root_path().display());
        self.state.lock().templates.set_source(source);
    }

    /// Forget memoized text of `name` so the next cache miss re-reads it.
    ///
    /// Compiled shaders are not evicted.
    pub fn invalidate_template(&self, name: &str) -> bool {
        self.state.lock().templates.invalidate(name)
    }

    // ========================================================================
    // GPU resources
    // ========================================================================

    /// Release the GPU objects of all cached shaders and programs on `device`
    /// (every device for `None`). Cache entries stay; their objects are
    /// recreated the next time they are requested.
    pub fn release_gpu_objects(&self, device: Option<DeviceId>) {
        let state = self.state.lock();
        let (shaders, programs) =
            release_all(&state.shaders, &state.geometry, &state.programs, device);
        log::debug!("Released {shaders} shader and {programs} program objects");
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn shader_count(&self) -> usize {
        self.state.lock().shaders.len()
    }

    pub fn program_count(&self) -> usize {
        self.state.lock().programs.len()
    }

    /// The geometry shader synthesized for `vertex`, if any.
    pub fn geometry_shader_for(&self, vertex: &Shader) -> Option<Shader> {
        self.state.lock().geometry.get(vertex.id()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use kiln_core::KilnError;
    use kiln_dev_utils::RecordingBackend;

    use super::*;
    use crate::template::MemoryTemplateSource;

    fn manager(backend: &Arc<RecordingBackend>, source: MemoryTemplateSource) -> ShaderManager {
        let _ = env_logger::builder().is_test(true).try_init();
        ShaderManager::new(backend.as_dyn(), ShaderManagerSettings::default())
            .with_template_source(source)
    }

    #[test]
    fn missing_template_is_reported_and_not_cached() {
        let backend = RecordingBackend::new();
        let source = Arc::new(MemoryTemplateSource::new());
        let manager = ShaderManager::new(backend.as_dyn(), ShaderManagerSettings::default())
            .with_template_source(Arc::clone(&source));

        let err = manager
            .try_get_shader("late.frag", &DefineMap::new(), ShaderStage::Fragment)
            .unwrap_err();
        assert!(matches!(err, KilnError::TemplateNotFound { ref name, .. } if name == "late.frag"));
        assert_eq!(manager.shader_count(), 0);

        source.insert("late.frag", "void main() {}");
        assert!(
            manager
                .get_shader("late.frag", &DefineMap::new(), ShaderStage::Fragment)
                .is_some()
        );
    }

    #[test]
    fn includes_resolve_through_the_store() {
        let backend = RecordingBackend::new();
        let manager = manager(
            &backend,
            MemoryTemplateSource::new()
                .with("lib/common.glsl", "float k = @k;\n")
                .with("a.frag", "#include \"lib/common.glsl\"\nvoid main() {}\n"),
        );

        manager
            .try_get_shader("a.frag", &DefineMap::from([("k", "2.0")]), ShaderStage::Fragment)
            .unwrap();
        assert_eq!(
            backend.last_source(ShaderStage::Fragment).unwrap(),
            "float k = 2.0;\nvoid main() {}\n"
        );
    }

    #[test]
    fn custom_synthesizer_is_used() {
        struct Passthrough;
        impl GeometryShaderSynthesizer for Passthrough {
            fn synthesize(&self, vertex: &Shader) -> Result<String> {
                Ok(format!("// gs for {}", vertex.name()))
            }
        }

        let backend = RecordingBackend::new();
        let manager = manager(&backend, MemoryTemplateSource::new().with("a.vert", "v"))
            .with_geometry_synthesizer(Passthrough);
        manager.set_stereo_geometry_shader_enabled(true);

        let vs = manager
            .try_get_shader(
                "a.vert",
                &DefineMap::from([(GEOMETRY_SHADER_DEFINE, "1")]),
                ShaderStage::Vertex,
            )
            .unwrap();
        let gs = manager.geometry_shader_for(&vs).unwrap();
        assert_eq!(gs.stage(), ShaderStage::Geometry);
        assert_eq!(gs.source(), format!("// gs for {}", vs.name()));
    }
}
