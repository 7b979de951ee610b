//! Shared GPU object handles.
//!
//! [`Shader`] and [`Program`] are cheap-to-clone `Arc` handles. Every clone
//! is a co-owner: the shader cache, any program linking the shader and the
//! caller all hold one. The backend object is destroyed either explicitly
//! (idempotent, see [`Shader::release_gpu_object`]) or when the last owner
//! drops its handle.
//!
//! Identity (`==`, `Hash`) is the process-unique id assigned at creation,
//! never the source text.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;
use xxhash_rust::xxh3::xxh3_128;

use crate::backend::{
    AttributeBinding, DeviceId, ProgramDescriptor, RawProgram, RawShader, ShaderBackend,
    ShaderDescriptor, UniformBlockBinding,
};
use crate::errors::{KilnError, Result};
use crate::stage::ShaderStage;

static NEXT_SHADER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`Shader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(u64);

impl ShaderId {
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Process-unique identity of a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(u64);

impl ProgramId {
    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

fn release_on(device: Option<DeviceId>, raw_device: DeviceId) -> bool {
    device.is_none_or(|d| d == raw_device)
}

// ─── Shader ──────────────────────────────────────────────────────────────────

struct ShaderInner {
    id: ShaderId,
    name: String,
    template: String,
    stage: ShaderStage,
    source: String,
    source_hash: u128,
    raw: Mutex<Option<RawShader>>,
    backend: Arc<dyn ShaderBackend>,
}

impl Drop for ShaderInner {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.get_mut().take() {
            self.backend.release_shader(raw);
        }
    }
}

/// A compiled shader object.
#[derive(Clone)]
pub struct Shader {
    inner: Arc<ShaderInner>,
}

impl Shader {
    /// Compile fully preprocessed `source` through `backend`.
    pub fn compile(
        backend: &Arc<dyn ShaderBackend>,
        template: &str,
        stage: ShaderStage,
        source: String,
    ) -> Result<Self> {
        let id = ShaderId(NEXT_SHADER_ID.fetch_add(1, Ordering::Relaxed));
        let name = format!("{template}#{}", id.0);
        let raw = backend
            .compile(&ShaderDescriptor {
                label: &name,
                stage,
                source: &source,
            })
            .map_err(|log| KilnError::Compile {
                template: template.to_string(),
                stage,
                log,
            })?;

        Ok(Self {
            inner: Arc::new(ShaderInner {
                id,
                name,
                template: template.to_string(),
                stage,
                source_hash: xxh3_128(source.as_bytes()),
                source,
                raw: Mutex::new(Some(raw)),
                backend: Arc::clone(backend),
            }),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ShaderId {
        self.inner.id
    }

    /// Unique debug name (`<template>#<id>`).
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    #[must_use]
    pub fn template(&self) -> &str {
        &self.inner.template
    }

    #[inline]
    #[must_use]
    pub fn stage(&self) -> ShaderStage {
        self.inner.stage
    }

    /// The final, preprocessed source handed to the backend.
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// xxh3-128 of [`source`](Self::source).
    #[inline]
    #[must_use]
    pub fn source_hash(&self) -> u128 {
        self.inner.source_hash
    }

    /// The backend object, if it has not been released.
    #[must_use]
    pub fn raw(&self) -> Option<RawShader> {
        *self.inner.raw.lock()
    }

    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.inner.raw.lock().is_some()
    }

    /// Number of live handles to this shader (cache, programs and callers).
    #[must_use]
    pub fn owner_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Return the backend object, recompiling the retained source if it was released.
    pub fn ensure_resident(&self) -> Result<RawShader> {
        let mut raw = self.inner.raw.lock();
        if let Some(existing) = *raw {
            return Ok(existing);
        }
        log::debug!("Recompiling released shader {}", self.inner.name);
        let compiled = self
            .inner
            .backend
            .compile(&ShaderDescriptor {
                label: &self.inner.name,
                stage: self.inner.stage,
                source: &self.inner.source,
            })
            .map_err(|log| KilnError::Compile {
                template: self.inner.template.clone(),
                stage: self.inner.stage,
                log,
            })?;
        *raw = Some(compiled);
        Ok(compiled)
    }

    /// Destroy the backend object if it lives on `device` (any device for `None`).
    ///
    /// Idempotent. Returns `true` when an object was actually released.
    pub fn release_gpu_object(&self, device: Option<DeviceId>) -> bool {
        let mut raw = self.inner.raw.lock();
        match *raw {
            Some(r) if release_on(device, r.device) => {
                *raw = None;
                drop(raw);
                self.inner.backend.release_shader(r);
                true
            }
            _ => false,
        }
    }
}

impl PartialEq for Shader {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Shader {}

impl Hash for Shader {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("name", &self.inner.name)
            .field("stage", &self.inner.stage)
            .field("raw", &self.raw())
            .finish_non_exhaustive()
    }
}

// ─── Program ─────────────────────────────────────────────────────────────────

struct ProgramInner {
    id: ProgramId,
    name: String,
    shaders: SmallVec<[Shader; 3]>,
    attribute_bindings: Vec<AttributeBinding>,
    uniform_block_bindings: Vec<UniformBlockBinding>,
    raw: Mutex<Option<RawProgram>>,
    backend: Arc<dyn ShaderBackend>,
}

impl ProgramInner {
    fn link(&self) -> Result<RawProgram> {
        let stages = self
            .shaders
            .iter()
            .map(|s| s.ensure_resident().map(|raw| (s.stage(), raw)))
            .collect::<Result<SmallVec<[_; 3]>>>()?;

        self.backend
            .link(&ProgramDescriptor {
                label: &self.name,
                shaders: &stages,
                attribute_bindings: &self.attribute_bindings,
                uniform_block_bindings: &self.uniform_block_bindings,
            })
            .map_err(|log| KilnError::Link {
                vertex: self.shaders.first().map(|s| s.name().to_string()).unwrap_or_default(),
                fragment: self.shaders.last().map(|s| s.name().to_string()).unwrap_or_default(),
                log,
            })
    }
}

impl Drop for ProgramInner {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.get_mut().take() {
            self.backend.release_program(raw);
        }
    }
}

/// A linked program object. Keeps its constituent shaders alive.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

impl Program {
    /// Link `shaders` (in pipeline order) through `backend`.
    pub fn link(
        backend: &Arc<dyn ShaderBackend>,
        shaders: SmallVec<[Shader; 3]>,
        attribute_bindings: Vec<AttributeBinding>,
        uniform_block_bindings: Vec<UniformBlockBinding>,
    ) -> Result<Self> {
        let id = ProgramId(NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed));
        let name = shaders
            .iter()
            .map(Shader::name)
            .collect::<Vec<_>>()
            .join("+");
        let mut inner = ProgramInner {
            id,
            name,
            shaders,
            attribute_bindings,
            uniform_block_bindings,
            raw: Mutex::new(None),
            backend: Arc::clone(backend),
        };
        let raw = inner.link()?;
        *inner.raw.get_mut() = Some(raw);
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ProgramId {
        self.inner.id
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Constituent shaders in pipeline order.
    #[inline]
    #[must_use]
    pub fn shaders(&self) -> &[Shader] {
        &self.inner.shaders
    }

    /// The shader attached for `stage`, if any.
    #[must_use]
    pub fn shader(&self, stage: ShaderStage) -> Option<&Shader> {
        self.inner.shaders.iter().find(|s| s.stage() == stage)
    }

    #[inline]
    #[must_use]
    pub fn attribute_bindings(&self) -> &[AttributeBinding] {
        &self.inner.attribute_bindings
    }

    #[inline]
    #[must_use]
    pub fn uniform_block_bindings(&self) -> &[UniformBlockBinding] {
        &self.inner.uniform_block_bindings
    }

    #[must_use]
    pub fn raw(&self) -> Option<RawProgram> {
        *self.inner.raw.lock()
    }

    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.inner.raw.lock().is_some()
    }

    /// Return the backend object, relinking (and recompiling stages) if it was released.
    pub fn ensure_resident(&self) -> Result<RawProgram> {
        let mut raw = self.inner.raw.lock();
        if let Some(existing) = *raw {
            return Ok(existing);
        }
        log::debug!("Relinking released program {}", self.inner.name);
        let linked = self.inner.link()?;
        *raw = Some(linked);
        Ok(linked)
    }

    /// Destroy the backend program if it lives on `device` (any device for `None`).
    ///
    /// Idempotent. Constituent shaders are not touched.
    pub fn release_gpu_object(&self, device: Option<DeviceId>) -> bool {
        let mut raw = self.inner.raw.lock();
        match *raw {
            Some(r) if release_on(device, r.device) => {
                *raw = None;
                drop(raw);
                self.inner.backend.release_program(r);
                true
            }
            _ => false,
        }
    }
}

impl PartialEq for Program {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Program {}

impl Hash for Program {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("name", &self.inner.name)
            .field("stages", &self.inner.shaders.len())
            .field("raw", &self.raw())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[derive(Default)]
    struct CountingBackend {
        next: AtomicU64,
        compiles: AtomicUsize,
        links: AtomicUsize,
        released_shaders: AtomicUsize,
        released_programs: AtomicUsize,
    }

    impl ShaderBackend for CountingBackend {
        fn compile(&self, desc: &ShaderDescriptor<'_>) -> std::result::Result<RawShader, String> {
            if desc.source.contains("#error") {
                return Err("0:1: #error".into());
            }
            self.compiles.fetch_add(1, Ordering::SeqCst);
            Ok(RawShader {
                device: DeviceId(0),
                name: self.next.fetch_add(1, Ordering::SeqCst),
            })
        }

        fn link(&self, _desc: &ProgramDescriptor<'_>) -> std::result::Result<RawProgram, String> {
            self.links.fetch_add(1, Ordering::SeqCst);
            Ok(RawProgram {
                device: DeviceId(0),
                name: self.next.fetch_add(1, Ordering::SeqCst),
            })
        }

        fn release_shader(&self, _shader: RawShader) {
            self.released_shaders.fetch_add(1, Ordering::SeqCst);
        }

        fn release_program(&self, _program: RawProgram) {
            self.released_programs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn backend() -> (Arc<CountingBackend>, Arc<dyn ShaderBackend>) {
        let counting = Arc::new(CountingBackend::default());
        let dyn_backend: Arc<dyn ShaderBackend> = counting.clone();
        (counting, dyn_backend)
    }

    #[test]
    fn compile_failure_carries_backend_log() {
        let (_, backend) = backend();
        let err = Shader::compile(&backend, "bad.frag", ShaderStage::Fragment, "#error".into())
            .unwrap_err();
        assert!(matches!(err, KilnError::Compile { ref log, .. } if log.contains("#error")));
    }

    #[test]
    fn release_is_idempotent_and_filtered_by_device() {
        let (counting, backend) = backend();
        let shader =
            Shader::compile(&backend, "a.vert", ShaderStage::Vertex, "void main(){}".into())
                .unwrap();

        assert!(!shader.release_gpu_object(Some(DeviceId(7))));
        assert!(shader.release_gpu_object(Some(DeviceId(0))));
        assert!(!shader.release_gpu_object(None));
        assert_eq!(counting.released_shaders.load(Ordering::SeqCst), 1);

        shader.ensure_resident().unwrap();
        assert_eq!(counting.compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn last_owner_drop_releases_once() {
        let (counting, backend) = backend();
        let vs = Shader::compile(&backend, "a.vert", ShaderStage::Vertex, String::new()).unwrap();
        let fs = Shader::compile(&backend, "a.frag", ShaderStage::Fragment, String::new()).unwrap();
        let program = Program::link(
            &backend,
            SmallVec::from_vec(vec![vs.clone(), fs.clone()]),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        drop(vs);
        drop(fs);
        assert_eq!(counting.released_shaders.load(Ordering::SeqCst), 0);

        drop(program);
        assert_eq!(counting.released_programs.load(Ordering::SeqCst), 1);
        assert_eq!(counting.released_shaders.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn released_program_relinks_with_recompiled_stages() {
        let (counting, backend) = backend();
        let vs = Shader::compile(&backend, "a.vert", ShaderStage::Vertex, String::new()).unwrap();
        let fs = Shader::compile(&backend, "a.frag", ShaderStage::Fragment, String::new()).unwrap();
        let program = Program::link(
            &backend,
            SmallVec::from_vec(vec![vs.clone(), fs.clone()]),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        vs.release_gpu_object(None);
        program.release_gpu_object(None);
        assert!(!program.is_resident());

        program.ensure_resident().unwrap();
        assert!(program.is_resident());
        assert!(vs.is_resident());
        assert_eq!(counting.links.load(Ordering::SeqCst), 2);
        assert_eq!(counting.compiles.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn identity_is_per_instance() {
        let (_, backend) = backend();
        let a = Shader::compile(&backend, "x", ShaderStage::Vertex, "same".into()).unwrap();
        let b = Shader::compile(&backend, "x", ShaderStage::Vertex, "same".into()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.source_hash(), b.source_hash());
    }
}
