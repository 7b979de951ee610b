//! Test support for Kiln.
//!
//! [`RecordingBackend`] is a [`ShaderBackend`] that never touches a GPU. It
//! hands out sequential object names, counts every call, remembers what it
//! was asked to compile and link, and can be scripted to fail.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use kiln_core::{
    DeviceId, ProgramDescriptor, RawProgram, RawShader, ShaderBackend, ShaderDescriptor,
    ShaderStage, UniformBlockBinding,
};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

/// What the backend saw for one successful link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    pub label: String,
    pub stages: Vec<ShaderStage>,
    pub attributes: Vec<(String, u32)>,
    pub uniform_blocks: Vec<UniformBlockBinding>,
}

#[derive(Default)]
pub struct RecordingBackend {
    next_name: AtomicU64,
    device: AtomicU32,
    compiles: AtomicUsize,
    links: AtomicUsize,
    released_shaders: AtomicUsize,
    released_programs: AtomicUsize,
    compile_delay: Mutex<Option<Duration>>,
    failing_markers: Mutex<Vec<String>>,
    fail_links: Mutex<bool>,
    sources: Mutex<Vec<(ShaderStage, String)>>,
    link_records: Mutex<Vec<LinkRecord>>,
    live_shaders: Mutex<FxHashSet<RawShader>>,
}

impl RecordingBackend {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Upcast for APIs taking `Arc<dyn ShaderBackend>`.
    #[must_use]
    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn ShaderBackend> {
        self.clone()
    }

    /// Device stamped onto objects created from now on.
    pub fn set_device(&self, device: DeviceId) {
        self.device.store(device.0, Ordering::SeqCst);
    }

    /// Sleep inside every compile, to widen race windows in concurrency tests.
    pub fn set_compile_delay(&self, delay: Option<Duration>) {
        *self.compile_delay.lock() = delay;
    }

    /// Reject any source containing `marker`.
    pub fn fail_sources_containing(&self, marker: &str) {
        self.failing_markers.lock().push(marker.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_markers.lock().clear();
        *self.fail_links.lock() = false;
    }

    pub fn set_fail_links(&self, fail: bool) {
        *self.fail_links.lock() = fail;
    }

    #[must_use]
    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn released_shader_count(&self) -> usize {
        self.released_shaders.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn released_program_count(&self) -> usize {
        self.released_programs.load(Ordering::SeqCst)
    }

    /// Shader objects compiled and not yet released.
    #[must_use]
    pub fn live_shader_count(&self) -> usize {
        self.live_shaders.lock().len()
    }

    /// Every source successfully compiled, in call order.
    #[must_use]
    pub fn compiled_sources(&self) -> Vec<(ShaderStage, String)> {
        self.sources.lock().clone()
    }

    /// The most recent source compiled for `stage`.
    #[must_use]
    pub fn last_source(&self, stage: ShaderStage) -> Option<String> {
        self.sources
            .lock()
            .iter()
            .rev()
            .find(|(s, _)| *s == stage)
            .map(|(_, src)| src.clone())
    }

    #[must_use]
    pub fn link_records(&self) -> Vec<LinkRecord> {
        self.link_records.lock().clone()
    }

    fn next_name(&self) -> u64 {
        self.next_name.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn device(&self) -> DeviceId {
        DeviceId(self.device.load(Ordering::SeqCst))
    }
}

impl ShaderBackend for RecordingBackend {
    fn compile(&self, desc: &ShaderDescriptor<'_>) -> Result<RawShader, String> {
        let delay = *self.compile_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }

        if let Some(marker) = self
            .failing_markers
            .lock()
            .iter()
            .find(|m| desc.source.contains(m.as_str()))
        {
            return Err(format!("{}: rejected source containing `{marker}`", desc.label));
        }

        self.compiles.fetch_add(1, Ordering::SeqCst);
        self.sources
            .lock()
            .push((desc.stage, desc.source.to_string()));

        let raw = RawShader {
            device: self.device(),
            name: self.next_name(),
        };
        self.live_shaders.lock().insert(raw);
        Ok(raw)
    }

    fn link(&self, desc: &ProgramDescriptor<'_>) -> Result<RawProgram, String> {
        if *self.fail_links.lock() {
            return Err(format!("{}: link rejected", desc.label));
        }
        for (_, raw) in desc.shaders {
            if !self.live_shaders.lock().contains(raw) {
                return Err(format!("{}: shader object {} is not live", desc.label, raw.name));
            }
        }

        self.links.fetch_add(1, Ordering::SeqCst);
        self.link_records.lock().push(LinkRecord {
            label: desc.label.to_string(),
            stages: desc.shaders.iter().map(|(stage, _)| *stage).collect(),
            attributes: desc
                .attribute_bindings
                .iter()
                .map(|a| (a.name.clone(), a.location))
                .collect(),
            uniform_blocks: desc.uniform_block_bindings.to_vec(),
        });

        Ok(RawProgram {
            device: self.device(),
            name: self.next_name(),
        })
    }

    fn release_shader(&self, shader: RawShader) {
        self.live_shaders.lock().remove(&shader);
        self.released_shaders.fetch_add(1, Ordering::SeqCst);
    }

    fn release_program(&self, _program: RawProgram) {
        self.released_programs.fetch_add(1, Ordering::SeqCst);
    }
}
