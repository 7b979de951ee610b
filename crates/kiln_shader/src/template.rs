//! Template Store
//!
//! Loads raw template text by name through a [`TemplateSource`] and memoizes
//! it. Failed loads are never memoized, so a template that appears on disk
//! later is picked up by the next request.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_core::{KilnError, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

/// Where template text comes from.
pub trait TemplateSource: Send + Sync {
    /// Read the full text of template `name`.
    fn load(&self, name: &str) -> io::Result<String>;
}

/// Reads templates from files below a root directory.
#[derive(Debug, Clone)]
pub struct FileTemplateSource {
    root_path: PathBuf,
}

impl FileTemplateSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root_path: root.as_ref().to_path_buf(),
        }
    }

    #[inline]
    #[must_use]
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }
}

impl TemplateSource for FileTemplateSource {
    fn load(&self, name: &str) -> io::Result<String> {
        std::fs::read_to_string(self.root_path.join(name))
    }
}

/// Templates held in memory. Entries can be replaced at any time.
#[derive(Debug, Default)]
pub struct MemoryTemplateSource {
    templates: RwLock<FxHashMap<String, String>>,
}

impl MemoryTemplateSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(self, name: &str, source: &str) -> Self {
        self.insert(name, source);
        self
    }

    /// Add or replace a template.
    pub fn insert(&self, name: &str, source: &str) {
        self.templates
            .write()
            .insert(name.to_string(), source.to_string());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.templates.write().remove(name).is_some()
    }
}

impl TemplateSource for MemoryTemplateSource {
    fn load(&self, name: &str) -> io::Result<String> {
        self.templates.read().get(name).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no template named {name}"))
        })
    }
}

impl<T: TemplateSource + ?Sized> TemplateSource for Arc<T> {
    fn load(&self, name: &str) -> io::Result<String> {
        (**self).load(name)
    }
}

/// Memoizing front of a [`TemplateSource`].
///
/// Not synchronized on its own; the `ShaderManager` keeps it behind its lock.
pub struct TemplateStore {
    source: Box<dyn TemplateSource>,
    templates: FxHashMap<String, Arc<str>>,
}

impl TemplateStore {
    pub fn new(source: impl TemplateSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            templates: FxHashMap::default(),
        }
    }

    /// Swap the backing source and forget everything loaded so far.
    pub fn set_source(&mut self, source: impl TemplateSource + 'static) {
        self.source = Box::new(source);
        self.templates.clear();
    }

    /// Cached text of `name`, loading it on first use.
    ///
    /// Line endings are normalized to `\n`.
    pub fn get_template_source(&mut self, name: &str) -> Result<Arc<str>> {
        if let Some(text) = self.templates.get(name) {
            return Ok(Arc::clone(text));
        }

        let raw = self
            .source
            .load(name)
            .map_err(|source| KilnError::TemplateNotFound {
                name: name.to_string(),
                source,
            })?;

        let text: Arc<str> = if raw.contains('\r') {
            raw.replace("\r\n", "\n").into()
        } else {
            raw.into()
        };
        log::debug!("Loaded shader template {name} ({} bytes)", text.len());
        self.templates.insert(name.to_string(), Arc::clone(&text));
        Ok(text)
    }

    /// Forget memoized text for `name`. Returns whether it was loaded.
    pub fn invalidate(&mut self, name: &str) -> bool {
        self.templates.remove(name).is_some()
    }

    #[must_use]
    pub fn is_loaded(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
