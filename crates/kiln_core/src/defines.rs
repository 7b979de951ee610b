//! Shader Define Maps
//!
//! A [`DefineMap`] is the set of named string values that parameterize a
//! shader template: `@name` tokens are replaced by their values and `@if`
//! conditions test them.
//!
//! # Ordering
//!
//! Entries are kept sorted by key (byte-wise lexicographic order), so two maps
//! holding the same definitions iterate, hash and compare identically no matter
//! in which order they were built. This is what makes a `DefineMap` usable as
//! part of a cache key.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kiln_core::DefineMap;
//!
//! let mut defines = DefineMap::new();
//! defines.set("normalMap", "1");
//! defines.set("shadowMapsCount", "3");
//!
//! let hash = defines.compute_hash();
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A sorted collection of shader define values.
///
/// # Performance
///
/// - Insertion/lookup: O(log n) binary search (plus shifting on insert)
/// - Equality / hashing: O(n) over the sorted entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct DefineMap {
    defines: Vec<(String, String)>,
}

impl DefineMap {
    /// Create an empty define map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            defines: Vec::new(),
        }
    }

    fn position(&self, key: &str) -> Result<usize, usize> {
        self.defines
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
    }

    /// Set a define (maintains sorted order).
    ///
    /// If the key exists its value is replaced; otherwise a new entry is inserted.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Ok(idx) => {
                self.defines[idx].1 = value;
            }
            Err(idx) => {
                self.defines.insert(idx, (key, value));
            }
        }
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Remove a define, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key)
            .ok()
            .map(|idx| self.defines.remove(idx).1)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_ok()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key)
            .ok()
            .map(|idx| self.defines[idx].1.as_str())
    }

    /// `true` when `key` is defined with exactly the value `"1"`.
    ///
    /// This is the convention used for feature switches such as `geometryShader`.
    #[must_use]
    pub fn is_enabled(&self, key: &str) -> bool {
        self.get(key) == Some("1")
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.defines.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defines.is_empty()
    }

    /// Iterate all defines in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge defines from another map.
    ///
    /// On conflicts, values from `other` win.
    pub fn merge(&mut self, other: &DefineMap) {
        for (key, value) in &other.defines {
            self.set(key.as_str(), value.as_str());
        }
    }

    /// Compute content hash (for caching)
    #[must_use]
    pub fn compute_hash(&self) -> u64 {
        use std::hash::BuildHasher;

        rustc_hash::FxBuildHasher.hash_one(self)
    }
}

impl From<BTreeMap<String, String>> for DefineMap {
    fn from(map: BTreeMap<String, String>) -> Self {
        // BTreeMap already iterates in key order.
        Self {
            defines: map.into_iter().collect(),
        }
    }
}

impl From<DefineMap> for BTreeMap<String, String> {
    fn from(map: DefineMap) -> Self {
        map.defines.into_iter().collect()
    }
}

/// Create a `DefineMap` from a list of definitions
impl From<&[(&str, &str)]> for DefineMap {
    fn from(defines: &[(&str, &str)]) -> Self {
        defines.iter().copied().collect()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for DefineMap {
    fn from(defines: [(&str, &str); N]) -> Self {
        defines.into_iter().collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DefineMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut result = Self::new();
        for (k, v) in iter {
            result.set(k, v);
        }
        result
    }
}

impl<K: Into<String>, V: Into<String>> Extend<(K, V)> for DefineMap {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.set(k, v);
        }
    }
}
