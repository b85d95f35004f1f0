//! Per-module execution cache for repeated runs.
//!
//! Long-lived engines (watch mode, tests, embedding applications) execute
//! the same pipelines many times. A module can skip work for a document it
//! has already processed by looking up a [`Fingerprint`] of that document in
//! its own [`ExecutionCache`].
//!
//! # Design
//!
//! ## Cache keys
//!
//! The cache is **content-addressed**: a fingerprint is the SHA-256 of the
//! document's content bytes followed by its visible metadata (keys in sorted
//! order, shadowed keys removed, values as JSON). Ids and sources are not part of the key, so
//! a renamed input file with unchanged content still hits.
//!
//! Caches are **per module instance**. The [`ExecutionCacheManager`] keys
//! them by module identity and holds a weak handle to each module, so two
//! modules storing the same fingerprint never see each other's values, even
//! when one is created after the other was dropped.
//!
//! ## Eviction
//!
//! At the start of a run every entry is marked unused. Lookups that hit mark
//! their entry used, and entries still unused when the run completes are
//! evicted. A value therefore survives exactly as long as some run keeps
//! asking for it.
//!
//! ## Bypassing the cache
//!
//! A disabled manager hands out caches that never hit and never store.
//! The CLI disables caching with `build --no-cache` or `[cache] enabled = false`.

use crate::document::Document;
use crate::module::Module;
use sha2::{Digest, Sha256};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// SHA-256 cache key, rendered as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint of a document's content and visible metadata.
///
/// Deferred values are resolved, so a computed value that changes between
/// runs changes the fingerprint.
pub fn fingerprint(document: &Document) -> io::Result<Fingerprint> {
    let mut hasher = Sha256::new();
    hasher.update(b"content\0");
    hasher.update(document.content().read_bytes()?);
    hasher.update(b"\0metadata\0");
    let mut pairs = document.metadata().iter();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    for (key, value) in pairs {
        hasher.update(key.as_bytes());
        hasher.update(b"\0");
        hasher.update(value.kind().as_bytes());
        hasher.update(b":");
        hasher.update(serde_json::to_vec(&value).map_err(io::Error::other)?);
        hasher.update(b"\0");
    }
    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}

/// Fingerprint of an arbitrary string, for modules that key on something
/// other than a whole document.
pub fn fingerprint_str(text: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(b"text\0");
    hasher.update(text.as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    used: bool,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, Entry>,
    stats: CacheStats,
}

/// One module's cache. Safe to use from parallel per-document work.
pub struct ExecutionCache {
    enabled: bool,
    state: Mutex<CacheState>,
}

impl ExecutionCache {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Mutex::new(CacheState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a value stored under `key` with type `T`.
    ///
    /// A stored value of a different type counts as a miss.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &Fingerprint) -> Option<T> {
        if !self.enabled {
            return None;
        }
        let mut state = self.lock();
        let found = state.entries.get_mut(key).and_then(|entry| {
            let value = entry.value.downcast_ref::<T>()?.clone();
            entry.used = true;
            Some(value)
        });
        match found {
            Some(value) => {
                state.stats.hit();
                Some(value)
            }
            None => {
                state.stats.miss();
                None
            }
        }
    }

    pub fn set<T: Send + Sync + 'static>(&self, key: Fingerprint, value: T) {
        if !self.enabled {
            return;
        }
        self.lock().entries.insert(
            key,
            Entry {
                value: Arc::new(value),
                used: true,
            },
        );
    }

    /// `get`, or compute with `f` and store on a miss.
    pub fn get_or_insert_with<T, E>(
        &self,
        key: Fingerprint,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E>
    where
        T: Clone + Send + Sync + 'static,
    {
        if let Some(value) = self.get::<T>(&key) {
            return Ok(value);
        }
        let value = f()?;
        self.set(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn reset_marks(&self) {
        let mut state = self.lock();
        for entry in state.entries.values_mut() {
            entry.used = false;
        }
        state.stats = CacheStats::default();
    }

    /// Drop unused entries, returning how many were evicted.
    fn evict_unused(&self) -> u32 {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.used);
        let evicted = (before - state.entries.len()) as u32;
        state.stats.evicted += evicted;
        evicted
    }

    fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }
}

/// A module's cache plus a weak handle that pins the module's address.
///
/// While the `Weak` lives the allocation cannot be reused, so the address
/// key stays unique to this module.
struct ModuleCache {
    module: Weak<dyn Module>,
    cache: Arc<ExecutionCache>,
    touched: bool,
}

#[derive(Default)]
struct Registry {
    caches: HashMap<usize, ModuleCache>,
    /// Entries evicted this run along with a dropped module cache.
    retired: u32,
}

/// Owns every module's [`ExecutionCache`] for one engine.
///
/// A module's cache is dropped at the end of a run in which the module was
/// not asked for it, or once the module itself is gone.
pub struct ExecutionCacheManager {
    enabled: bool,
    registry: Mutex<Registry>,
}

impl Default for ExecutionCacheManager {
    fn default() -> Self {
        Self::new(true)
    }
}

fn module_addr(module: &Arc<dyn Module>) -> usize {
    Arc::as_ptr(module) as *const () as usize
}

impl ExecutionCacheManager {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            registry: Mutex::new(Registry::default()),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        *self.registry.get_mut().unwrap_or_else(PoisonError::into_inner) = Registry::default();
    }

    /// The cache belonging to `module`, created on first use.
    pub fn cache_for(&self, module: &Arc<dyn Module>) -> Arc<ExecutionCache> {
        let mut registry = self.registry();
        let slot = registry
            .caches
            .entry(module_addr(module))
            .or_insert_with(|| ModuleCache {
                module: Arc::downgrade(module),
                cache: Arc::new(ExecutionCache::new(self.enabled)),
                touched: false,
            });
        slot.touched = true;
        Arc::clone(&slot.cache)
    }

    /// Number of module caches currently held.
    pub fn module_count(&self) -> usize {
        self.registry().caches.len()
    }

    /// Mark every entry unused and zero the per-run statistics.
    pub fn reset_entry_hits(&self) {
        let mut registry = self.registry();
        registry.retired = 0;
        for slot in registry.caches.values_mut() {
            slot.touched = false;
            slot.cache.reset_marks();
        }
    }

    /// Evict every entry that was not used since
    /// [`reset_entry_hits`](Self::reset_entry_hits), then drop the caches of
    /// modules that were not touched or no longer exist.
    pub fn clear_unhit_entries(&self) -> u32 {
        let mut registry = self.registry();
        let evicted: u32 = registry
            .caches
            .values()
            .map(|slot| slot.cache.evict_unused())
            .sum();

        let mut retired = 0;
        registry.caches.retain(|_, slot| {
            let keep = slot.touched && slot.module.strong_count() > 0;
            if !keep {
                retired += slot.cache.stats().evicted;
            }
            keep
        });
        registry.retired += retired;
        evicted
    }

    /// Statistics summed over every module's cache for the current run.
    pub fn stats(&self) -> CacheStats {
        let registry = self.registry();
        let mut total = CacheStats {
            evicted: registry.retired,
            ..CacheStats::default()
        };
        for slot in registry.caches.values() {
            let s = slot.cache.stats();
            total.hits += s.hits;
            total.misses += s.misses;
            total.evicted += s.evicted;
        }
        total
    }
}

/// Summary of cache performance for a run.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub hits: u32,
    pub misses: u32,
    pub evicted: u32,
}

impl CacheStats {
    pub fn hit(&mut self) {
        self.hits += 1;
    }

    pub fn miss(&mut self) {
        self.misses += 1;
    }

    pub fn total(&self) -> u32 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total() == 0 {
            return write!(f, "no lookups");
        }
        write!(
            f,
            "{} cached, {} computed ({} total)",
            self.hits,
            self.misses,
            self.total()
        )?;
        if self.evicted > 0 {
            write!(f, ", {} evicted", self.evicted)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentChanges, DocumentFactory};
    use crate::meta::{Metadata, Value};
    use crate::module::execute_fn;

    fn doc(content: &str, items: &[(&str, i64)]) -> Document {
        DocumentFactory::new(Metadata::empty())
            .create(
                None,
                DocumentChanges::new()
                    .content(content)
                    .items(items.iter().map(|(k, v)| (*k, *v))),
            )
            .unwrap()
    }

    // =========================================================================
    // Fingerprints
    // =========================================================================

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = fingerprint(&doc("a", &[])).unwrap();
        assert_eq!(fp.as_str().len(), 64);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_ignores_identity() {
        let a = doc("same", &[("k", 1)]);
        let b = doc("same", &[("k", 1)]);
        assert_ne!(a.id(), b.id());
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
    }

    #[test]
    fn fingerprint_changes_with_content_or_metadata() {
        let base = fingerprint(&doc("x", &[("k", 1)])).unwrap();
        assert_ne!(base, fingerprint(&doc("y", &[("k", 1)])).unwrap());
        assert_ne!(base, fingerprint(&doc("x", &[("k", 2)])).unwrap());
    }

    #[test]
    fn fingerprint_keeps_list_structure() {
        let factory = DocumentFactory::new(Metadata::empty());
        let nested = factory
            .create(
                None,
                DocumentChanges::new().item("k", Value::List(vec![Value::from("1, 2")])),
            )
            .unwrap();
        let flat = factory
            .create(
                None,
                DocumentChanges::new().item("k", Value::List(vec![Value::Int(1), Value::Int(2)])),
            )
            .unwrap();
        assert_ne!(fingerprint(&nested).unwrap(), fingerprint(&flat).unwrap());
    }

    #[test]
    fn fingerprint_ignores_shadowed_values() {
        let factory = DocumentFactory::new(Metadata::empty());
        let layered = factory
            .create(None, DocumentChanges::new().content("c").item("k", 1))
            .unwrap();
        let layered = factory
            .create(Some(&layered), DocumentChanges::new().item("k", Value::Int(2)))
            .unwrap();
        let flat = doc("c", &[("k", 2)]);
        assert_eq!(fingerprint(&layered).unwrap(), fingerprint(&flat).unwrap());
    }

    // =========================================================================
    // Per-module caches
    // =========================================================================

    #[test]
    fn modules_do_not_share_entries() {
        let manager = ExecutionCacheManager::default();
        let a = execute_fn("A", |i, _| Ok(i.to_vec()));
        let b = execute_fn("B", |i, _| Ok(i.to_vec()));
        let key = fingerprint_str("k");

        manager.cache_for(&a).set(key.clone(), 1u32);
        assert_eq!(manager.cache_for(&a).get::<u32>(&key), Some(1));
        assert_eq!(manager.cache_for(&b).get::<u32>(&key), None);
    }

    #[test]
    fn wrong_type_is_a_miss() {
        let cache = ExecutionCache::new(true);
        let key = fingerprint_str("k");
        cache.set(key.clone(), String::from("v"));
        assert_eq!(cache.get::<u32>(&key), None);
        assert_eq!(cache.get::<String>(&key).as_deref(), Some("v"));
    }

    #[test]
    fn get_or_insert_with_computes_once() {
        let cache = ExecutionCache::new(true);
        let key = fingerprint_str("k");
        let mut calls = 0;
        for _ in 0..3 {
            let v: Result<u32, ()> = cache.get_or_insert_with(key.clone(), || {
                calls += 1;
                Ok(7)
            });
            assert_eq!(v, Ok(7));
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.stats(), CacheStats { hits: 2, misses: 1, evicted: 0 });
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = ExecutionCache::new(false);
        let key = fingerprint_str("k");
        cache.set(key.clone(), 1u8);
        assert_eq!(cache.get::<u8>(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn unhit_entries_are_evicted() {
        let manager = ExecutionCacheManager::default();
        let m = execute_fn("M", |i, _| Ok(i.to_vec()));
        let cache = manager.cache_for(&m);
        cache.set(fingerprint_str("kept"), 1u8);
        cache.set(fingerprint_str("dropped"), 2u8);

        manager.reset_entry_hits();
        let cache = manager.cache_for(&m);
        assert_eq!(cache.get::<u8>(&fingerprint_str("kept")), Some(1));
        assert_eq!(manager.clear_unhit_entries(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(manager.stats().evicted, 1);
        assert_eq!(manager.module_count(), 1);
    }

    #[test]
    fn new_modules_never_inherit_dropped_modules_entries() {
        let manager = ExecutionCacheManager::default();
        let key = fingerprint_str("k");
        for round in 0..50u32 {
            let m = execute_fn("Transient", |i, _| Ok(i.to_vec()));
            let cache = manager.cache_for(&m);
            assert_eq!(cache.get::<u32>(&key), None, "round {round}");
            cache.set(key.clone(), round);
        }
        assert_eq!(manager.module_count(), 50);

        manager.reset_entry_hits();
        assert_eq!(manager.clear_unhit_entries(), 50);
        assert_eq!(manager.module_count(), 0);
        assert_eq!(manager.stats().evicted, 50);
    }

    #[test]
    fn caches_of_untouched_modules_are_dropped() {
        let manager = ExecutionCacheManager::default();
        let a = execute_fn("A", |i, _| Ok(i.to_vec()));
        let b = execute_fn("B", |i, _| Ok(i.to_vec()));
        let key = fingerprint_str("k");
        manager.cache_for(&a).set(key.clone(), 1u8);
        manager.cache_for(&b).set(key.clone(), 2u8);

        manager.reset_entry_hits();
        assert_eq!(manager.cache_for(&a).get::<u8>(&key), Some(1));
        manager.clear_unhit_entries();

        assert_eq!(manager.module_count(), 1);
        assert_eq!(manager.stats().evicted, 1);
        assert_eq!(manager.cache_for(&b).get::<u8>(&key), None);
    }

    // =========================================================================
    // CacheStats display
    // =========================================================================

    #[test]
    fn cache_stats_display() {
        let stats = CacheStats { hits: 3, misses: 2, evicted: 0 };
        assert_eq!(stats.to_string(), "3 cached, 2 computed (5 total)");
        let stats = CacheStats { hits: 0, misses: 1, evicted: 4 };
        assert_eq!(stats.to_string(), "0 cached, 1 computed (1 total), 4 evicted");
        assert_eq!(CacheStats::default().to_string(), "no lookups");
    }
}
