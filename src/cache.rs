//! Template text cache.
//!
//! Templates live in an external store (a blob bucket in production). A
//! [`TemplateCache`] is created once per process, passed explicitly to whoever
//! renders, and holds fetched templates up to a byte budget, evicting the
//! least recently used ones first.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use crate::error::{Result, RxformsError};

pub const DEFAULT_CACHE_BYTES: usize = 4 * 1024 * 1024;

/// Where template text comes from. `Ok(None)` means the key does not exist.
pub trait TemplateSource {
    fn fetch(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Templates read from files below a directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl TemplateSource for DirectorySource {
    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        let relative = Path::new(key);
        if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(RxformsError::Source(format!("template key '{}' escapes the template directory", key)));
        }
        match tokio::fs::read_to_string(self.root.join(relative)).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Templates held in memory, mostly useful for tests and defaults.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    templates: HashMap<String, String>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.templates.insert(key.into(), text.into());
        self
    }
}

impl TemplateSource for StaticSource {
    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        Ok(self.templates.get(key).cloned())
    }
}

#[derive(Debug)]
struct Entry {
    text: Arc<str>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Entry>,
    bytes: usize,
    clock: u64,
}

impl CacheState {
    fn touch(&mut self, key: &str) -> Option<Arc<str>> {
        self.clock += 1;
        let clock = self.clock;
        self.entries.get_mut(key).map(|e| {
            e.last_used = clock;
            Arc::clone(&e.text)
        })
    }
    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(e) => {
                self.bytes -= e.text.len();
                true
            }
            None => false,
        }
    }
    fn evict_until(&mut self, max_bytes: usize) {
        while self.bytes > max_bytes {
            let oldest = self.entries.iter().min_by_key(|(_, e)| e.last_used).map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    trace!(%key, "evicting template");
                    self.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Byte-bounded template cache in front of a [`TemplateSource`].
#[derive(Debug)]
pub struct TemplateCache<S> {
    source: S,
    max_bytes: usize,
    state: Mutex<CacheState>,
}

impl<S: TemplateSource> TemplateCache<S> {
    pub fn new(source: S, max_bytes: usize) -> Self {
        Self { source, max_bytes, state: Mutex::new(CacheState::default()) }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// The template for `key`, fetched on a miss. Templates larger than the
    /// whole budget are returned but not kept.
    pub async fn get(&self, key: &str) -> Result<Option<Arc<str>>> {
        {
            let mut state = self.state.lock()?;
            if let Some(text) = state.touch(key) {
                trace!(key, "template cache hit");
                return Ok(Some(text));
            }
        }
        let Some(text) = self.source.fetch(key).await? else {
            debug!(key, "template not found in source");
            return Ok(None);
        };
        let text: Arc<str> = Arc::from(text);
        if text.len() > self.max_bytes {
            debug!(key, bytes = text.len(), "template exceeds cache budget, not caching");
            return Ok(Some(text));
        }
        let mut state = self.state.lock()?;
        state.remove(key);
        state.clock += 1;
        let last_used = state.clock;
        state.bytes += text.len();
        state.entries.insert(key.to_string(), Entry { text: Arc::clone(&text), last_used });
        state.evict_until(self.max_bytes);
        debug!(key, bytes = state.bytes, entries = state.entries.len(), "template cached");
        Ok(Some(text))
    }

    /// Drops `key` so the next `get` refetches it. Returns whether it was cached.
    pub fn invalidate(&self, key: &str) -> Result<bool> {
        Ok(self.state.lock()?.remove(key))
    }

    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock()?;
        state.entries.clear();
        state.bytes = 0;
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.state.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.state.lock()?.entries.is_empty())
    }

    /// Bytes of template text currently held.
    pub fn bytes(&self) -> Result<usize> {
        Ok(self.state.lock()?.bytes)
    }
}
