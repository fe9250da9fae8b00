//! Schema loading: turns a reference into a cached [`SchemaTree`].
//!
//! Steps, each one short-circuiting the rest:
//!
//! 1. a preloaded document for the URI is served (and kept) regardless of
//!    the cache setting;
//! 2. with caching enabled, a cached tree is returned;
//! 3. the URI is translated (redirects) into the URI to fetch;
//! 4. the fetcher registered for its scheme reads the bytes;
//! 5. the bytes are parsed with the configured parser features;
//! 6. the tree is built in the configured dereferencing mode;
//! 7. with caching enabled, the tree is cached before being returned.
//!
//! No lock is held while fetching. Two threads loading the same URI for the
//! first time may both fetch it; both get equal trees.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::config::{Dereferencing, LoadingConfiguration};
use crate::error::ProcessingError;
use crate::inline::Inliner;
use crate::messages::core_message;
use crate::reference::{Reference, SchemaIdentity};
use crate::report::{
    configuration_exception, loading_exception, LogLevel, ProcessingMessage, ProcessingReport,
};
use crate::tree::SchemaTree;

type CacheKey = (SchemaIdentity, Dereferencing);

/// Loads, parses and caches schema documents.
///
/// A loader is `Send + Sync`; share it behind an `Arc` to use one cache
/// from several threads.
pub struct SchemaLoader {
    cfg: LoadingConfiguration,
    cache: RwLock<HashMap<CacheKey, SchemaTree>>,
    preloaded: RwLock<HashMap<CacheKey, SchemaTree>>,
}

impl Default for SchemaLoader {
    fn default() -> Self {
        Self::new(LoadingConfiguration::default())
    }
}

impl std::fmt::Debug for SchemaLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaLoader")
            .field("cfg", &self.cfg)
            .field("cached", &self.cached_count())
            .finish()
    }
}

impl SchemaLoader {
    pub fn new(cfg: LoadingConfiguration) -> Self {
        Self {
            cfg,
            cache: RwLock::new(HashMap::new()),
            preloaded: RwLock::new(HashMap::new()),
        }
    }

    pub fn configuration(&self) -> &LoadingConfiguration {
        &self.cfg
    }

    /// Load the document at `reference`.
    ///
    /// If the fragment of `reference` is a non-empty JSON Pointer, the tree
    /// is positioned there.
    ///
    /// # Errors
    ///
    /// Every problem is raised, including unresolvable references met while
    /// inlining: there is no report to record them in.
    pub fn load(&self, reference: &Reference) -> Result<SchemaTree, ProcessingError> {
        let mut report = bootstrap_report();
        let tree = self.load_with(reference, self.cfg.dereferencing(), &mut report)?;
        positioned(tree, reference)
    }

    /// [`load`](Self::load) from a URI string.
    pub fn load_uri(&self, uri: &str) -> Result<SchemaTree, ProcessingError> {
        self.load(&Reference::parse(uri)?)
    }

    /// Load the document at `reference`, recording problems in `report`.
    ///
    /// Returns `Ok(None)` when loading failed and the failure was recorded.
    /// Returns `Err` only if `report` raises, which it does for fatal
    /// configuration errors with the default thresholds.
    pub fn get(
        &self,
        reference: &Reference,
        report: &mut ProcessingReport,
    ) -> Result<Option<SchemaTree>, ProcessingError> {
        let loaded = self
            .load_with(reference, self.cfg.dereferencing(), report)
            .and_then(|tree| positioned(tree, reference));
        match loaded {
            Ok(tree) => Ok(Some(tree)),
            Err(e) => {
                let level = e.message().log_level().max(LogLevel::Error);
                report.log(level, e.into_message())?;
                Ok(None)
            }
        }
    }

    /// Anonymous tree over `value`, dereferenced in the configured mode.
    pub fn load_value(&self, value: Value) -> Result<SchemaTree, ProcessingError> {
        let tree = SchemaTree::new(value);
        match self.cfg.dereferencing() {
            Dereferencing::Canonical => Ok(tree),
            Dereferencing::Inline => {
                let mut report = bootstrap_report();
                let inlined = Inliner::new(self).inline_document(&tree, &mut report)?;
                Ok(SchemaTree::with_loading_ref(
                    inlined,
                    &Reference::empty(),
                    Dereferencing::Inline,
                ))
            }
        }
    }

    /// Canonical tree of the document at `locator`, for reference lookups.
    pub(crate) fn load_document(&self, locator: &Reference) -> Result<SchemaTree, ProcessingError> {
        let mut report = bootstrap_report();
        self.load_with(locator, Dereferencing::Canonical, &mut report)
    }

    /// Number of trees in the cache, preloads excluded.
    pub fn cached_count(&self) -> usize {
        self.cache.read().len()
    }

    /// Drop every cached tree. Preloads stay.
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }

    fn load_with(
        &self,
        reference: &Reference,
        mode: Dereferencing,
        report: &mut ProcessingReport,
    ) -> Result<SchemaTree, ProcessingError> {
        let locator = self.locator_of(reference)?;
        let key = (SchemaIdentity::of(&locator), mode);

        let preloaded = self.cfg.preloaded(&locator);
        let cache = if preloaded.is_some() {
            Some(&self.preloaded)
        } else if self.cfg.enable_cache() {
            Some(&self.cache)
        } else {
            None
        };

        if let Some(tree) = cache.and_then(|c| c.read().get(&key).cloned()) {
            tracing::trace!(uri = %locator, ?mode, "cache hit");
            return Ok(tree);
        }

        let tree = match mode {
            Dereferencing::Canonical => {
                let document = match preloaded {
                    Some(document) => {
                        tracing::debug!(uri = %locator, "using preloaded schema");
                        Arc::clone(document)
                    }
                    None => Arc::new(self.fetch(&locator)?),
                };
                SchemaTree::with_loading_ref(document, &locator, Dereferencing::Canonical)
            }
            Dereferencing::Inline => {
                let canonical = self.load_with(&locator, Dereferencing::Canonical, report)?;
                let inlined = Inliner::new(self).inline_document(&canonical, report)?;
                SchemaTree::with_loading_ref(inlined, &locator, Dereferencing::Inline)
            }
        };

        if let Some(cache) = cache {
            cache.write().insert(key, tree.clone());
        }
        Ok(tree)
    }

    /// Absolute, fragment-free form of `reference`, after namespace resolution.
    fn locator_of(&self, reference: &Reference) -> Result<Reference, ProcessingError> {
        let locator = self.cfg.translator().absolutize(reference).locator();
        if !locator.has_locator() {
            return Err(ProcessingMessage::new()
                .set_message(core_message("loading.notAbsolute"))
                .put_argument("uri", locator.as_str())
                .set_log_level(LogLevel::Error)
                .set_exception_provider(loading_exception)
                .as_exception());
        }
        Ok(locator)
    }

    fn fetch(&self, locator: &Reference) -> Result<Value, ProcessingError> {
        let target = self.cfg.translator().translate(locator);
        if target != *locator {
            tracing::debug!(from = %locator, to = %target, "translated URI");
        }
        let Some(url) = target.url() else {
            return Err(ProcessingMessage::new()
                .set_message(core_message("loading.notAbsolute"))
                .put_argument("uri", target.as_str())
                .set_log_level(LogLevel::Error)
                .set_exception_provider(loading_exception)
                .as_exception());
        };

        let Some(fetcher) = self.cfg.fetcher(url.scheme()) else {
            return Err(ProcessingMessage::new()
                .set_message(core_message("loading.unhandledScheme"))
                .put_argument("scheme", url.scheme())
                .put("uri", target.as_str())
                .set_log_level(LogLevel::Fatal)
                .set_exception_provider(configuration_exception)
                .as_exception());
        };

        tracing::debug!(uri = %url, "fetching schema");
        let bytes = fetcher.fetch(url).map_err(|e| {
            ProcessingMessage::new()
                .set_message(core_message("loading.fetchFailure"))
                .put_argument("uri", url.as_str())
                .put("reason", e.to_string())
                .set_log_level(LogLevel::Error)
                .set_exception_provider(loading_exception)
                .as_exception()
        })?;

        self.cfg.parse(&bytes).map_err(|e| {
            ProcessingMessage::new()
                .set_message(core_message("loading.parseFailure"))
                .put_argument("uri", url.as_str())
                .put("reason", e.to_string())
                .set_log_level(LogLevel::Error)
                .set_exception_provider(loading_exception)
                .as_exception()
        })
    }
}

fn bootstrap_report() -> ProcessingReport {
    ProcessingReport::with_thresholds(LogLevel::Info, LogLevel::Error)
}

fn positioned(tree: SchemaTree, reference: &Reference) -> Result<SchemaTree, ProcessingError> {
    match reference.pointer() {
        Some(pointer) if !pointer.is_empty() => tree.at(&pointer),
        _ => Ok(tree),
    }
}
