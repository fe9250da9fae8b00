//! Loading configuration: fetchers, URI translation, preloads and parsing.
//!
//! Every configuration type comes as a mutable builder and a frozen value.
//! `freeze()` moves the builder's collections into the frozen value and
//! `thaw()` clones them back into a fresh builder, so neither side ever
//! observes the other's changes.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::error::ConfigError;
use crate::fetch::{FileFetcher, UriFetcher};
use crate::reference::Reference;

#[cfg(feature = "remote")]
use crate::fetch::HttpFetcher;

/// How `$ref` is handled when a schema is loaded or resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dereferencing {
    /// Refs stay in place and are followed on demand.
    #[default]
    Canonical,
    /// Refs are replaced by a copy of their target.
    Inline,
}

/// Optional relaxations of the JSON parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParserFeature {
    /// Skip a UTF-8 byte order mark at the start of the content.
    AllowByteOrderMark,
    /// Ignore anything after the first complete JSON value.
    AllowTrailingContent,
}

fn absolute_url(uri: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(uri).map_err(|source| ConfigError::InvalidUri {
        uri: uri.to_string(),
        source,
    })?;
    if url.fragment().is_some_and(|f| !f.is_empty()) {
        return Err(ConfigError::NotAbsolute {
            uri: uri.to_string(),
        });
    }
    Ok(url)
}

// A directory URI: absolute, no fragment, path ends with '/'.
fn directory_url(uri: &str) -> Result<Url, ConfigError> {
    let mut url = absolute_url(uri)?;
    url.set_fragment(None);
    if url.cannot_be_a_base() || !url.path().ends_with('/') {
        return Err(ConfigError::InvalidNamespace {
            uri: uri.to_string(),
        });
    }
    Ok(url)
}

fn absolute_reference(uri: &str) -> Result<Reference, ConfigError> {
    Ok(Reference::from_url(absolute_url(uri)?, None))
}

/// Namespace and redirections applied to URIs before they are fetched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UriTranslatorConfiguration {
    namespace: Option<Url>,
    /// Directory prefix redirects, longest source first.
    path_redirects: Vec<(Url, Url)>,
    schema_redirects: HashMap<Reference, Reference>,
}

impl UriTranslatorConfiguration {
    pub fn builder() -> UriTranslatorConfigurationBuilder {
        UriTranslatorConfigurationBuilder::default()
    }

    pub fn thaw(&self) -> UriTranslatorConfigurationBuilder {
        UriTranslatorConfigurationBuilder {
            namespace: self.namespace.clone(),
            path_redirects: self.path_redirects.iter().cloned().collect(),
            schema_redirects: self.schema_redirects.clone(),
        }
    }

    pub fn namespace(&self) -> Option<&Url> {
        self.namespace.as_ref()
    }

    /// Resolve `reference` against the namespace, if one is set.
    pub fn absolutize(&self, reference: &Reference) -> Reference {
        match &self.namespace {
            Some(namespace) => Reference::from_url(namespace.clone(), None).resolve(reference),
            None => reference.clone(),
        }
    }

    /// The URI to actually fetch for `reference`.
    ///
    /// Exact schema redirects are tried first, then the longest matching
    /// path redirect. The fragment is carried over unchanged.
    pub fn translate(&self, reference: &Reference) -> Reference {
        let locator = reference.locator();
        let fragment = reference.fragment().to_string();

        if let Some(target) = self.schema_redirects.get(&locator) {
            return with_fragment(target, fragment);
        }

        let Some(url) = locator.url() else {
            return reference.clone();
        };
        for (from, to) in &self.path_redirects {
            if let Some(rest) = url.as_str().strip_prefix(from.as_str()) {
                if let Ok(redirected) = to.join(rest) {
                    return Reference::from_url(redirected, Some(fragment));
                }
            }
        }
        reference.clone()
    }
}

fn with_fragment(target: &Reference, fragment: String) -> Reference {
    match target.url() {
        Some(url) => Reference::from_url(url.clone(), Some(fragment)),
        None => target.clone(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct UriTranslatorConfigurationBuilder {
    namespace: Option<Url>,
    path_redirects: HashMap<Url, Url>,
    schema_redirects: HashMap<Reference, Reference>,
}

impl UriTranslatorConfigurationBuilder {
    /// Base URI for relative load references. Must end with `/`.
    pub fn set_namespace(mut self, uri: &str) -> Result<Self, ConfigError> {
        self.namespace = Some(directory_url(uri)?);
        Ok(self)
    }

    /// Redirect every URI under directory `from` to directory `to`.
    pub fn add_path_redirect(mut self, from: &str, to: &str) -> Result<Self, ConfigError> {
        self.path_redirects
            .insert(directory_url(from)?, directory_url(to)?);
        Ok(self)
    }

    /// Redirect one schema URI to another.
    pub fn add_schema_redirect(mut self, from: &str, to: &str) -> Result<Self, ConfigError> {
        self.schema_redirects
            .insert(absolute_reference(from)?, absolute_reference(to)?);
        Ok(self)
    }

    pub fn freeze(self) -> UriTranslatorConfiguration {
        let mut path_redirects: Vec<(Url, Url)> = self.path_redirects.into_iter().collect();
        path_redirects.sort_by(|(a, _), (b, _)| {
            b.as_str()
                .len()
                .cmp(&a.as_str().len())
                .then_with(|| a.as_str().cmp(b.as_str()))
        });
        UriTranslatorConfiguration {
            namespace: self.namespace,
            path_redirects,
            schema_redirects: self.schema_redirects,
        }
    }
}

/// Everything a [`SchemaLoader`](crate::SchemaLoader) needs to turn a
/// reference into a tree.
#[derive(Clone)]
pub struct LoadingConfiguration {
    fetchers: HashMap<String, Arc<dyn UriFetcher>>,
    translator: UriTranslatorConfiguration,
    preloaded: HashMap<Reference, Arc<Value>>,
    enable_cache: bool,
    dereferencing: Dereferencing,
    parser_features: HashSet<ParserFeature>,
}

impl Default for LoadingConfiguration {
    fn default() -> Self {
        LoadingConfigurationBuilder::new().freeze()
    }
}

impl fmt::Debug for LoadingConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<&String> = self.fetchers.keys().collect();
        schemes.sort();
        let mut preloaded: Vec<&str> = self.preloaded.keys().map(Reference::as_str).collect();
        preloaded.sort_unstable();
        f.debug_struct("LoadingConfiguration")
            .field("schemes", &schemes)
            .field("translator", &self.translator)
            .field("preloaded", &preloaded)
            .field("enable_cache", &self.enable_cache)
            .field("dereferencing", &self.dereferencing)
            .field("parser_features", &self.parser_features)
            .finish()
    }
}

impl LoadingConfiguration {
    pub fn builder() -> LoadingConfigurationBuilder {
        LoadingConfigurationBuilder::new()
    }

    pub fn thaw(&self) -> LoadingConfigurationBuilder {
        LoadingConfigurationBuilder {
            fetchers: self.fetchers.clone(),
            translator: self.translator.clone(),
            preloaded: self.preloaded.clone(),
            enable_cache: self.enable_cache,
            dereferencing: self.dereferencing,
            parser_features: self.parser_features.clone(),
        }
    }

    pub fn fetcher(&self, scheme: &str) -> Option<&Arc<dyn UriFetcher>> {
        self.fetchers.get(&scheme.to_ascii_lowercase())
    }

    pub fn schemes(&self) -> impl Iterator<Item = &str> {
        self.fetchers.keys().map(String::as_str)
    }

    pub fn translator(&self) -> &UriTranslatorConfiguration {
        &self.translator
    }

    pub fn preloaded(&self, locator: &Reference) -> Option<&Arc<Value>> {
        self.preloaded.get(locator)
    }

    pub fn enable_cache(&self) -> bool {
        self.enable_cache
    }

    pub fn dereferencing(&self) -> Dereferencing {
        self.dereferencing
    }

    pub fn has_parser_feature(&self, feature: ParserFeature) -> bool {
        self.parser_features.contains(&feature)
    }

    /// Parse fetched bytes as a single JSON value, honoring parser features.
    pub fn parse(&self, bytes: &[u8]) -> Result<Value, serde_json::Error> {
        let mut bytes = bytes;
        if self.has_parser_feature(ParserFeature::AllowByteOrderMark) {
            bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        }
        if self.has_parser_feature(ParserFeature::AllowTrailingContent) {
            let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter::<Value>();
            if let Some(first) = stream.next() {
                return first;
            }
        }
        serde_json::from_slice(bytes)
    }
}

/// Mutable side of [`LoadingConfiguration`].
///
/// Starts with a `file` fetcher (plus `http` and `https` with the `remote`
/// feature), caching on and canonical dereferencing.
#[derive(Clone)]
pub struct LoadingConfigurationBuilder {
    fetchers: HashMap<String, Arc<dyn UriFetcher>>,
    translator: UriTranslatorConfiguration,
    preloaded: HashMap<Reference, Arc<Value>>,
    enable_cache: bool,
    dereferencing: Dereferencing,
    parser_features: HashSet<ParserFeature>,
}

impl Default for LoadingConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadingConfigurationBuilder {
    pub fn new() -> Self {
        let mut fetchers: HashMap<String, Arc<dyn UriFetcher>> = HashMap::new();
        fetchers.insert("file".to_string(), Arc::new(FileFetcher));
        #[cfg(feature = "remote")]
        {
            let http: Arc<dyn UriFetcher> = Arc::new(HttpFetcher::new());
            fetchers.insert("http".to_string(), Arc::clone(&http));
            fetchers.insert("https".to_string(), http);
        }
        Self {
            fetchers,
            translator: UriTranslatorConfiguration::default(),
            preloaded: HashMap::new(),
            enable_cache: true,
            dereferencing: Dereferencing::default(),
            parser_features: HashSet::new(),
        }
    }

    /// Register `fetcher` for `scheme`, replacing any previous one.
    pub fn add_scheme(
        mut self,
        scheme: &str,
        fetcher: impl UriFetcher + 'static,
    ) -> Result<Self, ConfigError> {
        let valid = scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid {
            return Err(ConfigError::InvalidScheme {
                scheme: scheme.to_string(),
            });
        }
        self.fetchers
            .insert(scheme.to_ascii_lowercase(), Arc::new(fetcher));
        Ok(self)
    }

    pub fn remove_scheme(mut self, scheme: &str) -> Self {
        self.fetchers.remove(&scheme.to_ascii_lowercase());
        self
    }

    pub fn set_uri_translator_configuration(
        mut self,
        translator: UriTranslatorConfiguration,
    ) -> Self {
        self.translator = translator;
        self
    }

    pub fn dereferencing(mut self, dereferencing: Dereferencing) -> Self {
        self.dereferencing = dereferencing;
        self
    }

    pub fn set_enable_cache(mut self, enable: bool) -> Self {
        self.enable_cache = enable;
        self
    }

    /// Serve `schema` for `uri` without fetching anything.
    pub fn preload_schema(mut self, uri: &str, schema: Value) -> Result<Self, ConfigError> {
        self.preloaded
            .insert(absolute_reference(uri)?, Arc::new(schema));
        Ok(self)
    }

    /// Preload `schema` under its own `$id` (or draft-4 `id`).
    pub fn preload_schema_with_id(self, schema: Value) -> Result<Self, ConfigError> {
        let id = schema
            .get("$id")
            .or_else(|| schema.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        match id {
            Some(id) => self.preload_schema(&id, schema),
            None => Err(ConfigError::NotAbsolute {
                uri: String::new(),
            }),
        }
    }

    pub fn add_parser_feature(mut self, feature: ParserFeature) -> Self {
        self.parser_features.insert(feature);
        self
    }

    pub fn remove_parser_feature(mut self, feature: ParserFeature) -> Self {
        self.parser_features.remove(&feature);
        self
    }

    pub fn freeze(self) -> LoadingConfiguration {
        LoadingConfiguration {
            fetchers: self.fetchers,
            translator: self.translator,
            preloaded: self.preloaded,
            enable_cache: self.enable_cache,
            dereferencing: self.dereferencing,
            parser_features: self.parser_features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use serde_json::json;

    fn r(s: &str) -> Reference {
        Reference::parse(s).unwrap()
    }

    #[test]
    fn default_has_file_fetcher_and_cache() {
        let cfg = LoadingConfiguration::default();
        assert!(cfg.fetcher("file").is_some());
        assert!(cfg.fetcher("FILE").is_some());
        assert!(cfg.fetcher("ftp").is_none());
        assert!(cfg.enable_cache());
        assert_eq!(cfg.dereferencing(), Dereferencing::Canonical);
    }

    #[test]
    fn add_scheme_validates_name() {
        let fetcher = |_: &Url| -> Result<Vec<u8>, FetchError> { Ok(b"{}".to_vec()) };
        assert!(LoadingConfiguration::builder().add_scheme("mem", fetcher).is_ok());
        assert!(matches!(
            LoadingConfiguration::builder().add_scheme("1bad", fetcher),
            Err(ConfigError::InvalidScheme { .. })
        ));
        assert!(LoadingConfiguration::builder().add_scheme("", fetcher).is_err());
    }

    #[test]
    fn thaw_does_not_alias_frozen() {
        let frozen = LoadingConfiguration::builder().freeze();
        let thawed = frozen.thaw().remove_scheme("file").set_enable_cache(false).freeze();
        assert!(frozen.fetcher("file").is_some());
        assert!(frozen.enable_cache());
        assert!(thawed.fetcher("file").is_none());
        assert!(!thawed.enable_cache());
    }

    #[test]
    fn preload_requires_absolute_uri() {
        assert!(LoadingConfiguration::builder()
            .preload_schema("relative.json", json!({}))
            .is_err());
        assert!(LoadingConfiguration::builder()
            .preload_schema("http://x.org/s.json#/a", json!({}))
            .is_err());
        let cfg = LoadingConfiguration::builder()
            .preload_schema("http://x.org/s.json", json!({ "type": "null" }))
            .unwrap()
            .freeze();
        assert!(cfg.preloaded(&r("http://x.org/s.json#")).is_some());
    }

    #[test]
    fn preload_with_id() {
        let cfg = LoadingConfiguration::builder()
            .preload_schema_with_id(json!({ "$id": "urn:example:s" }))
            .unwrap()
            .freeze();
        assert!(cfg.preloaded(&r("urn:example:s")).is_some());
        assert!(LoadingConfiguration::builder()
            .preload_schema_with_id(json!({}))
            .is_err());
    }

    #[test]
    fn parse_honors_features() {
        let strict = LoadingConfiguration::default();
        assert!(strict.parse(b"\xEF\xBB\xBF{}").is_err());
        assert!(strict.parse(b"{} []").is_err());

        let relaxed = LoadingConfiguration::builder()
            .add_parser_feature(ParserFeature::AllowByteOrderMark)
            .add_parser_feature(ParserFeature::AllowTrailingContent)
            .freeze();
        assert_eq!(relaxed.parse(b"\xEF\xBB\xBF{\"a\":1}").unwrap(), json!({ "a": 1 }));
        assert_eq!(relaxed.parse(b"{} trailing garbage").unwrap(), json!({}));
        assert!(relaxed.parse(b"").is_err());
    }

    #[test]
    fn namespace_must_be_directory() {
        assert!(matches!(
            UriTranslatorConfiguration::builder().set_namespace("http://x.org/a"),
            Err(ConfigError::InvalidNamespace { .. })
        ));
        assert!(UriTranslatorConfiguration::builder()
            .set_namespace("relative/")
            .is_err());
        let cfg = UriTranslatorConfiguration::builder()
            .set_namespace("http://x.org/schemas/")
            .unwrap()
            .freeze();
        assert_eq!(
            cfg.absolutize(&r("a.json#/b")).to_string(),
            "http://x.org/schemas/a.json#/b"
        );
        assert_eq!(cfg.absolutize(&r("urn:x")).to_string(), "urn:x#");
    }

    #[test]
    fn schema_redirect_beats_path_redirect() {
        let cfg = UriTranslatorConfiguration::builder()
            .add_path_redirect("http://x.org/", "file:///local/")
            .unwrap()
            .add_path_redirect("http://x.org/deep/", "file:///deep/")
            .unwrap()
            .add_schema_redirect("http://x.org/deep/s.json", "file:///exact.json")
            .unwrap()
            .freeze();

        assert_eq!(
            cfg.translate(&r("http://x.org/deep/s.json#/a")).to_string(),
            "file:///exact.json#/a"
        );
        assert_eq!(
            cfg.translate(&r("http://x.org/deep/t.json")).to_string(),
            "file:///deep/t.json#"
        );
        assert_eq!(
            cfg.translate(&r("http://x.org/a/b.json")).to_string(),
            "file:///local/a/b.json#"
        );
        assert_eq!(
            cfg.translate(&r("http://y.org/s.json")).to_string(),
            "http://y.org/s.json#"
        );
    }
}
