//! Keyword plug-ins and the descriptors that group them.
//!
//! A [`Keyword`] pairs a name with an optional [`SyntaxChecker`] and an
//! optional [`PointerCollector`]. A [`SchemaDescriptor`] is the set of
//! keywords one `$schema` URI stands for, and a [`SchemaSelector`] picks the
//! descriptor for a tree from its `$schema`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{ConfigError, ProcessingError};
use crate::messages::MessageCatalog;
use crate::pointer::{JsonPointer, PointerSet};
use crate::reference::Reference;
use crate::report::{ProcessingMessage, ProcessingReport};
use crate::tree::SchemaTree;

/// Checks the shape of one keyword's value.
///
/// `pointers` holds what the keyword's own collector produced for the same
/// node.
pub trait SyntaxChecker: Send + Sync {
    fn check_syntax(
        &self,
        pointers: &PointerSet,
        catalog: &dyn MessageCatalog,
        report: &mut ProcessingReport,
        tree: &SchemaTree,
    ) -> Result<(), ProcessingError>;
}

impl<F> SyntaxChecker for F
where
    F: Fn(
            &PointerSet,
            &dyn MessageCatalog,
            &mut ProcessingReport,
            &SchemaTree,
        ) -> Result<(), ProcessingError>
        + Send
        + Sync,
{
    fn check_syntax(
        &self,
        pointers: &PointerSet,
        catalog: &dyn MessageCatalog,
        report: &mut ProcessingReport,
        tree: &SchemaTree,
    ) -> Result<(), ProcessingError> {
        self(pointers, catalog, report, tree)
    }
}

/// Adds the pointers (relative to the current node) of the subschemas one
/// keyword holds.
pub trait PointerCollector: Send + Sync {
    fn collect(&self, pointers: &mut PointerSet, tree: &SchemaTree);
}

impl<F> PointerCollector for F
where
    F: Fn(&mut PointerSet, &SchemaTree) + Send + Sync,
{
    fn collect(&self, pointers: &mut PointerSet, tree: &SchemaTree) {
        self(pointers, tree)
    }
}

/// The value is itself a schema (`not`, `additionalProperties`).
#[derive(Debug, Clone)]
pub struct SchemaCollector {
    keyword: String,
}

impl SchemaCollector {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }
}

impl PointerCollector for SchemaCollector {
    fn collect(&self, pointers: &mut PointerSet, tree: &SchemaTree) {
        if tree.current_node().get(&self.keyword).is_some() {
            pointers.insert(JsonPointer::from_tokens([self.keyword.as_str()]));
        }
    }
}

/// The value is an array of schemas (`allOf`, `anyOf`).
#[derive(Debug, Clone)]
pub struct SchemaArrayCollector {
    keyword: String,
}

impl SchemaArrayCollector {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }
}

impl PointerCollector for SchemaArrayCollector {
    fn collect(&self, pointers: &mut PointerSet, tree: &SchemaTree) {
        if let Some(Value::Array(items)) = tree.current_node().get(&self.keyword) {
            let base = JsonPointer::from_tokens([self.keyword.as_str()]);
            pointers.extend((0..items.len()).map(|i| base.append_index(i)));
        }
    }
}

/// The value maps names to schemas (`properties`, `$defs`).
#[derive(Debug, Clone)]
pub struct SchemaMapCollector {
    keyword: String,
}

impl SchemaMapCollector {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }
}

impl PointerCollector for SchemaMapCollector {
    fn collect(&self, pointers: &mut PointerSet, tree: &SchemaTree) {
        if let Some(Value::Object(map)) = tree.current_node().get(&self.keyword) {
            for name in map.keys() {
                pointers.insert(JsonPointer::from_tokens([self.keyword.as_str(), name.as_str()]));
            }
        }
    }
}

/// The value is a schema or an array of schemas (draft-4 `items`).
#[derive(Debug, Clone)]
pub struct SchemaOrArrayCollector {
    keyword: String,
}

impl SchemaOrArrayCollector {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
        }
    }
}

impl PointerCollector for SchemaOrArrayCollector {
    fn collect(&self, pointers: &mut PointerSet, tree: &SchemaTree) {
        match tree.current_node().get(&self.keyword) {
            Some(Value::Array(_)) => {
                SchemaArrayCollector::new(self.keyword.as_str()).collect(pointers, tree)
            }
            Some(_) => SchemaCollector::new(self.keyword.as_str()).collect(pointers, tree),
            None => {}
        }
    }
}

/// Name of the JSON type of `value`, as JSON Schema spells it.
pub fn node_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Reports an error unless the keyword's value has one of the given types.
///
/// `"integer"` values also satisfy `"number"`.
#[derive(Debug, Clone)]
pub struct TypeOnlySyntaxChecker {
    keyword: String,
    allowed: Vec<&'static str>,
}

impl TypeOnlySyntaxChecker {
    pub fn new(keyword: impl Into<String>, allowed: &[&'static str]) -> Self {
        Self {
            keyword: keyword.into(),
            allowed: allowed.to_vec(),
        }
    }
}

impl SyntaxChecker for TypeOnlySyntaxChecker {
    fn check_syntax(
        &self,
        _pointers: &PointerSet,
        catalog: &dyn MessageCatalog,
        report: &mut ProcessingReport,
        tree: &SchemaTree,
    ) -> Result<(), ProcessingError> {
        let Some(value) = tree.current_node().get(&self.keyword) else {
            return Ok(());
        };
        let found = node_type(value);
        let ok = self.allowed.contains(&found)
            || (found == "integer" && self.allowed.contains(&"number"));
        if ok {
            return Ok(());
        }
        report.error(
            ProcessingMessage::new()
                .set_message(catalog.message("common.incorrectType"))
                .put_argument("found", found)
                .put_argument_array("expected", self.allowed.iter())
                .put("keyword", self.keyword.as_str())
                .put("schema", tree.as_json()),
        )
    }
}

/// A named keyword with its plug-ins.
#[derive(Clone)]
pub struct Keyword {
    name: String,
    checker: Option<Arc<dyn SyntaxChecker>>,
    collector: Option<Arc<dyn PointerCollector>>,
}

impl Keyword {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            checker: None,
            collector: None,
        }
    }

    pub fn with_syntax_checker(mut self, checker: impl SyntaxChecker + 'static) -> Self {
        self.checker = Some(Arc::new(checker));
        self
    }

    pub fn with_pointer_collector(mut self, collector: impl PointerCollector + 'static) -> Self {
        self.collector = Some(Arc::new(collector));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn syntax_checker(&self) -> Option<&Arc<dyn SyntaxChecker>> {
        self.checker.as_ref()
    }

    pub fn pointer_collector(&self) -> Option<&Arc<dyn PointerCollector>> {
        self.collector.as_ref()
    }
}

impl fmt::Debug for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyword")
            .field("name", &self.name)
            .field("checker", &self.checker.is_some())
            .field("collector", &self.collector.is_some())
            .finish()
    }
}

/// The keywords a `$schema` URI stands for.
#[derive(Debug, Clone)]
pub struct SchemaDescriptor {
    locator: Reference,
    keywords: BTreeMap<String, Keyword>,
}

impl SchemaDescriptor {
    pub fn builder(locator: &str) -> Result<SchemaDescriptorBuilder, ConfigError> {
        SchemaDescriptorBuilder::new(locator)
    }

    pub fn locator(&self) -> &Reference {
        &self.locator
    }

    pub fn keyword(&self, name: &str) -> Option<&Keyword> {
        self.keywords.get(name)
    }

    /// Keywords sorted by name.
    pub fn keywords(&self) -> impl Iterator<Item = &Keyword> {
        self.keywords.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.keywords.contains_key(name)
    }

    pub fn thaw(&self) -> SchemaDescriptorBuilder {
        SchemaDescriptorBuilder {
            locator: self.locator.clone(),
            keywords: self.keywords.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchemaDescriptorBuilder {
    locator: Reference,
    keywords: BTreeMap<String, Keyword>,
}

impl SchemaDescriptorBuilder {
    /// # Errors
    ///
    /// `locator` must be an absolute URI without a fragment.
    pub fn new(locator: &str) -> Result<Self, ConfigError> {
        let reference = Reference::parse(locator)
            .ok()
            .filter(Reference::is_absolute)
            .ok_or_else(|| ConfigError::NotAbsolute {
                uri: locator.to_string(),
            })?;
        Ok(Self {
            locator: reference,
            keywords: BTreeMap::new(),
        })
    }

    /// Add `keyword`, replacing one with the same name.
    pub fn add_keyword(mut self, keyword: Keyword) -> Self {
        self.keywords.insert(keyword.name.clone(), keyword);
        self
    }

    pub fn remove_keyword(mut self, name: &str) -> Self {
        self.keywords.remove(name);
        self
    }

    pub fn freeze(self) -> SchemaDescriptor {
        SchemaDescriptor {
            locator: self.locator,
            keywords: self.keywords,
        }
    }
}

/// Descriptors by `$schema` URI, plus the one used when `$schema` is
/// absent or unknown.
#[derive(Debug, Clone)]
pub struct SchemaSelectorConfiguration {
    descriptors: HashMap<Reference, SchemaDescriptor>,
    default: Reference,
}

impl SchemaSelectorConfiguration {
    pub fn builder() -> SchemaSelectorConfigurationBuilder {
        SchemaSelectorConfigurationBuilder::default()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &SchemaDescriptor> {
        self.descriptors.values()
    }

    pub fn default_descriptor(&self) -> Option<&SchemaDescriptor> {
        self.descriptors.get(&self.default)
    }

    pub fn thaw(&self) -> SchemaSelectorConfigurationBuilder {
        SchemaSelectorConfigurationBuilder {
            descriptors: self.descriptors.clone(),
            order: {
                let mut order: Vec<Reference> = self.descriptors.keys().cloned().collect();
                order.sort_by(|a, b| a.as_str().cmp(b.as_str()));
                order
            },
            default: Some(self.default.clone()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaSelectorConfigurationBuilder {
    descriptors: HashMap<Reference, SchemaDescriptor>,
    order: Vec<Reference>,
    default: Option<Reference>,
}

impl SchemaSelectorConfigurationBuilder {
    /// # Errors
    ///
    /// Fails if a descriptor with the same locator is already registered.
    pub fn add_descriptor(mut self, descriptor: SchemaDescriptor) -> Result<Self, ConfigError> {
        let locator = descriptor.locator().clone();
        if self.descriptors.contains_key(&locator) {
            return Err(ConfigError::DuplicateDescriptor {
                locator: locator.to_string(),
            });
        }
        self.order.push(locator.clone());
        self.descriptors.insert(locator, descriptor);
        Ok(self)
    }

    /// Register `descriptor` (replacing one with the same locator) and make
    /// it the default.
    pub fn set_default_descriptor(mut self, descriptor: SchemaDescriptor) -> Self {
        let locator = descriptor.locator().clone();
        if !self.descriptors.contains_key(&locator) {
            self.order.push(locator.clone());
        }
        self.descriptors.insert(locator.clone(), descriptor);
        self.default = Some(locator);
        self
    }

    /// # Errors
    ///
    /// Fails if nothing was registered. Without an explicit default, the
    /// first registered descriptor is the default.
    pub fn freeze(self) -> Result<SchemaSelectorConfiguration, ConfigError> {
        let default = self
            .default
            .or_else(|| self.order.first().cloned())
            .ok_or(ConfigError::NoDefaultDescriptor)?;
        Ok(SchemaSelectorConfiguration {
            descriptors: self.descriptors,
            default,
        })
    }
}

/// Picks the descriptor for a tree.
#[derive(Debug, Clone)]
pub struct SchemaSelector {
    cfg: SchemaSelectorConfiguration,
}

impl SchemaSelector {
    pub fn new(cfg: SchemaSelectorConfiguration) -> Self {
        Self { cfg }
    }

    pub fn configuration(&self) -> &SchemaSelectorConfiguration {
        &self.cfg
    }

    /// The descriptor registered for the tree's `$schema`, else the default.
    pub fn select(&self, tree: &SchemaTree) -> Option<&SchemaDescriptor> {
        tree.dollar_schema()
            .and_then(|locator| self.cfg.descriptors.get(&locator))
            .or_else(|| self.cfg.default_descriptor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageBundle;
    use serde_json::json;

    fn tree(value: Value) -> SchemaTree {
        SchemaTree::new(value)
    }

    fn collect(collector: &dyn PointerCollector, value: Value) -> Vec<String> {
        let mut pointers = PointerSet::new();
        collector.collect(&mut pointers, &tree(value));
        pointers.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn stock_collectors() {
        assert_eq!(collect(&SchemaCollector::new("not"), json!({ "not": {} })), ["/not"]);
        assert!(collect(&SchemaCollector::new("not"), json!({})).is_empty());
        assert_eq!(
            collect(&SchemaArrayCollector::new("allOf"), json!({ "allOf": [{}, {}] })),
            ["/allOf/0", "/allOf/1"]
        );
        assert_eq!(
            collect(
                &SchemaMapCollector::new("properties"),
                json!({ "properties": { "a/b": {}, "c": {} } })
            ),
            ["/properties/a~1b", "/properties/c"]
        );
        assert_eq!(
            collect(&SchemaOrArrayCollector::new("items"), json!({ "items": [{}] })),
            ["/items/0"]
        );
        assert_eq!(
            collect(&SchemaOrArrayCollector::new("items"), json!({ "items": {} })),
            ["/items"]
        );
    }

    #[test]
    fn type_only_checker() {
        let checker = TypeOnlySyntaxChecker::new("minimum", &["number"]);
        let catalog = MessageBundle::core();
        let mut report = ProcessingReport::new();
        let valid = tree(json!({ "minimum": 3 }));
        checker
            .check_syntax(&PointerSet::new(), catalog.as_ref(), &mut report, &valid)
            .unwrap();
        assert!(report.is_empty());

        let invalid = tree(json!({ "minimum": "3" }));
        checker
            .check_syntax(&PointerSet::new(), catalog.as_ref(), &mut report, &invalid)
            .unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report.messages()[0].get("found").unwrap(), "string");
        assert_eq!(report.messages()[0].get("expected").unwrap(), &json!(["number"]));
    }

    #[test]
    fn descriptor_requires_absolute_locator() {
        assert!(SchemaDescriptor::builder("draft.json").is_err());
        assert!(SchemaDescriptor::builder("http://x.org/s#/a").is_err());
        let d = SchemaDescriptor::builder("http://x.org/s#")
            .unwrap()
            .add_keyword(Keyword::new("type"))
            .add_keyword(Keyword::new("enum"))
            .remove_keyword("enum")
            .freeze();
        assert!(d.contains("type"));
        assert!(!d.contains("enum"));
    }

    #[test]
    fn thawed_descriptor_is_independent() {
        let d = SchemaDescriptor::builder("urn:d")
            .unwrap()
            .add_keyword(Keyword::new("a"))
            .freeze();
        let e = d.thaw().add_keyword(Keyword::new("b")).freeze();
        assert!(!d.contains("b"));
        assert!(e.contains("a") && e.contains("b"));
    }

    #[test]
    fn selector_uses_dollar_schema_then_default() {
        let d1 = SchemaDescriptor::builder("urn:one").unwrap().freeze();
        let d2 = SchemaDescriptor::builder("urn:two").unwrap().freeze();
        let cfg = SchemaSelectorConfiguration::builder()
            .add_descriptor(d1)
            .unwrap()
            .set_default_descriptor(d2)
            .freeze()
            .unwrap();
        let selector = SchemaSelector::new(cfg);

        let pick = |v: Value| selector.select(&tree(v)).unwrap().locator().to_string();
        assert_eq!(pick(json!({ "$schema": "urn:one#" })), "urn:one#");
        assert_eq!(pick(json!({ "$schema": "urn:other" })), "urn:two#");
        assert_eq!(pick(json!({})), "urn:two#");
    }

    #[test]
    fn selector_configuration_errors() {
        assert!(matches!(
            SchemaSelectorConfiguration::builder().freeze(),
            Err(ConfigError::NoDefaultDescriptor)
        ));
        let d = SchemaDescriptor::builder("urn:one").unwrap().freeze();
        assert!(matches!(
            SchemaSelectorConfiguration::builder()
                .add_descriptor(d.clone())
                .unwrap()
                .add_descriptor(d),
            Err(ConfigError::DuplicateDescriptor { .. })
        ));
    }

    #[test]
    fn first_descriptor_is_default_when_unset() {
        let cfg = SchemaSelectorConfiguration::builder()
            .add_descriptor(SchemaDescriptor::builder("urn:first").unwrap().freeze())
            .unwrap()
            .add_descriptor(SchemaDescriptor::builder("urn:second").unwrap().freeze())
            .unwrap()
            .freeze()
            .unwrap();
        assert_eq!(cfg.default_descriptor().unwrap().locator().as_str(), "urn:first#");
    }
}
