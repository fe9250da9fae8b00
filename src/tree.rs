//! Schema trees: a JSON document plus a position and resolution context.
//!
//! A [`SchemaTree`] is a cheap, immutable view. The document is shared
//! behind an `Arc`; moving to another pointer or resolving a reference
//! yields a new view and never touches the original.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde_json::{json, Value};

use crate::config::Dereferencing;
use crate::error::ProcessingError;
use crate::inline::Inliner;
use crate::loader::SchemaLoader;
use crate::messages::core_message;
use crate::pointer::{JsonPointer, PointerSet};
use crate::reference::{Reference, SchemaIdentity};
use crate::report::{resolution_exception, LogLevel, ProcessingMessage, ProcessingReport};
use crate::visit::{all_elements, all_members, TreeVisitor, TreeWalker, VisitResult};

static NULL: Value = Value::Null;

// Keywords whose values are instances, not subschemas.
pub(crate) const NON_SCHEMA_KEYWORDS: &[&str] = &["enum", "const", "default", "examples"];

/// Map from every reference a document declares (its loading URI and each
/// `$id`) to the pointer of the declaring node.
type IdIndex = HashMap<Reference, JsonPointer>;

/// A JSON schema document, a position inside it, and its loading context.
#[derive(Clone)]
pub struct SchemaTree {
    document: Arc<Value>,
    identity: SchemaIdentity,
    loading_ref: Reference,
    pointer: JsonPointer,
    scope: Reference,
    dereferencing: Dereferencing,
    ids: Arc<OnceLock<IdIndex>>,
}

impl SchemaTree {
    /// Anonymous tree over `document`, positioned at its root.
    pub fn new(document: Value) -> Self {
        Self::build(
            Arc::new(document),
            SchemaIdentity::anonymous(),
            Reference::empty(),
            Dereferencing::Canonical,
        )
    }

    /// Tree over `document` as loaded from `loading_ref`.
    ///
    /// The fragment of `loading_ref` is dropped. A reference without a
    /// scheme gives an anonymous tree.
    pub fn with_loading_ref(
        document: impl Into<Arc<Value>>,
        loading_ref: &Reference,
        dereferencing: Dereferencing,
    ) -> Self {
        let locator = loading_ref.locator();
        let identity = if locator.has_locator() {
            SchemaIdentity::of(&locator)
        } else {
            SchemaIdentity::anonymous()
        };
        Self::build(document.into(), identity, locator, dereferencing)
    }

    fn build(
        document: Arc<Value>,
        identity: SchemaIdentity,
        loading_ref: Reference,
        dereferencing: Dereferencing,
    ) -> Self {
        let pointer = JsonPointer::empty();
        let scope = scope_at(&loading_ref, &document, &pointer);
        Self {
            document,
            identity,
            loading_ref,
            pointer,
            scope,
            dereferencing,
            ids: Arc::new(OnceLock::new()),
        }
    }

    /// The whole document.
    pub fn base_node(&self) -> &Value {
        &self.document
    }

    /// The node at the current pointer.
    pub fn current_node(&self) -> &Value {
        self.pointer.get(&self.document).unwrap_or(&NULL)
    }

    pub fn pointer(&self) -> &JsonPointer {
        &self.pointer
    }

    /// The URI the document was loaded from, without fragment.
    pub fn loading_ref(&self) -> &Reference {
        &self.loading_ref
    }

    /// Resolution scope at the current node: the loading URI rebased by
    /// every `$id` from the root down to here.
    pub fn current_scope(&self) -> &Reference {
        &self.scope
    }

    /// Identity of the document, shared by every view of it.
    pub fn document_identity(&self) -> &SchemaIdentity {
        &self.identity
    }

    pub fn dereferencing(&self) -> Dereferencing {
        self.dereferencing
    }

    /// Loading URI with the current pointer as fragment.
    pub fn absolute_ref(&self) -> Reference {
        self.loading_ref.with_pointer(&self.pointer)
    }

    /// The document's `$schema`, if it is a valid reference.
    pub fn dollar_schema(&self) -> Option<Reference> {
        self.document
            .get("$schema")
            .and_then(Value::as_str)
            .and_then(|s| Reference::parse(s).ok())
            .map(|r| r.locator())
    }

    /// View of the same document at `pointer` (absolute within the document).
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError::Resolution` if nothing exists at `pointer`.
    pub fn at(&self, pointer: &JsonPointer) -> Result<SchemaTree, ProcessingError> {
        if pointer.get(&self.document).is_none() {
            return Err(self.pointer_not_found(pointer).as_exception());
        }
        Ok(self.moved_to(pointer.clone()))
    }

    /// View at the current pointer followed by `pointer`.
    pub fn append(&self, pointer: &JsonPointer) -> Result<SchemaTree, ProcessingError> {
        self.at(&self.pointer.append(pointer))
    }

    fn moved_to(&self, pointer: JsonPointer) -> SchemaTree {
        let scope = scope_at(&self.loading_ref, &self.document, &pointer);
        SchemaTree {
            pointer,
            scope,
            ..self.clone()
        }
    }

    fn pointer_not_found(&self, pointer: &JsonPointer) -> ProcessingMessage {
        ProcessingMessage::new()
            .set_message(core_message("tree.pointerNotFound"))
            .put_argument("pointer", pointer.to_string())
            .put_serialized("loadingURI", &self.loading_ref)
            .set_exception_provider(resolution_exception)
    }

    /// Every `$id` of the document, keyed by its resolved reference.
    pub fn id_index(&self) -> &HashMap<Reference, JsonPointer> {
        self.ids.get_or_init(|| {
            let mut walker = TreeWalker::new(IdIndexer {
                tree: self,
                index: HashMap::new(),
            });
            let mut report = ProcessingReport::new();
            let root = self.moved_to(JsonPointer::empty());
            // The indexer never fails and never stops early.
            let _ = walker.walk(&root, &mut report);
            walker.into_visitor().index
        })
    }

    /// Resolution scope at `pointer` in this document.
    pub(crate) fn scope_at(&self, pointer: &JsonPointer) -> Reference {
        scope_at(&self.loading_ref, &self.document, pointer)
    }

    /// The `$ref` of the current node, if it has one.
    pub fn current_ref(&self) -> Option<Result<Reference, ProcessingError>> {
        self.current_node()
            .get("$ref")
            .and_then(Value::as_str)
            .map(Reference::parse)
    }

    /// Follow the current node's `$ref`, if any.
    ///
    /// Without a `$ref`, the tree itself is returned. Unresolvable or
    /// looping references are reported as errors and also give back the
    /// tree unchanged.
    pub fn resolve(
        &self,
        loader: &SchemaLoader,
        report: &mut ProcessingReport,
    ) -> Result<SchemaTree, ProcessingError> {
        match self.current_ref() {
            None => Ok(self.clone()),
            Some(Ok(reference)) => self.resolve_reference(&reference, loader, report),
            Some(Err(e)) => {
                report.error(e.into_message())?;
                Ok(self.clone())
            }
        }
    }

    /// Resolve `reference` against the current scope and follow it, along
    /// with any chain of refs at the target.
    ///
    /// In canonical mode the result is a view of the target document. In
    /// inline mode it is this tree with the current node replaced by an
    /// inlined copy of the target.
    pub fn resolve_reference(
        &self,
        reference: &Reference,
        loader: &SchemaLoader,
        report: &mut ProcessingReport,
    ) -> Result<SchemaTree, ProcessingError> {
        let mut path: Vec<Reference> = Vec::new();
        let mut target = self.scope.resolve(reference);
        let found = loop {
            if path.contains(&target) {
                path.push(target.clone());
                report.error(
                    ProcessingMessage::new()
                        .set_message(core_message("refProcessing.refLoop"))
                        .put_argument("ref", target.as_str())
                        .put_array("path", path.iter().map(Reference::as_str))
                        .set_exception_provider(resolution_exception),
                )?;
                return Ok(self.clone());
            }
            path.push(target.clone());

            let located = match self.locate(&target, loader) {
                Ok(tree) => tree,
                Err(message) => {
                    report.log(message.log_level().max(LogLevel::Error), message)?;
                    return Ok(self.clone());
                }
            };
            match located.current_ref() {
                None => break located,
                Some(Ok(next)) => target = located.scope.resolve(&next),
                Some(Err(e)) => {
                    report.error(e.into_message())?;
                    return Ok(self.clone());
                }
            }
        };

        tracing::debug!(
            from = %self.absolute_ref(),
            to = %found.absolute_ref(),
            "resolved reference"
        );

        match self.dereferencing {
            Dereferencing::Canonical => Ok(found),
            Dereferencing::Inline => {
                let value = Inliner::new(loader).inline_node(&found, path, report)?;
                Ok(self.substituted(value))
            }
        }
    }

    /// Copy of this tree with the current node replaced by `value`.
    fn substituted(&self, value: Value) -> SchemaTree {
        let mut document = (*self.document).clone();
        if let Some(slot) = self.pointer.get_mut(&mut document) {
            *slot = value;
        }
        Self::build(
            Arc::new(document),
            SchemaIdentity::anonymous(),
            self.loading_ref.clone(),
            self.dereferencing,
        )
        .moved_to(self.pointer.clone())
    }

    /// Find the node `target` designates, loading another document if needed.
    ///
    /// Documents found through the loader are always canonical: inlining
    /// happens on top of them.
    pub(crate) fn locate(
        &self,
        target: &Reference,
        loader: &SchemaLoader,
    ) -> Result<SchemaTree, ProcessingMessage> {
        if let Some(pointer) = self.find_in_document(target) {
            return self.at(&pointer).map_err(|_| dangling(target));
        }
        if !target.has_locator() {
            return Err(dangling(target));
        }
        let document = loader
            .load_document(&target.locator())
            .map_err(ProcessingError::into_message)?;
        match document.find_in_document(target) {
            Some(pointer) => document.at(&pointer).map_err(|_| dangling(target)),
            None => Err(dangling(target)),
        }
    }

    fn find_in_document(&self, target: &Reference) -> Option<JsonPointer> {
        let index = self.id_index();
        if let Some(pointer) = index.get(target) {
            return Some(pointer.clone());
        }
        let base = index.get(&target.locator())?;
        let fragment = target.pointer()?;
        Some(base.append(&fragment))
    }

    /// `{"loadingURI": ..., "pointer": ...}`
    pub fn as_json(&self) -> Value {
        json!({
            "loadingURI": self.loading_ref.as_str(),
            "pointer": self.pointer.to_string(),
        })
    }
}

fn dangling(target: &Reference) -> ProcessingMessage {
    ProcessingMessage::new()
        .set_message(core_message("refProcessing.danglingRef"))
        .put_argument("ref", target.as_str())
        .set_exception_provider(resolution_exception)
}

impl fmt::Debug for SchemaTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaTree")
            .field("identity", &self.identity)
            .field("loading_ref", &self.loading_ref)
            .field("pointer", &self.pointer)
            .field("dereferencing", &self.dereferencing)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for SchemaTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_json())
    }
}

/// `$id` declared by `node`, falling back to draft-4 `id`.
pub(crate) fn declared_id(node: &Value) -> Option<Reference> {
    let map = node.as_object()?;
    ["$id", "id"]
        .iter()
        .find_map(|key| map.get(*key).and_then(Value::as_str))
        .and_then(|id| Reference::parse(id).ok())
}

fn rebase(scope: &Reference, node: &Value) -> Reference {
    match declared_id(node) {
        Some(id) => scope.resolve(&id),
        None => scope.clone(),
    }
}

fn scope_at(loading_ref: &Reference, document: &Value, pointer: &JsonPointer) -> Reference {
    let mut scope = rebase(loading_ref, document);
    let mut node = document;
    for token in pointer.tokens() {
        let child = match node {
            Value::Object(map) => map.get(token),
            Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        let Some(child) = child else { break };
        node = child;
        scope = rebase(&scope, node);
    }
    scope
}

struct IdIndexer<'a> {
    tree: &'a SchemaTree,
    index: IdIndex,
}

impl TreeVisitor for IdIndexer<'_> {
    fn visit_node(
        &mut self,
        ptr: &JsonPointer,
        node: &Value,
        _report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        if ptr.is_empty() {
            self.index
                .insert(self.tree.loading_ref.clone(), JsonPointer::empty());
        }
        if declared_id(node).is_some() {
            let key = self.tree.scope_at(ptr);
            self.index.entry(key).or_insert_with(|| ptr.clone());
        }
        Ok(VisitResult::Continue)
    }

    fn pre_visit_object(
        &mut self,
        _ptr: &JsonPointer,
        node: &Value,
        children: &mut PointerSet,
        _report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        if let Value::Object(map) = node {
            for key in map.keys() {
                if !NON_SCHEMA_KEYWORDS.contains(&key.as_str()) {
                    children.insert(JsonPointer::from_tokens([key.as_str()]));
                }
            }
        } else {
            all_members(node, children);
        }
        Ok(VisitResult::Continue)
    }

    fn pre_visit_array(
        &mut self,
        _ptr: &JsonPointer,
        node: &Value,
        children: &mut PointerSet,
        _report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        all_elements(node, children);
        Ok(VisitResult::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoadingConfiguration;
    use serde_json::json;

    fn r(s: &str) -> Reference {
        Reference::parse(s).unwrap()
    }

    fn p(s: &str) -> JsonPointer {
        JsonPointer::parse(s).unwrap()
    }

    fn canonical_loader() -> SchemaLoader {
        SchemaLoader::new(LoadingConfiguration::default())
    }

    fn inline_loader() -> SchemaLoader {
        SchemaLoader::new(
            LoadingConfiguration::builder()
                .dereferencing(Dereferencing::Inline)
                .freeze(),
        )
    }

    #[test]
    fn new_tree_is_anonymous_at_root() {
        let tree = SchemaTree::new(json!({ "type": "object" }));
        assert!(tree.document_identity().is_anonymous());
        assert!(tree.pointer().is_empty());
        assert_eq!(tree.current_node(), &json!({ "type": "object" }));
        assert_eq!(tree.loading_ref(), &Reference::empty());
    }

    #[test]
    fn at_moves_without_touching_original() {
        let tree = SchemaTree::new(json!({ "properties": { "a": { "type": "string" } } }));
        let moved = tree.at(&p("/properties/a")).unwrap();
        assert_eq!(moved.current_node(), &json!({ "type": "string" }));
        assert!(tree.pointer().is_empty());
        assert_eq!(moved.document_identity(), tree.document_identity());

        let err = tree.at(&p("/properties/b")).unwrap_err();
        assert!(matches!(err, ProcessingError::Resolution(_)));
    }

    #[test]
    fn append_is_relative() {
        let tree = SchemaTree::new(json!({ "a": { "b": { "c": 1 } } }));
        let a = tree.at(&p("/a")).unwrap();
        assert_eq!(a.append(&p("/b/c")).unwrap().current_node(), &json!(1));
    }

    #[test]
    fn loading_ref_drops_fragment_and_gives_identity() {
        let tree = SchemaTree::with_loading_ref(
            json!({}),
            &r("http://x.org/s.json#/a"),
            Dereferencing::Canonical,
        );
        assert_eq!(tree.loading_ref().as_str(), "http://x.org/s.json#");
        assert_eq!(
            tree.document_identity(),
            &SchemaIdentity::of(&r("http://x.org/s.json"))
        );
    }

    #[test]
    fn scope_follows_ids() {
        let doc = json!({
            "$id": "http://x.org/root.json",
            "properties": {
                "a": { "$id": "sub/a.json", "items": { "type": "string" } }
            }
        });
        let root = r("file:///tmp/root.json");
        let tree = SchemaTree::with_loading_ref(doc, &root, Dereferencing::Canonical);
        assert_eq!(tree.current_scope().as_str(), "http://x.org/root.json#");
        let items = tree.at(&p("/properties/a/items")).unwrap();
        assert_eq!(items.current_scope().as_str(), "http://x.org/sub/a.json#");
    }

    #[test]
    fn dollar_schema() {
        let tree = SchemaTree::new(json!({ "$schema": "http://json-schema.org/draft-07/schema#" }));
        assert_eq!(
            tree.dollar_schema().unwrap().as_str(),
            "http://json-schema.org/draft-07/schema#"
        );
        assert!(SchemaTree::new(json!({})).dollar_schema().is_none());
    }

    #[test]
    fn id_index_skips_instance_keywords() {
        let doc = json!({
            "$id": "http://x.org/root.json",
            "definitions": { "a": { "$id": "#anchor" } },
            "enum": [ { "$id": "http://x.org/not-a-schema.json" } ]
        });
        let tree =
            SchemaTree::with_loading_ref(doc, &r("file:///root.json"), Dereferencing::Canonical);
        let index = tree.id_index();
        assert_eq!(index.get(&r("file:///root.json")), Some(&p("")));
        assert_eq!(index.get(&r("http://x.org/root.json")), Some(&p("")));
        assert_eq!(index.get(&r("http://x.org/root.json#anchor")), Some(&p("/definitions/a")));
        assert!(index.get(&r("http://x.org/not-a-schema.json")).is_none());
    }

    #[test]
    fn resolve_without_ref_returns_self() {
        let tree = SchemaTree::new(json!({ "type": "string" }));
        let mut report = ProcessingReport::new();
        let resolved = tree.resolve(&canonical_loader(), &mut report).unwrap();
        assert_eq!(resolved.current_node(), tree.current_node());
        assert!(report.is_empty());
    }

    #[test]
    fn resolve_local_chain() {
        let doc = json!({
            "definitions": {
                "a": { "$ref": "#/definitions/b" },
                "b": { "type": "integer" }
            },
            "$ref": "#/definitions/a"
        });
        let tree = SchemaTree::new(doc);
        let mut report = ProcessingReport::new();
        let resolved = tree.resolve(&canonical_loader(), &mut report).unwrap();
        assert_eq!(resolved.pointer().to_string(), "/definitions/b");
        assert_eq!(resolved.current_node(), &json!({ "type": "integer" }));
        assert!(report.is_success());
    }

    #[test]
    fn resolve_through_plain_name_anchor() {
        let doc = json!({
            "$id": "http://x.org/root.json",
            "definitions": { "a": { "$id": "#thing", "type": "null" } },
            "properties": { "p": { "$ref": "#thing" } }
        });
        let root = r("http://x.org/root.json");
        let tree = SchemaTree::with_loading_ref(doc, &root, Dereferencing::Canonical);
        let p_tree = tree.at(&p("/properties/p")).unwrap();
        let mut report = ProcessingReport::new();
        let resolved = p_tree.resolve(&canonical_loader(), &mut report).unwrap();
        assert_eq!(resolved.pointer().to_string(), "/definitions/a");
    }

    #[test]
    fn dangling_ref_is_reported() {
        let tree = SchemaTree::new(json!({ "$ref": "#/nowhere" }));
        let mut report = ProcessingReport::new();
        let resolved = tree.resolve(&canonical_loader(), &mut report).unwrap();
        assert!(resolved.pointer().is_empty());
        assert!(!report.is_success());
        assert_eq!(report.messages()[0].get("ref").unwrap(), "#/nowhere");
    }

    #[test]
    fn percent_encoded_pointer_fragment_is_decoded() {
        let tree = SchemaTree::new(json!({
            "properties": {
                "a b": { "type": "integer" },
                "x": { "$ref": "#/properties/a%20b" }
            }
        }));
        let mut report = ProcessingReport::new();
        let resolved = tree
            .at(&p("/properties/x"))
            .unwrap()
            .resolve(&canonical_loader(), &mut report)
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(resolved.pointer(), &p("/properties/a b"));
        assert_eq!(resolved.current_node(), &json!({ "type": "integer" }));
    }

    #[test]
    fn unregistered_scheme_is_raised_as_configuration_error() {
        let tree = SchemaTree::with_loading_ref(
            json!({ "$ref": "nope:/x.json" }),
            &r("urn:root"),
            Dereferencing::Canonical,
        );
        let mut report = ProcessingReport::new();
        let err = tree.resolve(&canonical_loader(), &mut report).unwrap_err();
        assert!(matches!(err, ProcessingError::Configuration(_)));
        assert_eq!(err.message().log_level(), LogLevel::Fatal);
        assert!(report.is_empty());
    }

    #[test]
    fn ref_loop_is_reported_not_followed() {
        let doc = json!({
            "definitions": {
                "a": { "$ref": "#/definitions/b" },
                "b": { "$ref": "#/definitions/a" }
            }
        });
        let tree = SchemaTree::new(doc).at(&p("/definitions/a")).unwrap();
        let mut report = ProcessingReport::new();
        let resolved = tree.resolve(&canonical_loader(), &mut report).unwrap();
        assert_eq!(resolved.pointer().to_string(), "/definitions/a");
        assert_eq!(report.len(), 1);
        assert!(report.messages()[0].message().contains("loop"));
        assert_eq!(report.messages()[0].get("path").unwrap().as_array().unwrap().len(), 3);
    }

    #[test]
    fn self_reference_is_a_loop() {
        let tree = SchemaTree::new(json!({ "$ref": "#" }));
        let mut report = ProcessingReport::new();
        tree.resolve(&canonical_loader(), &mut report).unwrap();
        assert!(!report.is_success());
    }

    #[test]
    fn raising_report_turns_errors_into_failures() {
        let tree = SchemaTree::new(json!({ "$ref": "#/nowhere" }));
        let mut report = ProcessingReport::with_thresholds(LogLevel::Info, LogLevel::Error);
        let err = tree.resolve(&canonical_loader(), &mut report).unwrap_err();
        assert!(matches!(err, ProcessingError::Resolution(_)));
    }

    #[test]
    fn resolve_preloaded_remote() {
        let loader = SchemaLoader::new(
            LoadingConfiguration::builder()
                .preload_schema(
                    "http://x.org/types.json",
                    json!({ "definitions": { "id": { "type": "integer" } } }),
                )
                .unwrap()
                .freeze(),
        );
        let tree = SchemaTree::with_loading_ref(
            json!({ "$ref": "types.json#/definitions/id" }),
            &r("http://x.org/root.json"),
            Dereferencing::Canonical,
        );
        let mut report = ProcessingReport::new();
        let resolved = tree.resolve(&loader, &mut report).unwrap();
        assert_eq!(resolved.loading_ref().as_str(), "http://x.org/types.json#");
        assert_eq!(resolved.current_node(), &json!({ "type": "integer" }));
    }

    #[test]
    fn inline_resolution_substitutes_target() {
        let doc = json!({
            "definitions": { "b": { "type": "integer" } },
            "properties": { "p": { "$ref": "#/definitions/b" } }
        });
        let tree =
            SchemaTree::with_loading_ref(doc, &r("http://x.org/root.json"), Dereferencing::Inline);
        let p_tree = tree.at(&p("/properties/p")).unwrap();
        let mut report = ProcessingReport::new();
        let resolved = p_tree.resolve(&inline_loader(), &mut report).unwrap();
        assert_eq!(resolved.pointer().to_string(), "/properties/p");
        assert_eq!(resolved.current_node(), &json!({ "type": "integer" }));
        // The original view is untouched.
        assert_eq!(p_tree.current_node(), &json!({ "$ref": "#/definitions/b" }));
    }

    #[test]
    fn as_json_shape() {
        let tree =
            SchemaTree::with_loading_ref(json!({ "a": {} }), &r("urn:x"), Dereferencing::Canonical);
        let a = tree.at(&p("/a")).unwrap();
        assert_eq!(a.as_json(), json!({ "loadingURI": "urn:x#", "pointer": "/a" }));
    }
}
