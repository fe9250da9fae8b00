//! Inline dereferencing: replace every `$ref` by a copy of its target.
//!
//! The references of a node are collected with a [`TreeWalker`], then each
//! one is located, inlined recursively and merged into the copy. Keys next
//! to a `$ref` win over the target's keys.
//!
//! A reference whose target is already being inlined further up is a
//! cycle. It stays in the output as `{"$ref": "<absolute reference>"}`, a
//! terminal marker that canonical resolution can still follow.

use serde_json::Value;

use crate::error::ProcessingError;
use crate::loader::SchemaLoader;
use crate::messages::core_message;
use crate::pointer::{JsonPointer, PointerSet};
use crate::reference::Reference;
use crate::report::{LogLevel, ProcessingMessage, ProcessingReport};
use crate::tree::{SchemaTree, NON_SCHEMA_KEYWORDS};
use crate::visit::{all_elements, TreeVisitor, TreeWalker, VisitResult};

pub(crate) struct Inliner<'a> {
    loader: &'a SchemaLoader,
}

impl<'a> Inliner<'a> {
    pub(crate) fn new(loader: &'a SchemaLoader) -> Self {
        Self { loader }
    }

    /// Inlined copy of the whole document of `tree`.
    pub(crate) fn inline_document(
        &self,
        tree: &SchemaTree,
        report: &mut ProcessingReport,
    ) -> Result<Value, ProcessingError> {
        let root = tree.at(&JsonPointer::empty())?;
        let active = vec![root.absolute_ref()];
        self.inline_node(&root, active, report)
    }

    /// Inlined copy of the current node of `tree`.
    ///
    /// `active` holds the references already being followed; any of them
    /// met again becomes a cycle marker.
    pub(crate) fn inline_node(
        &self,
        tree: &SchemaTree,
        mut active: Vec<Reference>,
        report: &mut ProcessingReport,
    ) -> Result<Value, ProcessingError> {
        self.inline_with(tree, &mut active, report)
    }

    fn inline_with(
        &self,
        tree: &SchemaTree,
        active: &mut Vec<Reference>,
        report: &mut ProcessingReport,
    ) -> Result<Value, ProcessingError> {
        let mut value = tree.current_node().clone();

        let mut walker = TreeWalker::new(RefFinder {
            tree,
            refs: Vec::new(),
        });
        walker.walk(tree, report)?;

        for (ptr, target) in walker.into_visitor().refs {
            let Some(relative) = ptr.relative_to(tree.pointer()) else {
                continue;
            };

            if active.contains(&target) {
                tracing::debug!(
                    reference = %target,
                    pointer = %ptr,
                    "reference cycle, leaving marker"
                );
                report.warn(
                    ProcessingMessage::new()
                        .set_message(core_message("inline.refCycle"))
                        .put("ref", target.as_str())
                        .put("pointer", ptr.to_string()),
                )?;
                if let Some(Value::Object(map)) = relative.get_mut(&mut value) {
                    map.insert("$ref".to_string(), Value::String(target.to_string()));
                }
                continue;
            }

            let located = match tree.locate(&target, self.loader) {
                Ok(located) => located,
                Err(message) => {
                    let level = message.log_level().max(LogLevel::Error);
                    report.log(level, message.put("pointer", ptr.to_string()))?;
                    continue;
                }
            };

            active.push(target);
            let replacement = self.inline_with(&located, active, report)?;
            active.pop();

            if let Some(slot) = relative.get_mut(&mut value) {
                merge(slot, replacement);
            }
        }

        Ok(value)
    }
}

fn merge(slot: &mut Value, replacement: Value) {
    match (slot, replacement) {
        (Value::Object(obj), Value::Object(target)) => {
            obj.remove("$ref");
            for (k, v) in target {
                obj.entry(k).or_insert(v);
            }
        }
        (slot, replacement) => *slot = replacement,
    }
}

/// Collects every `$ref` under a node with its resolved target.
/// Does not descend into a node that has a `$ref`.
struct RefFinder<'a> {
    tree: &'a SchemaTree,
    refs: Vec<(JsonPointer, Reference)>,
}

impl TreeVisitor for RefFinder<'_> {
    fn visit_node(
        &mut self,
        ptr: &JsonPointer,
        node: &Value,
        report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        if let Some(raw) = node.get("$ref").and_then(Value::as_str) {
            match Reference::parse(raw) {
                Ok(reference) => {
                    let target = self.tree.scope_at(ptr).resolve(&reference);
                    self.refs.push((ptr.clone(), target));
                }
                Err(e) => report.error(e.into_message().put("pointer", ptr.to_string()))?,
            }
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
        let Value::Object(map) = node else {
            return Ok(VisitResult::Continue);
        };
        if map.get("$ref").is_some_and(Value::is_string) {
            return Ok(VisitResult::Continue);
        }
        for key in map.keys() {
            if !NON_SCHEMA_KEYWORDS.contains(&key.as_str()) {
                children.insert(JsonPointer::from_tokens([key.as_str()]));
            }
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
