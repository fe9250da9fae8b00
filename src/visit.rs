//! Generic recursive walk over JSON documents.
//!
//! A [`TreeWalker`] drives a [`TreeVisitor`]. Every node is first passed to
//! [`TreeVisitor::visit_node`]; containers then go through a pre-visit hook
//! that selects the child pointers to descend into, and a post-visit hook
//! once every selected child was walked. Any hook returning
//! [`VisitResult::Terminate`] ends the whole walk.

use serde_json::Value;

use crate::error::ProcessingError;
use crate::messages::core_message;
use crate::pointer::{JsonPointer, PointerSet};
use crate::report::{ProcessingMessage, ProcessingReport};
use crate::tree::SchemaTree;

/// Outcome of one visitor hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    Continue,
    Terminate,
}

/// Hooks called by [`TreeWalker`].
///
/// Pointers handed to the hooks are absolute within the walked document.
/// Child pointers a pre-visit hook inserts are relative to the container
/// and may span several levels (`properties/foo`).
pub trait TreeVisitor {
    fn visit_node(
        &mut self,
        _ptr: &JsonPointer,
        _node: &Value,
        _report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        Ok(VisitResult::Continue)
    }

    fn pre_visit_object(
        &mut self,
        ptr: &JsonPointer,
        node: &Value,
        children: &mut PointerSet,
        report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError>;

    fn post_visit_object(
        &mut self,
        _ptr: &JsonPointer,
        _report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        Ok(VisitResult::Continue)
    }

    fn pre_visit_array(
        &mut self,
        ptr: &JsonPointer,
        node: &Value,
        children: &mut PointerSet,
        report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError>;

    fn post_visit_array(
        &mut self,
        _ptr: &JsonPointer,
        _report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        Ok(VisitResult::Continue)
    }
}

/// Select every member of an object, in document order.
pub fn all_members(node: &Value, children: &mut PointerSet) {
    if let Value::Object(map) = node {
        for key in map.keys() {
            children.insert(JsonPointer::from_tokens([key.as_str()]));
        }
    }
}

/// Select every element of an array, in order.
pub fn all_elements(node: &Value, children: &mut PointerSet) {
    if let Value::Array(items) = node {
        for index in 0..items.len() {
            children.insert(JsonPointer::empty().append_index(index));
        }
    }
}

#[derive(Clone, Copy)]
enum Container {
    Object,
    Array,
}

/// Recursive-descent driver for a [`TreeVisitor`].
#[derive(Debug)]
pub struct TreeWalker<V> {
    visitor: V,
}

impl<V: TreeVisitor> TreeWalker<V> {
    pub fn new(visitor: V) -> Self {
        Self { visitor }
    }

    pub fn visitor(&self) -> &V {
        &self.visitor
    }

    pub fn into_visitor(self) -> V {
        self.visitor
    }

    /// Walk `tree` starting at its current pointer.
    pub fn walk(
        &mut self,
        tree: &SchemaTree,
        report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        self.walk_value(tree.pointer(), tree.current_node(), report)
    }

    /// Walk `node`, which sits at `ptr` in its document.
    pub fn walk_value(
        &mut self,
        ptr: &JsonPointer,
        node: &Value,
        report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        let result = self.visitor.visit_node(ptr, node, report)?;
        if result != VisitResult::Continue {
            return Ok(result);
        }
        match node {
            Value::Object(_) => self.walk_container(Container::Object, ptr, node, report),
            Value::Array(_) => self.walk_container(Container::Array, ptr, node, report),
            _ => Ok(result),
        }
    }

    fn walk_container(
        &mut self,
        kind: Container,
        ptr: &JsonPointer,
        node: &Value,
        report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        let mut children = PointerSet::new();
        let result = match kind {
            Container::Object => self.visitor.pre_visit_object(ptr, node, &mut children, report)?,
            Container::Array => self.visitor.pre_visit_array(ptr, node, &mut children, report)?,
        };
        if result != VisitResult::Continue {
            return Ok(result);
        }

        for child in &children {
            let child_ptr = ptr.append(child);
            let Some(child_node) = child.get(node) else {
                report.error(
                    ProcessingMessage::new()
                        .set_message(core_message("walker.missingNode"))
                        .put_argument("pointer", child_ptr.to_string()),
                )?;
                return Ok(VisitResult::Terminate);
            };
            let result = self.walk_value(&child_ptr, child_node, report)?;
            if result != VisitResult::Continue {
                return Ok(result);
            }
        }

        match kind {
            Container::Object => self.visitor.post_visit_object(ptr, report),
            Container::Array => self.visitor.post_visit_array(ptr, report),
        }
    }
}
