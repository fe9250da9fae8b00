//! Keyword analysis of schema nodes, memoized per tree.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::Dereferencing;
use crate::error::ProcessingError;
use crate::keyword::{node_type, SchemaSelector};
use crate::messages::{MessageBundle, MessageCatalog};
use crate::pointer::{JsonPointer, PointerSet};
use crate::reference::SchemaIdentity;
use crate::report::{LogLevel, ProcessingMessage, ProcessingReport};
use crate::tree::SchemaTree;
use crate::visit::{TreeVisitor, TreeWalker, VisitResult};

/// What one node analysis produced.
#[derive(Debug, Clone)]
pub struct Analysis {
    report: ProcessingReport,
    pointers: PointerSet,
}

impl Analysis {
    pub fn report(&self) -> &ProcessingReport {
        &self.report
    }

    /// Pointers to subschemas, relative to the analyzed node, ordered by keyword name.
    pub fn pointers(&self) -> &PointerSet {
        &self.pointers
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AnalysisKey {
    document: SchemaIdentity,
    pointer: JsonPointer,
    dereferencing: Dereferencing,
}

impl AnalysisKey {
    fn of(tree: &SchemaTree) -> Self {
        Self {
            document: tree.document_identity().clone(),
            pointer: tree.pointer().clone(),
            dereferencing: tree.dereferencing(),
        }
    }
}

/// Runs the syntax checkers and pointer collectors of the keywords a schema
/// node uses.
///
/// Results are memoized by tree identity (document identity plus pointer)
/// for the lifetime of the analyzer: each node is analyzed at most once,
/// even when the analyzer is shared between threads.
pub struct SchemaAnalyzer {
    selector: SchemaSelector,
    catalog: Arc<dyn MessageCatalog>,
    memo: Mutex<HashMap<AnalysisKey, Arc<OnceLock<Arc<Analysis>>>>>,
}

impl SchemaAnalyzer {
    pub fn new(selector: SchemaSelector) -> Self {
        Self::with_catalog(selector, MessageBundle::core())
    }

    pub fn with_catalog(selector: SchemaSelector, catalog: Arc<dyn MessageCatalog>) -> Self {
        Self {
            selector,
            catalog,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Report of the analysis of the current node of `tree`.
    pub fn analyze(&self, tree: &SchemaTree) -> ProcessingReport {
        self.analysis(tree).report.clone()
    }

    /// Memoized analysis of the current node of `tree`.
    pub fn analysis(&self, tree: &SchemaTree) -> Arc<Analysis> {
        let key = AnalysisKey::of(tree);
        let cell = Arc::clone(self.memo.lock().entry(key).or_default());
        if let Some(analysis) = cell.get() {
            tracing::trace!(pointer = %tree.pointer(), "analysis memo hit");
            return Arc::clone(analysis);
        }
        Arc::clone(cell.get_or_init(|| Arc::new(self.compute(tree))))
    }

    /// Number of memoized analyses.
    pub fn memoized_count(&self) -> usize {
        self.memo.lock().len()
    }

    fn compute(&self, tree: &SchemaTree) -> Analysis {
        // With an exception threshold of `None` logging cannot fail, so the
        // `Result`s of the `report` calls below are discarded.
        let mut report = ProcessingReport::with_thresholds(LogLevel::Debug, LogLevel::None);
        let mut pointers = PointerSet::new();

        let node = tree.current_node();
        let Value::Object(map) = node else {
            let _ = report.error(
                ProcessingMessage::new()
                    .set_message(self.catalog.message("core.notASchema"))
                    .put_argument("found", node_type(node))
                    .put("schema", tree.as_json()),
            );
            return Analysis { report, pointers };
        };

        let Some(descriptor) = self.selector.select(tree) else {
            return Analysis { report, pointers };
        };

        let mut ignored: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|key| !descriptor.contains(key))
            .collect();
        if !ignored.is_empty() {
            ignored.sort_unstable();
            let _ = report.warn(
                ProcessingMessage::new()
                    .set_message(self.catalog.message("core.unknownKeywords"))
                    .put_argument_array("ignored", ignored)
                    .put("schema", tree.as_json()),
            );
        }

        for keyword in descriptor.keywords().filter(|k| map.contains_key(k.name())) {
            let mut collected = PointerSet::new();
            if let Some(collector) = keyword.pointer_collector() {
                collector.collect(&mut collected, tree);
            }
            if let Some(checker) = keyword.syntax_checker() {
                let checked =
                    checker.check_syntax(&collected, self.catalog.as_ref(), &mut report, tree);
                if let Err(e) = checked {
                    let level = e.message().log_level().max(LogLevel::Error);
                    let _ = report.log(level, e.into_message().put("keyword", keyword.name()));
                }
            }
            pointers.extend(collected);
        }

        tracing::debug!(
            pointer = %tree.pointer(),
            messages = report.len(),
            "analyzed schema node"
        );
        Analysis { report, pointers }
    }

    /// Analyze the current node and every subschema the collectors lead to.
    ///
    /// Reports of all visited nodes are merged into `report`, in visit order.
    pub fn walk(
        &self,
        tree: &SchemaTree,
        report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        let mut walker = TreeWalker::new(SyntaxVisitor {
            analyzer: self,
            tree,
        });
        walker.walk(tree, report)
    }
}

struct SyntaxVisitor<'a> {
    analyzer: &'a SchemaAnalyzer,
    tree: &'a SchemaTree,
}

impl SyntaxVisitor<'_> {
    fn analysis_at(&self, ptr: &JsonPointer) -> Result<Arc<Analysis>, ProcessingError> {
        let tree = self.tree.at(ptr)?;
        Ok(self.analyzer.analysis(&tree))
    }
}

impl TreeVisitor for SyntaxVisitor<'_> {
    fn visit_node(
        &mut self,
        ptr: &JsonPointer,
        _node: &Value,
        report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        let analysis = self.analysis_at(ptr)?;
        report.merge(&analysis.report)?;
        Ok(VisitResult::Continue)
    }

    fn pre_visit_object(
        &mut self,
        ptr: &JsonPointer,
        _node: &Value,
        children: &mut PointerSet,
        _report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        children.extend(self.analysis_at(ptr)?.pointers.iter().cloned());
        Ok(VisitResult::Continue)
    }

    fn pre_visit_array(
        &mut self,
        _ptr: &JsonPointer,
        _node: &Value,
        _children: &mut PointerSet,
        _report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        Ok(VisitResult::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyword::{
        Keyword, SchemaDescriptor, SchemaMapCollector, SchemaSelectorConfiguration,
    };
    use serde_json::json;

    fn analyzer() -> SchemaAnalyzer {
        let descriptor = SchemaDescriptor::builder("urn:test")
            .unwrap()
            .add_keyword(Keyword::new("type"))
            .add_keyword(
                Keyword::new("properties")
                    .with_pointer_collector(SchemaMapCollector::new("properties")),
            )
            .freeze();
        let cfg = SchemaSelectorConfiguration::builder()
            .set_default_descriptor(descriptor)
            .freeze()
            .unwrap();
        SchemaAnalyzer::new(SchemaSelector::new(cfg))
    }

    #[test]
    fn collects_pointers_of_known_keywords() {
        let tree = SchemaTree::new(json!({ "type": "object", "properties": { "a": {}, "b": {} } }));
        let analysis = analyzer().analysis(&tree);
        let pointers: Vec<String> = analysis.pointers().iter().map(ToString::to_string).collect();
        assert_eq!(pointers, ["/properties/a", "/properties/b"]);
        assert!(analysis.report().is_empty());
    }

    #[test]
    fn unknown_keywords_are_sorted() {
        let tree = SchemaTree::new(json!({ "zeta": 1, "type": "x", "alpha": 2 }));
        let report = analyzer().analyze(&tree);
        assert_eq!(report.len(), 1);
        assert_eq!(report.messages()[0].get("ignored").unwrap(), &json!(["alpha", "zeta"]));
    }

    #[test]
    fn non_object_names_found_type() {
        let report = analyzer().analyze(&SchemaTree::new(json!([1])));
        assert_eq!(report.len(), 1);
        assert_eq!(report.messages()[0].log_level(), LogLevel::Error);
        assert_eq!(report.messages()[0].get("found").unwrap(), "array");
    }

    #[test]
    fn walk_descends_into_collected_subschemas_only() {
        let tree = SchemaTree::new(json!({
            "properties": {
                "a": { "bogus": true },
                "b": 42
            },
            "unknown": { "nested": {} }
        }));
        let analyzer = analyzer();
        let mut report = ProcessingReport::new();
        let result = analyzer.walk(&tree, &mut report).unwrap();
        assert_eq!(result, VisitResult::Continue);

        // root warning, /properties/a warning, /properties/b error
        assert_eq!(report.len(), 3);
        assert_eq!(report.current_level(), LogLevel::Error);
        assert_eq!(analyzer.memoized_count(), 3);
    }

    #[test]
    fn failing_checkers_are_recorded_not_raised() {
        let fatal = |_: &PointerSet,
                     _: &dyn MessageCatalog,
                     report: &mut ProcessingReport,
                     _: &SchemaTree|
         -> Result<(), ProcessingError> {
            report.fatal(ProcessingMessage::new().set_message("cannot check"))
        };
        let failing = |_: &PointerSet,
                       _: &dyn MessageCatalog,
                       _: &mut ProcessingReport,
                       _: &SchemaTree|
         -> Result<(), ProcessingError> {
            Err(ProcessingMessage::new().set_message("gave up").as_exception())
        };
        let descriptor = SchemaDescriptor::builder("urn:test")
            .unwrap()
            .add_keyword(Keyword::new("a").with_syntax_checker(fatal))
            .add_keyword(Keyword::new("b").with_syntax_checker(failing))
            .freeze();
        let cfg = SchemaSelectorConfiguration::builder()
            .set_default_descriptor(descriptor)
            .freeze()
            .unwrap();
        let analyzer = SchemaAnalyzer::new(SchemaSelector::new(cfg));

        let report = analyzer.analyze(&SchemaTree::new(json!({ "a": 1, "b": 2 })));
        let levels: Vec<LogLevel> = report.iter().map(ProcessingMessage::log_level).collect();
        assert_eq!(levels, [LogLevel::Fatal, LogLevel::Error]);
        assert_eq!(report.messages()[1].get("keyword").unwrap(), "b");
    }

    #[test]
    fn memo_distinguishes_pointers_and_documents() {
        let analyzer = analyzer();
        let tree = SchemaTree::new(json!({ "properties": { "a": {} } }));
        analyzer.analyze(&tree);
        analyzer.analyze(&tree.at(&JsonPointer::from_tokens(["properties", "a"])).unwrap());
        analyzer.analyze(&SchemaTree::new(json!({ "properties": { "a": {} } })));
        assert_eq!(analyzer.memoized_count(), 3);
        analyzer.analyze(&tree);
        assert_eq!(analyzer.memoized_count(), 3);
    }
}
