//! JSON Schema core: addressing, loading, walking and analysis.
//!
//! This library is the layer schema validators are built on. It turns
//! URIs into parsed, cached schema trees, follows `$ref` either by moving
//! a pointer (canonical mode) or by substituting targets (inline mode),
//! walks documents with a visitor, and runs keyword plug-ins over schema
//! nodes. Everything it finds is reported as structured messages.
//!
//! # Example
//!
//! ```
//! use schema_core::{
//!     Dereferencing, JsonPointer, LoadingConfiguration, ProcessingReport, SchemaLoader,
//! };
//! use serde_json::json;
//!
//! let cfg = LoadingConfiguration::builder()
//!     .preload_schema(
//!         "https://example.com/person.json",
//!         json!({
//!             "$defs": { "name": { "type": "string" } },
//!             "properties": { "name": { "$ref": "#/$defs/name" } }
//!         }),
//!     )
//!     .unwrap()
//!     .freeze();
//! let loader = SchemaLoader::new(cfg);
//!
//! let tree = loader.load_uri("https://example.com/person.json").unwrap();
//! let name = tree.at(&JsonPointer::parse("/properties/name").unwrap()).unwrap();
//!
//! let mut report = ProcessingReport::new();
//! let resolved = name.resolve(&loader, &mut report).unwrap();
//! assert_eq!(resolved.pointer().to_string(), "/$defs/name");
//! assert_eq!(resolved.current_node(), &json!({ "type": "string" }));
//! assert!(report.is_success());
//!
//! // Inline mode substitutes instead.
//! let inline = SchemaLoader::new(
//!     loader.configuration().thaw().dereferencing(Dereferencing::Inline).freeze(),
//! );
//! let tree = inline.load_uri("https://example.com/person.json").unwrap();
//! assert_eq!(tree.current_node()["properties"]["name"], json!({ "type": "string" }));
//! ```
//!
//! # Dereferencing modes
//!
//! | Mode | `resolve` returns | Cycles |
//! |------|-------------------|--------|
//! | `Canonical` | a view at the target, possibly in another document | reported as an error, tree unchanged |
//! | `Inline` | the same position with the target's content copied in | left as `{"$ref": "<absolute>"}` |

mod analyzer;
mod config;
mod error;
mod fetch;
mod inline;
mod keyword;
mod loader;
mod messages;
mod pointer;
mod processing;
mod reference;
mod report;
mod tree;
mod visit;

pub use analyzer::{Analysis, SchemaAnalyzer};
pub use config::{
    Dereferencing, LoadingConfiguration, LoadingConfigurationBuilder, ParserFeature,
    UriTranslatorConfiguration, UriTranslatorConfigurationBuilder,
};
pub use error::{ConfigError, FetchError, ProcessingError};
pub use fetch::{FileFetcher, UriFetcher};
pub use keyword::{
    node_type, Keyword, PointerCollector, SchemaArrayCollector, SchemaCollector,
    SchemaDescriptor, SchemaDescriptorBuilder, SchemaMapCollector, SchemaOrArrayCollector,
    SchemaSelector, SchemaSelectorConfiguration, SchemaSelectorConfigurationBuilder,
    SyntaxChecker, TypeOnlySyntaxChecker,
};
pub use loader::SchemaLoader;
pub use messages::{render, MessageBundle, MessageCatalog};
pub use pointer::{JsonPointer, PointerSet};
pub use processing::{Processor, ProcessorDispatcher, ProcessorMap};
pub use reference::{AnonymousId, Reference, SchemaIdentity};
pub use report::{
    configuration_exception, invalid_schema_exception, loading_exception, processing_exception,
    resolution_exception, ExceptionProvider, LogLevel, ProcessingMessage, ProcessingReport,
};
pub use tree::SchemaTree;
pub use visit::{all_elements, all_members, TreeVisitor, TreeWalker, VisitResult};

#[cfg(feature = "remote")]
pub use fetch::HttpFetcher;
