//! Schema core CLI
//!
//! Command-line interface for loading schemas and following their references.

use std::path::Path;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use schema_core::{
    all_elements, all_members, Dereferencing, JsonPointer, LoadingConfiguration,
    LoadingConfigurationBuilder, PointerSet, ProcessingError, ProcessingReport, Reference,
    SchemaLoader, SchemaTree, TreeVisitor, TreeWalker, UriTranslatorConfiguration, VisitResult,
};
use serde_json::Value;
use url::Url;

#[derive(Parser)]
#[command(name = "schema-core")]
#[command(about = "Load JSON Schemas and follow their references")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a schema, follow the $ref at a pointer and print the result
    Resolve {
        /// Schema source: file path or URI
        schema: String,

        /// Inline referenced content instead of following pointers
        #[arg(long)]
        inline: bool,

        /// JSON Pointer of the node to resolve (default: document root)
        #[arg(long)]
        pointer: Option<String>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,

        /// Disable the schema cache
        #[arg(long)]
        no_cache: bool,

        #[command(flatten)]
        loading: LoadingArgs,
    },

    /// Resolve every $ref in a schema and report the ones that fail
    Check {
        /// Schema source: file path or URI
        schema: String,

        /// Load in inline mode; remaining refs are cycle markers
        #[arg(long)]
        inline: bool,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        loading: LoadingArgs,
    },
}

#[derive(clap::Args)]
struct LoadingArgs {
    /// Serve a local file for a URI without fetching (URI=FILE)
    #[arg(long, value_name = "URI=FILE")]
    preload: Vec<String>,

    /// Fetch FROM at TO instead; directory URIs (ending in '/') redirect every URI below them
    #[arg(long, value_name = "FROM=TO")]
    redirect: Vec<String>,

    /// Base URI for relative schema references (must end in '/')
    #[arg(long)]
    namespace: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Resolve {
            schema,
            inline,
            pointer,
            pretty,
            no_cache,
            loading,
        } => run_resolve(&schema, inline, pointer.as_deref(), pretty, no_cache, &loading),

        Commands::Check {
            schema,
            inline,
            json,
            loading,
        } => run_check(&schema, inline, json, &loading),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn fail(e: &ProcessingError) -> u8 {
    eprintln!("Error: {}", e);
    e.exit_code() as u8
}

fn split_pair<'a>(arg: &'a str, what: &str) -> Result<(&'a str, &'a str), u8> {
    arg.split_once('=').ok_or_else(|| {
        eprintln!("Error: {} must be of the form A=B, got '{}'", what, arg);
        2u8
    })
}

fn build_config(loading: &LoadingArgs) -> Result<LoadingConfigurationBuilder, u8> {
    let config_error = |e: schema_core::ConfigError| {
        eprintln!("Error: {}", e);
        2u8
    };

    let mut translator = UriTranslatorConfiguration::builder();
    if let Some(namespace) = &loading.namespace {
        translator = translator.set_namespace(namespace).map_err(config_error)?;
    }
    for redirect in &loading.redirect {
        let (from, to) = split_pair(redirect, "--redirect")?;
        translator = if from.ends_with('/') {
            translator.add_path_redirect(from, to)
        } else {
            translator.add_schema_redirect(from, to)
        }
        .map_err(config_error)?;
    }

    let mut builder =
        LoadingConfiguration::builder().set_uri_translator_configuration(translator.freeze());
    for preload in &loading.preload {
        let (uri, file) = split_pair(preload, "--preload")?;
        let value = read_json(Path::new(file))?;
        builder = builder.preload_schema(uri, value).map_err(config_error)?;
    }
    Ok(builder)
}

fn read_json(path: &Path) -> Result<Value, u8> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error reading {}: {}", path.display(), e);
        3u8
    })?;
    serde_json::from_str(&content).map_err(|e| {
        eprintln!("Error parsing {}: {}", path.display(), e);
        3u8
    })
}

/// URIs are used as they are; anything else is a file path, unless a
/// namespace is set, in which case it is a relative reference.
fn source_reference(source: &str, namespaced: bool) -> Result<Reference, u8> {
    let is_uri = Url::parse(source).is_ok_and(|url| url.scheme().len() > 1);
    if is_uri || (namespaced && !Path::new(source).exists()) {
        return Reference::parse(source).map_err(|e| fail(&e));
    }

    let path = std::fs::canonicalize(source).map_err(|e| {
        eprintln!("Error: cannot open {}: {}", source, e);
        3u8
    })?;
    let url = Url::from_file_path(&path).map_err(|()| {
        eprintln!("Error: {} is not an absolute path", path.display());
        3u8
    })?;
    Ok(Reference::from_url(url, None))
}

fn print_json(value: &Value, pretty: bool) -> Result<(), u8> {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);
    Ok(())
}

fn run_resolve(
    source: &str,
    inline: bool,
    pointer: Option<&str>,
    pretty: bool,
    no_cache: bool,
    loading: &LoadingArgs,
) -> Result<(), u8> {
    let mode = if inline {
        Dereferencing::Inline
    } else {
        Dereferencing::Canonical
    };
    let cfg = build_config(loading)?
        .dereferencing(mode)
        .set_enable_cache(!no_cache)
        .freeze();
    let reference = source_reference(source, loading.namespace.is_some())?;
    let loader = SchemaLoader::new(cfg);

    let mut tree = loader.load(&reference).map_err(|e| fail(&e))?;
    if let Some(pointer) = pointer {
        let pointer = JsonPointer::parse(pointer).map_err(|e| fail(&e))?;
        tree = tree.at(&pointer).map_err(|e| fail(&e))?;
    }

    let mut report = ProcessingReport::new();
    let resolved = tree.resolve(&loader, &mut report).map_err(|e| fail(&e))?;
    if !report.is_success() {
        eprint!("{}", report);
        return Err(2);
    }
    print_json(resolved.current_node(), pretty)
}

/// Collects the pointer of every node holding a `$ref` string.
struct RefCollector {
    found: Vec<JsonPointer>,
}

impl TreeVisitor for RefCollector {
    fn visit_node(
        &mut self,
        ptr: &JsonPointer,
        node: &Value,
        _report: &mut ProcessingReport,
    ) -> Result<VisitResult, ProcessingError> {
        if node.get("$ref").is_some_and(Value::is_string) {
            self.found.push(ptr.clone());
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
        all_members(node, children);
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

fn check_refs(
    tree: &SchemaTree,
    loader: &SchemaLoader,
    report: &mut ProcessingReport,
) -> Result<usize, ProcessingError> {
    let mut walker = TreeWalker::new(RefCollector { found: Vec::new() });
    walker.walk(tree, report)?;
    let found = walker.into_visitor().found;
    for ptr in &found {
        tree.at(ptr)?.resolve(loader, report)?;
    }
    Ok(found.len())
}

fn run_check(
    source: &str,
    inline: bool,
    json_output: bool,
    loading: &LoadingArgs,
) -> Result<(), u8> {
    let mode = if inline {
        Dereferencing::Inline
    } else {
        Dereferencing::Canonical
    };
    let cfg = build_config(loading)?.dereferencing(mode).freeze();
    let reference = source_reference(source, loading.namespace.is_some())?;
    let loader = SchemaLoader::new(cfg);

    let mut report = ProcessingReport::new();
    let tree = loader.get(&reference, &mut report).map_err(|e| fail(&e))?;

    let checked = match (&tree, mode) {
        (Some(tree), Dereferencing::Canonical) => {
            check_refs(tree, &loader, &mut report).map_err(|e| fail(&e))?
        }
        _ => 0,
    };

    if json_output {
        let output = serde_json::json!({
            "valid": report.is_success(),
            "references": checked,
            "messages": report.as_json(),
        });
        println!("{}", output);
    } else {
        print!("{}", report);
        if report.is_success() {
            println!("OK: {} reference(s) resolved", checked);
        }
    }

    match tree {
        None => Err(3),
        Some(_) if !report.is_success() => Err(1),
        Some(_) => Ok(()),
    }
}
