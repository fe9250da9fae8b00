//! Schema addressing: JSON References and schema identities.
//!
//! A [`Reference`] is a URI, absolute or relative, with an optional fragment
//! that is usually a JSON Pointer. Two references are equal when their
//! normalized forms are equal; the normalized form always carries a `#`, so
//! `foo://bar` and `foo://bar#` denote the same reference.
//!
//! A [`SchemaIdentity`] keys caches. Addressable schemas get an absolute
//! identity derived from their reference; everything else gets a fresh
//! anonymous identity from a process-wide counter.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Serialize, Serializer};
use url::Url;

use crate::error::ProcessingError;
use crate::messages::core_message;
use crate::pointer::JsonPointer;
use crate::report::{resolution_exception, ProcessingMessage};

/// Characters escaped when a JSON Pointer is written into a fragment.
const FRAGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'`');

/// A JSON Reference.
#[derive(Debug, Clone)]
pub struct Reference {
    /// Absolute URI without fragment, when the reference has a scheme.
    locator: Option<Url>,
    /// URI text before the fragment.
    path: String,
    fragment: Option<String>,
    normalized: String,
}

impl Reference {
    /// The empty reference `#`: "this document, at its root".
    pub fn empty() -> Self {
        Self::build(None, String::new(), None)
    }

    /// Parse a reference.
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError::Resolution` if the URI part is malformed.
    pub fn parse(input: &str) -> Result<Self, ProcessingError> {
        let (path, fragment) = match input.find('#') {
            Some(idx) => (&input[..idx], Some(input[idx + 1..].to_string())),
            None => (input, None),
        };

        if path.is_empty() {
            return Ok(Self::build(None, String::new(), fragment));
        }

        match Url::parse(path) {
            Ok(url) => Ok(Self::from_url(url, fragment)),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                // Relative references must at least join onto some base.
                if let Ok(scratch) = Url::parse("scratch:/") {
                    scratch
                        .join(path)
                        .map_err(|e| malformed(input, &e.to_string()))?;
                }
                Ok(Self::build(None, path.to_string(), fragment))
            }
            Err(e) => Err(malformed(input, &e.to_string())),
        }
    }

    /// Reference to an absolute URL. Any fragment on the URL is kept.
    pub fn from_url(mut url: Url, fragment: Option<String>) -> Self {
        let fragment = fragment.or_else(|| url.fragment().map(str::to_string));
        url.set_fragment(None);
        let path = url.as_str().to_string();
        Self::build(Some(url), path, fragment)
    }

    fn build(locator: Option<Url>, path: String, fragment: Option<String>) -> Self {
        let normalized = format!("{}#{}", path, fragment.as_deref().unwrap_or(""));
        Self {
            locator,
            path,
            fragment,
            normalized,
        }
    }

    /// Resolve `reference` against this reference as base.
    ///
    /// Absolute references win outright; a fragment-only reference replaces
    /// the base's fragment; anything else is joined to the base URI.
    /// Relative references against a relative base are joined on the
    /// base's directory, so `dir/a.json` and `b.json` give `dir/b.json`.
    pub fn resolve(&self, reference: &Reference) -> Reference {
        if reference.locator.is_some() {
            return reference.clone();
        }
        if reference.path.is_empty() {
            return Self::build(
                self.locator.clone(),
                self.path.clone(),
                reference.fragment.clone(),
            );
        }
        match &self.locator {
            Some(base) => match base.join(&reference.path) {
                Ok(url) => Self::from_url(url, reference.fragment.clone()),
                Err(_) => reference.clone(),
            },
            None => Self::build(
                None,
                join_relative(&self.path, &reference.path),
                reference.fragment.clone(),
            ),
        }
    }

    /// Absolute URI with an empty fragment.
    pub fn is_absolute(&self) -> bool {
        self.locator.is_some() && self.fragment().is_empty()
    }

    /// No URI part and no fragment: the root of the current document.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty() && self.fragment().is_empty()
    }

    /// True if the URI part is absolute (has a scheme).
    pub fn has_locator(&self) -> bool {
        self.locator.is_some()
    }

    /// This reference with its fragment removed.
    pub fn locator(&self) -> Reference {
        Self::build(self.locator.clone(), self.path.clone(), None)
    }

    pub fn url(&self) -> Option<&Url> {
        self.locator.as_ref()
    }

    pub fn scheme(&self) -> Option<&str> {
        self.locator.as_ref().map(Url::scheme)
    }

    /// The fragment without `#`; empty if there is none.
    pub fn fragment(&self) -> &str {
        self.fragment.as_deref().unwrap_or("")
    }

    /// The fragment as a JSON Pointer, if it is one.
    ///
    /// The fragment is percent-decoded first, so `#/a%20b` addresses the
    /// member `"a b"`.
    pub fn pointer(&self) -> Option<JsonPointer> {
        let decoded = percent_decode_str(self.fragment()).decode_utf8().ok()?;
        JsonPointer::parse(&decoded).ok()
    }

    /// Same URI, fragment replaced by `pointer`.
    pub fn with_pointer(&self, pointer: &JsonPointer) -> Reference {
        let fragment = utf8_percent_encode(&pointer.to_string(), FRAGMENT).to_string();
        Self::build(self.locator.clone(), self.path.clone(), Some(fragment))
    }

    /// Same URI part as `other`, ignoring fragments.
    pub fn same_locator(&self, other: &Reference) -> bool {
        self.path == other.path
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }
}

/// Join two relative URI paths: `reference` replaces the last segment of
/// `base`, unless it is rooted.
fn join_relative(base: &str, reference: &str) -> String {
    if reference.starts_with('/') {
        return reference.to_string();
    }
    let dir = base.rfind('/').map_or("", |idx| &base[..=idx]);
    let mut segments: Vec<&str> = Vec::new();
    let mut leading_up = 0usize;
    for segment in dir.split('/').chain(reference.split('/')) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    leading_up += 1;
                }
            }
            other => segments.push(other),
        }
    }
    let mut joined = "../".repeat(leading_up);
    if dir.starts_with('/') && leading_up == 0 {
        joined.insert(0, '/');
    }
    joined.push_str(&segments.join("/"));
    if reference.ends_with('/') && !segments.is_empty() {
        joined.push('/');
    }
    joined
}

fn malformed(input: &str, reason: &str) -> ProcessingError {
    ProcessingMessage::new()
        .set_message(core_message("refProcessing.malformedRef"))
        .put_argument("ref", input)
        .put("reason", reason)
        .set_exception_provider(resolution_exception)
        .as_exception()
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl FromStr for Reference {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::parse(s)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.normalized)
    }
}

static ANONYMOUS_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque, strictly increasing id of an anonymous schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AnonymousId(u64);

impl fmt::Display for AnonymousId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cache key of a schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SchemaIdentity {
    /// Identity of an addressable schema; equal references give equal identities.
    Absolute(Reference),
    /// Identity of a schema without an address. Never reused.
    Anonymous(AnonymousId),
}

impl SchemaIdentity {
    /// Allocate a new anonymous identity.
    pub fn anonymous() -> Self {
        SchemaIdentity::Anonymous(AnonymousId(ANONYMOUS_ID.fetch_add(1, Ordering::Relaxed)))
    }

    /// Identity of the schema at `reference`.
    pub fn of(reference: &Reference) -> Self {
        SchemaIdentity::Absolute(reference.clone())
    }

    /// The reference of an absolute identity, or the empty reference.
    pub fn locator(&self) -> Reference {
        match self {
            SchemaIdentity::Absolute(reference) => reference.clone(),
            SchemaIdentity::Anonymous(_) => Reference::empty(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, SchemaIdentity::Anonymous(_))
    }
}

impl fmt::Display for SchemaIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaIdentity::Absolute(reference) => write!(f, "{}", reference),
            SchemaIdentity::Anonymous(id) => write!(f, "anonymous schema #{}", id),
        }
    }
}
