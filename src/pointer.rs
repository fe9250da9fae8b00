//! JSON Pointer (RFC 6901) and ordered pointer sets.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::ProcessingError;
use crate::report::{resolution_exception, ProcessingMessage};

/// A parsed JSON Pointer.
///
/// The empty pointer addresses the whole document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsonPointer {
    tokens: Vec<String>,
}

impl JsonPointer {
    /// The empty pointer.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a pointer such as `/properties/a~1b`.
    pub fn parse(input: &str) -> Result<Self, ProcessingError> {
        if input.is_empty() {
            return Ok(Self::empty());
        }
        let Some(rest) = input.strip_prefix('/') else {
            return Err(illegal_pointer(input, "pointer must start with '/'"));
        };
        let tokens = rest
            .split('/')
            .map(|raw| unescape(raw).ok_or_else(|| illegal_pointer(input, "bad escape sequence")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { tokens })
    }

    /// Pointer made of the given raw (unescaped) tokens.
    pub fn from_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// This pointer followed by `other`.
    pub fn append(&self, other: &JsonPointer) -> JsonPointer {
        let mut tokens = self.tokens.clone();
        tokens.extend(other.tokens.iter().cloned());
        JsonPointer { tokens }
    }

    pub fn append_token(&self, token: impl Into<String>) -> JsonPointer {
        let mut tokens = self.tokens.clone();
        tokens.push(token.into());
        JsonPointer { tokens }
    }

    pub fn append_index(&self, index: usize) -> JsonPointer {
        self.append_token(index.to_string())
    }

    /// The pointer without its last token; the empty pointer is its own parent.
    pub fn parent(&self) -> JsonPointer {
        let mut tokens = self.tokens.clone();
        tokens.pop();
        JsonPointer { tokens }
    }

    /// True if `other` starts with every token of this pointer.
    pub fn is_parent_of(&self, other: &JsonPointer) -> bool {
        other.tokens.len() >= self.tokens.len()
            && other.tokens[..self.tokens.len()] == self.tokens[..]
    }

    /// The tokens of this pointer past `base`, if `base` is a prefix of it.
    pub fn relative_to(&self, base: &JsonPointer) -> Option<JsonPointer> {
        if !base.is_parent_of(self) {
            return None;
        }
        Some(JsonPointer {
            tokens: self.tokens[base.tokens.len()..].to_vec(),
        })
    }

    /// The value this pointer addresses inside `document`.
    pub fn get<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.tokens
            .iter()
            .try_fold(document, |node, token| match node {
                Value::Object(map) => map.get(token),
                Value::Array(items) => array_index(token).and_then(|i| items.get(i)),
                _ => None,
            })
    }

    pub fn get_mut<'a>(&self, document: &'a mut Value) -> Option<&'a mut Value> {
        self.tokens
            .iter()
            .try_fold(document, |node, token| match node {
                Value::Object(map) => map.get_mut(token),
                Value::Array(items) => array_index(token).and_then(move |i| items.get_mut(i)),
                _ => None,
            })
    }
}

impl fmt::Display for JsonPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for token in &self.tokens {
            write!(f, "/{}", token.replace('~', "~0").replace('/', "~1"))?;
        }
        Ok(())
    }
}

impl FromStr for JsonPointer {
    type Err = ProcessingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JsonPointer::parse(s)
    }
}

// RFC 6901 forbids leading zeros and signs.
fn array_index(token: &str) -> Option<usize> {
    if token.is_empty() || (token.len() > 1 && token.starts_with('0')) {
        return None;
    }
    if !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

fn unescape(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            '0' => out.push('~'),
            '1' => out.push('/'),
            _ => return None,
        }
    }
    Some(out)
}

fn illegal_pointer(input: &str, reason: &str) -> ProcessingError {
    ProcessingMessage::new()
        .set_message("illegal JSON Pointer: %s")
        .put_argument("reason", reason)
        .put("input", input)
        .set_exception_provider(resolution_exception)
        .as_exception()
}

/// Insertion-ordered set of pointers without duplicates.
///
/// Walker hooks and pointer collectors fill one of these to select which
/// children to visit next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerSet {
    pointers: Vec<JsonPointer>,
    index: HashSet<JsonPointer>,
}

impl PointerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `pointer`; returns false if it was already present.
    pub fn insert(&mut self, pointer: JsonPointer) -> bool {
        if !self.index.insert(pointer.clone()) {
            return false;
        }
        self.pointers.push(pointer);
        true
    }

    pub fn contains(&self, pointer: &JsonPointer) -> bool {
        self.index.contains(pointer)
    }

    pub fn extend<I: IntoIterator<Item = JsonPointer>>(&mut self, pointers: I) {
        for pointer in pointers {
            self.insert(pointer);
        }
    }

    pub fn len(&self) -> usize {
        self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pointers.is_empty()
    }

    pub fn clear(&mut self) {
        self.pointers.clear();
        self.index.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, JsonPointer> {
        self.pointers.iter()
    }
}

impl FromIterator<JsonPointer> for PointerSet {
    fn from_iter<I: IntoIterator<Item = JsonPointer>>(iter: I) -> Self {
        let mut set = PointerSet::new();
        set.extend(iter);
        set
    }
}

impl<'a> IntoIterator for &'a PointerSet {
    type Item = &'a JsonPointer;
    type IntoIter = std::slice::Iter<'a, JsonPointer>;

    fn into_iter(self) -> Self::IntoIter {
        self.pointers.iter()
    }
}

impl IntoIterator for PointerSet {
    type Item = JsonPointer;
    type IntoIter = std::vec::IntoIter<JsonPointer>;

    fn into_iter(self) -> Self::IntoIter {
        self.pointers.into_iter()
    }
}
