//! Message catalogs and positional template rendering.
//!
//! Message text is looked up by key. The templates use `%s` for positional
//! arguments, `%%` for a literal percent sign and `%n` for a newline.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use serde_json::Value;

const CORE_MESSAGES: &str = include_str!("../resources/core-messages.json");

/// Lookup of message text by key.
pub trait MessageCatalog: Send + Sync {
    /// Return the raw template for `key`.
    fn message(&self, key: &str) -> String;

    /// Return the template for `key` with `args` substituted.
    ///
    /// If substitution fails the raw template is returned.
    fn printf(&self, key: &str, args: &[Value]) -> String {
        let template = self.message(key);
        render(&template, args).unwrap_or(template)
    }
}

/// In-memory message catalog.
///
/// Missing keys resolve to the key itself.
#[derive(Debug, Clone, Default)]
pub struct MessageBundle {
    entries: HashMap<String, String>,
}

impl MessageBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The catalog of messages emitted by this crate.
    pub fn core() -> Arc<MessageBundle> {
        static CORE: OnceLock<Arc<MessageBundle>> = OnceLock::new();
        CORE.get_or_init(|| {
            let entries: HashMap<String, String> =
                serde_json::from_str(CORE_MESSAGES).unwrap_or_default();
            Arc::new(MessageBundle { entries })
        })
        .clone()
    }

    /// Add or replace a message.
    pub fn with_message(mut self, key: impl Into<String>, text: impl Into<String>) -> Self {
        self.entries.insert(key.into(), text.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

impl MessageCatalog for MessageBundle {
    fn message(&self, key: &str) -> String {
        self.entries
            .get(key)
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}

/// Text of a core message.
pub(crate) fn core_message(key: &str) -> String {
    MessageBundle::core().message(key)
}

/// Substitute `args` into `template` positionally.
///
/// Returns `None` when the template references more arguments than given or
/// contains an unknown conversion. Extra arguments are ignored.
pub fn render(template: &str, args: &[Value]) -> Option<String> {
    let mut out = String::with_capacity(template.len());
    let mut next = args.iter();
    let mut chars = template.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            's' => out.push_str(&display_arg(next.next()?)),
            '%' => out.push('%'),
            'n' => out.push('\n'),
            _ => return None,
        }
    }
    Some(out)
}

/// Strings print raw, everything else prints as JSON.
pub(crate) fn display_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_positional() {
        assert_eq!(
            render("foo %s and %s", &[json!("a"), json!(2)]).as_deref(),
            Some("foo a and 2")
        );
    }

    #[test]
    fn render_missing_argument_fails() {
        assert_eq!(render("foo %s %s", &[json!("a")]), None);
    }

    #[test]
    fn render_extra_arguments_ignored() {
        assert_eq!(render("foo %s", &[json!("a"), json!("b")]).as_deref(), Some("foo a"));
    }

    #[test]
    fn render_escapes() {
        assert_eq!(render("100%% sure%n", &[]).as_deref(), Some("100% sure\n"));
        assert_eq!(render("bad %d", &[json!(1)]), None);
        assert_eq!(render("trailing %", &[]), None);
    }

    #[test]
    fn render_non_string_argument_as_json() {
        assert_eq!(
            render("ignored: %s", &[json!(["foo", "bar"])]).as_deref(),
            Some(r#"ignored: ["foo","bar"]"#)
        );
    }

    #[test]
    fn core_bundle_is_loaded() {
        let bundle = MessageBundle::core();
        assert!(bundle.contains("core.notASchema"));
        assert_eq!(
            bundle.printf("core.notASchema", &[json!("array")]),
            r#"value has type "array", expected a JSON Schema (object)"#
        );
    }

    #[test]
    fn missing_key_falls_back_to_key() {
        let bundle = MessageBundle::new().with_message("a", "alpha");
        assert_eq!(bundle.message("a"), "alpha");
        assert_eq!(bundle.message("b"), "b");
    }
}
