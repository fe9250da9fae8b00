//! Structured diagnostics: messages, log levels and reports.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::ProcessingError;
use crate::messages::render;

/// Severity of a [`ProcessingMessage`].
///
/// Ordered from least to most severe. `None` sits above every real level and
/// is only meaningful as a threshold ("never").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
    None,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::None => "none",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the error raised by [`ProcessingMessage::as_exception`].
pub type ExceptionProvider = fn(ProcessingMessage) -> ProcessingError;

/// Default provider: a plain [`ProcessingError::Processing`].
pub fn processing_exception(message: ProcessingMessage) -> ProcessingError {
    ProcessingError::Processing(Box::new(message))
}

pub fn loading_exception(message: ProcessingMessage) -> ProcessingError {
    ProcessingError::Loading(Box::new(message))
}

pub fn resolution_exception(message: ProcessingMessage) -> ProcessingError {
    ProcessingError::Resolution(Box::new(message))
}

pub fn invalid_schema_exception(message: ProcessingMessage) -> ProcessingError {
    ProcessingError::InvalidSchema(Box::new(message))
}

pub fn configuration_exception(message: ProcessingMessage) -> ProcessingError {
    ProcessingError::Configuration(Box::new(message))
}

/// A single structured diagnostic.
///
/// Fields are kept in insertion order. `level` is always present; `message`
/// is present once [`set_message`](Self::set_message) was called. All
/// mutators consume and return the message so calls can be chained:
///
/// ```
/// use schema_core::{LogLevel, ProcessingMessage};
///
/// let msg = ProcessingMessage::new()
///     .set_log_level(LogLevel::Warning)
///     .set_message("unknown keyword %s")
///     .put_argument("keyword", "foo");
/// assert_eq!(msg.message(), "unknown keyword foo");
/// assert_eq!(msg.get("keyword").unwrap(), "foo");
/// ```
#[derive(Debug, Clone)]
pub struct ProcessingMessage {
    map: Map<String, Value>,
    template: Option<String>,
    args: Vec<Value>,
    level: LogLevel,
    exception_provider: ExceptionProvider,
}

impl Default for ProcessingMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingMessage {
    /// A message at level `info`, without text.
    pub fn new() -> Self {
        Self {
            map: Map::new(),
            template: None,
            args: Vec::new(),
            level: LogLevel::Info,
            exception_provider: processing_exception,
        }
        .set_log_level(LogLevel::Info)
    }

    /// The rendered message text, or `"(no message)"`.
    pub fn message(&self) -> &str {
        self.map
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)")
    }

    pub fn log_level(&self) -> LogLevel {
        self.level
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// Set the message template. Clears previously added arguments.
    pub fn set_message(mut self, message: impl Into<String>) -> Self {
        let message = message.into();
        self.args.clear();
        self.template = Some(message.clone());
        self.map.insert("message".to_string(), Value::String(message));
        self
    }

    pub fn set_log_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self.map
            .insert("level".to_string(), Value::String(level.to_string()));
        self
    }

    pub fn set_exception_provider(mut self, provider: ExceptionProvider) -> Self {
        self.exception_provider = provider;
        self
    }

    /// Add a field. `Value::Null` is stored as an explicit null.
    pub fn put(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.map.insert(key.to_string(), value.into());
        self
    }

    /// Add a copy of a JSON value as a field; `None` stores a null.
    pub fn put_json(self, key: &str, value: Option<&Value>) -> Self {
        let value = value.cloned().unwrap_or(Value::Null);
        self.put(key, value)
    }

    /// Add a field holding the serde serialization of `value`.
    ///
    /// Values that fail to serialize are recorded by type name.
    pub fn put_serialized<T: Serialize + ?Sized>(self, key: &str, value: &T) -> Self {
        let json = serde_json::to_value(value).unwrap_or_else(|_| {
            let mut map = Map::new();
            map.insert(
                "rustType".to_string(),
                Value::String(std::any::type_name::<T>().to_string()),
            );
            Value::Object(map)
        });
        self.put(key, json)
    }

    /// Add a field holding the display forms of `values` as an array.
    pub fn put_array<I, T>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        let array: Vec<Value> = values
            .into_iter()
            .map(|v| Value::String(v.to_string()))
            .collect();
        self.put(key, Value::Array(array))
    }

    /// Add a field that is also the next positional template argument.
    pub fn put_argument(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.add_argument(value.clone());
        self.put(key, value)
    }

    /// [`put_array`](Self::put_array), also used as one template argument.
    pub fn put_argument_array<I, T>(self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: fmt::Display,
    {
        let array: Vec<Value> = values
            .into_iter()
            .map(|v| Value::String(v.to_string()))
            .collect();
        self.put_argument(key, Value::Array(array))
    }

    /// Legacy field setter: a `None` key is silently ignored.
    #[deprecated(note = "use `put_json`, which never drops a field")]
    pub fn put_node(self, key: Option<&str>, value: Option<&Value>) -> Self {
        match key {
            Some(key) => self.put_json(key, value),
            None => self,
        }
    }

    // Re-render from the template; a failed substitution keeps the text as is.
    fn add_argument(&mut self, value: Value) {
        let Some(template) = &self.template else {
            return;
        };
        self.args.push(value);
        if let Some(rendered) = render(template, &self.args) {
            self.map
                .insert("message".to_string(), Value::String(rendered));
        }
    }

    pub fn as_json(&self) -> Value {
        Value::Object(self.map.clone())
    }

    /// Build an error out of this message using its exception provider.
    pub fn as_exception(&self) -> ProcessingError {
        (self.exception_provider)(self.clone())
    }
}

impl PartialEq for ProcessingMessage {
    fn eq(&self, other: &Self) -> bool {
        self.map == other.map
    }
}

impl Serialize for ProcessingMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.map.serialize(serializer)
    }
}

impl fmt::Display for ProcessingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.level, self.message())?;
        for (key, value) in &self.map {
            if key == "message" || key == "level" {
                continue;
            }
            write!(f, "\n    {}: {}", key, value)?;
        }
        Ok(())
    }
}

/// Ordered collection of messages from one processing run.
///
/// Messages below the log level are counted but not kept. Logging a message
/// at or above the exception threshold returns that message as an error
/// instead of recording it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingReport {
    log_level: LogLevel,
    exception_threshold: LogLevel,
    current_level: LogLevel,
    messages: Vec<ProcessingMessage>,
}

impl Default for ProcessingReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingReport {
    /// Log level `info`, exception threshold `fatal`.
    pub fn new() -> Self {
        Self::with_thresholds(LogLevel::Info, LogLevel::Fatal)
    }

    pub fn with_thresholds(log_level: LogLevel, exception_threshold: LogLevel) -> Self {
        Self {
            log_level,
            exception_threshold,
            current_level: LogLevel::Debug,
            messages: Vec::new(),
        }
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    pub fn exception_threshold(&self) -> LogLevel {
        self.exception_threshold
    }

    pub fn debug(&mut self, message: ProcessingMessage) -> Result<(), ProcessingError> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&mut self, message: ProcessingMessage) -> Result<(), ProcessingError> {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&mut self, message: ProcessingMessage) -> Result<(), ProcessingError> {
        self.log(LogLevel::Warning, message)
    }

    pub fn error(&mut self, message: ProcessingMessage) -> Result<(), ProcessingError> {
        self.log(LogLevel::Error, message)
    }

    pub fn fatal(&mut self, message: ProcessingMessage) -> Result<(), ProcessingError> {
        self.log(LogLevel::Fatal, message)
    }

    /// Record `message` at `level`.
    pub fn log(
        &mut self,
        level: LogLevel,
        message: ProcessingMessage,
    ) -> Result<(), ProcessingError> {
        let message = message.set_log_level(level);
        if level >= self.exception_threshold {
            return Err(message.as_exception());
        }
        self.current_level = self.current_level.max(level);
        if level >= self.log_level {
            self.messages.push(message);
        }
        Ok(())
    }

    /// True while no message reached `error`.
    pub fn is_success(&self) -> bool {
        self.current_level < LogLevel::Error
    }

    /// Highest level logged so far.
    pub fn current_level(&self) -> LogLevel {
        self.current_level
    }

    /// Replay another report's messages into this one.
    pub fn merge(&mut self, other: &ProcessingReport) -> Result<(), ProcessingError> {
        for message in &other.messages {
            self.log(message.log_level(), message.clone())?;
        }
        self.current_level = self.current_level.max(other.current_level);
        Ok(())
    }

    pub fn messages(&self) -> &[ProcessingMessage] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProcessingMessage> {
        self.messages.iter()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_json(&self) -> Value {
        Value::Array(self.messages.iter().map(ProcessingMessage::as_json).collect())
    }
}

impl<'a> IntoIterator for &'a ProcessingReport {
    type Item = &'a ProcessingMessage;
    type IntoIter = std::slice::Iter<'a, ProcessingMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

impl fmt::Display for ProcessingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for message in &self.messages {
            writeln!(f, "{}", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_message_has_info_level() {
        let msg = ProcessingMessage::new();
        assert_eq!(msg.log_level(), LogLevel::Info);
        assert_eq!(msg.get("level").unwrap(), "info");
        assert_eq!(msg.message(), "(no message)");
    }

    #[test]
    fn put_argument_substitutes_into_template() {
        let msg = ProcessingMessage::new()
            .set_message("foo %s")
            .put_argument("x", "here");
        assert_eq!(msg.message(), "foo here");
        assert_eq!(msg.get("x").unwrap(), "here");
    }

    #[test]
    fn set_message_clears_arguments() {
        let msg = ProcessingMessage::new()
            .set_message("foo %s")
            .put_argument("x", "here")
            .set_message("bar %s")
            .put_argument("y", "there");
        assert_eq!(msg.message(), "bar there");
    }

    #[test]
    fn failed_substitution_leaves_template() {
        let msg = ProcessingMessage::new()
            .set_message("%s and %s")
            .put_argument("a", "one");
        assert_eq!(msg.message(), "%s and %s");

        let msg = msg.put_argument("b", "two");
        assert_eq!(msg.message(), "one and two");
    }

    #[test]
    fn argument_without_message_is_only_a_field() {
        let msg = ProcessingMessage::new().put_argument("a", 1);
        assert_eq!(msg.message(), "(no message)");
        assert_eq!(msg.get("a").unwrap(), 1);
    }

    #[test]
    fn null_value_is_explicit_null() {
        let msg = ProcessingMessage::new()
            .put("a", Value::Null)
            .put_json("b", None);
        for key in ["a", "b"] {
            assert_eq!(msg.get(key), Some(&Value::Null));
        }
    }

    #[test]
    #[allow(deprecated)]
    fn legacy_put_node_ignores_missing_key() {
        let msg = ProcessingMessage::new()
            .put_node(None, Some(&json!(1)))
            .put_node(Some("k"), None);
        assert_eq!(msg.as_json(), json!({ "level": "info", "k": null }));
    }

    #[test]
    fn put_json_copies_value() {
        let value = json!({ "a": [1, 2] });
        let msg = ProcessingMessage::new().put_json("v", Some(&value));
        assert_eq!(msg.get("v"), Some(&value));
    }

    #[test]
    fn put_array_uses_display() {
        let msg = ProcessingMessage::new().put_array("ignored", ["foo", "bar"]);
        assert_eq!(msg.get("ignored").unwrap(), &json!(["foo", "bar"]));
    }

    #[test]
    fn exception_provider_is_used() {
        let msg = ProcessingMessage::new().set_message("boom");
        assert!(matches!(msg.as_exception(), ProcessingError::Processing(_)));

        let msg = msg.set_exception_provider(loading_exception);
        assert!(matches!(msg.as_exception(), ProcessingError::Loading(_)));
    }

    #[test]
    fn display_lists_fields() {
        let msg = ProcessingMessage::new()
            .set_log_level(LogLevel::Error)
            .set_message("oops")
            .put("ref", "#/a");
        assert_eq!(msg.to_string(), "error: oops\n    ref: \"#/a\"");
    }

    #[test]
    fn report_filters_below_log_level() {
        let mut report = ProcessingReport::new();
        report.debug(ProcessingMessage::new()).unwrap();
        report.info(ProcessingMessage::new()).unwrap();
        report.warn(ProcessingMessage::new()).unwrap();
        assert_eq!(report.len(), 2);
        assert!(report.is_success());
        assert_eq!(report.messages()[1].log_level(), LogLevel::Warning);
    }

    #[test]
    fn report_error_fails_run() {
        let mut report = ProcessingReport::new();
        report.error(ProcessingMessage::new().set_message("x")).unwrap();
        assert!(!report.is_success());
        assert_eq!(report.current_level(), LogLevel::Error);
    }

    #[test]
    fn report_raises_at_exception_threshold() {
        let mut report = ProcessingReport::new();
        let err = report
            .fatal(ProcessingMessage::new().set_message("fatal"))
            .unwrap_err();
        assert_eq!(err.message().log_level(), LogLevel::Fatal);
        assert!(report.is_empty());

        let mut report = ProcessingReport::with_thresholds(LogLevel::Info, LogLevel::Error);
        assert!(report.error(ProcessingMessage::new()).is_err());
    }

    #[test]
    fn merge_keeps_failure_state() {
        let mut quiet = ProcessingReport::with_thresholds(LogLevel::None, LogLevel::None);
        quiet.error(ProcessingMessage::new()).unwrap();
        assert!(quiet.is_empty());

        let mut report = ProcessingReport::new();
        report.merge(&quiet).unwrap();
        assert!(!report.is_success());
    }
}
