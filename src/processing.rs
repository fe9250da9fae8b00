//! Processors and keyed processor dispatch.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{ConfigError, ProcessingError};
use crate::messages::core_message;
use crate::report::{LogLevel, ProcessingMessage, ProcessingReport};

/// Turns an input into an output, reporting along the way.
pub trait Processor<I, O>: Send + Sync {
    fn process(&self, report: &mut ProcessingReport, input: &I) -> Result<O, ProcessingError>;
}

impl<I, O, F> Processor<I, O> for F
where
    F: Fn(&mut ProcessingReport, &I) -> Result<O, ProcessingError> + Send + Sync,
{
    fn process(&self, report: &mut ProcessingReport, input: &I) -> Result<O, ProcessingError> {
        self(report, input)
    }
}

type Classifier<K, I> = Arc<dyn Fn(&I) -> K + Send + Sync>;

/// Builder of a [`ProcessorDispatcher`].
///
/// ```
/// use schema_core::{ProcessingError, ProcessingReport, Processor, ProcessorMap};
///
/// let dispatcher = ProcessorMap::new()
///     .set_classifier(|n: &i64| if *n < 0 { "negative" } else { "other" })
///     .add_entry("negative", |_: &mut ProcessingReport, n: &i64| -> Result<i64, ProcessingError> {
///         Ok(-n)
///     })
///     .set_default_processor(|_: &mut ProcessingReport, n: &i64| -> Result<i64, ProcessingError> {
///         Ok(*n)
///     })
///     .build()
///     .unwrap();
///
/// let mut report = ProcessingReport::new();
/// assert_eq!(dispatcher.process(&mut report, &-3).unwrap(), 3);
/// assert_eq!(dispatcher.process(&mut report, &4).unwrap(), 4);
/// ```
pub struct ProcessorMap<K, I, O> {
    classifier: Option<Classifier<K, I>>,
    processors: HashMap<K, Arc<dyn Processor<I, O>>>,
    default: Option<Arc<dyn Processor<I, O>>>,
}

impl<K, I, O> Default for ProcessorMap<K, I, O>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            classifier: None,
            processors: HashMap::new(),
            default: None,
        }
    }
}

impl<K, I, O> ProcessorMap<K, I, O>
where
    K: Eq + Hash + fmt::Display,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Route inputs classified as `key` to `processor`, replacing any
    /// previous entry for `key`.
    pub fn add_entry(mut self, key: K, processor: impl Processor<I, O> + 'static) -> Self {
        self.processors.insert(key, Arc::new(processor));
        self
    }

    /// Processor for keys without an entry.
    pub fn set_default_processor(mut self, processor: impl Processor<I, O> + 'static) -> Self {
        self.default = Some(Arc::new(processor));
        self
    }

    pub fn set_classifier(mut self, classifier: impl Fn(&I) -> K + Send + Sync + 'static) -> Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// # Errors
    ///
    /// Returns `ConfigError::MissingClassifier` if no classifier was set.
    pub fn build(self) -> Result<ProcessorDispatcher<K, I, O>, ConfigError> {
        let classifier = self.classifier.ok_or(ConfigError::MissingClassifier)?;
        Ok(ProcessorDispatcher {
            classifier,
            processors: self.processors,
            default: self.default,
        })
    }
}

/// Sends each input to the processor registered for its key.
pub struct ProcessorDispatcher<K, I, O> {
    classifier: Classifier<K, I>,
    processors: HashMap<K, Arc<dyn Processor<I, O>>>,
    default: Option<Arc<dyn Processor<I, O>>>,
}

impl<K, I, O> Processor<I, O> for ProcessorDispatcher<K, I, O>
where
    K: Eq + Hash + fmt::Display + Send + Sync,
{
    /// # Errors
    ///
    /// `ProcessingError::NoSuitableProcessor` if the key has no entry and
    /// there is no default processor.
    fn process(&self, report: &mut ProcessingReport, input: &I) -> Result<O, ProcessingError> {
        let key = (self.classifier)(input);
        let processor = self.processors.get(&key).or(self.default.as_ref());
        match processor {
            Some(processor) => {
                tracing::trace!(key = %key, "dispatching input");
                processor.process(report, input)
            }
            None => {
                let key = key.to_string();
                let message = ProcessingMessage::new()
                    .set_message(core_message("processing.noSuitableProcessor"))
                    .put_argument("key", key.as_str())
                    .set_log_level(LogLevel::Fatal);
                Err(ProcessingError::NoSuitableProcessor {
                    key,
                    message: Box::new(message),
                })
            }
        }
    }
}

impl<K, I, O> fmt::Debug for ProcessorDispatcher<K, I, O>
where
    K: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self.processors.keys().map(ToString::to_string).collect();
        keys.sort();
        f.debug_struct("ProcessorDispatcher")
            .field("keys", &keys)
            .field("default", &self.default.is_some())
            .finish()
    }
}
