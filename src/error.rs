//! Error types for schema loading, resolution and processing.

use thiserror::Error;

use crate::report::ProcessingMessage;

/// Structured processing failure.
///
/// Every variant carries the [`ProcessingMessage`] that describes it, so a
/// failure always has a level, a rendered text and arbitrary fields.
#[derive(Debug, Clone, Error)]
pub enum ProcessingError {
    #[error("{0}")]
    Processing(Box<ProcessingMessage>),

    // Fetch or parse failures (exit code 3)
    #[error("{0}")]
    Loading(Box<ProcessingMessage>),

    // Reference and pointer failures (exit code 2)
    #[error("{0}")]
    Resolution(Box<ProcessingMessage>),

    #[error("{0}")]
    InvalidSchema(Box<ProcessingMessage>),

    #[error("{0}")]
    Configuration(Box<ProcessingMessage>),

    #[error("no suitable processor found for key {key}")]
    NoSuitableProcessor {
        key: String,
        message: Box<ProcessingMessage>,
    },
}

impl ProcessingError {
    /// The message carried by this error.
    pub fn message(&self) -> &ProcessingMessage {
        match self {
            Self::Processing(m)
            | Self::Loading(m)
            | Self::Resolution(m)
            | Self::InvalidSchema(m)
            | Self::Configuration(m) => m,
            Self::NoSuitableProcessor { message, .. } => message,
        }
    }

    /// Consume the error, returning its message.
    pub fn into_message(self) -> ProcessingMessage {
        match self {
            Self::Processing(m)
            | Self::Loading(m)
            | Self::Resolution(m)
            | Self::InvalidSchema(m)
            | Self::Configuration(m) => *m,
            Self::NoSuitableProcessor { message, .. } => *message,
        }
    }

    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Loading(_) => 3,
            _ => 2,
        }
    }
}

/// Errors raised by a [`UriFetcher`](crate::UriFetcher).
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("resource not found: {uri}")]
    NotFound { uri: String },

    #[error("cannot read {uri}: {source}")]
    Io {
        uri: String,
        #[source]
        source: std::io::Error,
    },

    #[cfg(feature = "remote")]
    #[error("failed to fetch {uri}: {source}")]
    Http {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("cannot fetch {uri}: {message}")]
    Unsupported { uri: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Build-time configuration failures.
///
/// These come out of `build()`, `freeze()` and registration methods, never
/// out of a running load or analysis.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no classification function set on processor map")]
    MissingClassifier,

    #[error("invalid URI '{uri}': {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("'{uri}' is not an absolute URI without a fragment")]
    NotAbsolute { uri: String },

    #[error("namespace '{uri}' must be absolute and end with '/'")]
    InvalidNamespace { uri: String },

    #[error("URI scheme '{scheme}' is not valid")]
    InvalidScheme { scheme: String },

    #[error("descriptor for '{locator}' is already registered")]
    DuplicateDescriptor { locator: String },

    #[error("no default descriptor set and no descriptor registered")]
    NoDefaultDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::LogLevel;

    #[test]
    fn exit_codes() {
        let msg = ProcessingMessage::new().set_message("cannot fetch");
        assert_eq!(ProcessingError::Loading(Box::new(msg.clone())).exit_code(), 3);
        assert_eq!(ProcessingError::Resolution(Box::new(msg.clone())).exit_code(), 2);
        assert_eq!(ProcessingError::Configuration(Box::new(msg)).exit_code(), 2);
    }

    #[test]
    fn error_display_is_message_display() {
        let msg = ProcessingMessage::new()
            .set_log_level(LogLevel::Error)
            .set_message("dangling reference")
            .put("ref", "foo://bar#/a");
        let err = ProcessingError::Resolution(Box::new(msg.clone()));
        assert_eq!(err.to_string(), msg.to_string());
        assert_eq!(err.into_message().message(), "dangling reference");
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::NotAbsolute {
            uri: "foo.json".into(),
        };
        assert_eq!(
            err.to_string(),
            "'foo.json' is not an absolute URI without a fragment"
        );
    }
}
