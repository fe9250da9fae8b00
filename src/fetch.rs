//! URI fetchers: the only place where schema bytes are read from the outside.

use url::Url;

use crate::error::FetchError;

#[cfg(feature = "remote")]
use std::time::Duration;

/// Default timeout for HTTP requests (10 seconds).
#[cfg(feature = "remote")]
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Fetches the raw content at a URI. Registered per URI scheme.
pub trait UriFetcher: Send + Sync {
    fn fetch(&self, uri: &Url) -> Result<Vec<u8>, FetchError>;
}

impl<F> UriFetcher for F
where
    F: Fn(&Url) -> Result<Vec<u8>, FetchError> + Send + Sync,
{
    fn fetch(&self, uri: &Url) -> Result<Vec<u8>, FetchError> {
        self(uri)
    }
}

/// Reads `file:` URIs from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl UriFetcher for FileFetcher {
    fn fetch(&self, uri: &Url) -> Result<Vec<u8>, FetchError> {
        let path = uri.to_file_path().map_err(|()| FetchError::Unsupported {
            uri: uri.to_string(),
            message: "not a local file path".to_string(),
        })?;

        if !path.exists() {
            return Err(FetchError::NotFound {
                uri: uri.to_string(),
            });
        }

        std::fs::read(&path).map_err(|source| FetchError::Io {
            uri: uri.to_string(),
            source,
        })
    }
}

/// Fetches `http:` and `https:` URIs with a blocking client.
///
/// Requires the `remote` feature (enabled by default).
#[cfg(feature = "remote")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
}

#[cfg(feature = "remote")]
impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            timeout: HTTP_TIMEOUT,
        }
    }
}

#[cfg(feature = "remote")]
impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[cfg(feature = "remote")]
impl UriFetcher for HttpFetcher {
    fn fetch(&self, uri: &Url) -> Result<Vec<u8>, FetchError> {
        let http_error = |source| FetchError::Http {
            uri: uri.to_string(),
            source,
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(http_error)?;

        let response = client.get(uri.as_str()).send().map_err(http_error)?;

        // Check for HTTP errors before reading the body
        let response = response.error_for_status().map_err(http_error)?;

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(http_error)
    }
}
