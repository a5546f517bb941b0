//! Loading candidate bytes.

use crate::error::FetchError;
use crate::source::Source;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Loads the bytes behind a [`Source`].
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Bytes, FetchError>;
}

/// Reads local sources from disk and remote sources over HTTP, each bounded
/// by the same timeout.
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl DefaultFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    async fn fetch_remote(&self, url: &reqwest::Url) -> Result<Bytes, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        response.bytes().await.map_err(|e| self.request_error(e))
    }

    fn request_error(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout_ms())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl SourceFetcher for DefaultFetcher {
    async fn fetch(&self, source: &Source) -> Result<Bytes, FetchError> {
        match source {
            Source::Local(path) => {
                match tokio::time::timeout(self.timeout, tokio::fs::read(path)).await {
                    Ok(Ok(bytes)) => Ok(Bytes::from(bytes)),
                    Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(FetchError::NotFound)
                    }
                    Ok(Err(e)) => Err(e.into()),
                    Err(_) => Err(FetchError::Timeout(self.timeout_ms())),
                }
            }
            Source::Remote(url) => self.fetch_remote(url).await,
        }
    }
}
