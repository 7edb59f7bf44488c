//! Retrieval of source bytes.

use std::sync::Arc;

use clipweave_clip_model::MediaSource;
use clipweave_common::error::{ClipweaveError, ClipweaveResult};

/// Turns a [`MediaSource`] into bytes.
#[async_trait::async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, source: &MediaSource) -> ClipweaveResult<Arc<[u8]>>;
}

/// Fetcher for files, in-memory sources and (with the `http` feature) URLs.
#[derive(Debug, Clone, Default)]
pub struct DefaultFetcher {
    #[cfg(feature = "http")]
    client: reqwest::Client,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "http")]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    #[cfg(feature = "http")]
    async fn fetch_url(&self, id: &str, url: &str) -> ClipweaveResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ClipweaveError::fetch(id, format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClipweaveError::fetch(id, format!("HTTP {status}")));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ClipweaveError::fetch(id, format!("failed to read body: {e}")))?;
        Ok(body.to_vec())
    }

    #[cfg(not(feature = "http"))]
    async fn fetch_url(&self, id: &str, _url: &str) -> ClipweaveResult<Vec<u8>> {
        Err(ClipweaveError::fetch(
            id,
            "URL sources need the `http` feature",
        ))
    }
}

#[async_trait::async_trait]
impl SourceFetcher for DefaultFetcher {
    async fn fetch(&self, source: &MediaSource) -> ClipweaveResult<Arc<[u8]>> {
        let id = source.identifier();
        let bytes: Arc<[u8]> = match source {
            MediaSource::Memory { bytes, .. } => bytes.clone(),
            MediaSource::File { path } => tokio::fs::read(path)
                .await
                .map_err(|e| ClipweaveError::fetch(&id, e.to_string()))?
                .into(),
            MediaSource::Url { url } => self.fetch_url(&id, url).await?.into(),
        };

        if bytes.is_empty() {
            return Err(ClipweaveError::fetch(&id, "source is empty"));
        }
        tracing::debug!(source = %source.short_identifier(), bytes = bytes.len(), "Fetched source");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_source_is_shared() {
        let source = MediaSource::memory("a.mp4", vec![1u8, 2, 3]);
        let bytes = DefaultFetcher::new().fetch(&source).await.unwrap();
        let MediaSource::Memory { bytes: original, .. } = &source else {
            unreachable!()
        };
        assert!(Arc::ptr_eq(&bytes, original));
    }

    #[tokio::test]
    async fn test_file_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"not really a video").unwrap();
        let bytes = DefaultFetcher::new()
            .fetch(&MediaSource::file(&path))
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"not really a video");
    }

    #[tokio::test]
    async fn test_missing_file_is_fetch_error() {
        let err = DefaultFetcher::new()
            .fetch(&MediaSource::file("/nonexistent/clipweave/clip.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClipweaveError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_empty_source_rejected() {
        let err = DefaultFetcher::new()
            .fetch(&MediaSource::memory("empty.mp4", Vec::<u8>::new()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
