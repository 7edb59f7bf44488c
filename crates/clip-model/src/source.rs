//! References to retrievable media bytes.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use clipweave_common::error::truncate_identifier;

/// Longest identifier shown in progress messages and errors.
const SHORT_ID_CHARS: usize = 48;

/// Where the bytes of a clip or audio track come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaSource {
    /// A file on the local filesystem.
    File { path: PathBuf },
    /// A remote object reachable over HTTP(S).
    Url { url: String },
    /// Bytes already held in memory.
    #[serde(skip)]
    Memory { name: String, bytes: Arc<[u8]> },
}

impl MediaSource {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self::Url { url: url.into() }
    }

    pub fn memory(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Memory {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Full human-readable identifier.
    pub fn identifier(&self) -> String {
        match self {
            Self::File { path } => path.display().to_string(),
            Self::Url { url } => url.clone(),
            Self::Memory { name, .. } => format!("memory:{name}"),
        }
    }

    /// Identifier shortened for messages.
    pub fn short_identifier(&self) -> String {
        truncate_identifier(&self.identifier(), SHORT_ID_CHARS)
    }

    /// File extension hint taken from the path or URL, if any.
    pub fn extension_hint(&self) -> Option<String> {
        let candidate = match self {
            Self::File { path } => path.to_string_lossy().into_owned(),
            Self::Url { url } => url
                .split(|c| c == '?' || c == '#')
                .next()
                .unwrap_or_default()
                .to_string(),
            Self::Memory { name, .. } => name.clone(),
        };
        let last_segment = candidate.rsplit('/').next().unwrap_or_default();
        let (_, ext) = last_segment.rsplit_once('.')?;
        let valid = !ext.is_empty()
            && ext.len() <= 5
            && ext.chars().all(|c| c.is_ascii_alphanumeric());
        valid.then(|| ext.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_hint_ignores_query() {
        let src = MediaSource::url("https://cdn.example.com/v/clip.MOV?sig=abc.def");
        assert_eq!(src.extension_hint().as_deref(), Some("mov"));
    }

    #[test]
    fn test_extension_hint_missing() {
        let src = MediaSource::url("https://cdn.example.com/stream/12345");
        assert_eq!(src.extension_hint(), None);
    }

    #[test]
    fn test_short_identifier() {
        let src = MediaSource::url(format!("https://example.com/{}", "x".repeat(100)));
        assert_eq!(src.short_identifier().chars().count(), SHORT_ID_CHARS);
        let mem = MediaSource::memory("intro.mp4", vec![1u8, 2, 3]);
        assert_eq!(mem.short_identifier(), "memory:intro.mp4");
    }

    #[test]
    fn test_file_source_json() {
        let src: MediaSource =
            serde_json::from_str(r#"{"kind":"file","path":"/tmp/a.mp4"}"#).unwrap();
        assert_eq!(src, MediaSource::file("/tmp/a.mp4"));
    }
}
