//! Error types shared across Clipweave crates.

/// Top-level error type for Clipweave operations.
#[derive(Debug, thiserror::Error)]
pub enum ClipweaveError {
    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Failed to fetch {source_id}: {message}")]
    Fetch { source_id: String, message: String },

    #[error("Engine error: {message}")]
    Engine { message: String },

    #[error("Engine failed to load: {message}")]
    EngineLoad { message: String },

    #[error("Audio mix error: {message}")]
    Mix { message: String },

    #[error("Timed out after {budget_ms}ms during {step}")]
    Timeout { step: String, budget_ms: u64 },

    #[error("Frame extraction failed: {message}")]
    FrameExtraction {
        message: String,
        #[source]
        source: Box<ClipweaveError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using ClipweaveError.
pub type ClipweaveResult<T> = Result<T, ClipweaveError>;

/// Longest source identifier kept in error messages.
const MAX_SOURCE_ID_CHARS: usize = 64;

impl ClipweaveError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// A fetch failure. The identifier is truncated so long signed URLs
    /// stay readable in logs.
    pub fn fetch(source_id: &str, msg: impl Into<String>) -> Self {
        Self::Fetch {
            source_id: truncate_identifier(source_id, MAX_SOURCE_ID_CHARS),
            message: msg.into(),
        }
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine {
            message: msg.into(),
        }
    }

    pub fn engine_load(msg: impl Into<String>) -> Self {
        Self::EngineLoad {
            message: msg.into(),
        }
    }

    pub fn mix(msg: impl Into<String>) -> Self {
        Self::Mix {
            message: msg.into(),
        }
    }

    pub fn timeout(step: impl Into<String>, budget: std::time::Duration) -> Self {
        Self::Timeout {
            step: step.into(),
            budget_ms: budget.as_millis() as u64,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a terminal frame extraction failure, keeping the cause chain.
    pub fn frame_extraction(msg: impl Into<String>, source: ClipweaveError) -> Self {
        Self::FrameExtraction {
            message: msg.into(),
            source: Box::new(source),
        }
    }

    /// Whether the failure may be rescued by a fallback path.
    ///
    /// Engine failures and timeouts escalate to a fallback; validation,
    /// cancellation and load failures propagate immediately.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Engine { .. } | Self::Timeout { .. } | Self::Mix { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Shorten an identifier to at most `max_chars` characters, keeping the
/// head and marking the cut with an ellipsis.
pub fn truncate_identifier(id: &str, max_chars: usize) -> String {
    if id.chars().count() <= max_chars {
        return id.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let head: String = id.chars().take(keep).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_identifier_is_untouched() {
        assert_eq!(truncate_identifier("clip.mp4", 64), "clip.mp4");
    }

    #[test]
    fn test_long_identifier_is_truncated() {
        let url = format!("https://cdn.example.com/{}", "a".repeat(200));
        let err = ClipweaveError::fetch(&url, "HTTP 404");
        match err {
            ClipweaveError::Fetch { source_id, .. } => {
                assert_eq!(source_id.chars().count(), MAX_SOURCE_ID_CHARS);
                assert!(source_id.ends_with("..."));
                assert!(source_id.starts_with("https://cdn.example.com/"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_frame_extraction_keeps_cause() {
        let cause = ClipweaveError::timeout("engine exec", std::time::Duration::from_secs(5));
        let err = ClipweaveError::frame_extraction("fallback failed", cause);
        let source = std::error::Error::source(&err).expect("cause should be chained");
        assert!(source.to_string().contains("engine exec"));
        assert!(source.to_string().contains("5000ms"));
    }

    #[test]
    fn test_recoverability() {
        assert!(ClipweaveError::engine("boom").is_recoverable());
        assert!(!ClipweaveError::validation("bad trim").is_recoverable());
        assert!(!ClipweaveError::Cancelled.is_recoverable());
    }
}
