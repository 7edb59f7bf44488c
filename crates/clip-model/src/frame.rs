//! Extracted still frames.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// A single encoded still image taken from a video.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFrame {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl ExtractedFrame {
    pub fn jpeg(bytes: Vec<u8>, width: Option<u32>, height: Option<u32>) -> Self {
        Self {
            bytes,
            mime_type: "image/jpeg".to_string(),
            width,
            height,
        }
    }

    /// Embeddable `data:` URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url() {
        let frame = ExtractedFrame::jpeg(vec![0xff, 0xd8, 0xff], Some(2), Some(2));
        assert_eq!(frame.data_url(), "data:image/jpeg;base64,/9j/");
    }
}
