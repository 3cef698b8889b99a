//! Protocol-level error types

use thiserror::Error;

/// Longest slice of a malformed frame that is echoed back in an error.
const FRAME_SNIPPET_LEN: usize = 256;

/// Errors produced while encoding or decoding protocol frames
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying stream failed
    #[error("worker stream error: {0}")]
    Io(#[from] std::io::Error),

    /// A line arrived that is not a valid protocol frame
    #[error("malformed frame {frame:?}: {source}")]
    MalformedFrame {
        frame: String,
        #[source]
        source: serde_json::Error,
    },

    /// A frame could not be serialized
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Create a malformed-frame error, truncating oversized frames
    pub fn malformed(frame: &str, source: serde_json::Error) -> Self {
        let frame = if frame.len() > FRAME_SNIPPET_LEN {
            let mut end = FRAME_SNIPPET_LEN;
            while !frame.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &frame[..end])
        } else {
            frame.to_string()
        };
        Self::MalformedFrame { frame, source }
    }
}
