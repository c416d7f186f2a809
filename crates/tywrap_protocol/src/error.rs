//! Protocol and codec error types

use crate::frames::RequestId;
use std::fmt;
use thiserror::Error;

/// Longest payload excerpt included in diagnostics.
const SNIPPET_MAX_BYTES: usize = 160;

/// Wire-level violations. Every variant is fatal to the bridge that
/// observes it: all pending requests are rejected and no further sends
/// are permitted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid JSON in response frame: {detail}{snippet}")]
    InvalidJson { detail: String, snippet: String },

    #[error("Unexpected protocol discriminator: expected {expected:?}, got {got:?}")]
    WrongProtocol { expected: String, got: String },

    #[error("Protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("Response id {id} does not match any pending request")]
    UnknownId { id: RequestId },

    #[error("Response line exceeded {limit} bytes{snippet}")]
    LineTooLong { limit: usize, snippet: String },

    #[error("Response frame {id} carries both result and error")]
    ResultAndError { id: RequestId },

    #[error("Response frame {id} carries neither result nor error")]
    MissingOutcome { id: RequestId },

    #[error("Bridge handshake rejected: {reason}")]
    HandshakeRejected { reason: String },

    #[error("Worker process exited unexpectedly ({status})")]
    ProcessExited { status: String },
}

/// Render a bounded excerpt of an offending payload, prefixed so it can be
/// appended directly to an error message. Empty payloads render nothing.
pub fn payload_snippet(payload: &str) -> String {
    if payload.is_empty() {
        return String::new();
    }
    let mut end = payload.len().min(SNIPPET_MAX_BYTES);
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    let ellipsis = if end < payload.len() { "..." } else { "" };
    format!(". Payload snippet: {:?}{}", &payload[..end], ellipsis)
}

/// Which half of the codec failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecPhase {
    Encode,
    Decode,
}

impl fmt::Display for CodecPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecPhase::Encode => write!(f, "encode"),
            CodecPhase::Decode => write!(f, "decode"),
        }
    }
}

/// Local encode/decode failure. Non-fatal: the individual call fails and
/// the bridge remains usable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CodecError {
    pub phase: CodecPhase,
    pub message: String,
    /// JSON path of the offending node, when determinable (`$.args[0].x`).
    pub path: Option<String>,
    /// Type name of the offending value, when determinable.
    pub value_type: Option<String>,
}

impl CodecError {
    pub fn encode(message: impl Into<String>, path: Option<String>, value_type: Option<String>) -> Self {
        Self::with_phase(CodecPhase::Encode, message, path, value_type)
    }

    pub fn decode(message: impl Into<String>, path: Option<String>, value_type: Option<String>) -> Self {
        Self::with_phase(CodecPhase::Decode, message, path, value_type)
    }

    fn with_phase(
        phase: CodecPhase,
        message: impl Into<String>,
        path: Option<String>,
        value_type: Option<String>,
    ) -> Self {
        let mut message = message.into();
        if let Some(path) = &path {
            message.push_str(&format!(" (at {})", path));
        }
        if let Some(value_type) = &value_type {
            message.push_str(&format!(" (value type: {})", value_type));
        }
        Self {
            phase,
            message,
            path,
            value_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_bounded() {
        let payload = "x".repeat(4096);
        let snippet = payload_snippet(&payload);
        assert!(snippet.starts_with(". Payload snippet: "));
        assert!(snippet.ends_with("..."));
        assert!(snippet.len() < 256);
    }

    #[test]
    fn test_snippet_empty() {
        assert_eq!(payload_snippet(""), "");
    }

    #[test]
    fn test_snippet_char_boundary() {
        let payload = "日本語".repeat(100);
        let snippet = payload_snippet(&payload);
        assert!(snippet.contains("日本語"));
    }

    #[test]
    fn test_codec_error_carries_phase_and_path() {
        let err = CodecError::encode(
            "non-finite number is not representable in JSON",
            Some("$.args[0]".to_string()),
            Some("f64".to_string()),
        );
        assert_eq!(err.phase, CodecPhase::Encode);
        assert!(err.to_string().contains("$.args[0]"));
        assert!(err.to_string().contains("f64"));
    }

    #[test]
    fn test_protocol_error_messages() {
        let err = ProtocolError::LineTooLong {
            limit: 32,
            snippet: payload_snippet("xxxx"),
        };
        assert!(err.to_string().starts_with("Response line exceeded 32 bytes"));
    }
}
