//! Bridge error taxonomy.
//!
//! Fatality is positional, not nominal: `Protocol` and `Spawn` poison the
//! bridge (all pending rejected, no further sends); `Timeout`,
//! `Execution` and `Codec` fail only the call that observed them.

use thiserror::Error;
use tywrap_protocol::{CodecError, RequestId};

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Wire violation or worker death. The message starts with a short
    /// summary and, where applicable, carries a payload snippet and the
    /// recent stderr tail.
    #[error("{message}")]
    Protocol { message: String },

    /// The per-request timer fired, or an external abort was observed.
    /// The worker is not asked to cancel; a late response is silently
    /// dropped.
    #[error("{message}")]
    Timeout { message: String },

    /// Operation on a disposed bridge.
    #[error("Bridge is disposed")]
    Disposed,

    /// Worker-reported Python exception.
    #[error("{kind}: {message}")]
    Execution {
        kind: String,
        message: String,
        traceback: Option<String>,
    },

    /// Local encode/decode failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Worker process could not be started.
    #[error("Failed to spawn worker process: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },

    /// No process-wide runtime bridge has been configured.
    #[error("No runtime bridge configured")]
    NotConfigured,

    /// Internal failure with a preserved cause chain.
    #[error("{message}")]
    Internal {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl BridgeError {
    pub fn protocol(message: impl Into<String>) -> Self {
        BridgeError::Protocol {
            message: message.into(),
        }
    }

    /// Compose a fatal message: summary first, then the stderr tail.
    pub fn protocol_with_stderr(summary: impl Into<String>, stderr_tail: &str) -> Self {
        BridgeError::Protocol {
            message: compose_with_stderr(summary.into(), stderr_tail),
        }
    }

    pub fn timeout(id: RequestId, timeout_ms: u64, stderr_tail: &str) -> Self {
        BridgeError::Timeout {
            message: compose_with_stderr(
                format!("Request {} timed out after {} ms", id, timeout_ms),
                stderr_tail,
            ),
        }
    }

    /// Timeout observed by a transport that does not know the request id.
    pub fn timeout_elapsed(timeout_ms: u64) -> Self {
        BridgeError::Timeout {
            message: format!("Request timed out after {} ms", timeout_ms),
        }
    }

    /// External abort: observationally equivalent to a timeout.
    pub fn aborted() -> Self {
        BridgeError::Timeout {
            message: "Request timed out: aborted by caller".to_string(),
        }
    }

    pub fn execution(kind: impl Into<String>, message: impl Into<String>) -> Self {
        BridgeError::Execution {
            kind: kind.into(),
            message: message.into(),
            traceback: None,
        }
    }

    /// Errors that poison the whole bridge rather than one call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::Protocol { .. } | BridgeError::Spawn { .. })
    }
}

impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        BridgeError::Internal {
            message: err.to_string(),
            source: err,
        }
    }
}

pub(crate) fn compose_with_stderr(summary: String, stderr_tail: &str) -> String {
    if stderr_tail.is_empty() {
        summary
    } else {
        format!("{}\nRecent stderr:\n{}", summary, stderr_tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_timed_out() {
        let err = BridgeError::timeout(RequestId::new(3), 200, "");
        assert_eq!(err.to_string(), "Request 3 timed out after 200 ms");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_timeout_includes_stderr_tail() {
        let err = BridgeError::timeout(RequestId::new(3), 200, "Traceback: boom");
        assert!(err.to_string().contains("Recent stderr:"));
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_abort_reads_as_timeout() {
        let err = BridgeError::aborted();
        assert!(err.to_string().contains("timed out"));
        assert!(matches!(err, BridgeError::Timeout { .. }));
    }

    #[test]
    fn test_execution_display_leads_with_type() {
        let err = BridgeError::execution("ValueError", "bad input");
        assert_eq!(err.to_string(), "ValueError: bad input");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_protocol_is_fatal() {
        assert!(BridgeError::protocol("Response line exceeded 32 bytes").is_fatal());
        assert!(!BridgeError::Disposed.is_fatal());
    }
}
