//! Request/response frame types and the `meta` handshake payload.

use crate::error::{payload_snippet, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Protocol discriminator carried by every frame.
pub const PROTOCOL: &str = "tywrap/1";

/// Protocol version negotiated during the `meta` handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Bridge implementation name expected from the worker.
pub const BRIDGE_KIND: &str = "python-subprocess";

/// Canonical request identifier. Strictly increasing per bridge instance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord, Default,
)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Operations the worker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMethod {
    Call,
    Instantiate,
    CallMethod,
    DisposeInstance,
    Meta,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Call => "call",
            RequestMethod::Instantiate => "instantiate",
            RequestMethod::CallMethod => "call_method",
            RequestMethod::DisposeInstance => "dispose_instance",
            RequestMethod::Meta => "meta",
        }
    }
}

/// `call` params: invoke a module-level function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParams {
    pub module: String,
    #[serde(rename = "functionName")]
    pub function_name: String,
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kwargs: Option<BTreeMap<String, Value>>,
}

/// `instantiate` params: construct a class instance; the result is an
/// opaque handle string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstantiateParams {
    pub module: String,
    #[serde(rename = "className")]
    pub class_name: String,
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kwargs: Option<BTreeMap<String, Value>>,
}

/// `call_method` params: invoke a method on a retained instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallMethodParams {
    pub handle: String,
    #[serde(rename = "methodName")]
    pub method_name: String,
    pub args: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub kwargs: Option<BTreeMap<String, Value>>,
}

/// `dispose_instance` params. Unknown handles are a worker-side no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisposeInstanceParams {
    pub handle: String,
}

/// `meta` params: empty object on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetaParams {}

/// Method-specific request params.
///
/// Untagged: the owning frame's `method` field is the real discriminator.
/// Variant order matters for deserialization — shapes with more required
/// fields come first so a `call_method` payload is not mistaken for a
/// `dispose_instance` one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestParams {
    Call(CallParams),
    Instantiate(InstantiateParams),
    CallMethod(CallMethodParams),
    DisposeInstance(DisposeInstanceParams),
    Meta(MetaParams),
}

/// One request frame. Serialized as a single JSON line.
///
/// `protocol_version` is optional on the wire: the `protocol` string
/// already embeds the major version and the handshake enforces the full
/// version via [`BridgeInfo`]. When present it is validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub protocol: String,
    #[serde(
        rename = "protocolVersion",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub protocol_version: Option<u32>,
    pub id: RequestId,
    pub method: RequestMethod,
    pub params: RequestParams,
}

impl RequestFrame {
    pub fn new(id: RequestId, method: RequestMethod, params: RequestParams) -> Self {
        Self {
            protocol: PROTOCOL.to_string(),
            protocol_version: None,
            id,
            method,
            params,
        }
    }

    pub fn meta(id: RequestId) -> Self {
        Self::new(id, RequestMethod::Meta, RequestParams::Meta(MetaParams {}))
    }
}

/// Worker-reported failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Python exception type name, e.g. `ValueError`.
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub traceback: Option<String>,
}

/// One response frame: exactly one of `result` / `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub protocol: String,
    #[serde(
        rename = "protocolVersion",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub protocol_version: Option<u32>,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorPayload>,
}

impl ResponseFrame {
    /// Parse and validate one response line.
    pub fn parse(line: &str) -> Result<Self, ProtocolError> {
        let frame: ResponseFrame =
            serde_json::from_str(line).map_err(|e| ProtocolError::InvalidJson {
                detail: e.to_string(),
                snippet: payload_snippet(line),
            })?;
        frame.validate()?;
        Ok(frame)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.protocol != PROTOCOL {
            return Err(ProtocolError::WrongProtocol {
                expected: PROTOCOL.to_string(),
                got: self.protocol.clone(),
            });
        }
        if let Some(version) = self.protocol_version {
            if version != PROTOCOL_VERSION {
                return Err(ProtocolError::VersionMismatch {
                    expected: PROTOCOL_VERSION,
                    got: version,
                });
            }
        }
        match (&self.result, &self.error) {
            (Some(_), Some(_)) => Err(ProtocolError::ResultAndError { id: self.id }),
            (None, None) => Err(ProtocolError::MissingOutcome { id: self.id }),
            _ => Ok(()),
        }
    }

    /// Split into the successful payload or the worker error.
    pub fn into_outcome(self) -> Result<Value, ErrorPayload> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (None, Some(error)) => Err(error),
            // validate() rejects the remaining shapes before this point
            _ => Err(ErrorPayload {
                kind: "ProtocolError".to_string(),
                message: "response frame had no usable outcome".to_string(),
                traceback: None,
            }),
        }
    }
}

/// How the worker degrades when Arrow is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecFallback {
    Json,
    None,
}

/// Result of the `meta` handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeInfo {
    pub protocol: String,
    pub protocol_version: u32,
    pub bridge: String,
    pub python_version: String,
    pub pid: u32,
    pub codec_fallback: CodecFallback,
    pub arrow_available: bool,
    pub instances: u64,
}

impl BridgeInfo {
    /// Fail-closed handshake validation: every expected constant must
    /// match exactly.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.protocol != PROTOCOL {
            return Err(ProtocolError::HandshakeRejected {
                reason: format!(
                    "protocol {:?} does not match expected {:?}",
                    self.protocol, PROTOCOL
                ),
            });
        }
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(ProtocolError::HandshakeRejected {
                reason: format!(
                    "protocolVersion {} does not match expected {}",
                    self.protocol_version, PROTOCOL_VERSION
                ),
            });
        }
        if self.bridge != BRIDGE_KIND {
            return Err(ProtocolError::HandshakeRejected {
                reason: format!(
                    "bridge {:?} does not match expected {:?}",
                    self.bridge, BRIDGE_KIND
                ),
            });
        }
        Ok(())
    }
}
