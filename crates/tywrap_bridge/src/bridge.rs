//! Public bridge facade: typed operations over a [`BridgeCore`].

use crate::core::{BridgeCore, CoreConfig, FatalCallback, DEFAULT_TIMEOUT_MS};
use crate::env;
use crate::error::{BridgeError, BridgeResult};
use crate::http::{HttpBridgeConfig, HttpTransport};
use crate::line_buffer::DEFAULT_MAX_LINE_LENGTH;
use crate::stderr_tail::DEFAULT_MAX_STDERR_BYTES;
use crate::stdio::{StdioConfig, StdioTransport};
use crate::transport::Transport;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use tywrap_protocol::{
    codec, BridgeInfo, CallMethodParams, CallParams, CodecOptions, DisposeInstanceParams,
    InstantiateParams, MetaParams, PyValue, RequestMethod, RequestParams,
};

/// Subprocess bridge configuration. All keys optional; defaults spawn
/// `python3` with the embedded worker shim.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub python_path: PathBuf,
    pub virtual_env: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    /// Per-request timeout in milliseconds; `0` disables the timer.
    pub timeout_ms: u64,
    /// Max response line length in bytes. `None` consults
    /// `TYWRAP_CODEC_MAX_BYTES`, then falls back to 1 MiB.
    pub max_line_length: Option<usize>,
    pub max_stderr_bytes: usize,
    /// Environment overrides; `None` unsets a variable.
    pub env: BTreeMap<String, Option<String>>,
    /// Ask the worker to emit JSON payloads only (no Arrow).
    pub enable_json_fallback: bool,
    pub codec: CodecOptions,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            python_path: PathBuf::from("python3"),
            virtual_env: None,
            script_path: None,
            cwd: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_line_length: None,
            max_stderr_bytes: DEFAULT_MAX_STDERR_BYTES,
            env: BTreeMap::new(),
            enable_json_fallback: false,
            codec: CodecOptions::default(),
        }
    }
}

impl BridgeConfig {
    fn stdio(&self) -> StdioConfig {
        StdioConfig {
            python_path: self.python_path.clone(),
            virtual_env: self.virtual_env.clone(),
            script_path: self.script_path.clone(),
            cwd: self.cwd.clone(),
            env: self.env.clone(),
            enable_json_fallback: self.enable_json_fallback,
        }
    }

    fn core(&self) -> CoreConfig {
        CoreConfig {
            timeout_ms: self.timeout_ms,
            max_line_length: self
                .max_line_length
                .or_else(env::max_line_length_override)
                .unwrap_or(DEFAULT_MAX_LINE_LENGTH),
            max_stderr_bytes: self.max_stderr_bytes,
        }
    }
}

/// Opaque capability naming a Python instance retained in the worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceHandle(String);

impl InstanceHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A live bridge to one Python worker.
///
/// Created not-ready; [`RuntimeBridge::connect`] spawns the worker and
/// validates the `meta` handshake before handing the bridge out. Disposal
/// is terminal.
#[derive(Debug)]
pub struct RuntimeBridge {
    core: BridgeCore,
    info: BridgeInfo,
    codec: CodecOptions,
    disposed: AtomicBool,
}

impl RuntimeBridge {
    /// Spawn a worker subprocess and perform the handshake.
    pub async fn connect(config: BridgeConfig) -> BridgeResult<Self> {
        let transport = Box::new(StdioTransport::new(config.stdio()));
        Self::connect_with(transport, config.core(), config.codec, None).await
    }

    /// Same semantics over the stateless HTTP transport.
    pub async fn connect_http(config: HttpBridgeConfig) -> BridgeResult<Self> {
        let core = CoreConfig {
            timeout_ms: config.timeout_ms,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_stderr_bytes: DEFAULT_MAX_STDERR_BYTES,
        };
        let codec = config.codec;
        let transport = Box::new(HttpTransport::new(config));
        Self::connect_with(transport, core, codec, None).await
    }

    /// Connect over an arbitrary transport. Public for custom transports
    /// and in-process test doubles.
    pub async fn connect_with(
        transport: Box<dyn Transport>,
        core_config: CoreConfig,
        codec: CodecOptions,
        on_fatal: Option<FatalCallback>,
    ) -> BridgeResult<Self> {
        let core = BridgeCore::spawn(transport, core_config, codec, on_fatal).await?;

        let info = match fetch_info(&core).await {
            Ok(info) => info,
            Err(e) => {
                core.dispose().await;
                return Err(e);
            }
        };
        if let Err(e) = info.validate() {
            core.dispose().await;
            return Err(BridgeError::protocol(e.to_string()));
        }
        debug!(
            "Bridge handshake complete: python {} (pid {})",
            info.python_version, info.pid
        );

        Ok(Self {
            core,
            info,
            codec,
            disposed: AtomicBool::new(false),
        })
    }

    /// Handshake result captured at connect time.
    pub fn info(&self) -> &BridgeInfo {
        &self.info
    }

    /// In-flight request count (pool scheduling input).
    pub fn pending_requests(&self) -> usize {
        self.core.pending_requests()
    }

    /// Invoke a module-level function.
    pub async fn call(
        &self,
        module: &str,
        function_name: &str,
        args: &[PyValue],
        kwargs: Option<&BTreeMap<String, PyValue>>,
    ) -> BridgeResult<PyValue> {
        self.ensure_open()?;
        let params = RequestParams::Call(CallParams {
            module: module.to_string(),
            function_name: function_name.to_string(),
            args: self.encode_args(args)?,
            kwargs: self.encode_kwargs(kwargs)?,
        });
        self.core.request(RequestMethod::Call, params).await
    }

    /// Construct a class instance; the worker retains it and returns a
    /// handle.
    pub async fn instantiate(
        &self,
        module: &str,
        class_name: &str,
        args: &[PyValue],
        kwargs: Option<&BTreeMap<String, PyValue>>,
    ) -> BridgeResult<InstanceHandle> {
        self.ensure_open()?;
        let params = RequestParams::Instantiate(InstantiateParams {
            module: module.to_string(),
            class_name: class_name.to_string(),
            args: self.encode_args(args)?,
            kwargs: self.encode_kwargs(kwargs)?,
        });
        let result = self.core.request(RequestMethod::Instantiate, params).await?;
        match result {
            PyValue::Str(handle) => Ok(InstanceHandle(handle)),
            other => Err(BridgeError::execution(
                "TypeError",
                format!(
                    "instantiate returned {} instead of a handle string",
                    other.type_name()
                ),
            )),
        }
    }

    /// Invoke a method on a retained instance.
    pub async fn call_method(
        &self,
        handle: &InstanceHandle,
        method_name: &str,
        args: &[PyValue],
        kwargs: Option<&BTreeMap<String, PyValue>>,
    ) -> BridgeResult<PyValue> {
        self.ensure_open()?;
        let params = RequestParams::CallMethod(CallMethodParams {
            handle: handle.as_str().to_string(),
            method_name: method_name.to_string(),
            args: self.encode_args(args)?,
            kwargs: self.encode_kwargs(kwargs)?,
        });
        self.core.request(RequestMethod::CallMethod, params).await
    }

    /// Release a retained instance. Disposing an unknown handle is a
    /// no-op on the worker side.
    pub async fn dispose_instance(&self, handle: &InstanceHandle) -> BridgeResult<()> {
        self.ensure_open()?;
        let params = RequestParams::DisposeInstance(DisposeInstanceParams {
            handle: handle.as_str().to_string(),
        });
        self.core
            .request(RequestMethod::DisposeInstance, params)
            .await?;
        Ok(())
    }

    /// Fresh `meta` round trip.
    pub async fn meta(&self) -> BridgeResult<BridgeInfo> {
        self.ensure_open()?;
        fetch_info(&self.core).await
    }

    /// Instantiate with scoped disposal: the returned guard releases the
    /// instance explicitly via [`ScopedInstance::dispose`], or
    /// best-effort on drop. There is no finalization guarantee beyond
    /// this.
    pub async fn instantiate_scoped(
        &self,
        module: &str,
        class_name: &str,
        args: &[PyValue],
        kwargs: Option<&BTreeMap<String, PyValue>>,
    ) -> BridgeResult<ScopedInstance<'_>> {
        let handle = self.instantiate(module, class_name, args, kwargs).await?;
        Ok(ScopedInstance {
            bridge: self,
            handle: Some(handle),
        })
    }

    /// Reject everything pending, terminate the worker, and make this
    /// bridge permanently unusable.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.core.dispose().await;
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> BridgeResult<()> {
        if self.is_disposed() {
            return Err(BridgeError::Disposed);
        }
        Ok(())
    }

    fn encode_args(&self, args: &[PyValue]) -> BridgeResult<Vec<Value>> {
        args.iter()
            .map(|arg| codec::encode_value(arg, &self.codec).map_err(BridgeError::Codec))
            .collect()
    }

    fn encode_kwargs(
        &self,
        kwargs: Option<&BTreeMap<String, PyValue>>,
    ) -> BridgeResult<Option<BTreeMap<String, Value>>> {
        match kwargs {
            None => Ok(None),
            Some(kwargs) => {
                let mut out = BTreeMap::new();
                for (key, value) in kwargs {
                    out.insert(
                        key.clone(),
                        codec::encode_value(value, &self.codec).map_err(BridgeError::Codec)?,
                    );
                }
                Ok(Some(out))
            }
        }
    }
}

async fn fetch_info(core: &BridgeCore) -> BridgeResult<BridgeInfo> {
    let raw = core
        .request_raw(RequestMethod::Meta, RequestParams::Meta(MetaParams {}))
        .await?;
    let value = match raw {
        PyValue::Opaque(value) => value,
        other => {
            return Err(BridgeError::protocol(format!(
                "Bridge handshake rejected: meta returned {}",
                other.type_name()
            )))
        }
    };
    serde_json::from_value(value).map_err(|e| {
        BridgeError::protocol(format!(
            "Bridge handshake rejected: malformed BridgeInfo: {}",
            e
        ))
    })
}

/// Guard tying an instance handle to a lexical scope.
pub struct ScopedInstance<'a> {
    bridge: &'a RuntimeBridge,
    handle: Option<InstanceHandle>,
}

impl ScopedInstance<'_> {
    pub fn handle(&self) -> &InstanceHandle {
        self.handle.as_ref().expect("scoped instance already disposed")
    }

    pub async fn call_method(
        &self,
        method_name: &str,
        args: &[PyValue],
        kwargs: Option<&BTreeMap<String, PyValue>>,
    ) -> BridgeResult<PyValue> {
        self.bridge
            .call_method(self.handle(), method_name, args, kwargs)
            .await
    }

    /// Explicit release. Prefer this over drop: it observes the worker's
    /// reply.
    pub async fn dispose(mut self) -> BridgeResult<()> {
        if let Some(handle) = self.handle.take() {
            self.bridge.dispose_instance(&handle).await?;
        }
        Ok(())
    }
}

impl Drop for ScopedInstance<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Best-effort: enqueue the disposal without awaiting it.
            self.bridge.core.request_detached(
                RequestMethod::DisposeInstance,
                RequestParams::DisposeInstance(DisposeInstanceParams {
                    handle: handle.as_str().to_string(),
                }),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.timeout_ms, 30_000);
        assert_eq!(config.python_path, PathBuf::from("python3"));
        assert!(config.max_line_length.is_none());
        assert!(!config.enable_json_fallback);
    }

    #[test]
    fn test_core_config_defaults() {
        let core = BridgeConfig::default().core();
        assert_eq!(core.max_line_length, DEFAULT_MAX_LINE_LENGTH);
        assert_eq!(core.max_stderr_bytes, DEFAULT_MAX_STDERR_BYTES);
    }

    #[test]
    fn test_explicit_max_line_length_wins() {
        let config = BridgeConfig {
            max_line_length: Some(64),
            ..BridgeConfig::default()
        };
        assert_eq!(config.core().max_line_length, 64);
    }

    #[test]
    fn test_handle_display() {
        let handle = InstanceHandle("h-1-abcd".to_string());
        assert_eq!(handle.to_string(), "h-1-abcd");
        assert_eq!(handle.as_str(), "h-1-abcd");
    }
}
