//! Subprocess transport: owns the Python worker, speaks newline-delimited
//! frames over its stdin/stdout.

use crate::cancel::CancellationToken;
use crate::env;
use crate::error::{BridgeError, BridgeResult};
use crate::shim;
use crate::transport::{SendOutcome, Transport, TransportEvent};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Worker spawn settings (plain data, no behavior).
#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub python_path: PathBuf,
    pub virtual_env: Option<PathBuf>,
    pub script_path: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, Option<String>>,
    pub enable_json_fallback: bool,
}

impl Default for StdioConfig {
    fn default() -> Self {
        Self {
            python_path: PathBuf::from("python3"),
            virtual_env: None,
            script_path: None,
            cwd: None,
            env: BTreeMap::new(),
            enable_json_fallback: false,
        }
    }
}

/// Transport over one exclusively-owned worker subprocess.
pub struct StdioTransport {
    config: StdioConfig,
    stdin: Option<ChildStdin>,
    kill_tx: Option<oneshot::Sender<()>>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ready: bool,
}

impl StdioTransport {
    pub fn new(config: StdioConfig) -> Self {
        Self {
            config,
            stdin: None,
            kill_tx: None,
            events_rx: None,
            ready: false,
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn init(&mut self) -> BridgeResult<()> {
        let interpreter = shim::resolve_interpreter(
            &self.config.python_path,
            self.config.virtual_env.as_deref(),
        )?;
        let script = match &self.config.script_path {
            Some(path) => path.clone(),
            None => shim::materialize_worker_shim()?,
        };

        let script_root: Vec<PathBuf> = script
            .parent()
            .map(|dir| vec![dir.to_path_buf()])
            .unwrap_or_default();
        let worker_env = env::build_worker_env(
            &self.config.env,
            self.config.enable_json_fallback,
            &script_root,
            self.config.virtual_env.as_deref(),
        );

        let mut cmd = Command::new(&interpreter);
        cmd.arg("-u")
            .arg(&script)
            .env_clear()
            .envs(&worker_env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|source| BridgeError::Spawn { source })?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::protocol("Worker stdin unavailable after spawn"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::protocol("Worker stdout unavailable after spawn"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::protocol("Worker stderr unavailable after spawn"))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(pump(stdout, events_tx.clone(), TransportEvent::Stdout));
        tokio::spawn(pump(stderr, events_tx.clone(), TransportEvent::Stderr));

        // The monitor owns the child: it reaps on natural exit and kills
        // on request; `kill_on_drop` backstops abnormal teardown.
        let (kill_tx, mut kill_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    let code = status.ok().and_then(|s| s.code());
                    debug!("Worker process exited with code {:?}", code);
                    let _ = events_tx.send(TransportEvent::Exited { status: code });
                }
                _ = &mut kill_rx => {
                    if let Err(e) = child.start_kill() {
                        warn!("Failed to kill worker process: {}", e);
                    }
                    let status = child.wait().await;
                    let code = status.ok().and_then(|s| s.code());
                    let _ = events_tx.send(TransportEvent::Exited { status: code });
                }
            }
        });

        info!(
            "Spawned worker (pid={:?}) using interpreter {}",
            pid,
            interpreter.display()
        );

        self.stdin = Some(stdin);
        self.kill_tx = Some(kill_tx);
        self.events_rx = Some(events_rx);
        self.ready = true;
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn send(
        &mut self,
        frame: String,
        _timeout: Option<Duration>,
        _cancel: Option<&CancellationToken>,
    ) -> BridgeResult<SendOutcome> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| BridgeError::protocol("Worker stdin is closed"))?;

        let write = async {
            stdin.write_all(frame.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        };
        write.await.map_err(|e| {
            BridgeError::protocol(format!("Failed to write frame to worker stdin: {}", e))
        })?;

        Ok(SendOutcome::Queued)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn dispose(&mut self) {
        self.ready = false;
        // Closing stdin gives the worker a clean EOF shutdown; the kill
        // signal reaps it regardless.
        self.stdin = None;
        if let Some(kill_tx) = self.kill_tx.take() {
            let _ = kill_tx.send(());
        }
    }
}

async fn pump<R>(
    mut reader: R,
    tx: mpsc::UnboundedSender<TransportEvent>,
    wrap: fn(Vec<u8>) -> TransportEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; 4096];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(wrap(chunk[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = tx.send(TransportEvent::Failed {
                    message: format!("Worker pipe read failed: {}", e),
                });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StdioConfig::default();
        assert_eq!(config.python_path, PathBuf::from("python3"));
        assert!(!config.enable_json_fallback);
        assert!(config.script_path.is_none());
    }

    #[tokio::test]
    async fn test_send_before_init_fails() {
        let mut transport = StdioTransport::new(StdioConfig::default());
        assert!(!transport.is_ready());
        let result = transport.send("{}".to_string(), None, None).await;
        assert!(matches!(result, Err(BridgeError::Protocol { .. })));
    }
}
