//! Transport-agnostic request correlation.
//!
//! One dedicated task per bridge owns the pending table, the stdout line
//! buffer and the stderr tail. Callers submit commands over an unbounded
//! channel and await a oneshot. Ids are allocated by the task at the
//! moment a send is handled, so ids are strictly monotonic and frames hit
//! the transport in id order. Responses may resolve in any order.

use crate::error::{compose_with_stderr, BridgeError, BridgeResult};
use crate::line_buffer::{LineBuffer, DEFAULT_MAX_LINE_LENGTH};
use crate::stderr_tail::{StderrTail, DEFAULT_MAX_STDERR_BYTES};
use crate::transport::{SendOutcome, Transport, TransportEvent};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};
use tywrap_protocol::error::payload_snippet;
use tywrap_protocol::{
    codec, CodecOptions, ProtocolError, PyValue, RequestFrame, RequestId, RequestMethod,
    RequestParams, ResponseFrame,
};

/// Default per-request timeout: 30 s. `0` disables the timer.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Floor for timed-out tracker retention.
const TRACKER_MIN_RETENTION: Duration = Duration::from_millis(1000);

/// Correlation settings.
#[derive(Debug, Clone, Copy)]
pub struct CoreConfig {
    pub timeout_ms: u64,
    pub max_line_length: usize,
    pub max_stderr_bytes: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            max_stderr_bytes: DEFAULT_MAX_STDERR_BYTES,
        }
    }
}

/// Invoked at most once when the bridge enters the fatal state, so an
/// upper layer can recreate it. The core never restarts anything itself.
pub type FatalCallback = Box<dyn FnOnce(String) + Send>;

enum CoreCommand {
    Send {
        method: RequestMethod,
        params: RequestParams,
        /// Skip envelope decoding; resolve with the raw JSON payload.
        raw: bool,
        reply: oneshot::Sender<BridgeResult<PyValue>>,
    },
    TimedOut {
        id: RequestId,
    },
    Dispose {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running core task.
#[derive(Debug, Clone)]
pub struct BridgeCore {
    cmd_tx: mpsc::UnboundedSender<CoreCommand>,
    pending_count: Arc<AtomicUsize>,
}

impl BridgeCore {
    /// Initialize the transport and start the IO task.
    pub async fn spawn(
        mut transport: Box<dyn Transport>,
        config: CoreConfig,
        codec: CodecOptions,
        on_fatal: Option<FatalCallback>,
    ) -> BridgeResult<Self> {
        transport.init().await?;
        let events = transport.take_events();

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let pending_count = Arc::new(AtomicUsize::new(0));

        let task = CoreTask {
            transport,
            events,
            cmd_rx,
            cmd_tx: cmd_tx.clone(),
            config,
            codec,
            pending: HashMap::new(),
            timed_out: HashMap::new(),
            next_id: 1,
            line_buf: LineBuffer::new(config.max_line_length),
            stderr: StderrTail::new(config.max_stderr_bytes),
            fatal: None,
            disposed: false,
            on_fatal,
        };
        tokio::spawn(task.run());

        Ok(Self {
            cmd_tx,
            pending_count,
        })
    }

    /// Send one request and await its decoded result.
    pub async fn request(
        &self,
        method: RequestMethod,
        params: RequestParams,
    ) -> BridgeResult<PyValue> {
        self.request_inner(method, params, false).await
    }

    /// Send one request and await the raw JSON payload (no envelope
    /// decoding). Used for the `meta` handshake.
    pub async fn request_raw(
        &self,
        method: RequestMethod,
        params: RequestParams,
    ) -> BridgeResult<PyValue> {
        self.request_inner(method, params, true).await
    }

    async fn request_inner(
        &self,
        method: RequestMethod,
        params: RequestParams,
        raw: bool,
    ) -> BridgeResult<PyValue> {
        let (reply, rx) = oneshot::channel();
        self.pending_count.fetch_add(1, Ordering::SeqCst);

        let sent = self.cmd_tx.send(CoreCommand::Send {
            method,
            params,
            raw,
            reply,
        });
        let outcome = if sent.is_err() {
            Err(BridgeError::Disposed)
        } else {
            rx.await.unwrap_or(Err(BridgeError::Disposed))
        };

        self.pending_count.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    /// Enqueue a request without waiting for its result. Used for
    /// best-effort cleanup (scoped instance drop).
    pub fn request_detached(&self, method: RequestMethod, params: RequestParams) {
        let (reply, _rx) = oneshot::channel();
        let _ = self.cmd_tx.send(CoreCommand::Send {
            method,
            params,
            raw: true,
            reply,
        });
    }

    /// In-flight requests submitted through this handle.
    pub fn pending_requests(&self) -> usize {
        self.pending_count.load(Ordering::SeqCst)
    }

    /// Reject all pending requests and tear down the transport.
    pub async fn dispose(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(CoreCommand::Dispose { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct PendingEntry {
    reply: oneshot::Sender<BridgeResult<PyValue>>,
    raw: bool,
}

enum Step {
    Command(Option<CoreCommand>),
    Event(Option<TransportEvent>),
}

struct CoreTask {
    transport: Box<dyn Transport>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    cmd_rx: mpsc::UnboundedReceiver<CoreCommand>,
    cmd_tx: mpsc::UnboundedSender<CoreCommand>,
    config: CoreConfig,
    codec: CodecOptions,
    pending: HashMap<RequestId, PendingEntry>,
    /// Requests whose timer fired: a late response with one of these ids
    /// is dropped silently. Entries expire to bound memory.
    timed_out: HashMap<RequestId, Instant>,
    next_id: u64,
    line_buf: LineBuffer,
    stderr: StderrTail,
    fatal: Option<String>,
    disposed: bool,
    on_fatal: Option<FatalCallback>,
}

impl CoreTask {
    async fn run(mut self) {
        loop {
            let step = {
                let events = &mut self.events;
                tokio::select! {
                    cmd = self.cmd_rx.recv() => Step::Command(cmd),
                    event = async {
                        match events.as_mut() {
                            Some(rx) => rx.recv().await,
                            None => std::future::pending().await,
                        }
                    } => Step::Event(event),
                }
            };

            match step {
                Step::Command(Some(CoreCommand::Send {
                    method,
                    params,
                    raw,
                    reply,
                })) => self.handle_send(method, params, raw, reply).await,
                Step::Command(Some(CoreCommand::TimedOut { id })) => self.handle_timed_out(id),
                Step::Command(Some(CoreCommand::Dispose { reply })) => {
                    self.handle_dispose().await;
                    let _ = reply.send(());
                    break;
                }
                // Every handle dropped: tear down like a dispose.
                Step::Command(None) => {
                    self.handle_dispose().await;
                    break;
                }
                Step::Event(Some(event)) => self.handle_event(event).await,
                Step::Event(None) => {
                    self.events = None;
                }
            }
        }
    }

    async fn handle_send(
        &mut self,
        method: RequestMethod,
        params: RequestParams,
        raw: bool,
        reply: oneshot::Sender<BridgeResult<PyValue>>,
    ) {
        if self.disposed {
            let _ = reply.send(Err(BridgeError::Disposed));
            return;
        }
        if let Some(message) = &self.fatal {
            let _ = reply.send(Err(BridgeError::protocol(message.clone())));
            return;
        }

        self.prune_timed_out();

        let id = RequestId::new(self.next_id);
        self.next_id += 1;

        let frame = RequestFrame::new(id, method, params);
        // Serialization failures never reach the transport.
        let line = match codec::encode_request(&frame) {
            Ok(line) => line,
            Err(e) => {
                let _ = reply.send(Err(BridgeError::Codec(e)));
                return;
            }
        };

        let timeout = (self.config.timeout_ms > 0)
            .then(|| Duration::from_millis(self.config.timeout_ms));

        match self.transport.send(line, timeout, None).await {
            Ok(SendOutcome::Queued) => {
                self.pending.insert(id, PendingEntry { reply, raw });
                if let Some(timeout) = timeout {
                    let cmd_tx = self.cmd_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(timeout).await;
                        let _ = cmd_tx.send(CoreCommand::TimedOut { id });
                    });
                }
            }
            Ok(SendOutcome::Reply(line)) => {
                self.pending.insert(id, PendingEntry { reply, raw });
                self.handle_line(line).await;
            }
            Err(e) => {
                let fatal = e.is_fatal();
                let summary = e.to_string();
                let _ = reply.send(Err(e));
                if fatal {
                    self.enter_fatal(summary).await;
                }
            }
        }
    }

    fn handle_timed_out(&mut self, id: RequestId) {
        let Some(entry) = self.pending.remove(&id) else {
            // Already resolved; the timer has nothing to do.
            return;
        };

        let retention =
            TRACKER_MIN_RETENTION.max(Duration::from_millis(self.config.timeout_ms) * 2);
        self.timed_out.insert(id, Instant::now() + retention);

        let _ = entry.reply.send(Err(BridgeError::timeout(
            id,
            self.config.timeout_ms,
            self.stderr.tail(),
        )));
    }

    fn prune_timed_out(&mut self) {
        let now = Instant::now();
        self.timed_out.retain(|_, expiry| *expiry > now);
    }

    async fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Stdout(chunk) => {
                if self.fatal.is_some() || self.disposed {
                    return;
                }
                match self.line_buf.push_chunk(&chunk) {
                    Ok(lines) => {
                        for line in lines {
                            self.handle_line(line).await;
                        }
                    }
                    Err(e) => self.enter_fatal(e.to_string()).await,
                }
            }
            TransportEvent::Stderr(chunk) => {
                self.stderr.push(&chunk);
            }
            TransportEvent::Exited { status } => {
                if self.disposed {
                    return;
                }
                let status = status
                    .map(|code| format!("exit code {}", code))
                    .unwrap_or_else(|| "unknown status".to_string());
                self.enter_fatal(ProtocolError::ProcessExited { status }.to_string())
                    .await;
            }
            TransportEvent::Failed { message } => {
                if self.disposed {
                    return;
                }
                self.enter_fatal(message).await;
            }
        }
    }

    async fn handle_line(&mut self, line: String) {
        self.prune_timed_out();

        let frame = match ResponseFrame::parse(&line) {
            Ok(frame) => frame,
            Err(e) => {
                self.enter_fatal(e.to_string()).await;
                return;
            }
        };

        let id = frame.id;
        let Some(entry) = self.pending.remove(&id) else {
            if self.timed_out.contains_key(&id) {
                debug!("Dropping late response for timed-out request {}", id);
                return;
            }
            let summary = format!(
                "{}{}",
                ProtocolError::UnknownId { id },
                payload_snippet(&line)
            );
            self.enter_fatal(summary).await;
            return;
        };

        let outcome = match frame.into_outcome() {
            Ok(value) => {
                if entry.raw {
                    Ok(PyValue::Opaque(value))
                } else {
                    codec::decode_value(value, &self.codec).map_err(BridgeError::Codec)
                }
            }
            Err(payload) => Err(BridgeError::Execution {
                kind: payload.kind,
                message: payload.message,
                traceback: payload.traceback,
            }),
        };

        let _ = entry.reply.send(outcome);
    }

    /// Fatal-state discipline: reject everything pending with the summary
    /// plus the stderr tail, notify the supervisor once, kill the worker,
    /// refuse all later sends.
    async fn enter_fatal(&mut self, summary: String) {
        if self.fatal.is_some() || self.disposed {
            return;
        }

        let message = compose_with_stderr(summary, self.stderr.tail());
        warn!("Bridge entering fatal state: {}", message);
        self.fatal = Some(message.clone());

        for (_, entry) in self.pending.drain() {
            let _ = entry
                .reply
                .send(Err(BridgeError::protocol(message.clone())));
        }

        if let Some(callback) = self.on_fatal.take() {
            callback(message);
        }

        self.transport.dispose().await;
    }

    async fn handle_dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for (_, entry) in self.pending.drain() {
            let _ = entry.reply.send(Err(BridgeError::Disposed));
        }
        self.transport.dispose().await;
    }
}
