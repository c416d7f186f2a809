//! Transport abstraction: move one frame, surface process events.

use crate::cancel::CancellationToken;
use crate::error::BridgeResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// Events a transport surfaces to the bridge core.
#[derive(Debug)]
pub enum TransportEvent {
    /// Raw stdout bytes. Framing (newline splitting, size limits) is the
    /// core's job, not the transport's.
    Stdout(Vec<u8>),
    /// Raw stderr bytes; free-form diagnostics, never parsed.
    Stderr(Vec<u8>),
    /// Worker process exited. `status` is the exit code when known.
    Exited { status: Option<i32> },
    /// Transport-level failure (I/O on the child pipes, etc.).
    Failed { message: String },
}

/// How a `send` completed.
#[derive(Debug)]
pub enum SendOutcome {
    /// Frame written; the response will arrive via the event stream.
    Queued,
    /// Stateless transports answer inline with the response frame.
    Reply(String),
}

/// One frame out, events in. Frames are opaque strings here.
#[async_trait]
pub trait Transport: Send {
    /// Prepare the transport (spawn the worker, build the client, ...).
    async fn init(&mut self) -> BridgeResult<()>;

    /// True once `init` succeeded and the transport has not been disposed.
    fn is_ready(&self) -> bool;

    /// Send a single frame (no trailing newline).
    ///
    /// `timeout` and `cancel` only bind transports that answer inline;
    /// stream transports return [`SendOutcome::Queued`] immediately and
    /// leave timing to the core.
    async fn send(
        &mut self,
        frame: String,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> BridgeResult<SendOutcome>;

    /// Hand over the event stream. Called once by the core after `init`;
    /// subsequent calls return `None`.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>>;

    /// Tear down: kill the worker, drop connections. Idempotent.
    async fn dispose(&mut self);
}
