//! In-process transport double: scripted worker behavior, no Python.

// Each test binary uses its own subset of these helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tywrap_bridge::{BridgeResult, CancellationToken, SendOutcome, Transport, TransportEvent};

pub type Behavior = Box<dyn FnMut(&str, &mpsc::UnboundedSender<TransportEvent>) + Send>;

/// Test-side view of a [`MockTransport`]: inject events, inspect frames.
#[derive(Clone)]
pub struct MockWorker {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub sent: Arc<Mutex<Vec<String>>>,
    pub disposed: Arc<AtomicBool>,
}

impl MockWorker {
    pub fn sent_frames(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn respond(&self, line: impl Into<String>) {
        respond_line(&self.events, line);
    }

    pub fn stderr(&self, text: &str) {
        let _ = self.events.send(TransportEvent::Stderr(text.as_bytes().to_vec()));
    }

    pub fn exit(&self, status: i32) {
        let _ = self.events.send(TransportEvent::Exited {
            status: Some(status),
        });
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

/// Transport whose "worker" is a closure invoked per sent frame.
pub struct MockTransport {
    behavior: Behavior,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    sent: Arc<Mutex<Vec<String>>>,
    disposed: Arc<AtomicBool>,
    ready: bool,
}

impl MockTransport {
    pub fn new(
        behavior: impl FnMut(&str, &mpsc::UnboundedSender<TransportEvent>) + Send + 'static,
    ) -> (Self, MockWorker) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let disposed = Arc::new(AtomicBool::new(false));
        let worker = MockWorker {
            events: events_tx.clone(),
            sent: Arc::clone(&sent),
            disposed: Arc::clone(&disposed),
        };
        (
            Self {
                behavior: Box::new(behavior),
                events_tx,
                events_rx: Some(events_rx),
                sent,
                disposed,
                ready: false,
            },
            worker,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn init(&mut self) -> BridgeResult<()> {
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
        self.sent.lock().unwrap().push(frame.clone());
        (self.behavior)(&frame, &self.events_tx);
        Ok(SendOutcome::Queued)
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<TransportEvent>> {
        self.events_rx.take()
    }

    async fn dispose(&mut self) {
        self.ready = false;
        self.disposed.store(true, Ordering::SeqCst);
    }
}

/// Push one stdout line (newline appended) into the core.
pub fn respond_line(tx: &mpsc::UnboundedSender<TransportEvent>, line: impl Into<String>) {
    let mut bytes = line.into().into_bytes();
    bytes.push(b'\n');
    let _ = tx.send(TransportEvent::Stdout(bytes));
}

pub fn frame_json(frame: &str) -> serde_json::Value {
    serde_json::from_str(frame).expect("sent frame should be valid JSON")
}

pub fn frame_id(frame: &str) -> u64 {
    frame_json(frame)["id"].as_u64().expect("frame should carry an id")
}

pub fn frame_method(frame: &str) -> String {
    frame_json(frame)["method"]
        .as_str()
        .unwrap_or_default()
        .to_string()
}

/// A well-formed `meta` response for the handshake.
pub fn bridge_info_line(id: u64) -> String {
    format!(
        concat!(
            r#"{{"protocol":"tywrap/1","id":{},"result":{{"#,
            r#""protocol":"tywrap/1","protocolVersion":1,"bridge":"python-subprocess","#,
            r#""pythonVersion":"3.12.0","pid":4242,"codecFallback":"json","#,
            r#""arrowAvailable":false,"instances":0}}}}"#
        ),
        id
    )
}

/// Behavior answering `meta` requests; returns true when handled.
pub fn answer_meta(frame: &str, tx: &mpsc::UnboundedSender<TransportEvent>) -> bool {
    if frame_method(frame) == "meta" {
        respond_line(tx, bridge_info_line(frame_id(frame)));
        true
    } else {
        false
    }
}

pub fn result_line(id: u64, result: &serde_json::Value) -> String {
    format!(r#"{{"protocol":"tywrap/1","id":{},"result":{}}}"#, id, result)
}
