//! Runtime bridge between a host process and a Python worker.
//!
//! Design principles:
//! - One dedicated IO task per bridge owns the pending-request table;
//!   callers submit over a channel and await a one-shot result
//! - Transports are dumb: they move opaque frame strings and surface
//!   process events, nothing else
//! - Fatal is sticky: after a protocol violation or worker exit every
//!   pending call is rejected and the bridge refuses new work

pub mod arrow_ipc;
pub mod bridge;
pub mod cancel;
pub mod core;
pub mod env;
pub mod error;
pub mod http;
pub mod line_buffer;
pub mod naming;
pub mod pool;
pub mod registry;
pub mod shim;
pub mod stderr_tail;
pub mod stdio;
pub mod transport;

pub use arrow_ipc::register_arrow_ipc_decoder;
pub use bridge::{BridgeConfig, InstanceHandle, RuntimeBridge, ScopedInstance};
pub use cancel::CancellationToken;
pub use self::core::{BridgeCore, CoreConfig};
pub use error::{BridgeError, BridgeResult};
pub use http::{HttpBridgeConfig, HttpTransport};
pub use pool::{BridgePool, DispatchPolicy};
pub use registry::{active_runtime, clear_runtime, configure_runtime};
pub use stdio::{StdioConfig, StdioTransport};
pub use transport::{SendOutcome, Transport, TransportEvent};
