//! Process-wide slot for the active runtime bridge.
//!
//! Generated wrapper modules resolve their bridge through here. The slot
//! does not own the bridge: clearing it never disposes anything.

use crate::bridge::RuntimeBridge;
use crate::error::{BridgeError, BridgeResult};
use std::sync::{Arc, RwLock};

static ACTIVE_BRIDGE: RwLock<Option<Arc<RuntimeBridge>>> = RwLock::new(None);

/// Install the active bridge. Idempotent; replaces any previous bridge
/// without disposing it.
pub fn configure_runtime(bridge: Arc<RuntimeBridge>) {
    let mut slot = ACTIVE_BRIDGE.write().expect("runtime slot poisoned");
    *slot = Some(bridge);
}

/// Clear the slot (test isolation). The bridge is left running.
pub fn clear_runtime() {
    let mut slot = ACTIVE_BRIDGE.write().expect("runtime slot poisoned");
    *slot = None;
}

/// Resolve the active bridge for a generated wrapper call.
pub fn active_runtime() -> BridgeResult<Arc<RuntimeBridge>> {
    ACTIVE_BRIDGE
        .read()
        .expect("runtime slot poisoned")
        .clone()
        .ok_or(BridgeError::NotConfigured)
}
