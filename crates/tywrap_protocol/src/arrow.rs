//! Process-wide Arrow decoder slot.
//!
//! The codec never links a binary columnar library itself. Consumers that
//! want the Arrow fast path register a decoder once at startup; everyone
//! else falls back to the JSON payloads. Registration is idempotent and
//! must happen explicitly — never during import/static init.

use crate::value::ArrayData;
use std::sync::{Arc, RwLock};

/// Columns produced by a binary decoder, in worker order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedColumns {
    pub columns: Vec<(String, ArrayData)>,
    pub num_rows: usize,
}

/// Converts a binary columnar payload into typed column buffers.
pub trait ArrowDecode: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedColumns, String>;
}

static ARROW_DECODER: RwLock<Option<Arc<dyn ArrowDecode>>> = RwLock::new(None);

/// Install the process-wide Arrow decoder. Replaces any previous decoder.
pub fn register_arrow_decoder(decoder: Arc<dyn ArrowDecode>) {
    let mut slot = ARROW_DECODER.write().expect("arrow decoder slot poisoned");
    *slot = Some(decoder);
}

/// Remove the process-wide Arrow decoder (test isolation).
pub fn clear_arrow_decoder() {
    let mut slot = ARROW_DECODER.write().expect("arrow decoder slot poisoned");
    *slot = None;
}

/// Current decoder, if one is registered.
pub fn arrow_decoder() -> Option<Arc<dyn ArrowDecode>> {
    ARROW_DECODER
        .read()
        .expect("arrow decoder slot poisoned")
        .clone()
}


#[cfg(test)]
mod tests {
    use super::*;

    struct NoopDecoder;

    impl ArrowDecode for NoopDecoder {
        fn decode(&self, _bytes: &[u8]) -> Result<DecodedColumns, String> {
            Ok(DecodedColumns {
                columns: vec![],
                num_rows: 0,
            })
        }
    }

    #[test]
    fn test_register_and_clear() {
        let _guard = test_support::lock_slot();

        assert!(arrow_decoder().is_none());

        register_arrow_decoder(Arc::new(NoopDecoder));
        assert!(arrow_decoder().is_some());

        // Idempotent to write twice
        register_arrow_decoder(Arc::new(NoopDecoder));
        assert!(arrow_decoder().is_some());

        clear_arrow_decoder();
        assert!(arrow_decoder().is_none());
    }
}
