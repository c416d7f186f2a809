//! Line-delimited JSON RPC protocol between a host process and a Python
//! worker.
//!
//! # Protocol Specification
//!
//! One frame per line, UTF-8, terminated by `\n`:
//! ```text
//! {"protocol":"tywrap/1","id":1,"method":"call","params":{...}}
//! {"protocol":"tywrap/1","id":1,"result":3}
//! ```
//!
//! - `protocol` (string): fixed discriminator, `tywrap/1`
//! - `id` (u64): strictly increasing per bridge instance
//! - request: `method` + method-specific `params`
//! - response: exactly one of `result` / `error`
//!
//! Non-scalar Python values travel as tagged envelopes (discriminator
//! `__tywrap__`) decoded by the [`codec`] module. Unknown tags pass
//! through untouched.

pub mod arrow;
pub mod codec;
pub mod error;
pub mod frames;
pub mod value;

pub use arrow::{clear_arrow_decoder, register_arrow_decoder, ArrowDecode, DecodedColumns};
pub use codec::{decode_value, encode_request, encode_value, CodecOptions};
pub use error::{CodecError, CodecPhase, ProtocolError};
pub use frames::{
    BridgeInfo, CallMethodParams, CallParams, CodecFallback, DisposeInstanceParams, ErrorPayload,
    InstantiateParams, MetaParams, RequestFrame, RequestId, RequestMethod, RequestParams,
    ResponseFrame, BRIDGE_KIND, PROTOCOL, PROTOCOL_VERSION,
};
pub use value::{
    ArrayData, DataFrame, Estimator, NdArray, PyValue, Series, Sparse, Tensor, CODEC_VERSION,
    ENVELOPE_TAG,
};
