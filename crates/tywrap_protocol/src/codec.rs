//! Tagged-envelope value codec.
//!
//! Encode turns host values into the JSON a request frame carries; decode
//! walks a response payload and materializes envelope kinds into typed
//! values. The codec is pure: no I/O, no bridge state. The only global it
//! consults is the optional Arrow decoder slot in [`crate::arrow`].

use crate::arrow::arrow_decoder;
use crate::error::CodecError;
use crate::frames::RequestFrame;
use crate::value::{
    ArrayData, DataFrame, Estimator, NdArray, PyValue, Series, Sparse, Tensor, CODEC_VERSION,
    ENVELOPE_TAG, TAG_DATAFRAME, TAG_ESTIMATOR, TAG_NDARRAY, TAG_SERIES, TAG_SPARSE, TAG_TENSOR,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::{json, Map, Number, Value};
use std::collections::BTreeMap;

/// Codec behavior switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodecOptions {
    /// Strict mode: reject NaN and ±Infinity at encode time and re-scan
    /// the fully decoded tree (binary decoders can introduce them).
    pub reject_special_floats: bool,
    /// When an Arrow payload cannot be decoded and no JSON fallback is
    /// present, return the raw envelope instead of failing.
    pub lenient_arrow: bool,
}

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Serialize a request frame to one wire line (without the trailing `\n`).
///
/// Serialization failures never reach a transport: callers must treat an
/// `Err` here as a per-call failure with nothing written.
pub fn encode_request(frame: &RequestFrame) -> Result<String, CodecError> {
    let line = serde_json::to_string(frame).map_err(|e| {
        CodecError::encode(format!("JSON serialization failed: {}", e), None, None)
    })?;
    // serde_json escapes newlines inside strings; a raw newline here would
    // break framing for every later frame on the connection.
    if line.contains('\n') {
        return Err(CodecError::encode(
            "JSON serialization failed: frame contains an embedded newline",
            None,
            None,
        ));
    }
    Ok(line)
}

/// Encode one host value into request-ready JSON.
pub fn encode_value(value: &PyValue, opts: &CodecOptions) -> Result<Value, CodecError> {
    encode_node(value, opts, &mut PathTracker::root())
}

struct PathTracker {
    segments: Vec<String>,
}

impl PathTracker {
    fn root() -> Self {
        Self { segments: vec![] }
    }

    fn push(&mut self, segment: String) {
        self.segments.push(segment);
    }

    fn pop(&mut self) {
        self.segments.pop();
    }

    fn render(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.segments {
            out.push_str(segment);
        }
        out
    }
}

fn encode_node(value: &PyValue, opts: &CodecOptions, path: &mut PathTracker) -> Result<Value, CodecError> {
    match value {
        PyValue::Null => Ok(Value::Null),
        PyValue::Bool(b) => Ok(Value::Bool(*b)),
        PyValue::Int(i) => Ok(Value::Number((*i).into())),
        PyValue::Float(f) => encode_float(*f, opts, path),
        PyValue::Str(s) => Ok(Value::String(s.clone())),
        PyValue::List(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                path.push(format!("[{}]", i));
                out.push(encode_node(item, opts, path)?);
                path.pop();
            }
            Ok(Value::Array(out))
        }
        PyValue::Dict(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                path.push(format!(".{}", key));
                out.insert(key.clone(), encode_node(item, opts, path)?);
                path.pop();
            }
            Ok(Value::Object(out))
        }
        PyValue::NdArray(array) => encode_ndarray(array, opts, path),
        PyValue::DataFrame(df) => encode_dataframe(df, opts, path),
        PyValue::Series(series) => encode_series(series, opts, path),
        PyValue::Sparse(sparse) => encode_sparse(sparse, opts, path),
        PyValue::Tensor(tensor) => {
            path.push(".value".to_string());
            let inner = encode_ndarray(&tensor.value, opts, path)?;
            path.pop();
            Ok(json!({
                ENVELOPE_TAG: TAG_TENSOR,
                "codecVersion": CODEC_VERSION,
                "value": inner,
                "shape": &tensor.shape,
                "dtype": &tensor.dtype,
                "device": &tensor.device,
            }))
        }
        PyValue::Estimator(estimator) => Ok(json!({
            ENVELOPE_TAG: TAG_ESTIMATOR,
            "codecVersion": CODEC_VERSION,
            "className": &estimator.class_name,
            "module": &estimator.module,
            "version": &estimator.version,
            "params": &estimator.params,
        })),
        PyValue::Opaque(raw) => Ok(raw.clone()),
    }
}

fn encode_float(f: f64, opts: &CodecOptions, path: &PathTracker) -> Result<Value, CodecError> {
    match Number::from_f64(f) {
        Some(n) => Ok(Value::Number(n)),
        None => {
            if opts.reject_special_floats {
                Err(CodecError::encode(
                    "non-finite number is not representable in JSON",
                    Some(path.render()),
                    Some("f64".to_string()),
                ))
            } else {
                // JSON.stringify semantics: NaN/Infinity degrade to null.
                Ok(Value::Null)
            }
        }
    }
}

fn encode_array_data(data: &ArrayData, opts: &CodecOptions, path: &mut PathTracker) -> Result<Value, CodecError> {
    match data {
        ArrayData::Bool(v) => Ok(json!(v)),
        ArrayData::Int(v) => Ok(json!(v)),
        ArrayData::Str(v) => Ok(json!(v)),
        ArrayData::Float(v) => {
            let mut out = Vec::with_capacity(v.len());
            for (i, f) in v.iter().enumerate() {
                path.push(format!("[{}]", i));
                out.push(encode_float(*f, opts, path)?);
                path.pop();
            }
            Ok(Value::Array(out))
        }
    }
}

fn encode_ndarray(array: &NdArray, opts: &CodecOptions, path: &mut PathTracker) -> Result<Value, CodecError> {
    path.push(".data".to_string());
    let data = encode_array_data(&array.data, opts, path)?;
    path.pop();
    Ok(json!({
        ENVELOPE_TAG: TAG_NDARRAY,
        "codecVersion": CODEC_VERSION,
        "encoding": "json",
        "data": data,
        "shape": &array.shape,
        "dtype": &array.dtype,
    }))
}

fn encode_dataframe(df: &DataFrame, opts: &CodecOptions, path: &mut PathTracker) -> Result<Value, CodecError> {
    let mut data = Map::new();
    for (column, values) in &df.data {
        path.push(format!(".data.{}", column));
        data.insert(column.clone(), encode_array_data(values, opts, path)?);
        path.pop();
    }
    Ok(json!({
        ENVELOPE_TAG: TAG_DATAFRAME,
        "codecVersion": CODEC_VERSION,
        "encoding": "json",
        "columns": &df.columns,
        "data": data,
        "numRows": df.num_rows,
    }))
}

fn encode_series(series: &Series, opts: &CodecOptions, path: &mut PathTracker) -> Result<Value, CodecError> {
    path.push(".data".to_string());
    let data = encode_array_data(&series.data, opts, path)?;
    path.pop();
    Ok(json!({
        ENVELOPE_TAG: TAG_SERIES,
        "codecVersion": CODEC_VERSION,
        "encoding": "json",
        "name": &series.name,
        "data": data,
    }))
}

fn encode_sparse(sparse: &Sparse, opts: &CodecOptions, path: &mut PathTracker) -> Result<Value, CodecError> {
    let mut data = Vec::with_capacity(sparse.data.len());
    for (i, f) in sparse.data.iter().enumerate() {
        path.push(format!(".data[{}]", i));
        data.push(encode_float(*f, opts, path)?);
        path.pop();
    }
    Ok(json!({
        ENVELOPE_TAG: TAG_SPARSE,
        "codecVersion": CODEC_VERSION,
        "format": &sparse.format,
        "shape": &sparse.shape,
        "data": data,
        "indices": &sparse.indices,
        "indptr": &sparse.indptr,
    }))
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Decode one response payload into a host value.
pub fn decode_value(value: Value, opts: &CodecOptions) -> Result<PyValue, CodecError> {
    let decoded = decode_node(value, opts)?;
    if opts.reject_special_floats {
        ensure_finite(&decoded)?;
    }
    Ok(decoded)
}

fn decode_node(value: Value, opts: &CodecOptions) -> Result<PyValue, CodecError> {
    match value {
        Value::Null => Ok(PyValue::Null),
        Value::Bool(b) => Ok(PyValue::Bool(b)),
        Value::Number(n) => Ok(decode_number(&n)),
        Value::String(s) => Ok(PyValue::Str(s)),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(decode_node(item, opts)?);
            }
            Ok(PyValue::List(out))
        }
        Value::Object(map) => match map.get(ENVELOPE_TAG).and_then(Value::as_str) {
            Some(tag) => {
                let tag = tag.to_string();
                decode_envelope(&tag, map, opts)
            }
            None => {
                let mut out = BTreeMap::new();
                for (key, item) in map {
                    out.insert(key, decode_node(item, opts)?);
                }
                Ok(PyValue::Dict(out))
            }
        },
    }
}

fn decode_number(n: &Number) -> PyValue {
    if let Some(i) = n.as_i64() {
        PyValue::Int(i)
    } else {
        PyValue::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

fn decode_envelope(tag: &str, map: Map<String, Value>, opts: &CodecOptions) -> Result<PyValue, CodecError> {
    // Future envelope versions pass through untouched.
    let version = map.get("codecVersion").and_then(Value::as_u64).unwrap_or(1);
    if version > CODEC_VERSION as u64 {
        return Ok(PyValue::Opaque(Value::Object(map)));
    }

    match tag {
        TAG_NDARRAY => decode_ndarray(map, opts),
        TAG_DATAFRAME => decode_dataframe(map, opts),
        TAG_SERIES => decode_series(map, opts),
        TAG_SPARSE => decode_sparse(map),
        TAG_TENSOR => decode_tensor(map, opts),
        TAG_ESTIMATOR => decode_estimator(map),
        // Unknown tags decode to the raw object (forward compatibility).
        _ => Ok(PyValue::Opaque(Value::Object(map))),
    }
}

/// Outcome of resolving an envelope's columnar payload.
enum Payload {
    Columns(crate::arrow::DecodedColumns),
    Json(Value),
    Passthrough,
}

/// Resolve `encoding: "arrow"` vs `encoding: "json"` per the envelope's
/// fields and the process-wide decoder slot.
fn resolve_payload(tag: &str, map: &Map<String, Value>, opts: &CodecOptions) -> Result<Payload, CodecError> {
    let encoding = map.get("encoding").and_then(Value::as_str).unwrap_or("json");

    if encoding == "arrow" {
        let bytes_b64 = map.get("bytes").and_then(Value::as_str);
        if let (Some(decoder), Some(bytes_b64)) = (arrow_decoder(), bytes_b64) {
            let bytes = general_purpose::STANDARD.decode(bytes_b64).map_err(|e| {
                CodecError::decode(
                    format!("invalid base64 in {} envelope: {}", tag, e),
                    None,
                    Some(tag.to_string()),
                )
            })?;
            let columns = decoder.decode(&bytes).map_err(|e| {
                CodecError::decode(
                    format!("Arrow decode failed for {} envelope: {}", tag, e),
                    None,
                    Some(tag.to_string()),
                )
            })?;
            return Ok(Payload::Columns(columns));
        }

        // No decoder (or no bytes): fall back to the JSON payload.
        if let Some(data) = map.get("data") {
            return Ok(Payload::Json(data.clone()));
        }
        if opts.lenient_arrow {
            return Ok(Payload::Passthrough);
        }
        return Err(CodecError::decode(
            format!(
                "Arrow decoder not registered and {} envelope carries no JSON fallback",
                tag
            ),
            None,
            Some(tag.to_string()),
        ));
    }

    match map.get("data") {
        Some(data) => Ok(Payload::Json(data.clone())),
        None => Err(CodecError::decode(
            format!("{} envelope is missing its data field", tag),
            None,
            Some(tag.to_string()),
        )),
    }
}

fn decode_ndarray(map: Map<String, Value>, opts: &CodecOptions) -> Result<PyValue, CodecError> {
    let shape = get_usize_vec(&map, "shape", TAG_NDARRAY)?;
    let dtype = map.get("dtype").and_then(Value::as_str).map(str::to_string);

    let data = match resolve_payload(TAG_NDARRAY, &map, opts)? {
        Payload::Columns(columns) => first_column(columns, TAG_NDARRAY)?,
        Payload::Json(data) => array_data_from_json(&data, TAG_NDARRAY)?,
        Payload::Passthrough => return Ok(PyValue::Opaque(Value::Object(map))),
    };

    Ok(PyValue::NdArray(NdArray { shape, dtype, data }))
}

fn decode_dataframe(map: Map<String, Value>, opts: &CodecOptions) -> Result<PyValue, CodecError> {
    match resolve_payload(TAG_DATAFRAME, &map, opts)? {
        Payload::Columns(columns) => {
            let num_rows = columns.num_rows;
            let mut order = Vec::with_capacity(columns.columns.len());
            let mut data = BTreeMap::new();
            for (name, values) in columns.columns {
                order.push(name.clone());
                data.insert(name, values);
            }
            Ok(PyValue::DataFrame(DataFrame {
                columns: order,
                data,
                num_rows,
            }))
        }
        Payload::Json(json_data) => {
            let object = json_data.as_object().ok_or_else(|| {
                CodecError::decode(
                    "dataframe envelope data must be an object of columns",
                    None,
                    Some(TAG_DATAFRAME.to_string()),
                )
            })?;
            let mut data = BTreeMap::new();
            let mut num_rows = 0;
            for (name, values) in object {
                let column = array_data_from_json(values, TAG_DATAFRAME)?;
                num_rows = num_rows.max(column.len());
                data.insert(name.clone(), column);
            }
            let columns = match get_string_vec(&map, "columns") {
                Some(order) => order,
                None => data.keys().cloned().collect(),
            };
            Ok(PyValue::DataFrame(DataFrame {
                columns,
                data,
                num_rows,
            }))
        }
        Payload::Passthrough => Ok(PyValue::Opaque(Value::Object(map))),
    }
}

fn decode_series(map: Map<String, Value>, opts: &CodecOptions) -> Result<PyValue, CodecError> {
    let name = map.get("name").and_then(Value::as_str).map(str::to_string);
    let data = match resolve_payload(TAG_SERIES, &map, opts)? {
        Payload::Columns(columns) => first_column(columns, TAG_SERIES)?,
        Payload::Json(data) => array_data_from_json(&data, TAG_SERIES)?,
        Payload::Passthrough => return Ok(PyValue::Opaque(Value::Object(map))),
    };
    Ok(PyValue::Series(Series { name, data }))
}

fn decode_sparse(map: Map<String, Value>) -> Result<PyValue, CodecError> {
    let format = get_str(&map, "format", TAG_SPARSE)?;
    let shape = get_usize_vec(&map, "shape", TAG_SPARSE)?;
    let data = get_f64_vec(&map, "data", TAG_SPARSE)?;
    let indices = get_i64_vec(&map, "indices", TAG_SPARSE)?;
    let indptr = get_i64_vec(&map, "indptr", TAG_SPARSE)?;
    Ok(PyValue::Sparse(Sparse {
        format,
        shape,
        data,
        indices,
        indptr,
    }))
}

fn decode_tensor(mut map: Map<String, Value>, opts: &CodecOptions) -> Result<PyValue, CodecError> {
    let inner = map.remove("value").ok_or_else(|| {
        CodecError::decode(
            "tensor envelope is missing its value field",
            None,
            Some(TAG_TENSOR.to_string()),
        )
    })?;
    let value = match decode_node(inner, opts)? {
        PyValue::NdArray(array) => array,
        other => {
            return Err(CodecError::decode(
                format!("tensor envelope value decoded to {}, expected ndarray", other.type_name()),
                None,
                Some(TAG_TENSOR.to_string()),
            ))
        }
    };
    let shape = get_usize_vec(&map, "shape", TAG_TENSOR)?;
    let dtype = get_str(&map, "dtype", TAG_TENSOR)?;
    let device = get_str(&map, "device", TAG_TENSOR)?;
    Ok(PyValue::Tensor(Tensor {
        value,
        shape,
        dtype,
        device,
    }))
}

fn decode_estimator(map: Map<String, Value>) -> Result<PyValue, CodecError> {
    let class_name = get_str(&map, "className", TAG_ESTIMATOR)?;
    let module = get_str(&map, "module", TAG_ESTIMATOR)?;
    let version = map.get("version").and_then(Value::as_str).map(str::to_string);
    let params = map.get("params").cloned().unwrap_or(Value::Null);
    Ok(PyValue::Estimator(Estimator {
        class_name,
        module,
        version,
        params,
    }))
}

// ---------------------------------------------------------------------------
// Post-decode validation
// ---------------------------------------------------------------------------

fn ensure_finite(value: &PyValue) -> Result<(), CodecError> {
    let non_finite = |kind: &str| {
        CodecError::decode(
            "non-finite number in decoded value",
            None,
            Some(kind.to_string()),
        )
    };

    match value {
        PyValue::Float(f) if !f.is_finite() => Err(non_finite("f64")),
        PyValue::List(items) => items.iter().try_for_each(ensure_finite),
        PyValue::Dict(map) => map.values().try_for_each(ensure_finite),
        PyValue::NdArray(array) if array.data.has_non_finite() => Err(non_finite("ndarray")),
        PyValue::DataFrame(df) if df.data.values().any(ArrayData::has_non_finite) => {
            Err(non_finite("dataframe"))
        }
        PyValue::Series(series) if series.data.has_non_finite() => Err(non_finite("series")),
        PyValue::Sparse(sparse) if sparse.data.iter().any(|f| !f.is_finite()) => {
            Err(non_finite("sparse"))
        }
        PyValue::Tensor(tensor) if tensor.value.data.has_non_finite() => Err(non_finite("tensor")),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

fn missing(tag: &str, key: &str) -> CodecError {
    CodecError::decode(
        format!("{} envelope is missing field {:?}", tag, key),
        None,
        Some(tag.to_string()),
    )
}

fn get_str(map: &Map<String, Value>, key: &str, tag: &str) -> Result<String, CodecError> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| missing(tag, key))
}

fn get_string_vec(map: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    let items = map.get(key)?.as_array()?;
    items
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect()
}

fn get_usize_vec(map: &Map<String, Value>, key: &str, tag: &str) -> Result<Vec<usize>, CodecError> {
    let items = map
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| missing(tag, key))?;
    items
        .iter()
        .map(|v| v.as_u64().map(|n| n as usize))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            CodecError::decode(
                format!("{} envelope field {:?} must be non-negative integers", tag, key),
                None,
                Some(tag.to_string()),
            )
        })
}

fn get_i64_vec(map: &Map<String, Value>, key: &str, tag: &str) -> Result<Vec<i64>, CodecError> {
    let items = map
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| missing(tag, key))?;
    items
        .iter()
        .map(Value::as_i64)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            CodecError::decode(
                format!("{} envelope field {:?} must be integers", tag, key),
                None,
                Some(tag.to_string()),
            )
        })
}

fn get_f64_vec(map: &Map<String, Value>, key: &str, tag: &str) -> Result<Vec<f64>, CodecError> {
    let items = map
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| missing(tag, key))?;
    items
        .iter()
        .map(Value::as_f64)
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| {
            CodecError::decode(
                format!("{} envelope field {:?} must be numbers", tag, key),
                None,
                Some(tag.to_string()),
            )
        })
}

/// Build a typed buffer from a JSON array, flattening nested lists
/// (ndarray payloads may be shipped nested per their shape).
fn array_data_from_json(data: &Value, tag: &str) -> Result<ArrayData, CodecError> {
    let mut flat = Vec::new();
    flatten_json(data, &mut flat, tag)?;

    // Classify on the first non-null element; promote ints to floats when
    // the buffer mixes the two. Nulls are only representable in float
    // buffers (as NaN).
    let mut saw_float = false;
    let mut saw_int = false;
    let mut saw_bool = false;
    let mut saw_str = false;
    let mut saw_null = false;
    for item in &flat {
        match item {
            Value::Number(n) if n.as_i64().is_some() => saw_int = true,
            Value::Number(_) => saw_float = true,
            Value::Bool(_) => saw_bool = true,
            Value::String(_) => saw_str = true,
            Value::Null => saw_null = true,
            other => {
                return Err(CodecError::decode(
                    format!("{} buffer holds unsupported element: {}", tag, other),
                    None,
                    Some(tag.to_string()),
                ))
            }
        }
    }

    let kinds = [saw_float || saw_int, saw_bool, saw_str]
        .iter()
        .filter(|&&k| k)
        .count();
    if kinds > 1 {
        return Err(CodecError::decode(
            format!("{} buffer mixes incompatible element types", tag),
            None,
            Some(tag.to_string()),
        ));
    }

    if saw_str {
        if saw_null {
            return Err(CodecError::decode(
                format!("{} string buffer contains null", tag),
                None,
                Some(tag.to_string()),
            ));
        }
        return Ok(ArrayData::Str(
            flat.iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect(),
        ));
    }
    if saw_bool {
        if saw_null {
            return Err(CodecError::decode(
                format!("{} bool buffer contains null", tag),
                None,
                Some(tag.to_string()),
            ));
        }
        return Ok(ArrayData::Bool(
            flat.iter().map(|v| v.as_bool().unwrap_or_default()).collect(),
        ));
    }
    if saw_float || saw_null {
        return Ok(ArrayData::Float(
            flat.iter()
                .map(|v| v.as_f64().unwrap_or(f64::NAN))
                .collect(),
        ));
    }
    Ok(ArrayData::Int(
        flat.iter().map(|v| v.as_i64().unwrap_or_default()).collect(),
    ))
}

fn flatten_json<'a>(data: &'a Value, out: &mut Vec<&'a Value>, tag: &str) -> Result<(), CodecError> {
    match data {
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Array(_) => flatten_json(item, out, tag)?,
                    other => out.push(other),
                }
            }
            Ok(())
        }
        _ => Err(CodecError::decode(
            format!("{} envelope data must be an array", tag),
            None,
            Some(tag.to_string()),
        )),
    }
}

fn first_column(columns: crate::arrow::DecodedColumns, tag: &str) -> Result<ArrayData, CodecError> {
    columns
        .columns
        .into_iter()
        .next()
        .map(|(_, data)| data)
        .ok_or_else(|| {
            CodecError::decode(
                format!("Arrow payload for {} envelope held no columns", tag),
                None,
                Some(tag.to_string()),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::{clear_arrow_decoder, register_arrow_decoder, test_support, ArrowDecode, DecodedColumns};
    use crate::frames::{CallParams, RequestFrame, RequestId, RequestMethod, RequestParams};
    use std::sync::Arc;

    fn lenient() -> CodecOptions {
        CodecOptions::default()
    }

    fn strict() -> CodecOptions {
        CodecOptions {
            reject_special_floats: true,
            lenient_arrow: false,
        }
    }

    #[test]
    fn test_scalar_roundtrip() {
        let value = PyValue::List(vec![
            PyValue::Null,
            PyValue::Bool(true),
            PyValue::Int(-7),
            PyValue::Float(2.5),
            PyValue::Str("hi".to_string()),
        ]);
        let encoded = encode_value(&value, &lenient()).unwrap();
        let decoded = decode_value(encoded, &lenient()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_encode_nan_strict_rejects_with_path() {
        let value = PyValue::Dict(
            [("x".to_string(), PyValue::List(vec![PyValue::Float(f64::NAN)]))]
                .into_iter()
                .collect(),
        );
        let err = encode_value(&value, &strict()).unwrap_err();
        assert!(err.to_string().contains("non-finite number"));
        assert_eq!(err.path.as_deref(), Some("$.x[0]"));
    }

    #[test]
    fn test_encode_nan_lenient_degrades_to_null() {
        let encoded = encode_value(&PyValue::Float(f64::INFINITY), &lenient()).unwrap();
        assert_eq!(encoded, Value::Null);
    }

    #[test]
    fn test_encode_request_line() {
        let frame = RequestFrame::new(
            RequestId::new(1),
            RequestMethod::Call,
            RequestParams::Call(CallParams {
                module: "math".to_string(),
                function_name: "sqrt".to_string(),
                args: vec![serde_json::json!(9)],
                kwargs: None,
            }),
        );
        let line = encode_request(&frame).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.starts_with(r#"{"protocol":"tywrap/1""#));
    }

    #[test]
    fn test_embedded_newline_in_string_is_escaped() {
        let frame = RequestFrame::new(
            RequestId::new(2),
            RequestMethod::Call,
            RequestParams::Call(CallParams {
                module: "m".to_string(),
                function_name: "f".to_string(),
                args: vec![serde_json::json!("line one\nline two")],
                kwargs: None,
            }),
        );
        let line = encode_request(&frame).unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains("\\n"));
    }

    #[test]
    fn test_decode_ndarray_json_envelope() {
        let envelope = serde_json::json!({
            "__tywrap__": "ndarray",
            "codecVersion": 1,
            "encoding": "json",
            "data": [[1.0, 2.0], [3.0, 4.0]],
            "shape": [2, 2],
            "dtype": "float64",
        });
        let decoded = decode_value(envelope, &lenient()).unwrap();
        assert_eq!(
            decoded,
            PyValue::NdArray(NdArray {
                shape: vec![2, 2],
                dtype: Some("float64".to_string()),
                data: ArrayData::Float(vec![1.0, 2.0, 3.0, 4.0]),
            })
        );
    }

    #[test]
    fn test_decode_int_buffer_stays_int() {
        let envelope = serde_json::json!({
            "__tywrap__": "ndarray",
            "encoding": "json",
            "data": [1, 2, 3],
            "shape": [3],
        });
        let decoded = decode_value(envelope, &lenient()).unwrap();
        match decoded {
            PyValue::NdArray(array) => assert_eq!(array.data, ArrayData::Int(vec![1, 2, 3])),
            other => panic!("expected ndarray, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_dataframe_json_envelope() {
        let envelope = serde_json::json!({
            "__tywrap__": "pandas.dataframe",
            "encoding": "json",
            "columns": ["name", "count"],
            "data": {"name": ["a", "b"], "count": [1, 2]},
            "numRows": 2,
        });
        let decoded = decode_value(envelope, &lenient()).unwrap();
        match decoded {
            PyValue::DataFrame(df) => {
                assert_eq!(df.columns, vec!["name", "count"]);
                assert_eq!(df.num_rows, 2);
                assert_eq!(df.data["count"], ArrayData::Int(vec![1, 2]));
                assert_eq!(
                    df.data["name"],
                    ArrayData::Str(vec!["a".to_string(), "b".to_string()])
                );
            }
            other => panic!("expected dataframe, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_sparse_envelope() {
        let envelope = serde_json::json!({
            "__tywrap__": "scipy.sparse",
            "format": "csr",
            "shape": [2, 2],
            "data": [1.0, 2.0],
            "indices": [0, 1],
            "indptr": [0, 1, 2],
        });
        let decoded = decode_value(envelope, &lenient()).unwrap();
        match decoded {
            PyValue::Sparse(sparse) => {
                assert_eq!(sparse.format, "csr");
                assert_eq!(sparse.indptr, vec![0, 1, 2]);
            }
            other => panic!("expected sparse, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_tensor_envelope() {
        let envelope = serde_json::json!({
            "__tywrap__": "torch.tensor",
            "value": {
                "__tywrap__": "ndarray",
                "encoding": "json",
                "data": [1.0, 2.0],
                "shape": [2],
            },
            "shape": [2],
            "dtype": "float32",
            "device": "cpu",
        });
        let decoded = decode_value(envelope, &lenient()).unwrap();
        match decoded {
            PyValue::Tensor(tensor) => {
                assert_eq!(tensor.device, "cpu");
                assert_eq!(tensor.value.data, ArrayData::Float(vec![1.0, 2.0]));
            }
            other => panic!("expected tensor, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_estimator_envelope() {
        let envelope = serde_json::json!({
            "__tywrap__": "sklearn.estimator",
            "className": "LinearRegression",
            "module": "sklearn.linear_model",
            "version": "1.5.0",
            "params": {"fit_intercept": true},
        });
        let decoded = decode_value(envelope, &lenient()).unwrap();
        match decoded {
            PyValue::Estimator(estimator) => {
                assert_eq!(estimator.class_name, "LinearRegression");
                assert_eq!(estimator.params["fit_intercept"], serde_json::json!(true));
            }
            other => panic!("expected estimator, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_passes_through() {
        let envelope = serde_json::json!({
            "__tywrap__": "polars.dataframe",
            "anything": [1, 2, 3],
        });
        let decoded = decode_value(envelope.clone(), &lenient()).unwrap();
        assert_eq!(decoded, PyValue::Opaque(envelope));
    }

    #[test]
    fn test_future_codec_version_passes_through() {
        let envelope = serde_json::json!({
            "__tywrap__": "ndarray",
            "codecVersion": 99,
            "data": [1],
            "shape": [1],
        });
        let decoded = decode_value(envelope.clone(), &lenient()).unwrap();
        assert_eq!(decoded, PyValue::Opaque(envelope));
    }

    #[test]
    fn test_arrow_envelope_without_decoder_uses_json_fallback() {
        let _guard = test_support::lock_slot();
        clear_arrow_decoder();

        let envelope = serde_json::json!({
            "__tywrap__": "ndarray",
            "encoding": "arrow",
            "bytes": "AAAA",
            "data": [5, 6],
            "shape": [2],
        });
        let decoded = decode_value(envelope, &lenient()).unwrap();
        match decoded {
            PyValue::NdArray(array) => assert_eq!(array.data, ArrayData::Int(vec![5, 6])),
            other => panic!("expected ndarray, got {:?}", other),
        }
    }

    #[test]
    fn test_arrow_envelope_without_decoder_or_fallback_errors() {
        let _guard = test_support::lock_slot();
        clear_arrow_decoder();

        let envelope = serde_json::json!({
            "__tywrap__": "ndarray",
            "encoding": "arrow",
            "bytes": "AAAA",
            "shape": [1],
        });
        let err = decode_value(envelope.clone(), &lenient()).unwrap_err();
        assert!(err.to_string().contains("Arrow decoder not registered"));

        // Lenient pass-through keeps the raw envelope instead.
        let opts = CodecOptions {
            reject_special_floats: false,
            lenient_arrow: true,
        };
        let decoded = decode_value(envelope.clone(), &opts).unwrap();
        assert_eq!(decoded, PyValue::Opaque(envelope));
    }

    struct NanDecoder;

    impl ArrowDecode for NanDecoder {
        fn decode(&self, _bytes: &[u8]) -> Result<DecodedColumns, String> {
            Ok(DecodedColumns {
                columns: vec![("introduced".to_string(), ArrayData::Float(vec![f64::NAN]))],
                num_rows: 1,
            })
        }
    }

    #[test]
    fn test_arrow_decoded_nan_rejected_in_strict_mode() {
        let _guard = test_support::lock_slot();
        register_arrow_decoder(Arc::new(NanDecoder));

        let envelope = serde_json::json!({
            "__tywrap__": "ndarray",
            "encoding": "arrow",
            "bytes": "AAAA",
            "shape": [1],
        });

        let err = decode_value(envelope.clone(), &strict()).unwrap_err();
        assert!(err.to_string().contains("non-finite number"));

        // Same payload decodes in lenient mode.
        let decoded = decode_value(envelope, &lenient()).unwrap();
        match decoded {
            PyValue::NdArray(array) => assert!(array.data.has_non_finite()),
            other => panic!("expected ndarray, got {:?}", other),
        }

        clear_arrow_decoder();
    }
}
