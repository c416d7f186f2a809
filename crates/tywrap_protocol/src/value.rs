//! Host-side value model for the worker boundary.
//!
//! The worker is duck-typed; the host is not. Everything crossing the
//! boundary is either plain JSON data or one of the tagged envelope kinds
//! below. Unknown tags stay opaque so newer workers keep working against
//! older hosts.

use serde_json::Value;
use std::collections::BTreeMap;

/// Envelope discriminator key.
pub const ENVELOPE_TAG: &str = "__tywrap__";

/// Highest envelope codec version this host understands.
pub const CODEC_VERSION: u32 = 1;

/// Envelope tag names.
pub const TAG_NDARRAY: &str = "ndarray";
pub const TAG_DATAFRAME: &str = "pandas.dataframe";
pub const TAG_SERIES: &str = "pandas.series";
pub const TAG_SPARSE: &str = "scipy.sparse";
pub const TAG_TENSOR: &str = "torch.tensor";
pub const TAG_ESTIMATOR: &str = "sklearn.estimator";

/// Homogeneous column/buffer data.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Float(Vec<f64>),
    Str(Vec<String>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::Int(v) => v.len(),
            ArrayData::Float(v) => v.len(),
            ArrayData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when a float buffer contains NaN or an infinity.
    pub fn has_non_finite(&self) -> bool {
        match self {
            ArrayData::Float(v) => v.iter().any(|f| !f.is_finite()),
            _ => false,
        }
    }
}

/// N-dimensional numeric array (numpy).
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    pub shape: Vec<usize>,
    pub dtype: Option<String>,
    pub data: ArrayData,
}

/// Columnar table (pandas DataFrame).
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    /// Column order as produced by the worker.
    pub columns: Vec<String>,
    pub data: BTreeMap<String, ArrayData>,
    pub num_rows: usize,
}

/// Single labeled column (pandas Series).
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub name: Option<String>,
    pub data: ArrayData,
}

/// Compressed sparse matrix (scipy).
#[derive(Debug, Clone, PartialEq)]
pub struct Sparse {
    /// Storage format, e.g. `csr` or `csc`.
    pub format: String,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
    pub indices: Vec<i64>,
    pub indptr: Vec<i64>,
}

/// Tensor (torch): an ndarray plus device placement.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub value: NdArray,
    pub shape: Vec<usize>,
    pub dtype: String,
    pub device: String,
}

/// Fitted-estimator descriptor (sklearn). Parameters only — the model
/// itself stays in the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Estimator {
    pub class_name: String,
    pub module: String,
    pub version: Option<String>,
    pub params: Value,
}

/// The sum type crossing the host/worker boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum PyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<PyValue>),
    Dict(BTreeMap<String, PyValue>),
    NdArray(NdArray),
    DataFrame(DataFrame),
    Series(Series),
    Sparse(Sparse),
    Tensor(Tensor),
    Estimator(Estimator),
    /// Unknown envelope tag or future codec version: raw JSON preserved.
    Opaque(Value),
}

impl PyValue {
    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            PyValue::Null => "null",
            PyValue::Bool(_) => "bool",
            PyValue::Int(_) => "int",
            PyValue::Float(_) => "float",
            PyValue::Str(_) => "str",
            PyValue::List(_) => "list",
            PyValue::Dict(_) => "dict",
            PyValue::NdArray(_) => "ndarray",
            PyValue::DataFrame(_) => "dataframe",
            PyValue::Series(_) => "series",
            PyValue::Sparse(_) => "sparse",
            PyValue::Tensor(_) => "tensor",
            PyValue::Estimator(_) => "estimator",
            PyValue::Opaque(_) => "opaque",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PyValue::Float(f) => Some(*f),
            PyValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PyValue::Null)
    }
}

impl From<bool> for PyValue {
    fn from(value: bool) -> Self {
        PyValue::Bool(value)
    }
}

impl From<i64> for PyValue {
    fn from(value: i64) -> Self {
        PyValue::Int(value)
    }
}

impl From<f64> for PyValue {
    fn from(value: f64) -> Self {
        PyValue::Float(value)
    }
}

impl From<&str> for PyValue {
    fn from(value: &str) -> Self {
        PyValue::Str(value.to_string())
    }
}

impl From<String> for PyValue {
    fn from(value: String) -> Self {
        PyValue::Str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_data_non_finite() {
        assert!(!ArrayData::Float(vec![1.0, 2.0]).has_non_finite());
        assert!(ArrayData::Float(vec![1.0, f64::NAN]).has_non_finite());
        assert!(ArrayData::Float(vec![f64::INFINITY]).has_non_finite());
        assert!(!ArrayData::Int(vec![1, 2]).has_non_finite());
    }

    #[test]
    fn test_type_names() {
        assert_eq!(PyValue::Null.type_name(), "null");
        assert_eq!(PyValue::from(1i64).type_name(), "int");
        assert_eq!(PyValue::from("x").type_name(), "str");
    }

    #[test]
    fn test_accessors() {
        assert_eq!(PyValue::from(3i64).as_f64(), Some(3.0));
        assert_eq!(PyValue::from("h").as_str(), Some("h"));
        assert_eq!(PyValue::Null.as_i64(), None);
    }
}
