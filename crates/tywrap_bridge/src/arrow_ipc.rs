//! Arrow IPC decoder for the codec's binary fast path.
//!
//! Opt-in: nothing registers this automatically. Call
//! [`register_arrow_ipc_decoder`] once at startup to let envelopes with
//! `encoding: "arrow"` decode from IPC stream bytes instead of JSON.

use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int16Array, Int32Array, Int64Array,
    Int8Array, LargeStringArray, StringArray,
};
use arrow::datatypes::DataType;
use arrow::ipc::reader::StreamReader;
use std::io::Cursor;
use std::sync::Arc;
use tywrap_protocol::{register_arrow_decoder, ArrayData, ArrowDecode, DecodedColumns};

/// Decoder backed by `arrow`'s IPC stream reader.
pub struct IpcArrowDecoder;

impl ArrowDecode for IpcArrowDecoder {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedColumns, String> {
        let reader = StreamReader::try_new(Cursor::new(bytes), None)
            .map_err(|e| format!("failed to open Arrow IPC stream: {}", e))?;
        let schema = reader.schema();

        let mut columns: Vec<(String, ArrayData)> = schema
            .fields()
            .iter()
            .map(|field| {
                empty_buffer(field.data_type()).map(|buffer| (field.name().clone(), buffer))
            })
            .collect::<Result<Vec<_>, String>>()?;
        let mut num_rows = 0;

        for batch in reader {
            let batch = batch.map_err(|e| format!("failed to read Arrow batch: {}", e))?;
            num_rows += batch.num_rows();
            for (index, (name, buffer)) in columns.iter_mut().enumerate() {
                append_column(buffer, batch.column(index).as_ref(), name)?;
            }
        }

        Ok(DecodedColumns { columns, num_rows })
    }
}

/// Register [`IpcArrowDecoder`] as the process-wide decoder. Idempotent.
pub fn register_arrow_ipc_decoder() {
    register_arrow_decoder(Arc::new(IpcArrowDecoder));
}

fn empty_buffer(data_type: &DataType) -> Result<ArrayData, String> {
    match data_type {
        DataType::Float64 | DataType::Float32 => Ok(ArrayData::Float(Vec::new())),
        DataType::Int64 | DataType::Int32 | DataType::Int16 | DataType::Int8 => {
            Ok(ArrayData::Int(Vec::new()))
        }
        DataType::Boolean => Ok(ArrayData::Bool(Vec::new())),
        DataType::Utf8 | DataType::LargeUtf8 => Ok(ArrayData::Str(Vec::new())),
        other => Err(format!("unsupported Arrow data type {:?}", other)),
    }
}

fn append_column(buffer: &mut ArrayData, column: &dyn Array, name: &str) -> Result<(), String> {
    let unsupported_null = |kind: &str| {
        format!(
            "column {:?} has null values, unsupported for {} buffers",
            name, kind
        )
    };

    match buffer {
        ArrayData::Float(out) => match column.data_type() {
            DataType::Float64 => {
                let values = downcast::<Float64Array>(column, name)?;
                // Null float cells decode to NaN; strict mode rejects them
                // downstream.
                out.extend((0..values.len()).map(|i| {
                    if values.is_null(i) {
                        f64::NAN
                    } else {
                        values.value(i)
                    }
                }));
                Ok(())
            }
            DataType::Float32 => {
                let values = downcast::<Float32Array>(column, name)?;
                out.extend((0..values.len()).map(|i| {
                    if values.is_null(i) {
                        f64::NAN
                    } else {
                        values.value(i) as f64
                    }
                }));
                Ok(())
            }
            other => Err(column_type_error(name, other)),
        },
        ArrayData::Int(out) => {
            if column.null_count() > 0 {
                return Err(unsupported_null("integer"));
            }
            match column.data_type() {
                DataType::Int64 => {
                    let values = downcast::<Int64Array>(column, name)?;
                    out.extend(values.values().iter().copied());
                    Ok(())
                }
                DataType::Int32 => {
                    let values = downcast::<Int32Array>(column, name)?;
                    out.extend(values.values().iter().map(|&v| v as i64));
                    Ok(())
                }
                DataType::Int16 => {
                    let values = downcast::<Int16Array>(column, name)?;
                    out.extend(values.values().iter().map(|&v| v as i64));
                    Ok(())
                }
                DataType::Int8 => {
                    let values = downcast::<Int8Array>(column, name)?;
                    out.extend(values.values().iter().map(|&v| v as i64));
                    Ok(())
                }
                other => Err(column_type_error(name, other)),
            }
        }
        ArrayData::Bool(out) => {
            if column.null_count() > 0 {
                return Err(unsupported_null("bool"));
            }
            let values = downcast::<BooleanArray>(column, name)?;
            out.extend((0..values.len()).map(|i| values.value(i)));
            Ok(())
        }
        ArrayData::Str(out) => {
            if column.null_count() > 0 {
                return Err(unsupported_null("string"));
            }
            match column.data_type() {
                DataType::Utf8 => {
                    let values = downcast::<StringArray>(column, name)?;
                    out.extend((0..values.len()).map(|i| values.value(i).to_string()));
                    Ok(())
                }
                DataType::LargeUtf8 => {
                    let values = downcast::<LargeStringArray>(column, name)?;
                    out.extend((0..values.len()).map(|i| values.value(i).to_string()));
                    Ok(())
                }
                other => Err(column_type_error(name, other)),
            }
        }
    }
}

fn downcast<'a, T: 'static>(column: &'a dyn Array, name: &str) -> Result<&'a T, String> {
    column
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| format!("column {:?} has unexpected physical layout", name))
}

fn column_type_error(name: &str, data_type: &DataType) -> String {
    format!(
        "column {:?} has unsupported Arrow data type {:?}",
        name, data_type
    )
}
