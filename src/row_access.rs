//! Row-level readers for join predicates.
//!
//! A getter or NA checker is specialized once per column type and then reads
//! one element straight out of a table column's buffers, without
//! materializing the column. They are meant to be captured by a
//! [`JoinCondition`](crate::native::JoinCondition):
//!
//! ```no_run
//! use std::sync::Arc;
//! use tablebridge::{make_row_getter, ArrayType, PrimitiveType};
//! use tablebridge::native::JoinCondition;
//!
//! # fn main() -> tablebridge::BridgeResult<()> {
//! let left_val = make_row_getter(&ArrayType::Primitive(PrimitiveType::Int64), 1)?;
//! let right_val = make_row_getter(&ArrayType::Primitive(PrimitiveType::Int64), 1)?;
//! let cond: Arc<JoinCondition> = Arc::new(move |l, r, i, j| left_val(l, i) < right_val(r, j));
//! # Ok(())
//! # }
//! ```

use crate::buffers::{is_sentinel_na, is_valid, read_primitive, varlen_value};
use crate::error::{BridgeError, BridgeResult};
use crate::native::NativeArray;
use crate::types::{ArrayType, PrimitiveType};
use crate::value::Value;
use std::sync::Arc;

/// `(table_columns, row) -> value`; a missing column or mismatched layout reads as null.
pub type RowGetter = Arc<dyn Fn(&[Arc<NativeArray>], usize) -> Value + Send + Sync>;

/// `(table_columns, row) -> is_na`.
pub type RowNaChecker = Arc<dyn Fn(&[Arc<NativeArray>], usize) -> bool + Send + Sync>;

fn dict_index(indices: &NativeArray, row: usize) -> Option<usize> {
    match indices {
        NativeArray::Nullable { data, .. } | NativeArray::Numpy { data, .. } => {
            read_primitive(PrimitiveType::Int32, data, row)
                .as_i64()
                .and_then(|k| usize::try_from(k).ok())
        }
        _ => None,
    }
}

/// Build a reader for column `column_index` of type `column_type`.
///
/// # Errors
/// `UnsupportedType` naming the type when it has no row reader.
pub fn make_row_getter(column_type: &ArrayType, column_index: usize) -> BridgeResult<RowGetter> {
    let getter: RowGetter = match column_type {
        ArrayType::Primitive(p) | ArrayType::Nullable(p) => {
            let p = *p;
            Arc::new(move |cols: &[Arc<NativeArray>], row: usize| match cols.get(column_index).map(Arc::as_ref) {
                Some(NativeArray::Numpy { data, .. } | NativeArray::Nullable { data, .. }) => {
                    read_primitive(p, data, row)
                }
                _ => Value::Null,
            })
        }
        ArrayType::String | ArrayType::Binary => {
            let binary = matches!(column_type, ArrayType::Binary);
            Arc::new(move |cols: &[Arc<NativeArray>], row: usize| match cols.get(column_index).map(Arc::as_ref) {
                Some(NativeArray::String { offsets, data, .. }) => {
                    varlen_value(offsets, data, row, binary)
                }
                _ => Value::Null,
            })
        }
        ArrayType::DictString => {
            Arc::new(move |cols: &[Arc<NativeArray>], row: usize| match cols.get(column_index).map(Arc::as_ref) {
                Some(NativeArray::Dict {
                    dictionary,
                    indices,
                    ..
                }) => match (dictionary.as_ref(), dict_index(indices, row)) {
                    (NativeArray::String { offsets, data, .. }, Some(k)) => {
                        varlen_value(offsets, data, k, false)
                    }
                    _ => Value::Null,
                },
                _ => Value::Null,
            })
        }
        other => {
            return Err(BridgeError::unsupported(format!(
                "make_row_getter: unsupported column type {other}"
            )));
        }
    };
    Ok(getter)
}

/// Build an NA checker for column `column_index` of type `column_type`.
///
/// # Errors
/// `UnsupportedType` naming the type when it has no NA representation the
/// checker can read.
pub fn make_row_na_checker(column_type: &ArrayType, column_index: usize) -> BridgeResult<RowNaChecker> {
    let checker: RowNaChecker = match column_type {
        ArrayType::Nullable(_) | ArrayType::String | ArrayType::Binary => {
            Arc::new(move |cols: &[Arc<NativeArray>], row: usize| match cols.get(column_index).map(Arc::as_ref) {
                Some(NativeArray::Nullable { null_bitmap, .. } | NativeArray::String { null_bitmap, .. }) => {
                    !is_valid(null_bitmap, row)
                }
                Some(NativeArray::Numpy { .. }) => false,
                _ => true,
            })
        }
        ArrayType::DictString => {
            Arc::new(move |cols: &[Arc<NativeArray>], row: usize| match cols.get(column_index).map(Arc::as_ref) {
                Some(NativeArray::Dict { indices, .. }) => match indices.as_ref() {
                    NativeArray::Nullable { null_bitmap, .. } => !is_valid(null_bitmap, row),
                    _ => false,
                },
                _ => true,
            })
        }
        ArrayType::Primitive(p) if p.has_nat() || p.is_float() => {
            let p = *p;
            Arc::new(move |cols: &[Arc<NativeArray>], row: usize| match cols.get(column_index).map(Arc::as_ref) {
                Some(NativeArray::Numpy { data, .. }) => is_sentinel_na(p, data, row),
                Some(NativeArray::Nullable { null_bitmap, .. }) => !is_valid(null_bitmap, row),
                _ => true,
            })
        }
        other => {
            return Err(BridgeError::unsupported(format!(
                "make_row_na_checker: unsupported column type {other}"
            )));
        }
    };
    Ok(checker)
}
