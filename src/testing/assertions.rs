//! Assertion functions for arrays and native tables.
//!
//! Arrays compare by logical type and element values, never by buffer
//! identity, so an array that went through the engine and back compares
//! equal to the one that was exported.

use crate::array::Array;
use crate::bridge::Bridge;
use crate::error::BridgeResult;
use crate::handle::TableHandle;
use crate::types::ArrayType;
use crate::value::Value;
use std::collections::HashMap;

/// Assert that two arrays have the same type and the same elements in order.
///
/// # Panics
///
/// Panics with both arrays' contents if the types, lengths or any element differ.
///
/// # Example
///
/// ```
/// use tablebridge::testing::{assert_arrays_equal, int_column};
///
/// assert_arrays_equal(&int_column(&[1, 2]), &int_column(&[1, 2]));
/// ```
pub fn assert_arrays_equal(actual: &Array, expected: &Array) {
    let (at, et) = (actual.array_type(), expected.array_type());
    assert_eq!(
        at, et,
        "Array type mismatch:\n  Expected type: {et}\n  Actual type: {at}"
    );
    assert_values_equal(&actual.to_values(), &expected.to_values());
}

/// Assert that two value sequences are equal in order and content.
///
/// # Panics
///
/// Panics if the sequences differ in length or content.
pub fn assert_values_equal(actual: &[Value], expected: &[Value]) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "Array length mismatch:\n  Expected length: {}\n  Actual length: {}\n  Expected: {}\n  Actual: {}",
        expected.len(),
        actual.len(),
        render(expected),
        render(actual)
    );
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert_eq!(
            a,
            e,
            "Array mismatch at index {i}:\n  Expected: {e}\n  Actual: {a}\n  Full expected: {}\n  Full actual: {}",
            render(expected),
            render(actual)
        );
    }
}

/// Assert that two row sets hold the same rows with the same multiplicity,
/// ignoring order.
///
/// Use it for operator outputs whose row order depends on worker placement.
///
/// # Panics
///
/// Panics listing the missing and extra rows when the multisets differ.
///
/// ```
/// use tablebridge::Value;
/// use tablebridge::testing::assert_rows_unordered_equal;
///
/// let a = vec![vec![Value::Int(2)], vec![Value::Int(1)]];
/// let b = vec![vec![Value::Int(1)], vec![Value::Int(2)]];
/// assert_rows_unordered_equal(&a, &b);
/// ```
pub fn assert_rows_unordered_equal(actual: &[Vec<Value>], expected: &[Vec<Value>]) {
    let mut counts: HashMap<&[Value], i64> = HashMap::new();
    for row in expected {
        *counts.entry(row.as_slice()).or_default() += 1;
    }
    for row in actual {
        *counts.entry(row.as_slice()).or_default() -= 1;
    }
    let missing: Vec<_> = counts.iter().filter(|(_, n)| **n > 0).map(|(r, n)| (*r, *n)).collect();
    let extra: Vec<_> = counts.iter().filter(|(_, n)| **n < 0).map(|(r, n)| (*r, -*n)).collect();
    assert!(
        missing.is_empty() && extra.is_empty(),
        "Row set mismatch:\n  Missing rows (row, count): {missing:?}\n  Extra rows (row, count): {extra:?}\n  Expected: {expected:?}\n  Actual: {actual:?}"
    );
}

/// Import every column of a native table and return its values column by column.
///
/// The table stays alive; only the imported column references are released.
///
/// # Errors
///
/// Any import error, or `ShapeMismatch` if `types` does not cover every column.
pub fn read_columns(
    bridge: &Bridge,
    table: &TableHandle,
    types: &[ArrayType],
) -> BridgeResult<Vec<Vec<Value>>> {
    let (n_rows, _) = bridge.table_shape(table)?;
    let slots: Vec<i64> = (0..types.len() as i64).collect();
    let managed = bridge.table_to_columns(table, &slots, types, n_rows, types.len(), None)?;
    Ok((0..types.len())
        .map(|i| managed.get_column(i).map(Array::to_values).unwrap_or_default())
        .collect())
}

/// Like [`read_columns`], but transposed into rows.
///
/// # Errors
///
/// Same as [`read_columns`].
pub fn read_rows(
    bridge: &Bridge,
    table: &TableHandle,
    types: &[ArrayType],
) -> BridgeResult<Vec<Vec<Value>>> {
    let cols = read_columns(bridge, table, types)?;
    let n_rows = cols.first().map_or(0, Vec::len);
    Ok((0..n_rows)
        .map(|r| cols.iter().map(|c| c[r].clone()).collect())
        .collect())
}

fn render(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}
