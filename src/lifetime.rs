//! Explicit release of native objects.
//!
//! Dropping a handle already releases it; these functions do the same thing
//! but hand the engine's answer back to the caller. Each consumes its handle,
//! so a reference cannot be released twice.

use crate::error::{BridgeResult, NativeResultExt};
use crate::handle::{ArrayHandle, ShuffleInfoHandle, TableHandle};
use std::sync::Arc;
use tracing::debug;

/// Release one array reference.
///
/// # Errors
/// `NativeOperationFailure` if the engine does not know the array.
pub fn delete_array(handle: ArrayHandle) -> BridgeResult<()> {
    debug!(id = handle.id().raw(), "delete_array");
    handle.release().native_ctx("delete_info")
}

/// Release a table together with the column references it still holds.
///
/// # Errors
/// `NativeOperationFailure` if the engine does not know the table.
pub fn delete_table(handle: TableHandle) -> BridgeResult<()> {
    debug!(id = handle.id().raw(), "delete_table");
    handle.release().native_ctx("delete_table")
}

/// Drop the table's reference to column `index`; the slot is dead afterwards.
///
/// # Errors
/// `NativeOperationFailure` on a bad index or an already released column.
pub fn decref_table_column(table: &TableHandle, index: usize) -> BridgeResult<()> {
    debug!(id = table.id().raw(), index, "decref_table_column");
    table
        .engine()
        .decref_table_array(table.id(), index as u64)
        .native_ctx("decref_table_array")
}

/// Release every column reference one by one, then the table itself.
///
/// # Errors
/// `NativeOperationFailure` if the engine does not know the table.
pub fn delete_table_decref_all(handle: TableHandle) -> BridgeResult<()> {
    debug!(id = handle.id().raw(), "delete_table_decref_all");
    let engine = Arc::clone(handle.engine());
    let id = handle.into_raw();
    engine
        .delete_table_decref_arrays(id)
        .native_ctx("delete_table_decref_arrays")
}

/// Release routing metadata kept by a shuffle.
///
/// # Errors
/// `NativeOperationFailure` if the engine does not know the info.
pub fn delete_shuffle_info(handle: ShuffleInfoHandle) -> BridgeResult<()> {
    debug!(id = handle.id().raw(), "delete_shuffle_info");
    handle.release().native_ctx("delete_shuffle_info")
}
