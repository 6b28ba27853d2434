//! The native engine boundary.
//!
//! [`NativeEngine`] is the fixed set of entry points the bridge calls. Every
//! argument is positional and flat (ids, scalars, slices, buffers); argument
//! order is part of the contract. Ownership rules per entry point:
//!
//! - constructors (`*_to_info`) take shared ownership of the buffers they are
//!   handed and return a fresh array id the caller must release
//! - `dict_str_array_to_info` and `arr_info_list_to_table` consume the array
//!   ids passed in
//! - accessors and operators borrow their inputs and return fresh ids
//!
//! Engines report failures as `anyhow::Error`; the bridge turns them into
//! [`NativeOperationFailure`](crate::ErrorKind::NativeOperationFailure).

mod array_info;
#[cfg(feature = "local-engine")]
pub mod local;

pub use array_info::NativeArray;

use crate::buffers::LeafBuffers;
use crate::ids::{ArrayId, ShuffleInfoId, TableId};
use crate::value::Value;
use anyhow::Result;
use arrow::buffer::Buffer;
use std::sync::Arc;

/// Non-equality join condition, called as `cond(left_columns, right_columns, left_row, right_row)`.
///
/// Invoked synchronously once per candidate row pair, possibly from several
/// threads. It must not panic; rows it rejects are treated as unmatched.
pub type JoinCondition = dyn Fn(&[Arc<NativeArray>], &[Arc<NativeArray>], usize, usize) -> bool + Send + Sync;

/// Fold one input value into a group's reduction variables:
/// `update(udf_ordinal, redvars, value)`.
pub type UpdateFn = dyn Fn(usize, &mut [Value], &Value) -> Result<()> + Send + Sync;

/// Merge another partial state into an accumulator: `combine(udf_ordinal, acc, other)`.
pub type CombineFn = dyn Fn(usize, &mut [Value], &[Value]) -> Result<()> + Send + Sync;

/// Turn final reduction variables into the group's output value.
pub type EvalFn = dyn Fn(usize, &[Value]) -> Result<Value> + Send + Sync;

/// Compute a group's output directly from all of its values.
pub type GeneralUdfFn = dyn Fn(usize, &[Value]) -> Result<Value> + Send + Sync;

/// Lengths and buffer groups of a nested array, in pre-order.
#[derive(Clone, Debug, Default)]
pub struct NestedParts {
    pub lengths: Vec<u64>,
    pub buffers: Vec<Option<Buffer>>,
}

/// The two halves of a dictionary-encoded string array.
///
/// Both ids are fresh references owned by the caller.
#[derive(Clone, Copy, Debug)]
pub struct DictParts {
    pub dictionary: ArrayId,
    pub indices: ArrayId,
    pub has_global_dictionary: bool,
    pub has_deduped_local_dictionary: bool,
}

/// Entry points of a native table engine.
#[allow(clippy::too_many_arguments)]
pub trait NativeEngine: Send + Sync {
    // ---- array construction ----

    fn numpy_array_to_info(&self, length: u64, data: Buffer, type_code: i32) -> Result<ArrayId>;

    fn nullable_array_to_info(
        &self,
        length: u64,
        data: Buffer,
        type_code: i32,
        null_bitmap: Buffer,
    ) -> Result<ArrayId>;

    fn decimal_array_to_info(
        &self,
        length: u64,
        data: Buffer,
        type_code: i32,
        null_bitmap: Buffer,
        precision: i32,
        scale: i32,
    ) -> Result<ArrayId>;

    fn string_array_to_info(
        &self,
        type_code: i32,
        length: u64,
        n_chars: u64,
        data: Buffer,
        offsets: Buffer,
        null_bitmap: Buffer,
        is_bytes: bool,
    ) -> Result<ArrayId>;

    fn nested_array_to_info(
        &self,
        type_tags: &[i32],
        lengths: &[u64],
        buffers: Vec<Option<Buffer>>,
        field_names: &[String],
    ) -> Result<ArrayId>;

    /// Consumes `dictionary` and `indices`.
    fn dict_str_array_to_info(
        &self,
        dictionary: ArrayId,
        indices: ArrayId,
        has_global_dictionary: bool,
        has_deduped_local_dictionary: bool,
    ) -> Result<ArrayId>;

    fn categorical_array_to_info(
        &self,
        length: u64,
        codes: Buffer,
        type_code: i32,
        num_categories: u64,
    ) -> Result<ArrayId>;

    fn interval_array_to_info(
        &self,
        length: u64,
        left: Buffer,
        right: Buffer,
        type_code: i32,
    ) -> Result<ArrayId>;

    // ---- array inspection ----

    fn array_length(&self, array: ArrayId) -> Result<u64>;

    fn info_to_numpy_array(&self, array: ArrayId) -> Result<LeafBuffers>;

    fn info_to_nullable_array(&self, array: ArrayId) -> Result<LeafBuffers>;

    fn info_to_string_array(&self, array: ArrayId) -> Result<LeafBuffers>;

    fn get_nested_info(&self, array: ArrayId) -> Result<NestedParts>;

    fn info_to_dict_parts(&self, array: ArrayId) -> Result<DictParts>;

    /// Codes plus the category count the array was built with.
    fn info_to_categorical_array(&self, array: ArrayId) -> Result<(LeafBuffers, u64)>;

    /// Left and right bound buffers.
    fn info_to_interval_array(&self, array: ArrayId) -> Result<(LeafBuffers, LeafBuffers)>;

    fn delete_info(&self, array: ArrayId) -> Result<()>;

    // ---- tables ----

    /// Consumes every id in `arrays`.
    fn arr_info_list_to_table(&self, arrays: &[ArrayId]) -> Result<TableId>;

    fn info_from_table(&self, table: TableId, col: u64) -> Result<ArrayId>;

    /// `(rows, columns)`.
    fn table_shape(&self, table: TableId) -> Result<(u64, u64)>;

    fn delete_table(&self, table: TableId) -> Result<()>;

    fn decref_table_array(&self, table: TableId, col: u64) -> Result<()>;

    fn delete_table_decref_arrays(&self, table: TableId) -> Result<()>;

    // ---- distributed operators ----

    fn shuffle_table(
        &self,
        table: TableId,
        n_keys: i64,
        is_parallel: bool,
        keep_comm_info: i32,
    ) -> Result<TableId>;

    /// Routing metadata kept by the shuffle that produced `table`, if any.
    fn get_shuffle_info(&self, table: TableId) -> Result<Option<ShuffleInfoId>>;

    fn delete_shuffle_info(&self, info: ShuffleInfoId) -> Result<()>;

    fn reverse_shuffle_table(&self, table: TableId, info: ShuffleInfoId) -> Result<TableId>;

    fn hash_join_table(
        &self,
        left: TableId,
        right: TableId,
        left_parallel: bool,
        right_parallel: bool,
        n_keys: i64,
        n_data_left: i64,
        n_data_right: i64,
        vect_same_key: &[bool],
        key_in_output: &[bool],
        is_left: bool,
        is_right: bool,
        is_na_equal: bool,
        cond_func: Option<&JoinCondition>,
        num_rows: &mut u64,
    ) -> Result<TableId>;

    fn cross_join_table(
        &self,
        left: TableId,
        right: TableId,
        left_parallel: bool,
        right_parallel: bool,
        is_left: bool,
        is_right: bool,
        key_in_output: &[bool],
        cond_func: Option<&JoinCondition>,
        num_rows: &mut u64,
    ) -> Result<TableId>;

    fn sort_values_table(
        &self,
        table: TableId,
        n_keys: i64,
        vect_ascending: &[bool],
        na_position: &[bool],
        dead_keys: &[bool],
        out_n_rows: &mut i64,
        bounds: Option<TableId>,
        is_parallel: bool,
    ) -> Result<TableId>;

    fn sample_table(
        &self,
        table: TableId,
        n: i64,
        frac: f64,
        replace: bool,
        is_parallel: bool,
    ) -> Result<TableId>;

    fn shuffle_renormalization(
        &self,
        table: TableId,
        random: i32,
        random_seed: i64,
        is_parallel: bool,
    ) -> Result<TableId>;

    fn shuffle_renormalization_group(
        &self,
        table: TableId,
        random: i32,
        random_seed: i64,
        is_parallel: bool,
        num_ranks: i64,
        ranks: &[i32],
    ) -> Result<TableId>;

    fn drop_duplicates_table(
        &self,
        table: TableId,
        is_parallel: bool,
        n_keys: i64,
        keep: i64,
        dropna: bool,
        drop_local_first: bool,
    ) -> Result<TableId>;

    fn groupby_and_aggregate(
        &self,
        table: TableId,
        n_keys: i64,
        is_parallel: bool,
        skip_na: bool,
        shift_periods: i64,
        transform_func: i32,
        head_n: i64,
        return_keys: bool,
        return_index: bool,
        dropna: bool,
        ftypes: &[i32],
        func_offsets: &[i32],
        udf_n_redvars: &[i32],
        update_cb: Option<&UpdateFn>,
        combine_cb: Option<&CombineFn>,
        eval_cb: Option<&EvalFn>,
        general_udf_cb: Option<&GeneralUdfFn>,
        udf_table: Option<TableId>,
        n_out_rows: &mut i64,
        n_shuffle_keys: i64,
    ) -> Result<TableId>;

    /// Writes one label per row (-1 for dropped NA keys) and the rows ordered
    /// by label; returns the number of groups.
    fn get_groupby_labels(
        &self,
        table: TableId,
        out_labels: &mut [i64],
        sort_idx: &mut [i64],
        key_dropna: bool,
        is_parallel: bool,
    ) -> Result<i64>;

    fn array_isin(
        &self,
        out: &mut [bool],
        in_arr: ArrayId,
        in_values: ArrayId,
        is_parallel: bool,
    ) -> Result<()>;

    fn drop_duplicates_local_dictionary(
        &self,
        dict_array: ArrayId,
        sort_dictionary_if_modified: bool,
    ) -> Result<ArrayId>;

    fn convert_local_dictionary_to_global(
        &self,
        dict_array: ArrayId,
        is_parallel: bool,
        sort_dictionary: bool,
    ) -> Result<ArrayId>;
}
