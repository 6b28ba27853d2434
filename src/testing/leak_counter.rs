//! An engine wrapper that counts native objects in and out.

use crate::buffers::LeafBuffers;
use crate::ids::{ArrayId, ShuffleInfoId, TableId};
use crate::native::{
    CombineFn, DictParts, EvalFn, GeneralUdfFn, JoinCondition, NativeEngine, NestedParts, UpdateFn,
};
use anyhow::Result;
use arrow::buffer::Buffer;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct Counter {
    created: AtomicU64,
    released: AtomicU64,
}

impl Counter {
    fn made<T>(&self, r: Result<T>) -> Result<T> {
        if r.is_ok() {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
        r
    }

    fn gone(&self, n: u64) {
        self.released.fetch_add(n, Ordering::SeqCst);
    }

    fn outstanding(&self) -> i64 {
        self.created.load(Ordering::SeqCst) as i64 - self.released.load(Ordering::SeqCst) as i64
    }
}

/// Objects created but not yet released, per kind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outstanding {
    pub arrays: i64,
    pub tables: i64,
    pub shuffle_infos: i64,
}

impl Outstanding {
    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

impl fmt::Display for Outstanding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} arrays, {} tables, {} shuffle infos outstanding",
            self.arrays, self.tables, self.shuffle_infos
        )
    }
}

/// Wraps any engine and counts every id it hands out and takes back.
///
/// Entry points that consume ids (`dict_str_array_to_info`,
/// `arr_info_list_to_table`) count them as released whatever the outcome.
///
/// ```
/// use std::sync::Arc;
/// use tablebridge::native::local::LocalEngine;
/// use tablebridge::testing::LeakCountingEngine;
/// use tablebridge::{Array, ArrayType, Bridge, PrimitiveType, Value};
///
/// let engine = Arc::new(LeakCountingEngine::new(LocalEngine::default()));
/// let bridge = Bridge::new(engine.clone());
/// let arr = Array::from_values(&ArrayType::Primitive(PrimitiveType::Int64), &[Value::Int(1)]).unwrap();
/// let handle = bridge.array_to_info(&arr).unwrap();
/// assert_eq!(engine.outstanding().arrays, 1);
/// drop(handle);
/// engine.assert_no_leaks();
/// ```
pub struct LeakCountingEngine<E> {
    inner: E,
    arrays: Counter,
    tables: Counter,
    shuffle_infos: Counter,
}

impl<E: NativeEngine> LeakCountingEngine<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            arrays: Counter::default(),
            tables: Counter::default(),
            shuffle_infos: Counter::default(),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn outstanding(&self) -> Outstanding {
        Outstanding {
            arrays: self.arrays.outstanding(),
            tables: self.tables.outstanding(),
            shuffle_infos: self.shuffle_infos.outstanding(),
        }
    }

    /// # Panics
    /// When any object is still outstanding (or was released twice).
    pub fn assert_no_leaks(&self) {
        let o = self.outstanding();
        assert!(o.is_clean(), "native objects leaked: {o}");
    }
}

#[allow(clippy::too_many_arguments)]
impl<E: NativeEngine> NativeEngine for LeakCountingEngine<E> {
    fn numpy_array_to_info(&self, length: u64, data: Buffer, type_code: i32) -> Result<ArrayId> {
        self.arrays.made(self.inner.numpy_array_to_info(length, data, type_code))
    }

    fn nullable_array_to_info(
        &self,
        length: u64,
        data: Buffer,
        type_code: i32,
        null_bitmap: Buffer,
    ) -> Result<ArrayId> {
        self.arrays
            .made(self.inner.nullable_array_to_info(length, data, type_code, null_bitmap))
    }

    fn decimal_array_to_info(
        &self,
        length: u64,
        data: Buffer,
        type_code: i32,
        null_bitmap: Buffer,
        precision: i32,
        scale: i32,
    ) -> Result<ArrayId> {
        self.arrays.made(self.inner.decimal_array_to_info(
            length,
            data,
            type_code,
            null_bitmap,
            precision,
            scale,
        ))
    }

    fn string_array_to_info(
        &self,
        type_code: i32,
        length: u64,
        n_chars: u64,
        data: Buffer,
        offsets: Buffer,
        null_bitmap: Buffer,
        is_bytes: bool,
    ) -> Result<ArrayId> {
        self.arrays.made(self.inner.string_array_to_info(
            type_code,
            length,
            n_chars,
            data,
            offsets,
            null_bitmap,
            is_bytes,
        ))
    }

    fn nested_array_to_info(
        &self,
        type_tags: &[i32],
        lengths: &[u64],
        buffers: Vec<Option<Buffer>>,
        field_names: &[String],
    ) -> Result<ArrayId> {
        self.arrays
            .made(self.inner.nested_array_to_info(type_tags, lengths, buffers, field_names))
    }

    fn dict_str_array_to_info(
        &self,
        dictionary: ArrayId,
        indices: ArrayId,
        has_global_dictionary: bool,
        has_deduped_local_dictionary: bool,
    ) -> Result<ArrayId> {
        self.arrays.gone(2);
        self.arrays.made(self.inner.dict_str_array_to_info(
            dictionary,
            indices,
            has_global_dictionary,
            has_deduped_local_dictionary,
        ))
    }

    fn categorical_array_to_info(
        &self,
        length: u64,
        codes: Buffer,
        type_code: i32,
        num_categories: u64,
    ) -> Result<ArrayId> {
        self.arrays
            .made(self.inner.categorical_array_to_info(length, codes, type_code, num_categories))
    }

    fn interval_array_to_info(
        &self,
        length: u64,
        left: Buffer,
        right: Buffer,
        type_code: i32,
    ) -> Result<ArrayId> {
        self.arrays
            .made(self.inner.interval_array_to_info(length, left, right, type_code))
    }

    fn array_length(&self, array: ArrayId) -> Result<u64> {
        self.inner.array_length(array)
    }

    fn info_to_numpy_array(&self, array: ArrayId) -> Result<LeafBuffers> {
        self.inner.info_to_numpy_array(array)
    }

    fn info_to_nullable_array(&self, array: ArrayId) -> Result<LeafBuffers> {
        self.inner.info_to_nullable_array(array)
    }

    fn info_to_string_array(&self, array: ArrayId) -> Result<LeafBuffers> {
        self.inner.info_to_string_array(array)
    }

    fn get_nested_info(&self, array: ArrayId) -> Result<NestedParts> {
        self.inner.get_nested_info(array)
    }

    fn info_to_dict_parts(&self, array: ArrayId) -> Result<DictParts> {
        let parts = self.inner.info_to_dict_parts(array)?;
        self.arrays.created.fetch_add(2, Ordering::SeqCst);
        Ok(parts)
    }

    fn info_to_categorical_array(&self, array: ArrayId) -> Result<(LeafBuffers, u64)> {
        self.inner.info_to_categorical_array(array)
    }

    fn info_to_interval_array(&self, array: ArrayId) -> Result<(LeafBuffers, LeafBuffers)> {
        self.inner.info_to_interval_array(array)
    }

    fn delete_info(&self, array: ArrayId) -> Result<()> {
        let r = self.inner.delete_info(array);
        if r.is_ok() {
            self.arrays.gone(1);
        }
        r
    }

    fn arr_info_list_to_table(&self, arrays: &[ArrayId]) -> Result<TableId> {
        self.arrays.gone(arrays.len() as u64);
        self.tables.made(self.inner.arr_info_list_to_table(arrays))
    }

    fn info_from_table(&self, table: TableId, col: u64) -> Result<ArrayId> {
        self.arrays.made(self.inner.info_from_table(table, col))
    }

    fn table_shape(&self, table: TableId) -> Result<(u64, u64)> {
        self.inner.table_shape(table)
    }

    fn delete_table(&self, table: TableId) -> Result<()> {
        let r = self.inner.delete_table(table);
        if r.is_ok() {
            self.tables.gone(1);
        }
        r
    }

    fn decref_table_array(&self, table: TableId, col: u64) -> Result<()> {
        self.inner.decref_table_array(table, col)
    }

    fn delete_table_decref_arrays(&self, table: TableId) -> Result<()> {
        let r = self.inner.delete_table_decref_arrays(table);
        if r.is_ok() {
            self.tables.gone(1);
        }
        r
    }

    fn shuffle_table(
        &self,
        table: TableId,
        n_keys: i64,
        is_parallel: bool,
        keep_comm_info: i32,
    ) -> Result<TableId> {
        self.tables
            .made(self.inner.shuffle_table(table, n_keys, is_parallel, keep_comm_info))
    }

    fn get_shuffle_info(&self, table: TableId) -> Result<Option<ShuffleInfoId>> {
        let info = self.inner.get_shuffle_info(table)?;
        if info.is_some() {
            self.shuffle_infos.created.fetch_add(1, Ordering::SeqCst);
        }
        Ok(info)
    }

    fn delete_shuffle_info(&self, info: ShuffleInfoId) -> Result<()> {
        let r = self.inner.delete_shuffle_info(info);
        if r.is_ok() {
            self.shuffle_infos.gone(1);
        }
        r
    }

    fn reverse_shuffle_table(&self, table: TableId, info: ShuffleInfoId) -> Result<TableId> {
        self.tables.made(self.inner.reverse_shuffle_table(table, info))
    }

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
    ) -> Result<TableId> {
        self.tables.made(self.inner.hash_join_table(
            left,
            right,
            left_parallel,
            right_parallel,
            n_keys,
            n_data_left,
            n_data_right,
            vect_same_key,
            key_in_output,
            is_left,
            is_right,
            is_na_equal,
            cond_func,
            num_rows,
        ))
    }

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
    ) -> Result<TableId> {
        self.tables.made(self.inner.cross_join_table(
            left,
            right,
            left_parallel,
            right_parallel,
            is_left,
            is_right,
            key_in_output,
            cond_func,
            num_rows,
        ))
    }

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
    ) -> Result<TableId> {
        self.tables.made(self.inner.sort_values_table(
            table,
            n_keys,
            vect_ascending,
            na_position,
            dead_keys,
            out_n_rows,
            bounds,
            is_parallel,
        ))
    }

    fn sample_table(
        &self,
        table: TableId,
        n: i64,
        frac: f64,
        replace: bool,
        is_parallel: bool,
    ) -> Result<TableId> {
        self.tables
            .made(self.inner.sample_table(table, n, frac, replace, is_parallel))
    }

    fn shuffle_renormalization(
        &self,
        table: TableId,
        random: i32,
        random_seed: i64,
        is_parallel: bool,
    ) -> Result<TableId> {
        self.tables
            .made(self.inner.shuffle_renormalization(table, random, random_seed, is_parallel))
    }

    fn shuffle_renormalization_group(
        &self,
        table: TableId,
        random: i32,
        random_seed: i64,
        is_parallel: bool,
        num_ranks: i64,
        ranks: &[i32],
    ) -> Result<TableId> {
        self.tables.made(self.inner.shuffle_renormalization_group(
            table,
            random,
            random_seed,
            is_parallel,
            num_ranks,
            ranks,
        ))
    }

    fn drop_duplicates_table(
        &self,
        table: TableId,
        is_parallel: bool,
        n_keys: i64,
        keep: i64,
        dropna: bool,
        drop_local_first: bool,
    ) -> Result<TableId> {
        self.tables.made(self.inner.drop_duplicates_table(
            table,
            is_parallel,
            n_keys,
            keep,
            dropna,
            drop_local_first,
        ))
    }

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
    ) -> Result<TableId> {
        self.tables.made(self.inner.groupby_and_aggregate(
            table,
            n_keys,
            is_parallel,
            skip_na,
            shift_periods,
            transform_func,
            head_n,
            return_keys,
            return_index,
            dropna,
            ftypes,
            func_offsets,
            udf_n_redvars,
            update_cb,
            combine_cb,
            eval_cb,
            general_udf_cb,
            udf_table,
            n_out_rows,
            n_shuffle_keys,
        ))
    }

    fn get_groupby_labels(
        &self,
        table: TableId,
        out_labels: &mut [i64],
        sort_idx: &mut [i64],
        key_dropna: bool,
        is_parallel: bool,
    ) -> Result<i64> {
        self.inner
            .get_groupby_labels(table, out_labels, sort_idx, key_dropna, is_parallel)
    }

    fn array_isin(
        &self,
        out: &mut [bool],
        in_arr: ArrayId,
        in_values: ArrayId,
        is_parallel: bool,
    ) -> Result<()> {
        self.inner.array_isin(out, in_arr, in_values, is_parallel)
    }

    fn drop_duplicates_local_dictionary(
        &self,
        dict_array: ArrayId,
        sort_dictionary_if_modified: bool,
    ) -> Result<ArrayId> {
        self.arrays.made(
            self.inner
                .drop_duplicates_local_dictionary(dict_array, sort_dictionary_if_modified),
        )
    }

    fn convert_local_dictionary_to_global(
        &self,
        dict_array: ArrayId,
        is_parallel: bool,
        sort_dictionary: bool,
    ) -> Result<ArrayId> {
        self.arrays.made(self.inner.convert_local_dictionary_to_global(
            dict_array,
            is_parallel,
            sort_dictionary,
        ))
    }
}
