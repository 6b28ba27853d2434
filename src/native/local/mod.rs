//! In-process reference engine.
//!
//! [`LocalEngine`] keeps every array, table and shuffle info in an id-keyed
//! registry and implements each boundary entry point over that registry. A
//! `parallel` flag makes operators partition rows into
//! [`EngineConfig::n_workers`] simulated workers; per-partition work runs on
//! rayon. Results come back in worker order, so a parallel call and a
//! sequential call over the same rows agree up to row order.

mod dedup;
mod dict;
mod groupby;
mod join;
mod shuffle;
mod sort;

use super::{
    CombineFn, DictParts, EvalFn, GeneralUdfFn, JoinCondition, NativeArray, NativeEngine,
    NestedParts, UpdateFn,
};
use crate::buffers::{all_valid, bitmap_from_iter, check_data, check_offsets, offset_at, LeafBuffers};
use crate::codec::{decode_type, WireType, NULLABLE_FLAG, TypeDescriptor};
use crate::config::EngineConfig;
use crate::ids::{ArrayId, ShuffleInfoId, TableId};
use anyhow::{anyhow, bail, ensure, Context, Result};
use arrow::buffer::Buffer;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Rows of a shuffled table listed by the input row they came from.
type Routing = Arc<Vec<usize>>;

struct LocalTable {
    columns: Vec<Option<Arc<NativeArray>>>,
    n_rows: usize,
    routing: Option<Routing>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    arrays: HashMap<u64, Arc<NativeArray>>,
    tables: HashMap<u64, LocalTable>,
    shuffle_infos: HashMap<u64, Routing>,
}

impl Registry {
    fn fresh_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Registry-backed engine simulating a fixed set of workers in one process.
pub struct LocalEngine {
    config: EngineConfig,
    pool: Option<rayon::ThreadPool>,
    state: Mutex<Registry>,
}

impl Default for LocalEngine {
    fn default() -> Self {
        Self {
            config: EngineConfig::default(),
            pool: None,
            state: Mutex::new(Registry::default()),
        }
    }
}

impl LocalEngine {
    /// # Errors
    /// When a dedicated thread pool is requested and cannot be built.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let pool = config
            .threads
            .map(|n| rayon::ThreadPoolBuilder::new().num_threads(n).build())
            .transpose()
            .context("building local engine thread pool")?;
        Ok(Self {
            config,
            pool,
            state: Mutex::new(Registry::default()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Number of arrays, tables and shuffle infos currently registered.
    pub fn live_objects(&self) -> (usize, usize, usize) {
        let st = self.lock();
        (st.arrays.len(), st.tables.len(), st.shuffle_infos.len())
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    fn workers(&self, is_parallel: bool) -> usize {
        if is_parallel {
            self.config.n_workers.max(1)
        } else {
            1
        }
    }

    fn register_array(&self, array: Arc<NativeArray>) -> ArrayId {
        let mut st = self.lock();
        let id = st.fresh_id();
        st.arrays.insert(id, array);
        ArrayId::new(id)
    }

    fn array(&self, id: ArrayId) -> Result<Arc<NativeArray>> {
        self.lock()
            .arrays
            .get(&id.raw())
            .cloned()
            .ok_or_else(|| anyhow!("unknown array {}", id.raw()))
    }

    fn register_table(
        &self,
        columns: Vec<Arc<NativeArray>>,
        n_rows: usize,
        routing: Option<Routing>,
    ) -> Result<TableId> {
        if let Some(bad) = columns.iter().position(|c| c.len() != n_rows) {
            bail!(
                "column {bad} has {} rows, table has {n_rows}",
                columns[bad].len()
            );
        }
        let mut st = self.lock();
        let id = st.fresh_id();
        st.tables.insert(
            id,
            LocalTable {
                columns: columns.into_iter().map(Some).collect(),
                n_rows,
                routing,
            },
        );
        Ok(TableId::new(id))
    }

    /// Live columns and row count of `table`.
    fn table(&self, table: TableId) -> Result<(Vec<Arc<NativeArray>>, usize)> {
        let st = self.lock();
        let t = st
            .tables
            .get(&table.raw())
            .ok_or_else(|| anyhow!("unknown table {}", table.raw()))?;
        let columns = t
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                c.clone()
                    .ok_or_else(|| anyhow!("column {i} of table {} was released", table.raw()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((columns, t.n_rows))
    }

    fn gather(&self, columns: &[Arc<NativeArray>], rows: &[usize]) -> Result<Vec<Arc<NativeArray>>> {
        self.install(|| gather(columns, rows))
    }
}

fn gather(columns: &[Arc<NativeArray>], rows: &[usize]) -> Result<Vec<Arc<NativeArray>>> {
    columns
        .par_iter()
        .map(|c| c.take_rows(rows).map(Arc::new))
        .collect()
}

fn gather_opt(columns: &[Arc<NativeArray>], rows: &[Option<usize>]) -> Result<Vec<Arc<NativeArray>>> {
    columns
        .par_iter()
        .map(|c| c.take(rows).map(Arc::new))
        .collect()
}

fn count(v: i64, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| anyhow!("{what} must be non-negative, got {v}"))
}

fn wire(type_code: i32) -> Result<WireType> {
    WireType::from_code(type_code & !NULLABLE_FLAG)
        .ok_or_else(|| anyhow!("unknown type code {type_code}"))
}

fn fixed_wire(type_code: i32) -> Result<(WireType, usize)> {
    let w = wire(type_code)?;
    let width = w
        .byte_width()
        .ok_or_else(|| anyhow!("type code {type_code} is not fixed-width"))?;
    Ok((w, width))
}

impl NativeEngine for LocalEngine {
    fn numpy_array_to_info(&self, length: u64, data: Buffer, type_code: i32) -> Result<ArrayId> {
        let (dtype, width) = fixed_wire(type_code)?;
        ensure!(dtype.primitive().is_some(), "type code {type_code} is not a primitive");
        let len = length as usize;
        check_data(&data, len, width, "numpy_array_to_info")?;
        Ok(self.register_array(Arc::new(NativeArray::Numpy { dtype, len, data })))
    }

    fn nullable_array_to_info(
        &self,
        length: u64,
        data: Buffer,
        type_code: i32,
        null_bitmap: Buffer,
    ) -> Result<ArrayId> {
        let (dtype, width) = fixed_wire(type_code)?;
        ensure!(dtype.primitive().is_some(), "type code {type_code} is not a primitive");
        let len = length as usize;
        check_data(&data, len, width, "nullable_array_to_info")?;
        check_data(&null_bitmap, len.div_ceil(8), 1, "nullable_array_to_info bitmap")?;
        Ok(self.register_array(Arc::new(NativeArray::Nullable {
            dtype,
            len,
            data,
            null_bitmap,
            precision: 0,
            scale: 0,
        })))
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
        ensure!(
            wire(type_code)? == WireType::Decimal,
            "decimal_array_to_info: type code {type_code} is not decimal"
        );
        ensure!(
            (1..=38).contains(&precision) && (0..=precision).contains(&scale),
            "decimal_array_to_info: invalid precision/scale {precision}/{scale}"
        );
        let len = length as usize;
        check_data(&data, len, 16, "decimal_array_to_info")?;
        check_data(&null_bitmap, len.div_ceil(8), 1, "decimal_array_to_info bitmap")?;
        Ok(self.register_array(Arc::new(NativeArray::Nullable {
            dtype: WireType::Decimal,
            len,
            data,
            null_bitmap,
            precision,
            scale,
        })))
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
        let expected = if is_bytes {
            WireType::Binary
        } else {
            WireType::String
        };
        ensure!(
            wire(type_code)? == expected,
            "string_array_to_info: type code {type_code} does not match is_bytes={is_bytes}"
        );
        let len = length as usize;
        check_offsets(&offsets, len, n_chars as usize, "string_array_to_info")?;
        check_data(&data, n_chars as usize, 1, "string_array_to_info")?;
        Ok(self.register_array(Arc::new(NativeArray::String {
            is_binary: is_bytes,
            len,
            offsets,
            data,
            null_bitmap,
        })))
    }

    fn nested_array_to_info(
        &self,
        type_tags: &[i32],
        lengths: &[u64],
        buffers: Vec<Option<Buffer>>,
        field_names: &[String],
    ) -> Result<ArrayId> {
        let ty = decode_type(&TypeDescriptor {
            tags: type_tags.to_vec(),
            names: field_names.to_vec(),
        })?;
        ensure!(ty.is_nested(), "nested_array_to_info: {ty} is not a nested type");
        let arr = NativeArray::from_nested_parts(&ty, lengths, &buffers)?;
        debug!(ty = %ty, len = arr.len(), "nested array registered");
        Ok(self.register_array(Arc::new(arr)))
    }

    fn dict_str_array_to_info(
        &self,
        dictionary: ArrayId,
        indices: ArrayId,
        has_global_dictionary: bool,
        has_deduped_local_dictionary: bool,
    ) -> Result<ArrayId> {
        let (dict, idx) = {
            let mut st = self.lock();
            (
                st.arrays.remove(&dictionary.raw()),
                st.arrays.remove(&indices.raw()),
            )
        };
        let dict = dict.ok_or_else(|| anyhow!("unknown dictionary array {}", dictionary.raw()))?;
        let idx = idx.ok_or_else(|| anyhow!("unknown indices array {}", indices.raw()))?;
        ensure!(
            matches!(dict.as_ref(), NativeArray::String { is_binary: false, .. }),
            "dictionary must be a string array, got {}",
            dict.kind()
        );
        ensure!(
            matches!(
                idx.as_ref(),
                NativeArray::Nullable {
                    dtype: WireType::Int32,
                    ..
                } | NativeArray::Numpy {
                    dtype: WireType::Int32,
                    ..
                }
            ),
            "dictionary indices must be int32, got {}",
            idx.kind()
        );
        let n_dict = dict.len() as i64;
        if let Some(bad) = (0..idx.len())
            .filter_map(|i| idx.value(i).as_i64())
            .find(|k| !(0..n_dict).contains(k))
        {
            bail!("dictionary index {bad} out of range for {n_dict} entries");
        }
        Ok(self.register_array(Arc::new(NativeArray::Dict {
            dictionary: dict,
            indices: idx,
            has_global_dictionary,
            has_deduped_local_dictionary,
        })))
    }

    fn categorical_array_to_info(
        &self,
        length: u64,
        codes: Buffer,
        type_code: i32,
        num_categories: u64,
    ) -> Result<ArrayId> {
        let (dtype, width) = fixed_wire(type_code)?;
        ensure!(
            matches!(
                dtype,
                WireType::UInt8 | WireType::UInt16 | WireType::UInt32 | WireType::UInt64
            ),
            "categorical codes must be unsigned, got type code {type_code}"
        );
        let len = length as usize;
        check_data(&codes, len, width, "categorical_array_to_info")?;
        Ok(self.register_array(Arc::new(NativeArray::Categorical {
            dtype,
            len,
            codes,
            num_categories,
        })))
    }

    fn interval_array_to_info(
        &self,
        length: u64,
        left: Buffer,
        right: Buffer,
        type_code: i32,
    ) -> Result<ArrayId> {
        let (dtype, width) = fixed_wire(type_code)?;
        let len = length as usize;
        check_data(&left, len, width, "interval_array_to_info left")?;
        check_data(&right, len, width, "interval_array_to_info right")?;
        Ok(self.register_array(Arc::new(NativeArray::Interval {
            dtype,
            len,
            left,
            right,
        })))
    }

    fn array_length(&self, array: ArrayId) -> Result<u64> {
        Ok(self.array(array)?.len() as u64)
    }

    fn info_to_numpy_array(&self, array: ArrayId) -> Result<LeafBuffers> {
        match self.array(array)?.as_ref() {
            NativeArray::Numpy { dtype, len, data } => Ok(LeafBuffers {
                type_code: dtype.code(),
                len: *len,
                data: Some(data.clone()),
                ..LeafBuffers::default()
            }),
            other => bail!("info_to_numpy_array: {} array has no plain layout", other.kind()),
        }
    }

    fn info_to_nullable_array(&self, array: ArrayId) -> Result<LeafBuffers> {
        let arr = self.array(array)?;
        match arr.as_ref() {
            NativeArray::Nullable {
                dtype,
                len,
                data,
                null_bitmap,
                ..
            } => Ok(LeafBuffers {
                type_code: dtype.code(),
                len: *len,
                data: Some(data.clone()),
                validity: Some(null_bitmap.clone()),
                ..LeafBuffers::default()
            }),
            NativeArray::Numpy { dtype, len, data } => {
                let validity = if dtype.primitive().is_some_and(|p| p.is_float() || p.has_nat()) {
                    bitmap_from_iter(*len, (0..*len).map(|i| !arr.is_na(i)))
                } else {
                    all_valid(*len)
                };
                Ok(LeafBuffers {
                    type_code: dtype.code(),
                    len: *len,
                    data: Some(data.clone()),
                    validity: Some(validity),
                    ..LeafBuffers::default()
                })
            }
            other => bail!("info_to_nullable_array: {} array has no nullable layout", other.kind()),
        }
    }

    fn info_to_string_array(&self, array: ArrayId) -> Result<LeafBuffers> {
        match self.array(array)?.as_ref() {
            NativeArray::String {
                is_binary,
                len,
                offsets,
                data,
                null_bitmap,
            } => Ok(LeafBuffers {
                type_code: if *is_binary {
                    WireType::Binary.code()
                } else {
                    WireType::String.code()
                },
                len: *len,
                n_chars: offset_at(offsets, *len),
                data: Some(data.clone()),
                validity: Some(null_bitmap.clone()),
                offsets: Some(offsets.clone()),
            }),
            other => bail!("info_to_string_array: {} array is not a string array", other.kind()),
        }
    }

    fn get_nested_info(&self, array: ArrayId) -> Result<NestedParts> {
        let arr = self.array(array)?;
        ensure!(
            matches!(arr.as_ref(), NativeArray::List { .. } | NativeArray::Struct { .. }),
            "get_nested_info: {} array is not nested",
            arr.kind()
        );
        let mut parts = NestedParts::default();
        arr.nested_parts(&mut parts.lengths, &mut parts.buffers)?;
        Ok(parts)
    }

    fn info_to_dict_parts(&self, array: ArrayId) -> Result<DictParts> {
        match self.array(array)?.as_ref() {
            NativeArray::Dict {
                dictionary,
                indices,
                has_global_dictionary,
                has_deduped_local_dictionary,
            } => Ok(DictParts {
                dictionary: self.register_array(Arc::clone(dictionary)),
                indices: self.register_array(Arc::clone(indices)),
                has_global_dictionary: *has_global_dictionary,
                has_deduped_local_dictionary: *has_deduped_local_dictionary,
            }),
            other => bail!("info_to_dict_parts: {} array is not dictionary-encoded", other.kind()),
        }
    }

    fn info_to_categorical_array(&self, array: ArrayId) -> Result<(LeafBuffers, u64)> {
        match self.array(array)?.as_ref() {
            NativeArray::Categorical {
                dtype,
                len,
                codes,
                num_categories,
            } => Ok((
                LeafBuffers {
                    type_code: dtype.code(),
                    len: *len,
                    data: Some(codes.clone()),
                    ..LeafBuffers::default()
                },
                *num_categories,
            )),
            other => bail!("info_to_categorical_array: {} array is not categorical", other.kind()),
        }
    }

    fn info_to_interval_array(&self, array: ArrayId) -> Result<(LeafBuffers, LeafBuffers)> {
        match self.array(array)?.as_ref() {
            NativeArray::Interval {
                dtype,
                len,
                left,
                right,
            } => {
                let side = |data: &Buffer| LeafBuffers {
                    type_code: dtype.code(),
                    len: *len,
                    data: Some(data.clone()),
                    ..LeafBuffers::default()
                };
                Ok((side(left), side(right)))
            }
            other => bail!("info_to_interval_array: {} array is not an interval array", other.kind()),
        }
    }

    fn delete_info(&self, array: ArrayId) -> Result<()> {
        self.lock()
            .arrays
            .remove(&array.raw())
            .map(drop)
            .ok_or_else(|| anyhow!("delete_info: unknown array {}", array.raw()))
    }

    fn arr_info_list_to_table(&self, arrays: &[ArrayId]) -> Result<TableId> {
        let taken: Vec<Option<Arc<NativeArray>>> = {
            let mut st = self.lock();
            arrays.iter().map(|id| st.arrays.remove(&id.raw())).collect()
        };
        let columns = taken
            .into_iter()
            .zip(arrays)
            .map(|(c, id)| c.ok_or_else(|| anyhow!("unknown array {}", id.raw())))
            .collect::<Result<Vec<_>>>()?;
        let n_rows = columns.first().map_or(0, |c| c.len());
        self.register_table(columns, n_rows, None)
    }

    fn info_from_table(&self, table: TableId, col: u64) -> Result<ArrayId> {
        let column = {
            let st = self.lock();
            let t = st
                .tables
                .get(&table.raw())
                .ok_or_else(|| anyhow!("unknown table {}", table.raw()))?;
            t.columns
                .get(col as usize)
                .ok_or_else(|| anyhow!("table {} has no column {col}", table.raw()))?
                .clone()
                .ok_or_else(|| anyhow!("column {col} of table {} was released", table.raw()))?
        };
        Ok(self.register_array(column))
    }

    fn table_shape(&self, table: TableId) -> Result<(u64, u64)> {
        let st = self.lock();
        let t = st
            .tables
            .get(&table.raw())
            .ok_or_else(|| anyhow!("unknown table {}", table.raw()))?;
        Ok((t.n_rows as u64, t.columns.len() as u64))
    }

    fn delete_table(&self, table: TableId) -> Result<()> {
        self.lock()
            .tables
            .remove(&table.raw())
            .map(drop)
            .ok_or_else(|| anyhow!("delete_table: unknown table {}", table.raw()))
    }

    fn decref_table_array(&self, table: TableId, col: u64) -> Result<()> {
        let mut st = self.lock();
        let t = st
            .tables
            .get_mut(&table.raw())
            .ok_or_else(|| anyhow!("unknown table {}", table.raw()))?;
        let slot = t
            .columns
            .get_mut(col as usize)
            .ok_or_else(|| anyhow!("table {} has no column {col}", table.raw()))?;
        slot.take()
            .map(drop)
            .ok_or_else(|| anyhow!("column {col} of table {} was already released", table.raw()))
    }

    fn delete_table_decref_arrays(&self, table: TableId) -> Result<()> {
        let mut t = self
            .lock()
            .tables
            .remove(&table.raw())
            .ok_or_else(|| anyhow!("unknown table {}", table.raw()))?;
        let released = t.columns.iter_mut().filter_map(Option::take).count();
        debug!(table = table.raw(), released, "table and columns released");
        Ok(())
    }

    fn shuffle_table(
        &self,
        table: TableId,
        n_keys: i64,
        is_parallel: bool,
        keep_comm_info: i32,
    ) -> Result<TableId> {
        let (columns, n_rows) = self.table(table)?;
        let n_keys = count(n_keys, "n_keys")?;
        ensure!(n_keys <= columns.len(), "shuffle on {n_keys} keys of a {}-column table", columns.len());
        let workers = self.workers(is_parallel);
        let routing = self.install(|| shuffle::hash_partition(&columns, n_keys, n_rows, workers));
        let out = self.gather(&columns, &routing)?;
        debug!(n_rows, workers, "shuffle_table");
        let keep = (keep_comm_info != 0).then(|| Arc::new(routing));
        self.register_table(out, n_rows, keep)
    }

    fn get_shuffle_info(&self, table: TableId) -> Result<Option<ShuffleInfoId>> {
        let mut st = self.lock();
        let routing = st
            .tables
            .get(&table.raw())
            .ok_or_else(|| anyhow!("unknown table {}", table.raw()))?
            .routing
            .clone();
        Ok(routing.map(|r| {
            let id = st.fresh_id();
            st.shuffle_infos.insert(id, r);
            ShuffleInfoId::new(id)
        }))
    }

    fn delete_shuffle_info(&self, info: ShuffleInfoId) -> Result<()> {
        self.lock()
            .shuffle_infos
            .remove(&info.raw())
            .map(drop)
            .ok_or_else(|| anyhow!("delete_shuffle_info: unknown shuffle info {}", info.raw()))
    }

    fn reverse_shuffle_table(&self, table: TableId, info: ShuffleInfoId) -> Result<TableId> {
        let routing = self
            .lock()
            .shuffle_infos
            .get(&info.raw())
            .cloned()
            .ok_or_else(|| anyhow!("unknown shuffle info {}", info.raw()))?;
        let (columns, n_rows) = self.table(table)?;
        let back = shuffle::invert(&routing, n_rows)?;
        let out = self.gather(&columns, &back)?;
        self.register_table(out, n_rows, None)
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
        let (lcols, _) = self.table(left)?;
        let (rcols, _) = self.table(right)?;
        let layout = join::JoinLayout {
            n_keys: count(n_keys, "n_keys")?,
            n_data_left: count(n_data_left, "n_data_left")?,
            n_data_right: count(n_data_right, "n_data_right")?,
            same_key: vect_same_key,
            key_in_output,
        };
        layout.validate(lcols.len(), rcols.len())?;
        debug!(
            left_parallel,
            right_parallel,
            is_left,
            is_right,
            conditional = cond_func.is_some(),
            "hash_join_table"
        );
        let pairs = self.install(|| {
            join::hash_match(&lcols, &rcols, &layout, is_left, is_right, is_na_equal, cond_func)
        });
        let out = self.install(|| join::assemble(&lcols, &rcols, &pairs, &layout))?;
        *num_rows = pairs.len() as u64;
        self.register_table(out, pairs.len(), None)
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
        let (lcols, ln) = self.table(left)?;
        let (rcols, rn) = self.table(right)?;
        let keep_all = vec![true; lcols.len() + rcols.len()];
        let keep = if key_in_output.is_empty() {
            &keep_all[..]
        } else {
            key_in_output
        };
        let layout = join::JoinLayout {
            n_keys: 0,
            n_data_left: lcols.len(),
            n_data_right: rcols.len(),
            same_key: &[],
            key_in_output: keep,
        };
        layout.validate(lcols.len(), rcols.len())?;
        debug!(left_parallel, right_parallel, ln, rn, "cross_join_table");
        let pairs = self.install(|| join::cross_match(&lcols, &rcols, ln, rn, is_left, is_right, cond_func));
        let out = self.install(|| join::assemble(&lcols, &rcols, &pairs, &layout))?;
        *num_rows = pairs.len() as u64;
        self.register_table(out, pairs.len(), None)
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
        let (columns, n_rows) = self.table(table)?;
        let order = sort::SortOrder::new(count(n_keys, "n_keys")?, vect_ascending, na_position)?;
        ensure!(
            order.n_keys() <= columns.len(),
            "sort on {} keys of a {}-column table",
            order.n_keys(),
            columns.len()
        );
        let bounds = match bounds {
            Some(b) if is_parallel => Some(self.table(b)?.0),
            _ => None,
        };
        let rows = self.install(|| sort::sorted_rows(&columns, n_rows, &order, bounds.as_deref()))?;
        let kept: Vec<Arc<NativeArray>> = columns
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !dead_keys.get(*i).copied().unwrap_or(false))
            .map(|(_, c)| c)
            .collect();
        let out = self.gather(&kept, &rows)?;
        *out_n_rows = rows.len() as i64;
        self.register_table(out, rows.len(), None)
    }

    fn sample_table(
        &self,
        table: TableId,
        n: i64,
        frac: f64,
        replace: bool,
        is_parallel: bool,
    ) -> Result<TableId> {
        let (columns, n_rows) = self.table(table)?;
        let rows = shuffle::sample_rows(n_rows, n, frac, replace, self.config.seed)?;
        debug!(n_rows, sampled = rows.len(), is_parallel, "sample_table");
        let out = self.gather(&columns, &rows)?;
        self.register_table(out, rows.len(), None)
    }

    fn shuffle_renormalization(
        &self,
        table: TableId,
        random: i32,
        random_seed: i64,
        is_parallel: bool,
    ) -> Result<TableId> {
        let (columns, n_rows) = self.table(table)?;
        let seed = shuffle::renormalization_seed(random, random_seed, self.config.seed)?;
        let ranks: Vec<usize> = (0..self.workers(is_parallel)).collect();
        let rows = shuffle::rebalance(n_rows, &ranks, self.workers(is_parallel), seed);
        let out = self.gather(&columns, &rows)?;
        self.register_table(out, n_rows, None)
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
        let (columns, n_rows) = self.table(table)?;
        let seed = shuffle::renormalization_seed(random, random_seed, self.config.seed)?;
        let workers = self.workers(is_parallel);
        let ranks = shuffle::validate_ranks(count(num_ranks, "num_ranks")?, ranks, workers)?;
        let rows = shuffle::rebalance(n_rows, &ranks, workers, seed);
        let out = self.gather(&columns, &rows)?;
        self.register_table(out, n_rows, None)
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
        let (columns, n_rows) = self.table(table)?;
        let n_keys = count(n_keys, "n_keys")?;
        ensure!(n_keys <= columns.len(), "dedup on {n_keys} keys of a {}-column table", columns.len());
        let keep = dedup::Keep::from_code(keep)?;
        debug!(n_rows, is_parallel, drop_local_first, "drop_duplicates_table");
        let rows = self.install(|| dedup::kept_rows(&columns, n_keys, n_rows, keep, dropna));
        let out = self.gather(&columns, &rows)?;
        self.register_table(out, rows.len(), None)
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
        let (columns, n_rows) = self.table(table)?;
        let udf_columns = udf_table.map(|t| self.table(t)).transpose()?.map(|(c, _)| c);
        let n_keys = count(n_keys, "n_keys")?;
        let n_shuffle_keys = count(n_shuffle_keys, "n_shuffle_keys")?;
        ensure!(
            n_shuffle_keys <= n_keys,
            "n_shuffle_keys {n_shuffle_keys} exceeds the {n_keys} group keys"
        );
        let req = groupby::GroupbyRequest {
            n_keys,
            workers: self.workers(is_parallel),
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
            update: update_cb,
            combine: combine_cb,
            eval: eval_cb,
            general: general_udf_cb,
            udf_columns: udf_columns.as_deref(),
        };
        let (out, rows) = self.install(|| groupby::aggregate(&columns, n_rows, &req))?;
        *n_out_rows = rows as i64;
        self.register_table(out, rows, None)
    }

    fn get_groupby_labels(
        &self,
        table: TableId,
        out_labels: &mut [i64],
        sort_idx: &mut [i64],
        key_dropna: bool,
        is_parallel: bool,
    ) -> Result<i64> {
        let (columns, n_rows) = self.table(table)?;
        ensure!(
            out_labels.len() == n_rows && sort_idx.len() == n_rows,
            "label buffers hold {} and {} rows, table has {n_rows}",
            out_labels.len(),
            sort_idx.len()
        );
        debug!(n_rows, is_parallel, "get_groupby_labels");
        let n_groups = self.install(|| {
            groupby::labels(&columns, n_rows, key_dropna, out_labels, sort_idx)
        });
        Ok(n_groups as i64)
    }

    fn array_isin(
        &self,
        out: &mut [bool],
        in_arr: ArrayId,
        in_values: ArrayId,
        is_parallel: bool,
    ) -> Result<()> {
        let arr = self.array(in_arr)?;
        let values = self.array(in_values)?;
        ensure!(
            out.len() == arr.len(),
            "array_isin: output holds {} elements, input has {}",
            out.len(),
            arr.len()
        );
        debug!(n = arr.len(), is_parallel, "array_isin");
        self.install(|| dedup::isin(&arr, &values, out));
        Ok(())
    }

    fn drop_duplicates_local_dictionary(
        &self,
        dict_array: ArrayId,
        sort_dictionary_if_modified: bool,
    ) -> Result<ArrayId> {
        let arr = self.array(dict_array)?;
        let out = dict::dedup_dictionary(&arr, sort_dictionary_if_modified)?;
        Ok(self.register_array(Arc::new(out)))
    }

    fn convert_local_dictionary_to_global(
        &self,
        dict_array: ArrayId,
        is_parallel: bool,
        sort_dictionary: bool,
    ) -> Result<ArrayId> {
        let arr = self.array(dict_array)?;
        debug!(is_parallel, sort_dictionary, "convert_local_dictionary_to_global");
        let out = dict::to_global(&arr, sort_dictionary)?;
        Ok(self.register_array(Arc::new(out)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArrayType, PrimitiveType};
    use crate::value::Value;

    fn ints(engine: &LocalEngine, vals: &[i64]) -> ArrayId {
        let arr = NativeArray::from_values(
            &ArrayType::Primitive(PrimitiveType::Int64),
            &vals.iter().map(|&v| Value::Int(v)).collect::<Vec<_>>(),
        )
        .unwrap();
        engine.register_array(Arc::new(arr))
    }

    #[test]
    fn table_assembly_consumes_arrays() {
        let engine = LocalEngine::default();
        let a = ints(&engine, &[1, 2]);
        let b = ints(&engine, &[3, 4]);
        let t = engine.arr_info_list_to_table(&[a, b]).unwrap();
        assert_eq!(engine.live_objects(), (0, 1, 0));
        assert_eq!(engine.table_shape(t).unwrap(), (2, 2));
        engine.delete_table(t).unwrap();
        assert_eq!(engine.live_objects(), (0, 0, 0));
    }

    #[test]
    fn released_column_cannot_be_read() {
        let engine = LocalEngine::default();
        let t = engine.arr_info_list_to_table(&[ints(&engine, &[1])]).unwrap();
        engine.decref_table_array(t, 0).unwrap();
        assert!(engine.info_from_table(t, 0).is_err());
        assert!(engine.decref_table_array(t, 0).is_err());
        engine.delete_table_decref_arrays(t).unwrap();
    }

    #[test]
    fn ragged_leaf_buffer_is_refused() {
        let engine = LocalEngine::default();
        let int64 = WireType::of(PrimitiveType::Int64).code();
        assert!(engine.numpy_array_to_info(1, Buffer::from_vec(vec![0u8; 9]), int64).is_err());
        let shifted = Buffer::from_vec(vec![0i64; 3]).slice_with_length(4, 16);
        assert!(engine.numpy_array_to_info(2, shifted, int64).is_err());
        assert_eq!(engine.live_objects(), (0, 0, 0));
    }

    #[test]
    fn unknown_ids_are_errors() {
        let engine = LocalEngine::default();
        assert!(engine.delete_info(ArrayId::new(99)).is_err());
        assert!(engine.table_shape(TableId::new(99)).is_err());
    }

    #[test]
    fn plain_view_of_nullable_array_fails() {
        let engine = LocalEngine::default();
        let arr = NativeArray::from_values(
            &ArrayType::Nullable(PrimitiveType::Int32),
            &[Value::Int(1), Value::Null],
        )
        .unwrap();
        let id = engine.register_array(Arc::new(arr));
        assert!(engine.info_to_numpy_array(id).is_err());
        let leaf = engine.info_to_nullable_array(id).unwrap();
        assert_eq!(leaf.len, 2);
    }
}
