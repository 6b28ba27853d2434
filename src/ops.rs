//! Distributed table operators.
//!
//! Thin wrappers that forward a table handle and its parameters to the
//! engine's positional entry points and wrap the result. Input tables are
//! borrowed; every call returns freshly owned handles. "Parallel" flags are
//! passed through untouched: coordinating workers is the engine's job.
//!
//! None of these retry. A native failure comes back as one
//! [`NativeOperationFailure`](crate::ErrorKind::NativeOperationFailure) with
//! the engine's message.

use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{ArrayHandle, ShuffleInfoHandle, TableHandle};
use crate::metrics::OPERATOR_CALLS;
use crate::native::{CombineFn, EvalFn, GeneralUdfFn, JoinCondition, UpdateFn};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Built-in aggregation codes understood by `groupby_and_aggregate`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum AggFunc {
    NoOp = 0,
    Ngroup = 1,
    Head = 2,
    Transform = 3,
    Size = 4,
    Shift = 5,
    Sum = 6,
    Count = 7,
    Nunique = 8,
    Median = 9,
    Cumsum = 10,
    Cumprod = 11,
    Cummin = 12,
    Cummax = 13,
    Mean = 14,
    Min = 15,
    Max = 16,
    Prod = 17,
    First = 18,
    Last = 19,
    Idxmin = 20,
    Idxmax = 21,
    Var = 22,
    Std = 23,
    BoolorAgg = 24,
    Udf = 25,
    GenUdf = 26,
}

const ALL_AGG_FUNCS: [AggFunc; 27] = [
    AggFunc::NoOp,
    AggFunc::Ngroup,
    AggFunc::Head,
    AggFunc::Transform,
    AggFunc::Size,
    AggFunc::Shift,
    AggFunc::Sum,
    AggFunc::Count,
    AggFunc::Nunique,
    AggFunc::Median,
    AggFunc::Cumsum,
    AggFunc::Cumprod,
    AggFunc::Cummin,
    AggFunc::Cummax,
    AggFunc::Mean,
    AggFunc::Min,
    AggFunc::Max,
    AggFunc::Prod,
    AggFunc::First,
    AggFunc::Last,
    AggFunc::Idxmin,
    AggFunc::Idxmax,
    AggFunc::Var,
    AggFunc::Std,
    AggFunc::BoolorAgg,
    AggFunc::Udf,
    AggFunc::GenUdf,
];

impl AggFunc {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| ALL_AGG_FUNCS.get(i).copied())
    }

    /// Functions producing one output row per input row (or per kept row)
    /// rather than one per group.
    pub fn is_row_aligned(self) -> bool {
        matches!(
            self,
            Self::Ngroup
                | Self::Head
                | Self::Transform
                | Self::Shift
                | Self::Cumsum
                | Self::Cumprod
                | Self::Cummin
                | Self::Cummax
        )
    }
}

/// Which duplicate row `drop_duplicates_table` keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeepPolicy {
    First,
    Last,
    /// Drop every row whose key occurs more than once.
    DropAll,
}

impl KeepPolicy {
    pub fn code(self) -> i64 {
        match self {
            Self::First => 0,
            Self::Last => 1,
            Self::DropAll => 2,
        }
    }
}

/// Where renormalization takes its randomness from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandomSource {
    /// Keep row order.
    Off,
    /// Permute rows with an engine-chosen seed.
    Engine,
    /// Permute rows with the seed passed alongside.
    Seeded,
}

impl RandomSource {
    pub fn code(self) -> i32 {
        match self {
            Self::Off => 0,
            Self::Engine => 1,
            Self::Seeded => 2,
        }
    }
}

/// Parameters of an equality join.
///
/// Both tables hold their `n_keys` key columns first, then their data
/// columns. `key_in_output` has one flag per left column followed by one per
/// right column. A right key with `same_key` set is merged into the matching
/// left key column and never emitted on its own.
#[derive(Clone, Debug, Default)]
pub struct HashJoinOptions {
    pub left_parallel: bool,
    pub right_parallel: bool,
    pub n_keys: usize,
    pub n_data_left: usize,
    pub n_data_right: usize,
    pub same_key: Vec<bool>,
    pub key_in_output: Vec<bool>,
    pub is_left: bool,
    pub is_right: bool,
    pub is_na_equal: bool,
}

impl HashJoinOptions {
    /// Inner join on `n_keys` shared keys, every column kept and keys merged.
    pub fn inner(n_keys: usize, n_data_left: usize, n_data_right: usize) -> Self {
        Self {
            n_keys,
            n_data_left,
            n_data_right,
            same_key: vec![true; n_keys],
            key_in_output: vec![true; 2 * n_keys + n_data_left + n_data_right],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn outer(mut self, is_left: bool, is_right: bool) -> Self {
        self.is_left = is_left;
        self.is_right = is_right;
        self
    }
}

/// Parameters of a cross join. `key_in_output` has one flag per left column
/// followed by one per right column.
#[derive(Clone, Debug, Default)]
pub struct CrossJoinOptions {
    pub left_parallel: bool,
    pub right_parallel: bool,
    pub is_left: bool,
    pub is_right: bool,
    pub key_in_output: Vec<bool>,
}

/// Parameters of a sort. `na_last[i]` places nulls of key `i` last.
#[derive(Clone, Debug, Default)]
pub struct SortOptions {
    pub n_keys: usize,
    pub ascending: Vec<bool>,
    pub na_last: Vec<bool>,
    /// Keys dropped from the output after sorting.
    pub dead_keys: Vec<bool>,
    pub is_parallel: bool,
}

impl SortOptions {
    /// Ascending on every key, nulls last.
    pub fn ascending(n_keys: usize) -> Self {
        Self {
            n_keys,
            ascending: vec![true; n_keys],
            na_last: vec![true; n_keys],
            dead_keys: vec![false; n_keys],
            is_parallel: false,
        }
    }
}

/// Parameters of a grouped aggregation.
///
/// Data column `c` (counting after the keys) is aggregated with
/// `ftypes[func_offsets[c]..func_offsets[c + 1]]`.
#[derive(Clone, Debug)]
pub struct GroupbyOptions {
    pub n_keys: usize,
    pub is_parallel: bool,
    pub skip_na: bool,
    pub shift_periods: i64,
    pub transform_func: AggFunc,
    pub head_n: i64,
    pub return_keys: bool,
    /// The input's last column is an index column carried along, not aggregated.
    pub return_index: bool,
    pub dropna: bool,
    pub ftypes: Vec<AggFunc>,
    pub func_offsets: Vec<usize>,
    /// Reduction variable count of each `Udf` in order of appearance.
    pub udf_n_redvars: Vec<usize>,
    /// Leading keys used to route rows between workers; all keys when `None`.
    pub n_shuffle_keys: Option<usize>,
}

impl GroupbyOptions {
    /// One function per data column, keys returned, nulls skipped.
    pub fn per_column(n_keys: usize, ftypes: Vec<AggFunc>) -> Self {
        let func_offsets = (0..=ftypes.len()).collect();
        Self {
            n_keys,
            is_parallel: false,
            skip_na: true,
            shift_periods: 1,
            transform_func: AggFunc::NoOp,
            head_n: 5,
            return_keys: true,
            return_index: false,
            dropna: true,
            ftypes,
            func_offsets,
            udf_n_redvars: Vec::new(),
            n_shuffle_keys: None,
        }
    }
}

/// Optional caller hooks for `groupby_and_aggregate`.
#[derive(Clone, Copy, Default)]
pub struct GroupbyCallbacks<'a> {
    pub update: Option<&'a UpdateFn>,
    pub combine: Option<&'a CombineFn>,
    pub eval: Option<&'a EvalFn>,
    pub general: Option<&'a GeneralUdfFn>,
}

/// Result of [`Bridge::get_groupby_labels`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupLabels {
    pub n_groups: usize,
    /// Group of each row, -1 for rows dropped for a null key.
    pub labels: Vec<i64>,
    /// Row indices ordered by label.
    pub sort_idx: Vec<i64>,
}

fn as_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl Bridge {
    fn enter(&self, op: &str, table: &TableHandle) {
        self.bump(OPERATOR_CALLS, 1);
        debug!(op, table = table.id().raw(), "operator call");
    }

    fn row_count(&self, entry: &str, raw: i64) -> BridgeResult<usize> {
        usize::try_from(raw).map_err(|_| {
            BridgeError::shape(format!("{entry}: engine reported {raw} output rows"))
        })
    }

    /// Redistribute rows across workers by hashing the first `n_keys` columns.
    ///
    /// With `keep_routing_info` the engine remembers how rows moved; fetch it
    /// with [`Bridge::get_shuffle_info`].
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine.
    pub fn shuffle_table(
        &self,
        table: &TableHandle,
        n_keys: usize,
        is_parallel: bool,
        keep_routing_info: bool,
    ) -> BridgeResult<TableHandle> {
        self.enter("shuffle_table", table);
        let id = self.call(
            "shuffle_table",
            self.engine().shuffle_table(
                table.id(),
                as_i64(n_keys),
                is_parallel,
                i32::from(keep_routing_info),
            ),
        )?;
        Ok(self.wrap_table(id))
    }

    /// Routing metadata of the shuffle that produced `table`, if it kept any.
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine.
    pub fn get_shuffle_info(&self, table: &TableHandle) -> BridgeResult<Option<ShuffleInfoHandle>> {
        let info = self.call("get_shuffle_info", self.engine().get_shuffle_info(table.id()))?;
        Ok(info.map(|id| self.wrap_shuffle_info(id)))
    }

    /// Send rows back to where a shuffle took them from.
    ///
    /// # Errors
    /// `NativeOperationFailure` when `table` does not fit the routing info.
    pub fn reverse_shuffle_table(
        &self,
        table: &TableHandle,
        info: &ShuffleInfoHandle,
    ) -> BridgeResult<TableHandle> {
        self.enter("reverse_shuffle_table", table);
        let id = self.call(
            "reverse_shuffle_table",
            self.engine().reverse_shuffle_table(table.id(), info.id()),
        )?;
        Ok(self.wrap_table(id))
    }

    /// Equality join on the leading key columns; returns the table and its row count.
    ///
    /// When `cond` is given, a row pair matches only if its keys are equal and
    /// `cond` accepts it. Outer flags then emit the rows that found no such
    /// match, null-filled on the other side.
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine.
    pub fn hash_join_table(
        &self,
        left: &TableHandle,
        right: &TableHandle,
        opts: &HashJoinOptions,
        cond: Option<&JoinCondition>,
    ) -> BridgeResult<(TableHandle, usize)> {
        self.enter("hash_join_table", left);
        let mut num_rows = 0u64;
        let id = self.call(
            "hash_join_table",
            self.engine().hash_join_table(
                left.id(),
                right.id(),
                opts.left_parallel,
                opts.right_parallel,
                as_i64(opts.n_keys),
                as_i64(opts.n_data_left),
                as_i64(opts.n_data_right),
                &opts.same_key,
                &opts.key_in_output,
                opts.is_left,
                opts.is_right,
                opts.is_na_equal,
                cond,
                &mut num_rows,
            ),
        )?;
        Ok((self.wrap_table(id), num_rows as usize))
    }

    /// Cartesian product, optionally filtered by `cond`.
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine.
    pub fn cross_join_table(
        &self,
        left: &TableHandle,
        right: &TableHandle,
        opts: &CrossJoinOptions,
        cond: Option<&JoinCondition>,
    ) -> BridgeResult<(TableHandle, usize)> {
        self.enter("cross_join_table", left);
        let mut num_rows = 0u64;
        let id = self.call(
            "cross_join_table",
            self.engine().cross_join_table(
                left.id(),
                right.id(),
                opts.left_parallel,
                opts.right_parallel,
                opts.is_left,
                opts.is_right,
                &opts.key_in_output,
                cond,
                &mut num_rows,
            ),
        )?;
        Ok((self.wrap_table(id), num_rows as usize))
    }

    /// Multi-key stable sort. `bounds` optionally holds precomputed range
    /// boundaries (one row per boundary, key columns only) for a parallel sort.
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine.
    pub fn sort_values_table(
        &self,
        table: &TableHandle,
        opts: &SortOptions,
        bounds: Option<&TableHandle>,
    ) -> BridgeResult<(TableHandle, usize)> {
        self.enter("sort_values_table", table);
        let mut out_rows = 0i64;
        let id = self.call(
            "sort_values_table",
            self.engine().sort_values_table(
                table.id(),
                as_i64(opts.n_keys),
                &opts.ascending,
                &opts.na_last,
                &opts.dead_keys,
                &mut out_rows,
                bounds.map(TableHandle::id),
                opts.is_parallel,
            ),
        )?;
        let handle = self.wrap_table(id);
        Ok((handle, self.row_count("sort_values_table", out_rows)?))
    }

    /// Random sample of `n` rows, or of `frac * rows` when `n` is `None`.
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine, for example when sampling
    /// more rows than exist without replacement.
    pub fn sample_table(
        &self,
        table: &TableHandle,
        n: Option<usize>,
        frac: f64,
        replace: bool,
        is_parallel: bool,
    ) -> BridgeResult<TableHandle> {
        self.enter("sample_table", table);
        let id = self.call(
            "sample_table",
            self.engine()
                .sample_table(table.id(), n.map_or(-1, as_i64), frac, replace, is_parallel),
        )?;
        Ok(self.wrap_table(id))
    }

    /// Even out row counts across workers.
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine.
    pub fn shuffle_renormalization(
        &self,
        table: &TableHandle,
        random: RandomSource,
        seed: i64,
        is_parallel: bool,
    ) -> BridgeResult<TableHandle> {
        self.enter("shuffle_renormalization", table);
        let id = self.call(
            "shuffle_renormalization",
            self.engine()
                .shuffle_renormalization(table.id(), random.code(), seed, is_parallel),
        )?;
        Ok(self.wrap_table(id))
    }

    /// Even out row counts across the workers listed in `ranks`.
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine, for example on an unknown rank.
    pub fn shuffle_renormalization_group(
        &self,
        table: &TableHandle,
        random: RandomSource,
        seed: i64,
        is_parallel: bool,
        ranks: &[i32],
    ) -> BridgeResult<TableHandle> {
        self.enter("shuffle_renormalization_group", table);
        let id = self.call(
            "shuffle_renormalization_group",
            self.engine().shuffle_renormalization_group(
                table.id(),
                random.code(),
                seed,
                is_parallel,
                as_i64(ranks.len()),
                ranks,
            ),
        )?;
        Ok(self.wrap_table(id))
    }

    /// Drop rows whose first `n_keys` columns repeat an earlier (or later) row.
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine.
    pub fn drop_duplicates_table(
        &self,
        table: &TableHandle,
        is_parallel: bool,
        n_keys: usize,
        keep: KeepPolicy,
        dropna: bool,
        pre_dedup_locally: bool,
    ) -> BridgeResult<TableHandle> {
        self.enter("drop_duplicates_table", table);
        let id = self.call(
            "drop_duplicates_table",
            self.engine().drop_duplicates_table(
                table.id(),
                is_parallel,
                as_i64(n_keys),
                keep.code(),
                dropna,
                pre_dedup_locally,
            ),
        )?;
        Ok(self.wrap_table(id))
    }

    /// Grouped reduction; returns the table and its row count.
    ///
    /// `udf_table` supplies one exemplar column per `Udf`/`GenUdf` function
    /// giving the output type of that function.
    ///
    /// # Errors
    /// `ShapeMismatch` when `func_offsets` does not cover `ftypes`,
    /// `NativeOperationFailure` from the engine or from a callback.
    pub fn groupby_and_aggregate(
        &self,
        table: &TableHandle,
        opts: &GroupbyOptions,
        callbacks: GroupbyCallbacks<'_>,
        udf_table: Option<&TableHandle>,
    ) -> BridgeResult<(TableHandle, usize)> {
        if opts.func_offsets.last().copied().unwrap_or(0) != opts.ftypes.len() {
            return Err(BridgeError::shape(format!(
                "groupby_and_aggregate: func_offsets end at {:?}, {} functions given",
                opts.func_offsets.last(),
                opts.ftypes.len()
            )));
        }
        self.enter("groupby_and_aggregate", table);
        let ftypes: Vec<i32> = opts.ftypes.iter().map(|f| f.code()).collect();
        let offsets: Vec<i32> = opts
            .func_offsets
            .iter()
            .map(|&o| i32::try_from(o).unwrap_or(i32::MAX))
            .collect();
        let redvars: Vec<i32> = opts
            .udf_n_redvars
            .iter()
            .map(|&n| i32::try_from(n).unwrap_or(i32::MAX))
            .collect();
        let mut out_rows = 0i64;
        let id = self.call(
            "groupby_and_aggregate",
            self.engine().groupby_and_aggregate(
                table.id(),
                as_i64(opts.n_keys),
                opts.is_parallel,
                opts.skip_na,
                opts.shift_periods,
                opts.transform_func.code(),
                opts.head_n,
                opts.return_keys,
                opts.return_index,
                opts.dropna,
                &ftypes,
                &offsets,
                &redvars,
                callbacks.update,
                callbacks.combine,
                callbacks.eval,
                callbacks.general,
                udf_table.map(TableHandle::id),
                &mut out_rows,
                opts.n_shuffle_keys.map_or(as_i64(opts.n_keys), as_i64),
            ),
        )?;
        let handle = self.wrap_table(id);
        Ok((handle, self.row_count("groupby_and_aggregate", out_rows)?))
    }

    /// Label each row with its group (over all columns of `table`).
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine.
    pub fn get_groupby_labels(
        &self,
        table: &TableHandle,
        key_dropna: bool,
        is_parallel: bool,
    ) -> BridgeResult<GroupLabels> {
        self.enter("get_groupby_labels", table);
        let (rows, _) = self.table_shape(table)?;
        let mut labels = vec![0i64; rows];
        let mut sort_idx = vec![0i64; rows];
        let n = self.call(
            "get_groupby_labels",
            self.engine().get_groupby_labels(
                table.id(),
                &mut labels,
                &mut sort_idx,
                key_dropna,
                is_parallel,
            ),
        )?;
        Ok(GroupLabels {
            n_groups: self.row_count("get_groupby_labels", n)?,
            labels,
            sort_idx,
        })
    }

    /// Membership of each element of `in_arr` in `values`; nulls are never members.
    ///
    /// # Errors
    /// `NativeOperationFailure` from the engine.
    pub fn array_isin(
        &self,
        in_arr: &ArrayHandle,
        values: &ArrayHandle,
        is_parallel: bool,
    ) -> BridgeResult<Vec<bool>> {
        self.bump(OPERATOR_CALLS, 1);
        let mut out = vec![false; self.array_len(in_arr)?];
        self.call(
            "array_isin",
            self.engine()
                .array_isin(&mut out, in_arr.id(), values.id(), is_parallel),
        )?;
        Ok(out)
    }

    /// A copy of a dictionary-encoded array whose dictionary holds no repeats.
    ///
    /// # Errors
    /// `NativeOperationFailure` when `dict_array` is not dictionary-encoded.
    pub fn drop_duplicates_local_dictionary(
        &self,
        dict_array: &ArrayHandle,
        sort_dictionary_if_modified: bool,
    ) -> BridgeResult<ArrayHandle> {
        self.bump(OPERATOR_CALLS, 1);
        let id = self.call(
            "drop_duplicates_local_dictionary",
            self.engine()
                .drop_duplicates_local_dictionary(dict_array.id(), sort_dictionary_if_modified),
        )?;
        Ok(self.wrap_array(id))
    }

    /// A copy of a dictionary-encoded array whose dictionary is shared by all workers.
    ///
    /// # Errors
    /// `NativeOperationFailure` when `dict_array` is not dictionary-encoded.
    pub fn convert_local_dictionary_to_global(
        &self,
        dict_array: &ArrayHandle,
        is_parallel: bool,
        sort_dictionary: bool,
    ) -> BridgeResult<ArrayHandle> {
        self.bump(OPERATOR_CALLS, 1);
        let id = self.call(
            "convert_local_dictionary_to_global",
            self.engine().convert_local_dictionary_to_global(
                dict_array.id(),
                is_parallel,
                sort_dictionary,
            ),
        )?;
        Ok(self.wrap_array(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agg_codes_follow_declaration_order() {
        assert_eq!(AggFunc::from_code(0), Some(AggFunc::NoOp));
        assert_eq!(AggFunc::from_code(14), Some(AggFunc::Mean));
        assert_eq!(AggFunc::from_code(26), Some(AggFunc::GenUdf));
        assert_eq!(AggFunc::from_code(27), None);
        assert!(ALL_AGG_FUNCS.iter().enumerate().all(|(i, f)| f.code() == i as i32));
    }

    #[test]
    fn inner_join_options_cover_both_sides() {
        let o = HashJoinOptions::inner(1, 2, 1);
        assert_eq!(o.key_in_output.len(), 5);
        assert_eq!(o.same_key, vec![true]);
    }
}
