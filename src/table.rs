//! Table assembler.
//!
//! Groups array handles into native tables and moves columns between native
//! tables and the managed [`ManagedTable`], whose columns live in per-type
//! blocks the way the managed runtime stores them.

use crate::array::Array;
use crate::bridge::Bridge;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{ArrayHandle, TableHandle};
use crate::metrics::TABLES_CREATED;
use crate::types::ArrayType;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Produces a lazily materialized column on demand.
pub type Materializer = Arc<dyn Fn() -> anyhow::Result<Array> + Send + Sync>;

/// Categories for run-time categorical columns, keyed by logical column.
pub type KnownCategories = HashMap<usize, Vec<String>>;

pub enum Column {
    Ready(Array),
    Deferred(Materializer),
}

impl fmt::Debug for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(a) => f.debug_tuple("Ready").field(&a.array_type()).finish(),
            Self::Deferred(_) => f.write_str("Deferred"),
        }
    }
}

#[derive(Debug)]
struct Block {
    ty: ArrayType,
    columns: Vec<Option<Column>>,
}

/// Columns grouped into same-type blocks.
///
/// Logical column `i` lives at `block_offsets[i] = (block, offset)`. Columns
/// can be absent (dead), ready, or deferred until first use.
#[derive(Debug)]
pub struct ManagedTable {
    n_rows: usize,
    types: Vec<ArrayType>,
    blocks: Vec<Block>,
    type_to_blk: HashMap<ArrayType, usize>,
    block_offsets: Vec<(usize, usize)>,
}

fn type_matches(slot: &ArrayType, actual: &ArrayType) -> bool {
    match (slot, actual) {
        (
            ArrayType::Categorical {
                categories: None,
                ordered: a,
            },
            ArrayType::Categorical { ordered: b, .. },
        ) => a == b,
        _ => slot == actual,
    }
}

impl ManagedTable {
    /// An empty table of `n_rows` rows whose columns have the given types.
    pub fn new(types: Vec<ArrayType>, n_rows: usize) -> Self {
        let mut blocks: Vec<Block> = Vec::new();
        let mut type_to_blk = HashMap::new();
        let mut block_offsets = Vec::with_capacity(types.len());
        for ty in &types {
            let blk = *type_to_blk.entry(ty.clone()).or_insert_with(|| {
                blocks.push(Block {
                    ty: ty.clone(),
                    columns: Vec::new(),
                });
                blocks.len() - 1
            });
            block_offsets.push((blk, blocks[blk].columns.len()));
            blocks[blk].columns.push(None);
        }
        Self {
            n_rows,
            types,
            blocks,
            type_to_blk,
            block_offsets,
        }
    }

    /// A table holding `arrays` as its columns, in order.
    ///
    /// # Errors
    /// `ShapeMismatch` when the arrays differ in length.
    pub fn from_arrays(arrays: Vec<Array>) -> BridgeResult<Self> {
        let n_rows = arrays.first().map_or(0, Array::len);
        let mut table = Self::new(arrays.iter().map(Array::array_type).collect(), n_rows);
        for (i, a) in arrays.into_iter().enumerate() {
            table.set_column(i, a)?;
        }
        Ok(table)
    }

    /// Row count.
    pub fn len(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn n_columns(&self) -> usize {
        self.types.len()
    }

    pub fn n_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn column_type(&self, i: usize) -> Option<&ArrayType> {
        self.types.get(i)
    }

    /// `(block, offset)` of logical column `i`.
    pub fn block_position(&self, i: usize) -> Option<(usize, usize)> {
        self.block_offsets.get(i).copied()
    }

    pub fn block_of_type(&self, ty: &ArrayType) -> Option<usize> {
        self.type_to_blk.get(ty).copied()
    }

    fn slot(&self, i: usize) -> Option<&Option<Column>> {
        let (b, o) = self.block_position(i)?;
        self.blocks.get(b)?.columns.get(o)
    }

    fn slot_mut(&mut self, i: usize) -> BridgeResult<&mut Option<Column>> {
        let (b, o) = self.block_position(i).ok_or_else(|| {
            BridgeError::shape(format!(
                "column {i} out of range for a {}-column table",
                self.types.len()
            ))
        })?;
        self.blocks
            .get_mut(b)
            .and_then(|blk| blk.columns.get_mut(o))
            .ok_or_else(|| BridgeError::shape(format!("column {i} has no block slot")))
    }

    /// The column, if it is present and already materialized.
    pub fn get_column(&self, i: usize) -> Option<&Array> {
        match self.slot(i)? {
            Some(Column::Ready(a)) => Some(a),
            _ => None,
        }
    }

    pub fn is_deferred(&self, i: usize) -> bool {
        matches!(self.slot(i), Some(Some(Column::Deferred(_))))
    }

    /// # Errors
    /// `ShapeMismatch` on a bad index or length, `UnsupportedType` when the
    /// array does not have the column's type.
    pub fn set_column(&mut self, i: usize, array: Array) -> BridgeResult<()> {
        let Some(slot_ty) = self.types.get(i) else {
            return Err(BridgeError::shape(format!(
                "column {i} out of range for a {}-column table",
                self.types.len()
            )));
        };
        let actual = array.array_type();
        if !type_matches(slot_ty, &actual) {
            return Err(BridgeError::unsupported(format!(
                "column {i} has type {slot_ty}, got {actual}"
            )));
        }
        if array.len() != self.n_rows {
            return Err(BridgeError::shape(format!(
                "column {i} has {} rows, table has {}",
                array.len(),
                self.n_rows
            )));
        }
        *self.slot_mut(i)? = Some(Column::Ready(array));
        Ok(())
    }

    /// Install a column that is only built when first needed.
    ///
    /// # Errors
    /// `ShapeMismatch` on a bad index.
    pub fn set_deferred(&mut self, i: usize, materialize: Materializer) -> BridgeResult<()> {
        *self.slot_mut(i)? = Some(Column::Deferred(materialize));
        Ok(())
    }

    /// Materialize column `i` if it is deferred and return it.
    ///
    /// # Errors
    /// `ShapeMismatch` for a dead column, `NativeOperationFailure` when the
    /// materializer fails, or any error [`set_column`](Self::set_column) reports.
    pub fn materialize(&mut self, i: usize) -> BridgeResult<&Array> {
        let pending = match self.slot_mut(i)? {
            None => {
                return Err(BridgeError::shape(format!("column {i} is not present")));
            }
            Some(Column::Deferred(f)) => Some(Arc::clone(f)),
            Some(Column::Ready(_)) => None,
        };
        if let Some(f) = pending {
            debug!(column = i, "materializing deferred column");
            let array = f().map_err(|e| BridgeError::native(&e).with_source("materialize"))?;
            self.set_column(i, array)?;
        }
        self.get_column(i)
            .ok_or_else(|| BridgeError::shape(format!("column {i} is not present")))
    }
}

/// Native slot to logical column pairs for one conversion call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnMapping {
    pairs: Vec<(usize, usize)>,
}

impl ColumnMapping {
    /// `out_col_indices[slot]` is the logical column for native slot `slot`,
    /// or negative when the slot is not materialized.
    ///
    /// # Errors
    /// `ShapeMismatch` on a logical index `>= n_cols` or one used twice.
    pub fn from_out_indices(out_col_indices: &[i64], n_cols: usize) -> BridgeResult<Self> {
        let mut seen = vec![false; n_cols];
        let mut pairs = Vec::new();
        for (slot, &logical) in out_col_indices.iter().enumerate() {
            if logical < 0 {
                continue;
            }
            let logical = logical as usize;
            match seen.get_mut(logical) {
                Some(s) if !*s => *s = true,
                Some(_) => {
                    return Err(BridgeError::shape(format!(
                        "logical column {logical} is mapped twice"
                    )));
                }
                None => {
                    return Err(BridgeError::shape(format!(
                        "logical column {logical} out of range for {n_cols} columns"
                    )));
                }
            }
            pairs.push((slot, logical));
        }
        Ok(Self { pairs })
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.pairs.iter().copied()
    }

    pub fn logical_for(&self, slot: usize) -> Option<usize> {
        self.pairs.iter().find(|(s, _)| *s == slot).map(|(_, l)| *l)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl Bridge {
    /// Group arrays into a table; the table takes over their references.
    ///
    /// # Errors
    /// `ShapeMismatch` when the arrays differ in length (the arrays are
    /// released), `NativeOperationFailure` if the engine refuses.
    pub fn make_table(&self, arrays: Vec<ArrayHandle>) -> BridgeResult<TableHandle> {
        let mut n_rows = None;
        for (i, a) in arrays.iter().enumerate() {
            let len = self.array_len(a)?;
            match n_rows {
                None => n_rows = Some(len),
                Some(n) if n != len => {
                    return Err(BridgeError::shape(format!(
                        "make_table: array {i} has {len} rows, array 0 has {n}"
                    )));
                }
                Some(_) => {}
            }
        }
        debug!(n_cols = arrays.len(), n_rows = n_rows.unwrap_or(0), "make_table");
        let ids: Vec<_> = arrays.into_iter().map(ArrayHandle::into_raw).collect();
        let id = self.call("arr_info_list_to_table", self.engine().arr_info_list_to_table(&ids))?;
        self.bump(TABLES_CREATED, 1);
        Ok(self.wrap_table(id))
    }

    /// Import selected native columns into a new [`ManagedTable`].
    ///
    /// `out_col_indices[slot]` names the logical column native slot `slot`
    /// becomes (negative = skip); `out_types` has one entry per logical
    /// column. Logical columns no slot maps to stay absent. Categorical types
    /// without static categories are resolved through `known_categories`.
    ///
    /// # Errors
    /// `ShapeMismatch` on inconsistent indices, types or row counts,
    /// `UnsupportedType` for an unresolved categorical, plus import errors.
    pub fn table_to_columns(
        &self,
        table: &TableHandle,
        out_col_indices: &[i64],
        out_types: &[ArrayType],
        n_rows: usize,
        n_cols: usize,
        known_categories: Option<&KnownCategories>,
    ) -> BridgeResult<ManagedTable> {
        if out_types.len() != n_cols {
            return Err(BridgeError::shape(format!(
                "table_to_columns: {} types for {n_cols} columns",
                out_types.len()
            )));
        }
        let mapping = ColumnMapping::from_out_indices(out_col_indices, n_cols)?;
        let (rows, cols) = self.table_shape(table)?;
        if out_col_indices.len() > cols {
            return Err(BridgeError::shape(format!(
                "table_to_columns: {} slots requested from a {cols}-column table",
                out_col_indices.len()
            )));
        }
        if rows != n_rows {
            return Err(BridgeError::shape(format!(
                "table_to_columns: table has {rows} rows, expected {n_rows}"
            )));
        }
        debug!(n_rows, n_cols, mapped = mapping.len(), "table_to_columns");
        let mut out = ManagedTable::new(out_types.to_vec(), n_rows);
        for (slot, logical) in mapping.iter() {
            let ty = &out_types[logical];
            let categories = if ty.has_unknown_categories() {
                let cats = known_categories
                    .and_then(|m| m.get(&logical))
                    .ok_or_else(|| {
                        BridgeError::unsupported(format!(
                            "table_to_columns: column {logical} is {ty} and no categories were supplied"
                        ))
                    })?;
                Some(cats.as_slice())
            } else {
                None
            };
            let col = self.call(
                "info_from_table",
                self.engine().info_from_table(table.id(), slot as u64),
            )?;
            let col = self.wrap_array(col);
            let array = self.import(col.id(), ty, categories)?;
            out.set_column(logical, array)?;
        }
        Ok(out)
    }

    /// Export selected managed columns as a new native table.
    ///
    /// Indices below `n_table_cols` name columns of `table` (deferred columns
    /// are materialized first); larger indices name `extra_arrays[idx - n_table_cols]`.
    ///
    /// # Errors
    /// `ShapeMismatch` on a dead column or an index past the extra arrays,
    /// plus export and assembly errors.
    pub fn columns_to_table(
        &self,
        table: &mut ManagedTable,
        extra_arrays: &[Array],
        in_col_indices: &[usize],
        n_table_cols: usize,
    ) -> BridgeResult<TableHandle> {
        if n_table_cols != table.n_columns() {
            return Err(BridgeError::shape(format!(
                "columns_to_table: table has {} columns, caller says {n_table_cols}",
                table.n_columns()
            )));
        }
        debug!(n = in_col_indices.len(), extra = extra_arrays.len(), "columns_to_table");
        let mut handles = Vec::with_capacity(in_col_indices.len());
        for &idx in in_col_indices {
            let handle = if idx < n_table_cols {
                let array = table.materialize(idx)?;
                self.array_to_info(array)?
            } else {
                let extra = extra_arrays.get(idx - n_table_cols).ok_or_else(|| {
                    BridgeError::shape(format!(
                        "columns_to_table: index {idx} past {} extra arrays",
                        extra_arrays.len()
                    ))
                })?;
                self.array_to_info(extra)?
            };
            handles.push(handle);
        }
        self.make_table(handles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;
    use crate::value::Value;

    #[test]
    fn same_types_share_a_block() {
        let t = ManagedTable::new(
            vec![
                ArrayType::Primitive(PrimitiveType::Int64),
                ArrayType::String,
                ArrayType::Primitive(PrimitiveType::Int64),
            ],
            0,
        );
        assert_eq!(t.n_blocks(), 2);
        assert_eq!(t.block_position(2), Some((0, 1)));
    }

    #[test]
    fn deferred_column_materializes_once() {
        let ty = ArrayType::Primitive(PrimitiveType::Int32);
        let mut t = ManagedTable::new(vec![ty.clone()], 2);
        let mk: Materializer = Arc::new(move || -> anyhow::Result<Array> {
            Ok(Array::from_values(&ty, &[Value::Int(1), Value::Int(2)])?)
        });
        t.set_deferred(0, mk).unwrap();
        assert!(t.get_column(0).is_none());
        assert_eq!(t.materialize(0).unwrap().len(), 2);
        assert!(!t.is_deferred(0));
    }

    #[test]
    fn mapping_rejects_duplicates() {
        let err = ColumnMapping::from_out_indices(&[0, 0], 2).unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::ShapeMismatch);
        let ok = ColumnMapping::from_out_indices(&[1, -1, 0], 2).unwrap();
        assert_eq!(ok.logical_for(2), Some(0));
    }
}
