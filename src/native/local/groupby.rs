//! Grouped aggregation and group labeling.
//!
//! Groups are numbered in order of first appearance. A request either reduces
//! every data column to one row per group, or (for cumulative, shift,
//! transform, ngroup and head functions) produces rows aligned with the
//! input; the two kinds cannot be mixed in one call.

use super::gather;
use crate::native::{CombineFn, EvalFn, GeneralUdfFn, NativeArray, UpdateFn};
use crate::ops::AggFunc;
use crate::types::{ArrayType, PrimitiveType};
use crate::utils::{key_has_na, row_key};
use crate::value::Value;
use anyhow::{anyhow, bail, ensure, Result};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Flattened `groupby_and_aggregate` arguments.
pub(super) struct GroupbyRequest<'a> {
    pub n_keys: usize,
    pub workers: usize,
    pub skip_na: bool,
    pub shift_periods: i64,
    pub transform_func: i32,
    pub head_n: i64,
    pub return_keys: bool,
    pub return_index: bool,
    pub dropna: bool,
    pub ftypes: &'a [i32],
    pub func_offsets: &'a [i32],
    pub udf_n_redvars: &'a [i32],
    pub update: Option<&'a UpdateFn>,
    pub combine: Option<&'a CombineFn>,
    pub eval: Option<&'a EvalFn>,
    pub general: Option<&'a GeneralUdfFn>,
    pub udf_columns: Option<&'a [Arc<NativeArray>]>,
}

struct Groups {
    of_row: Vec<Option<usize>>,
    rows: Vec<Vec<usize>>,
}

fn assign(columns: &[Arc<NativeArray>], n_keys: usize, n_rows: usize, dropna: bool) -> Groups {
    let keys: Vec<Option<Vec<Value>>> = (0..n_rows)
        .into_par_iter()
        .map(|r| (!(dropna && key_has_na(columns, n_keys, r))).then(|| row_key(columns, n_keys, r)))
        .collect();
    let mut ids: HashMap<&[Value], usize> = HashMap::new();
    let mut groups = Groups {
        of_row: Vec::with_capacity(n_rows),
        rows: Vec::new(),
    };
    for (r, key) in keys.iter().enumerate() {
        let g = key.as_ref().map(|k| {
            let next = ids.len();
            let g = *ids.entry(k.as_slice()).or_insert(next);
            if g == groups.rows.len() {
                groups.rows.push(Vec::new());
            }
            groups.rows[g].push(r);
            g
        });
        groups.of_row.push(g);
    }
    groups
}

/// Label rows over all columns of the table; returns the group count.
///
/// `sort_idx` lists rows group by group, rows without a group last.
pub(super) fn labels(
    columns: &[Arc<NativeArray>],
    n_rows: usize,
    key_dropna: bool,
    out_labels: &mut [i64],
    sort_idx: &mut [i64],
) -> usize {
    let groups = assign(columns, columns.len(), n_rows, key_dropna);
    for (l, g) in out_labels.iter_mut().zip(&groups.of_row) {
        *l = g.map_or(-1, |g| g as i64);
    }
    let ordered = groups
        .rows
        .iter()
        .flatten()
        .copied()
        .chain((0..n_rows).filter(|&r| groups.of_row[r].is_none()));
    for (slot, r) in sort_idx.iter_mut().zip(ordered) {
        *slot = r as i64;
    }
    groups.rows.len()
}

/// Running ordinals of caller-defined functions.
#[derive(Default)]
struct UdfCursor {
    udf: usize,
    general: usize,
    exemplar: usize,
}

struct Ctx<'r, 'a> {
    req: &'r GroupbyRequest<'a>,
    groups: &'r Groups,
    index: Option<&'r Arc<NativeArray>>,
}

/// `(is_float)` for columns sum/prod/cumsum/cumprod accept.
fn numeric_kind(col: &NativeArray, f: AggFunc) -> Result<bool> {
    match col.layout_type() {
        Some(ArrayType::Primitive(p) | ArrayType::Nullable(p))
            if p.is_numeric() || p == PrimitiveType::Bool =>
        {
            Ok(p.is_float())
        }
        _ => bail!("{f:?} is not defined for {} columns", col.kind()),
    }
}

fn int_of(v: &Value) -> Result<i64> {
    v.as_i64().ok_or_else(|| anyhow!("value {v} does not fit in int64"))
}

fn fold_numeric(vals: &[Value], is_float: bool, prod: bool) -> Result<Value> {
    if is_float {
        let it = vals.iter().filter_map(Value::as_f64);
        let v = if prod { it.product() } else { it.sum() };
        return Ok(Value::float(v));
    }
    let mut acc: i64 = i64::from(prod);
    for v in vals {
        let x = int_of(v)?;
        acc = if prod { acc.checked_mul(x) } else { acc.checked_add(x) }
            .ok_or_else(|| anyhow!("integer overflow in grouped {}", if prod { "prod" } else { "sum" }))?;
    }
    Ok(Value::Int(acc))
}

fn sample_moment(xs: &[f64], f: AggFunc) -> Option<f64> {
    let n = xs.len();
    match f {
        AggFunc::Mean => (n > 0).then(|| xs.iter().sum::<f64>() / n as f64),
        AggFunc::Median => {
            if n == 0 {
                return None;
            }
            let mut s = xs.to_vec();
            s.sort_by(f64::total_cmp);
            Some(if n % 2 == 1 {
                s[n / 2]
            } else {
                (s[n / 2 - 1] + s[n / 2]) / 2.0
            })
        }
        AggFunc::Var | AggFunc::Std => {
            if n < 2 {
                return None;
            }
            let mean = xs.iter().sum::<f64>() / n as f64;
            let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            Some(if f == AggFunc::Std { var.sqrt() } else { var })
        }
        _ => None,
    }
}

/// Row chosen by a selecting reduction, `None` for a null result.
fn select_row(col: &NativeArray, rs: &[usize], f: AggFunc, skip_na: bool) -> Option<usize> {
    let has_null = rs.iter().any(|&r| col.is_na(r));
    let mut valid = rs.iter().copied().filter(|&r| !col.is_na(r));
    match f {
        AggFunc::First if skip_na => valid.next(),
        AggFunc::First => rs.first().copied(),
        AggFunc::Last if skip_na => valid.last(),
        AggFunc::Last => rs.last().copied(),
        _ if has_null && !skip_na => None,
        AggFunc::Min | AggFunc::Idxmin => valid.fold(None, |best: Option<usize>, r| match best {
            Some(b) if col.value(b) <= col.value(r) => Some(b),
            _ => Some(r),
        }),
        AggFunc::Max | AggFunc::Idxmax => valid.fold(None, |best: Option<usize>, r| match best {
            Some(b) if col.value(b) >= col.value(r) => Some(b),
            _ => Some(r),
        }),
        _ => None,
    }
}

fn reduce(col: &NativeArray, f: AggFunc, ctx: &Ctx<'_, '_>, cursor: &mut UdfCursor) -> Result<Arc<NativeArray>> {
    let req = ctx.req;
    let groups = &ctx.groups.rows;
    let values_of = |rs: &[usize]| -> Vec<Value> { rs.iter().map(|&r| col.value(r)).collect() };
    let blocked = |rs: &[usize]| !req.skip_na && rs.iter().any(|&r| col.is_na(r));
    let int64 = |vals: Vec<Value>| NativeArray::from_values(&ArrayType::Primitive(PrimitiveType::Int64), &vals);

    let out = match f {
        AggFunc::Size => int64(groups.iter().map(|rs| Value::Int(rs.len() as i64)).collect())?,
        AggFunc::Count => int64(
            groups
                .iter()
                .map(|rs| Value::Int(rs.iter().filter(|&&r| !col.is_na(r)).count() as i64))
                .collect(),
        )?,
        AggFunc::Nunique => int64(
            groups
                .iter()
                .map(|rs| {
                    let distinct: HashSet<Value> = values_of(rs).into_iter().collect();
                    let nulls = usize::from(distinct.contains(&Value::Null));
                    let n = if req.skip_na { distinct.len() - nulls } else { distinct.len() };
                    Value::Int(n as i64)
                })
                .collect(),
        )?,
        AggFunc::Sum | AggFunc::Prod => {
            let is_float = numeric_kind(col, f)?;
            let vals = groups
                .iter()
                .map(|rs| {
                    if blocked(rs) {
                        return Ok(Value::Null);
                    }
                    let vs: Vec<Value> = values_of(rs).into_iter().filter(|v| !v.is_null()).collect();
                    fold_numeric(&vs, is_float, f == AggFunc::Prod)
                })
                .collect::<Result<Vec<_>>>()?;
            let p = if is_float { PrimitiveType::Float64 } else { PrimitiveType::Int64 };
            NativeArray::from_values(&ArrayType::Primitive(p), &vals)?
        }
        AggFunc::Mean | AggFunc::Median | AggFunc::Var | AggFunc::Std => {
            numeric_kind(col, f)?;
            let vals: Vec<Value> = groups
                .iter()
                .map(|rs| {
                    if blocked(rs) {
                        return Value::Null;
                    }
                    let xs: Vec<f64> = values_of(rs).iter().filter_map(Value::as_f64).collect();
                    sample_moment(&xs, f).map_or(Value::Null, Value::float)
                })
                .collect();
            NativeArray::from_values(&ArrayType::Nullable(PrimitiveType::Float64), &vals)?
        }
        AggFunc::Min | AggFunc::Max | AggFunc::First | AggFunc::Last => {
            let rows: Vec<Option<usize>> = groups.iter().map(|rs| select_row(col, rs, f, req.skip_na)).collect();
            col.take(&rows)?
        }
        AggFunc::Idxmin | AggFunc::Idxmax => {
            let rows: Vec<Option<usize>> = groups.iter().map(|rs| select_row(col, rs, f, req.skip_na)).collect();
            match ctx.index {
                Some(index) => index.take(&rows)?,
                None => int64(rows.iter().map(|r| Value::from(r.map(|r| r as i64))).collect())?,
            }
        }
        AggFunc::BoolorAgg => {
            let vals: Vec<Value> = groups
                .iter()
                .map(|rs| {
                    if blocked(rs) {
                        return Value::Null;
                    }
                    let bs: Vec<bool> = values_of(rs).iter().filter_map(Value::as_bool).collect();
                    if bs.is_empty() {
                        Value::Null
                    } else {
                        Value::Bool(bs.into_iter().any(|b| b))
                    }
                })
                .collect();
            NativeArray::from_values(&ArrayType::Nullable(PrimitiveType::Bool), &vals)?
        }
        AggFunc::Udf => {
            let ord = cursor.udf;
            cursor.udf += 1;
            let n_redvars = req
                .udf_n_redvars
                .get(ord)
                .and_then(|&n| usize::try_from(n).ok())
                .ok_or_else(|| anyhow!("no reduction variable count for udf {ord}"))?;
            let (Some(update), Some(combine), Some(eval)) = (req.update, req.combine, req.eval) else {
                bail!("udf aggregation needs update, combine and eval callbacks");
            };
            let ty = exemplar_type(req, cursor)?;
            let workers = req.workers.max(1);
            let vals = groups
                .par_iter()
                .map(|rs| {
                    let mut states = vec![vec![Value::Null; n_redvars]; workers];
                    for (pos, &r) in rs.iter().enumerate() {
                        update(ord, &mut states[pos % workers], &col.value(r))?;
                    }
                    let mut parts = states.into_iter();
                    let mut acc = parts.next().unwrap_or_default();
                    for other in parts {
                        combine(ord, &mut acc, &other)?;
                    }
                    eval(ord, &acc)
                })
                .collect::<Result<Vec<Value>>>()?;
            NativeArray::from_values(&ty, &vals)?
        }
        AggFunc::GenUdf => {
            let ord = cursor.general;
            cursor.general += 1;
            let general = req
                .general
                .ok_or_else(|| anyhow!("gen_udf aggregation needs a general callback"))?;
            let ty = exemplar_type(req, cursor)?;
            let vals = groups
                .par_iter()
                .map(|rs| general(ord, &values_of(rs)))
                .collect::<Result<Vec<Value>>>()?;
            NativeArray::from_values(&ty, &vals)?
        }
        other => bail!("{other:?} does not reduce groups"),
    };
    Ok(Arc::new(out))
}

fn exemplar_type(req: &GroupbyRequest<'_>, cursor: &mut UdfCursor) -> Result<ArrayType> {
    let i = cursor.exemplar;
    cursor.exemplar += 1;
    let col = req
        .udf_columns
        .and_then(|cols| cols.get(i))
        .ok_or_else(|| anyhow!("udf table has no output column {i}"))?;
    col.layout_type()
        .ok_or_else(|| anyhow!("udf output column {i} has no value layout"))
}

/// One output row per input row; rows without a group read as null.
fn row_aligned(col: &NativeArray, f: AggFunc, ctx: &Ctx<'_, '_>, n_rows: usize) -> Result<Arc<NativeArray>> {
    let req = ctx.req;
    let groups = ctx.groups;
    let out = match f {
        AggFunc::Ngroup => {
            let vals: Vec<Value> = groups.of_row.iter().map(|g| Value::from(g.map(|g| g as i64))).collect();
            NativeArray::from_values(&ArrayType::Primitive(PrimitiveType::Int64), &vals)?
        }
        AggFunc::Shift => {
            let mut src: Vec<Option<usize>> = vec![None; n_rows];
            for rs in &groups.rows {
                for (p, &r) in rs.iter().enumerate() {
                    src[r] = usize::try_from(p as i64 - req.shift_periods)
                        .ok()
                        .and_then(|q| rs.get(q).copied());
                }
            }
            col.take(&src)?
        }
        AggFunc::Transform => {
            let tf = AggFunc::from_code(req.transform_func)
                .filter(|t| !t.is_row_aligned() && !matches!(t, AggFunc::NoOp | AggFunc::Udf | AggFunc::GenUdf))
                .ok_or_else(|| anyhow!("transform function code {} is not a built-in reduction", req.transform_func))?;
            let reduced = reduce(col, tf, ctx, &mut UdfCursor::default())?;
            reduced.take(&groups.of_row)?
        }
        AggFunc::Cumsum | AggFunc::Cumprod => {
            let is_float = numeric_kind(col, f)?;
            let prod = f == AggFunc::Cumprod;
            let mut vals = vec![Value::Null; n_rows];
            for rs in &groups.rows {
                let mut acc = if prod { Value::Int(1) } else { Value::Int(0) };
                let mut poisoned = false;
                for &r in rs {
                    let v = col.value(r);
                    if v.is_null() {
                        poisoned |= !req.skip_na;
                        continue;
                    }
                    if poisoned {
                        continue;
                    }
                    acc = fold_numeric(&[acc, v], is_float, prod)?;
                    vals[r] = acc.clone();
                }
            }
            let p = if is_float { PrimitiveType::Float64 } else { PrimitiveType::Int64 };
            NativeArray::from_values(&ArrayType::Primitive(p), &vals)?
        }
        AggFunc::Cummin | AggFunc::Cummax => {
            let ty = col
                .layout_type()
                .ok_or_else(|| anyhow!("{f:?} is not defined for {} columns", col.kind()))?;
            let mut vals = vec![Value::Null; n_rows];
            for rs in &groups.rows {
                let mut best: Option<Value> = None;
                let mut poisoned = false;
                for &r in rs {
                    let v = col.value(r);
                    if v.is_null() {
                        poisoned |= !req.skip_na;
                        continue;
                    }
                    if poisoned {
                        continue;
                    }
                    let keep_old = best.as_ref().is_some_and(|b| {
                        if f == AggFunc::Cummin { *b <= v } else { *b >= v }
                    });
                    if !keep_old {
                        best = Some(v);
                    }
                    vals[r] = best.clone().unwrap_or(Value::Null);
                }
            }
            NativeArray::from_values(&ty, &vals)?
        }
        other => bail!("{other:?} is not a row-aligned function"),
    };
    Ok(Arc::new(out))
}

pub(super) fn aggregate(
    columns: &[Arc<NativeArray>],
    n_rows: usize,
    req: &GroupbyRequest<'_>,
) -> Result<(Vec<Arc<NativeArray>>, usize)> {
    let n_index = usize::from(req.return_index);
    ensure!(
        columns.len() >= req.n_keys + n_index,
        "groupby on {} keys of a {}-column table",
        req.n_keys,
        columns.len()
    );
    let data = &columns[req.n_keys..columns.len() - n_index];
    let index = columns.last().filter(|_| req.return_index);

    let funcs = req
        .ftypes
        .iter()
        .map(|&c| {
            AggFunc::from_code(c)
                .filter(|f| *f != AggFunc::NoOp)
                .ok_or_else(|| anyhow!("aggregation code {c} is not implemented"))
        })
        .collect::<Result<Vec<_>>>()?;
    let offsets = req
        .func_offsets
        .iter()
        .map(|&o| usize::try_from(o).map_err(|_| anyhow!("negative function offset {o}")))
        .collect::<Result<Vec<_>>>()?;
    ensure!(
        offsets.len() == data.len() + 1,
        "{} function offsets for {} data columns",
        offsets.len(),
        data.len()
    );
    ensure!(
        offsets.windows(2).all(|w| w[0] <= w[1]) && offsets.last() == Some(&funcs.len()),
        "function offsets {offsets:?} do not cover {} functions",
        funcs.len()
    );
    let n_aligned = funcs.iter().filter(|f| f.is_row_aligned()).count();
    ensure!(
        n_aligned == 0 || n_aligned == funcs.len(),
        "row-aligned and reducing functions cannot be mixed"
    );
    let heads = funcs.iter().filter(|f| **f == AggFunc::Head).count();
    ensure!(
        heads == 0 || heads == funcs.len(),
        "head cannot be combined with other functions"
    );

    let groups = assign(columns, req.n_keys, n_rows, req.dropna);
    let ctx = Ctx {
        req,
        groups: &groups,
        index,
    };
    let keys = &columns[..req.n_keys];
    let mut out: Vec<Arc<NativeArray>> = Vec::new();

    if heads > 0 {
        let limit = usize::try_from(req.head_n).unwrap_or(0);
        let mut kept: Vec<usize> = groups.rows.iter().flat_map(|rs| rs.iter().take(limit).copied()).collect();
        kept.sort_unstable();
        if req.return_keys {
            out.extend(gather(keys, &kept)?);
        }
        for (c, col) in data.iter().enumerate() {
            for _ in offsets[c]..offsets[c + 1] {
                out.push(Arc::new(col.take_rows(&kept)?));
            }
        }
        if let Some(index) = index {
            out.push(Arc::new(index.take_rows(&kept)?));
        }
        return Ok((out, kept.len()));
    }

    if n_aligned > 0 {
        if req.return_keys {
            out.extend(keys.iter().cloned());
        }
        for (c, col) in data.iter().enumerate() {
            for &f in &funcs[offsets[c]..offsets[c + 1]] {
                out.push(row_aligned(col, f, &ctx, n_rows)?);
            }
        }
        if let Some(index) = index {
            out.push(Arc::clone(index));
        }
        return Ok((out, n_rows));
    }

    if req.return_keys {
        let firsts: Vec<usize> = groups.rows.iter().map(|rs| rs[0]).collect();
        out.extend(gather(keys, &firsts)?);
    }
    let mut cursor = UdfCursor::default();
    for (c, col) in data.iter().enumerate() {
        for &f in &funcs[offsets[c]..offsets[c + 1]] {
            out.push(reduce(col, f, &ctx, &mut cursor)?);
        }
    }
    Ok((out, groups.rows.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(ftypes: &'a [i32], offsets: &'a [i32]) -> GroupbyRequest<'a> {
        GroupbyRequest {
            n_keys: 1,
            workers: 1,
            skip_na: true,
            shift_periods: 1,
            transform_func: 0,
            head_n: 1,
            return_keys: true,
            return_index: false,
            dropna: true,
            ftypes,
            func_offsets: offsets,
            udf_n_redvars: &[],
            update: None,
            combine: None,
            eval: None,
            general: None,
            udf_columns: None,
        }
    }

    fn table() -> Vec<Arc<NativeArray>> {
        let keys = NativeArray::from_values(
            &ArrayType::String,
            &["a", "b", "a", "b", "a"].map(Value::str),
        )
        .unwrap();
        let vals = NativeArray::from_values(
            &ArrayType::Nullable(PrimitiveType::Int64),
            &[Value::Int(1), Value::Int(10), Value::Null, Value::Int(20), Value::Int(3)],
        )
        .unwrap();
        vec![Arc::new(keys), Arc::new(vals)]
    }

    fn column(out: &[Arc<NativeArray>], c: usize) -> Vec<Value> {
        (0..out[c].len()).map(|i| out[c].value(i)).collect()
    }

    #[test]
    fn reductions_in_first_appearance_order() {
        let codes = [AggFunc::Sum, AggFunc::Count, AggFunc::Mean].map(AggFunc::code);
        let (out, n) = aggregate(&table(), 5, &request(&codes, &[0, 3])).unwrap();
        assert_eq!(n, 2);
        assert_eq!(column(&out, 0), vec![Value::str("a"), Value::str("b")]);
        assert_eq!(column(&out, 1), vec![Value::Int(4), Value::Int(30)]);
        assert_eq!(column(&out, 2), vec![Value::Int(2), Value::Int(2)]);
        assert_eq!(column(&out, 3), vec![Value::float(2.0), Value::float(15.0)]);
    }

    #[test]
    fn cumsum_skips_nulls_in_place() {
        let codes = [AggFunc::Cumsum.code()];
        let mut req = request(&codes, &[0, 1]);
        req.return_keys = false;
        let (out, n) = aggregate(&table(), 5, &req).unwrap();
        assert_eq!(n, 5);
        assert_eq!(
            column(&out, 0),
            vec![Value::Int(1), Value::Int(10), Value::Null, Value::Int(30), Value::Int(4)]
        );
    }

    #[test]
    fn mixing_kinds_and_no_op_fail() {
        let mixed = [AggFunc::Sum.code(), AggFunc::Cumsum.code()];
        assert!(aggregate(&table(), 5, &request(&mixed, &[0, 2])).is_err());
        let noop = [AggFunc::NoOp.code()];
        assert!(aggregate(&table(), 5, &request(&noop, &[0, 1])).is_err());
    }

    #[test]
    fn labels_follow_first_appearance() {
        let keys = vec![Arc::clone(&table()[0])];
        let mut labels = vec![0; 5];
        let mut idx = vec![0; 5];
        assert_eq!(labels_of(&keys, &mut labels, &mut idx), 2);
        assert_eq!(labels, vec![0, 1, 0, 1, 0]);
        assert_eq!(idx, vec![0, 2, 4, 1, 3]);
    }

    fn labels_of(cols: &[Arc<NativeArray>], l: &mut [i64], s: &mut [i64]) -> usize {
        labels(cols, 5, true, l, s)
    }
}
