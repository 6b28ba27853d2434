//! The engine-side array layout.
//!
//! [`NativeArray`] is the column representation every engine stores and every
//! row accessor reads. Its buffers are the same reference-counted [`Buffer`]s
//! the managed side exported, so building one from exported parts never copies.

use crate::array::null_row_filler;
use crate::buffers::{
    self, bitmap_from_iter, encode_decimal, encode_primitive, encode_varlen, is_valid, offset_at,
    offsets_from_lengths, read_decimal, read_primitive, varlen_value,
};
use crate::codec::WireType;
use crate::types::{ArrayType, Field, PrimitiveType};
use crate::value::Value;
use anyhow::{anyhow, bail, ensure, Result};
use arrow::buffer::Buffer;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Debug)]
pub enum NativeArray {
    /// Fixed-width data with no bitmap; floats use NaN and datetimes NaT for NA.
    Numpy {
        dtype: WireType,
        len: usize,
        data: Buffer,
    },
    /// Fixed-width data plus bitmap. Decimals carry precision and scale.
    Nullable {
        dtype: WireType,
        len: usize,
        data: Buffer,
        null_bitmap: Buffer,
        precision: i32,
        scale: i32,
    },
    String {
        is_binary: bool,
        len: usize,
        offsets: Buffer,
        data: Buffer,
        null_bitmap: Buffer,
    },
    List {
        len: usize,
        offsets: Buffer,
        null_bitmap: Buffer,
        child: Arc<NativeArray>,
    },
    Struct {
        len: usize,
        null_bitmap: Buffer,
        children: Vec<Arc<NativeArray>>,
        field_names: Vec<String>,
    },
    Dict {
        dictionary: Arc<NativeArray>,
        indices: Arc<NativeArray>,
        has_global_dictionary: bool,
        has_deduped_local_dictionary: bool,
    },
    /// Unsigned codes; the code type's MAX marks NA.
    Categorical {
        dtype: WireType,
        len: usize,
        codes: Buffer,
        num_categories: u64,
    },
    Interval {
        dtype: WireType,
        len: usize,
        left: Buffer,
        right: Buffer,
    },
}

fn leaf_primitive(dtype: WireType) -> Result<PrimitiveType> {
    dtype
        .primitive()
        .ok_or_else(|| anyhow!("wire type {dtype:?} is not a primitive element type"))
}

fn unsigned_max(dtype: WireType) -> u64 {
    match dtype {
        WireType::UInt8 => u64::from(u8::MAX),
        WireType::UInt16 => u64::from(u16::MAX),
        WireType::UInt32 => u64::from(u32::MAX),
        _ => u64::MAX,
    }
}

impl NativeArray {
    pub fn len(&self) -> usize {
        match self {
            Self::Numpy { len, .. }
            | Self::Nullable { len, .. }
            | Self::String { len, .. }
            | Self::List { len, .. }
            | Self::Struct { len, .. }
            | Self::Categorical { len, .. }
            | Self::Interval { len, .. } => *len,
            Self::Dict { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short layout name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Numpy { .. } => "numpy",
            Self::Nullable { .. } => "nullable",
            Self::String { .. } => "string",
            Self::List { .. } => "list",
            Self::Struct { .. } => "struct",
            Self::Dict { .. } => "dict",
            Self::Categorical { .. } => "categorical",
            Self::Interval { .. } => "interval",
        }
    }

    pub fn is_na(&self, i: usize) -> bool {
        match self {
            Self::Numpy { dtype, data, .. } => dtype
                .primitive()
                .is_some_and(|p| buffers::is_sentinel_na(p, data, i)),
            Self::Nullable { null_bitmap, .. }
            | Self::String { null_bitmap, .. }
            | Self::List { null_bitmap, .. }
            | Self::Struct { null_bitmap, .. } => !is_valid(null_bitmap, i),
            Self::Dict { indices, .. } => indices.is_na(i),
            Self::Categorical { dtype, codes, .. } => {
                leaf_primitive(*dtype).map_or(true, |p| {
                    read_primitive(p, codes, i).as_u64() == Some(unsigned_max(*dtype))
                })
            }
            Self::Interval { dtype, left, .. } => dtype
                .primitive()
                .is_some_and(|p| buffers::is_sentinel_na(p, left, i)),
        }
    }

    /// Logical element `i`; categorical elements read as their code.
    pub fn value(&self, i: usize) -> Value {
        if i >= self.len() || self.is_na(i) {
            return Value::Null;
        }
        match self {
            Self::Numpy { dtype, data, .. } | Self::Nullable { dtype, data, .. } => {
                match dtype.primitive() {
                    Some(p) => read_primitive(p, data, i),
                    None => read_decimal(data, i),
                }
            }
            Self::String {
                is_binary,
                offsets,
                data,
                ..
            } => varlen_value(offsets, data, i, *is_binary),
            Self::List { offsets, child, .. } => Value::List(
                (offset_at(offsets, i)..offset_at(offsets, i + 1))
                    .map(|j| child.value(j))
                    .collect(),
            ),
            Self::Struct { children, .. } => {
                Value::Struct(children.iter().map(|c| c.value(i)).collect())
            }
            Self::Dict {
                dictionary,
                indices,
                ..
            } => match indices.value(i).as_i64() {
                Some(k) if k >= 0 => dictionary.value(k as usize),
                _ => Value::Null,
            },
            Self::Categorical { dtype, codes, .. } => match dtype.primitive() {
                Some(p) => read_primitive(p, codes, i),
                None => Value::Null,
            },
            Self::Interval {
                dtype, left, right, ..
            } => match dtype.primitive() {
                Some(p) => Value::interval(read_primitive(p, left, i), read_primitive(p, right, i)),
                None => Value::Null,
            },
        }
    }

    /// The array type this layout stores, with maps seen as their list-of-struct
    /// storage. `None` for categorical arrays, whose categories live on the
    /// managed side.
    pub fn layout_type(&self) -> Option<ArrayType> {
        Some(match self {
            Self::Numpy { dtype, .. } => ArrayType::Primitive(dtype.primitive()?),
            Self::Nullable {
                dtype: WireType::Decimal,
                precision,
                scale,
                ..
            } => ArrayType::Decimal {
                precision: u8::try_from(*precision).ok()?,
                scale: u8::try_from(*scale).ok()?,
            },
            Self::Nullable { dtype, .. } => ArrayType::Nullable(dtype.primitive()?),
            Self::String { is_binary, .. } => {
                if *is_binary {
                    ArrayType::Binary
                } else {
                    ArrayType::String
                }
            }
            Self::List { child, .. } => ArrayType::list(child.layout_type()?),
            Self::Struct {
                children,
                field_names,
                ..
            } => ArrayType::Struct(
                field_names
                    .iter()
                    .zip(children)
                    .map(|(n, c)| c.layout_type().map(|t| Field::new(n.clone(), t)))
                    .collect::<Option<Vec<_>>>()?,
            ),
            Self::Dict { .. } => ArrayType::DictString,
            Self::Categorical { .. } => return None,
            Self::Interval { dtype, .. } => ArrayType::Interval(dtype.primitive()?),
        })
    }

    /// Build a native array of type `ty`.
    ///
    /// Plain integer, bool and date/time arrays that receive a null are
    /// promoted to the nullable layout.
    pub fn from_values(ty: &ArrayType, values: &[Value]) -> Result<NativeArray> {
        let len = values.len();
        let bitmap = || bitmap_from_iter(len, values.iter().map(|v| !v.is_null()));
        let arr = match ty {
            ArrayType::Primitive(p) => {
                let needs_bitmap = !p.is_float() && !p.has_nat() && values.iter().any(Value::is_null);
                if needs_bitmap {
                    return Self::from_values(&ArrayType::Nullable(*p), values);
                }
                Self::Numpy {
                    dtype: WireType::of(*p),
                    len,
                    data: encode_primitive(*p, values, false)?,
                }
            }
            ArrayType::Nullable(p) => Self::Nullable {
                dtype: WireType::of(*p),
                len,
                data: encode_primitive(*p, values, true)?,
                null_bitmap: bitmap(),
                precision: 0,
                scale: 0,
            },
            ArrayType::Decimal { precision, scale } => Self::Nullable {
                dtype: WireType::Decimal,
                len,
                data: encode_decimal(values)?,
                null_bitmap: bitmap(),
                precision: i32::from(*precision),
                scale: i32::from(*scale),
            },
            ArrayType::String | ArrayType::Binary => {
                let is_binary = matches!(ty, ArrayType::Binary);
                let (offsets, data, null_bitmap) = encode_varlen(values, is_binary)?;
                Self::String {
                    is_binary,
                    len,
                    offsets,
                    data,
                    null_bitmap,
                }
            }
            ArrayType::List(inner) => {
                let mut flat = Vec::new();
                let mut lengths = Vec::with_capacity(len);
                for v in values {
                    match v {
                        Value::Null => lengths.push(0),
                        Value::List(items) => {
                            lengths.push(items.len());
                            flat.extend_from_slice(items);
                        }
                        other => bail!("cannot store {other} in a {ty} array"),
                    }
                }
                Self::List {
                    len,
                    offsets: offsets_from_lengths(lengths),
                    null_bitmap: bitmap(),
                    child: Arc::new(Self::from_values(inner, &flat)?),
                }
            }
            ArrayType::Struct(fields) => {
                let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(len); fields.len()];
                for v in values {
                    match v {
                        Value::Null => {
                            for (col, f) in columns.iter_mut().zip(fields) {
                                col.push(null_row_filler(&f.ty));
                            }
                        }
                        Value::Struct(items) if items.len() == fields.len() => {
                            for (col, it) in columns.iter_mut().zip(items) {
                                col.push(it.clone());
                            }
                        }
                        other => bail!("cannot store {other} in a {ty} array"),
                    }
                }
                Self::Struct {
                    len,
                    null_bitmap: bitmap(),
                    children: fields
                        .iter()
                        .zip(&columns)
                        .map(|(f, col)| Self::from_values(&f.ty, col).map(Arc::new))
                        .collect::<Result<Vec<_>>>()?,
                    field_names: fields.iter().map(|f| f.name.clone()).collect(),
                }
            }
            ArrayType::Map { key, value } => {
                Self::from_values(&ArrayType::map_storage_type(key, value), values)?
            }
            ArrayType::DictString => {
                let mut dict = Vec::new();
                let mut positions: HashMap<&Value, i64> = HashMap::new();
                let mut idx = Vec::with_capacity(len);
                for v in values {
                    if v.is_null() {
                        idx.push(Value::Null);
                        continue;
                    }
                    let k = *positions.entry(v).or_insert_with(|| {
                        dict.push(v.clone());
                        dict.len() as i64 - 1
                    });
                    idx.push(Value::Int(k));
                }
                Self::Dict {
                    dictionary: Arc::new(Self::from_values(&ArrayType::String, &dict)?),
                    indices: Arc::new(Self::from_values(
                        &ArrayType::Nullable(PrimitiveType::Int32),
                        &idx,
                    )?),
                    has_global_dictionary: false,
                    has_deduped_local_dictionary: true,
                }
            }
            ArrayType::Categorical { .. } => {
                bail!("categorical arrays are built from codes, not values")
            }
            ArrayType::Interval(p) => {
                let (mut lefts, mut rights) = (Vec::with_capacity(len), Vec::with_capacity(len));
                for v in values {
                    match v {
                        Value::Interval(l, r) => {
                            lefts.push((**l).clone());
                            rights.push((**r).clone());
                        }
                        Value::Null => {
                            lefts.push(Value::Null);
                            rights.push(Value::Null);
                        }
                        other => bail!("cannot store {other} in a {ty} array"),
                    }
                }
                Self::Interval {
                    dtype: WireType::of(*p),
                    len,
                    left: encode_primitive(*p, &lefts, false)?,
                    right: encode_primitive(*p, &rights, false)?,
                }
            }
        };
        Ok(arr)
    }

    /// Gather rows; `None` produces an NA row.
    pub fn take(&self, rows: &[Option<usize>]) -> Result<NativeArray> {
        let n = self.len();
        if let Some(bad) = rows.iter().flatten().find(|&&r| r >= n) {
            bail!("row {bad} out of bounds for {} array of length {n}", self.kind());
        }
        match self {
            Self::Dict {
                dictionary,
                indices,
                has_global_dictionary,
                has_deduped_local_dictionary,
            } => Ok(Self::Dict {
                dictionary: dictionary.clone(),
                indices: Arc::new(indices.take(rows)?),
                has_global_dictionary: *has_global_dictionary,
                has_deduped_local_dictionary: *has_deduped_local_dictionary,
            }),
            Self::Categorical {
                dtype,
                codes,
                num_categories,
                ..
            } => {
                let p = leaf_primitive(*dtype)?;
                let na = Value::UInt(unsigned_max(*dtype));
                let gathered: Vec<Value> = rows
                    .iter()
                    .map(|r| r.map_or_else(|| na.clone(), |i| read_primitive(p, codes, i)))
                    .collect();
                Ok(Self::Categorical {
                    dtype: *dtype,
                    len: rows.len(),
                    codes: encode_primitive(p, &gathered, false)?,
                    num_categories: *num_categories,
                })
            }
            _ => {
                let ty = self
                    .layout_type()
                    .ok_or_else(|| anyhow!("cannot gather rows of a {} array", self.kind()))?;
                let vals: Vec<Value> = rows
                    .iter()
                    .map(|r| r.map_or(Value::Null, |i| self.value(i)))
                    .collect();
                Self::from_values(&ty, &vals)
            }
        }
    }

    pub fn take_rows(&self, rows: &[usize]) -> Result<NativeArray> {
        let rows: Vec<Option<usize>> = rows.iter().copied().map(Some).collect();
        self.take(&rows)
    }

    /// Append this array's lengths and buffer groups in pre-order.
    pub fn nested_parts(&self, lengths: &mut Vec<u64>, buffers: &mut Vec<Option<Buffer>>) -> Result<()> {
        lengths.push(self.len() as u64);
        match self {
            Self::List {
                offsets,
                null_bitmap,
                child,
                ..
            } => {
                buffers.extend([Some(offsets.clone()), Some(null_bitmap.clone())]);
                child.nested_parts(lengths, buffers)?;
            }
            Self::Struct {
                null_bitmap,
                children,
                ..
            } => {
                buffers.push(Some(null_bitmap.clone()));
                for c in children {
                    c.nested_parts(lengths, buffers)?;
                }
            }
            Self::String {
                offsets,
                data,
                null_bitmap,
                ..
            } => buffers.extend([
                Some(offsets.clone()),
                Some(null_bitmap.clone()),
                Some(data.clone()),
            ]),
            Self::Nullable {
                data, null_bitmap, ..
            } => buffers.extend([Some(null_bitmap.clone()), Some(data.clone())]),
            Self::Numpy { data, .. } => buffers.extend([None, Some(data.clone())]),
            other => bail!("{} arrays cannot appear inside a nested array", other.kind()),
        }
        Ok(())
    }

    /// Rebuild a nested array from the vectors [`NativeArray::nested_parts`] produces.
    pub fn from_nested_parts(ty: &ArrayType, lengths: &[u64], buffers: &[Option<Buffer>]) -> Result<NativeArray> {
        let mut walk = PartsWalk {
            lengths,
            buffers,
            li: 0,
            bi: 0,
        };
        let arr = walk.build(ty)?;
        ensure!(
            walk.li == lengths.len() && walk.bi == buffers.len(),
            "nested parts: {} lengths and {} buffers left unconsumed",
            lengths.len() - walk.li,
            buffers.len() - walk.bi
        );
        Ok(arr)
    }
}

struct PartsWalk<'a> {
    lengths: &'a [u64],
    buffers: &'a [Option<Buffer>],
    li: usize,
    bi: usize,
}

impl PartsWalk<'_> {
    fn len(&mut self) -> Result<usize> {
        let l = *self
            .lengths
            .get(self.li)
            .ok_or_else(|| anyhow!("nested parts: length vector ended early"))?;
        self.li += 1;
        Ok(l as usize)
    }

    fn buf(&mut self) -> Result<Option<Buffer>> {
        let b = self
            .buffers
            .get(self.bi)
            .cloned()
            .ok_or_else(|| anyhow!("nested parts: buffer vector ended early"))?;
        self.bi += 1;
        Ok(b)
    }

    fn required(&mut self, what: &str) -> Result<Buffer> {
        self.buf()?
            .ok_or_else(|| anyhow!("nested parts: missing {what} buffer"))
    }

    fn build(&mut self, ty: &ArrayType) -> Result<NativeArray> {
        if let ArrayType::Map { key, value } = ty {
            return self.build(&ArrayType::map_storage_type(key, value));
        }
        let len = self.len()?;
        let arr = match ty {
            ArrayType::List(inner) => {
                let offsets = self.required("offsets")?;
                let null_bitmap = self.required("bitmap")?;
                let child = Arc::new(self.build(inner)?);
                ensure!(
                    offset_at(&offsets, len) == child.len(),
                    "nested parts: list offsets end at {} but child has {} elements",
                    offset_at(&offsets, len),
                    child.len()
                );
                NativeArray::List {
                    len,
                    offsets,
                    null_bitmap,
                    child,
                }
            }
            ArrayType::Struct(fields) => {
                let null_bitmap = self.required("bitmap")?;
                let mut children = Vec::with_capacity(fields.len());
                for f in fields {
                    let c = self.build(&f.ty)?;
                    ensure!(c.len() == len, "nested parts: struct field {} has {} rows, struct has {len}", f.name, c.len());
                    children.push(Arc::new(c));
                }
                NativeArray::Struct {
                    len,
                    null_bitmap,
                    children,
                    field_names: fields.iter().map(|f| f.name.clone()).collect(),
                }
            }
            ArrayType::String | ArrayType::Binary => {
                let offsets = self.required("offsets")?;
                let null_bitmap = self.required("bitmap")?;
                let data = self.required("data")?;
                NativeArray::String {
                    is_binary: matches!(ty, ArrayType::Binary),
                    len,
                    offsets,
                    data,
                    null_bitmap,
                }
            }
            ArrayType::Nullable(p) => NativeArray::Nullable {
                dtype: WireType::of(*p),
                len,
                null_bitmap: self.required("bitmap")?,
                data: self.required("data")?,
                precision: 0,
                scale: 0,
            },
            ArrayType::Decimal { precision, scale } => NativeArray::Nullable {
                dtype: WireType::Decimal,
                len,
                null_bitmap: self.required("bitmap")?,
                data: self.required("data")?,
                precision: i32::from(*precision),
                scale: i32::from(*scale),
            },
            ArrayType::Primitive(p) => {
                let _ = self.buf()?;
                NativeArray::Numpy {
                    dtype: WireType::of(*p),
                    len,
                    data: self.required("data")?,
                }
            }
            other => bail!("nested parts: {other} cannot appear inside a nested array"),
        };
        Ok(arr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_with_missing_rows_promotes_ints() {
        let arr = NativeArray::from_values(
            &ArrayType::Primitive(PrimitiveType::Int64),
            &[Value::Int(1), Value::Int(2)],
        )
        .unwrap();
        let out = arr.take(&[Some(1), None]).unwrap();
        assert_eq!(out.kind(), "nullable");
        assert_eq!(out.value(0), Value::Int(2));
        assert!(out.is_na(1));
    }

    #[test]
    fn interval_rows_must_be_intervals_or_null() {
        let ty = ArrayType::Interval(PrimitiveType::Float64);
        let arr = NativeArray::from_values(
            &ty,
            &[Value::Null, Value::interval(Value::float(0.0), Value::float(1.0))],
        )
        .unwrap();
        assert!(arr.is_na(0));
        assert!(NativeArray::from_values(&ty, &[Value::float(3.0)]).is_err());
    }

    #[test]
    fn take_keeps_float_layout() {
        let arr = NativeArray::from_values(&ArrayType::Primitive(PrimitiveType::Float64), &[Value::float(1.0)]).unwrap();
        let out = arr.take(&[None, Some(0)]).unwrap();
        assert_eq!(out.kind(), "numpy");
        assert!(out.is_na(0));
    }

    #[test]
    fn nested_parts_rebuild_same_values() {
        let ty = ArrayType::list(ArrayType::Struct(vec![
            Field::new("a", ArrayType::Nullable(PrimitiveType::Int32)),
            Field::new("b", ArrayType::String),
        ]));
        let vals = vec![
            Value::List(vec![Value::Struct(vec![Value::Int(1), Value::str("x")])]),
            Value::Null,
            Value::List(vec![]),
        ];
        let arr = NativeArray::from_values(&ty, &vals).unwrap();
        let (mut lengths, mut bufs) = (Vec::new(), Vec::new());
        arr.nested_parts(&mut lengths, &mut bufs).unwrap();
        assert_eq!(lengths, vec![3, 1, 1, 1]);
        assert_eq!(bufs.len(), 2 + 1 + 2 + 3);
        let back = NativeArray::from_nested_parts(&ty, &lengths, &bufs).unwrap();
        assert_eq!((0..3).map(|i| back.value(i)).collect::<Vec<_>>(), vals);
    }

    #[test]
    fn out_of_bounds_take_fails() {
        let arr = NativeArray::from_values(&ArrayType::String, &[Value::str("a")]).unwrap();
        assert!(arr.take_rows(&[3]).is_err());
    }
}
