//! Managed-runtime arrays.
//!
//! An [`Array`] is a typed, possibly nested column whose storage is a set of
//! flat [`Buffer`]s laid out as described in [`crate::buffers`]. Values go in
//! through [`Array::from_values`] and come back out through
//! [`Array::to_values`]; the exporter and importer work on the buffers.

use crate::buffers::{
    self, bitmap_from_iter, encode_decimal, encode_primitive, encode_varlen, is_valid, offset_at,
    offsets_from_lengths, read_decimal, read_primitive, varlen_value, BufferKind,
};
use crate::error::{BridgeError, BridgeResult};
use crate::types::{ArrayType, Field, PrimitiveType};
use crate::value::Value;
use arrow::buffer::Buffer;

#[derive(Clone, Debug)]
pub enum Array {
    Primitive {
        ty: PrimitiveType,
        data: Buffer,
        len: usize,
    },
    Nullable {
        ty: PrimitiveType,
        data: Buffer,
        validity: Buffer,
        len: usize,
    },
    /// String (`binary == false`) or binary leaf.
    Varlen {
        binary: bool,
        offsets: Buffer,
        data: Buffer,
        validity: Buffer,
        len: usize,
    },
    Decimal {
        precision: u8,
        scale: u8,
        data: Buffer,
        validity: Buffer,
        len: usize,
    },
    List {
        offsets: Buffer,
        validity: Buffer,
        values: Box<Array>,
        len: usize,
    },
    Struct {
        names: Vec<String>,
        children: Vec<Array>,
        validity: Buffer,
        len: usize,
    },
    /// `entries` is a list of `{key, value}` structs.
    Map { entries: Box<Array> },
    DictString {
        dictionary: Box<Array>,
        /// Nullable Int32 positions into `dictionary`.
        indices: Box<Array>,
        has_global_dictionary: bool,
        has_deduped_local_dictionary: bool,
    },
    /// Signed codes, -1 = NA.
    Categorical {
        codes: Buffer,
        code_type: PrimitiveType,
        categories: Vec<String>,
        ordered: bool,
        len: usize,
    },
    /// Plain bound arrays of equal length.
    Interval {
        bound: PrimitiveType,
        left: Buffer,
        right: Buffer,
        len: usize,
    },
}

/// Signed code type a categorical with `n` categories stores its codes in.
pub fn signed_code_type(n: usize) -> PrimitiveType {
    if n < i8::MAX as usize {
        PrimitiveType::Int8
    } else if n < i16::MAX as usize {
        PrimitiveType::Int16
    } else if n < i32::MAX as usize {
        PrimitiveType::Int32
    } else {
        PrimitiveType::Int64
    }
}

/// Value a child slot under a null struct row holds.
pub(crate) fn null_row_filler(ty: &ArrayType) -> Value {
    match ty {
        ArrayType::Primitive(p) if p.is_float() => Value::float(0.0),
        ArrayType::Primitive(PrimitiveType::Bool) => Value::Bool(false),
        ArrayType::Primitive(_) => Value::Int(0),
        _ => Value::Null,
    }
}

fn expect_kind<'a>(v: &'a Value, what: &str, ty: &ArrayType) -> BridgeResult<&'a [Value]> {
    match v {
        Value::List(items) if what == "list" => Ok(items),
        Value::Struct(items) if what == "struct" => Ok(items),
        other => Err(BridgeError::unsupported(format!(
            "cannot store {other} in a {ty} array"
        ))),
    }
}

impl Array {
    pub fn len(&self) -> usize {
        match self {
            Self::Primitive { len, .. }
            | Self::Nullable { len, .. }
            | Self::Varlen { len, .. }
            | Self::Decimal { len, .. }
            | Self::List { len, .. }
            | Self::Struct { len, .. }
            | Self::Categorical { len, .. }
            | Self::Interval { len, .. } => *len,
            Self::Map { entries } => entries.len(),
            Self::DictString { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The static type this array is an instance of.
    pub fn array_type(&self) -> ArrayType {
        match self {
            Self::Primitive { ty, .. } => ArrayType::Primitive(*ty),
            Self::Nullable { ty, .. } => ArrayType::Nullable(*ty),
            Self::Varlen { binary: true, .. } => ArrayType::Binary,
            Self::Varlen { binary: false, .. } => ArrayType::String,
            Self::Decimal {
                precision, scale, ..
            } => ArrayType::Decimal {
                precision: *precision,
                scale: *scale,
            },
            Self::List { values, .. } => ArrayType::list(values.array_type()),
            Self::Struct {
                names, children, ..
            } => ArrayType::Struct(
                names
                    .iter()
                    .zip(children)
                    .map(|(n, c)| Field::new(n.clone(), c.array_type()))
                    .collect(),
            ),
            Self::Map { entries } => match entries.array_type() {
                ArrayType::List(inner) => match *inner {
                    ArrayType::Struct(mut f) if f.len() == 2 => {
                        let value = f.remove(1).ty;
                        let key = f.remove(0).ty;
                        ArrayType::map(key, value)
                    }
                    other => ArrayType::list(other),
                },
                other => other,
            },
            Self::DictString { .. } => ArrayType::DictString,
            Self::Categorical {
                categories,
                ordered,
                ..
            } => ArrayType::Categorical {
                categories: Some(categories.clone()),
                ordered: *ordered,
            },
            Self::Interval { bound, .. } => ArrayType::Interval(*bound),
        }
    }

    /// One of the array's own buffers, if it has that kind.
    pub fn buffer(&self, kind: BufferKind) -> Option<&Buffer> {
        match (self, kind) {
            (Self::Primitive { data, .. }, BufferKind::Data)
            | (Self::Nullable { data, .. }, BufferKind::Data)
            | (Self::Varlen { data, .. }, BufferKind::Data)
            | (Self::Decimal { data, .. }, BufferKind::Data)
            | (Self::Categorical { codes: data, .. }, BufferKind::Data) => Some(data),
            (Self::Nullable { validity, .. }, BufferKind::Validity)
            | (Self::Varlen { validity, .. }, BufferKind::Validity)
            | (Self::Decimal { validity, .. }, BufferKind::Validity)
            | (Self::List { validity, .. }, BufferKind::Validity)
            | (Self::Struct { validity, .. }, BufferKind::Validity) => Some(validity),
            (Self::Varlen { offsets, .. }, BufferKind::Offsets)
            | (Self::List { offsets, .. }, BufferKind::Offsets) => Some(offsets),
            (Self::Map { entries }, k) => entries.buffer(k),
            _ => None,
        }
    }

    /// Child array at `level`: the item array of a list or map, the field of a
    /// struct, or the dictionary (0) and indices (1) of a dictionary array.
    pub fn child(&self, level: usize) -> Option<&Array> {
        match self {
            Self::List { values, .. } if level == 0 => Some(values),
            Self::Map { entries } => entries.child(level),
            Self::Struct { children, .. } => children.get(level),
            Self::DictString { dictionary, .. } if level == 0 => Some(dictionary),
            Self::DictString { indices, .. } if level == 1 => Some(indices),
            _ => None,
        }
    }

    pub fn is_null(&self, i: usize) -> bool {
        match self {
            Self::Primitive { ty, data, .. } => buffers::is_sentinel_na(*ty, data, i),
            Self::Nullable { validity, .. }
            | Self::Varlen { validity, .. }
            | Self::Decimal { validity, .. }
            | Self::List { validity, .. }
            | Self::Struct { validity, .. } => !is_valid(validity, i),
            Self::Map { entries } => entries.is_null(i),
            Self::DictString { indices, .. } => indices.is_null(i),
            Self::Categorical {
                codes, code_type, ..
            } => read_primitive(*code_type, codes, i) == Value::Int(-1),
            Self::Interval { bound, left, .. } => buffers::is_sentinel_na(*bound, left, i),
        }
    }

    /// Logical element `i`, `Value::Null` for NA slots.
    pub fn value(&self, i: usize) -> Value {
        if self.is_null(i) {
            return Value::Null;
        }
        match self {
            Self::Primitive { ty, data, .. } | Self::Nullable { ty, data, .. } => {
                read_primitive(*ty, data, i)
            }
            Self::Varlen {
                binary,
                offsets,
                data,
                ..
            } => varlen_value(offsets, data, i, *binary),
            Self::Decimal { data, .. } => read_decimal(data, i),
            Self::List {
                offsets, values, ..
            } => Value::List(
                (offset_at(offsets, i)..offset_at(offsets, i + 1))
                    .map(|j| values.value(j))
                    .collect(),
            ),
            Self::Struct { children, .. } => {
                Value::Struct(children.iter().map(|c| c.value(i)).collect())
            }
            Self::Map { entries } => entries.value(i),
            Self::DictString {
                dictionary,
                indices,
                ..
            } => match indices.value(i).as_i64() {
                Some(k) if k >= 0 => dictionary.value(k as usize),
                _ => Value::Null,
            },
            Self::Categorical {
                codes,
                code_type,
                categories,
                ..
            } => match read_primitive(*code_type, codes, i).as_i64() {
                Some(c) if c >= 0 => categories
                    .get(c as usize)
                    .map_or(Value::Null, |s| Value::Str(s.clone())),
                _ => Value::Null,
            },
            Self::Interval {
                bound, left, right, ..
            } => Value::interval(read_primitive(*bound, left, i), read_primitive(*bound, right, i)),
        }
    }

    pub fn to_values(&self) -> Vec<Value> {
        (0..self.len()).map(|i| self.value(i)).collect()
    }

    /// Build an array of type `ty` from logical values.
    ///
    /// # Errors
    /// `UnsupportedType` when a value does not fit `ty`, or when `ty` is a
    /// categorical whose categories are not known.
    pub fn from_values(ty: &ArrayType, values: &[Value]) -> BridgeResult<Array> {
        let len = values.len();
        let validity = || bitmap_from_iter(len, values.iter().map(|v| !v.is_null()));
        let arr = match ty {
            ArrayType::Primitive(p) => Self::Primitive {
                ty: *p,
                data: encode_primitive(*p, values, false)?,
                len,
            },
            ArrayType::Nullable(p) => Self::Nullable {
                ty: *p,
                data: encode_primitive(*p, values, true)?,
                validity: validity(),
                len,
            },
            ArrayType::String | ArrayType::Binary => {
                let binary = matches!(ty, ArrayType::Binary);
                let (offsets, data, validity) = encode_varlen(values, binary)?;
                Self::Varlen {
                    binary,
                    offsets,
                    data,
                    validity,
                    len,
                }
            }
            ArrayType::Decimal { precision, scale } => Self::Decimal {
                precision: *precision,
                scale: *scale,
                data: encode_decimal(values)?,
                validity: validity(),
                len,
            },
            ArrayType::List(inner) => {
                let mut flat = Vec::new();
                let mut lengths = Vec::with_capacity(len);
                for v in values {
                    if v.is_null() {
                        lengths.push(0);
                        continue;
                    }
                    let items = expect_kind(v, "list", ty)?;
                    lengths.push(items.len());
                    flat.extend_from_slice(items);
                }
                Self::List {
                    offsets: offsets_from_lengths(lengths),
                    validity: validity(),
                    values: Box::new(Self::from_values(inner, &flat)?),
                    len,
                }
            }
            ArrayType::Struct(fields) => {
                let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(len); fields.len()];
                for v in values {
                    if v.is_null() {
                        for (col, f) in columns.iter_mut().zip(fields) {
                            col.push(null_row_filler(&f.ty));
                        }
                        continue;
                    }
                    let items = expect_kind(v, "struct", ty)?;
                    if items.len() != fields.len() {
                        return Err(BridgeError::shape(format!(
                            "struct value has {} fields, {ty} has {}",
                            items.len(),
                            fields.len()
                        )));
                    }
                    for (col, it) in columns.iter_mut().zip(items) {
                        col.push(it.clone());
                    }
                }
                let children = fields
                    .iter()
                    .zip(&columns)
                    .map(|(f, col)| Self::from_values(&f.ty, col))
                    .collect::<BridgeResult<Vec<_>>>()?;
                Self::Struct {
                    names: fields.iter().map(|f| f.name.clone()).collect(),
                    children,
                    validity: validity(),
                    len,
                }
            }
            ArrayType::Map { key, value } => Self::Map {
                entries: Box::new(Self::from_values(
                    &ArrayType::map_storage_type(key, value),
                    values,
                )?),
            },
            ArrayType::DictString => {
                let mut dict: Vec<Value> = Vec::new();
                let mut positions = std::collections::HashMap::new();
                let mut idx = Vec::with_capacity(len);
                for v in values {
                    match v {
                        Value::Null => idx.push(Value::Null),
                        Value::Str(s) => {
                            let k = *positions.entry(s.clone()).or_insert_with(|| {
                                dict.push(v.clone());
                                dict.len() - 1
                            });
                            idx.push(Value::Int(k as i64));
                        }
                        other => {
                            return Err(BridgeError::unsupported(format!(
                                "cannot store {other} in a dictionary-encoded string array"
                            )));
                        }
                    }
                }
                Self::DictString {
                    dictionary: Box::new(Self::from_values(&ArrayType::String, &dict)?),
                    indices: Box::new(Self::from_values(
                        &ArrayType::Nullable(PrimitiveType::Int32),
                        &idx,
                    )?),
                    has_global_dictionary: false,
                    has_deduped_local_dictionary: true,
                }
            }
            ArrayType::Categorical {
                categories: Some(categories),
                ordered,
            } => {
                let code_type = signed_code_type(categories.len());
                let codes = values
                    .iter()
                    .map(|v| match v {
                        Value::Null => Ok(Value::Int(-1)),
                        Value::Str(s) => categories
                            .iter()
                            .position(|c| c == s)
                            .map(|k| Value::Int(k as i64))
                            .ok_or_else(|| {
                                BridgeError::unsupported(format!("{s:?} is not a category of {ty}"))
                            }),
                        other => Err(BridgeError::unsupported(format!(
                            "cannot store {other} in a {ty} array"
                        ))),
                    })
                    .collect::<BridgeResult<Vec<_>>>()?;
                Self::Categorical {
                    codes: encode_primitive(code_type, &codes, false)?,
                    code_type,
                    categories: categories.clone(),
                    ordered: *ordered,
                    len,
                }
            }
            ArrayType::Categorical {
                categories: None, ..
            } => {
                return Err(BridgeError::unsupported(format!(
                    "{ty} has no categories to build values against"
                )));
            }
            ArrayType::Interval(bound) => {
                let mut lefts = Vec::with_capacity(len);
                let mut rights = Vec::with_capacity(len);
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
                        other => {
                            return Err(BridgeError::unsupported(format!(
                                "cannot store {other} in a {ty} array"
                            )));
                        }
                    }
                }
                Self::Interval {
                    bound: *bound,
                    left: encode_primitive(*bound, &lefts, false)?,
                    right: encode_primitive(*bound, &rights, false)?,
                    len,
                }
            }
        };
        Ok(arr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_null_rows_keep_plain_children_valid() {
        let ty = ArrayType::Struct(vec![
            Field::new("x", ArrayType::Primitive(PrimitiveType::Int64)),
            Field::new("y", ArrayType::String),
        ]);
        let vals = vec![
            Value::Struct(vec![Value::Int(1), Value::str("a")]),
            Value::Null,
        ];
        let arr = Array::from_values(&ty, &vals).unwrap();
        assert_eq!(arr.to_values(), vals);
        assert_eq!(arr.child(0).map(Array::len), Some(2));
    }

    #[test]
    fn map_reports_map_type() {
        let ty = ArrayType::map(ArrayType::String, ArrayType::Nullable(PrimitiveType::Int32));
        let arr = Array::from_values(&ty, &[]).unwrap();
        assert_eq!(arr.array_type(), ty);
    }

    #[test]
    fn dictionary_dedups_labels() {
        let arr = Array::from_values(
            &ArrayType::DictString,
            &[Value::str("a"), Value::str("b"), Value::str("a"), Value::Null],
        )
        .unwrap();
        assert_eq!(arr.child(0).map(Array::len), Some(2));
        assert_eq!(arr.value(2), Value::str("a"));
        assert!(arr.is_null(3));
    }

    #[test]
    fn categorical_codes_use_smallest_signed_type() {
        let ty = ArrayType::categorical(&["lo", "hi"], true);
        let arr = Array::from_values(&ty, &[Value::str("hi"), Value::Null]).unwrap();
        match &arr {
            Array::Categorical { code_type, .. } => assert_eq!(*code_type, PrimitiveType::Int8),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(arr.to_values(), vec![Value::str("hi"), Value::Null]);
    }
}
