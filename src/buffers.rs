//! Leaf buffer extraction and the flat layouts both sides agree on.
//!
//! Every leaf crosses the boundary as at most three [`Buffer`]s:
//!
//! - data: fixed-width elements, or the concatenated bytes of a string/binary leaf
//! - validity: LSB-first bit-packed, 1 = valid
//! - offsets: `u64`, `len + 1` entries, for string/binary leaves and list levels
//!
//! [`Buffer`] is reference counted, so cloning one is how ownership is shared
//! with the native side.

use crate::array::Array;
use crate::codec::WireType;
use crate::error::{BridgeError, BridgeResult};
use crate::types::PrimitiveType;
use crate::value::Value;
use arrow::buffer::Buffer;
use arrow::util::bit_util;

/// NA value of plain datetime/timedelta arrays.
pub const NAT: i64 = i64::MIN;

/// Which buffer of a leaf to fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Data,
    Validity,
    Offsets,
}

/// Raw buffers of one leaf array plus its element counts.
#[derive(Clone, Debug, Default)]
pub struct LeafBuffers {
    /// Wire code of the element type.
    pub type_code: i32,
    pub len: usize,
    /// Total byte length of a string/binary leaf.
    pub n_chars: usize,
    pub data: Option<Buffer>,
    pub validity: Option<Buffer>,
    pub offsets: Option<Buffer>,
}

impl LeafBuffers {
    pub fn get(&self, kind: BufferKind) -> Option<&Buffer> {
        match kind {
            BufferKind::Data => self.data.as_ref(),
            BufferKind::Validity => self.validity.as_ref(),
            BufferKind::Offsets => self.offsets.as_ref(),
        }
    }

    /// A buffer the caller cannot do without.
    ///
    /// # Errors
    /// `ShapeMismatch` when the buffer is absent.
    pub fn require(&self, kind: BufferKind) -> BridgeResult<Buffer> {
        self.get(kind).cloned().ok_or_else(|| {
            BridgeError::shape(format!(
                "leaf of {} elements is missing its {kind:?} buffer",
                self.len
            ))
        })
    }
}

/// Expose the buffers of a leaf (non-nested) managed array.
///
/// # Errors
/// `UnsupportedType` for nested, dictionary, categorical and interval arrays,
/// which have no single set of leaf buffers.
pub fn extract_leaf(array: &Array) -> BridgeResult<LeafBuffers> {
    let out = match array {
        Array::Primitive { ty, data, len } => LeafBuffers {
            type_code: WireType::of(*ty).code(),
            len: *len,
            data: Some(data.clone()),
            ..LeafBuffers::default()
        },
        Array::Nullable {
            ty,
            data,
            validity,
            len,
        } => LeafBuffers {
            type_code: WireType::of(*ty).code(),
            len: *len,
            data: Some(data.clone()),
            validity: Some(validity.clone()),
            ..LeafBuffers::default()
        },
        Array::Decimal {
            data,
            validity,
            len,
            ..
        } => LeafBuffers {
            type_code: WireType::Decimal.code(),
            len: *len,
            data: Some(data.clone()),
            validity: Some(validity.clone()),
            ..LeafBuffers::default()
        },
        Array::Varlen {
            binary,
            offsets,
            data,
            validity,
            len,
        } => LeafBuffers {
            type_code: if *binary {
                WireType::Binary.code()
            } else {
                WireType::String.code()
            },
            len: *len,
            n_chars: offset_at(offsets, *len),
            data: Some(data.clone()),
            validity: Some(validity.clone()),
            offsets: Some(offsets.clone()),
        },
        other => {
            return Err(BridgeError::unsupported(format!(
                "{} is not a leaf array",
                other.array_type()
            )));
        }
    };
    Ok(out)
}

// ---- bitmaps ----

pub fn bitmap_from_iter(len: usize, valid: impl IntoIterator<Item = bool>) -> Buffer {
    let mut bytes = vec![0u8; bit_util::ceil(len, 8)];
    for (i, ok) in valid.into_iter().take(len).enumerate() {
        if ok {
            bit_util::set_bit(&mut bytes, i);
        }
    }
    Buffer::from_vec(bytes)
}

pub fn all_valid(len: usize) -> Buffer {
    bitmap_from_iter(len, std::iter::repeat(true))
}

#[inline]
pub fn is_valid(bitmap: &Buffer, i: usize) -> bool {
    let bytes = bitmap.as_slice();
    i / 8 < bytes.len() && bit_util::get_bit(bytes, i)
}

// ---- offsets ----

pub fn offsets_from_lengths(lengths: impl IntoIterator<Item = usize>) -> Buffer {
    let mut offs = vec![0u64];
    let mut acc = 0u64;
    for l in lengths {
        acc += l as u64;
        offs.push(acc);
    }
    Buffer::from_vec(offs)
}

#[inline]
pub fn offset_at(offsets: &Buffer, i: usize) -> usize {
    offsets.typed_data::<u64>().get(i).copied().unwrap_or(0) as usize
}

/// Validate that an offsets buffer can describe `len` elements over `child_len` items.
///
/// # Errors
/// `ShapeMismatch` on a short buffer or a final offset that disagrees with `child_len`.
pub fn check_offsets(offsets: &Buffer, len: usize, child_len: usize, what: &str) -> BridgeResult<()> {
    let offs = offsets.typed_data::<u64>();
    if offs.len() < len + 1 {
        return Err(BridgeError::shape(format!(
            "{what}: offsets hold {} entries, need {}",
            offs.len(),
            len + 1
        )));
    }
    if offs[len] as usize != child_len {
        return Err(BridgeError::shape(format!(
            "{what}: final offset {} does not match {child_len} child elements",
            offs[len]
        )));
    }
    Ok(())
}

/// Validate a fixed-width data buffer holds `len` elements of `width` bytes.
///
/// # Errors
/// `ShapeMismatch` on a short buffer, one that is not a whole number of
/// elements, or one whose start is not aligned to `width`.
pub fn check_data(data: &Buffer, len: usize, width: usize, what: &str) -> BridgeResult<()> {
    if data.len() < len * width {
        return Err(BridgeError::shape(format!(
            "{what}: data buffer holds {} bytes, need {}",
            data.len(),
            len * width
        )));
    }
    if width > 1 && data.len() % width != 0 {
        return Err(BridgeError::shape(format!(
            "{what}: data buffer of {} bytes is not a whole number of {width}-byte elements",
            data.len()
        )));
    }
    if width > 1 && !data.is_empty() && data.as_ptr().align_offset(width) != 0 {
        return Err(BridgeError::shape(format!(
            "{what}: data buffer is not aligned to {width} bytes"
        )));
    }
    Ok(())
}

// ---- variable-length leaves ----

/// Offsets, data and validity of a string/binary leaf built from values.
///
/// # Errors
/// `UnsupportedType` on a value that is not a string (or bytes, when `binary`).
pub fn encode_varlen(values: &[Value], binary: bool) -> BridgeResult<(Buffer, Buffer, Buffer)> {
    let mut bytes = Vec::new();
    let mut lengths = Vec::with_capacity(values.len());
    for v in values {
        let piece: &[u8] = match v {
            Value::Null => &[],
            Value::Str(s) if !binary => s.as_bytes(),
            Value::Bytes(b) if binary => b,
            Value::Str(s) => s.as_bytes(),
            other => {
                return Err(BridgeError::unsupported(format!(
                    "cannot store {other} in a {} array",
                    if binary { "binary" } else { "string" }
                )));
            }
        };
        bytes.extend_from_slice(piece);
        lengths.push(piece.len());
    }
    Ok((
        offsets_from_lengths(lengths),
        Buffer::from_vec(bytes),
        bitmap_from_iter(values.len(), values.iter().map(|v| !v.is_null())),
    ))
}

#[inline]
pub fn varlen_at<'a>(offsets: &Buffer, data: &'a Buffer, i: usize) -> &'a [u8] {
    let start = offset_at(offsets, i);
    let end = offset_at(offsets, i + 1);
    data.as_slice().get(start..end).unwrap_or(&[])
}

pub fn varlen_value(offsets: &Buffer, data: &Buffer, i: usize, binary: bool) -> Value {
    let raw = varlen_at(offsets, data, i);
    if binary {
        Value::Bytes(raw.to_vec())
    } else {
        Value::Str(String::from_utf8_lossy(raw).into_owned())
    }
}

// ---- fixed-width leaves ----

fn out_of_range(p: PrimitiveType, v: &Value) -> BridgeError {
    BridgeError::unsupported(format!("value {v} does not fit in a {p:?} array"))
}

fn int_of(p: PrimitiveType, v: &Value) -> BridgeResult<i64> {
    match v {
        Value::Int(_) | Value::UInt(_) | Value::Bool(_) => v.as_i64().ok_or_else(|| out_of_range(p, v)),
        _ => Err(out_of_range(p, v)),
    }
}

fn uint_of(p: PrimitiveType, v: &Value) -> BridgeResult<u64> {
    v.as_u64().ok_or_else(|| out_of_range(p, v))
}

fn float_of(p: PrimitiveType, v: &Value) -> BridgeResult<f64> {
    match v {
        Value::Float(f) => Ok(f.0),
        Value::Int(_) | Value::UInt(_) => v.as_f64().ok_or_else(|| out_of_range(p, v)),
        _ => Err(out_of_range(p, v)),
    }
}

/// What a null slot stores in the data buffer.
fn null_stand_in(p: PrimitiveType, nullable: bool) -> BridgeResult<Value> {
    if nullable {
        return Ok(match p {
            PrimitiveType::Float32 | PrimitiveType::Float64 => Value::float(0.0),
            PrimitiveType::Bool => Value::Bool(false),
            _ => Value::Int(0),
        });
    }
    if p.is_float() {
        Ok(Value::float(f64::NAN))
    } else if p.has_nat() {
        Ok(Value::Int(NAT))
    } else {
        Err(BridgeError::unsupported(format!(
            "null in a non-nullable {p:?} array"
        )))
    }
}

macro_rules! collect_ints {
    ($t:ty, $p:expr, $vals:expr, $conv:ident) => {{
        let out = $vals
            .iter()
            .map(|v| $conv($p, v).and_then(|x| <$t>::try_from(x).map_err(|_| out_of_range($p, v))))
            .collect::<BridgeResult<Vec<$t>>>()?;
        Buffer::from_vec(out)
    }};
}

/// Data buffer for a fixed-width leaf.
///
/// Nulls are stored as NaN/NaT in plain float/datetime arrays and as zero in
/// nullable arrays.
///
/// # Errors
/// `UnsupportedType` on out-of-range values and on nulls a plain array cannot hold.
pub fn encode_primitive(p: PrimitiveType, values: &[Value], nullable: bool) -> BridgeResult<Buffer> {
    let mut filled = Vec::with_capacity(values.len());
    for v in values {
        filled.push(if v.is_null() {
            null_stand_in(p, nullable)?
        } else {
            v.clone()
        });
    }
    let vals = &filled;
    let buf = match p {
        PrimitiveType::Int8 => collect_ints!(i8, p, vals, int_of),
        PrimitiveType::Int16 => collect_ints!(i16, p, vals, int_of),
        PrimitiveType::Int32 => collect_ints!(i32, p, vals, int_of),
        PrimitiveType::Int64
        | PrimitiveType::Date
        | PrimitiveType::Time
        | PrimitiveType::Datetime
        | PrimitiveType::Timedelta => collect_ints!(i64, p, vals, int_of),
        PrimitiveType::UInt8 => collect_ints!(u8, p, vals, uint_of),
        PrimitiveType::UInt16 => collect_ints!(u16, p, vals, uint_of),
        PrimitiveType::UInt32 => collect_ints!(u32, p, vals, uint_of),
        PrimitiveType::UInt64 => collect_ints!(u64, p, vals, uint_of),
        PrimitiveType::Bool => {
            let out = vals
                .iter()
                .map(|v| v.as_bool().map(u8::from).ok_or_else(|| out_of_range(p, v)))
                .collect::<BridgeResult<Vec<u8>>>()?;
            Buffer::from_vec(out)
        }
        PrimitiveType::Float32 => {
            let out = vals
                .iter()
                .map(|v| float_of(p, v).map(|f| f as f32))
                .collect::<BridgeResult<Vec<f32>>>()?;
            Buffer::from_vec(out)
        }
        PrimitiveType::Float64 => {
            let out = vals
                .iter()
                .map(|v| float_of(p, v))
                .collect::<BridgeResult<Vec<f64>>>()?;
            Buffer::from_vec(out)
        }
    };
    Ok(buf)
}

/// Raw element `i` of a fixed-width data buffer; sentinels are returned as stored.
pub fn read_primitive(p: PrimitiveType, data: &Buffer, i: usize) -> Value {
    fn at<T: arrow::datatypes::ArrowNativeType>(data: &Buffer, i: usize) -> Option<T> {
        let width = std::mem::size_of::<T>();
        // typed_data panics on a ragged or misaligned buffer
        if data.len() % width != 0 || data.as_ptr().align_offset(std::mem::align_of::<T>()) != 0 {
            return None;
        }
        data.typed_data::<T>().get(i).copied()
    }
    let v = match p {
        PrimitiveType::Int8 => at::<i8>(data, i).map(|x| Value::Int(i64::from(x))),
        PrimitiveType::Int16 => at::<i16>(data, i).map(|x| Value::Int(i64::from(x))),
        PrimitiveType::Int32 => at::<i32>(data, i).map(|x| Value::Int(i64::from(x))),
        PrimitiveType::Int64
        | PrimitiveType::Date
        | PrimitiveType::Time
        | PrimitiveType::Datetime
        | PrimitiveType::Timedelta => at::<i64>(data, i).map(Value::Int),
        PrimitiveType::UInt8 => at::<u8>(data, i).map(|x| Value::UInt(u64::from(x))),
        PrimitiveType::UInt16 => at::<u16>(data, i).map(|x| Value::UInt(u64::from(x))),
        PrimitiveType::UInt32 => at::<u32>(data, i).map(|x| Value::UInt(u64::from(x))),
        PrimitiveType::UInt64 => at::<u64>(data, i).map(Value::UInt),
        PrimitiveType::Bool => at::<u8>(data, i).map(|x| Value::Bool(x != 0)),
        PrimitiveType::Float32 => at::<f32>(data, i).map(|x| Value::float(f64::from(x))),
        PrimitiveType::Float64 => at::<f64>(data, i).map(Value::float),
    };
    v.unwrap_or(Value::Null)
}

/// Whether element `i` of a plain array holds its type's NA sentinel.
pub fn is_sentinel_na(p: PrimitiveType, data: &Buffer, i: usize) -> bool {
    match read_primitive(p, data, i) {
        Value::Float(f) => f.0.is_nan(),
        Value::Int(v) if p.has_nat() => v == NAT,
        _ => false,
    }
}

pub fn encode_decimal(values: &[Value]) -> BridgeResult<Buffer> {
    let out = values
        .iter()
        .map(|v| match v {
            Value::Null => Ok(0i128),
            Value::Decimal(d) => Ok(*d),
            Value::Int(i) => Ok(i128::from(*i)),
            other => Err(BridgeError::unsupported(format!(
                "cannot store {other} in a decimal array"
            ))),
        })
        .collect::<BridgeResult<Vec<i128>>>()?;
    Ok(Buffer::from_vec(out))
}

pub fn read_decimal(data: &Buffer, i: usize) -> Value {
    if data.len() % 16 != 0 || data.as_ptr().align_offset(std::mem::align_of::<i128>()) != 0 {
        return Value::Null;
    }
    data.typed_data::<i128>()
        .get(i)
        .map_or(Value::Null, |d| Value::Decimal(*d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn bitmap_is_lsb_first() {
        let bm = bitmap_from_iter(10, [true, false, true, true, false, false, false, false, false, true]);
        assert_eq!(bm.as_slice(), &[0b0000_1101, 0b0000_0010]);
        assert!(is_valid(&bm, 9));
        assert!(!is_valid(&bm, 1));
        assert!(!is_valid(&bm, 64));
    }

    #[test]
    fn plain_float_null_becomes_nan() {
        let buf = encode_primitive(PrimitiveType::Float64, &[Value::float(1.5), Value::Null], false).unwrap();
        assert!(is_sentinel_na(PrimitiveType::Float64, &buf, 1));
        assert_eq!(read_primitive(PrimitiveType::Float64, &buf, 0), Value::float(1.5));
    }

    #[test]
    fn plain_int_rejects_null() {
        let err = encode_primitive(PrimitiveType::Int32, &[Value::Null], false).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn out_of_range_is_rejected() {
        assert!(encode_primitive(PrimitiveType::Int8, &[Value::Int(300)], false).is_err());
        assert!(encode_primitive(PrimitiveType::UInt16, &[Value::Int(-1)], true).is_err());
    }

    #[test]
    fn ragged_or_misaligned_data_is_rejected() {
        let ragged = Buffer::from_vec(vec![0u8; 9]);
        assert!(check_data(&ragged, 1, 8, "t").unwrap_err().kind == ErrorKind::ShapeMismatch);
        assert_eq!(read_primitive(PrimitiveType::Int64, &ragged, 0), Value::Null);

        let shifted = Buffer::from_vec(vec![0i64; 3]).slice_with_length(4, 16);
        assert!(check_data(&shifted, 2, 8, "t").unwrap_err().kind == ErrorKind::ShapeMismatch);
        assert_eq!(read_primitive(PrimitiveType::Int64, &shifted, 0), Value::Null);

        let whole = Buffer::from_vec(vec![7i64, 8]);
        assert!(check_data(&whole, 2, 8, "t").is_ok());
        assert!(check_data(&Buffer::from_vec(vec![0u8; 3]), 3, 1, "t").is_ok());
    }

    #[test]
    fn varlen_offsets_are_cumulative() {
        let (offs, data, bm) = encode_varlen(&[Value::str("ab"), Value::Null, Value::str("cde")], false).unwrap();
        assert_eq!(offs.typed_data::<u64>(), &[0, 2, 2, 5]);
        assert_eq!(varlen_at(&offs, &data, 2), b"cde");
        assert!(!is_valid(&bm, 1));
    }
}
