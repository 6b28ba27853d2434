//! Type descriptor codec.
//!
//! Flattens an [`ArrayType`] into a pre-order sequence of integer tags plus a
//! separate list of names, and rebuilds the type from that pair.
//!
//! ```text
//! list(struct(a: nullable(Int64), b: string))
//!   tags  = [LIST, STRUCT, 2, Int64|NULLABLE, STRING]
//!   names = ["a", "b"]
//! ```
//!
//! The wire codes below the shape codes are the ones the native engine
//! understands for leaf buffers. Shape codes above `BINARY` are only ever
//! consumed by this crate and by engines that decode descriptors.

use crate::error::{BridgeError, BridgeResult};
use crate::types::{ArrayType, Field, PrimitiveType};
use serde::{Deserialize, Serialize};

/// Numeric codes for leaf element types and nested shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum WireType {
    Int8 = 0,
    UInt8 = 1,
    Int32 = 2,
    UInt32 = 3,
    Int64 = 4,
    Float32 = 5,
    Float64 = 6,
    UInt64 = 7,
    Int16 = 8,
    UInt16 = 9,
    String = 10,
    Bool = 11,
    Decimal = 12,
    Date = 13,
    Time = 14,
    Datetime = 15,
    Timedelta = 16,
    Int128 = 17,
    List = 19,
    Struct = 20,
    Binary = 21,
    Map = 22,
    DictString = 23,
    Categorical = 24,
    Interval = 25,
}

/// OR'ed into a primitive code to mark the nullable variant.
pub const NULLABLE_FLAG: i32 = 0x40;

const ALL_WIRE_TYPES: [WireType; 25] = [
    WireType::Int8,
    WireType::UInt8,
    WireType::Int32,
    WireType::UInt32,
    WireType::Int64,
    WireType::Float32,
    WireType::Float64,
    WireType::UInt64,
    WireType::Int16,
    WireType::UInt16,
    WireType::String,
    WireType::Bool,
    WireType::Decimal,
    WireType::Date,
    WireType::Time,
    WireType::Datetime,
    WireType::Timedelta,
    WireType::Int128,
    WireType::List,
    WireType::Struct,
    WireType::Binary,
    WireType::Map,
    WireType::DictString,
    WireType::Categorical,
    WireType::Interval,
];

impl WireType {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        ALL_WIRE_TYPES.iter().copied().find(|w| w.code() == code)
    }

    pub fn of(p: PrimitiveType) -> Self {
        match p {
            PrimitiveType::Int8 => Self::Int8,
            PrimitiveType::Int16 => Self::Int16,
            PrimitiveType::Int32 => Self::Int32,
            PrimitiveType::Int64 => Self::Int64,
            PrimitiveType::UInt8 => Self::UInt8,
            PrimitiveType::UInt16 => Self::UInt16,
            PrimitiveType::UInt32 => Self::UInt32,
            PrimitiveType::UInt64 => Self::UInt64,
            PrimitiveType::Float32 => Self::Float32,
            PrimitiveType::Float64 => Self::Float64,
            PrimitiveType::Bool => Self::Bool,
            PrimitiveType::Date => Self::Date,
            PrimitiveType::Time => Self::Time,
            PrimitiveType::Datetime => Self::Datetime,
            PrimitiveType::Timedelta => Self::Timedelta,
        }
    }

    /// The primitive a leaf wire code stands for, if any.
    pub fn primitive(self) -> Option<PrimitiveType> {
        Some(match self {
            Self::Int8 => PrimitiveType::Int8,
            Self::Int16 => PrimitiveType::Int16,
            Self::Int32 => PrimitiveType::Int32,
            Self::Int64 => PrimitiveType::Int64,
            Self::UInt8 => PrimitiveType::UInt8,
            Self::UInt16 => PrimitiveType::UInt16,
            Self::UInt32 => PrimitiveType::UInt32,
            Self::UInt64 => PrimitiveType::UInt64,
            Self::Float32 => PrimitiveType::Float32,
            Self::Float64 => PrimitiveType::Float64,
            Self::Bool => PrimitiveType::Bool,
            Self::Date => PrimitiveType::Date,
            Self::Time => PrimitiveType::Time,
            Self::Datetime => PrimitiveType::Datetime,
            Self::Timedelta => PrimitiveType::Timedelta,
            _ => return None,
        })
    }

    /// Element width in bytes for fixed-width leaf codes.
    pub fn byte_width(self) -> Option<usize> {
        match self {
            Self::Int128 | Self::Decimal => Some(16),
            other => other.primitive().map(PrimitiveType::byte_width),
        }
    }
}

/// Unsigned wire type wide enough to hold `n_categories` codes plus an NA sentinel.
pub fn categorical_wire_type(n_categories: usize) -> WireType {
    if n_categories < u8::MAX as usize {
        WireType::UInt8
    } else if n_categories < u16::MAX as usize {
        WireType::UInt16
    } else if n_categories < u32::MAX as usize {
        WireType::UInt32
    } else {
        WireType::UInt64
    }
}

/// A flattened type: tags plus auxiliary names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub tags: Vec<i32>,
    /// Struct field names in pre-order, followed by category labels for a
    /// categorical with known categories.
    pub names: Vec<String>,
}

/// Flatten `ty` into its tag sequence.
///
/// # Errors
/// `UnsupportedType` naming the offending (sub)type.
pub fn encode_type(ty: &ArrayType) -> BridgeResult<Vec<i32>> {
    let mut tags = Vec::new();
    encode_into(ty, &mut tags, false)?;
    Ok(tags)
}

fn encode_into(ty: &ArrayType, tags: &mut Vec<i32>, nested: bool) -> BridgeResult<()> {
    match ty {
        ArrayType::Primitive(p) => tags.push(WireType::of(*p).code()),
        ArrayType::Nullable(p) => tags.push(WireType::of(*p).code() | NULLABLE_FLAG),
        ArrayType::String => tags.push(WireType::String.code()),
        ArrayType::Binary => tags.push(WireType::Binary.code()),
        ArrayType::Decimal { precision, scale } => {
            if *precision == 0 || *precision > 38 || scale > precision {
                return Err(BridgeError::unsupported(format!(
                    "encode_type: array type {ty} is not supported"
                )));
            }
            tags.extend([
                WireType::Decimal.code(),
                i32::from(*precision),
                i32::from(*scale),
            ]);
        }
        ArrayType::List(inner) => {
            tags.push(WireType::List.code());
            encode_into(inner, tags, true)?;
        }
        ArrayType::Struct(fields) => {
            if fields.is_empty() {
                return Err(BridgeError::unsupported(
                    "encode_type: struct array type with no fields is not supported",
                ));
            }
            tags.extend([WireType::Struct.code(), fields.len() as i32]);
            for f in fields {
                encode_into(&f.ty, tags, true)?;
            }
        }
        ArrayType::Map { key, value } => {
            tags.push(WireType::Map.code());
            encode_into(&ArrayType::map_storage_type(key, value), tags, true)?;
        }
        ArrayType::DictString | ArrayType::Categorical { .. } | ArrayType::Interval(_)
            if nested =>
        {
            return Err(BridgeError::unsupported(format!(
                "encode_type: unsupported type for subarray {ty}"
            )));
        }
        ArrayType::DictString => tags.push(WireType::DictString.code()),
        ArrayType::Categorical {
            categories,
            ordered,
        } => {
            let n = categories.as_ref().map_or(-1, |c| c.len() as i32);
            tags.extend([WireType::Categorical.code(), i32::from(*ordered), n]);
        }
        ArrayType::Interval(p) => {
            if !p.is_numeric() {
                return Err(BridgeError::unsupported(format!(
                    "encode_type: array type {ty} is not supported"
                )));
            }
            tags.extend([WireType::Interval.code(), WireType::of(*p).code()]);
        }
    }
    Ok(())
}

/// Struct field names in the same pre-order the tags use.
pub fn field_names(ty: &ArrayType) -> Vec<String> {
    let mut out = Vec::new();
    collect_field_names(ty, &mut out);
    out
}

fn collect_field_names(ty: &ArrayType, out: &mut Vec<String>) {
    match ty {
        ArrayType::Struct(fields) => {
            for f in fields {
                out.push(f.name.clone());
                collect_field_names(&f.ty, out);
            }
        }
        ArrayType::List(inner) => collect_field_names(inner, out),
        ArrayType::Map { key, value } => {
            collect_field_names(&ArrayType::map_storage_type(key, value), out);
        }
        _ => {}
    }
}

/// Tags and names together; the form engines receive.
///
/// # Errors
/// `UnsupportedType` as for [`encode_type`].
pub fn encode_descriptor(ty: &ArrayType) -> BridgeResult<TypeDescriptor> {
    let tags = encode_type(ty)?;
    let mut names = field_names(ty);
    if let ArrayType::Categorical {
        categories: Some(c),
        ..
    } = ty
    {
        names.extend(c.iter().cloned());
    }
    Ok(TypeDescriptor { tags, names })
}

/// Rebuild the type a descriptor was produced from.
///
/// # Errors
/// `ShapeMismatch` when the tags or names run out early or are left over,
/// `UnsupportedType` on an unknown code.
pub fn decode_type(desc: &TypeDescriptor) -> BridgeResult<ArrayType> {
    let mut cur = Cursor {
        tags: &desc.tags,
        names: &desc.names,
        tag_pos: 0,
        name_pos: 0,
    };
    let ty = cur.decode(false)?;
    if cur.tag_pos != desc.tags.len() || cur.name_pos != desc.names.len() {
        return Err(BridgeError::shape(format!(
            "decode_type: {} trailing tags, {} trailing names",
            desc.tags.len() - cur.tag_pos,
            desc.names.len() - cur.name_pos
        )));
    }
    Ok(ty)
}

struct Cursor<'a> {
    tags: &'a [i32],
    names: &'a [String],
    tag_pos: usize,
    name_pos: usize,
}

impl Cursor<'_> {
    fn next_tag(&mut self) -> BridgeResult<i32> {
        let t = self
            .tags
            .get(self.tag_pos)
            .copied()
            .ok_or_else(|| BridgeError::shape("decode_type: tag sequence ended early"))?;
        self.tag_pos += 1;
        Ok(t)
    }

    fn next_name(&mut self) -> BridgeResult<String> {
        let n = self
            .names
            .get(self.name_pos)
            .cloned()
            .ok_or_else(|| BridgeError::shape("decode_type: name list ended early"))?;
        self.name_pos += 1;
        Ok(n)
    }

    fn primitive(code: i32) -> BridgeResult<PrimitiveType> {
        WireType::from_code(code)
            .and_then(WireType::primitive)
            .ok_or_else(|| BridgeError::unsupported(format!("decode_type: unknown leaf code {code}")))
    }

    fn decode(&mut self, nested: bool) -> BridgeResult<ArrayType> {
        let code = self.next_tag()?;
        if code & NULLABLE_FLAG != 0 {
            return Ok(ArrayType::Nullable(Self::primitive(code & !NULLABLE_FLAG)?));
        }
        let wire = WireType::from_code(code)
            .ok_or_else(|| BridgeError::unsupported(format!("decode_type: unknown code {code}")))?;
        let ty = match wire {
            WireType::String => ArrayType::String,
            WireType::Binary => ArrayType::Binary,
            WireType::Decimal => {
                let precision = self.next_tag()?;
                let scale = self.next_tag()?;
                ArrayType::Decimal {
                    precision: u8::try_from(precision)
                        .map_err(|_| BridgeError::unsupported("decode_type: bad decimal precision"))?,
                    scale: u8::try_from(scale)
                        .map_err(|_| BridgeError::unsupported("decode_type: bad decimal scale"))?,
                }
            }
            WireType::List => ArrayType::list(self.decode(true)?),
            WireType::Struct => {
                let n = self.next_tag()?;
                // Every field consumes at least one tag and one name.
                let n = usize::try_from(n)
                    .ok()
                    .filter(|&n| {
                        n <= self.tags.len() - self.tag_pos && n <= self.names.len() - self.name_pos
                    })
                    .ok_or_else(|| {
                        BridgeError::shape(format!(
                            "decode_type: struct field count {n} does not fit the descriptor"
                        ))
                    })?;
                let mut fields = Vec::with_capacity(n);
                for _ in 0..n {
                    let name = self.next_name()?;
                    fields.push(Field::new(name, self.decode(true)?));
                }
                ArrayType::Struct(fields)
            }
            WireType::Map => {
                // The key/value names were emitted for the storage struct.
                let storage = self.decode(true)?;
                match storage {
                    ArrayType::List(inner) => match *inner {
                        ArrayType::Struct(fields) => match <[Field; 2]>::try_from(fields) {
                            Ok([key, value]) => ArrayType::map(key.ty, value.ty),
                            Err(fields) => {
                                return Err(BridgeError::shape(format!(
                                    "decode_type: map storage struct has {} fields, expected 2",
                                    fields.len()
                                )));
                            }
                        },
                        other => {
                            return Err(BridgeError::shape(format!(
                                "decode_type: map storage must be a two-field struct, got {other}"
                            )));
                        }
                    },
                    other => {
                        return Err(BridgeError::shape(format!(
                            "decode_type: map storage must be a list, got {other}"
                        )));
                    }
                }
            }
            WireType::DictString | WireType::Categorical | WireType::Interval if nested => {
                return Err(BridgeError::unsupported(format!(
                    "decode_type: unsupported type for subarray (code {code})"
                )));
            }
            WireType::DictString => ArrayType::DictString,
            WireType::Categorical => {
                let ordered = self.next_tag()? != 0;
                let n = self.next_tag()?;
                let categories = if n < 0 {
                    None
                } else {
                    Some((0..n).map(|_| self.next_name()).collect::<BridgeResult<Vec<_>>>()?)
                };
                ArrayType::Categorical {
                    categories,
                    ordered,
                }
            }
            WireType::Interval => ArrayType::Interval(Self::primitive(self.next_tag()?)?),
            WireType::Int128 => {
                return Err(BridgeError::unsupported(
                    "decode_type: Int128 is a storage code, not an array type",
                ));
            }
            leaf => ArrayType::Primitive(Self::primitive(leaf.code())?),
        };
        Ok(ty)
    }
}

/// Number of entries a nested type contributes to a length vector.
pub fn nested_length_count(ty: &ArrayType) -> usize {
    match ty {
        ArrayType::List(inner) => 1 + nested_length_count(inner),
        ArrayType::Struct(fields) => 1 + fields.iter().map(|f| nested_length_count(&f.ty)).sum::<usize>(),
        ArrayType::Map { key, value } => nested_length_count(&ArrayType::map_storage_type(key, value)),
        _ => 1,
    }
}

/// Number of entries a nested type contributes to a buffer vector.
pub fn nested_buffer_count(ty: &ArrayType) -> usize {
    match ty {
        ArrayType::List(inner) => 2 + nested_buffer_count(inner),
        ArrayType::Struct(fields) => 1 + fields.iter().map(|f| nested_buffer_count(&f.ty)).sum::<usize>(),
        ArrayType::Map { key, value } => nested_buffer_count(&ArrayType::map_storage_type(key, value)),
        ArrayType::String | ArrayType::Binary => 3,
        _ => 2,
    }
}
