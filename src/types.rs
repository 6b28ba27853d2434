//! Static array types of the managed runtime.
//!
//! [`ArrayType`] is a closed, tagged set of shapes. Encoding, export and import
//! each dispatch over this same variant set, so adding a shape means touching
//! all three in lock-step.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-width element types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// One byte per element.
    Bool,
    /// Days since epoch, stored as i64.
    Date,
    /// Nanoseconds since midnight, stored as i64.
    Time,
    /// Nanoseconds since epoch, `i64::MIN` is NaT.
    Datetime,
    /// Nanoseconds, `i64::MIN` is NaT.
    Timedelta,
}

impl PrimitiveType {
    /// Element width in bytes.
    pub fn byte_width(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64
            | Self::UInt64
            | Self::Float64
            | Self::Date
            | Self::Time
            | Self::Datetime
            | Self::Timedelta => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Bool | Self::Date | Self::Time)
    }

    /// Types whose plain (non-nullable) arrays use the NaT sentinel.
    pub fn has_nat(self) -> bool {
        matches!(self, Self::Datetime | Self::Timedelta)
    }
}

/// A named struct field.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: ArrayType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: ArrayType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// The statically known type of an array value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayType {
    /// Plain primitive array without a null bitmap.
    Primitive(PrimitiveType),
    /// Primitive array with a null bitmap.
    Nullable(PrimitiveType),
    String,
    Binary,
    Decimal { precision: u8, scale: u8 },
    List(Box<ArrayType>),
    Struct(Vec<Field>),
    /// Stored as a list of `{key, value}` structs.
    Map {
        key: Box<ArrayType>,
        value: Box<ArrayType>,
    },
    /// Dictionary-encoded strings: a string dictionary plus i32 indices.
    DictString,
    /// `categories == None` means the category list is only known at run time.
    Categorical {
        categories: Option<Vec<String>>,
        ordered: bool,
    },
    /// Paired numeric bounds.
    Interval(PrimitiveType),
}

impl ArrayType {
    pub fn list(inner: ArrayType) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn map(key: ArrayType, value: ArrayType) -> Self {
        Self::Map {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    pub fn categorical(categories: &[&str], ordered: bool) -> Self {
        Self::Categorical {
            categories: Some(categories.iter().map(|c| (*c).to_string()).collect()),
            ordered,
        }
    }

    pub fn is_nested(&self) -> bool {
        matches!(self, Self::List(_) | Self::Struct(_) | Self::Map { .. })
    }

    /// The list-of-struct type a map is physically stored as.
    pub fn map_storage_type(key: &ArrayType, value: &ArrayType) -> ArrayType {
        ArrayType::list(ArrayType::Struct(vec![
            Field::new("key", key.clone()),
            Field::new("value", value.clone()),
        ]))
    }

    /// Whether the type carries categories that must be resolved at run time.
    pub fn has_unknown_categories(&self) -> bool {
        matches!(self, Self::Categorical { categories: None, .. })
    }
}

impl fmt::Display for ArrayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "array({p:?})"),
            Self::Nullable(p) => write!(f, "nullable({p:?})"),
            Self::String => write!(f, "string"),
            Self::Binary => write!(f, "binary"),
            Self::Decimal { precision, scale } => write!(f, "decimal({precision}, {scale})"),
            Self::List(inner) => write!(f, "list({inner})"),
            Self::Struct(fields) => {
                write!(f, "struct(")?;
                for (i, fld) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", fld.name, fld.ty)?;
                }
                write!(f, ")")
            }
            Self::Map { key, value } => write!(f, "map({key}, {value})"),
            Self::DictString => write!(f, "dict_string"),
            Self::Categorical { categories, ordered } => match categories {
                Some(c) => write!(f, "categorical({} categories, ordered={ordered})", c.len()),
                None => write!(f, "categorical(unknown, ordered={ordered})"),
            },
            Self::Interval(p) => write!(f, "interval({p:?})"),
        }
    }
}
