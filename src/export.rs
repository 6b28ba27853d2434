//! Array exporter: managed [`Array`] to native [`ArrayHandle`].
//!
//! Each array shape maps onto one native constructor. Nested arrays (list,
//! struct, map) are flattened in a single pre-order walk that produces the
//! type tags, one length per node and the buffer groups, which the importer
//! later consumes in the same order.

use crate::array::Array;
use crate::bridge::Bridge;
use crate::buffers::{encode_primitive, read_primitive};
use crate::codec::{categorical_wire_type, encode_descriptor, WireType};
use crate::error::{BridgeError, BridgeResult};
use crate::handle::ArrayHandle;
use crate::metrics::ARRAYS_EXPORTED;
use crate::types::PrimitiveType;
use crate::value::Value;
use arrow::buffer::Buffer;
use tracing::debug;

impl Bridge {
    /// Export `array`, sharing its buffers with the native side.
    ///
    /// The managed array stays usable; each shared buffer gains one reference
    /// that the returned handle owns.
    ///
    /// # Errors
    /// `UnsupportedType` for shapes with no native layout (for example a
    /// categorical nested inside a list), `NativeOperationFailure` if the
    /// engine rejects the array.
    pub fn array_to_info(&self, array: &Array) -> BridgeResult<ArrayHandle> {
        self.export(array.clone())
    }

    /// Export `array`, moving its buffers to the native side without taking
    /// an extra reference.
    ///
    /// # Errors
    /// As for [`Bridge::array_to_info`].
    pub fn array_to_info_owned(&self, array: Array) -> BridgeResult<ArrayHandle> {
        self.export(array)
    }

    fn export(&self, array: Array) -> BridgeResult<ArrayHandle> {
        let ty = array.array_type();
        debug!(ty = %ty, len = array.len(), "array_to_info");
        let engine = self.engine();
        let id = match array {
            Array::Primitive { ty: p, data, len } => self.call(
                "numpy_array_to_info",
                engine.numpy_array_to_info(len as u64, data, WireType::of(p).code()),
            )?,
            Array::Nullable {
                ty: p,
                data,
                validity,
                len,
            } => self.call(
                "nullable_array_to_info",
                engine.nullable_array_to_info(len as u64, data, WireType::of(p).code(), validity),
            )?,
            Array::Decimal {
                precision,
                scale,
                data,
                validity,
                len,
            } => {
                encode_descriptor(&ty)?;
                self.call(
                    "decimal_array_to_info",
                    engine.decimal_array_to_info(
                        len as u64,
                        data,
                        WireType::Decimal.code(),
                        validity,
                        i32::from(precision),
                        i32::from(scale),
                    ),
                )?
            }
            Array::Varlen {
                binary,
                offsets,
                data,
                validity,
                len,
            } => {
                let code = if binary {
                    WireType::Binary
                } else {
                    WireType::String
                };
                let n_chars = crate::buffers::offset_at(&offsets, len) as u64;
                self.call(
                    "string_array_to_info",
                    engine.string_array_to_info(
                        code.code(),
                        len as u64,
                        n_chars,
                        data,
                        offsets,
                        validity,
                        binary,
                    ),
                )?
            }
            nested @ (Array::List { .. } | Array::Struct { .. } | Array::Map { .. }) => {
                let desc = encode_descriptor(&ty)?;
                let mut lengths = Vec::with_capacity(desc.tags.len());
                let mut buffers = Vec::new();
                nested_walk(&nested, &mut lengths, &mut buffers)?;
                debug!(
                    tags = desc.tags.len(),
                    lengths = lengths.len(),
                    buffers = buffers.len(),
                    "nested_array_to_info"
                );
                self.call(
                    "nested_array_to_info",
                    engine.nested_array_to_info(&desc.tags, &lengths, buffers, &desc.names),
                )?
            }
            Array::DictString {
                dictionary,
                indices,
                has_global_dictionary,
                has_deduped_local_dictionary,
            } => {
                let dict = self.export(*dictionary)?;
                let idx = self.export(*indices)?;
                // Both children are consumed by the engine.
                self.call(
                    "dict_str_array_to_info",
                    engine.dict_str_array_to_info(
                        dict.into_raw(),
                        idx.into_raw(),
                        has_global_dictionary,
                        has_deduped_local_dictionary,
                    ),
                )?
            }
            Array::Categorical {
                codes,
                code_type,
                categories,
                len,
                ..
            } => {
                let wire = categorical_wire_type(categories.len());
                let unsigned = codes_to_unsigned(code_type, &codes, len, wire)?;
                self.call(
                    "categorical_array_to_info",
                    engine.categorical_array_to_info(
                        len as u64,
                        unsigned,
                        wire.code(),
                        categories.len() as u64,
                    ),
                )?
            }
            Array::Interval {
                bound,
                left,
                right,
                len,
            } => {
                encode_descriptor(&ty)?;
                self.call(
                    "interval_array_to_info",
                    engine.interval_array_to_info(len as u64, left, right, WireType::of(bound).code()),
                )?
            }
        };
        self.bump(ARRAYS_EXPORTED, 1);
        Ok(self.wrap_array(id))
    }
}

/// Pre-order walk emitting one length per node and the node's buffer group.
fn nested_walk(array: &Array, lengths: &mut Vec<u64>, buffers: &mut Vec<Option<Buffer>>) -> BridgeResult<()> {
    if let Array::Map { entries } = array {
        return nested_walk(entries, lengths, buffers);
    }
    lengths.push(array.len() as u64);
    match array {
        Array::List {
            offsets,
            validity,
            values,
            ..
        } => {
            buffers.extend([Some(offsets.clone()), Some(validity.clone())]);
            nested_walk(values, lengths, buffers)?;
        }
        Array::Struct {
            validity, children, ..
        } => {
            buffers.push(Some(validity.clone()));
            for c in children {
                nested_walk(c, lengths, buffers)?;
            }
        }
        Array::Varlen {
            offsets,
            data,
            validity,
            ..
        } => buffers.extend([
            Some(offsets.clone()),
            Some(validity.clone()),
            Some(data.clone()),
        ]),
        Array::Nullable { data, validity, .. } | Array::Decimal { data, validity, .. } => {
            buffers.extend([Some(validity.clone()), Some(data.clone())]);
        }
        Array::Primitive { data, .. } => buffers.extend([None, Some(data.clone())]),
        other => {
            return Err(BridgeError::unsupported(format!(
                "array_to_info: unsupported type for subarray {}",
                other.array_type()
            )));
        }
    }
    Ok(())
}

/// Signed managed codes (-1 = NA) to unsigned wire codes (MAX = NA).
fn codes_to_unsigned(code_type: PrimitiveType, codes: &Buffer, len: usize, wire: WireType) -> BridgeResult<Buffer> {
    let target = wire
        .primitive()
        .ok_or_else(|| BridgeError::unsupported(format!("{wire:?} is not a code type")))?;
    let na = match target {
        PrimitiveType::UInt8 => Value::UInt(u64::from(u8::MAX)),
        PrimitiveType::UInt16 => Value::UInt(u64::from(u16::MAX)),
        PrimitiveType::UInt32 => Value::UInt(u64::from(u32::MAX)),
        _ => Value::UInt(u64::MAX),
    };
    let vals: Vec<Value> = (0..len)
        .map(|i| match read_primitive(code_type, codes, i) {
            Value::Int(c) if c >= 0 => Value::UInt(c as u64),
            _ => na.clone(),
        })
        .collect();
    encode_primitive(target, &vals, false)
}
